//! Read-side views over the store.
//!
//! Every function here takes a [`StoreState`] borrowed under the shared lock
//! and returns a view that borrows from it, so a handler can serialize the
//! response before releasing the lock. Access isolation is applied here:
//! a non-admin principal only ever sees common sections and their own
//! user-specific sections and metadata.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::value::RawValue;
use thiserror::Error;

use crate::auth::Principal;
use crate::models::{ContentId, DedupStore, PeriodId, PeriodResult};
use crate::store::{PeriodLookup, StoreState};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("Period not found")]
    PeriodNotFound,
    #[error("Period unavailable")]
    PeriodUnavailable,
    #[error("No data for user in this period")]
    NoUserData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PeriodSummary {
    pub started: i64,
    pub updated: i64,
}

/// Available periods the principal has data in, with their timestamps.
pub fn list_periods(state: &StoreState, who: &Principal) -> BTreeMap<PeriodId, PeriodSummary> {
    state
        .available_periods()
        .filter(|(_, result)| {
            who.is_admin || (!who.is_anonymous() && result.has_seen(&who.user))
        })
        .map(|(id, result)| {
            (
                id,
                PeriodSummary {
                    started: result.raw.started,
                    updated: result.raw.updated,
                },
            )
        })
        .collect()
}

#[derive(Debug, Serialize)]
pub struct PeriodView<'a> {
    pub common_content: &'a BTreeMap<String, ContentId>,
    pub user_content: BTreeMap<&'a str, BTreeMap<&'a str, &'a str>>,
}

impl<'a> PeriodView<'a> {
    fn full(result: &'a PeriodResult) -> Self {
        let user_content = result
            .user_content
            .iter()
            .map(|(name, by_user)| {
                let by_user: BTreeMap<&str, &str> = by_user
                    .iter()
                    .map(|(user, html)| (user.as_str(), html.as_str()))
                    .collect();
                (name.as_str(), by_user)
            })
            .collect();
        Self {
            common_content: &result.common_content,
            user_content,
        }
    }

    fn for_user(result: &'a PeriodResult, user: &str) -> Self {
        let user_content = result
            .user_content
            .iter()
            .filter_map(|(name, by_user)| {
                let (owner, html) = by_user.get_key_value(user)?;
                Some((name.as_str(), BTreeMap::from([(owner.as_str(), html.as_str())])))
            })
            .collect();
        Self {
            common_content: &result.common_content,
            user_content,
        }
    }
}

/// What a client needs to render one period: the content table, the
/// period's sections and the display titles.
#[derive(Debug, Serialize)]
pub struct ReportView<'a> {
    pub dedup: &'a DedupStore,
    pub results: BTreeMap<PeriodId, PeriodView<'a>>,
    pub name_mapping: &'a BTreeMap<String, String>,
}

pub fn get_report<'a>(
    state: &'a StoreState,
    period: PeriodId,
    who: &Principal,
) -> Result<ReportView<'a>, QueryError> {
    let result = match state.lookup(period) {
        PeriodLookup::NotFound => return Err(QueryError::PeriodNotFound),
        PeriodLookup::Unavailable => return Err(QueryError::PeriodUnavailable),
        PeriodLookup::Available(result) => result,
    };

    let view = if who.is_admin {
        PeriodView::full(result)
    } else if !who.is_anonymous() && result.has_seen(&who.user) {
        PeriodView::for_user(result, &who.user)
    } else {
        return Err(QueryError::NoUserData);
    };

    Ok(ReportView {
        dedup: &state.results.dedup,
        results: BTreeMap::from([(period, view)]),
        name_mapping: &state.results.name_mapping,
    })
}

#[derive(Debug, Serialize)]
pub struct RawView<'a> {
    pub started: i64,
    pub updated: i64,
    pub data: BTreeMap<&'a str, &'a RawValue>,
}

/// Metadata for the requested periods plus a diagnostic message listing
/// the periods that were left out and why.
#[derive(Debug, Default)]
pub struct RawDataResponse<'a> {
    pub data: BTreeMap<PeriodId, RawView<'a>>,
    pub msg: String,
}

impl RawDataResponse<'_> {
    fn skip(&mut self, reason: &str, period: PeriodId) {
        self.msg.push_str(&format!("{}: {};", reason, period));
    }
}

pub fn get_raw_data<'a>(
    state: &'a StoreState,
    periods: &[PeriodId],
    who: &Principal,
) -> RawDataResponse<'a> {
    let mut out = RawDataResponse::default();
    if periods.is_empty() {
        out.msg.push_str("no period specified");
        return out;
    }

    for &period in periods {
        let result = match state.lookup(period) {
            PeriodLookup::NotFound => {
                out.skip("period not found", period);
                continue;
            }
            PeriodLookup::Unavailable => {
                out.skip("period unavailable", period);
                continue;
            }
            PeriodLookup::Available(result) => result,
        };

        let raw = &result.raw;
        let data: BTreeMap<&str, &RawValue> = raw
            .data
            .iter()
            .filter(|(user, _)| who.can_view(user))
            .map(|(user, value)| (user.as_str(), &**value))
            .collect();
        if data.is_empty() && !who.is_admin {
            out.skip("no data for user in period", period);
            continue;
        }

        out.data.insert(
            period,
            RawView {
                started: raw.started,
                updated: raw.updated,
                data,
            },
        );
    }
    out
}
