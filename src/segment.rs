//! Structural segmentation of a user's bulletin into named sections.
//!
//! A bulletin is a flat run of top-level `<body>` children. Sections start at
//! heading elements (`h1`..`h6`) and at the element holding the
//! `<a name="footer">` anchor, and run up to the next such element. The
//! machine name of a section is the `name` attribute of the first child of
//! its opening element; its display title is that element's text:
//!
//! ```text
//! <body>
//!   <p>Hello</p>                          ← greeting (implicit)
//!   <h2><a name="news"></a>NEWS</h2>      ← news
//!   <table>…</table>
//!   <h2><a name="jobs"></a>Jobs</h2>      ← jobs
//!   <div>…</div>
//!   <p><a name="footer"></a>Bye</p>       ← footer, runs to the end
//!   <sub>…</sub>
//! </body>
//! ```
//!
//! Before parsing, every `<period>:<user>` token is rewritten to
//! `<period>:web` so that sections which only differ by the viewer's own
//! identifier compare equal across users.
//!
//! Segmentation is pure. [`segment`] returns the ordered sections and the
//! caller commits them with [`ResultSet::commit_sections`].
//!
//! [`ResultSet::commit_sections`]: crate::models::ResultSet::commit_sections

use std::collections::HashSet;

use scraper::{ElementRef, Html, Selector};

use crate::error::{IngestError, Result};
use crate::models::{Classification, PeriodId, Section};

const HEAD_MARKER: &str = "<head>";
const GREETING: &str = "greeting";
const FOOTER: &str = "footer";
const GREETING_ANCHOR: &str = r#"<a name="greeting"></a>"#;

const ALWAYS_COMMON: [&str; 4] = ["greeting", "news", "usage", "footer"];
const PROBLEMS_SUFFIX: &str = "_problems";
const COMMON_SUFFIXES: [&str; 2] = ["_metrics", PROBLEMS_SUFFIX];

/// Replaces the viewer's self-references with the neutral `web` identity.
pub fn normalize_tokens(content: &str, period: PeriodId, user: &str) -> String {
    content.replace(&format!("{}:{}", period, user), &format!("{}:web", period))
}

/// The set of machine names whose sections are shared by all users.
#[derive(Debug, Clone)]
pub struct CommonNames {
    exact: HashSet<String>,
}

impl CommonNames {
    /// Builds the set for one document: the fixed names, plus `X` for every
    /// anchor named `X_problems`.
    pub fn from_document(doc: &Html) -> Result<Self> {
        let mut exact: HashSet<String> = ALWAYS_COMMON.iter().map(|s| s.to_string()).collect();
        for anchor in doc.select(&selector(r#"a[name$="_problems"]"#)?) {
            if let Some(name) = anchor.value().attr("name") {
                let prefix = name.strip_suffix(PROBLEMS_SUFFIX).unwrap_or(name);
                exact.insert(prefix.to_string());
            }
        }
        Ok(Self { exact })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.exact.contains(name)
    }

    pub fn classify(&self, machine_name: &str) -> Classification {
        if self.exact.contains(machine_name)
            || COMMON_SUFFIXES.iter().any(|s| machine_name.ends_with(s))
        {
            Classification::Common
        } else {
            Classification::UserSpecific
        }
    }
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| IngestError::Html(format!("{}: {:?}", css, e)))
}

/// Splits one user's bulletin into its ordered sections.
///
/// `header` is the raw header blob (mail headers followed by `<head>…`),
/// `body` the mail body. Fails if the header has no `<head>` marker, or if a
/// section boundary carries no machine name.
pub fn segment(header: &str, body: &str, period: PeriodId, user: &str) -> Result<Vec<Section>> {
    let head_at = header
        .find(HEAD_MARKER)
        .ok_or_else(|| IngestError::HeaderMarkerMissing {
            user: user.to_string(),
        })?;
    let mut content = String::with_capacity(header.len() - head_at + body.len());
    content.push_str(&header[head_at..]);
    content.push_str(body);
    let content = normalize_tokens(&content, period, user);

    let doc = Html::parse_document(&content);
    let common = CommonNames::from_document(&doc)?;

    let mut breakpoints: HashSet<_> = doc
        .select(&selector("h1, h2, h3, h4, h5, h6")?)
        .map(|heading| heading.id())
        .collect();
    for anchor in doc.select(&selector(r#"a[name="footer"]"#)?) {
        if let Some(parent) = anchor.parent() {
            breakpoints.insert(parent.id());
        }
    }

    let Some(body_el) = doc.select(&selector("body")?).next() else {
        return Ok(Vec::new());
    };
    let children: Vec<ElementRef<'_>> = body_el.children().filter_map(ElementRef::wrap).collect();
    if children.is_empty() {
        return Ok(Vec::new());
    }

    let mut sections = Vec::new();
    let mut start = 0;
    let mut machine_name = GREETING.to_string();
    let mut title = "Greeting".to_string();

    loop {
        let is_footer = machine_name == FOOTER;
        let end = if is_footer {
            children.len()
        } else {
            children[start + 1..]
                .iter()
                .position(|el| breakpoints.contains(&el.id()))
                .map_or(children.len(), |offset| start + 1 + offset)
        };

        let mut html = String::new();
        for (idx, el) in children.iter().enumerate().take(end).skip(start) {
            if idx == 0 {
                html.push_str(&with_greeting_anchor(el));
            } else {
                html.push_str(&el.html());
            }
        }
        if is_footer {
            title = "Footer".to_string();
        }

        sections.push(Section {
            classification: common.classify(&machine_name),
            machine_name: machine_name.clone(),
            title: std::mem::take(&mut title),
            html,
        });

        if is_footer {
            break;
        }

        let missing = || IngestError::MachineNameMissing {
            user: user.to_string(),
            after: machine_name.clone(),
        };
        let next = children.get(end).ok_or_else(missing)?;
        let next_name = next
            .children()
            .find_map(ElementRef::wrap)
            .and_then(|first| first.value().attr("name"))
            .ok_or_else(missing)?
            .to_string();

        title = next.text().collect();
        machine_name = next_name;
        start = end;
    }

    Ok(sections)
}

/// Serializes `el` with a `greeting` anchor inserted as its first child.
fn with_greeting_anchor(el: &ElementRef<'_>) -> String {
    let outer = el.html();
    let inner = el.inner_html();
    let close = format!("</{}>", el.value().name());
    match outer
        .strip_suffix(close.as_str())
        .and_then(|rest| rest.strip_suffix(inner.as_str()))
    {
        Some(open) => format!("{}{}{}{}", open, GREETING_ANCHOR, inner, close),
        // void element, nothing to nest into
        None => format!("{}{}", GREETING_ANCHOR, outer),
    }
}
