use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

pub const MULTIPLE_AUTHORS_SUFFIX: &str = " and others";
pub const DATE_UNAVAILABLE: &str = "date unavailable";

const PUBLISHED_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";
const DISPLAY_FORMAT: &str = "%d %b, %Y";

/// One news item as returned by the content API.
///
/// Fields are kept exactly as the server sent them; the display helpers below derive
/// the trimmed title, the byline and the human date at render time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Article {
    pub title: String,
    pub section: String,
    pub author: Option<String>,
    pub published_at: String,
    pub url: String,
}

impl Article {
    pub fn new(
        title: impl Into<String>,
        section: impl Into<String>,
        author: Option<String>,
        published_at: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            section: section.into(),
            author,
            published_at: published_at.into(),
            url: url.into(),
        }
    }

    /// Title without the trailing `| suffix` the API appends to some headlines.
    pub fn display_title(&self) -> &str {
        match self.title.find('|') {
            Some(end) => self.title[..end].trim_end(),
            None => &self.title,
        }
    }

    /// `section` or `section | author`, never a dangling separator.
    pub fn byline(&self) -> String {
        match self.author.as_deref() {
            Some(author) if !author.trim().is_empty() => format!("{} | {}", self.section, author),
            _ => self.section.clone(),
        }
    }

    pub fn display_date(&self) -> String {
        format_published(&self.published_at).unwrap_or_else(|| DATE_UNAVAILABLE.to_string())
    }
}

/// Collapses a contributor list into the single author shown on a row.
pub fn author_from_contributors<S: AsRef<str>>(names: &[S]) -> Option<String> {
    let first = names.first()?;
    let mut author = first.as_ref().to_string();
    if names.len() > 1 {
        author.push_str(MULTIPLE_AUTHORS_SUFFIX);
    }
    Some(author)
}

/// Converts `2018-05-17T13:21:54Z` into `17 May, 2018`.
pub fn format_published(raw: &str) -> Option<String> {
    let parsed = NaiveDateTime::parse_from_str(raw.trim(), PUBLISHED_FORMAT).ok()?;
    Some(parsed.format(DISPLAY_FORMAT).to_string())
}
