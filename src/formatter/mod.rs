//! Snapshot formatting.
//!
//! Converts a readability [`Snapshot`](crate::snapshot::Snapshot) into one of
//! the supported output formats and applies the image/link policies selected
//! by request headers.

pub mod expand;
pub mod markdown;

pub use expand::{expand_markdown, PromptSegment};

use serde::Serialize;
use std::fmt;

use crate::snapshot::Snapshot;

/// Output format selected by the caller (`X-Respond-With`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RespondWith {
    /// Extracted article rendered as Markdown
    #[default]
    Default,
    /// Full-page Markdown regardless of readability success
    Markdown,
    /// Raw page HTML
    Html,
    /// Readability text content
    Text,
    /// URL of the uploaded screenshot
    Screenshot,
}

impl RespondWith {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "default" => Some(Self::Default),
            "markdown" => Some(Self::Markdown),
            "html" => Some(Self::Html),
            "text" => Some(Self::Text),
            "screenshot" => Some(Self::Screenshot),
            _ => None,
        }
    }
}

/// Image/link enrichment selected by request headers
#[derive(Debug, Clone, Copy, Default)]
pub struct FormatPolicies {
    /// `X-With-Generated-Alt`: fill in alts for bare image tokens
    pub generated_alt: bool,
    /// `X-With-Images-Summary`: append an images section
    pub images_summary: bool,
    /// `X-With-Links-Summary`: append a links section
    pub links_summary: bool,
}

/// One formatted page, ready for the HTTP response or a prompt prefix
#[derive(Debug, Clone, Serialize)]
pub struct FormattedPage {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_time: Option<String>,
    #[serde(skip)]
    mode: RespondWith,
}

impl FormattedPage {
    /// Whether the chosen mode produced anything usable.
    ///
    /// `default` mode with an empty readability article is the signal for
    /// callers to retry with `markdown`; the formatter itself does not fall
    /// back.
    pub fn has_content(&self) -> bool {
        match self.mode {
            RespondWith::Default | RespondWith::Markdown => {
                self.content.as_deref().is_some_and(|c| !c.trim().is_empty())
            }
            RespondWith::Html => self.html.as_deref().is_some_and(|h| !h.is_empty()),
            RespondWith::Text => self.text.as_deref().is_some_and(|t| !t.is_empty()),
            RespondWith::Screenshot => self.screenshot_url.is_some(),
        }
    }

    pub fn set_screenshot_url(&mut self, url: String) {
        self.screenshot_url = Some(url);
    }
}

impl fmt::Display for FormattedPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.mode {
            RespondWith::Html => write!(f, "{}", self.html.as_deref().unwrap_or_default()),
            RespondWith::Text => write!(f, "{}", self.text.as_deref().unwrap_or_default()),
            RespondWith::Screenshot => {
                write!(f, "{}", self.screenshot_url.as_deref().unwrap_or_default())
            }
            RespondWith::Default | RespondWith::Markdown => {
                if let Some(title) = &self.title {
                    writeln!(f, "Title: {title}")?;
                    writeln!(f)?;
                }
                writeln!(f, "URL Source: {}", self.url)?;
                if let Some(published) = &self.published_time {
                    writeln!(f)?;
                    writeln!(f, "Published Time: {published}")?;
                }
                writeln!(f)?;
                writeln!(f, "Markdown Content:")?;
                write!(f, "{}", self.content.as_deref().unwrap_or_default())
            }
        }
    }
}

/// Render a snapshot in the requested format.
///
/// Screenshot mode returns a page with `screenshot_url` unset; the caller
/// uploads the bytes and fills it in.
pub fn format_snapshot(mode: RespondWith, snapshot: &Snapshot) -> FormattedPage {
    format_snapshot_with(mode, snapshot, FormatPolicies::default())
}

pub fn format_snapshot_with(
    mode: RespondWith,
    snapshot: &Snapshot,
    policies: FormatPolicies,
) -> FormattedPage {
    let content = match mode {
        RespondWith::Default => {
            let article = snapshot.content.as_deref().unwrap_or_default();
            if article.trim().is_empty() {
                None
            } else {
                Some(markdown::html_to_markdown(article))
            }
        }
        RespondWith::Markdown => Some(markdown::html_to_markdown(&snapshot.html)),
        _ => None,
    };

    let content = content.map(|md| {
        let mut md = md;
        if policies.generated_alt {
            md = markdown::fill_generated_alts(&md);
        }
        if policies.images_summary {
            md = markdown::append_images_summary(&md);
        }
        if policies.links_summary {
            md = markdown::append_links_summary(&md);
        }
        md
    });

    FormattedPage {
        url: snapshot.href.clone(),
        title: if snapshot.title.is_empty() {
            None
        } else {
            Some(snapshot.title.clone())
        },
        content,
        html: matches!(mode, RespondWith::Html).then(|| snapshot.html.clone()),
        text: matches!(mode, RespondWith::Text).then(|| snapshot.text_content.clone()),
        screenshot_url: None,
        published_time: snapshot.published_time.clone(),
        mode,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(content: Option<&str>, html: &str) -> Snapshot {
        Snapshot {
            href: "https://example.com/".into(),
            title: "Example Domain".into(),
            content: content.map(String::from),
            text_content: "Example text".into(),
            html: html.into(),
            published_time: None,
        }
    }

    #[test]
    fn default_mode_without_article_has_no_content() {
        let snap = snapshot(None, "<html><body><p>hello</p></body></html>");
        let page = format_snapshot(RespondWith::Default, &snap);
        assert!(!page.has_content());
    }

    #[test]
    fn markdown_mode_renders_full_page() {
        let snap = snapshot(None, "<html><body><h1>Head</h1><p>hello</p></body></html>");
        let page = format_snapshot(RespondWith::Markdown, &snap);
        assert!(page.has_content());
        assert!(page.content.as_deref().unwrap().contains("hello"));
    }

    #[test]
    fn display_carries_title_and_source() {
        let snap = snapshot(Some("<p>body</p>"), "<html></html>");
        let page = format_snapshot(RespondWith::Default, &snap);
        let rendered = page.to_string();
        assert!(rendered.starts_with("Title: Example Domain"));
        assert!(rendered.contains("URL Source: https://example.com/"));
        assert!(rendered.contains("Markdown Content:"));
    }

    #[test]
    fn text_mode_passthrough() {
        let snap = snapshot(None, "<html></html>");
        let page = format_snapshot(RespondWith::Text, &snap);
        assert_eq!(page.to_string(), "Example text");
    }
}
