//! Value types produced by the snapshot pipeline.

use serde::{Deserialize, Serialize};

/// A readability-extracted view of a page's DOM at one instant.
///
/// Field names mirror the in-page reporter's JSON, which is also the shape
/// persisted to object storage under `snapshots/<recordId>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Live document URL (after redirects)
    pub href: String,
    #[serde(default)]
    pub title: String,
    /// Extracted article HTML; `None` when readability found nothing
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub text_content: String,
    /// Full serialized DOM
    #[serde(default)]
    pub html: String,
    #[serde(default)]
    pub published_time: Option<String>,
}

/// One item yielded by a scrape: the parse at some instant plus the
/// screenshot taken alongside it. The last yielded result of a load is the
/// post-settle parse.
#[derive(Debug, Clone)]
pub struct PageResult {
    pub url: String,
    pub snapshot: Snapshot,
    pub screenshot: Option<Vec<u8>>,
}

/// A cookie forwarded from `X-Set-Cookie`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CookieSpec {
    pub name: String,
    pub value: String,
    pub domain: Option<String>,
    pub path: Option<String>,
}

impl CookieSpec {
    /// Parse one `Set-Cookie`-syntax header value.
    /// Returns `None` when there is no `name=value` pair.
    pub fn parse(header: &str) -> Option<Self> {
        let mut parts = header.split(';').map(str::trim);
        let (name, value) = parts.next()?.split_once('=')?;
        if name.is_empty() {
            return None;
        }
        let mut spec = Self {
            name: name.trim().to_string(),
            value: value.trim().to_string(),
            ..Self::default()
        };
        for attr in parts {
            let (key, val) = attr.split_once('=').unwrap_or((attr, ""));
            match key.to_ascii_lowercase().as_str() {
                "domain" => spec.domain = Some(val.to_string()),
                "path" => spec.path = Some(val.to_string()),
                // Expiry, SameSite, Secure etc. are the browser's business
                _ => {}
            }
        }
        Some(spec)
    }
}

/// Per-request scrape options assembled from headers
#[derive(Debug, Clone, Default)]
pub struct ScrapeOptions {
    /// `X-Proxy-Url`, already validated (http/https/socks4/socks5)
    pub proxy_url: Option<String>,
    /// `X-Set-Cookie`, one spec per header value
    pub cookies: Vec<CookieSpec>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookie_parse_basic() {
        let spec = CookieSpec::parse("session=abc123; Path=/; Domain=example.com").unwrap();
        assert_eq!(spec.name, "session");
        assert_eq!(spec.value, "abc123");
        assert_eq!(spec.domain.as_deref(), Some("example.com"));
        assert_eq!(spec.path.as_deref(), Some("/"));
    }

    #[test]
    fn cookie_parse_ignores_flags() {
        let spec = CookieSpec::parse("k=v; Secure; HttpOnly; SameSite=Lax").unwrap();
        assert_eq!(spec.name, "k");
        assert!(spec.domain.is_none());
    }

    #[test]
    fn cookie_parse_rejects_empty() {
        assert!(CookieSpec::parse("no-equals-sign").is_none());
        assert!(CookieSpec::parse("=bare-value").is_none());
    }

    #[test]
    fn snapshot_wire_format_is_camel_case() {
        let json = serde_json::json!({
            "href": "https://example.com/",
            "title": "Example",
            "content": "<p>x</p>",
            "textContent": "x",
            "html": "<html></html>",
            "publishedTime": "2026-01-01T00:00:00Z"
        });
        let snap: Snapshot = serde_json::from_value(json).unwrap();
        assert_eq!(snap.text_content, "x");
        assert_eq!(snap.published_time.as_deref(), Some("2026-01-01T00:00:00Z"));
    }
}
