//! Headers carried from the inbound delivery to the downstream request.

use std::collections::HashMap;

use crate::transform::{CANONICAL_EVENT, REWRITTEN_EVENT};

/// Event type header set by GitHub.
pub const X_GITHUB_EVENT: &str = "X-GitHub-Event";

/// Inbound headers relayed downstream, in canonical spelling.
pub const FORWARDED_HEADERS: [&str; 8] = [
    "Accept",
    "Content-Type",
    "User-Agent",
    "X-GitHub-Delivery",
    X_GITHUB_EVENT,
    "X-GitHub-Hook-Id",
    "X-GitHub-Hook-Installation-Target-Id",
    "X-GitHub-Hook-Installation-Target-Type",
];

/// The subset of inbound headers sent to the downstream endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForwardedHeaders {
    entries: Vec<(&'static str, String)>,
}

impl ForwardedHeaders {
    /// Select the forwarded headers from an inbound header map.
    ///
    /// Names are matched case-insensitively. An `issue_comment` event is
    /// announced downstream as `push`, matching the rewritten body.
    ///
    /// # Examples
    ///
    /// ```
    /// use hook_relay_core::headers::ForwardedHeaders;
    /// use std::collections::HashMap;
    ///
    /// let mut inbound = HashMap::new();
    /// inbound.insert("x-github-event".to_string(), "issue_comment".to_string());
    /// inbound.insert("authorization".to_string(), "secret".to_string());
    ///
    /// let forwarded = ForwardedHeaders::from_http_headers(&inbound);
    /// assert_eq!(forwarded.get("X-GitHub-Event"), Some("push"));
    /// assert_eq!(forwarded.get("Authorization"), None);
    /// ```
    pub fn from_http_headers(headers: &HashMap<String, String>) -> Self {
        let entries = FORWARDED_HEADERS
            .iter()
            .filter_map(|&name| {
                let value = headers
                    .iter()
                    .find(|(key, _)| key.eq_ignore_ascii_case(name))
                    .map(|(_, value)| value.clone())?;

                if name == X_GITHUB_EVENT && value == REWRITTEN_EVENT {
                    return Some((name, CANONICAL_EVENT.to_string()));
                }
                Some((name, value))
            })
            .collect();

        Self { entries }
    }

    /// Value of a forwarded header, matched case-insensitively.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> {
        self.entries.iter().map(|(name, value)| (*name, value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
#[path = "headers_tests.rs"]
mod tests;
