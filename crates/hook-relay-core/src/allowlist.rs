//! # Source Address Allowlist
//!
//! Authenticates inbound deliveries by checking the client address against
//! GitHub's published webhook and Actions ranges. The range list is fetched
//! from the meta endpoint, cached with a TTL, and refreshed wholesale.
//!
//! The allowlist fails closed: with no range list available every request is
//! rejected.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use github_app_client::{ApiError, GitHubAppClient, TtlCache};
use ipnet::IpNet;
use tracing::{debug, error, info, warn};

/// Header set by Cloudflare with the connecting client address.
pub const CF_CONNECTING_IP: &str = "cf-connecting-ip";
/// Proxy chain header; the first entry is the original client.
pub const X_FORWARDED_FOR: &str = "x-forwarded-for";
/// Single-address header set by nginx-style proxies.
pub const X_REAL_IP: &str = "x-real-ip";

// ============================================================================
// Request Origin
// ============================================================================

/// Address information captured from an inbound request.
///
/// Built once per request from its headers and the connection peer. The
/// client address is the first non-empty value in this order:
/// `CF-Connecting-IP`, the first `X-Forwarded-For` entry, `X-Real-IP`, the
/// connection peer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestOrigin {
    pub cf_connecting_ip: Option<String>,
    pub forwarded_for: Option<String>,
    pub real_ip: Option<String>,
    pub peer_addr: Option<IpAddr>,
}

impl RequestOrigin {
    /// Capture origin information from request headers.
    ///
    /// Header names are matched case-insensitively.
    pub fn from_headers(headers: &HashMap<String, String>, peer_addr: Option<IpAddr>) -> Self {
        Self {
            cf_connecting_ip: header_value(headers, CF_CONNECTING_IP),
            forwarded_for: header_value(headers, X_FORWARDED_FOR),
            real_ip: header_value(headers, X_REAL_IP),
            peer_addr,
        }
    }

    /// Origin of a direct connection with no proxy headers.
    pub fn from_peer(peer_addr: IpAddr) -> Self {
        Self {
            peer_addr: Some(peer_addr),
            ..Self::default()
        }
    }

    /// The candidate client address as presented, before parsing.
    ///
    /// # Examples
    ///
    /// ```
    /// use hook_relay_core::allowlist::RequestOrigin;
    /// use std::collections::HashMap;
    ///
    /// let mut headers = HashMap::new();
    /// headers.insert("x-forwarded-for".to_string(), "140.82.115.1, 10.0.0.1".to_string());
    /// headers.insert("x-real-ip".to_string(), "10.0.0.2".to_string());
    ///
    /// let origin = RequestOrigin::from_headers(&headers, None);
    /// assert_eq!(origin.candidate().as_deref(), Some("140.82.115.1"));
    /// ```
    pub fn candidate(&self) -> Option<String> {
        if let Some(ip) = non_empty(self.cf_connecting_ip.as_deref()) {
            return Some(ip.to_string());
        }

        let first_forwarded = self
            .forwarded_for
            .as_deref()
            .and_then(|chain| chain.split(',').next());
        if let Some(ip) = non_empty(first_forwarded) {
            return Some(ip.to_string());
        }

        if let Some(ip) = non_empty(self.real_ip.as_deref()) {
            return Some(ip.to_string());
        }

        self.peer_addr.map(|addr| addr.to_string())
    }

    /// The client address, if one was presented and parses as an IP.
    ///
    /// IPv4-mapped IPv6 addresses (`::ffff:a.b.c.d`, as reported for IPv4
    /// clients of a dual-stack listener) are returned as plain IPv4.
    pub fn client_ip(&self) -> Option<IpAddr> {
        self.candidate()?
            .parse::<IpAddr>()
            .ok()
            .map(|ip| ip.to_canonical())
    }
}

fn header_value(headers: &HashMap<String, String>, name: &str) -> Option<String> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.clone())
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

// ============================================================================
// Range Set
// ============================================================================

/// Published source ranges, in the order GitHub lists them.
///
/// Entries are CIDR blocks or bare addresses. They are parsed at match time;
/// an entry that parses as neither is skipped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IpRangeSet {
    ranges: Vec<String>,
}

impl IpRangeSet {
    pub fn new(ranges: Vec<String>) -> Self {
        Self { ranges }
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.ranges.iter().map(String::as_str)
    }

    /// Check whether `ip` lies inside any entry.
    ///
    /// # Examples
    ///
    /// ```
    /// use hook_relay_core::allowlist::IpRangeSet;
    ///
    /// let ranges = IpRangeSet::new(vec!["not-a-range".into(), "192.30.252.0/22".into()]);
    /// assert!(ranges.contains("192.30.253.7".parse().unwrap()));
    /// assert!(!ranges.contains("10.0.0.1".parse().unwrap()));
    /// ```
    pub fn contains(&self, ip: IpAddr) -> bool {
        self.ranges.iter().any(|entry| match parse_range(entry) {
            Some(net) => net.contains(&ip),
            None => {
                debug!(range = %entry, "Skipping malformed source range");
                false
            }
        })
    }
}

impl FromIterator<String> for IpRangeSet {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

fn parse_range(entry: &str) -> Option<IpNet> {
    let entry = entry.trim();
    entry
        .parse::<IpNet>()
        .ok()
        .or_else(|| entry.parse::<IpAddr>().ok().map(IpNet::from))
}

// ============================================================================
// Range Source
// ============================================================================

/// Where the allowlist gets its ranges from.
#[async_trait]
pub trait IpRangeSource: Send + Sync {
    async fn fetch_ranges(&self) -> Result<IpRangeSet, ApiError>;
}

#[async_trait]
impl IpRangeSource for GitHubAppClient {
    async fn fetch_ranges(&self) -> Result<IpRangeSet, ApiError> {
        let meta = self.fetch_meta().await?;
        Ok(IpRangeSet::new(meta.source_ranges()))
    }
}

// ============================================================================
// Allowlist
// ============================================================================

/// Cached allowlist of GitHub source ranges.
pub struct IpAllowlist {
    source: Arc<dyn IpRangeSource>,
    cache: TtlCache<(), IpRangeSet>,
}

impl IpAllowlist {
    pub fn new(source: Arc<dyn IpRangeSource>, ttl: Duration) -> Self {
        Self {
            source,
            cache: TtlCache::new("ip_ranges", ttl),
        }
    }

    /// Current range set, refreshing it when expired or absent.
    ///
    /// A failed refresh keeps serving the previous set; with no previous set
    /// the result is empty.
    pub async fn ranges(&self) -> IpRangeSet {
        let refreshed = self
            .cache
            .get_or_try_refresh((), || self.source.fetch_ranges())
            .await;

        match refreshed {
            Ok(ranges) => ranges,
            Err(e) => match self.cache.get_stale(&()) {
                Some(previous) => {
                    error!(
                        error = %e,
                        ranges = previous.len(),
                        "Failed to refresh GitHub source ranges, serving previous list"
                    );
                    previous
                }
                None => {
                    error!(
                        error = %e,
                        "Failed to fetch GitHub source ranges, rejecting all requests"
                    );
                    IpRangeSet::default()
                }
            },
        }
    }

    /// Check whether the request comes from a GitHub address.
    ///
    /// IPv4-mapped IPv6 addresses are matched against the IPv4 ranges.
    pub async fn is_authorized(&self, origin: &RequestOrigin) -> bool {
        let Some(candidate) = origin.candidate() else {
            warn!("No client address available, rejecting request");
            return false;
        };

        let ip = match candidate.parse::<IpAddr>() {
            Ok(ip) => ip.to_canonical(),
            Err(_) => {
                warn!(candidate = %candidate, "Client address is not a valid IP, rejecting request");
                return false;
            }
        };

        let authorized = self.ranges().await.contains(ip);
        if !authorized {
            warn!(client_ip = %ip, "Request from address outside GitHub ranges");
        }
        authorized
    }

    /// Whether a non-empty range set has been loaded, fresh or not.
    pub fn is_cached(&self) -> bool {
        self.cache
            .get_stale(&())
            .map(|ranges| !ranges.is_empty())
            .unwrap_or(false)
    }

    /// Load the range set eagerly.
    pub async fn prewarm(&self) {
        let ranges = self.ranges().await;
        if ranges.is_empty() {
            warn!("Source range pre-warm finished without any ranges");
        } else {
            info!(ranges = ranges.len(), "Pre-warmed GitHub source ranges");
        }
    }
}

impl std::fmt::Debug for IpAllowlist {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IpAllowlist")
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "allowlist_tests.rs"]
mod tests;
