//! Per-host cookie state for the portal session.
//!
//! The transport drives redirects by hand, so cookie handling is explicit
//! too: every response's `Set-Cookie` headers land here, and every outbound
//! request asks for the matching `Cookie` header. A caller may pre-seed a
//! cookie (an existing session token) before the first request to resume a
//! server-side session.

use std::fmt;
use std::time::{Duration, SystemTime};

use dashmap::DashMap;
use reqwest::header::{HeaderMap, SET_COOKIE};
use tracing::debug;

/// One cookie held for a host.
///
/// The value is sensitive (SIGAA session tokens) and is redacted from
/// Debug output.
#[derive(Clone)]
struct StoredCookie {
    name: String,
    value: String,
    /// Expiry instant, `None` for session cookies.
    expires_at: Option<SystemTime>,
}

impl StoredCookie {
    fn is_expired(&self, now: SystemTime) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

impl fmt::Debug for StoredCookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredCookie")
            .field("name", &self.name)
            .field("value", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Thread-safe cookie store keyed by host.
///
/// Updates and reads are atomic per host; no await point ever sits inside
/// the map access, so concurrent session calls cannot observe a cookie
/// list mid-rewrite.
#[derive(Debug, Default)]
pub struct CookieStore {
    hosts: DashMap<String, Vec<StoredCookie>>,
}

impl CookieStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-seeds one cookie for a host before any request is made,
    /// resuming an externally-obtained session. The cookie carries no
    /// expiry; the server decides when it stops being honored.
    pub fn seed(&self, host: &str, name: &str, value: &str) {
        self.upsert(
            host,
            StoredCookie {
                name: name.to_string(),
                value: value.to_string(),
                expires_at: None,
            },
        );
    }

    /// Records every `Set-Cookie` header of a response against `host`.
    /// Malformed lines are skipped; same-named cookies are replaced.
    pub fn store_from_response(&self, host: &str, headers: &HeaderMap) {
        let mut stored = 0_usize;
        for header in headers.get_all(SET_COOKIE) {
            let Ok(line) = header.to_str() else {
                continue;
            };
            if let Some(cookie) = parse_set_cookie(line) {
                self.upsert(host, cookie);
                stored += 1;
            }
        }
        if stored > 0 {
            debug!(host, count = stored, "stored cookies from response");
        }
    }

    /// Builds the `Cookie` request header value for a host, dropping
    /// expired entries on the way. `None` when no live cookie matches.
    #[must_use]
    pub fn header_for(&self, host: &str) -> Option<String> {
        let now = SystemTime::now();
        let mut entry = self.hosts.get_mut(host)?;
        entry.retain(|cookie| !cookie.is_expired(now));
        if entry.is_empty() {
            return None;
        }
        let header = entry
            .iter()
            .map(|cookie| format!("{}={}", cookie.name, cookie.value))
            .collect::<Vec<_>>()
            .join("; ");
        Some(header)
    }

    /// Drops every cookie for every host (logoff support).
    pub fn clear(&self) {
        self.hosts.clear();
    }

    fn upsert(&self, host: &str, cookie: StoredCookie) {
        let mut entry = self.hosts.entry(host.to_string()).or_default();
        if let Some(existing) = entry.iter_mut().find(|c| c.name == cookie.name) {
            *existing = cookie;
        } else {
            entry.push(cookie);
        }
    }
}

/// Parses one `Set-Cookie` line into a stored cookie.
///
/// Only the attributes this client acts on are interpreted: `Max-Age`
/// (which wins) and `Expires`. Domain/path scoping is not needed — the
/// session talks to a single host and SIGAA scopes everything to `/`.
fn parse_set_cookie(line: &str) -> Option<StoredCookie> {
    let mut parts = line.split(';');
    let pair = parts.next()?;
    let (name, value) = pair.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }

    let mut expires_at = None;
    let mut max_age_seen = false;
    for attribute in parts {
        let (key, attr_value) = match attribute.split_once('=') {
            Some((k, v)) => (k.trim(), v.trim()),
            None => (attribute.trim(), ""),
        };
        if key.eq_ignore_ascii_case("max-age") {
            if let Ok(seconds) = attr_value.parse::<i64>() {
                expires_at = Some(if seconds <= 0 {
                    SystemTime::UNIX_EPOCH
                } else {
                    SystemTime::now() + Duration::from_secs(seconds.unsigned_abs())
                });
                max_age_seen = true;
            }
        } else if key.eq_ignore_ascii_case("expires") && !max_age_seen {
            if let Ok(when) = httpdate::parse_http_date(attr_value) {
                expires_at = Some(when);
            }
        }
    }

    Some(StoredCookie {
        name: name.to_string(),
        value: value.trim().to_string(),
        expires_at,
    })
}
