//! Raw HTTP plumbing: client construction, request headers and body
//! encoding.
//!
//! Redirects are followed by the session itself (the portal uses 302s as
//! application signals), so the client's built-in redirect policy is
//! disabled. Response decompression (brotli, gzip, deflate, identity) and
//! charset decoding are delegated to the client, keyed on the response's
//! `content-encoding` and `content-type` headers.

use std::time::Duration;

use indexmap::IndexMap;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CACHE_CONTROL, COOKIE, USER_AGENT};
use reqwest::{Client, redirect};

/// Client identifier sent with every request (RFC 9308 good citizenship).
#[must_use]
pub(crate) fn user_agent(mobile: bool) -> String {
    let version = env!("CARGO_PKG_VERSION");
    if mobile {
        format!("sigaa-client/{version} (Android 7.0; portal-scraper)")
    } else {
        format!("sigaa-client/{version} (portal-scraper)")
    }
}

/// Builds the underlying HTTP client.
///
/// # Panics
///
/// Panics if the client builder fails with this static configuration,
/// which does not happen in practice.
#[must_use]
#[allow(clippy::expect_used)]
pub(crate) fn build_client(timeout: Option<Duration>) -> Client {
    let mut builder = Client::builder()
        .redirect(redirect::Policy::none())
        .gzip(true)
        .brotli(true)
        .deflate(true);
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    builder
        .build()
        .expect("failed to build HTTP client with static configuration")
}

/// Assembles the headers every portal request carries. The cookie header
/// is attached afterwards through the session hooks.
#[must_use]
pub(crate) fn base_headers(mobile: bool) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Ok(agent) = HeaderValue::from_str(&user_agent(mobile)) {
        headers.insert(USER_AGENT, agent);
    }
    headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("max-age=0"));
    headers.insert("DNT", HeaderValue::from_static("1"));
    headers
}

/// Attaches a `Cookie` header, replacing any previous value.
pub(crate) fn attach_cookie_header(headers: &mut HeaderMap, cookie: &str) {
    if let Ok(value) = HeaderValue::from_str(cookie) {
        headers.insert(COOKIE, value);
    }
}

/// Encodes POST fields as `application/x-www-form-urlencoded` with
/// RFC 3986 percent-encoding: letters, digits and `-_.~` pass through,
/// everything else is percent-encoded by UTF-8 code point (space becomes
/// `%20`, not `+`).
#[must_use]
pub(crate) fn encode_form_body(fields: &IndexMap<String, String>) -> String {
    fields
        .iter()
        .map(|(name, value)| {
            format!(
                "{}={}",
                urlencoding::encode(name),
                urlencoding::encode(value)
            )
        })
        .collect::<Vec<_>>()
        .join("&")
}
