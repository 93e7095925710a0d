//! Fetched-page representation and the JSF form extractor.
//!
//! A [`Page`] is one fetched-and-decoded HTML document plus its response
//! metadata. Pages are immutable once constructed and shared behind `Arc`
//! between the cache and callers, so the parsed document view is built on
//! demand rather than stored (`scraper::Html` is not thread-safe).

mod form;

pub use form::Form;

use reqwest::Method;
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, LOCATION};
use scraper::Html;
use url::Url;

use crate::error::Result;

/// One fetched HTML document plus its response metadata.
///
/// Built by the HTTP session after every completed request and never
/// mutated afterwards. Scrapers query it through [`Page::document`] and
/// extract inline-script forms through [`Page::jsf_form`].
#[derive(Debug, Clone)]
pub struct Page {
    url: Url,
    method: Method,
    status: StatusCode,
    headers: HeaderMap,
    body: String,
    request_body: Option<String>,
}

impl Page {
    pub(crate) fn new(
        url: Url,
        method: Method,
        status: StatusCode,
        headers: HeaderMap,
        body: String,
        request_body: Option<String>,
    ) -> Self {
        Self {
            url,
            method,
            status,
            headers,
            body,
            request_body,
        }
    }

    /// The URL this page was fetched from.
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// The HTTP method of the originating request.
    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The HTTP status of the response.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// All response headers.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// A single response header as text, if present and valid UTF-8.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// The redirect target of this response, if any.
    #[must_use]
    pub fn location(&self) -> Option<&str> {
        self.headers.get(LOCATION).and_then(|v| v.to_str().ok())
    }

    /// The decoded text body.
    #[must_use]
    pub fn body(&self) -> &str {
        &self.body
    }

    /// The encoded request body that produced this page, for POST requests.
    #[must_use]
    pub fn request_body(&self) -> Option<&str> {
        self.request_body.as_deref()
    }

    /// Parses the body into a queryable document.
    ///
    /// Parsing happens per call: the parsed tree is not `Send`, so caching
    /// it inside a shared `Page` would poison the whole cache. Scrapers
    /// should parse once per extraction pass and keep the result local.
    #[must_use]
    pub fn document(&self) -> Html {
        Html::parse_document(&self.body)
    }

    /// Reconstructs the form a JSF inline-script onclick handler submits.
    ///
    /// `script` is the `onclick` attribute text of the clickable element.
    /// See [`Form`] for the extraction contract.
    ///
    /// # Errors
    ///
    /// Returns [`crate::SigaaError::MalformedFormScript`] when the script
    /// carries no resolvable form reference and
    /// [`crate::SigaaError::MissingFormAction`] when the referenced form
    /// has no action attribute.
    pub fn jsf_form(&self, script: &str) -> Result<Form> {
        form::extract_jsf_form(script, self)
    }

    /// Cache fingerprint of the request that produced this page.
    #[must_use]
    pub(crate) fn fingerprint(&self) -> String {
        fingerprint(&self.method, &self.url, self.request_body.as_deref())
    }
}

/// Normalized cache key: method, resolved URL and canonical body.
pub(crate) fn fingerprint(method: &Method, url: &Url, body: Option<&str>) -> String {
    let mut key = String::with_capacity(
        method.as_str().len() + url.as_str().len() + body.map_or(0, str::len) + 2,
    );
    key.push_str(method.as_str());
    key.push(' ');
    key.push_str(url.as_str());
    if let Some(body) = body {
        key.push(' ');
        key.push_str(body);
    }
    key
}
