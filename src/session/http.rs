//! Session-scoped HTTP against one portal deployment.
//!
//! [`SigaaHttp`] resolves paths against the deployment base URL and runs
//! every request through the same pipeline: cache consultation, a queue
//! slot, cookie injection, the network call, then cookie capture and
//! cache insertion. All cross-cutting behavior enters through the
//! [`RequestHooks`] seam; the pipeline itself stays oblivious to where
//! cookies or cached pages come from.
//!
//! Redirects are never followed implicitly. The portal uses 302 responses
//! as application-level signals (login outcomes, expired download links),
//! so callers inspect them or opt in with
//! [`SigaaHttp::follow_all_redirects`].

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use reqwest::header::{CONTENT_TYPE, HeaderMap};
use reqwest::{Client, Method, multipart};
use tracing::{debug, instrument, trace, warn};
use url::Url;

use crate::error::{Result, SigaaError};
use crate::page::{self, Form, Page};
use crate::session::cache::PageCache;
use crate::session::cookies::CookieStore;
use crate::session::queue::{RequestDescriptor, RequestHooks, RequestQueue};
use crate::session::transport;

/// Redirect hops allowed before a chain is treated as a loop.
pub const DEFAULT_MAX_REDIRECTS: usize = 20;

/// Per-request switches.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestOptions {
    /// Skip the cache read; the response is still stored for later hits.
    pub no_cache: bool,
    /// Identify as the mobile client. The portal serves different markup
    /// to mobile user agents, which some login flows depend on.
    pub mobile: bool,
}

/// Request body variants the pipeline can send.
enum Payload {
    Empty,
    Form(String),
    Multipart(multipart::Form),
}

/// Default hook set: cookie injection and capture plus bond-partitioned
/// page caching.
pub(crate) struct SessionHooks {
    cookies: Arc<CookieStore>,
    cache: Arc<PageCache>,
}

#[async_trait]
impl RequestHooks for SessionHooks {
    async fn before_options(&self, request: &RequestDescriptor, headers: &mut HeaderMap) {
        let cookie = request
            .url
            .host_str()
            .and_then(|host| self.cookies.header_for(host));
        if let Some(cookie) = cookie {
            transport::attach_cookie_header(headers, &cookie);
        }
    }

    async fn before_request(&self, request: &RequestDescriptor) -> Option<Arc<Page>> {
        if request.no_cache || request.skip_store {
            return None;
        }
        let fingerprint =
            page::fingerprint(&request.method, &request.url, request.body.as_deref());
        self.cache.lookup(request.bond_key(), &fingerprint)
    }

    async fn after_success(&self, request: &RequestDescriptor, page: &Arc<Page>) {
        if let Some(host) = request.url.host_str() {
            self.cookies.store_from_response(host, page.headers());
        }
        if !request.skip_store {
            self.cache.store(request.bond_key(), Arc::clone(page));
        }
    }

    async fn after_failure(&self, request: &RequestDescriptor, error: &SigaaError) {
        warn!(method = %request.method, url = %request.url, %error, "request failed");
    }
}

/// HTTP handle bound to one portal deployment and one shared session.
///
/// Handles are cheap to clone; clones share cookies, cache and the
/// request queue. [`SigaaHttp::with_bond`] derives a handle whose cache
/// traffic lands in that bond's partition.
#[derive(Clone)]
pub struct SigaaHttp {
    client: Client,
    base_url: Url,
    cookies: Arc<CookieStore>,
    cache: Arc<PageCache>,
    queue: Arc<RequestQueue>,
    hooks: Arc<dyn RequestHooks>,
    max_redirects: usize,
    bond: Option<Url>,
}

impl fmt::Debug for SigaaHttp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigaaHttp")
            .field("base_url", &self.base_url.as_str())
            .field("bond", &self.bond.as_ref().map(Url::as_str))
            .field("max_redirects", &self.max_redirects)
            .finish_non_exhaustive()
    }
}

impl SigaaHttp {
    pub(crate) fn new(
        client: Client,
        base_url: Url,
        cookies: Arc<CookieStore>,
        cache: Arc<PageCache>,
        queue: Arc<RequestQueue>,
        max_redirects: usize,
    ) -> Self {
        let hooks: Arc<dyn RequestHooks> = Arc::new(SessionHooks {
            cookies: Arc::clone(&cookies),
            cache: Arc::clone(&cache),
        });
        Self {
            client,
            base_url,
            cookies,
            cache,
            queue,
            hooks,
            max_redirects: max_redirects.max(1),
            bond: None,
        }
    }

    /// The deployment base URL requests are resolved against.
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// The bond this handle is scoped to, if any.
    #[must_use]
    pub fn bond(&self) -> Option<&Url> {
        self.bond.as_ref()
    }

    /// Derives a handle scoped to `bond`. Requests issued through the new
    /// handle read and write that bond's cache partition; the originating
    /// handle is unaffected.
    #[must_use]
    pub fn with_bond(&self, bond: Option<Url>) -> Self {
        self.cache.set_current_bond(bond.as_ref());
        let mut scoped = self.clone();
        scoped.bond = bond;
        scoped
    }

    /// Derives a handle whose requests run through `hooks` instead of the
    /// session defaults. Cookie and cache behavior then become the
    /// implementor's responsibility.
    #[must_use]
    pub fn with_hooks(&self, hooks: Arc<dyn RequestHooks>) -> Self {
        let mut scoped = self.clone();
        scoped.hooks = hooks;
        scoped
    }

    pub(crate) fn cookies(&self) -> &CookieStore {
        &self.cookies
    }

    pub(crate) fn client(&self) -> &Client {
        &self.client
    }

    pub(crate) fn queue(&self) -> &RequestQueue {
        &self.queue
    }

    pub(crate) fn hooks(&self) -> &Arc<dyn RequestHooks> {
        &self.hooks
    }

    /// Fetches a page by GET.
    ///
    /// `path` may be a path relative to the deployment base URL or an
    /// absolute URL.
    ///
    /// # Errors
    ///
    /// Returns [`SigaaError::InvalidUrl`] when `path` cannot be resolved
    /// and [`SigaaError::Network`] when the request fails on the wire.
    /// Non-success HTTP statuses are not errors here: redirect and error
    /// pages are meaningful portal responses.
    pub async fn get(&self, path: &str) -> Result<Arc<Page>> {
        self.get_with_options(path, RequestOptions::default()).await
    }

    /// Fetches a page by GET with explicit per-request switches.
    ///
    /// # Errors
    ///
    /// Same conditions as [`SigaaHttp::get`].
    #[instrument(skip(self, options), fields(url = %path))]
    pub async fn get_with_options(&self, path: &str, options: RequestOptions) -> Result<Arc<Page>> {
        let url = self.resolve(path)?;
        let descriptor = self.descriptor(Method::GET, url, None, options);
        self.request_page(descriptor, Payload::Empty).await
    }

    /// Submits an urlencoded POST.
    ///
    /// Field order is preserved; the portal's JSF stack is sensitive to
    /// parameter order.
    ///
    /// # Errors
    ///
    /// Same conditions as [`SigaaHttp::get`].
    pub async fn post(&self, path: &str, fields: &IndexMap<String, String>) -> Result<Arc<Page>> {
        self.post_with_options(path, fields, RequestOptions::default())
            .await
    }

    /// Submits an urlencoded POST with explicit per-request switches.
    ///
    /// # Errors
    ///
    /// Same conditions as [`SigaaHttp::get`].
    #[instrument(skip(self, fields, options), fields(url = %path))]
    pub async fn post_with_options(
        &self,
        path: &str,
        fields: &IndexMap<String, String>,
        options: RequestOptions,
    ) -> Result<Arc<Page>> {
        let url = self.resolve(path)?;
        let body = transport::encode_form_body(fields);
        let descriptor = self.descriptor(Method::POST, url, Some(body.clone()), options);
        self.request_page(descriptor, Payload::Form(body)).await
    }

    /// Submits a reconstructed portal form to its action URL.
    ///
    /// # Errors
    ///
    /// Same conditions as [`SigaaHttp::get`].
    pub async fn submit_form(&self, form: &Form) -> Result<Arc<Page>> {
        self.post(form.action.as_str(), &form.fields).await
    }

    /// Sends a `multipart/form-data` POST, for attachment uploads.
    ///
    /// Multipart bodies are consumed on send and have no stable
    /// fingerprint, so these requests bypass the cache in both directions.
    ///
    /// # Errors
    ///
    /// Same conditions as [`SigaaHttp::get`].
    #[instrument(skip(self, form), fields(url = %path))]
    pub async fn post_multipart(&self, path: &str, form: multipart::Form) -> Result<Arc<Page>> {
        let url = self.resolve(path)?;
        let mut descriptor = self.descriptor(Method::POST, url, None, RequestOptions::default());
        descriptor.no_cache = true;
        descriptor.skip_store = true;
        self.request_page(descriptor, Payload::Multipart(form)).await
    }

    /// Follows `Location` headers until a non-redirect page, resolving
    /// each target against the page that issued it. Every hop is fetched
    /// uncached: redirect chains encode transient portal state.
    ///
    /// # Errors
    ///
    /// Returns [`SigaaError::TooManyRedirects`] when the chain exceeds the
    /// configured hop limit, plus the usual fetch errors per hop.
    pub async fn follow_all_redirects(
        &self,
        page: Arc<Page>,
        options: RequestOptions,
    ) -> Result<Arc<Page>> {
        let mut current = page;
        let mut hops = 0_usize;
        while let Some(location) = current.location().map(str::to_string) {
            hops += 1;
            if hops > self.max_redirects {
                return Err(SigaaError::too_many_redirects(
                    current.url().as_str(),
                    self.max_redirects,
                ));
            }
            let next = current
                .url()
                .join(&location)
                .map_err(|_| SigaaError::invalid_url(&location))?;
            trace!(hop = hops, target = %next, "following redirect");
            current = self
                .get_with_options(
                    next.as_str(),
                    RequestOptions {
                        no_cache: true,
                        mobile: options.mobile,
                    },
                )
                .await?;
        }
        Ok(current)
    }

    /// Drops all session state shared by this handle and its clones:
    /// stored cookies and every cached page.
    pub fn close(&self) {
        debug!(base_url = %self.base_url, "closing session");
        self.cookies.clear();
        self.cache.clear();
    }

    pub(crate) fn resolve(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|_| SigaaError::invalid_url(path))
    }

    fn descriptor(
        &self,
        method: Method,
        url: Url,
        body: Option<String>,
        options: RequestOptions,
    ) -> RequestDescriptor {
        let mut descriptor = RequestDescriptor::new(method, url);
        descriptor.body = body;
        descriptor.no_cache = options.no_cache;
        descriptor.mobile = options.mobile;
        descriptor.bond = self.bond.clone();
        descriptor
    }

    /// One trip through the request pipeline.
    async fn request_page(
        &self,
        descriptor: RequestDescriptor,
        payload: Payload,
    ) -> Result<Arc<Page>> {
        if let Some(page) = self.hooks.before_request(&descriptor).await {
            debug!(url = %descriptor.url, "serving page from cache");
            return Ok(page);
        }

        let _permit = self.queue.acquire(&descriptor).await;

        let mut headers = transport::base_headers(descriptor.mobile);
        self.hooks.before_options(&descriptor, &mut headers).await;

        let mut request = self
            .client
            .request(descriptor.method.clone(), descriptor.url.clone())
            .headers(headers);
        request = match payload {
            Payload::Empty => request,
            Payload::Form(body) => request
                .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(body),
            Payload::Multipart(form) => request.multipart(form),
        };

        let response = match request.send().await {
            Ok(response) => response,
            Err(source) => {
                let error = SigaaError::network(descriptor.url.as_str(), source);
                self.hooks.after_failure(&descriptor, &error).await;
                return Err(error);
            }
        };

        let status = response.status();
        let response_headers = response.headers().clone();
        let final_url = response.url().clone();
        // text() decodes per the response's content-type charset; the
        // portal mixes UTF-8 and ISO-8859-1 across deployments.
        let body = match response.text().await {
            Ok(body) => body,
            Err(source) => {
                let error = SigaaError::network(descriptor.url.as_str(), source);
                self.hooks.after_failure(&descriptor, &error).await;
                return Err(error);
            }
        };

        debug!(
            status = status.as_u16(),
            bytes = body.len(),
            "received page"
        );
        let page = Arc::new(Page::new(
            final_url,
            descriptor.method.clone(),
            status,
            response_headers,
            body,
            descriptor.body.clone(),
        ));
        self.hooks.after_success(&descriptor, &page).await;
        Ok(page)
    }
}
