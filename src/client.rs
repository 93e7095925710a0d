//! Client facade: configure a deployment, log in, reach the account.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;
use url::Url;

use crate::account::Account;
use crate::error::{Result, SigaaError};
use crate::institution::Institution;
use crate::resource::SigaaFile;
use crate::session::{
    CookieStore, DEFAULT_CACHE_CAPACITY, DEFAULT_MAX_REDIRECTS, DEFAULT_QUEUE_WIDTH, Login,
    LoginStatus, PageCache, RequestOptions, RequestQueue, Session, SigaaHttp, login_for,
    transport,
};

/// One configured SIGAA client: a deployment URL, an institution variant
/// and one logical session (cookies, cache, request pacing).
///
/// Build it with [`Sigaa::builder`]; [`Sigaa::new`] covers the common
/// no-options case. The client is cheap to share behind an `Arc` — all
/// state lives in the session objects the handles point at.
pub struct Sigaa {
    http: SigaaHttp,
    session: Arc<Session>,
    login: Box<dyn Login>,
}

impl std::fmt::Debug for Sigaa {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sigaa")
            .field("base_url", &self.http.base_url().as_str())
            .field("institution", &self.session.institution())
            .finish_non_exhaustive()
    }
}

impl Sigaa {
    /// Starts a builder for `url` (the deployment root, e.g.
    /// `https://sigaa.ifsc.edu.br`) and `institution`.
    pub fn builder(url: impl Into<String>, institution: Institution) -> SigaaBuilder {
        SigaaBuilder {
            url: url.into(),
            institution,
            cookies: Vec::new(),
            timeout: None,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            queue_width: DEFAULT_QUEUE_WIDTH,
        }
    }

    /// Builds a client with default options.
    ///
    /// # Errors
    ///
    /// [`SigaaError::InvalidUrl`] when `url` is not an absolute URL with a
    /// host.
    pub fn new(url: &str, institution: Institution) -> Result<Self> {
        Self::builder(url, institution).build()
    }

    /// The institution variant this client drives.
    #[must_use]
    pub fn institution(&self) -> Institution {
        self.session.institution()
    }

    /// Authentication state of the underlying session.
    #[must_use]
    pub fn login_status(&self) -> LoginStatus {
        self.session.login_status()
    }

    /// The session's HTTP handle, for requests outside the typed surface.
    #[must_use]
    pub fn http(&self) -> &SigaaHttp {
        &self.http
    }

    /// Authenticates and returns the account.
    ///
    /// The portal occasionally parks a fresh login on an interstitial
    /// page; when the landing page is not recognizable as a portal page
    /// it is refetched once, uncached, before giving up.
    ///
    /// # Errors
    ///
    /// The login-flow errors of [`Login::login`], plus
    /// [`SigaaError::UnexpectedPage`] when the post-login page is not
    /// recognized even after the refetch.
    pub async fn login(&self, username: &str, password: &str) -> Result<Account> {
        let page = self.login.login(username, password).await?;
        match Account::from_page(self.http.clone(), &page) {
            Ok(account) => Ok(account),
            Err(error) => {
                debug!(%error, "post-login page not recognized; refetching");
                let options = RequestOptions {
                    no_cache: true,
                    ..RequestOptions::default()
                };
                let fresh = self
                    .http
                    .get_with_options(page.url().as_str(), options)
                    .await?;
                let settled = self.http.follow_all_redirects(fresh, options).await?;
                Account::from_page(self.http.clone(), &settled)
            }
        }
    }

    /// Wraps a file ticket (id/key pair scraped from a portal page) in a
    /// downloadable handle.
    #[must_use]
    pub fn load_file(&self, id: impl Into<String>, key: impl Into<String>) -> SigaaFile {
        SigaaFile::new(self.http.clone(), id.into(), key.into())
    }

    /// Drops local session state: cookies and cached pages.
    ///
    /// This does not log off server side; that is
    /// [`Account::logoff`](crate::account::Account::logoff)'s job.
    pub fn close(&self) {
        self.http.close();
    }
}

/// Options for building a [`Sigaa`] client.
///
/// Everything except URL and institution has a default. Cookies added
/// here are seeded on the deployment host before the first request, which
/// is how an externally obtained `JSESSIONID` resumes a session.
#[derive(Debug)]
pub struct SigaaBuilder {
    url: String,
    institution: Institution,
    cookies: Vec<(String, String)>,
    timeout: Option<Duration>,
    cache_capacity: usize,
    max_redirects: usize,
    queue_width: usize,
}

impl SigaaBuilder {
    /// Per-request timeout on the transport. No timeout by default.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Capacity of each bond's page-cache partition.
    #[must_use]
    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    /// Redirect-chain hop limit for `follow_all_redirects`.
    #[must_use]
    pub fn max_redirects(mut self, limit: usize) -> Self {
        self.max_redirects = limit;
        self
    }

    /// How many requests may be in flight toward the portal at once.
    /// Defaults to 1: SIGAA deployments are fragile under parallel load.
    #[must_use]
    pub fn queue_width(mut self, width: usize) -> Self {
        self.queue_width = width;
        self
    }

    /// Seeds a cookie on the deployment host before the first request.
    #[must_use]
    pub fn cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.push((name.into(), value.into()));
        self
    }

    /// Builds the client.
    ///
    /// # Errors
    ///
    /// [`SigaaError::InvalidUrl`] when the configured URL is not an
    /// absolute URL with a host.
    pub fn build(self) -> Result<Sigaa> {
        let base_url = Url::parse(&self.url).map_err(|_| SigaaError::invalid_url(&self.url))?;
        let Some(host) = base_url.host_str().map(str::to_string) else {
            return Err(SigaaError::invalid_url(&self.url));
        };

        let cookies = Arc::new(CookieStore::new());
        for (name, value) in &self.cookies {
            cookies.seed(&host, name, value);
        }

        let http = SigaaHttp::new(
            transport::build_client(self.timeout),
            base_url,
            cookies,
            Arc::new(PageCache::new(self.cache_capacity)),
            Arc::new(RequestQueue::new(self.queue_width)),
            self.max_redirects,
        );
        let session = Arc::new(Session::new(self.institution));
        let login = login_for(http.clone(), Arc::clone(&session));
        debug!(url = %http.base_url(), institution = %self.institution, "client built");
        Ok(Sigaa {
            http,
            session,
            login,
        })
    }
}
