//! The login flow.
//!
//! Every SIGAA deployment authenticates the same way: fetch the rendered
//! login page, submit its form back with credentials filled in, follow
//! the redirect chain and classify where it lands. What differs per
//! institution is the flavor of that page — the desktop JSF form with its
//! `user.login`/`user.senha` fields, or the mobile-first form whose field
//! names are generated — so the flow branches on
//! [`Institution::login_flavor`] instead of splitting into per-variant
//! types.
//!
//! Classification of the landing page:
//! - still the login page, with the invalid-credentials message: terminal
//!   failure, never retried;
//! - still the login page, without it: the portal hiccupped; the whole
//!   flow is resubmitted exactly once;
//! - anything else: success, the session becomes authenticated.
//!
//! Every request in the flow bypasses the page cache. Login pages carry
//! one-shot hidden fields, and a resubmission must reach the portal
//! rather than replay a cached response.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use scraper::Selector;
use tracing::{debug, info, instrument, warn};

use crate::error::{Result, SigaaError};
use crate::institution::{Institution, LoginFlavor};
use crate::page::{Form, Page};
use crate::session::http::{RequestOptions, SigaaHttp};
use crate::session::{LoginStatus, Session};

/// Heading of the desktop login box; present again after a failed
/// submission.
const LOGIN_BOX_MARKER: &str = "Entrar no Sistema";
/// Error message the portal renders for rejected credentials, identical
/// across deployments.
const INVALID_CREDENTIALS_MARKER: &str = "Usuário e/ou senha inválidos";
/// Id of the mobile login form; its presence means the mobile flow is
/// still on the login page.
const MOBILE_FORM_MARKER: &str = "form-login";

/// A strategy that can authenticate a session.
///
/// # Object Safety
///
/// Uses `async_trait` to support dynamic dispatch via `Box<dyn Login>`.
/// Rust 2024 native async traits are not object-safe, so `async_trait`
/// is required for the seam.
#[async_trait]
pub trait Login: Send + Sync {
    /// Authenticates with the given credentials, returning the first
    /// authenticated page.
    ///
    /// # Errors
    ///
    /// [`SigaaError::AlreadyAuthenticated`] when the session has a logged
    /// user, [`SigaaError::InvalidCredentials`] on rejected credentials,
    /// [`SigaaError::UnexpectedLoginResponse`] when the portal serves the
    /// login page again without an error message (after the automatic
    /// resubmission), plus transport and form-extraction errors.
    async fn login(&self, username: &str, password: &str) -> Result<Arc<Page>>;
}

/// Builds the login flow for the session's institution.
pub(crate) fn login_for(http: SigaaHttp, session: Arc<Session>) -> Box<dyn Login> {
    Box::new(PortalLogin::new(http, session))
}

/// The production login flow, branching on the institution's flavor.
pub(crate) struct PortalLogin {
    http: SigaaHttp,
    session: Arc<Session>,
    /// Form captured from a rejected attempt. The portal refreshes the
    /// form's hidden fields on every render; posting stale ones fails, so
    /// the next attempt reuses this capture instead of refetching.
    captured_form: Mutex<Option<Form>>,
}

impl PortalLogin {
    pub(crate) fn new(http: SigaaHttp, session: Arc<Session>) -> Self {
        Self {
            http,
            session,
            captured_form: Mutex::new(None),
        }
    }

    fn institution(&self) -> Institution {
        self.session.institution()
    }

    /// Request options for the login flow: always uncached, mobile when
    /// the institution's login is mobile-first.
    fn options(&self) -> RequestOptions {
        RequestOptions {
            no_cache: true,
            mobile: self.institution().login_flavor() == LoginFlavor::Mobile,
        }
    }

    async fn login_form(&self) -> Result<Form> {
        if let Some(form) = self.take_captured() {
            debug!("reusing login form captured from the previous attempt");
            return Ok(form);
        }
        let page = self
            .http
            .get_with_options(self.institution().login_page_path(), self.options())
            .await?;
        parse_login_form(&page, self.institution())
    }

    fn take_captured(&self) -> Option<Form> {
        self.captured_form
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take()
    }

    fn capture(&self, form: Form) {
        *self
            .captured_form
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(form);
    }

    fn fill_credentials(&self, form: &mut Form, username: &str, password: &str) -> Result<()> {
        match self.institution().login_flavor() {
            LoginFlavor::Desktop => {
                form.fields
                    .insert("user.login".to_string(), username.to_string());
                form.fields
                    .insert("user.senha".to_string(), password.to_string());
            }
            LoginFlavor::Mobile => {
                // Mobile field names carry generated prefixes, so they are
                // found by what the name contains rather than spelled out.
                let user_field = field_containing(form, "username")?;
                let password_field = field_containing(form, "password")?;
                form.fields.insert(user_field, username.to_string());
                form.fields.insert(password_field, password.to_string());
            }
        }
        Ok(())
    }

    fn still_on_login_page(&self, page: &Page) -> bool {
        match self.institution().login_flavor() {
            LoginFlavor::Desktop => page.body().contains(LOGIN_BOX_MARKER),
            LoginFlavor::Mobile => page.body().contains(MOBILE_FORM_MARKER),
        }
    }

    /// One full submission: fetch (or reuse) the form, post credentials,
    /// follow redirects, classify the landing page.
    async fn attempt(&self, username: &str, password: &str) -> Result<Arc<Page>> {
        let mut form = self.login_form().await?;
        self.fill_credentials(&mut form, username, password)?;

        let submitted = self
            .http
            .post_with_options(form.action.as_str(), &form.fields, self.options())
            .await?;
        let landed = self
            .http
            .follow_all_redirects(submitted, self.options())
            .await?;

        if self.still_on_login_page(&landed) {
            if landed.body().contains(INVALID_CREDENTIALS_MARKER) {
                // Keep the refreshed form so a later attempt posts the
                // portal's current hidden fields.
                if let Ok(refreshed) = parse_login_form(&landed, self.institution()) {
                    self.capture(refreshed);
                }
                return Err(SigaaError::InvalidCredentials);
            }
            return Err(SigaaError::unexpected_login_response(
                landed.url().as_str(),
            ));
        }

        self.session.mark_authenticated();
        info!(institution = %self.institution(), "authenticated");
        Ok(landed)
    }
}

#[async_trait]
impl Login for PortalLogin {
    #[instrument(skip_all, fields(institution = %self.session.institution()))]
    async fn login(&self, username: &str, password: &str) -> Result<Arc<Page>> {
        if self.session.login_status() == LoginStatus::Authenticated {
            return Err(SigaaError::AlreadyAuthenticated);
        }
        match self.attempt(username, password).await {
            Err(SigaaError::UnexpectedLoginResponse { url }) => {
                warn!(url, "landed back on the login page; resubmitting once");
                self.attempt(username, password).await
            }
            outcome => outcome,
        }
    }
}

/// Finds the institution's login form on `page`.
fn parse_login_form(page: &Page, institution: Institution) -> Result<Form> {
    let selector = login_form_selector(institution);
    let document = page.document();
    let Some(element) = document.select(&selector).next() else {
        return Err(SigaaError::unexpected_page(
            page.url().as_str(),
            "page has no login form",
        ));
    };
    Form::from_element(element, page.url(), institution.login_form_selector())
}

#[allow(clippy::expect_used)]
fn login_form_selector(institution: Institution) -> Selector {
    Selector::parse(institution.login_form_selector())
        .expect("login form selectors are valid") // Static selectors, safe to panic
}

fn field_containing(form: &Form, fragment: &str) -> Result<String> {
    form.fields
        .keys()
        .find(|name| name.contains(fragment))
        .cloned()
        .ok_or_else(|| SigaaError::missing_form_field(fragment, form.action.as_str()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::session::cache::PageCache;
    use crate::session::cookies::CookieStore;
    use crate::session::http::DEFAULT_MAX_REDIRECTS;
    use crate::session::queue::RequestQueue;
    use crate::session::transport;
    use std::collections::HashMap;
    use tracing::field::Field;
    use tracing::{Event, Subscriber};
    use tracing_subscriber::layer::{Context, Layer};
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::registry::LookupSpan;
    use url::Url;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const DESKTOP_LOGIN_PAGE: &str = r#"
        <html><body>
          <h3>Entrar no Sistema</h3>
          <form name="loginForm" action="/sigaa/logar.do" method="post">
            <input type="hidden" name="dispatch" value="logOn">
            <input type="text" name="user.login">
            <input type="password" name="user.senha">
            <input type="submit" name="entrar" value="Entrar">
          </form>
        </body></html>"#;

    const DESKTOP_REJECTED_PAGE: &str = r#"
        <html><body>
          <h3>Entrar no Sistema</h3>
          <p>Usuário e/ou senha inválidos</p>
          <form name="loginForm" action="/sigaa/logar.do" method="post">
            <input type="hidden" name="dispatch" value="logOn">
            <input type="text" name="user.login">
            <input type="password" name="user.senha">
          </form>
        </body></html>"#;

    const PORTAL_HOME: &str = "<html><body><h1>Portal do Discente</h1></body></html>";

    fn harness(server_url: &str, institution: Institution) -> (Box<dyn Login>, Arc<Session>) {
        let session = Arc::new(Session::new(institution));
        let http = SigaaHttp::new(
            transport::build_client(None),
            Url::parse(server_url).unwrap(),
            Arc::new(CookieStore::new()),
            Arc::new(PageCache::default()),
            Arc::new(RequestQueue::default()),
            DEFAULT_MAX_REDIRECTS,
        );
        (login_for(http, Arc::clone(&session)), session)
    }

    async fn mount_login_page(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/sigaa/verTelaLogin.do"))
            .respond_with(ResponseTemplate::new(200).set_body_string(DESKTOP_LOGIN_PAGE))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn valid_credentials_authenticate_the_session() {
        let server = MockServer::start().await;
        mount_login_page(&server).await;
        Mock::given(method("POST"))
            .and(path("/sigaa/logar.do"))
            .and(body_string_contains("user.login=fulano"))
            .and(body_string_contains("user.senha=s3nh4"))
            .respond_with(
                ResponseTemplate::new(302).insert_header("location", "/sigaa/portal.jsf"),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/sigaa/portal.jsf"))
            .respond_with(ResponseTemplate::new(200).set_body_string(PORTAL_HOME))
            .mount(&server)
            .await;

        let (login, session) = harness(&server.uri(), Institution::Unb);
        let page = login.login("fulano", "s3nh4").await.unwrap();
        assert!(page.body().contains("Portal do Discente"));
        assert_eq!(session.login_status(), LoginStatus::Authenticated);
    }

    #[tokio::test]
    async fn rejected_credentials_fail_without_retry() {
        let server = MockServer::start().await;
        mount_login_page(&server).await;
        Mock::given(method("POST"))
            .and(path("/sigaa/logar.do"))
            .respond_with(ResponseTemplate::new(200).set_body_string(DESKTOP_REJECTED_PAGE))
            .expect(1)
            .mount(&server)
            .await;

        let (login, session) = harness(&server.uri(), Institution::Unb);
        let error = login.login("fulano", "errada").await.unwrap_err();
        assert!(matches!(error, SigaaError::InvalidCredentials));
        assert_eq!(session.login_status(), LoginStatus::Unauthenticated);
    }

    #[tokio::test]
    async fn login_page_without_error_message_is_retried_once() {
        let server = MockServer::start().await;
        mount_login_page(&server).await;
        // First submission bounces back to the login page with no error;
        // the automatic resubmission succeeds.
        Mock::given(method("POST"))
            .and(path("/sigaa/logar.do"))
            .respond_with(ResponseTemplate::new(200).set_body_string(DESKTOP_LOGIN_PAGE))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/sigaa/logar.do"))
            .respond_with(
                ResponseTemplate::new(302).insert_header("location", "/sigaa/portal.jsf"),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/sigaa/portal.jsf"))
            .respond_with(ResponseTemplate::new(200).set_body_string(PORTAL_HOME))
            .mount(&server)
            .await;

        let (login, session) = harness(&server.uri(), Institution::Unb);
        let page = login.login("fulano", "s3nh4").await.unwrap();
        assert!(page.body().contains("Portal do Discente"));
        assert_eq!(session.login_status(), LoginStatus::Authenticated);
    }

    #[tokio::test]
    async fn persistent_login_page_fails_after_one_resubmission() {
        let server = MockServer::start().await;
        mount_login_page(&server).await;
        Mock::given(method("POST"))
            .and(path("/sigaa/logar.do"))
            .respond_with(ResponseTemplate::new(200).set_body_string(DESKTOP_LOGIN_PAGE))
            .expect(2)
            .mount(&server)
            .await;

        let (login, _session) = harness(&server.uri(), Institution::Unb);
        let error = login.login("fulano", "s3nh4").await.unwrap_err();
        assert!(matches!(error, SigaaError::UnexpectedLoginResponse { .. }));
    }

    #[tokio::test]
    async fn authenticated_sessions_reject_further_logins() {
        let server = MockServer::start().await;
        let (login, session) = harness(&server.uri(), Institution::Unb);
        session.mark_authenticated();
        let error = login.login("fulano", "s3nh4").await.unwrap_err();
        assert!(matches!(error, SigaaError::AlreadyAuthenticated));
    }

    #[tokio::test]
    async fn mobile_flow_discovers_generated_field_names() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/sigaa/mobile/touch/public/principal.jsf"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<html><body>
                  <form id="form-login" action="/sigaa/mobile/logar.do" method="post">
                    <input type="hidden" name="form-login" value="form-login">
                    <input type="text" name="form-login:username">
                    <input type="password" name="form-login:password">
                  </form>
                </body></html>"#,
            ))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/sigaa/mobile/logar.do"))
            .and(body_string_contains("form-login%3Ausername=aluno"))
            .and(body_string_contains("form-login%3Apassword=s3nh4"))
            .respond_with(
                ResponseTemplate::new(302).insert_header("location", "/sigaa/mobile/touch/menu.jsf"),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/sigaa/mobile/touch/menu.jsf"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string("<html><body>Menu</body></html>"),
            )
            .mount(&server)
            .await;

        let (login, session) = harness(&server.uri(), Institution::Ifsc);
        login.login("aluno", "s3nh4").await.unwrap();
        assert_eq!(session.login_status(), LoginStatus::Authenticated);
    }

    #[derive(Default)]
    struct FieldVisitor {
        fields: HashMap<String, String>,
    }

    impl tracing::field::Visit for FieldVisitor {
        fn record_str(&mut self, field: &Field, value: &str) {
            self.fields
                .insert(field.name().to_string(), value.to_string());
        }

        fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
            self.fields
                .insert(field.name().to_string(), format!("{value:?}"));
        }
    }

    #[derive(Clone)]
    struct WarningCapture {
        events: Arc<Mutex<Vec<HashMap<String, String>>>>,
    }

    impl<S> Layer<S> for WarningCapture
    where
        S: Subscriber + for<'lookup> LookupSpan<'lookup>,
    {
        fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
            if event.metadata().level() != &tracing::Level::WARN {
                return;
            }
            let mut visitor = FieldVisitor::default();
            event.record(&mut visitor);
            self.events
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .push(visitor.fields);
        }
    }

    #[tokio::test]
    async fn resubmission_emits_a_structured_warning() {
        let server = MockServer::start().await;
        mount_login_page(&server).await;
        Mock::given(method("POST"))
            .and(path("/sigaa/logar.do"))
            .respond_with(ResponseTemplate::new(200).set_body_string(DESKTOP_LOGIN_PAGE))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/sigaa/logar.do"))
            .respond_with(
                ResponseTemplate::new(302).insert_header("location", "/sigaa/portal.jsf"),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/sigaa/portal.jsf"))
            .respond_with(ResponseTemplate::new(200).set_body_string(PORTAL_HOME))
            .mount(&server)
            .await;

        let captured = Arc::new(Mutex::new(Vec::new()));
        let subscriber = tracing_subscriber::registry()
            .with(tracing_subscriber::filter::LevelFilter::WARN)
            .with(WarningCapture {
                events: Arc::clone(&captured),
            });
        let _guard = tracing::subscriber::set_default(subscriber);
        // A parallel test may have cached this callsite's interest under
        // the noop dispatcher; rebuild so the capturing subscriber sees it.
        tracing::callsite::rebuild_interest_cache();

        let (login, _session) = harness(&server.uri(), Institution::Unb);
        login.login("fulano", "s3nh4").await.unwrap();

        let events = captured
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let warning = events
            .iter()
            .find(|fields| {
                fields.get("message").map(String::as_str)
                    == Some("landed back on the login page; resubmitting once")
            })
            .unwrap();
        assert!(
            warning
                .get("url")
                .is_some_and(|url| url.contains("/sigaa/logar.do")),
            "warning should carry the landing URL, got {warning:?}"
        );
    }
}
