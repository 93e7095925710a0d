//! Institution variants and their portal-specific knobs.
//!
//! Every supported SIGAA deployment renders the same core application with
//! small per-institution differences: which login flow it serves (desktop
//! or mobile-first), the selector of the login form and the names of its
//! credential fields. This module is the single place those differences
//! live; everything else dispatches on [`Institution`].

use std::fmt;

/// The SIGAA deployments this client knows how to drive.
///
/// The set is closed on purpose: each variant maps to a tested login flow
/// and page shape. Adding an institution means adding its profile here and
/// covering it with fixtures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Institution {
    /// Instituto Federal de Santa Catarina.
    Ifsc,
    /// Universidade Federal da Paraíba.
    Ufpb,
    /// Universidade de Brasília.
    Unb,
    /// Universidade Federal de Pernambuco.
    Ufpe,
}

/// Which login flow an institution serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginFlavor {
    /// Desktop JSF login form (`verTelaLogin.do`, `loginForm`).
    Desktop,
    /// Mobile-first login (`mobile/touch` pages, `form-login`); requests
    /// during login carry the mobile client identifier.
    Mobile,
}

impl Institution {
    /// The login flow this institution serves.
    #[must_use]
    pub fn login_flavor(self) -> LoginFlavor {
        match self {
            Self::Ifsc => LoginFlavor::Mobile,
            Self::Ufpb | Self::Unb | Self::Ufpe => LoginFlavor::Desktop,
        }
    }

    /// Path of the page carrying the login form, relative to the base URL.
    #[must_use]
    pub fn login_page_path(self) -> &'static str {
        match self.login_flavor() {
            LoginFlavor::Desktop => "/sigaa/verTelaLogin.do",
            LoginFlavor::Mobile => "/sigaa/mobile/touch/public/principal.jsf",
        }
    }

    /// CSS selector of the login form on the login page.
    #[must_use]
    pub fn login_form_selector(self) -> &'static str {
        match self.login_flavor() {
            LoginFlavor::Desktop => r#"form[name="loginForm"]"#,
            LoginFlavor::Mobile => "#form-login",
        }
    }

    /// Short uppercase tag, as the portal itself spells it.
    #[must_use]
    pub fn tag(self) -> &'static str {
        match self {
            Self::Ifsc => "IFSC",
            Self::Ufpb => "UFPB",
            Self::Unb => "UNB",
            Self::Ufpe => "UFPE",
        }
    }
}

impl fmt::Display for Institution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}
