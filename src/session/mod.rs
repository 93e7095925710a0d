//! The stateful side of the client: transport, cookies, caching, request
//! pacing and login.
//!
//! One [`Session`] plus one [`SigaaHttp`] pair drives one logical portal
//! session. Everything here is shared-ownership friendly: handles clone
//! cheaply and point at the same cookie store, page cache and queue.

mod cache;
mod cookies;
mod download;
mod http;
mod login;
mod queue;
pub(crate) mod transport;

pub use cache::{DEFAULT_CACHE_CAPACITY, PageCache};
pub use cookies::CookieStore;
pub use download::ProgressFn;
pub use http::{DEFAULT_MAX_REDIRECTS, RequestOptions, SigaaHttp};
pub use login::Login;
pub use queue::{DEFAULT_QUEUE_WIDTH, RequestDescriptor, RequestHooks, RequestQueue};

pub(crate) use login::login_for;

use std::sync::atomic::{AtomicBool, Ordering};

use crate::institution::Institution;

/// Authentication state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginStatus {
    /// No user is logged in.
    Unauthenticated,
    /// A login flow completed successfully.
    Authenticated,
}

/// Session identity: the institution being driven and whether a user is
/// logged in.
///
/// The status moves exactly once, from unauthenticated to authenticated.
/// There is no transition back: logging off invalidates the server-side
/// session, and the client instance is discarded with it.
#[derive(Debug)]
pub struct Session {
    institution: Institution,
    authenticated: AtomicBool,
}

impl Session {
    /// Creates an unauthenticated session for `institution`.
    #[must_use]
    pub fn new(institution: Institution) -> Self {
        Self {
            institution,
            authenticated: AtomicBool::new(false),
        }
    }

    /// The institution this session drives.
    #[must_use]
    pub fn institution(&self) -> Institution {
        self.institution
    }

    /// Current authentication state.
    #[must_use]
    pub fn login_status(&self) -> LoginStatus {
        if self.authenticated.load(Ordering::Acquire) {
            LoginStatus::Authenticated
        } else {
            LoginStatus::Unauthenticated
        }
    }

    pub(crate) fn mark_authenticated(&self) {
        self.authenticated.store(true, Ordering::Release);
    }
}
