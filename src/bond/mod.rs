//! Bonds: the identity/role contexts of an authenticated user.
//!
//! A user can hold several bonds at once (two student registrations, a
//! student and a teacher role) and the portal keeps separate browsing
//! state per bond, server side. The client mirrors that: each bond owns
//! an HTTP handle scoped to its own cache partition, and a shared
//! [`BondController`] tracks which bond the *server* currently has
//! selected so bonds only re-switch when another one was used in between.

mod student;
mod teacher;

pub use student::StudentBond;
pub use teacher::TeacherBond;

use std::sync::Mutex;

use url::Url;

/// One identity/role context of an authenticated user.
#[derive(Debug)]
pub enum Bond {
    /// A student registration ("Discente").
    Student(StudentBond),
    /// A teaching assignment ("Docente").
    Teacher(TeacherBond),
}

impl Bond {
    /// The registration code identifying this bond.
    #[must_use]
    pub fn registration(&self) -> &str {
        match self {
            Self::Student(bond) => bond.registration(),
            Self::Teacher(bond) => bond.registration(),
        }
    }
}

/// Tracks which bond the server-side session currently operates under.
///
/// Shared by every bond of one account. The portal switches bonds with a
/// plain GET to the bond's switch URL; the controller remembers the last
/// switch so consecutive operations on the same bond skip the extra
/// round-trip.
#[derive(Debug, Default)]
pub(crate) struct BondController {
    current: Mutex<Option<Url>>,
}

impl BondController {
    pub(crate) fn is_current(&self, url: &Url) -> bool {
        self.lock().as_ref() == Some(url)
    }

    pub(crate) fn set_current(&self, url: Url) {
        *self.lock() = Some(url);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Url>> {
        self.current
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
