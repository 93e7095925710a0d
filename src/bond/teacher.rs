//! Teacher bond data.

use url::Url;

/// One teaching assignment ("Docente") of the authenticated user.
///
/// Carried as data only: the bonds page lists teacher bonds alongside
/// student ones, but no teacher portal operations are implemented.
#[derive(Debug, Clone)]
pub struct TeacherBond {
    department: String,
    registration: String,
    switch_url: Option<Url>,
}

impl TeacherBond {
    pub(crate) fn new(
        department: String,
        registration: String,
        switch_url: Option<Url>,
    ) -> Self {
        Self {
            department,
            registration,
            switch_url,
        }
    }

    /// The department the assignment belongs to.
    #[must_use]
    pub fn department(&self) -> &str {
        &self.department
    }

    /// The registration code (SIAPE).
    #[must_use]
    pub fn registration(&self) -> &str {
        &self.registration
    }

    /// The bond-switch URL, absent when the user holds a single bond.
    #[must_use]
    pub fn switch_url(&self) -> Option<&Url> {
        self.switch_url.as_ref()
    }
}
