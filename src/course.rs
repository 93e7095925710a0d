//! Course types scraped from the student course table.

use indexmap::IndexMap;

use crate::page::Form;

/// One course (turma) of a student bond, as listed on the course table of
/// the student portal.
///
/// The struct is a snapshot of one table row: opening the course page is a
/// plain [`submit_form`](crate::session::SigaaHttp::submit_form) of
/// [`open_form`](Self::open_form), which the portal renders as a JSF button
/// rather than a hyperlink.
#[derive(Debug, Clone)]
pub struct CourseStudent {
    /// Portal-internal course id (`idTurma` of the open form).
    pub id: String,
    /// Course title, the part of the listing before the first `" - "`.
    pub title: String,
    /// Course code, the part of the listing after the first `" - "`, when
    /// the institution prints one.
    pub code: Option<String>,
    /// Academic period the course belongs to, e.g. `2024.1`.
    pub period: String,
    /// Weekly schedule in the portal's compact notation, e.g. `4T34`.
    pub schedule: String,
    /// Enrolled student count, zero when the table omits the column.
    pub number_of_students: u32,
    /// JSF form that opens the course page, reconstructed from the row's
    /// button script.
    pub open_form: Form,
}

impl CourseStudent {
    /// The POST fields submitted when opening the course page.
    #[must_use]
    pub fn open_fields(&self) -> &IndexMap<String, String> {
        &self.open_form.fields
    }
}
