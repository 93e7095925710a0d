//! Pending-activity types scraped from the student portal front page.

use chrono::NaiveDateTime;

/// What kind of coursework an activity row announces.
///
/// The portal prints the kind as a Portuguese label inside the row text;
/// the scraper maps each label to one variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityKind {
    /// "Tarefa" rows: homework with an upload deadline.
    Homework,
    /// "Avaliação" rows: an exam date announcement.
    Exam,
    /// "Questionário" rows: an online quiz with a deadline.
    Quiz,
}

/// One row of the "Avaliações" box on the student portal front page.
///
/// Every kind carries the same data, so the kind is a plain discriminant
/// instead of per-variant payloads.
#[derive(Debug, Clone)]
pub struct Activity {
    /// Which coursework label the row carried.
    pub kind: ActivityKind,
    /// Title of the activity itself, after the kind label.
    pub title: String,
    /// Title of the course the activity belongs to, before the kind label.
    pub course_title: String,
    /// Due date. Rows without an explicit time mean end of day, `23:59`.
    pub date: NaiveDateTime,
    /// Whether the portal marks the row with the done check mark.
    pub done: bool,
}
