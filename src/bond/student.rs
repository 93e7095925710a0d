//! Student bond operations: course table and pending-activity scraping.

use std::sync::Arc;
use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Selector};
use tracing::{debug, instrument};
use url::Url;

use crate::activity::{Activity, ActivityKind};
use crate::course::CourseStudent;
use crate::error::{Result, SigaaError};
use crate::html::{element_text, parse_sigaa_datetime};
use crate::page::Page;
use crate::session::{RequestOptions, SigaaHttp};

use super::BondController;

/// Course table of the logged-in student, one row per course per period.
const COURSES_PATH: &str = "/sigaa/portais/discente/turmas.jsf";

/// Student portal front page, carrying the pending-activities box.
const FRONT_PAGE_PATH: &str = "/sigaa/portais/discente/discente.jsf";

/// Icon the portal renders on activity rows that are already handled.
const DONE_ICON_SRC: &str = "/sigaa/img/check.png";

/// `dd/mm/yyyy` anywhere in an activity row.
#[allow(clippy::expect_used)]
static DATE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\d{2}/\d{2}/\d{4}").expect("date regex is valid")
    // Static pattern, safe to panic
});

/// `hh:mm` printed after the date on rows with an explicit deadline time.
#[allow(clippy::expect_used)]
static TIME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\d{2}:\d{2}").expect("time regex is valid")
    // Static pattern, safe to panic
});

/// One student registration of the authenticated user.
///
/// Operations run through an HTTP handle scoped to this bond's cache
/// partition and, when the user holds several bonds, switch the
/// server-side session to this bond before the first request.
pub struct StudentBond {
    http: SigaaHttp,
    controller: Arc<BondController>,
    program: String,
    registration: String,
    switch_url: Option<Url>,
}

impl std::fmt::Debug for StudentBond {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StudentBond")
            .field("program", &self.program)
            .field("registration", &self.registration)
            .field("switch_url", &self.switch_url.as_ref().map(Url::as_str))
            .finish_non_exhaustive()
    }
}

impl StudentBond {
    pub(crate) fn new(
        http: &SigaaHttp,
        controller: Arc<BondController>,
        program: String,
        registration: String,
        switch_url: Option<Url>,
    ) -> Self {
        Self {
            http: http.with_bond(switch_url.clone()),
            controller,
            program,
            registration,
            switch_url,
        }
    }

    /// The program (curso) this registration belongs to.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// The registration code (matrícula).
    #[must_use]
    pub fn registration(&self) -> &str {
        &self.registration
    }

    /// The bond-switch URL, absent when the user holds a single bond.
    #[must_use]
    pub fn switch_url(&self) -> Option<&Url> {
        self.switch_url.as_ref()
    }

    /// Scrapes the course table.
    ///
    /// With `all_periods` set every listed period is returned; otherwise
    /// only the newest period. Different deployments order the table
    /// differently, so "newest" is decided by comparing the period labels
    /// themselves, not by table position.
    ///
    /// # Errors
    ///
    /// Fetch errors from the transport, plus
    /// [`SigaaError::UnexpectedPage`] when the table is missing a required
    /// column and [`SigaaError::MissingFormField`] when a course row's
    /// open form carries no `idTurma`.
    #[instrument(skip(self), fields(registration = %self.registration))]
    pub async fn courses(&self, all_periods: bool) -> Result<Vec<CourseStudent>> {
        self.activate().await?;
        let page = self.http.get(COURSES_PATH).await?;
        let document = page.document();

        let Some(table) = document.select(&table_selector()).next() else {
            return Ok(Vec::new());
        };
        let rows: Vec<ElementRef<'_>> = table.select(&row_selector()).collect();

        let period_filter = if all_periods {
            None
        } else {
            newest_period(&rows)
        };
        let columns = CourseColumns::discover(&table, &page)?;

        let mut period: Option<String> = None;
        let mut courses = Vec::new();
        for row in rows {
            let cells: Vec<ElementRef<'_>> = row.select(&cell_selector()).collect();
            let Some(first) = cells.first() else { continue };
            if cell_has_class(first, "periodo") {
                period = Some(element_text(first));
                continue;
            }
            // Rows before the first period header belong to no period.
            let Some(current_period) = period.as_deref() else {
                continue;
            };
            if let Some(filter) = period_filter.as_deref()
                && filter != current_period
            {
                continue;
            }
            courses.push(course_from_row(&page, &cells, &columns, current_period)?);
        }
        debug!(count = courses.len(), "scraped course table");
        Ok(courses)
    }

    /// Scrapes the pending-activities box on the portal front page.
    ///
    /// Rows whose text does not carry a recognizable date and kind label
    /// are skipped rather than returned half-empty.
    ///
    /// # Errors
    ///
    /// Fetch errors from the transport. A missing activities box is an
    /// empty list, not an error: the portal omits it outside term time.
    #[instrument(skip(self), fields(registration = %self.registration))]
    pub async fn activities(&self) -> Result<Vec<Activity>> {
        self.activate().await?;
        let page = self.http.get(FRONT_PAGE_PATH).await?;
        let document = page.document();

        let Some(table) = document.select(&activities_table_selector()).next() else {
            return Ok(Vec::new());
        };

        let mut activities = Vec::new();
        for row in table.select(&row_selector()) {
            if let Some(activity) = activity_from_row(&row) {
                activities.push(activity);
            }
        }
        debug!(count = activities.len(), "scraped pending activities");
        Ok(activities)
    }

    /// Points the server-side session at this bond, once, when the
    /// previous operation ran under a different bond.
    async fn activate(&self) -> Result<()> {
        let Some(url) = &self.switch_url else {
            return Ok(());
        };
        if self.controller.is_current(url) {
            return Ok(());
        }
        debug!(bond = %url, "switching server-side bond");
        let options = RequestOptions {
            no_cache: true,
            ..RequestOptions::default()
        };
        let page = self.http.get_with_options(url.as_str(), options).await?;
        self.http.follow_all_redirects(page, options).await?;
        self.controller.set_current(url.clone());
        Ok(())
    }
}

/// Column positions of the course table, discovered from the header text
/// because deployments insert and drop columns freely.
struct CourseColumns {
    title: usize,
    schedule: usize,
    students: Option<usize>,
    button: usize,
}

impl CourseColumns {
    fn discover(table: &ElementRef<'_>, page: &Page) -> Result<Self> {
        let mut title = None;
        let mut schedule = None;
        let mut students = None;
        let mut button = None;
        for (index, cell) in table.select(&header_cell_selector()).enumerate() {
            match element_text(&cell).as_str() {
                "Disciplina" => title = Some(index),
                "Horário" => schedule = Some(index),
                "Alunos" => students = Some(index),
                // The open-button column has an empty header.
                "" => button = Some(index),
                _ => {}
            }
        }
        let url = page.url().as_str();
        Ok(Self {
            title: title.ok_or_else(|| {
                SigaaError::unexpected_page(url, "course table has no title column")
            })?,
            schedule: schedule.ok_or_else(|| {
                SigaaError::unexpected_page(url, "course table has no schedule column")
            })?,
            students,
            button: button.ok_or_else(|| {
                SigaaError::unexpected_page(url, "course table has no button column")
            })?,
        })
    }
}

fn course_from_row(
    page: &Page,
    cells: &[ElementRef<'_>],
    columns: &CourseColumns,
    period: &str,
) -> Result<CourseStudent> {
    let url = page.url().as_str();
    let cell_at = |index: usize| {
        cells.get(index).copied().ok_or_else(|| {
            SigaaError::unexpected_page(url, "course row is shorter than the table header")
        })
    };

    // The listing prints "TITLE - CODE"; some deployments omit the code.
    let fullname = element_text(&cell_at(columns.title)?);
    let mut name_parts = fullname.split(" - ");
    let title = name_parts.next().unwrap_or_default().to_string();
    let code = name_parts.next().map(str::to_string);

    let schedule = element_text(&cell_at(columns.schedule)?);

    let number_of_students = columns
        .students
        .and_then(|index| cells.get(index))
        .map(element_text)
        .and_then(|text| text.parse().ok())
        .unwrap_or(0);

    let button = cell_at(columns.button)?;
    let script = button
        .select(&onclick_selector())
        .next()
        .and_then(|anchor| anchor.value().attr("onclick"))
        .ok_or_else(|| SigaaError::unexpected_page(url, "course row has no open button"))?;
    let open_form = page.jsf_form(script)?;

    let id = open_form
        .fields
        .get("idTurma")
        .cloned()
        .ok_or_else(|| SigaaError::missing_form_field("idTurma", url))?;

    Ok(CourseStudent {
        id,
        title,
        code,
        period: period.to_string(),
        schedule,
        number_of_students,
        open_form,
    })
}

/// The newest period label among the table's period header rows.
fn newest_period(rows: &[ElementRef<'_>]) -> Option<String> {
    let mut newest: Option<String> = None;
    for row in rows {
        let Some(first) = row.select(&cell_selector()).next() else {
            continue;
        };
        if !cell_has_class(&first, "periodo") {
            continue;
        }
        let period = element_text(&first);
        if newest.as_deref().is_none_or(|current| period.as_str() > current) {
            newest = Some(period);
        }
    }
    newest
}

fn activity_from_row(row: &ElementRef<'_>) -> Option<Activity> {
    let text = element_text(row);
    let date_match = DATE_PATTERN.find(&text)?;
    let time = TIME_PATTERN
        .find(&text[date_match.end()..])
        .map(|m| m.as_str());
    let date = parse_sigaa_datetime(date_match.as_str(), time)?;

    let done = row
        .select(&img_selector())
        .next()
        .and_then(|img| img.value().attr("src"))
        == Some(DONE_ICON_SRC);

    let info = element_text(&row.select(&small_selector()).next()?);
    let (kind, course_title, title) = split_info(&info)?;

    Some(Activity {
        kind,
        title: title.trim().to_string(),
        course_title: course_title.trim().to_string(),
        date,
        done,
    })
}

/// Splits the row's `<small>` text on the kind label the portal prints
/// between course title and activity title.
fn split_info(info: &str) -> Option<(ActivityKind, &str, &str)> {
    if let Some((course, title)) = info.split_once(" Tarefa:") {
        return Some((ActivityKind::Homework, course, title));
    }
    if let Some((course, title)) = info.split_once(" Avaliação: ") {
        return Some((ActivityKind::Exam, course, title));
    }
    if let Some((course, title)) = info.split_once(" Questionário:") {
        return Some((ActivityKind::Quiz, course, title));
    }
    None
}

fn cell_has_class(cell: &ElementRef<'_>, class: &str) -> bool {
    cell.value()
        .attr("class")
        .is_some_and(|classes| classes.split_whitespace().any(|c| c == class))
}

#[allow(clippy::expect_used)]
fn table_selector() -> Selector {
    Selector::parse("table.listagem").expect("table selector is valid") // Static selector, safe to panic
}

#[allow(clippy::expect_used)]
fn row_selector() -> Selector {
    Selector::parse("tbody > tr").expect("row selector is valid") // Static selector, safe to panic
}

#[allow(clippy::expect_used)]
fn cell_selector() -> Selector {
    Selector::parse("td").expect("cell selector is valid") // Static selector, safe to panic
}

#[allow(clippy::expect_used)]
fn header_cell_selector() -> Selector {
    Selector::parse("thead > tr td").expect("header selector is valid") // Static selector, safe to panic
}

#[allow(clippy::expect_used)]
fn onclick_selector() -> Selector {
    Selector::parse("a[onclick]").expect("anchor selector is valid") // Static selector, safe to panic
}

#[allow(clippy::expect_used)]
fn activities_table_selector() -> Selector {
    Selector::parse("#avaliacao-portal > table").expect("activities selector is valid")
    // Static selector, safe to panic
}

#[allow(clippy::expect_used)]
fn img_selector() -> Selector {
    Selector::parse("img").expect("img selector is valid") // Static selector, safe to panic
}

#[allow(clippy::expect_used)]
fn small_selector() -> Selector {
    Selector::parse("small").expect("small selector is valid") // Static selector, safe to panic
}
