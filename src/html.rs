//! Text extraction helpers shared by every page scraper.
//!
//! SIGAA markup is table-heavy and littered with presentational tags, so
//! scrapers constantly need "the visible text of this element" with
//! whitespace collapsed. Entities are already decoded by the HTML parser;
//! these helpers only deal with flattening and date formats.

use chrono::{NaiveDate, NaiveDateTime};
use scraper::ElementRef;

/// Collects the visible text of an element, whitespace-collapsed and
/// trimmed. The equivalent of reading `innerText` off rendered markup.
#[must_use]
pub fn element_text(el: &ElementRef<'_>) -> String {
    el.text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parses the portal's `dd/mm/yyyy` date format.
#[must_use]
pub fn parse_sigaa_date(text: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(text.trim(), "%d/%m/%Y").ok()
}

/// Parses a `dd/mm/yyyy` date plus an optional `hh:mm` time into a
/// timestamp. Activity tables print the time right after the date (or not
/// at all); when it is missing the portal treats the deadline as end of
/// day, so `23:59` is used.
#[must_use]
pub fn parse_sigaa_datetime(date: &str, time: Option<&str>) -> Option<NaiveDateTime> {
    let date = parse_sigaa_date(date)?;
    let (hour, minute) = match time {
        Some(t) => {
            let mut parts = t.trim().splitn(2, ':');
            let hour: u32 = parts.next()?.parse().ok()?;
            let minute: u32 = parts.next()?.parse().ok()?;
            (hour, minute)
        }
        None => (23, 59),
    };
    date.and_hms_opt(hour, minute, 0)
}
