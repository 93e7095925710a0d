//! SIGAA Client Core Library
//!
//! This library provides a session-oriented client for SIGAA academic
//! portals (UFPB, UNB, IFSC, UFPE deployments): login, bond discovery,
//! course and activity scraping, and authenticated file downloads.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`client`] - The [`Sigaa`] facade and its builder
//! - [`session`] - HTTP transport, cookies, page cache, request pacing, login
//! - [`page`] - Fetched pages and JSF form extraction
//! - [`account`] - The logged-in account: bonds, profile, logoff
//! - [`bond`] - Student and teacher bonds; course and activity scraping
//! - [`resource`] - Downloadable file handles
//!
//! A typical flow: build a [`Sigaa`] for a deployment URL, `login`, pick a
//! [`StudentBond`] from the account's active bonds, then scrape courses
//! and activities from it.

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod account;
pub mod activity;
pub mod bond;
pub mod client;
pub mod course;
pub mod error;
pub mod html;
pub mod institution;
pub mod page;
pub mod resource;
pub mod session;

// Re-export commonly used types
pub use account::Account;
pub use activity::{Activity, ActivityKind};
pub use bond::{Bond, StudentBond, TeacherBond};
pub use client::{Sigaa, SigaaBuilder};
pub use course::CourseStudent;
pub use error::{Result, SigaaError};
pub use institution::{Institution, LoginFlavor};
pub use page::{Form, Page};
pub use resource::SigaaFile;
pub use session::{Login, LoginStatus, ProgressFn, RequestOptions, Session, SigaaHttp};
