//! The authenticated user: bond discovery, profile data and logoff.

use std::sync::Arc;

use reqwest::StatusCode;
use scraper::{ElementRef, Selector};
use tracing::{debug, info, instrument};
use url::Url;

use crate::bond::{Bond, BondController, StudentBond, TeacherBond};
use crate::error::{Result, SigaaError};
use crate::html::element_text;
use crate::page::Page;
use crate::session::{RequestOptions, SigaaHttp};

/// Bond list of the logged-in user, also the landing page when the user
/// holds more than one bond.
const BONDS_PATH: &str = "/sigaa/vinculos.jsf";

/// Student portal front page; carries the profile block.
const FRONT_PAGE_PATH: &str = "/sigaa/portais/discente/discente.jsf";

/// Server-side logout action.
const LOGOFF_PATH: &str = "/sigaa/logar.do?dispatch=logOff";

/// Texts that identify a page as a logged-in portal page. A post-login
/// response matching none of these is an interstitial still mid-redirect,
/// which callers handle by refetching.
const PORTAL_MARKERS: [&str; 4] = [
    "Escolha seu Vínculo",
    "Portal do Discente",
    "Portal do Docente",
    "Menu Principal",
];

/// Filename the portal serves when the user has no profile photo.
const NO_PICTURE_MARKER: &str = "no_picture";

/// An authenticated portal user.
///
/// Created from the post-login page by [`Sigaa::login`]. Bonds and
/// profile data are fetched lazily; every bond handed out shares one
/// [`BondController`], so switching between bonds stays coherent across
/// the whole account.
///
/// [`Sigaa::login`]: crate::client::Sigaa::login
#[derive(Debug)]
pub struct Account {
    http: SigaaHttp,
    controller: Arc<BondController>,
}

/// Bonds split the way the portal lists them.
struct BondLists {
    active: Vec<Bond>,
    inactive: Vec<Bond>,
}

impl Account {
    /// Validates that `page` is a logged-in portal page and wraps it.
    ///
    /// # Errors
    ///
    /// [`SigaaError::UnexpectedPage`] when the page matches no known
    /// portal shape.
    pub(crate) fn from_page(http: SigaaHttp, page: &Page) -> Result<Self> {
        let recognized = PORTAL_MARKERS
            .iter()
            .any(|marker| page.body().contains(marker));
        if !recognized {
            return Err(SigaaError::unexpected_page(
                page.url().as_str(),
                "page is not a logged-in portal page",
            ));
        }
        debug!(url = %page.url(), "account page recognized");
        Ok(Self {
            http,
            controller: Arc::new(BondController::default()),
        })
    }

    /// Bonds the user can currently operate under.
    ///
    /// # Errors
    ///
    /// Fetch errors, plus [`SigaaError::UnexpectedPage`] when the bonds
    /// page has no bond table (typically an expired session).
    #[instrument(skip(self))]
    pub async fn active_bonds(&self) -> Result<Vec<Bond>> {
        Ok(self.fetch_bonds().await?.active)
    }

    /// Bonds listed as no longer active (finished programs, past roles).
    ///
    /// # Errors
    ///
    /// Same conditions as [`Account::active_bonds`].
    #[instrument(skip(self))]
    pub async fn inactive_bonds(&self) -> Result<Vec<Bond>> {
        Ok(self.fetch_bonds().await?.inactive)
    }

    /// The user's full name, as the portal prints it.
    ///
    /// # Errors
    ///
    /// Fetch errors, plus [`SigaaError::UnexpectedPage`] when the portal
    /// page carries no user block.
    #[instrument(skip(self))]
    pub async fn name(&self) -> Result<String> {
        let page = self.http.get(FRONT_PAGE_PATH).await?;
        let document = page.document();
        let Some(element) = document.select(&name_selector()).next() else {
            return Err(SigaaError::unexpected_page(
                page.url().as_str(),
                "portal page has no user name",
            ));
        };
        Ok(element_text(&element))
    }

    /// Every e-mail address listed on the user's profile block.
    ///
    /// # Errors
    ///
    /// Fetch errors from the transport.
    pub async fn emails(&self) -> Result<Vec<String>> {
        let page = self.http.get(FRONT_PAGE_PATH).await?;
        let document = page.document();
        let mut emails = Vec::new();
        for row in document.select(&profile_row_selector()) {
            let cells: Vec<ElementRef<'_>> = row.select(&cell_selector()).collect();
            let Some((label, values)) = cells.split_first() else {
                continue;
            };
            if !element_text(label).starts_with("E-mail") {
                continue;
            }
            for value in values {
                let text = element_text(value);
                if !text.is_empty() {
                    emails.push(text);
                }
            }
        }
        Ok(emails)
    }

    /// URL of the user's profile photo, absent when none was uploaded.
    ///
    /// # Errors
    ///
    /// Fetch errors from the transport.
    pub async fn profile_picture_url(&self) -> Result<Option<Url>> {
        let page = self.http.get(FRONT_PAGE_PATH).await?;
        let document = page.document();
        let Some(src) = document
            .select(&picture_selector())
            .next()
            .and_then(|img| img.value().attr("src"))
        else {
            return Ok(None);
        };
        if src.contains(NO_PICTURE_MARKER) {
            return Ok(None);
        }
        Ok(page.url().join(src).ok())
    }

    /// Logs the user off server side, then drops all local session state.
    ///
    /// The client instance is not reusable afterwards; build a new one to
    /// log in again.
    ///
    /// # Errors
    ///
    /// Fetch errors, plus [`SigaaError::HttpStatus`] when the settled
    /// post-logoff page is not a success.
    #[instrument(skip(self))]
    pub async fn logoff(&self) -> Result<()> {
        let options = RequestOptions {
            no_cache: true,
            ..RequestOptions::default()
        };
        let page = self.http.get_with_options(LOGOFF_PATH, options).await?;
        let settled = self.http.follow_all_redirects(page, options).await?;
        if settled.status() != StatusCode::OK {
            return Err(SigaaError::http_status(
                settled.url().as_str(),
                settled.status().as_u16(),
            ));
        }
        self.http.close();
        info!("logged off");
        Ok(())
    }

    async fn fetch_bonds(&self) -> Result<BondLists> {
        let page = self.http.get(BONDS_PATH).await?;
        let document = page.document();
        let Some(table) = document.select(&bond_table_selector()).next() else {
            return Err(SigaaError::unexpected_page(
                page.url().as_str(),
                "page has no bond table",
            ));
        };

        let mut lists = BondLists {
            active: Vec::new(),
            inactive: Vec::new(),
        };
        for row in table.select(&row_selector()) {
            // The portal repeats id="tdTipo" on the kind cell of each row.
            let Some(kind_cell) = row.select(&kind_cell_selector()).next() else {
                continue;
            };
            let cells: Vec<ElementRef<'_>> = row.select(&cell_selector()).collect();
            let Some(kind_index) = cells.iter().position(|cell| cell.id() == kind_cell.id())
            else {
                continue;
            };
            let registration = cells
                .get(kind_index + 1)
                .map(element_text)
                .unwrap_or_default();
            let info = cells
                .get(kind_index + 2)
                .map(element_text)
                .unwrap_or_default();
            // Only bonds the user can still operate under get a switch
            // link; rows without one are inactive.
            let switch_url = row
                .select(&link_selector())
                .next()
                .and_then(|anchor| anchor.value().attr("href"))
                .and_then(|href| page.url().join(href).ok());
            let active = switch_url.is_some();

            let bond = match element_text(&kind_cell).as_str() {
                "Discente" => {
                    let program = info.strip_prefix("Curso: ").unwrap_or(&info).to_string();
                    Bond::Student(StudentBond::new(
                        &self.http,
                        Arc::clone(&self.controller),
                        program,
                        registration,
                        switch_url,
                    ))
                }
                "Docente" => {
                    let department = info
                        .strip_prefix("Departamento: ")
                        .unwrap_or(&info)
                        .to_string();
                    Bond::Teacher(TeacherBond::new(department, registration, switch_url))
                }
                _ => continue,
            };
            if active {
                lists.active.push(bond);
            } else {
                lists.inactive.push(bond);
            }
        }
        debug!(
            active = lists.active.len(),
            inactive = lists.inactive.len(),
            "parsed bonds page"
        );
        Ok(lists)
    }
}

#[allow(clippy::expect_used)]
fn bond_table_selector() -> Selector {
    Selector::parse("table.subFormulario").expect("bond table selector is valid")
    // Static selector, safe to panic
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
fn kind_cell_selector() -> Selector {
    Selector::parse("td#tdTipo").expect("kind cell selector is valid") // Static selector, safe to panic
}

#[allow(clippy::expect_used)]
fn link_selector() -> Selector {
    Selector::parse("a[href]").expect("link selector is valid") // Static selector, safe to panic
}

#[allow(clippy::expect_used)]
fn name_selector() -> Selector {
    Selector::parse("p.usuario > span").expect("name selector is valid") // Static selector, safe to panic
}

#[allow(clippy::expect_used)]
fn profile_row_selector() -> Selector {
    Selector::parse("tr").expect("profile row selector is valid") // Static selector, safe to panic
}

#[allow(clippy::expect_used)]
fn picture_selector() -> Selector {
    Selector::parse("div.foto img").expect("picture selector is valid") // Static selector, safe to panic
}
