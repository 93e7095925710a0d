//! Error types for SIGAA client operations.
//!
//! This module defines structured errors for the whole crate: transport
//! failures, login classification, form extraction and file downloads.
//! Parsing errors carry the offending URL or markup excerpt so failures
//! against a live portal can be diagnosed from logs alone.

use std::path::PathBuf;

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SigaaError>;

/// Maximum length of markup excerpts embedded in error messages.
const EXCERPT_LEN: usize = 120;

/// Errors that can occur while talking to a SIGAA portal.
#[derive(Debug, Error)]
pub enum SigaaError {
    /// Network-level error (DNS resolution, connection refused, TLS errors, etc.)
    #[error("network error requesting {url}: {source}")]
    Network {
        /// The URL that failed.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// HTTP error response (4xx client errors, 5xx server errors).
    #[error("HTTP {status} requesting {url}")]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// The provided URL is malformed or invalid.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },

    /// A redirect chain exceeded the hop limit without settling.
    #[error("too many redirects (limit {limit}) starting from {url}")]
    TooManyRedirects {
        /// The URL the chain started from.
        url: String,
        /// The hop limit that was exceeded.
        limit: usize,
    },

    /// The username/password pair was rejected by the portal.
    ///
    /// Terminal: retrying with the same credentials will not succeed.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// The login response matched neither the success nor the
    /// invalid-credentials shape, even after the automatic resubmission.
    #[error("unexpected login response from {url}")]
    UnexpectedLoginResponse {
        /// The URL the classification failed on.
        url: String,
    },

    /// `login` was called on a session that is already authenticated.
    #[error("session is already authenticated")]
    AlreadyAuthenticated,

    /// An inline JSF script did not contain a resolvable form reference,
    /// or its embedded field literals could not be parsed.
    #[error("malformed form script: {reason} (script: {excerpt})")]
    MalformedFormScript {
        /// What about the script could not be handled.
        reason: String,
        /// Leading excerpt of the offending script text.
        excerpt: String,
    },

    /// The form referenced by an inline script has no `action` attribute.
    #[error("form '{form_id}' has no action attribute on {page_url}")]
    MissingFormAction {
        /// The id of the form element.
        form_id: String,
        /// The page the form was found on.
        page_url: String,
    },

    /// A form the scraper depends on is missing an expected field.
    #[error("form on {page_url} is missing field '{field}'")]
    MissingFormField {
        /// The expected field name.
        field: String,
        /// The page the form was found on.
        page_url: String,
    },

    /// A page did not have the structure the scraper expected.
    #[error("unexpected page shape at {url}: {reason}")]
    UnexpectedPage {
        /// The URL of the page.
        url: String,
        /// What was missing or malformed.
        reason: String,
    },

    /// The server answered a download request with a redirect, which SIGAA
    /// uses to signal that the file ticket has expired.
    #[error("download link expired for {url}")]
    DownloadExpired {
        /// The download URL that expired.
        url: String,
    },

    /// The download destination does not exist or is not usable.
    #[error("invalid download destination: {path}")]
    InvalidDownloadDestination {
        /// The destination path.
        path: PathBuf,
    },

    /// A download response that requires a server-provided filename
    /// (directory destination) did not carry one.
    #[error("response for {url} has no usable content-disposition filename")]
    MissingFilename {
        /// The download URL.
        url: String,
    },

    /// File system error while writing a download.
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

impl SigaaError {
    /// Creates a network error from a reqwest error.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Creates a redirect-limit error.
    pub fn too_many_redirects(url: impl Into<String>, limit: usize) -> Self {
        Self::TooManyRedirects {
            url: url.into(),
            limit,
        }
    }

    /// Creates an unexpected-login-response error.
    pub fn unexpected_login_response(url: impl Into<String>) -> Self {
        Self::UnexpectedLoginResponse { url: url.into() }
    }

    /// Creates a malformed-form-script error, truncating the script to an
    /// excerpt safe to embed in log lines.
    pub fn malformed_form_script(reason: impl Into<String>, script: &str) -> Self {
        Self::MalformedFormScript {
            reason: reason.into(),
            excerpt: excerpt(script),
        }
    }

    /// Creates a missing-form-action error.
    pub fn missing_form_action(form_id: impl Into<String>, page_url: impl Into<String>) -> Self {
        Self::MissingFormAction {
            form_id: form_id.into(),
            page_url: page_url.into(),
        }
    }

    /// Creates a missing-form-field error.
    pub fn missing_form_field(field: impl Into<String>, page_url: impl Into<String>) -> Self {
        Self::MissingFormField {
            field: field.into(),
            page_url: page_url.into(),
        }
    }

    /// Creates an unexpected-page error.
    pub fn unexpected_page(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UnexpectedPage {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Creates a download-expired error.
    pub fn download_expired(url: impl Into<String>) -> Self {
        Self::DownloadExpired { url: url.into() }
    }

    /// Creates an invalid-destination error.
    pub fn invalid_download_destination(path: impl Into<PathBuf>) -> Self {
        Self::InvalidDownloadDestination { path: path.into() }
    }

    /// Creates a missing-filename error.
    pub fn missing_filename(url: impl Into<String>) -> Self {
        Self::MissingFilename { url: url.into() }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Truncates script text to a single-line excerpt for error messages.
fn excerpt(text: &str) -> String {
    let flat: String = text
        .chars()
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .take(EXCERPT_LEN)
        .collect();
    if text.chars().count() > EXCERPT_LEN {
        format!("{flat}...")
    } else {
        flat
    }
}

// Note on From trait implementations:
// No blanket `From<reqwest::Error>` / `From<std::io::Error>` conversions.
// Every variant needs context (url, path) the source errors don't carry,
// so the helper constructors are the only way in.

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn http_status_display_includes_code_and_url() {
        let error = SigaaError::http_status("https://sigaa.ifsc.edu.br/sigaa/verTelaLogin.do", 503);
        let msg = error.to_string();
        assert!(msg.contains("503"), "Expected '503' in: {msg}");
        assert!(msg.contains("verTelaLogin.do"), "Expected URL in: {msg}");
    }

    #[test]
    fn too_many_redirects_display_includes_limit() {
        let error = SigaaError::too_many_redirects("https://example.com/a", 20);
        let msg = error.to_string();
        assert!(msg.contains("limit 20"), "Expected limit in: {msg}");
        assert!(msg.contains("https://example.com/a"), "Expected URL in: {msg}");
    }

    #[test]
    fn malformed_form_script_truncates_long_scripts() {
        let script = "jsf.util.chain(document.getElementById('x'),event,".repeat(10);
        let error = SigaaError::malformed_form_script("no form reference", &script);
        let msg = error.to_string();
        assert!(msg.contains("no form reference"));
        assert!(msg.ends_with("...)"), "Expected truncation marker in: {msg}");
        assert!(msg.len() < script.len(), "excerpt should not embed the whole script");
    }

    #[test]
    fn malformed_form_script_flattens_newlines() {
        let error = SigaaError::malformed_form_script("bad literal", "line1\nline2");
        let msg = error.to_string();
        assert!(!msg.contains('\n'), "Expected single-line message, got: {msg}");
        assert!(msg.contains("line1 line2"));
    }

    #[test]
    fn invalid_credentials_is_terse() {
        assert_eq!(SigaaError::InvalidCredentials.to_string(), "invalid credentials");
    }

    #[test]
    fn io_display_includes_path() {
        let io_error = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let error = SigaaError::io(PathBuf::from("/tmp/notas.pdf"), io_error);
        let msg = error.to_string();
        assert!(msg.contains("/tmp/notas.pdf"), "Expected path in: {msg}");
    }

    #[test]
    fn missing_form_action_display() {
        let error = SigaaError::missing_form_action("formAcessarTurma", "https://sigaa.unb.br/portal.jsf");
        let msg = error.to_string();
        assert!(msg.contains("formAcessarTurma"));
        assert!(msg.contains("portal.jsf"));
    }
}
