//! Downloadable file resources.

use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::session::{ProgressFn, SigaaHttp};

/// Endpoint serving file contents by id/key ticket.
const FILE_PATH: &str = "/sigaa/verArquivo";

/// One portal file, addressed by the id/key pair the portal embeds in
/// course pages and attachment listings.
///
/// The pair works as a bearer ticket: fetching needs the session cookies
/// but no further navigation state. The portal answers an expired or
/// foreign ticket with a redirect, surfaced as
/// [`DownloadExpired`](crate::SigaaError::DownloadExpired).
pub struct SigaaFile {
    http: SigaaHttp,
    id: String,
    key: String,
}

impl std::fmt::Debug for SigaaFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigaaFile")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl SigaaFile {
    pub(crate) fn new(http: SigaaHttp, id: String, key: String) -> Self {
        Self { http, id, key }
    }

    /// Portal-internal file id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Access key paired with the id.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Downloads the file.
    ///
    /// `destination` names either an existing directory, in which case the
    /// server-provided filename is used, or an explicit file path to
    /// (over)write. Reports progress in total bytes written.
    ///
    /// # Errors
    ///
    /// The download-path errors of
    /// [`download_by_get`](SigaaHttp::download_by_get), notably
    /// [`DownloadExpired`](crate::SigaaError::DownloadExpired) when the
    /// ticket no longer resolves.
    pub async fn download_to(
        &self,
        destination: &Path,
        progress: Option<&ProgressFn>,
    ) -> Result<PathBuf> {
        let path = format!(
            "{FILE_PATH}?idArquivo={}&key={}",
            urlencoding::encode(&self.id),
            urlencoding::encode(&self.key)
        );
        self.http.download_by_get(&path, destination, progress).await
    }
}
