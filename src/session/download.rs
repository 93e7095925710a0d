//! File downloads over the session pipeline.
//!
//! Downloads share the session's queue, cookies and hooks but never touch
//! the page cache: bodies are streamed to disk, not held in memory. The
//! portal signals an expired download link with a redirect to an error
//! page, so redirects here are errors rather than pages.
//!
//! Writes go to a `.part` sibling first and are renamed into place once
//! the stream completes, so a failed download never leaves a truncated
//! file at the destination path.

use std::path::{Component, Path, PathBuf};

use futures_util::StreamExt;
use reqwest::Method;
use reqwest::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info, instrument};

use crate::error::{Result, SigaaError};
use crate::session::http::SigaaHttp;
use crate::session::queue::RequestDescriptor;
use crate::session::transport;

use indexmap::IndexMap;

/// Callback invoked with the running byte count as a download progresses.
pub type ProgressFn = dyn Fn(u64) + Send + Sync;

impl SigaaHttp {
    /// Downloads the resource behind a GET link.
    ///
    /// `destination` must already exist: a directory, into which the file
    /// is written under the name the portal supplies via
    /// `Content-Disposition`, or a file path to overwrite.
    ///
    /// Returns the path of the written file.
    ///
    /// # Errors
    ///
    /// [`SigaaError::InvalidDownloadDestination`] when `destination` does
    /// not exist, [`SigaaError::DownloadExpired`] when the portal answers
    /// with a redirect, [`SigaaError::HttpStatus`] on any other non-200
    /// status, [`SigaaError::MissingFilename`] when a directory
    /// destination gets no `Content-Disposition` name, and
    /// [`SigaaError::Io`] on filesystem failures.
    #[instrument(skip(self, progress), fields(url = %path, destination = %destination.display()))]
    pub async fn download_by_get(
        &self,
        path: &str,
        destination: &Path,
        progress: Option<&ProgressFn>,
    ) -> Result<PathBuf> {
        let url = self.resolve(path)?;
        let mut descriptor = RequestDescriptor::new(Method::GET, url);
        descriptor.bond = self.bond().cloned();
        descriptor.no_cache = true;
        descriptor.skip_store = true;
        self.download(descriptor, None, destination, progress).await
    }

    /// Downloads the resource behind a POST form, such as the portal's
    /// file views that require a submitted id/key pair.
    ///
    /// Same destination contract and errors as
    /// [`SigaaHttp::download_by_get`].
    ///
    /// # Errors
    ///
    /// See [`SigaaHttp::download_by_get`].
    #[instrument(skip(self, fields, progress), fields(url = %path, destination = %destination.display()))]
    pub async fn download_by_post(
        &self,
        path: &str,
        fields: &IndexMap<String, String>,
        destination: &Path,
        progress: Option<&ProgressFn>,
    ) -> Result<PathBuf> {
        let url = self.resolve(path)?;
        let body = transport::encode_form_body(fields);
        let mut descriptor = RequestDescriptor::new(Method::POST, url);
        descriptor.body = Some(body.clone());
        descriptor.bond = self.bond().cloned();
        descriptor.no_cache = true;
        descriptor.skip_store = true;
        self.download(descriptor, Some(body), destination, progress)
            .await
    }

    async fn download(
        &self,
        descriptor: RequestDescriptor,
        body: Option<String>,
        destination: &Path,
        progress: Option<&ProgressFn>,
    ) -> Result<PathBuf> {
        let metadata = tokio::fs::metadata(destination)
            .await
            .map_err(|_| SigaaError::invalid_download_destination(destination))?;

        self.hooks().before_download(&descriptor, destination).await;

        let _permit = self.queue().acquire(&descriptor).await;

        let mut headers = transport::base_headers(descriptor.mobile);
        self.hooks().before_options(&descriptor, &mut headers).await;

        let mut request = self
            .client()
            .request(descriptor.method.clone(), descriptor.url.clone())
            .headers(headers);
        if let Some(body) = body {
            request = request
                .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(body);
        }

        let response = request
            .send()
            .await
            .map_err(|source| SigaaError::network(descriptor.url.as_str(), source))?;

        if let Some(host) = descriptor.url.host_str() {
            self.cookies().store_from_response(host, response.headers());
        }

        let status = response.status();
        if status.is_redirection() {
            // The portal bounces expired download links to an error page.
            return Err(SigaaError::download_expired(descriptor.url.as_str()));
        }
        if status.as_u16() != 200 {
            return Err(SigaaError::http_status(
                descriptor.url.as_str(),
                status.as_u16(),
            ));
        }

        let file_path = if metadata.is_dir() {
            let filename = response
                .headers()
                .get(CONTENT_DISPOSITION)
                .and_then(|value| value.to_str().ok())
                .and_then(parse_content_disposition)
                .map(|name| sanitize_filename(&name))
                .ok_or_else(|| SigaaError::missing_filename(descriptor.url.as_str()))?;
            destination.join(filename)
        } else {
            destination.to_path_buf()
        };
        debug!(path = %file_path.display(), "resolved download path");

        let temp_path = temp_path_for(&file_path);
        let mut file = File::create(&temp_path)
            .await
            .map_err(|source| SigaaError::io(temp_path.clone(), source))?;

        let streamed = stream_to_file(
            &mut file,
            response,
            descriptor.url.as_str(),
            &temp_path,
            progress,
        )
        .await;
        drop(file);

        let bytes_written = match streamed {
            Ok(bytes) => bytes,
            Err(error) => {
                let _ = tokio::fs::remove_file(&temp_path).await;
                return Err(error);
            }
        };

        if let Err(source) = tokio::fs::rename(&temp_path, &file_path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(SigaaError::io(file_path, source));
        }

        self.hooks().after_download(&descriptor, &file_path).await;
        info!(path = %file_path.display(), bytes = bytes_written, "download complete");
        Ok(file_path)
    }
}

/// Streams the response body to `file`, returning bytes written.
///
/// Extracted so the caller can clean up the partial file on error.
async fn stream_to_file(
    file: &mut File,
    response: reqwest::Response,
    url: &str,
    file_path: &Path,
    progress: Option<&ProgressFn>,
) -> Result<u64> {
    let mut writer = BufWriter::new(file);
    let mut stream = response.bytes_stream();
    let mut bytes_written: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|source| SigaaError::network(url, source))?;
        writer
            .write_all(&chunk)
            .await
            .map_err(|source| SigaaError::io(file_path.to_path_buf(), source))?;
        bytes_written += chunk.len() as u64;
        if let Some(progress) = progress {
            progress(bytes_written);
        }
    }

    writer
        .flush()
        .await
        .map_err(|source| SigaaError::io(file_path.to_path_buf(), source))?;

    Ok(bytes_written)
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".part");
    PathBuf::from(name)
}

/// Parses a `Content-Disposition` header into a filename.
///
/// Handles all three shapes the portal's stacks emit:
/// - `attachment; filename="example.pdf"`
/// - `attachment; filename=example.pdf`
/// - `attachment; filename*=UTF-8''example.pdf` (RFC 5987)
pub(crate) fn parse_content_disposition(header: &str) -> Option<String> {
    // filename*= first (RFC 5987 encoded)
    if let Some(pos) = header.find("filename*=") {
        let value = header[pos + 10..].trim();
        // Format: charset'language'encoded_value
        if let Some(quote_pos) = value.find("''") {
            let encoded = &value[quote_pos + 2..];
            let end = encoded.find(';').unwrap_or(encoded.len());
            let encoded_name = encoded[..end].trim();
            if let Ok(decoded) = urlencoding::decode(encoded_name) {
                return Some(decoded.into_owned());
            }
        }
    }

    if let Some(pos) = header.find("filename=") {
        let value = header[pos + 9..].trim();

        if let Some(stripped) = value.strip_prefix('"') {
            if let Some(end) = stripped.find('"') {
                return Some(stripped[..end].to_string());
            }
        } else {
            let end = value.find(';').unwrap_or(value.len());
            let filename = value[..end].trim();
            if !filename.is_empty() {
                return Some(filename.to_string());
            }
        }
    }

    None
}

/// Replaces characters invalid on common filesystems and rewrites dot
/// segments so a served filename can never escape the destination
/// directory.
pub(crate) fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    if sanitized.is_empty() {
        return "_".to_string();
    }

    if is_safe_filename_segment(&sanitized) {
        sanitized
    } else {
        sanitized
            .chars()
            .map(|c| if c == '.' { '_' } else { c })
            .collect()
    }
}

fn is_safe_filename_segment(name: &str) -> bool {
    !Path::new(name).components().any(|component| {
        matches!(
            component,
            Component::CurDir | Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::session::cache::PageCache;
    use crate::session::cookies::CookieStore;
    use crate::session::http::DEFAULT_MAX_REDIRECTS;
    use crate::session::queue::RequestQueue;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tempfile::TempDir;
    use url::Url;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn http_for(server_url: &str) -> SigaaHttp {
        SigaaHttp::new(
            transport::build_client(None),
            Url::parse(server_url).unwrap(),
            Arc::new(CookieStore::new()),
            Arc::new(PageCache::default()),
            Arc::new(RequestQueue::default()),
            DEFAULT_MAX_REDIRECTS,
        )
    }

    #[tokio::test]
    async fn downloads_into_a_directory_using_the_served_name() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/sigaa/verArquivo"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-disposition", "attachment; filename=\"notas.pdf\"")
                    .set_body_bytes(b"pdf bytes".to_vec()),
            )
            .expect(1)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let http = http_for(&server.uri());
        let written = http
            .download_by_get("/sigaa/verArquivo", dir.path(), None)
            .await
            .unwrap();

        assert_eq!(written, dir.path().join("notas.pdf"));
        assert_eq!(std::fs::read(&written).unwrap(), b"pdf bytes");
        assert!(!dir.path().join("notas.pdf.part").exists());
    }

    #[tokio::test]
    async fn overwrites_an_explicit_file_destination() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/sigaa/verArquivo"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"fresh".to_vec()))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let target = dir.path().join("saved.bin");
        std::fs::write(&target, b"stale").unwrap();

        let http = http_for(&server.uri());
        let written = http
            .download_by_get("/sigaa/verArquivo", &target, None)
            .await
            .unwrap();

        assert_eq!(written, target);
        assert_eq!(std::fs::read(&target).unwrap(), b"fresh");
    }

    #[tokio::test]
    async fn redirect_means_the_link_expired() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/sigaa/verArquivo"))
            .respond_with(
                ResponseTemplate::new(302).insert_header("location", "/sigaa/expirada.jsf"),
            )
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let http = http_for(&server.uri());
        let error = http
            .download_by_get("/sigaa/verArquivo", dir.path(), None)
            .await
            .unwrap_err();
        assert!(matches!(error, SigaaError::DownloadExpired { .. }));
        // Nothing was written, not even a temp file.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/sigaa/verArquivo"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let http = http_for(&server.uri());
        let error = http
            .download_by_get("/sigaa/verArquivo", dir.path(), None)
            .await
            .unwrap_err();
        assert!(matches!(error, SigaaError::HttpStatus { status: 500, .. }));
    }

    #[tokio::test]
    async fn missing_destination_fails_before_any_request() {
        let server = MockServer::start().await;
        // No mock mounted: reaching the network would 404 the test.
        let http = http_for(&server.uri());
        let error = http
            .download_by_get("/sigaa/verArquivo", Path::new("/nonexistent/dir"), None)
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            SigaaError::InvalidDownloadDestination { .. }
        ));
    }

    #[tokio::test]
    async fn directory_destination_requires_a_served_filename() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/sigaa/verArquivo"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"bytes".to_vec()))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let http = http_for(&server.uri());
        let error = http
            .download_by_get("/sigaa/verArquivo", dir.path(), None)
            .await
            .unwrap_err();
        assert!(matches!(error, SigaaError::MissingFilename { .. }));
    }

    #[tokio::test]
    async fn post_downloads_submit_the_form_fields() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sigaa/verArquivo"))
            .and(wiremock::matchers::body_string("id=42&key=abc"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-disposition", "attachment; filename=material.zip")
                    .set_body_bytes(b"zip".to_vec()),
            )
            .expect(1)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let http = http_for(&server.uri());
        let mut fields = IndexMap::new();
        fields.insert("id".to_string(), "42".to_string());
        fields.insert("key".to_string(), "abc".to_string());
        let written = http
            .download_by_post("/sigaa/verArquivo", &fields, dir.path(), None)
            .await
            .unwrap();
        assert_eq!(written, dir.path().join("material.zip"));
    }

    #[tokio::test]
    async fn progress_reports_a_running_byte_count() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/sigaa/verArquivo"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-disposition", "attachment; filename=big.bin")
                    .set_body_bytes(vec![0_u8; 4096]),
            )
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let http = http_for(&server.uri());
        let last_seen = Arc::new(AtomicU64::new(0));
        let progress = {
            let last_seen = Arc::clone(&last_seen);
            move |written: u64| {
                let previous = last_seen.swap(written, Ordering::SeqCst);
                assert!(written >= previous, "byte count must not go backwards");
            }
        };
        http.download_by_get("/sigaa/verArquivo", dir.path(), Some(&progress))
            .await
            .unwrap();
        assert_eq!(last_seen.load(Ordering::SeqCst), 4096);
    }

    #[test]
    fn content_disposition_quoted() {
        assert_eq!(
            parse_content_disposition(r#"attachment; filename="notas.pdf""#),
            Some("notas.pdf".to_string())
        );
    }

    #[test]
    fn content_disposition_unquoted_with_trailing_parameter() {
        assert_eq!(
            parse_content_disposition("attachment; filename=notas.pdf; size=1234"),
            Some("notas.pdf".to_string())
        );
    }

    #[test]
    fn content_disposition_rfc5987() {
        assert_eq!(
            parse_content_disposition("attachment; filename*=UTF-8''plano%20de%20curso.pdf"),
            Some("plano de curso.pdf".to_string())
        );
    }

    #[test]
    fn content_disposition_without_filename() {
        assert_eq!(parse_content_disposition("attachment"), None);
    }

    #[test]
    fn sanitize_rewrites_separators_and_dot_segments() {
        assert_eq!(sanitize_filename("a/b.pdf"), "a_b.pdf");
        assert_eq!(sanitize_filename("..\\..\\x"), ".._.._x");
        assert_eq!(sanitize_filename(".."), "__");
        assert_eq!(sanitize_filename("relatório final.pdf"), "relatório final.pdf");
    }
}
