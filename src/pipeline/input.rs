//! Input resolution: turn a URL or path into a local PDF and an identifier.
//!
//! URLs are downloaded into the configured download directory under a
//! deterministic name (`<id>.pdf`), so re-running a batch overwrites the same
//! files instead of accumulating copies. The download is streamed into a
//! `.part` file and renamed only after the PDF magic bytes (`%PDF`) have been
//! checked, so a failed or HTML-error download never leaves a file behind
//! that looks like a PDF.

use crate::error::SurveyError;
use crate::pipeline::batch::Source;
use once_cell::sync::Lazy;
use regex::Regex;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// A source resolved to a readable local PDF.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acquired {
    /// Filesystem-safe document identifier.
    pub id: String,
    pub path: PathBuf,
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

static RE_UNSAFE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\s-]").unwrap());
static RE_SEPARATORS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[-\s]+").unwrap());

/// Reduce a name to letters, digits, `_` and single hyphens.
///
/// "LEADER 1 (Ex-Star)" → "LEADER-1-Ex-Star". Returns `None` when nothing
/// usable is left.
pub fn sanitize_identifier(name: &str) -> Option<String> {
    let kept = RE_UNSAFE.replace_all(name, "");
    let joined = RE_SEPARATORS.replace_all(kept.trim(), "-");
    let id = joined.trim_matches('-').to_string();
    (!id.is_empty()).then_some(id)
}

/// Identifier derived from a URL or path: the file name without query
/// string, fragment, or `.pdf` extension, sanitised.
pub fn document_id_from_source(source: &str) -> String {
    let name = if is_url(source) {
        let without_query = source.split(['?', '#']).next().unwrap_or(source);
        let last = without_query.rsplit('/').next().unwrap_or(without_query);
        last.replace("%20", " ").replace('+', " ")
    } else {
        Path::new(source)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    };
    let stem = match name.rsplit_once('.') {
        Some((stem, ext)) if ext.eq_ignore_ascii_case("pdf") => stem.to_string(),
        _ => name,
    };
    sanitize_identifier(&stem).unwrap_or_else(|| "document".to_string())
}

/// Identifier of `source`: its explicit id when that survives sanitising,
/// otherwise one derived from the location.
pub fn document_id(source: &Source) -> String {
    match source.id.as_deref().and_then(sanitize_identifier) {
        Some(id) => id,
        None => document_id_from_source(&source.location),
    }
}

/// Resolve `source` to a local PDF, downloading URLs into `download_dir`.
///
/// Locations with a scheme other than http(s) (`ftp://`, `s3://`, ...) are
/// rejected with [`SurveyError::InvalidInput`] before touching the filesystem.
pub async fn acquire(
    source: &Source,
    download_dir: &Path,
    timeout_secs: u64,
) -> Result<Acquired, SurveyError> {
    let id = document_id(source);

    if !is_url(&source.location) && source.location.contains("://") {
        return Err(SurveyError::InvalidInput {
            input: source.location.clone(),
        });
    }

    let path = if is_url(&source.location) {
        let dest = download_dir.join(format!("{id}.pdf"));
        download_to(&source.location, &dest, timeout_secs).await?;
        dest
    } else {
        resolve_local(&source.location)?
    };

    Ok(Acquired { id, path })
}

/// Validate a local file path: it must exist, be readable, and start with `%PDF`.
pub fn resolve_local(path_str: &str) -> Result<PathBuf, SurveyError> {
    let path = PathBuf::from(path_str);

    if !path.exists() {
        return Err(SurveyError::FileNotFound { path });
    }

    match std::fs::File::open(&path) {
        Ok(mut f) => {
            let mut magic = [0u8; 4];
            if f.read_exact(&mut magic).is_err() || &magic != b"%PDF" {
                return Err(SurveyError::NotAPdf { path, magic });
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(SurveyError::PermissionDenied { path });
        }
        Err(_) => {
            return Err(SurveyError::FileNotFound { path });
        }
    }

    debug!("Resolved local PDF: {}", path.display());
    Ok(path)
}

/// Download `url` to `dest`, replacing any existing file.
pub async fn download_to(url: &str, dest: &Path, timeout_secs: u64) -> Result<(), SurveyError> {
    info!("Downloading PDF from: {}", url);

    let failed = |reason: String| SurveyError::DownloadFailed {
        url: url.to_string(),
        reason,
    };
    let from_reqwest = |e: reqwest::Error| {
        if e.is_timeout() {
            SurveyError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            SurveyError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    };

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| failed(e.to_string()))?;

    let mut response = client.get(url).send().await.map_err(from_reqwest)?;
    if !response.status().is_success() {
        return Err(failed(format!("HTTP {}", response.status())));
    }

    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| failed(format!("cannot create {}: {e}", parent.display())))?;
    }

    let part = dest.with_extension("pdf.part");
    let mut file = tokio::fs::File::create(&part)
        .await
        .map_err(|e| failed(format!("cannot create {}: {e}", part.display())))?;

    let mut head = Vec::with_capacity(4);
    let mut written = 0usize;
    let streamed: Result<(), SurveyError> = async {
        while let Some(chunk) = response.chunk().await.map_err(from_reqwest)? {
            if head.len() < 4 {
                let need = 4 - head.len();
                head.extend_from_slice(&chunk[..need.min(chunk.len())]);
            }
            file.write_all(&chunk)
                .await
                .map_err(|e| failed(format!("write failed: {e}")))?;
            written += chunk.len();
        }
        file.flush()
            .await
            .map_err(|e| failed(format!("write failed: {e}")))
    }
    .await;
    drop(file);

    if let Err(e) = streamed {
        discard(&part).await;
        return Err(e);
    }

    if head.as_slice() != b"%PDF" {
        discard(&part).await;
        let mut magic = [0u8; 4];
        magic[..head.len()].copy_from_slice(&head);
        return Err(SurveyError::NotAPdf {
            path: dest.to_path_buf(),
            magic,
        });
    }

    tokio::fs::rename(&part, dest)
        .await
        .map_err(|e| failed(format!("cannot move download into place: {e}")))?;

    info!("Downloaded {} bytes to: {}", written, dest.display());
    Ok(())
}

async fn discard(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        warn!("Could not remove partial download {}: {}", path.display(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/doc.pdf"));
        assert!(is_url("http://example.com/doc.pdf"));
        assert!(!is_url("/tmp/doc.pdf"));
        assert!(!is_url("doc.pdf"));
        assert!(!is_url(""));
    }

    #[test]
    fn sanitize_matches_vessel_names() {
        assert_eq!(sanitize_identifier("LEADER 1").as_deref(), Some("LEADER-1"));
        assert_eq!(
            sanitize_identifier("  OCEAN  STAR (Ex-Sun) ").as_deref(),
            Some("OCEAN-STAR-Ex-Sun")
        );
        assert_eq!(sanitize_identifier("a--b__c").as_deref(), Some("a-b__c"));
        assert_eq!(sanitize_identifier("?!"), None);
        assert_eq!(sanitize_identifier("   "), None);
    }

    #[test]
    fn id_from_url_drops_query_and_extension() {
        assert_eq!(
            document_id_from_source("https://bucket.s3.amazonaws.com/reports/LEADER+1.pdf?X-Amz-Signature=abc"),
            "LEADER-1"
        );
        assert_eq!(
            document_id_from_source("https://example.com/a/Survey%20Status.PDF#page=2"),
            "Survey-Status"
        );
        assert_eq!(document_id_from_source("https://example.com/"), "document");
    }

    #[test]
    fn id_from_local_path() {
        assert_eq!(document_id_from_source("/data/pdfs/NK-4521.pdf"), "NK-4521");
        assert_eq!(document_id_from_source("report.v2.pdf"), "reportv2");
    }

    #[test]
    fn local_file_checks() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("ok.pdf");
        std::fs::write(&good, b"%PDF-1.4\n").unwrap();
        let bad = dir.path().join("page.html");
        std::fs::write(&bad, b"<html></html>").unwrap();
        let short = dir.path().join("short.pdf");
        std::fs::write(&short, b"%P").unwrap();

        assert_eq!(resolve_local(good.to_str().unwrap()).unwrap(), good);
        assert!(matches!(
            resolve_local(bad.to_str().unwrap()),
            Err(SurveyError::NotAPdf { magic, .. }) if &magic == b"<htm"
        ));
        assert!(matches!(
            resolve_local(short.to_str().unwrap()),
            Err(SurveyError::NotAPdf { .. })
        ));
        assert!(matches!(
            resolve_local(dir.path().join("missing.pdf").to_str().unwrap()),
            Err(SurveyError::FileNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn acquire_prefers_explicit_id_for_local_files() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = dir.path().join("x.pdf");
        std::fs::write(&pdf, b"%PDF-1.7").unwrap();

        let source = Source {
            id: Some("SEA QUEEN".into()),
            location: pdf.to_string_lossy().into_owned(),
        };
        let acquired = acquire(&source, dir.path(), 5).await.unwrap();
        assert_eq!(acquired.id, "SEA-QUEEN");
        assert_eq!(acquired.path, pdf);

        let source = Source {
            id: None,
            location: pdf.to_string_lossy().into_owned(),
        };
        assert_eq!(acquire(&source, dir.path(), 5).await.unwrap().id, "x");
    }

    #[tokio::test]
    async fn unsupported_scheme_is_invalid_input() {
        let dir = tempfile::tempdir().unwrap();
        for location in ["ftp://example.com/LEADER-1.pdf", "s3://bucket/LEADER-1.pdf"] {
            let err = acquire(&Source::new(location), dir.path(), 5)
                .await
                .unwrap_err();
            assert!(
                matches!(err, SurveyError::InvalidInput { ref input } if input == location),
                "got: {err:?}"
            );
            assert_eq!(err.kind(), crate::error::ErrorKind::Acquisition);
        }
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
