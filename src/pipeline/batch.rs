//! Batch input: read the list of sources to process.
//!
//! A directory is walked recursively for `*.pdf` files, each becoming a
//! source named after its file stem. This is how a batch fetched with
//! `--download-only` is picked up again without downloading it twice.
//!
//! Files are recognised by extension:
//!
//! * spreadsheets (`.xlsx`, `.xlsm`, `.xls`, `.xlsb`, `.ods`): first sheet,
//!   header row, read with calamine
//! * `.csv`: header row, read with the csv crate
//! * anything else: a plain list, one URL or path per line, `#` comments
//!
//! Tabular inputs carry one row per vessel with a name column and a link
//! column. Rows with an empty name or a link that is not an HTTP(S) URL are
//! skipped with a warning; the rest of the batch is unaffected.

use crate::error::SurveyError;
use crate::pipeline::input::sanitize_identifier;
use calamine::{open_workbook_auto, Data, Reader};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// One document to process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    /// Explicit identifier (e.g. the vessel name). When `None`, the
    /// identifier is derived from `location`.
    pub id: Option<String>,
    /// HTTP(S) URL or local path.
    pub location: String,
}

impl Source {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            id: None,
            location: location.into(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// Column names used for spreadsheet and CSV inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceColumns {
    pub id_column: String,
    pub url_column: String,
}

impl Default for SourceColumns {
    fn default() -> Self {
        Self {
            id_column: "vesselName".to_string(),
            url_column: "linkForSyia".to_string(),
        }
    }
}

const SPREADSHEET_EXTENSIONS: &[&str] = &["xlsx", "xlsm", "xls", "xlsb", "ods"];

/// `true` when `path` has an extension handled as a batch file rather than a PDF.
pub fn is_batch_file(path: &str) -> bool {
    match extension(Path::new(path)) {
        Some(ext) => {
            SPREADSHEET_EXTENSIONS.contains(&ext.as_str()) || ext == "csv" || ext == "txt"
        }
        None => false,
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
}

/// Read every valid source listed in `path`, or found under it when `path`
/// is a directory.
pub fn read_sources(path: &Path, columns: &SourceColumns) -> Result<Vec<Source>, SurveyError> {
    if path.is_dir() {
        return pdfs_in_dir(path);
    }
    let sources = match extension(path).as_deref() {
        Some(ext) if SPREADSHEET_EXTENSIONS.contains(&ext) => {
            sources_from_rows(path, spreadsheet_rows(path)?, columns)?
        }
        Some("csv") => sources_from_rows(path, csv_rows(path)?, columns)?,
        _ => list_sources(path)?,
    };
    info!("{}: {} source(s)", path.display(), sources.len());
    Ok(sources)
}

fn batch_error(path: &Path, detail: impl Into<String>) -> SurveyError {
    SurveyError::BatchInput {
        path: path.to_path_buf(),
        detail: detail.into(),
    }
}

fn spreadsheet_rows(path: &Path) -> Result<Vec<Vec<String>>, SurveyError> {
    let mut workbook = open_workbook_auto(path).map_err(|e| batch_error(path, e.to_string()))?;
    let sheet = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| batch_error(path, "workbook has no sheets"))?;
    let range = workbook
        .worksheet_range(&sheet)
        .map_err(|e| batch_error(path, format!("sheet '{sheet}': {e}")))?;
    debug!("Reading sheet '{}' of {}", sheet, path.display());

    Ok(range
        .rows()
        .map(|row| row.iter().map(cell_text).collect())
        .collect())
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.trim().to_string(),
        other => other.to_string(),
    }
}

fn csv_rows(path: &Path) -> Result<Vec<Vec<String>>, SurveyError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .has_headers(false)
        .from_path(path)
        .map_err(|e| batch_error(path, e.to_string()))?;

    reader
        .records()
        .map(|record| {
            record
                .map(|r| r.iter().map(|f| f.trim().to_string()).collect())
                .map_err(|e| batch_error(path, e.to_string()))
        })
        .collect()
}

/// Turn header + data rows into sources, skipping invalid rows.
fn sources_from_rows(
    path: &Path,
    rows: Vec<Vec<String>>,
    columns: &SourceColumns,
) -> Result<Vec<Source>, SurveyError> {
    let mut rows = rows
        .into_iter()
        .enumerate()
        .filter(|(_, row)| row.iter().any(|c| !c.is_empty()));

    let (_, header) = rows
        .next()
        .ok_or_else(|| batch_error(path, "no header row"))?;
    let column = |name: &str| {
        header
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| batch_error(path, format!("missing column '{name}'")))
    };
    let id_col = column(&columns.id_column)?;
    let url_col = column(&columns.url_column)?;

    let mut sources = Vec::new();
    for (idx, row) in rows {
        // 1-based, as shown by spreadsheet applications
        let line = idx + 1;
        let id = row.get(id_col).map(String::as_str).unwrap_or("");
        let url = row.get(url_col).map(String::as_str).unwrap_or("");

        if id.is_empty() {
            warn!("Skipping row {}: empty {}", line, columns.id_column);
            continue;
        }
        if !url.starts_with("http") {
            warn!("Skipping row {}: invalid or empty URL for '{}'", line, id);
            continue;
        }
        sources.push(Source::new(url).with_id(id));
    }
    Ok(sources)
}

fn list_sources(path: &Path) -> Result<Vec<Source>, SurveyError> {
    let raw = std::fs::read_to_string(path).map_err(|e| batch_error(path, e.to_string()))?;
    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(Source::new)
        .collect())
}

/// Every `*.pdf` under `dir` (any depth, extension case ignored), sorted by
/// path. Ids come from file stems; a stem already taken by an earlier file
/// would overwrite its images and JSON, so that file is skipped.
pub fn pdfs_in_dir(dir: &Path) -> Result<Vec<Source>, SurveyError> {
    let pattern = format!("{}/**/*.pdf", glob::Pattern::escape(&dir.to_string_lossy()));
    let options = glob::MatchOptions {
        case_sensitive: false,
        ..Default::default()
    };
    let entries =
        glob::glob_with(&pattern, options).map_err(|e| batch_error(dir, e.to_string()))?;

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| match entry {
            Ok(path) => Some(path),
            Err(e) => {
                warn!("Skipping unreadable entry under {}: {}", dir.display(), e);
                None
            }
        })
        .filter(|p| p.is_file())
        .collect();
    paths.sort();

    let mut seen = HashSet::new();
    let mut sources = Vec::with_capacity(paths.len());
    for path in paths {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let id = sanitize_identifier(&stem).unwrap_or_else(|| "document".to_string());
        if !seen.insert(id.clone()) {
            warn!("Skipping {}: id '{}' already used", path.display(), id);
            continue;
        }
        sources.push(Source::new(path.to_string_lossy()).with_id(id));
    }

    info!("{}: {} PDF(s)", dir.display(), sources.len());
    Ok(sources)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &tempfile::TempDir, name: &str, body: &str) -> std::path::PathBuf {
        let p = dir.path().join(name);
        std::fs::write(&p, body).unwrap();
        p
    }

    #[test]
    fn csv_rows_are_validated() {
        let dir = tempfile::tempdir().unwrap();
        let p = write(
            &dir,
            "NK.csv",
            "imo,vesselName,linkForSyia\n\
             1,LEADER 1,https://s3.example.com/LEADER1.pdf?sig=1\n\
             2,,https://s3.example.com/blank.pdf\n\
             3,SEA QUEEN,not-a-url\n\
             ,,\n\
             4,OCEAN STAR,http://example.com/os.pdf\n",
        );

        let sources = read_sources(&p, &SourceColumns::default()).unwrap();
        assert_eq!(
            sources,
            vec![
                Source::new("https://s3.example.com/LEADER1.pdf?sig=1").with_id("LEADER 1"),
                Source::new("http://example.com/os.pdf").with_id("OCEAN STAR"),
            ]
        );
    }

    #[test]
    fn custom_columns() {
        let dir = tempfile::tempdir().unwrap();
        let p = write(&dir, "list.csv", "ship,url\nA,https://x/a.pdf\n");
        let columns = SourceColumns {
            id_column: "ship".into(),
            url_column: "url".into(),
        };
        let sources = read_sources(&p, &columns).unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].id.as_deref(), Some("A"));
    }

    #[test]
    fn missing_column_is_batch_error() {
        let dir = tempfile::tempdir().unwrap();
        let p = write(&dir, "bad.csv", "name,link\nA,https://x/a.pdf\n");
        let err = read_sources(&p, &SourceColumns::default()).unwrap_err();
        assert!(err.to_string().contains("missing column 'vesselName'"), "got: {err}");
        assert_eq!(err.kind(), crate::ErrorKind::Acquisition);
    }

    #[test]
    fn plain_list_skips_comments() {
        let dir = tempfile::tempdir().unwrap();
        let p = write(
            &dir,
            "urls.txt",
            "# batch of 2025-03\nhttps://x/a.pdf\n\n  /data/b.pdf  \n",
        );
        let sources = read_sources(&p, &SourceColumns::default()).unwrap();
        assert_eq!(
            sources,
            vec![Source::new("https://x/a.pdf"), Source::new("/data/b.pdf")]
        );
    }

    #[test]
    fn unreadable_spreadsheet_is_batch_error() {
        let dir = tempfile::tempdir().unwrap();
        let p = write(&dir, "NK.xlsx", "this is not a zip archive");
        let err = read_sources(&p, &SourceColumns::default()).unwrap_err();
        assert!(matches!(err, SurveyError::BatchInput { .. }));
    }

    #[test]
    fn batch_file_detection() {
        assert!(is_batch_file("NK.xlsx"));
        assert!(is_batch_file("list.CSV"));
        assert!(is_batch_file("urls.txt"));
        assert!(!is_batch_file("report.pdf"));
        assert!(!is_batch_file("https://example.com/report"));
    }

    #[test]
    fn directory_is_walked_for_pdfs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("2025/march")).unwrap();
        write(&dir, "LEADER-1.pdf", "%PDF-1.7");
        write(&dir, "2025/march/SEA QUEEN.PDF", "%PDF-1.7");
        write(&dir, "2025/notes.txt", "not a report");
        write(&dir, "OCEAN-STAR.pdf.part", "%PD");

        let sources = read_sources(dir.path(), &SourceColumns::default()).unwrap();
        let ids: Vec<&str> = sources.iter().filter_map(|s| s.id.as_deref()).collect();
        assert_eq!(ids, vec!["SEA-QUEEN", "LEADER-1"]);
        assert!(sources[1].location.ends_with("LEADER-1.pdf"));
    }

    #[test]
    fn duplicate_stems_keep_the_first() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("b")).unwrap();
        write(&dir, "a.pdf", "%PDF-1.7");
        write(&dir, "b/a.pdf", "%PDF-1.7");

        let sources = pdfs_in_dir(dir.path()).unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].location, dir.path().join("a.pdf").to_string_lossy());
    }

    #[test]
    fn empty_directory_has_no_sources() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_sources(dir.path(), &SourceColumns::default())
            .unwrap()
            .is_empty());
    }
}
