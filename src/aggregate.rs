//! Aggregation: collect per-page records and persist them as one JSON array.
//!
//! The file is written to a temp file in the target directory and persisted
//! over the destination, so readers never see a partial file and an aborted
//! document leaves any previous output intact.

use crate::config::ExtractionConfig;
use crate::error::SurveyError;
use crate::output::{AggregatedResult, ExtractedRecord};
use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

/// Order `(page_num, record)` pairs by page and collect them.
pub fn aggregate(mut records: Vec<(usize, ExtractedRecord)>) -> AggregatedResult {
    records.sort_by_key(|(page, _)| *page);
    AggregatedResult::new(records.into_iter().map(|(_, r)| r).collect())
}

/// `<output_dir>/<document id>.json`
pub fn output_path_for(config: &ExtractionConfig, id: &str) -> PathBuf {
    config.output_dir.join(format!("{id}.json"))
}

/// Serialise `result` with 4-space indentation.
pub fn to_pretty_json(result: &AggregatedResult) -> Result<Vec<u8>, serde_json::Error> {
    let mut buf = Vec::new();
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(b"    "));
    result.serialize(&mut ser)?;
    buf.push(b'\n');
    Ok(buf)
}

/// Write `result` to `path`, replacing any existing file.
pub async fn write_result(result: &AggregatedResult, path: &Path) -> Result<(), SurveyError> {
    let write_err = |source: std::io::Error| SurveyError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    let body = to_pretty_json(result)
        .map_err(|e| write_err(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;

    let dest = path.to_path_buf();
    tokio::task::spawn_blocking(move || persist_atomically(&dest, &body))
        .await
        .map_err(|e| SurveyError::Internal(format!("Output write task panicked: {}", e)))?
        .map_err(write_err)?;

    info!("Wrote {} record(s) to {}", result.len(), path.display());
    Ok(())
}

fn persist_atomically(path: &Path, body: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".survey-")
        .suffix(".json.tmp")
        .tempfile_in(dir)?;
    tmp.write_all(body)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn record(code: &str) -> ExtractedRecord {
        match json!({ "machinery_systems": [{ "system_applied": "Main Diesel Engine",
            "survey_items": [{ "code": code }] }] })
        {
            Value::Object(m) => m,
            _ => unreachable!(),
        }
    }

    #[test]
    fn aggregate_orders_by_page() {
        let agg = aggregate(vec![(7, record("b")), (3, record("a"))]);
        assert_eq!(agg.len(), 2);
        assert_eq!(
            agg.records()[0]["machinery_systems"][0]["survey_items"][0]["code"],
            json!("a")
        );
    }

    #[test]
    fn four_space_indent() {
        let body = to_pretty_json(&aggregate(vec![(1, record("311001"))])).unwrap();
        let text = String::from_utf8(body).unwrap();
        assert!(text.starts_with("[\n    {\n        \"machinery_systems\""), "got:\n{text}");
        assert!(text.ends_with("]\n"));
    }

    #[test]
    fn empty_is_bracket_pair() {
        let body = to_pretty_json(&AggregatedResult::default()).unwrap();
        assert_eq!(body, b"[]\n");
    }

    #[tokio::test]
    async fn write_replaces_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("LEADER-1.json");

        write_result(&aggregate(vec![(1, record("a")), (2, record("b"))]), &path)
            .await
            .unwrap();
        write_result(&aggregate(vec![(1, record("c"))]), &path).await.unwrap();

        let parsed: Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(parsed.as_array().unwrap().len(), 1);
        let entries = std::fs::read_dir(path.parent().unwrap()).unwrap().count();
        assert_eq!(entries, 1, "temp file left behind");
    }
}
