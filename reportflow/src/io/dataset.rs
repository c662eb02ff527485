//! CSV dataset ingestion for the seed payload.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use csv::ReaderBuilder;
use tracing::{debug, instrument};

use crate::core::context::Dataset;

/// Load a header-row CSV file.
#[instrument(skip_all, fields(path = %path.display()))]
pub fn load_dataset(path: &Path) -> Result<Dataset> {
    let text = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    parse_dataset(&text).with_context(|| format!("parse {}", path.display()))
}

/// Parse CSV text. Short rows are padded with empty cells; surplus cells and
/// repeated column names are errors.
pub fn parse_dataset(text: &str) -> Result<Dataset> {
    let mut reader = ReaderBuilder::new()
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .context("read header row")?
        .iter()
        .map(|header| header.trim().to_string())
        .collect();
    if headers.is_empty() || headers.iter().all(String::is_empty) {
        return Err(anyhow!("dataset has no header row"));
    }
    let mut seen = BTreeSet::new();
    for header in &headers {
        if !seen.insert(header.as_str()) {
            return Err(anyhow!("duplicate column '{header}' in header row"));
        }
    }

    let mut rows = Vec::new();
    for (idx, result) in reader.records().enumerate() {
        let line = idx + 2;
        let record = result.with_context(|| format!("read row on line {line}"))?;
        if record.len() > headers.len() {
            return Err(anyhow!(
                "row on line {line} has {} cells but the header has {}",
                record.len(),
                headers.len()
            ));
        }
        let row: BTreeMap<String, String> = headers
            .iter()
            .enumerate()
            .map(|(i, header)| (header.clone(), record.get(i).unwrap_or_default().to_string()))
            .collect();
        rows.push(row);
    }

    debug!(columns = headers.len(), rows = rows.len(), "parsed dataset");
    Ok(Dataset {
        headers,
        rows,
        raw_text: text.to_string(),
    })
}
