//! Reading heudiconv `dicominfo.tsv` tables.

use super::SeriesInfo;
use crate::error::{Error, Result};
use serde::Deserialize;
use std::fs::File;
use std::io::Read;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct DicomInfoRow {
    series_id: String,
    #[serde(default)]
    series_description: String,
    #[serde(default)]
    protocol_name: String,
    #[serde(default)]
    image_type: String,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    dim4: Option<i64>,
}

/// Split an image type cell into its elements.
///
/// Accepts the tuple text heudiconv writes (`('ORIGINAL', 'PRIMARY', 'M')`)
/// as well as DICOM backslash lists (`ORIGINAL\PRIMARY\M`) and plain comma
/// lists.
pub fn parse_image_type(text: &str) -> Vec<String> {
    let inner = text
        .trim()
        .trim_start_matches(['(', '['])
        .trim_end_matches([')', ']']);
    inner
        .split([',', '\\'])
        .map(|part| part.trim().trim_matches(['\'', '"']).trim())
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse a tab separated table with a header row.
pub fn parse_dicominfo<R: Read>(reader: R) -> Result<Vec<SeriesInfo>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut series = Vec::new();
    for row in reader.deserialize() {
        let row: DicomInfoRow = row?;
        if row.series_id.is_empty() {
            return Err(Error::InvalidFileFormat(format!(
                "dicominfo row {} has no series_id",
                series.len() + 1
            )));
        }
        series.push(SeriesInfo {
            series_id: row.series_id,
            series_description: row.series_description,
            protocol_name: row.protocol_name,
            image_type: parse_image_type(&row.image_type),
            dim4: row.dim4.unwrap_or(0),
        });
    }
    Ok(series)
}

/// Read a `dicominfo.tsv` file.
pub fn read_dicominfo(path: impl AsRef<Path>) -> Result<Vec<SeriesInfo>> {
    let path = path.as_ref();
    File::open(path)
        .map_err(Error::from)
        .and_then(parse_dicominfo)
        .map_err(|e| e.at(path))
}
