//! Versioned JSON envelopes for exporting states to files and importing them back.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::info;

use crate::core::CalculatorKind;
use crate::error::TransferError;
use crate::store::CalculatorState;

pub const ENVELOPE_VERSION: &str = "1.0";

/// Wrapper written around exported data. Only ever exists in transit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportableData<T = Value> {
    pub version: String,
    /// RFC 3339 / ISO-8601 instant of the export.
    pub timestamp: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub data: T,
}

/// A serialized export ready to hand to whatever saves it.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportedFile {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Destination for exported files (a download, a directory, ...).
pub trait ExportSink {
    fn deliver(&self, file: &ExportedFile) -> Result<PathBuf, TransferError>;
}

/// Writes exports into a directory on disk.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl ExportSink for DirectorySink {
    fn deliver(&self, file: &ExportedFile) -> Result<PathBuf, TransferError> {
        fs::create_dir_all(&self.dir)?;
        let file_name = Path::new(&file.filename)
            .file_name()
            .map(|name| name.to_owned())
            .ok_or_else(|| TransferError::Format(format!("bad file name `{}`", file.filename)))?;
        let path = self.dir.join(file_name);
        fs::write(&path, &file.bytes)?;
        info!(path = %path.display(), bytes = file.bytes.len(), "wrote export");
        Ok(path)
    }
}

/// Wraps `data` in a version 1.0 envelope tagged with `kind`.
pub fn export_data<T: Serialize>(
    data: &T,
    kind: &str,
    filename: &str,
) -> Result<ExportedFile, TransferError> {
    let envelope = ImportableData {
        version: ENVELOPE_VERSION.to_string(),
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        kind: kind.to_string(),
        data,
    };
    Ok(ExportedFile {
        filename: normalize_filename(filename),
        bytes: serde_json::to_vec_pretty(&envelope)?,
    })
}

/// Exports and delivers in one step.
pub fn export_to<T: Serialize, S: ExportSink + ?Sized>(
    sink: &S,
    data: &T,
    kind: &str,
    filename: &str,
) -> Result<PathBuf, TransferError> {
    sink.deliver(&export_data(data, kind, filename)?)
}

/// Exports a stored record's payload, tagged with its calculator type.
pub fn export_state<T: Serialize>(state: &CalculatorState<T>) -> Result<ExportedFile, TransferError> {
    export_data(&state.data, &state.calculator_type, &default_filename(state))
}

/// `<name>-<yyyy-mm-dd>` from the record's own timestamp.
pub fn default_filename<T>(state: &CalculatorState<T>) -> String {
    let date = chrono::DateTime::from_timestamp_millis(state.timestamp)
        .unwrap_or_default()
        .format("%Y-%m-%d");
    let stem: String = state
        .name
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-");
    if stem.is_empty() {
        format!("{}-{date}", state.calculator_type)
    } else {
        format!("{stem}-{date}")
    }
}

/// Reads a whole envelope from `reader` and returns its payload.
pub async fn import_data<R: AsyncRead + Unpin>(
    mut reader: R,
    expected_kind: &str,
) -> Result<Value, TransferError> {
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes).await?;
    parse_envelope(&bytes, expected_kind).map(|envelope| envelope.data)
}

/// Like [`import_data`], then applies `T`'s schema to the payload.
pub async fn import_typed<T: CalculatorKind, R: AsyncRead + Unpin>(
    reader: R,
) -> Result<T, TransferError> {
    let data = import_data(reader, T::CALCULATOR_TYPE).await?;
    serde_json::from_value(data).map_err(|e| {
        TransferError::Format(format!(
            "payload does not match `{}`: {e}",
            T::CALCULATOR_TYPE
        ))
    })
}

/// Validates envelope structure and type tag. The payload itself is not inspected.
pub fn parse_envelope(bytes: &[u8], expected_kind: &str) -> Result<ImportableData, TransferError> {
    let value: Value = serde_json::from_slice(bytes)
        .map_err(|e| TransferError::Format(format!("not valid JSON: {e}")))?;
    let Value::Object(mut object) = value else {
        return Err(TransferError::Format("expected a JSON object".to_string()));
    };

    let mut string_field = |field: &str| match object.remove(field) {
        Some(Value::String(s)) => Ok(s),
        Some(_) => Err(TransferError::Format(format!("`{field}` must be a string"))),
        None => Err(TransferError::Format(format!("missing `{field}`"))),
    };
    let version = string_field("version")?;
    let timestamp = string_field("timestamp")?;
    let kind = string_field("type")?;
    let data = object
        .remove("data")
        .ok_or_else(|| TransferError::Format("missing `data`".to_string()))?;

    if kind != expected_kind {
        return Err(TransferError::TypeMismatch {
            expected: expected_kind.to_string(),
            actual: kind,
        });
    }

    Ok(ImportableData {
        version,
        timestamp,
        kind,
        data,
    })
}

/// Appends `.json` unless already present; empty names become `export.json`.
pub fn normalize_filename(filename: &str) -> String {
    let trimmed = filename.trim();
    if trimmed.is_empty() {
        return "export.json".to_string();
    }
    if trimmed.to_ascii_lowercase().ends_with(".json") {
        trimmed.to_string()
    } else {
        format!("{trimmed}.json")
    }
}
