use std::path::Path;

use anyhow::{bail, Context};
use serde_json::{Map, Number, Value};
use tracing::{debug, warn};

use crate::record::{self, Record};

/// The four record collections the aggregator consumes.
#[derive(Debug, Clone, Default)]
pub struct ReviewInputs {
    pub messages: Vec<Record>,
    pub observations: Vec<Record>,
    pub criteria: Vec<Record>,
    pub users: Vec<Record>,
}

impl ReviewInputs {
    pub fn from_files(
        messages: &Path,
        observations: &Path,
        criteria: &Path,
        users: Option<&Path>,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            messages: load_records(messages)?,
            observations: load_records(observations)?,
            criteria: load_records(criteria)?,
            users: match users {
                Some(path) => load_records(path)?,
                None => Vec::new(),
            },
        })
    }

    /// Drops messages whose `field` does not display as `channel`. Numeric
    /// ids match their decimal text, so `--channel 7` selects `7` and `"7"`.
    pub fn retain_channel(&mut self, field: &str, channel: &str) {
        let before = self.messages.len();
        self.messages
            .retain(|message| record::text(message.get(field)).as_deref() == Some(channel));
        debug!(
            channel,
            kept = self.messages.len(),
            dropped = before - self.messages.len(),
            "filtered messages by channel"
        );
    }
}

/// Loads records from a `.json` or `.csv` file.
pub fn load_records(path: &Path) -> anyhow::Result<Vec<Record>> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());

    let records = match extension.as_deref() {
        Some("json") => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let value: Value = serde_json::from_str(&content)
                .with_context(|| format!("invalid JSON in {}", path.display()))?;
            records_from_json(value)
                .with_context(|| format!("unexpected JSON layout in {}", path.display()))?
        }
        Some("csv") => {
            let reader = csv::Reader::from_path(path)
                .with_context(|| format!("failed to open {}", path.display()))?;
            records_from_csv(reader)
                .with_context(|| format!("invalid CSV in {}", path.display()))?
        }
        _ => bail!(
            "unsupported record file {} (expected .json or .csv)",
            path.display()
        ),
    };

    debug!(path = %path.display(), records = records.len(), "loaded records");
    Ok(records)
}

/// Accepts a bare array of objects or an object wrapping one array, e.g. `{"messages": [...]}`.
pub fn records_from_json(value: Value) -> anyhow::Result<Vec<Record>> {
    let items = match value {
        Value::Array(items) => items,
        Value::Object(object) if object.len() == 1 => {
            let (key, inner) = object.into_iter().next().context("empty object")?;
            match inner {
                Value::Array(items) => items,
                _ => bail!("field `{key}` is not an array"),
            }
        }
        _ => bail!("expected an array of objects"),
    };

    let mut records = Vec::with_capacity(items.len());
    for (position, item) in items.into_iter().enumerate() {
        match item {
            Value::Object(record) => records.push(record),
            other => warn!(position, value = %other, "skipping non-object record"),
        }
    }
    Ok(records)
}

pub fn records_from_csv<R: std::io::Read>(mut reader: csv::Reader<R>) -> anyhow::Result<Vec<Record>> {
    let headers = reader.headers()?.clone();
    let mut records = Vec::new();

    for row in reader.records() {
        let row = row?;
        let mut record = Map::new();
        for (header, cell) in headers.iter().zip(row.iter()) {
            record.insert(header.trim().to_string(), infer_cell(cell));
        }
        records.push(record);
    }

    Ok(records)
}

/// Types a CSV cell: empty is null, then bool, integer, float, and finally text.
pub fn infer_cell(cell: &str) -> Value {
    let trimmed = cell.trim();
    if trimmed.is_empty() {
        return Value::Null;
    }
    match trimmed {
        "true" | "TRUE" | "True" => return Value::Bool(true),
        "false" | "FALSE" | "False" => return Value::Bool(false),
        _ => {}
    }
    if let Ok(integer) = trimmed.parse::<i64>() {
        return Value::Number(integer.into());
    }
    if let Some(number) = trimmed.parse::<f64>().ok().and_then(Number::from_f64) {
        return Value::Number(number);
    }
    Value::String(cell.to_string())
}
