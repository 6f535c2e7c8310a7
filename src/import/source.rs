use std::path::Path;

use serde_json::Value;
use tokio::fs;

use super::{ImportError, ImportRow};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Csv,
    Json,
}

impl FileFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => FileFormat::Json,
            _ => FileFormat::Csv,
        }
    }
}

pub async fn read_rows(path: &Path) -> Result<Vec<ImportRow>, ImportError> {
    let content = fs::read_to_string(path)
        .await
        .map_err(|source| ImportError::Read {
            path: path.display().to_string(),
            source,
        })?;
    parse_rows(&content, FileFormat::from_path(path))
}

pub fn parse_rows(content: &str, format: FileFormat) -> Result<Vec<ImportRow>, ImportError> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    match format {
        FileFormat::Csv => parse_csv(content),
        FileFormat::Json => parse_json(content),
    }
}

fn parse_csv(content: &str) -> Result<Vec<ImportRow>, ImportError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(content.as_bytes());

    let headers: Vec<String> = reader.headers()?.iter().map(String::from).collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        if record.iter().all(str::is_empty) {
            continue;
        }

        let fields = headers
            .iter()
            .zip(record.iter())
            .map(|(name, value)| (name.clone(), value.to_string()))
            .collect();
        rows.push(ImportRow::new(rows.len() + 1, fields));
    }
    Ok(rows)
}

fn parse_json(content: &str) -> Result<Vec<ImportRow>, ImportError> {
    let document: Value =
        serde_json::from_str(content).map_err(|e| ImportError::InvalidJson(e.to_string()))?;

    let Value::Array(items) = document else {
        return Err(ImportError::InvalidJson(
            "expected an array of objects".to_string(),
        ));
    };

    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| {
            let index = i + 1;
            let Value::Object(object) = item else {
                return Err(ImportError::InvalidJson(format!(
                    "element {index} is not an object"
                )));
            };

            let fields = object
                .into_iter()
                .map(|(name, value)| {
                    let text = match value {
                        Value::String(s) => s,
                        Value::Null => String::new(),
                        Value::Bool(b) => b.to_string(),
                        Value::Number(n) => n.to_string(),
                        Value::Array(_) | Value::Object(_) => {
                            return Err(ImportError::InvalidJson(format!(
                                "element {index} has a nested value in \"{name}\""
                            )))
                        }
                    };
                    Ok((name, text))
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(ImportRow::new(index, fields))
        })
        .collect()
}
