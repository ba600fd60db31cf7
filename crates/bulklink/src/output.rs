use std::io::IsTerminal;
use std::time::{SystemTime, UNIX_EPOCH};

use bulklink_session::object::as_text;
use bulklink_session::Value;
use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// A command result: one JSON document, or labelled rows for humans.
pub trait Report: Serialize {
    fn rows(&self) -> Vec<(String, String)>;
}

pub fn print_report<R: Report>(report: &R, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(report).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["FIELD", "VALUE"]);
            for (field, value) in report.rows() {
                table.add_row(vec![field, value]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for (field, value) in report.rows() {
                println!("{field}: {value}");
            }
        }
    }
}

/// Convert a decoded object into JSON for display.
///
/// Byte strings that are valid UTF-8 become strings (devices often send
/// text that way); other byte strings become arrays of numbers. Non-text map
/// keys are rendered with their MessagePack display form.
pub fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Nil => serde_json::Value::Null,
        Value::Boolean(b) => serde_json::Value::Bool(*b),
        Value::Integer(i) => match (i.as_u64(), i.as_i64()) {
            (Some(u), _) => serde_json::Value::from(u),
            (None, Some(n)) => serde_json::Value::from(n),
            _ => serde_json::Value::Null,
        },
        Value::F32(f) => serde_json::Value::from(f64::from(*f)),
        Value::F64(f) => serde_json::Value::from(*f),
        Value::String(_) | Value::Binary(_) => match as_text(value) {
            Some(text) => serde_json::Value::String(text.to_string()),
            None => match value {
                Value::Binary(bytes) => {
                    serde_json::Value::Array(bytes.iter().map(|b| (*b).into()).collect())
                }
                _ => serde_json::Value::Null,
            },
        },
        Value::Array(items) => serde_json::Value::Array(items.iter().map(value_to_json).collect()),
        Value::Map(entries) => serde_json::Value::Object(
            entries
                .iter()
                .map(|(key, value)| {
                    let key = as_text(key)
                        .map(str::to_string)
                        .unwrap_or_else(|| key.to_string());
                    (key, value_to_json(value))
                })
                .collect(),
        ),
        Value::Ext(kind, data) => serde_json::json!({ "ext": kind, "data": data }),
    }
}

/// Render a JSON value on one line for table and pretty output.
pub fn compact(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

pub fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
