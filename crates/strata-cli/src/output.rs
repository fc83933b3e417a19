use std::collections::HashMap;

use colored::Colorize;
use serde_json::Value;
use tabled::builder::Builder;
use tabled::settings::Style;

use crate::cli::OutputFormat;

pub fn print_success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

pub fn print_missing(key: &str) {
    println!("{} {}", "∅".yellow(), format!("{key} not found").dimmed());
}

/// Render a stored value: pretty JSON when it parses as JSON, otherwise the raw text.
pub fn render_bytes(bytes: &[u8]) -> String {
    match serde_json::from_slice::<Value>(bytes) {
        Ok(value) => serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string()),
        Err(_) => String::from_utf8_lossy(bytes).into_owned(),
    }
}

pub fn print_hash(fields: &HashMap<String, String>, format: OutputFormat) {
    let mut sorted: Vec<(&String, &String)> = fields.iter().collect();
    sorted.sort();

    match format {
        OutputFormat::Json => {
            let object: serde_json::Map<String, Value> = sorted
                .into_iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect();
            let value = Value::Object(object);
            println!(
                "{}",
                serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string())
            );
        }
        OutputFormat::Table => {
            let mut builder = Builder::default();
            builder.push_record(["Field", "Value"]);
            for (field, value) in sorted {
                builder.push_record([field.as_str(), value.as_str()]);
            }
            let table = builder.build().with(Style::rounded()).to_string();
            println!("{table}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_json_is_pretty_printed() {
        let rendered = render_bytes(br#"{"id":1}"#);
        assert_eq!(rendered, "{\n  \"id\": 1\n}");
    }

    #[test]
    fn test_render_plain_text_verbatim() {
        assert_eq!(render_bytes(b"hello world"), "hello world");
    }
}
