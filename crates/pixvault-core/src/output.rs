//! JSON and JSON Lines encoding.
//!
//! Used for CLI output of job snapshots and for the disk store's
//! append-only logs.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{self, Write};

/// Output format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Single JSON object or array
    Json,
    /// One JSON object per line (newline-delimited JSON)
    JsonLines,
}

impl OutputFormat {
    /// Parse format from string (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "json" => Some(Self::Json),
            "jsonl" | "jsonlines" | "ndjson" => Some(Self::JsonLines),
            _ => None,
        }
    }
}

/// A writer that serializes items to JSON or JSONL format.
pub struct OutputWriter<W: Write> {
    writer: W,
    format: OutputFormat,
    pretty: bool,
    items_written: usize,
}

impl<W: Write> OutputWriter<W> {
    /// `pretty` only affects the JSON format; JSONL is always one line per item.
    pub fn new(writer: W, format: OutputFormat, pretty: bool) -> Self {
        Self {
            writer,
            format,
            pretty,
            items_written: 0,
        }
    }

    /// Write a single item followed by a newline.
    pub fn write<T: Serialize>(&mut self, item: &T) -> io::Result<()> {
        if self.pretty && self.format == OutputFormat::Json {
            serde_json::to_writer_pretty(&mut self.writer, item).map_err(io::Error::other)?;
        } else {
            serde_json::to_writer(&mut self.writer, item).map_err(io::Error::other)?;
        }
        writeln!(self.writer)?;
        self.items_written += 1;
        Ok(())
    }

    /// Write several items: a JSON array, or one line each for JSONL.
    pub fn write_all<T: Serialize>(&mut self, items: &[T]) -> io::Result<()> {
        match self.format {
            OutputFormat::Json => {
                if self.pretty {
                    serde_json::to_writer_pretty(&mut self.writer, items)
                        .map_err(io::Error::other)?;
                } else {
                    serde_json::to_writer(&mut self.writer, items).map_err(io::Error::other)?;
                }
                writeln!(self.writer)?;
                self.items_written += items.len();
            }
            OutputFormat::JsonLines => {
                for item in items {
                    self.write(item)?;
                }
            }
        }
        Ok(())
    }

    pub fn items_written(&self) -> usize {
        self.items_written
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

/// Encode one item as a newline-terminated JSONL record.
pub fn to_jsonl_line<T: Serialize>(item: &T) -> Result<Vec<u8>, serde_json::Error> {
    let mut writer = OutputWriter::new(Vec::new(), OutputFormat::JsonLines, false);
    writer.write(item).map_err(serde_json::Error::io)?;
    Ok(writer.into_inner())
}

/// Decode a JSONL log.
///
/// Blank lines are ignored. Malformed lines (torn or merged appends) are
/// skipped with a warning so one bad record never hides the rest of the log.
pub fn parse_jsonl<T: DeserializeOwned>(text: &str) -> Result<Vec<T>, serde_json::Error> {
    let mut items = Vec::new();
    for (i, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(line) {
            Ok(item) => items.push(item),
            Err(e) => tracing::warn!("Skipping malformed JSONL record on line {}: {}", i + 1, e),
        }
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct TestItem {
        name: String,
        value: i32,
    }

    fn items() -> Vec<TestItem> {
        vec![
            TestItem {
                name: "a".to_string(),
                value: 1,
            },
            TestItem {
                name: "b".to_string(),
                value: 2,
            },
        ]
    }

    #[test]
    fn test_write_json() {
        let mut buffer = Vec::new();
        let mut writer = OutputWriter::new(&mut buffer, OutputFormat::Json, false);
        writer
            .write(&TestItem {
                name: "test".to_string(),
                value: 42,
            })
            .unwrap();

        let output = String::from_utf8(buffer).unwrap();
        assert!(output.contains("\"name\":\"test\""));
        assert!(output.contains("\"value\":42"));
    }

    #[test]
    fn test_write_jsonl() {
        let mut buffer = Vec::new();
        let mut writer = OutputWriter::new(&mut buffer, OutputFormat::JsonLines, true);
        writer.write_all(&items()).unwrap();
        assert_eq!(writer.items_written(), 2);

        let output = String::from_utf8(buffer).unwrap();
        assert_eq!(output.trim().split('\n').count(), 2);
    }

    #[test]
    fn test_write_all_json_array() {
        let mut buffer = Vec::new();
        let mut writer = OutputWriter::new(&mut buffer, OutputFormat::Json, false);
        writer.write_all(&items()).unwrap();

        let output = String::from_utf8(buffer).unwrap();
        assert!(output.starts_with('['));
        assert!(output.trim().ends_with(']'));
    }

    #[test]
    fn test_format_parse() {
        assert_eq!(OutputFormat::parse("json"), Some(OutputFormat::Json));
        assert_eq!(OutputFormat::parse("JSONL"), Some(OutputFormat::JsonLines));
        assert_eq!(OutputFormat::parse("ndjson"), Some(OutputFormat::JsonLines));
        assert_eq!(OutputFormat::parse("invalid"), None);
    }

    #[test]
    fn test_parse_jsonl_log() {
        let mut log = Vec::new();
        for item in items() {
            log.extend(to_jsonl_line(&item).unwrap());
        }
        let text = String::from_utf8(log).unwrap();
        let parsed: Vec<TestItem> = parse_jsonl(&text).unwrap();
        assert_eq!(parsed, items());
    }

    #[test]
    fn test_parse_jsonl_drops_torn_tail() {
        let text = "{\"name\":\"a\",\"value\":1}\n{\"name\":\"b\",\"va";
        let parsed: Vec<TestItem> = parse_jsonl(text).unwrap();
        assert_eq!(parsed.len(), 1);
    }

    #[test]
    fn test_parse_jsonl_skips_corrupt_middle() {
        let text = "{\"name\":\"a\",\"value\":1}\nnot json\n{\"name\":\"b\",\"value\":2}\n";
        let parsed: Vec<TestItem> = parse_jsonl(text).unwrap();
        assert_eq!(parsed, items());
    }
}
