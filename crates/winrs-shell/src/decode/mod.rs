//! Decoders for PowerShell's `ConvertTo-Json`, `ConvertTo-Csv` and
//! `ConvertTo-Xml` output.
//!
//! Output that is not part of the document (warnings, banners, other
//! streams) is collected in an [`OtherOutput`] sink instead of being dropped.

use std::collections::BTreeMap;

pub mod csv;
pub mod json;
pub mod xml;

pub use csv::{CsvOptions, decode_csv, split_csv_line, split_csv_lines};
pub use json::decode_json;
pub use xml::{ObjectReader, XmlFragments, object_to_map};

/// Non-document output per stream name, in arrival order.
pub type OtherOutput = BTreeMap<String, Vec<String>>;

/// One decoded object: property name to value.
pub type Row = BTreeMap<String, serde_json::Value>;

pub(crate) fn push_other(other: &mut OtherOutput, stream: &str, text: &str) {
    if !text.is_empty() {
        other.entry(stream.to_string()).or_default().push(text.to_string());
    }
}
