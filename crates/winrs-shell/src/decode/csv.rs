//! `ConvertTo-Csv` output with a custom line delimiter.
//!
//! The remote console wraps long lines at 80 columns, so commands replace
//! real line breaks with a delimiter (`;` by default) and every `\n` in the
//! received text is noise. Values are wrapped in `"`; delimiters inside a
//! wrapped value are data.

use std::collections::BTreeMap;

use winrs_core::STDOUT;

use super::{OtherOutput, push_other};
use crate::EncodingError;

const TYPE_MARKER: &str = "#TYPE";

/// Delimiters for [`decode_csv`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CsvOptions {
    /// Separates fields on a line.
    pub delimiter: char,
    /// Separates lines.
    pub line_delimiter: char,
    /// Quotes a value.
    pub value_wrapper: char,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            delimiter: ',',
            line_delimiter: ';',
            value_wrapper: '"',
        }
    }
}

/// Decodes rows keyed by the header line that follows the `#TYPE` marker.
///
/// Text before the marker goes to `other`. Rows shorter or longer than the
/// header are logged; missing fields are left out of the row.
pub fn decode_csv(
    raw: &str,
    other: &mut OtherOutput,
    options: &CsvOptions,
) -> Result<Vec<BTreeMap<String, String>>, EncodingError> {
    let text = raw.replace('\n', "");
    tracing::trace!(bytes = text.len(), "decoding csv output");

    let Some(start) = text.find(TYPE_MARKER) else {
        if text.is_empty() || text == ";" {
            return Ok(Vec::new());
        }
        tracing::warn!(output = %text, "no csv start found in output");
        return Err(EncodingError::Csv {
            raw: raw.to_string(),
            reason: "no #TYPE marker found".to_string(),
        });
    };
    push_other(other, STDOUT, &text[..start]);

    // Rows start after the type line.
    let body = &text[start..];
    let body = body
        .find(options.line_delimiter)
        .map_or("", |pos| &body[pos..]);

    let mut header: Option<Vec<String>> = None;
    let mut rows = Vec::new();
    for line in split_csv_lines(body, options.line_delimiter, options.value_wrapper) {
        if line.trim().is_empty() {
            continue;
        }
        let fields = split_csv_line(&line, options.delimiter, options.value_wrapper)?;

        let Some(names) = header.as_ref() else {
            header = Some(fields);
            continue;
        };
        if names.len() != fields.len() {
            tracing::warn!(
                line = %line,
                expected = names.len(),
                found = fields.len(),
                "csv row does not match header"
            );
        }
        rows.push(names.iter().cloned().zip(fields).collect());
    }

    Ok(rows)
}

/// Splits on `delimiter` wherever it is not inside a wrapped value.
///
/// Wrapper characters toggle the state and are kept in the line.
pub fn split_csv_lines(input: &str, delimiter: char, value_wrapper: char) -> Vec<String> {
    let mut lines = Vec::new();
    let mut line = String::new();
    let mut in_wrapper = false;

    for c in input.chars() {
        if !in_wrapper && c == delimiter {
            lines.push(std::mem::take(&mut line));
            continue;
        }
        if c == value_wrapper {
            in_wrapper = !in_wrapper;
        }
        line.push(c);
    }
    if !line.is_empty() {
        lines.push(line);
    }
    lines
}

/// Splits one line into unwrapped field values.
///
/// Outside a wrapped value only the delimiter, the wrapper and whitespace
/// are allowed. A trailing empty field counts only when the line ends with
/// the delimiter.
pub fn split_csv_line(
    input: &str,
    delimiter: char,
    value_wrapper: char,
) -> Result<Vec<String>, EncodingError> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut inside_value = false;

    for c in input.chars() {
        if inside_value {
            if c == value_wrapper {
                inside_value = false;
            } else {
                field.push(c);
            }
        } else if c == delimiter {
            fields.push(std::mem::take(&mut field));
        } else if c == value_wrapper {
            inside_value = true;
        } else if !matches!(c, '\n' | '\r' | ' ') {
            return Err(EncodingError::Csv {
                raw: input.to_string(),
                reason: format!("unexpected character {c:?} outside a value"),
            });
        }
    }

    if !field.is_empty() || input.ends_with(delimiter) {
        fields.push(field);
    }
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::{split_csv_line, split_csv_lines};

    #[test]
    fn line_split_ignores_delimiters_inside_values() {
        assert_eq!(
            split_csv_lines(r#""a;b","c";"d""#, ';', '"'),
            vec![r#""a;b","c""#, r#""d""#]
        );
    }

    #[test]
    fn field_split_keeps_commas_inside_values() {
        let fields = split_csv_line(r#""Doe, Jane", "jane","#, ',', '"').expect("line should split");
        assert_eq!(fields, vec!["Doe, Jane", "jane", ""]);
    }

    #[test]
    fn empty_last_value_without_delimiter_is_dropped() {
        let fields = split_csv_line(r#""a","""#, ',', '"').expect("line should split");
        assert_eq!(fields, vec!["a"]);
    }

    #[test]
    fn bare_text_outside_values_is_rejected() {
        assert!(split_csv_line(r#""a",b"#, ',', '"').is_err());
    }
}
