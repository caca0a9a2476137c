use crate::EncodingError;

/// Parses `ConvertTo-Json` output.
///
/// PowerShell terminates the document with `;`, which is stripped. Blank
/// output means "no objects" and decodes to an empty array.
pub fn decode_json(raw: &str) -> Result<serde_json::Value, EncodingError> {
    let text = raw.trim();
    if text.is_empty() {
        return Ok(serde_json::Value::Array(Vec::new()));
    }
    let text = text.strip_suffix(';').unwrap_or(text);

    serde_json::from_str(text).map_err(|source| EncodingError::Json {
        raw: raw.to_string(),
        source,
    })
}
