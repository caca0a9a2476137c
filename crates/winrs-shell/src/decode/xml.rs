//! Streaming `ConvertTo-Xml -As String` output.
//!
//! Large listings arrive over many receive replies. [`XmlFragments`] turns
//! each stdout chunk into a document fragment, [`ObjectReader`] buffers
//! fragments until a whole `<Object>` element is available, and
//! [`object_to_map`] converts that element. Memory stays bounded by the size
//! of one object.

use winrs_core::STDOUT;
use winrs_wsman::xml;

use super::{OtherOutput, Row, push_other};
use crate::EncodingError;

const DOCUMENT_START: &str = "<?xml";
const OBJECT_START: &str = "<Object";
const OBJECT_END: &str = "</Object>";

/// Locates the document start and cleans each stdout chunk.
#[derive(Debug, Default)]
pub struct XmlFragments {
    started: bool,
}

impl XmlFragments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the document part of one stdout chunk, if any.
    ///
    /// Chunks before the `<?xml` start go to `other`. Line breaks inserted by
    /// the remote console are removed.
    pub fn push(&mut self, stdout: &str, other: &mut OtherOutput) -> Option<String> {
        if stdout.is_empty() {
            return None;
        }
        let mut text = stdout;
        if !self.started {
            let Some(start) = text.find(DOCUMENT_START) else {
                push_other(other, STDOUT, text);
                return None;
            };
            self.started = true;
            push_other(other, STDOUT, &text[..start]);
            text = &text[start..];
        }
        Some(text.replace('\n', ""))
    }

    pub fn started(&self) -> bool {
        self.started
    }
}

/// Buffers fragments and yields complete `<Object>` elements.
#[derive(Debug, Default)]
pub struct ObjectReader {
    buffer: String,
}

impl ObjectReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, fragment: &str) {
        self.buffer.push_str(fragment);
    }

    /// Takes the next complete object out of the buffer. A self-closing
    /// `<Object ... />` is an object of its own.
    pub fn next_object(&mut self) -> Option<String> {
        let Some(start) = object_start(&self.buffer) else {
            self.discard_before_tail();
            return None;
        };
        let tag_end = start + self.buffer[start..].find('>')?;
        let end = if self.buffer[..tag_end].ends_with('/') {
            tag_end + 1
        } else {
            start + self.buffer[start..].find(OBJECT_END)? + OBJECT_END.len()
        };
        let object = self.buffer[start..end].to_string();
        self.buffer.drain(..end);
        Some(object)
    }

    /// Text left over that never formed an object.
    pub fn remainder(&self) -> &str {
        &self.buffer
    }

    // Keep only what could still be the beginning of a split start tag.
    fn discard_before_tail(&mut self) {
        let mut keep_from = self.buffer.len().saturating_sub(OBJECT_START.len());
        while !self.buffer.is_char_boundary(keep_from) {
            keep_from -= 1;
        }
        self.buffer.drain(..keep_from);
    }
}

fn object_start(buffer: &str) -> Option<usize> {
    buffer.match_indices(OBJECT_START).find_map(|(pos, _)| {
        match buffer[pos + OBJECT_START.len()..].chars().next() {
            Some(' ' | '>' | '/') => Some(pos),
            _ => None,
        }
    })
}

/// Converts one `<Object>` element into a flat map of its properties.
///
/// `System.String`, `System.Boolean` and `System.Int32` properties are
/// converted; any other type keeps its text. Properties without text are
/// null. Later duplicates win and are logged.
pub fn object_to_map(object: &str) -> Result<Row, EncodingError> {
    let root = xml::parse(object).map_err(|err| EncodingError::Xml {
        raw: object.to_string(),
        reason: err.to_string(),
    })?;

    let mut row = Row::new();
    for property in &root.children {
        if property.local_name() != "Property" {
            tracing::warn!(element = %property.name, "unknown element in object");
            continue;
        }
        let Some(name) = property.attr("Name") else {
            tracing::debug!("skipping unnamed property");
            continue;
        };
        let value = convert(property.attr("Type"), &property.text);
        if let Some(previous) = row.insert(name.to_string(), value) {
            tracing::warn!(property = name, previous = %previous, "property already set");
        }
    }
    Ok(row)
}

fn convert(kind: Option<&str>, text: &str) -> serde_json::Value {
    if text.is_empty() {
        return serde_json::Value::Null;
    }
    let raw = || serde_json::Value::String(text.to_string());
    match kind {
        Some("System.String") => raw(),
        Some("System.Boolean") => match text.trim().to_ascii_lowercase().as_str() {
            "true" => serde_json::Value::Bool(true),
            "false" => serde_json::Value::Bool(false),
            _ => {
                tracing::warn!(value = text, "unparseable boolean property");
                raw()
            }
        },
        Some("System.Int32") => match text.trim().parse::<i64>() {
            Ok(number) => number.into(),
            Err(_) => {
                tracing::warn!(value = text, "unparseable integer property");
                raw()
            }
        },
        _ => raw(),
    }
}

#[cfg(test)]
mod tests {
    use super::{ObjectReader, object_start};

    #[test]
    fn object_start_skips_objects_container() {
        assert_eq!(object_start("<Objects><Object Type=\"x\">"), Some(9));
        assert_eq!(object_start("<Objects>"), None);
    }

    #[test]
    fn reader_joins_objects_split_across_fragments() {
        let mut reader = ObjectReader::new();
        reader.feed("<?xml version=\"1.0\"?><Objects><Obj");
        assert_eq!(reader.next_object(), None);
        reader.feed("ect><Property Name=\"A\">1</Property></Obj");
        assert_eq!(reader.next_object(), None);
        reader.feed("ect><Object></Object></Objects>");
        assert_eq!(
            reader.next_object().as_deref(),
            Some("<Object><Property Name=\"A\">1</Property></Object>")
        );
        assert_eq!(reader.next_object().as_deref(), Some("<Object></Object>"));
        assert_eq!(reader.next_object(), None);
    }

    #[test]
    fn self_closing_object_does_not_swallow_the_next() {
        let mut reader = ObjectReader::new();
        reader.feed("<Objects><Object Type=\"System.String\" /><Object Type=\"X\"><Property Name=\"A\">kept</Property></Object></Objects>");
        assert_eq!(
            reader.next_object().as_deref(),
            Some("<Object Type=\"System.String\" />")
        );
        assert_eq!(
            reader.next_object().as_deref(),
            Some("<Object Type=\"X\"><Property Name=\"A\">kept</Property></Object>")
        );
        assert_eq!(reader.next_object(), None);
    }
}
