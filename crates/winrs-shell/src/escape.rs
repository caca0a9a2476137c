//! Rendering of [`Value`]s as PowerShell literals.
//!
//! Text is always single-quoted, where only `'` is special and is escaped by
//! doubling it. Empty and null values become `$false`, which PowerShell
//! cmdlets accept as "no value".

use winrs_core::Value;

use crate::EncodingError;

const FALSE: &str = "$false";
const TRUE: &str = "$true";

/// Renders `value` as a literal safe to splice into a command line.
pub fn escape(value: &Value) -> Result<String, EncodingError> {
    match value {
        Value::Null => Ok(FALSE.to_string()),
        Value::Bool(true) => Ok(TRUE.to_string()),
        Value::Bool(false) => Ok(FALSE.to_string()),
        Value::Int(number) => Ok(number.to_string()),
        Value::Float(number) if number.is_finite() => Ok(format!("'{number:.6}'")),
        Value::Float(number) => Err(EncodingError::UnsupportedValue(format!(
            "non-finite number {number}"
        ))),
        Value::Text(text) => Ok(escape_text(text)),
        Value::Seq(items) => Ok(items
            .iter()
            .map(escape)
            .collect::<Result<Vec<_>, _>>()?
            .join(",")),
        Value::Map(entries) => {
            let mut pairs = Vec::with_capacity(entries.len());
            for (key, value) in entries {
                let (key, value) = (escape(key)?, escape(value)?);
                if key.is_empty() || value.is_empty() {
                    tracing::debug!(key = %key, value = %value, "omitting empty entry in hash table");
                    continue;
                }
                pairs.push(format!("{key}={value}"));
            }
            Ok(format!("@{{{}}}", pairs.join(";")))
        }
    }
}

fn escape_text(text: &str) -> String {
    let text = text.replace('\0', "");
    if text.is_empty() {
        FALSE.to_string()
    } else {
        format!("'{}'", text.replace('\'', "''"))
    }
}

#[cfg(test)]
mod tests {
    use winrs_core::Value;

    use super::escape;

    #[test]
    fn nul_only_text_is_empty() {
        assert_eq!(escape(&Value::from("\0\0")).expect("escape"), "$false");
        assert_eq!(escape(&Value::from("a\0b")).expect("escape"), "'ab'");
    }

    #[test]
    fn empty_sequence_drops_out_of_maps() {
        let value = Value::map([("Members", Value::Seq(Vec::new())), ("Name", Value::from("x"))]);
        assert_eq!(escape(&value).expect("escape"), "@{'Name'='x'}");
    }
}
