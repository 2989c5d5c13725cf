use std::fmt::Write;

use serde::Serialize;
use serde_json::Number;
use serde_json::Value;

use crate::Error;
use crate::Result;

/// Returns the canonical hash of a simple key.
///
/// A simple key is a string, number or boolean, or an object whose properties
/// are simple keys. Two keys that differ only in property order hash to the
/// same string. Null properties are skipped; a null key and an empty object
/// both hash to the empty string.
///
/// # Errors
/// [`Error::UnhashableKey`] for arrays and for values that cannot be rendered
/// as JSON (maps with non-string keys, refusing serializers).
pub fn simple_hash<K>(key: &K) -> Result<String>
where
    K: Serialize + ?Sized,
{
    let value = serde_json::to_value(key).map_err(|e| Error::UnhashableKey(format!("unserializable item ({e})")))?;
    hash_value(&value)
}

/// Non-failing variant of [`simple_hash`]
pub fn simple_hash_safe<K>(key: &K) -> Option<String>
where
    K: Serialize + ?Sized,
{
    simple_hash(key).ok()
}

fn hash_value(value: &Value) -> Result<String> {
    match value {
        Value::Null => Ok(String::new()),
        Value::String(s) => Ok(escape(s)),
        Value::Number(n) => Ok(number_to_string(n)),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Object(map) if map.is_empty() => Ok(String::new()),
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().filter(|(_, v)| !v.is_null()).collect();
            entries.sort_by(|(k1, _), (k2, _)| k1.cmp(k2));

            let parts = entries
                .into_iter()
                .map(|(k, v)| Ok(format!("{}:{}", escape(k), hash_value(v)?)))
                .collect::<Result<Vec<String>>>()?;

            Ok(format!("{{{}}}", parts.join("|")))
        }
        Value::Array(_) => Err(Error::UnhashableKey("item of type array".to_string())),
    }
}

fn number_to_string(n: &Number) -> String {
    if let Some(i) = n.as_i64() {
        i.to_string()
    } else if let Some(u) = n.as_u64() {
        u.to_string()
    } else {
        // f64 Display drops the fraction of integral values ("1", not "1.0")
        n.as_f64().map(|f| f.to_string()).unwrap_or_else(|| n.to_string())
    }
}

/// Percent-encodes everything except `A-Z a-z 0-9 @ * _ + - . /`, working on
/// UTF-16 code units: `%XX` below 256, `%uXXXX` above.
pub(crate) fn escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for unit in input.encode_utf16() {
        if unit < 0x80 && is_unreserved(unit as u8) {
            out.push(unit as u8 as char);
        } else if unit < 0x100 {
            let _ = write!(out, "%{:02X}", unit);
        } else {
            let _ = write!(out, "%u{:04X}", unit);
        }
    }
    out
}

fn is_unreserved(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"@*_+-./".contains(&b)
}
