//! HTTP header multimap used by the opening handshake.

use std::collections::HashMap;
use std::fmt::Write as _;

use crate::error::{Error, Result};

/// Multimap of header field names to ordered values.
///
/// Lookup is case-sensitive on the field name as supplied by the peer;
/// duplicate fields keep their arrival order.
#[derive(Debug, Clone, Default)]
pub struct Header {
    fields: HashMap<String, Vec<String>>,
}

impl Header {
    /// Create an empty header map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value under `key`, preserving any existing values.
    pub fn append(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.fields.entry(key.into()).or_default().push(value.into());
    }

    /// All values recorded for `key`, in arrival order.
    pub fn get(&self, key: &str) -> &[String] {
        self.fields.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// First value recorded for `key`.
    pub fn get_one(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(|v| v.first()).map(String::as_str)
    }

    /// Whether `key` is present at all.
    pub fn has_key(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    /// Whether the first value of `key` equals `val`.
    pub fn has_key_val_eq(&self, key: &str, val: &str) -> bool {
        self.get_one(key) == Some(val)
    }

    /// Whether the first value of `key` contains `val` as a substring.
    ///
    /// Substring matching is what lets Firefox's `Connection: keep-alive, Upgrade`
    /// pass the upgrade check.
    pub fn has_key_val_contains(&self, key: &str, val: &str) -> bool {
        self.get_one(key).is_some_and(|v| v.contains(val))
    }

    /// Serialize as `Name: value\r\n` lines (one per value, any order).
    pub fn write_to(&self, out: &mut String) {
        for (key, values) in &self.fields {
            for value in values {
                let _ = write!(out, "{key}: {value}\r\n");
            }
        }
    }

    /// Parse the header block that sits between the request line and the
    /// terminating empty line.
    ///
    /// Line endings are `\n` or `\r\n` as indicated by `crlf`. Each line is
    /// split at the first `:`; optional whitespace around the value is
    /// trimmed. A line without a colon is a deformed header.
    pub fn from_bytes(block: &[u8], crlf: bool) -> Result<Header> {
        let mut header = Header::new();

        for mut line in block.split(|&b| b == b'\n') {
            if crlf {
                line = line.strip_suffix(b"\r").unwrap_or(line);
            }
            if line.is_empty() {
                // trailing piece after the final terminator
                continue;
            }

            let sep = line.iter().position(|&b| b == b':').ok_or_else(|| {
                Error::Handshake(format!(
                    "deformed header: {}",
                    String::from_utf8_lossy(line)
                ))
            })?;

            let key = std::str::from_utf8(&line[..sep])
                .map_err(|_| Error::Handshake("header name is not UTF-8".to_string()))?;
            let value = std::str::from_utf8(&line[sep + 1..])
                .map_err(|_| Error::Handshake("header value is not UTF-8".to_string()))?
                .trim_matches(|c| c == ' ' || c == '\t');

            header.append(key, value);
        }

        Ok(header)
    }
}
