//! `key=value;key=value` payload strings
//!
//! NEW, AUTHREQ, AUTHREP and ACCEPT carry their parameters as a
//! semicolon separated list, NUL terminated on the wire.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use tracing::warn;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IaxParams {
    entries: Vec<(String, String)>,
}

impl IaxParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a received payload.
    ///
    /// Stops at the first NUL, tolerates a trailing `;` and skips (with a
    /// warning) any element without an `=`.
    pub fn parse(payload: &[u8]) -> Self {
        let end = payload.iter().position(|b| *b == 0).unwrap_or(payload.len());
        let text = String::from_utf8_lossy(&payload[..end]);

        let mut entries = Vec::new();
        for element in text.split(';') {
            if element.is_empty() {
                continue;
            }
            match element.split_once('=') {
                Some((key, value)) => entries.push((key.to_string(), value.to_string())),
                None => warn!("Missing '=' in parameter '{}'", element),
            }
        }
        Self { entries }
    }

    /// Append a parameter, builder style
    pub fn with(mut self, key: &str, value: impl fmt::Display) -> Self {
        self.push(key, value);
        self
    }

    pub fn push(&mut self, key: &str, value: impl fmt::Display) {
        self.entries.push((key.to_string(), value.to_string()));
    }

    /// First value stored under `key`
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Numeric value, `None` if missing or not a number
    pub fn get_u32(&self, key: &str) -> Option<u32> {
        self.get(key).and_then(|v| v.trim().parse().ok())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Wire form: `k=v;k=v` followed by a NUL
    pub fn encode(&self) -> Bytes {
        let text = self.to_string();
        let mut buf = BytesMut::with_capacity(text.len() + 1);
        buf.put_slice(text.as_bytes());
        buf.put_u8(0);
        buf.freeze()
    }
}

impl fmt::Display for IaxParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (key, value)) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str(";")?;
            }
            write!(f, "{}={}", key, value)?;
        }
        Ok(())
    }
}

/// Text payload as sent by REJECT, without trailing NULs
pub fn payload_text(payload: &[u8]) -> String {
    let end = payload.iter().position(|b| *b == 0).unwrap_or(payload.len());
    String::from_utf8_lossy(&payload[..end]).into_owned()
}
