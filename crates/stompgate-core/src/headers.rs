//! STOMP header handling.
//!
//! Headers are an ordered list of key/value pairs. Keys are case-sensitive
//! and duplicates are kept in wire order; lookups return the first
//! occurrence, which is the one STOMP 1.2 declares authoritative.

use crate::error::CodecError;

/// Ordered header collection with first-occurrence-wins lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderList {
    entries: Vec<(String, String)>,
}

impl HeaderList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    /// Append a header, keeping any existing entries with the same key.
    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.push((key.into(), value.into()));
    }

    /// Replace the first entry with this key, or append if absent.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value.into(),
            None => self.entries.push((key.to_string(), value.into())),
        }
    }

    /// First value for `key`, if any.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Remove every entry with this key; returns true if any was removed.
    pub fn remove(&mut self, key: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(k, _)| k != key);
        self.entries.len() != before
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for HeaderList {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Encode the STOMP 1.2 header escape sequences.
///
/// `\r`, `\n`, `:` and `\` are the only characters that need escaping.
pub fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            ':' => out.push_str("\\c"),
            '\\' => out.push_str("\\\\"),
            other => out.push(other),
        }
    }
    out
}

/// Decode the STOMP 1.2 header escape sequences.
///
/// Any escape other than `\r`, `\n`, `\c` and `\\` is a grammar violation,
/// as is a trailing lone backslash.
pub fn unescape(raw: &str) -> Result<String, CodecError> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some('c') => out.push(':'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                return Err(CodecError::malformed(format!(
                    "invalid header escape sequence: \\{other}"
                )))
            }
            None => return Err(CodecError::malformed("dangling escape in header")),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_occurrence_wins() {
        let mut headers = HeaderList::new();
        headers.push("foo", "first");
        headers.push("foo", "second");
        assert_eq!(headers.get("foo"), Some("first"));
        assert_eq!(headers.len(), 2);
    }

    #[test]
    fn keys_are_case_sensitive() {
        let mut headers = HeaderList::new();
        headers.push("Content-Type", "text/plain");
        assert_eq!(headers.get("content-type"), None);
    }

    #[test]
    fn set_replaces_first_entry_only() {
        let mut headers = HeaderList::new();
        headers.push("foo", "a");
        headers.push("foo", "b");
        headers.set("foo", "c");
        let values: Vec<_> = headers.iter().map(|(_, v)| v).collect();
        assert_eq!(values, vec!["c", "b"]);
    }

    #[test]
    fn escape_round_trip() {
        let raw = "key\n:\\value\r";
        assert_eq!(unescape(&escape(raw)).unwrap(), raw);
    }

    #[test]
    fn unescape_rejects_unknown_sequences() {
        assert!(unescape("key\\t").is_err());
        assert!(unescape("dangling\\").is_err());
    }
}
