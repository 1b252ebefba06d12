//! Delimited-record parser for the remote `stage=pipe` text format.
//!
//! The first non-empty line is the header row. Values are trimmed and never
//! coerced. There is no quoting: a delimiter inside a value is a separator.

use serde::Serialize;

use crate::RemoteRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delimiter {
    Pipe,
    Comma,
}

impl Delimiter {
    /// Comma only when the payload has a comma and no pipe anywhere.
    pub fn detect(raw: &str) -> Self {
        if raw.contains(',') && !raw.contains('|') {
            Delimiter::Comma
        } else {
            Delimiter::Pipe
        }
    }

    pub fn as_char(self) -> char {
        match self {
            Delimiter::Pipe => '|',
            Delimiter::Comma => ',',
        }
    }
}

/// Parser output: one data row yields a single record, anything else a list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Parsed {
    Single(RemoteRecord),
    Rows(Vec<RemoteRecord>),
}

impl Parsed {
    pub fn into_rows(self) -> Vec<RemoteRecord> {
        match self {
            Parsed::Single(record) => vec![record],
            Parsed::Rows(rows) => rows,
        }
    }

    pub fn first(&self) -> Option<&RemoteRecord> {
        match self {
            Parsed::Single(record) => Some(record),
            Parsed::Rows(rows) => rows.first(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Parsed::Single(_) => 1,
            Parsed::Rows(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Parses a header + data payload. Blank input yields `None`.
pub fn parse(raw: &str) -> Option<Parsed> {
    if raw.trim().is_empty() {
        return None;
    }
    let delimiter = Delimiter::detect(raw);
    let mut lines = raw.lines().filter(|line| !line.trim().is_empty());

    let headers: Vec<&str> = lines
        .next()?
        .split(delimiter.as_char())
        .map(str::trim)
        .collect();

    let mut rows: Vec<RemoteRecord> = lines
        .map(|line| record_from_line(&headers, line, delimiter))
        .collect();

    if rows.len() == 1 {
        rows.pop().map(Parsed::Single)
    } else {
        Some(Parsed::Rows(rows))
    }
}

/// Convenience for callers that always want a list of rows.
pub fn parse_rows(raw: &str) -> Vec<RemoteRecord> {
    parse(raw).map(Parsed::into_rows).unwrap_or_default()
}

fn record_from_line(headers: &[&str], line: &str, delimiter: Delimiter) -> RemoteRecord {
    let values: Vec<&str> = line.split(delimiter.as_char()).map(str::trim).collect();
    headers
        .iter()
        .enumerate()
        .map(|(i, header)| (*header, values.get(i).copied().unwrap_or_default()))
        .collect()
}
