//! Table identities
//!
//! A table is addressed by a numeric id plus an optional snapshot version.
//! Users write the public form (`syn123`, `syn123.4`), the backing index
//! uses the internal form (`T123`, `T123_4`).

use crate::error::{QueryError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const PUBLIC_PREFIX: &str = "syn";
const INTERNAL_PREFIX: &str = "T";

/// Immutable id + version pair. Ordered by id, then version with the
/// unversioned identity first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TableIdentity {
    id: i64,
    version: Option<i64>,
}

impl TableIdentity {
    pub fn new(id: i64) -> Self {
        Self { id, version: None }
    }

    pub fn with_version(id: i64, version: i64) -> Self {
        Self {
            id,
            version: Some(version),
        }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn version(&self) -> Option<i64> {
        self.version
    }

    /// `syn123` or `syn123.4`
    pub fn public_name(&self) -> String {
        match self.version {
            Some(v) => format!("{}{}.{}", PUBLIC_PREFIX, self.id, v),
            None => format!("{}{}", PUBLIC_PREFIX, self.id),
        }
    }

    /// `T123` or `T123_4`
    pub fn internal_name(&self) -> String {
        match self.version {
            Some(v) => format!("{}{}_{}", INTERNAL_PREFIX, self.id, v),
            None => format!("{}{}", INTERNAL_PREFIX, self.id),
        }
    }

    /// Parse any of `syn123`, `SYN123`, `123`, `syn123.4`, `T123`, `T123_4`.
    pub fn parse(text: &str) -> Result<Self> {
        let trimmed = text.trim();
        let invalid = || QueryError::InvalidArgument(format!("Invalid table identity: '{}'", text));

        let lower = trimmed.to_ascii_lowercase();
        let (body, separator) = if let Some(rest) = lower.strip_prefix(PUBLIC_PREFIX) {
            (rest, '.')
        } else if let Some(rest) = lower.strip_prefix("t") {
            (rest, '_')
        } else {
            (lower.as_str(), '.')
        };

        let (id_part, version_part) = match body.split_once(separator) {
            Some((id, version)) => (id, Some(version)),
            None => (body, None),
        };
        let id = parse_number(id_part).ok_or_else(invalid)?;
        let version = match version_part {
            Some(v) => Some(parse_number(v).ok_or_else(invalid)?),
            None => None,
        };
        Ok(Self { id, version })
    }
}

fn parse_number(text: &str) -> Option<i64> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    text.parse().ok()
}

impl fmt::Display for TableIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.public_name())
    }
}

impl FromStr for TableIdentity {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for TableIdentity {
    type Error = QueryError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<TableIdentity> for String {
    fn from(value: TableIdentity) -> Self {
        value.public_name()
    }
}
