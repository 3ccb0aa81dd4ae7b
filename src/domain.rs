use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::IprError;

const SESSION_ID_LEN: usize = 8;
const SESSION_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    /// Draws a fresh id from the random part of a v4 uuid.
    pub fn generate() -> Self {
        let uuid = uuid::Uuid::new_v4();
        let bytes = uuid.as_bytes();
        // bytes 6 and 8 carry the uuid version and variant bits
        let id = [0usize, 1, 2, 3, 4, 5, 10, 11]
            .iter()
            .map(|&idx| SESSION_ALPHABET[bytes[idx] as usize % SESSION_ALPHABET.len()] as char)
            .collect();
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = IprError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let is_valid = trimmed.len() == SESSION_ID_LEN
            && trimmed.chars().all(|ch| ch.is_ascii_alphanumeric());
        if !is_valid {
            return Err(IprError::InvalidSessionId(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

/// Name of an InterProScan member database, e.g. `PFAM` or `TIGRFAMs`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AppName(String);

impl AppName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AppName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AppName {
    type Err = IprError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let is_valid = !trimmed.is_empty()
            && trimmed
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-');
        if !is_valid {
            return Err(IprError::InvalidAppName(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

impl TryFrom<String> for AppName {
    type Error = IprError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AppName> for String {
    fn from(value: AppName) -> Self {
        value.0
    }
}

impl PartialEq<str> for AppName {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for AppName {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountRecord {
    pub name: String,
    pub count: i64,
}

/// One ranked row of the match table: `(name, count, go_id, db_id, go_name)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub name: String,
    pub count: i64,
    pub go_id: Option<String>,
    pub db_id: String,
    pub go_name: Option<String>,
}

impl MatchRecord {
    pub const COLUMNS: usize = 5;

    pub fn column(&self, index: usize) -> Option<CellValue> {
        match index {
            0 => Some(CellValue::Text(self.name.clone())),
            1 => Some(CellValue::Integer(self.count)),
            2 => Some(self.go_id.clone().map_or(CellValue::Null, CellValue::Text)),
            3 => Some(CellValue::Text(self.db_id.clone())),
            4 => Some(self.go_name.clone().map_or(CellValue::Null, CellValue::Text)),
            _ => None,
        }
    }

    /// Key the durable backend deduplicates on.
    pub fn key(&self) -> (&str, Option<&str>) {
        (self.db_id.as_str(), self.go_id.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum CellValue {
    Text(String),
    Integer(i64),
    Null,
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Text(value) => write!(f, "{value}"),
            CellValue::Integer(value) => write!(f, "{value}"),
            CellValue::Null => write!(f, "None"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ChartType {
    Pie,
    Bar,
}

impl fmt::Display for ChartType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChartType::Pie => write!(f, "pie"),
            ChartType::Bar => write!(f, "bar"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ChartGenerator {
    Svg,
    Text,
}

impl fmt::Display for ChartGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChartGenerator::Svg => write!(f, "svg"),
            ChartGenerator::Text => write!(f, "text"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Memory,
    Durable,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Memory => write!(f, "memory"),
            BackendKind::Durable => write!(f, "durable"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_session_ids_parse() {
        for _ in 0..32 {
            let id = SessionId::generate();
            let parsed: SessionId = id.as_str().parse().unwrap();
            assert_eq!(parsed, id);
        }
    }

    #[test]
    fn match_record_projection() {
        let record = MatchRecord {
            name: "Kinase".to_string(),
            count: 4,
            go_id: None,
            db_id: "PF00069".to_string(),
            go_name: None,
        };
        assert_eq!(record.column(1), Some(CellValue::Integer(4)));
        assert_eq!(record.column(2), Some(CellValue::Null));
        assert_eq!(record.column(5), None);
    }
}
