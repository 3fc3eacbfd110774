use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::DataSourceError;

/// Wire encoding expected by a data source.
///
/// The numeric value is what travels in the `format` query parameter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum CallFormat {
    /// Format 1: the request wraps fields under `inputs`, the reply carries `tables`.
    #[default]
    Tabular,
    /// Format 2: the request is the flat field map, the reply carries `rows`.
    RowList,
}

impl CallFormat {
    /// All supported formats in numeric order.
    pub const ALL: [CallFormat; 2] = [CallFormat::Tabular, CallFormat::RowList];

    /// Numeric value sent as `?format=`.
    pub fn number(self) -> i64 {
        match self {
            CallFormat::Tabular => 1,
            CallFormat::RowList => 2,
        }
    }
}

impl TryFrom<i64> for CallFormat {
    type Error = DataSourceError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(CallFormat::Tabular),
            2 => Ok(CallFormat::RowList),
            other => Err(DataSourceError::configuration(format!(
                "call format must be one of [1, 2]; received {other}"
            ))),
        }
    }
}

impl From<CallFormat> for i64 {
    fn from(value: CallFormat) -> Self {
        value.number()
    }
}

impl FromStr for CallFormat {
    type Err = DataSourceError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        let number = trimmed
            .parse::<i64>()
            .map_err(|_| DataSourceError::configuration(format!("call format must be one of [1, 2]; received '{trimmed}'")))?;
        CallFormat::try_from(number)
    }
}

impl fmt::Display for CallFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.number())
    }
}

/// Semantic type tag recorded for a field the first time it carries a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Integer,
    Boolean,
    String,
    Other(OtherKind),
}

/// Shapes that fall outside the integer/boolean/string trio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OtherKind {
    Float,
    Array,
    Object,
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FieldType::Integer => "integer",
            FieldType::Boolean => "boolean",
            FieldType::String => "string",
            FieldType::Other(OtherKind::Float) => "float",
            FieldType::Other(OtherKind::Array) => "array",
            FieldType::Other(OtherKind::Object) => "object",
        };
        f.write_str(label)
    }
}
