use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new_random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

/// The fixed set of cleaning operations understood by both client and service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationKind {
    RemoveDuplicates,
    FillMissing,
    DropHighMissingColumns,
    StripSpecialCharacters,
    ConvertTypes,
}

impl OperationKind {
    pub const ALL: [OperationKind; 5] = [
        OperationKind::RemoveDuplicates,
        OperationKind::FillMissing,
        OperationKind::DropHighMissingColumns,
        OperationKind::StripSpecialCharacters,
        OperationKind::ConvertTypes,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::RemoveDuplicates => "remove-duplicates",
            OperationKind::FillMissing => "fill-missing",
            OperationKind::DropHighMissingColumns => "drop-high-missing-columns",
            OperationKind::StripSpecialCharacters => "strip-special-characters",
            OperationKind::ConvertTypes => "convert-types",
        }
    }

    pub fn accepts_method(self) -> bool {
        matches!(self, OperationKind::FillMissing)
    }

    pub fn accepts_threshold(self) -> bool {
        matches!(self, OperationKind::DropHighMissingColumns)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OperationKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s.trim())
            .ok_or_else(|| UnknownVariant {
                kind: "operation",
                value: s.to_string(),
            })
    }
}

/// Imputation strategy for `fill-missing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillMethod {
    #[default]
    Mean,
    Median,
    Mode,
    Zero,
}

impl FillMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            FillMethod::Mean => "mean",
            FillMethod::Median => "median",
            FillMethod::Mode => "mode",
            FillMethod::Zero => "zero",
        }
    }
}

impl fmt::Display for FillMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FillMethod {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mean" => Ok(FillMethod::Mean),
            "median" => Ok(FillMethod::Median),
            "mode" => Ok(FillMethod::Mode),
            "zero" => Ok(FillMethod::Zero),
            _ => Err(UnknownVariant {
                kind: "fill method",
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Integer,
    Float,
    Text,
}

impl ColumnType {
    pub fn as_str(self) -> &'static str {
        match self {
            ColumnType::Integer => "integer",
            ColumnType::Float => "float",
            ColumnType::Text => "text",
        }
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, ColumnType::Integer | ColumnType::Float)
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
