use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr, VariantNames};
use thiserror::Error;

/// Category of a compile failure, as reported to callers
#[derive(
    Debug, Clone, Copy,
    Serialize, Deserialize, JsonSchema,
    Display, EnumString, EnumIter, VariantNames, IntoStaticStr,
    PartialEq, Eq, Hash
)]
pub enum ErrorKind {
    UnknownOperation,
    InvalidDescriptor,
    ConflictingTimeRange,
    UnsupportedCombination,
    ProbeFailure,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompileError {
    #[error("operation {index}: unknown operation `{op}`")]
    UnknownOperation { index: usize, op: String },

    #[error("operation {index} ({op}): invalid `{field}`: {message}")]
    InvalidDescriptor {
        index: usize,
        op: String,
        field: String,
        message: String,
    },

    #[error("operation {index} ({op}): {field}[{first}] and {field}[{second}] overlap: {message}")]
    ConflictingTimeRange {
        index: usize,
        op: String,
        field: String,
        first: usize,
        second: usize,
        message: String,
    },

    #[error("operation {index} ({op}): {message}")]
    UnsupportedCombination {
        index: usize,
        op: String,
        /// Operation that made the stream layout incompatible, if any
        conflicts_with: Option<usize>,
        message: String,
    },

    #[error("media probe failed: {message}")]
    ProbeFailure { index: Option<usize>, message: String },
}

impl CompileError {
    pub fn invalid(
        index: usize,
        op: impl Into<String>,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidDescriptor {
            index,
            op: op.into(),
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn probe(message: impl Into<String>) -> Self {
        Self::ProbeFailure { index: None, message: message.into() }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownOperation { .. } => ErrorKind::UnknownOperation,
            Self::InvalidDescriptor { .. } => ErrorKind::InvalidDescriptor,
            Self::ConflictingTimeRange { .. } => ErrorKind::ConflictingTimeRange,
            Self::UnsupportedCombination { .. } => ErrorKind::UnsupportedCombination,
            Self::ProbeFailure { .. } => ErrorKind::ProbeFailure,
        }
    }

    /// Index of the offending operation, when the failure belongs to one
    pub fn index(&self) -> Option<usize> {
        match self {
            Self::UnknownOperation { index, .. }
            | Self::InvalidDescriptor { index, .. }
            | Self::ConflictingTimeRange { index, .. }
            | Self::UnsupportedCombination { index, .. } => Some(*index),
            Self::ProbeFailure { index, .. } => *index,
        }
    }

    /// Structured form handed back to the caller
    pub fn report(&self) -> ErrorReport {
        let field = match self {
            Self::InvalidDescriptor { field, .. } | Self::ConflictingTimeRange { field, .. } => {
                Some(field.clone())
            }
            _ => None,
        };
        ErrorReport {
            kind: self.kind(),
            index: self.index(),
            field,
            message: self.to_string(),
        }
    }
}

/// Serializable error surface: `{kind, index, field, message}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub message: String,
}

pub type Result<T> = std::result::Result<T, CompileError>;
