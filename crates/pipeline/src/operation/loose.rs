//! Leniently typed scalars.
//!
//! Clients send seconds, sizes and flags as JSON numbers, numeric strings or
//! booleans interchangeably. These wrappers accept all of them and convert
//! once the field name is known, so a bad value is reported against its key.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A number or a string
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum Scalar {
    Number(f64),
    Text(String),
}

impl Scalar {
    pub fn as_f64(&self) -> Result<f64, String> {
        let value = match self {
            Scalar::Number(value) => *value,
            Scalar::Text(text) => {
                clipper_common::utils::parse_seconds(text).map_err(|e| e.to_string())?
            }
        };
        if value.is_finite() {
            Ok(value)
        } else {
            Err(format!("expected a finite number, got {value}"))
        }
    }

    pub fn as_u32(&self) -> Result<u32, String> {
        let value = self.as_f64()?;
        if value < 0.0 || value.fract() != 0.0 || value > u32::MAX as f64 {
            return Err(format!("expected a non-negative integer, got {value}"));
        }
        Ok(value as u32)
    }

    /// Textual form; whole numbers print without a fraction
    pub fn to_text(&self) -> String {
        match self {
            Scalar::Number(value) => value.to_string(),
            Scalar::Text(text) => text.clone(),
        }
    }
}

/// A boolean, `0`/`1`, or one of `true/false/yes/no/1/0` as a string
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum Flag {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl Flag {
    pub fn as_bool(&self) -> Result<bool, String> {
        match self {
            Flag::Bool(value) => Ok(*value),
            Flag::Number(value) if *value == 0.0 => Ok(false),
            Flag::Number(value) if *value == 1.0 => Ok(true),
            Flag::Number(value) => Err(format!("expected a boolean, got {value}")),
            Flag::Text(text) => match text.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => Ok(true),
                "false" | "no" | "0" => Ok(false),
                other => Err(format!("expected a boolean, got `{other}`")),
            },
        }
    }
}

/// A single item or a list of them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> OneOrMany<T> {
    pub fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::Many(items) => items,
            OneOrMany::One(item) => vec![item],
        }
    }
}
