//! Units that select the value normalization rule.

use crate::error::CommonError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Unit {
    Days,
    DegreesCelsius,
    Likelihood,
    Centimeters,
    Percent,
    ZScore,
    Raw,
}

impl Unit {
    /// Canonical tag, as stored in the dataset header.
    pub fn as_str(&self) -> &'static str {
        match self {
            Unit::Days => "days",
            Unit::DegreesCelsius => "°C",
            Unit::Likelihood => "likelihood",
            Unit::Centimeters => "cm",
            Unit::Percent => "%",
            Unit::ZScore => "z-score",
            Unit::Raw => "raw",
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Unit {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // "Â°C" is "°C" read back through a latin-1 decoder; some dataset
        // sheets carry it that way.
        match s.trim() {
            "days" => Ok(Unit::Days),
            "°C" | "Â°C" | "degrees-celsius" | "degC" => Ok(Unit::DegreesCelsius),
            "likelihood" => Ok(Unit::Likelihood),
            "cm" | "centimeters" => Ok(Unit::Centimeters),
            "%" | "percent" => Ok(Unit::Percent),
            "z-score" => Ok(Unit::ZScore),
            "raw" => Ok(Unit::Raw),
            _ => Err(CommonError::NoMatchingUnit(s.to_string())),
        }
    }
}

impl TryFrom<String> for Unit {
    type Error = CommonError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Unit> for String {
    fn from(unit: Unit) -> Self {
        unit.as_str().to_string()
    }
}
