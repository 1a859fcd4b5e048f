//! In-memory form of an opened grid dataset.

use crate::grid::{GridSpec, VariableBuffer};
use serde::{Deserialize, Serialize};

/// Descriptive global attributes carried by a grid file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalAttributes {
    pub id: Option<i64>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub model: Option<String>,
    pub unit: Option<String>,
}

/// A grid lattice plus the flattened buffers of the variables that were read.
#[derive(Debug, Clone, Default)]
pub struct GridSource {
    pub spec: GridSpec,
    pub variables: Vec<VariableBuffer>,
    pub attributes: GlobalAttributes,
}

impl GridSource {
    pub fn variable(&self, name: &str) -> Option<&VariableBuffer> {
        self.variables.iter().find(|v| v.name == name)
    }
}
