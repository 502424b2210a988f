//! Serialized translation unit as emitted by the frontend.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::{Entity, JoinPoint, ProgramModel};

/// One token of the expanded token stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenSpec {
    pub text: String,
    /// Whitespace preceding the token in the original source.
    #[serde(default)]
    pub ws: String,
    /// Macro expansion this token was generated by, if any.
    #[serde(default)]
    pub expansion: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpansionSpec {
    pub name: String,
    /// Unexpanded call text as written in the source, e.g. `LOG(x)`.
    pub call: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitDocument {
    pub path: String,
    #[serde(default)]
    pub tokens: Vec<TokenSpec>,
    #[serde(default)]
    pub expansions: Vec<ExpansionSpec>,
    pub entities: Vec<Entity>,
    #[serde(default)]
    pub join_points: Vec<JoinPoint>,
}

impl UnitDocument {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read translation unit {}", path.display()))?;
        Self::from_json(&contents)
            .with_context(|| format!("failed to parse translation unit {}", path.display()))
    }

    pub fn from_json(contents: &str) -> Result<Self> {
        Ok(serde_json::from_str(contents)?)
    }

    /// Build the program model, checking that every span points into the token stream.
    pub fn model(&self) -> Result<ProgramModel> {
        let n = self.tokens.len();
        let spans = self
            .entities
            .iter()
            .filter_map(|e| e.span)
            .chain(self.join_points.iter().filter_map(|jp| jp.span));
        for span in spans {
            if span.first.0 >= n || span.last.0 >= n || span.first > span.last {
                anyhow::bail!(
                    "span {}..{} is outside the token stream of {}",
                    span.first.0,
                    span.last.0,
                    self.path
                );
            }
        }
        ProgramModel::from_parts(self.entities.clone(), self.join_points.clone())
            .with_context(|| format!("invalid program model in {}", self.path))
    }
}
