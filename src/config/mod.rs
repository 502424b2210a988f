use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::advice::AdviceKind;

pub const DEFAULT_CONFIG: &str = ".aspectweave.yml";

/// Weaver switches. CLI flags override the file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeaveOptions {
    /// Snap manipulations out of macro expansions instead of rejecting them.
    pub macro_aware: bool,
    /// Weave get/set/ref join points.
    pub data_joinpoints: bool,
    /// Weave builtin operator join points.
    pub builtin_operators: bool,
    /// Allow attribute references in pointcuts.
    pub attributes: bool,
}

impl Default for WeaveOptions {
    fn default() -> Self {
        Self {
            macro_aware: false,
            data_joinpoints: true,
            builtin_operators: false,
            attributes: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamDecl {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeDecl {
    pub name: String,
    /// Qualified namespace the attribute is declared in; empty for global.
    #[serde(default)]
    pub scope: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointcutDecl {
    pub name: String,
    /// Declaring namespace for top-level pointcuts; ignored inside aspects.
    #[serde(default)]
    pub scope: String,
    #[serde(default)]
    pub params: Vec<ParamDecl>,
    /// Missing on pure virtual pointcuts.
    #[serde(default)]
    pub expr: Option<String>,
    #[serde(default, rename = "virtual")]
    pub is_virtual: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdviceDecl {
    pub kind: AdviceKind,
    pub pointcut: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub params: Vec<ParamDecl>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderDecl {
    /// Join points (or classes) the order applies to; all when absent.
    #[serde(default)]
    pub pointcut: Option<String>,
    /// Pointcuts over aspects, highest precedence first.
    pub aspects: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberKind {
    Function,
    Variable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberDecl {
    pub kind: MemberKind,
    pub name: String,
    /// Variable type.
    #[serde(default, rename = "type")]
    pub ty: Option<String>,
    /// Function result type.
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub params: Vec<String>,
    #[serde(default, rename = "static")]
    pub is_static: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntroductionDecl {
    pub pointcut: String,
    /// Class slice text inserted into the target class body.
    #[serde(default)]
    pub slice: String,
    #[serde(default)]
    pub members: Vec<MemberDecl>,
    /// Qualified names of introduced base classes.
    #[serde(default)]
    pub bases: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AspectDecl {
    /// Qualified name of the aspect entity in the program model.
    pub name: String,
    #[serde(default)]
    pub pointcuts: Vec<PointcutDecl>,
    #[serde(default)]
    pub advice: Vec<AdviceDecl>,
    #[serde(default)]
    pub order: Vec<OrderDecl>,
    #[serde(default)]
    pub introductions: Vec<IntroductionDecl>,
}

/// Aspect declarations and weaver options, shared by all translation units.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WeaveConfig {
    pub options: WeaveOptions,
    pub attributes: Vec<AttributeDecl>,
    pub pointcuts: Vec<PointcutDecl>,
    pub aspects: Vec<AspectDecl>,
}

/// Load config from the given path, or look for `.aspectweave.yml` in the
/// current directory. Returns an empty config if the file doesn't exist.
pub fn load_config(path: Option<&Path>) -> Result<WeaveConfig> {
    let config_path = match path {
        Some(p) => p.to_path_buf(),
        None => Path::new(DEFAULT_CONFIG).to_path_buf(),
    };

    if !config_path.exists() {
        return Ok(WeaveConfig::default());
    }

    let contents = std::fs::read_to_string(&config_path)
        .with_context(|| format!("failed to read config {}", config_path.display()))?;
    if contents.trim().is_empty() {
        return Ok(WeaveConfig::default());
    }
    let config: WeaveConfig = serde_yml::from_str(&contents)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(config)
}
