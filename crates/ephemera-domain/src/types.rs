use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DomainError;

/// Input variables for one layer, as passed to the IaC tool.
/// Values may be strings, booleans, integers, lists, or nested maps.
pub type Vars = serde_json::Map<String, Value>;

// ── Identifiers ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LayerName(pub String);

impl LayerName {
    pub fn new(s: impl Into<String>) -> Self {
        LayerName(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for LayerName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── IaC tool selection ────────────────────────────────────────────────────────

/// Which binary executes a layer. Terragrunt wraps Terraform and accepts the
/// same apply/destroy/output arguments, so the runner treats all three alike.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IacTool {
    Terraform,
    Terragrunt,
    Tofu,
}

impl IacTool {
    pub fn binary(&self) -> &'static str {
        match self {
            IacTool::Terraform => "terraform",
            IacTool::Terragrunt => "terragrunt",
            IacTool::Tofu => "tofu",
        }
    }

    pub fn parse(s: &str) -> Result<Self, DomainError> {
        match s {
            "terraform" => Ok(IacTool::Terraform),
            "terragrunt" => Ok(IacTool::Terragrunt),
            "tofu" | "opentofu" => Ok(IacTool::Tofu),
            other => Err(DomainError::UnknownTool {
                value: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for IacTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.binary())
    }
}

// ── Core structs ──────────────────────────────────────────────────────────────

/// One apply/destroy unit within a scenario: a module directory plus the
/// variables fed to it. String variable values may contain
/// `{{ layer.output }}` placeholders referring to outputs of earlier layers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    pub name: LayerName,
    /// Directory handed to the IaC tool as its working directory.
    pub dir: PathBuf,
    /// Binary override for this layer. None means the engine's default.
    pub tool: Option<IacTool>,
    pub vars: Vars,
    /// Assertions evaluated once the full stack is up.
    pub expect: Vec<Expectation>,
}

impl Layer {
    pub fn new(name: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            name: LayerName::new(name),
            dir: dir.into(),
            tool: None,
            vars: Vars::new(),
            expect: Vec::new(),
        }
    }

    pub fn tool(mut self, tool: IacTool) -> Self {
        self.tool = Some(tool);
        self
    }

    pub fn var(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    pub fn expect(mut self, expectation: Expectation) -> Self {
        self.expect.push(expectation);
        self
    }
}

/// A named test case: an ordered stack of layers plus the per-run suffix
/// that keeps its resource names from colliding with concurrent runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    pub suffix: String,
    pub layers: Vec<Layer>,
}

impl Scenario {
    pub fn new(name: impl Into<String>, suffix: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            suffix: suffix.into(),
            layers: Vec::new(),
        }
    }

    pub fn layer(mut self, layer: Layer) -> Self {
        self.layers.push(layer);
        self
    }

    pub fn get_layer(&self, name: &LayerName) -> Option<&Layer> {
        self.layers.iter().find(|l| &l.name == name)
    }
}

// ── Outputs ───────────────────────────────────────────────────────────────────

/// Key→value results of a successful apply, as parsed from
/// `output -json`. Values keep their JSON shape: the original tool returns
/// strings, maps, and lists and assertions target all three.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OutputSet(serde_json::Map<String, Value>);

impl OutputSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// String view of an output, if it is a string.
    pub fn str_value(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.as_str())
    }

    /// True when the output exists and is neither null, an empty string,
    /// an empty list, nor an empty map.
    pub fn not_empty(&self, key: &str) -> bool {
        match self.0.get(key) {
            None | Some(Value::Null) => false,
            Some(Value::String(s)) => !s.is_empty(),
            Some(Value::Array(a)) => !a.is_empty(),
            Some(Value::Object(m)) => !m.is_empty(),
            Some(_) => true,
        }
    }

    /// True when output `key` is a map containing `entry`.
    pub fn contains_entry(&self, key: &str, entry: &str) -> bool {
        self.0
            .get(key)
            .and_then(|v| v.as_object())
            .map(|m| m.contains_key(entry))
            .unwrap_or(false)
    }

    /// Resolve a dotted path: the first segment is an output key, the rest
    /// descend into nested maps (e.g. `subnet_ids.data`).
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let mut current = self.0.get(segments.next()?)?;
        for seg in segments {
            current = current.as_object()?.get(seg)?;
        }
        Some(current)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, Value)> for OutputSet {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        OutputSet(iter.into_iter().collect())
    }
}

// ── Expectations ──────────────────────────────────────────────────────────────

/// A declarative assertion evaluated after the full stack is applied.
/// Output expectations target the owning layer's [`OutputSet`]; `Exists`
/// queries the cloud provider's read API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expectation {
    OutputEquals { key: String, value: Value },
    OutputNotEmpty { key: String },
    OutputContainsKey { key: String, entry: String },
    Exists { resource: AzureResource },
}

impl std::fmt::Display for Expectation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Expectation::OutputEquals { key, value } => {
                write!(f, "output '{}' == {}", key, value)
            }
            Expectation::OutputNotEmpty { key } => write!(f, "output '{}' not empty", key),
            Expectation::OutputContainsKey { key, entry } => {
                write!(f, "output '{}' contains key '{}'", key, entry)
            }
            Expectation::Exists { resource } => write!(f, "{} exists", resource),
        }
    }
}

// ── Azure resources ───────────────────────────────────────────────────────────

/// Target of an existence check against the cloud provider's read API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AzureResource {
    ResourceGroup {
        name: String,
    },
    VirtualNetwork {
        name: String,
        resource_group: String,
    },
    StorageAccount {
        name: String,
        resource_group: String,
    },
    KeyVault {
        name: String,
        resource_group: String,
    },
}

impl AzureResource {
    pub fn kind(&self) -> &'static str {
        match self {
            AzureResource::ResourceGroup { .. } => "resource group",
            AzureResource::VirtualNetwork { .. } => "virtual network",
            AzureResource::StorageAccount { .. } => "storage account",
            AzureResource::KeyVault { .. } => "key vault",
        }
    }

    pub fn name(&self) -> &str {
        match self {
            AzureResource::ResourceGroup { name }
            | AzureResource::VirtualNetwork { name, .. }
            | AzureResource::StorageAccount { name, .. }
            | AzureResource::KeyVault { name, .. } => name,
        }
    }

    pub fn resource_group(&self) -> Option<&str> {
        match self {
            AzureResource::ResourceGroup { .. } => None,
            AzureResource::VirtualNetwork { resource_group, .. }
            | AzureResource::StorageAccount { resource_group, .. }
            | AzureResource::KeyVault { resource_group, .. } => Some(resource_group),
        }
    }
}

impl std::fmt::Display for AzureResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.resource_group() {
            Some(rg) => write!(f, "{} '{}' in '{}'", self.kind(), self.name(), rg),
            None => write!(f, "{} '{}'", self.kind(), self.name()),
        }
    }
}
