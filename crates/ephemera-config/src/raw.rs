use std::collections::HashMap;

use serde::Deserialize;

/// Raw YAML representation of a stack file.
#[derive(Debug, Deserialize)]
pub struct RawStack {
    pub name: String,
    #[serde(default)]
    pub layers: Vec<RawLayer>,
}

#[derive(Debug, Deserialize)]
pub struct RawLayer {
    pub name: String,
    /// Module directory, relative to the stack file.
    pub dir: String,
    /// "terraform" (default), "terragrunt", or "tofu".
    pub tool: Option<String>,
    #[serde(default)]
    pub vars: HashMap<String, serde_yaml::Value>,
    #[serde(default)]
    pub expect: Vec<RawExpectation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RawExpectation {
    /// `output_equals: { key: name, value: rg-test-{{ suffix }} }`
    OutputEquals { key: String, value: serde_yaml::Value },
    /// `output_not_empty: vnet_id`
    OutputNotEmpty(String),
    /// `output_contains_key: { key: subnet_ids, entry: test-subnet }`
    OutputContainsKey { key: String, entry: String },
    /// `exists: { virtual_network: ..., resource_group: ... }`
    Exists(RawResource),
}

/// Existence-check target. Exactly one of the typed name fields must be
/// set; `resource_group` alone targets the resource group itself, and
/// otherwise scopes the named resource.
#[derive(Debug, Deserialize)]
pub struct RawResource {
    pub resource_group: Option<String>,
    pub virtual_network: Option<String>,
    pub storage_account: Option<String>,
    pub key_vault: Option<String>,
}
