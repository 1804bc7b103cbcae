use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use ephemera_domain::{AzureResource, Layer, LayerName, OutputSet, Vars};
use serde_json::json;
use tracing::debug;

use crate::engine::{CloudProbe, IacEngine};
use crate::error::DriverError;

// ── InMemoryEngine ────────────────────────────────────────────────────────────

/// One recorded engine invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCall {
    Apply { layer: LayerName, vars: Vars },
    Destroy { layer: LayerName, vars: Vars },
}

/// A scripted engine that simulates the IaC tool in memory.
///
/// - Records every apply/destroy with the variables it received.
/// - Serves canned outputs per layer; unscripted layers get a synthetic
///   `id = local://<layer>` output.
/// - Can be programmed to fail a named layer's apply or destroy.
#[derive(Debug, Default)]
pub struct InMemoryEngine {
    outputs: HashMap<LayerName, OutputSet>,
    fail_apply: HashSet<LayerName>,
    fail_destroy: HashSet<LayerName>,
    calls: Mutex<Vec<EngineCall>>,
}

impl InMemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_outputs(mut self, layer: &str, outputs: OutputSet) -> Self {
        self.outputs.insert(LayerName::new(layer), outputs);
        self
    }

    pub fn fail_apply(mut self, layer: &str) -> Self {
        self.fail_apply.insert(LayerName::new(layer));
        self
    }

    pub fn fail_destroy(mut self, layer: &str) -> Self {
        self.fail_destroy.insert(LayerName::new(layer));
        self
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn applies(&self, layer: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, EngineCall::Apply { layer: l, .. } if l.as_str() == layer))
            .count()
    }

    pub fn destroys(&self, layer: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, EngineCall::Destroy { layer: l, .. } if l.as_str() == layer))
            .count()
    }

    fn canned_outputs(&self, layer: &Layer) -> OutputSet {
        self.outputs.get(&layer.name).cloned().unwrap_or_else(|| {
            let mut o = OutputSet::new();
            o.insert("id", json!(format!("local://{}", layer.name)));
            o
        })
    }
}

#[async_trait]
impl IacEngine for InMemoryEngine {
    fn name(&self) -> &'static str {
        "in-memory"
    }

    async fn apply(&self, layer: &Layer, vars: &Vars) -> Result<OutputSet, DriverError> {
        debug!(layer = %layer.name, "InMemoryEngine: apply");
        self.calls.lock().unwrap().push(EngineCall::Apply {
            layer: layer.name.clone(),
            vars: vars.clone(),
        });
        if self.fail_apply.contains(&layer.name) {
            return Err(DriverError::ProvisionFailed(format!(
                "scripted apply failure for '{}'",
                layer.name
            )));
        }
        Ok(self.canned_outputs(layer))
    }

    async fn outputs(&self, layer: &Layer) -> Result<OutputSet, DriverError> {
        Ok(self.canned_outputs(layer))
    }

    async fn destroy(&self, layer: &Layer, vars: &Vars) -> Result<(), DriverError> {
        debug!(layer = %layer.name, "InMemoryEngine: destroy");
        self.calls.lock().unwrap().push(EngineCall::Destroy {
            layer: layer.name.clone(),
            vars: vars.clone(),
        });
        if self.fail_destroy.contains(&layer.name) {
            return Err(DriverError::TeardownFailed(format!(
                "scripted destroy failure for '{}'",
                layer.name
            )));
        }
        Ok(())
    }
}

// ── StaticProbe ───────────────────────────────────────────────────────────────

/// A cloud probe backed by a fixed set of resource names. Anything not
/// listed does not exist.
#[derive(Debug, Default)]
pub struct StaticProbe {
    present: HashSet<String>,
}

impl StaticProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn present(mut self, name: &str) -> Self {
        self.present.insert(name.to_string());
        self
    }
}

#[async_trait]
impl CloudProbe for StaticProbe {
    async fn exists(&self, resource: &AzureResource) -> Result<bool, DriverError> {
        Ok(self.present.contains(resource.name()))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
