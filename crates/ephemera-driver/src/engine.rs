use async_trait::async_trait;
use ephemera_domain::{AzureResource, Layer, OutputSet, Vars};

use crate::error::DriverError;

/// The external IaC tool, consumed as a black box: apply a module directory
/// with variables, read its outputs, destroy it.
#[async_trait]
pub trait IacEngine: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Bring the layer up. Runs init + apply; on success returns the parsed
    /// output map. Any failure is fatal for the layer — there is no retry.
    async fn apply(&self, layer: &Layer, vars: &Vars) -> Result<OutputSet, DriverError>;

    /// Read the layer's current outputs without modifying anything.
    async fn outputs(&self, layer: &Layer) -> Result<OutputSet, DriverError>;

    /// Tear the layer down with the same variables its apply received.
    async fn destroy(&self, layer: &Layer, vars: &Vars) -> Result<(), DriverError>;
}

/// Read-only existence checks against the cloud provider. Never modifies
/// cloud state; the verification pass is the only caller.
#[async_trait]
pub trait CloudProbe: Send + Sync + 'static {
    async fn exists(&self, resource: &AzureResource) -> Result<bool, DriverError>;
}
