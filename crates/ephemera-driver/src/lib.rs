pub mod azure;
pub mod engine;
pub mod error;
pub mod local;
pub mod terraform;

pub use azure::{AzureClient, AzureConfig};
pub use engine::{CloudProbe, IacEngine};
pub use error::DriverError;
pub use local::{EngineCall, InMemoryEngine, StaticProbe};
pub use terraform::TerraformCli;
