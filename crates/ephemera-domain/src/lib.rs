mod error;
mod naming;
mod phase;
mod types;


pub use error::DomainError;
pub use naming::{clamp_storage_account_name, unique_suffix, STORAGE_ACCOUNT_NAME_MAX};
pub use phase::Phase;
pub use types::{
    AzureResource, Expectation, IacTool, Layer, LayerName, OutputSet, Scenario, Vars,
};
