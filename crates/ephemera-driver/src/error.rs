use thiserror::Error;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("provisioning failed: {0}")]
    ProvisionFailed(String),

    #[error("teardown failed: {0}")]
    TeardownFailed(String),

    #[error("cloud read failed: {0}")]
    ReadFailed(String),

    #[error("internal driver error: {0}")]
    Internal(String),
}
