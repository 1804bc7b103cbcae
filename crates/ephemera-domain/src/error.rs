use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("unknown IaC tool '{value}' (expected terraform, terragrunt, or tofu)")]
    UnknownTool { value: String },

    #[error("invalid layer name '{name}': {message}")]
    InvalidLayerName { name: String, message: String },
}
