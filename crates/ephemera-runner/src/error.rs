use ephemera_domain::LayerName;
use ephemera_driver::DriverError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("scenario has no layers")]
    EmptyScenario,

    #[error("duplicate layer name '{0}'")]
    DuplicateLayer(LayerName),

    #[error("layer '{layer}' references unknown layer '{reference}'")]
    UnknownReference { layer: LayerName, reference: String },

    #[error("layer '{layer}' references '{reference}', which is applied later")]
    ForwardReference { layer: LayerName, reference: String },

    #[error("layer '{0}' references its own outputs")]
    SelfReference(LayerName),

    #[error("reference cycle in layer dependencies")]
    CycleDetected,

    #[error("multiple validation errors")]
    Multiple(Vec<ValidationError>),
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("invalid scenario: {0}")]
    Validation(#[from] ValidationError),

    #[error("layer '{layer}': unresolved placeholder '{{{{ {reference} }}}}'")]
    Template { layer: LayerName, reference: String },

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error("scenario '{scenario}' {message}")]
    Failed { scenario: String, message: String },
}
