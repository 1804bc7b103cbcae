mod error;
mod report;
mod run;
mod template;
mod validate;
mod verify;

pub use error::{RunError, ValidationError};
pub use report::{LayerOutcome, LayerStatus, RunEvent, RunOutcome, RunReport};
pub use run::{apply_stack, destroy_stack, run};
pub use validate::validate;
pub use verify::AssertionFailure;
