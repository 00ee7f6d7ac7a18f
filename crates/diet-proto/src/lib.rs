//! Message contracts shared between the dispatch service and the consumers
//! bound to its queues. Kept free of broker and HTTP dependencies so the
//! payload shapes can be checked in isolation.

mod parameters;
mod trigger;

pub use parameters::{
    FieldViolation, MAX_FIELD_VALUE, ParameterMessage, ParameterRequest, ValidationError,
};
pub use trigger::TriggerSignal;
