//! Turning a decoded request into one executable procedure call.

mod builder;
mod executor;
mod request;

pub use builder::{CallBuilder, PlannedBind, PlannedCall};
pub use executor::execute_call;
pub use request::{CallRequest, NAME_ARRAY, VALUE_ARRAY};
