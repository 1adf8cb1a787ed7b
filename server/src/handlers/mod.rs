//! Request handlers for the merge service.

mod sync;

pub use sync::*;
