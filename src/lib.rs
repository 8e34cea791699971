//! Business what-if scenarios: derive optimistic and pessimistic projections from a
//! base case, persist named calculator states and move them in and out of files.

pub mod api;
pub mod core;
pub mod error;
pub mod format;
pub mod store;
pub mod transfer;
