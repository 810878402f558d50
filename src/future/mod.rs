//! Deferred results.
//!
//! Every submitted task gets a [`ResultHandle`] that moves through
//! `Pending -> Running -> {Completed, Failed, Cancelled}`. Terminal states
//! are final. Handles can be waited on from any number of threads and can
//! be chained into new handles with `then_apply` and friends.

pub mod handle;
pub mod token;

pub use handle::{ResultHandle, TaskState};
pub use token::CancellationToken;
