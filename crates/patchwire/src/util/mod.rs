//! Utility types.

pub mod sync;

pub use sync::{Eventual, Promise, join_all};
