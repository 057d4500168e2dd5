//! Persistence Store: single embedded SQLite database per project, with a
//! dedicated writer task and short-lived readers. See [`Store`].

mod schema;
mod store;

pub use store::{Store, StoreError, StoreResult};
