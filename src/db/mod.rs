//! Database module: row mapping and SQL repositories.
//!
//! - `model`: conversion of `actions`/`datasets` rows into domain types.
//! - `repo`: SQL-only functions over a `SqlitePool`.
//!
//! Only `crate::store::ActionStore` calls into this module; everything else
//! goes through the store.

pub(crate) mod model;
pub mod repo;

pub use repo::*;
