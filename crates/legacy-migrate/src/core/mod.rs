//! Core data types shared across the engine and drivers.

mod row;
mod value;

pub use row::{Batch, SourceRow};
pub use value::{SqlNullType, SqlValue};
