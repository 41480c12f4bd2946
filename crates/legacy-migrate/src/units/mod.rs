//! Per-entity migration units.
//!
//! Each file holds one entity's mapping glue: the SELECT/INSERT statements,
//! the transform notes, and the row transform. The build ships the two
//! representative masters; further entities register the same way.

mod company;
mod material_group;

pub use company::CompanyMasterUnit;
pub use material_group::MaterialGroupUnit;
