//! Wire-level definitions of the catalog API.
pub mod types;
