// Hive Atoms Layer — pure constants, types, and error definitions.
// Zero side effects, no I/O.
//
// Dependency rule: atoms may only depend on std and external pure crates
// (serde, thiserror, chrono, uuid). Nothing here may import from store/,
// provider/, daemon/, or any other higher layer.

pub mod constants;
pub mod error;
pub mod types;
