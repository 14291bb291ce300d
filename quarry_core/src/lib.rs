//! quarry_core - shared vocabulary of the quarry workspace
//!
//! Holds the canonical value types every runner maps into, the data model
//! the dispatcher and cache pass around, result fingerprints and the
//! parameterized query processor.

pub mod error;
pub mod fingerprint;
pub mod params;
pub mod types;

pub use error::ParameterError;
pub use fingerprint::Fingerprint;
pub use params::{
    DropdownOption, DropdownResolver, MultiValueOptions, ParameterDefinition, ParameterKind,
    ParameterizedQuery,
};
pub use types::*;
