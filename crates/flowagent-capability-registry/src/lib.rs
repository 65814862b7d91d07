//! Capability registry for flowagent.
//!
//! Maps a step's type tag to a constructor for the matching capability. The
//! table is static and closed: an unknown tag fails with
//! [`RegistryError::UnknownCapabilityType`], and the orchestrator calls
//! [`resolve`] for every step before any step runs.
//!
//! Construction itself goes through a [`CapabilityFactory`], so tests and
//! alternative deployments can swap what gets built without touching the
//! table.

mod error;
mod factory;
mod registry;

pub use error::RegistryError;
pub use factory::{BackendCapabilityFactory, CapabilityFactory};
pub use registry::{CapabilityConstructor, resolve, tags};
