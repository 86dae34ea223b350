#![deny(missing_docs)]
#![doc = "Shared error taxonomy, seeding policy and canonical serialization for surfkin."]

pub mod errors;
/// Canonical hashing helpers.
pub mod hash;
pub mod provenance;
pub mod rng;
/// Canonical JSON and YAML helpers.
pub mod serde;

pub use errors::{ErrorInfo, KinError};
pub use hash::stable_hash_string;
pub use provenance::{RunProvenance, SchemaVersion};
pub use rng::{derive_substream_seed, replica_seed, RngHandle, REPLICA_SEED_STRIDE};
