//! Identifiers for routes, triggers and completion records.
//!
//! All three are UUID newtypes with the same shape as
//! [`raceline_env::ActorId`]: random by default, deterministic from a seed
//! for simulation, and a short display form for logs.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Creates a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Creates a deterministic identifier from a seed (for simulation).
            pub fn from_seed(seed: u64) -> Self {
                let mut bytes = [0u8; 16];
                bytes[0..8].copy_from_slice(&seed.to_le_bytes());
                bytes[8..16].copy_from_slice(&seed.wrapping_mul(0x9e3779b97f4a7c15).to_le_bytes());
                Self(Uuid::from_bytes(bytes))
            }

            /// Raw bytes, used as storage keys.
            pub fn as_bytes(&self) -> &[u8; 16] {
                self.0.as_bytes()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", &self.0.to_string()[..8])
            }
        }
    };
}

uuid_id!(
    /// Identifies a race route.
    RouteId
);

uuid_id!(
    /// Identifies a trigger within a route.
    TriggerId
);

uuid_id!(
    /// Identifies a completion record.
    RecordId
);
