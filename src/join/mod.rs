//! Radix-partitioned equi-join on join-key hashes.
//!
//! [`JoinSide::partition`] produces the partition-ordered hash/position arrays
//! and their prefix-sum table; [`EquiJoinProbe`] consumes two of them.

pub mod partition;
pub mod probe;

pub use partition::{JoinSide, PrefixSumTable, RadixBits, MAX_RADIX_BITS};
pub use probe::{verify_exact, EquiJoinProbe, JoinPositions};
