//! Global constants used throughout the FDP kernel.
//!
//! This module contains compile-time constants shared across modules to
//! ensure consistency and avoid magic numbers, following the teacher
//! codebase's `constants.rs` convention.

/// Maximum number of live entity slots the repository can address.
///
/// Determines the size of the entity header chunk directory and every
/// component column's chunk directory.
pub const MAX_ENTITIES: usize = 1_000_000;

/// Byte budget of a single committed chunk, for every column type.
///
/// `CHUNK_CAP` for a given component `T` is derived as
/// `CHUNK_BYTES / size_of::<T>()`; larger components simply get fewer
/// entities per chunk, never a larger chunk.
pub const CHUNK_BYTES: usize = 65_536;

/// Maximum number of distinct component types the registry can track.
///
/// Component type IDs (CIDs) are dense integers in `[0, MAX_COMPONENT_TYPES)`.
pub const MAX_COMPONENT_TYPES: usize = 256;

/// On-disk recording format version. Bumped on incompatible wire changes.
pub const FORMAT_VERSION: u32 = 1;

/// Magic bytes at the start of every FDP recording file.
pub const FORMAT_MAGIC: &[u8; 6] = b"FDPREC";

/// Granularity, in bytes, at which [`crate::ecr::PartDescriptor`] slices a
/// large managed component for partial-delta encoding.
pub const PART_GRANULARITY: usize = 64;

/// How long the async recorder's worker thread parks between checking for
/// a new buffer to flush when idle.
pub const WORKER_PARK_TIMEOUT_MS: u64 = 1;
