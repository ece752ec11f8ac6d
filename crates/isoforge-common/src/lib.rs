//! Checksums, endian-aware number types, and ISO 9660 character sets shared
//! by the `isoforge` image-emission engine.

/// Algorithms (checksums).
pub mod alg;
/// Strings and character sets.
pub mod str;
/// Endian-aware primitive types.
pub mod types;
