//! Constants and reserved names for the JFE wire format

/// Reserved top-level property carrying the encryption metadata.
pub const ENCRYPTED_INFO: &str = "_ei";

/// Metadata field holding the compressed path lengths.
///
/// Read directly from untyped `_ei` values; typed access goes through
/// [`EncryptionProperties`](crate::EncryptionProperties).
pub const FIELD_COMPRESSED_PATHS: &str = "_cp";

/// Format version for per-property encryption without compression.
pub const FORMAT_VERSION_MDE: i32 = 3;
/// Format version for per-property encryption with optional compression.
pub const FORMAT_VERSION_MDE_COMPRESSED: i32 = 4;

/// Property that can never be encrypted.
pub const ID_PATH: &str = "/id";

/// Width of every fixed-size value encoding (bool, i64, f64).
pub const FIXED_VALUE_LEN: usize = 8;
