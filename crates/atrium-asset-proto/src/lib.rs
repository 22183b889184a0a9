// SPDX-License-Identifier: Apache-2.0
//! Wire schema for the Atrium asset plane.
//!
//! This crate is the shared vocabulary between the asset service and its
//! clients: the path rules, the reserved baked namespace, the wire error
//! taxonomy, and bit-exact little-endian encoders/decoders for every message
//! kind. The reliable transport underneath (framing, retransmit, flow
//! control, sender attestation) is out of scope; this crate only defines the payload
//! bytes that ride on it plus a minimal `kind + length` frame helper for
//! stream transports.
//!
//! # Layout Stability
//!
//! Payload layouts are normative and little-endian. Strings are
//! `u32 length + UTF-8 bytes` with no terminator. Hashes travel as raw
//! 32-byte SHA-256 digests, never hex. Any change here is a wire break and
//! needs a protocol version bump, not a patch.

pub use atrium_cas::{AssetHash, SHA256_HASH_HEX_LENGTH, SHA256_HASH_LENGTH};

mod messages;
pub mod wire;

pub use messages::{
    AssetGet, AssetGetInfo, AssetGetInfoReply, AssetGetReply, AssetUpload, AssetUploadReply,
    MappingEntry, MappingOp, MappingOperation, MappingOperationReply, MappingReplyBody,
    MessageKind, Request,
};


/// Upload size cap in bytes (1 GB). Uploads above this are rejected with
/// [`ErrorCode::AssetTooLarge`] before any hashing happens.
pub const MAX_UPLOAD_SIZE: u64 = 1000 * 1000 * 1000;

/// Reserved namespace prefix for baked derivative mappings.
///
/// Client-initiated mapping operations may not create, rename, or delete
/// entries under this prefix; only the bake commit path writes here.
pub const BAKED_NAMESPACE: &str = "/.baked/";

/// Canonical artifact name for the primary output of a model bake.
pub const BAKED_MODEL_SIMPLE_NAME: &str = "asset.fbx";

/// Canonical artifact name for the output of a texture bake.
pub const BAKED_TEXTURE_SIMPLE_NAME: &str = "texture.ktx";

/// Name of the meta record mapped under a source hash's baked folder.
pub const BAKED_META_NAME: &str = "meta.json";

/// Wire error taxonomy, one byte on the wire.
///
/// `NoError` is a legitimate wire value (it prefixes every successful reply),
/// so this is a status enum rather than a Rust error type.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Success.
    NoError = 0,
    /// No content file exists for the requested hash.
    AssetNotFound = 1,
    /// Byte range cannot be satisfied against the file size.
    InvalidByteRange = 2,
    /// Upload exceeds the configured size cap.
    AssetTooLarge = 3,
    /// Sender lacks the write capability required for a mutating operation.
    PermissionDenied = 4,
    /// Mapping validation failed or persistence could not commit.
    MappingOperationFailed = 5,
    /// Content store write failed.
    FileOperationFailed = 6,
}

impl ErrorCode {
    /// Decode from the wire byte.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::NoError),
            1 => Some(Self::AssetNotFound),
            2 => Some(Self::InvalidByteRange),
            3 => Some(Self::AssetTooLarge),
            4 => Some(Self::PermissionDenied),
            5 => Some(Self::MappingOperationFailed),
            6 => Some(Self::FileOperationFailed),
            _ => None,
        }
    }

    /// Stable identifier for logs and error messages.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoError => "NoError",
            Self::AssetNotFound => "AssetNotFound",
            Self::InvalidByteRange => "InvalidByteRange",
            Self::AssetTooLarge => "AssetTooLarge",
            Self::PermissionDenied => "PermissionDenied",
            Self::MappingOperationFailed => "MappingOperationFailed",
            Self::FileOperationFailed => "FileOperationFailed",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mapping operation discriminant, one byte on the wire.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingOpKind {
    /// Look up a single path.
    Get = 0,
    /// Enumerate every mapping.
    GetAll = 1,
    /// Bind a path to a hash.
    Set = 2,
    /// Remove one or more paths (folder paths remove a subtree).
    Delete = 3,
    /// Rename a file or a folder subtree.
    Rename = 4,
}

impl MappingOpKind {
    /// Decode from the wire byte.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Get),
            1 => Some(Self::GetAll),
            2 => Some(Self::Set),
            3 => Some(Self::Delete),
            4 => Some(Self::Rename),
            _ => None,
        }
    }
}

/// Bake progress reported per entry in a GetAll reply.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BakingStatus {
    /// No derivative exists and none is in flight.
    NotBaked = 0,
    /// A bake job is queued for the source hash.
    Pending = 1,
    /// The bake worker is currently executing the job.
    Baking = 2,
    /// A baked derivative mapping exists.
    Baked = 3,
}

impl BakingStatus {
    /// Decode from the wire byte.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::NotBaked),
            1 => Some(Self::Pending),
            2 => Some(Self::Baking),
            3 => Some(Self::Baked),
            _ => None,
        }
    }
}

/// True if `path` names a folder (trailing slash).
pub fn path_is_folder(path: &str) -> bool {
    path.ends_with('/')
}

/// True if `path` is under the reserved baked namespace.
pub fn is_baked_path(path: &str) -> bool {
    path.starts_with(BAKED_NAMESPACE)
}

/// Validate a general asset path: leading `/`, one or more non-empty
/// segments, no NUL bytes. A trailing slash is allowed (folder form).
pub fn is_valid_path(path: &str) -> bool {
    if !path.starts_with('/') || path.contains('\0') {
        return false;
    }
    let trimmed = path.strip_suffix('/').unwrap_or(path);
    let mut segments = trimmed.split('/');
    // First split item is the empty string before the leading slash.
    let _ = segments.next();
    let mut seen_any = false;
    for segment in segments {
        if segment.is_empty() {
            return false;
        }
        seen_any = true;
    }
    seen_any
}

/// Validate a file path: a valid path with no trailing slash.
pub fn is_valid_file_path(path: &str) -> bool {
    !path_is_folder(path) && is_valid_path(path)
}

/// Mapping path of a baked artifact for `hash`, e.g.
/// `/.baked/<hash>/asset.fbx`.
pub fn baked_artifact_path(hash: &AssetHash, artifact: &str) -> String {
    format!("{BAKED_NAMESPACE}{hash}/{artifact}")
}

/// Mapping path of the meta record for `hash`.
pub fn baked_meta_path(hash: &AssetHash) -> String {
    baked_artifact_path(hash, BAKED_META_NAME)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    // ── 1. file path validation accepts canonical shapes ─────────────────

    #[test]
    fn file_path_validation_accepts() {
        assert!(is_valid_file_path("/foo"));
        assert!(is_valid_file_path("/foo/bar.baz"));
        assert!(is_valid_file_path("/a/b/c/d"));
        assert!(is_valid_file_path("/.baked/abc/meta.json"));
    }

    // ── 2. file path validation rejects malformed shapes ─────────────────

    #[test]
    fn file_path_validation_rejects() {
        assert!(!is_valid_file_path(""));
        assert!(!is_valid_file_path("foo"));
        assert!(!is_valid_file_path("/"));
        assert!(!is_valid_file_path("/foo/"));
        assert!(!is_valid_file_path("/foo//bar"));
        assert!(!is_valid_file_path("//"));
        assert!(!is_valid_file_path("/fo\0o"));
    }

    // ── 3. general path validation allows the folder form ────────────────

    #[test]
    fn path_validation_folder_form() {
        assert!(is_valid_path("/foo/"));
        assert!(is_valid_path("/foo/bar/"));
        assert!(is_valid_path("/foo"));
        assert!(!is_valid_path("/"));
        assert!(!is_valid_path("/foo//"));
        assert!(!is_valid_path("foo/"));
    }

    // ── 4. error codes round-trip through their wire byte ─────────────────

    #[test]
    fn error_code_round_trip() {
        for code in [
            ErrorCode::NoError,
            ErrorCode::AssetNotFound,
            ErrorCode::InvalidByteRange,
            ErrorCode::AssetTooLarge,
            ErrorCode::PermissionDenied,
            ErrorCode::MappingOperationFailed,
            ErrorCode::FileOperationFailed,
        ] {
            assert_eq!(ErrorCode::from_u8(code as u8), Some(code));
        }
        assert_eq!(ErrorCode::from_u8(7), None);
    }

    // ── 5. baked path helpers compose the reserved namespace ─────────────

    #[test]
    fn baked_path_helpers() {
        let hash = AssetHash([0xab; 32]);
        let artifact = baked_artifact_path(&hash, BAKED_MODEL_SIMPLE_NAME);
        assert!(artifact.starts_with("/.baked/abab"));
        assert!(artifact.ends_with("/asset.fbx"));
        assert!(is_baked_path(&artifact));
        assert!(is_valid_file_path(&artifact));
        assert!(baked_meta_path(&hash).ends_with("/meta.json"));
    }
}
