// SPDX-License-Identifier: Apache-2.0
//! Settings boot: one-shot acquisition of the storage root and bandwidth cap.
//!
//! The values come from an external collaborator (the domain controller's
//! settings document); this module only defines the seam and a JSON-document
//! implementation of it. A missing `asset_server` section is fatal — there
//! is no sensible default storage root to invent.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::Deserialize;
use tracing::info;

/// Settings-document key holding the asset server section.
const ASSET_SERVER_SETTINGS_KEY: &str = "asset_server";

const BITS_PER_MEGABIT: f64 = 1000.0 * 1000.0;

/// Errors surfaced while acquiring settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    /// The settings document has no `asset_server` section.
    #[error("[SETTINGS_NO_SECTION] settings document has no `{ASSET_SERVER_SETTINGS_KEY}` section")]
    MissingSection,
    /// The `assets_path` entry is absent or not a string.
    #[error("[SETTINGS_BAD_ASSETS_PATH] `assets_path` is missing or not a string")]
    BadAssetsPath,
    /// The settings document could not be read.
    #[error("[SETTINGS_READ] failed to read settings: {source}")]
    Read {
        /// The propagated I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The settings document could not be parsed.
    #[error("[SETTINGS_PARSE] failed to parse settings: {source}")]
    Parse {
        /// The propagated parse error.
        #[source]
        source: serde_json::Error,
    },
    /// No platform data directory could be resolved for a relative path.
    #[error("[SETTINGS_NO_DATA_DIR] could not resolve a platform data directory")]
    NoDataDir,
}

/// The settings the core consumes. Nothing else in the document is read.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Storage root, as given (possibly relative).
    pub assets_path: PathBuf,
    /// Optional per-connection bandwidth cap in Mb/s.
    pub max_bandwidth_mbps: Option<f64>,
}

impl Settings {
    /// Bandwidth cap converted to bits per second, when configured and
    /// positive.
    pub fn max_bandwidth_bps(&self) -> Option<u64> {
        self.max_bandwidth_mbps
            .filter(|mbps| *mbps > 0.0)
            .map(|mbps| (mbps * BITS_PER_MEGABIT) as u64)
    }
}

/// Source of the one-shot settings fetch.
pub trait SettingsSource {
    /// Acquire the settings, or fail the boot.
    fn fetch(&self) -> Result<Settings, SettingsError>;
}

#[derive(Debug, Deserialize)]
struct SettingsDoc {
    asset_server: Option<AssetServerSection>,
}

#[derive(Debug, Deserialize)]
struct AssetServerSection {
    assets_path: Option<serde_json::Value>,
    max_bandwidth: Option<f64>,
}

/// Parse a settings document from raw JSON bytes.
pub fn parse_settings(raw: &[u8]) -> Result<Settings, SettingsError> {
    let doc: SettingsDoc =
        serde_json::from_slice(raw).map_err(|e| SettingsError::Parse { source: e })?;
    let section = doc.asset_server.ok_or(SettingsError::MissingSection)?;
    let assets_path = match section.assets_path {
        Some(serde_json::Value::String(path)) if !path.is_empty() => PathBuf::from(path),
        _ => return Err(SettingsError::BadAssetsPath),
    };
    Ok(Settings {
        assets_path,
        max_bandwidth_mbps: section.max_bandwidth,
    })
}

/// Settings source backed by a JSON file on disk.
#[derive(Debug)]
pub struct FileSettingsSource {
    path: PathBuf,
}

impl FileSettingsSource {
    /// Read settings from `path` when fetched.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SettingsSource for FileSettingsSource {
    fn fetch(&self) -> Result<Settings, SettingsError> {
        let raw = std::fs::read(&self.path).map_err(|e| SettingsError::Read { source: e })?;
        let settings = parse_settings(&raw)?;
        info!(path = %self.path.display(), "acquired settings");
        Ok(settings)
    }
}

/// Resolve the storage root: an absolute `assets_path` is used as-is; a
/// relative one lands under the per-user data directory, e.g.
/// `~/.local/share/atrium/assets/<path>`.
pub fn resolve_assets_path(assets_path: &Path) -> Result<PathBuf, SettingsError> {
    if assets_path.is_absolute() {
        return Ok(assets_path.to_path_buf());
    }
    let dirs =
        ProjectDirs::from("world", "atrium", "atrium").ok_or(SettingsError::NoDataDir)?;
    Ok(dirs.data_dir().join("assets").join(assets_path))
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── 1. a complete document parses ────────────────────────────────────

    #[test]
    fn parse_complete_document() {
        let raw = br#"{
            "asset_server": {
                "assets_path": "/srv/atrium/assets",
                "max_bandwidth": 12.5
            },
            "unrelated": { "ignored": true }
        }"#;
        let settings = parse_settings(raw).unwrap();
        assert_eq!(settings.assets_path, PathBuf::from("/srv/atrium/assets"));
        assert_eq!(settings.max_bandwidth_mbps, Some(12.5));
        assert_eq!(settings.max_bandwidth_bps(), Some(12_500_000));
    }

    // ── 2. bandwidth is optional; non-positive values are ignored ────────

    #[test]
    fn bandwidth_optional() {
        let raw = br#"{ "asset_server": { "assets_path": "assets" } }"#;
        let settings = parse_settings(raw).unwrap();
        assert_eq!(settings.max_bandwidth_mbps, None);
        assert_eq!(settings.max_bandwidth_bps(), None);

        let raw = br#"{ "asset_server": { "assets_path": "assets", "max_bandwidth": -1 } }"#;
        assert_eq!(parse_settings(raw).unwrap().max_bandwidth_bps(), None);
    }

    // ── 3. missing section or bad path are fatal ─────────────────────────

    #[test]
    fn missing_section_is_fatal() {
        assert!(matches!(
            parse_settings(br#"{ "audio": {} }"#),
            Err(SettingsError::MissingSection)
        ));
        assert!(matches!(
            parse_settings(br#"{ "asset_server": {} }"#),
            Err(SettingsError::BadAssetsPath)
        ));
        assert!(matches!(
            parse_settings(br#"{ "asset_server": { "assets_path": 7 } }"#),
            Err(SettingsError::BadAssetsPath)
        ));
    }

    // ── 4. absolute paths resolve as-is ──────────────────────────────────

    #[test]
    fn absolute_path_passthrough() {
        let path = Path::new("/var/lib/atrium");
        assert_eq!(resolve_assets_path(path).unwrap(), path);
    }

    // ── 5. relative paths land under the data dir ────────────────────────

    #[test]
    fn relative_path_resolution() {
        let resolved = resolve_assets_path(Path::new("main")).unwrap();
        assert!(resolved.is_absolute());
        assert!(resolved.ends_with("assets/main"));
    }
}
