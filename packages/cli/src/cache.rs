//! Checksum-based output caching.
//!
//! A `manifest.json` in the output directory records the SHA-256 of every
//! input file and of the effective configuration. An output is rewritten
//! only when one of those changed, it was never recorded, or its file is
//! gone from disk.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use wealth_map_pipeline::PipelineConfig;

/// Current manifest schema version. Bump this when the manifest format
/// changes in a backward-incompatible way.
pub const MANIFEST_VERSION: u32 = 1;

const MANIFEST_FILE: &str = "manifest.json";

/// Content hash of one input file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputFingerprint {
    /// Path as configured.
    pub path: String,
    /// Hex SHA-256 of the contents, `None` when the file does not exist.
    pub sha256: Option<String>,
}

/// Tracks which inputs and configuration produced the current outputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: u32,
    pub inputs: Vec<InputFingerprint>,
    /// Hex SHA-256 of the serialized effective configuration.
    pub config_sha256: String,
    /// Output file name to the RFC 3339 time it was last written.
    pub outputs: BTreeMap<String, String>,
}

impl Manifest {
    /// An empty manifest for the given fingerprints.
    #[must_use]
    pub const fn new(inputs: Vec<InputFingerprint>, config_sha256: String) -> Self {
        Self {
            version: MANIFEST_VERSION,
            inputs,
            config_sha256,
            outputs: BTreeMap::new(),
        }
    }
}

/// Hex SHA-256 of a file's contents.
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub fn sha256_file(path: &Path) -> Result<String, std::io::Error> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Sha256::new();
    std::io::copy(&mut reader, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

/// Fingerprints the boundary file and every configured year file.
///
/// # Errors
///
/// Returns an error if an existing input cannot be read.
pub fn fingerprint_inputs(
    config: &PipelineConfig,
) -> Result<Vec<InputFingerprint>, std::io::Error> {
    std::iter::once(config.communes_path())
        .chain(config.year_paths().into_values())
        .map(|path| {
            let sha256 = if path.exists() {
                Some(sha256_file(&path)?)
            } else {
                None
            };
            Ok(InputFingerprint {
                path: path.display().to_string(),
                sha256,
            })
        })
        .collect()
}

/// Hex SHA-256 of the effective configuration.
///
/// # Errors
///
/// Returns an error if the configuration cannot be serialized.
pub fn config_fingerprint(config: &PipelineConfig) -> Result<String, serde_json::Error> {
    let bytes = serde_json::to_vec(config)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

/// Loads the manifest from `dir/manifest.json`.
///
/// Returns `None` if the file does not exist or cannot be parsed.
#[must_use]
pub fn load_manifest(dir: &Path) -> Option<Manifest> {
    let path = dir.join(MANIFEST_FILE);
    let Ok(contents) = std::fs::read_to_string(&path) else {
        log::info!("No existing manifest found");
        return None;
    };
    match serde_json::from_str(&contents) {
        Ok(m) => {
            log::info!("Loaded manifest from {}", path.display());
            Some(m)
        }
        Err(e) => {
            log::warn!("Failed to parse manifest {}: {e}", path.display());
            None
        }
    }
}

/// Writes the manifest to `dir/manifest.json` through a temporary file and
/// a rename.
///
/// # Errors
///
/// Returns an error if the file cannot be written.
pub fn save_manifest(dir: &Path, manifest: &Manifest) -> Result<(), Box<dyn std::error::Error>> {
    let path = dir.join(MANIFEST_FILE);
    let tmp_path = dir.join(format!("{MANIFEST_FILE}.tmp"));
    let contents = serde_json::to_string_pretty(manifest)?;
    std::fs::write(&tmp_path, contents)?;
    std::fs::rename(&tmp_path, &path)?;
    log::info!("Saved manifest to {}", path.display());
    Ok(())
}

/// Records a successful write of `output_name`.
pub fn record_output(manifest: &mut Manifest, output_name: &str) {
    manifest
        .outputs
        .insert(output_name.to_string(), chrono::Utc::now().to_rfc3339());
}

/// Whether `output_name` must be rewritten.
///
/// True if `force` is set, there is no manifest, its version differs, any
/// input or the configuration changed, the output was never recorded, or
/// its file is missing.
#[must_use]
pub fn output_needs_regen(
    manifest: Option<&Manifest>,
    inputs: &[InputFingerprint],
    config_sha256: &str,
    output_name: &str,
    output_path: &Path,
    force: bool,
) -> bool {
    if force {
        return true;
    }

    let Some(m) = manifest else {
        return true;
    };

    if m.version != MANIFEST_VERSION {
        return true;
    }

    if m.inputs != inputs {
        log::info!("Input files changed since the last run");
        return true;
    }

    if m.config_sha256 != config_sha256 {
        log::info!("Configuration changed since the last run");
        return true;
    }

    if !m.outputs.contains_key(output_name) {
        return true;
    }

    if !output_path.exists() {
        log::info!(
            "{output_name} recorded in manifest but missing at {}",
            output_path.display()
        );
        return true;
    }

    false
}
