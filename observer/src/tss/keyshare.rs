//! Keyshare files
//!
//! Each key this node holds a share of is stored as `localstate-<pubkey>.json`
//! in the keyshare directory. Several generations coexist across key
//! rotations; the pubkey is read from the file name.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{info, warn};

const KEYSHARE_PREFIX: &str = "localstate";

/// Contents of a keyshare file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keyshare {
    pub pub_key: String,
    /// RFC 3339 creation time
    pub created_at: String,
    /// Opaque share data owned by the keysign backend
    #[serde(default)]
    pub local_data: serde_json::Value,
}

pub fn keyshare_file_name(pubkey: &str) -> String {
    format!("{}-{}.json", KEYSHARE_PREFIX, pubkey)
}

/// Writes a keyshare file for `pubkey` into `dir`.
pub fn write_keyshare(dir: &Path, pubkey: &str, local_data: serde_json::Value) -> std::io::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let keyshare = Keyshare {
        pub_key: pubkey.to_string(),
        created_at: chrono::Utc::now().to_rfc3339(),
        local_data,
    };
    let path = dir.join(keyshare_file_name(pubkey));
    let json = serde_json::to_vec_pretty(&keyshare)?;
    std::fs::write(&path, json)?;
    Ok(path)
}

/// Lists the pubkeys of all keyshare files in `dir`, newest file first.
pub fn load_keyshares_from_directory(dir: &Path) -> std::io::Result<Vec<String>> {
    let mut files: Vec<(SystemTime, String)> = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.starts_with(KEYSHARE_PREFIX) {
            continue;
        }
        let parts: Vec<&str> = name.split('-').collect();
        if parts.len() != 2 {
            warn!("Ignoring malformed keyshare file name {}", name);
            continue;
        }
        let pubkey = parts[1].trim_end_matches(".json").to_string();
        let modified = entry
            .metadata()
            .and_then(|m| m.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        files.push((modified, pubkey));
    }

    files.sort_by(|a, b| b.0.cmp(&a.0));
    info!("found {} localstate files", files.len());
    Ok(files.into_iter().map(|(_, pubkey)| pubkey).collect())
}
