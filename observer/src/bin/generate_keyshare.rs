//! Development Keyshare Generator
//!
//! Generates a secp256k1 key for the `local` keysign backend and writes the
//! matching `localstate-<pubkey>.json` keyshare file.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin generate_keyshare -- [keyshare_dir]
//! ```
//!
//! Export the printed secret under the variable named by `tss.local_key_env`
//! and copy the pubkey to `tss.current_pubkey` in `config/observer.toml`.

use anyhow::{Context, Result};
use std::path::PathBuf;

use observer::tss::write_keyshare;
use observer::LocalKeysigner;

fn main() -> Result<()> {
    let dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("keyshares"));

    let signer = LocalKeysigner::generate()?;
    let path = write_keyshare(&dir, signer.pubkey(), serde_json::json!({ "backend": "local" }))
        .with_context(|| format!("Failed to write keyshare into {}", dir.display()))?;

    println!("Generated development TSS key:");
    println!("Secret key (hex): {}", signer.secret_hex());
    println!("Public key (hex, compressed): {}", signer.pubkey());
    println!("Keyshare file: {}", path.display());
    println!();
    println!("Never use this key outside a development network.");
    Ok(())
}
