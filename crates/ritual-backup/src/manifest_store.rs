//! Loading and saving the manifest through a storage.

use ritual_core::{Manifest, Result, Storage};
use tracing::{debug, info};

/// Fetches the manifest stored at `key`, or a fresh one if none exists yet.
pub async fn fetch_manifest(storage: &dyn Storage, key: &str) -> Result<Manifest> {
    match storage.get(key).await {
        Ok(bytes) => {
            let json = String::from_utf8_lossy(&bytes);
            let manifest = Manifest::from_json(&json)?;
            debug!("Loaded manifest {} ({} worlds)", key, manifest.worlds.len());
            Ok(manifest)
        }
        Err(e) if e.is_not_found() => {
            info!("No manifest at {}, starting a new one", key);
            Ok(Manifest::new(ritual_core::VERSION))
        }
        Err(e) => Err(e),
    }
}

/// Writes `manifest` to `key`, replacing whatever is there.
pub async fn save_manifest(storage: &dyn Storage, key: &str, manifest: &Manifest) -> Result<()> {
    let json = manifest.to_json()?;
    storage.put(key, json.as_bytes()).await?;
    debug!("Saved manifest {} ({} worlds)", key, manifest.worlds.len());
    Ok(())
}
