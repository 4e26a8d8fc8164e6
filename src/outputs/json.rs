//! JSON output: the per-edition ad dump and machine-readable views.
//!
//! # Output Structure
//!
//! Each analyzed edition gets its detected ads next to the page images:
//! ```text
//! {output}/{slug}/{date}/
//! └── all_ads.json    # [{page, section, advertiser, description, size, location, confidence}]
//! ```

use crate::models::DetectedAd;
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{error, info, instrument};

pub const ALL_ADS_FILE: &str = "all_ads.json";

/// Write `ads` to `{edition_dir}/all_ads.json`, replacing any earlier run's file.
#[instrument(level = "info", skip_all, fields(edition_dir = %edition_dir.display(), count = ads.len()))]
pub async fn write_all_ads(edition_dir: &Path, ads: &[DetectedAd]) -> io::Result<PathBuf> {
    let json = serde_json::to_vec_pretty(ads)?;

    if let Err(e) = fs::create_dir_all(edition_dir).await {
        error!(error = %e, "Failed to create edition dir");
        return Err(e);
    }

    let path = edition_dir.join(ALL_ADS_FILE);
    fs::write(&path, json).await?;
    info!(path = %path.display(), "Wrote detected ads");
    Ok(path)
}

/// Read back an `all_ads.json`.
pub async fn read_all_ads(edition_dir: &Path) -> io::Result<Vec<DetectedAd>> {
    let raw = fs::read(edition_dir.join(ALL_ADS_FILE)).await?;
    Ok(serde_json::from_slice(&raw)?)
}

/// Pretty JSON for any view, as printed by `--format json`.
pub fn to_json<T: Serialize + ?Sized>(value: &T) -> serde_json::Result<String> {
    serde_json::to_string_pretty(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ad(page: i32, advertiser: &str) -> DetectedAd {
        DetectedAd {
            page,
            section: "A".to_string(),
            advertiser: advertiser.to_string(),
            description: "Spring sale".to_string(),
            size: "half page".to_string(),
            location: "top".to_string(),
            confidence: "high".to_string(),
            date: None,
        }
    }

    #[tokio::test]
    async fn test_write_all_ads_creates_dir_and_overwrites() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("ajc").join("2026-02-27");

        write_all_ads(&dir, &[ad(1, "Acme"), ad(2, "Bolt")]).await.unwrap();
        let path = write_all_ads(&dir, &[ad(3, "Zephyr")]).await.unwrap();

        assert_eq!(path, dir.join("all_ads.json"));
        let back = read_all_ads(&dir).await.unwrap();
        assert_eq!(back, vec![ad(3, "Zephyr")]);
    }

    #[test]
    fn test_undated_ads_omit_date_field() {
        let json = to_json(&[ad(1, "Acme")]).unwrap();
        assert!(json.contains("\"advertiser\": \"Acme\""));
        assert!(!json.contains("\"date\""));
    }
}
