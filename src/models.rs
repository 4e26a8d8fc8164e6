//! Data models for papers, editions, pages, ads, and advertisers.
//!
//! This module defines the row types shared by the store adapters, the
//! aggregation layer, and the ingestion pipeline:
//! - [`Paper`], [`Edition`], [`Page`], [`Ad`]: the scraped publication hierarchy
//! - [`Advertiser`], [`AdvertiserPaper`]: canonical advertisers and their per-paper aggregates
//! - [`AdInfo`], [`DetectedAd`], [`PageMapEntry`]: ingestion-side records written to disk
//!
//! Field names match the column names in `sql/schema.sql` so rows deserialize
//! directly from PostgREST responses.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A newspaper publication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paper {
    pub id: i64,
    /// Unique short identifier used in addresses, e.g. `ajc`.
    pub slug: String,
    /// Display name, e.g. "Atlanta Journal-Constitution".
    pub name: String,
}

/// One dated issue of a paper.
///
/// `page_count` and `ad_count` are caches maintained by the ingestion run.
/// Views that recompute counts from child rows expose both numbers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edition {
    pub id: i64,
    pub paper_id: i64,
    pub date: NaiveDate,
    #[serde(default)]
    pub page_count: i64,
    #[serde(default)]
    pub ad_count: i64,
}

/// One scanned page within an edition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub id: i64,
    pub edition_id: i64,
    pub page_num: i32,
    #[serde(default)]
    pub section: Option<String>,
    /// Storage object path of the page image, relative to the bucket.
    #[serde(default)]
    pub image_path: Option<String>,
}

/// One detected advertisement on a page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ad {
    pub id: i64,
    pub page_id: i64,
    /// Advertiser name exactly as the vision model reported it.
    pub advertiser: String,
    /// Canonical advertiser, when the name has been resolved.
    #[serde(default)]
    pub advertiser_id: Option<i64>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub size: String,
    #[serde(default = "default_confidence")]
    pub confidence: String,
    pub created_at: DateTime<Utc>,
}

/// A deduplicated advertiser identity aggregated across papers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Advertiser {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub first_seen: Option<DateTime<Utc>>,
    #[serde(default)]
    pub paper_count: i64,
    #[serde(default)]
    pub total_ad_count: i64,
}

/// Per-paper aggregate for one advertiser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvertiserPaper {
    pub id: i64,
    pub advertiser_id: i64,
    pub paper_id: i64,
    #[serde(default)]
    pub ad_count: i64,
    #[serde(default)]
    pub first_seen: Option<NaiveDate>,
    #[serde(default)]
    pub last_seen: Option<NaiveDate>,
}

/// Column values for an ad row about to be inserted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewAd {
    pub advertiser: String,
    pub description: String,
    pub location: String,
    pub size: String,
    pub confidence: String,
}

/// Recomputed aggregate written back to `advertiser_papers`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdvertiserPaperCounts {
    pub advertiser_id: i64,
    pub paper_id: i64,
    pub ad_count: i64,
    pub first_seen: NaiveDate,
    pub last_seen: NaiveDate,
}

/// Information about a single advertisement found by the vision model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdInfo {
    pub advertiser: String,
    pub description: String,
    /// Position on the page, e.g. "top right".
    pub location: String,
    /// Size label, e.g. "quarter page".
    pub size: String,
    /// "high", "medium", or "low".
    pub confidence: String,
}

/// An [`AdInfo`] placed on a page of an edition, as written to `all_ads.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectedAd {
    pub page: i32,
    pub section: String,
    pub advertiser: String,
    pub description: String,
    pub size: String,
    pub location: String,
    pub confidence: String,
    /// Edition date, filled in when ads from several dates are merged into one report.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
}

impl DetectedAd {
    pub fn new(page: i32, section: &str, info: AdInfo) -> Self {
        Self {
            page,
            section: section.to_string(),
            advertiser: info.advertiser,
            description: info.description,
            size: info.size,
            location: info.location,
            confidence: info.confidence,
            date: None,
        }
    }

    pub fn to_new_ad(&self) -> NewAd {
        NewAd {
            advertiser: self.advertiser.clone(),
            description: self.description.clone(),
            location: self.location.clone(),
            size: self.size.clone(),
            confidence: self.confidence.clone(),
        }
    }
}

/// One entry of an edition's `page_map.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageMapEntry {
    pub page_num: i32,
    pub section: String,
    /// PDF basename without extension (published editions only).
    #[serde(default)]
    pub hash: String,
    #[serde(default)]
    pub pdf_name: String,
}

fn default_confidence() -> String {
    "medium".to_string()
}

/// Rank a confidence label so that `low < medium < high < anything else`.
pub fn confidence_rank(label: &str) -> u8 {
    match label.trim().to_ascii_lowercase().as_str() {
        "low" => 0,
        "medium" => 1,
        "high" => 2,
        _ => 3,
    }
}

/// Compare two confidence labels by rank, then lexically.
pub fn compare_confidence(a: &str, b: &str) -> Ordering {
    confidence_rank(a)
        .cmp(&confidence_rank(b))
        .then_with(|| a.cmp(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ad_deserializes_postgrest_row() {
        let json = r#"{
            "id": 7,
            "page_id": 3,
            "advertiser": "Acme Co",
            "advertiser_id": null,
            "description": "Spring sale",
            "location": "top right",
            "size": "half page",
            "confidence": "high",
            "created_at": "2026-02-27T14:03:11.52+00:00"
        }"#;

        let ad: Ad = serde_json::from_str(json).unwrap();
        assert_eq!(ad.advertiser, "Acme Co");
        assert_eq!(ad.advertiser_id, None);
        assert_eq!(ad.size, "half page");
    }

    #[test]
    fn test_ad_confidence_defaults_to_medium() {
        let json = r#"{
            "id": 1,
            "page_id": 1,
            "advertiser": "Acme Co",
            "created_at": "2026-02-27T00:00:00Z"
        }"#;

        let ad: Ad = serde_json::from_str(json).unwrap();
        assert_eq!(ad.confidence, "medium");
        assert_eq!(ad.description, "");
    }

    #[test]
    fn test_edition_date_parses() {
        let json = r#"{"id": 1, "paper_id": 2, "date": "2026-02-27", "page_count": 2, "ad_count": 1}"#;
        let edition: Edition = serde_json::from_str(json).unwrap();
        assert_eq!(edition.date, NaiveDate::from_ymd_opt(2026, 2, 27).unwrap());
        assert_eq!(edition.page_count, 2);
    }

    #[test]
    fn test_detected_ad_omits_missing_date() {
        let ad = DetectedAd::new(
            4,
            "Sports",
            AdInfo {
                advertiser: "Acme Co".to_string(),
                description: "Tires".to_string(),
                location: "bottom".to_string(),
                size: "banner".to_string(),
                confidence: "low".to_string(),
            },
        );

        let json = serde_json::to_string(&ad).unwrap();
        assert!(!json.contains("date"));
        assert!(json.contains("\"page\":4"));
    }

    #[test]
    fn test_confidence_ordering() {
        assert_eq!(compare_confidence("low", "high"), Ordering::Less);
        assert_eq!(compare_confidence("High", "medium"), Ordering::Greater);
        assert_eq!(compare_confidence("unsure", "high"), Ordering::Greater);
        assert_eq!(compare_confidence("medium", "medium"), Ordering::Equal);
    }
}
