//! CSV ad report.
//!
//! Columns: `Date,Page,Section,Advertiser,Description,Size,Location,Confidence`.
//! Fields containing a comma, quote, or line break are quoted with inner quotes
//! doubled (RFC 4180). Descriptions are cut to 200 characters.

use crate::models::DetectedAd;
use std::io;
use std::path::Path;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{info, instrument};

pub const HEADER: [&str; 8] = [
    "Date",
    "Page",
    "Section",
    "Advertiser",
    "Description",
    "Size",
    "Location",
    "Confidence",
];
const DESCRIPTION_MAX_CHARS: usize = 200;

fn field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn line(fields: &[&str]) -> String {
    let mut out = fields.iter().map(|f| field(f)).collect::<Vec<_>>().join(",");
    out.push_str("\r\n");
    out
}

/// One report row. `date` fills the Date column when the ad carries none.
pub fn ad_row(ad: &DetectedAd, date: &str) -> String {
    let date = ad.date.map(|d| d.to_string()).unwrap_or_else(|| date.to_string());
    let description: String = ad.description.chars().take(DESCRIPTION_MAX_CHARS).collect();
    line(&[
        &date,
        &ad.page.to_string(),
        &ad.section,
        &ad.advertiser,
        &description,
        &ad.size,
        &ad.location,
        &ad.confidence,
    ])
}

/// Render a full report with header.
pub fn to_csv(ads: &[DetectedAd], date: &str) -> String {
    let mut out = line(&HEADER);
    for ad in ads {
        out.push_str(&ad_row(ad, date));
    }
    out
}

/// Append `ads` to the report at `path`, writing the header first if the file is new.
#[instrument(level = "info", skip_all, fields(path = %path.display(), count = ads.len()))]
pub async fn append_csv(path: &Path, ads: &[DetectedAd], date: &str) -> io::Result<()> {
    let is_new = !fs::try_exists(path).await?;
    let mut body = if is_new { line(&HEADER) } else { String::new() };
    for ad in ads {
        body.push_str(&ad_row(ad, date));
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(body.as_bytes()).await?;
    file.flush().await?;
    info!("Appended ads to report");
    Ok(())
}

/// Replace the report at `path` with `ads`. Each ad's own date fills the Date column.
#[instrument(level = "info", skip_all, fields(path = %path.display(), count = ads.len()))]
pub async fn write_csv(path: &Path, ads: &[DetectedAd]) -> io::Result<()> {
    fs::write(path, to_csv(ads, "")).await?;
    info!("Wrote report");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ad(advertiser: &str, description: &str) -> DetectedAd {
        DetectedAd {
            page: 3,
            section: "Sports".to_string(),
            advertiser: advertiser.to_string(),
            description: description.to_string(),
            size: "quarter page".to_string(),
            location: "bottom left".to_string(),
            confidence: "high".to_string(),
            date: None,
        }
    }

    #[test]
    fn test_quoting() {
        let row = ad_row(&ad("Smith, Jones & Co", "The \"best\" deal"), "2026-02-27");
        assert_eq!(
            row,
            "2026-02-27,3,Sports,\"Smith, Jones & Co\",\"The \"\"best\"\" deal\",quarter page,bottom left,high\r\n"
        );
    }

    #[test]
    fn test_description_cut_to_200_chars() {
        let long = "é".repeat(250);
        let row = ad_row(&ad("Acme", &long), "2026-02-27");
        assert!(row.contains(&"é".repeat(200)));
        assert!(!row.contains(&"é".repeat(201)));
    }

    #[test]
    fn test_ad_date_wins_over_default() {
        let mut dated = ad("Acme", "Sale");
        dated.date = NaiveDate::from_ymd_opt(2026, 2, 26);
        assert!(ad_row(&dated, "2026-02-27").starts_with("2026-02-26,"));
    }

    #[tokio::test]
    async fn test_append_writes_header_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.csv");

        append_csv(&path, &[ad("Acme", "Sale")], "2026-02-26").await.unwrap();
        append_csv(&path, &[ad("Bolt", "Tools")], "2026-02-27").await.unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "Date,Page,Section,Advertiser,Description,Size,Location,Confidence");
        assert!(lines[2].starts_with("2026-02-27,3,Sports,Bolt"));
    }

    #[tokio::test]
    async fn test_write_replaces_existing_report() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.csv");
        std::fs::write(&path, "stale\n").unwrap();

        let mut dated = ad("Acme", "Sale");
        dated.date = NaiveDate::from_ymd_opt(2026, 2, 27);
        write_csv(&path, &[dated]).await.unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(!text.contains("stale"));
        assert!(text.lines().nth(1).unwrap().starts_with("2026-02-27,"));
    }
}
