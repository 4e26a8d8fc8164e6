//! Ingestion run: download editions, find their ads, and store the results.
//!
//! A run walks each selected paper through a list of dates:
//!
//! 1. **Download**: an [`EditionSource`] leaves page images and `page_map.json` in the edition dir
//! 2. **Analyze**: each mapped page goes to a [`PageAnalyzer`], a few at a time, in page order
//! 3. **Record**: ads are written to `all_ads.json`
//! 4. **Upload** (optional): pages, images, and ads go to the store, then advertisers are
//!    resolved and their counters recomputed
//!
//! A failure on one date is reported through [`Notifier`] and the run moves on.

use crate::aggregate::batch::{fetch_editions_by_ids, fetch_pages_by_ids, unique_ids};
use crate::analyzer::PageAnalyzer;
use crate::config::PaperConfig;
use crate::imaging::{self, ImagingError};
use crate::models::{AdvertiserPaperCounts, DetectedAd, NewAd, PageMapEntry};
use crate::notify::Notifier;
use crate::outputs::json;
use crate::scrapers::{EditionSource, ScrapeError, list_page_images, page_file_name, page_number};
use crate::store::{AdStore, AdWriter, StoreError};
use chrono::NaiveDate;
use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, error, info, instrument, warn};

/// Pages analyzed at once when no other limit is given.
pub const DEFAULT_CONCURRENCY: usize = 4;
const UNKNOWN_SECTION: &str = "Unknown";

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Scrape(#[from] ScrapeError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Imaging(#[from] ImagingError),

    #[error("filesystem error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid page_map.json: {0}")]
    PageMap(#[from] serde_json::Error),

    #[error("image conversion task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("edition directory {0} is not named by date (YYYY-MM-DD)")]
    UndatedDir(String),
}

/// What an upload wrote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadSummary {
    pub pages: usize,
    pub ads: usize,
    pub advertisers: usize,
}

/// Every date from `start` to `end`, both included. Empty when `end < start`.
pub fn date_range(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    start.iter_days().take_while(|d| *d <= end).collect()
}

/// Read `page_map.json`; a missing file is an empty map.
pub async fn read_page_map(edition_dir: &Path) -> Result<Vec<PageMapEntry>, IngestError> {
    match fs::read(edition_dir.join("page_map.json")).await {
        Ok(raw) => Ok(serde_json::from_slice(&raw)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}

/// Analyze every page listed in the edition's page map that has an image.
///
/// Up to `concurrency` pages are in flight at once; ads come back in page-map
/// order. A page whose analysis fails is logged and contributes no ads.
#[instrument(level = "info", skip_all, fields(edition_dir = %edition_dir.display()))]
pub async fn analyze_edition<A: PageAnalyzer>(
    edition_dir: &Path,
    analyzer: &A,
    clients: &[String],
    concurrency: usize,
) -> Result<Vec<DetectedAd>, IngestError> {
    let page_map = read_page_map(edition_dir).await?;
    if page_map.is_empty() {
        warn!("No page_map.json entries; nothing to analyze");
        return Ok(Vec::new());
    }

    let mut pages = Vec::with_capacity(page_map.len());
    for entry in page_map {
        let image = edition_dir.join(page_file_name(entry.page_num));
        if fs::try_exists(&image).await? {
            pages.push((entry, image));
        } else {
            debug!(page_num = entry.page_num, "No image for mapped page");
        }
    }
    info!(pages = pages.len(), concurrency, "Analyzing pages");

    let per_page: Vec<Vec<DetectedAd>> = stream::iter(pages)
        .map(|(entry, image)| async move {
            info!(page_num = entry.page_num, section = %entry.section, "Analyzing page");
            match analyzer.analyze_page(&image, clients).await {
                Ok(found) => found
                    .into_iter()
                    .map(|info| {
                        info!(page_num = entry.page_num, advertiser = %info.advertiser, size = %info.size, "Found ad");
                        DetectedAd::new(entry.page_num, &entry.section, info)
                    })
                    .collect(),
                Err(e) => {
                    error!(page_num = entry.page_num, error = %e, "Page analysis failed; skipping page");
                    Vec::new()
                }
            }
        })
        .buffered(concurrency.max(1))
        .collect()
        .await;

    Ok(per_page.into_iter().flatten().collect())
}

/// Upload one analyzed edition: page images, page rows, and ads, then advertisers.
///
/// Each page's stored ads are replaced, so re-running an edition leaves no
/// stale rows. Counters are refreshed for every advertiser named in `ads` and
/// for every advertiser whose earlier ads on these pages were replaced.
///
/// # Arguments
///
/// * `store` - Target store
/// * `paper` - Paper the edition belongs to; its slug prefixes the image paths
/// * `date` - Edition date
/// * `edition_dir` - Directory holding `page_NNN.png` and `page_map.json`
/// * `ads` - Ads found in the edition, as returned by [`analyze_edition`]
///
/// # Returns
///
/// An [`UploadSummary`] with the page count, inserted ads, and distinct
/// advertisers named in `ads`.
///
/// # Storage Paths
///
/// Page images are stored at `{slug}/{date}/page_NNN.jpg` in the page image bucket.
#[instrument(level = "info", skip_all, fields(slug = %paper.slug, %date))]
pub async fn upload_edition<S: AdStore + AdWriter>(
    store: &S,
    paper: &PaperConfig,
    date: NaiveDate,
    edition_dir: &Path,
    ads: &[DetectedAd],
) -> Result<UploadSummary, IngestError> {
    info!(paper = %paper.name, "Uploading edition");
    let paper_row = store.upsert_paper(&paper.slug, &paper.name).await?;

    let sections: HashMap<i32, String> = read_page_map(edition_dir)
        .await?
        .into_iter()
        .map(|p| (p.page_num, p.section))
        .collect();
    let images = list_page_images(edition_dir).await?;

    let edition = store
        .upsert_edition(paper_row.id, date, images.len() as i64, ads.len() as i64)
        .await?;

    let mut inserted = Vec::with_capacity(ads.len());
    // advertisers whose earlier ads this upload deletes
    let mut replaced: Vec<i64> = Vec::new();
    for image in images {
        let Some(page_num) = page_number(&image) else {
            continue;
        };
        let section = sections
            .get(&page_num)
            .map(String::as_str)
            .unwrap_or(UNKNOWN_SECTION);
        let storage_path = format!("{}/{}/page_{page_num:03}.jpg", paper.slug, date.format("%Y-%m-%d"));

        let jpeg = tokio::task::spawn_blocking(move || imaging::upload_jpeg(&image)).await??;
        store.upload_page_image(&storage_path, jpeg).await?;
        let page = store
            .upsert_page(edition.id, page_num, section, Some(&storage_path))
            .await?;

        let page_ads: Vec<NewAd> = ads
            .iter()
            .filter(|a| a.page == page_num)
            .map(DetectedAd::to_new_ad)
            .collect();
        let previous = store.list_ads_by_pages(&[page.id]).await?;
        replaced.extend(previous.iter().filter_map(|a| a.advertiser_id));
        let rows = store.replace_ads(page.id, &page_ads).await?;
        debug!(page_num, ads = rows.len(), "Uploaded page");
        inserted.extend(rows);
    }

    let mut by_name: BTreeMap<String, Vec<i64>> = BTreeMap::new();
    for ad in &inserted {
        let name = ad.advertiser.trim();
        if !name.is_empty() {
            by_name.entry(name.to_string()).or_default().push(ad.id);
        }
    }
    let mut advertiser_ids = Vec::with_capacity(by_name.len());
    for (name, ad_ids) in &by_name {
        let advertiser = store.find_or_create_advertiser(name).await?;
        store.link_ads(ad_ids, advertiser.id).await?;
        advertiser_ids.push(advertiser.id);
    }
    let touched: Vec<i64> = advertiser_ids.iter().chain(&replaced).copied().collect();
    refresh_advertiser_counters(store, &touched).await?;

    let summary = UploadSummary {
        pages: edition.page_count as usize,
        ads: inserted.len(),
        advertisers: advertiser_ids.len(),
    };
    info!(
        pages = summary.pages,
        ads = summary.ads,
        advertisers = summary.advertisers,
        "Upload complete"
    );
    Ok(summary)
}

/// Recompute `advertiser_papers` rows and advertiser totals from the linked ads.
///
/// Ads whose page is gone still count toward the total but toward no paper.
/// An `advertiser_papers` row for a paper the advertiser no longer has ads in
/// is deleted; an advertiser with no ads left keeps its row with zero counts.
#[instrument(level = "info", skip_all, fields(advertisers = advertiser_ids.len()))]
pub async fn refresh_advertiser_counters<S: AdStore + AdWriter>(
    store: &S,
    advertiser_ids: &[i64],
) -> Result<(), StoreError> {
    for advertiser_id in unique_ids(advertiser_ids.iter().copied()) {
        let ads = store.list_ads_by_advertiser(advertiser_id).await?;
        let pages = fetch_pages_by_ids(store, &unique_ids(ads.iter().map(|a| a.page_id))).await?;
        let editions =
            fetch_editions_by_ids(store, &unique_ids(pages.iter().map(|p| p.edition_id))).await?;

        let edition_of_page: HashMap<i64, i64> =
            pages.iter().map(|p| (p.id, p.edition_id)).collect();
        let editions: HashMap<i64, (i64, NaiveDate)> = editions
            .iter()
            .map(|e| (e.id, (e.paper_id, e.date)))
            .collect();

        let mut per_paper: BTreeMap<i64, AdvertiserPaperCounts> = BTreeMap::new();
        for ad in &ads {
            let Some((paper_id, date)) = edition_of_page
                .get(&ad.page_id)
                .and_then(|edition_id| editions.get(edition_id))
                .copied()
            else {
                continue;
            };
            per_paper
                .entry(paper_id)
                .and_modify(|c| {
                    c.ad_count += 1;
                    c.first_seen = c.first_seen.min(date);
                    c.last_seen = c.last_seen.max(date);
                })
                .or_insert(AdvertiserPaperCounts {
                    advertiser_id,
                    paper_id,
                    ad_count: 1,
                    first_seen: date,
                    last_seen: date,
                });
        }

        for counts in per_paper.values() {
            store.upsert_advertiser_paper(counts).await?;
        }
        for stale in store
            .list_advertiser_papers(advertiser_id)
            .await?
            .into_iter()
            .filter(|row| !per_paper.contains_key(&row.paper_id))
        {
            store.delete_advertiser_paper(stale.id).await?;
        }
        store
            .update_advertiser_counts(advertiser_id, per_paper.len() as i64, ads.len() as i64)
            .await?;
        debug!(advertiser_id, papers = per_paper.len(), ads = ads.len(), "Refreshed counters");
    }
    Ok(())
}

/// Shared settings for one ingestion run.
#[derive(Debug)]
pub struct Ingest<'a, A, S> {
    pub analyzer: &'a A,
    pub clients: &'a [String],
    pub concurrency: usize,
    /// Upload target; `None` keeps results on disk only.
    pub store: Option<&'a S>,
    pub notifier: &'a Notifier,
}

impl<A, S> Ingest<'_, A, S>
where
    A: PageAnalyzer,
    S: AdStore + AdWriter,
{
    /// Download, analyze, and record one date. No edition yields no ads.
    #[instrument(level = "info", skip_all, fields(slug = %paper.slug, %date))]
    pub async fn process_date<E: EditionSource>(
        &self,
        source: &E,
        paper: &PaperConfig,
        date: NaiveDate,
    ) -> Result<Vec<DetectedAd>, IngestError> {
        info!("Processing date");
        let images = source.page_images(date).await?;
        if images.is_empty() {
            info!("No images for date");
            return Ok(Vec::new());
        }

        let edition_dir = source.edition_dir(date);
        self.record(paper, date, &edition_dir).await
    }

    /// Analyze an already-downloaded edition directory named `YYYY-MM-DD`.
    pub async fn process_dir(
        &self,
        paper: &PaperConfig,
        edition_dir: &Path,
    ) -> Result<(NaiveDate, Vec<DetectedAd>), IngestError> {
        let name = edition_dir
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        let date = NaiveDate::parse_from_str(name, "%Y-%m-%d")
            .map_err(|_| IngestError::UndatedDir(edition_dir.display().to_string()))?;
        let ads = self.record(paper, date, edition_dir).await?;
        Ok((date, ads))
    }

    async fn record(
        &self,
        paper: &PaperConfig,
        date: NaiveDate,
        edition_dir: &Path,
    ) -> Result<Vec<DetectedAd>, IngestError> {
        let ads = analyze_edition(edition_dir, self.analyzer, self.clients, self.concurrency).await?;
        json::write_all_ads(edition_dir, &ads).await?;
        if let Some(store) = self.store {
            upload_edition(store, paper, date, edition_dir, &ads).await?;
        }
        Ok(ads)
    }

    /// Process each date in turn, stamping ads with their date.
    ///
    /// A failing date is reported by email and skipped.
    pub async fn process_dates<E: EditionSource>(
        &self,
        source: &E,
        paper: &PaperConfig,
        dates: &[NaiveDate],
    ) -> Vec<DetectedAd> {
        let mut all_ads = Vec::new();
        for &date in dates {
            match self.process_date(source, paper, date).await {
                Ok(ads) => all_ads.extend(ads.into_iter().map(|mut ad| {
                    ad.date = Some(date);
                    ad
                })),
                Err(e) => {
                    error!(slug = %paper.slug, %date, error = %e, "Error processing date");
                    self.notifier
                        .send_error(
                            &format!("Error processing {} {date}", paper.slug),
                            &e,
                            &format!("Paper: {} ({}), Date: {date}", paper.name, paper.slug),
                        )
                        .await;
                }
            }
        }
        all_ads
    }
}
