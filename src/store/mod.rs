//! Access to the relational store holding papers, editions, pages, ads, and advertisers.
//!
//! The store is split along the same line as its users:
//!
//! - [`AdStore`]: the read surface used by the aggregation layer
//! - [`AdWriter`]: the write surface used by the ingestion run
//!
//! # Implementations
//!
//! | Type | Backing | Used by |
//! |------|---------|---------|
//! | [`SupabaseStore`] | PostgREST + Storage over HTTPS | the CLI against a live project |
//! | [`MemoryStore`] | in-process tables, loadable from a JSON snapshot | `--snapshot` runs and tests |
//!
//! # Request limits
//!
//! Id-list queries (`id=in.(...)`) are capped by the adapter at
//! [`AdStore::max_ids_per_request`]. Callers never send more ids than that in a
//! single call; see [`crate::aggregate::batch`].

use crate::models::{
    Ad, Advertiser, AdvertiserPaper, AdvertiserPaperCounts, Edition, NewAd, Page, Paper,
};
use chrono::NaiveDate;
use thiserror::Error;

pub mod memory;
pub mod supabase;

pub use memory::MemoryStore;
pub use supabase::SupabaseStore;

/// Largest id list the hosted store accepts in one `in.(...)` filter.
pub const DEFAULT_MAX_IDS_PER_REQUEST: usize = 200;

/// Errors raised by store adapters.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("store returned {status} for {path}: {body}")]
    Status {
        path: String,
        status: u16,
        body: String,
    },

    #[error("batch {batch} of {of} failed: {source}")]
    Batch {
        batch: usize,
        of: usize,
        #[source]
        source: Box<StoreError>,
    },

    #[error("{table} reported {expected} rows but only {received} arrived")]
    Truncated {
        table: String,
        expected: usize,
        received: usize,
    },

    #[error("store returned no row for {0}")]
    MissingRow(&'static str),

    #[error("invalid store configuration: {0}")]
    Config(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("snapshot I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Read surface of the store.
///
/// Every list method returns rows in the order documented on it; callers rely
/// on that order and do not re-sort.
#[allow(async_fn_in_trait)]
pub trait AdStore {
    /// Maximum number of ids a single id-list query may carry.
    fn max_ids_per_request(&self) -> usize {
        DEFAULT_MAX_IDS_PER_REQUEST
    }

    /// All papers, ordered by name.
    async fn list_papers(&self) -> Result<Vec<Paper>, StoreError>;

    async fn get_paper_by_slug(&self, slug: &str) -> Result<Option<Paper>, StoreError>;

    async fn list_papers_by_ids(&self, ids: &[i64]) -> Result<Vec<Paper>, StoreError>;

    /// Editions of one paper, newest first.
    async fn list_editions(&self, paper_id: i64) -> Result<Vec<Edition>, StoreError>;

    /// Editions of every paper, newest first.
    async fn list_all_editions(&self) -> Result<Vec<Edition>, StoreError>;

    /// The edition of `paper_id` published on exactly `date`.
    async fn find_edition(
        &self,
        paper_id: i64,
        date: NaiveDate,
    ) -> Result<Option<Edition>, StoreError>;

    async fn list_editions_by_ids(&self, ids: &[i64]) -> Result<Vec<Edition>, StoreError>;

    /// Pages belonging to any of `edition_ids`, ordered by page number.
    async fn list_pages(&self, edition_ids: &[i64]) -> Result<Vec<Page>, StoreError>;

    async fn list_pages_by_ids(&self, ids: &[i64]) -> Result<Vec<Page>, StoreError>;

    /// Ads on any of `page_ids`, ordered by id.
    async fn list_ads_by_pages(&self, page_ids: &[i64]) -> Result<Vec<Ad>, StoreError>;

    /// Ads linked to one advertiser, newest first.
    async fn list_ads_by_advertiser(&self, advertiser_id: i64) -> Result<Vec<Ad>, StoreError>;

    /// Advertisers by stored `total_ad_count`, highest first; `limit` caps the row count.
    async fn list_advertisers(&self, limit: Option<usize>)
    -> Result<Vec<Advertiser>, StoreError>;

    async fn get_advertiser(&self, id: i64) -> Result<Option<Advertiser>, StoreError>;

    /// Per-paper aggregates of one advertiser, highest `ad_count` first.
    async fn list_advertiser_papers(
        &self,
        advertiser_id: i64,
    ) -> Result<Vec<AdvertiserPaper>, StoreError>;
}

/// Write surface of the store, owned by the ingestion run.
#[allow(async_fn_in_trait)]
pub trait AdWriter {
    /// Insert the paper or return the existing row with this slug.
    async fn upsert_paper(&self, slug: &str, name: &str) -> Result<Paper, StoreError>;

    /// Insert or update the edition for `(paper_id, date)`.
    async fn upsert_edition(
        &self,
        paper_id: i64,
        date: NaiveDate,
        page_count: i64,
        ad_count: i64,
    ) -> Result<Edition, StoreError>;

    /// Insert or update the page for `(edition_id, page_num)`.
    ///
    /// An `image_path` of `None` leaves any stored path untouched.
    async fn upsert_page(
        &self,
        edition_id: i64,
        page_num: i32,
        section: &str,
        image_path: Option<&str>,
    ) -> Result<Page, StoreError>;

    /// Delete every ad on the page and insert `ads` in their place.
    async fn replace_ads(&self, page_id: i64, ads: &[NewAd]) -> Result<Vec<Ad>, StoreError>;

    /// Return the advertiser with exactly this name, creating it if needed.
    async fn find_or_create_advertiser(&self, name: &str) -> Result<Advertiser, StoreError>;

    async fn link_ads(&self, ad_ids: &[i64], advertiser_id: i64) -> Result<(), StoreError>;

    async fn upsert_advertiser_paper(
        &self,
        counts: &AdvertiserPaperCounts,
    ) -> Result<(), StoreError>;

    /// Delete one `advertiser_papers` row by id.
    async fn delete_advertiser_paper(&self, id: i64) -> Result<(), StoreError>;

    async fn update_advertiser_counts(
        &self,
        advertiser_id: i64,
        paper_count: i64,
        total_ad_count: i64,
    ) -> Result<(), StoreError>;

    /// Store a JPEG page image at `path` inside the page image bucket, replacing any existing object.
    async fn upload_page_image(&self, path: &str, jpeg: Vec<u8>) -> Result<(), StoreError>;
}
