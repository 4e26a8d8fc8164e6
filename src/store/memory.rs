//! In-process store backed by plain tables.
//!
//! Mirrors the ordering and id-list limits of [`super::SupabaseStore`] so that
//! aggregation code behaves the same against either. Tables can be loaded from
//! (and saved to) a JSON snapshot, which lets the report commands run offline.
//!
//! For tests, the store records the size of every ads-by-page request and can
//! be told to fail any request that touches a given page id.

use super::{AdStore, AdWriter, DEFAULT_MAX_IDS_PER_REQUEST, StoreError};
use crate::models::{
    Ad, Advertiser, AdvertiserPaper, AdvertiserPaperCounts, Edition, NewAd, Page, Paper,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{info, instrument};

/// Every table of the store, as serialized in a snapshot file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub papers: Vec<Paper>,
    #[serde(default)]
    pub editions: Vec<Edition>,
    #[serde(default)]
    pub pages: Vec<Page>,
    #[serde(default)]
    pub ads: Vec<Ad>,
    #[serde(default)]
    pub advertisers: Vec<Advertiser>,
    #[serde(default)]
    pub advertiser_papers: Vec<AdvertiserPaper>,
}

impl Snapshot {
    fn next_id(&self) -> i64 {
        let max = [
            self.papers.iter().map(|r| r.id).max(),
            self.editions.iter().map(|r| r.id).max(),
            self.pages.iter().map(|r| r.id).max(),
            self.ads.iter().map(|r| r.id).max(),
            self.advertisers.iter().map(|r| r.id).max(),
            self.advertiser_papers.iter().map(|r| r.id).max(),
        ]
        .into_iter()
        .flatten()
        .max()
        .unwrap_or(0);
        max + 1
    }
}

#[derive(Debug)]
struct State {
    tables: Snapshot,
    next_id: i64,
    ad_requests: Vec<usize>,
    failing_pages: HashSet<i64>,
    uploads: Vec<String>,
}

/// Store held entirely in memory.
#[derive(Debug)]
pub struct MemoryStore {
    state: Mutex<State>,
    max_ids: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::from_snapshot(Snapshot::default())
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(tables: Snapshot) -> Self {
        let next_id = tables.next_id();
        Self {
            state: Mutex::new(State {
                tables,
                next_id,
                ad_requests: Vec::new(),
                failing_pages: HashSet::new(),
                uploads: Vec::new(),
            }),
            max_ids: DEFAULT_MAX_IDS_PER_REQUEST,
        }
    }

    /// Load a snapshot written by [`MemoryStore::save`] or exported from the hosted store.
    #[instrument(level = "info", skip_all, fields(path = %path.as_ref().display()))]
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let raw = tokio::fs::read(path.as_ref()).await?;
        let tables: Snapshot = serde_json::from_slice(&raw)?;
        info!(
            papers = tables.papers.len(),
            editions = tables.editions.len(),
            pages = tables.pages.len(),
            ads = tables.ads.len(),
            "Loaded snapshot"
        );
        Ok(Self::from_snapshot(tables))
    }

    pub async fn save(&self, path: impl AsRef<Path>) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(&self.snapshot())?;
        tokio::fs::write(path, json).await?;
        Ok(())
    }

    /// Override the id-list cap. Values below 1 are raised to 1.
    pub fn with_max_ids(mut self, max_ids: usize) -> Self {
        self.max_ids = max_ids.max(1);
        self
    }

    pub fn snapshot(&self) -> Snapshot {
        self.lock().tables.clone()
    }

    /// Sizes of every `list_ads_by_pages` request received so far.
    pub fn ad_requests(&self) -> Vec<usize> {
        self.lock().ad_requests.clone()
    }

    /// Make any ads-by-page request containing `page_id` fail.
    pub fn fail_ads_for_page(&self, page_id: i64) {
        self.lock().failing_pages.insert(page_id);
    }

    /// Storage paths passed to [`AdWriter::upload_page_image`].
    pub fn uploads(&self) -> Vec<String> {
        self.lock().uploads.clone()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_id_count(&self, count: usize) -> Result<(), StoreError> {
        if count > self.max_ids {
            return Err(StoreError::Unavailable(format!(
                "{count} ids exceeds the limit of {}",
                self.max_ids
            )));
        }
        Ok(())
    }

    pub fn add_paper(&self, slug: &str, name: &str) -> Paper {
        let mut state = self.lock();
        let paper = Paper {
            id: state.allocate(),
            slug: slug.to_string(),
            name: name.to_string(),
        };
        state.tables.papers.push(paper.clone());
        paper
    }

    pub fn add_edition(
        &self,
        paper_id: i64,
        date: NaiveDate,
        page_count: i64,
        ad_count: i64,
    ) -> Edition {
        let mut state = self.lock();
        let edition = Edition {
            id: state.allocate(),
            paper_id,
            date,
            page_count,
            ad_count,
        };
        state.tables.editions.push(edition.clone());
        edition
    }

    pub fn add_page(&self, edition_id: i64, page_num: i32, section: &str) -> Page {
        let mut state = self.lock();
        let page = Page {
            id: state.allocate(),
            edition_id,
            page_num,
            section: Some(section.to_string()),
            image_path: None,
        };
        state.tables.pages.push(page.clone());
        page
    }

    /// Add an ad with empty description, location, and size and `medium` confidence.
    pub fn add_ad(&self, page_id: i64, advertiser: &str, advertiser_id: Option<i64>) -> Ad {
        self.add_ad_with(
            page_id,
            NewAd {
                advertiser: advertiser.to_string(),
                description: String::new(),
                location: String::new(),
                size: String::new(),
                confidence: "medium".to_string(),
            },
            advertiser_id,
        )
    }

    /// Add an ad. `created_at` increases with the allocated id so insertion order is recoverable.
    pub fn add_ad_with(&self, page_id: i64, ad: NewAd, advertiser_id: Option<i64>) -> Ad {
        let mut state = self.lock();
        let id = state.allocate();
        let row = Ad {
            id,
            page_id,
            advertiser: ad.advertiser,
            advertiser_id,
            description: ad.description,
            location: ad.location,
            size: ad.size,
            confidence: ad.confidence,
            created_at: fixture_timestamp(id),
        };
        state.tables.ads.push(row.clone());
        row
    }

    pub fn add_advertiser(&self, name: &str, paper_count: i64, total_ad_count: i64) -> Advertiser {
        let mut state = self.lock();
        let advertiser = Advertiser {
            id: state.allocate(),
            name: name.to_string(),
            first_seen: None,
            paper_count,
            total_ad_count,
        };
        state.tables.advertisers.push(advertiser.clone());
        advertiser
    }

    pub fn add_advertiser_paper(
        &self,
        advertiser_id: i64,
        paper_id: i64,
        ad_count: i64,
    ) -> AdvertiserPaper {
        let mut state = self.lock();
        let row = AdvertiserPaper {
            id: state.allocate(),
            advertiser_id,
            paper_id,
            ad_count,
            first_seen: None,
            last_seen: None,
        };
        state.tables.advertiser_papers.push(row.clone());
        row
    }
}

impl State {
    fn allocate(&mut self) -> i64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

fn fixture_timestamp(id: i64) -> DateTime<Utc> {
    // 2026-01-01T00:00:00Z
    DateTime::from_timestamp(1_767_225_600 + id, 0).unwrap_or_default()
}

fn id_set(ids: &[i64]) -> HashSet<i64> {
    ids.iter().copied().collect()
}

impl AdStore for MemoryStore {
    fn max_ids_per_request(&self) -> usize {
        self.max_ids
    }

    async fn list_papers(&self) -> Result<Vec<Paper>, StoreError> {
        let mut papers = self.lock().tables.papers.clone();
        papers.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(papers)
    }

    async fn get_paper_by_slug(&self, slug: &str) -> Result<Option<Paper>, StoreError> {
        Ok(self
            .lock()
            .tables
            .papers
            .iter()
            .find(|p| p.slug == slug)
            .cloned())
    }

    async fn list_papers_by_ids(&self, ids: &[i64]) -> Result<Vec<Paper>, StoreError> {
        self.check_id_count(ids.len())?;
        let wanted = id_set(ids);
        let mut papers: Vec<Paper> = self
            .lock()
            .tables
            .papers
            .iter()
            .filter(|p| wanted.contains(&p.id))
            .cloned()
            .collect();
        papers.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(papers)
    }

    async fn list_editions(&self, paper_id: i64) -> Result<Vec<Edition>, StoreError> {
        let mut editions: Vec<Edition> = self
            .lock()
            .tables
            .editions
            .iter()
            .filter(|e| e.paper_id == paper_id)
            .cloned()
            .collect();
        editions.sort_by(|a, b| b.date.cmp(&a.date));
        Ok(editions)
    }

    async fn list_all_editions(&self) -> Result<Vec<Edition>, StoreError> {
        let mut editions = self.lock().tables.editions.clone();
        editions.sort_by(|a, b| b.date.cmp(&a.date).then(a.id.cmp(&b.id)));
        Ok(editions)
    }

    async fn find_edition(
        &self,
        paper_id: i64,
        date: NaiveDate,
    ) -> Result<Option<Edition>, StoreError> {
        Ok(self
            .lock()
            .tables
            .editions
            .iter()
            .find(|e| e.paper_id == paper_id && e.date == date)
            .cloned())
    }

    async fn list_editions_by_ids(&self, ids: &[i64]) -> Result<Vec<Edition>, StoreError> {
        self.check_id_count(ids.len())?;
        let wanted = id_set(ids);
        let mut editions: Vec<Edition> = self
            .lock()
            .tables
            .editions
            .iter()
            .filter(|e| wanted.contains(&e.id))
            .cloned()
            .collect();
        editions.sort_by(|a, b| b.date.cmp(&a.date).then(a.id.cmp(&b.id)));
        Ok(editions)
    }

    async fn list_pages(&self, edition_ids: &[i64]) -> Result<Vec<Page>, StoreError> {
        self.check_id_count(edition_ids.len())?;
        let wanted = id_set(edition_ids);
        let mut pages: Vec<Page> = self
            .lock()
            .tables
            .pages
            .iter()
            .filter(|p| wanted.contains(&p.edition_id))
            .cloned()
            .collect();
        pages.sort_by(|a, b| a.page_num.cmp(&b.page_num).then(a.id.cmp(&b.id)));
        Ok(pages)
    }

    async fn list_pages_by_ids(&self, ids: &[i64]) -> Result<Vec<Page>, StoreError> {
        self.check_id_count(ids.len())?;
        let wanted = id_set(ids);
        let mut pages: Vec<Page> = self
            .lock()
            .tables
            .pages
            .iter()
            .filter(|p| wanted.contains(&p.id))
            .cloned()
            .collect();
        pages.sort_by(|a, b| a.page_num.cmp(&b.page_num).then(a.id.cmp(&b.id)));
        Ok(pages)
    }

    async fn list_ads_by_pages(&self, page_ids: &[i64]) -> Result<Vec<Ad>, StoreError> {
        let mut state = self.lock();
        state.ad_requests.push(page_ids.len());
        self.check_id_count(page_ids.len())?;
        if let Some(bad) = page_ids.iter().find(|id| state.failing_pages.contains(*id)) {
            return Err(StoreError::Unavailable(format!(
                "ads request for page {bad} failed"
            )));
        }
        let wanted = id_set(page_ids);
        let mut ads: Vec<Ad> = state
            .tables
            .ads
            .iter()
            .filter(|a| wanted.contains(&a.page_id))
            .cloned()
            .collect();
        ads.sort_by_key(|a| a.id);
        Ok(ads)
    }

    async fn list_ads_by_advertiser(&self, advertiser_id: i64) -> Result<Vec<Ad>, StoreError> {
        let mut ads: Vec<Ad> = self
            .lock()
            .tables
            .ads
            .iter()
            .filter(|a| a.advertiser_id == Some(advertiser_id))
            .cloned()
            .collect();
        ads.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(ads)
    }

    async fn list_advertisers(
        &self,
        limit: Option<usize>,
    ) -> Result<Vec<Advertiser>, StoreError> {
        let mut advertisers = self.lock().tables.advertisers.clone();
        advertisers.sort_by(|a, b| b.total_ad_count.cmp(&a.total_ad_count));
        if let Some(limit) = limit {
            advertisers.truncate(limit);
        }
        Ok(advertisers)
    }

    async fn get_advertiser(&self, id: i64) -> Result<Option<Advertiser>, StoreError> {
        Ok(self
            .lock()
            .tables
            .advertisers
            .iter()
            .find(|a| a.id == id)
            .cloned())
    }

    async fn list_advertiser_papers(
        &self,
        advertiser_id: i64,
    ) -> Result<Vec<AdvertiserPaper>, StoreError> {
        let mut rows: Vec<AdvertiserPaper> = self
            .lock()
            .tables
            .advertiser_papers
            .iter()
            .filter(|r| r.advertiser_id == advertiser_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.ad_count.cmp(&a.ad_count));
        Ok(rows)
    }
}

impl AdWriter for MemoryStore {
    async fn upsert_paper(&self, slug: &str, name: &str) -> Result<Paper, StoreError> {
        if let Some(paper) = self.get_paper_by_slug(slug).await? {
            return Ok(paper);
        }
        Ok(self.add_paper(slug, name))
    }

    async fn upsert_edition(
        &self,
        paper_id: i64,
        date: NaiveDate,
        page_count: i64,
        ad_count: i64,
    ) -> Result<Edition, StoreError> {
        {
            let mut state = self.lock();
            if let Some(edition) = state
                .tables
                .editions
                .iter_mut()
                .find(|e| e.paper_id == paper_id && e.date == date)
            {
                edition.page_count = page_count;
                edition.ad_count = ad_count;
                return Ok(edition.clone());
            }
        }
        Ok(self.add_edition(paper_id, date, page_count, ad_count))
    }

    async fn upsert_page(
        &self,
        edition_id: i64,
        page_num: i32,
        section: &str,
        image_path: Option<&str>,
    ) -> Result<Page, StoreError> {
        let mut state = self.lock();
        if let Some(page) = state
            .tables
            .pages
            .iter_mut()
            .find(|p| p.edition_id == edition_id && p.page_num == page_num)
        {
            page.section = Some(section.to_string());
            if let Some(path) = image_path {
                page.image_path = Some(path.to_string());
            }
            return Ok(page.clone());
        }
        let page = Page {
            id: state.allocate(),
            edition_id,
            page_num,
            section: Some(section.to_string()),
            image_path: image_path.map(str::to_string),
        };
        state.tables.pages.push(page.clone());
        Ok(page)
    }

    async fn replace_ads(&self, page_id: i64, ads: &[NewAd]) -> Result<Vec<Ad>, StoreError> {
        let mut state = self.lock();
        state.tables.ads.retain(|a| a.page_id != page_id);
        let now = Utc::now();
        let mut inserted = Vec::with_capacity(ads.len());
        for ad in ads {
            let row = Ad {
                id: state.allocate(),
                page_id,
                advertiser: ad.advertiser.clone(),
                advertiser_id: None,
                description: ad.description.clone(),
                location: ad.location.clone(),
                size: ad.size.clone(),
                confidence: ad.confidence.clone(),
                created_at: now,
            };
            state.tables.ads.push(row.clone());
            inserted.push(row);
        }
        Ok(inserted)
    }

    async fn find_or_create_advertiser(&self, name: &str) -> Result<Advertiser, StoreError> {
        let mut state = self.lock();
        if let Some(existing) = state.tables.advertisers.iter().find(|a| a.name == name) {
            return Ok(existing.clone());
        }
        let advertiser = Advertiser {
            id: state.allocate(),
            name: name.to_string(),
            first_seen: Some(Utc::now()),
            paper_count: 0,
            total_ad_count: 0,
        };
        state.tables.advertisers.push(advertiser.clone());
        Ok(advertiser)
    }

    async fn link_ads(&self, ad_ids: &[i64], advertiser_id: i64) -> Result<(), StoreError> {
        let wanted = id_set(ad_ids);
        let mut state = self.lock();
        for ad in state.tables.ads.iter_mut().filter(|a| wanted.contains(&a.id)) {
            ad.advertiser_id = Some(advertiser_id);
        }
        Ok(())
    }

    async fn upsert_advertiser_paper(
        &self,
        counts: &AdvertiserPaperCounts,
    ) -> Result<(), StoreError> {
        let mut state = self.lock();
        if let Some(row) = state
            .tables
            .advertiser_papers
            .iter_mut()
            .find(|r| r.advertiser_id == counts.advertiser_id && r.paper_id == counts.paper_id)
        {
            row.ad_count = counts.ad_count;
            row.first_seen = Some(counts.first_seen);
            row.last_seen = Some(counts.last_seen);
            return Ok(());
        }
        let row = AdvertiserPaper {
            id: state.allocate(),
            advertiser_id: counts.advertiser_id,
            paper_id: counts.paper_id,
            ad_count: counts.ad_count,
            first_seen: Some(counts.first_seen),
            last_seen: Some(counts.last_seen),
        };
        state.tables.advertiser_papers.push(row);
        Ok(())
    }

    async fn delete_advertiser_paper(&self, id: i64) -> Result<(), StoreError> {
        self.lock().tables.advertiser_papers.retain(|r| r.id != id);
        Ok(())
    }

    async fn update_advertiser_counts(
        &self,
        advertiser_id: i64,
        paper_count: i64,
        total_ad_count: i64,
    ) -> Result<(), StoreError> {
        let mut state = self.lock();
        let advertiser = state
            .tables
            .advertisers
            .iter_mut()
            .find(|a| a.id == advertiser_id)
            .ok_or(StoreError::MissingRow("advertisers"))?;
        advertiser.paper_count = paper_count;
        advertiser.total_ad_count = total_ad_count;
        Ok(())
    }

    async fn upload_page_image(&self, path: &str, _jpeg: Vec<u8>) -> Result<(), StoreError> {
        self.lock().uploads.push(path.to_string());
        Ok(())
    }
}
