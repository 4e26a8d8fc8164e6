//! Edition detail: pages of one dated issue with their ads attached.
//!
//! The same [`EditionDetail`] backs two presentations:
//!
//! | Presentation | Type | Behavior |
//! |--------------|------|----------|
//! | Page viewer | [`PageViewer`] | one selected page, thumbnails annotated with ad counts |
//! | All-ads table | [`AllAdsTable`] | every ad, substring filter, toggled stable sort |

use super::batch::{fetch_ads_for_pages, fetch_pages_for_editions};
use crate::models::{Ad, Edition, Page, Paper, compare_confidence};
use crate::store::{AdStore, StoreError};
use chrono::NaiveDate;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::{info, instrument};

/// A page and the ads detected on it, in ad id order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageWithAds {
    pub page: Page,
    pub ads: Vec<Ad>,
}

impl PageWithAds {
    /// Thumbnail caption: the page number, followed by `(n)` when the page has ads.
    pub fn thumbnail_label(&self) -> String {
        match self.ads.len() {
            0 => self.page.page_num.to_string(),
            n => format!("{} ({n})", self.page.page_num),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EditionDetail {
    pub paper: Paper,
    pub edition: Edition,
    /// Ordered by page number.
    pub pages: Vec<PageWithAds>,
}

impl EditionDetail {
    /// Pages found for the edition.
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Ads found across every page.
    pub fn ad_count(&self) -> usize {
        self.pages.iter().map(|p| p.ads.len()).sum()
    }

    /// The edition's cached page counter.
    pub fn stored_page_count(&self) -> i64 {
        self.edition.page_count
    }

    /// The edition's cached ad counter.
    pub fn stored_ad_count(&self) -> i64 {
        self.edition.ad_count
    }

    pub fn viewer(&self, requested_page: Option<i32>) -> PageViewer<'_> {
        PageViewer::new(&self.pages, requested_page)
    }

    pub fn all_ads(&self) -> AllAdsTable {
        AllAdsTable::from_pages(&self.pages)
    }
}

/// Resolve paper → edition → pages → ads for one slug and date.
///
/// Pages and ads are fetched in id batches no larger than
/// [`AdStore::max_ids_per_request`].
///
/// # Arguments
///
/// * `store` - Where the rows are read from
/// * `slug` - Paper slug, e.g. `ajc`
/// * `date` - Edition date
///
/// # Returns
///
/// `Ok(None)` when the slug or the date has no row. Otherwise the edition
/// with its pages in page order, each carrying its ads in id order.
///
/// # Errors
///
/// Any failed store request, including a failed batch.
#[instrument(level = "info", skip(store))]
pub async fn edition_detail<S: AdStore>(
    store: &S,
    slug: &str,
    date: NaiveDate,
) -> Result<Option<EditionDetail>, StoreError> {
    let Some(paper) = store.get_paper_by_slug(slug).await? else {
        return Ok(None);
    };
    let Some(edition) = store.find_edition(paper.id, date).await? else {
        return Ok(None);
    };

    let pages = fetch_pages_for_editions(store, &[edition.id]).await?;
    let page_ids: Vec<i64> = pages.iter().map(|p| p.id).collect();
    let ads = fetch_ads_for_pages(store, &page_ids).await?;

    let mut by_page: HashMap<i64, Vec<Ad>> = HashMap::new();
    for ad in ads {
        by_page.entry(ad.page_id).or_default().push(ad);
    }
    let pages: Vec<PageWithAds> = pages
        .into_iter()
        .map(|page| PageWithAds {
            ads: by_page.remove(&page.id).unwrap_or_default(),
            page,
        })
        .collect();

    let detail = EditionDetail {
        paper,
        edition,
        pages,
    };
    info!(
        pages = detail.page_count(),
        ads = detail.ad_count(),
        "Loaded edition detail"
    );
    Ok(Some(detail))
}

/// One thumbnail in the page strip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Thumbnail {
    pub page_num: i32,
    pub label: String,
    pub selected: bool,
}

/// Page-by-page presentation with one selected page.
#[derive(Debug, Clone)]
pub struct PageViewer<'a> {
    pages: &'a [PageWithAds],
    selected: usize,
}

impl<'a> PageViewer<'a> {
    /// Select `requested_page` if the edition has it, otherwise the first page.
    pub fn new(pages: &'a [PageWithAds], requested_page: Option<i32>) -> Self {
        let selected = requested_page
            .and_then(|n| pages.iter().position(|p| p.page.page_num == n))
            .unwrap_or(0);
        Self { pages, selected }
    }

    /// `None` only for an edition without pages.
    pub fn selected(&self) -> Option<&'a PageWithAds> {
        self.pages.get(self.selected)
    }

    /// Move the selection to `page_num`. Returns `false` and keeps the current
    /// selection when the edition has no such page.
    pub fn select(&mut self, page_num: i32) -> bool {
        match self.pages.iter().position(|p| p.page.page_num == page_num) {
            Some(i) => {
                self.selected = i;
                true
            }
            None => false,
        }
    }

    pub fn thumbnails(&self) -> Vec<Thumbnail> {
        self.pages
            .iter()
            .enumerate()
            .map(|(i, p)| Thumbnail {
                page_num: p.page.page_num,
                label: p.thumbnail_label(),
                selected: i == self.selected,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SortColumn {
    Page,
    Advertiser,
    Size,
    Confidence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl SortDirection {
    pub fn reversed(self) -> Self {
        match self {
            Self::Ascending => Self::Descending,
            Self::Descending => Self::Ascending,
        }
    }
}

/// One ad flattened with its page context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EditionAdRow {
    pub page_num: i32,
    pub section: Option<String>,
    pub ad: Ad,
}

impl EditionAdRow {
    fn compare(&self, other: &Self, column: SortColumn) -> Ordering {
        match column {
            SortColumn::Page => self.page_num.cmp(&other.page_num),
            SortColumn::Advertiser => self
                .ad
                .advertiser
                .to_lowercase()
                .cmp(&other.ad.advertiser.to_lowercase()),
            SortColumn::Size => self.ad.size.to_lowercase().cmp(&other.ad.size.to_lowercase()),
            SortColumn::Confidence => compare_confidence(&self.ad.confidence, &other.ad.confidence),
        }
    }

    fn matches(&self, needle: &str) -> bool {
        self.ad.advertiser.to_lowercase().contains(needle)
            || self
                .section
                .as_deref()
                .is_some_and(|s| s.to_lowercase().contains(needle))
    }
}

/// Every ad of an edition as one filterable, sortable table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllAdsTable {
    rows: Vec<EditionAdRow>,
    query: String,
    sort: Option<(SortColumn, SortDirection)>,
}

impl AllAdsTable {
    /// Rows start in page order, then ad id order, unfiltered and unsorted.
    pub fn from_pages(pages: &[PageWithAds]) -> Self {
        let rows = pages
            .iter()
            .flat_map(|p| {
                p.ads.iter().map(|ad| EditionAdRow {
                    page_num: p.page.page_num,
                    section: p.page.section.clone(),
                    ad: ad.clone(),
                })
            })
            .collect();
        Self {
            rows,
            query: String::new(),
            sort: None,
        }
    }

    /// Keep rows whose advertiser or section contains `query`, ignoring case.
    pub fn set_filter(&mut self, query: &str) {
        self.query = query.trim().to_lowercase();
    }

    /// Sort by `column`. The active column flips direction; a new column starts ascending.
    pub fn sort_by(&mut self, column: SortColumn) {
        self.sort = Some(match self.sort {
            Some((active, direction)) if active == column => (column, direction.reversed()),
            _ => (column, SortDirection::Ascending),
        });
    }

    pub fn set_sort(&mut self, column: SortColumn, direction: SortDirection) {
        self.sort = Some((column, direction));
    }

    pub fn sort(&self) -> Option<(SortColumn, SortDirection)> {
        self.sort
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Filtered rows in sort order. Equal keys keep their original order.
    pub fn rows(&self) -> Vec<&EditionAdRow> {
        let mut rows: Vec<&EditionAdRow> = self
            .rows
            .iter()
            .filter(|r| self.query.is_empty() || r.matches(&self.query))
            .collect();
        if let Some((column, direction)) = self.sort {
            rows.sort_by(|a, b| {
                let ordering = a.compare(b, column);
                match direction {
                    SortDirection::Ascending => ordering,
                    SortDirection::Descending => ordering.reverse(),
                }
            });
        }
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewAd;
    use crate::store::MemoryStore;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn new_ad(advertiser: &str, size: &str, confidence: &str) -> NewAd {
        NewAd {
            advertiser: advertiser.to_string(),
            description: String::new(),
            location: String::new(),
            size: size.to_string(),
            confidence: confidence.to_string(),
        }
    }

    /// `ajc` 2026-02-27: page 1 has one Acme Co ad, page 2 has none.
    fn ajc_store() -> MemoryStore {
        let store = MemoryStore::new();
        let ajc = store.add_paper("ajc", "Atlanta Journal-Constitution");
        let edition = store.add_edition(ajc.id, date("2026-02-27"), 2, 1);
        let page1 = store.add_page(edition.id, 1, "A");
        store.add_page(edition.id, 2, "A");
        store.add_ad_with(page1.id, new_ad("Acme Co", "half page", "high"), None);
        store
    }

    fn table_store() -> MemoryStore {
        let store = MemoryStore::new();
        let ajc = store.add_paper("ajc", "AJC");
        let edition = store.add_edition(ajc.id, date("2026-02-27"), 3, 4);
        let p1 = store.add_page(edition.id, 1, "Front");
        let p2 = store.add_page(edition.id, 2, "Sports");
        let p3 = store.add_page(edition.id, 3, "Business");
        store.add_ad_with(p1.id, new_ad("Zephyr Motors", "full page", "high"), None);
        store.add_ad_with(p2.id, new_ad("acme co", "banner", "low"), None);
        store.add_ad_with(p3.id, new_ad("Bolt Hardware", "quarter page", "medium"), None);
        store.add_ad_with(p3.id, new_ad("Acme Tires", "half page", "high"), None);
        store
    }

    fn advertisers(table: &AllAdsTable) -> Vec<String> {
        table.rows().iter().map(|r| r.ad.advertiser.clone()).collect()
    }

    #[tokio::test]
    async fn test_ajc_edition_scenario() {
        let store = ajc_store();

        let detail = edition_detail(&store, "ajc", date("2026-02-27"))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(detail.page_count(), 2);
        assert_eq!(detail.ad_count(), 1);
        assert_eq!(detail.stored_ad_count(), 1);

        let labels: Vec<String> = detail
            .viewer(None)
            .thumbnails()
            .into_iter()
            .map(|t| t.label)
            .collect();
        assert_eq!(labels, vec!["1 (1)", "2"]);

        let table = detail.all_ads();
        let rows = table.rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].ad.advertiser, "Acme Co");
        assert_eq!(rows[0].ad.size, "half page");
        assert_eq!(rows[0].ad.confidence, "high");
        assert_eq!(rows[0].page_num, 1);
    }

    #[tokio::test]
    async fn test_unknown_slug_or_date_is_none() {
        let store = ajc_store();
        assert!(
            edition_detail(&store, "nope", date("2026-02-27"))
                .await
                .unwrap()
                .is_none()
        );
        assert!(
            edition_detail(&store, "ajc", date("2026-02-28"))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_viewer_defaults() {
        let store = ajc_store();
        let detail = edition_detail(&store, "ajc", date("2026-02-27"))
            .await
            .unwrap()
            .unwrap();

        let requested = detail.viewer(Some(2));
        assert_eq!(requested.selected().unwrap().page.page_num, 2);

        let missing = detail.viewer(Some(9));
        assert_eq!(missing.selected().unwrap().page.page_num, 1);

        let mut viewer = detail.viewer(None);
        assert_eq!(viewer.selected().unwrap().page.page_num, 1);
        assert!(!viewer.select(7));
        assert!(viewer.select(2));
        assert!(viewer.thumbnails()[1].selected);
    }

    #[test]
    fn test_viewer_without_pages() {
        let viewer = PageViewer::new(&[], Some(1));
        assert!(viewer.selected().is_none());
        assert!(viewer.thumbnails().is_empty());
    }

    #[tokio::test]
    async fn test_sort_toggle_and_reset() {
        let store = table_store();
        let detail = edition_detail(&store, "ajc", date("2026-02-27"))
            .await
            .unwrap()
            .unwrap();
        let mut table = detail.all_ads();

        table.sort_by(SortColumn::Advertiser);
        assert_eq!(
            advertisers(&table),
            vec!["acme co", "Acme Tires", "Bolt Hardware", "Zephyr Motors"]
        );

        table.sort_by(SortColumn::Advertiser);
        assert_eq!(table.sort(), Some((SortColumn::Advertiser, SortDirection::Descending)));
        assert_eq!(
            advertisers(&table),
            vec!["Zephyr Motors", "Bolt Hardware", "Acme Tires", "acme co"]
        );

        table.sort_by(SortColumn::Page);
        assert_eq!(table.sort(), Some((SortColumn::Page, SortDirection::Ascending)));
        let pages: Vec<i32> = table.rows().iter().map(|r| r.page_num).collect();
        assert_eq!(pages, vec![1, 2, 3, 3]);
    }

    #[tokio::test]
    async fn test_sort_is_stable_on_ties() {
        let store = table_store();
        let detail = edition_detail(&store, "ajc", date("2026-02-27"))
            .await
            .unwrap()
            .unwrap();
        let mut table = detail.all_ads();

        table.sort_by(SortColumn::Confidence);
        // both "high" rows keep page order
        assert_eq!(
            advertisers(&table),
            vec!["acme co", "Bolt Hardware", "Zephyr Motors", "Acme Tires"]
        );
    }

    #[tokio::test]
    async fn test_filter_on_advertiser_or_section() {
        let store = table_store();
        let detail = edition_detail(&store, "ajc", date("2026-02-27"))
            .await
            .unwrap()
            .unwrap();
        let mut table = detail.all_ads();

        table.set_filter("ACME");
        assert_eq!(advertisers(&table), vec!["acme co", "Acme Tires"]);

        table.set_filter("sports");
        assert_eq!(advertisers(&table), vec!["acme co"]);

        table.set_filter("  ");
        assert_eq!(table.rows().len(), table.len());
    }
}
