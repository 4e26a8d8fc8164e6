//! Filterable dashboard over every paper.
//!
//! The dashboard is a pure function of a [`DashboardSnapshot`] (papers,
//! editions, pages, ads) and an immutable [`DashboardFilter`] (selected papers
//! plus an inclusive date range):
//!
//! 1. keep editions of selected papers whose date falls in the range
//! 2. keep pages of those editions
//! 3. keep ads on those pages
//! 4. attach page number, section, paper, and edition date to each ad
//! 5. count editions, ads, and distinct advertiser names
//! 6. tally the top advertisers within the filtered ads
//!
//! Any change to the filter or the snapshot recomputes everything.
//!
//! [`Dashboard`] owns the filter state and tags each fetch with a
//! [`Generation`]; results of superseded fetches are dropped on arrival.

use super::batch::{fetch_ads_for_pages, fetch_pages_for_editions};
use super::generation::{Generation, GenerationCounter};
use crate::models::{Ad, Edition, Page, Paper};
use crate::store::{AdStore, StoreError};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{debug, info, instrument};

/// Number of advertisers in the in-range breakdown.
pub const TOP_ADVERTISERS_IN_RANGE: usize = 15;

/// Card text for a selected paper with nothing in the date range.
pub const NO_EDITIONS_IN_RANGE: &str = "No editions in range";

/// Which papers and dates the dashboard covers.
///
/// Filters are values: every modifier returns a new filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DashboardFilter {
    selected_papers: BTreeSet<i64>,
    /// Inclusive lower bound; `None` is unbounded.
    start: Option<NaiveDate>,
    /// Inclusive upper bound; `None` is unbounded.
    end: Option<NaiveDate>,
}

impl DashboardFilter {
    pub fn new(
        selected_papers: impl IntoIterator<Item = i64>,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Self {
        Self {
            selected_papers: selected_papers.into_iter().collect(),
            start,
            end,
        }
    }

    /// Every paper selected, range spanning the oldest to the newest edition.
    pub fn spanning(papers: &[Paper], editions: &[Edition]) -> Self {
        Self::new(
            papers.iter().map(|p| p.id),
            editions.iter().map(|e| e.date).min(),
            editions.iter().map(|e| e.date).max(),
        )
    }

    pub fn selected_papers(&self) -> &BTreeSet<i64> {
        &self.selected_papers
    }

    pub fn start(&self) -> Option<NaiveDate> {
        self.start
    }

    pub fn end(&self) -> Option<NaiveDate> {
        self.end
    }

    pub fn with_papers(&self, papers: impl IntoIterator<Item = i64>) -> Self {
        Self {
            selected_papers: papers.into_iter().collect(),
            ..self.clone()
        }
    }

    pub fn with_range(&self, start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        Self {
            start,
            end,
            ..self.clone()
        }
    }

    /// Select the paper if it is deselected, deselect it otherwise.
    pub fn toggle_paper(&self, paper_id: i64) -> Self {
        let mut selected_papers = self.selected_papers.clone();
        if !selected_papers.remove(&paper_id) {
            selected_papers.insert(paper_id);
        }
        Self {
            selected_papers,
            ..self.clone()
        }
    }

    pub fn includes(&self, edition: &Edition) -> bool {
        self.selected_papers.contains(&edition.paper_id)
            && self.start.is_none_or(|start| start <= edition.date)
            && self.end.is_none_or(|end| edition.date <= end)
    }
}

/// Papers and editions, loaded once per dashboard.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DashboardBase {
    pub papers: Vec<Paper>,
    pub editions: Vec<Edition>,
}

/// Rows a derivation runs over.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DashboardSnapshot {
    pub papers: Vec<Paper>,
    pub editions: Vec<Edition>,
    pub pages: Vec<Page>,
    pub ads: Vec<Ad>,
}

/// An ad with its page, edition, and paper context attached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdRow {
    pub ad: Ad,
    pub page_num: i32,
    pub section: Option<String>,
    pub paper_id: i64,
    pub paper_slug: String,
    pub paper_name: String,
    pub date: NaiveDate,
}

/// Leaderboard bucket: resolved advertiser id when known, raw name otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AdvertiserKey {
    Id(i64),
    Name(String),
}

impl AdvertiserKey {
    pub fn of(ad: &Ad) -> Self {
        match ad.advertiser_id {
            Some(id) => Self::Id(id),
            None => Self::Name(ad.advertiser.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdvertiserTally {
    pub key: AdvertiserKey,
    /// Free-text name of the first ad counted in this bucket.
    pub name: String,
    pub count: usize,
}

/// Per-paper summary within the filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaperCard {
    pub paper: Paper,
    pub edition_count: usize,
    /// Ads found under the filter.
    pub computed_ad_count: usize,
    /// Sum of the stored `ad_count` of the paper's in-range editions.
    pub stored_ad_count: i64,
    pub unique_advertisers: usize,
    pub latest_date: Option<NaiveDate>,
}

impl PaperCard {
    pub fn has_editions(&self) -> bool {
        self.edition_count > 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DashboardView {
    pub filter: DashboardFilter,
    pub edition_count: usize,
    /// Ads found under the filter.
    pub computed_ad_count: usize,
    /// Sum of the stored `ad_count` of every in-range edition. May differ from
    /// `computed_ad_count` when the stored counters are out of date.
    pub stored_ad_count: i64,
    /// Distinct free-text advertiser names among the filtered ads.
    pub unique_advertisers: usize,
    pub top_advertisers: Vec<AdvertiserTally>,
    pub paper_cards: Vec<PaperCard>,
    /// Newest edition first, then paper name, page number, ad id.
    pub ads: Vec<AdRow>,
}

/// Load papers and editions.
#[instrument(level = "info", skip_all)]
pub async fn load_base<S: AdStore>(store: &S) -> Result<DashboardBase, StoreError> {
    let papers = store.list_papers().await?;
    let editions = store.list_all_editions().await?;
    info!(papers = papers.len(), editions = editions.len(), "Loaded dashboard base");
    Ok(DashboardBase { papers, editions })
}

/// Fetch the pages and ads of the editions `filter` selects from `base`.
#[instrument(level = "info", skip_all)]
pub async fn load_snapshot<S: AdStore>(
    store: &S,
    base: &DashboardBase,
    filter: &DashboardFilter,
) -> Result<DashboardSnapshot, StoreError> {
    let edition_ids: Vec<i64> = base
        .editions
        .iter()
        .filter(|e| filter.includes(e))
        .map(|e| e.id)
        .collect();

    let pages = fetch_pages_for_editions(store, &edition_ids).await?;
    let page_ids: Vec<i64> = pages.iter().map(|p| p.id).collect();
    let ads = fetch_ads_for_pages(store, &page_ids).await?;

    info!(
        editions = edition_ids.len(),
        pages = pages.len(),
        ads = ads.len(),
        "Loaded dashboard snapshot"
    );
    Ok(DashboardSnapshot {
        papers: base.papers.clone(),
        editions: base.editions.clone(),
        pages,
        ads,
    })
}

/// Derive the dashboard for `filter` from `snapshot`.
///
/// Pure: the same snapshot and filter always give the same view, and nothing
/// is fetched. Editions outside the date range or the selected papers are
/// dropped, then every ad reachable through a kept page is joined to its
/// page, edition, and paper.
///
/// # Arguments
///
/// * `snapshot` - Rows fetched for the current paper selection
/// * `filter` - Selected papers and inclusive date bounds
///
/// # Returns
///
/// A [`DashboardView`] with:
/// - edition count, computed ad count, and the sum of stored edition counts
/// - distinct advertiser names and the top advertisers in range
/// - one card per selected paper
/// - ad rows, newest edition first, then paper name, page, and ad id
pub fn derive(snapshot: &DashboardSnapshot, filter: &DashboardFilter) -> DashboardView {
    let papers: HashMap<i64, &Paper> = snapshot.papers.iter().map(|p| (p.id, p)).collect();
    let editions: HashMap<i64, &Edition> = snapshot
        .editions
        .iter()
        .filter(|e| filter.includes(e) && papers.contains_key(&e.paper_id))
        .map(|e| (e.id, e))
        .collect();
    let pages: HashMap<i64, &Page> = snapshot
        .pages
        .iter()
        .filter(|p| editions.contains_key(&p.edition_id))
        .map(|p| (p.id, p))
        .collect();

    let mut seen = HashSet::new();
    let mut ads: Vec<AdRow> = Vec::new();
    for ad in &snapshot.ads {
        let Some(page) = pages.get(&ad.page_id) else {
            continue;
        };
        let Some(edition) = editions.get(&page.edition_id) else {
            continue;
        };
        let Some(paper) = papers.get(&edition.paper_id) else {
            continue;
        };
        if !seen.insert(ad.id) {
            continue;
        }
        ads.push(AdRow {
            ad: ad.clone(),
            page_num: page.page_num,
            section: page.section.clone(),
            paper_id: paper.id,
            paper_slug: paper.slug.clone(),
            paper_name: paper.name.clone(),
            date: edition.date,
        });
    }
    ads.sort_by(|a, b| {
        b.date
            .cmp(&a.date)
            .then_with(|| a.paper_name.cmp(&b.paper_name))
            .then(a.page_num.cmp(&b.page_num))
            .then(a.ad.id.cmp(&b.ad.id))
    });

    let paper_cards = snapshot
        .papers
        .iter()
        .filter(|p| filter.selected_papers.contains(&p.id))
        .map(|paper| paper_card(paper, editions.values().copied(), &ads))
        .collect();

    let view = DashboardView {
        filter: filter.clone(),
        edition_count: editions.len(),
        computed_ad_count: ads.len(),
        stored_ad_count: editions.values().map(|e| e.ad_count).sum(),
        unique_advertisers: distinct_names(ads.iter().map(|r| &r.ad)),
        top_advertisers: tally_advertisers(ads.iter().map(|r| &r.ad), TOP_ADVERTISERS_IN_RANGE),
        paper_cards,
        ads,
    };
    debug!(
        editions = view.edition_count,
        ads = view.computed_ad_count,
        stored_ads = view.stored_ad_count,
        "Derived dashboard"
    );
    view
}

fn paper_card<'a>(
    paper: &Paper,
    editions: impl Iterator<Item = &'a Edition>,
    ads: &[AdRow],
) -> PaperCard {
    let editions: Vec<&Edition> = editions.filter(|e| e.paper_id == paper.id).collect();
    let paper_ads: Vec<&Ad> = ads
        .iter()
        .filter(|r| r.paper_id == paper.id)
        .map(|r| &r.ad)
        .collect();

    PaperCard {
        paper: paper.clone(),
        edition_count: editions.len(),
        computed_ad_count: paper_ads.len(),
        stored_ad_count: editions.iter().map(|e| e.ad_count).sum(),
        unique_advertisers: distinct_names(paper_ads.iter().copied()),
        latest_date: editions.iter().map(|e| e.date).max(),
    }
}

fn distinct_names<'a>(ads: impl IntoIterator<Item = &'a Ad>) -> usize {
    ads.into_iter()
        .map(|ad| ad.advertiser.as_str())
        .collect::<HashSet<_>>()
        .len()
}

/// Count ads per [`AdvertiserKey`], highest count first, keeping at most `limit` buckets.
///
/// Ties keep the order in which buckets were first seen.
pub fn tally_advertisers<'a>(
    ads: impl IntoIterator<Item = &'a Ad>,
    limit: usize,
) -> Vec<AdvertiserTally> {
    let mut index: HashMap<AdvertiserKey, usize> = HashMap::new();
    let mut tallies: Vec<AdvertiserTally> = Vec::new();

    for ad in ads {
        let key = AdvertiserKey::of(ad);
        match index.get(&key) {
            Some(&i) => tallies[i].count += 1,
            None => {
                index.insert(key.clone(), tallies.len());
                tallies.push(AdvertiserTally {
                    key,
                    name: ad.advertiser.clone(),
                    count: 1,
                });
            }
        }
    }

    tallies.sort_by(|a, b| b.count.cmp(&a.count));
    tallies.truncate(limit);
    tallies
}

/// Outcome of handing a fetch result to [`Dashboard::apply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Current,
    /// The filter changed after the fetch started; the result was dropped.
    Stale,
}

/// A fetch started under one filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingFetch {
    pub generation: Generation,
    pub filter: DashboardFilter,
}

/// Dashboard state: base rows, current filter, and the last applied view.
#[derive(Debug)]
pub struct Dashboard {
    generations: GenerationCounter,
    base: DashboardBase,
    filter: DashboardFilter,
    view: Option<DashboardView>,
}

impl Dashboard {
    /// Start with every paper selected over the full edition date range.
    pub fn new(base: DashboardBase) -> Self {
        let filter = DashboardFilter::spanning(&base.papers, &base.editions);
        Self {
            generations: GenerationCounter::new(),
            base,
            filter,
            view: None,
        }
    }

    pub async fn open<S: AdStore>(store: &S) -> Result<Self, StoreError> {
        Ok(Self::new(load_base(store).await?))
    }

    pub fn base(&self) -> &DashboardBase {
        &self.base
    }

    pub fn filter(&self) -> &DashboardFilter {
        &self.filter
    }

    /// The most recently applied view, if any fetch has completed.
    pub fn view(&self) -> Option<&DashboardView> {
        self.view.as_ref()
    }

    /// Replace the filter. Fetches started before this call become stale.
    pub fn set_filter(&mut self, filter: DashboardFilter) -> PendingFetch {
        self.filter = filter;
        self.begin()
    }

    /// Replace papers and editions. Fetches started before this call become stale.
    pub fn set_base(&mut self, base: DashboardBase) -> PendingFetch {
        self.base = base;
        self.begin()
    }

    /// Start a fetch for the current filter.
    pub fn begin(&self) -> PendingFetch {
        PendingFetch {
            generation: self.generations.advance(),
            filter: self.filter.clone(),
        }
    }

    /// Derive and keep the view for `snapshot`, unless `generation` has been superseded.
    pub fn apply(&mut self, generation: Generation, snapshot: &DashboardSnapshot) -> Applied {
        if !self.generations.is_current(generation) {
            debug!(?generation, current = ?self.generations.current(), "Discarding stale dashboard fetch");
            return Applied::Stale;
        }
        self.view = Some(derive(snapshot, &self.filter));
        Applied::Current
    }

    /// Fetch pages and ads for the current filter and apply the result.
    pub async fn refresh<S: AdStore>(&mut self, store: &S) -> Result<Applied, StoreError> {
        let pending = self.begin();
        let snapshot = load_snapshot(store, &self.base, &pending.filter).await?;
        Ok(self.apply(pending.generation, &snapshot))
    }
}
