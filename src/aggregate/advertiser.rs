//! Advertiser detail: per-paper presence and full ad history.

use super::batch::{fetch_editions_by_ids, fetch_pages_by_ids, fetch_papers_by_ids};
use crate::models::{Ad, Advertiser, AdvertiserPaper, Edition, Page, Paper};
use crate::store::{AdStore, StoreError};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{info, instrument, warn};

/// One `advertiser_papers` row joined to its paper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaperPresence {
    pub aggregate: AdvertiserPaper,
    /// `None` if the paper row no longer exists.
    pub paper: Option<Paper>,
}

/// An ad of the advertiser with its page, edition, and paper context.
///
/// Context fields are `None` when a row along ad → page → edition → paper is missing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdHistoryRow {
    pub ad: Ad,
    pub page_num: Option<i32>,
    pub section: Option<String>,
    pub date: Option<NaiveDate>,
    pub paper: Option<Paper>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdvertiserDetail {
    pub advertiser: Advertiser,
    /// Highest `ad_count` first.
    pub papers: Vec<PaperPresence>,
    /// Newest ad first.
    pub history: Vec<AdHistoryRow>,
}

impl AdvertiserDetail {
    /// Ads found linked to the advertiser, as opposed to its stored `total_ad_count`.
    pub fn computed_ad_count(&self) -> usize {
        self.history.len()
    }
}

/// Load the advertiser with `advertiser_id`, or `None` if there is no such row.
#[instrument(level = "info", skip(store))]
pub async fn advertiser_detail<S: AdStore>(
    store: &S,
    advertiser_id: i64,
) -> Result<Option<AdvertiserDetail>, StoreError> {
    let Some(advertiser) = store.get_advertiser(advertiser_id).await? else {
        return Ok(None);
    };
    let aggregates = store.list_advertiser_papers(advertiser_id).await?;
    let ads = store.list_ads_by_advertiser(advertiser_id).await?;

    let page_ids: Vec<i64> = ads.iter().map(|a| a.page_id).collect();
    let pages: HashMap<i64, Page> = fetch_pages_by_ids(store, &page_ids)
        .await?
        .into_iter()
        .map(|p| (p.id, p))
        .collect();

    let edition_ids: Vec<i64> = pages.values().map(|p| p.edition_id).collect();
    let editions: HashMap<i64, Edition> = fetch_editions_by_ids(store, &edition_ids)
        .await?
        .into_iter()
        .map(|e| (e.id, e))
        .collect();

    let paper_ids: Vec<i64> = editions
        .values()
        .map(|e| e.paper_id)
        .chain(aggregates.iter().map(|a| a.paper_id))
        .collect();
    let papers: HashMap<i64, Paper> = fetch_papers_by_ids(store, &paper_ids)
        .await?
        .into_iter()
        .map(|p| (p.id, p))
        .collect();

    let mut presence: Vec<PaperPresence> = aggregates
        .into_iter()
        .map(|aggregate| PaperPresence {
            paper: papers.get(&aggregate.paper_id).cloned(),
            aggregate,
        })
        .collect();
    presence.sort_by(|a, b| b.aggregate.ad_count.cmp(&a.aggregate.ad_count));

    let mut history: Vec<AdHistoryRow> = ads
        .into_iter()
        .map(|ad| {
            let page = pages.get(&ad.page_id);
            let edition = page.and_then(|p| editions.get(&p.edition_id));
            let paper = edition.and_then(|e| papers.get(&e.paper_id));
            if paper.is_none() {
                warn!(ad_id = ad.id, page_id = ad.page_id, "Ad context incomplete");
            }
            AdHistoryRow {
                page_num: page.map(|p| p.page_num),
                section: page.and_then(|p| p.section.clone()),
                date: edition.map(|e| e.date),
                paper: paper.cloned(),
                ad,
            }
        })
        .collect();
    history.sort_by(|a, b| b.ad.created_at.cmp(&a.ad.created_at));

    info!(
        papers = presence.len(),
        ads = history.len(),
        stored_total = advertiser.total_ad_count,
        "Loaded advertiser detail"
    );
    Ok(Some(AdvertiserDetail {
        advertiser,
        papers: presence,
        history,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[tokio::test]
    async fn test_missing_advertiser_is_none() {
        let store = MemoryStore::new();
        assert!(advertiser_detail(&store, 42).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_history_joined_and_newest_first() {
        let store = MemoryStore::new();
        let ajc = store.add_paper("ajc", "Atlanta Journal-Constitution");
        let dmn = store.add_paper("dmn", "Dallas Morning News");
        let acme = store.add_advertiser("Acme Co", 2, 3);
        store.add_advertiser_paper(acme.id, ajc.id, 1);
        store.add_advertiser_paper(acme.id, dmn.id, 2);

        let e1 = store.add_edition(ajc.id, date("2026-02-20"), 1, 1);
        let p1 = store.add_page(e1.id, 3, "Metro");
        let oldest = store.add_ad(p1.id, "Acme Co", Some(acme.id));

        let e2 = store.add_edition(dmn.id, date("2026-02-27"), 2, 2);
        let p2 = store.add_page(e2.id, 1, "A");
        store.add_ad(p2.id, "ACME Company", Some(acme.id));
        let newest = store.add_ad(p2.id, "Acme Co", Some(acme.id));
        // unrelated ad on the same page
        store.add_ad(p2.id, "Bolt Hardware", None);

        let detail = advertiser_detail(&store, acme.id).await.unwrap().unwrap();

        assert_eq!(detail.computed_ad_count(), 3);
        assert_eq!(detail.history[0].ad.id, newest.id);
        assert_eq!(detail.history[2].ad.id, oldest.id);

        let last = &detail.history[2];
        assert_eq!(last.page_num, Some(3));
        assert_eq!(last.section.as_deref(), Some("Metro"));
        assert_eq!(last.date, Some(date("2026-02-20")));
        assert_eq!(last.paper.as_ref().unwrap().slug, "ajc");

        let slugs: Vec<&str> = detail
            .papers
            .iter()
            .map(|p| p.paper.as_ref().unwrap().slug.as_str())
            .collect();
        assert_eq!(slugs, vec!["dmn", "ajc"]);
    }

    #[tokio::test]
    async fn test_orphaned_ad_kept_without_context() {
        let store = MemoryStore::new();
        let acme = store.add_advertiser("Acme Co", 0, 1);
        store.add_ad(999, "Acme Co", Some(acme.id));

        let detail = advertiser_detail(&store, acme.id).await.unwrap().unwrap();

        assert_eq!(detail.history.len(), 1);
        assert_eq!(detail.history[0].page_num, None);
        assert_eq!(detail.history[0].paper, None);
    }
}
