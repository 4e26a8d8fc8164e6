//! Paper roster and per-paper edition listings.

use super::batch::{fetch_ads_for_pages, fetch_pages_for_editions};
use crate::models::{Edition, Paper};
use crate::store::{AdStore, StoreError};
use serde::Serialize;
use tracing::{debug, info, instrument};

/// One row of the roster: a paper, its newest edition, and its ad total.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaperSummary {
    pub paper: Paper,
    /// `None` for a paper with no editions yet.
    pub latest_edition: Option<Edition>,
    /// Ads counted through editions → pages → ads, not the stored edition counters.
    pub total_ad_count: usize,
}

/// A paper and all of its editions, newest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaperEditions {
    pub paper: Paper,
    pub editions: Vec<Edition>,
}

/// Build the roster of every paper, ordered by paper name.
///
/// Papers with no editions are reported with `latest_edition: None` and a zero
/// count; that is a normal state for a newly added paper.
#[instrument(level = "info", skip_all)]
pub async fn paper_roster<S: AdStore>(store: &S) -> Result<Vec<PaperSummary>, StoreError> {
    let papers = store.list_papers().await?;
    let mut roster = Vec::with_capacity(papers.len());

    for paper in papers {
        let editions = store.list_editions(paper.id).await?;
        let latest_edition = editions.iter().max_by_key(|e| e.date).cloned();

        let total_ad_count = if editions.is_empty() {
            0
        } else {
            let edition_ids: Vec<i64> = editions.iter().map(|e| e.id).collect();
            let pages = fetch_pages_for_editions(store, &edition_ids).await?;
            let page_ids: Vec<i64> = pages.iter().map(|p| p.id).collect();
            fetch_ads_for_pages(store, &page_ids).await?.len()
        };

        debug!(
            slug = %paper.slug,
            editions = editions.len(),
            total_ad_count,
            "Summarized paper"
        );
        roster.push(PaperSummary {
            paper,
            latest_edition,
            total_ad_count,
        });
    }

    info!(papers = roster.len(), "Built paper roster");
    Ok(roster)
}

/// Look up a paper by slug with its editions. `None` if the slug is unknown.
#[instrument(level = "info", skip(store))]
pub async fn paper_editions<S: AdStore>(
    store: &S,
    slug: &str,
) -> Result<Option<PaperEditions>, StoreError> {
    let Some(paper) = store.get_paper_by_slug(slug).await? else {
        return Ok(None);
    };
    let editions = store.list_editions(paper.id).await?;
    Ok(Some(PaperEditions { paper, editions }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::NaiveDate;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[tokio::test]
    async fn test_paper_without_editions_is_not_an_error() {
        let store = MemoryStore::new();
        store.add_paper("new", "New Paper");

        let roster = paper_roster(&store).await.unwrap();

        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0].latest_edition, None);
        assert_eq!(roster[0].total_ad_count, 0);
        assert!(store.ad_requests().is_empty());
    }

    #[tokio::test]
    async fn test_latest_edition_and_total_across_editions() {
        let store = MemoryStore::new();
        let ajc = store.add_paper("ajc", "Atlanta Journal-Constitution");
        let older = store.add_edition(ajc.id, date("2026-02-26"), 1, 2);
        let newer = store.add_edition(ajc.id, date("2026-02-27"), 2, 1);
        let p1 = store.add_page(older.id, 1, "A");
        store.add_ad(p1.id, "Acme Co", None);
        store.add_ad(p1.id, "Bolt Hardware", None);
        let p2 = store.add_page(newer.id, 1, "A");
        store.add_page(newer.id, 2, "B");
        store.add_ad(p2.id, "Acme Co", None);

        let roster = paper_roster(&store).await.unwrap();

        assert_eq!(roster[0].latest_edition.as_ref().unwrap().id, newer.id);
        assert_eq!(roster[0].total_ad_count, 3);
    }

    #[tokio::test]
    async fn test_roster_ordered_by_name() {
        let store = MemoryStore::new();
        store.add_paper("dmn", "Dallas Morning News");
        store.add_paper("ajc", "Atlanta Journal-Constitution");

        let slugs: Vec<String> = paper_roster(&store)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.paper.slug)
            .collect();
        assert_eq!(slugs, vec!["ajc", "dmn"]);
    }

    #[tokio::test]
    async fn test_paper_editions_unknown_slug() {
        let store = MemoryStore::new();
        assert_eq!(paper_editions(&store, "nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_paper_editions_newest_first() {
        let store = MemoryStore::new();
        let ajc = store.add_paper("ajc", "AJC");
        store.add_edition(ajc.id, date("2026-02-26"), 1, 0);
        store.add_edition(ajc.id, date("2026-02-27"), 1, 0);

        let listing = paper_editions(&store, "ajc").await.unwrap().unwrap();
        assert_eq!(listing.editions[0].date, date("2026-02-27"));
    }
}
