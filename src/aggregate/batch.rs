//! Chunked id-list lookups.
//!
//! The store caps how many ids one `in.(...)` query may carry. These helpers
//! split an id list into chunks of at most [`AdStore::max_ids_per_request`],
//! issue one request per chunk in order, and merge the results.
//!
//! A failing chunk aborts the whole lookup with [`StoreError::Batch`]; partial
//! results are never returned, so a caller cannot undercount without knowing it.

use crate::models::{Ad, Edition, Page, Paper};
use crate::store::{AdStore, StoreError};
use std::collections::HashSet;
use std::future::Future;
use tracing::{debug, warn};

/// Number of requests needed to look up `len` ids at `limit` ids per request.
pub fn batch_count(len: usize, limit: usize) -> usize {
    len.div_ceil(limit.max(1))
}

/// Sort and deduplicate an id list so chunks are disjoint.
pub fn unique_ids(ids: impl IntoIterator<Item = i64>) -> Vec<i64> {
    let mut ids: Vec<i64> = ids.into_iter().collect();
    ids.sort_unstable();
    ids.dedup();
    ids
}

/// Run `fetch` once per chunk of `ids` and concatenate the rows.
pub async fn fetch_in_batches<'a, T, F, Fut>(
    ids: &'a [i64],
    limit: usize,
    mut fetch: F,
) -> Result<Vec<T>, StoreError>
where
    F: FnMut(&'a [i64]) -> Fut,
    Fut: Future<Output = Result<Vec<T>, StoreError>>,
{
    let of = batch_count(ids.len(), limit);
    let mut rows = Vec::new();
    for (i, chunk) in ids.chunks(limit.max(1)).enumerate() {
        match fetch(chunk).await {
            Ok(mut batch) => {
                debug!(batch = i + 1, of, ids = chunk.len(), rows = batch.len(), "batch fetched");
                rows.append(&mut batch);
            }
            Err(e) => {
                warn!(batch = i + 1, of, error = %e, "batch failed; aborting lookup");
                return Err(StoreError::Batch {
                    batch: i + 1,
                    of,
                    source: Box::new(e),
                });
            }
        }
    }
    Ok(rows)
}

/// Ads on any of `page_ids`, without duplicates, ordered by id.
pub async fn fetch_ads_for_pages<S: AdStore>(
    store: &S,
    page_ids: &[i64],
) -> Result<Vec<Ad>, StoreError> {
    let ids = unique_ids(page_ids.iter().copied());
    let ads = fetch_in_batches(&ids, store.max_ids_per_request(), |chunk| {
        store.list_ads_by_pages(chunk)
    })
    .await?;

    let mut seen = HashSet::with_capacity(ads.len());
    let mut merged: Vec<Ad> = ads.into_iter().filter(|ad| seen.insert(ad.id)).collect();
    merged.sort_by_key(|ad| ad.id);
    Ok(merged)
}

/// Pages of any of `edition_ids`, ordered by page number.
pub async fn fetch_pages_for_editions<S: AdStore>(
    store: &S,
    edition_ids: &[i64],
) -> Result<Vec<Page>, StoreError> {
    let ids = unique_ids(edition_ids.iter().copied());
    let mut pages = fetch_in_batches(&ids, store.max_ids_per_request(), |chunk| {
        store.list_pages(chunk)
    })
    .await?;
    pages.sort_by(|a, b| a.page_num.cmp(&b.page_num).then(a.id.cmp(&b.id)));
    Ok(pages)
}

pub async fn fetch_pages_by_ids<S: AdStore>(
    store: &S,
    page_ids: &[i64],
) -> Result<Vec<Page>, StoreError> {
    let ids = unique_ids(page_ids.iter().copied());
    fetch_in_batches(&ids, store.max_ids_per_request(), |chunk| {
        store.list_pages_by_ids(chunk)
    })
    .await
}

pub async fn fetch_editions_by_ids<S: AdStore>(
    store: &S,
    edition_ids: &[i64],
) -> Result<Vec<Edition>, StoreError> {
    let ids = unique_ids(edition_ids.iter().copied());
    fetch_in_batches(&ids, store.max_ids_per_request(), |chunk| {
        store.list_editions_by_ids(chunk)
    })
    .await
}

pub async fn fetch_papers_by_ids<S: AdStore>(
    store: &S,
    paper_ids: &[i64],
) -> Result<Vec<Paper>, StoreError> {
    let ids = unique_ids(paper_ids.iter().copied());
    fetch_in_batches(&ids, store.max_ids_per_request(), |chunk| {
        store.list_papers_by_ids(chunk)
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::NaiveDate;

    fn store_with_pages(count: usize) -> (MemoryStore, Vec<i64>) {
        let store = MemoryStore::new();
        let paper = store.add_paper("ajc", "AJC");
        let edition = store.add_edition(
            paper.id,
            NaiveDate::from_ymd_opt(2026, 2, 27).unwrap(),
            count as i64,
            0,
        );
        let mut page_ids = Vec::new();
        for n in 0..count {
            let page = store.add_page(edition.id, n as i32 + 1, "A");
            store.add_ad(page.id, &format!("Advertiser {n}"), None);
            page_ids.push(page.id);
        }
        (store, page_ids)
    }

    #[test]
    fn test_batch_count() {
        assert_eq!(batch_count(0, 200), 0);
        assert_eq!(batch_count(1, 200), 1);
        assert_eq!(batch_count(200, 200), 1);
        assert_eq!(batch_count(201, 200), 2);
        assert_eq!(batch_count(450, 200), 3);
        assert_eq!(batch_count(5, 0), 5);
    }

    #[tokio::test]
    async fn test_request_count_matches_ceiling() {
        let (store, page_ids) = store_with_pages(450);

        let ads = fetch_ads_for_pages(&store, &page_ids).await.unwrap();

        let requests = store.ad_requests();
        assert_eq!(requests.len(), batch_count(450, 200));
        assert!(requests.iter().all(|&n| n <= 200));
        assert_eq!(requests.iter().sum::<usize>(), 450);
        assert_eq!(ads.len(), 450);
    }

    #[tokio::test]
    async fn test_merged_ads_have_no_duplicates() {
        let (store, mut page_ids) = store_with_pages(7);
        let store = store.with_max_ids(3);
        // repeated ids must not produce repeated ads
        page_ids.extend(page_ids.clone());

        let ads = fetch_ads_for_pages(&store, &page_ids).await.unwrap();

        let unique: HashSet<i64> = ads.iter().map(|a| a.id).collect();
        assert_eq!(ads.len(), 7);
        assert_eq!(unique.len(), 7);
        assert_eq!(store.ad_requests(), vec![3, 3, 1]);
    }

    #[tokio::test]
    async fn test_empty_id_list_makes_no_requests() {
        let store = MemoryStore::new();
        let ads = fetch_ads_for_pages(&store, &[]).await.unwrap();
        assert!(ads.is_empty());
        assert!(store.ad_requests().is_empty());
    }

    #[tokio::test]
    async fn test_failed_batch_aborts_and_reports_position() {
        let (store, page_ids) = store_with_pages(5);
        let store = store.with_max_ids(2);
        store.fail_ads_for_page(page_ids[2]);

        let err = fetch_ads_for_pages(&store, &page_ids).await.unwrap_err();

        match err {
            StoreError::Batch { batch, of, .. } => {
                assert_eq!(batch, 2);
                assert_eq!(of, 3);
            }
            other => panic!("expected batch error, got {other:?}"),
        }
        // the third batch is never requested
        assert_eq!(store.ad_requests(), vec![2, 2]);
    }
}
