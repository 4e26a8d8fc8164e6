//! Global advertiser leaderboard, straight from the stored counters.

use crate::models::Advertiser;
use crate::store::{AdStore, StoreError};
use tracing::instrument;

/// Number of advertisers shown on the leaderboard.
pub const LEADERBOARD_SIZE: usize = 10;

/// The `n` advertisers with the highest stored `total_ad_count`.
///
/// Counters are taken as stored, not recomputed. Ties keep the store's order.
#[instrument(level = "info", skip(store))]
pub async fn top_advertisers<S: AdStore>(
    store: &S,
    n: usize,
) -> Result<Vec<Advertiser>, StoreError> {
    store.list_advertisers(Some(n)).await
}

/// Every advertiser, highest stored total first.
pub async fn all_advertisers<S: AdStore>(store: &S) -> Result<Vec<Advertiser>, StoreError> {
    store.list_advertisers(None).await
}

/// Case-insensitive substring filter on advertiser name. An empty query keeps everything.
pub fn filter_by_name<'a>(advertisers: &'a [Advertiser], query: &str) -> Vec<&'a Advertiser> {
    let needle = query.trim().to_lowercase();
    advertisers
        .iter()
        .filter(|a| needle.is_empty() || a.name.to_lowercase().contains(&needle))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_top_advertisers_uses_stored_totals() {
        let store = MemoryStore::new();
        for i in 0..12 {
            store.add_advertiser(&format!("Advertiser {i}"), 1, i);
        }

        let top = top_advertisers(&store, LEADERBOARD_SIZE).await.unwrap();

        assert_eq!(top.len(), 10);
        assert_eq!(top[0].name, "Advertiser 11");
        assert!(top.windows(2).all(|w| w[0].total_ad_count >= w[1].total_ad_count));
    }

    #[tokio::test]
    async fn test_counters_not_recomputed() {
        let store = MemoryStore::new();
        // stored counter says 40 even though no ad rows exist
        store.add_advertiser("Acme Co", 2, 40);

        let top = top_advertisers(&store, LEADERBOARD_SIZE).await.unwrap();
        assert_eq!(top[0].total_ad_count, 40);
    }

    #[test]
    fn test_filter_by_name() {
        let store = MemoryStore::new();
        let advertisers = vec![
            store.add_advertiser("Acme Co", 1, 3),
            store.add_advertiser("Bolt Hardware", 1, 2),
            store.add_advertiser("ACME Tires", 1, 1),
        ];

        let names: Vec<&str> = filter_by_name(&advertisers, " acme ")
            .into_iter()
            .map(|a| a.name.as_str())
            .collect();
        assert_eq!(names, vec!["Acme Co", "ACME Tires"]);
        assert_eq!(filter_by_name(&advertisers, "").len(), 3);
    }
}
