//! Supabase adapter: PostgREST for table rows, Storage for page images.
//!
//! Reads use the anonymous/public policy when given the anon key; writes need a
//! key whose role may insert into every table (the service role key in practice).
//!
//! Id-list filters are rendered as `col=in.(1,2,3)` and never carry more than
//! [`SupabaseStore::max_ids_per_request`] ids. Reads are paged with
//! `limit`/`offset` and checked against the `Content-Range` total.

use super::{AdStore, AdWriter, DEFAULT_MAX_IDS_PER_REQUEST, StoreError};
use crate::models::{
    Ad, Advertiser, AdvertiserPaper, AdvertiserPaperCounts, Edition, NewAd, Page, Paper,
};
use chrono::{NaiveDate, Utc};
use itertools::Itertools;
use reqwest::header::CONTENT_RANGE;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use std::fmt;
use std::time::Instant;
use tracing::{debug, instrument};
use url::Url;

/// Storage bucket holding page JPEGs.
pub const PAGE_IMAGE_BUCKET: &str = "page-images";

const UPSERT_PREFER: &str = "resolution=merge-duplicates,return=representation";

/// Rows requested per page when reading; at or below Supabase's default max-rows.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// HTTP client for a Supabase project.
#[derive(Clone)]
pub struct SupabaseStore {
    client: Client,
    base_url: String,
    key: String,
    max_ids: usize,
    page_size: usize,
}

impl fmt::Debug for SupabaseStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SupabaseStore")
            .field("base_url", &self.base_url)
            .field("max_ids", &self.max_ids)
            .field("page_size", &self.page_size)
            .finish()
    }
}

impl SupabaseStore {
    /// Create a client for the project at `base_url` (e.g. `https://xyz.supabase.co`).
    pub fn new(base_url: &str, key: &str) -> Result<Self, StoreError> {
        let parsed = Url::parse(base_url)
            .map_err(|e| StoreError::Config(format!("SUPABASE_URL {base_url:?}: {e}")))?;
        if key.trim().is_empty() {
            return Err(StoreError::Config("SUPABASE_KEY is empty".to_string()));
        }

        Ok(Self {
            client: Client::new(),
            base_url: parsed.as_str().trim_end_matches('/').to_string(),
            key: key.to_string(),
            max_ids: DEFAULT_MAX_IDS_PER_REQUEST,
            page_size: DEFAULT_PAGE_SIZE,
        })
    }

    /// Override the id-list cap. Values below 1 are raised to 1.
    pub fn with_max_ids(mut self, max_ids: usize) -> Self {
        self.max_ids = max_ids.max(1);
        self
    }

    /// Override the read page size. Values below 1 are raised to 1.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("apikey", &self.key)
            .header("Authorization", format!("Bearer {}", self.key))
    }

    async fn check(path: &str, resp: Response) -> Result<Response, StoreError> {
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        Err(StoreError::Status {
            path: path.to_string(),
            status,
            body,
        })
    }

    /// Read every row matching `query`, one page at a time.
    ///
    /// PostgREST silently caps a response at its configured max-rows, so
    /// unless `query` sets its own `limit`, rows are requested in pages of
    /// `page_size` and counted against the exact total reported in
    /// `Content-Range`. A total that cannot be reached is an error.
    ///
    /// # Arguments
    ///
    /// * `table` - Table name under `/rest/v1/`
    /// * `query` - PostgREST filters, `select`, and `order`
    ///
    /// # Returns
    ///
    /// All matching rows in query order.
    #[instrument(level = "debug", skip(self, query))]
    async fn select<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>, StoreError> {
        let t0 = Instant::now();
        if query.iter().any(|(k, _)| *k == "limit") {
            let (rows, _) = self.select_page::<T>(table, query).await?;
            return Ok(rows);
        }

        let mut rows: Vec<T> = Vec::new();
        let mut requests = 0usize;
        loop {
            let mut paged = query.to_vec();
            paged.push(("limit", self.page_size.to_string()));
            paged.push(("offset", rows.len().to_string()));
            let (page, total) = self.select_page::<T>(table, &paged).await?;
            requests += 1;
            let fetched = page.len();
            rows.extend(page);
            match total {
                Some(total) if rows.len() >= total => break,
                Some(total) if fetched == 0 => {
                    return Err(StoreError::Truncated {
                        table: table.to_string(),
                        expected: total,
                        received: rows.len(),
                    });
                }
                Some(_) => {}
                None if fetched < self.page_size => break,
                None => {}
            }
        }
        debug!(
            rows = rows.len(),
            requests,
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "select complete"
        );
        Ok(rows)
    }

    async fn select_page<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &[(&str, String)],
    ) -> Result<(Vec<T>, Option<usize>), StoreError> {
        let resp = self
            .authorized(self.client.get(self.rest_url(table)))
            .query(query)
            .header("Prefer", "count=exact")
            .send()
            .await?;
        let resp = Self::check(table, resp).await?;
        let total = resp
            .headers()
            .get(CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(content_range_total);
        Ok((resp.json().await?, total))
    }

    #[instrument(level = "debug", skip(self, body))]
    async fn upsert<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        table: &str,
        on_conflict: &str,
        body: &B,
    ) -> Result<Vec<T>, StoreError> {
        let resp = self
            .authorized(self.client.post(self.rest_url(table)))
            .query(&[("on_conflict", on_conflict)])
            .header("Prefer", UPSERT_PREFER)
            .json(body)
            .send()
            .await?;
        Ok(Self::check(table, resp).await?.json().await?)
    }

    async fn insert<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        table: &str,
        body: &B,
    ) -> Result<Vec<T>, StoreError> {
        let resp = self
            .authorized(self.client.post(self.rest_url(table)))
            .header("Prefer", "return=representation")
            .json(body)
            .send()
            .await?;
        Ok(Self::check(table, resp).await?.json().await?)
    }

    async fn patch<B: Serialize + ?Sized>(
        &self,
        table: &str,
        query: &[(&str, String)],
        body: &B,
    ) -> Result<(), StoreError> {
        let resp = self
            .authorized(self.client.patch(self.rest_url(table)))
            .query(query)
            .header("Prefer", "return=minimal")
            .json(body)
            .send()
            .await?;
        Self::check(table, resp).await?;
        Ok(())
    }

    async fn delete(&self, table: &str, query: &[(&str, String)]) -> Result<(), StoreError> {
        let resp = self
            .authorized(self.client.delete(self.rest_url(table)))
            .query(query)
            .send()
            .await?;
        Self::check(table, resp).await?;
        Ok(())
    }
}

fn eq<T: fmt::Display>(value: T) -> String {
    format!("eq.{value}")
}

fn in_list(ids: &[i64]) -> String {
    format!("in.({})", ids.iter().join(","))
}

/// Total row count from a `Content-Range` value such as `0-999/1200` or `*/0`.
fn content_range_total(value: &str) -> Option<usize> {
    value.rsplit_once('/')?.1.parse().ok()
}

fn first<T>(rows: Vec<T>, table: &'static str) -> Result<T, StoreError> {
    rows.into_iter().next().ok_or(StoreError::MissingRow(table))
}

impl AdStore for SupabaseStore {
    fn max_ids_per_request(&self) -> usize {
        self.max_ids
    }

    async fn list_papers(&self) -> Result<Vec<Paper>, StoreError> {
        self.select(
            "papers",
            &[("select", "*".into()), ("order", "name.asc".into())],
        )
        .await
    }

    async fn get_paper_by_slug(&self, slug: &str) -> Result<Option<Paper>, StoreError> {
        let rows: Vec<Paper> = self
            .select("papers", &[("select", "*".into()), ("slug", eq(slug))])
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn list_papers_by_ids(&self, ids: &[i64]) -> Result<Vec<Paper>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.select(
            "papers",
            &[
                ("select", "*".into()),
                ("id", in_list(ids)),
                ("order", "name.asc".into()),
            ],
        )
        .await
    }

    async fn list_editions(&self, paper_id: i64) -> Result<Vec<Edition>, StoreError> {
        self.select(
            "editions",
            &[
                ("select", "*".into()),
                ("paper_id", eq(paper_id)),
                ("order", "date.desc".into()),
            ],
        )
        .await
    }

    async fn list_all_editions(&self) -> Result<Vec<Edition>, StoreError> {
        self.select(
            "editions",
            &[("select", "*".into()), ("order", "date.desc,id.asc".into())],
        )
        .await
    }

    async fn find_edition(
        &self,
        paper_id: i64,
        date: NaiveDate,
    ) -> Result<Option<Edition>, StoreError> {
        let rows: Vec<Edition> = self
            .select(
                "editions",
                &[
                    ("select", "*".into()),
                    ("paper_id", eq(paper_id)),
                    ("date", eq(date)),
                    ("limit", "1".into()),
                ],
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn list_editions_by_ids(&self, ids: &[i64]) -> Result<Vec<Edition>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.select(
            "editions",
            &[
                ("select", "*".into()),
                ("id", in_list(ids)),
                ("order", "date.desc,id.asc".into()),
            ],
        )
        .await
    }

    async fn list_pages(&self, edition_ids: &[i64]) -> Result<Vec<Page>, StoreError> {
        if edition_ids.is_empty() {
            return Ok(Vec::new());
        }
        self.select(
            "pages",
            &[
                ("select", "*".into()),
                ("edition_id", in_list(edition_ids)),
                ("order", "page_num.asc,id.asc".into()),
            ],
        )
        .await
    }

    async fn list_pages_by_ids(&self, ids: &[i64]) -> Result<Vec<Page>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.select(
            "pages",
            &[
                ("select", "*".into()),
                ("id", in_list(ids)),
                ("order", "page_num.asc,id.asc".into()),
            ],
        )
        .await
    }

    async fn list_ads_by_pages(&self, page_ids: &[i64]) -> Result<Vec<Ad>, StoreError> {
        if page_ids.is_empty() {
            return Ok(Vec::new());
        }
        self.select(
            "ads",
            &[
                ("select", "*".into()),
                ("page_id", in_list(page_ids)),
                ("order", "id.asc".into()),
            ],
        )
        .await
    }

    async fn list_ads_by_advertiser(&self, advertiser_id: i64) -> Result<Vec<Ad>, StoreError> {
        self.select(
            "ads",
            &[
                ("select", "*".into()),
                ("advertiser_id", eq(advertiser_id)),
                ("order", "created_at.desc,id.desc".into()),
            ],
        )
        .await
    }

    async fn list_advertisers(
        &self,
        limit: Option<usize>,
    ) -> Result<Vec<Advertiser>, StoreError> {
        let mut query = vec![
            ("select", "*".to_string()),
            ("order", "total_ad_count.desc".to_string()),
        ];
        if let Some(limit) = limit {
            query.push(("limit", limit.to_string()));
        }
        self.select("advertisers", &query).await
    }

    async fn get_advertiser(&self, id: i64) -> Result<Option<Advertiser>, StoreError> {
        let rows: Vec<Advertiser> = self
            .select("advertisers", &[("select", "*".into()), ("id", eq(id))])
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn list_advertiser_papers(
        &self,
        advertiser_id: i64,
    ) -> Result<Vec<AdvertiserPaper>, StoreError> {
        self.select(
            "advertiser_papers",
            &[
                ("select", "*".into()),
                ("advertiser_id", eq(advertiser_id)),
                ("order", "ad_count.desc".into()),
            ],
        )
        .await
    }
}

impl AdWriter for SupabaseStore {
    async fn upsert_paper(&self, slug: &str, name: &str) -> Result<Paper, StoreError> {
        if let Some(paper) = self.get_paper_by_slug(slug).await? {
            return Ok(paper);
        }
        let rows = self
            .insert("papers", &json!({ "slug": slug, "name": name }))
            .await?;
        first(rows, "papers")
    }

    async fn upsert_edition(
        &self,
        paper_id: i64,
        date: NaiveDate,
        page_count: i64,
        ad_count: i64,
    ) -> Result<Edition, StoreError> {
        let body = json!({
            "paper_id": paper_id,
            "date": date,
            "page_count": page_count,
            "ad_count": ad_count,
        });
        let rows = self.upsert("editions", "paper_id,date", &body).await?;
        first(rows, "editions")
    }

    async fn upsert_page(
        &self,
        edition_id: i64,
        page_num: i32,
        section: &str,
        image_path: Option<&str>,
    ) -> Result<Page, StoreError> {
        let mut body = json!({
            "edition_id": edition_id,
            "page_num": page_num,
            "section": section,
        });
        if let Some(path) = image_path {
            body["image_path"] = json!(path);
        }
        let rows = self.upsert("pages", "edition_id,page_num", &body).await?;
        first(rows, "pages")
    }

    async fn replace_ads(&self, page_id: i64, ads: &[NewAd]) -> Result<Vec<Ad>, StoreError> {
        self.delete("ads", &[("page_id", eq(page_id))]).await?;
        if ads.is_empty() {
            return Ok(Vec::new());
        }
        let rows: Vec<_> = ads
            .iter()
            .map(|ad| {
                json!({
                    "page_id": page_id,
                    "advertiser": ad.advertiser,
                    "description": ad.description,
                    "location": ad.location,
                    "size": ad.size,
                    "confidence": ad.confidence,
                })
            })
            .collect();
        self.insert("ads", &rows).await
    }

    async fn find_or_create_advertiser(&self, name: &str) -> Result<Advertiser, StoreError> {
        let existing: Vec<Advertiser> = self
            .select("advertisers", &[("select", "*".into()), ("name", eq(name))])
            .await?;
        if let Some(advertiser) = existing.into_iter().next() {
            return Ok(advertiser);
        }
        let rows = self
            .insert(
                "advertisers",
                &json!({ "name": name, "first_seen": Utc::now() }),
            )
            .await?;
        first(rows, "advertisers")
    }

    async fn link_ads(&self, ad_ids: &[i64], advertiser_id: i64) -> Result<(), StoreError> {
        for chunk in ad_ids.chunks(self.max_ids) {
            self.patch(
                "ads",
                &[("id", in_list(chunk))],
                &json!({ "advertiser_id": advertiser_id }),
            )
            .await?;
        }
        Ok(())
    }

    async fn upsert_advertiser_paper(
        &self,
        counts: &AdvertiserPaperCounts,
    ) -> Result<(), StoreError> {
        let _: Vec<AdvertiserPaper> = self
            .upsert("advertiser_papers", "advertiser_id,paper_id", counts)
            .await?;
        Ok(())
    }

    async fn delete_advertiser_paper(&self, id: i64) -> Result<(), StoreError> {
        self.delete("advertiser_papers", &[("id", eq(id))]).await
    }

    async fn update_advertiser_counts(
        &self,
        advertiser_id: i64,
        paper_count: i64,
        total_ad_count: i64,
    ) -> Result<(), StoreError> {
        self.patch(
            "advertisers",
            &[("id", eq(advertiser_id))],
            &json!({ "paper_count": paper_count, "total_ad_count": total_ad_count }),
        )
        .await
    }

    #[instrument(level = "info", skip(self, jpeg), fields(bytes = jpeg.len()))]
    async fn upload_page_image(&self, path: &str, jpeg: Vec<u8>) -> Result<(), StoreError> {
        let url = format!(
            "{}/storage/v1/object/{}/{}",
            self.base_url, PAGE_IMAGE_BUCKET, path
        );
        let resp = self
            .authorized(self.client.post(&url))
            .header("Content-Type", "image/jpeg")
            .header("x-upsert", "true")
            .body(jpeg)
            .send()
            .await?;
        Self::check(path, resp).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn test_in_list_formatting() {
        assert_eq!(in_list(&[3, 1, 2]), "in.(3,1,2)");
        assert_eq!(in_list(&[]), "in.()");
    }

    #[test]
    fn test_new_rejects_bad_url() {
        assert!(matches!(
            SupabaseStore::new("not a url", "key"),
            Err(StoreError::Config(_))
        ));
    }

    #[test]
    fn test_new_rejects_empty_key() {
        assert!(matches!(
            SupabaseStore::new("https://example.supabase.co", "  "),
            Err(StoreError::Config(_))
        ));
    }

    #[test]
    fn test_rest_url_strips_trailing_slash() {
        let store = SupabaseStore::new("https://example.supabase.co/", "key").unwrap();
        assert_eq!(
            store.rest_url("papers"),
            "https://example.supabase.co/rest/v1/papers"
        );
    }

    #[test]
    fn test_content_range_total() {
        assert_eq!(content_range_total("0-999/1200"), Some(1200));
        assert_eq!(content_range_total("*/0"), Some(0));
        assert_eq!(content_range_total("0-9/*"), None);
        assert_eq!(content_range_total("garbage"), None);
    }

    /// Serve `total` paper rows over plain HTTP, at most `max_rows` per
    /// response, honoring `limit` and `offset`. `Content-Range` reports
    /// `claimed` as the total. Returns the base URL and the request targets
    /// seen so far.
    async fn serve_papers(
        total: usize,
        claimed: usize,
        max_rows: usize,
    ) -> (String, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let mut raw = Vec::new();
                let mut buf = [0u8; 4096];
                while !raw.windows(4).any(|w| w == b"\r\n\r\n") {
                    let n = socket.read(&mut buf).await.unwrap();
                    if n == 0 {
                        break;
                    }
                    raw.extend_from_slice(&buf[..n]);
                }
                let head = String::from_utf8_lossy(&raw).to_string();
                let target = head.split_whitespace().nth(1).unwrap_or("/").to_string();
                log.lock().unwrap().push(target.clone());

                let url = Url::parse(&format!("http://local{target}")).unwrap();
                let param = |name: &str| {
                    url.query_pairs()
                        .find(|(k, _)| k == name)
                        .and_then(|(_, v)| v.parse::<usize>().ok())
                };
                let offset = param("offset").unwrap_or(0).min(total);
                let limit = param("limit").unwrap_or(usize::MAX).min(max_rows);
                let end = offset.saturating_add(limit).min(total);
                let rows: Vec<_> = (offset..end)
                    .map(|i| json!({ "id": i + 1, "slug": format!("p{i}"), "name": format!("Paper {i:05}") }))
                    .collect();
                let range = if end > offset {
                    format!("{}-{}/{claimed}", offset, end - 1)
                } else {
                    format!("*/{claimed}")
                };
                let body = serde_json::to_string(&rows).unwrap();
                let resp = format!(
                    "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-range: {range}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                socket.write_all(resp.as_bytes()).await.unwrap();
                let _ = socket.shutdown().await;
            }
        });
        (format!("http://{addr}"), seen)
    }

    #[tokio::test]
    async fn test_select_reads_past_server_row_cap() {
        let (base, seen) = serve_papers(2500, 2500, 1000).await;
        let store = SupabaseStore::new(&base, "key").unwrap();

        let papers = store.list_papers().await.unwrap();

        assert_eq!(papers.len(), 2500);
        assert_eq!(papers[2499].id, 2500);
        assert_eq!(seen.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_select_uses_total_when_cap_is_below_page_size() {
        let (base, seen) = serve_papers(1050, 1050, 400).await;
        let store = SupabaseStore::new(&base, "key").unwrap();

        let papers = store.list_papers().await.unwrap();

        assert_eq!(papers.len(), 1050);
        let requests = seen.lock().unwrap().clone();
        assert_eq!(requests.len(), 3);
        assert!(requests[2].contains("offset=800"));
    }

    #[tokio::test]
    async fn test_select_errors_when_rows_go_missing() {
        let (base, _) = serve_papers(1200, 1300, 1000).await;
        let store = SupabaseStore::new(&base, "key").unwrap();

        let err = store.list_papers().await.unwrap_err();

        assert!(matches!(
            err,
            StoreError::Truncated { expected: 1300, received: 1200, .. }
        ));
    }

    #[tokio::test]
    async fn test_select_with_explicit_limit_is_one_request() {
        let (base, seen) = serve_papers(50, 50, 1000).await;
        let store = SupabaseStore::new(&base, "key").unwrap();

        let papers: Vec<Paper> = store
            .select("papers", &[("select", "*".into()), ("limit", "5".into())])
            .await
            .unwrap();

        assert_eq!(papers.len(), 5);
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_max_ids_floor() {
        let store = SupabaseStore::new("https://example.supabase.co", "key")
            .unwrap()
            .with_max_ids(0);
        assert_eq!(store.max_ids_per_request(), 1);
    }
}
