//! PageSuite e-paper scraper.
//!
//! PageSuite serves publications through one of two APIs, chosen per paper by
//! [`ApiType`]:
//!
//! - **published**: `published.json` lists editions by date; each edition links
//!   a ZIP of per-page PDFs and an `editionLink` manifest giving page order and
//!   sections. Pages are rasterized with `pdftoppm` at 150 dpi.
//! - **replica**: the replica editions API lists editions; page images are
//!   fetched from `get_image.aspx` by probing page numbers from 1 until the
//!   server answers with an error or its small placeholder image.

use super::{EditionSource, page_file_name, page_number};
use crate::config::{ApiType, PaperConfig};
use crate::models::PageMapEntry;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::fs;
use tokio::process::Command;
use tokio::sync::OnceCell;
use tracing::{debug, error, info, instrument, warn};

const PUBLISHED_BASE: &str = "https://published.pagesuite.com";
const REPLICA_EDITIONS_BASE: &str = "https://ep.prod.pagesuite.com/prod/replica/publication";
const IMAGE_BASE: &str = "https://edition.pagesuite.com/get_image.aspx";
const IMAGE_WIDTH: u32 = 1200;
/// `get_image.aspx` answers past the last page with a placeholder GIF smaller than this.
pub const PLACEHOLDER_MAX_BYTES: usize = 15_000;
const RASTER_DPI: u32 = 150;
const UNKNOWN_SECTION: &str = "Unknown";

#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("PageSuite request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("filesystem error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unexpected JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("could not read edition archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("{0} not found on PATH (install poppler-utils)")]
    MissingTool(&'static str),
}

/// One date in the edition index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EditionIndexEntry {
    /// `YYYY-MM-DD`.
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub editions: Vec<EditionRef>,
}

/// One edition as listed by the index. Unrecognized fields are kept for `metadata.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EditionRef {
    #[serde(rename = "editionGuid", default, skip_serializing_if = "Option::is_none")]
    pub edition_guid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// ZIP of page PDFs (published API).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zip: Option<String>,
    /// Manifest with page order and sections (published API).
    #[serde(rename = "editionLink", default, skip_serializing_if = "Option::is_none")]
    pub edition_link: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ReplicaEdition {
    #[serde(rename = "publishDate", default)]
    publish_date: String,
    #[serde(rename = "editionGuid", default)]
    edition_guid: String,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct EditionManifest {
    #[serde(default)]
    pages: Vec<ManifestPage>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ManifestPage {
    #[serde(default)]
    contenturl: String,
    #[serde(default)]
    section: Option<String>,
}

/// Scraper for one PageSuite publication.
///
/// The edition index is fetched once per scraper and reused.
#[derive(Debug)]
pub struct PageSuiteScraper {
    client: reqwest::Client,
    paper: PaperConfig,
    output_dir: PathBuf,
    index: OnceCell<Vec<EditionIndexEntry>>,
}

impl PageSuiteScraper {
    /// Editions are downloaded under `{output_root}/{slug}/`.
    pub fn new(paper: PaperConfig, output_root: &Path) -> Result<Self, ScrapeError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self {
            client,
            output_dir: output_root.join(&paper.slug),
            paper,
            index: OnceCell::new(),
        })
    }

    pub fn paper(&self) -> &PaperConfig {
        &self.paper
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// The edition index, fetched on first use.
    pub async fn editions(&self) -> Result<&[EditionIndexEntry], ScrapeError> {
        let index = self
            .index
            .get_or_try_init(|| async {
                info!(paper = %self.paper.name, "Fetching editions from API");
                let index = match self.paper.api_type {
                    ApiType::Published => self.fetch_published_index().await?,
                    ApiType::Replica => self.fetch_replica_index().await?,
                };
                info!(count = index.len(), "Found editions");
                Ok::<_, ScrapeError>(index)
            })
            .await?;
        Ok(index)
    }

    #[instrument(level = "info", skip_all, fields(slug = %self.paper.slug))]
    async fn fetch_published_index(&self) -> Result<Vec<EditionIndexEntry>, ScrapeError> {
        let url = format!(
            "{PUBLISHED_BASE}/{}/{}/published.json",
            self.paper.account_guid, self.paper.pub_guid
        );
        let index = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(index)
    }

    #[instrument(level = "info", skip_all, fields(slug = %self.paper.slug))]
    async fn fetch_replica_index(&self) -> Result<Vec<EditionIndexEntry>, ScrapeError> {
        let url = format!("{REPLICA_EDITIONS_BASE}/{}/editions", self.paper.pub_guid);
        let mut request = self.client.get(&url).header("accept", "application/json");
        if !self.paper.api_key.is_empty() {
            request = request.header("x-api-key", &self.paper.api_key);
        }
        let raw: Vec<ReplicaEdition> = request.send().await?.error_for_status()?.json().await?;
        Ok(normalize_replica(raw))
    }

    /// The first edition listed for `date`.
    pub async fn find_edition(&self, date: NaiveDate) -> Result<Option<EditionRef>, ScrapeError> {
        Ok(find_in_index(self.editions().await?, date).cloned())
    }

    /// Download `edition` into its date directory unless page images are already there.
    ///
    /// Returns `None` when the index entry lacks what the API type needs to download.
    #[instrument(level = "info", skip_all, fields(slug = %self.paper.slug, %date))]
    pub async fn download_edition(
        &self,
        edition: &EditionRef,
        date: NaiveDate,
    ) -> Result<Option<PathBuf>, ScrapeError> {
        let dir = self.edition_dir(date);
        if !list_page_images(&dir).await?.is_empty() {
            info!("Edition already downloaded");
            return Ok(Some(dir));
        }

        let downloaded = match self.paper.api_type {
            ApiType::Replica => self.download_replica(edition, &dir).await?,
            ApiType::Published => self.download_published(edition, &dir).await?,
        };
        if downloaded {
            fs::write(dir.join("metadata.json"), serde_json::to_vec_pretty(edition)?).await?;
            Ok(Some(dir))
        } else {
            Ok(None)
        }
    }

    async fn download_replica(&self, edition: &EditionRef, dir: &Path) -> Result<bool, ScrapeError> {
        let Some(guid) = edition.edition_guid.as_deref().filter(|g| !g.is_empty()) else {
            warn!("No edition GUID; cannot download");
            return Ok(false);
        };
        fs::create_dir_all(dir).await?;
        info!(paper = %self.paper.name, "Downloading edition (image API)");

        let mut page_map = Vec::new();
        for page_num in 1.. {
            let response = self
                .client
                .get(IMAGE_BASE)
                .query(&[
                    ("eid", guid.to_string()),
                    ("pnum", page_num.to_string()),
                    ("w", IMAGE_WIDTH.to_string()),
                ])
                .send()
                .await?;
            if response.status() != reqwest::StatusCode::OK {
                debug!(page_num, status = response.status().as_u16(), "Probe stopped");
                break;
            }
            let bytes = response.bytes().await?;
            if bytes.len() < PLACEHOLDER_MAX_BYTES {
                debug!(page_num, bytes = bytes.len(), "Placeholder reached");
                break;
            }

            fs::write(dir.join(page_file_name(page_num)), &bytes).await?;
            page_map.push(PageMapEntry {
                page_num,
                section: UNKNOWN_SECTION.to_string(),
                hash: String::new(),
                pdf_name: String::new(),
            });
            debug!(page_num, "Downloaded page");
        }

        fs::write(dir.join("page_map.json"), serde_json::to_vec_pretty(&page_map)?).await?;
        info!(pages = page_map.len(), "Downloaded pages");
        Ok(true)
    }

    async fn download_published(
        &self,
        edition: &EditionRef,
        dir: &Path,
    ) -> Result<bool, ScrapeError> {
        let Some(zip_url) = edition.zip.as_deref().filter(|z| !z.is_empty()) else {
            warn!("No ZIP URL; cannot download");
            return Ok(false);
        };
        info!(paper = %self.paper.name, "Downloading edition archive");
        let archive = self
            .client
            .get(zip_url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        fs::create_dir_all(dir).await?;

        let mut page_map = Vec::new();
        if let Some(link) = edition.edition_link.as_deref() {
            match self.fetch_manifest(link).await {
                Ok(manifest) => {
                    fs::write(dir.join("edition.json"), serde_json::to_vec_pretty(&manifest)?)
                        .await?;
                    page_map = page_map_from_manifest(&manifest);
                    fs::write(dir.join("page_map.json"), serde_json::to_vec_pretty(&page_map)?)
                        .await?;
                }
                Err(e) => warn!(error = %e, "Could not fetch edition manifest"),
            }
        }

        let pdfs = pdfs_in_zip(&archive, &page_map)?;
        if !pdfs.is_empty() {
            which::which("pdftoppm").map_err(|_| ScrapeError::MissingTool("pdftoppm"))?;
        }
        for (entry, pdf) in pdfs {
            match rasterize_first_page(&pdf, dir, entry.page_num).await {
                Ok(()) => debug!(page_num = entry.page_num, section = %entry.section, "Converted page"),
                Err(e) => error!(page_num = entry.page_num, error = %e, "Error converting page"),
            }
        }
        Ok(true)
    }

    async fn fetch_manifest(&self, link: &str) -> Result<EditionManifest, ScrapeError> {
        Ok(self
            .client
            .get(link)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?)
    }
}

impl EditionSource for PageSuiteScraper {
    fn edition_dir(&self, date: NaiveDate) -> PathBuf {
        self.output_dir.join(date.format("%Y-%m-%d").to_string())
    }

    async fn list_available_dates(&self) -> Result<Vec<NaiveDate>, ScrapeError> {
        Ok(self
            .editions()
            .await?
            .iter()
            .filter_map(|e| NaiveDate::parse_from_str(&e.date, "%Y-%m-%d").ok())
            .collect())
    }

    #[instrument(level = "info", skip_all, fields(slug = %self.paper.slug, %date))]
    async fn page_images(&self, date: NaiveDate) -> Result<Vec<PathBuf>, ScrapeError> {
        let Some(edition) = self.find_edition(date).await? else {
            info!("No edition found");
            return Ok(Vec::new());
        };
        match self.download_edition(&edition, date).await? {
            Some(dir) => list_page_images(&dir).await,
            None => Ok(Vec::new()),
        }
    }
}

/// Reshape the replica API listing into the `published.json` layout.
fn normalize_replica(raw: Vec<ReplicaEdition>) -> Vec<EditionIndexEntry> {
    raw.into_iter()
        .map(|e| EditionIndexEntry {
            date: e.publish_date.chars().take(10).collect(),
            editions: vec![EditionRef {
                edition_guid: Some(e.edition_guid),
                name: Some(e.name),
                ..EditionRef::default()
            }],
        })
        .collect()
}

fn find_in_index(index: &[EditionIndexEntry], date: NaiveDate) -> Option<&EditionRef> {
    let wanted = date.format("%Y-%m-%d").to_string();
    index
        .iter()
        .filter(|entry| entry.date == wanted)
        .find_map(|entry| entry.editions.first())
}

/// Page order and sections from the manifest. Only PDF pages are numbered entries,
/// but numbering follows the manifest position.
fn page_map_from_manifest(manifest: &EditionManifest) -> Vec<PageMapEntry> {
    manifest
        .pages
        .iter()
        .enumerate()
        .filter(|(_, page)| page.contenturl.ends_with(".pdf"))
        .map(|(i, page)| PageMapEntry {
            page_num: i as i32 + 1,
            section: page
                .section
                .clone()
                .unwrap_or_else(|| UNKNOWN_SECTION.to_string()),
            hash: page.contenturl.trim_end_matches(".pdf").to_string(),
            pdf_name: page.contenturl.clone(),
        })
        .collect()
}

/// PDFs in the archive whose base name matches a page map hash, in archive order.
fn pdfs_in_zip(
    archive: &[u8],
    page_map: &[PageMapEntry],
) -> Result<Vec<(PageMapEntry, Vec<u8>)>, ScrapeError> {
    let by_hash: HashMap<&str, &PageMapEntry> =
        page_map.iter().map(|p| (p.hash.as_str(), p)).collect();
    let mut zip = zip::ZipArchive::new(Cursor::new(archive))?;
    let mut pdfs = Vec::new();

    for i in 0..zip.len() {
        let mut file = zip.by_index(i)?;
        let name = file.name().to_string();
        if !name.to_lowercase().ends_with(".pdf") {
            continue;
        }
        let base = Path::new(&name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default();
        let Some(entry) = by_hash.get(base) else {
            continue;
        };
        // the declared size comes from the archive header and is not trusted
        let mut pdf = Vec::new();
        file.read_to_end(&mut pdf)?;
        pdfs.push(((*entry).clone(), pdf));
    }
    Ok(pdfs)
}

/// Render the first page of `pdf` to `{dir}/page_NNN.png`.
async fn rasterize_first_page(pdf: &[u8], dir: &Path, page_num: i32) -> Result<(), ScrapeError> {
    let pdf_path = dir.join(format!(".page_{page_num:03}.pdf"));
    fs::write(&pdf_path, pdf).await?;

    let prefix = dir.join(format!("page_{page_num:03}"));
    let output = Command::new("pdftoppm")
        .args(["-png", "-r", &RASTER_DPI.to_string(), "-f", "1", "-l", "1", "-singlefile"])
        .arg(&pdf_path)
        .arg(&prefix)
        .output()
        .await;
    let _ = fs::remove_file(&pdf_path).await;

    let output = output?;
    if !output.status.success() {
        return Err(ScrapeError::Io(std::io::Error::other(format!(
            "pdftoppm failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        ))));
    }
    Ok(())
}

/// `page_NNN.png` files in `dir`, ordered by page number. A missing directory has none.
pub async fn list_page_images(dir: &Path) -> Result<Vec<PathBuf>, ScrapeError> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut images = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_png = path.extension().is_some_and(|ext| ext == "png");
        if let (true, Some(n)) = (is_png, page_number(&path)) {
            images.push((n, path));
        }
    }
    images.sort_by_key(|(n, _)| *n);
    Ok(images.into_iter().map(|(_, path)| path).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_published_index_keeps_unknown_fields() {
        let json = r#"[{"date": "2026-02-27", "editions": [
            {"zip": "https://x/e.zip", "editionLink": "https://x/edition.json", "pages": 48}
        ]}]"#;
        let index: Vec<EditionIndexEntry> = serde_json::from_str(json).unwrap();
        let edition = find_in_index(&index, date("2026-02-27")).unwrap();

        assert_eq!(edition.zip.as_deref(), Some("https://x/e.zip"));
        assert_eq!(edition.edition_link.as_deref(), Some("https://x/edition.json"));
        let round_trip = serde_json::to_value(edition).unwrap();
        assert_eq!(round_trip["pages"], 48);
        assert!(find_in_index(&index, date("2026-02-26")).is_none());
    }

    #[test]
    fn test_normalize_replica() {
        let raw: Vec<ReplicaEdition> = serde_json::from_str(
            r#"[{"publishDate": "2026-02-27T00:00:00.000Z", "editionGuid": "g-1", "name": "Daily"}]"#,
        )
        .unwrap();

        let index = normalize_replica(raw);

        assert_eq!(index[0].date, "2026-02-27");
        let edition = find_in_index(&index, date("2026-02-27")).unwrap();
        assert_eq!(edition.edition_guid.as_deref(), Some("g-1"));
    }

    #[test]
    fn test_page_map_skips_non_pdf_but_keeps_position() {
        let manifest: EditionManifest = serde_json::from_str(
            r#"{"pages": [
                {"contenturl": "aaa.pdf", "section": "A"},
                {"contenturl": "ad.jpg"},
                {"contenturl": "ccc.pdf"}
            ]}"#,
        )
        .unwrap();

        let map = page_map_from_manifest(&manifest);

        assert_eq!(map.len(), 2);
        assert_eq!(map[0].page_num, 1);
        assert_eq!(map[0].hash, "aaa");
        assert_eq!(map[0].section, "A");
        assert_eq!(map[1].page_num, 3);
        assert_eq!(map[1].section, "Unknown");
        assert_eq!(map[1].pdf_name, "ccc.pdf");
    }

    #[test]
    fn test_pdfs_in_zip_match_by_hash() {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, body) in [
            ("edition/aaa.pdf", b"%PDF-a".as_slice()),
            ("edition/zzz.pdf", b"%PDF-z".as_slice()),
            ("edition/readme.txt", b"hi".as_slice()),
        ] {
            writer.start_file(name, SimpleFileOptions::default()).unwrap();
            writer.write_all(body).unwrap();
        }
        let archive = writer.finish().unwrap().into_inner();
        let page_map = vec![PageMapEntry {
            page_num: 1,
            section: "A".to_string(),
            hash: "aaa".to_string(),
            pdf_name: "aaa.pdf".to_string(),
        }];

        let pdfs = pdfs_in_zip(&archive, &page_map).unwrap();

        assert_eq!(pdfs.len(), 1);
        assert_eq!(pdfs[0].0.page_num, 1);
        assert_eq!(pdfs[0].1, b"%PDF-a");
    }

    #[tokio::test]
    async fn test_list_page_images_numeric_order() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["page_010.png", "page_002.png", "page_001.png", "notes.txt", "page_003.jpg"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }

        let names: Vec<String> = list_page_images(dir.path())
            .await
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();

        assert_eq!(names, vec!["page_001.png", "page_002.png", "page_010.png"]);
        assert!(
            list_page_images(&dir.path().join("missing"))
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_existing_download_is_reused() {
        let root = tempfile::tempdir().unwrap();
        let paper = PaperConfig {
            slug: "ajc".to_string(),
            name: "AJC".to_string(),
            account_guid: "acct".to_string(),
            pub_guid: "pub".to_string(),
            api_type: ApiType::Published,
            api_key: String::new(),
        };
        let scraper = PageSuiteScraper::new(paper, root.path()).unwrap();
        let dir = scraper.edition_dir(date("2026-02-27"));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("page_001.png"), b"x").unwrap();

        // no zip URL: a fresh download would be impossible
        let got = scraper
            .download_edition(&EditionRef::default(), date("2026-02-27"))
            .await
            .unwrap();

        assert_eq!(got, Some(dir));
    }
}
