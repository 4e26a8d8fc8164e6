//! E-paper scrapers that download edition page images.
//!
//! # Supported Sources
//!
//! | Source | Module | Method | Notes |
//! |--------|--------|--------|-------|
//! | PageSuite published | [`pagesuite`] | `published.json` + ZIP of PDFs | PDFs rasterized with `pdftoppm` |
//! | PageSuite replica | [`pagesuite`] | replica editions API + `get_image.aspx` | probes page numbers until a placeholder |
//!
//! # Common Patterns
//!
//! Each scraper implements [`EditionSource`] and leaves behind, per edition:
//!
//! ```text
//! {output}/{slug}/{date}/
//! ├── page_001.png
//! ├── page_002.png
//! ├── page_map.json    # [{page_num, section, hash, pdf_name}]
//! └── metadata.json    # the edition index entry
//! ```

use chrono::NaiveDate;
use std::path::{Path, PathBuf};

pub mod pagesuite;

pub use pagesuite::{PageSuiteScraper, ScrapeError, list_page_images};

/// A publication whose editions can be listed and downloaded by date.
#[allow(async_fn_in_trait)]
pub trait EditionSource {
    /// Directory the edition for `date` is (or will be) downloaded into.
    fn edition_dir(&self, date: NaiveDate) -> PathBuf;

    /// Dates with an edition available, in the order the source lists them.
    async fn list_available_dates(&self) -> Result<Vec<NaiveDate>, ScrapeError>;

    /// Download the edition for `date` if needed and return its page images in page order.
    ///
    /// An empty list means the source has no edition for that date.
    async fn page_images(&self, date: NaiveDate) -> Result<Vec<PathBuf>, ScrapeError>;
}

/// Page number encoded in a `page_NNN.png` file name.
pub fn page_number(path: &Path) -> Option<i32> {
    path.file_stem()?
        .to_str()?
        .strip_prefix("page_")?
        .parse()
        .ok()
}

/// File name of the image for `page_num`, e.g. `page_007.png`.
pub fn page_file_name(page_num: i32) -> String {
    format!("page_{page_num:03}.png")
}
