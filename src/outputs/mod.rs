//! Output generation for reports and views.
//!
//! # Submodules
//!
//! - [`json`]: writes an edition's `all_ads.json` and serializes views for `--format json`
//! - [`csv`]: the ad report written by `scan`
//! - [`markdown`]: renders roster, dashboard, edition, and advertiser views
//!
//! # Output Structure
//!
//! ```text
//! output/
//! ├── ad_report.csv            # every ad of the run
//! └── ajc/
//!     └── 2026-02-27/
//!         ├── page_001.png
//!         ├── page_map.json
//!         ├── metadata.json
//!         └── all_ads.json
//! ```

pub mod csv;
pub mod json;
pub mod markdown;
