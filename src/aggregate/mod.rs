//! Read-side aggregation over the store.
//!
//! Each view is a short chain of dependent store lookups followed by an
//! in-memory join:
//!
//! | Module | View |
//! |--------|------|
//! | [`roster`] | every paper with its newest edition and ad total |
//! | [`leaderboard`] | top advertisers by stored counters |
//! | [`dashboard`] | filterable cross-paper summary |
//! | [`edition`] | pages and ads of one edition |
//! | [`advertiser`] | one advertiser's papers and ad history |
//!
//! Id-list lookups go through [`batch`] so no request exceeds the store's limit.

pub mod advertiser;
pub mod batch;
pub mod dashboard;
pub mod edition;
pub mod generation;
pub mod leaderboard;
pub mod roster;

pub use advertiser::{AdvertiserDetail, advertiser_detail};
pub use dashboard::{Dashboard, DashboardFilter, DashboardView, derive};
pub use edition::{AllAdsTable, EditionDetail, PageViewer, SortColumn, edition_detail};
pub use leaderboard::{LEADERBOARD_SIZE, top_advertisers};
pub use roster::{PaperSummary, paper_roster};
