//! # Paper Ad Scan
//!
//! Tracks newspaper advertising across PageSuite e-paper editions. Page images
//! are downloaded, sent to a vision model that lists the ads on each page, and
//! stored in Supabase; a read side rolls the stored rows up into per-paper,
//! per-edition, and per-advertiser views.
//!
//! ## Architecture
//!
//! 1. **Scraping** ([`scrapers`]): download an edition's pages as PNG
//! 2. **Analysis** ([`analyzer`], [`imaging`]): find ads on each page (a few pages at a time)
//! 3. **Ingestion** ([`ingest`]): write `all_ads.json`, upload pages and ads, resolve advertisers
//! 4. **Views** ([`aggregate`], [`routes`], [`outputs`]): roster, leaderboard, dashboard,
//!    edition, and advertiser views over an [`store::AdStore`]

pub mod aggregate;
pub mod analyzer;
pub mod cli;
pub mod config;
pub mod imaging;
pub mod ingest;
pub mod matcher;
pub mod models;
pub mod notify;
pub mod outputs;
pub mod routes;
pub mod scrapers;
pub mod store;
pub mod utils;
