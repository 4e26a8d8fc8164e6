//! Command-line interface definitions for Paper Ad Scan.
//!
//! This module defines the CLI arguments and options using the `clap` crate.
//! Store and API credentials can be provided via flags or environment variables
//! (also read from `.env.local` and `.env`).

use crate::aggregate::LEADERBOARD_SIZE;
use crate::aggregate::edition::SortColumn;
use crate::ingest::{DEFAULT_CONCURRENCY, date_range};
use crate::routes::Route;
use crate::store::DEFAULT_MAX_IDS_PER_REQUEST;
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Command-line arguments for the Paper Ad Scan application.
///
/// # Examples
///
/// ```sh
/// # Scan one day of one paper and upload the results
/// paper_ad_scan scan --paper ajc --date 2026-02-27 --upload
///
/// # Every configured paper over a week
/// paper_ad_scan scan --paper all --start-date 2026-02-01 --end-date 2026-02-07
///
/// # Read-side views
/// paper_ad_scan dashboard --start 2026-02-01 --end 2026-02-28
/// paper_ad_scan edition ajc 2026-02-27 --page 3
/// paper_ad_scan view '/advertisers?q=acme'
///
/// # Offline, from a snapshot of the store
/// paper_ad_scan --snapshot store.json papers
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    #[command(flatten)]
    pub store: StoreArgs,

    /// Output format for views
    #[arg(long, value_enum, default_value_t = Format::Markdown, global = true)]
    pub format: Format,

    #[command(subcommand)]
    pub command: Command,
}

/// Where the store lives.
#[derive(Args, Debug, Clone)]
pub struct StoreArgs {
    /// Supabase project URL
    #[arg(long, env = "SUPABASE_URL", global = true)]
    pub supabase_url: Option<String>,

    /// Supabase API key
    #[arg(long, env = "SUPABASE_KEY", hide_env_values = true, global = true)]
    pub supabase_key: Option<String>,

    /// Most ids sent in one id-list query
    #[arg(long, env = "PAPER_AD_MAX_IDS", default_value_t = DEFAULT_MAX_IDS_PER_REQUEST, global = true)]
    pub max_ids: usize,

    /// Read views from a JSON snapshot of the store instead of Supabase
    #[arg(long, value_name = "FILE", global = true)]
    pub snapshot: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    Markdown,
    Json,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Download editions, find their ads, and write a CSV report
    Scan(ScanArgs),

    /// Every paper with its latest edition
    Papers,

    /// Advertisers with the most ads across all papers
    Leaderboard {
        #[arg(short = 'n', long, default_value_t = LEADERBOARD_SIZE)]
        limit: usize,
    },

    /// Totals, top advertisers, and ads for a set of papers and dates
    Dashboard {
        /// Paper slug to include; repeat for several (default: all)
        #[arg(long = "paper", value_name = "SLUG")]
        papers: Vec<String>,

        /// First edition date to include (default: oldest edition)
        #[arg(long)]
        start: Option<NaiveDate>,

        /// Last edition date to include (default: newest edition)
        #[arg(long)]
        end: Option<NaiveDate>,
    },

    /// One paper's editions
    Paper { slug: String },

    /// One edition: a page with its ads, or every ad in a table
    Edition {
        slug: String,
        date: NaiveDate,

        /// Page to show (default: first page)
        #[arg(long)]
        page: Option<i32>,

        /// Show the all-ads table instead of a single page
        #[arg(long)]
        all_ads: bool,

        /// Keep ads whose advertiser or section contains this text
        #[arg(long, requires = "all_ads")]
        filter: Option<String>,

        /// Column to sort the all-ads table by
        #[arg(long, value_enum, requires = "all_ads")]
        sort: Option<SortColumn>,

        /// Sort descending
        #[arg(long, requires = "sort")]
        desc: bool,
    },

    /// Every advertiser, optionally filtered by name
    Advertisers {
        #[arg(short, long)]
        q: Option<String>,
    },

    /// One advertiser's papers and ad history
    Advertiser { id: i64 },

    /// Open a view by address, e.g. `/ajc/2026-02-27?page=3`
    View { address: String },
}

impl From<Route> for Command {
    fn from(route: Route) -> Self {
        match route {
            Route::Dashboard => Command::Dashboard {
                papers: Vec::new(),
                start: None,
                end: None,
            },
            Route::Paper { slug } => Command::Paper { slug },
            Route::Edition { slug, date, page } => Command::Edition {
                slug,
                date,
                page,
                all_ads: false,
                filter: None,
                sort: None,
                desc: false,
            },
            Route::Advertisers { query } => Command::Advertisers { q: query },
            Route::Advertiser { id } => Command::Advertiser { id },
        }
    }
}

/// Arguments for `scan`.
#[derive(Args, Debug, Clone, PartialEq)]
pub struct ScanArgs {
    /// Paper slug (e.g. ajc, dmn) or "all"
    #[arg(long)]
    pub paper: String,

    /// Single date to process (YYYY-MM-DD)
    #[arg(long, conflicts_with_all = ["start_date", "end_date"])]
    pub date: Option<NaiveDate>,

    /// Start date for range (YYYY-MM-DD)
    #[arg(long, requires = "end_date")]
    pub start_date: Option<NaiveDate>,

    /// End date for range (YYYY-MM-DD), inclusive
    #[arg(long, requires = "start_date")]
    pub end_date: Option<NaiveDate>,

    /// Analyze existing page images in an edition directory
    #[arg(long, value_name = "DIR", conflicts_with_all = ["date", "start_date"])]
    pub analyze: Option<PathBuf>,

    /// List available edition dates
    #[arg(long)]
    pub list_dates: bool,

    /// Only include ads matching the client list
    #[arg(long)]
    pub clients_only: bool,

    /// Upload results to Supabase
    #[arg(long)]
    pub upload: bool,

    /// Output CSV file path
    #[arg(short, long, default_value = "output/ad_report.csv")]
    pub output: PathBuf,

    /// Directory editions are downloaded into
    #[arg(long, default_value = "output")]
    pub download_dir: PathBuf,

    /// Pages analyzed at once
    #[arg(long, default_value_t = DEFAULT_CONCURRENCY)]
    pub concurrency: usize,

    /// Paper configuration file
    #[arg(long, default_value = "papers.json")]
    pub papers: PathBuf,

    /// Client list, one name per line
    #[arg(long, default_value = "clients.txt")]
    pub clients: PathBuf,

    /// Anthropic API key
    #[arg(long, env = "ANTHROPIC_API_KEY", hide_env_values = true)]
    pub anthropic_api_key: Option<String>,

    /// Anthropic API base URL
    #[arg(long, env = "ANTHROPIC_BASE_URL")]
    pub anthropic_base_url: Option<String>,

    /// Vision model name
    #[arg(long, env = "PAPER_AD_MODEL")]
    pub model: Option<String>,
}

/// What a `scan` invocation asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanMode {
    ListDates,
    Analyze(PathBuf),
    Dates(Vec<NaiveDate>),
}

impl ScanArgs {
    /// `None` when no date, range, directory, or listing was requested.
    pub fn mode(&self) -> Option<ScanMode> {
        if self.list_dates {
            return Some(ScanMode::ListDates);
        }
        if let Some(dir) = &self.analyze {
            return Some(ScanMode::Analyze(dir.clone()));
        }
        match (self.date, self.start_date, self.end_date) {
            (Some(date), _, _) => Some(ScanMode::Dates(vec![date])),
            (None, Some(start), Some(end)) => Some(ScanMode::Dates(date_range(start, end))),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn scan_args(argv: &[&str]) -> ScanArgs {
        let mut full = vec!["paper_ad_scan", "scan"];
        full.extend_from_slice(argv);
        match Cli::parse_from(full).command {
            Command::Scan(scan) => scan,
            other => panic!("expected scan, got {other:?}"),
        }
    }

    #[test]
    fn test_scan_single_date() {
        let scan = scan_args(&["--paper", "ajc", "--date", "2026-02-27", "--upload"]);

        assert_eq!(scan.paper, "ajc");
        assert!(scan.upload);
        assert_eq!(scan.output, PathBuf::from("output/ad_report.csv"));
        assert_eq!(scan.concurrency, DEFAULT_CONCURRENCY);
        assert_eq!(scan.mode(), Some(ScanMode::Dates(vec![date("2026-02-27")])));
    }

    #[test]
    fn test_scan_range_is_inclusive() {
        let scan = scan_args(&[
            "--paper",
            "all",
            "--start-date",
            "2026-02-27",
            "--end-date",
            "2026-03-01",
        ]);
        let Some(ScanMode::Dates(dates)) = scan.mode() else {
            panic!("expected dates");
        };
        assert_eq!(dates.len(), 3);
        assert_eq!(dates[2], date("2026-03-01"));
    }

    #[test]
    fn test_scan_without_mode() {
        let scan = scan_args(&["--paper", "ajc"]);
        assert_eq!(scan.mode(), None);
    }

    #[test]
    fn test_scan_rejects_half_range_and_bad_date() {
        assert!(
            Cli::try_parse_from(["paper_ad_scan", "scan", "--paper", "ajc", "--start-date", "2026-02-01"])
                .is_err()
        );
        assert!(
            Cli::try_parse_from(["paper_ad_scan", "scan", "--paper", "ajc", "--date", "02/27/2026"])
                .is_err()
        );
    }

    #[test]
    fn test_global_store_args() {
        let cli = Cli::parse_from([
            "paper_ad_scan",
            "papers",
            "--snapshot",
            "store.json",
            "--max-ids",
            "50",
            "--format",
            "json",
        ]);

        assert_eq!(cli.command, Command::Papers);
        assert_eq!(cli.store.snapshot, Some(PathBuf::from("store.json")));
        assert_eq!(cli.store.max_ids, 50);
        assert_eq!(cli.format, Format::Json);
    }

    #[test]
    fn test_edition_table_flags() {
        let cli = Cli::parse_from([
            "paper_ad_scan",
            "edition",
            "ajc",
            "2026-02-27",
            "--all-ads",
            "--sort",
            "confidence",
            "--desc",
        ]);
        let Command::Edition { sort, desc, all_ads, .. } = cli.command else {
            panic!("expected edition");
        };
        assert!(all_ads);
        assert_eq!(sort, Some(SortColumn::Confidence));
        assert!(desc);
    }

    #[test]
    fn test_routes_map_to_commands() {
        let cmd = Command::from(Route::parse("/ajc/2026-02-27?page=3").unwrap());
        assert_eq!(
            cmd,
            Command::Edition {
                slug: "ajc".to_string(),
                date: date("2026-02-27"),
                page: Some(3),
                all_ads: false,
                filter: None,
                sort: None,
                desc: false,
            }
        );
        assert_eq!(
            Command::from(Route::parse("/advertisers?q=acme").unwrap()),
            Command::Advertisers {
                q: Some("acme".to_string())
            }
        );
    }
}
