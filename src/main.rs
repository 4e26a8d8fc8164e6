//! Paper Ad Scan command-line entry point.
//!
//! ## Usage
//!
//! ```sh
//! paper_ad_scan scan --paper ajc --date 2026-02-27 --upload
//! paper_ad_scan dashboard --paper ajc --start 2026-02-01
//! ```
//!
//! `scan` runs the ingestion pipeline; every other subcommand renders a view
//! from Supabase, or from a JSON snapshot given with `--snapshot`.

use clap::Parser;
use paper_ad_scan::aggregate::advertiser::advertiser_detail;
use paper_ad_scan::aggregate::edition::{SortDirection, edition_detail};
use paper_ad_scan::aggregate::leaderboard::{all_advertisers, filter_by_name, top_advertisers};
use paper_ad_scan::aggregate::roster::{paper_editions, paper_roster};
use paper_ad_scan::aggregate::Dashboard;
use paper_ad_scan::analyzer::{ClaudeVision, VisionAnalyzer};
use paper_ad_scan::cli::{Cli, Command, Format, ScanArgs, ScanMode, StoreArgs};
use paper_ad_scan::config::{load_clients, load_paper_configs, select_papers};
use paper_ad_scan::ingest::Ingest;
use paper_ad_scan::matcher::filter_client_ads;
use paper_ad_scan::models::Advertiser;
use paper_ad_scan::notify::Notifier;
use paper_ad_scan::outputs::{csv, json, markdown};
use paper_ad_scan::routes::Route;
use paper_ad_scan::scrapers::{EditionSource, PageSuiteScraper};
use paper_ad_scan::store::{AdStore, MemoryStore, StoreError, SupabaseStore};
use paper_ad_scan::utils::ensure_writable_dir;
use serde::Serialize;
use std::collections::BTreeSet;
use std::error::Error;
use tracing::{debug, error, info, instrument};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

const LISTED_DATES: usize = 30;
const LISTED_ADVERTISERS: usize = 20;

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .with_writer(std::io::stderr)
        .init();

    let start_time = std::time::Instant::now();

    // .env.local first so its values win; neither file is required
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::dotenv();

    let args = Cli::parse();
    debug!(command = ?args.command, format = ?args.format, "Parsed CLI arguments");

    let result = match args.command {
        Command::Scan(scan) => {
            let result = run_scan(scan, &args.store).await;
            if let Err(e) = &result {
                Notifier::from_env()
                    .send_error("Fatal error during scan", &**e, "scan command")
                    .await;
            }
            result
        }
        Command::View { address } => match Route::parse(&address) {
            Ok(route) => render_with_store(&args.store, Command::from(route), args.format).await,
            Err(e) => Err(e.into()),
        },
        command => render_with_store(&args.store, command, args.format).await,
    };

    let elapsed = start_time.elapsed();
    match &result {
        Ok(()) => info!(secs = elapsed.as_secs(), millis = elapsed.subsec_millis(), "Execution complete"),
        Err(e) => error!(error = %e, secs = elapsed.as_secs(), "Execution failed"),
    }
    result
}

fn supabase_store(args: &StoreArgs) -> Result<SupabaseStore, StoreError> {
    let (Some(url), Some(key)) = (&args.supabase_url, &args.supabase_key) else {
        return Err(StoreError::Config(
            "set SUPABASE_URL and SUPABASE_KEY, or pass --snapshot".to_string(),
        ));
    };
    Ok(SupabaseStore::new(url, key)?.with_max_ids(args.max_ids))
}

async fn render_with_store(
    args: &StoreArgs,
    command: Command,
    format: Format,
) -> Result<(), Box<dyn Error>> {
    match &args.snapshot {
        Some(path) => {
            let store = MemoryStore::load(path).await?.with_max_ids(args.max_ids);
            render(&store, command, format).await
        }
        None => render(&supabase_store(args)?, command, format).await,
    }
}

fn emit<T: Serialize + ?Sized>(
    format: Format,
    value: &T,
    to_markdown: impl FnOnce(&T) -> String,
) -> Result<(), Box<dyn Error>> {
    let out = match format {
        Format::Markdown => to_markdown(value),
        Format::Json => json::to_json(value)?,
    };
    println!("{out}");
    Ok(())
}

fn not_found(format: Format, route: Route) -> Result<(), Box<dyn Error>> {
    let address = route.to_string();
    emit(format, &serde_json::json!({ "not_found": address }), |_| {
        markdown::not_found_to_markdown(&route)
    })
}

/// Render one read-side view.
async fn render<S: AdStore>(
    store: &S,
    command: Command,
    format: Format,
) -> Result<(), Box<dyn Error>> {
    match command {
        Command::Papers => {
            let roster = paper_roster(store).await?;
            emit(format, &roster, |r| markdown::roster_to_markdown(r))
        }
        Command::Leaderboard { limit } => {
            let top = top_advertisers(store, limit).await?;
            let refs: Vec<&Advertiser> = top.iter().collect();
            emit(format, &top, |_| {
                markdown::leaderboard_to_markdown("Top Advertisers", &refs)
            })
        }
        Command::Dashboard { papers, start, end } => {
            let mut dashboard = Dashboard::open(store).await?;
            let mut filter = dashboard.filter().clone();
            if !papers.is_empty() {
                let ids = papers
                    .iter()
                    .map(|slug| {
                        dashboard
                            .base()
                            .papers
                            .iter()
                            .find(|p| &p.slug == slug)
                            .map(|p| p.id)
                            .ok_or_else(|| format!("unknown paper {slug:?}"))
                    })
                    .collect::<Result<Vec<i64>, String>>()?;
                filter = filter.with_papers(ids);
            }
            if start.is_some() || end.is_some() {
                filter = filter.with_range(start.or(filter.start()), end.or(filter.end()));
            }
            dashboard.set_filter(filter);
            dashboard.refresh(store).await?;
            match dashboard.view() {
                Some(view) => emit(format, view, markdown::dashboard_to_markdown),
                None => Ok(()),
            }
        }
        Command::Paper { slug } => match paper_editions(store, &slug).await? {
            Some(listing) => emit(format, &listing, markdown::paper_editions_to_markdown),
            None => not_found(format, Route::Paper { slug }),
        },
        Command::Edition {
            slug,
            date,
            page,
            all_ads,
            filter,
            sort,
            desc,
        } => {
            let Some(detail) = edition_detail(store, &slug, date).await? else {
                return not_found(format, Route::Edition { slug, date, page });
            };
            if all_ads {
                let mut table = detail.all_ads();
                if let Some(query) = &filter {
                    table.set_filter(query);
                }
                if let Some(column) = sort {
                    let direction = if desc {
                        SortDirection::Descending
                    } else {
                        SortDirection::Ascending
                    };
                    table.set_sort(column, direction);
                }
                let rows = table.rows();
                emit(format, &rows, |_| markdown::all_ads_to_markdown(&detail, &table))
            } else {
                let viewer = detail.viewer(page);
                emit(format, &detail, |d| markdown::page_viewer_to_markdown(d, &viewer))
            }
        }
        Command::Advertisers { q } => {
            let everyone = all_advertisers(store).await?;
            let shown = filter_by_name(&everyone, q.as_deref().unwrap_or_default());
            emit(format, &shown, |s| markdown::leaderboard_to_markdown("Advertisers", s))
        }
        Command::Advertiser { id } => match advertiser_detail(store, id).await? {
            Some(detail) => emit(format, &detail, markdown::advertiser_detail_to_markdown),
            None => not_found(format, Route::Advertiser { id }),
        },
        Command::Scan(_) | Command::View { .. } => Err("not a view command".into()),
    }
}

/// Scan the selected papers and write the CSV report.
#[instrument(level = "info", skip_all, fields(paper = %scan.paper))]
async fn run_scan(scan: ScanArgs, store_args: &StoreArgs) -> Result<(), Box<dyn Error>> {
    let Some(mode) = scan.mode() else {
        return Err("Specify --date, --start-date/--end-date, --analyze, or --list-dates".into());
    };
    if matches!(mode, ScanMode::Analyze(_)) && scan.paper == "all" {
        return Err("--analyze needs a single --paper slug".into());
    }

    let configs = load_paper_configs(&scan.papers).await?;
    let papers = select_papers(&configs, &scan.paper)?;
    let clients = load_clients(&scan.clients).await?;
    if !clients.is_empty() {
        info!(count = clients.len(), clients = %clients.join(", "), "Loaded clients");
    }

    if mode == ScanMode::ListDates {
        for paper in papers {
            let scraper = PageSuiteScraper::new(paper, &scan.download_dir)?;
            let dates = scraper.list_available_dates().await?;
            println!("{} ({}): {} dates available", scraper.paper().name, scraper.paper().slug, dates.len());
            for date in dates.iter().take(LISTED_DATES) {
                println!("  {date}");
            }
            if dates.len() > LISTED_DATES {
                println!("  ... and {} more", dates.len() - LISTED_DATES);
            }
        }
        return Ok(());
    }

    if let Some(parent) = scan.output.parent().filter(|p| !p.as_os_str().is_empty()) {
        ensure_writable_dir(parent).await?;
    }

    let api_key = scan
        .anthropic_api_key
        .as_deref()
        .ok_or("ANTHROPIC_API_KEY is not set")?;
    let mut vision = ClaudeVision::new(api_key, scan.anthropic_base_url.as_deref())?;
    if let Some(model) = &scan.model {
        vision = vision.with_model(model);
    }
    let analyzer = VisionAnalyzer::new(vision);
    let store = if scan.upload {
        Some(supabase_store(store_args)?)
    } else {
        None
    };
    let notifier = Notifier::from_env();
    let ingest = Ingest {
        analyzer: &analyzer,
        clients: &clients,
        concurrency: scan.concurrency,
        store: store.as_ref(),
        notifier: &notifier,
    };

    let mut report = Vec::new();
    for paper in &papers {
        info!(paper = %paper.name, slug = %paper.slug, "Scanning paper");
        match &mode {
            ScanMode::Analyze(dir) => {
                let (date, ads) = ingest.process_dir(paper, dir).await?;
                report.extend(ads.into_iter().map(|mut ad| {
                    ad.date = Some(date);
                    ad
                }));
            }
            ScanMode::Dates(dates) => {
                let scraper = PageSuiteScraper::new(paper.clone(), &scan.download_dir)?;
                report.extend(ingest.process_dates(&scraper, paper, dates).await);
            }
            ScanMode::ListDates => {}
        }
    }

    if scan.clients_only {
        report = filter_client_ads(report, &clients);
        info!(count = report.len(), "Filtered to client ads");
    }
    if report.is_empty() {
        info!("No ads found");
        return Ok(());
    }

    match mode {
        ScanMode::Analyze(_) => csv::append_csv(&scan.output, &report, "").await?,
        _ => csv::write_csv(&scan.output, &report).await?,
    }
    info!(count = report.len(), path = %scan.output.display(), "Wrote ad report");

    let advertisers: BTreeSet<&str> = report.iter().map(|a| a.advertiser.as_str()).collect();
    println!("Unique advertisers found: {}", advertisers.len());
    for name in advertisers.iter().take(LISTED_ADVERTISERS) {
        println!("  - {name}");
    }
    if advertisers.len() > LISTED_ADVERTISERS {
        println!("  ... and {} more", advertisers.len() - LISTED_ADVERTISERS);
    }
    Ok(())
}
