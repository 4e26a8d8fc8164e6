//! Markdown rendering of the read-side views.
//!
//! Every function returns a complete document; the CLI prints it or writes it
//! to a file.

use crate::aggregate::advertiser::AdvertiserDetail;
use crate::aggregate::dashboard::{DashboardView, NO_EDITIONS_IN_RANGE};
use crate::aggregate::edition::{AllAdsTable, EditionDetail, PageViewer};
use crate::aggregate::roster::{PaperEditions, PaperSummary};
use crate::models::Advertiser;
use crate::routes::Route;
use std::fmt::{self, Write};

fn render(body: impl FnOnce(&mut String) -> fmt::Result) -> String {
    let mut md = String::new();
    // writing into a String never fails
    let _ = body(&mut md);
    md
}

/// Escape `|` so free text cannot break a table row.
fn cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}

fn opt_cell(text: Option<&str>) -> String {
    text.map(cell).unwrap_or_else(|| "-".to_string())
}

pub fn roster_to_markdown(roster: &[PaperSummary]) -> String {
    render(|md| {
        writeln!(md, "# Papers\n")?;
        if roster.is_empty() {
            writeln!(md, "_No papers tracked yet._")?;
            return Ok(());
        }
        writeln!(md, "| Paper | Latest edition | Pages | Ads (all editions) |")?;
        writeln!(md, "|-------|----------------|-------|--------------------|")?;
        for summary in roster {
            let paper_link = format!(
                "[{}]({})",
                cell(&summary.paper.name),
                Route::Paper {
                    slug: summary.paper.slug.clone()
                }
            );
            match &summary.latest_edition {
                Some(edition) => writeln!(
                    md,
                    "| {} | [{}]({}) | {} | {} |",
                    paper_link,
                    edition.date,
                    Route::Edition {
                        slug: summary.paper.slug.clone(),
                        date: edition.date,
                        page: None
                    },
                    edition.page_count,
                    summary.total_ad_count
                )?,
                None => writeln!(md, "| {} | _none yet_ | - | 0 |", paper_link)?,
            }
        }
        Ok(())
    })
}

pub fn leaderboard_to_markdown(title: &str, advertisers: &[&Advertiser]) -> String {
    render(|md| {
        writeln!(md, "# {}\n", title)?;
        if advertisers.is_empty() {
            writeln!(md, "_No advertisers found._")?;
            return Ok(());
        }
        writeln!(md, "| # | Advertiser | Papers | Ads |")?;
        writeln!(md, "|---|------------|--------|-----|")?;
        for (i, advertiser) in advertisers.iter().enumerate() {
            writeln!(
                md,
                "| {} | [{}]({}) | {} | {} |",
                i + 1,
                cell(&advertiser.name),
                Route::Advertiser { id: advertiser.id },
                advertiser.paper_count,
                advertiser.total_ad_count
            )?;
        }
        Ok(())
    })
}

pub fn dashboard_to_markdown(view: &DashboardView) -> String {
    render(|md| {
        writeln!(md, "# Dashboard\n")?;
        let bound = |d: Option<chrono::NaiveDate>| {
            d.map(|d| d.to_string()).unwrap_or_else(|| "…".to_string())
        };
        writeln!(
            md,
            "Range: **{}** to **{}**, {} paper(s) selected\n",
            bound(view.filter.start()),
            bound(view.filter.end()),
            view.filter.selected_papers().len()
        )?;

        writeln!(md, "| Editions | Ads | Ads (stored counters) | Unique advertisers |")?;
        writeln!(md, "|----------|-----|-----------------------|--------------------|")?;
        writeln!(
            md,
            "| {} | {} | {} | {} |\n",
            view.edition_count,
            view.computed_ad_count,
            view.stored_ad_count,
            view.unique_advertisers
        )?;

        writeln!(md, "## Papers\n")?;
        for card in &view.paper_cards {
            writeln!(md, "### {}\n", card.paper.name)?;
            if !card.has_editions() {
                writeln!(md, "{}\n", NO_EDITIONS_IN_RANGE)?;
                continue;
            }
            writeln!(
                md,
                "- Editions: {}\n- Ads: {} (stored: {})\n- Unique advertisers: {}",
                card.edition_count,
                card.computed_ad_count,
                card.stored_ad_count,
                card.unique_advertisers
            )?;
            if let Some(latest) = card.latest_date {
                writeln!(
                    md,
                    "- Latest: [{}]({})",
                    latest,
                    Route::Edition {
                        slug: card.paper.slug.clone(),
                        date: latest,
                        page: None
                    }
                )?;
            }
            writeln!(md)?;
        }

        writeln!(md, "## Top advertisers in range\n")?;
        if view.top_advertisers.is_empty() {
            writeln!(md, "_No ads in range._\n")?;
        } else {
            for (i, tally) in view.top_advertisers.iter().enumerate() {
                writeln!(md, "{}. {} ({})", i + 1, tally.name, tally.count)?;
            }
            writeln!(md)?;
        }

        writeln!(md, "## Ads\n")?;
        if view.ads.is_empty() {
            return writeln!(md, "_No ads in range._");
        }
        writeln!(md, "| Date | Paper | Page | Section | Advertiser | Size | Confidence |")?;
        writeln!(md, "|------|-------|------|---------|------------|------|------------|")?;
        for row in &view.ads {
            writeln!(
                md,
                "| {} | {} | [{}]({}) | {} | {} | {} | {} |",
                row.date,
                cell(&row.paper_name),
                row.page_num,
                Route::Edition {
                    slug: row.paper_slug.clone(),
                    date: row.date,
                    page: Some(row.page_num)
                },
                opt_cell(row.section.as_deref()),
                cell(&row.ad.advertiser),
                cell(&row.ad.size),
                cell(&row.ad.confidence)
            )?;
        }
        Ok(())
    })
}

pub fn paper_editions_to_markdown(listing: &PaperEditions) -> String {
    render(|md| {
        writeln!(md, "# {}\n", listing.paper.name)?;
        if listing.editions.is_empty() {
            return writeln!(md, "_No editions yet._");
        }
        writeln!(md, "| Date | Pages | Ads |")?;
        writeln!(md, "|------|-------|-----|")?;
        for edition in &listing.editions {
            writeln!(
                md,
                "| [{}]({}) | {} | {} |",
                edition.date,
                Route::Edition {
                    slug: listing.paper.slug.clone(),
                    date: edition.date,
                    page: None
                },
                edition.page_count,
                edition.ad_count
            )?;
        }
        Ok(())
    })
}

/// Page strip and the selected page's ads.
pub fn page_viewer_to_markdown(detail: &EditionDetail, viewer: &PageViewer<'_>) -> String {
    render(|md| {
        writeln!(md, "# {} · {}\n", detail.paper.name, detail.edition.date)?;
        writeln!(
            md,
            "{} pages, {} ads (stored: {} pages, {} ads)\n",
            detail.page_count(),
            detail.ad_count(),
            detail.stored_page_count(),
            detail.stored_ad_count()
        )?;

        let strip: Vec<String> = viewer
            .thumbnails()
            .into_iter()
            .map(|t| {
                if t.selected {
                    format!("**[{}]**", t.label)
                } else {
                    t.label
                }
            })
            .collect();
        writeln!(md, "Pages: {}\n", strip.join(" · "))?;

        let Some(selected) = viewer.selected() else {
            return writeln!(md, "_This edition has no pages._");
        };
        writeln!(
            md,
            "## Page {}{}\n",
            selected.page.page_num,
            selected
                .page
                .section
                .as_deref()
                .map(|s| format!(" ({s})"))
                .unwrap_or_default()
        )?;
        if let Some(path) = &selected.page.image_path {
            writeln!(md, "Image: `{}`\n", path)?;
        }
        if selected.ads.is_empty() {
            return writeln!(md, "_No ads on this page._");
        }
        for ad in &selected.ads {
            writeln!(md, "- **{}** ({}, {})", ad.advertiser, ad.size, ad.confidence)?;
            if !ad.description.is_empty() {
                writeln!(md, "  - {}", ad.description)?;
            }
            if !ad.location.is_empty() {
                writeln!(md, "  - Location: {}", ad.location)?;
            }
        }
        Ok(())
    })
}

pub fn all_ads_to_markdown(detail: &EditionDetail, table: &AllAdsTable) -> String {
    render(|md| {
        writeln!(md, "# {} · {} · all ads\n", detail.paper.name, detail.edition.date)?;
        let rows = table.rows();
        writeln!(md, "Showing {} of {} ads\n", rows.len(), table.len())?;
        if rows.is_empty() {
            return Ok(());
        }
        writeln!(md, "| Page | Section | Advertiser | Size | Confidence | Description |")?;
        writeln!(md, "|------|---------|------------|------|------------|-------------|")?;
        for row in rows {
            writeln!(
                md,
                "| {} | {} | {} | {} | {} | {} |",
                row.page_num,
                opt_cell(row.section.as_deref()),
                cell(&row.ad.advertiser),
                cell(&row.ad.size),
                cell(&row.ad.confidence),
                cell(&row.ad.description)
            )?;
        }
        Ok(())
    })
}

pub fn advertiser_detail_to_markdown(detail: &AdvertiserDetail) -> String {
    render(|md| {
        let advertiser = &detail.advertiser;
        writeln!(md, "# {}\n", advertiser.name)?;
        writeln!(
            md,
            "{} ads across {} papers (found: {})",
            advertiser.total_ad_count,
            advertiser.paper_count,
            detail.computed_ad_count()
        )?;
        if let Some(first_seen) = advertiser.first_seen {
            writeln!(md, "First seen {}", first_seen.format("%Y-%m-%d"))?;
        }
        writeln!(md)?;

        writeln!(md, "## Papers\n")?;
        if detail.papers.is_empty() {
            writeln!(md, "_No per-paper totals._\n")?;
        } else {
            writeln!(md, "| Paper | Ads | First seen | Last seen |")?;
            writeln!(md, "|-------|-----|------------|-----------|")?;
            for presence in &detail.papers {
                let name = presence
                    .paper
                    .as_ref()
                    .map(|p| cell(&p.name))
                    .unwrap_or_else(|| format!("paper #{}", presence.aggregate.paper_id));
                let day = |d: Option<chrono::NaiveDate>| {
                    d.map(|d| d.to_string()).unwrap_or_else(|| "-".to_string())
                };
                writeln!(
                    md,
                    "| {} | {} | {} | {} |",
                    name,
                    presence.aggregate.ad_count,
                    day(presence.aggregate.first_seen),
                    day(presence.aggregate.last_seen)
                )?;
            }
            writeln!(md)?;
        }

        writeln!(md, "## Ad history\n")?;
        if detail.history.is_empty() {
            return writeln!(md, "_No ads linked yet._");
        }
        writeln!(md, "| Date | Paper | Page | Section | Size | Description |")?;
        writeln!(md, "|------|-------|------|---------|------|-------------|")?;
        for row in &detail.history {
            let page = match (&row.paper, row.date, row.page_num) {
                (Some(paper), Some(date), Some(page_num)) => format!(
                    "[{}]({})",
                    page_num,
                    Route::Edition {
                        slug: paper.slug.clone(),
                        date,
                        page: Some(page_num)
                    }
                ),
                (_, _, Some(page_num)) => page_num.to_string(),
                _ => "-".to_string(),
            };
            writeln!(
                md,
                "| {} | {} | {} | {} | {} | {} |",
                row.date.map(|d| d.to_string()).unwrap_or_else(|| "-".to_string()),
                opt_cell(row.paper.as_ref().map(|p| p.name.as_str())),
                page,
                opt_cell(row.section.as_deref()),
                cell(&row.ad.size),
                cell(&row.ad.description)
            )?;
        }
        Ok(())
    })
}

/// Plain page shown for a route with no matching row.
pub fn not_found_to_markdown(route: &Route) -> String {
    format!("# Not found\n\nNothing at `{}`.\n", route)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::dashboard::{Dashboard, DashboardFilter};
    use crate::aggregate::edition::edition_detail;
    use crate::aggregate::roster::paper_roster;
    use crate::store::MemoryStore;
    use chrono::NaiveDate;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[tokio::test]
    async fn test_roster_links_latest_edition() {
        let store = MemoryStore::new();
        let ajc = store.add_paper("ajc", "Atlanta Journal-Constitution");
        store.add_paper("new", "New Paper");
        store.add_edition(ajc.id, date("2026-02-27"), 2, 1);

        let md = roster_to_markdown(&paper_roster(&store).await.unwrap());

        assert!(md.contains("[2026-02-27](/ajc/2026-02-27)"));
        assert!(md.contains("| [New Paper](/new) | _none yet_ | - | 0 |"));
    }

    #[tokio::test]
    async fn test_dashboard_card_without_editions() {
        let store = MemoryStore::new();
        let ajc = store.add_paper("ajc", "AJC");
        let dmn = store.add_paper("dmn", "DMN");
        store.add_edition(ajc.id, date("2026-02-27"), 1, 0);
        store.add_edition(dmn.id, date("2026-02-01"), 1, 0);

        let mut dashboard = Dashboard::open(&store).await.unwrap();
        let filter = DashboardFilter::new(
            [ajc.id, dmn.id],
            Some(date("2026-02-10")),
            Some(date("2026-02-28")),
        );
        dashboard.set_filter(filter);
        dashboard.refresh(&store).await.unwrap();

        let md = dashboard_to_markdown(dashboard.view().unwrap());
        assert!(md.contains("### DMN\n\nNo editions in range"));
    }

    #[tokio::test]
    async fn test_viewer_marks_selected_page() {
        let store = MemoryStore::new();
        let ajc = store.add_paper("ajc", "AJC");
        let edition = store.add_edition(ajc.id, date("2026-02-27"), 2, 1);
        let page = store.add_page(edition.id, 1, "A");
        store.add_page(edition.id, 2, "B");
        store.add_ad(page.id, "Acme | Co", None);

        let detail = edition_detail(&store, "ajc", date("2026-02-27"))
            .await
            .unwrap()
            .unwrap();
        let md = page_viewer_to_markdown(&detail, &detail.viewer(Some(2)));
        assert!(md.contains("Pages: 1 (1) · **[2]**"));
        assert!(md.contains("_No ads on this page._"));

        let table = all_ads_to_markdown(&detail, &detail.all_ads());
        assert!(table.contains("Acme \\| Co"));
    }
}
