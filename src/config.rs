//! Ingestion configuration files.
//!
//! - `papers.json`: the PageSuite publications to scrape
//! - `clients.txt`: client names to highlight and filter on, one per line

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::{info, instrument, warn};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("unknown paper '{slug}'. Available: {}", .available.join(", "))]
    UnknownPaper { slug: String, available: Vec<String> },
}

/// Which PageSuite API a publication is served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiType {
    /// `published.json` index with ZIP downloads of per-page PDFs.
    #[default]
    Published,
    /// Replica editions API with per-page images from `get_image.aspx`.
    Replica,
}

/// One entry of `papers.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaperConfig {
    pub slug: String,
    pub name: String,
    #[serde(default)]
    pub account_guid: String,
    #[serde(default)]
    pub pub_guid: String,
    #[serde(default)]
    pub api_type: ApiType,
    /// Sent as `x-api-key` to the replica API when non-empty.
    #[serde(default)]
    pub api_key: String,
}

impl PaperConfig {
    /// Papers without an account GUID are listed but cannot be scraped yet.
    pub fn is_configured(&self) -> bool {
        !self.account_guid.trim().is_empty()
    }
}

#[instrument(level = "info", skip_all, fields(path = %path.as_ref().display()))]
pub async fn load_paper_configs(path: impl AsRef<Path>) -> Result<Vec<PaperConfig>, ConfigError> {
    let path = path.as_ref();
    let raw = tokio::fs::read(path).await.map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let papers: Vec<PaperConfig> =
        serde_json::from_slice(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
    info!(count = papers.len(), "Loaded paper configs");
    Ok(papers)
}

/// Select the papers named by `selector`: a slug, or `all` for every configured paper.
///
/// Papers without an account GUID are skipped with a warning.
pub fn select_papers(
    papers: &[PaperConfig],
    selector: &str,
) -> Result<Vec<PaperConfig>, ConfigError> {
    let selected: Vec<&PaperConfig> = if selector == "all" {
        papers.iter().collect()
    } else {
        vec![find_paper(papers, selector)?]
    };

    Ok(selected
        .into_iter()
        .filter(|p| {
            if !p.is_configured() {
                warn!(slug = %p.slug, name = %p.name, "Skipping paper: no GUIDs configured");
            }
            p.is_configured()
        })
        .cloned()
        .collect())
}

pub fn find_paper<'a>(papers: &'a [PaperConfig], slug: &str) -> Result<&'a PaperConfig, ConfigError> {
    papers
        .iter()
        .find(|p| p.slug == slug)
        .ok_or_else(|| ConfigError::UnknownPaper {
            slug: slug.to_string(),
            available: papers.iter().map(|p| p.slug.clone()).collect(),
        })
}

/// Read client names. Blank lines and `#` comments are ignored.
///
/// A missing file is not an error: it yields no clients.
#[instrument(level = "info", skip_all, fields(path = %path.as_ref().display()))]
pub async fn load_clients(path: impl AsRef<Path>) -> Result<Vec<String>, ConfigError> {
    let path = path.as_ref();
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!("Clients file not found; create it with one client name per line");
            return Ok(Vec::new());
        }
        Err(source) => {
            return Err(ConfigError::Read {
                path: path.display().to_string(),
                source,
            });
        }
    };
    let clients = parse_clients(&raw);
    info!(count = clients.len(), "Loaded clients");
    Ok(clients)
}

pub fn parse_clients(raw: &str) -> Vec<String> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAPERS: &str = r#"[
        {"slug": "ajc", "name": "Atlanta Journal-Constitution",
         "account_guid": "acct-1", "pub_guid": "pub-1", "api_type": "published"},
        {"slug": "dmn", "name": "Dallas Morning News",
         "account_guid": "acct-2", "pub_guid": "pub-2", "api_type": "replica", "api_key": "k"},
        {"slug": "soon", "name": "Coming Soon", "account_guid": ""}
    ]"#;

    fn papers() -> Vec<PaperConfig> {
        serde_json::from_str(PAPERS).unwrap()
    }

    #[test]
    fn test_parse_papers() {
        let papers = papers();
        assert_eq!(papers[0].api_type, ApiType::Published);
        assert_eq!(papers[1].api_type, ApiType::Replica);
        assert_eq!(papers[1].api_key, "k");
        assert_eq!(papers[2].api_type, ApiType::Published);
        assert!(!papers[2].is_configured());
    }

    #[test]
    fn test_unknown_paper_lists_available() {
        let err = find_paper(&papers(), "nyt").unwrap_err();
        assert_eq!(
            err.to_string(),
            "unknown paper 'nyt'. Available: ajc, dmn, soon"
        );
    }

    #[test]
    fn test_select_all_skips_unconfigured() {
        let slugs: Vec<String> = select_papers(&papers(), "all")
            .unwrap()
            .into_iter()
            .map(|p| p.slug)
            .collect();
        assert_eq!(slugs, vec!["ajc", "dmn"]);
    }

    #[test]
    fn test_parse_clients_skips_comments_and_blanks() {
        let clients = parse_clients("# clients\nAcme Co\n\n  Bolt Hardware  \n#Old Client\n");
        assert_eq!(clients, vec!["Acme Co", "Bolt Hardware"]);
    }

    #[tokio::test]
    async fn test_missing_clients_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let clients = load_clients(dir.path().join("clients.txt")).await.unwrap();
        assert!(clients.is_empty());
    }

    #[tokio::test]
    async fn test_load_paper_configs_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("papers.json");
        tokio::fs::write(&path, PAPERS).await.unwrap();

        let papers = load_paper_configs(&path).await.unwrap();
        assert_eq!(papers.len(), 3);

        tokio::fs::write(&path, "not json").await.unwrap();
        assert!(matches!(
            load_paper_configs(&path).await,
            Err(ConfigError::Parse { .. })
        ));
    }
}
