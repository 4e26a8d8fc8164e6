//! Addresses of the read-side views.
//!
//! | Path | Route |
//! |------|-------|
//! | `/` | [`Route::Dashboard`] |
//! | `/{slug}` | [`Route::Paper`] |
//! | `/{slug}/{date}` (`?page=N`) | [`Route::Edition`] |
//! | `/advertisers` (`?q=name`) | [`Route::Advertisers`] |
//! | `/advertisers/{id}` | [`Route::Advertiser`] |
//!
//! `advertisers` is reserved and is never treated as a paper slug.

use chrono::NaiveDate;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use url::Url;

const ADVERTISERS: &str = "advertisers";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouteError {
    #[error("malformed address: {0}")]
    Url(#[from] url::ParseError),

    #[error("no view at {0}")]
    UnknownPath(String),

    #[error("invalid edition date {0:?}, expected YYYY-MM-DD")]
    InvalidDate(String),

    #[error("invalid page number {0:?}")]
    InvalidPage(String),

    #[error("invalid advertiser id {0:?}")]
    InvalidAdvertiserId(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Dashboard,
    Paper {
        slug: String,
    },
    Edition {
        slug: String,
        date: NaiveDate,
        /// Page to open in the viewer.
        page: Option<i32>,
    },
    Advertisers {
        /// Name filter; `None` lists everyone.
        query: Option<String>,
    },
    Advertiser {
        id: i64,
    },
}

impl Route {
    /// Parse a path with an optional query string, e.g. `/ajc/2026-02-27?page=3`.
    pub fn parse(address: &str) -> Result<Self, RouteError> {
        let address = address.trim();
        let base = Url::parse("http://localhost/")?;
        // `//host/...` and absolute URLs would replace the host on join
        let mut lead = address.chars();
        let scheme_relative = matches!(
            (lead.next(), lead.next()),
            (Some('/' | '\\'), Some('/' | '\\'))
        );
        if scheme_relative {
            return Err(RouteError::UnknownPath(address.to_string()));
        }
        let url = base.join(address)?;
        if url.origin() != base.origin() {
            return Err(RouteError::UnknownPath(address.to_string()));
        }

        let segments: Vec<String> = url
            .path_segments()
            .into_iter()
            .flatten()
            .filter(|s| !s.is_empty())
            .map(|s| {
                urlencoding::decode(s)
                    .map(|d| d.into_owned())
                    .unwrap_or_else(|_| s.to_string())
            })
            .collect();
        let query = |key: &str| {
            url.query_pairs()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.into_owned())
        };

        match segments.as_slice() {
            [] => Ok(Self::Dashboard),
            [first] if first == ADVERTISERS => Ok(Self::Advertisers {
                query: query("q").filter(|q| !q.trim().is_empty()),
            }),
            [first, id] if first == ADVERTISERS => id
                .parse()
                .map(|id| Self::Advertiser { id })
                .map_err(|_| RouteError::InvalidAdvertiserId(id.clone())),
            [slug] => Ok(Self::Paper { slug: slug.clone() }),
            [slug, date] => {
                let date = NaiveDate::parse_from_str(date, "%Y-%m-%d")
                    .map_err(|_| RouteError::InvalidDate(date.clone()))?;
                let page = match query("page") {
                    Some(raw) => Some(raw.parse().map_err(|_| RouteError::InvalidPage(raw))?),
                    None => None,
                };
                Ok(Self::Edition {
                    slug: slug.clone(),
                    date,
                    page,
                })
            }
            _ => Err(RouteError::UnknownPath(url.path().to_string())),
        }
    }
}

impl FromStr for Route {
    type Err = RouteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dashboard => write!(f, "/"),
            Self::Paper { slug } => write!(f, "/{}", urlencoding::encode(slug)),
            Self::Edition { slug, date, page } => {
                write!(f, "/{}/{}", urlencoding::encode(slug), date.format("%Y-%m-%d"))?;
                if let Some(page) = page {
                    write!(f, "?page={page}")?;
                }
                Ok(())
            }
            Self::Advertisers { query: None } => write!(f, "/{ADVERTISERS}"),
            Self::Advertisers { query: Some(q) } => {
                write!(f, "/{ADVERTISERS}?q={}", urlencoding::encode(q))
            }
            Self::Advertiser { id } => write!(f, "/{ADVERTISERS}/{id}"),
        }
    }
}
