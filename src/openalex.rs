//! OpenAlex works lookup by DOI.

use crate::normalizer::canonical_doi;
use anyhow::Result;
use async_trait::async_trait;
use log::debug;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_BASE_URL: &str = "https://api.openalex.org";
pub const DEFAULT_TIMEOUT_SECS: u64 = 20;
/// Pause between the fallback queries of one lookup.
pub const ATTEMPT_DELAY: Duration = Duration::from_millis(500);
const USER_AGENT: &str = concat!("paper-organizer/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("network error: {0}")]
    Network(String),

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("no work found")]
    NotFound,

    #[error("unexpected response: {0}")]
    Parse(String),
}

impl LookupError {
    /// Short machine-readable reason, used as the query status column.
    pub fn status_label(&self) -> String {
        match self {
            LookupError::Network(_) => "network_error".to_string(),
            LookupError::Status(code) => format!("http_{}", code),
            LookupError::NotFound => "not_found".to_string(),
            LookupError::Parse(_) => "parse_error".to_string(),
        }
    }

    /// Failures of the service rather than a missing record.
    pub fn is_api_error(&self) -> bool {
        !matches!(self, LookupError::NotFound)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WorkMetadata {
    pub title: Option<String>,
    pub publication_year: Option<i32>,
    pub publication_date: Option<String>,
    #[serde(default)]
    pub cited_by_count: u64,
    pub primary_location: Option<Location>,
    #[serde(default)]
    pub authorships: Vec<Authorship>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Location {
    pub source: Option<Venue>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Venue {
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Authorship {
    #[serde(default)]
    pub author: AuthorRef,
    #[serde(default)]
    pub institutions: Vec<Institution>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthorRef {
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Institution {
    pub display_name: Option<String>,
    pub country_code: Option<String>,
}

impl Institution {
    /// `Name (CC)`, or just the name without a country code.
    pub fn label(&self) -> String {
        let name = self
            .display_name
            .as_deref()
            .filter(|n| !n.is_empty())
            .unwrap_or("Unknown Institution");
        match self.country_code.as_deref().filter(|c| !c.is_empty()) {
            Some(country) => format!("{} ({})", name, country),
            None => name.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WorksResponse {
    #[serde(default)]
    results: Vec<WorkMetadata>,
}

impl WorkMetadata {
    pub fn venue(&self) -> Option<&str> {
        self.primary_location
            .as_ref()
            .and_then(|l| l.source.as_ref())
            .and_then(|s| s.display_name.as_deref())
            .filter(|v| !v.is_empty())
    }

    /// Institution labels of every authorship naming `researcher` (see
    /// `same_person`). Duplicates are dropped.
    pub fn affiliations_of(&self, researcher: &str) -> Option<Vec<String>> {
        let wanted = name_tokens(researcher);
        if wanted.is_empty() {
            return None;
        }

        let mut found = false;
        let mut labels: Vec<String> = Vec::new();
        for authorship in &self.authorships {
            let name = authorship.author.display_name.as_deref().unwrap_or_default();
            if !same_person(&wanted, &name_tokens(name)) {
                continue;
            }
            debug!("找到匹配作者: {}", name);
            found = true;
            for institution in &authorship.institutions {
                let label = institution.label();
                if !labels.contains(&label) {
                    labels.push(label);
                }
            }
        }
        found.then_some(labels)
    }
}

fn name_tokens(name: &str) -> Vec<String> {
    name.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Whole-token, order-free name comparison. A one-letter token on either
/// side matches as an initial, but at least one full token must be equal.
fn same_person(wanted: &[String], author: &[String]) -> bool {
    let is_initial_of = |short: &str, long: &str| short.chars().count() == 1 && long.starts_with(short);
    let matches = |a: &str, b: &str| a == b || is_initial_of(a, b) || is_initial_of(b, a);

    wanted.iter().all(|w| author.iter().any(|a| matches(w, a)))
        && wanted.iter().any(|w| w.chars().count() > 1 && author.contains(w))
}

/// Anything that can resolve a DOI to work metadata.
#[async_trait]
pub trait MetadataSource: Send + Sync {
    async fn lookup_doi(&self, doi: &str) -> Result<WorkMetadata, LookupError>;
}

pub struct OpenAlexClient {
    base_url: String,
    client: Client,
    attempt_delay: Duration,
}

/// `/works` query parameters tried in order until one returns a work.
fn doi_queries(doi: &str) -> [(&'static str, String); 3] {
    [
        ("filter", format!("doi:{}", doi)),
        ("search", doi.to_string()),
        ("filter", format!("doi:https://doi.org/{}", doi)),
    ]
}

impl OpenAlexClient {
    pub fn new(base_url: &str, timeout: Duration, attempt_delay: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            attempt_delay,
        })
    }

    /// First work of one `/works` query; `None` for an empty result list.
    async fn query_works(&self, param: &str, value: &str) -> Result<Option<WorkMetadata>, LookupError> {
        let url = format!("{}/works", self.base_url);
        debug!("GET {}?{}={}", url, param, value);
        let response = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .query(&[(param, value)])
            .send()
            .await
            .map_err(|e| LookupError::Network(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(LookupError::Status(status.as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| LookupError::Network(e.to_string()))?;
        let parsed: WorksResponse =
            serde_json::from_str(&body).map_err(|e| LookupError::Parse(e.to_string()))?;

        Ok(parsed.results.into_iter().next())
    }
}

#[async_trait]
impl MetadataSource for OpenAlexClient {
    /// Tries each of `doi_queries` in turn. A network error ends the lookup;
    /// otherwise the first HTTP or parse error is reported when no query
    /// finds the work.
    async fn lookup_doi(&self, doi: &str) -> Result<WorkMetadata, LookupError> {
        let doi = canonical_doi(doi);
        if doi.is_empty() {
            return Err(LookupError::NotFound);
        }

        let mut first_error = None;
        for (attempt, (param, value)) in doi_queries(&doi).iter().enumerate() {
            if attempt > 0 && !self.attempt_delay.is_zero() {
                tokio::time::sleep(self.attempt_delay).await;
            }
            match self.query_works(param, value).await {
                Ok(Some(work)) => {
                    debug!("DOI {} found with query {}", doi, attempt + 1);
                    return Ok(work);
                }
                Ok(None) => debug!("No results for {}={}", param, value),
                Err(LookupError::Network(e)) => return Err(LookupError::Network(e)),
                Err(e) => {
                    debug!("Query {} for {} failed: {}", attempt + 1, doi, e);
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        Err(first_error.unwrap_or(LookupError::NotFound))
    }
}
