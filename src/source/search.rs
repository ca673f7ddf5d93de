//! Search head client.
//!
//! Executes the export query as an async search job: create the job, poll
//! until it completes, fetch the JSON result rows. Credentials come from
//! the environment (token or basic auth); incomplete credentials or a
//! connection failure is fatal to the run.

use serde::Deserialize;
use std::fs;
use std::time::Duration;

use crate::config::Config;

use super::value::RawRecord;

const DEFAULT_QUERY: &str = include_str!("../../queries/export_all_observables.spl");

#[derive(Debug)]
pub enum SourceError {
    Http(reqwest::Error),
    Api(String),
    Credentials(String),
    Io(std::io::Error),
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        SourceError::Http(err)
    }
}

impl From<std::io::Error> for SourceError {
    fn from(err: std::io::Error) -> Self {
        SourceError::Io(err)
    }
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceError::Http(e) => write!(f, "Search request error: {}", e),
            SourceError::Api(e) => write!(f, "Search API error: {}", e),
            SourceError::Credentials(e) => write!(f, "Credential error: {}", e),
            SourceError::Io(e) => write!(f, "IO error: {}", e),
        }
    }
}

impl std::error::Error for SourceError {}

enum Auth {
    Bearer(String),
    Basic { username: String, password: String },
}

pub struct SearchClient {
    http: reqwest::Client,
    base_url: String,
    auth: Auth,
    poll_interval: Duration,
    query_template: String,
}

#[derive(Deserialize)]
struct CreateJobResponse {
    sid: String,
}

#[derive(Deserialize)]
struct JobStatusResponse {
    entry: Vec<JobEntry>,
}

#[derive(Deserialize)]
struct JobEntry {
    content: JobContent,
}

#[derive(Deserialize)]
struct JobContent {
    #[serde(rename = "isDone", default)]
    is_done: bool,
    #[serde(rename = "isFailed", default)]
    is_failed: bool,
}

#[derive(Deserialize)]
struct ResultsResponse {
    #[serde(default)]
    results: Vec<RawRecord>,
}

impl SearchClient {
    pub fn new(config: &Config) -> Result<Self, SourceError> {
        let base_url = config
            .search_url
            .clone()
            .ok_or_else(|| SourceError::Credentials("SEARCH_URL is not set".to_string()))?;

        let auth = if let Some(token) = &config.search_token {
            Auth::Bearer(token.clone())
        } else {
            match (&config.search_username, &config.search_password) {
                (Some(username), Some(password)) => Auth::Basic {
                    username: username.clone(),
                    password: password.clone(),
                },
                _ => {
                    return Err(SourceError::Credentials(
                        "search credentials incomplete: set SEARCH_TOKEN or SEARCH_USERNAME/SEARCH_PASSWORD"
                            .to_string(),
                    ))
                }
            }
        };

        let query_template = match &config.search_query_file {
            Some(path) => fs::read_to_string(path)?,
            None => DEFAULT_QUERY.to_string(),
        };

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth,
            poll_interval: Duration::from_millis(config.search_poll_interval_ms),
            query_template,
        })
    }

    /// Run the export query over the lookback window and return the raw
    /// result rows.
    pub async fn fetch_observations(&self, lookback_days: u32) -> Result<Vec<RawRecord>, SourceError> {
        let query = prepare_query(&self.query_template, lookback_days);
        log::info!("🔎 Executing search (lookback: {} days, query: {} chars)", lookback_days, query.len());

        let sid = self.create_job(&query).await?;
        log::debug!("Search job created: sid={}", sid);

        self.wait_for_job(&sid).await?;
        let rows = self.fetch_results(&sid).await?;

        log::info!("📥 Retrieved {} observable rows from search head", rows.len());
        Ok(rows)
    }

    async fn create_job(&self, query: &str) -> Result<String, SourceError> {
        let url = format!("{}/services/search/jobs", self.base_url);
        let response = self
            .authorize(self.http.post(&url))
            .form(&[("search", query), ("output_mode", "json"), ("exec_mode", "normal")])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SourceError::Api(format!(
                "search job creation failed: {}",
                response.status()
            )));
        }

        let created: CreateJobResponse = response.json().await?;
        Ok(created.sid)
    }

    async fn wait_for_job(&self, sid: &str) -> Result<(), SourceError> {
        let url = format!("{}/services/search/jobs/{}?output_mode=json", self.base_url, sid);

        loop {
            let response = self.authorize(self.http.get(&url)).send().await?;
            if !response.status().is_success() {
                return Err(SourceError::Api(format!(
                    "search job status check failed: {}",
                    response.status()
                )));
            }

            let status: JobStatusResponse = response.json().await?;
            let content = status
                .entry
                .first()
                .map(|e| &e.content)
                .ok_or_else(|| SourceError::Api("search job status response missing entry".to_string()))?;

            if content.is_failed {
                return Err(SourceError::Api(format!("search job {} failed", sid)));
            }
            if content.is_done {
                return Ok(());
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn fetch_results(&self, sid: &str) -> Result<Vec<RawRecord>, SourceError> {
        let url = format!(
            "{}/services/search/jobs/{}/results?output_mode=json&count=0",
            self.base_url, sid
        );
        let response = self.authorize(self.http.get(&url)).send().await?;

        if !response.status().is_success() {
            return Err(SourceError::Api(format!(
                "search results fetch failed: {}",
                response.status()
            )));
        }

        let body: ResultsResponse = response.json().await?;
        Ok(body.results)
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth {
            Auth::Bearer(token) => builder.bearer_auth(token),
            Auth::Basic { username, password } => builder.basic_auth(username, Some(password)),
        }
    }
}

/// Substitute the lookback window, collapse whitespace so multi-line
/// templates submit cleanly, and ensure the `search ` command prefix the
/// REST endpoint requires.
pub fn prepare_query(template: &str, lookback_days: u32) -> String {
    let substituted = template.replace("$lookback$", &lookback_days.to_string());
    let collapsed = substituted.split_whitespace().collect::<Vec<_>>().join(" ");

    if collapsed.to_lowercase().starts_with("search ") {
        collapsed
    } else {
        format!("search {}", collapsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, ExportMode};

    fn base_config() -> Config {
        Config {
            mode: ExportMode::All,
            lookback_days: 1,
            search_url: Some("https://search.example:8089".to_string()),
            search_token: Some("token".to_string()),
            search_username: None,
            search_password: None,
            search_query_file: None,
            search_poll_interval_ms: 500,
            catalog_db_path: "catalog.db".to_string(),
            relational_db_path: None,
            export_dir: "exports".to_string(),
            catalog_ttl_days: 90,
            scan_page_size: 100,
        }
    }

    #[test]
    fn test_prepare_query_substitution_and_prefix() {
        let query = prepare_query("index=security earliest=-$lookback$d\n| stats count", 7);
        assert_eq!(query, "search index=security earliest=-7d | stats count");
    }

    #[test]
    fn test_prepare_query_keeps_existing_prefix() {
        let query = prepare_query("search index=security", 1);
        assert_eq!(query, "search index=security");

        let upper = prepare_query("SEARCH index=security", 1);
        assert_eq!(upper, "SEARCH index=security");
    }

    #[test]
    fn test_default_query_template_has_lookback_slot() {
        assert!(DEFAULT_QUERY.contains("$lookback$"));
        let prepared = prepare_query(DEFAULT_QUERY, 3);
        assert!(prepared.contains("earliest=-3d"));
        assert!(!prepared.contains('\n'));
    }

    #[test]
    fn test_client_requires_url_and_credentials() {
        let mut config = base_config();
        config.search_url = None;
        assert!(matches!(
            SearchClient::new(&config),
            Err(SourceError::Credentials(_))
        ));

        let mut config = base_config();
        config.search_token = None;
        config.search_username = Some("admin".to_string());
        // Password missing.
        assert!(matches!(
            SearchClient::new(&config),
            Err(SourceError::Credentials(_))
        ));

        let mut config = base_config();
        config.search_token = None;
        config.search_username = Some("admin".to_string());
        config.search_password = Some("secret".to_string());
        assert!(SearchClient::new(&config).is_ok());
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let mut config = base_config();
        config.search_url = Some("https://search.example:8089/".to_string());
        let client = SearchClient::new(&config).unwrap();
        assert_eq!(client.base_url, "https://search.example:8089");
    }

    #[tokio::test]
    #[ignore] // Run only against a live search head
    async fn test_fetch_observations_live() {
        dotenv::dotenv().ok();
        let config = Config::from_env();
        let client = SearchClient::new(&config).unwrap();
        let rows = client.fetch_observations(1).await.unwrap();
        assert!(rows.iter().all(|r| r.contains_key("indicator")));
    }
}
