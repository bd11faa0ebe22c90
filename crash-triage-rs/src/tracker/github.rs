//! GitHub REST implementation of [`IssueStore`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, Response};
use serde::Deserialize;
use serde_json::json;

use super::{IssueDraft, IssueStore, ItemFilter, TrackerError, TrackerResult};
use crate::config::TrackerConfig;
use crate::reconcile::{ItemState, TrackedItem};

const USER_AGENT: &str = concat!("crash-triage/", env!("CARGO_PKG_VERSION"));
const API_VERSION: &str = "2022-11-28";
const PER_PAGE: usize = 100;

/// Issue as returned by the REST API
#[derive(Debug, Deserialize)]
struct RawIssue {
    number: u64,
    state: ItemState,
    #[serde(default)]
    locked: bool,
    #[serde(default)]
    state_reason: Option<String>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    pull_request: Option<serde_json::Value>,
}

impl From<RawIssue> for TrackedItem {
    fn from(raw: RawIssue) -> Self {
        TrackedItem {
            id: raw.number,
            state: raw.state,
            locked: raw.locked,
            state_reason: raw.state_reason,
            body: raw.body.unwrap_or_default(),
        }
    }
}

/// Issues of one repository, accessed with a token
#[derive(Debug, Clone)]
pub struct GitHubIssueStore {
    client: Client,
    base_url: String,
    owner: String,
    repo: String,
    max_pages: u32,
}

impl GitHubIssueStore {
    /// Builds a store for `owner/repo` using the connection settings in `config`
    pub fn new(config: &TrackerConfig, owner: &str, repo: &str) -> TrackerResult<Self> {
        let token = config
            .token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| TrackerError::Configuration("No tracker token configured".to_string()))?;

        let mut headers = header::HeaderMap::new();
        let mut auth = header::HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|e| TrackerError::Configuration(format!("Invalid token: {}", e)))?;
        auth.set_sensitive(true);
        headers.insert(header::AUTHORIZATION, auth);
        headers.insert(header::ACCEPT, header::HeaderValue::from_static("application/vnd.github+json"));
        headers.insert(header::USER_AGENT, header::HeaderValue::from_static(USER_AGENT));
        headers.insert("X-GitHub-Api-Version", header::HeaderValue::from_static(API_VERSION));

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| TrackerError::Configuration(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            owner: owner.to_string(),
            repo: repo.to_string(),
            max_pages: config.max_pages.max(1),
        })
    }

    fn issues_url(&self) -> String {
        format!("{}/repos/{}/{}/issues", self.base_url, self.owner, self.repo)
    }

    fn issue_url(&self, id: u64) -> String {
        format!("{}/{}", self.issues_url(), id)
    }

    async fn check(response: Response) -> TrackerResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let exhausted = response
            .headers()
            .get("x-ratelimit-remaining")
            .and_then(|v| v.to_str().ok())
            .map_or(false, |v| v == "0");
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => format!("Failed to read error response: {}", e),
        };

        Err(TrackerError::from_status(status, &body, exhausted))
    }
}

#[async_trait]
impl IssueStore for GitHubIssueStore {
    async fn list(&self, filter: &ItemFilter) -> TrackerResult<Vec<TrackedItem>> {
        let labels = filter.labels.join(",");
        let creator_filter = if filter.created_by_me { "created" } else { "all" };
        let mut items = Vec::new();

        for page in 1..=self.max_pages {
            let last_allowed = page == self.max_pages;
            let page = page.to_string();
            let per_page = PER_PAGE.to_string();
            let mut query = vec![
                ("filter", creator_filter),
                ("state", "all"),
                ("per_page", per_page.as_str()),
                ("page", page.as_str()),
            ];
            if !labels.is_empty() {
                query.push(("labels", labels.as_str()));
            }

            let response = self.client.get(self.issues_url()).query(&query).send().await?;
            let batch: Vec<RawIssue> = Self::check(response)
                .await?
                .json()
                .await
                .map_err(|e| TrackerError::Decode(e.to_string()))?;

            let fetched = batch.len();
            items.extend(
                batch
                    .into_iter()
                    .filter(|issue| issue.pull_request.is_none())
                    .map(TrackedItem::from),
            );

            if fetched < PER_PAGE {
                break;
            }
            // A match past the limit would be missed and filed as a duplicate.
            if last_allowed {
                tracing::warn!(pages = self.max_pages, owner = %self.owner, repo = %self.repo, "Tracked item listing exceeds page limit");
                return Err(TrackerError::Truncated { pages: self.max_pages });
            }
        }

        tracing::debug!(count = items.len(), owner = %self.owner, repo = %self.repo, "Listed tracked items");
        Ok(items)
    }

    async fn create(&self, draft: &IssueDraft) -> TrackerResult<TrackedItem> {
        let response = self.client.post(self.issues_url()).json(draft).send().await?;
        let raw: RawIssue = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| TrackerError::Decode(e.to_string()))?;
        Ok(raw.into())
    }

    async fn update_state(&self, id: u64, state: ItemState) -> TrackerResult<()> {
        let response = self
            .client
            .patch(self.issue_url(id))
            .json(&json!({ "state": state }))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn add_comment(&self, id: u64, text: &str) -> TrackerResult<()> {
        let response = self
            .client
            .post(format!("{}/comments", self.issue_url(id)))
            .json(&json!({ "body": text }))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requires_token() {
        let result = GitHubIssueStore::new(&TrackerConfig::default(), "acme", "widgets");
        assert!(matches!(result, Err(TrackerError::Configuration(_))));
    }

    #[test]
    fn test_urls() {
        let config = TrackerConfig {
            token: Some("t".into()),
            api_base_url: "http://localhost:9/".into(),
            ..TrackerConfig::default()
        };
        let store = GitHubIssueStore::new(&config, "acme", "widgets").expect("store");
        assert_eq!(store.issues_url(), "http://localhost:9/repos/acme/widgets/issues");
        assert_eq!(store.issue_url(7), "http://localhost:9/repos/acme/widgets/issues/7");
    }

    #[test]
    fn test_raw_issue_null_body() {
        let raw: RawIssue = serde_json::from_str(
            r#"{"number":3,"state":"closed","locked":false,"state_reason":"not_planned","body":null}"#,
        )
        .expect("decodes");
        let item = TrackedItem::from(raw);
        assert_eq!(item.id, 3);
        assert_eq!(item.body, "");
        assert!(item.is_dormant());
    }
}
