//! GitHub collaborator: webhook payload decoding and the issue-comment
//! REST client.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_json::json;

pub mod webhook;

const GITHUB_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Deserialize)]
struct CommentCreateResponse {
    id: u64,
}

/// Minimal authenticated client for the tracker operations the bridge
/// performs.
#[derive(Clone)]
pub struct GithubClient {
    http: reqwest::Client,
    api_base: String,
}

impl GithubClient {
    pub fn new(api_base: &str, token: &str) -> Result<Self> {
        let api_base = api_base.trim().trim_end_matches('/');
        if api_base.is_empty() {
            bail!("github api base cannot be empty");
        }
        let token = token.trim();
        if token.is_empty() {
            bail!("github token cannot be empty");
        }

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            reqwest::header::HeaderValue::from_static("pont-bridge"),
        );
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            "x-github-api-version",
            reqwest::header::HeaderValue::from_static("2022-11-28"),
        );
        let auth_header = format!("Bearer {token}");
        headers.insert(
            reqwest::header::AUTHORIZATION,
            reqwest::header::HeaderValue::from_str(&auth_header)
                .context("invalid github authorization header")?,
        );

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(GITHUB_REQUEST_TIMEOUT)
            .build()
            .context("failed to create github api client")?;
        Ok(Self {
            http,
            api_base: api_base.to_string(),
        })
    }

    /// Posts `body` as a new comment on the issue and returns the created
    /// comment id.
    pub async fn create_issue_comment(
        &self,
        owner: &str,
        repo: &str,
        issue_number: u64,
        body: &str,
    ) -> Result<u64> {
        let url = format!(
            "{}/repos/{owner}/{repo}/issues/{issue_number}/comments",
            self.api_base
        );
        let response = self
            .http
            .post(&url)
            .json(&json!({ "body": body }))
            .send()
            .await
            .with_context(|| format!("create issue comment request to {url} failed"))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            bail!(
                "create issue comment failed: status {status}, body {}",
                truncate_for_error(&detail)
            );
        }
        let created: CommentCreateResponse = response
            .json()
            .await
            .context("failed to decode create issue comment response")?;
        Ok(created.id)
    }
}

fn truncate_for_error(detail: &str) -> String {
    const MAX: usize = 200;
    if detail.chars().count() <= MAX {
        return detail.to_string();
    }
    let truncated: String = detail.chars().take(MAX).collect();
    format!("{truncated}…")
}
