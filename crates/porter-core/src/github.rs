//! Thin code-hosting REST client backing the [`EntityResolver`] port. Only
//! the one lookup the mentions feature needs; everything else about the API
//! stays out of this codebase.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::mentions::{EntityKind, EntityRef, EntityResolver, EntitySummary};
use crate::Result;

const API_BASE: &str = "https://api.github.com";
const USER_AGENT: &str = "porter-bot";

pub struct GithubResolver {
    http: reqwest::Client,
    token: Option<String>,
}

#[derive(Deserialize)]
struct IssuePayload {
    number: u64,
    title: String,
    html_url: String,
    user: UserPayload,
    created_at: DateTime<Utc>,
    pull_request: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct UserPayload {
    login: String,
}

impl GithubResolver {
    pub fn new(token: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            token,
        }
    }
}

#[async_trait]
impl EntityResolver for GithubResolver {
    async fn resolve(&self, entity: &EntityRef) -> Result<Option<EntitySummary>> {
        let url = format!(
            "{API_BASE}/repos/{}/{}/issues/{}",
            entity.owner, entity.repo, entity.number
        );
        let mut req = self.http.get(&url).header("User-Agent", USER_AGENT);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }

        let resp = req.send().await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            // Cacheable absence: the entity does not exist (or is private).
            return Ok(None);
        }
        let payload: IssuePayload = resp.error_for_status()?.json().await?;

        // The issues endpoint serves pull requests too, marked by an extra
        // object on the payload.
        let kind = if payload.pull_request.is_some() {
            EntityKind::PullRequest
        } else {
            EntityKind::Issue
        };

        Ok(Some(EntitySummary {
            kind,
            number: payload.number,
            title: payload.title,
            url: payload.html_url,
            author: payload.user.login,
            created_at: payload.created_at,
        }))
    }
}
