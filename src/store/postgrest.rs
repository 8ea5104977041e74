// src/store/postgrest.rs

use super::{ProjectStore, parse_project_rows};
use crate::error::{PipelineError, Result};
use crate::records::ProjectRecord;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::Serialize;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Serialize)]
struct VerificationUpdate<'a> {
    file_verified: bool,
    verification_comment: &'a str,
}

/// Project table behind a PostgREST endpoint (Supabase `/rest/v1`).
pub struct PostgrestStore {
    client: Client,
    base_url: String,
    api_key: String,
    table: String,
}

impl PostgrestStore {
    pub fn new(url: &str, api_key: String, table: &str, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| PipelineError::Config(format!("http client: {e}")))?;
        Ok(Self {
            client,
            base_url: format!("{}/rest/v1", url.trim_end_matches('/')),
            api_key,
            table: table.to_string(),
        })
    }

    fn list_url(&self) -> String {
        format!(
            "{}/{}?select=*&file_verified=is.null",
            self.base_url,
            urlencoding::encode(&self.table)
        )
    }

    fn update_url(&self, project_id: &str) -> String {
        format!(
            "{}/{}?id=eq.{}",
            self.base_url,
            urlencoding::encode(&self.table),
            urlencoding::encode(project_id)
        )
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
    }
}

async fn check(response: reqwest::Response, what: &str) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(PipelineError::Store(format!("{what}: HTTP {status}: {body}")))
}

#[async_trait]
impl ProjectStore for PostgrestStore {
    fn name(&self) -> &'static str {
        "postgrest"
    }

    async fn list_unverified_projects(&self) -> Result<Vec<ProjectRecord>> {
        let response = self
            .authorized(self.client.get(self.list_url()))
            .send()
            .await
            .map_err(|e| PipelineError::Store(format!("list projects: {e}")))?;
        let response = check(response, "list projects").await?;
        let rows: Vec<serde_json::Value> = response
            .json()
            .await
            .map_err(|e| PipelineError::Store(format!("list projects: {e}")))?;
        let projects = parse_project_rows(rows);
        info!(count = projects.len(), "Retrieved unverified projects");
        Ok(projects)
    }

    async fn set_verification(&self, project_id: &str, verified: bool, comment: &str) -> Result<()> {
        let body = VerificationUpdate {
            file_verified: verified,
            verification_comment: comment,
        };
        let response = self
            .authorized(self.client.patch(self.update_url(project_id)))
            .header("Prefer", "return=minimal")
            .json(&body)
            .send()
            .await
            .map_err(|e| PipelineError::Store(format!("update project {project_id}: {e}")))?;
        check(response, "update project").await?;
        info!(project_id = %project_id, verified, "Project verification written");
        Ok(())
    }
}
