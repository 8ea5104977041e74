// src/store/mod.rs

pub mod postgrest;
pub mod sqlite;

use crate::config::{Config, StoreBackend, require_env};
use crate::error::Result;
use crate::records::ProjectRecord;
use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

/// The external table of contractor projects awaiting verification.
///
/// The pipeline only reads project rows and writes back the two verification
/// columns (`file_verified`, `verification_comment`).
#[async_trait]
pub trait ProjectStore: Send + Sync {
    fn name(&self) -> &'static str;

    /// Projects whose `file_verified` is still null.
    async fn list_unverified_projects(&self) -> Result<Vec<ProjectRecord>>;

    async fn set_verification(&self, project_id: &str, verified: bool, comment: &str) -> Result<()>;
}

/// Decode project rows one at a time. A row that does not decode is logged
/// and dropped so the rest of the batch still runs.
pub fn parse_project_rows(rows: Vec<Value>) -> Vec<ProjectRecord> {
    let total = rows.len();
    let projects: Vec<ProjectRecord> = rows
        .into_iter()
        .filter_map(|row| {
            let id = row.get("id").map(Value::to_string).unwrap_or_default();
            serde_json::from_value(row)
                .inspect_err(|e| warn!(project_id = %id, error = %e, "Skipping malformed project row"))
                .ok()
        })
        .collect();
    if projects.len() < total {
        warn!(skipped = total - projects.len(), "Some project rows were skipped");
    }
    projects
}

pub fn build_store(cfg: &Config) -> Result<Box<dyn ProjectStore>> {
    match cfg.store.backend {
        StoreBackend::Postgrest => {
            let url = require_env(&["SUPABASE_URL"])?;
            let key = require_env(&["SUPABASE_KEY"])?;
            info!(url = %url, table = %cfg.store.table, "Using PostgREST project store");
            Ok(Box::new(postgrest::PostgrestStore::new(
                &url,
                key,
                &cfg.store.table,
                cfg.pipeline.download_timeout_secs,
            )?))
        }
        StoreBackend::Sqlite => {
            info!(path = %cfg.store.sqlite_path, "Using SQLite project store");
            Ok(Box::new(sqlite::SqliteStore::open(&cfg.store.sqlite_path)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn malformed_rows_are_skipped_not_fatal() {
        let rows = vec![
            json!({ "id": 1, "contract_value_sar": 10000, "file_uri": "a.pdf" }),
            json!({ "id": 2, "contract_value_sar": "10000" }),
            json!({ "id": [2], "contract_value_sar": 5 }),
            json!({ "id": 3, "contract_value_sar": { "amount": 1 } }),
            json!({ "id": "4", "total_amount_including_vat": "1,150.00" }),
        ];
        let projects = parse_project_rows(rows);

        let ids: Vec<&str> = projects.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, ["1", "2", "4"]);
        assert_eq!(projects[1].contract_value_sar, Some(10000.0));
        assert_eq!(projects[2].total_amount_including_vat, Some(1150.0));
    }

    #[test]
    fn empty_listing() {
        assert!(parse_project_rows(Vec::new()).is_empty());
    }
}
