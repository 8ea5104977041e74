use super::ProjectStore;
use crate::error::{PipelineError, Result};
use crate::records::ProjectRecord;
use async_trait::async_trait;
use rusqlite::{Connection, params};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{info, warn};

/// Local project table with the same columns as the hosted one.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the project database at `db_path`.
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        Self::init(Connection::open(db_path)?)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS projects (
                id TEXT PRIMARY KEY,
                file_uri TEXT,
                contract_value_sar REAL,
                contracting_company TEXT,
                contracted_company TEXT,
                contract_date TEXT,
                total_amount_including_vat REAL,
                file_verified INTEGER,
                verification_comment TEXT,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_projects_file_verified ON projects(file_verified)",
            [],
        )?;

        info!("Project database initialized");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| PipelineError::Store("sqlite connection lock poisoned".to_string()))
    }

    /// Insert or replace a project row, clearing any previous verification.
    pub fn upsert_project(&self, project: &ProjectRecord) -> Result<()> {
        self.conn()?.execute(
            "INSERT OR REPLACE INTO projects (
                id, file_uri, contract_value_sar, contracting_company,
                contracted_company, contract_date, total_amount_including_vat
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                project.id,
                project.file_uri,
                project.contract_value_sar,
                project.contracting_company,
                project.contracted_company,
                project.contract_date,
                project.total_amount_including_vat,
            ],
        )?;
        Ok(())
    }

    fn row_to_project(row: &rusqlite::Row<'_>) -> rusqlite::Result<ProjectRecord> {
        Ok(ProjectRecord {
            id: row.get(0)?,
            file_uri: row.get(1)?,
            contract_value_sar: row.get(2)?,
            contracting_company: row.get(3)?,
            contracted_company: row.get(4)?,
            contract_date: row.get(5)?,
            total_amount_including_vat: row.get(6)?,
        })
    }
}

#[async_trait]
impl ProjectStore for SqliteStore {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn list_unverified_projects(&self) -> Result<Vec<ProjectRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, file_uri, contract_value_sar, contracting_company,
                    contracted_company, contract_date, total_amount_including_vat
             FROM projects
             WHERE file_verified IS NULL
             ORDER BY created_at, id",
        )?;
        let rows = stmt.query_map([], Self::row_to_project)?;
        let projects: Vec<ProjectRecord> = rows
            .filter_map(|row| {
                row.inspect_err(|e| warn!(error = %e, "Skipping unreadable project row"))
                    .ok()
            })
            .collect();
        info!(count = projects.len(), "Retrieved unverified projects");
        Ok(projects)
    }

    async fn set_verification(&self, project_id: &str, verified: bool, comment: &str) -> Result<()> {
        let changed = self.conn()?.execute(
            "UPDATE projects SET file_verified = ?1, verification_comment = ?2 WHERE id = ?3",
            params![verified, comment, project_id],
        )?;
        if changed == 0 {
            return Err(PipelineError::Store(format!("no project with id {project_id}")));
        }
        info!(project_id = %project_id, verified, "Project verification written");
        Ok(())
    }
}
