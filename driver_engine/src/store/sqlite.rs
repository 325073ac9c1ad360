use super::descriptor::{DataSourceDescriptor, DriverDescriptor};
use super::DescriptorStore;
use crate::error::{DriverError, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS driver_descriptors (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    name              TEXT NOT NULL,
    module_path       TEXT NOT NULL,
    implementation_id TEXT NOT NULL,
    content_hash      TEXT NOT NULL UNIQUE,
    dependency_paths  TEXT NOT NULL DEFAULT '[]',
    active            INTEGER NOT NULL DEFAULT 1,
    created_at        TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS data_sources (
    id                    INTEGER PRIMARY KEY AUTOINCREMENT,
    name                  TEXT NOT NULL,
    target                TEXT NOT NULL,
    username              TEXT,
    password              TEXT,
    driver_id             INTEGER NOT NULL REFERENCES driver_descriptors(id),
    max_pool_size         INTEGER NOT NULL DEFAULT 10,
    min_idle              INTEGER NOT NULL DEFAULT 0,
    connection_timeout_ms INTEGER NOT NULL DEFAULT 30000
);
CREATE INDEX IF NOT EXISTS idx_data_sources_driver ON data_sources(driver_id);
";

const DRIVER_COLUMNS: &str =
    "id, name, module_path, implementation_id, content_hash, dependency_paths, active, created_at";
const DATA_SOURCE_COLUMNS: &str =
    "id, name, target, username, password, driver_id, max_pool_size, min_idle, connection_timeout_ms";

/// Descriptor store backed by a single SQLite connection.
pub struct SqliteDescriptorStore {
    conn: Mutex<Connection>,
}

impl SqliteDescriptorStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        log::debug!("Descriptor store {} journal_mode={}", path.display(), mode);
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", true)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| DriverError::InternalError("Lock poisoned".to_string()))
    }
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(err, rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation)
}

fn path_text(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn conversion_error(
    idx: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn driver_from_row(row: &Row<'_>) -> rusqlite::Result<DriverDescriptor> {
    let module_path: String = row.get(2)?;
    let deps_json: String = row.get(5)?;
    let dependency_paths: Vec<PathBuf> =
        serde_json::from_str(&deps_json).map_err(|e| conversion_error(5, e))?;
    let created_at: String = row.get(7)?;
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map_err(|e| conversion_error(7, e))?
        .with_timezone(&Utc);
    Ok(DriverDescriptor {
        id: row.get(0)?,
        name: row.get(1)?,
        module_path: PathBuf::from(module_path),
        implementation_id: row.get(3)?,
        content_hash: row.get(4)?,
        dependency_paths,
        active: row.get(6)?,
        created_at,
    })
}

fn data_source_from_row(row: &Row<'_>) -> rusqlite::Result<DataSourceDescriptor> {
    Ok(DataSourceDescriptor {
        id: row.get(0)?,
        name: row.get(1)?,
        target: row.get(2)?,
        username: row.get(3)?,
        password: row.get(4)?,
        driver_id: row.get(5)?,
        max_pool_size: row.get(6)?,
        min_idle: row.get(7)?,
        connection_timeout_ms: row.get::<_, i64>(8)?.max(0) as u64,
    })
}

impl DescriptorStore for SqliteDescriptorStore {
    fn find_driver_by_hash(&self, content_hash: &str) -> Result<Option<DriverDescriptor>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM driver_descriptors WHERE content_hash = ?1",
            DRIVER_COLUMNS
        );
        Ok(conn
            .query_row(&sql, params![content_hash], driver_from_row)
            .optional()?)
    }

    fn find_driver(&self, id: i64) -> Result<Option<DriverDescriptor>> {
        let conn = self.lock()?;
        let sql = format!("SELECT {} FROM driver_descriptors WHERE id = ?1", DRIVER_COLUMNS);
        Ok(conn.query_row(&sql, params![id], driver_from_row).optional()?)
    }

    fn save_driver(&self, descriptor: &DriverDescriptor) -> Result<DriverDescriptor> {
        let deps = serde_json::to_string(&descriptor.dependency_paths)?;
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let id = if descriptor.is_persisted() {
            let updated = tx
                .execute(
                    "UPDATE driver_descriptors
                     SET name = ?1, module_path = ?2, implementation_id = ?3,
                         content_hash = ?4, dependency_paths = ?5, active = ?6
                     WHERE id = ?7",
                    params![
                        descriptor.name,
                        path_text(&descriptor.module_path),
                        descriptor.implementation_id,
                        descriptor.content_hash,
                        deps,
                        descriptor.active,
                        descriptor.id
                    ],
                )
                .map_err(|e| map_driver_write_error(e, &descriptor.content_hash))?;
            if updated == 0 {
                return Err(DriverError::DriverNotFound(descriptor.id));
            }
            descriptor.id
        } else {
            tx.execute(
                "INSERT INTO driver_descriptors
                 (name, module_path, implementation_id, content_hash, dependency_paths, active, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    descriptor.name,
                    path_text(&descriptor.module_path),
                    descriptor.implementation_id,
                    descriptor.content_hash,
                    deps,
                    descriptor.active,
                    descriptor.created_at.to_rfc3339()
                ],
            )
            .map_err(|e| map_driver_write_error(e, &descriptor.content_hash))?;
            tx.last_insert_rowid()
        };

        tx.commit()?;
        Ok(DriverDescriptor {
            id,
            ..descriptor.clone()
        })
    }

    fn list_active_drivers(&self) -> Result<Vec<DriverDescriptor>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM driver_descriptors WHERE active = 1 ORDER BY id",
            DRIVER_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], driver_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn list_drivers(&self) -> Result<Vec<DriverDescriptor>> {
        let conn = self.lock()?;
        let sql = format!("SELECT {} FROM driver_descriptors ORDER BY id", DRIVER_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], driver_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn save_data_source(&self, ds: &DataSourceDescriptor) -> Result<DataSourceDescriptor> {
        let timeout_ms = i64::try_from(ds.connection_timeout_ms).unwrap_or(i64::MAX);
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let id = if ds.id != 0 {
            let updated = tx
                .execute(
                    "UPDATE data_sources
                     SET name = ?1, target = ?2, username = ?3, password = ?4, driver_id = ?5,
                         max_pool_size = ?6, min_idle = ?7, connection_timeout_ms = ?8
                     WHERE id = ?9",
                    params![
                        ds.name,
                        ds.target,
                        ds.username,
                        ds.password,
                        ds.driver_id,
                        ds.max_pool_size,
                        ds.min_idle,
                        timeout_ms,
                        ds.id
                    ],
                )
                .map_err(|e| map_data_source_write_error(e, ds.driver_id))?;
            if updated == 0 {
                return Err(DriverError::DataSourceNotFound(ds.id));
            }
            ds.id
        } else {
            tx.execute(
                "INSERT INTO data_sources
                 (name, target, username, password, driver_id, max_pool_size, min_idle, connection_timeout_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    ds.name,
                    ds.target,
                    ds.username,
                    ds.password,
                    ds.driver_id,
                    ds.max_pool_size,
                    ds.min_idle,
                    timeout_ms
                ],
            )
            .map_err(|e| map_data_source_write_error(e, ds.driver_id))?;
            tx.last_insert_rowid()
        };

        tx.commit()?;
        Ok(DataSourceDescriptor { id, ..ds.clone() })
    }

    fn find_data_source(&self, id: i64) -> Result<Option<DataSourceDescriptor>> {
        let conn = self.lock()?;
        let sql = format!("SELECT {} FROM data_sources WHERE id = ?1", DATA_SOURCE_COLUMNS);
        Ok(conn
            .query_row(&sql, params![id], data_source_from_row)
            .optional()?)
    }

    fn list_data_sources_by_driver(&self, driver_id: i64) -> Result<Vec<DataSourceDescriptor>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM data_sources WHERE driver_id = ?1 ORDER BY id",
            DATA_SOURCE_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![driver_id], data_source_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn delete_data_source(&self, id: i64) -> Result<bool> {
        let conn = self.lock()?;
        let deleted = conn.execute("DELETE FROM data_sources WHERE id = ?1", params![id])?;
        Ok(deleted > 0)
    }
}

fn map_driver_write_error(err: rusqlite::Error, content_hash: &str) -> DriverError {
    if is_constraint_violation(&err) {
        DriverError::DuplicateActiveDriver(content_hash.to_string())
    } else {
        err.into()
    }
}

fn map_data_source_write_error(err: rusqlite::Error, driver_id: i64) -> DriverError {
    if is_constraint_violation(&err) {
        DriverError::DriverNotFound(driver_id)
    } else {
        err.into()
    }
}
