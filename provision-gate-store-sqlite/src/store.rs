// provision-gate-store-sqlite/src/store.rs
// ============================================================================
// Module: SQLite Policy Store
// Description: Durable PolicyStore backed by SQLite WAL.
// Purpose: Persist policy records with keyset pagination and unique indexes.
// Dependencies: provision-gate-core, rusqlite, serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! This module implements a durable [`PolicyStore`] using `SQLite`. Listing
//! under the canonical catalog order `(policy_type, priority, id)` paginates
//! by keyset so that concurrent writes between pages can neither duplicate
//! nor skip already-iterated identifiers; custom orderings paginate by
//! offset. Uniqueness of `(display_name, policy_type)` and
//! `(priority, policy_type)` is enforced by indexes and mapped to the core
//! sentinel errors.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;

use provision_gate_core::CatalogError;
use provision_gate_core::ListOptions;
use provision_gate_core::OrderBy;
use provision_gate_core::OrderDirection;
use provision_gate_core::OrderField;
use provision_gate_core::PageKey;
use provision_gate_core::PageToken;
use provision_gate_core::Policy;
use provision_gate_core::PolicyCatalog;
use provision_gate_core::PolicyId;
use provision_gate_core::PolicyPage;
use provision_gate_core::PolicyStore;
use provision_gate_core::PolicyType;
use provision_gate_core::StoreError;
use provision_gate_core::Timestamp;
use rusqlite::Connection;
use rusqlite::ErrorCode;
use rusqlite::OpenFlags;
use rusqlite::Row;
use rusqlite::params;
use rusqlite::params_from_iter;
use rusqlite::types::Value as SqlValue;
use serde::Deserialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// `SQLite` schema version for the store.
const SCHEMA_VERSION: i64 = 1;
/// Default busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Policy table definition and unique indexes.
const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS policies (
    id TEXT PRIMARY KEY,
    policy_type TEXT NOT NULL,
    display_name TEXT NOT NULL,
    description TEXT,
    priority INTEGER NOT NULL,
    enabled INTEGER NOT NULL,
    label_selector TEXT NOT NULL,
    package_name TEXT NOT NULL,
    create_time INTEGER NOT NULL,
    update_time INTEGER NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_policies_display_name_policy_type
    ON policies (display_name, policy_type);
CREATE UNIQUE INDEX IF NOT EXISTS idx_policies_priority_policy_type
    ON policies (priority, policy_type);
";

/// Column list shared by every policy select.
const POLICY_COLUMNS: &str = "id, policy_type, display_name, description, priority, enabled, \
                              label_selector, package_name, create_time, update_time";

// ============================================================================
// SECTION: Config
// ============================================================================

/// `SQLite` journal mode configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteStoreMode {
    /// WAL journal mode (recommended).
    #[default]
    Wal,
    /// Delete journal mode (legacy).
    Delete,
}

impl SqliteStoreMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Wal => "wal",
            Self::Delete => "delete",
        }
    }
}

/// `SQLite` sync mode configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteSyncMode {
    /// Full synchronous mode (safest).
    #[default]
    Full,
    /// Normal synchronous mode (balanced).
    Normal,
}

impl SqliteSyncMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Normal => "normal",
        }
    }
}

/// Configuration for the `SQLite` policy store.
#[derive(Debug, Clone, Deserialize)]
pub struct SqliteStoreConfig {
    /// Path to the `SQLite` database file.
    pub path: PathBuf,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: SqliteStoreMode,
    /// `SQLite` sync mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
}

/// Returns the default busy timeout for `SQLite` connections.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// `SQLite` store errors raised while opening or initializing the database.
#[derive(Debug, Error)]
pub enum SqliteStoreError {
    /// Store I/O error.
    #[error("sqlite store io error: {0}")]
    Io(String),
    /// `SQLite` engine error.
    #[error("sqlite store db error: {0}")]
    Db(String),
    /// Store schema version mismatch.
    #[error("sqlite store version mismatch: {0}")]
    VersionMismatch(String),
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// `SQLite`-backed policy store with WAL support.
#[derive(Clone)]
pub struct SqlitePolicyStore {
    /// Shared `SQLite` connection guarded by a mutex.
    connection: Arc<Mutex<Connection>>,
}

impl SqlitePolicyStore {
    /// Opens an `SQLite`-backed policy store.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the database cannot be opened or
    /// initialized.
    pub fn new(config: &SqliteStoreConfig) -> Result<Self, SqliteStoreError> {
        ensure_parent_dir(&config.path)?;
        let connection = open_connection(config)?;
        initialize_schema(&connection)?;
        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    /// Locks the shared connection, surfacing poisoning as a backend fault.
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.connection
            .lock()
            .map_err(|_| StoreError::Backend("policy store mutex poisoned".to_string()))
    }
}

impl PolicyCatalog for SqlitePolicyStore {
    fn list(&self, options: &ListOptions) -> Result<PolicyPage, CatalogError> {
        let guard = self
            .connection
            .lock()
            .map_err(|_| CatalogError::Backend("policy store mutex poisoned".to_string()))?;

        let mut clauses: Vec<&str> = Vec::new();
        let mut params: Vec<SqlValue> = Vec::new();
        if let Some(policy_type) = options.filter.policy_type {
            clauses.push("policy_type = ?");
            params.push(SqlValue::from(policy_type.as_str().to_string()));
        }
        if let Some(enabled) = options.filter.enabled {
            clauses.push("enabled = ?");
            params.push(SqlValue::from(i64::from(enabled)));
        }

        let page_size = options.page_size.max(1);
        let canonical = options.order_by.is_empty();
        let mut offset = 0usize;
        if canonical {
            if let Some(token) = options.page_token.as_deref() {
                let PageToken::Key(key) = decode_token(token)? else {
                    return Err(CatalogError::InvalidPageToken(token.to_string()));
                };
                clauses.push("(policy_type, priority, id) > (?, ?, ?)");
                params.push(SqlValue::from(key.policy_type.as_str().to_string()));
                params.push(SqlValue::from(key.priority));
                params.push(SqlValue::from(key.id));
            }
        } else if let Some(token) = options.page_token.as_deref() {
            let PageToken::Offset(decoded) = decode_token(token)? else {
                return Err(CatalogError::InvalidPageToken(token.to_string()));
            };
            offset = decoded;
        }

        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };
        let order_sql = if canonical {
            "policy_type ASC, priority ASC, id ASC".to_string()
        } else {
            order_by_sql(&options.order_by)
        };
        let sql = format!(
            "SELECT {POLICY_COLUMNS} FROM policies{where_sql} ORDER BY {order_sql} \
             LIMIT ? OFFSET ?"
        );
        params.push(SqlValue::from(i64::try_from(page_size + 1).unwrap_or(i64::MAX)));
        params.push(SqlValue::from(i64::try_from(offset).unwrap_or(i64::MAX)));

        let mut statement = guard
            .prepare(&sql)
            .map_err(|error| CatalogError::Backend(error.to_string()))?;
        let rows = statement
            .query_map(params_from_iter(params), read_policy_row)
            .map_err(|error| CatalogError::Backend(error.to_string()))?;

        let mut policies = Vec::new();
        for row in rows {
            let policy = row.map_err(|error| CatalogError::Backend(error.to_string()))?;
            policies.push(policy);
        }

        let next_page_token = if policies.len() > page_size {
            policies.truncate(page_size);
            if canonical {
                policies.last().map(|policy| PageToken::Key(PageKey::for_policy(policy)).encode())
            } else {
                Some(PageToken::Offset(offset + page_size).encode())
            }
        } else {
            None
        };

        Ok(PolicyPage {
            policies,
            next_page_token,
        })
    }
}

impl PolicyStore for SqlitePolicyStore {
    fn create(&self, policy: Policy) -> Result<Policy, StoreError> {
        let guard = self.lock()?;
        let label_selector = encode_label_selector(&policy.label_selector)?;
        guard
            .execute(
                "INSERT INTO policies (id, policy_type, display_name, description, priority, \
                 enabled, label_selector, package_name, create_time, update_time) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    policy.id.as_str(),
                    policy.policy_type.as_str(),
                    policy.display_name,
                    policy.description,
                    policy.priority,
                    i64::from(policy.enabled),
                    label_selector,
                    policy.package_name,
                    policy.create_time.as_unix_millis(),
                    policy.update_time.as_unix_millis(),
                ],
            )
            .map_err(|error| map_unique_violation(error, &policy.id))?;
        Ok(policy)
    }

    fn get(&self, id: &PolicyId) -> Result<Policy, StoreError> {
        let guard = self.lock()?;
        fetch_policy(&guard, id)
    }

    fn update(&self, policy: Policy) -> Result<Policy, StoreError> {
        let guard = self.lock()?;
        let label_selector = encode_label_selector(&policy.label_selector)?;
        let affected = guard
            .execute(
                "UPDATE policies SET display_name = ?, description = ?, priority = ?, \
                 enabled = ?, label_selector = ?, package_name = ?, update_time = ? \
                 WHERE id = ?",
                params![
                    policy.display_name,
                    policy.description,
                    policy.priority,
                    i64::from(policy.enabled),
                    label_selector,
                    policy.package_name,
                    policy.update_time.as_unix_millis(),
                    policy.id.as_str(),
                ],
            )
            .map_err(|error| map_unique_violation(error, &policy.id))?;
        if affected == 0 {
            return Err(StoreError::NotFound(policy.id));
        }
        fetch_policy(&guard, &policy.id)
    }

    fn delete(&self, id: &PolicyId) -> Result<(), StoreError> {
        let guard = self.lock()?;
        let affected = guard
            .execute("DELETE FROM policies WHERE id = ?", params![id.as_str()])
            .map_err(|error| StoreError::Backend(error.to_string()))?;
        if affected == 0 {
            return Err(StoreError::NotFound(id.clone()));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Connection Setup
// ============================================================================

/// Creates the parent directory for the database file when missing.
fn ensure_parent_dir(path: &Path) -> Result<(), SqliteStoreError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|error| SqliteStoreError::Io(error.to_string()))?;
    }
    Ok(())
}

/// Opens the database connection and applies pragmas.
fn open_connection(config: &SqliteStoreConfig) -> Result<Connection, SqliteStoreError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
    let connection = Connection::open_with_flags(&config.path, flags)
        .map_err(|error| SqliteStoreError::Db(error.to_string()))?;
    apply_pragmas(&connection, config)?;
    Ok(connection)
}

/// Applies the `SQLite` pragmas required for durability.
fn apply_pragmas(
    connection: &Connection,
    config: &SqliteStoreConfig,
) -> Result<(), SqliteStoreError> {
    connection
        .execute_batch(&format!("PRAGMA journal_mode = {};", config.journal_mode.pragma_value()))
        .map_err(|error| SqliteStoreError::Db(error.to_string()))?;
    connection
        .execute_batch(&format!("PRAGMA synchronous = {};", config.sync_mode.pragma_value()))
        .map_err(|error| SqliteStoreError::Db(error.to_string()))?;
    connection
        .busy_timeout(std::time::Duration::from_millis(config.busy_timeout_ms))
        .map_err(|error| SqliteStoreError::Db(error.to_string()))?;
    Ok(())
}

/// Initializes or verifies the store schema.
fn initialize_schema(connection: &Connection) -> Result<(), SqliteStoreError> {
    let version: i64 = connection
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .map_err(|error| SqliteStoreError::Db(error.to_string()))?;
    match version {
        0 => {
            connection
                .execute_batch(SCHEMA_SQL)
                .map_err(|error| SqliteStoreError::Db(error.to_string()))?;
            connection
                .execute_batch(&format!("PRAGMA user_version = {SCHEMA_VERSION};"))
                .map_err(|error| SqliteStoreError::Db(error.to_string()))?;
            Ok(())
        }
        SCHEMA_VERSION => Ok(()),
        other => Err(SqliteStoreError::VersionMismatch(format!(
            "expected schema version {SCHEMA_VERSION}, found {other}"
        ))),
    }
}

// ============================================================================
// SECTION: Row Mapping
// ============================================================================

/// Reads a policy record from a result row.
fn read_policy_row(row: &Row<'_>) -> rusqlite::Result<Policy> {
    let policy_type_text: String = row.get(1)?;
    let policy_type = PolicyType::parse(&policy_type_text).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            rusqlite::types::Type::Text,
            format!("unknown policy type '{policy_type_text}'").into(),
        )
    })?;
    let label_selector_text: String = row.get(6)?;
    let label_selector: BTreeMap<String, String> = serde_json::from_str(&label_selector_text)
        .map_err(|error| {
            rusqlite::Error::FromSqlConversionFailure(
                6,
                rusqlite::types::Type::Text,
                Box::new(error),
            )
        })?;

    Ok(Policy {
        id: PolicyId::new(row.get::<_, String>(0)?),
        policy_type,
        display_name: row.get(2)?,
        description: row.get(3)?,
        priority: row.get(4)?,
        enabled: row.get::<_, i64>(5)? != 0,
        label_selector,
        package_name: row.get(7)?,
        create_time: Timestamp::from_unix_millis(row.get(8)?),
        update_time: Timestamp::from_unix_millis(row.get(9)?),
    })
}

/// Fetches one policy by identifier.
fn fetch_policy(connection: &Connection, id: &PolicyId) -> Result<Policy, StoreError> {
    let sql = format!("SELECT {POLICY_COLUMNS} FROM policies WHERE id = ?");
    let mut statement =
        connection.prepare(&sql).map_err(|error| StoreError::Backend(error.to_string()))?;
    let mut rows = statement
        .query_map(params![id.as_str()], read_policy_row)
        .map_err(|error| StoreError::Backend(error.to_string()))?;
    match rows.next() {
        Some(row) => row.map_err(|error| StoreError::Backend(error.to_string())),
        None => Err(StoreError::NotFound(id.clone())),
    }
}

/// Serializes a label selector into its stored JSON form.
fn encode_label_selector(selector: &BTreeMap<String, String>) -> Result<String, StoreError> {
    serde_json::to_string(selector).map_err(|error| StoreError::Backend(error.to_string()))
}

// ============================================================================
// SECTION: Error Mapping
// ============================================================================

/// Maps a unique-constraint violation to the matching store sentinel.
///
/// `SQLite` names the violated columns in the error message; `display_name`
/// is checked before `priority` to avoid misclassification when both appear.
fn map_unique_violation(error: rusqlite::Error, id: &PolicyId) -> StoreError {
    let rusqlite::Error::SqliteFailure(failure, Some(message)) = &error else {
        return StoreError::Backend(error.to_string());
    };
    if failure.code != ErrorCode::ConstraintViolation {
        return StoreError::Backend(error.to_string());
    }
    if message.contains("policies.id") {
        return StoreError::IdTaken(id.clone());
    }
    if message.contains("idx_policies_display_name_policy_type")
        || message.contains("display_name")
    {
        return StoreError::DisplayNameTaken;
    }
    if message.contains("idx_policies_priority_policy_type") || message.contains("priority") {
        return StoreError::PriorityTaken;
    }
    StoreError::Backend(error.to_string())
}

/// Decodes a page token, mapping failures to the catalog error.
fn decode_token(token: &str) -> Result<PageToken, CatalogError> {
    PageToken::decode(token).map_err(|_| CatalogError::InvalidPageToken(token.to_string()))
}

/// Renders ordering clauses as SQL, with the id tiebreak appended.
fn order_by_sql(order_by: &[OrderBy]) -> String {
    let mut parts: Vec<String> = order_by
        .iter()
        .map(|clause| {
            let column = match clause.field {
                OrderField::Priority => "priority",
                OrderField::DisplayName => "display_name",
                OrderField::CreateTime => "create_time",
            };
            let direction = match clause.direction {
                OrderDirection::Asc => "ASC",
                OrderDirection::Desc => "DESC",
            };
            format!("{column} {direction}")
        })
        .collect();
    parts.push("id ASC".to_string());
    parts.join(", ")
}
