//! SQLite-backed `TenantStore` with durable persistence.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};

use super::{StoreError, StoreResult, TenantStore};
use crate::model::{ChannelId, DerivedState, Tenant, TenantId};

/// Persistent store in a single SQLite file.
///
/// A fresh connection is opened per call, on the blocking thread pool so a
/// busy database never stalls the async workers. WAL mode and a busy
/// timeout let concurrent tenant tasks write without coordinating; each
/// write is one transaction, so the last writer wins.
#[derive(Debug)]
pub struct SqliteStore {
    db_path: PathBuf,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and ensure the schema exists.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let db_path = path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let connection = open_connection(&db_path)?;
        initialize_schema(&connection)?;
        Ok(Self { db_path })
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// Run `op` against a fresh connection on the blocking pool.
    async fn with_connection<T, F>(&self, op: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
    {
        let path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut connection = open_connection(&path)?;
            op(&mut connection)
        })
        .await?
    }
}

fn open_connection(path: &Path) -> StoreResult<Connection> {
    let connection = Connection::open(path)?;
    connection.busy_timeout(Duration::from_secs(5))?;
    connection.execute_batch(
        r"
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        ",
    )?;
    Ok(connection)
}

fn initialize_schema(connection: &Connection) -> StoreResult<()> {
    connection.execute_batch(
        r"
        CREATE TABLE IF NOT EXISTS tenants (
            id TEXT PRIMARY KEY,
            address TEXT NOT NULL,
            port INTEGER NOT NULL,
            announce_enabled INTEGER NOT NULL DEFAULT 0,
            announce_channel_id TEXT NULL,
            show_hours INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS derived_state (
            tenant_id TEXT PRIMARY KEY,
            last_query_at TEXT NULL,
            accumulated_seconds INTEGER NOT NULL DEFAULT 0,
            carry_millis INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(tenant_id) REFERENCES tenants(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS roster (
            tenant_id TEXT NOT NULL,
            player_name TEXT NOT NULL,
            PRIMARY KEY (tenant_id, player_name),
            FOREIGN KEY(tenant_id) REFERENCES tenants(id) ON DELETE CASCADE
        );
        ",
    )?;

    // Databases created before sub-second carry was persisted.
    let has_carry: bool = connection.query_row(
        "SELECT COUNT(*) > 0 FROM pragma_table_info('derived_state') WHERE name = 'carry_millis'",
        [],
        |row| row.get(0),
    )?;
    if !has_carry {
        connection.execute_batch(
            "ALTER TABLE derived_state ADD COLUMN carry_millis INTEGER NOT NULL DEFAULT 0;",
        )?;
    }
    Ok(())
}

#[async_trait]
impl TenantStore for SqliteStore {
    async fn list_tenants(&self) -> StoreResult<Vec<Tenant>> {
        self.with_connection(|connection| {
            let mut statement = connection.prepare(
                "SELECT id, address, port, announce_enabled, announce_channel_id, show_hours
                 FROM tenants ORDER BY CAST(id AS INTEGER)",
            )?;
            let rows = statement.query_map([], raw_tenant_from_row)?;

            let mut tenants = Vec::new();
            for row in rows {
                tenants.push(row?.into_tenant()?);
            }
            Ok(tenants)
        })
        .await
    }

    async fn get_tenant(&self, id: TenantId) -> StoreResult<Option<Tenant>> {
        self.with_connection(move |connection| {
            connection
                .query_row(
                    "SELECT id, address, port, announce_enabled, announce_channel_id, show_hours
                     FROM tenants WHERE id = ?1",
                    params![id.to_string()],
                    raw_tenant_from_row,
                )
                .optional()?
                .map(RawTenant::into_tenant)
                .transpose()
        })
        .await
    }

    async fn upsert_tenant(&self, tenant: &Tenant) -> StoreResult<()> {
        let tenant = tenant.clone();
        self.with_connection(move |connection| {
            connection.execute(
                r"
                INSERT INTO tenants (id, address, port, announce_enabled, announce_channel_id, show_hours)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(id) DO UPDATE SET
                    address = excluded.address,
                    port = excluded.port,
                    announce_enabled = excluded.announce_enabled,
                    announce_channel_id = excluded.announce_channel_id,
                    show_hours = excluded.show_hours
                ",
                params![
                    tenant.id.to_string(),
                    tenant.address,
                    i64::from(tenant.port),
                    tenant.announce_enabled,
                    tenant.announce_channel.map(|c| c.to_string()),
                    tenant.show_hours,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn delete_tenant(&self, id: TenantId) -> StoreResult<bool> {
        self.with_connection(move |connection| {
            let transaction = connection.transaction()?;
            let key = id.to_string();

            let roster = transaction.execute("DELETE FROM roster WHERE tenant_id = ?1", params![key])?;
            let derived = transaction.execute("DELETE FROM derived_state WHERE tenant_id = ?1", params![key])?;
            let tenants = transaction.execute("DELETE FROM tenants WHERE id = ?1", params![key])?;
            transaction.commit()?;

            Ok(roster + derived + tenants > 0)
        })
        .await
    }

    async fn derived_state(&self, id: TenantId) -> StoreResult<DerivedState> {
        self.with_connection(move |connection| {
            let key = id.to_string();

            let counters: Option<(Option<String>, i64, i64)> = connection
                .query_row(
                    "SELECT last_query_at, accumulated_seconds, carry_millis
                     FROM derived_state WHERE tenant_id = ?1",
                    params![key],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()?;

            let mut statement =
                connection.prepare("SELECT player_name FROM roster WHERE tenant_id = ?1 ORDER BY player_name")?;
            let roster = statement
                .query_map(params![key], |row| row.get::<_, String>(0))?
                .collect::<Result<_, _>>()?;

            let Some((last, seconds, carry)) = counters else {
                return Ok(DerivedState {
                    roster,
                    ..DerivedState::default()
                });
            };

            Ok(DerivedState {
                roster,
                last_query_at: option_timestamp_from_db(last)?,
                accumulated_seconds: counter_from_db("accumulated_seconds", seconds)?,
                carry_millis: counter_from_db("carry_millis", carry)?,
            })
        })
        .await
    }

    async fn save_derived_state(&self, id: TenantId, state: &DerivedState) -> StoreResult<()> {
        let state = state.clone();
        self.with_connection(move |connection| {
            let transaction = connection.transaction()?;
            let key = id.to_string();

            let exists = transaction
                .query_row("SELECT 1 FROM tenants WHERE id = ?1", params![key], |row| {
                    row.get::<_, i64>(0)
                })
                .optional()?;
            if exists.is_none() {
                return Err(StoreError::UnknownTenant(id));
            }

            transaction.execute(
                r"
                INSERT INTO derived_state (tenant_id, last_query_at, accumulated_seconds, carry_millis)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT(tenant_id) DO UPDATE SET
                    last_query_at = excluded.last_query_at,
                    accumulated_seconds = excluded.accumulated_seconds,
                    carry_millis = excluded.carry_millis
                ",
                params![
                    key,
                    state.last_query_at.map(timestamp_to_db),
                    counter_to_db("accumulated_seconds", state.accumulated_seconds)?,
                    counter_to_db("carry_millis", state.carry_millis)?,
                ],
            )?;

            transaction.execute("DELETE FROM roster WHERE tenant_id = ?1", params![key])?;
            {
                let mut insert =
                    transaction.prepare("INSERT INTO roster (tenant_id, player_name) VALUES (?1, ?2)")?;
                for name in &state.roster {
                    insert.execute(params![key, name])?;
                }
            }

            transaction.commit()?;
            Ok(())
        })
        .await
    }
}

// ── Row mapping ─────────────────────────────────────────────────────

struct RawTenant {
    id: String,
    address: String,
    port: i64,
    announce_enabled: bool,
    announce_channel_id: Option<String>,
    show_hours: bool,
}

fn raw_tenant_from_row(row: &Row<'_>) -> rusqlite::Result<RawTenant> {
    Ok(RawTenant {
        id: row.get(0)?,
        address: row.get(1)?,
        port: row.get(2)?,
        announce_enabled: row.get(3)?,
        announce_channel_id: row.get(4)?,
        show_hours: row.get(5)?,
    })
}

impl RawTenant {
    fn into_tenant(self) -> StoreResult<Tenant> {
        let id = self.id.parse().map_err(|_| StoreError::InvalidPersistedValue {
            field: "tenants.id",
            value: self.id.clone(),
        })?;
        let port = u16::try_from(self.port).map_err(|_| StoreError::InvalidPersistedValue {
            field: "tenants.port",
            value: self.port.to_string(),
        })?;
        let announce_channel = self
            .announce_channel_id
            .map(|raw| {
                raw.parse::<ChannelId>()
                    .map_err(|_| StoreError::InvalidPersistedValue {
                        field: "tenants.announce_channel_id",
                        value: raw,
                    })
            })
            .transpose()?;

        Ok(Tenant {
            id,
            address: self.address,
            port,
            announce_enabled: self.announce_enabled,
            announce_channel,
            show_hours: self.show_hours,
        })
    }
}

fn timestamp_to_db(value: DateTime<Utc>) -> String {
    value.to_rfc3339()
}

fn timestamp_from_db(value: &str) -> StoreResult<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)?.with_timezone(&Utc))
}

fn option_timestamp_from_db(value: Option<String>) -> StoreResult<Option<DateTime<Utc>>> {
    value.as_deref().map(timestamp_from_db).transpose()
}

fn counter_to_db(field: &'static str, value: u64) -> StoreResult<i64> {
    i64::try_from(value).map_err(|_| StoreError::InvalidPersistedValue {
        field,
        value: value.to_string(),
    })
}

fn counter_from_db(field: &'static str, value: i64) -> StoreResult<u64> {
    u64::try_from(value).map_err(|_| StoreError::InvalidPersistedValue {
        field,
        value: value.to_string(),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    fn tenant(id: u64) -> Tenant {
        Tenant {
            id: TenantId(id),
            address: "mc.example.net".into(),
            port: 25565,
            announce_enabled: true,
            announce_channel: Some(ChannelId(42)),
            show_hours: false,
        }
    }

    #[tokio::test]
    async fn tenant_round_trips_and_upserts() {
        let temp = tempdir().unwrap();
        let store = SqliteStore::open(temp.path().join("blockwatch.sqlite")).unwrap();

        store.upsert_tenant(&tenant(1)).await.unwrap();
        assert_eq!(store.get_tenant(TenantId(1)).await.unwrap(), Some(tenant(1)));

        let mut changed = tenant(1);
        changed.address = "play.example.org".into();
        changed.port = 25570;
        changed.announce_enabled = false;
        changed.announce_channel = None;
        changed.show_hours = true;
        store.upsert_tenant(&changed).await.unwrap();

        assert_eq!(store.list_tenants().await.unwrap(), vec![changed]);
    }

    #[tokio::test]
    async fn derived_state_persists_across_reopen() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("nested").join("blockwatch.sqlite");
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();

        {
            let store = SqliteStore::open(&path).unwrap();
            store.upsert_tenant(&tenant(7)).await.unwrap();
            store
                .save_derived_state(
                    TenantId(7),
                    &DerivedState {
                        roster: ["Alex".to_owned(), "Steve".to_owned()].into(),
                        last_query_at: Some(at),
                        accumulated_seconds: 1800,
                        carry_millis: 250,
                    },
                )
                .await
                .unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        let state = store.derived_state(TenantId(7)).await.unwrap();
        assert_eq!(state.roster.len(), 2);
        assert!(state.roster.contains("Steve"));
        assert_eq!(state.last_query_at, Some(at));
        assert_eq!(state.accumulated_seconds, 1800);
        assert_eq!(state.carry_millis, 250);
    }

    #[tokio::test]
    async fn older_schema_gains_carry_column() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("old.sqlite");
        {
            let connection = Connection::open(&path).unwrap();
            connection
                .execute_batch(
                    r"
                    CREATE TABLE tenants (
                        id TEXT PRIMARY KEY,
                        address TEXT NOT NULL,
                        port INTEGER NOT NULL,
                        announce_enabled INTEGER NOT NULL DEFAULT 0,
                        announce_channel_id TEXT NULL,
                        show_hours INTEGER NOT NULL DEFAULT 0
                    );
                    CREATE TABLE derived_state (
                        tenant_id TEXT PRIMARY KEY,
                        last_query_at TEXT NULL,
                        accumulated_seconds INTEGER NOT NULL DEFAULT 0
                    );
                    INSERT INTO tenants (id, address, port) VALUES ('11', 'mc.example.net', 25565);
                    INSERT INTO derived_state (tenant_id, accumulated_seconds) VALUES ('11', 360);
                    ",
                )
                .unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        let state = store.derived_state(TenantId(11)).await.unwrap();
        assert_eq!((state.accumulated_seconds, state.carry_millis), (360, 0));

        let carried = DerivedState {
            carry_millis: 999,
            ..state
        };
        store.save_derived_state(TenantId(11), &carried).await.unwrap();
        assert_eq!(store.derived_state(TenantId(11)).await.unwrap().carry_millis, 999);
    }

    #[tokio::test]
    async fn save_replaces_roster() {
        let temp = tempdir().unwrap();
        let store = SqliteStore::open(temp.path().join("db.sqlite")).unwrap();
        store.upsert_tenant(&tenant(2)).await.unwrap();

        let mut state = DerivedState {
            roster: ["a".to_owned(), "b".to_owned()].into(),
            ..DerivedState::default()
        };
        store.save_derived_state(TenantId(2), &state).await.unwrap();

        state.roster = ["c".to_owned()].into();
        store.save_derived_state(TenantId(2), &state).await.unwrap();

        let loaded = store.derived_state(TenantId(2)).await.unwrap();
        assert_eq!(loaded.roster, state.roster);
        assert_eq!(loaded.last_query_at, None);
    }

    #[tokio::test]
    async fn missing_state_is_empty() {
        let temp = tempdir().unwrap();
        let store = SqliteStore::open(temp.path().join("db.sqlite")).unwrap();
        assert_eq!(store.derived_state(TenantId(9)).await.unwrap(), DerivedState::default());
    }

    #[tokio::test]
    async fn delete_removes_everything_once() {
        let temp = tempdir().unwrap();
        let store = SqliteStore::open(temp.path().join("db.sqlite")).unwrap();
        store.upsert_tenant(&tenant(3)).await.unwrap();
        store
            .save_derived_state(
                TenantId(3),
                &DerivedState {
                    roster: ["x".to_owned()].into(),
                    accumulated_seconds: 5,
                    ..DerivedState::default()
                },
            )
            .await
            .unwrap();

        assert!(store.delete_tenant(TenantId(3)).await.unwrap());
        assert!(!store.delete_tenant(TenantId(3)).await.unwrap());
        assert_eq!(store.get_tenant(TenantId(3)).await.unwrap(), None);
        assert_eq!(store.derived_state(TenantId(3)).await.unwrap(), DerivedState::default());
    }

    #[tokio::test]
    async fn saving_state_for_deleted_tenant_fails() {
        let temp = tempdir().unwrap();
        let store = SqliteStore::open(temp.path().join("db.sqlite")).unwrap();
        let err = store
            .save_derived_state(TenantId(4), &DerivedState::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UnknownTenant(TenantId(4))));
    }

    #[tokio::test]
    async fn names_with_quotes_are_stored_verbatim() {
        let temp = tempdir().unwrap();
        let store = SqliteStore::open(temp.path().join("db.sqlite")).unwrap();
        store.upsert_tenant(&tenant(5)).await.unwrap();

        let tricky = r#"Robert"); DROP TABLE roster;--"#.to_owned();
        store
            .save_derived_state(
                TenantId(5),
                &DerivedState {
                    roster: [tricky.clone()].into(),
                    ..DerivedState::default()
                },
            )
            .await
            .unwrap();

        let loaded = store.derived_state(TenantId(5)).await.unwrap();
        assert!(loaded.roster.contains(&tricky));
    }
}
