use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::domain::{DomainState, PolicyType, PreloadStatus};
use super::repository::{with_deadline, DomainStore, StoreError, OPERATION_TIMEOUT};

const SELECT_COLUMNS: &str =
    "SELECT name, status, message, submission_date, include_sub_domains, policy FROM domain_states";

/// SQLite-backed domain store. Calls run on the blocking pool and share a
/// single connection; each batch write is one transaction.
#[derive(Debug, Clone)]
pub struct SqliteDomainStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteDomainStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(backend)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(backend)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn run<T, F>(&self, operation: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let task = tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| StoreError::Unavailable("sqlite connection lock poisoned".into()))?;
            operation(&mut guard)
        });

        match with_deadline(task).await? {
            Ok(result) => result,
            Err(join) => Err(StoreError::Backend(format!("blocking task failed: {join}"))),
        }
    }
}

fn init_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS domain_states (
            name TEXT PRIMARY KEY NOT NULL,
            status TEXT NOT NULL,
            message TEXT NOT NULL DEFAULT '',
            submission_date TEXT,
            include_sub_domains INTEGER NOT NULL DEFAULT 0,
            policy TEXT NOT NULL DEFAULT ''
        );

        CREATE INDEX IF NOT EXISTS domain_states_status_idx
            ON domain_states(status, name);",
    )
    .map_err(backend)
}

fn backend(err: rusqlite::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

/// Column values as stored, before validation.
struct StoredRow {
    name: String,
    status: String,
    message: String,
    submission_date: Option<String>,
    include_sub_domains: bool,
    policy: String,
}

impl StoredRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            name: row.get(0)?,
            status: row.get(1)?,
            message: row.get(2)?,
            submission_date: row.get(3)?,
            include_sub_domains: row.get(4)?,
            policy: row.get(5)?,
        })
    }

    fn into_state(self) -> Result<DomainState, StoreError> {
        let status = PreloadStatus::parse(&self.status).ok_or_else(|| StoreError::Corrupt {
            name: self.name.clone(),
            detail: format!("unknown status '{}'", self.status),
        })?;

        let submission_date = match self.submission_date {
            Some(raw) => Some(
                DateTime::parse_from_rfc3339(&raw)
                    .map(|date| date.with_timezone(&Utc))
                    .map_err(|err| StoreError::Corrupt {
                        name: self.name.clone(),
                        detail: format!("submission date '{raw}': {err}"),
                    })?,
            ),
            None => None,
        };

        Ok(DomainState {
            name: self.name,
            status,
            message: self.message,
            submission_date,
            include_sub_domains: self.include_sub_domains,
            policy: PolicyType::from(self.policy),
        })
    }
}

fn collect_states(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<DomainState>, StoreError> {
    let mut stmt = conn.prepare(sql).map_err(backend)?;
    let rows = stmt.query_map(params, StoredRow::read).map_err(backend)?;
    let mut states = Vec::new();
    for row in rows {
        states.push(row.map_err(backend)?.into_state()?);
    }
    Ok(states)
}

/// Upserts `batch` in one transaction. A batch that is still running at
/// `deadline` rolls back, so a write the caller has already given up on
/// never lands.
fn insert_batch(
    conn: &mut Connection,
    batch: &[DomainState],
    deadline: Instant,
) -> Result<(), StoreError> {
    let tx = conn.transaction().map_err(backend)?;
    {
        let mut stmt = tx
            .prepare(
                "INSERT OR REPLACE INTO domain_states
                     (name, status, message, submission_date, include_sub_domains, policy)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )
            .map_err(backend)?;
        for state in batch {
            let submission_date = state
                .submission_date
                .map(|date| date.to_rfc3339_opts(SecondsFormat::Nanos, true));
            stmt.execute(params![
                &state.name,
                state.status.as_str(),
                &state.message,
                submission_date,
                state.include_sub_domains,
                state.policy.as_str(),
            ])
            .map_err(backend)?;
        }
    }
    if Instant::now() >= deadline {
        return Err(StoreError::Timeout(OPERATION_TIMEOUT));
    }
    tx.commit().map_err(backend)
}

#[async_trait]
impl DomainStore for SqliteDomainStore {
    async fn state_for_domain(&self, domain: &str) -> Result<DomainState, StoreError> {
        let domain = domain.to_string();
        self.run(move |conn| {
            let row = conn
                .query_row(
                    &format!("{SELECT_COLUMNS} WHERE name = ?1"),
                    params![&domain],
                    StoredRow::read,
                )
                .optional()
                .map_err(backend)?;
            match row {
                Some(row) => row.into_state(),
                None => Ok(DomainState::unknown(domain)),
            }
        })
        .await
    }

    async fn states_with_status(
        &self,
        status: PreloadStatus,
    ) -> Result<Vec<DomainState>, StoreError> {
        self.run(move |conn| {
            collect_states(
                conn,
                &format!("{SELECT_COLUMNS} WHERE status = ?1 ORDER BY name"),
                params![status.as_str()],
            )
        })
        .await
    }

    async fn domains_with_status(&self, status: PreloadStatus) -> Result<Vec<String>, StoreError> {
        self.run(move |conn| {
            let mut stmt = conn
                .prepare("SELECT name FROM domain_states WHERE status = ?1 ORDER BY name")
                .map_err(backend)?;
            let names = stmt
                .query_map(params![status.as_str()], |row| row.get::<_, String>(0))
                .map_err(backend)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(backend)?;
            Ok(names)
        })
        .await
    }

    async fn all_domain_states(&self) -> Result<Vec<DomainState>, StoreError> {
        self.run(|conn| collect_states(conn, &format!("{SELECT_COLUMNS} ORDER BY name"), []))
            .await
    }

    async fn write_batch(&self, batch: &[DomainState]) -> Result<(), StoreError> {
        let batch = batch.to_vec();
        let deadline = Instant::now() + OPERATION_TIMEOUT;
        self.run(move |conn| insert_batch(conn, &batch, deadline)).await
    }

    async fn check_connection(&self) -> Result<(), StoreError> {
        self.run(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                .map(|_| ())
                .map_err(backend)
        })
        .await
    }
}
