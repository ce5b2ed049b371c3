use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use rusqlite::types::Value as SqlValue;
use rusqlite::{ErrorCode, OptionalExtension, params, params_from_iter};
use serde_json::{Map, Value};
use tokio::sync::{broadcast, mpsc};
use tokio::time::{self, MissedTickBehavior};
use uuid::Uuid;

use super::database::Database;
use super::document::{
    Direction, Document, FieldValue, Query, WriteFields, validate_field_name,
};
use super::ensure_parent_dir;
use super::store::{DocumentStore, LiveQuery, Snapshot, StoreError};

const CHANGE_FEED_CAPACITY: usize = 256;
const LIVE_QUERY_BUFFER: usize = 16;
/// How often live queries look for commits made by other connections.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

struct Shared {
    db: Database,
    last_server_timestamp: i64,
}

struct Inner {
    shared: Mutex<Shared>,
    /// Name of the collection touched by every committed write.
    changes: broadcast::Sender<String>,
}

/// Document store persisted in SQLite.
///
/// Live queries re-run on writes made through this store (an in-process
/// change feed) and on commits by any other connection to the same file,
/// which they notice by polling `PRAGMA data_version`.
#[derive(Clone)]
pub struct SqliteStore {
    inner: Arc<Inner>,
    poll_interval: Duration,
}

impl SqliteStore {
    pub fn with_path<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        ensure_parent_dir(path.as_ref())
            .map_err(|err| StoreError::Backend(format!("cannot create data dir: {err}")))?;
        let db = Database::new(path)?;
        Self::from_database(db)
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Self::from_database(Database::in_memory()?)
    }

    fn from_database(db: Database) -> Result<Self, StoreError> {
        // Resume after the newest stored write, even if the clock went back.
        let last_server_timestamp = db.latest_write()?;
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Ok(Self {
            inner: Arc::new(Inner {
                shared: Mutex::new(Shared {
                    db,
                    last_server_timestamp,
                }),
                changes,
            }),
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    /// Sets how often live queries opened from this handle check for writes
    /// by other connections.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Number of documents in a collection.
    pub fn count(&self, collection: &str) -> Result<usize, StoreError> {
        let shared = self.lock()?;
        let count: i64 = shared.db.connection().query_row(
            "SELECT COUNT(*) FROM documents WHERE collection = ?1",
            params![collection],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Shared>, StoreError> {
        self.inner
            .shared
            .lock()
            .map_err(|_| StoreError::Backend("store lock poisoned".to_string()))
    }

    fn data_version(&self) -> Result<i64, StoreError> {
        Ok(self.lock()?.db.data_version()?)
    }

    fn notify(&self, collection: &str) {
        // No receivers simply means no live queries are open.
        let _ = self.inner.changes.send(collection.to_string());
    }

    fn run_query(&self, query: &Query) -> Result<Snapshot, StoreError> {
        query.validate()?;

        let mut sql = String::from("SELECT id, data FROM documents WHERE collection = ?");
        let mut values: Vec<SqlValue> = vec![SqlValue::Text(query.collection.clone())];
        for filter in &query.filters {
            sql.push_str(" AND json_extract(data, ?) IS ?");
            values.push(SqlValue::Text(json_path(&filter.field)));
            values.push(to_sql_value(&filter.value));
        }
        match &query.order_by {
            Some(order) => {
                let direction = match order.direction {
                    Direction::Ascending => "ASC",
                    Direction::Descending => "DESC",
                };
                sql.push_str(&format!(" ORDER BY json_extract(data, ?) {direction}, id ASC"));
                values.push(SqlValue::Text(json_path(&order.field)));
            }
            None => sql.push_str(" ORDER BY id ASC"),
        }

        let shared = self.lock()?;
        let mut stmt = shared.db.connection().prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(id, data)| decode_document(id, &data))
            .collect()
    }
}

impl Shared {
    /// Every write gets a later timestamp than any write before it, whatever
    /// the wall clock does, including writes from other connections.
    fn next_server_timestamp(&mut self) -> Result<i64, StoreError> {
        let now = Utc::now().timestamp_millis();
        let floor = self.last_server_timestamp.max(self.db.latest_write()?);
        self.last_server_timestamp = now.max(floor + 1);
        Ok(self.last_server_timestamp)
    }
}

impl DocumentStore for SqliteStore {
    async fn create(&self, collection: &str, fields: WriteFields) -> Result<String, StoreError> {
        let id = Uuid::new_v4().to_string();
        {
            let mut shared = self.lock()?;
            let timestamp = shared.next_server_timestamp()?;
            let data = resolve_fields(fields, timestamp)?;
            shared.db.connection().execute(
                "INSERT INTO documents (collection, id, data, written_at) VALUES (?1, ?2, ?3, ?4)",
                params![collection, id, Value::Object(data).to_string(), timestamp],
            )?;
        }
        log::debug!("Created document {collection}/{id}");
        self.notify(collection);
        Ok(id)
    }

    async fn set(
        &self,
        collection: &str,
        id: &str,
        fields: WriteFields,
        merge: bool,
    ) -> Result<(), StoreError> {
        {
            let mut shared = self.lock()?;
            let timestamp = shared.next_server_timestamp()?;
            let incoming = resolve_fields(fields, timestamp)?;

            let tx = shared.db.connection_mut().transaction()?;
            let existing: Option<String> = tx
                .query_row(
                    "SELECT data FROM documents WHERE collection = ?1 AND id = ?2",
                    params![collection, id],
                    |row| row.get(0),
                )
                .optional()?;

            let data = match (merge, existing) {
                (true, Some(existing)) => {
                    let mut current = decode_document(id.to_string(), &existing)?.fields;
                    current.extend(incoming);
                    current
                }
                _ => incoming,
            };

            tx.execute(
                "INSERT INTO documents (collection, id, data, written_at) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(collection, id) DO UPDATE
                 SET data = excluded.data, written_at = excluded.written_at",
                params![collection, id, Value::Object(data).to_string(), timestamp],
            )?;
            tx.commit()?;
        }
        self.notify(collection);
        Ok(())
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Document, StoreError> {
        let shared = self.lock()?;
        let data: Option<String> = shared
            .db
            .connection()
            .query_row(
                "SELECT data FROM documents WHERE collection = ?1 AND id = ?2",
                params![collection, id],
                |row| row.get(0),
            )
            .optional()?;

        match data {
            Some(data) => decode_document(id.to_string(), &data),
            None => Err(StoreError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            }),
        }
    }

    async fn query(&self, query: &Query) -> Result<Snapshot, StoreError> {
        self.run_query(query)
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        let removed = {
            let shared = self.lock()?;
            shared.db.connection().execute(
                "DELETE FROM documents WHERE collection = ?1 AND id = ?2",
                params![collection, id],
            )?
        };
        if removed == 0 {
            return Err(StoreError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            });
        }
        self.notify(collection);
        Ok(())
    }

    fn subscribe(&self, query: Query) -> Result<LiveQuery, StoreError> {
        query.validate()?;

        // Subscribe to the feed before the first read so no write slips between them.
        let mut changes = self.inner.changes.subscribe();
        let (sender, receiver) = mpsc::channel(LIVE_QUERY_BUFFER);
        let store = self.clone();
        let poll_interval = self.poll_interval;

        let producer = tokio::spawn(async move {
            let mut ticker = time::interval(poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut last: Option<Snapshot> = None;
            loop {
                // Version first: a foreign commit landing after it forces another read.
                let read = store
                    .data_version()
                    .and_then(|version| Ok((version, store.run_query(&query)?)));
                let seen_version = match read {
                    Ok((version, snapshot)) => {
                        if last.as_ref() != Some(&snapshot) {
                            if sender.send(Ok(snapshot.clone())).await.is_err() {
                                return;
                            }
                            last = Some(snapshot);
                        }
                        version
                    }
                    Err(err) => {
                        log::warn!("Live query on {} failed: {err}", query.collection);
                        let _ = sender.send(Err(err)).await;
                        return;
                    }
                };

                loop {
                    tokio::select! {
                        change = changes.recv() => match change {
                            Ok(collection) if collection == query.collection => break,
                            Ok(_) => {}
                            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                                log::debug!("Live query lagged by {skipped} changes; re-reading");
                                break;
                            }
                            Err(broadcast::error::RecvError::Closed) => return,
                        },
                        _ = ticker.tick() => match store.data_version() {
                            Ok(version) if version != seen_version => {
                                log::debug!(
                                    "Database changed by another connection; re-reading {}",
                                    query.collection
                                );
                                break;
                            }
                            Ok(_) => {}
                            Err(err) => {
                                log::warn!("Live query on {} failed: {err}", query.collection);
                                let _ = sender.send(Err(err)).await;
                                return;
                            }
                        },
                    }
                }
            }
        });

        Ok(LiveQuery::new(receiver, Some(producer)))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        let code = match &err {
            rusqlite::Error::SqliteFailure(failure, _) => Some(failure.code),
            _ => None,
        };
        match code {
            Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => {
                StoreError::Unavailable(err.to_string())
            }
            Some(ErrorCode::DiskFull | ErrorCode::OutOfMemory) => {
                StoreError::ResourceExhausted(err.to_string())
            }
            Some(
                ErrorCode::ReadOnly
                | ErrorCode::PermissionDenied
                | ErrorCode::AuthorizationForStatementDenied,
            ) => StoreError::PermissionDenied(err.to_string()),
            _ => StoreError::Backend(err.to_string()),
        }
    }
}

fn json_path(field: &str) -> String {
    format!("$.{field}")
}

fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(flag) => SqlValue::Integer(i64::from(*flag)),
        Value::Number(number) => match number.as_i64() {
            Some(integer) => SqlValue::Integer(integer),
            None => SqlValue::Real(number.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(text) => SqlValue::Text(text.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn resolve_fields(fields: WriteFields, timestamp: i64) -> Result<Map<String, Value>, StoreError> {
    let mut data = Map::new();
    for (name, value) in fields {
        validate_field_name(&name)?;
        let value = match value {
            FieldValue::Value(value) => value,
            FieldValue::ServerTimestamp => Value::from(timestamp),
        };
        data.insert(name, value);
    }
    Ok(data)
}

fn decode_document(id: String, data: &str) -> Result<Document, StoreError> {
    match serde_json::from_str::<Value>(data) {
        Ok(Value::Object(fields)) => Ok(Document { id, fields }),
        Ok(_) => Err(StoreError::Corrupt {
            id,
            reason: "document body is not a JSON object".to_string(),
        }),
        Err(err) => Err(StoreError::Corrupt {
            id,
            reason: err.to_string(),
        }),
    }
}
