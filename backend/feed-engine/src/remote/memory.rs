//! In-process data service
//!
//! Holds every table as a list of JSON rows and interprets `Query`/`Filter`
//! the same way the REST endpoint does. Supports failure injection, holding
//! writes at a gate, and publishing committed changes to a `LocalChangeFeed`
//! so the whole engine can run without a backend.

use super::{DataService, Filter, Procedure, Query, Table};
use crate::error::{RemoteError, RemoteResult};
use async_trait::async_trait;
use change_feed::{ChangeEvent, LocalChangeFeed};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::debug;
use uuid::Uuid;

/// One request as seen by the service, recorded in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    Select(Table),
    Count(Table),
    Insert(Table),
    Update(Table),
    Delete(Table),
    Rpc(Procedure, Uuid),
}

impl RemoteCall {
    fn is_write(&self) -> bool {
        !matches!(self, RemoteCall::Select(_) | RemoteCall::Count(_))
    }
}

#[derive(Default)]
struct MemoryState {
    tables: HashMap<Table, Vec<Value>>,
    faults: Vec<(RemoteCall, RemoteError)>,
    calls: Vec<RemoteCall>,
}

#[derive(Default)]
pub struct MemoryDataService {
    state: Mutex<MemoryState>,
    gate: Mutex<Option<Arc<Semaphore>>>,
    feed: Option<Arc<LocalChangeFeed>>,
}

/// Columns that must be unique per table, besides `id`
fn unique_keys(table: Table) -> &'static [&'static str] {
    match table {
        Table::Likes => &["user_id", "video_id"],
        Table::Follows => &["follower_id", "following_id"],
        Table::Profiles => &["username"],
        _ => &[],
    }
}

/// Child rows removed along with a deleted parent
fn cascades(table: Table) -> &'static [(Table, &'static str)] {
    match table {
        Table::Videos => &[(Table::Likes, "video_id"), (Table::Comments, "video_id")],
        Table::Profiles => &[
            (Table::Videos, "user_id"),
            (Table::Likes, "user_id"),
            (Table::Follows, "follower_id"),
            (Table::Follows, "following_id"),
            (Table::Stories, "user_id"),
            (Table::Comments, "user_id"),
            (Table::Messages, "sender_id"),
            (Table::Messages, "receiver_id"),
        ],
        _ => &[],
    }
}

fn with_defaults(table: Table, row: Value) -> Value {
    let mut map = match row {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    let now = Utc::now();
    map.entry("id")
        .or_insert_with(|| Value::String(Uuid::new_v4().to_string()));
    map.entry("created_at")
        .or_insert_with(|| Value::String(now.to_rfc3339()));

    match table {
        Table::Videos => {
            for column in ["views_count", "likes_count", "shares_count", "comments_count"] {
                map.entry(column).or_insert(Value::from(0));
            }
            map.entry("pinned").or_insert(Value::Bool(false));
        }
        Table::Profiles => {
            for column in ["followers_count", "following_count"] {
                map.entry(column).or_insert(Value::from(0));
            }
        }
        Table::Stories => {
            let created = map
                .get("created_at")
                .and_then(Value::as_str)
                .and_then(parse_timestamp)
                .unwrap_or(now);
            map.entry("expires_at").or_insert_with(|| {
                Value::String((created + ChronoDuration::hours(24)).to_rfc3339())
            });
        }
        _ => {}
    }
    Value::Object(map)
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => match (parse_timestamp(x), parse_timestamp(y)) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => x.cmp(y),
        },
        _ => render(a).cmp(&render(b)),
    }
}

/// `%`-wildcard match, case-insensitive
fn ilike(text: &str, pattern: &str) -> bool {
    let text = text.to_lowercase();
    let pattern = pattern.to_lowercase();
    let parts: Vec<&str> = pattern.split('%').collect();
    if parts.len() == 1 {
        return text == pattern;
    }

    let first = parts[0];
    let last = parts[parts.len() - 1];
    if !text.starts_with(first) {
        return false;
    }
    let mut rest = &text[first.len()..];
    for part in &parts[1..parts.len() - 1] {
        match rest.find(part) {
            Some(i) => rest = &rest[i + part.len()..],
            None => return false,
        }
    }
    rest.ends_with(last)
}

fn matches(row: &Value, filter: &Filter) -> bool {
    let field = |col: &str| row.get(col).filter(|v| !v.is_null());
    match filter {
        Filter::Eq(col, v) => field(col)
            .map(|f| compare_values(f, v) == Ordering::Equal)
            .unwrap_or(false),
        Filter::Gt(col, v) => field(col)
            .map(|f| compare_values(f, v) == Ordering::Greater)
            .unwrap_or(false),
        Filter::Gte(col, v) => field(col)
            .map(|f| compare_values(f, v) != Ordering::Less)
            .unwrap_or(false),
        Filter::ILike(col, pattern) => field(col)
            .and_then(Value::as_str)
            .map(|s| ilike(s, pattern))
            .unwrap_or(false),
        Filter::And(inner) => inner.iter().all(|f| matches(row, f)),
        Filter::Or(inner) => inner.iter().any(|f| matches(row, f)),
    }
}

fn matches_all(row: &Value, filters: &[Filter]) -> bool {
    filters.iter().all(|f| matches(row, f))
}

fn conflict(table: Table, column: &str) -> RemoteError {
    RemoteError::Conflict(format!(
        "duplicate key value violates unique constraint \"{}_{}_key\"",
        table, column
    ))
}

impl MemoryDataService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish every committed write to `feed`
    pub fn with_change_feed(mut self, feed: Arc<LocalChangeFeed>) -> Self {
        self.feed = Some(feed);
        self
    }

    /// Load rows directly, filling column defaults; no change events
    pub fn seed(&self, table: Table, rows: impl IntoIterator<Item = Value>) {
        let mut state = self.state.lock();
        let stored = state.tables.entry(table).or_default();
        stored.extend(rows.into_iter().map(|row| with_defaults(table, row)));
    }

    /// Snapshot of a table
    pub fn rows(&self, table: Table) -> Vec<Value> {
        self.state
            .lock()
            .tables
            .get(&table)
            .cloned()
            .unwrap_or_default()
    }

    /// Every request received so far
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.state.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Fail every matching request with `error` until cleared
    pub fn fail_on(&self, call: RemoteCall, error: RemoteError) {
        self.state.lock().faults.push((call, error));
    }

    pub fn clear_failures(&self) {
        self.state.lock().faults.clear();
    }

    /// Hold every write request until `resume_writes` is called
    pub fn pause_writes(&self) {
        *self.gate.lock() = Some(Arc::new(Semaphore::new(0)));
    }

    pub fn resume_writes(&self) {
        if let Some(gate) = self.gate.lock().take() {
            gate.close();
        }
    }

    async fn enter(&self, call: RemoteCall) -> RemoteResult<()> {
        self.state.lock().calls.push(call.clone());

        if call.is_write() {
            let gate = self.gate.lock().clone();
            if let Some(gate) = gate {
                // Closed on resume; the error just means "go ahead"
                let _ = gate.acquire().await;
            }
        }

        let state = self.state.lock();
        match state.faults.iter().find(|(c, _)| *c == call) {
            Some((_, error)) => {
                debug!(?call, %error, "Injected remote failure");
                Err(error.clone())
            }
            None => Ok(()),
        }
    }

    fn publish(&self, events: Vec<ChangeEvent>) {
        if let Some(feed) = &self.feed {
            for event in events {
                feed.publish(event);
            }
        }
    }

    fn embed_rows(state: &MemoryState, query: &Query, rows: Vec<Value>) -> Vec<Value> {
        rows.into_iter()
            .map(|row| {
                let mut projected = match (&query.columns, &row) {
                    (Some(columns), Value::Object(map)) => Value::Object(
                        map.iter()
                            .filter(|(k, _)| columns.iter().any(|c| c == *k))
                            .map(|(k, v)| (k.clone(), v.clone()))
                            .collect(),
                    ),
                    _ => row.clone(),
                };
                for embed in &query.embeds {
                    let parent = row
                        .get(&embed.column)
                        .and_then(|key| {
                            state.tables.get(&embed.table).and_then(|rows| {
                                rows.iter()
                                    .find(|r| r.get("id").map(render) == Some(render(key)))
                            })
                        })
                        .cloned()
                        .unwrap_or(Value::Null);
                    if let Value::Object(map) = &mut projected {
                        map.insert(embed.alias.clone(), parent);
                    }
                }
                projected
            })
            .collect()
    }
}

#[async_trait]
impl DataService for MemoryDataService {
    async fn select(&self, query: Query) -> RemoteResult<Vec<Value>> {
        self.enter(RemoteCall::Select(query.table)).await?;

        let state = self.state.lock();
        let mut rows: Vec<Value> = state
            .tables
            .get(&query.table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| matches_all(row, &query.filters))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        rows.sort_by(|a, b| {
            query.order.iter().fold(Ordering::Equal, |acc, order| {
                acc.then_with(|| {
                    let null = Value::Null;
                    let ord = compare_values(
                        a.get(&order.column).unwrap_or(&null),
                        b.get(&order.column).unwrap_or(&null),
                    );
                    if order.ascending {
                        ord
                    } else {
                        ord.reverse()
                    }
                })
            })
        });
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }

        Ok(Self::embed_rows(&state, &query, rows))
    }

    async fn count(&self, query: Query) -> RemoteResult<u64> {
        self.enter(RemoteCall::Count(query.table)).await?;

        let state = self.state.lock();
        Ok(state
            .tables
            .get(&query.table)
            .map(|rows| rows.iter().filter(|r| matches_all(r, &query.filters)).count() as u64)
            .unwrap_or(0))
    }

    async fn insert(&self, table: Table, row: Value) -> RemoteResult<Value> {
        self.enter(RemoteCall::Insert(table)).await?;

        let row = with_defaults(table, row);
        {
            let mut state = self.state.lock();
            let rows = state.tables.entry(table).or_default();

            if rows.iter().any(|r| r.get("id") == row.get("id")) {
                return Err(conflict(table, "pkey"));
            }
            let keys = unique_keys(table);
            if !keys.is_empty()
                && rows
                    .iter()
                    .any(|r| keys.iter().all(|k| r.get(*k) == row.get(*k)))
            {
                return Err(conflict(table, &keys.join("_")));
            }
            rows.push(row.clone());
        }

        self.publish(vec![ChangeEvent::insert(table.as_str(), row.clone())]);
        Ok(row)
    }

    async fn update(&self, table: Table, filters: Vec<Filter>, patch: Value) -> RemoteResult<u64> {
        self.enter(RemoteCall::Update(table)).await?;

        let mut updated = Vec::new();
        {
            let mut state = self.state.lock();
            if let (Some(rows), Value::Object(patch)) = (state.tables.get_mut(&table), &patch) {
                for row in rows.iter_mut().filter(|r| matches_all(r, &filters)) {
                    if let Value::Object(map) = row {
                        for (k, v) in patch {
                            map.insert(k.clone(), v.clone());
                        }
                    }
                    updated.push(row.clone());
                }
            }
        }

        let count = updated.len() as u64;
        self.publish(
            updated
                .into_iter()
                .map(|row| ChangeEvent::update(table.as_str(), row))
                .collect(),
        );
        Ok(count)
    }

    async fn delete(&self, table: Table, filters: Vec<Filter>) -> RemoteResult<u64> {
        self.enter(RemoteCall::Delete(table)).await?;

        let removed: Vec<Value> = {
            let mut state = self.state.lock();
            let removed = match state.tables.get_mut(&table) {
                Some(rows) => {
                    let (gone, kept): (Vec<Value>, Vec<Value>) = std::mem::take(rows)
                        .into_iter()
                        .partition(|r| matches_all(r, &filters));
                    *rows = kept;
                    gone
                }
                None => Vec::new(),
            };

            for (child, column) in cascades(table) {
                if let Some(rows) = state.tables.get_mut(child) {
                    rows.retain(|r| {
                        !removed
                            .iter()
                            .any(|parent| r.get(*column).is_some() && r.get(*column) == parent.get("id"))
                    });
                }
            }
            removed
        };

        let count = removed.len() as u64;
        self.publish(
            removed
                .into_iter()
                .map(|row| ChangeEvent::delete(table.as_str(), row))
                .collect(),
        );
        Ok(count)
    }

    async fn rpc(&self, procedure: Procedure, video_id: Uuid) -> RemoteResult<()> {
        self.enter(RemoteCall::Rpc(procedure, video_id)).await?;

        let (column, delta) = procedure.column_delta();
        let id = video_id.to_string();
        let updated = {
            let mut state = self.state.lock();
            state.tables.get_mut(&Table::Videos).and_then(|rows| {
                rows.iter_mut()
                    .find(|r| r.get("id").and_then(Value::as_str) == Some(id.as_str()))
                    .map(|row| {
                        let current = row.get(column).and_then(Value::as_i64).unwrap_or(0);
                        row[column] = Value::from((current + delta).max(0));
                        row.clone()
                    })
            })
        };

        if let Some(row) = updated {
            self.publish(vec![ChangeEvent::update(Table::Videos.as_str(), row)]);
        }
        Ok(())
    }
}
