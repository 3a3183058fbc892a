//! Remote data contract
//!
//! The engine talks to a PostgREST-style data service: table reads with
//! filters, row writes, and a handful of counter procedures. `Query` and
//! `Filter` are a small typed model of that surface so the in-memory service
//! and the HTTP client interpret requests identically.

mod memory;
mod postgrest;

pub use memory::{MemoryDataService, RemoteCall};
pub use postgrest::PostgrestService;

use crate::error::RemoteResult;
use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Videos,
    Profiles,
    Stories,
    Likes,
    Follows,
    Messages,
    Comments,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Videos => "videos",
            Table::Profiles => "profiles",
            Table::Stories => "stories",
            Table::Likes => "likes",
            Table::Follows => "follows",
            Table::Messages => "messages",
            Table::Comments => "comments",
        }
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Server-side counter procedures, all keyed by `video_id_input`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Procedure {
    IncrementViewCount,
    IncrementLikeCount,
    DecrementLikeCount,
    IncrementShareCount,
}

impl Procedure {
    pub fn as_str(&self) -> &'static str {
        match self {
            Procedure::IncrementViewCount => "increment_view_count",
            Procedure::IncrementLikeCount => "increment_like_count",
            Procedure::DecrementLikeCount => "decrement_like_count",
            Procedure::IncrementShareCount => "increment_share_count",
        }
    }

    /// Counter column touched by the procedure and the signed delta applied
    pub fn column_delta(&self) -> (&'static str, i64) {
        match self {
            Procedure::IncrementViewCount => ("views_count", 1),
            Procedure::IncrementLikeCount => ("likes_count", 1),
            Procedure::DecrementLikeCount => ("likes_count", -1),
            Procedure::IncrementShareCount => ("shares_count", 1),
        }
    }
}

impl std::fmt::Display for Procedure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Row predicate
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    Gt(String, Value),
    Gte(String, Value),
    /// Case-insensitive pattern with `%` wildcards
    ILike(String, String),
    And(Vec<Filter>),
    Or(Vec<Filter>),
}

impl Filter {
    pub fn eq(column: &str, value: impl Into<Value>) -> Self {
        Filter::Eq(column.to_string(), value.into())
    }

    pub fn eq_id(column: &str, id: Uuid) -> Self {
        Filter::Eq(column.to_string(), Value::String(id.to_string()))
    }
}

/// Embedded parent row: `alias` receives the row of `table` whose id equals `column`
#[derive(Debug, Clone, PartialEq)]
pub struct Embed {
    pub alias: String,
    pub column: String,
    pub table: Table,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

/// Read request against one table
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub table: Table,
    pub columns: Option<Vec<String>>,
    pub embeds: Vec<Embed>,
    pub filters: Vec<Filter>,
    pub order: Vec<Order>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn from(table: Table) -> Self {
        Self {
            table,
            columns: None,
            embeds: Vec::new(),
            filters: Vec::new(),
            order: Vec::new(),
            limit: None,
        }
    }

    /// Restrict the returned columns (all columns by default)
    pub fn columns(mut self, columns: &[&str]) -> Self {
        self.columns = Some(columns.iter().map(|c| c.to_string()).collect());
        self
    }

    pub fn embed(mut self, alias: &str, column: &str, table: Table) -> Self {
        self.embeds.push(Embed {
            alias: alias.to_string(),
            column: column.to_string(),
            table,
        });
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn eq(self, column: &str, value: impl Into<Value>) -> Self {
        self.filter(Filter::eq(column, value))
    }

    pub fn eq_id(self, column: &str, id: Uuid) -> Self {
        self.filter(Filter::eq_id(column, id))
    }

    pub fn gt(self, column: &str, value: impl Into<Value>) -> Self {
        self.filter(Filter::Gt(column.to_string(), value.into()))
    }

    pub fn gte(self, column: &str, value: impl Into<Value>) -> Self {
        self.filter(Filter::Gte(column.to_string(), value.into()))
    }

    pub fn ilike(self, column: &str, pattern: impl Into<String>) -> Self {
        self.filter(Filter::ILike(column.to_string(), pattern.into()))
    }

    pub fn order_desc(mut self, column: &str) -> Self {
        self.order.push(Order {
            column: column.to_string(),
            ascending: false,
        });
        self
    }

    pub fn order_asc(mut self, column: &str) -> Self {
        self.order.push(Order {
            column: column.to_string(),
            ascending: true,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Request/response contract of the remote data service
#[async_trait]
pub trait DataService: Send + Sync {
    async fn select(&self, query: Query) -> RemoteResult<Vec<Value>>;

    /// Exact number of rows matching the query's filters
    async fn count(&self, query: Query) -> RemoteResult<u64>;

    /// Insert one row and return it as stored
    async fn insert(&self, table: Table, row: Value) -> RemoteResult<Value>;

    /// Patch matching rows; returns the number of rows touched
    async fn update(&self, table: Table, filters: Vec<Filter>, patch: Value) -> RemoteResult<u64>;

    /// Delete matching rows; returns the number of rows removed
    async fn delete(&self, table: Table, filters: Vec<Filter>) -> RemoteResult<u64>;

    async fn rpc(&self, procedure: Procedure, video_id: Uuid) -> RemoteResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_builder() {
        let owner = Uuid::new_v4();
        let query = Query::from(Table::Videos)
            .embed("profiles", "user_id", Table::Profiles)
            .eq_id("user_id", owner)
            .order_desc("pinned")
            .order_desc("created_at")
            .limit(20);

        assert_eq!(query.table, Table::Videos);
        assert_eq!(query.embeds.len(), 1);
        assert_eq!(query.filters, vec![Filter::eq_id("user_id", owner)]);
        assert_eq!(query.order.len(), 2);
        assert!(!query.order[0].ascending);
        assert_eq!(query.limit, Some(20));
    }

    #[test]
    fn test_procedure_names() {
        assert_eq!(Procedure::IncrementViewCount.as_str(), "increment_view_count");
        assert_eq!(Procedure::DecrementLikeCount.column_delta(), ("likes_count", -1));
    }
}
