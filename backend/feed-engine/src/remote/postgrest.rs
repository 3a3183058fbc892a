//! PostgREST client for the remote data service
//!
//! Tables live under `/rest/v1/<table>` and procedures under
//! `/rest/v1/rpc/<name>`. Every request carries the project `apikey` and a
//! bearer token (the user's access token when signed in, else the anon key).

use super::{DataService, Filter, Procedure, Query, Table};
use crate::config::RemoteConfig;
use crate::error::{RemoteError, RemoteResult};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct PostgrestService {
    client: Client,
    base_url: String,
    api_key: String,
    access_token: Option<String>,
}

/// Error body returned by PostgREST
#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: Option<String>,
    message: Option<String>,
}

impl PostgrestService {
    pub fn new(config: &RemoteConfig) -> RemoteResult<Self> {
        let client = Client::builder().timeout(config.timeout()).build()?;
        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key: config.anon_key.clone(),
            access_token: config.access_token.clone(),
        })
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    fn table_url(&self, table: Table) -> String {
        format!("{}/rest/v1/{}", self.base_url, table.as_str())
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        let bearer = self.access_token.as_deref().unwrap_or(&self.api_key);
        builder
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", bearer))
    }

    async fn check(response: Response) -> RemoteResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify_error(status, &body))
    }
}

/// Map a failed response onto the remote error taxonomy
fn classify_error(status: StatusCode, body: &str) -> RemoteError {
    let parsed: Option<ErrorBody> = serde_json::from_str(body).ok();
    let code = parsed.as_ref().and_then(|b| b.code.clone());
    let message = parsed
        .and_then(|b| b.message)
        .unwrap_or_else(|| body.to_string());

    match code.as_deref() {
        Some(RemoteError::UNIQUE_VIOLATION) => return RemoteError::Conflict(message),
        Some(RemoteError::NO_ROWS) => return RemoteError::NotFound(message),
        _ => {}
    }
    match status {
        StatusCode::CONFLICT => RemoteError::Conflict(message),
        StatusCode::NOT_FOUND => RemoteError::NotFound(message),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RemoteError::Unauthenticated(message),
        _ => RemoteError::Status {
            status: status.as_u16(),
            code,
            message,
        },
    }
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Nested form used inside `or=(...)` / `and=(...)`: `column.op.value`
fn render_nested(filter: &Filter) -> String {
    match filter {
        Filter::Eq(col, v) => format!("{}.eq.{}", col, render_value(v)),
        Filter::Gt(col, v) => format!("{}.gt.{}", col, render_value(v)),
        Filter::Gte(col, v) => format!("{}.gte.{}", col, render_value(v)),
        Filter::ILike(col, p) => format!("{}.ilike.{}", col, p),
        Filter::And(inner) => format!("and({})", render_list(inner)),
        Filter::Or(inner) => format!("or({})", render_list(inner)),
    }
}

fn render_list(filters: &[Filter]) -> String {
    filters
        .iter()
        .map(render_nested)
        .collect::<Vec<_>>()
        .join(",")
}

/// Top-level query parameter for one filter
fn render_filter(filter: &Filter) -> (String, String) {
    match filter {
        Filter::Eq(col, v) => (col.clone(), format!("eq.{}", render_value(v))),
        Filter::Gt(col, v) => (col.clone(), format!("gt.{}", render_value(v))),
        Filter::Gte(col, v) => (col.clone(), format!("gte.{}", render_value(v))),
        Filter::ILike(col, p) => (col.clone(), format!("ilike.{}", p)),
        Filter::And(inner) => ("and".to_string(), format!("({})", render_list(inner))),
        Filter::Or(inner) => ("or".to_string(), format!("({})", render_list(inner))),
    }
}

/// `select` parameter: columns plus embedded parents (`alias:column(*)`)
fn render_select(query: &Query) -> String {
    let mut parts = match &query.columns {
        Some(columns) => columns.clone(),
        None => vec!["*".to_string()],
    };
    for embed in &query.embeds {
        parts.push(format!("{}:{}(*)", embed.alias, embed.column));
    }
    parts.join(",")
}

/// Full parameter list for a read
fn query_params(query: &Query) -> Vec<(String, String)> {
    let mut params = vec![("select".to_string(), render_select(query))];
    params.extend(query.filters.iter().map(render_filter));
    if !query.order.is_empty() {
        let order = query
            .order
            .iter()
            .map(|o| {
                format!(
                    "{}.{}",
                    o.column,
                    if o.ascending { "asc" } else { "desc" }
                )
            })
            .collect::<Vec<_>>()
            .join(",");
        params.push(("order".to_string(), order));
    }
    if let Some(limit) = query.limit {
        params.push(("limit".to_string(), limit.to_string()));
    }
    params
}

/// Total from a `Content-Range: 0-0/42` header
fn parse_content_range_total(header: &str) -> Option<u64> {
    header.rsplit('/').next()?.trim().parse().ok()
}

async fn affected_rows(response: Response) -> RemoteResult<u64> {
    let rows: Vec<Value> = response.json().await?;
    Ok(rows.len() as u64)
}

#[async_trait]
impl DataService for PostgrestService {
    async fn select(&self, query: Query) -> RemoteResult<Vec<Value>> {
        let params = query_params(&query);
        debug!(table = %query.table, ?params, "select");

        let request = self.client.get(self.table_url(query.table)).query(&params);
        let response = Self::check(self.authorized(request).send().await?).await?;
        Ok(response.json().await?)
    }

    async fn count(&self, query: Query) -> RemoteResult<u64> {
        let mut params: Vec<(String, String)> = vec![("select".to_string(), "id".to_string())];
        params.extend(query.filters.iter().map(render_filter));

        let request = self
            .client
            .get(self.table_url(query.table))
            .query(&params)
            .header("Prefer", "count=exact")
            .header("Range-Unit", "items")
            .header("Range", "0-0");
        let response = Self::check(self.authorized(request).send().await?).await?;

        let header = response
            .headers()
            .get("content-range")
            .and_then(|h| h.to_str().ok())
            .unwrap_or_default()
            .to_string();
        parse_content_range_total(&header).ok_or_else(|| {
            warn!(table = %query.table, header = %header, "Missing count in Content-Range");
            RemoteError::Decode(format!("invalid Content-Range: {}", header))
        })
    }

    async fn insert(&self, table: Table, row: Value) -> RemoteResult<Value> {
        let request = self
            .client
            .post(self.table_url(table))
            .header("Prefer", "return=representation")
            .json(&row);
        let response = Self::check(self.authorized(request).send().await?).await?;

        let mut rows: Vec<Value> = response.json().await?;
        if rows.is_empty() {
            return Err(RemoteError::Decode(format!(
                "insert into {} returned no rows",
                table
            )));
        }
        Ok(rows.swap_remove(0))
    }

    async fn update(&self, table: Table, filters: Vec<Filter>, patch: Value) -> RemoteResult<u64> {
        let params: Vec<(String, String)> = filters.iter().map(render_filter).collect();
        let request = self
            .client
            .patch(self.table_url(table))
            .query(&params)
            .header("Prefer", "return=representation")
            .json(&patch);
        let response = Self::check(self.authorized(request).send().await?).await?;
        affected_rows(response).await
    }

    async fn delete(&self, table: Table, filters: Vec<Filter>) -> RemoteResult<u64> {
        let params: Vec<(String, String)> = filters.iter().map(render_filter).collect();
        let request = self
            .client
            .delete(self.table_url(table))
            .query(&params)
            .header("Prefer", "return=representation");
        let response = Self::check(self.authorized(request).send().await?).await?;
        affected_rows(response).await
    }

    async fn rpc(&self, procedure: Procedure, video_id: Uuid) -> RemoteResult<()> {
        let url = format!("{}/rest/v1/rpc/{}", self.base_url, procedure.as_str());
        let request = self
            .client
            .post(url)
            .json(&json!({ "video_id_input": video_id }));
        Self::check(self.authorized(request).send().await?).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_unique_violation() {
        let body = r#"{"code":"23505","message":"duplicate key value violates unique constraint"}"#;
        let err = classify_error(StatusCode::CONFLICT, body);
        assert!(err.is_conflict());
    }

    #[test]
    fn test_classify_no_rows_and_auth() {
        let body = r#"{"code":"PGRST116","message":"JSON object requested, multiple (or no) rows returned"}"#;
        assert!(classify_error(StatusCode::NOT_ACCEPTABLE, body).is_not_found());
        assert!(matches!(
            classify_error(StatusCode::UNAUTHORIZED, "jwt expired"),
            RemoteError::Unauthenticated(_)
        ));
        assert!(matches!(
            classify_error(StatusCode::INTERNAL_SERVER_ERROR, "{}"),
            RemoteError::Status { status: 500, .. }
        ));
    }

    #[test]
    fn test_query_params_rendering() {
        let me = Uuid::nil();
        let query = Query::from(Table::Videos)
            .embed("profiles", "user_id", Table::Profiles)
            .eq_id("user_id", me)
            .gte("views_count", 2000)
            .order_desc("pinned")
            .order_desc("created_at")
            .limit(20);

        let params = query_params(&query);
        assert_eq!(params[0], ("select".into(), "*,profiles:user_id(*)".into()));
        assert_eq!(params[1], ("user_id".into(), format!("eq.{}", me)));
        assert_eq!(params[2], ("views_count".into(), "gte.2000".into()));
        assert_eq!(params[3], ("order".into(), "pinned.desc,created_at.desc".into()));
        assert_eq!(params[4], ("limit".into(), "20".into()));
    }

    #[test]
    fn test_or_of_and_rendering() {
        let filter = Filter::Or(vec![
            Filter::And(vec![Filter::eq("sender_id", "a"), Filter::eq("receiver_id", "b")]),
            Filter::And(vec![Filter::eq("sender_id", "b"), Filter::eq("receiver_id", "a")]),
        ]);
        assert_eq!(
            render_filter(&filter),
            (
                "or".to_string(),
                "(and(sender_id.eq.a,receiver_id.eq.b),and(sender_id.eq.b,receiver_id.eq.a))"
                    .to_string()
            )
        );
    }

    #[test]
    fn test_parse_content_range() {
        assert_eq!(parse_content_range_total("0-0/42"), Some(42));
        assert_eq!(parse_content_range_total("*/0"), Some(0));
        assert_eq!(parse_content_range_total("0-0/*"), None);
    }
}
