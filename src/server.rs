//! HTTP API over a [`Qmd`] handle.
//!
//! Every route is served at the root and again under `/api/qmd`. Store
//! calls run on the blocking pool; a client that disconnects mid-request
//! does not cancel a write.

use std::time::Duration;

use axum::body::Bytes;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, error, info, warn};

use crate::commands::{BootstrapReport, Qmd, ReindexReport, parse_time_range};
use crate::entry::{Context, Entry, ScoredEntry, Tag, metadata_from_json};
use crate::error::{QmdError, Result};
use crate::graph::DEFAULT_RELATED_LIMIT;
use crate::search::{DEFAULT_SEARCH_LIMIT, SearchOptions};
use crate::storage::{DEFAULT_TIMELINE_LIMIT, DedupeReport};

/// Prefix under which the API is also mounted.
pub const API_PREFIX: &str = "/api/qmd";

impl IntoResponse for QmdError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = %self, "Request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Build the application router.
pub fn router(qmd: Qmd) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    let api = Router::new()
        .route("/search", get(search))
        .route("/timeline", get(timeline))
        .route("/entries", post(add_entry))
        .route("/entry/{id}", get(get_entry).delete(delete_entry))
        .route("/tags", get(list_tags))
        .route("/tag/{name}", get(entries_by_tag))
        .route("/entry-tags", post(tag_entry))
        .route("/relate", post(relate))
        .route("/related/{id}", get(related))
        .route("/context/{id}", get(context))
        .route("/bootstrap", post(bootstrap))
        .route("/dedupe", post(dedupe))
        .route("/reindex", post(reindex))
        .route("/health", get(health))
        .method_not_allowed_fallback(not_found)
        .with_state(qmd);

    Router::new()
        .merge(api.clone())
        .nest(API_PREFIX, api)
        .fallback(not_found)
        .layer(cors)
}

/// Serve the API until interrupted.
///
/// # Errors
///
/// Returns an error if the address cannot be bound or the server fails.
pub async fn serve(qmd: Qmd, host: &str, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind((host, port)).await?;
    info!("Starting web server on http://{}", listener.local_addr()?);

    if let Some(interval) = qmd.reembed_interval() {
        tokio::spawn(reembed_periodically(qmd.clone(), interval));
    }

    axum::serve(listener, router(qmd))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Web server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

async fn reembed_periodically(qmd: Qmd, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    // The first tick fires immediately.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let qmd = qmd.clone();
        match blocking(move || qmd.refresh_embeddings()).await {
            Ok(report) => debug!(embedded = report.embedded, "Refreshed embeddings"),
            Err(e) => warn!(error = %e, "Background re-embedding failed"),
        }
    }
}

/// Run a store call on the blocking pool.
async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| QmdError::Internal(format!("worker task failed: {e}")))?
}

/// Parse a JSON request body. An empty body yields the defaults.
fn parse_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| QmdError::invalid(format!("invalid JSON body: {e}")))
}

fn parse_query<T>(query: std::result::Result<Query<T>, QueryRejection>) -> Result<T> {
    query
        .map(|Query(params)| params)
        .map_err(|e| QmdError::invalid(e.body_text()))
}

async fn not_found() -> Response {
    (StatusCode::NOT_FOUND, Json(json!({ "error": "Not found" }))).into_response()
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

#[derive(Debug, Default, Deserialize)]
struct SearchParams {
    q: Option<String>,
    limit: Option<usize>,
    /// Only the literal `true` enables semantic ranking.
    semantic: Option<String>,
}

async fn search(
    State(qmd): State<Qmd>,
    query: std::result::Result<Query<SearchParams>, QueryRejection>,
) -> Result<Json<Vec<ScoredEntry>>> {
    let params = parse_query(query)?;
    let options = SearchOptions {
        limit: params.limit.unwrap_or(DEFAULT_SEARCH_LIMIT),
        semantic: params.semantic.as_deref() == Some("true"),
    };
    let q = params.q.unwrap_or_default();
    Ok(Json(blocking(move || qmd.search(&q, options)).await?))
}

#[derive(Debug, Default, Deserialize)]
struct TimelineParams {
    from: Option<String>,
    to: Option<String>,
    limit: Option<usize>,
}

async fn timeline(
    State(qmd): State<Qmd>,
    query: std::result::Result<Query<TimelineParams>, QueryRejection>,
) -> Result<Json<Vec<Entry>>> {
    let params = parse_query(query)?;
    let range = parse_time_range(params.from.as_deref(), params.to.as_deref())?;
    let limit = params.limit.unwrap_or(DEFAULT_TIMELINE_LIMIT);
    Ok(Json(blocking(move || qmd.timeline(range, limit)).await?))
}

#[derive(Debug, Default, Deserialize)]
struct AddEntryBody {
    id: Option<String>,
    content: Option<String>,
    metadata: Option<Value>,
}

async fn add_entry(State(qmd): State<Qmd>, body: Bytes) -> Result<Json<Entry>> {
    let body: AddEntryBody = parse_body(&body)?;
    let id = body.id.unwrap_or_default();
    let content = body.content.unwrap_or_default();
    let metadata = metadata_from_json(body.metadata.unwrap_or(Value::Null))?;
    Ok(Json(blocking(move || qmd.add(&id, &content, &metadata)).await?))
}

async fn get_entry(State(qmd): State<Qmd>, Path(id): Path<String>) -> Result<Json<Entry>> {
    Ok(Json(blocking(move || qmd.get(&id)).await?))
}

async fn delete_entry(State(qmd): State<Qmd>, Path(id): Path<String>) -> Result<Json<Value>> {
    let deleted = blocking(move || qmd.delete(&id)).await?;
    Ok(Json(json!({ "deleted": deleted })))
}

async fn list_tags(State(qmd): State<Qmd>) -> Result<Json<Vec<Tag>>> {
    Ok(Json(blocking(move || qmd.graph().list_tags()).await?))
}

#[derive(Debug, Default, Deserialize)]
struct LimitParams {
    limit: Option<usize>,
}

async fn entries_by_tag(
    State(qmd): State<Qmd>,
    Path(name): Path<String>,
    query: std::result::Result<Query<LimitParams>, QueryRejection>,
) -> Result<Json<Vec<Entry>>> {
    let limit = parse_query(query)?.limit.unwrap_or(DEFAULT_TIMELINE_LIMIT);
    Ok(Json(
        blocking(move || qmd.graph().entries_by_tag(&name, limit)).await?,
    ))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TagBody {
    entry_id: Option<String>,
    tag_name: Option<String>,
    color: Option<String>,
}

async fn tag_entry(State(qmd): State<Qmd>, body: Bytes) -> Result<Json<Value>> {
    let body: TagBody = parse_body(&body)?;
    let entry_id = body.entry_id.unwrap_or_default();
    let tag_name = body.tag_name.unwrap_or_default();
    blocking(move || qmd.tag(&entry_id, &tag_name, body.color.as_deref())).await?;
    Ok(Json(json!({ "success": true })))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RelateBody {
    source_id: Option<String>,
    target_id: Option<String>,
    relation_type: Option<String>,
}

async fn relate(State(qmd): State<Qmd>, body: Bytes) -> Result<Json<Value>> {
    let body: RelateBody = parse_body(&body)?;
    let source_id = body.source_id.unwrap_or_default();
    let target_id = body.target_id.unwrap_or_default();
    let relation_type = body.relation_type.unwrap_or_default();
    blocking(move || qmd.relate(&source_id, &target_id, &relation_type)).await?;
    Ok(Json(json!({ "success": true })))
}

#[derive(Debug, Default, Deserialize)]
struct RelatedParams {
    #[serde(rename = "type")]
    relation_type: Option<String>,
    limit: Option<usize>,
}

async fn related(
    State(qmd): State<Qmd>,
    Path(id): Path<String>,
    query: std::result::Result<Query<RelatedParams>, QueryRejection>,
) -> Result<Json<Vec<Entry>>> {
    let params = parse_query(query)?;
    let limit = params.limit.unwrap_or(DEFAULT_RELATED_LIMIT);
    Ok(Json(
        blocking(move || {
            qmd.graph()
                .related_to(&id, params.relation_type.as_deref(), limit)
        })
        .await?,
    ))
}

async fn context(State(qmd): State<Qmd>, Path(id): Path<String>) -> Result<Json<Context>> {
    Ok(Json(blocking(move || qmd.context(&id)).await?))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BootstrapBody {
    memory_dir: Option<String>,
}

async fn bootstrap(State(qmd): State<Qmd>, body: Bytes) -> Result<Json<BootstrapReport>> {
    let body: BootstrapBody = parse_body(&body)?;
    Ok(Json(
        blocking(move || qmd.bootstrap(body.memory_dir.as_deref())).await?,
    ))
}

async fn dedupe(State(qmd): State<Qmd>) -> Result<Json<DedupeReport>> {
    Ok(Json(blocking(move || qmd.dedupe()).await?))
}

async fn reindex(State(qmd): State<Qmd>) -> Result<Json<ReindexReport>> {
    Ok(Json(blocking(move || qmd.reindex()).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_body_uses_defaults() {
        let body: BootstrapBody = parse_body(&Bytes::from_static(b"  \n")).unwrap();
        assert!(body.memory_dir.is_none());
    }

    #[test]
    fn malformed_body_is_invalid_argument() {
        let result: Result<TagBody> = parse_body(&Bytes::from_static(b"{not json"));
        assert!(matches!(result, Err(QmdError::InvalidArgument(_))));
    }

    #[test]
    fn body_fields_are_camel_case() {
        let body: RelateBody =
            parse_body(&Bytes::from_static(br#"{"sourceId":"a","targetId":"b"}"#)).unwrap();
        assert_eq!(body.source_id.as_deref(), Some("a"));
        assert_eq!(body.target_id.as_deref(), Some("b"));
        assert!(body.relation_type.is_none());
    }

    #[test]
    fn errors_map_to_status_codes() {
        assert_eq!(
            QmdError::invalid("x").into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            QmdError::not_found("x").into_response().status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            QmdError::Internal("x".into()).into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
