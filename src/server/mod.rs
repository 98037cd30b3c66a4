//! HTTP status endpoint.
//!
//! A thin reader over the published pool snapshot:
//!
//! - `GET /pools` - the current pool list as a JSON array
//! - `GET /health` - returns 200 if the process is running
//!
//! The pools handler serializes under the snapshot mutex, so a response is
//! always one consistent iteration's view. While a sync iteration runs, the
//! handler blocks; this endpoint is not latency-sensitive.

use axum::Router;
use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;

use crate::controller::PoolsHandle;

/// Shared state for the status endpoint: a read handle on the snapshot.
#[derive(Clone)]
pub struct AppState {
    pools: PoolsHandle,
}

impl AppState {
    pub fn new(pools: PoolsHandle) -> Self {
        AppState { pools }
    }
}

/// Builds the axum Router with all endpoints.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/pools", get(pools_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

async fn pools_handler(State(state): State<AppState>) -> impl IntoResponse {
    let body = state.pools.render_json().await;
    ([(header::CONTENT_TYPE, "application/json")], body)
}

async fn health_handler() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use crate::controller::{Action, Pool};
    use crate::test_utils::pr;
    use crate::types::CommitStatusState;

    async fn get_body(router: Router, uri: &str) -> (StatusCode, Vec<u8>) {
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, body.to_vec())
    }

    #[tokio::test]
    async fn health_returns_200() {
        let app = build_router(AppState::new(PoolsHandle::new()));
        let (status, body) = get_body(app, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(&body[..], b"OK");
    }

    #[tokio::test]
    async fn pools_starts_empty() {
        let app = build_router(AppState::new(PoolsHandle::new()));
        let (status, body) = get_body(app, "/pools").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(&body[..], b"[]");
    }

    #[tokio::test]
    async fn pools_returns_published_snapshot() {
        let pools = PoolsHandle::new();
        {
            let mut guard = pools.lock().await;
            guard.push(Pool {
                org: "org".to_string(),
                repo: "repo".to_string(),
                branch: "main".to_string(),
                success_prs: vec![pr(5, 'b', Some(CommitStatusState::Success))],
                pending_prs: Vec::new(),
                missing_prs: Vec::new(),
                action: Action::Merge,
                target: vec![pr(5, 'b', Some(CommitStatusState::Success))],
            });
        }

        let app = build_router(AppState::new(pools));
        let (status, body) = get_body(app, "/pools").await;
        assert_eq!(status, StatusCode::OK);

        let parsed: Vec<Pool> = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].action, Action::Merge);

        // Spot-check the wire format the endpoint promises.
        let raw: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(raw[0]["Org"], "org");
        assert_eq!(raw[0]["Action"], "MERGE");
        let target = &raw[0]["Target"][0];
        assert_eq!(target["number"], 5);
        assert_eq!(target["author"], "octocat");
    }
}
