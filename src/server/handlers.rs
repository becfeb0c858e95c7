use std::convert::Infallible;

use axum::{
    extract::State,
    http::{header, HeaderName},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    routing::get,
    Json, Router,
};
use futures::stream::{self, StreamExt};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, info};
use uuid::Uuid;

use crate::cluster::{subscribe, RelayFrame, StateView};
use crate::server::state::{wait_for_shutdown, AppState};
use crate::server::ApiError;

/// Liveness probe, independent of the upstream APIs
pub async fn healthz() -> &'static str {
    "ok"
}

/// Aggregated cluster state
pub async fn cluster_state(State(state): State<AppState>) -> Result<Json<StateView>, ApiError> {
    Ok(Json(state.state_view().await?))
}

fn to_sse(frame: RelayFrame) -> Event {
    match frame {
        RelayFrame::Event { id, data } => Event::default().id(id.to_string()).data(data),
        RelayFrame::Error { message } => Event::default()
            .event("error")
            .data(serde_json::json!({ "error": message }).to_string()),
    }
}

/// Logs when the client connection goes away and the stream is dropped
struct ConnectionGuard(Uuid);

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        info!(connection = %self.0, "Event stream closed");
    }
}

/// Manager events relayed as Server-Sent Events.
///
/// The retry hint goes out before the upstream subscription is opened, so
/// clients get headers right away even when the manager is slow.
pub async fn events(State(state): State<AppState>) -> impl IntoResponse {
    let connection = Uuid::new_v4();
    info!(connection = %connection, "Event stream opened");

    let guard = ConnectionGuard(connection);
    let manager = state.manager.clone();
    let sse = state.sse;

    let hint = stream::once(async move { Event::default().retry(sse.retry) });
    let relayed = stream::once(async move { subscribe(manager.as_ref()).await })
        .flatten()
        .map(move |frame| {
            debug!(connection = %guard.0, frame = ?frame, "Relaying frame");
            to_sse(frame)
        });
    let body = hint
        .chain(relayed)
        .take_until(wait_for_shutdown(state.shutdown.clone()))
        .map(Ok::<_, Infallible>);

    (
        [
            (header::CACHE_CONTROL, "no-cache, no-transform"),
            (HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        Sse::new(body).keep_alive(KeepAlive::new().interval(sse.heartbeat)),
    )
}

/// Create the Axum router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/state", get(cluster_state))
        .route("/api/events", get(events))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::MockManager;
    use crate::cluster::{ClusterCache, NodeAddressMap, RetentionTracker, SampleTable};
    use crate::cluster::model::{SwarmNode, SwarmTask};
    use crate::server::state::SseSettings;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    fn test_state(manager: Arc<MockManager>) -> AppState {
        AppState::new(
            manager.clone(),
            Arc::new(ClusterCache::new(manager)),
            Arc::new(RetentionTracker::new(Duration::from_secs(5))),
            Arc::new(SampleTable::new()),
            Arc::new(NodeAddressMap::new()),
        )
    }

    fn create_test_app(manager: MockManager) -> Router {
        create_router(test_state(Arc::new(manager)))
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_text(response: axum::response::Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_healthz_endpoint() {
        let app = create_test_app(MockManager::new().failing_version().with_nodes(None));

        let response = app.oneshot(get_request("/healthz")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "ok");
    }

    #[tokio::test]
    async fn test_state_survives_partial_upstream_failure() {
        let nodes: Vec<SwarmNode> = serde_json::from_value(serde_json::json!([
            {"ID": "n1"}, {"ID": "n2"}
        ]))
        .unwrap();
        let tasks: Vec<SwarmTask> = serde_json::from_value(serde_json::json!([
            {"ID": "t1", "Status": {"State": "running"}},
            {"ID": "t2", "Status": {"State": "running"}},
            {"ID": "t3", "Status": {"State": "pending"}}
        ]))
        .unwrap();
        let manager = MockManager::new()
            .with_nodes(Some(nodes))
            .with_services(None)
            .with_tasks(Some(tasks));
        let app = create_test_app(manager);

        let response = app.oneshot(get_request("/api/state")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(json["nodes"].as_array().unwrap().len(), 2);
        assert_eq!(json["services"], serde_json::json!([]));
        assert_eq!(json["tasks"].as_array().unwrap().len(), 3);
        assert_eq!(json["tasks"][0]["Label"], "service.t1");
        assert!(json["stats"].as_object().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_events_relays_numbered_frames() {
        let manager = MockManager::new().with_events(Some(vec![
            Ok(b"{\"a\":1}\n{\"b\"".to_vec()),
            Ok(b":2}\n".to_vec()),
        ]));
        let app = create_test_app(manager);

        let response = app.oneshot(get_request("/api/events")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers["content-type"], "text/event-stream");
        assert_eq!(headers["cache-control"], "no-cache, no-transform");
        assert_eq!(headers["x-accel-buffering"], "no");

        let body = body_text(response).await;
        assert!(body.starts_with("retry: 10000\n"));
        assert!(body.contains("id: 1\ndata: {\"a\":1}\n\n"));
        assert!(body.contains("id: 2\ndata: {\"b\":2}\n\n"));
        assert!(!body.contains("event: error"));
    }

    #[tokio::test]
    async fn test_events_upstream_failure_sends_error_frame() {
        let app = create_test_app(MockManager::new().with_events(None));

        let response = app.oneshot(get_request("/api/events")).await.unwrap();
        let body = body_text(response).await;

        assert!(body.contains("event: error\ndata: {\"error\":"));
        assert!(!body.contains("id: "));
    }

    #[tokio::test]
    async fn test_idle_stream_heartbeats_and_releases_upstream_on_disconnect() {
        let manager = Arc::new(MockManager::new().with_idle_events());
        let app = create_router(test_state(manager.clone()).with_sse(SseSettings {
            heartbeat: Duration::from_millis(50),
            retry: Duration::from_millis(10),
        }));

        let response = app.oneshot(get_request("/api/events")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let mut body = response.into_body().into_data_stream();

        let mut received = String::new();
        let heartbeat = tokio::time::timeout(Duration::from_secs(2), async {
            while !received.contains(":\n\n") {
                let chunk = body.next().await.unwrap().unwrap();
                received.push_str(std::str::from_utf8(&chunk).unwrap());
            }
        })
        .await;
        assert!(heartbeat.is_ok(), "no heartbeat, got {:?}", received);
        assert!(received.starts_with("retry: 10\n\n"));
        assert!(received["retry: 10\n\n".len()..].starts_with(":\n\n"));
        assert!(!manager.events_released());

        // Client goes away
        drop(body);
        for _ in 0..20 {
            if manager.events_released() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(manager.events_released());
    }
}
