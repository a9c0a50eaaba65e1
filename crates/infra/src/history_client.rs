use std::time::Duration;

use geotrail_domain::locations::{LocationPing, TimeWindow};
use geotrail_domain::ports::BoxFuture;
use geotrail_domain::ports::history::{HistoryClient, RemoteCallError};
use geotrail_domain::travel::TravelDistance;
use geotrail_domain::util::{format_ms_rfc3339, parse_rfc3339_ms};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tokio::time::sleep;

use crate::config::AppConfig;
use crate::wire::{
    LOCATIONS_PATH, RecordPingRequest, RecordPingResponse, STATUS_SUCCESS, TRAVEL_DISTANCE_PATH,
    TravelDistanceQuery, TravelDistanceResponse,
};

/// HTTP client for the history service. Transport failures, 429 and 5xx are
/// retried with capped exponential backoff; other statuses fail at once.
#[derive(Debug, Clone)]
pub struct HttpHistoryClient {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
    retry_max_attempts: u32,
    retry_backoff_base: Duration,
    retry_backoff_max: Duration,
}

impl HttpHistoryClient {
    pub fn from_config(config: &AppConfig) -> Self {
        let timeout = Duration::from_millis(config.history_timeout_ms.max(1));
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            base_url: config.history_base_url.trim_end_matches('/').to_string(),
            timeout,
            retry_max_attempts: config.history_retry_max_attempts.max(1),
            retry_backoff_base: Duration::from_millis(config.history_retry_backoff_base_ms),
            retry_backoff_max: Duration::from_millis(config.history_retry_backoff_max_ms),
        }
    }

    async fn send_with_retry<T: DeserializeOwned>(
        &self,
        build: impl Fn() -> reqwest::RequestBuilder,
    ) -> Result<T, RemoteCallError> {
        let attempts = self.retry_max_attempts;
        let mut last_error = RemoteCallError::Unavailable("no attempt made".to_string());

        for attempt in 0..attempts {
            if attempt > 0 {
                sleep(backoff_for_attempt(
                    self.retry_backoff_base,
                    self.retry_backoff_max,
                    attempt - 1,
                ))
                .await;
            }

            let response = match build().header("accept", "application/json").send().await {
                Ok(response) => response,
                Err(err) => {
                    last_error = self.map_transport_error(err);
                    tracing::debug!(attempt, error = %last_error, "history call failed");
                    continue;
                }
            };

            let status = response.status();
            if status.is_success() {
                return response
                    .json::<T>()
                    .await
                    .map_err(|err| RemoteCallError::InvalidResponse(err.to_string()));
            }

            let message = error_message(response.text().await.unwrap_or_default());
            let error = RemoteCallError::Rejected {
                status: status.as_u16(),
                message,
            };
            if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                tracing::debug!(attempt, error = %error, "history call failed");
                last_error = error;
                continue;
            }
            return Err(error);
        }

        Err(last_error)
    }

    fn map_transport_error(&self, err: reqwest::Error) -> RemoteCallError {
        if err.is_timeout() {
            RemoteCallError::Timeout(self.timeout.as_millis() as u64)
        } else {
            RemoteCallError::Unavailable(err.to_string())
        }
    }
}

impl HistoryClient for HttpHistoryClient {
    fn forward_ping(&self, ping: &LocationPing) -> BoxFuture<'_, Result<(), RemoteCallError>> {
        let body = RecordPingRequest::try_from(ping).map_err(invalid_request);
        let url = endpoint_url(&self.base_url, LOCATIONS_PATH);
        Box::pin(async move {
            let body = body?;
            let response: RecordPingResponse = self
                .send_with_retry(|| self.http.post(&url).json(&body))
                .await?;
            if response.status != STATUS_SUCCESS {
                return Err(RemoteCallError::InvalidResponse(format!(
                    "unexpected status '{}': {}",
                    response.status,
                    response.error.unwrap_or_default()
                )));
            }
            Ok(())
        })
    }

    fn travel_distance(
        &self,
        username: &str,
        window: TimeWindow,
    ) -> BoxFuture<'_, Result<TravelDistance, RemoteCallError>> {
        let username = username.to_string();
        let url = endpoint_url(&self.base_url, TRAVEL_DISTANCE_PATH);
        Box::pin(async move {
            let query = TravelDistanceQuery {
                username,
                start: Some(format_ms_rfc3339(window.start_ms).map_err(invalid_request)?),
                end: Some(format_ms_rfc3339(window.end_ms).map_err(invalid_request)?),
            };
            let response: TravelDistanceResponse = self
                .send_with_retry(|| self.http.get(&url).query(&query))
                .await?;
            let invalid = |err: geotrail_domain::error::DomainError| {
                RemoteCallError::InvalidResponse(err.to_string())
            };
            Ok(TravelDistance {
                window: TimeWindow {
                    start_ms: parse_rfc3339_ms("start", &response.start).map_err(invalid)?,
                    end_ms: parse_rfc3339_ms("end", &response.end).map_err(invalid)?,
                },
                username: response.username,
                total_km: response.distance,
                point_count: response.point_count,
            })
        })
    }
}

// Error bodies are either `{"status":"Failed","error":..}` or the
// `{"error":{"code","message"}}` envelope; fall back to the raw text.
fn error_message(body: String) -> String {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(&body) else {
        return body;
    };
    match value.get("error") {
        Some(serde_json::Value::String(message)) => message.clone(),
        Some(envelope) => envelope
            .get("message")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string)
            .unwrap_or(body),
        None => body,
    }
}

fn invalid_request(err: geotrail_domain::error::DomainError) -> RemoteCallError {
    RemoteCallError::InvalidRequest(err.to_string())
}

fn endpoint_url(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

fn backoff_for_attempt(base: Duration, max: Duration, attempt: u32) -> Duration {
    if base.is_zero() {
        return Duration::from_millis(1);
    }
    let multiplier = 1u64 << attempt.min(8);
    let delay_ms = (base.as_millis() as u64).saturating_mul(multiplier).max(1);
    let max_ms = max.as_millis() as u64;
    if max_ms == 0 {
        Duration::from_millis(delay_ms)
    } else {
        Duration::from_millis(delay_ms.min(max_ms))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::extract::{Query, State};
    use axum::http::StatusCode as AxumStatus;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::{Value, json};
    use tokio::net::TcpListener;

    use super::*;
    use crate::config::test_config;

    async fn spawn_stub(app: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind history stub");
        let addr = listener.local_addr().expect("history stub addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve history stub");
        });
        format!("http://{addr}")
    }

    fn client(base_url: String) -> HttpHistoryClient {
        let mut config = test_config();
        config.history_base_url = base_url;
        HttpHistoryClient::from_config(&config)
    }

    fn ping() -> LocationPing {
        LocationPing::new("alice123", 37.7749, -122.4194, 1_714_564_800_250).unwrap()
    }

    #[test]
    fn backoff_is_capped() {
        let base = Duration::from_millis(100);
        let max = Duration::from_millis(300);
        assert_eq!(backoff_for_attempt(base, max, 0), Duration::from_millis(100));
        assert_eq!(backoff_for_attempt(base, max, 1), Duration::from_millis(200));
        assert_eq!(backoff_for_attempt(base, max, 5), Duration::from_millis(300));
    }

    #[test]
    fn error_message_reads_both_error_shapes() {
        assert_eq!(
            error_message(r#"{"status":"Failed","error":"bad username"}"#.into()),
            "bad username"
        );
        assert_eq!(
            error_message(r#"{"error":{"code":"validation_error","message":"bad"}}"#.into()),
            "bad"
        );
        assert_eq!(error_message("plain".into()), "plain");
    }

    #[tokio::test]
    async fn forward_ping_sends_millisecond_timestamp() {
        let seen: Arc<std::sync::Mutex<Option<Value>>> = Arc::default();
        let app = Router::new()
            .route(
                LOCATIONS_PATH,
                post(
                    |State(seen): State<Arc<std::sync::Mutex<Option<Value>>>>,
                     Json(body): Json<Value>| async move {
                        *seen.lock().unwrap() = Some(body);
                        Json(json!({ "status": "Success" }))
                    },
                ),
            )
            .with_state(seen.clone());
        let client = client(spawn_stub(app).await);

        client.forward_ping(&ping()).await.unwrap();

        let body = seen.lock().unwrap().clone().unwrap();
        assert_eq!(body["timestamp"], "2024-05-01T12:00:00.250Z");
        assert_eq!(body["username"], "alice123");
    }

    #[tokio::test]
    async fn server_errors_are_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route(
                LOCATIONS_PATH,
                post(|State(calls): State<Arc<AtomicUsize>>| async move {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        (
                            AxumStatus::INTERNAL_SERVER_ERROR,
                            Json(json!({ "status": "Failed", "error": "storage down" })),
                        )
                    } else {
                        (AxumStatus::OK, Json(json!({ "status": "Success" })))
                    }
                }),
            )
            .with_state(calls.clone());
        let client = client(spawn_stub(app).await);

        client.forward_ping(&ping()).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route(
                LOCATIONS_PATH,
                post(|State(calls): State<Arc<AtomicUsize>>| async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    (
                        AxumStatus::BAD_REQUEST,
                        Json(json!({ "status": "Failed", "error": "bad username" })),
                    )
                }),
            )
            .with_state(calls.clone());
        let client = client(spawn_stub(app).await);

        let err = client.forward_ping(&ping()).await.unwrap_err();
        assert_eq!(
            err,
            RemoteCallError::Rejected {
                status: 400,
                message: "bad username".to_string()
            }
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unreachable_service_is_unavailable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let client = client(format!("http://{addr}"));

        let err = client.forward_ping(&ping()).await.unwrap_err();
        assert_eq!(err.kind(), "unavailable");
    }

    #[tokio::test]
    async fn travel_distance_decodes_response() {
        let app = Router::new().route(
            TRAVEL_DISTANCE_PATH,
            get(|Query(query): Query<TravelDistanceQuery>| async move {
                Json(json!({
                    "username": query.username,
                    "distance": 12.5,
                    "unit": "kilometers",
                    "start": query.start,
                    "end": query.end,
                    "point_count": 3
                }))
            }),
        );
        let client = client(spawn_stub(app).await);
        let window = TimeWindow {
            start_ms: 1_714_564_800_000,
            end_ms: 1_714_568_400_000,
        };

        let result = client.travel_distance("alice123", window).await.unwrap();

        assert_eq!(result.total_km, 12.5);
        assert_eq!(result.point_count, 3);
        assert_eq!(result.window, window);
    }

    #[tokio::test]
    async fn unrepresentable_window_is_not_sent() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let client = client(format!("http://{addr}"));
        let window = TimeWindow {
            start_ms: geotrail_domain::util::MIN_RFC3339_MS - 1,
            end_ms: 0,
        };

        let err = client.travel_distance("alice123", window).await.unwrap_err();
        assert_eq!(err.kind(), "invalid_request");
    }
}
