use std::any::Any;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{MatchedPath, Query, RawQuery, Request, State};
use axum::middleware::{Next, from_fn};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use http::StatusCode;
use serde::Serialize;
use thiserror::Error;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::instrument;

use crate::api::handler::*;
use crate::api::middleware::cors;
use crate::api::proxy::{PROXIED_ROUTES, ProxyError};
use crate::constants::{MSG_INTERNAL, MSG_MALFORMED_BODY, MSG_STORAGE_UNAVAILABLE};
use crate::db::prelude::*;
use crate::util::env::Config;

pub type JsonResult<T> = core::result::Result<Json<T>, RouteError>;

#[derive(Debug)]
pub struct AppState {
    pub config: Config,
    pub gateway: StorageGateway,
    pub feedback_fallback: FeedbackFallback,
    pub http_client: reqwest::Client,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let gateway = StorageGateway::from_config(&config);
        Self::with_gateway(config, gateway)
    }

    pub fn with_gateway(config: Config, gateway: StorageGateway) -> Self {
        Self {
            config,
            gateway,
            feedback_fallback: FeedbackFallback::default(),
            http_client: reqwest::Client::new(),
        }
    }
}

/// Single-day usage routes and the collection each one counts
const USAGE_ROUTES: [(&str, CollectionName); 3] = [
    ("/api/usage-gamemath", CollectionName::UsageGameMath),
    ("/api/usage-gamepicture", CollectionName::UsageGamePicture),
    ("/api/usage-gamethai", CollectionName::UsageGameThai),
];

pub fn router(state: Arc<AppState>) -> Router {
    let cors_layer = cors(&state.config.cors_allow_origins);

    let mut app = Router::new()
        //
        // feedback
        .route("/api/feedback", get(list_feedback).post(submit_feedback))
        .route("/api/feedbacks", get(list_persisted_feedback))
        //
        // per-day breakdown for the matching game
        .route("/api/gamematch", get(gamematch_breakdown));

    for (route, collection) in USAGE_ROUTES {
        app = app.route(
            route,
            get(
                move |State(state): State<Arc<AppState>>, Query(query): Query<DayQuery>| async move {
                    usage_for_day(state, collection, query).await
                },
            ),
        );
    }

    //
    // proxied status-service requests
    for (route, default_query) in PROXIED_ROUTES {
        app = app.route(
            route,
            get(
                move |State(state): State<Arc<AppState>>, RawQuery(query): RawQuery| async move {
                    proxy_status(state, route, query.as_deref().or(default_query)).await
                },
            ),
        );
    }

    app.layer(CatchPanicLayer::custom(panic_response))
        .layer(
            TraceLayer::new_for_http().make_span_with(|req: &axum::http::Request<_>| {
                let method = req.method();
                let uri = req.uri();

                let matched_path = req
                    .extensions()
                    .get::<MatchedPath>()
                    .map(|matched| matched.as_str());

                tracing::debug_span!("api_request", ?method, ?uri, ?matched_path)
            }),
        )
        .layer(from_fn(log_route_errors))
        .layer(cors_layer)
        .with_state(state)
}

/// Logs the `RouteError` a handler attached to its response
#[instrument(skip(request, next), fields(uri = request.uri().to_string()))]
async fn log_route_errors(request: Request, next: Next) -> Response {
    let res = next.run(request).await;
    if let Some(err) = res.extensions().get::<Arc<RouteError>>() {
        if res.status().is_server_error() {
            tracing::error!(error = ?err, "error occurred inside route handler");
        } else {
            tracing::info!(error = %err, "request rejected");
        }
    }

    res
}

/// A panicking handler still answers its request, with a 500
fn panic_response(payload: Box<dyn Any + Send + 'static>) -> Response {
    let message = payload
        .downcast_ref::<&str>()
        .map(|msg| msg.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());

    RouteError::Panicked(message).into_response()
}

/// Binds the listener and serves until ctrl-c. Failing to bind is returned to the caller.
#[instrument(skip(config))]
pub async fn start_server(config: Config) -> std::io::Result<()> {
    let socket_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), config.port);
    let state = Arc::new(AppState::new(config));

    if !state.gateway.is_configured() {
        tracing::warn!("no document store configured, feedback is kept in memory");
    }

    let listener = tokio::net::TcpListener::bind(socket_addr).await?;
    tracing::info!(
        server_url = &format!("http://127.0.0.1:{}", socket_addr.port()),
        "server ready"
    );

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("shutdown signal received"),
        Err(e) => {
            tracing::error!(error = ?e, "unable to listen for shutdown signal");
            std::future::pending::<()>().await
        }
    }
}

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    MalformedBody(#[from] JsonRejection),

    #[error("storage unavailable ({0})")]
    StorageUnavailable(String),

    #[error("proxy error fetching {route}: {source}")]
    UpstreamProxy {
        route: String,
        #[source]
        source: ProxyError,
    },

    #[error(transparent)]
    StoreError(#[from] StoreErr),

    #[error("handler panicked: {0}")]
    Panicked(String),
}

impl From<FeedbackError> for RouteError {
    fn from(value: FeedbackError) -> Self {
        match value {
            FeedbackError::Validation(message) => RouteError::Validation(message),
            FeedbackError::StorageUnavailable => {
                RouteError::StorageUnavailable(CollectionName::Feedbacks.to_string())
            }
            FeedbackError::Store(e) => RouteError::StoreError(e),
        }
    }
}

impl From<UsageError> for RouteError {
    fn from(value: UsageError) -> Self {
        match value {
            UsageError::StorageUnavailable(name) => RouteError::StorageUnavailable(name.to_string()),
            UsageError::Store(e) => RouteError::StoreError(e),
        }
    }
}

impl IntoResponse for RouteError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            success: bool,
            message: String,
        }

        // storage details stay in the logs
        let (status, message) = match &self {
            RouteError::Validation(message) => (StatusCode::BAD_REQUEST, message.clone()),
            RouteError::MalformedBody(_) => {
                (StatusCode::BAD_REQUEST, MSG_MALFORMED_BODY.to_string())
            }
            RouteError::StorageUnavailable(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                MSG_STORAGE_UNAVAILABLE.to_string(),
            ),
            RouteError::UpstreamProxy { route, .. } => (
                StatusCode::BAD_GATEWAY,
                format!(
                    "Proxy error fetching {}",
                    route.trim_start_matches("/api").trim_start_matches('/')
                ),
            ),
            RouteError::StoreError(_) | RouteError::Panicked(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, MSG_INTERNAL.to_string())
            }
        };

        let mut response = (
            status,
            Json(ErrorResponse {
                success: false,
                message,
            }),
        )
            .into_response();
        response.extensions_mut().insert(Arc::new(self));

        response
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::db::memory::{FailingConnector, MemoryConnector, MemoryStore};
    use crate::util::env::from_iter;
    use axum::body::{Body, to_bytes};
    use serde_json::{Value, json};
    use tower::ServiceExt;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(pairs: &[(&str, &str)]) -> Config {
        from_iter(pairs.iter().map(|(k, v)| (k.to_string(), v.to_string()))).unwrap()
    }

    fn app_with(gateway: StorageGateway) -> Router {
        router(Arc::new(AppState::with_gateway(config(&[]), gateway)))
    }

    fn app_with_store() -> (Router, Arc<MemoryStore>) {
        let connector = MemoryConnector::default();
        let store = connector.store();
        (app_with(StorageGateway::with_connector("db", connector)), store)
    }

    async fn send(app: &Router, req: http::Request<Body>) -> (StatusCode, Value) {
        let res = app.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();

        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn get_req(uri: &str) -> http::Request<Body> {
        http::Request::get(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> http::Request<Body> {
        http::Request::post(uri)
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_feedback_roundtrip_without_store() {
        let app = app_with(StorageGateway::unconfigured("db"));

        let (status, body) = send(
            &app,
            post_json("/api/feedback", json!({ "feedback": "great game", "name": "ครูสมศรี" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["message"], "บันทึกข้อเสนอแนะสำเร็จ (fallback)");
        assert_eq!(body["data"]["feedback"], "great game");
        assert_eq!(body["data"]["phone"], Value::Null);
        assert!(body["data"]["createdAt"].is_string());

        let (status, body) = send(&app, get_req("/api/feedback")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 1);
        assert_eq!(body["data"][0]["name"], "ครูสมศรี");
    }

    #[tokio::test]
    async fn test_empty_feedback_is_bad_request() {
        let app = app_with(StorageGateway::unconfigured("db"));

        for payload in [json!({ "feedback": "" }), json!({ "name": "x" })] {
            let (status, body) = send(&app, post_json("/api/feedback", payload)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body["success"], false);
            assert_eq!(body["message"], "กรุณากรอกข้อเสนอแนะ");
        }

        let (_, body) = send(&app, get_req("/api/feedback")).await;
        assert_eq!(body["count"], 0);
    }

    #[tokio::test]
    async fn test_malformed_body_is_bad_request() {
        let app = app_with(StorageGateway::unconfigured("db"));
        let req = http::Request::post("/api/feedback")
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();

        let (status, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_persisted_feedback_routes() {
        let (app, store) = app_with_store();

        for text in ["first", "second"] {
            let (status, body) = send(&app, post_json("/api/feedback", json!({ "feedback": text }))).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["message"], "บันทึกข้อเสนอแนะสำเร็จ");
        }
        assert_eq!(store.documents("db:feedbacks").len(), 2);

        let (_, body) = send(&app, get_req("/api/feedback")).await;
        assert_eq!(body["data"][0]["feedback"], "second");
        assert_eq!(body["data"][0]["id"], 2);

        let (status, body) = send(&app, get_req("/api/feedbacks")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 2);
        assert!(body["data"][0]["_id"].is_number());
    }

    #[tokio::test]
    async fn test_usage_route_counts_day() {
        let (app, store) = app_with_store();
        store.seed(
            "db:usage_gamepicture_html",
            [
                json!({ "day": "2024-05-01" }),
                json!({ "timestamp": "2024-05-01T23:59:59Z", "count": 5 }),
                json!({ "timestamp": "2024-05-02T00:00:00Z" }),
            ],
        );

        let (status, body) = send(&app, get_req("/api/usage-gamepicture?date=2024-05-01")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "success": true, "date": "2024-05-01", "count": 6 }));

        // other games read their own collection
        let (_, body) = send(&app, get_req("/api/usage-gamemath?date=2024-05-01")).await;
        assert_eq!(body["count"], 0);
    }

    #[tokio::test]
    async fn test_usage_route_without_store_is_server_error() {
        let app = app_with(StorageGateway::with_connector("db", FailingConnector::default()));

        let (status, body) = send(&app, get_req("/api/usage-gamethai?date=2024-05-01")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["success"], false);
        assert_eq!(body["message"], MSG_STORAGE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_gamematch_breakdown_route() {
        let (app, store) = app_with_store();
        store.seed(
            "db:usage_gamematch_html",
            [
                json!({ "day": "2024-05-01", "count": 2 }),
                json!({ "created_at": "2024-05-02T09:00:00Z" }),
            ],
        );

        let (status, body) = send(&app, get_req("/api/gamematch?from=2024-05-01&to=2024-05-03")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({
                "success": true,
                "data": [
                    { "date": "2024-05-01", "count": 2 },
                    { "date": "2024-05-02", "count": 1 },
                    { "date": "2024-05-03", "count": 0 },
                ]
            })
        );
    }

    #[tokio::test]
    async fn test_panicking_handler_is_server_error() {
        let app: Router = Router::new()
            .route(
                "/boom",
                get(|| async { None::<&'static str>.expect("day arithmetic overflowed") }),
            )
            .layer(CatchPanicLayer::custom(panic_response));

        let (status, body) = send(&app, get_req("/boom")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, json!({ "success": false, "message": MSG_INTERNAL }));
    }

    #[tokio::test]
    async fn test_out_of_calendar_dates_are_answered() {
        let (app, store) = app_with_store();
        store.seed("db:usage_gamematch_html", [json!({ "day": "2024-05-01" })]);

        let (status, body) = send(&app, get_req("/api/usage-gamemath?date=8210266790400000")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);

        let (status, body) = send(&app, get_req("/api/gamematch?to=-8334601228800000")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"].as_array().unwrap().len(), 7);
    }

    #[tokio::test]
    async fn test_proxy_routes() {
        let upstream = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/status/active-clients"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "active": 12 })))
            .mount(&upstream)
            .await;

        let state = AppState::with_gateway(
            config(&[("STATUS_UPSTREAM_URL", upstream.uri().as_str())]),
            StorageGateway::unconfigured("db"),
        );
        let app = router(Arc::new(state));

        let res = app
            .clone()
            .oneshot(get_req("/status/active-clients"))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(
            res.headers()
                .get(http::header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .unwrap(),
            "*"
        );
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        assert_eq!(
            serde_json::from_slice::<Value>(&bytes).unwrap(),
            json!({ "active": 12 })
        );

        // nothing mounted for this path, so the upstream answers 404 with an empty, non-JSON body
        let (status, body) = send(&app, get_req("/api/active-clients")).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(
            body,
            json!({ "success": false, "message": "Proxy error fetching active-clients" })
        );
    }
}
