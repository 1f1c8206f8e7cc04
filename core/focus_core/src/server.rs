//! HTTP host adapter. The browser extension posts its tab/window/navigation
//! events to `/event` and executes any redirect returned in the response;
//! the popup reads stats and edits the block list through the other routes.

use std::{collections::HashMap, sync::Arc};

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::cors::CorsLayer;
use tracing::{error, warn};

use crate::blocklist::AddOutcome;
use crate::browser::{RedirectOutbox, TabRegistry};
use crate::engine::{Engine, EngineConfig, NavigationDecision, Recorded};
use crate::error::CoreError;
use crate::stats::{export_csv, is_representable, now_ms, DayReport, TodayStats};
use crate::store::KvStore;
use crate::tracker::{FocusState, Millis};

pub type CoreEngine = Engine<Arc<dyn KvStore>, Arc<TabRegistry>, Arc<RedirectOutbox>>;

#[derive(Clone)]
pub struct AppState {
    engine: Arc<CoreEngine>,
    tabs: Arc<TabRegistry>,
    outbox: Arc<RedirectOutbox>,
}

impl AppState {
    pub fn new(store: Arc<dyn KvStore>, config: EngineConfig, now: Millis) -> Self {
        let tabs = Arc::new(TabRegistry::new());
        let outbox = Arc::new(RedirectOutbox::new());
        let engine = Engine::new(store, tabs.clone(), outbox.clone(), config, now);
        Self {
            engine: Arc::new(engine),
            tabs,
            outbox,
        }
    }

    pub fn engine(&self) -> &CoreEngine {
        &self.engine
    }
}

#[derive(Serialize)]
struct OkResponse<T: Serialize> {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
}

#[derive(Serialize)]
struct ErrResponse {
    ok: bool,
    error: &'static str,
}

fn err_response(status: StatusCode, error: &'static str) -> Response {
    (status, Json(ErrResponse { ok: false, error })).into_response()
}

fn ok_response<T: Serialize>(data: T) -> Response {
    Json(OkResponse {
        ok: true,
        data: Some(data),
    })
    .into_response()
}

fn core_err_response(err: &CoreError) -> Response {
    match err {
        CoreError::InvalidSite => err_response(StatusCode::BAD_REQUEST, "invalid_site"),
        _ => {
            error!("request failed: {err}");
            err_response(StatusCode::INTERNAL_SERVER_ERROR, "storage_error")
        }
    }
}

#[derive(Deserialize)]
struct IngestEvent {
    v: i32,
    /// Epoch millis; absent means "now".
    #[serde(default)]
    ts: Option<i64>,
    event: String,
    #[serde(rename = "tabId", default)]
    tab_id: Option<i64>,
    #[serde(rename = "windowId", default)]
    window_id: Option<i64>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(rename = "frameId", default)]
    frame_id: Option<i64>,
}

#[derive(Serialize)]
struct EventAck {
    focus: FocusState,
    #[serde(skip_serializing_if = "Option::is_none")]
    recorded: Option<Recorded>,
    #[serde(skip_serializing_if = "Option::is_none")]
    navigation: Option<NavigationDecision>,
    /// URL the extension should load in the event's tab instead.
    #[serde(skip_serializing_if = "Option::is_none")]
    redirect: Option<String>,
}

#[derive(Deserialize)]
struct DayQuery {
    /// Date in YYYY-MM-DD; defaults to today.
    date: Option<String>,
}

#[derive(Deserialize)]
struct SiteRequest {
    site: String,
}

#[derive(Serialize)]
struct TodayResponse {
    date: String,
    #[serde(flatten)]
    stats: TodayStats,
}

#[derive(Serialize)]
struct HealthInfo {
    service: &'static str,
    version: &'static str,
    open_tabs: usize,
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(HeaderValue::from_static("*"))
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([axum::http::header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(health))
        .route("/event", post(post_event).options(options_ok))
        .route("/stats/today", get(get_stats_today))
        .route("/stats/day", get(get_stats_day))
        .route("/export/csv", get(get_export_csv))
        .route(
            "/blocklist",
            get(get_blocklist).post(post_blocklist).options(options_ok),
        )
        .route(
            "/blocklist/remove",
            post(post_blocklist_remove).options(options_ok),
        )
        .route(
            "/blocklist/:site",
            delete(delete_blocklist_site).options(options_ok),
        )
        .with_state(state)
        .layer(cors)
}

async fn options_ok() -> impl IntoResponse {
    StatusCode::OK
}

async fn health(State(state): State<AppState>) -> Response {
    ok_response(HealthInfo {
        service: "focus_core",
        version: env!("CARGO_PKG_VERSION"),
        open_tabs: state.tabs.len().await,
    })
}

async fn post_event(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Response {
    let Ok(Json(payload)) = payload else {
        return err_response(StatusCode::BAD_REQUEST, "invalid_json");
    };
    let e: IngestEvent = match serde_json::from_value(payload) {
        Ok(v) => v,
        Err(_) => return err_response(StatusCode::BAD_REQUEST, "invalid_json"),
    };
    if e.v < 1 {
        return err_response(StatusCode::BAD_REQUEST, "invalid_version");
    }

    let now = match e.ts {
        Some(ts) if is_representable(ts) => ts,
        Some(ts) => {
            warn!("event ts out of range: {ts}");
            return err_response(StatusCode::BAD_REQUEST, "invalid_ts");
        }
        None => now_ms(),
    };
    let engine = state.engine();
    let mut recorded = None;
    let mut navigation = None;

    match e.event.as_str() {
        "tab_activated" => {
            let Some(tab_id) = e.tab_id else {
                return err_response(StatusCode::BAD_REQUEST, "missing_tab_id");
            };
            if let Some(url) = e.url.as_deref() {
                state.tabs.upsert(tab_id, url, e.window_id).await;
            }
            recorded = engine.on_tab_activated(tab_id, now).await;
        }
        "window_focus_changed" => {
            if let (Some(tab_id), Some(url)) = (e.tab_id, e.url.as_deref()) {
                state.tabs.upsert(tab_id, url, e.window_id).await;
            }
            recorded = engine
                .on_window_focus_changed(e.window_id, e.tab_id, now)
                .await;
        }
        "tab_url_updated" => {
            let (Some(tab_id), Some(url)) = (e.tab_id, e.url.as_deref()) else {
                return err_response(StatusCode::BAD_REQUEST, "missing_tab_or_url");
            };
            state.tabs.upsert(tab_id, url, e.window_id).await;
            navigation = Some(
                engine
                    .on_tab_url_updated(tab_id, url, e.status.as_deref())
                    .await,
            );
        }
        "before_navigate" => {
            let (Some(tab_id), Some(url)) = (e.tab_id, e.url.as_deref()) else {
                return err_response(StatusCode::BAD_REQUEST, "missing_tab_or_url");
            };
            navigation = Some(
                engine
                    .on_before_navigate(tab_id, url, e.frame_id.unwrap_or(0))
                    .await,
            );
        }
        "tab_removed" => {
            let Some(tab_id) = e.tab_id else {
                return err_response(StatusCode::BAD_REQUEST, "missing_tab_id");
            };
            state.tabs.remove(tab_id).await;
        }
        other => {
            warn!("unknown event type: {other}");
            return err_response(StatusCode::BAD_REQUEST, "unknown_event");
        }
    }

    let redirect = match e.tab_id {
        Some(tab_id) => state.outbox.take(tab_id).await,
        None => None,
    };

    ok_response(EventAck {
        focus: engine.focus_state().await,
        recorded,
        navigation,
        redirect,
    })
}

async fn get_stats_today(State(state): State<AppState>) -> Response {
    let now = now_ms();
    match state.engine().today_stats(now).await {
        Ok(stats) => ok_response(TodayResponse {
            date: state.engine().today_key(now),
            stats,
        }),
        Err(err) => core_err_response(&err),
    }
}

fn resolve_date(state: &AppState, date: Option<String>) -> Option<String> {
    match date {
        None => Some(state.engine().today_key(now_ms())),
        Some(d) if is_valid_date(&d) => Some(d),
        Some(_) => None,
    }
}

async fn load_day(state: &AppState, date: Option<String>) -> Result<DayReport, Response> {
    let Some(date) = resolve_date(state, date) else {
        return Err(err_response(StatusCode::BAD_REQUEST, "invalid_date"));
    };
    state
        .engine()
        .day_report(&date)
        .await
        .map_err(|err| core_err_response(&err))
}

async fn get_stats_day(State(state): State<AppState>, Query(q): Query<DayQuery>) -> Response {
    match load_day(&state, q.date).await {
        Ok(report) => ok_response(report),
        Err(resp) => resp,
    }
}

async fn get_export_csv(State(state): State<AppState>, Query(q): Query<DayQuery>) -> Response {
    match load_day(&state, q.date).await {
        Ok(report) => (
            StatusCode::OK,
            [("content-type", "text/csv; charset=utf-8")],
            export_csv(&report),
        )
            .into_response(),
        Err(resp) => resp,
    }
}

async fn get_blocklist(State(state): State<AppState>) -> Response {
    match state.engine().blocked_sites().await {
        Ok(sites) => ok_response(sites),
        Err(err) => core_err_response(&err),
    }
}

async fn post_blocklist(
    State(state): State<AppState>,
    req: Result<Json<SiteRequest>, JsonRejection>,
) -> Response {
    let Ok(Json(req)) = req else {
        return err_response(StatusCode::BAD_REQUEST, "invalid_json");
    };
    match state.engine().add_site(&req.site).await {
        Ok(outcome @ AddOutcome::Added(_)) => (
            StatusCode::CREATED,
            Json(OkResponse {
                ok: true,
                data: Some(outcome),
            }),
        )
            .into_response(),
        Ok(outcome) => ok_response(outcome),
        Err(err) => core_err_response(&err),
    }
}

async fn remove_site(state: &AppState, site: &str) -> Response {
    match state.engine().remove_site(site).await {
        Ok(removed) => ok_response(HashMap::from([("removed", removed)])),
        Err(err) => core_err_response(&err),
    }
}

async fn post_blocklist_remove(
    State(state): State<AppState>,
    req: Result<Json<SiteRequest>, JsonRejection>,
) -> Response {
    let Ok(Json(req)) = req else {
        return err_response(StatusCode::BAD_REQUEST, "invalid_json");
    };
    remove_site(&state, &req.site).await
}

async fn delete_blocklist_site(State(state): State<AppState>, Path(site): Path<String>) -> Response {
    remove_site(&state, &site).await
}

fn is_valid_date(date: &str) -> bool {
    let parts: Vec<&str> = date.split('-').collect();
    if parts.len() != 3 || parts[0].len() != 4 || parts[1].len() != 2 || parts[2].len() != 2 {
        return false;
    }
    let (Ok(y), Ok(m), Ok(d)) = (
        parts[0].parse::<i32>(),
        parts[1].parse::<u8>(),
        parts[2].parse::<u8>(),
    ) else {
        return false;
    };
    let Ok(month) = time::Month::try_from(m) else {
        return false;
    };
    time::Date::from_calendar_date(y, month, d).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::json;
    use tower::ServiceExt;

    // 2026-02-15T10:00:00Z
    const T0: i64 = 1_771_149_600_000;

    fn test_state() -> AppState {
        AppState::new(Arc::new(MemoryStore::new()), EngineConfig::default(), T0)
    }

    async fn send(state: &AppState, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let body = match body {
            Some(b) => Body::from(b.to_string()),
            None => Body::empty(),
        };
        send_raw(state, method, uri, body).await
    }

    async fn send_raw(state: &AppState, method: &str, uri: &str, body: Body) -> (StatusCode, Value) {
        let req = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(body)
            .unwrap();
        let resp = router(state.clone()).oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn event_flow_records_and_redirects() {
        let state = test_state();
        state.engine().initialize(T0).await.unwrap();

        let (status, _) = send(&state, "POST", "/blocklist", Some(json!({"site": "https://www.youtube.com/"}))).await;
        assert_eq!(status, StatusCode::CREATED);

        let (_, body) = send(
            &state,
            "POST",
            "/event",
            Some(json!({"v": 1, "ts": T0, "event": "tab_activated", "tabId": 1, "windowId": 1, "url": "https://www.youtube.com/watch"})),
        )
        .await;
        assert_eq!(body["data"]["focus"], json!({"state": "tracking", "tab_id": 1}));

        let (_, body) = send(
            &state,
            "POST",
            "/event",
            Some(json!({"v": 1, "ts": T0 + 5_000, "event": "tab_activated", "tabId": 2, "url": "https://docs.example.com"})),
        )
        .await;
        assert_eq!(
            body["data"]["recorded"],
            json!({"hostname": "www.youtube.com", "duration_ms": 5_000, "is_distracting": true})
        );

        let (_, body) = send(&state, "GET", "/stats/day?date=2026-02-15", None).await;
        assert_eq!(body["data"]["distracting_ms"], json!(5_000));
        assert_eq!(body["data"]["sites"][0]["hostname"], json!("www.youtube.com"));

        let (_, body) = send(
            &state,
            "POST",
            "/event",
            Some(json!({"v": 1, "event": "before_navigate", "tabId": 2, "url": "https://m.youtube.com/", "frameId": 0})),
        )
        .await;
        assert_eq!(body["data"]["redirect"], json!(crate::engine::DEFAULT_BLOCKED_PAGE_URL));
    }

    #[tokio::test]
    async fn event_validation_errors() {
        let state = test_state();
        let (status, body) = send(&state, "POST", "/event", Some(json!({"event": "tab_activated"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], json!("invalid_json"));

        let (_, body) = send(&state, "POST", "/event", Some(json!({"v": 0, "event": "tab_activated"}))).await;
        assert_eq!(body["error"], json!("invalid_version"));

        let (_, body) = send(&state, "POST", "/event", Some(json!({"v": 1, "event": "tab_activated"}))).await;
        assert_eq!(body["error"], json!("missing_tab_id"));

        let (_, body) = send(&state, "POST", "/event", Some(json!({"v": 1, "event": "teleport"}))).await;
        assert_eq!(body["error"], json!("unknown_event"));

        let (status, body) = send(
            &state,
            "POST",
            "/event",
            Some(json!({"v": 1, "ts": i64::MAX, "event": "tab_activated", "tabId": 1})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], json!("invalid_ts"));
        // Rejected before reaching the tracker.
        assert_eq!(state.engine().focus_state().await, FocusState::Idle);
    }

    #[tokio::test]
    async fn unparsable_bodies_get_the_error_envelope() {
        let state = test_state();
        for uri in ["/event", "/blocklist", "/blocklist/remove"] {
            let (status, body) = send_raw(&state, "POST", uri, Body::from("{not json")).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
            assert_eq!(body, json!({"ok": false, "error": "invalid_json"}), "{uri}");
        }
    }

    #[tokio::test]
    async fn tab_url_updated_only_checks_while_loading() {
        let state = test_state();
        state.engine().initialize(T0).await.unwrap();
        send(&state, "POST", "/blocklist", Some(json!({"site": "reddit.com"}))).await;

        let (_, body) = send(
            &state,
            "POST",
            "/event",
            Some(json!({"v": 1, "event": "tab_url_updated", "tabId": 5, "url": "https://www.reddit.com/", "status": "complete"})),
        )
        .await;
        assert_eq!(body["data"]["navigation"], json!({"action": "skipped"}));
        assert!(body["data"].get("redirect").is_none());

        let (_, body) = send(
            &state,
            "POST",
            "/event",
            Some(json!({"v": 1, "event": "tab_url_updated", "tabId": 5, "url": "https://www.reddit.com/", "status": "loading"})),
        )
        .await;
        assert_eq!(body["data"]["redirect"], json!(crate::engine::DEFAULT_BLOCKED_PAGE_URL));
    }

    #[tokio::test]
    async fn removed_tab_interval_is_not_recorded() {
        let state = test_state();
        state.engine().initialize(T0).await.unwrap();
        send(
            &state,
            "POST",
            "/event",
            Some(json!({"v": 1, "ts": T0, "event": "tab_activated", "tabId": 1, "url": "https://a.com/"})),
        )
        .await;
        let (status, _) = send(&state, "POST", "/event", Some(json!({"v": 1, "event": "tab_removed", "tabId": 1}))).await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = send(
            &state,
            "POST",
            "/event",
            Some(json!({"v": 1, "ts": T0 + 3_000, "event": "tab_activated", "tabId": 2, "url": "https://b.com/"})),
        )
        .await;
        assert!(body["data"].get("recorded").is_none());
        assert_eq!(body["data"]["focus"], json!({"state": "tracking", "tab_id": 2}));

        let (_, body) = send(&state, "GET", "/stats/day?date=2026-02-15", None).await;
        assert_eq!(body["data"]["sites"], json!([]));
    }

    #[tokio::test]
    async fn window_focus_lost_flushes_and_goes_idle() {
        let state = test_state();
        state.engine().initialize(T0).await.unwrap();
        send(
            &state,
            "POST",
            "/event",
            Some(json!({"v": 1, "ts": T0, "event": "tab_activated", "tabId": 1, "windowId": 3, "url": "https://a.com/"})),
        )
        .await;

        let (_, body) = send(
            &state,
            "POST",
            "/event",
            Some(json!({"v": 1, "ts": T0 + 2_000, "event": "window_focus_changed", "windowId": null})),
        )
        .await;
        assert_eq!(
            body["data"]["recorded"],
            json!({"hostname": "a.com", "duration_ms": 2_000, "is_distracting": false})
        );
        assert_eq!(body["data"]["focus"], json!({"state": "idle"}));
    }

    #[tokio::test]
    async fn blocklist_routes() {
        let state = test_state();
        let (status, body) = send(&state, "POST", "/blocklist", Some(json!({"site": "   "}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], json!("invalid_site"));

        send(&state, "POST", "/blocklist", Some(json!({"site": "reddit.com"}))).await;
        let (status, body) = send(&state, "POST", "/blocklist", Some(json!({"site": "www.reddit.com"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["outcome"], json!("already_present"));

        let (_, body) = send(&state, "GET", "/blocklist", None).await;
        assert_eq!(body["data"], json!(["reddit.com"]));

        let (_, body) = send(&state, "DELETE", "/blocklist/reddit.com", None).await;
        assert_eq!(body["data"]["removed"], json!(true));
        let (_, body) = send(&state, "POST", "/blocklist/remove", Some(json!({"site": "reddit.com"}))).await;
        assert_eq!(body["data"]["removed"], json!(false));
    }

    #[tokio::test]
    async fn day_routes_validate_dates() {
        let state = test_state();
        let (status, body) = send(&state, "GET", "/stats/day?date=2026-13-01", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], json!("invalid_date"));

        let (status, _) = send(&state, "GET", "/export/csv?date=2026-02-15", None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[test]
    fn is_valid_date_checks_calendar() {
        assert!(is_valid_date("2026-02-15"));
        assert!(!is_valid_date("2026-02-30"));
        assert!(!is_valid_date("2026-2-15"));
        assert!(!is_valid_date("yesterday"));
    }
}
