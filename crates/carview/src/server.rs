//! HTTP surface.
//!
//! `/ws` carries signaling. Alongside it run the camera registry CRUD
//! (`/rtsp-info`), the batch admission probe (`/health-check`), PTZ
//! forwarding (`/ptz`, `/ptz-preset`) and, when a recording directory is
//! configured, the clip browser (`/videos`, `/video`, `/recorders/*`).

use crate::camera::{CameraError, CameraRecord};
use crate::probe;
use crate::protocol::ResponseKind;
use crate::recording;
use crate::retention;
use crate::session::{SessionError, SessionManager};
use crate::signaling;
use crate::vendor::{self, AuthError, PtzAuth, PtzCommand};
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::{any, delete, get};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

const NO_MAPPING: &str = "차량 매핑 테이블 없음";
const PTZ_OK: &str = "ptz 요청 성공";
const VIDEO_NAME_MISSING: &str = "매치되는 영상파일 이름이 없습니다";
const VIDEO_DELETED: &str = "파일 삭제 성공";
const VIDEO_ABSENT: &str = "파일 삭제 실패(파일이 존재하지 않음)";

type AppState = Arc<SessionManager>;

/// Common `{response, message, data}` body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub response: ResponseKind,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    fn success(message: impl Into<String>, data: Option<T>) -> Self {
        Self {
            response: ResponseKind::Success,
            message: Some(message.into()),
            data,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            response: ResponseKind::Error,
            message: Some(message.into()),
            data: None,
        }
    }
}

type ApiResult<T> = (StatusCode, Json<ApiResponse<T>>);

fn reply<T>(status: StatusCode, body: ApiResponse<T>) -> ApiResult<T> {
    (status, Json(body))
}

// ── Signaling ───────────────────────────────────────────────────────

async fn ws_handler(ws: WebSocketUpgrade, State(manager): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| signaling::handle_socket(socket, manager))
}

// ── Batch admission probe ───────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct HealthCheckQuery {
    #[serde(rename = "carId", default)]
    car_id: String,
}

/// One entry of the `/health-check` array.
#[derive(Debug, Serialize)]
#[serde(untagged)]
enum HealthEntry {
    Found {
        #[serde(flatten)]
        record: CameraRecord,
        status: &'static str,
        #[serde(rename = "isOpen")]
        is_open: bool,
    },
    Missing {
        streaming_name: String,
        message: &'static str,
        response: &'static str,
    },
}

async fn health_check(
    State(manager): State<AppState>,
    Query(query): Query<HealthCheckQuery>,
) -> Json<Vec<HealthEntry>> {
    let names: Vec<&str> = query
        .car_id
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();

    let manager = manager.as_ref();
    let camera = &manager.config().camera;
    let checks = names.iter().map(|name| async move {
        let record = match manager.cameras().lookup(name).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                return HealthEntry::Missing {
                    streaming_name: name.to_string(),
                    message: NO_MAPPING,
                    response: "fail",
                }
            }
            Err(e) => {
                log::error!("[API] health-check lookup '{}' failed: {}", name, e);
                return HealthEntry::Missing {
                    streaming_name: name.to_string(),
                    message: NO_MAPPING,
                    response: "fail",
                };
            }
        };
        let result =
            probe::probe(&record.streaming_ip, camera.rtsp_port, camera.probe_timeout()).await;
        HealthEntry::Found {
            record,
            status: result.status(),
            is_open: result.reachable,
        }
    });
    Json(futures::future::join_all(checks).await)
}

// ── Camera registry ─────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct NameQuery {
    #[serde(rename = "streamingName", default)]
    streaming_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NameBody {
    streaming_name: String,
}

#[derive(Debug, Deserialize)]
struct UpdateRequest {
    before_streaming_name: String,
    #[serde(flatten)]
    record: CameraRecord,
}

fn camera_error_status(e: &CameraError) -> StatusCode {
    match e {
        CameraError::NotFound(_) => StatusCode::NOT_FOUND,
        CameraError::Duplicate(_) => StatusCode::CONFLICT,
        CameraError::Invalid(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn list_cameras(
    State(manager): State<AppState>,
    Query(query): Query<NameQuery>,
) -> ApiResult<Vec<CameraRecord>> {
    let cameras = manager.cameras();
    let result = match query.streaming_name.as_deref() {
        Some(name) => cameras
            .lookup(name)
            .await
            .map(|r| r.into_iter().collect::<Vec<_>>()),
        None => cameras.list().await,
    };
    match result {
        Ok(records) => reply(StatusCode::OK, ApiResponse::success("정상", Some(records))),
        Err(e) => {
            log::error!("[API] list cameras failed: {}", e);
            reply(camera_error_status(&e), ApiResponse::error(e.to_string()))
        }
    }
}

async fn add_camera(
    State(manager): State<AppState>,
    Json(record): Json<CameraRecord>,
) -> ApiResult<CameraRecord> {
    match manager.cameras().insert(record.clone()).await {
        Ok(()) => {
            log::info!("[API] camera '{}' added", record.streaming_name);
            reply(
                StatusCode::OK,
                ApiResponse::success("Data inserted successfully", Some(record)),
            )
        }
        Err(e) => {
            log::warn!("[API] add camera failed: {}", e);
            reply(camera_error_status(&e), ApiResponse::error(e.to_string()))
        }
    }
}

async fn update_camera(
    State(manager): State<AppState>,
    Json(req): Json<UpdateRequest>,
) -> ApiResult<CameraRecord> {
    match manager
        .cameras()
        .update(&req.before_streaming_name, req.record.clone())
        .await
    {
        Ok(()) => {
            log::info!(
                "[API] camera '{}' updated (now '{}')",
                req.before_streaming_name,
                req.record.streaming_name
            );
            reply(
                StatusCode::OK,
                ApiResponse::success("Data update successfully", Some(req.record)),
            )
        }
        Err(e) => {
            log::warn!("[API] update camera failed: {}", e);
            reply(camera_error_status(&e), ApiResponse::error(e.to_string()))
        }
    }
}

async fn delete_camera(
    State(manager): State<AppState>,
    Json(req): Json<NameBody>,
) -> ApiResult<()> {
    match manager.cameras().remove(&req.streaming_name).await {
        Ok(()) => {
            log::info!("[API] camera '{}' removed", req.streaming_name);
            reply(
                StatusCode::OK,
                ApiResponse::success("Data delete successfully", None),
            )
        }
        Err(e) => {
            log::warn!("[API] delete camera failed: {}", e);
            reply(camera_error_status(&e), ApiResponse::error(e.to_string()))
        }
    }
}

// ── PTZ forwarding ──────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PtzQuery {
    streaming_name: String,
    #[serde(default)]
    id: String,
    #[serde(default)]
    password: String,
    #[serde(default)]
    auth_id: String,
    #[serde(default)]
    ptz_event: Option<String>,
    #[serde(default)]
    ptz_speed: Option<String>,
}

impl PtzQuery {
    fn auth(&self) -> PtzAuth {
        PtzAuth {
            id: self.id.clone(),
            password: self.password.clone(),
            auth_id: self.auth_id.clone(),
        }
    }

    fn command(&self) -> Option<PtzCommand> {
        let event = self.ptz_event.as_deref()?.trim();
        if event.is_empty() {
            return None;
        }
        let speed = self
            .ptz_speed
            .as_deref()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(50);
        Some(PtzCommand {
            event: event.to_string(),
            speed,
        })
    }
}

fn ptz_outcome(name: &str, result: vendor::Result<String>) -> ApiResult<()> {
    match result {
        Ok(_) => reply(StatusCode::OK, ApiResponse::success(PTZ_OK, None)),
        Err(AuthError::PtzUnavailable) => {
            reply(StatusCode::OK, ApiResponse::error(AuthError::PtzUnavailable.to_string()))
        }
        Err(e) => {
            log::warn!("[API] ptz for '{}' failed: {}", name, e);
            reply(StatusCode::BAD_REQUEST, ApiResponse::error(e.to_string()))
        }
    }
}

async fn find_camera(manager: &SessionManager, name: &str) -> Result<CameraRecord, ApiResult<()>> {
    match manager.cameras().lookup(name).await {
        Ok(Some(record)) => Ok(record),
        Ok(None) => Err(reply(
            StatusCode::NOT_FOUND,
            ApiResponse::error(SessionError::NotFound.to_string()),
        )),
        Err(e) => {
            log::error!("[API] lookup '{}' failed: {}", name, e);
            Err(reply(
                StatusCode::INTERNAL_SERVER_ERROR,
                ApiResponse::error(e.to_string()),
            ))
        }
    }
}

async fn ptz(State(manager): State<AppState>, Query(query): Query<PtzQuery>) -> ApiResult<()> {
    let record = match find_camera(&manager, &query.streaming_name).await {
        Ok(record) => record,
        Err(response) => return response,
    };
    let Some(command) = query.command() else {
        return reply(
            StatusCode::BAD_REQUEST,
            ApiResponse::error(SessionError::MissingParameter("ptzEvent").to_string()),
        );
    };
    let http = manager.camera_http(&record.streaming_ip);
    log::debug!("[API] ptz {} -> {}", command.event, record.streaming_name);
    let result = vendor::send_ptz(&http, record.camera_code, &query.auth(), &command).await;
    ptz_outcome(&record.streaming_name, result)
}

async fn ptz_preset(
    State(manager): State<AppState>,
    Query(query): Query<PtzQuery>,
) -> ApiResult<()> {
    let record = match find_camera(&manager, &query.streaming_name).await {
        Ok(record) => record,
        Err(response) => return response,
    };
    let http = manager.camera_http(&record.streaming_ip);
    let result = vendor::send_preset(&http, record.camera_code, &query.auth()).await;
    ptz_outcome(&record.streaming_name, result)
}

// ── Recording browser ───────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct DeleteVideoRequest {
    #[serde(rename = "fileName", default)]
    file_name: Option<String>,
}

async fn list_videos(State(manager): State<AppState>) -> ApiResult<Vec<recording::ClipInfo>> {
    let settings = manager.config().recording.clone();
    let Some(directory) = settings.serve_directory.clone() else {
        return reply(StatusCode::NOT_FOUND, ApiResponse::error("recording directory not configured"));
    };
    let retention = settings.retention();
    let listed = tokio::task::spawn_blocking(move || {
        recording::list_clips(&directory, &settings.extension, retention)
    })
    .await;
    match listed {
        Ok(Ok(clips)) => reply(
            StatusCode::OK,
            ApiResponse {
                response: ResponseKind::Success,
                message: None,
                data: Some(clips),
            },
        ),
        Ok(Err(e)) => {
            log::error!("[API] list videos failed: {}", e);
            reply(StatusCode::INTERNAL_SERVER_ERROR, ApiResponse::error(e.to_string()))
        }
        Err(e) => {
            log::error!("[API] list videos task failed: {}", e);
            reply(StatusCode::INTERNAL_SERVER_ERROR, ApiResponse::error(e.to_string()))
        }
    }
}

async fn delete_video(
    State(manager): State<AppState>,
    Json(req): Json<DeleteVideoRequest>,
) -> ApiResult<()> {
    let Some(file_name) = req.file_name.filter(|f| !f.trim().is_empty()) else {
        return reply(StatusCode::BAD_REQUEST, ApiResponse::error(VIDEO_NAME_MISSING));
    };
    let Some(directory) = manager.config().recording.serve_directory.clone() else {
        return reply(StatusCode::NOT_FOUND, ApiResponse::error("recording directory not configured"));
    };
    let name = file_name.clone();
    let deleted =
        tokio::task::spawn_blocking(move || recording::delete_clip(&directory, &name)).await;
    let deleted = match deleted {
        Ok(deleted) => deleted,
        Err(e) => {
            log::error!("[API] delete clip task failed: {}", e);
            return reply(StatusCode::INTERNAL_SERVER_ERROR, ApiResponse::error(e.to_string()));
        }
    };
    match deleted {
        Ok(()) => {
            log::info!("[API] clip '{}' deleted", file_name);
            reply(StatusCode::OK, ApiResponse::success(VIDEO_DELETED, None))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => reply(
            StatusCode::INTERNAL_SERVER_ERROR,
            ApiResponse::error(VIDEO_ABSENT),
        ),
        Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => {
            reply(StatusCode::BAD_REQUEST, ApiResponse::error(VIDEO_NAME_MISSING))
        }
        Err(e) => {
            log::error!("[API] delete clip '{}' failed: {}", file_name, e);
            reply(StatusCode::INTERNAL_SERVER_ERROR, ApiResponse::error(e.to_string()))
        }
    }
}

// ── Router / server ─────────────────────────────────────────────────

/// Build the full router for `manager`.
pub fn router(manager: Arc<SessionManager>) -> Router {
    let mut router = Router::new()
        .route("/ws", any(ws_handler))
        .route("/health-check", get(health_check))
        .route(
            "/rtsp-info",
            get(list_cameras)
                .post(add_camera)
                .put(update_camera)
                .delete(delete_camera),
        )
        .route("/ptz", get(ptz))
        .route("/ptz-preset", get(ptz_preset));

    if let Some(directory) = manager.config().recording.serve_directory.clone() {
        router = router
            .route("/videos", get(list_videos))
            .route("/video", delete(delete_video))
            .nest_service("/recorders", ServeDir::new(directory));
    }

    router.layer(CorsLayer::permissive()).with_state(manager)
}

/// Serve until SIGINT/SIGTERM, then stop every session.
pub async fn serve(manager: Arc<SessionManager>) -> std::io::Result<()> {
    let config = manager.config().clone();
    let (shutdown_tx, shutdown_rx) = watch::channel(());

    if let Some(directory) = config.recording.serve_directory.clone() {
        match retention::parse_schedule(&config.recording.sweep_cron) {
            Ok(schedule) => {
                tokio::spawn(retention::run(
                    directory,
                    config.recording.extension.clone(),
                    config.recording.retention(),
                    schedule,
                    shutdown_rx,
                ));
            }
            Err(e) => log::error!("Retention sweep disabled: {}", e),
        }
    }

    let listener = tokio::net::TcpListener::bind(&config.listen).await?;
    log::info!("carview listening on http://{}", config.listen);
    log::info!("Media server at {}", config.engine.ws_uri);

    axum::serve(listener, router(manager.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(());
    manager.shutdown().await;
    log::info!("Server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {},
            _ = sigterm.recv() => {},
        }
    }

    #[cfg(not(unix))]
    ctrl_c.await.expect("failed to install Ctrl+C handler");

    log::info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{MemoryDirectory, VendorCode};
    use crate::config::ServerConfig;
    use crate::engine::mock::MockConnector;
    use axum::routing::post;
    use serde_json::{json, Value};
    use std::sync::Mutex;
    use tokio::net::TcpListener;

    struct TestServer {
        base: String,
        client: reqwest::Client,
        camera_posts: Arc<Mutex<Vec<(String, String)>>>,
        clips: tempfile::TempDir,
        _probe: TcpListener,
    }

    fn record(name: &str, code: i64) -> CameraRecord {
        CameraRecord {
            streaming_name: name.into(),
            streaming_car_id: "12가3456".into(),
            streaming_ip: "127.0.0.1".into(),
            streaming_id: "admin".into(),
            streaming_password: "1234".into(),
            camera_type: "kedacom".into(),
            camera_code: VendorCode::from(code),
        }
    }

    /// Fake camera firmware that records every POST it receives.
    async fn fake_firmware(posts: Arc<Mutex<Vec<(String, String)>>>) -> u16 {
        let kedacom = posts.clone();
        let router = Router::new().route(
            "/kdsapi/video/ptz",
            post(move |body: String| async move {
                kedacom
                    .lock()
                    .unwrap()
                    .push(("/kdsapi/video/ptz".to_string(), body));
                "<contentroot/>"
            }),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        port
    }

    async fn start() -> TestServer {
        let camera_posts = Arc::new(Mutex::new(Vec::new()));
        let firmware_port = fake_firmware(camera_posts.clone()).await;
        let probe = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let clips = tempfile::tempdir().unwrap();

        let mut config = ServerConfig::default();
        config.camera.rtsp_port = probe.local_addr().unwrap().port();
        config.camera.http_port = firmware_port;
        config.camera.probe_timeout_ms = 200;
        config.recording.serve_directory = Some(clips.path().to_path_buf());

        let cameras = Arc::new(MemoryDirectory::with_records([
            record("car-01", 1),
            record("car-03", 3),
        ]));
        let manager = SessionManager::new(config, cameras, Arc::new(MockConnector::new()));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(manager)).await.unwrap();
        });

        TestServer {
            base: format!("http://{}", addr),
            client: reqwest::Client::new(),
            camera_posts,
            clips,
            _probe: probe,
        }
    }

    impl TestServer {
        async fn get(&self, path: &str) -> (u16, Value) {
            let resp = self
                .client
                .get(format!("{}{}", self.base, path))
                .send()
                .await
                .unwrap();
            (resp.status().as_u16(), resp.json().await.unwrap())
        }

        async fn send(&self, method: reqwest::Method, path: &str, body: Value) -> (u16, Value) {
            let resp = self
                .client
                .request(method, format!("{}{}", self.base, path))
                .json(&body)
                .send()
                .await
                .unwrap();
            (resp.status().as_u16(), resp.json().await.unwrap())
        }
    }

    #[tokio::test]
    async fn test_health_check_batch() {
        let server = start().await;
        let (status, body) = server.get("/health-check?carId=car-01,ghost").await;
        assert_eq!(status, 200);
        let entries = body.as_array().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["streaming_name"], "car-01");
        assert_eq!(entries[0]["status"], "open");
        assert_eq!(entries[0]["isOpen"], true);
        assert_eq!(entries[0]["camera_code"], 1);
        assert_eq!(entries[1]["streaming_name"], "ghost");
        assert_eq!(entries[1]["message"], NO_MAPPING);
        assert_eq!(entries[1]["response"], "fail");
    }

    #[tokio::test]
    async fn test_rtsp_info_crud() {
        let server = start().await;
        let (_, body) = server.get("/rtsp-info").await;
        assert_eq!(body["response"], "success");
        assert_eq!(body["data"].as_array().unwrap().len(), 2);

        let new = json!({
            "streaming_name": "car-07",
            "streaming_car_id": "77다7777",
            "streaming_ip": "10.0.0.7",
            "streaming_id": "admin",
            "streaming_password": "pw",
            "camera_type": "innodep",
            "camera_code": 2
        });
        let (status, body) = server.send(reqwest::Method::POST, "/rtsp-info", new.clone()).await;
        assert_eq!(status, 200);
        assert_eq!(body["data"]["camera_code"], 2);

        let (status, _) = server.send(reqwest::Method::POST, "/rtsp-info", new).await;
        assert_eq!(status, 409);

        let renamed = json!({
            "before_streaming_name": "car-07",
            "streaming_name": "car-08",
            "streaming_ip": "10.0.0.8",
            "camera_code": 2
        });
        let (status, body) = server.send(reqwest::Method::PUT, "/rtsp-info", renamed).await;
        assert_eq!(status, 200);
        assert_eq!(body["data"]["streaming_name"], "car-08");

        let (_, body) = server.get("/rtsp-info?streamingName=car-08").await;
        assert_eq!(body["data"][0]["streaming_ip"], "10.0.0.8");
        let (_, body) = server.get("/rtsp-info?streamingName=car-07").await;
        assert_eq!(body["data"].as_array().unwrap().len(), 0);

        let (status, _) = server
            .send(reqwest::Method::DELETE, "/rtsp-info", json!({"streaming_name": "car-08"}))
            .await;
        assert_eq!(status, 200);
        let (status, body) = server
            .send(reqwest::Method::DELETE, "/rtsp-info", json!({"streaming_name": "car-08"}))
            .await;
        assert_eq!(status, 404);
        assert_eq!(body["response"], "error");
    }

    #[tokio::test]
    async fn test_ptz_forwarded_to_camera() {
        let server = start().await;
        let (status, body) = server
            .get("/ptz?streamingName=car-01&id=admin&password=1234&authId=tok&ptzEvent=moveleft&ptzSpeed=30")
            .await;
        assert_eq!(status, 200);
        assert_eq!(body["response"], "success");

        let posts = server.camera_posts.lock().unwrap().clone();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].0, "/kdsapi/video/ptz");
        assert!(posts[0].1.contains("moveleft"));
        assert!(posts[0].1.contains("<authenticationid>tok</authenticationid>"));
    }

    #[tokio::test]
    async fn test_ptz_unsupported_vendor() {
        let server = start().await;
        let (status, body) = server
            .get("/ptz?streamingName=car-03&id=a&password=b&authId=c&ptzEvent=moveup")
            .await;
        assert_eq!(status, 200);
        assert_eq!(body["response"], "error");
        assert_eq!(body["message"], "ptz 사용 불가 카메라");

        let (_, body) = server
            .get("/ptz-preset?streamingName=car-03&id=a&password=b&authId=c")
            .await;
        assert_eq!(body["message"], "ptz 사용 불가 카메라");
        assert!(server.camera_posts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ptz_unknown_camera() {
        let server = start().await;
        let (status, body) = server
            .get("/ptz?streamingName=ghost&ptzEvent=moveup")
            .await;
        assert_eq!(status, 404);
        assert_eq!(body["message"], "차량 정보 없음");
    }

    #[tokio::test]
    async fn test_videos_list_and_delete() {
        let server = start().await;
        let clip = "2024_03_09-07_05_01_car-01_D1_C2_abc.webm";
        std::fs::write(server.clips.path().join(clip), vec![0u8; 1536]).unwrap();

        let (status, body) = server.get("/videos").await;
        assert_eq!(status, 200);
        assert_eq!(body["response"], "success");
        assert_eq!(body["data"][0]["fileName"], clip);
        assert_eq!(body["data"][0]["carNumber"], "C2");
        assert_eq!(body["data"][0]["size"], "1.5 KB");

        let served = server
            .client
            .get(format!("{}/recorders/{}", server.base, clip))
            .send()
            .await
            .unwrap();
        assert_eq!(served.status().as_u16(), 200);
        assert_eq!(served.bytes().await.unwrap().len(), 1536);

        let (status, body) = server.send(reqwest::Method::DELETE, "/video", json!({})).await;
        assert_eq!(status, 400);
        assert_eq!(body["message"], VIDEO_NAME_MISSING);

        let (status, body) = server
            .send(reqwest::Method::DELETE, "/video", json!({"fileName": clip}))
            .await;
        assert_eq!(status, 200);
        assert_eq!(body["message"], VIDEO_DELETED);
        assert!(!server.clips.path().join(clip).exists());

        let (status, _) = server
            .send(reqwest::Method::DELETE, "/video", json!({"fileName": "../etc/passwd"}))
            .await;
        assert_eq!(status, 400);

        let (status, body) = server
            .send(reqwest::Method::DELETE, "/video", json!({"fileName": clip}))
            .await;
        assert_eq!(status, 500);
        assert_eq!(body["message"], VIDEO_ABSENT);
    }
}
