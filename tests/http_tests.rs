// Integration tests for the HTTP control surface
//
// Requests are driven through the router in-process; sessions run on real
// workers against the in-process room hub.

use anyhow::Result;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use room_recorder::audio::RecorderSettings;
use room_recorder::config::PlatformConfig;
use room_recorder::http::StatusResponse;
use room_recorder::room::MemoryRoomHub;
use room_recorder::session::{RecordingContext, SessionInfo, SessionRegistry, SessionTimeouts};
use room_recorder::{create_router, AppState};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

struct TestApp {
    router: Router,
    registry: Arc<SessionRegistry>,
    hub: MemoryRoomHub,
    _recordings: TempDir,
}

fn app_with(platform: PlatformConfig) -> Result<TestApp> {
    let recordings = TempDir::new()?;
    let hub = MemoryRoomHub::new();
    let registry = Arc::new(SessionRegistry::new(
        hub.client(),
        RecordingContext::new(recordings.path(), RecorderSettings::default()),
        SessionTimeouts {
            join: Duration::from_secs(2),
            leave: Duration::from_secs(2),
            thread_join: Duration::from_secs(2),
        },
    ));
    let router = create_router(AppState::new(Arc::clone(&registry), platform));

    Ok(TestApp {
        router,
        registry,
        hub,
        _recordings: recordings,
    })
}

fn app() -> Result<TestApp> {
    app_with(PlatformConfig {
        project_id: Some("project".to_string()),
        api_key: Some("api-key".to_string()),
    })
}

async fn get(router: &Router, uri: &str) -> Result<(StatusCode, Vec<u8>)> {
    let response = router
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty())?)
        .await?;
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    Ok((status, body.to_vec()))
}

async fn get_status(router: &Router, uri: &str) -> Result<(StatusCode, StatusResponse)> {
    let (status, body) = get(router, uri).await?;
    Ok((status, serde_json::from_slice(&body)?))
}

#[tokio::test]
async fn test_healthz_returns_no_content() -> Result<()> {
    let app = app()?;

    let (status, body) = get(&app.router, "/healthz").await?;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(body.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_start_and_stop_room() -> Result<()> {
    let app = app()?;

    let (status, body) = get_status(&app.router, "/start?room_id=room-1").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.status, "success");
    assert_eq!(body.message, "Room joined successfully");
    assert!(app.registry.contains("room-1").await);

    let (status, body) = get(&app.router, "/sessions").await?;
    assert_eq!(status, StatusCode::OK);
    let sessions: Vec<SessionInfo> = serde_json::from_slice(&body)?;
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].room_id, "room-1");

    let (status, body) = get_status(&app.router, "/stop?room_id=room-1").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.status, "success");
    assert_eq!(body.message, "Room room-1 stopped successfully");
    assert!(!app.registry.contains("room-1").await);

    Ok(())
}

#[tokio::test]
async fn test_missing_room_id_is_bad_request() -> Result<()> {
    let app = app()?;

    let (status, _) = get_status(&app.router, "/start").await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = get_status(&app.router, "/stop?room_id=").await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert_eq!(app.hub.join_count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_start_twice_conflicts() -> Result<()> {
    let app = app()?;

    let (status, _) = get_status(&app.router, "/start?room_id=room-1").await?;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = get_status(&app.router, "/start?room_id=room-1").await?;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body.status, "already_running");
    assert_eq!(app.hub.join_count(), 1);

    app.registry.stop_all().await;
    Ok(())
}

#[tokio::test]
async fn test_stop_unknown_room_is_not_found() -> Result<()> {
    let app = app()?;

    let (status, body) = get_status(&app.router, "/stop?room_id=room-404").await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body.status, "not_found");

    Ok(())
}

#[tokio::test]
async fn test_missing_credentials_is_server_error() -> Result<()> {
    let app = app_with(PlatformConfig::default())?;

    let (status, body) = get_status(&app.router, "/start?room_id=room-2").await?;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body.status, "error");
    assert!(!app.registry.contains("room-2").await);
    assert_eq!(app.hub.join_count(), 0);

    Ok(())
}

#[tokio::test]
async fn test_join_failure_is_server_error() -> Result<()> {
    let app = app()?;
    app.hub.reject_room("room-3");

    let (status, body) = get_status(&app.router, "/start?room_id=room-3").await?;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body.message.contains("room-3"));
    assert!(app.registry.list().is_empty());

    Ok(())
}

#[tokio::test]
async fn test_leave_failure_is_server_error_and_session_removed() -> Result<()> {
    let app = app()?;

    let (status, _) = get_status(&app.router, "/start?room_id=room-1").await?;
    assert_eq!(status, StatusCode::OK);

    app.hub.set_fail_leave(true);
    let (status, body) = get_status(&app.router, "/stop?room_id=room-1").await?;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body.status, "error");

    let (status, _) = get_status(&app.router, "/stop?room_id=room-1").await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    Ok(())
}
