use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::{
    extract::{FromRequest, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::warn;

use crate::error::{PlayerError, Result};
use crate::player::{Player, StatusSnapshot};

/// Shared handler state. All commands serialize on the one player lock.
#[derive(Clone)]
pub struct AppState {
    pub player: Arc<tokio::sync::Mutex<Player>>,
}

impl AppState {
    pub fn new(player: Player) -> Self {
        Self { player: Arc::new(tokio::sync::Mutex::new(player)) }
    }
}

pub fn build_router(state: AppState, ui_dir: Option<&Path>) -> Router {
    let router = Router::new()
        .route("/status", get(status))
        .route("/health", get(|| async { "OK" }))
        .route("/play", post(play))
        .route("/stop", post(stop))
        .route("/pause", post(pause))
        .route("/next", post(next))
        .route("/volume", post(volume))
        .route("/seek", post(seek))
        .route("/reorder", post(reorder))
        .route("/reorder_songs", post(reorder_songs))
        .route("/set_playlist_volume", post(set_playlist_volume))
        .route("/set_playlist_auto_advance", post(set_playlist_auto_advance))
        .route("/set_playlist_loop", post(set_playlist_loop))
        .route("/set_playlist_transition_mode", post(set_playlist_transition_mode))
        .route("/next_playlist", post(next_playlist))
        .route("/rename_playlist", post(rename_playlist))
        .route("/rename_song", post(rename_song));

    // The UI (if any) is plain static files; without one `/` is a banner.
    let router = match ui_dir {
        Some(dir) => router.fallback_service(ServeDir::new(dir)),
        None => router.route("/", get(root)),
    };

    router.layer(TraceLayer::new_for_http()).with_state(state)
}

async fn root() -> &'static str {
    "PlayDeck engine is running. Try GET /status"
}

/// `Json` whose rejections (bad syntax, missing or mistyped fields) answer
/// with the same error envelope as every other failure.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(PlayerError))]
struct ApiJson<T>(T);

fn success(message: impl Into<String>) -> Json<Value> {
    Json(json!({ "status": "success", "message": message.into() }))
}

fn require(value: &str, what: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(PlayerError::Validation(format!("Missing {what}")));
    }
    Ok(())
}

// --- Requests -------------------------------------------------------------

#[derive(Deserialize)]
struct PlayReq {
    playlist: String,
}

#[derive(Deserialize)]
struct VolumeReq {
    volume: i64,
}

#[derive(Deserialize)]
struct SeekReq {
    position: f64,
}

#[derive(Deserialize)]
struct ReorderReq {
    order: Vec<String>,
}

#[derive(Deserialize)]
struct ReorderSongsReq {
    playlist_name: String,
    new_song_order: Vec<PathBuf>,
}

#[derive(Deserialize)]
struct PlaylistVolumeReq {
    playlist_name: String,
    #[serde(default)]
    volume: Option<i64>,
}

#[derive(Deserialize)]
struct PlaylistFlagReq {
    playlist_name: String,
    enabled: bool,
}

#[derive(Deserialize)]
struct TransitionModeReq {
    playlist_name: String,
    mode: String,
}

#[derive(Deserialize)]
struct RenamePlaylistReq {
    old_name: String,
    new_name: String,
}

#[derive(Deserialize)]
struct RenameSongReq {
    playlist_name: String,
    old_name: String,
    new_name: String,
}

// --- Handlers -------------------------------------------------------------

async fn status(State(state): State<AppState>) -> Json<StatusSnapshot> {
    let mut player = state.player.lock().await;
    Json(player.poll())
}

async fn play(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<PlayReq>,
) -> Result<Json<Value>> {
    require(&req.playlist, "playlist name")?;
    state.player.lock().await.play(&req.playlist)?;
    Ok(success(format!("Playing playlist {}", req.playlist)))
}

async fn stop(State(state): State<AppState>) -> Json<Value> {
    state.player.lock().await.stop();
    success("Playback stopped")
}

async fn pause(State(state): State<AppState>) -> Result<Json<Value>> {
    let outcome = state.player.lock().await.toggle_pause()?;
    Ok(success(outcome.message()))
}

async fn next(State(state): State<AppState>) -> Result<Json<Value>> {
    let outcome = state.player.lock().await.next()?;
    Ok(success(outcome.message()))
}

async fn volume(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<VolumeReq>,
) -> Result<Json<Value>> {
    if !(0..=100).contains(&req.volume) {
        return Err(PlayerError::Validation("Invalid volume value provided".into()));
    }
    let v = state.player.lock().await.set_volume(req.volume);
    Ok(Json(json!({ "status": "success", "message": format!("Volume set to {v}%"), "volume": v })))
}

async fn seek(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<SeekReq>,
) -> Result<Json<Value>> {
    let outcome = state.player.lock().await.seek(req.position)?;
    Ok(success(outcome.message()))
}

async fn reorder(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<ReorderReq>,
) -> Result<Json<Value>> {
    let order = state.player.lock().await.reorder_playlists(req.order)?;
    Ok(Json(json!({
        "status": "success",
        "message": "Playlist order updated",
        "new_order": order,
    })))
}

async fn reorder_songs(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<ReorderSongsReq>,
) -> Result<Json<Value>> {
    require(&req.playlist_name, "playlist name")?;
    state
        .player
        .lock()
        .await
        .reorder_songs(&req.playlist_name, req.new_song_order)?;
    Ok(success(format!("Song order updated for {}", req.playlist_name)))
}

async fn set_playlist_volume(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<PlaylistVolumeReq>,
) -> Result<Json<Value>> {
    require(&req.playlist_name, "playlist name")?;
    let v = state
        .player
        .lock()
        .await
        .set_playlist_volume(&req.playlist_name, req.volume)?;
    let shown = v.map_or("unset".to_string(), |v| v.to_string());
    Ok(Json(json!({
        "status": "success",
        "message": format!("Default volume for {} set to {shown}", req.playlist_name),
        "volume": v,
    })))
}

async fn set_playlist_auto_advance(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<PlaylistFlagReq>,
) -> Result<Json<Value>> {
    require(&req.playlist_name, "playlist name")?;
    state
        .player
        .lock()
        .await
        .set_playlist_auto_advance(&req.playlist_name, req.enabled)?;
    Ok(Json(json!({
        "status": "success",
        "message": format!("Auto-advance for {} set to {}", req.playlist_name, req.enabled),
        "auto_advance_enabled": req.enabled,
    })))
}

async fn set_playlist_loop(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<PlaylistFlagReq>,
) -> Result<Json<Value>> {
    require(&req.playlist_name, "playlist name")?;
    state
        .player
        .lock()
        .await
        .set_playlist_loop(&req.playlist_name, req.enabled)?;
    Ok(Json(json!({
        "status": "success",
        "message": format!("Loop for {} set to {}", req.playlist_name, req.enabled),
        "loop_enabled": req.enabled,
    })))
}

async fn set_playlist_transition_mode(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<TransitionModeReq>,
) -> Result<Json<Value>> {
    require(&req.playlist_name, "playlist name")?;
    let mode = state
        .player
        .lock()
        .await
        .set_playlist_transition_mode(&req.playlist_name, &req.mode)?;
    Ok(Json(json!({
        "status": "success",
        "message": format!("Transition mode for {} set to {mode}", req.playlist_name),
        "transition_mode": mode,
    })))
}

async fn next_playlist(State(state): State<AppState>) -> Result<Json<Value>> {
    let outcome = state.player.lock().await.request_playlist_transition()?;
    Ok(Json(json!({
        "status": "success",
        "message": outcome.message(),
        "next_playlist": outcome.target(),
    })))
}

async fn rename_playlist(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<RenamePlaylistReq>,
) -> Result<Json<Value>> {
    require(&req.old_name, "old playlist name")?;
    require(&req.new_name, "new playlist name")?;
    state
        .player
        .lock()
        .await
        .rename_playlist(&req.old_name, &req.new_name)?;
    Ok(Json(json!({
        "status": "success",
        "message": format!("Renamed playlist from {} to {}", req.old_name, req.new_name),
        "new_name": req.new_name,
    })))
}

async fn rename_song(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<RenameSongReq>,
) -> Result<Json<Value>> {
    require(&req.playlist_name, "playlist name")?;
    require(&req.old_name, "old song name")?;
    require(&req.new_name, "new song name")?;
    let refresh = state
        .player
        .lock()
        .await
        .rename_song(&req.playlist_name, &req.old_name, &req.new_name)?;

    // Measuring spawns ffprobe per track; keep it off the lock.
    let (playlist, minutes) = match tokio::task::spawn_blocking(move || refresh.measure()).await {
        Ok(measured) => measured,
        Err(e) => {
            warn!("runtime recalculation for '{}' failed: {e}", req.playlist_name);
            (req.playlist_name.clone(), 0.0)
        }
    };
    state.player.lock().await.record_runtime(playlist, minutes);
    Ok(Json(json!({
        "status": "success",
        "message": format!("Renamed song from {} to {}", req.old_name, req.new_name),
        "new_name": req.new_name,
        "runtime_minutes": minutes,
    })))
}
