pub mod monitor;
pub mod protocol;
pub mod queue;

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use tempfile::TempPath;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use crate::api::Track;
use crate::config::AppConfig;
use crate::downloader::http_pool::HttpPool;
use crate::downloader::NO_DOWNLOAD_URL;
use crate::errors::{AppError, Result};
use crate::utils::find_executable;
use monitor::{spawn_monitor, PlaybackClock};
use protocol::PlayerCommand;

/// How long the player gets to exit after `quit` before it is killed.
pub const QUIT_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaybackState {
    Idle,
    Loading,
    Playing,
    Paused,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackStatus {
    pub state: PlaybackState,
    pub track: Option<Track>,
    pub position: f64,
    pub duration: f64,
    /// The player closed its output, normally because the track ran out.
    pub finished: bool,
}

struct ActiveSession {
    child: Child,
    stdin: Option<ChildStdin>,
    temp_file: Option<TempPath>,
    track: Track,
    monitor: JoinHandle<()>,
    paused: bool,
}

impl ActiveSession {
    async fn send(&mut self, command: PlayerCommand) -> bool {
        let Some(stdin) = self.stdin.as_mut() else {
            return false;
        };

        let line = format!("{}\n", command.to_line());
        let result = match stdin.write_all(line.as_bytes()).await {
            Ok(()) => stdin.flush().await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => true,
            Err(e) => {
                log::warn!("[PLAYER] Failed to send {:?}: {}", command, e);
                false
            }
        }
    }

    /// Asks the player to quit, kills it if it lingers, removes the temp file.
    ///
    /// The graceful request is `quit` followed by closing stdin; slave-mode
    /// mplayer exits on either. No SIGTERM is sent in between, a player that
    /// ignores both gets SIGKILL after [`QUIT_TIMEOUT`].
    async fn teardown(mut self) {
        if let Some(mut stdin) = self.stdin.take() {
            let line = format!("{}\n", PlayerCommand::Quit.to_line());
            let delivered = match stdin.write_all(line.as_bytes()).await {
                Ok(()) => stdin.flush().await,
                Err(e) => Err(e),
            };
            if let Err(e) = delivered {
                log::debug!("[PLAYER] quit not delivered: {}", e);
            }
        }

        match tokio::time::timeout(QUIT_TIMEOUT, self.child.wait()).await {
            Ok(Ok(status)) => log::debug!("[PLAYER] Player exited with {}", status),
            Ok(Err(e)) => log::warn!("[PLAYER] Waiting for player failed: {}", e),
            Err(_) => {
                log::warn!("[PLAYER] Player ignored quit, killing it");
                if let Err(e) = self.child.kill().await {
                    log::warn!("[PLAYER] Failed to kill player: {}", e);
                }
            }
        }

        self.monitor.abort();

        if let Some(temp_file) = self.temp_file.take() {
            let path = temp_file.to_path_buf();
            if let Err(e) = temp_file.close() {
                log::warn!("[PLAYER] Could not remove temp file {:?}: {}", path, e);
            }
        }
    }
}

/// Plays one track at a time through an external mplayer process.
///
/// The track is first downloaded to a temporary file, then handed to the
/// player in slave mode; commands go to its stdin and a monitor task reads
/// positions from its stdout. Starting a new track, `stop()` and dropping the
/// controller all tear the current session down.
pub struct PlaybackController {
    http_pool: Arc<HttpPool>,
    player_path: String,
    player_args: Vec<String>,
    temp_dir: PathBuf,
    session: Mutex<Option<ActiveSession>>,
    clock: Arc<PlaybackClock>,
    /// Bumped by every `play`/`stop`; a load whose generation is stale gives up.
    generation: AtomicU64,
    /// Generation currently downloading, 0 when none.
    loading: AtomicU64,
}

impl PlaybackController {
    pub fn new(http_pool: Arc<HttpPool>, config: &AppConfig) -> Self {
        Self {
            http_pool,
            player_path: config.player_path.clone(),
            player_args: config.player_args.clone(),
            temp_dir: std::env::temp_dir(),
            session: Mutex::new(None),
            clock: Arc::new(PlaybackClock::default()),
            generation: AtomicU64::new(0),
            loading: AtomicU64::new(0),
        }
    }

    /// Directory for the per-track temporary files.
    pub fn with_temp_dir(mut self, temp_dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = temp_dir.into();
        self
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    async fn take_session(&self) -> Option<ActiveSession> {
        self.session.lock().await.take()
    }

    /// Stops whatever is playing, downloads `track` and starts the player.
    ///
    /// Fails with [`AppError::Superseded`] when another `play` or a `stop`
    /// arrived while this one was still downloading.
    pub async fn play(&self, track: &Track) -> Result<()> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        if let Some(previous) = self.take_session().await {
            log::info!("[PLAYER] Stopping {} for new track", previous.track.display_name());
            previous.teardown().await;
        }
        self.clock.reset(0.0);

        let url = track
            .url
            .as_deref()
            .ok_or_else(|| AppError::Download(NO_DOWNLOAD_URL.to_string()))?;

        let loading = LoadingMarker::set(&self.loading, generation);
        let result = self.load_and_spawn(track, url, generation).await;
        drop(loading);

        if let Err(e) = &result {
            match e {
                AppError::Superseded => log::debug!("[PLAYER] Load of {} superseded", track.display_name()),
                other => log::error!("[PLAYER] Could not play {}: {}", track.display_name(), other),
            }
        }
        result
    }

    async fn load_and_spawn(&self, track: &Track, url: &str, generation: u64) -> Result<()> {
        let temp_path = tempfile::Builder::new()
            .prefix("vk-music-")
            .suffix(".mp3")
            .tempfile_in(&self.temp_dir)?
            .into_temp_path();

        log::info!("[PLAYER] Loading {}", track.display_name());
        self.http_pool.stream_to_file(url, &temp_path).await?;

        let mut guard = self.session.lock().await;
        if !self.is_current(generation) {
            drop(guard);
            discard_temp(temp_path);
            return Err(AppError::Superseded);
        }

        if let Some(stale) = guard.take() {
            stale.teardown().await;
        }

        self.clock.reset(track.duration as f64);
        let mut child = match Command::new(&self.player_path)
            .args(&self.player_args)
            .arg(&*temp_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                self.clock.reset(0.0);
                discard_temp(temp_path);
                return Err(AppError::Process(format!(
                    "Failed to start {}: {}",
                    self.player_path, e
                )));
            }
        };

        let stdin = child.stdin.take();
        let monitor = match child.stdout.take() {
            Some(stdout) => spawn_monitor(BufReader::new(stdout), self.clock.clone()),
            None => tokio::spawn(async {}),
        };

        *guard = Some(ActiveSession {
            child,
            stdin,
            temp_file: Some(temp_path),
            track: track.clone(),
            monitor,
            paused: false,
        });

        log::info!("[PLAYER] Playing {}", track.display_name());
        Ok(())
    }

    /// Toggles pause. `false` when nothing is playing.
    pub async fn pause(&self) -> bool {
        let mut guard = self.session.lock().await;
        let Some(session) = guard.as_mut() else {
            return false;
        };

        if !session.send(PlayerCommand::Pause).await {
            return false;
        }
        session.paused = !session.paused;
        log::debug!("[PLAYER] {}", if session.paused { "Paused" } else { "Resumed" });
        true
    }

    /// Absolute seek. Only while playing; the position is updated right away.
    pub async fn seek(&self, seconds: f64) -> bool {
        let mut guard = self.session.lock().await;
        let Some(session) = guard.as_mut().filter(|s| !s.paused) else {
            return false;
        };

        let seconds = seconds.max(0.0);
        if !session.send(PlayerCommand::Seek(seconds)).await {
            return false;
        }
        self.clock.position.set(seconds);
        true
    }

    /// Volume in percent, clamped to 0-100. Only while playing.
    pub async fn set_volume(&self, level: u8) -> bool {
        let mut guard = self.session.lock().await;
        match guard.as_mut().filter(|s| !s.paused) {
            Some(session) => session.send(PlayerCommand::Volume(level.min(100))).await,
            None => false,
        }
    }

    /// Ends the session, if any, and cancels a pending load.
    pub async fn stop(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.loading.store(0, Ordering::SeqCst);
        if let Some(session) = self.take_session().await {
            log::info!("[PLAYER] Stopping {}", session.track.display_name());
            session.teardown().await;
        }
        self.clock.reset(0.0);
    }

    /// Asks the player for a fresh position and returns a snapshot. Meant to
    /// be called about once a second; the answer lands on a later poll.
    pub async fn poll_status(&self) -> PlaybackStatus {
        {
            let mut guard = self.session.lock().await;
            if let Some(session) = guard.as_mut() {
                if !self.clock.has_ended() {
                    session.send(PlayerCommand::GetTimePos).await;
                }
            }
        }
        self.status().await
    }

    pub async fn status(&self) -> PlaybackStatus {
        let guard = self.session.lock().await;
        let state = match guard.as_ref() {
            Some(session) if session.paused => PlaybackState::Paused,
            Some(_) => PlaybackState::Playing,
            None if self.loading.load(Ordering::SeqCst) != 0 => PlaybackState::Loading,
            None => PlaybackState::Idle,
        };

        PlaybackStatus {
            state,
            track: guard.as_ref().map(|s| s.track.clone()),
            position: self.clock.position.get(),
            duration: self.clock.duration.get(),
            finished: guard.is_some() && self.clock.has_ended(),
        }
    }

    pub async fn state(&self) -> PlaybackState {
        self.status().await.state
    }

    /// Seconds into the current track.
    pub fn position(&self) -> f64 {
        self.clock.position.get()
    }

    /// Length of the current track in seconds; 0 when unknown.
    pub fn duration(&self) -> f64 {
        self.clock.duration.get()
    }

    pub async fn child_id(&self) -> Option<u32> {
        self.session.lock().await.as_ref().and_then(|s| s.child.id())
    }
}

impl Drop for PlaybackController {
    fn drop(&mut self) {
        if let Some(mut session) = self.session.get_mut().take() {
            if let Err(e) = session.child.start_kill() {
                log::debug!("[PLAYER] Kill on drop failed: {}", e);
            }
            session.monitor.abort();
            if let Some(temp_file) = session.temp_file.take() {
                discard_temp(temp_file);
            }
        }
    }
}

/// Marks a generation as loading until dropped, so a `play` future that is
/// cancelled mid-download does not leave the controller reporting `Loading`.
struct LoadingMarker<'a> {
    loading: &'a AtomicU64,
    generation: u64,
}

impl<'a> LoadingMarker<'a> {
    fn set(loading: &'a AtomicU64, generation: u64) -> Self {
        loading.store(generation, Ordering::SeqCst);
        Self { loading, generation }
    }
}

impl Drop for LoadingMarker<'_> {
    fn drop(&mut self) {
        let _ = self
            .loading
            .compare_exchange(self.generation, 0, Ordering::SeqCst, Ordering::SeqCst);
    }
}

fn discard_temp(temp_file: TempPath) {
    let path = temp_file.to_path_buf();
    if let Err(e) = temp_file.close() {
        log::warn!("[PLAYER] Could not remove temp file {:?}: {}", path, e);
    }
}

/// Locates the configured player executable.
pub fn check_dependencies(player_path: &str) -> Result<PathBuf> {
    find_executable(player_path).ok_or_else(|| {
        AppError::NotFound(format!("{} not found; install it or set player_path", player_path))
    })
}

/// `true` if `path` looks like one of our per-track temp files.
pub fn is_player_temp_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with("vk-music-") && n.ends_with(".mp3"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{test_config, MediaServer};

    fn track(url: Option<String>) -> Track {
        Track {
            id: 9,
            owner_id: 1,
            artist: "Artist".to_string(),
            title: "Song".to_string(),
            duration: 215,
            url,
        }
    }

    fn controller(script: &str, temp_dir: &Path) -> PlaybackController {
        let mut config = test_config();
        config.player_path = "sh".to_string();
        config.player_args = vec!["-c".to_string(), script.to_string()];
        let pool = Arc::new(HttpPool::new(&config).unwrap());
        PlaybackController::new(pool, &config).with_temp_dir(temp_dir)
    }

    /// Everything the player script logged to `<temp file>.log`.
    fn player_log(dir: &Path) -> Vec<String> {
        let log = std::fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .find(|p| p.extension().map(|ext| ext == "log").unwrap_or(false))
            .unwrap();
        std::fs::read_to_string(log)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    fn temp_files(dir: &Path) -> usize {
        std::fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| is_player_temp_file(&e.path()))
            .count()
    }

    #[tokio::test]
    async fn controls_without_session_do_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let player = controller("cat >/dev/null", dir.path());

        assert!(!player.pause().await);
        assert!(!player.seek(30.0).await);
        assert!(!player.set_volume(50).await);
        assert_eq!(player.position(), 0.0);
        assert_eq!(player.state().await, PlaybackState::Idle);
        player.stop().await;
    }

    #[tokio::test]
    async fn track_without_url_never_spawns() {
        let dir = tempfile::tempdir().unwrap();
        let player = controller("cat >/dev/null", dir.path());

        let err = player.play(&track(None)).await.unwrap_err();

        assert!(err.to_string().contains(NO_DOWNLOAD_URL));
        assert!(player.child_id().await.is_none());
        assert_eq!(temp_files(dir.path()), 0);
    }

    #[tokio::test]
    async fn failed_download_returns_to_idle() {
        let server = MediaServer::start(404, Vec::new()).await;
        let dir = tempfile::tempdir().unwrap();
        let player = controller("cat >/dev/null", dir.path());

        assert!(player.play(&track(Some(server.url("/gone.mp3")))).await.is_err());
        assert_eq!(player.state().await, PlaybackState::Idle);
        assert_eq!(temp_files(dir.path()), 0);
    }

    #[tokio::test]
    async fn missing_player_is_a_process_error() {
        let server = MediaServer::start(200, b"mp3".to_vec()).await;
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config();
        config.player_path = "/nonexistent/mplayer".to_string();
        let pool = Arc::new(HttpPool::new(&config).unwrap());
        let player = PlaybackController::new(pool, &config).with_temp_dir(dir.path());

        let err = player.play(&track(Some(server.url("/a.mp3")))).await.unwrap_err();

        assert!(matches!(err, AppError::Process(_)));
        assert_eq!(temp_files(dir.path()), 0);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn second_play_replaces_first_session() {
        let server = MediaServer::start(200, b"mp3".to_vec()).await;
        let dir = tempfile::tempdir().unwrap();
        let player = controller("cat >/dev/null", dir.path());

        player.play(&track(Some(server.url("/a.mp3")))).await.unwrap();
        let first = player.child_id().await.unwrap();
        player.play(&track(Some(server.url("/b.mp3")))).await.unwrap();
        let second = player.child_id().await.unwrap();

        assert_ne!(first, second);
        assert!(!Path::new(&format!("/proc/{}", first)).exists());
        assert_eq!(temp_files(dir.path()), 1);
        assert_eq!(player.state().await, PlaybackState::Playing);
        assert_eq!(player.duration(), 215.0);

        player.stop().await;
        assert_eq!(temp_files(dir.path()), 0);
        assert_eq!(player.state().await, PlaybackState::Idle);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn concurrent_plays_leave_one_session() {
        let server = MediaServer::start(200, b"mp3".to_vec()).await;
        let dir = tempfile::tempdir().unwrap();
        let player = controller("cat >/dev/null", dir.path());
        let (a, b) = (track(Some(server.url("/a.mp3"))), track(Some(server.url("/b.mp3"))));

        let (first, second) = tokio::join!(player.play(&a), player.play(&b));

        for result in [first, second] {
            assert!(matches!(result, Ok(()) | Err(AppError::Superseded)));
        }
        assert!(player.child_id().await.is_some());
        assert_eq!(temp_files(dir.path()), 1);
        player.stop().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn pause_seek_and_position_updates() {
        let server = MediaServer::start(200, b"mp3".to_vec()).await;
        let dir = tempfile::tempdir().unwrap();
        let player = controller(r#"echo ANS_TIME_POSITION=42.5; cat > "$0.log""#, dir.path());

        player.play(&track(Some(server.url("/a.mp3")))).await.unwrap();

        for _ in 0..100 {
            if player.position() == 42.5 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(player.position(), 42.5);

        assert!(player.seek(100.0).await);
        assert_eq!(player.position(), 100.0);
        assert!(player.set_volume(80).await);

        assert!(player.pause().await);
        assert_eq!(player.state().await, PlaybackState::Paused);
        assert!(!player.seek(10.0).await);
        assert!(!player.set_volume(10).await);
        assert!(player.pause().await);

        let status = player.poll_status().await;
        assert_eq!(status.state, PlaybackState::Playing);
        assert_eq!(status.track.unwrap().title, "Song");

        let started = std::time::Instant::now();
        player.stop().await;
        assert!(started.elapsed() < QUIT_TIMEOUT);

        assert_eq!(
            player_log(dir.path()),
            vec![
                "seek 100 2",
                "volume 80 1",
                "pause",
                "pause",
                "pausing_keep_force get_time_pos",
                "quit",
            ]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cancelled_load_returns_to_idle() {
        let server = MediaServer::silent().await;
        let dir = tempfile::tempdir().unwrap();
        let player = Arc::new(controller("cat >/dev/null", dir.path()));
        let song = track(Some(server.url("/slow.mp3")));

        let loading = {
            let player = player.clone();
            tokio::spawn(async move { player.play(&song).await })
        };
        for _ in 0..100 {
            if server.hits() > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(player.state().await, PlaybackState::Loading);

        loading.abort();
        assert!(loading.await.unwrap_err().is_cancelled());

        assert_eq!(player.state().await, PlaybackState::Idle);
        assert_eq!(temp_files(dir.path()), 0);
    }

    #[tokio::test]
    async fn stop_clears_pending_load() {
        let dir = tempfile::tempdir().unwrap();
        let player = controller("cat >/dev/null", dir.path());
        player.loading.store(7, Ordering::SeqCst);

        assert_eq!(player.state().await, PlaybackState::Loading);
        player.stop().await;
        assert_eq!(player.state().await, PlaybackState::Idle);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stubborn_player_is_killed() {
        let server = MediaServer::start(200, b"mp3".to_vec()).await;
        let dir = tempfile::tempdir().unwrap();
        let player = controller("sleep 30", dir.path());

        player.play(&track(Some(server.url("/a.mp3")))).await.unwrap();
        let started = std::time::Instant::now();
        player.stop().await;

        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(player.child_id().await.is_none());
        assert_eq!(temp_files(dir.path()), 0);
    }

    #[test]
    fn dependency_check_reports_missing_player() {
        assert!(check_dependencies("definitely-not-a-player-binary").is_err());
        #[cfg(unix)]
        assert!(check_dependencies("sh").is_ok());
    }
}
