use std::sync::Arc;
use std::time::Duration;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::io::{AsyncBufReadExt, BufReader};
use crate::api::client::VkApiClient;
use crate::api::repository::{AudioRepository, FeedSource, TrackFeed};
use crate::api::session::{Session, SharedSession};
use crate::api::{AccountInfo, Collection, Playlist, Track};
use crate::config::AppConfig;
use crate::downloader::http_pool::HttpPool;
use crate::downloader::{BatchReport, DownloadManager, DownloadedFile};
use crate::errors::{AppError, Result};
use crate::player::queue::PlayQueue;
use crate::player::{check_dependencies, PlaybackController, PlaybackState, PlaybackStatus};
use crate::tasks::{TaskEvent, TaskPool};
use crate::utils::{format_duration, format_file_size};

// State management
pub struct AppState {
    pub config: AppConfig,
    pub session: SharedSession,
    pub repository: Arc<AudioRepository>,
    pub download_manager: Arc<DownloadManager>,
    pub player: Arc<PlaybackController>,
}

impl AppState {
    pub fn new(config: AppConfig) -> Result<Self> {
        let http_pool = Arc::new(HttpPool::new(&config)?);
        let transport = Arc::new(VkApiClient::new(http_pool.clone(), &config));
        let session = Session::new().shared();
        let repository = Arc::new(AudioRepository::new(transport, session.clone(), &config));
        let download_manager = Arc::new(DownloadManager::new(http_pool.clone(), &config.download_path)?);
        let player = Arc::new(PlaybackController::new(http_pool, &config));

        Ok(Self {
            config,
            session,
            repository,
            download_manager,
            player,
        })
    }

    fn with_session<R>(&self, f: impl FnOnce(&mut Session) -> R) -> R {
        let mut session = self
            .session
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut session)
    }

    pub fn use_token(&self, token: &str) {
        self.with_session(|session| session.set_token(token));
    }

    /// Loads the saved token. Returns `false` when there is none yet.
    pub fn restore_session(&self) -> Result<bool> {
        let token_file = self.config.token_file.clone();
        match self.with_session(|session| session.load_token_from_file(&token_file)) {
            Ok(()) => Ok(true),
            Err(AppError::NotFound(msg)) => {
                log::debug!("[AUTH] {}", msg);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}

/// What a track listing is built from.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackSource {
    MyAudio,
    Recommendations,
    Popular,
    Playlist { id: i64, refresh: bool },
    Search { query: String, max_results: Option<usize> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    /// Every page, through the aggregator.
    All,
    Page { offset: usize, count: usize },
}

#[derive(Debug, Clone)]
pub struct TrackListing {
    pub tracks: Vec<Track>,
    pub total_count: usize,
    /// Shown above the list, e.g. when recommendations fell back to search.
    pub note: Option<String>,
}

impl TrackListing {
    fn from_collection(collection: Collection<Track>, note: Option<String>) -> Self {
        Self {
            total_count: collection.total_count,
            tracks: collection.items,
            note,
        }
    }

    fn from_feed(feed: TrackFeed, requested: &TrackSource) -> Self {
        let note = match (&feed.source, requested) {
            (FeedSource::Recommendations, _) => None,
            (FeedSource::Popular { query }, TrackSource::Recommendations) => Some(format!(
                "Recommendations unavailable, showing popular tracks for \"{}\"",
                query
            )),
            (FeedSource::Popular { query }, _) => Some(format!("Popular tracks for \"{}\"", query)),
        };
        Self::from_collection(feed.tracks, note)
    }
}

fn progress_bar(message: &str) -> ProgressBar {
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template("{msg} [{bar:30}] {pos}/{len}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    bar.set_message(message.to_string());
    bar
}

pub async fn login(state: &AppState, token: Option<String>, save: bool) -> Result<AccountInfo> {
    let token = match token {
        Some(token) => token,
        None => rpassword::prompt_password("VK access token: ")?,
    };
    state.use_token(&token);

    let account = state.repository.validate_token().await?;
    if save {
        let token_file = state.config.token_file.clone();
        state.with_session(|session| session.save_token_to_file(&token_file))?;
    }
    Ok(account)
}

pub async fn whoami(state: &AppState) -> Result<AccountInfo> {
    state.repository.validate_token().await
}

pub async fn fetch_tracks(state: &AppState, source: &TrackSource, mode: FetchMode) -> Result<TrackListing> {
    let repo = &state.repository;
    let bar = progress_bar("Loading");
    let mut report = |loaded: usize, total: usize| {
        bar.set_length(total as u64);
        bar.set_position(loaded as u64);
    };

    let listing = match (source, mode) {
        (TrackSource::MyAudio, FetchMode::All) => {
            TrackListing::from_collection(repo.all_my_audio(Some(&mut report)).await?, None)
        }
        (TrackSource::MyAudio, FetchMode::Page { offset, count }) => {
            TrackListing::from_collection(repo.my_audio_page(offset, count).await?, None)
        }
        (TrackSource::Recommendations, FetchMode::All) => {
            TrackListing::from_feed(repo.all_recommendations(Some(&mut report)).await?, source)
        }
        (TrackSource::Recommendations, FetchMode::Page { offset, count }) => {
            TrackListing::from_feed(repo.recommendations_page(offset, count).await?, source)
        }
        (TrackSource::Popular, FetchMode::All) => {
            let count = state.config.recommendations_page_size;
            TrackListing::from_feed(repo.popular_page(0, count).await?, source)
        }
        (TrackSource::Popular, FetchMode::Page { offset, count }) => {
            TrackListing::from_feed(repo.popular_page(offset, count).await?, source)
        }
        (TrackSource::Playlist { id, refresh }, FetchMode::All) => {
            let tracks = if *refresh {
                repo.refresh_playlist_tracks(*id, Some(&mut report)).await?
            } else {
                repo.all_playlist_tracks(*id, Some(&mut report)).await?
            };
            TrackListing::from_collection(tracks, None)
        }
        (TrackSource::Playlist { id, .. }, FetchMode::Page { offset, count }) => {
            TrackListing::from_collection(repo.playlist_tracks_page(*id, offset, count).await?, None)
        }
        (TrackSource::Search { query, max_results }, FetchMode::All) => TrackListing::from_collection(
            repo.search_all(query, *max_results, Some(&mut report)).await?,
            None,
        ),
        (TrackSource::Search { query, .. }, FetchMode::Page { offset, count }) => {
            TrackListing::from_collection(repo.search_page(query, offset, count).await?, None)
        }
    };

    bar.finish_and_clear();
    Ok(listing)
}

pub async fn fetch_playlists(state: &AppState) -> Result<Vec<Playlist>> {
    let bar = progress_bar("Loading playlists");
    let mut report = |loaded: usize, total: usize| {
        bar.set_length(total as u64);
        bar.set_position(loaded as u64);
    };
    let playlists = state.repository.all_playlists(Some(&mut report)).await?;
    bar.finish_and_clear();
    Ok(playlists.items)
}

/// Picks tracks by 1-based position; an empty pick means all of them.
pub fn select_tracks(tracks: &[Track], picks: &[usize]) -> Result<Vec<Track>> {
    if picks.is_empty() {
        return Ok(tracks.to_vec());
    }

    picks
        .iter()
        .map(|&pick| {
            pick.checked_sub(1)
                .and_then(|index| tracks.get(index))
                .cloned()
                .ok_or_else(|| AppError::NotFound(format!("No track #{} in a list of {}", pick, tracks.len())))
        })
        .collect()
}

pub async fn download_tracks(state: &AppState, tracks: &[Track]) -> BatchReport {
    let bar = progress_bar("Downloading");
    bar.set_length(tracks.len() as u64);
    let mut report = |done: usize, _total: usize| bar.set_position(done as u64);

    let result = state.download_manager.download_all(tracks, Some(&mut report)).await;
    bar.finish_and_clear();
    result
}

pub fn list_downloads(state: &AppState) -> Result<Vec<DownloadedFile>> {
    state.download_manager.list_downloads()
}

pub fn check_player(state: &AppState) -> Result<std::path::PathBuf> {
    check_dependencies(&state.config.player_path)
}

// -- rendering --------------------------------------------------------------

pub fn format_track_line(position: usize, track: &Track) -> String {
    let marker = if track.url.is_some() { "" } else { "  (unavailable)" };
    format!(
        "{:>4}. {} [{}]{}",
        position,
        track.display_name(),
        format_duration(track.duration as f64),
        marker
    )
}

pub fn print_listing(listing: &TrackListing) {
    if let Some(note) = &listing.note {
        println!("{}", note);
    }
    for (i, track) in listing.tracks.iter().enumerate() {
        println!("{}", format_track_line(i + 1, track));
    }
    println!("{} of {} tracks", listing.tracks.len(), listing.total_count);
}

pub fn print_playlists(playlists: &[Playlist]) {
    for playlist in playlists {
        println!("{:>12}  {} ({} tracks)", playlist.id, playlist.title, playlist.count);
    }
    println!("{} playlists", playlists.len());
}

pub fn print_downloads(files: &[DownloadedFile]) {
    for file in files {
        let modified = file
            .modified
            .map(|m| m.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();
        println!("{:>10}  {}  {}", file.display_size(), modified, file.name);
    }
    let total: u64 = files.iter().map(|f| f.size).sum();
    println!("{} files, {}", files.len(), format_file_size(total));
}

pub fn print_batch_report(report: &BatchReport) {
    for path in &report.succeeded {
        println!("saved  {}", path.display());
    }
    for (track, error) in &report.failures {
        println!("failed {}: {}", track, error);
    }
    println!("{}/{} downloaded", report.succeeded.len(), report.total);
}

pub fn format_status(status: &PlaybackStatus) -> String {
    let label = match status.state {
        PlaybackState::Idle => return "stopped".to_string(),
        PlaybackState::Loading => "loading",
        PlaybackState::Playing => "playing",
        PlaybackState::Paused => "paused",
    };
    let title = status
        .track
        .as_ref()
        .map(Track::display_name)
        .unwrap_or_default();
    format!(
        "[{}] {} {} / {}",
        label,
        title,
        format_duration(status.position),
        format_duration(status.duration)
    )
}

// -- interactive player -----------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum PlayerInput {
    Next,
    Previous,
    TogglePause,
    Seek(f64),
    SeekBy(f64),
    Volume(u8),
    /// 0-based queue position.
    Select(usize),
    Status,
    List,
    Stop,
    Quit,
    Help,
    Unknown(String),
}

pub fn parse_player_input(line: &str) -> PlayerInput {
    let line = line.trim();
    let (command, argument) = match line.split_once(char::is_whitespace) {
        Some((command, argument)) => (command, argument.trim()),
        None => (line, ""),
    };

    match command.to_lowercase().as_str() {
        "" | "pause" | "p" => PlayerInput::TogglePause,
        "n" | "next" => PlayerInput::Next,
        "b" | "prev" | "previous" => PlayerInput::Previous,
        "s" | "status" => PlayerInput::Status,
        "l" | "list" => PlayerInput::List,
        "stop" => PlayerInput::Stop,
        "q" | "quit" | "exit" => PlayerInput::Quit,
        "h" | "help" | "?" => PlayerInput::Help,
        "seek" => match argument.parse::<f64>() {
            Ok(seconds) if argument.starts_with(['+', '-']) => PlayerInput::SeekBy(seconds),
            Ok(seconds) => PlayerInput::Seek(seconds),
            Err(_) => PlayerInput::Unknown(line.to_string()),
        },
        "vol" | "volume" => match argument.parse::<u32>() {
            Ok(level) => PlayerInput::Volume(level.min(100) as u8),
            Err(_) => PlayerInput::Unknown(line.to_string()),
        },
        other => match other.parse::<usize>() {
            Ok(position) if position > 0 => PlayerInput::Select(position - 1),
            _ => PlayerInput::Unknown(line.to_string()),
        },
    }
}

const PLAYER_HELP: &str = "\
commands: <enter>/p pause  n next  b previous  <number> play track
          seek <s> | seek +/-<s>  vol <0-100>  s status  l list  stop  q quit";

fn spawn_play(pool: &TaskPool<String>, player: &Arc<PlaybackController>, track: Track) {
    let player = player.clone();
    println!("Loading {} ...", track.display_name());
    pool.spawn("play", move |_| async move {
        player.play(&track).await?;
        Ok(track.display_name())
    });
}

/// Interactive playback over `tracks`, driven by stdin lines.
pub async fn run_player(state: &AppState, tracks: Vec<Track>, start: usize) -> Result<()> {
    check_player(state)?;

    let player = state.player.clone();
    let mut queue = PlayQueue::new();
    queue.set_tracks(tracks);
    let (pool, mut events) = TaskPool::<String>::new(state.config.max_concurrent_tasks);

    match queue.select(start).cloned() {
        Some(track) => spawn_play(&pool, &player, track),
        None => return Err(AppError::NotFound("Nothing to play".to_string())),
    }
    println!("{}", PLAYER_HELP);

    let superseded = AppError::Superseded.to_string();
    let mut input = BufReader::new(tokio::io::stdin()).lines();
    let mut ticker = tokio::time::interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            line = input.next_line() => {
                let Some(line) = line? else { break };
                match parse_player_input(&line) {
                    PlayerInput::Next => match queue.next().cloned() {
                        Some(track) => spawn_play(&pool, &player, track),
                        None => println!("Already at the last track"),
                    },
                    PlayerInput::Previous => match queue.previous().cloned() {
                        Some(track) => spawn_play(&pool, &player, track),
                        None => println!("Already at the first track"),
                    },
                    PlayerInput::Select(index) => match queue.select(index).cloned() {
                        Some(track) => spawn_play(&pool, &player, track),
                        None => println!("No track #{}", index + 1),
                    },
                    PlayerInput::TogglePause => {
                        if !player.pause().await {
                            println!("Nothing is playing");
                        }
                    }
                    PlayerInput::Seek(seconds) => {
                        if !player.seek(seconds).await {
                            println!("Seek is only possible while playing");
                        }
                    }
                    PlayerInput::SeekBy(delta) => {
                        if !player.seek(player.position() + delta).await {
                            println!("Seek is only possible while playing");
                        }
                    }
                    PlayerInput::Volume(level) => {
                        if !player.set_volume(level).await {
                            println!("Volume can only be changed while playing");
                        }
                    }
                    PlayerInput::Status => println!("{}", format_status(&player.status().await)),
                    PlayerInput::List => {
                        for (i, track) in queue.tracks().iter().enumerate() {
                            let current = if queue.current_index() == Some(i) { ">" } else { " " };
                            println!("{}{}", current, format_track_line(i + 1, track));
                        }
                    }
                    PlayerInput::Stop => {
                        pool.cancel("play");
                        player.stop().await;
                    }
                    PlayerInput::Quit => break,
                    PlayerInput::Help => println!("{}", PLAYER_HELP),
                    PlayerInput::Unknown(text) => println!("Unknown command: {} (h for help)", text),
                }
            }
            Some(event) = events.recv() => match event {
                TaskEvent::Finished { result: Ok(name), .. } => println!("Now playing: {}", name),
                TaskEvent::Finished { result: Err(e), .. } if e != superseded => println!("Playback failed: {}", e),
                _ => {}
            },
            _ = ticker.tick() => {
                let status = player.poll_status().await;
                if status.finished {
                    match queue.next().cloned() {
                        Some(track) => spawn_play(&pool, &player, track),
                        None => {
                            println!("End of list");
                            player.stop().await;
                        }
                    }
                }
            }
        }
    }

    pool.cancel("play");
    player.stop().await;
    Ok(())
}
