use std::path::PathBuf;
use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use log::info;
use vk_music::commands::{self, AppState, FetchMode, TrackSource};
use vk_music::config::AppConfig;

#[derive(Parser)]
#[command(author, version, about = "Browse, download and play VK audio", long_about = None)]
struct Cli {
    /// Configuration file to use instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Access token for this run only (the saved token is used otherwise)
    #[arg(long, global = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a token and save it for later runs (prompts when omitted)
    Login {
        token: Option<String>,
        /// Validate only, do not write the token file
        #[arg(long)]
        no_save: bool,
    },
    /// Show the account the current token belongs to
    Whoami,
    /// Your own audio
    MyAudio(ListArgs),
    /// Personal recommendations (popular tracks when unavailable)
    Recommendations(ListArgs),
    /// Popular tracks for a random chart query
    Popular(ListArgs),
    /// Your playlists
    Playlists,
    /// Tracks of one playlist
    PlaylistTracks {
        id: i64,
        /// Ignore cached results
        #[arg(long)]
        refresh: bool,
        #[command(flatten)]
        list: ListArgs,
    },
    /// Search the audio catalogue
    Search {
        query: String,
        /// Stop after this many results
        #[arg(long)]
        max: Option<usize>,
        #[command(flatten)]
        list: ListArgs,
    },
    /// List downloaded files
    Downloads,
    /// Check that the player executable is available
    CheckDeps,
    /// Print the effective configuration
    Config,
}

#[derive(Args)]
struct ListArgs {
    /// Fetch one page starting at this offset instead of everything
    #[arg(long)]
    offset: Option<usize>,

    /// Page size when --offset is given
    #[arg(long)]
    count: Option<usize>,

    /// Download the listed tracks
    #[arg(long)]
    download: bool,

    /// 1-based positions to download or play, comma separated
    #[arg(long, value_delimiter = ',')]
    pick: Vec<usize>,

    /// Play the listed tracks interactively
    #[arg(long, conflicts_with = "download")]
    play: bool,
}

impl ListArgs {
    fn mode(&self, default_count: usize) -> FetchMode {
        match self.offset {
            Some(offset) => FetchMode::Page {
                offset,
                count: self.count.unwrap_or(default_count),
            },
            None => FetchMode::All,
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<AppConfig> {
    let config = match path {
        Some(path) => AppConfig::load_from(path),
        None => AppConfig::load(),
    };
    config.context("Failed to load configuration")
}

async fn list_and_act(state: &AppState, source: TrackSource, args: &ListArgs) -> anyhow::Result<()> {
    let default_count = match source {
        TrackSource::Recommendations | TrackSource::Popular => state.config.recommendations_page_size,
        _ => state.config.page_size,
    };
    let listing = commands::fetch_tracks(state, &source, args.mode(default_count)).await?;
    commands::print_listing(&listing);

    if args.download {
        let tracks = commands::select_tracks(&listing.tracks, &args.pick)?;
        let report = commands::download_tracks(state, &tracks).await;
        commands::print_batch_report(&report);
    } else if args.play {
        let start = args.pick.first().map(|p| p.saturating_sub(1)).unwrap_or(0);
        commands::run_player(state, listing.tracks, start).await?;
    }
    Ok(())
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_ref())?;
    let state = AppState::new(config).context("Failed to initialize")?;

    match &cli.token {
        Some(token) => state.use_token(token),
        None => {
            if !matches!(cli.command, Command::Login { .. }) && !state.restore_session()? {
                info!("No saved token; run `vk-music login` first");
            }
        }
    }

    match cli.command {
        Command::Login { token, no_save } => {
            let account = commands::login(&state, token.or(cli.token), !no_save).await?;
            println!("Logged in as {} (id {})", account.display_name(), account.id);
            if !no_save {
                println!("Token saved to {}", state.config.token_file.display());
            }
        }
        Command::Whoami => {
            let account = commands::whoami(&state).await?;
            println!("{} (id {})", account.display_name(), account.id);
        }
        Command::MyAudio(args) => list_and_act(&state, TrackSource::MyAudio, &args).await?,
        Command::Recommendations(args) => list_and_act(&state, TrackSource::Recommendations, &args).await?,
        Command::Popular(args) => list_and_act(&state, TrackSource::Popular, &args).await?,
        Command::Playlists => {
            let playlists = commands::fetch_playlists(&state).await?;
            commands::print_playlists(&playlists);
        }
        Command::PlaylistTracks { id, refresh, list } => {
            list_and_act(&state, TrackSource::Playlist { id, refresh }, &list).await?
        }
        Command::Search { query, max, list } => {
            if query.trim().is_empty() {
                bail!("Search query must not be empty");
            }
            let source = TrackSource::Search {
                query,
                max_results: max,
            };
            list_and_act(&state, source, &list).await?
        }
        Command::Downloads => {
            println!("{}", state.download_manager.folder().display());
            commands::print_downloads(&commands::list_downloads(&state)?);
        }
        Command::CheckDeps => match commands::check_player(&state) {
            Ok(path) => println!("{}: {}", state.config.player_path, path.display()),
            Err(e) => bail!("{}", e),
        },
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&state.config)?);
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    info!("Starting vk-music {}", env!("CARGO_PKG_VERSION"));
    run(cli).await
}
