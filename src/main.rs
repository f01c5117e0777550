use anyhow::{Context, Result};
use campus_sync::backend::HttpBackend;
use campus_sync::config::Config;
use campus_sync::controller::{SyncEngine, SyncNotice};
use campus_sync::model::{FeedKind, FeedScope, Post, StageFilter};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

/// Default config path (~/.config/campus-sync/config.toml)
fn default_config_path() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home)
        .join(".config")
        .join("campus-sync")
        .join("config.toml"))
}

#[derive(Parser, Debug)]
#[command(
    name = "campus-sync",
    about = "Sync the campus feed and chat list from the command line"
)]
struct Args {
    /// Config file (defaults to ~/.config/campus-sync/config.toml)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Viewer id, overriding `viewer_id` from the config file
    #[arg(long, global = true)]
    viewer: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load and print the home feed for a scope
    Feed {
        /// department, major or public
        #[arg(long, default_value = "department")]
        scope: FeedKind,

        /// Only posts for this stage (all stages when omitted)
        #[arg(long)]
        stage: Option<u8>,

        /// Number of pages to load
        #[arg(long, default_value_t = 1)]
        pages: usize,
    },
    /// Print the sectioned chat list with unread counts
    Chats {
        /// Keep applying realtime events until interrupted
        #[arg(long)]
        follow: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => default_config_path()?,
    };
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    tracing::debug!(?config, "Effective configuration");

    let viewer_id = args
        .viewer
        .clone()
        .or_else(|| config.viewer_id.clone())
        .context("No viewer id: pass --viewer or set viewer_id in the config file")?;

    let backend = HttpBackend::new(
        config.base_url()?,
        config.resolve_api_token(),
        config.request_timeout(),
    )
    .context("Failed to create HTTP backend")?;
    let mut engine = SyncEngine::new(Arc::new(backend), config.engine_settings(&viewer_id));

    match args.command {
        Command::Feed {
            scope,
            stage,
            pages,
        } => {
            let stage = stage.map_or(StageFilter::All, StageFilter::Stage);
            run_feed(&mut engine, FeedScope::new(scope, stage), pages.max(1)).await
        }
        Command::Chats { follow } => run_chats(&mut engine, follow).await,
    }
}

async fn run_feed(engine: &mut SyncEngine, scope: FeedScope, pages: usize) -> Result<()> {
    engine.select_feed_scope(scope);
    engine.activate_feed();

    let mut loaded = 0;
    while loaded < pages {
        match engine.next_notice().await {
            Some(SyncNotice::FeedUpdated { .. }) => {
                loaded += 1;
                if engine.feed().is_exhausted() {
                    break;
                }
                if loaded < pages {
                    engine.request_load_more();
                }
            }
            Some(SyncNotice::FeedLoadFailed { error, .. }) => {
                return Err(error).context(format!("Failed to load feed for {}", scope));
            }
            Some(other) => tracing::debug!(notice = ?other, "Ignoring notice"),
            None => break,
        }
    }

    println!("Feed {} ({} posts)", scope, engine.visible_posts().len());
    for post in engine.visible_posts() {
        println!("{}", format_post(post));
    }
    if engine.feed().is_exhausted() {
        println!("-- end of feed --");
    }
    Ok(())
}

async fn run_chats(engine: &mut SyncEngine, follow: bool) -> Result<()> {
    engine.activate_chats();
    if follow {
        engine.connect_realtime();
    }

    loop {
        match engine.next_notice().await {
            Some(SyncNotice::ChatsUpdated) => break,
            Some(SyncNotice::ChatsLoadFailed { error, .. }) => {
                return Err(error).context("Failed to load chat list");
            }
            Some(other) => tracing::debug!(notice = ?other, "Ignoring notice"),
            None => return Ok(()),
        }
    }
    print_chats(engine);

    if follow {
        follow_chats(engine).await?;
    }
    Ok(())
}

/// Apply realtime events until SIGINT/SIGTERM or the subscription ends.
async fn follow_chats(engine: &mut SyncEngine) -> Result<()> {
    #[cfg(unix)]
    let mut sigterm = signal(SignalKind::terminate())?;
    #[cfg(unix)]
    let mut sigint = signal(SignalKind::interrupt())?;

    loop {
        #[cfg(unix)]
        let sigterm_fut = sigterm.recv();
        #[cfg(not(unix))]
        let sigterm_fut = std::future::pending::<Option<()>>();

        #[cfg(unix)]
        let sigint_fut = sigint.recv();
        #[cfg(not(unix))]
        let sigint_fut = async {
            let _ = tokio::signal::ctrl_c().await;
            Some(())
        };

        let notice = tokio::select! {
            biased;

            _ = sigterm_fut => {
                tracing::info!("Received SIGTERM, shutting down gracefully");
                break;
            }

            _ = sigint_fut => {
                tracing::info!("Received SIGINT, shutting down gracefully");
                break;
            }

            notice = engine.next_notice() => notice,
        };

        match notice {
            Some(SyncNotice::ChatsUpdated) => print_chats(engine),
            Some(SyncNotice::RealtimeDisconnected) | None => {
                println!("Realtime subscription ended");
                break;
            }
            Some(SyncNotice::RealtimeError { error }) => {
                eprintln!("Realtime error: {}", error);
            }
            Some(other) => tracing::debug!(notice = ?other, "Ignoring notice"),
        }
    }

    engine.logout();
    Ok(())
}

fn print_chats(engine: &SyncEngine) {
    let sections = engine.sections();
    if sections.is_empty() {
        println!("No chats");
        return;
    }
    for section in sections {
        println!("{}", section.title);
        for chat in section.records {
            let unread = engine.unread_count(&chat.id);
            let badge = if unread > 0 {
                format!(" ({} unread)", unread)
            } else {
                String::new()
            };
            let name = chat
                .fields
                .get("name")
                .and_then(|v| v.as_str())
                .unwrap_or(chat.id.as_str());
            println!(
                "  {}{}  {}",
                name,
                badge,
                chat.last_message_at.format("%Y-%m-%d %H:%M")
            );
        }
    }
    println!("Total unread: {}", engine.chats().total_unread());
}

fn format_post(post: &Post) -> String {
    let text = ["title", "body", "content"]
        .iter()
        .find_map(|key| post.fields.get(*key).and_then(|v| v.as_str()))
        .unwrap_or("");
    let liked = if post.is_liked() { "*" } else { " " };
    format!(
        "{} {:>4}{} {}  {}",
        post.created_at.format("%Y-%m-%d %H:%M"),
        post.likes(),
        liked,
        post.id,
        text.lines().next().unwrap_or("")
    )
}
