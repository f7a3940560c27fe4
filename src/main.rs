use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

use feedshelf::app::{App, FeedFilter, FeedStatus};
use feedshelf::config::Config;
use feedshelf::feed::{HttpFetcher, RefreshEvent};
use feedshelf::registry::{Direction, Folder};
use feedshelf::storage::{Database, DatabaseError};
use feedshelf::util::{strip_control_chars, truncate_to_width};

/// Column budget for names and titles in listings.
const NAME_WIDTH: usize = 48;

/// Get the config directory path (~/.config/feedshelf/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("feedshelf"))
}

#[derive(Parser, Debug)]
#[command(
    name = "feedshelf",
    about = "Feed subscriptions in ordered folders, refreshed in the background"
)]
struct Args {
    /// Config file (default: ~/.config/feedshelf/config.toml)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List feeds with unread counts
    List {
        /// Only feeds inside this folder
        #[arg(long, value_name = "ID", conflicts_with = "unfiled")]
        folder: Option<String>,
        /// Only feeds outside any folder
        #[arg(long)]
        unfiled: bool,
    },
    /// Subscribe to a feed
    AddFeed {
        url: String,
        #[arg(long)]
        name: Option<String>,
    },
    RemoveFeed {
        id: String,
    },
    AddFolder {
        name: String,
    },
    /// Delete a folder, keeping its feeds
    RemoveFolder {
        id: String,
    },
    MoveFeed {
        id: String,
        direction: Dir,
    },
    MoveFolder {
        id: String,
        direction: Dir,
    },
    /// Move a feed into a folder, or out of its folder without --folder
    Reparent {
        id: String,
        #[arg(long, value_name = "ID")]
        folder: Option<String>,
    },
    ToggleFolder {
        id: String,
    },
    MarkRead {
        link: String,
    },
    /// Select a feed, fetch it once and print its items
    Show {
        id: String,
    },
    /// Refresh every feed periodically until interrupted
    Watch,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Dir {
    Up,
    Down,
}

impl From<Dir> for Direction {
    fn from(dir: Dir) -> Self {
        match dir {
            Dir::Up => Direction::Up,
            Dir::Down => Direction::Down,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;
    }

    // User-only access to the state directory
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) =
            std::fs::set_permissions(&config_dir, std::fs::Permissions::from_mode(0o700))
        {
            tracing::warn!(
                path = %config_dir.display(),
                error = %e,
                "Failed to set config directory permissions to 0700"
            );
        }
    }

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let db_path = config.database_path(&config_dir);
    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    let db = match Database::open(db_path_str).await {
        Ok(db) => db,
        Err(DatabaseError::InstanceLocked) => {
            eprintln!("Error: {}", DatabaseError::InstanceLocked);
            std::process::exit(1);
        }
        Err(e) => return Err(anyhow::anyhow!("Failed to open database: {}", e)),
    };

    let fetcher = HttpFetcher::new(&config).context("Failed to build HTTP client")?;
    let (event_tx, event_rx) = mpsc::channel::<RefreshEvent>(64);
    let watching = matches!(args.command, Command::Watch);
    let app = App::open(
        Arc::new(db.clone()),
        Arc::new(fetcher),
        &config,
        watching.then_some(event_tx),
    )
    .await
    .context("Failed to restore saved state")?;

    let result = run(&app, args.command, event_rx).await;
    app.shutdown();
    db.close().await;
    result
}

async fn run(app: &App, command: Command, events: mpsc::Receiver<RefreshEvent>) -> Result<()> {
    match command {
        Command::List { folder, unfiled } => {
            let filter = match (folder, unfiled) {
                (Some(folder), _) => FeedFilter::Folder(app.resolve_folder(&folder)?),
                (None, true) => FeedFilter::Unfiled,
                (None, false) => FeedFilter::All,
            };
            print_listing(app, filter);
        }
        Command::AddFeed { url, name } => {
            let feed = app.add_feed(&url, name.as_deref()).await?;
            println!("Added {} {}", short_id(&feed.id), feed.display_name);
        }
        Command::RemoveFeed { id } => {
            let id = app.resolve_feed(&id)?;
            if let Some(feed) = app.remove_feed(id).await {
                println!("Removed {}", feed.display_name);
            }
        }
        Command::AddFolder { name } => {
            let folder = app.add_folder(&name).await?;
            println!("Added folder {} {}", short_id(&folder.id), folder.display_name);
        }
        Command::RemoveFolder { id } => {
            let id = app.resolve_folder(&id)?;
            if let Some(folder) = app.remove_folder(id).await {
                println!("Removed folder {}", folder.display_name);
            }
        }
        Command::MoveFeed { id, direction } => {
            let id = app.resolve_feed(&id)?;
            if !app.move_feed(id, direction.into()).await {
                println!("Already at the edge of its group");
            }
        }
        Command::MoveFolder { id, direction } => {
            let id = app.resolve_folder(&id)?;
            if !app.move_folder(id, direction.into()).await {
                println!("Already at the edge of the folder list");
            }
        }
        Command::Reparent { id, folder } => {
            let id = app.resolve_feed(&id)?;
            let folder = folder.map(|f| app.resolve_folder(&f)).transpose()?;
            app.reparent_feed(id, folder).await;
        }
        Command::ToggleFolder { id } => {
            let id = app.resolve_folder(&id)?;
            if let Some(expanded) = app.toggle_folder(id).await {
                println!("{}", if expanded { "Expanded" } else { "Collapsed" });
            }
        }
        Command::MarkRead { link } => {
            let affected = app.mark_read(&link).await;
            println!("Marked read ({} feeds affected)", affected.len());
        }
        Command::Show { id } => {
            let id = app.resolve_feed(&id)?;
            show(app, id).await?;
        }
        Command::Watch => watch(app, events).await?,
    }
    Ok(())
}

async fn show(app: &App, id: feedshelf::registry::FeedId) -> Result<()> {
    let Some(feed) = app.select(id).await else {
        return Ok(());
    };
    println!("{}  <{}>", feed.display_name, feed.source_url);

    if let Some(Err(e)) = app.refresh_now(id).await {
        eprintln!("Refresh failed: {}", e);
    }

    let Some(items) = app.selected_items() else {
        println!("  (no items fetched yet)");
        return Ok(());
    };
    for item in items.iter() {
        let marker = if app.is_read(&item.link) { " " } else { "*" };
        let title = item.title.as_deref().unwrap_or(&item.link);
        println!(
            "{} {}  {}",
            marker,
            truncate_to_width(&strip_control_chars(title), NAME_WIDTH * 2),
            strip_control_chars(&item.link)
        );
    }
    println!("{} unread", app.unread_count(id));
    Ok(())
}

async fn watch(app: &App, mut events: mpsc::Receiver<RefreshEvent>) -> Result<()> {
    app.start_refreshing();
    println!("Watching feeds, Ctrl-C to stop");

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                match event {
                    RefreshEvent::Started { .. } => continue,
                    RefreshEvent::Succeeded { feed_id, items, .. } => {
                        tracing::info!(feed_id = %feed_id, items, unread = app.unread_count(feed_id), "Refreshed");
                    }
                    RefreshEvent::Failed { feed_id, error } => {
                        tracing::warn!(feed_id = %feed_id, error = %error, "Refresh failed");
                    }
                }
                if let Err(e) = app.persist().await {
                    tracing::warn!(error = %e, "Failed to persist snapshot");
                }
            }
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl-C")?;
                break;
            }
        }
    }
    Ok(())
}

fn print_listing(app: &App, filter: FeedFilter) {
    let print_feeds = |statuses: Vec<FeedStatus>| {
        for status in statuses {
            let mut line = format!(
                "  {}  {:<width$}  {:>4} unread",
                short_id(&status.feed.id),
                truncate_to_width(&status.feed.display_name, NAME_WIDTH),
                status.unread,
                width = NAME_WIDTH
            );
            if status.loading {
                line.push_str("  (refreshing)");
            }
            if let Some(error) = status.error {
                line.push_str(&format!("  [error: {}]", error));
            }
            println!("{}", line);
        }
    };
    let print_folder = |folder: &Folder| {
        println!(
            "{} {}  {}  ({} unread)",
            if app.is_expanded(folder.id) { "v" } else { ">" },
            short_id(&folder.id),
            folder.display_name,
            app.folder_unread_count(folder.id)
        );
    };

    match filter {
        FeedFilter::All => {
            println!("No folder");
            print_feeds(app.feed_statuses(FeedFilter::Unfiled));
            for folder in app.folders() {
                print_folder(&folder);
                print_feeds(app.feed_statuses(FeedFilter::Folder(folder.id)));
            }
        }
        FeedFilter::Unfiled => print_feeds(app.feed_statuses(filter)),
        FeedFilter::Folder(id) => {
            if let Some(folder) = app.folder(id) {
                print_folder(&folder);
            }
            print_feeds(app.feed_statuses(filter));
        }
    }
}

fn short_id(id: &impl std::fmt::Display) -> String {
    id.to_string().chars().take(8).collect()
}
