//! tvremote CLI binary.
//!
//! Smart-TV remote control from the command line.
//!
//! # Commands
//!
//! - `key` - Click one or more keys
//! - `hold` - Press and hold a key
//! - `art-mode` - Show or switch art mode
//! - `list` - List stored artworks
//! - `current` - Show the artwork on screen
//! - `select` - Show a stored artwork
//! - `delete` - Delete stored artworks
//! - `upload` - Upload an image
//! - `thumbnail` - Download an artwork thumbnail

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use tvremote::{protocol::ART_APP_PATH, Config, Key, Session, VERSION};

#[derive(Parser)]
#[command(name = "tvremote")]
#[command(version = VERSION)]
#[command(about = "Smart-TV remote control over the device WebSocket API", long_about = None)]
struct Cli {
    /// Device host (overrides config and TVREMOTE_HOST)
    #[arg(long, global = true)]
    host: Option<String>,

    /// Device port (8001 plain, 8002 TLS)
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Client name shown on the pairing prompt
    #[arg(long, global = true)]
    name: Option<String>,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Click keys in order (e.g. `KEY_HOME` or `home`)
    Key {
        /// Keys to send
        #[arg(required = true)]
        keys: Vec<String>,

        /// Pause between keys in milliseconds
        #[arg(short, long, default_value = "250")]
        delay: u64,
    },

    /// Press and hold a key
    Hold {
        /// Key to hold
        key: String,

        /// Hold duration in milliseconds
        #[arg(short, long, default_value = "1000")]
        duration: u64,
    },

    /// Show art mode status, or switch it with `on` / `off`
    ArtMode {
        /// Desired state
        state: Option<String>,
    },

    /// List stored artworks
    List {
        /// Category filter (e.g. MY-C0002)
        #[arg(short, long)]
        category: Option<String>,
    },

    /// Show the artwork currently displayed
    Current,

    /// Display a stored artwork
    Select {
        /// Content id
        content_id: String,

        /// Only select, do not switch to it
        #[arg(long)]
        no_show: bool,
    },

    /// Delete stored artworks
    Delete {
        /// Content ids
        #[arg(required = true)]
        content_ids: Vec<String>,
    },

    /// Upload an image
    Upload {
        /// Image file (png or jpg)
        file: PathBuf,

        /// Declared file type (default: from the extension)
        #[arg(short = 't', long)]
        file_type: Option<String>,

        /// Landscape matte id
        #[arg(short, long)]
        matte: Option<String>,

        /// Portrait matte id
        #[arg(long)]
        portrait_matte: Option<String>,

        /// Display the image once uploaded
        #[arg(long)]
        show: bool,
    },

    /// Download an artwork thumbnail
    Thumbnail {
        /// Content id
        content_id: String,

        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },
}

impl Commands {
    /// Art commands run on the art application channel
    fn uses_art_channel(&self) -> bool {
        !matches!(self, Self::Key { .. } | Self::Hold { .. })
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();

    let config = build_config(&cli)?;
    let session = Session::from_config(config)?;

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        session.connect().await?;
        let result = run(&session, cli.command).await;
        session.disconnect().await;
        result
    })
}

fn build_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?.merge(Config::from_env()),
        None => Config::from_env(),
    };

    if let Some(host) = &cli.host {
        config.device.host = host.clone();
    }
    if let Some(port) = cli.port {
        config.device.port = port;
    }
    if let Some(name) = &cli.name {
        config.device.name = name.clone();
    }
    if cli.command.uses_art_channel() {
        config.device.channel_path = ART_APP_PATH.to_string();
    }

    Ok(config)
}

async fn run(session: &Session, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Key { keys, delay } => cmd_key(session, &keys, delay).await,
        Commands::Hold { key, duration } => cmd_hold(session, &key, duration).await,
        Commands::ArtMode { state } => cmd_art_mode(session, state.as_deref()).await,
        Commands::List { category } => cmd_list(session, category.as_deref()).await,
        Commands::Current => {
            let current = session.art()?.current_artwork().await?;
            println!("{}", serde_json::to_string_pretty(&current)?);
            Ok(())
        },
        Commands::Select {
            content_id,
            no_show,
        } => {
            session.art()?.select_image(&content_id, !no_show).await?;
            println!("Selected {content_id}");
            Ok(())
        },
        Commands::Delete { content_ids } => {
            let deleted = session.art()?.delete_images(&content_ids).await?;
            println!("Deleted {} artwork(s)", deleted.len());
            for id in deleted {
                println!("  {id}");
            }
            Ok(())
        },
        Commands::Upload {
            file,
            file_type,
            matte,
            portrait_matte,
            show,
        } => cmd_upload(session, &file, file_type, matte, portrait_matte, show).await,
        Commands::Thumbnail { content_id, output } => {
            let bytes = session.thumbnail(&content_id).await?;
            std::fs::write(&output, &bytes)?;
            println!("Wrote {} bytes to {}", bytes.len(), output.display());
            Ok(())
        },
    }
}

async fn cmd_key(session: &Session, keys: &[String], delay: u64) -> anyhow::Result<()> {
    let keys = keys
        .iter()
        .map(|k| k.parse::<Key>())
        .collect::<Result<Vec<_>, _>>()?;
    session
        .send_keys(&keys, Duration::from_millis(delay))
        .await?;
    Ok(())
}

async fn cmd_hold(session: &Session, key: &str, duration: u64) -> anyhow::Result<()> {
    let key: Key = key.parse()?;
    session
        .hold_key(&key, Duration::from_millis(duration))
        .await?;
    Ok(())
}

async fn cmd_art_mode(session: &Session, state: Option<&str>) -> anyhow::Result<()> {
    let art = session.art()?;
    let on = match state.map(str::to_ascii_lowercase).as_deref() {
        None => art.artmode_status().await?,
        Some("on") => art.set_artmode(true).await?,
        Some("off") => art.set_artmode(false).await?,
        Some(other) => anyhow::bail!("Unknown art mode state: {other}. Use: on, off"),
    };
    println!("Art mode: {}", if on { "on" } else { "off" });
    Ok(())
}

async fn cmd_list(session: &Session, category: Option<&str>) -> anyhow::Result<()> {
    let items = session.art()?.available(category).await?;
    println!("{} artwork(s)", items.len());
    for item in items {
        let id = item.get("content_id").and_then(|v| v.as_str()).unwrap_or("?");
        let category = item.get("category_id").and_then(|v| v.as_str()).unwrap_or("-");
        println!("  {id:<16} {category}");
    }
    Ok(())
}

async fn cmd_upload(
    session: &Session,
    file: &Path,
    file_type: Option<String>,
    matte: Option<String>,
    portrait_matte: Option<String>,
    show: bool,
) -> anyhow::Result<()> {
    let file_type = match file_type {
        Some(file_type) => file_type,
        None => file
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("Cannot infer file type of {}, use --file-type", file.display()))?,
    };

    let data = std::fs::read(file)?;
    let mut upload = session.prepare_upload(data, &file_type)?;
    if let Some(matte) = matte {
        upload = upload.with_matte(matte);
    }
    if let Some(matte) = portrait_matte {
        upload = upload.with_portrait_matte(matte);
    }

    let content_id = session.upload(&upload).await?;
    println!("Uploaded as {content_id}");

    if show {
        session.art()?.select_image(&content_id, true).await?;
    }
    Ok(())
}
