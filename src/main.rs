//! Binary entrypoint for the guildkeep CLI.
//!
//! Commands:
//! - `init` - write a starter `guildkeep.toml` and create the data directory
//! - `status [--timeout <s>]` - bootstrap storage and report backend health
//! - `guilds` - list stored guilds
//! - `console [--player <uuid>]` - run guild commands from stdin as one player
//!
//! See the library crate docs for module-level details: `guildkeep::`.
use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use uuid::Uuid;

use guildkeep::config::Config;
use guildkeep::guild::{commands, GuildRegistry};
use guildkeep::storage::StorageManager;

#[derive(Parser)]
#[command(name = "guildkeep")]
#[command(about = "Guild registry over embedded or networked storage")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "guildkeep.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init,
    /// Bootstrap storage and report backend status
    Status {
        /// Seconds to wait for the backend to become ready
        #[arg(short, long, default_value_t = 10)]
        timeout: u64,
    },
    /// List stored guilds
    Guilds {
        /// Seconds to wait for the guild load
        #[arg(short, long, default_value_t = 10)]
        timeout: u64,
    },
    /// Interactive guild console reading commands from stdin
    Console {
        /// Acting player id; a fresh one is generated when omitted
        #[arg(short, long)]
        player: Option<Uuid>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let cfg = match cli.command {
        Commands::Init => {
            init_logging(&None, cli.verbose);
            info!("Initializing new guildkeep configuration");
            Config::create_default(&cli.config).await?;
            let cfg = Config::load(&cli.config).await?;
            tokio::fs::create_dir_all(&cfg.storage.data_dir).await?;
            info!("Configuration file created at {}", cli.config);
            println!("Wrote {} (data directory {})", cli.config, cfg.storage.data_dir);
            return Ok(());
        }
        _ => Config::load(&cli.config).await?,
    };
    init_logging(&Some(cfg.clone()), cli.verbose);

    match cli.command {
        Commands::Init => {}
        Commands::Status { timeout } => {
            let storage = StorageManager::start(&cfg.storage, &cfg.persistence);
            let wait = storage.gate().wait_ready();
            let ready = tokio::time::timeout(Duration::from_secs(timeout), wait)
                .await
                .is_ok();
            println!("guildkeep v{}", env!("CARGO_PKG_VERSION"));
            println!("Backend: {}", storage.store_type_name());
            println!("Ready: {}", if ready { "yes" } else { "no" });
            if ready {
                match storage.load_guilds().await {
                    Ok(rows) => println!("Guilds stored: {}", rows.len()),
                    Err(e) => println!("Guilds stored: unknown ({e})"),
                }
            }
            if let Some(stats) = storage.backend().pool_stats() {
                println!(
                    "Pool: {} open ({} in use, {} idle)",
                    stats.total, stats.in_use, stats.idle
                );
            }
            storage.shutdown().await;
            if !ready {
                return Err(anyhow!(
                    "{} backend did not become ready within {}s",
                    storage.store_type_name(),
                    timeout
                ));
            }
        }
        Commands::Guilds { timeout } => {
            let storage = StorageManager::start(&cfg.storage, &cfg.persistence);
            let mut registry = GuildRegistry::start(storage.clone(), &cfg.guilds);
            if tokio::time::timeout(Duration::from_secs(timeout), registry.wait_loaded())
                .await
                .is_err()
            {
                return Err(anyhow!("guild load did not finish within {}s", timeout));
            }
            let guilds = registry.snapshot().unwrap_or_default();
            if guilds.is_empty() {
                println!("No guilds stored.");
            }
            for guild in guilds {
                println!(
                    "{:<32} {:>4} members  influence {:>6}  leader {}",
                    guild.name(),
                    guild.members().len(),
                    guild.influence(),
                    guild.leader()
                );
            }
            storage.shutdown().await;
        }
        Commands::Console { player } => {
            run_console(cfg, player.unwrap_or_else(Uuid::new_v4)).await?;
        }
    }
    Ok(())
}

async fn run_console(config: Config, mut actor: Uuid) -> Result<()> {
    let storage = StorageManager::start(&config.storage, &config.persistence);
    let mut registry = GuildRegistry::start(storage.clone(), &config.guilds);
    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    let banner = format!(
        "guildkeep console ({}), acting as {actor}\nAS <uuid> switches player, QUIT exits\n",
        storage.store_type_name()
    );
    stdout.write_all(banner.as_bytes()).await?;

    while let Some(line) = lines.next_line().await? {
        registry.poll_load();
        let trimmed = line.trim();
        if trimmed.eq_ignore_ascii_case("quit") || trimmed.eq_ignore_ascii_case("exit") {
            break;
        }
        let reply = match trimmed.split_once(' ') {
            Some((verb, id)) if verb.eq_ignore_ascii_case("as") => {
                match Uuid::parse_str(id.trim()) {
                    Ok(id) => {
                        actor = id;
                        format!("Now acting as {actor}")
                    }
                    Err(_) => "Usage: AS <uuid>".to_string(),
                }
            }
            _ => commands::execute(&mut registry, actor, commands::parse_command(trimmed)),
        };
        stdout.write_all(format!("{reply}\n").as_bytes()).await?;
        stdout.flush().await?;
    }

    storage.shutdown().await;
    let failed = storage.dead_letters().len();
    if failed > 0 {
        warn!("{failed} write(s) were dead-lettered this session");
    }
    Ok(())
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    let configured = config
        .as_ref()
        .and_then(|cfg| cfg.logging.level.parse::<log::LevelFilter>().ok())
        .unwrap_or(log::LevelFilter::Info);
    // CLI verbosity can only raise the configured level
    let base_level = match verbosity {
        0 => configured,
        1 => configured.max(log::LevelFilter::Debug),
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);

    let file = config.as_ref().and_then(|cfg| cfg.logging.file.clone());
    let sink = file.and_then(|path| {
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .ok()
    });

    match sink {
        Some(f) => {
            let write_mutex = std::sync::Arc::new(std::sync::Mutex::new(f));
            // Mirror to the console only when attached to a terminal
            let is_tty = atty::is(atty::Stream::Stdout);
            builder.format(move |fmt, record| {
                let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                let line = if record.target() == "deadletter" {
                    format!("{} [{}] [deadletter] {}", ts, record.level(), record.args())
                } else {
                    format!("{} [{}] {}", ts, record.level(), record.args())
                };
                if let Ok(mut guard) = write_mutex.lock() {
                    let _ = writeln!(guard, "{}", line);
                }
                if is_tty {
                    writeln!(fmt, "{}", line)
                } else {
                    Ok(())
                }
            });
        }
        None => {
            builder.format(|fmt, record| {
                let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                writeln!(fmt, "{} [{}] {}", ts, record.level(), record.args())
            });
        }
    }
    let _ = builder.try_init();
}
