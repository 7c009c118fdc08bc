//! Application entry point and CLI handling.
//!
//! A thin driver (teacher's pattern: no clap, hand-rolled arg parsing)
//! dispatching to the library's entry points — the control loop lives in
//! `feedcore::core`, this file only wires it to a process.

use std::path::PathBuf;

use color_eyre::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use feedcore::{Config, Core};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match parse_args()? {
        Command::Run => run_core().await,
        Command::Import(path) => import_opml(&path),
        Command::Export(path) => export_opml(&path),
        Command::Subscribe(url) => rpc(|core| println!("{}", core.subscribe(&url))),
        Command::Refresh => rpc(|core| println!("{}", core.refresh())),
        Command::SetOnline(online) => rpc(|core| println!("{}", core.set_online(online))),
        Command::UnreadCount => rpc(|core| println!("{}", core.unread_items())),
        Command::NewCount => rpc(|core| println!("{}", core.new_items())),
        Command::Help => {
            print_help();
            Ok(())
        }
        Command::Version => {
            print_version();
            Ok(())
        }
    }
}

/// CLI commands. The `subscribe`/`refresh`/`set-online`/`unread-count`/
/// `new-count` subcommands are thin one-shot wrappers around the
/// control-channel RPC surface (spec §6), for manual testing of a core
/// without driving the long-running control loop.
enum Command {
    Run,
    Import(PathBuf),
    Export(PathBuf),
    Subscribe(String),
    Refresh,
    SetOnline(bool),
    UnreadCount,
    NewCount,
    Help,
    Version,
}

fn parse_args() -> Result<Command> {
    let args: Vec<String> = std::env::args().collect();

    if args.len() == 1 {
        return Ok(Command::Run);
    }

    match args[1].as_str() {
        "-h" | "--help" => Ok(Command::Help),
        "-v" | "--version" => Ok(Command::Version),
        "-i" | "--import" => {
            let path = args.get(2).ok_or_else(|| color_eyre::eyre::eyre!("Missing OPML file path"))?;
            Ok(Command::Import(PathBuf::from(path)))
        }
        "-e" | "--export" => {
            let path = args.get(2).ok_or_else(|| color_eyre::eyre::eyre!("Missing output file path"))?;
            Ok(Command::Export(PathBuf::from(path)))
        }
        "subscribe" => {
            let url = args.get(2).ok_or_else(|| color_eyre::eyre::eyre!("Missing feed URL"))?;
            Ok(Command::Subscribe(url.clone()))
        }
        "refresh" => Ok(Command::Refresh),
        "set-online" => {
            let flag = args.get(2).ok_or_else(|| color_eyre::eyre::eyre!("Missing true|false"))?;
            match flag.as_str() {
                "true" => Ok(Command::SetOnline(true)),
                "false" => Ok(Command::SetOnline(false)),
                other => Err(color_eyre::eyre::eyre!("Invalid set-online argument: {other} (expected true|false)")),
            }
        }
        "unread-count" => Ok(Command::UnreadCount),
        "new-count" => Ok(Command::NewCount),
        other => Err(color_eyre::eyre::eyre!("Unknown option: {other}\nRun 'feedcore --help' for usage")),
    }
}

/// Loads a `Core` from its conventional on-disk locations, runs one RPC
/// against it, persists the feed list, and returns.
fn rpc(f: impl FnOnce(&mut Core)) -> Result<()> {
    let mut core = Core::new()?;
    f(&mut core);
    core.save()
}

fn print_help() {
    println!(
        r#"
feedcore {}

A headless feed-aggregation core.

USAGE:
    feedcore [OPTIONS]

OPTIONS:
    -i, --import <FILE>       Import a feed list from an OPML file
    -e, --export <FILE>       Export the current feed list to an OPML file
    -h, --help                Show this help message
    -v, --version             Show version information

SUBCOMMANDS (one-shot RPCs against the on-disk feed list and store):
    subscribe <URL>           Add a feed under the root and schedule a refresh
    refresh                   Schedule an immediate refresh of every feed
    set-online <true|false>   Flip the global offline flag
    unread-count              Print the aggregated unread-item count
    new-count                 Print the aggregated new-item count and clear popups

With no options, runs the control loop: loads the configured feed list and
item store, then polls subscriptions on their scheduled intervals until
interrupted.

CONFIG:
    {}
"#,
        env!("CARGO_PKG_VERSION"),
        Config::config_path().map(|p| p.display().to_string()).unwrap_or_else(|| "unknown".to_string())
    );
}

fn print_version() {
    println!("feedcore {}", env!("CARGO_PKG_VERSION"));
}

async fn run_core() -> Result<()> {
    let mut core = Core::new()?;
    let result = core.run().await;
    core.save()?;
    result
}

fn import_opml(path: &PathBuf) -> Result<()> {
    let feedlist_path = Config::feedlist_path().ok_or_else(|| color_eyre::eyre::eyre!("no feed list path"))?;
    let arena = feedcore::opml::import(path, "local")?;
    feedcore::opml::export(&arena, &feedlist_path, true)?;
    println!("Imported feed list from {}", path.display());
    Ok(())
}

fn export_opml(path: &PathBuf) -> Result<()> {
    let feedlist_path = Config::feedlist_path().ok_or_else(|| color_eyre::eyre::eyre!("no feed list path"))?;
    let arena = if feedlist_path.exists() {
        feedcore::opml::import(&feedlist_path, "local")?
    } else {
        feedcore::node::NodeArena::new_with_root("local")
    };
    feedcore::opml::export(&arena, path, false)?;
    println!("Exported feed list to {}", path.display());
    Ok(())
}
