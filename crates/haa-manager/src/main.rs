//! HAA Manager - Main entry point
//!
//! Discovers HAA accessories, matches them against the pairing file and
//! sends management commands to the selected ones.

mod config;
mod github;
mod session;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use haa_core::dispatch::ALL_DEVICES_WILDCARD;
use haa_core::{Operation, Outcome, OutcomeEntry, Selector};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::Ordering;
use tracing::{error, info, warn, Level};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::FmtSubscriber;

use crate::session::Session;

#[derive(Parser, Debug)]
#[command(name = "haa-manager")]
#[command(about = "Manage paired HAA accessories on the local network")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "haa-manager.toml", global = true)]
    config: PathBuf,

    /// Write log output to this file instead of stderr
    #[arg(short, long, global = true)]
    log: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Seconds to listen for accessories
    #[arg(short, long, global = true)]
    timeout: Option<u64>,

    /// File with the pairing data
    #[arg(short = 'f', long = "file", global = true)]
    file: Option<PathBuf>,

    /// Pairing ID of a device found online, "*" for all
    #[arg(short, long, default_value = ALL_DEVICES_WILDCARD, global = true)]
    id: String,

    /// Treat --id as a display name
    #[arg(long, global = true)]
    by_name: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
enum Command {
    /// Read the configuration script
    Script,
    /// Start a firmware update
    Update,
    /// Reboot
    Reboot,
    /// Enter setup mode
    Setup,
    /// Reconnect Wi-Fi
    Wifi,
    /// Dump the accessory database
    Dump,
    /// List accessories and scan the subnet for devices in setup mode
    Scan,
    /// Print firmware versions
    Version,
    /// List all tags of the firmware repository
    Tags,
    /// Print the latest firmware release
    Latest,
    /// Look up the command prefix for a tag or firmware version
    Custom {
        /// Git tag or branch
        #[arg(long)]
        tag: Option<String>,
        /// Firmware version, e.g. 12.14.6
        #[arg(long = "fw-version")]
        fw_version: Option<String>,
    },
}

impl Command {
    fn operation(&self) -> Option<Operation> {
        match self {
            Self::Script => Some(Operation::ReadScript),
            Self::Update => Some(Operation::StartUpdate),
            Self::Reboot => Some(Operation::Reboot),
            Self::Setup => Some(Operation::EnterSetup),
            Self::Wifi => Some(Operation::WifiReconnect),
            Self::Dump => Some(Operation::Dump),
            Self::Version => Some(Operation::Version),
            Self::Scan | Self::Tags | Self::Latest | Self::Custom { .. } => None,
        }
    }
}

/// Rotated log files kept next to the current one
const LOG_BACKUPS: usize = 5;

/// Daily-rotated log file at `path`, keeping the last [`LOG_BACKUPS`] files
fn log_appender(path: &Path) -> Result<RollingFileAppender> {
    let prefix = path
        .file_name()
        .and_then(|name| name.to_str())
        .with_context(|| format!("Log path {} has no file name", path.display()))?;
    let dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(prefix)
        .max_log_files(LOG_BACKUPS + 1)
        .build(dir)
        .with_context(|| format!("Failed to open log file {}", path.display()))
}

fn init_logging(args: &Args) -> Result<()> {
    let level = if args.debug { Level::DEBUG } else { Level::INFO };
    let builder = FmtSubscriber::builder().with_max_level(level).with_target(true);

    match &args.log {
        Some(path) => {
            let subscriber = builder.with_writer(log_appender(path)?).with_ansi(false).finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        None => {
            let subscriber = builder.with_writer(std::io::stderr).finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();
    init_logging(&args)?;

    info!("HAA Manager v{}", env!("CARGO_PKG_VERSION"));

    if args.command == Command::Scan && args.id != ALL_DEVICES_WILDCARD {
        bail!("scan mode and ID are not allowed together");
    }

    let mut config = config::load_config(&args.config)?;
    if let Some(timeout) = args.timeout {
        config.discovery.timeout_secs = timeout;
    }

    let mut session = Session::new(config)?;

    match &args.command {
        Command::Tags => return list_tags(&session).await,
        Command::Latest => {
            match session.github().latest_release().await? {
                Some(tag) => println!("Latest release tag: {}", tag),
                None => println!("No tag found in latest release"),
            }
            return Ok(ExitCode::SUCCESS);
        }
        Command::Custom { tag, fw_version } => {
            return custom_command(&session, tag.as_deref(), fw_version.as_deref()).await;
        }
        _ => {}
    }

    let Some(pairing_file) = args.file.clone() else {
        bail!("File with pairing data is required for this command");
    };

    match session.github().latest_release().await {
        Ok(Some(tag)) => info!("Last release: {}", tag),
        Ok(None) => info!("Last release: unknown"),
        Err(e) => warn!(error = %e, "Could not determine last release"),
    }

    let found = session.discover().await?;
    print_discovered(&session);
    let paired = session.load_pairings(&pairing_file)?;
    let online = session.registry.online_and_paired().len();
    info!("Found {} devices online. {} paired {} are Online", found, paired, online);

    let Some(operation) = args.command.operation() else {
        return scan_setup_mode(&session).await;
    };

    let cancelled = session.cancelled.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing the current device then stopping");
            cancelled.store(true, Ordering::SeqCst);
        }
    });

    let selector = Selector::parse(&args.id, args.by_name);
    let outcomes = session.dispatcher().resolve_and_execute(&selector, operation).await;
    report(&outcomes, operation);

    if session.cancelled.load(Ordering::SeqCst) || outcomes.iter().any(|o| !o.outcome.is_success()) {
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

fn print_discovered(session: &Session) {
    for d in session.registry.discovered() {
        println!(
            "PairId: {:20} Ip: {:20} Name: {:20} Category: {:20}",
            d.id.as_str(),
            d.ip.to_string(),
            d.display_name(),
            d.category_name()
        );
    }
}

fn report(outcomes: &[OutcomeEntry], operation: Operation) {
    println!();
    for entry in outcomes {
        let name = entry.name.as_deref().unwrap_or("-");
        match &entry.outcome {
            Outcome::Success(detail) => {
                println!("{:20} {:20} {}: ok", entry.target, name, operation.label());
                if let Some(detail) = detail {
                    println!("{}", detail);
                }
            }
            failure => {
                error!(device = %entry.target, name = %name, "{}", failure);
                println!("{:20} {:20} {}: {}", entry.target, name, operation.label(), failure);
            }
        }
    }
}

async fn scan_setup_mode(session: &Session) -> Result<ExitCode> {
    let ip = haa_discovery::local_ipv4()?;
    info!(ip = %ip, "Scanning local subnet for devices in setup mode");

    let setup = &session.config.setup;
    let hosts = haa_discovery::subnet_hosts(ip);
    let found =
        haa_discovery::scan_setup_mode(&hosts, setup.port, session.config.probe_timeout(), setup.concurrency).await;

    println!("Devices in Setup Mode:");
    for device_ip in found {
        println!("{:16} URL: http://{}:{}", device_ip.to_string(), device_ip, setup.port);
    }
    Ok(ExitCode::SUCCESS)
}

async fn list_tags(session: &Session) -> Result<ExitCode> {
    let tags = session.github().list_tags().await?;
    println!("Found {} total tag(s):", tags.len());
    for tag in tags {
        println!("  - {}", tag);
    }
    Ok(ExitCode::SUCCESS)
}

async fn custom_command(session: &Session, tag: Option<&str>, fw_version: Option<&str>) -> Result<ExitCode> {
    if let Some(version) = fw_version {
        info!(
            "Looking up CUSTOM_HAA_COMMAND for version: {} (tag: {})",
            version,
            session.vocabulary.version_tag(version)
        );
        let prefix = session.vocabulary.resolve(Some(version)).await;
        println!("Custom command for version {}: {}", version, prefix);
        return Ok(ExitCode::SUCCESS);
    }

    let tag = tag.unwrap_or(&session.config.vocabulary.default_branch);
    info!("Looking up CUSTOM_HAA_COMMAND for tag: {}", tag);
    match session.vocabulary.lookup_tag(tag).await {
        Some(prefix) => {
            println!("CUSTOM_HAA_COMMAND found: \"{}\"", prefix);
            Ok(ExitCode::SUCCESS)
        }
        None => {
            println!("CUSTOM_HAA_COMMAND not found");
            Ok(ExitCode::FAILURE)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_device_command() {
        let args = Args::try_parse_from(["haa-manager", "-f", "pairing.json", "-i", "AA:01", "reboot"]).unwrap();
        assert_eq!(args.command, Command::Reboot);
        assert_eq!(args.command.operation(), Some(Operation::Reboot));
        assert_eq!(args.file, Some(PathBuf::from("pairing.json")));
        assert_eq!(args.id, "AA:01");
    }

    #[test]
    fn test_default_selector_is_wildcard() {
        let args = Args::try_parse_from(["haa-manager", "version", "-t", "3"]).unwrap();
        assert_eq!(args.id, ALL_DEVICES_WILDCARD);
        assert_eq!(args.timeout, Some(3));
    }

    #[test]
    fn test_parse_custom() {
        let args = Args::try_parse_from(["haa-manager", "custom", "--fw-version", "12.14.6"]).unwrap();
        assert_eq!(
            args.command,
            Command::Custom {
                tag: None,
                fw_version: Some("12.14.6".to_string())
            }
        );
        assert_eq!(args.command.operation(), None);
    }

    #[test]
    fn test_log_appender_writes_into_log_directory() {
        use std::io::Write;

        let dir = tempfile::tempdir().unwrap();
        let mut appender = log_appender(&dir.path().join("haa.log")).unwrap();
        writeln!(appender, "Found 2 devices online").unwrap();
        appender.flush().unwrap();

        let files: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(files.len(), 1);
        assert!(files[0].starts_with("haa.log"));
    }

    #[test]
    fn test_log_path_needs_file_name() {
        assert!(log_appender(Path::new("/")).is_err());
    }

    #[test]
    fn test_command_is_required() {
        assert!(Args::try_parse_from(["haa-manager"]).is_err());
    }
}
