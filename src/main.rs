use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use ftpdock::config::{get_config_dir, AppSettings, MemoryStorage, Protocol, ServerProfile};
use ftpdock::format::{format_size, format_speed, icon_for_entry};
use ftpdock::listing::file_name;
use ftpdock::transfer::ProgressCallback;
use ftpdock::transport::{Connector, MemoryConnector, MemoryServer};
use ftpdock::AppState;

const DEMO_PROFILE: &str = "demo";

/// FTP, FTPS and SFTP file transfer client
#[derive(Parser)]
#[command(name = "ftpdock")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration directory (overrides the platform default)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Use a built-in in-memory server instead of the network
    #[arg(long, global = true)]
    demo: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum ProtocolArg {
    Ftp,
    Ftps,
    Sftp,
}

impl From<ProtocolArg> for Protocol {
    fn from(arg: ProtocolArg) -> Self {
        match arg {
            ProtocolArg::Ftp => Protocol::Ftp,
            ProtocolArg::Ftps => Protocol::Ftps,
            ProtocolArg::Sftp => Protocol::Sftp,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// List saved server profiles
    Profiles,

    /// Save a server profile
    Add {
        /// Display name
        #[arg(long)]
        name: String,

        #[arg(long)]
        host: String,

        /// Port (defaults to the protocol's standard port)
        #[arg(long)]
        port: Option<u16>,

        #[arg(short, long)]
        user: String,

        /// Password; empty uses the ssh-agent for SFTP
        #[arg(long, default_value = "")]
        password: String,

        #[arg(long, value_enum, default_value = "ftp")]
        protocol: ProtocolArg,

        /// Use active mode (not supported, passive is always used)
        #[arg(long)]
        active: bool,

        /// Mark as the default profile
        #[arg(long)]
        default: bool,
    },

    /// Delete a server profile
    Remove { id: String },

    /// List a remote directory
    Ls {
        /// Profile id
        profile: String,

        /// Remote directory (defaults to the configured start path)
        path: Option<String>,
    },

    /// Download a remote file
    Get {
        profile: String,
        remote: String,
        /// Local destination (defaults to the remote file name)
        local: Option<PathBuf>,
    },

    /// Upload a local file
    Put {
        profile: String,
        local: PathBuf,
        /// Remote destination (defaults to the local file name in /)
        remote: Option<String>,
    },
}

/// State from the config directory, or an in-memory demo server
fn build_state(cli: &Cli) -> Result<AppState> {
    if !cli.demo {
        let config_dir = match &cli.config_dir {
            Some(dir) => dir.clone(),
            None => get_config_dir()?,
        };
        return AppState::load(&config_dir)
            .with_context(|| format!("Failed to load config from {}", config_dir.display()));
    }

    let server = MemoryServer::with_sample_tree().with_credentials("demo", "demo");
    let connector: Arc<dyn Connector> = Arc::new(MemoryConnector::new(server));
    let state = AppState::new(
        AppSettings::default(),
        Arc::new(MemoryStorage::new()),
        connector,
    )?;

    let mut profile = ServerProfile::new(
        "Demo server".into(),
        "demo.local".into(),
        "demo".into(),
        Protocol::Ftp,
    );
    profile.id = DEMO_PROFILE.into();
    profile.password = "demo".into();
    profile.is_default = true;
    state.save_profile(profile)?;
    Ok(state)
}

fn progress_printer(label: String) -> ProgressCallback {
    Arc::new(move |progress| {
        eprint!("\r{} {:>6.1}%", label, progress);
    })
}

async fn connect(state: &AppState, profile: &str) -> Result<()> {
    state
        .open_connection(profile)
        .await
        .with_context(|| format!("Failed to connect profile {}", profile))?;
    Ok(())
}

async fn run(command: Commands, state: AppState) -> Result<()> {
    match command {
        Commands::Profiles => {
            let profiles = state.get_all_profiles();
            if profiles.is_empty() {
                println!("No saved profiles");
            }
            for p in profiles {
                let marker = if p.is_default { "*" } else { " " };
                println!(
                    "{} {:<24} {:<20} {}://{}@{}:{}",
                    marker, p.id, p.name, p.protocol, p.username, p.host, p.port
                );
            }
        }

        Commands::Add {
            name,
            host,
            port,
            user,
            password,
            protocol,
            active,
            default,
        } => {
            let protocol = Protocol::from(protocol);
            let mut profile = ServerProfile::new(name, host, user, protocol);
            if let Some(port) = port {
                profile.port = port;
            }
            profile.password = password;
            profile.passive = !active;
            profile.is_default = default;

            let id = profile.id.clone();
            state.save_profile(profile)?;
            println!("Saved profile {}", id);
        }

        Commands::Remove { id } => {
            state.delete_profile(&id)?;
            println!("Removed profile {}", id);
        }

        Commands::Ls { profile, path } => {
            let path =
                path.unwrap_or_else(|| state.settings.read().general.default_remote_path.clone());
            connect(&state, &profile).await?;
            let entries = state.list(&profile, &path).await?;
            for entry in entries {
                let size = if entry.is_dir() {
                    "-".to_string()
                } else {
                    format_size(entry.size)
                };
                println!(
                    "{:<16} {:>12}  {}  {}",
                    icon_for_entry(&entry).icon_name(),
                    size,
                    entry.modified.format("%Y-%m-%d %H:%M"),
                    entry.name
                );
            }
        }

        Commands::Get {
            profile,
            remote,
            local,
        } => {
            let local = match local {
                Some(path) => path,
                None => PathBuf::from(file_name(&remote).context("Remote path has no file name")?),
            };
            connect(&state, &profile).await?;

            let id = state
                .download(&profile, &remote, &local, Some(progress_printer(remote.clone())))
                .await?;
            eprintln!();
            report(&state, &id);
        }

        Commands::Put {
            profile,
            local,
            remote,
        } => {
            let remote = match remote {
                Some(path) => path,
                None => {
                    let name = file_name(&local.to_string_lossy())
                        .context("Local path has no file name")?
                        .to_string();
                    format!("/{}", name)
                }
            };
            connect(&state, &profile).await?;

            let id = state
                .upload(&profile, &local, &remote, Some(progress_printer(remote.clone())))
                .await?;
            eprintln!();
            report(&state, &id);
        }
    }

    state.disconnect_all();
    Ok(())
}

fn report(state: &AppState, id: &str) {
    if let Some(t) = state.get_transfer(id) {
        println!(
            "{} {}: {} at {}",
            t.direction,
            t.file_name,
            format_size(t.transferred_size),
            format_speed(t.speed)
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let state = build_state(&cli)?;

    let filter = if cli.verbose {
        "ftpdock=debug,info".to_string()
    } else {
        state.settings.read().general.log_filter.clone()
    };
    ftpdock::logging::init_tracing(&filter);

    run(cli.command, state).await
}
