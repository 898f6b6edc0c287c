use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use mgradm_backend::{Backend, BackendKind};
use mgradm_core::{ConfigError, MgradmConfig};
use mgradm_upgrade::{exit_code, ErrorKind, InstallError, UpgradeError, ValidationError};
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{ImageArgs, InstallArgs, OutputFormat, UpgradeArgs};

#[derive(Parser)]
#[command(
    name = "mgradm",
    about = "Uyuni server administration — install, upgrade and inspect a server",
    version,
    propagate_version = true,
)]
struct Cli {
    /// Configuration file. Defaults to /etc/uyuni/mgradm.toml when present.
    #[arg(long, global = true, env = "MGRADM_CONFIG")]
    config: Option<PathBuf>,

    /// Deployment backend: podman or kubernetes. Probed when omitted.
    #[arg(long, global = true)]
    backend: Option<BackendKind>,

    /// Log at debug level.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install a new server.
    ///
    /// The FQDN defaults to the output of `hostname -f`.
    Install(InstallArgs),
    /// Upgrade the deployed server, migrating its database when the target
    /// image ships a newer PostgreSQL.
    Upgrade(UpgradeArgs),
    /// Describe the deployment as it would be seen by an upgrade.
    Inspect {
        #[command(flatten)]
        image: ImageArgs,
    },
    /// Scale the attestation or hub-xmlrpc service.
    Scale {
        /// Service name, e.g. uyuni-server-attestation or uyuni-hub-xmlrpc
        service: String,
        #[arg(long)]
        replicas: u32,
    },
    /// Show what is running.
    Status {
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(err) = init_tracing(cli.verbose, cli.log_json) {
        eprintln!("failed to initialise logging: {err}");
        return ExitCode::from(exit_code::OTHER);
    }

    match run(cli) {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::from(exit_code_of(&err))
        }
    }
}

fn init_tracing(verbose: bool, json: bool) -> anyhow::Result<()> {
    let default = if verbose { "warn,mgradm=debug" } else { "warn,mgradm=info" };
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(default))?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

fn run(cli: Cli) -> anyhow::Result<u8> {
    tracing::debug!(path = ?cli.config, "loading configuration");
    let config = MgradmConfig::load(cli.config.as_deref())?;
    let backend = Backend::select(cli.backend, &config)?;

    match cli.command {
        Commands::Install(args) => commands::install::run(&backend, &config, args),
        Commands::Upgrade(args) => commands::upgrade::run(&backend, &config, args),
        Commands::Inspect { image } => commands::inspect::run(&backend, &config, &image),
        Commands::Scale { service, replicas } => commands::scale::run(&backend, &service, replicas),
        Commands::Status { format } => commands::status::run(&backend, format),
    }
}

/// Map the typed error at the root of `err` to the documented exit code.
fn exit_code_of(err: &anyhow::Error) -> u8 {
    if let Some(err) = err.downcast_ref::<UpgradeError>() {
        return err.exit_code();
    }
    if let Some(err) = err.downcast_ref::<InstallError>() {
        return err.exit_code();
    }
    if let Some(kind) = err.downcast_ref::<ErrorKind>() {
        return kind.exit_code();
    }
    if err.downcast_ref::<ValidationError>().is_some() || err.downcast_ref::<ConfigError>().is_some() {
        return exit_code::VALIDATION;
    }
    if err.downcast_ref::<mgradm_backend::AdapterError>().is_some() {
        return exit_code::ADAPTER;
    }
    exit_code::OTHER
}
