use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{ArgGroup, Parser, Subcommand};
use log::{error, info};

use identity_store::config::AppConfig;
use identity_store::logging;
use identity_store::migration::config_dir_upgrader::ConfigDirUpgrader;
use identity_store::migration::{Migration, MigrationError};
use identity_store::store::identity_store::IdentityStore;

#[derive(Parser, Debug)]
#[command(name = "identity-store", version, about = "Filesystem identity store tool")]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upgrade accounts/<name>.json records to the indexed layout
    Upgrade,
    /// List account names
    List,
    /// Print one identity record
    #[command(group(ArgGroup::new("lookup").required(true).args(["id", "name", "access_key"])))]
    Show {
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        access_key: Option<String>,
        /// Include access key secrets in the output
        #[arg(long)]
        show_secrets: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = match AppConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration {}: {}", cli.config.display(), e);
            return ExitCode::FAILURE;
        }
    };
    logging::init(&config.logging);
    info!("Config directory {} ({})", config.store.root.display(), config.store.variant);

    match cli.command {
        Command::Upgrade => upgrade(&config).await,
        Command::List => list(&config),
        Command::Show {
            id,
            name,
            access_key,
            show_secrets,
        } => show(&config, id, name, access_key, show_secrets),
    }
}

async fn upgrade(config: &AppConfig) -> ExitCode {
    let upgrader = Arc::new(ConfigDirUpgrader::new(&config.store));
    let migration = Migration::new(upgrader, config.migration.retry_policy())
        .with_concurrency(config.migration.concurrency);

    match migration.run().await {
        Ok(_) => ExitCode::SUCCESS,
        Err(MigrationError::RunFailure { failures }) => {
            for failure in &failures {
                eprintln!("{}", failure);
            }
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("Config directory upgrade aborted: {}", e);
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn list(config: &AppConfig) -> ExitCode {
    let store = IdentityStore::new(&config.store);
    match store.list_accounts() {
        Ok(names) => {
            let mut stdout = io::stdout().lock();
            for name in names {
                if writeln!(stdout, "{}", name).is_err() {
                    return ExitCode::FAILURE;
                }
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn show(
    config: &AppConfig,
    id: Option<String>,
    name: Option<String>,
    access_key: Option<String>,
    show_secrets: bool,
) -> ExitCode {
    let store = IdentityStore::new(&config.store);
    let record = match (id, name, access_key) {
        (Some(id), _, _) => store.get_by_id(&id, show_secrets),
        (_, Some(name), _) => store.get_by_name(&name, show_secrets),
        (_, _, Some(access_key)) => store.get_by_access_key(&access_key, show_secrets),
        (None, None, None) => unreachable!("clap requires one lookup argument"),
    };

    match record.and_then(|record| record.to_json_pretty()) {
        Ok(json) => {
            let mut stdout = io::stdout().lock();
            if stdout.write_all(&json).and_then(|_| writeln!(stdout)).is_err() {
                return ExitCode::FAILURE;
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}
