mod cli;

use std::{
    env, fs,
    io::{self, Read},
    process::ExitCode,
    sync::Arc,
    time::Duration,
};

use clap::Parser;
use env_logger::Builder;
use log::{debug, error, info};

use acme_txt_solver::{
    credentials::DirectorySecretStore,
    dispatcher::{ChallengeRequest, Dispatcher},
    registry::ProviderRegistry,
};

use cli::{lists_providers, Cli, Command};

#[tokio::main]
async fn main() -> ExitCode {
    let registry = Arc::new(ProviderRegistry::builtin());

    if lists_providers(env::args_os()) {
        println!("Compiled-in DNS providers:");
        for name in registry.names() {
            println!("  - {}", name);
        }
        return ExitCode::SUCCESS;
    }

    let cli = Cli::parse();

    Builder::new().filter_level(cli.loglevel.into()).init();
    info!(
        "Available DNS providers: {}",
        registry.names().join(", ")
    );

    let (request, present) = match &cli.command {
        Some(Command::Present { request }) => (request, true),
        Some(Command::Cleanup { request }) => (request, false),
        None => {
            error!("No command given, use either 'present' or 'cleanup'");
            return ExitCode::FAILURE;
        }
    };
    let request = match read_request(request) {
        Ok(r) => r,
        Err(e) => {
            error!("Unable to read challenge request: {}", e);
            return ExitCode::FAILURE;
        }
    };
    debug!("Read challenge request {}", request.uid);

    let dispatcher = Dispatcher::new(
        registry,
        Arc::new(DirectorySecretStore::new(&cli.secrets_dir)),
    )
    .with_timeout(Duration::from_secs(cli.timeout));
    info!("Starting {} solver", dispatcher.name());

    let result = if present {
        dispatcher.present(&request).await
    } else {
        dispatcher.clean_up(&request).await
    };
    match result {
        Ok(()) => {
            info!("Completed");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn read_request(source: &str) -> Result<ChallengeRequest, String> {
    let raw = if source == "-" {
        let mut raw = String::new();
        io::stdin()
            .read_to_string(&mut raw)
            .map_err(|e| e.to_string())?;
        raw
    } else {
        fs::read_to_string(source).map_err(|e| format!("{}: {}", source, e))?
    };
    serde_json::from_str(&raw).map_err(|e| e.to_string())
}
