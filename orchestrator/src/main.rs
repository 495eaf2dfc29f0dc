//! stackpilot - Entry Point
//!
//! Serves the deployment API and runs deployment pipelines in the background.

use std::collections::HashMap;
use std::env;

use secrecy::SecretString;
use tracing::{error, info, warn};

use stackpilot::app::options::{AppOptions, Secrets};
use stackpilot::app::run::run;
use stackpilot::filesys::file::File;
use stackpilot::logs::{init_logging, LogOptions};
use stackpilot::storage::layout::StorageLayout;
use stackpilot::storage::settings::Settings;
use stackpilot::utils::version_info;

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    let version = version_info();
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version) {
            Ok(json) => println!("{}", json),
            Err(_) => println!("{}", version.version),
        }
        return;
    }

    let layout = match cli_args.get("data-dir") {
        Some(dir) => StorageLayout::new(dir),
        None => StorageLayout::default(),
    };

    // Retrieve the settings file, defaults when there is none
    let settings_file = match cli_args.get("settings") {
        Some(path) => File::new(path),
        None => layout.settings_file(),
    };
    let settings = if settings_file.exists().await {
        match settings_file.read_json::<Settings>().await {
            Ok(settings) => settings,
            Err(e) => {
                eprintln!(
                    "Unable to read settings file {}: {}",
                    settings_file.path().display(),
                    e
                );
                std::process::exit(1);
            }
        }
    } else {
        Settings::default()
    };

    // Initialize logging, the guard flushes file output on exit
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        json_format: settings.log_json,
        log_dir: settings
            .log_to_file
            .then(|| layout.logs_dir().path().to_path_buf()),
        ..Default::default()
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            None
        }
    };
    if !settings_file.exists().await {
        warn!(
            "No settings file at {}, using defaults",
            settings_file.path().display()
        );
    }

    let secrets = Secrets {
        provider_api_key: secret_from_env(&settings.provider.api_key_env),
        model_token: secret_from_env(&settings.containers.model_token_env),
        registry_password: settings
            .containers
            .registry
            .as_ref()
            .and_then(|r| secret_from_env(&r.password_env)),
        workflow_api_key: secret_from_env(&settings.workflow_engine.api_key_env),
        mqtt_password: secret_from_env(&settings.mqtt_broker.password_env),
    };
    if secrets.provider_api_key.is_none() {
        warn!(
            "{} is not set, provider requests are unauthenticated",
            settings.provider.api_key_env
        );
    }

    let options = AppOptions::from_settings(&settings, layout, secrets);

    info!("Running stackpilot {} with options: {:?}", version.version, options);
    if let Err(e) = run(options, await_shutdown_signal()).await {
        error!("Failed to run stackpilot: {e}");
        std::process::exit(1);
    }
}

fn secret_from_env(name: &str) -> Option<SecretString> {
    env::var(name)
        .ok()
        .filter(|value| !value.is_empty())
        .map(SecretString::from)
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                (Err(e), _) | (_, Err(e)) => {
                    error!("Unable to install signal handlers: {}", e);
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        error!("Unable to listen for Ctrl+C: {}", e);
                    }
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Unable to listen for Ctrl+C: {}", e);
        }
        info!("Ctrl+C received, shutting down...");
    }
}
