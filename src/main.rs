use std::io::BufRead;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use ispyb_auth::config::{Configuration, DEFAULT_CONFIG_PATH};
use ispyb_auth::crypto::PasswordManager;
use ispyb_auth::{AppState, Authenticate, initialize_state, telemetry};
use serde_json::json;

const PASSWORD_ENV: &str = "ISPYB_PASSWORD";

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file.
    #[arg(long, short, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug, Clone)]
enum Commands {
    /// Authenticate a login. Password is read from `ISPYB_PASSWORD` or stdin.
    Login { login: String },
    /// Show the groups of a user.
    Groups {
        username: String,
        /// Session token, for the token backend.
        #[arg(long, short)]
        token: Option<String>,
    },
    /// Hash a password read from stdin, for the local users file.
    HashPassword,
    /// Validate the configuration and exit.
    Check,
}

/// Password from the environment, otherwise the first line of stdin.
fn read_password() -> std::io::Result<String> {
    if let Ok(password) = std::env::var(PASSWORD_ENV) {
        return Ok(password);
    }

    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_owned())
}

async fn run(
    state: &AppState,
    cmd: Commands,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    match cmd {
        Commands::Login { login } => {
            // the token backend reads its token from the password.
            let password = read_password()?;
            let (identity, groups) = state
                .authenticator
                .authenticate(&login, &password)
                .await?;

            let token = match &state.token {
                Some(manager) => Some(manager.create(&identity, &groups)?),
                None => None,
            };

            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "user": identity,
                    "groups": groups,
                    "token": token,
                }))?
            );
        },
        Commands::Groups { username, token } => {
            let password = if token.is_some() {
                None
            } else {
                Some(read_password()?)
            };

            let (username, groups) = state
                .authenticator
                .get_user_and_groups(
                    Some(&username),
                    password.as_deref(),
                    token.as_deref(),
                )
                .await?;

            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "username": username,
                    "groups": groups,
                }))?
            );
        },
        Commands::HashPassword | Commands::Check => {},
    }

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if matches!(args.cmd, Commands::HashPassword) {
        let hash = read_password()
            .map_err(|e| e.to_string())
            .and_then(|password| {
                PasswordManager::new(None)
                    .and_then(|pwd| pwd.hash_password(password))
                    .map_err(|e| e.to_string())
            });

        return match hash {
            Ok(hash) => {
                println!("{hash}");
                ExitCode::SUCCESS
            },
            Err(err) => {
                eprintln!("cannot hash password: {err}");
                ExitCode::FAILURE
            },
        };
    }

    let config = match Configuration::read(Some(&args.config)) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        },
    };

    let logger = match telemetry::init(config.telemetry.as_ref()) {
        Ok(logger) => logger,
        Err(err) => {
            eprintln!("cannot initialize telemetry: {err}");
            return ExitCode::FAILURE;
        },
    };

    let code = match initialize_state(config) {
        Ok(state) => match run(&state, args.cmd).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                match err.downcast_ref::<ispyb_auth::AuthError>() {
                    Some(auth) => {
                        tracing::debug!(error = %auth, "command failed");
                        eprintln!("{}", auth.public_message());
                    },
                    None => eprintln!("{err}"),
                }
                ExitCode::FAILURE
            },
        },
        Err(err) => {
            tracing::error!(error = %err, "invalid configuration");
            ExitCode::FAILURE
        },
    };

    if let Some(logger) = logger {
        if let Err(err) = logger.shutdown() {
            eprintln!("cannot flush logs: {err}");
        }
    }

    code
}
