//! Storefront CLI - sign in to the storefront and manage your account
//! from the terminal.
//!
//! The session is kept between runs (see `Config::storage`), so `login`
//! once and later commands reuse it until the refresh token runs out.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Result};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use storefront_core::validation::{validate_registration, PasswordStrength, ValidationError};
use storefront_core::{
    Config, LoginCredentials, RegisterRequest, SessionEvent, SessionManager, SessionState, User,
};

// ============================================================================
// Constants
// ============================================================================

/// Below this many minutes of session left, every command prints a reminder
const EXPIRY_WARNING_MINUTES: i64 = 24 * 60;

#[derive(Parser)]
#[command(name = "storefront")]
#[command(about = "Sign in to the storefront and manage your account")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Check the stored session against the server
    Status,

    /// Sign in with email or username
    Login {
        #[arg(long, conflicts_with = "username")]
        email: Option<String>,

        #[arg(long)]
        username: Option<String>,
    },

    /// Create an account
    Register {
        #[arg(long)]
        username: Option<String>,

        #[arg(long)]
        email: Option<String>,
    },

    /// Sign out and forget the stored session
    Logout,

    /// Show the signed-in user's profile
    Whoami,

    /// Confirm an email address with the token from the verification link
    VerifyEmail { token: String },

    /// Send a new verification email
    ResendVerification {
        /// Address to send to when not signed in
        #[arg(long)]
        email: Option<String>,
    },

    /// Request a password reset email
    ForgotPassword { email: String },

    /// Set a new password with the token from the reset email
    ResetPassword { token: String },

    /// Change the signed-in user's password
    ChangePassword,
}

/// Initialize the tracing subscriber for logging.
///
/// Use RUST_LOG to control the level (e.g. `RUST_LOG=storefront_core=debug`).
/// The returned guard must live until exit so buffered file output is flushed.
fn init_tracing(log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let Some(path) = log_file else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(io::stderr))
            .with(filter)
            .init();
        return Ok(None);
    };

    let file_name = path
        .file_name()
        .ok_or_else(|| anyhow!("Invalid log file path: {}", path.display()))?;
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(writer).with_ansi(false))
        .with(filter)
        .init();
    Ok(Some(guard))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let _guard = init_tracing(cli.log_file.as_deref())?;
    info!("Storefront CLI starting");

    let mut config = Config::load()?;
    let manager = config.session_manager()?;
    debug!(api = %manager.api().base_url(), "Using API");
    let mut events = manager.events();

    let result = run(cli.command, &manager, &mut config).await;
    report_events(&mut events);
    report_expiry(&manager);
    result
}

async fn run(command: Commands, manager: &SessionManager, config: &mut Config) -> Result<()> {
    match command {
        Commands::Status => {
            manager.initialize().await;
            let snapshot = manager.snapshot();
            match (snapshot.state, &snapshot.user) {
                (SessionState::Authenticated, Some(user)) => {
                    print_user(user);
                    if let Some(minutes) = manager.minutes_until_expiry() {
                        println!("Session valid for {}", format_remaining(minutes));
                    }
                }
                _ => println!("Not signed in."),
            }
            if let Some(error) = snapshot.error {
                eprintln!("Note: {}", error);
            }
        }

        Commands::Login { email, username } => {
            manager.restore();
            let credentials = match (email, username) {
                (Some(email), _) => LoginCredentials::with_email(email, prompt_password("Password")?),
                (None, Some(username)) => {
                    LoginCredentials::with_username(username, prompt_password("Password")?)
                }
                (None, None) => {
                    let identifier = prompt("Email or username", config.last_identifier.as_deref())?;
                    let password = prompt_password("Password")?;
                    if identifier.contains('@') {
                        LoginCredentials::with_email(identifier, password)
                    } else {
                        LoginCredentials::with_username(identifier, password)
                    }
                }
            };

            println!("\nSigning in...");
            let user = manager.login(&credentials).await?;

            config.last_identifier = Some(credentials.identifier.as_str().to_string());
            if let Err(e) = config.save() {
                warn!(error = %e, "Failed to save config");
            }

            println!("Welcome back, {}!", user.display_name());
            if !user.is_email_verified {
                println!("Your email address is not verified yet.");
            }
        }

        Commands::Register { username, email } => {
            let username = match username {
                Some(username) => username,
                None => prompt("Username", None)?,
            };
            let email = match email {
                Some(email) => email,
                None => prompt("Email", None)?,
            };
            let password = prompt_password("Password")?;
            println!("Strength: {}", PasswordStrength::of(&password).label());
            let confirmation = prompt_password("Confirm password")?;

            let request = RegisterRequest {
                username,
                email,
                password,
            };
            validate_registration(&request, Some(&confirmation))?;

            manager.register(&request).await?;
            println!(
                "Account created. Check {} for a verification link, then run `storefront login`.",
                request.email
            );
        }

        Commands::Logout => {
            manager.restore();
            manager.logout().await;
            println!("Signed out.");
        }

        Commands::Whoami => {
            if manager.restore() != SessionState::Authenticated {
                println!("Not signed in.");
                return Ok(());
            }
            let user = manager.get_current_user().await?;
            print_user(&user);
        }

        Commands::VerifyEmail { token } => {
            println!("{}", manager.verify_email(&token).await?);
        }

        Commands::ResendVerification { email } => {
            let message = match email {
                Some(email) => manager.resend_verification_to(&email).await?,
                None => {
                    if manager.restore() != SessionState::Authenticated {
                        bail!("Not signed in. Pass --email to choose the address.");
                    }
                    manager.resend_verification().await?
                }
            };
            println!("{}", message);
        }

        Commands::ForgotPassword { email } => {
            println!("{}", manager.forgot_password(&email).await?);
        }

        Commands::ResetPassword { token } => {
            let password = prompt_new_password()?;
            println!("{}", manager.reset_password(&token, &password).await?);
        }

        Commands::ChangePassword => {
            if manager.restore() != SessionState::Authenticated {
                bail!("Not signed in. Run `storefront login` first.");
            }
            let current = prompt_password("Current password")?;
            let password = prompt_new_password()?;
            println!("{}", manager.change_password(&current, &password).await?);
        }
    }

    Ok(())
}

fn print_user(user: &User) {
    println!("Signed in as {} <{}>", user.display_name(), user.email);
    if !user.is_email_verified {
        println!("Email not verified. Run `storefront resend-verification` for a new link.");
    }
}

/// Surface session events the command produced. Expiry is the only one a
/// user needs to act on.
fn report_events(events: &mut broadcast::Receiver<SessionEvent>) {
    loop {
        match events.try_recv() {
            Ok(SessionEvent::Expired) => {
                eprintln!("Your session has expired. Run `storefront login` to sign in again.")
            }
            Ok(event) => debug!(?event, "Session event"),
            Err(TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
}

/// Remind the user to sign in again shortly before the session lapses
fn report_expiry(manager: &SessionManager) {
    match manager.minutes_until_expiry() {
        Some(minutes) if minutes < EXPIRY_WARNING_MINUTES => eprintln!(
            "Session expires in {}. Run `storefront login` to extend it.",
            format_remaining(minutes)
        ),
        _ => {}
    }
}

fn format_remaining(minutes: i64) -> String {
    let (days, hours, mins) = (minutes / (24 * 60), minutes / 60 % 24, minutes % 60);
    if days > 0 {
        format!("{}d {}h", days, hours)
    } else if hours > 0 {
        format!("{}h {}m", hours, mins)
    } else {
        format!("{}m", mins)
    }
}

fn prompt(label: &str, default: Option<&str>) -> Result<String> {
    match default {
        Some(default) => print!("{} [{}]: ", label, default),
        None => print!("{}: ", label),
    }
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    let input = input.trim();
    Ok(match default {
        Some(default) if input.is_empty() => default.to_string(),
        _ => input.to_string(),
    })
}

fn prompt_password(label: &str) -> Result<String> {
    let password = rpassword::prompt_password(format!("{}: ", label))?;
    Ok(password)
}

fn prompt_new_password() -> Result<String> {
    let password = prompt_password("New password")?;
    println!("Strength: {}", PasswordStrength::of(&password).label());
    if prompt_password("Confirm password")? != password {
        return Err(ValidationError::PasswordMismatch.into());
    }
    Ok(password)
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_login_flags() {
        let cli = Cli::try_parse_from(["storefront", "login", "--email", "ada@example.com"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Login { email: Some(ref e), username: None } if e == "ada@example.com"
        ));

        let conflict = Cli::try_parse_from([
            "storefront",
            "login",
            "--email",
            "ada@example.com",
            "--username",
            "ada",
        ]);
        assert!(conflict.is_err());
    }

    #[test]
    fn test_format_remaining() {
        assert_eq!(format_remaining(7 * 24 * 60), "7d 0h");
        assert_eq!(format_remaining(26 * 60 + 5), "1d 2h");
        assert_eq!(format_remaining(3 * 60 + 7), "3h 7m");
        assert_eq!(format_remaining(42), "42m");
        assert_eq!(format_remaining(0), "0m");
    }

    #[test]
    fn test_parse_token_commands() {
        let cli = Cli::try_parse_from(["storefront", "verify-email", "abc123"]).unwrap();
        assert!(matches!(cli.command, Commands::VerifyEmail { ref token } if token == "abc123"));

        let cli = Cli::try_parse_from(["storefront", "--log-file", "/tmp/s.log", "status"]).unwrap();
        assert!(matches!(cli.command, Commands::Status));
        assert_eq!(cli.log_file, Some(PathBuf::from("/tmp/s.log")));
    }
}
