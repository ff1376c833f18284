//! planline - Self-hosted multi-project scheduling server
//!
//! Tracks projects, tasks and delay-causing issues, keeps each task's final
//! end date in step with its delays, and serves schedule analytics.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod api;
mod config;
mod construction;
mod dates;
mod db;
mod error;
mod models;
mod permissions;
mod schedule;
mod seed;
mod service;
mod task_dates;

use config::Config;
use models::Role;

#[derive(Parser)]
#[command(name = "planline")]
#[command(about = "Self-hosted project scheduling server with delay tracking")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the API server
    Serve {
        /// Config file path
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,

        /// Bind address (overrides config)
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Initialize a new config file
    Init {
        /// Output path for config file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Manage users
    User {
        #[command(subcommand)]
        action: UserAction,

        /// Config file path
        #[arg(short, long, global = true)]
        config: Option<PathBuf>,
    },

    /// Issue, list or revoke user API tokens
    Token {
        /// Issue a new token for this user
        #[arg(short, long)]
        email: Option<String>,

        /// List users holding a token
        #[arg(long)]
        list: bool,

        /// Revoke the token of the user with this email
        #[arg(long)]
        revoke: Option<String>,

        /// Config file path
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Load the demo dataset
    Seed {
        /// Config file path
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Print schedule analytics for a phase-grouped schedule file
    Schedule {
        /// Schedule JSON (defaults to the configured or bundled schedule)
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Reference date for alerts (YYYY-MM-DD or RFC 3339; defaults to now)
        #[arg(short, long)]
        date: Option<String>,

        /// Alert look-ahead in days
        #[arg(long)]
        horizon: Option<u32>,

        /// Only report overlaps on this resource
        #[arg(short, long)]
        resource: Option<String>,

        /// Print the CSV export instead of the JSON report
        #[arg(long)]
        csv: bool,

        /// Config file path
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum UserAction {
    /// Create a user
    Add {
        #[arg(short, long)]
        email: String,

        #[arg(short, long)]
        name: Option<String>,

        /// Global role: ADMIN, MANAGER, MEMBER or VIEWER
        #[arg(short, long, default_value = "MEMBER")]
        role: Role,
    },

    /// List all users
    List,
}

fn load_config(path: Option<PathBuf>) -> Result<Config> {
    match path {
        Some(path) => Config::load_from(&path),
        None => Config::load(),
    }
}

fn open_database(config: &Config) -> Result<db::Database> {
    db::Database::open(&config.database.path).context("Failed to open database")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("planline=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, port, bind } => {
            let mut cfg = load_config(config)?;

            if let Some(p) = port {
                cfg.server.port = p;
            }
            if let Some(b) = bind {
                cfg.server.bind = b;
            }

            run_server(cfg).await
        }

        Commands::Init { output } => {
            let path = output.unwrap_or_else(|| PathBuf::from("config.toml"));
            let cfg = Config::default();
            cfg.save_to(&path)?;

            println!("Created config file: {}", path.display());
            println!();
            println!("Next steps:");
            println!("  1. Create an admin: planline user add --email you@example.com --role ADMIN");
            println!("  2. Issue a token:   planline token --email you@example.com");
            println!(
                "  3. Start the server: planline serve --config {}",
                path.display()
            );

            Ok(())
        }

        Commands::User { action, config } => {
            let cfg = load_config(config)?;
            let db = open_database(&cfg)?;

            match action {
                UserAction::Add { email, name, role } => {
                    let email = email.trim().to_ascii_lowercase();
                    if !service::is_valid_email(&email) {
                        anyhow::bail!("'{email}' is not an email address");
                    }
                    let user = db.transaction(|store| {
                        if store.find_user_by_email(&email)?.is_some() {
                            return Err(error::DomainError::validation(format!(
                                "user {email} already exists"
                            )));
                        }
                        store.insert_user(&email, name.as_deref(), role)
                    })?;
                    println!("Created {} user {} ({})", user.global_role, user.email, user.id);
                }
                UserAction::List => {
                    let users = db.read(|store| store.list_users())?;
                    if users.is_empty() {
                        println!("No users yet.");
                    }
                    for user in users {
                        println!(
                            "  {:<8} {} {}",
                            user.global_role,
                            user.email,
                            user.name.unwrap_or_default()
                        );
                    }
                }
            }
            Ok(())
        }

        Commands::Token {
            email,
            list,
            revoke,
            config,
        } => {
            let cfg = load_config(config)?;
            let db = open_database(&cfg)?;

            if list {
                let holders = db.read(|store| store.token_holders())?;
                if holders.is_empty() {
                    println!("No tokens issued.");
                    println!("Issue one with: planline token --email <email>");
                } else {
                    println!("Users with API tokens:");
                    println!();
                    for (user, token_id) in holders {
                        println!(
                            "  {} ({}) - {}{}_...",
                            user.email,
                            user.global_role,
                            config::TOKEN_PREFIX,
                            token_id
                        );
                    }
                }
                return Ok(());
            }

            if let Some(email) = revoke {
                let revoked = db.transaction(|store| match store.find_user_by_email(&email)? {
                    Some(user) => store.set_token(&user.id, None),
                    None => Ok(false),
                })?;
                if revoked {
                    println!("Revoked token for '{}'.", email);
                } else {
                    println!("User '{}' not found.", email);
                }
                return Ok(());
            }

            let Some(email) = email else {
                anyhow::bail!("Pass --email to issue a token, or --list / --revoke");
            };

            let (token_id, token) = generate_token();
            let token_hash = config::hash_token(&token)?;
            let issued = db.transaction(|store| match store.find_user_by_email(&email)? {
                Some(user) => store.set_token(&user.id, Some((&token_id, &token_hash))),
                None => Ok(false),
            })?;
            if !issued {
                anyhow::bail!("User '{email}' not found; create it with 'planline user add'");
            }

            println!("Issued API token for '{}'\n", email);
            println!("Token: {}\n", token);
            println!("Send it as: Authorization: Bearer {}", token);
            println!("Issuing a new token replaces any previous one.");
            println!("Save this token now - it cannot be retrieved later!");

            Ok(())
        }

        Commands::Seed { config } => {
            let cfg = load_config(config)?;
            let db = open_database(&cfg)?;

            match seed::seed_demo(&db)? {
                Some(report) => {
                    println!("Seeded demo project {}", report.project_id);
                    println!("  tasks: {}", report.task_ids.join(", "));
                    println!("  issue: {}", report.issue_id);
                    println!("Users: admin@example.com, pm@example.com, member@example.com");
                }
                None => println!("Demo data already present; nothing to do."),
            }
            Ok(())
        }

        Commands::Schedule {
            file,
            date,
            horizon,
            resource,
            csv,
            config,
        } => {
            let cfg = load_config(config)?;
            let source = file.or(cfg.schedule.source.clone());
            let schedule = construction::ConstructionSchedule::resolve(source.as_deref())?;
            let tasks = construction::flatten_schedule(&schedule);

            if csv {
                println!("{}", schedule::to_csv(&tasks));
                return Ok(());
            }

            let reference = match date {
                Some(raw) => dates::parse_instant(&raw)?,
                None => chrono::Utc::now(),
            };
            let options = schedule::ReportOptions {
                reference,
                horizon_days: horizon.unwrap_or(cfg.schedule.default_horizon_days),
                resource,
            };
            let report = schedule::ScheduleReport::build(tasks, &options)?;
            let output = api::ScheduleResponse { schedule, report };
            println!("{}", serde_json::to_string_pretty(&output)?);

            Ok(())
        }
    }
}

async fn run_server(config: Config) -> Result<()> {
    let db = open_database(&config)?;

    let state = api::AppState::new(db, config.clone());
    let app = api::create_router(state);

    let addr = format!("{}:{}", config.server.bind, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    if config.auth.dev_admin_fallback {
        tracing::warn!("Anonymous requests act as the first global admin (auth.dev_admin_fallback)");
    }
    tracing::info!("planline server listening on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

fn random_alphanumeric(len: usize) -> String {
    use rand::Rng;
    let mut rng = rand::rng();

    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

    (0..len)
        .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
        .collect()
}

/// A fresh `plk_<id>_<secret>` token and its lookup id
fn generate_token() -> (String, String) {
    let token_id = random_alphanumeric(8);
    let token = format!(
        "{}{}_{}",
        config::TOKEN_PREFIX,
        token_id,
        random_alphanumeric(32)
    );
    (token_id, token)
}
