use std::env;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing_subscriber::EnvFilter;

use collab_engine::{
    config::AppConfig,
    db,
    notifications::LoggingGateway,
    reminders,
    sweeps,
};

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let mut args = env::args().skip(1);
    match args.next().as_deref() {
        Some("check-deadlines") => check_deadlines()?,
        Some("retry-notifications") => retry_notifications()?,
        Some("send-reminders") => {
            let kind = args.next();
            if let Some(kind) = kind.as_deref() {
                let known = [
                    reminders::KIND_DAY_3,
                    reminders::KIND_DAY_7,
                    reminders::KIND_DAY_14,
                    reminders::KIND_AUTO_DISPUTE,
                ];
                if !known.contains(&kind) {
                    eprintln!("Unknown reminder type: {kind}");
                    std::process::exit(1);
                }
            }
            send_reminders(kind.as_deref())?;
        }
        Some(cmd) => {
            eprintln!("Unknown command: {cmd}\n{USAGE}");
            std::process::exit(1);
        }
        None => {
            eprintln!("{USAGE}");
            std::process::exit(1);
        }
    }

    Ok(())
}

const USAGE: &str = "Usage: sweeper <check-deadlines | retry-notifications | send-reminders [type]>";

fn check_deadlines() -> Result<()> {
    let config = load_config("check-deadlines")?;
    let mut conn = connect(&config)?;

    let closed = sweeps::run_deadline_sweep(
        &mut conn,
        Utc::now().naive_utc(),
        config.sweep_chunk_size,
    )?;

    println!("Auto-closed {closed} expired collaboration requests.");
    Ok(())
}

fn retry_notifications() -> Result<()> {
    let config = load_config("retry-notifications")?;
    let mut conn = connect(&config)?;

    let recovered = sweeps::run_notification_retry_sweep(
        &mut conn,
        &LoggingGateway,
        Utc::now().naive_utc(),
        config.sweep_chunk_size,
    )?;

    println!("Successfully retried {recovered} notifications.");
    Ok(())
}

fn send_reminders(kind: Option<&str>) -> Result<()> {
    let config = load_config("send-reminders")?;
    let mut conn = connect(&config)?;

    let outcome = sweeps::run_reminder_sweep(
        &mut conn,
        &LoggingGateway,
        Utc::now().naive_utc(),
        kind,
        config.sweep_chunk_size,
    )?;

    println!("Reminder sending completed:");
    println!("- Sent: {}", outcome.sent);
    println!("- Failed: {}", outcome.failed);
    println!("- Total: {}", outcome.total);
    Ok(())
}

fn load_config(command: &str) -> Result<AppConfig> {
    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "sweeper",
        command,
        database_url = %config.redacted_database_url(),
        pool_size = config.database_max_pool_size,
        chunk_size = config.sweep_chunk_size,
        "loaded sweeper configuration"
    );
    Ok(config)
}

fn connect(config: &AppConfig) -> Result<db::PgPooledConnection> {
    let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
    pool.get().context("failed to get database connection")
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
