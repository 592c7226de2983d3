use std::env;
use std::fs;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use uuid::Uuid;

use collabdoc::{
    config::AppConfig,
    db::{self, PgPool},
    services::{export, sessions},
};

const USAGE: &str = "Usage: maintenance <command>\n\
    \n\
    Commands:\n  \
    export-markdown <session-id> [output]\n  \
    export-html <session-id> [output]\n  \
    regenerate-invite <session-id>";

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt().with_target(false).compact().init();

    let mut args = env::args().skip(1);
    match args.next().as_deref() {
        Some(command @ ("export-markdown" | "export-html")) => {
            let session_id = session_arg(args.next())?;
            export_session(command, session_id, args.next())?;
        }
        Some("regenerate-invite") => {
            let session_id = session_arg(args.next())?;
            regenerate_invite(session_id)?;
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

fn session_arg(raw: Option<String>) -> Result<Uuid> {
    let Some(raw) = raw else {
        eprintln!("{USAGE}");
        std::process::exit(1);
    };
    Uuid::parse_str(&raw).with_context(|| format!("invalid session id: {raw}"))
}

fn connect() -> Result<PgPool> {
    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "maintenance",
        database_url = %config.redacted_database_url(),
        pool_size = config.database_max_pool_size,
        "loaded configuration"
    );
    db::init_pool_with_size(&config.database_url, config.database_max_pool_size)
}

fn export_session(command: &str, session_id: Uuid, output: Option<String>) -> Result<()> {
    let pool = connect()?;
    let mut conn = pool.get().context("failed to get database connection")?;
    let snapshot = export::load_snapshot(&mut conn, session_id)
        .with_context(|| format!("failed to load session {session_id}"))?;

    let (body, extension) = match command {
        "export-markdown" => (export::render_markdown(&snapshot), "md"),
        "export-html" => (
            export::render_html(&snapshot, Utc::now().naive_utc()),
            "html",
        ),
        other => bail!("unsupported export: {other}"),
    };

    let path = output.unwrap_or_else(|| export::export_filename(&snapshot.session.title, extension));
    fs::write(&path, body).with_context(|| format!("failed to write {path}"))?;
    println!(
        "Exported \"{}\" ({} documents) to {path}",
        snapshot.session.title,
        snapshot.documents.len()
    );
    Ok(())
}

fn regenerate_invite(session_id: Uuid) -> Result<()> {
    let pool = connect()?;
    let mut conn = pool.get().context("failed to get database connection")?;
    let session = sessions::find_session(&mut conn, session_id)?;
    let updated = sessions::regenerate_invite_code(&mut conn, &session)?;
    println!("New invite code for \"{}\": {}", updated.title, updated.invite_code);
    Ok(())
}
