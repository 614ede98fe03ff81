use serde::Serialize;

use crate::commands::common::{format_sync_timestamp, Session};
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub device_id: String,
    pub db_path: String,
    pub items: usize,
    pub pending: usize,
    pub last_sync: Option<i64>,
    pub remote_url: Option<String>,
    pub owner_id: Option<String>,
    pub sync_state: String,
    pub last_error: Option<String>,
}

pub async fn collect_status(session: &Session) -> Result<StatusReport, CliError> {
    let watchlist = &session.watchlist;
    let metadata = watchlist.store().sync_metadata().await?;

    Ok(StatusReport {
        device_id: watchlist.device().to_string(),
        db_path: session.db_path.display().to_string(),
        items: watchlist.items().len(),
        pending: watchlist.pending_count().await?,
        last_sync: metadata.and_then(|meta| meta.last_sync),
        remote_url: session.remote().map(|config| config.base_url.clone()),
        owner_id: session.remote().and_then(|config| config.owner_id.clone()),
        sync_state: watchlist.sync().state().to_string(),
        last_error: watchlist
            .sync()
            .last_error()
            .or_else(|| watchlist.last_error()),
    })
}

pub async fn run_status(session: &Session, as_json: bool) -> Result<(), CliError> {
    let status = collect_status(session).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("Device:    {}", status.device_id);
    println!("Database:  {}", status.db_path);
    println!("Items:     {}", status.items);
    println!("Pending:   {}", status.pending);
    match status.last_sync {
        Some(at) => println!("Last sync: {}", format_sync_timestamp(at)),
        None => println!("Last sync: never"),
    }
    match (&status.remote_url, &status.owner_id) {
        (Some(url), Some(owner)) => println!("Remote:    {url} (owner {owner})"),
        _ => println!("Remote:    not configured"),
    }
    println!("State:     {}", status.sync_state);
    if let Some(error) = status.last_error {
        println!("Error:     {error}");
    }
    Ok(())
}

pub fn run_device(session: &Session) {
    println!("{}", session.watchlist.device());
}
