use reelsync_core::models::record_id_for;

use crate::commands::common::{normalize_item_id, Session};
use crate::error::CliError;

pub async fn run_toggle_watched(session: &Session, item_id: &str) -> Result<(), CliError> {
    let item_id = normalize_item_id(item_id)?;

    let record = session
        .watchlist
        .toggle_watched(&record_id_for(&item_id))
        .await?
        .ok_or_else(|| CliError::NotInWatchlist(item_id.clone()))?;

    let label = if record.watched { "watched" } else { "unwatched" };
    println!("{item_id}: {label}");
    Ok(())
}

/// Empty `text` clears the notes.
pub async fn run_notes(session: &Session, item_id: &str, text: &[String]) -> Result<(), CliError> {
    let item_id = normalize_item_id(item_id)?;

    let record = session
        .watchlist
        .update_notes(&record_id_for(&item_id), &text.join(" "))
        .await?
        .ok_or_else(|| CliError::NotInWatchlist(item_id.clone()))?;

    match record.notes {
        Some(notes) => println!("{item_id}: {notes}"),
        None => println!("{item_id}: notes cleared"),
    }
    Ok(())
}
