use crate::commands::common::{normalize_item_id, Session};
use crate::error::CliError;

pub async fn run_remove(session: &Session, item_id: &str) -> Result<(), CliError> {
    let item_id = normalize_item_id(item_id)?;

    if !session.watchlist.remove(&item_id).await? {
        return Err(CliError::NotInWatchlist(item_id));
    }

    println!("Removed {item_id}");
    Ok(())
}
