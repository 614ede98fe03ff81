use crate::commands::common::{normalize_item_id, normalize_title, Session};
use crate::error::CliError;

pub async fn run_add(
    session: &Session,
    item_id: &str,
    title_parts: &[String],
    image_ref: &str,
) -> Result<(), CliError> {
    let item_id = normalize_item_id(item_id)?;
    let title = normalize_title(title_parts)?;

    let record = session
        .watchlist
        .add(&item_id, &title, image_ref.trim())
        .await?;

    println!("{}", record.id);
    Ok(())
}
