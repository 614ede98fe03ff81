use crate::commands::common::{format_record_lines, record_to_list_item, RecordListItem, Session};
use crate::error::CliError;

pub async fn run_list(session: &Session, as_json: bool, include_removed: bool) -> Result<(), CliError> {
    let records = if include_removed {
        // Timestamps are never negative, so this is every tracked record
        let mut records = session.watchlist.store().get_modified_since(0).await?;
        records.sort_by(|a, b| b.added_at.cmp(&a.added_at));
        records
    } else {
        session.watchlist.items()
    };

    if as_json {
        let json_items = records
            .iter()
            .map(record_to_list_item)
            .collect::<Vec<RecordListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("Watchlist is empty.");
        return Ok(());
    }

    for line in format_record_lines(&records) {
        println!("{line}");
    }
    Ok(())
}
