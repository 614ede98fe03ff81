use crate::commands::common::{
    format_sync_conflict_lines, sync_conflict_to_item, Session, SyncConflictItem,
};
use crate::error::CliError;

pub async fn run_sync(session: &Session) -> Result<(), CliError> {
    let report = session.sync_now().await?;
    println!(
        "Sync completed: pulled {}, pushed {}, purged {}, conflicts {}",
        report.pulled, report.pushed, report.purged, report.conflicts
    );
    Ok(())
}

pub async fn run_sync_conflicts(
    session: &Session,
    limit: usize,
    as_json: bool,
) -> Result<(), CliError> {
    let conflicts = session.watchlist.store().list_conflicts(limit).await?;

    if as_json {
        let json_items = conflicts
            .iter()
            .map(sync_conflict_to_item)
            .collect::<Vec<SyncConflictItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if conflicts.is_empty() {
        println!("No sync conflicts recorded.");
        return Ok(());
    }

    for line in format_sync_conflict_lines(&conflicts) {
        println!("{line}");
    }
    Ok(())
}
