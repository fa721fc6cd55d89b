//! `chatrelay history`: Print recent records of a daily log.

use chatrelay_config::AppConfig;
use chatrelay_memory::HistoryStore;
use chatrelay_memory::history::{is_date_key, today_key};

pub async fn run(
    config: &AppConfig,
    date: Option<String>,
    limit: Option<usize>,
) -> Result<(), Box<dyn std::error::Error>> {
    let date = date.unwrap_or_else(today_key);
    if !is_date_key(&date) {
        return Err(format!("Invalid date '{date}', expected YYYYMMDD").into());
    }
    let limit = limit.unwrap_or(config.generation.history_count);

    let store = HistoryStore::new(config.storage.history_dir.clone());
    tracing::debug!(date = %date, limit, dir = %store.dir().display(), "Reading history");
    let records = store.recent(&date, limit).await;

    if records.is_empty() {
        println!("No records for {date} in {}", store.dir().display());
        return Ok(());
    }

    println!("📜 {} record(s) from {}\n", records.len(), store.path_for(&date).display());
    for record in &records {
        println!("{record}\n");
    }
    Ok(())
}
