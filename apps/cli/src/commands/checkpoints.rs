//! `fractal checkpoints`: list live checkpoint records.

use anyhow::Result;
use colored::Colorize;
use fractal_core::ClientConfig;
use fractal_training::{CheckpointStore, TaskLayout};

pub fn execute(config: &ClientConfig, json: bool) -> Result<()> {
    let store = CheckpointStore::new(TaskLayout::for_data_dir(&config.client.data_dir));
    let records = store.list()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No checkpoints found.");
        return Ok(());
    }

    println!("{}", "Checkpoints".bold());
    for record in &records {
        println!(
            "  task {} epoch {:<4} {}  {}",
            format!("{:<8}", record.task_id).cyan(),
            record.last_epoch,
            record.weights_file,
            record.checkpoint_timestamp.format("%Y-%m-%d %H:%M:%S UTC").to_string().dimmed()
        );
    }
    Ok(())
}
