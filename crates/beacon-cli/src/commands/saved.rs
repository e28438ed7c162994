use std::path::Path;

use crate::cli::SavedCommands;
use crate::commands::common::open_store;
use crate::error::CliError;

fn resource_key(key: &str) -> Result<&str, CliError> {
    let key = key.trim();
    if key.is_empty() {
        return Err(CliError::EmptyResourceKey);
    }
    Ok(key)
}

pub async fn run_saved(command: SavedCommands, db_path: &Path) -> Result<(), CliError> {
    let store = open_store(db_path).await?;

    match command {
        SavedCommands::Put { key, value } => {
            let key = resource_key(&key)?;
            let value = serde_json::from_str::<serde_json::Value>(&value)?;
            store.put_resource(key, &value).await?;
            println!("Saved {key}");
        }
        SavedCommands::Get { key } => {
            let key = resource_key(&key)?;
            match store.get_resource::<serde_json::Value>(key).await? {
                Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                None => println!("Nothing saved under {key}"),
            }
        }
        SavedCommands::List => {
            let keys = store.resource_keys().await?;
            if keys.is_empty() {
                println!("No saved resources.");
            }
            for key in keys {
                println!("{key}");
            }
        }
        SavedCommands::Remove { key } => {
            let key = resource_key(&key)?;
            store.delete_resource(key).await?;
            println!("Removed {key}");
        }
    }
    Ok(())
}
