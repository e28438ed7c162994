use std::path::Path;

use beacon_core::contacts::ContactBook;
use beacon_core::EmergencyContact;

use crate::cli::ContactsCommands;
use crate::commands::common::{http_remote, load_config, open_store};
use crate::error::CliError;

async fn open_book(db_path: &Path) -> Result<(ContactBook, beacon_core::SyncConfig), CliError> {
    let config = load_config()?;
    let store = open_store(db_path).await?;
    let book = ContactBook::new(store, config.codec()?, config.max_contacts);
    Ok((book, config))
}

pub fn format_contact_line(contact: &EmergencyContact) -> String {
    let short_id = contact.id.chars().take(13).collect::<String>();
    match &contact.relationship {
        Some(relationship) => format!(
            "{short_id}  {} ({relationship})  {}",
            contact.name, contact.phone
        ),
        None => format!("{short_id}  {}  {}", contact.name, contact.phone),
    }
}

pub async fn run_contacts(command: ContactsCommands, db_path: &Path) -> Result<(), CliError> {
    let (book, config) = open_book(db_path).await?;

    match command {
        ContactsCommands::Add {
            name,
            phone,
            relationship,
        } => {
            let mut contact = EmergencyContact::new(name, phone);
            contact.relationship = relationship;
            let contact = book.add(contact).await?;
            println!("Added {} ({})", contact.name, contact.id);
        }
        ContactsCommands::List { json } => {
            let contacts = book.list().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&contacts)?);
            } else if contacts.is_empty() {
                println!("No emergency contacts.");
            } else {
                for contact in &contacts {
                    println!("{}", format_contact_line(contact));
                }
            }
        }
        ContactsCommands::Remove { id } => {
            if book.remove(id.trim()).await? {
                println!("Removed {id}");
            } else {
                println!("No contact with id {id}");
            }
        }
        ContactsCommands::Sync => {
            let remote = http_remote(&config)?;
            let merged = book.sync(&remote).await?;
            println!("Contacts synced; {} kept", merged.len());
        }
    }
    Ok(())
}
