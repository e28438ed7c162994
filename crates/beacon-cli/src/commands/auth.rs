use std::path::Path;

use beacon_core::auth::OfflineCredentials;

use crate::cli::AuthCommands;
use crate::commands::common::open_store;
use crate::error::CliError;

pub async fn run_auth(command: AuthCommands, db_path: &Path) -> Result<(), CliError> {
    let credentials = OfflineCredentials::new(open_store(db_path).await?);

    match command {
        AuthCommands::Remember { username, password } => {
            credentials.remember(&username, &password).await?;
            println!("Offline login enabled for {username}");
        }
        AuthCommands::Verify { username, password } => {
            if !credentials.verify(&username, &password).await? {
                return Err(CliError::VerificationFailed(username));
            }
            println!("Password verified for {username}");
        }
        AuthCommands::Forget { username } => {
            credentials.forget(&username).await?;
            println!("Forgot offline credentials for {username}");
        }
    }
    Ok(())
}
