use keyring::Entry;
use tracing::debug;

use super::token::TokenState;
use crate::config::Mode;
use crate::error::StorageError;

const SERVICE: &str = "kiwoomctl";

/// The issued token as JSON in the user's keyring, one entry per mode.
pub struct TokenStorage {
    entry: Entry,
}

impl TokenStorage {
    pub fn for_mode(mode: Mode) -> Result<Self, StorageError> {
        let entry = Entry::new(SERVICE, &format!("{mode} token"))?;
        Ok(Self { entry })
    }

    /// The saved token, or `None` if nothing was saved yet.
    pub fn load(&self) -> Result<Option<TokenState>, StorageError> {
        match self.entry.get_password() {
            Ok(contents) => Ok(Some(decode(&contents)?)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    pub fn save(&self, state: &TokenState) -> Result<(), StorageError> {
        self.entry.set_password(&encode(state)?)?;
        debug!("saved token to keyring");
        Ok(())
    }

    /// Removes the saved token. Nothing saved is not an error.
    pub fn clear(&self) -> Result<(), StorageError> {
        match self.entry.delete_password() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

fn encode(state: &TokenState) -> Result<String, StorageError> {
    Ok(serde_json::to_string(state)?)
}

fn decode(contents: &str) -> Result<TokenState, StorageError> {
    Ok(serde_json::from_str(contents)?)
}
