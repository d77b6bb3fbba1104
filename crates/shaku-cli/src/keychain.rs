use anyhow::{Context, Result};
use keyring::Entry;

const SERVICE_NAME: &str = "shaku";

/// OS keychain storage for the account password, keyed by username.
pub struct Keychain;

impl Keychain {
    /// Store a password in the OS keychain
    pub fn store(username: &str, password: &str) -> Result<()> {
        let entry = Entry::new(SERVICE_NAME, username)
            .context("Failed to create keyring entry")?;
        entry
            .set_password(password)
            .context("Failed to store password in keychain")?;
        Ok(())
    }

    /// Password for `username`, if one was stored earlier
    pub fn password(username: &str) -> Option<String> {
        Entry::new(SERVICE_NAME, username)
            .and_then(|entry| entry.get_password())
            .ok()
    }
}
