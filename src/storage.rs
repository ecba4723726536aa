/// Access token persistence with pluggable storage
use crate::error::StorageError;
use fs2::FileExt;
use keyring::Entry;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

const TOKEN_MASK_PREFIX_LEN: usize = 6;
const TOKEN_MASK_SUFFIX_LEN: usize = 4;

/// Opaque OAuth access token
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw token, for placing on outgoing requests
    pub fn secret(&self) -> &str {
        &self.0
    }

    /// Token with its middle elided, safe for logs
    pub fn masked(&self) -> String {
        let len = self.0.len();
        if len <= TOKEN_MASK_PREFIX_LEN + TOKEN_MASK_SUFFIX_LEN || !self.0.is_ascii() {
            return "*".repeat(len.min(8));
        }
        format!(
            "{}...{}",
            &self.0[..TOKEN_MASK_PREFIX_LEN],
            &self.0[len - TOKEN_MASK_SUFFIX_LEN..]
        )
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccessToken({})", self.masked())
    }
}

/// Identifier of the account a token belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for AccountId {
    fn default() -> Self {
        Self("default".to_string())
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Secure key-value storage for access tokens
///
/// `put` overwrites any existing token for the account. `get` returns
/// `Ok(None)` when nothing is stored; `Err` is reserved for backend failures.
pub trait TokenStore: Send + Sync {
    /// Store a token, replacing any previous one
    fn put(&self, account: &AccountId, token: &AccessToken) -> Result<(), StorageError>;

    /// Get the token for an account
    fn get(&self, account: &AccountId) -> Result<Option<AccessToken>, StorageError>;

    /// Delete the token for an account; deleting a missing token succeeds
    fn delete(&self, account: &AccountId) -> Result<(), StorageError>;
}

/// In-memory storage implementation
///
/// Thread-safe and process-local. Suitable for testing and short-lived sessions.
#[derive(Debug, Default, Clone)]
pub struct MemoryTokenStore {
    tokens: Arc<RwLock<HashMap<AccountId, AccessToken>>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenStore for MemoryTokenStore {
    fn put(&self, account: &AccountId, token: &AccessToken) -> Result<(), StorageError> {
        self.tokens.write().insert(account.clone(), token.clone());
        Ok(())
    }

    fn get(&self, account: &AccountId) -> Result<Option<AccessToken>, StorageError> {
        Ok(self.tokens.read().get(account).cloned())
    }

    fn delete(&self, account: &AccountId) -> Result<(), StorageError> {
        self.tokens.write().remove(account);
        Ok(())
    }
}

/// File-based storage following XDG conventions
///
/// Tokens live in `<data_dir>/<app_name>/tokens.json` as a map of account to
/// token. Writers serialize on an exclusive lock of `tokens.lock` in the same
/// directory, so concurrent processes never interleave updates.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    base_path: PathBuf,
}

impl FileTokenStore {
    /// Create a file store under the user's data directory
    ///
    /// Checks `$XDG_DATA_HOME` first and falls back to the platform data
    /// directory (`~/.local/share` on Linux, `AppData` on Windows).
    ///
    /// # Example
    ///
    /// ```no_run
    /// use pinauth::storage::FileTokenStore;
    ///
    /// let store = FileTokenStore::new("my-app").unwrap();
    /// ```
    pub fn new(app_name: &str) -> Result<Self, StorageError> {
        let base_dir = match std::env::var_os("XDG_DATA_HOME") {
            Some(xdg_data) if !xdg_data.is_empty() => PathBuf::from(xdg_data),
            _ => dirs::data_dir().ok_or_else(|| {
                StorageError::Backend("could not determine data directory".to_string())
            })?,
        };

        Self::with_path(base_dir.join(app_name))
    }

    /// Create a file store rooted at a custom directory
    pub fn with_path(path: PathBuf) -> Result<Self, StorageError> {
        fs::create_dir_all(&path)?;
        Ok(Self { base_path: path })
    }

    pub fn base_path(&self) -> &PathBuf {
        &self.base_path
    }

    fn tokens_path(&self) -> PathBuf {
        self.base_path.join("tokens.json")
    }

    fn load(&self) -> Result<HashMap<AccountId, AccessToken>, StorageError> {
        let path = self.tokens_path();
        if !path.exists() {
            return Ok(HashMap::new());
        }

        let content = fs::read_to_string(&path)?;
        serde_json::from_str(&content).map_err(|e| StorageError::Corrupt(e.to_string()))
    }

    fn save(&self, tokens: &HashMap<AccountId, AccessToken>) -> Result<(), StorageError> {
        let content = serde_json::to_string_pretty(tokens)
            .map_err(|e| StorageError::Corrupt(e.to_string()))?;

        // Write beside the target then rename, so readers never see a partial file.
        let tmp_path = self.base_path.join("tokens.json.tmp");
        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&tmp_path)?;
        file.write_all(content.as_bytes())?;
        file.sync_all()?;
        fs::rename(&tmp_path, self.tokens_path())?;
        Ok(())
    }

    /// Run `update` on the token map while holding the write lock
    fn modify<F>(&self, update: F) -> Result<(), StorageError>
    where
        F: FnOnce(&mut HashMap<AccountId, AccessToken>) -> bool,
    {
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.base_path.join("tokens.lock"))?;
        lock_file.lock_exclusive()?;

        let mut tokens = self.load()?;
        if update(&mut tokens) {
            self.save(&tokens)?;
        }
        // Lock released when lock_file is dropped.
        Ok(())
    }
}

impl TokenStore for FileTokenStore {
    fn put(&self, account: &AccountId, token: &AccessToken) -> Result<(), StorageError> {
        debug!(account = %account, path = %self.tokens_path().display(), "storing token");
        self.modify(|tokens| {
            tokens.insert(account.clone(), token.clone());
            true
        })
    }

    fn get(&self, account: &AccountId) -> Result<Option<AccessToken>, StorageError> {
        Ok(self.load()?.remove(account))
    }

    fn delete(&self, account: &AccountId) -> Result<(), StorageError> {
        self.modify(|tokens| tokens.remove(account).is_some())
    }
}

/// Secure storage using the OS credential manager
///
/// - macOS / iOS: Keychain
/// - Windows: Credential Manager
/// - Linux: Secret Service API (libsecret)
#[derive(Debug, Clone)]
pub struct KeyringTokenStore {
    service: String,
}

impl KeyringTokenStore {
    /// # Example
    ///
    /// ```no_run
    /// use pinauth::storage::KeyringTokenStore;
    ///
    /// let store = KeyringTokenStore::new("my-app");
    /// // Tokens stored under service "pinauth-my-app"
    /// ```
    pub fn new(app_name: &str) -> Self {
        Self {
            service: format!("pinauth-{}", app_name),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    fn entry(&self, account: &AccountId) -> Result<Entry, StorageError> {
        Ok(Entry::new(&self.service, account.as_str())?)
    }
}

impl TokenStore for KeyringTokenStore {
    fn put(&self, account: &AccountId, token: &AccessToken) -> Result<(), StorageError> {
        debug!(account = %account, service = %self.service, "storing token in keyring");
        self.entry(account)?.set_password(token.secret())?;

        // A write is only kept if a fresh entry reads it back.
        match self.entry(account)?.get_password() {
            Ok(stored) if stored == token.secret() => Ok(()),
            Ok(_) | Err(keyring::Error::NoEntry) => Err(StorageError::Backend(format!(
                "keyring service {} did not persist the credential",
                self.service
            ))),
            Err(e) => Err(e.into()),
        }
    }

    fn get(&self, account: &AccountId) -> Result<Option<AccessToken>, StorageError> {
        match self.entry(account)?.get_password() {
            Ok(secret) => Ok(Some(AccessToken::new(secret))),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn delete(&self, account: &AccountId) -> Result<(), StorageError> {
        match self.entry(account)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
