//! Encrypted local credential store
//!
//! A store directory holds two files:
//! - `secret.passphrase`: base64 of 64 random bytes
//! - `secret.db`: JSON object mapping entry names to sealed values
//!
//! Credentials are saved as pairs of entries, `<key>_username` and
//! `<key>_password`.

mod cipher;

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use thiserror::Error;
use tracing::{debug, error, info};

pub const PASSPHRASE_FILE: &str = "secret.passphrase";
pub const SECRETS_DB_FILE: &str = "secret.db";
pub const USERNAME_SUFFIX: &str = "_username";
pub const PASSWORD_SUFFIX: &str = "_password";

#[derive(Error, Debug)]
pub enum SecretError {
    #[error("secret store I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("secret store is corrupt: {0}")]
    Corrupt(String),

    #[error("could not decrypt entry '{0}' (wrong passphrase or tampered data)")]
    Decryption(String),

    #[error("cipher error: {0}")]
    Crypto(String),

    #[error("secret store is empty")]
    Empty,

    #[error("no entry named '{0}'")]
    NotFound(String),
}

/// Source of named credentials
pub trait CredentialProvider: Send + Sync {
    fn username(&self, key: &str) -> Option<String>;

    fn password(&self, key: &str) -> Option<String>;

    /// Both halves of a credential pair, when both exist
    fn pair(&self, key: &str) -> Option<(String, String)> {
        Some((self.username(key)?, self.password(key)?))
    }
}

/// File-backed secret store
pub struct SecretStore {
    dir: PathBuf,
    passphrase: Vec<u8>,
    db: BTreeMap<String, String>,
}

impl SecretStore {
    /// Open the store in `dir`, creating the passphrase if it is missing
    ///
    /// A regenerated passphrase makes any existing database unreadable, so the
    /// old database is removed.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, SecretError> {
        let dir = dir.as_ref().to_path_buf();
        let passphrase_path = dir.join(PASSPHRASE_FILE);
        let db_path = dir.join(SECRETS_DB_FILE);

        let encoded = match fs::read_to_string(&passphrase_path) {
            Ok(content) if !content.trim().is_empty() => content,
            _ => {
                debug!("Passphrase file does not exist, recreating");
                fs::create_dir_all(&dir).map_err(|source| SecretError::Io {
                    path: dir.clone(),
                    source,
                })?;
                let fresh = cipher::generate_passphrase();
                write_private(&passphrase_path, &fresh)?;
                if db_path.exists() {
                    fs::remove_file(&db_path).map_err(|source| SecretError::Io {
                        path: db_path.clone(),
                        source,
                    })?;
                }
                fresh
            }
        };

        let passphrase = B64
            .decode(encoded.trim())
            .map_err(|e| SecretError::Corrupt(format!("passphrase is not base64: {e}")))?;

        let db = match fs::read_to_string(&db_path) {
            Ok(content) if !content.trim().is_empty() => serde_json::from_str(&content)
                .map_err(|e| SecretError::Corrupt(format!("{}: {e}", db_path.display())))?,
            _ => BTreeMap::new(),
        };

        Ok(Self {
            dir,
            passphrase,
            db,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn get(&self, key: &str) -> Result<String, SecretError> {
        let sealed = self
            .db
            .get(key)
            .ok_or_else(|| SecretError::NotFound(key.to_string()))?;
        cipher::open(&self.passphrase, key, sealed)
    }

    /// Store a value and persist the database
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), SecretError> {
        let sealed = cipher::seal(&self.passphrase, key, value)?;
        self.db.insert(key.to_string(), sealed);
        self.save()
    }

    pub fn set_username(&mut self, key: &str, value: &str) -> Result<(), SecretError> {
        self.set(&format!("{key}{USERNAME_SUFFIX}"), value)
    }

    pub fn set_password(&mut self, key: &str, value: &str) -> Result<(), SecretError> {
        self.set(&format!("{key}{PASSWORD_SUFFIX}"), value)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.db.contains_key(&format!("{key}{USERNAME_SUFFIX}"))
            || self.db.contains_key(&format!("{key}{PASSWORD_SUFFIX}"))
    }

    /// Remove both entries of a credential pair
    pub fn delete_section(&mut self, key: &str) -> Result<(), SecretError> {
        if self.db.is_empty() {
            info!("Secret DB file is empty");
            return Err(SecretError::Empty);
        }
        for suffix in [USERNAME_SUFFIX, PASSWORD_SUFFIX] {
            let entry = format!("{key}{suffix}");
            if self.db.remove(&entry).is_none() {
                return Err(SecretError::NotFound(entry));
            }
        }
        self.save()
    }

    /// Credential keys, without their suffixes
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .db
            .keys()
            .filter_map(|k| {
                k.strip_suffix(USERNAME_SUFFIX)
                    .or_else(|| k.strip_suffix(PASSWORD_SUFFIX))
            })
            .map(str::to_string)
            .collect();
        keys.dedup();
        keys
    }

    fn save(&self) -> Result<(), SecretError> {
        let path = self.dir.join(SECRETS_DB_FILE);
        let content =
            serde_json::to_string_pretty(&self.db).map_err(|e| SecretError::Corrupt(e.to_string()))?;
        write_private(&path, &content)
    }

    fn lookup(&self, entry: &str) -> Option<String> {
        match self.get(entry) {
            Ok(value) => Some(value),
            Err(SecretError::NotFound(_)) => None,
            Err(e) => {
                error!(entry, "Failed to read secret: {}", e);
                None
            }
        }
    }
}

impl CredentialProvider for SecretStore {
    fn username(&self, key: &str) -> Option<String> {
        self.lookup(&format!("{key}{USERNAME_SUFFIX}"))
    }

    fn password(&self, key: &str) -> Option<String> {
        self.lookup(&format!("{key}{PASSWORD_SUFFIX}"))
    }
}

fn write_private(path: &Path, content: &str) -> Result<(), SecretError> {
    fs::write(path, content).map_err(|source| SecretError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|source| {
            SecretError::Io {
                path: path.to_path_buf(),
                source,
            }
        })?;
    }

    Ok(())
}

/// Fixed in-memory credentials
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    pairs: HashMap<String, (Option<String>, Option<String>)>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pair(mut self, key: &str, username: &str, password: &str) -> Self {
        self.pairs.insert(
            key.to_string(),
            (Some(username.to_string()), Some(password.to_string())),
        );
        self
    }

    /// A key holding only a password, as used for bearer tokens
    pub fn with_token(mut self, key: &str, token: &str) -> Self {
        self.pairs
            .insert(key.to_string(), (None, Some(token.to_string())));
        self
    }
}

impl CredentialProvider for StaticCredentials {
    fn username(&self, key: &str) -> Option<String> {
        self.pairs.get(key).and_then(|(u, _)| u.clone())
    }

    fn password(&self, key: &str) -> Option<String> {
        self.pairs.get(key).and_then(|(_, p)| p.clone())
    }
}
