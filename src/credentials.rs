//! Credential lookup for providers.
//!
//! Credentials are flat string mappings stored in named secrets, grouped by namespace.
//! Their contents are not validated here, each provider checks for the fields it needs.

use std::{
    collections::HashMap,
    fs, io,
    path::{Path, PathBuf},
};

use log::{debug, trace};
#[cfg(test)]
use mockall::automock;
use thiserror::Error;

/// Flat mapping of credential field names to values
pub type Credentials = HashMap<String, String>;

/// A store of named secrets
#[cfg_attr(test, automock)]
pub trait SecretStore: Send + Sync {
    /// Load the secret `name` in `namespace`
    fn load(&self, namespace: &str, name: &str) -> Result<Credentials, CredentialError>;
}

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("secret {namespace}/{name} not found")]
    NotFound { namespace: String, name: String },
    #[error("failed to get secret {namespace}/{name}: {source}")]
    Unreadable {
        namespace: String,
        name: String,
        #[source]
        source: io::Error,
    },
}

/// Secrets laid out as directories of files: `<root>/<namespace>/<name>/<field>`.
///
/// This matches the layout of secrets mounted as volumes, where every key becomes one file.
/// Hidden entries (such as the `..data` links created by the kubelet) are skipped.
/// Values are used verbatim apart from a single trailing newline.
#[derive(Debug, Clone)]
pub struct DirectorySecretStore {
    root: PathBuf,
}

impl DirectorySecretStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DirectorySecretStore { root: root.into() }
    }

    fn read_dir(&self, dir: &Path, namespace: &str, name: &str) -> io::Result<Credentials> {
        let mut credentials = Credentials::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let field = entry.file_name().to_string_lossy().into_owned();
            if field.starts_with('.') || !entry.path().is_file() {
                trace!("Skipping entry {} in secret {}/{}", field, namespace, name);
                continue;
            }
            let value = fs::read_to_string(entry.path())?;
            let value = value
                .strip_suffix('\n')
                .map(|v| v.strip_suffix('\r').unwrap_or(v))
                .unwrap_or(&value)
                .to_string();
            credentials.insert(field, value);
        }
        Ok(credentials)
    }
}

impl SecretStore for DirectorySecretStore {
    fn load(&self, namespace: &str, name: &str) -> Result<Credentials, CredentialError> {
        let not_found = || CredentialError::NotFound {
            namespace: namespace.to_string(),
            name: name.to_string(),
        };
        // Reject anything that would escape the store root
        let valid = |s: &str| !s.is_empty() && s != "." && s != ".." && !s.contains('/');
        if !valid(namespace) || !valid(name) {
            return Err(not_found());
        }

        let dir = self.root.join(namespace).join(name);
        if !dir.is_dir() {
            return Err(not_found());
        }
        let credentials =
            self.read_dir(&dir, namespace, name)
                .map_err(|source| CredentialError::Unreadable {
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                    source,
                })?;
        debug!(
            "Loaded {} credential keys from secret {}/{}",
            credentials.len(),
            namespace,
            name
        );
        Ok(credentials)
    }
}
