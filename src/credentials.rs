//! Credential guard consulted on registration and password changes.
//!
//! Identities are claimed first-come: registering an identity with no stored
//! credential and a non-empty proof stores that proof; from then on the same
//! proof is required. Proofs are kept as salted SHA-256 digests.
//!
//! Two stores are provided:
//! - [`MemoryCredentials`] - process lifetime only
//! - [`FileCredentials`] - JSON file rewritten on every change by a
//!   background writer thread, so the hub never blocks on disk I/O

use std::collections::BTreeMap;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::mpsc as std_mpsc;
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::RegisterError;

/// Salt size for stored digests.
const SALT_SIZE: usize = 16;

/// Keyed credential lookup used by the hub.
pub trait CredentialGuard: Send {
    /// Whether `identity` has a stored credential.
    fn has_credential(&self, identity: &str) -> bool;

    /// Whether `proof` matches the stored credential. Empty proofs never match.
    fn verify(&self, identity: &str, proof: &str) -> bool;

    /// Store or overwrite the credential for `identity`.
    fn set(&mut self, identity: &str, proof: &str) -> Result<()>;
}

/// Apply the registration policy for `identity` presenting `proof`.
///
/// - Stored credential: `proof` must be non-empty and verify.
/// - No stored credential: a non-empty `proof` is stored, an empty one is
///   accepted without storing anything.
pub fn authorize(
    guard: &mut dyn CredentialGuard,
    identity: &str,
    proof: &str,
) -> Result<(), RegisterError> {
    if guard.has_credential(identity) {
        if proof.is_empty() || !guard.verify(identity, proof) {
            return Err(RegisterError::AuthenticationRejected(identity.to_string()));
        }
    } else if !proof.is_empty() {
        // The in-memory entry is already updated when persisting fails.
        if let Err(e) = guard.set(identity, proof) {
            log::error!("[Credentials] Failed to persist credential for {identity}: {e:#}");
        }
    }
    Ok(())
}

/// Salted digest of a proof.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredCredential {
    salt: String,
    digest: String,
}

impl StoredCredential {
    fn derive(proof: &str) -> Self {
        let mut salt = [0u8; SALT_SIZE];
        rand::rng().fill_bytes(&mut salt);
        Self {
            salt: BASE64.encode(salt),
            digest: BASE64.encode(digest(&salt, proof)),
        }
    }

    fn matches(&self, proof: &str) -> bool {
        if proof.is_empty() {
            return false;
        }
        let Ok(salt) = BASE64.decode(&self.salt) else {
            return false;
        };
        BASE64.encode(digest(&salt, proof)) == self.digest
    }
}

fn digest(salt: &[u8], proof: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(proof.as_bytes());
    hasher.finalize().into()
}

/// In-memory credential store.
#[derive(Debug, Default)]
pub struct MemoryCredentials {
    entries: BTreeMap<String, StoredCredential>,
}

impl MemoryCredentials {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialGuard for MemoryCredentials {
    fn has_credential(&self, identity: &str) -> bool {
        self.entries.contains_key(identity)
    }

    fn verify(&self, identity: &str, proof: &str) -> bool {
        self.entries
            .get(identity)
            .is_some_and(|stored| stored.matches(proof))
    }

    fn set(&mut self, identity: &str, proof: &str) -> Result<()> {
        self.entries
            .insert(identity.to_string(), StoredCredential::derive(proof));
        Ok(())
    }
}

/// Suffix given to a store file that could not be parsed.
const QUARANTINE_SUFFIX: &str = ".corrupt";

/// Credential store persisted as a JSON file.
///
/// Lookups are served from memory. Every change queues a snapshot for the
/// writer thread; dropping the store waits for queued writes to finish.
#[derive(Debug)]
pub struct FileCredentials {
    path: PathBuf,
    inner: MemoryCredentials,
    writer: StoreWriter,
}

impl FileCredentials {
    /// Open the store at `path`.
    ///
    /// A missing file yields an empty store; the file is created on the
    /// first change. A file that cannot be loaded is renamed to
    /// `<name>.corrupt` and the store starts empty.
    ///
    /// # Errors
    ///
    /// Returns an error if an unreadable file cannot be moved aside, so it
    /// is never overwritten.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = match Self::load(&path) {
            Ok(entries) => entries,
            Err(e) => {
                let aside = quarantine(&path).with_context(|| {
                    format!("Refusing to replace unreadable {}", path.display())
                })?;
                log::warn!(
                    "[Credentials] Moved unreadable store to {}, starting empty: {e:#}",
                    aside.display()
                );
                BTreeMap::new()
            }
        };
        log::info!(
            "[Credentials] Loaded {} credential(s) from {}",
            entries.len(),
            path.display()
        );
        Ok(Self {
            writer: StoreWriter::new(path.clone()),
            path,
            inner: MemoryCredentials { entries },
        })
    }

    fn load(path: &Path) -> Result<BTreeMap<String, StoredCredential>> {
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("Invalid JSON in {}", path.display()))
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialGuard for FileCredentials {
    fn has_credential(&self, identity: &str) -> bool {
        self.inner.has_credential(identity)
    }

    fn verify(&self, identity: &str, proof: &str) -> bool {
        self.inner.verify(identity, proof)
    }

    /// Updates memory and queues the write. Write failures are logged by
    /// the writer thread; an error here means the writer is gone.
    fn set(&mut self, identity: &str, proof: &str) -> Result<()> {
        self.inner.set(identity, proof)?;
        let snapshot = serde_json::to_string_pretty(&self.inner.entries)?;
        self.writer.save(snapshot)
    }
}

/// Rename `path` to `<name>.corrupt`, returning the new location.
fn quarantine(path: &Path) -> Result<PathBuf> {
    let mut name = path
        .file_name()
        .with_context(|| format!("{} has no file name", path.display()))?
        .to_os_string();
    name.push(QUARANTINE_SUFFIX);
    let aside = path.with_file_name(name);
    std::fs::rename(path, &aside)
        .with_context(|| format!("Failed to move {} aside", path.display()))?;
    Ok(aside)
}

/// Write `json` to `path` with owner-only permissions.
fn write_store(path: &Path, json: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;

    // Set restrictive permissions (owner read/write only)
    #[cfg(unix)]
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;

    Ok(())
}

/// Background thread that writes the newest queued store snapshot.
///
/// Closing the channel stops the thread once everything queued is written.
struct StoreWriter {
    request_tx: Option<std_mpsc::Sender<String>>,
    thread_handle: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for StoreWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreWriter")
            .field("running", &self.thread_handle.is_some())
            .finish_non_exhaustive()
    }
}

impl StoreWriter {
    fn new(path: PathBuf) -> Self {
        let (request_tx, request_rx) = std_mpsc::channel();
        let thread_handle = thread::Builder::new()
            .name("credential-writer".to_string())
            .spawn(move || Self::worker_loop(&path, &request_rx));

        let thread_handle = match thread_handle {
            Ok(handle) => Some(handle),
            Err(e) => {
                log::error!("[Credentials] Failed to start writer thread: {e}");
                None
            }
        };
        Self {
            request_tx: thread_handle.as_ref().map(|_| request_tx),
            thread_handle,
        }
    }

    /// Writer loop - runs on dedicated thread.
    fn worker_loop(path: &Path, request_rx: &std_mpsc::Receiver<String>) {
        while let Ok(mut snapshot) = request_rx.recv() {
            // Only the newest queued snapshot matters.
            while let Ok(newer) = request_rx.try_recv() {
                snapshot = newer;
            }
            match write_store(path, &snapshot) {
                Ok(()) => log::debug!("[Credentials] Saved {}", path.display()),
                Err(e) => log::error!("[Credentials] Failed to persist store: {e:#}"),
            }
        }
    }

    /// Queue a snapshot for writing.
    fn save(&self, snapshot: String) -> Result<()> {
        self.request_tx
            .as_ref()
            .context("Credential writer is not running")?
            .send(snapshot)
            .ok()
            .context("Credential writer stopped")
    }
}

impl Drop for StoreWriter {
    fn drop(&mut self) {
        self.request_tx.take();
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}
