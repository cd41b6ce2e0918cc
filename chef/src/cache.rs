// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Per-recipe persistent state driving skip/rebuild decisions.
//!
//! The cache is a single JSON document, mutated only inside an explicit
//! `begin`/`commit` transaction and replaced atomically on commit. An
//! advisory file lock serializes invocations sharing a recipe root.

use std::collections::BTreeMap;
use std::io;
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};

use fs_err::{self as fs, File};
use log::warn;
use nix::fcntl::{flock, FlockArg};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// File name of the cache document inside the recipe root
pub const CACHE_FILE: &str = ".vchcache";

const LOCK_FILE: &str = ".vchcache.lock";
const TMP_FILE: &str = ".vchcache.tmp";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct Document {
    #[serde(default)]
    keystore: BTreeMap<String, String>,
    #[serde(default)]
    packages: Vec<String>,
    #[serde(default)]
    ingredients: Vec<String>,
}

pub struct Cache {
    path: PathBuf,
    tmp_path: PathBuf,
    document: Document,
    pending: Option<Document>,
    // Held for the cache's lifetime
    _lock: Lock,
}

impl Cache {
    /// Open the cache document in `root`, creating empty state when the
    /// document does not exist yet. Blocks while another invocation
    /// holds the same recipe root.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, Error> {
        let root = root.as_ref();
        let path = root.join(CACHE_FILE);
        let tmp_path = root.join(TMP_FILE);

        let lock = Lock::acquire(root.join(LOCK_FILE))?;

        let document = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| Error::Corrupt {
                path: path.clone(),
                source,
            })?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Document::default(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            tmp_path,
            document,
            pending: None,
            _lock: lock,
        })
    }

    /// Begin a transaction; exactly one may be outstanding
    pub fn begin(&mut self) -> Result<(), Error> {
        if self.pending.is_some() {
            return Err(Error::TransactionInProgress);
        }
        self.pending = Some(self.document.clone());
        Ok(())
    }

    /// Atomically persist the pending mutations: the new document is
    /// written to a tmp sibling and renamed over the old one
    pub fn commit(&mut self) -> Result<(), Error> {
        let pending = self.pending.take().ok_or(Error::NoTransaction)?;

        let bytes = serde_json::to_vec_pretty(&pending).map_err(Error::Serialize)?;
        fs::write(&self.tmp_path, bytes)?;
        fs::rename(&self.tmp_path, &self.path)?;

        self.document = pending;
        Ok(())
    }

    /// Discard the pending mutations, restoring the pre-begin state
    pub fn abort(&mut self) {
        self.pending = None;
    }

    pub fn in_transaction(&self) -> bool {
        self.pending.is_some()
    }

    fn state(&self) -> &Document {
        self.pending.as_ref().unwrap_or(&self.document)
    }

    fn state_mut(&mut self) -> Result<&mut Document, Error> {
        self.pending.as_mut().ok_or(Error::NoTransaction)
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.state().keystore.get(key).cloned()
    }

    pub fn set_string(&mut self, key: impl ToString, value: impl ToString) -> Result<(), Error> {
        self.state_mut()?.keystore.insert(key.to_string(), value.to_string());
        Ok(())
    }

    /// True iff the stored value is exactly `"true"`
    pub fn get_bool(&self, key: &str) -> bool {
        self.get_string(key).as_deref() == Some("true")
    }

    pub fn set_bool(&mut self, key: impl ToString, value: bool) -> Result<(), Error> {
        self.set_string(key, if value { "true" } else { "false" })
    }

    pub fn mark_step_complete(&mut self, part: &str, step: &str) -> Result<(), Error> {
        self.set_bool(format!("{part}-{step}"), true)
    }

    pub fn clear_step_complete(&mut self, part: &str, step: &str) -> Result<(), Error> {
        self.set_bool(format!("{part}-{step}"), false)
    }

    pub fn is_step_complete(&self, part: &str, step: &str) -> bool {
        self.get_bool(&format!("{part}-{step}"))
    }

    pub fn mark_part_sourced(&mut self, part: &str) -> Result<(), Error> {
        self.set_bool(format!("{part}-sourced"), true)
    }

    pub fn is_part_sourced(&self, part: &str) -> bool {
        self.get_bool(&format!("{part}-sourced"))
    }

    /// Compare the desired host-package set against the last
    /// provisioned one. Additions and removals are disjoint.
    pub fn package_diff(&self, desired: &[String]) -> Vec<PackageDelta> {
        let current = &self.state().packages;

        let mut diff: Vec<_> = desired
            .iter()
            .filter(|name| !current.contains(name))
            .map(|name| PackageDelta {
                name: name.clone(),
                kind: DeltaKind::Added,
            })
            .collect();

        diff.extend(
            current
                .iter()
                .filter(|name| !desired.contains(name))
                .map(|name| PackageDelta {
                    name: name.clone(),
                    kind: DeltaKind::Removed,
                }),
        );

        diff
    }

    /// Apply a computed diff to the provisioned set (transaction
    /// required)
    pub fn commit_package_diff(&mut self, diff: &[PackageDelta]) -> Result<(), Error> {
        let state = self.state_mut()?;

        for delta in diff {
            match delta.kind {
                DeltaKind::Added => {
                    if !state.packages.contains(&delta.name) {
                        state.packages.push(delta.name.clone());
                    }
                }
                DeltaKind::Removed => state.packages.retain(|name| name != &delta.name),
                DeltaKind::Updated => {}
            }
        }

        Ok(())
    }

    /// Ingredient identities last materialized into the kitchen
    pub fn ingredients(&self) -> &[String] {
        &self.state().ingredients
    }

    pub fn set_ingredients(&mut self, identities: Vec<String>) -> Result<(), Error> {
        self.state_mut()?.ingredients = identities;
        Ok(())
    }
}

impl Drop for Cache {
    fn drop(&mut self) {
        if self.pending.is_some() {
            warn!("cache dropped with an open transaction, discarding");
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageDelta {
    pub name: String,
    pub kind: DeltaKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaKind {
    Added,
    Removed,
    Updated,
}

/// An acquired advisory lock guaranteeing exclusive access to one
/// recipe root; released when dropped
struct Lock(#[allow(unused)] File);

impl Lock {
    fn acquire(path: PathBuf) -> Result<Self, Error> {
        let file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)?;

        match flock(file.file().as_raw_fd(), FlockArg::LockExclusiveNonblock) {
            Ok(_) => {}
            Err(nix::errno::Errno::EWOULDBLOCK) => {
                warn!("another invocation holds this recipe, waiting");
                flock(file.file().as_raw_fd(), FlockArg::LockExclusive).map_err(Error::Lock)?;
            }
            Err(e) => return Err(Error::Lock(e)),
        }

        Ok(Self(file))
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("a transaction is already in progress")]
    TransactionInProgress,
    #[error("no transaction in progress")]
    NoTransaction,
    #[error("corrupt cache document, delete {path:?} to reset")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("serialize cache document")]
    Serialize(#[source] serde_json::Error),
    #[error("obtaining exclusive file lock")]
    Lock(#[source] nix::Error),
    #[error("io")]
    Io(#[from] io::Error),
}

#[cfg(test)]
mod test {
    use super::*;

    fn desired(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn missing_document_opens_empty() {
        let root = tempfile::tempdir().unwrap();
        let cache = Cache::open(root.path()).unwrap();

        assert_eq!(cache.get_string("anything"), None);
        assert!(!root.path().join(CACHE_FILE).exists());
    }

    #[test]
    fn commit_persists_abort_does_not() {
        let root = tempfile::tempdir().unwrap();

        {
            let mut cache = Cache::open(root.path()).unwrap();
            cache.begin().unwrap();
            cache.set_string("A", "1").unwrap();
            // Dropped without commit
        }

        {
            let mut cache = Cache::open(root.path()).unwrap();
            assert_eq!(cache.get_string("A"), None);

            cache.begin().unwrap();
            cache.set_string("A", "1").unwrap();
            cache.commit().unwrap();
        }

        let cache = Cache::open(root.path()).unwrap();
        assert_eq!(cache.get_string("A").as_deref(), Some("1"));
    }

    #[test]
    fn transaction_misuse_is_fatal() {
        let root = tempfile::tempdir().unwrap();
        let mut cache = Cache::open(root.path()).unwrap();

        assert!(matches!(cache.set_string("A", "1"), Err(Error::NoTransaction)));
        assert!(matches!(cache.commit(), Err(Error::NoTransaction)));

        cache.begin().unwrap();
        assert!(matches!(cache.begin(), Err(Error::TransactionInProgress)));

        cache.abort();
        cache.begin().unwrap();
        cache.commit().unwrap();
    }

    #[test]
    fn bool_encoding() {
        let root = tempfile::tempdir().unwrap();
        let mut cache = Cache::open(root.path()).unwrap();

        cache.begin().unwrap();
        cache.set_bool("flag", true).unwrap();
        assert_eq!(cache.get_string("flag").as_deref(), Some("true"));
        assert!(cache.get_bool("flag"));

        cache.set_bool("flag", false).unwrap();
        assert_eq!(cache.get_string("flag").as_deref(), Some("false"));
        assert!(!cache.get_bool("flag"));

        // Anything but "true" reads false
        cache.set_string("flag", "yes").unwrap();
        assert!(!cache.get_bool("flag"));
    }

    #[test]
    fn step_and_sourced_keys() {
        let root = tempfile::tempdir().unwrap();
        let mut cache = Cache::open(root.path()).unwrap();

        cache.begin().unwrap();
        cache.mark_step_complete("core", "build").unwrap();
        cache.mark_part_sourced("core").unwrap();
        cache.commit().unwrap();

        assert!(cache.is_step_complete("core", "build"));
        assert!(!cache.is_step_complete("core", "install"));
        assert!(cache.is_part_sourced("core"));
        assert_eq!(cache.get_string("core-build").as_deref(), Some("true"));
        assert_eq!(cache.get_string("core-sourced").as_deref(), Some("true"));

        cache.begin().unwrap();
        cache.clear_step_complete("core", "build").unwrap();
        cache.commit().unwrap();
        assert!(!cache.is_step_complete("core", "build"));
    }

    #[test]
    fn package_diff_laws() {
        let root = tempfile::tempdir().unwrap();
        let mut cache = Cache::open(root.path()).unwrap();

        cache.begin().unwrap();
        cache
            .commit_package_diff(&cache.package_diff(&desired(&["make", "gcc"])))
            .unwrap();
        cache.commit().unwrap();

        let diff = cache.package_diff(&desired(&["make", "cmake"]));

        let added: Vec<_> = diff.iter().filter(|d| d.kind == DeltaKind::Added).collect();
        let removed: Vec<_> = diff.iter().filter(|d| d.kind == DeltaKind::Removed).collect();
        assert_eq!(added.len(), 1);
        assert_eq!(added[0].name, "cmake");
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].name, "gcc");

        // Added and removed are disjoint
        assert!(added.iter().all(|a| removed.iter().all(|r| r.name != a.name)));

        cache.begin().unwrap();
        cache.commit_package_diff(&diff).unwrap();
        cache.commit().unwrap();

        // Applying then re-computing on unchanged input is empty
        assert!(cache.package_diff(&desired(&["make", "cmake"])).is_empty());
    }

    #[test]
    fn corrupt_document_reported() {
        let root = tempfile::tempdir().unwrap();
        fs::write(root.path().join(CACHE_FILE), b"{ not json").unwrap();

        assert!(matches!(Cache::open(root.path()), Err(Error::Corrupt { .. })));
    }

    #[test]
    fn roundtrip_document() {
        let root = tempfile::tempdir().unwrap();

        {
            let mut cache = Cache::open(root.path()).unwrap();
            cache.begin().unwrap();
            cache.set_string("kitchen_uuid", "abc").unwrap();
            cache.set_ingredients(vec!["stable/libfoo/2.1".into()]).unwrap();
            cache
                .commit_package_diff(&cache.package_diff(&desired(&["make"])))
                .unwrap();
            cache.commit().unwrap();
        }

        let cache = Cache::open(root.path()).unwrap();
        assert_eq!(cache.get_string("kitchen_uuid").as_deref(), Some("abc"));
        assert_eq!(cache.ingredients(), ["stable/libfoo/2.1".to_owned()]);
        assert!(cache.package_diff(&desired(&["make"])).is_empty());
    }
}
