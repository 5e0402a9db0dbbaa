//! The reconciler: coordinates the local store and the replicated store
//! under a single writer lock on the replicated store (the `gitlock`).
//!
//! Grounded on `numbex-daemon.py`'s `import_from_p2p`/`export_to_p2p`/
//! `fetch_from_peers` and its `_startup` bootstrap ordering.

use std::path::Path;
use std::path::PathBuf;

use chrono::NaiveDateTime;
use rand::seq::SliceRandom;
use tokio::sync::Mutex;

use crate::error::Error;
use crate::key::PubKey;
use crate::merge;
use crate::replicated::RepoStore;
use crate::store::ChangeKind;
use crate::store::Store;

/// A peer known to the reconciler's fetch loop: an identity and a URL the
/// replicated store's git backend can add as a remote.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Peer {
    pub name: String,
    pub url: String,
}

/// Replace everything but ASCII alphanumerics, `-`, and `_` with `_`, so a
/// peer identity is always safe to use as a git remote name.
pub fn sanitize_remote_name(peer: &str) -> String {
    return peer
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
}

/// Coordinates the local store (C) and replicated store (D) per §4.6. Holds
/// the replicated store behind a `tokio::sync::Mutex` — the `gitlock` that
/// serializes every read-modify-write operation against it.
pub struct Reconciler {
    db_path: PathBuf,
    repo: Mutex<RepoStore>,
    import_window: chrono::Duration,
    export_window: chrono::Duration,
}

fn now() -> NaiveDateTime {
    return chrono::Utc::now().naive_utc();
}

impl Reconciler {
    pub fn open(db_path: impl Into<PathBuf>, repo_path: impl AsRef<Path>) -> Result<Reconciler, Error> {
        let db_path = db_path.into();
        // Fail fast if the schema can't be created; the reconciler itself
        // opens a fresh connection per operation afterward.
        Store::open(&db_path)?;
        let repo = RepoStore::open_or_init(repo_path)?;
        return Ok(Reconciler {
            db_path,
            repo: Mutex::new(repo),
            import_window: chrono::Duration::hours(96),
            export_window: chrono::Duration::hours(96),
        });
    }

    pub fn with_windows(mut self, import_window: chrono::Duration, export_window: chrono::Duration) -> Reconciler {
        self.import_window = import_window;
        self.export_window = export_window;
        return self;
    }

    fn open_store(&self) -> Result<Store, Error> {
        return Store::open(&self.db_path);
    }

    /// A closure usable as the signature-verification key source for
    /// `RepoStore::import_data`/`merge::merge_peer_branch`: opens a fresh
    /// read connection per call. A repeated-call caching layer would be a
    /// reasonable production follow-up (see DESIGN.md).
    fn key_lookup(&self) -> impl Fn(&str) -> Vec<PubKey> + '_ {
        return move |owner: &str| match self.open_store() {
            Ok(store) => store.public_keys_for(owner).unwrap_or_default(),
            Err(e) => {
                tracing::warn!("could not open local store for key lookup: {}", e);
                Vec::new()
            }
        };
    }

    /// If the local store is empty, bootstrap it from the replicated
    /// store's full state; else if the replicated store is empty, seed it
    /// from the local store. Mirrors the legacy daemon's startup ordering.
    pub async fn bootstrap(&self) -> Result<(), Error> {
        let store = self.open_store()?;
        if store.ranges_empty()? {
            return self.import_from_replicated(true).await;
        }
        let repo_empty = self.repo.lock().await.export_all()?.is_empty();
        if repo_empty {
            self.export_to_replicated(true).await?;
        }
        return Ok(());
    }

    /// Import from the replicated store into the local store.
    ///
    /// With `force_all`, or when the local store is empty, imports the
    /// replicated store's entire current state. Otherwise refuses with
    /// `DatabaseDirty` if the local journal has unexported changes, else
    /// imports only what changed in the replicated store within the
    /// configured import window.
    pub async fn import_from_replicated(&self, force_all: bool) -> Result<(), Error> {
        let mut store = self.open_store()?;
        let full = force_all || store.ranges_empty()?;

        if !full && store.has_changes()? {
            return Err(Error::DatabaseDirty);
        }

        let records = {
            let repo = self.repo.lock().await;
            if full {
                repo.export_all()?
            } else {
                repo.export_since(now() - self.import_window)?
            }
        };

        if !records.is_empty() {
            store.update(&records, now())?;
        }
        store.clear_change_journal()?;
        return Ok(());
    }

    /// Export local changes into the replicated store. Trivially succeeds
    /// (no-op) unless `force_all` or the local journal is non-empty. On
    /// import failure into the replicated store the local journal is
    /// preserved so the next export retries the same changes.
    pub async fn export_to_replicated(&self, force_all: bool) -> Result<bool, Error> {
        let store = self.open_store()?;
        if !force_all && !store.has_changes()? {
            return Ok(true);
        }

        let journal = store.get_change_journal()?;
        let since = now() - self.export_window;
        let mut modified_starts: Vec<String> = Vec::new();
        let mut deletions: Vec<String> = Vec::new();
        for entry in &journal {
            if entry.changed_at < since && !force_all {
                continue;
            }
            match entry.kind {
                ChangeKind::Added | ChangeKind::Modified => modified_starts.push(entry.start.clone()),
                ChangeKind::Deleted => deletions.push(entry.start.clone()),
            }
        }
        modified_starts.sort();
        modified_starts.dedup();
        deletions.sort();
        deletions.dedup();

        let mut records = Vec::with_capacity(modified_starts.len());
        for start in &modified_starts {
            if let Some(rec) = store.get_range(start)? {
                records.push(rec);
            }
        }

        let mut repo = self.repo.lock().await;
        repo.reload()?;
        let ok = repo.import_data(&records, &deletions, self.key_lookup())?;

        if ok {
            store.clear_change_journal()?;
        }
        return Ok(ok);
    }

    /// Fetch and merge from each peer in `peers` (or all configured peers
    /// if empty), one at a time, under the writer lock throughout. A peer
    /// whose merge fails with `InconsistentData` makes this call fail
    /// fast, matching §5's sticky fatal-error behavior at the worker level.
    pub async fn fetch_from_peers(&self, peers: &[Peer]) -> Result<(), Error> {
        for peer in peers {
            let remote = sanitize_remote_name(&peer.name);
            let mut repo = self.repo.lock().await;
            repo.add_remote(&remote, &peer.url, true)?;
            repo.fetch_from_remote(&remote)?;

            let peer_ref = format!("refs/remotes/{}/master", remote);
            merge::merge_peer_branch(&mut repo, &peer_ref, self.key_lookup())?;
            repo.fix_overlaps()?;
        }
        return Ok(());
    }

    /// Pick one peer at random from `peers` and fetch/merge from it.
    pub async fn fetch_from_random_peer(&self, peers: &[Peer]) -> Result<(), Error> {
        let Some(peer) = peers.choose(&mut rand::thread_rng()) else {
            return Ok(());
        };
        return self.fetch_from_peers(std::slice::from_ref(peer)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::generate_key_pair;
    use crate::record::parse_mdate;
    use crate::record::Record;
    use dsa::pkcs8::EncodePublicKey;

    fn rec(start: &str, end: &str, owner: &str, mdate: &str, key: &crate::key::PrivKey) -> Record {
        let mut r = Record {
            start: start.to_string(),
            end: end.to_string(),
            sip: format!("sip.{}.example", owner),
            owner: owner.to_string(),
            mdate: parse_mdate(mdate).unwrap(),
            sig: String::new(),
        };
        r.sign(key);
        return r;
    }

    #[tokio::test]
    async fn bootstrap_imports_when_local_store_is_empty() {
        let db_dir = tempfile::tempdir().unwrap();
        let repo_dir = tempfile::tempdir().unwrap();
        let reconciler = Reconciler::open(db_dir.path().join("numbex.db"), repo_dir.path()).unwrap();

        let (priv_key, pub_key) = generate_key_pair();
        let pem = pub_key.0.to_public_key_pem(Default::default()).unwrap();
        Store::open(db_dir.path().join("numbex.db")).unwrap().register_public_key("acme", &pem).unwrap();

        {
            let mut repo = reconciler.repo.lock().await;
            repo.import_data(&[rec("+481000", "+481999", "acme", "2012-01-01T00:00:00", &priv_key)], &[], |_| {
                vec![pub_key.clone()]
            })
            .unwrap();
        }

        reconciler.bootstrap().await.unwrap();

        let store = reconciler.open_store().unwrap();
        assert_eq!(store.get_all().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn export_refuses_without_changes_unless_forced() {
        let db_dir = tempfile::tempdir().unwrap();
        let repo_dir = tempfile::tempdir().unwrap();
        let reconciler = Reconciler::open(db_dir.path().join("numbex.db"), repo_dir.path()).unwrap();

        let ok = reconciler.export_to_replicated(false).await.unwrap();
        assert!(ok);
        assert!(reconciler.repo.lock().await.export_all().unwrap().is_empty());
    }

    #[tokio::test]
    async fn import_refuses_when_local_journal_is_dirty() {
        let db_dir = tempfile::tempdir().unwrap();
        let repo_dir = tempfile::tempdir().unwrap();
        let reconciler = Reconciler::open(db_dir.path().join("numbex.db"), repo_dir.path()).unwrap();

        let (priv_key, _pub_key) = generate_key_pair();
        let mut store = reconciler.open_store().unwrap();
        store.update(&[rec("+481000", "+481999", "acme", "2012-01-01T00:00:00", &priv_key)], now()).unwrap();

        let result = reconciler.import_from_replicated(false).await;
        assert!(matches!(result, Err(Error::DatabaseDirty)));
    }

    #[test]
    fn sanitize_remote_name_strips_unsafe_characters() {
        assert_eq!(sanitize_remote_name("peer.example.com:8080"), "peer_example_com_8080");
    }
}
