//! The replicated store: a DVCS-backed, content-addressed history of range
//! blobs. Every record lives at the path its start number derives to;
//! history and replication are entirely git's.

use std::collections::HashSet;
use std::path::Path;

use chrono::NaiveDateTime;
use git2::Oid;
use git2::Repository;
use git2::Tree;

use crate::error::Error;
use crate::key::PubKey;
use crate::record::Record;
use crate::replicated::blob;
use crate::replicated::path;

pub(crate) fn digits_of(number: &str) -> &str {
    return number.trim_start_matches('+');
}

pub(crate) fn split_components(repo_path: &str) -> Vec<&str> {
    return repo_path.split('/').collect();
}

/// Insert `blob_oid` at `components` under `base`, rebuilding only the
/// path's ancestor trees and reusing everything else unchanged.
pub(crate) fn tree_insert(repo: &Repository, base: Option<&Tree>, components: &[&str], blob_oid: Oid) -> Result<Oid, git2::Error> {
    let mut builder = repo.treebuilder(base)?;
    if components.len() == 1 {
        builder.insert(components[0], blob_oid, 0o100644)?;
    } else {
        let subtree = base
            .and_then(|t| t.get_name(components[0]))
            .and_then(|e| e.to_object(repo).ok())
            .and_then(|o| o.into_tree().ok());
        let sub_oid = tree_insert(repo, subtree.as_ref(), &components[1..], blob_oid)?;
        builder.insert(components[0], sub_oid, 0o040000)?;
    }
    return builder.write();
}

/// Remove `components` from `base`, pruning any ancestor directory that
/// becomes empty as a result. Returns `None` when the removal empties the
/// tree entirely.
pub(crate) fn tree_remove(repo: &Repository, base: &Tree, components: &[&str]) -> Result<Option<Oid>, git2::Error> {
    let mut builder = repo.treebuilder(Some(base))?;
    if components.len() == 1 {
        let _ = builder.remove(components[0]);
    } else if let Some(entry) = base.get_name(components[0]) {
        if let Ok(Some(subtree)) = entry.to_object(repo).map(|o| o.into_tree().ok()) {
            match tree_remove(repo, &subtree, &components[1..])? {
                Some(sub_oid) => {
                    builder.insert(components[0], sub_oid, 0o040000)?;
                }
                None => {
                    let _ = builder.remove(components[0]);
                }
            }
        }
    }
    if builder.len()? == 0 {
        return Ok(None);
    }
    return Ok(Some(builder.write()?));
}

pub(crate) fn collect_records(repo: &Repository, tree: &Tree) -> Result<Vec<Record>, Error> {
    let mut records = Vec::new();
    let mut walk_err = None;
    tree.walk(git2::TreeWalkMode::PreOrder, |_, entry| {
        if entry.kind() != Some(git2::ObjectType::Blob) {
            return git2::TreeWalkResult::Ok;
        }
        let Ok(object) = entry.to_object(repo) else {
            return git2::TreeWalkResult::Ok;
        };
        let Some(data) = object.as_blob().map(|b| b.content().to_vec()) else {
            return git2::TreeWalkResult::Ok;
        };
        let Ok(text) = String::from_utf8(data) else {
            return git2::TreeWalkResult::Ok;
        };
        match blob::parse_blob(&text) {
            Ok(rec) => records.push(rec),
            Err(e) => walk_err = Some(e),
        }
        return git2::TreeWalkResult::Ok;
    })?;
    if let Some(e) = walk_err {
        return Err(e.into());
    }
    return Ok(records);
}

/// Grouped connected components of mutually overlapping records, found via
/// union-find over every overlapping pair.
pub(crate) fn group_overlaps(records: &[Record]) -> Result<Vec<Vec<Record>>, Error> {
    use crate::interval::Interval;
    use crate::interval::IntervalIndex;

    let mut index: IntervalIndex<usize> = IntervalIndex::new();
    for (i, rec) in records.iter().enumerate() {
        index.insert(Interval::new(rec.start_int()?, rec.end_int()?), i);
    }

    let mut parent: Vec<usize> = (0..records.len()).collect();
    fn find(parent: &mut [usize], i: usize) -> usize {
        if parent[i] != i {
            parent[i] = find(parent, parent[i]);
        }
        return parent[i];
    }
    for (a, b) in index.all_overlapping_pairs() {
        let ra = find(&mut parent, *a);
        let rb = find(&mut parent, *b);
        if ra != rb {
            parent[ra] = rb;
        }
    }

    let mut groups: std::collections::HashMap<usize, Vec<Record>> = Default::default();
    for i in 0..records.len() {
        let root = find(&mut parent, i);
        groups.entry(root).or_default().push(records[i].clone());
    }
    return Ok(groups.into_values().filter(|g| g.len() > 1).collect());
}

/// A replicated range store backed by a git repository.
pub struct RepoStore {
    repo: Repository,
}

impl RepoStore {
    pub fn open_or_init(path: impl AsRef<Path>) -> Result<RepoStore, Error> {
        let repo = match Repository::open_bare(path.as_ref()) {
            Ok(r) => r,
            Err(_) => Repository::init_bare(path.as_ref())?,
        };
        return Ok(RepoStore { repo });
    }

    pub fn path(&self) -> &Path {
        return self.repo.path();
    }

    /// Re-open the repository handle from disk. A cheap no-op for libgit2
    /// (refs are always read fresh), kept so the reconciler's export path
    /// can mirror the legacy daemon's explicit `reload()` call before each
    /// export.
    pub fn reload(&mut self) -> Result<(), Error> {
        self.repo = Repository::open_bare(self.repo.path())?;
        return Ok(());
    }

    /// The underlying repository handle, for the merge engine's plumbing
    /// operations (three-way merge, conflict resolution, scratch commits)
    /// that don't belong in this store's own public surface.
    pub(crate) fn repo(&self) -> &Repository {
        return &self.repo;
    }

    pub(crate) fn head_commit(&self) -> Option<git2::Commit<'_>> {
        return self.repo.head().ok().and_then(|h| h.peel_to_commit().ok());
    }

    pub(crate) fn head_tree(&self) -> Result<Option<Tree<'_>>, Error> {
        return Ok(self.head_commit().map(|c| c.tree()).transpose()?);
    }

    pub(crate) fn head_ref_name(&self) -> Result<String, Error> {
        return Ok(self.repo.head()?.name().unwrap_or("refs/heads/master").to_string());
    }

    /// Overlapping groups (size > 1) present in an arbitrary tree, not
    /// necessarily the current HEAD. Used by the merge engine to sanity
    /// check each side independently before merging.
    pub(crate) fn overlaps_in_tree(&self, tree: &Tree) -> Result<Vec<Vec<Record>>, Error> {
        let records = collect_records(&self.repo, tree)?;
        return group_overlaps(&records);
    }

    /// Force the current branch to point at `commit_oid`. Used by the merge
    /// engine to publish a scratch merge commit only once it is fully built
    /// and validated; never leaves the branch pointing at a partial result.
    pub(crate) fn set_branch_head(&mut self, commit_oid: Oid) -> Result<(), Error> {
        let head_name = self.head_ref_name()?;
        self.repo.reference(&head_name, commit_oid, true, "merge")?;
        return Ok(());
    }

    /// Verify every incoming record's signature, apply insertions and
    /// deletions in one commit, then check the post-commit state for
    /// overlaps. On overlap, the commit is rolled back and `Ok(false)` is
    /// returned, matching the legacy `import_data`'s self-healing import.
    pub fn import_data(
        &mut self,
        records: &[Record],
        deletions: &[String],
        lookup_keys: impl Fn(&str) -> Vec<PubKey>,
    ) -> Result<bool, Error> {
        for rec in records {
            let keys = lookup_keys(&rec.owner);
            if !rec.verify(keys.iter()) {
                return Err(Error::BadSignature {
                    start: rec.start.clone(),
                    end: rec.end.clone(),
                });
            }
        }

        let parent_commit = self.head_commit();
        let mut current_tree = parent_commit.as_ref().map(|c| c.tree()).transpose()?;

        for start in deletions {
            if let Some(tree) = &current_tree {
                let repo_path = path::make_repo_path(digits_of(start));
                let components = split_components(&repo_path);
                current_tree = match tree_remove(&self.repo, tree, &components)? {
                    Some(oid) => Some(self.repo.find_tree(oid)?),
                    None => None,
                };
            }
        }

        for rec in records {
            let blob_text = blob::make_blob(rec);
            let blob_oid = self.repo.blob(blob_text.as_bytes())?;
            let repo_path = path::make_repo_path(digits_of(&rec.start));
            let components = split_components(&repo_path);
            let new_oid = tree_insert(&self.repo, current_tree.as_ref(), &components, blob_oid)?;
            current_tree = Some(self.repo.find_tree(new_oid)?);
        }

        let Some(final_tree) = current_tree else {
            return Ok(true);
        };
        if let Some(parent) = &parent_commit {
            if parent.tree_id() == final_tree.id() {
                return Ok(true);
            }
        }

        let sig = git2::Signature::now("numbex", "numbex@localhost")?;
        let parents: Vec<&git2::Commit> = parent_commit.iter().collect();
        let message = format!("import {} record(s), {} deletion(s)", records.len(), deletions.len());
        self.repo.commit(Some("HEAD"), &sig, &sig, &message, &final_tree, &parents)?;

        if self.has_overlaps(&final_tree)? {
            if let Some(parent) = &parent_commit {
                let head_name = self.repo.head()?.name().unwrap_or("refs/heads/master").to_string();
                self.repo.reference(&head_name, parent.id(), true, "rollback: overlap introduced by import")?;
            }
            tracing::warn!("import introduced overlapping ranges; rolled back");
            return Ok(false);
        }

        return Ok(true);
    }

    fn has_overlaps(&self, tree: &Tree) -> Result<bool, Error> {
        let records = collect_records(&self.repo, tree)?;
        return Ok(!group_overlaps(&records)?.is_empty());
    }

    /// The blob stored at `start`'s derived path in the current HEAD tree,
    /// parsed back into a record, if present.
    pub fn get_range(&self, start: &str) -> Result<Option<Record>, Error> {
        let Some(tree) = self.head_tree()? else {
            return Ok(None);
        };
        let repo_path = path::make_repo_path(digits_of(start));
        let Ok(entry) = tree.get_path(Path::new(&repo_path)) else {
            return Ok(None);
        };
        let object = entry.to_object(&self.repo)?;
        let Some(blob) = object.as_blob() else {
            return Ok(None);
        };
        let text = String::from_utf8(blob.content().to_vec())
            .map_err(|_| Error::MergeConflict(format!("blob at '{}' is not valid UTF-8", repo_path)))?;
        return Ok(Some(blob::parse_blob(&text)?));
    }

    /// Overlapping groups (size > 1) present in the current HEAD state.
    pub fn check_overlaps(&self) -> Result<Vec<Vec<Record>>, Error> {
        let Some(tree) = self.head_tree()? else {
            return Ok(Vec::new());
        };
        let records = collect_records(&self.repo, &tree)?;
        return group_overlaps(&records);
    }

    /// Single-store overlap cleanup: within each overlapping group, keep
    /// the record with the latest `mdate` and delete the rest.
    pub fn fix_overlaps(&mut self) -> Result<usize, Error> {
        let groups = self.check_overlaps()?;
        let mut to_delete = Vec::new();
        for group in &groups {
            let winner_mdate = group.iter().map(|r| r.mdate).max().unwrap();
            for rec in group {
                if rec.mdate != winner_mdate {
                    to_delete.push(rec.start.clone());
                }
            }
        }
        if to_delete.is_empty() {
            return Ok(0);
        }
        let removed = to_delete.len();
        self.delete_records(&to_delete, "fix overlaps")?;
        return Ok(removed);
    }

    /// Delete records by start without signature verification; used for
    /// overlap fixups where the removal itself needs no authorization
    /// beyond having detected the overlap.
    pub fn delete_records(&mut self, starts: &[String], message: &str) -> Result<(), Error> {
        let parent_commit = self.head_commit();
        let Some(mut tree) = parent_commit.as_ref().map(|c| c.tree()).transpose()? else {
            return Ok(());
        };
        for start in starts {
            let repo_path = path::make_repo_path(digits_of(start));
            let components = split_components(&repo_path);
            match tree_remove(&self.repo, &tree, &components)? {
                Some(oid) => tree = self.repo.find_tree(oid)?,
                None => return self.clear(),
            }
        }
        let sig = git2::Signature::now("numbex", "numbex@localhost")?;
        let parents: Vec<&git2::Commit> = parent_commit.iter().collect();
        self.repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)?;
        return Ok(());
    }

    fn clear(&mut self) -> Result<(), Error> {
        let empty_oid = self.repo.treebuilder(None)?.write()?;
        let empty_tree = self.repo.find_tree(empty_oid)?;
        let sig = git2::Signature::now("numbex", "numbex@localhost")?;
        let parents: Vec<&git2::Commit> = self.head_commit().iter().cloned().collect();
        let parents_ref: Vec<&git2::Commit> = parents.iter().collect();
        self.repo.commit(Some("HEAD"), &sig, &sig, "clear", &empty_tree, &parents_ref)?;
        return Ok(());
    }

    pub fn export_all(&self) -> Result<Vec<Record>, Error> {
        let Some(tree) = self.head_tree()? else {
            return Ok(Vec::new());
        };
        let mut records = collect_records(&self.repo, &tree)?;
        records.sort_by_key(|r| r.start_int().unwrap_or(i64::MAX));
        return Ok(records);
    }

    /// Records touched by any commit at or after `since`, resolved to
    /// their current (HEAD) content.
    pub fn export_since(&self, since: NaiveDateTime) -> Result<Vec<Record>, Error> {
        let Some(head_tree) = self.head_tree()? else {
            return Ok(Vec::new());
        };
        let mut revwalk = self.repo.revwalk()?;
        revwalk.push_head()?;
        let since_ts = since.and_utc().timestamp();

        let mut touched: HashSet<String> = HashSet::new();
        for oid in revwalk {
            let commit = self.repo.find_commit(oid?)?;
            if commit.time().seconds() < since_ts {
                break;
            }
            let tree = commit.tree()?;
            let parent_tree = commit.parents().next().map(|p| p.tree()).transpose()?;
            let diff = self.repo.diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), None)?;
            diff.foreach(
                &mut |delta, _| {
                    if let Some(p) = delta.new_file().path().and_then(|p| p.to_str()) {
                        touched.insert(p.to_string());
                    }
                    true
                },
                None,
                None,
                None,
            )?;
        }

        let mut records = Vec::new();
        for rel_path in touched {
            if let Ok(entry) = head_tree.get_path(Path::new(&rel_path)) {
                if let Ok(object) = entry.to_object(&self.repo) {
                    if let Some(content) = object.as_blob().map(|b| b.content().to_vec()) {
                        if let Ok(text) = String::from_utf8(content) {
                            if let Ok(rec) = blob::parse_blob(&text) {
                                records.push(rec);
                            }
                        }
                    }
                }
            }
        }
        records.sort_by_key(|r| r.start_int().unwrap_or(i64::MAX));
        return Ok(records);
    }

    pub fn get_remotes(&self) -> Result<Vec<(String, String)>, Error> {
        let mut out = Vec::new();
        let names = self.repo.remotes()?;
        for name in names.iter().flatten() {
            let remote = self.repo.find_remote(name)?;
            out.push((name.to_string(), remote.url().unwrap_or("").to_string()));
        }
        return Ok(out);
    }

    /// Register (or update) a remote. Refuses to silently repoint an
    /// existing remote at a different URL unless `force` is set.
    pub fn add_remote(&mut self, name: &str, url: &str, force: bool) -> Result<(), Error> {
        if let Ok(existing) = self.repo.find_remote(name) {
            if existing.url() != Some(url) && !force {
                return Err(Error::RemoteConflict { name: name.to_string() });
            }
            self.repo.remote_set_url(name, url)?;
            return Ok(());
        }
        self.repo.remote(name, url)?;
        return Ok(());
    }

    pub fn fetch_from_remote(&mut self, name: &str) -> Result<(), Error> {
        let mut remote = self.repo.find_remote(name)?;
        remote.fetch(&[] as &[&str], None, None)?;
        return Ok(());
    }
}
