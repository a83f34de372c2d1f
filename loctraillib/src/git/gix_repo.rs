//! `gix`-backed repository handle.
//!
//! Trees, diffs, and blobs are read straight from the object database by
//! commit id, so the working tree's checkout state never matters.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gix::diff::blob::{intern::InternedInput, sink::Counter, Algorithm};
use gix::ObjectId;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::count::is_binary;
use crate::credentials::Credential;
use crate::error::LoctrailError;
use crate::model::{CommitId, CommitInfo, DiffStats};
use crate::Result;

use super::{
    command, order_oldest_first, EntryKind, GitGateway, RepoHandle, TreeEntry, WalkAction,
};

/// Gateway using the `git` binary for transport and `gix` for object access.
#[derive(Debug, Clone, Copy, Default)]
pub struct GixGateway;

impl GixGateway {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl GitGateway for GixGateway {
    async fn clone_repository(
        &self,
        url: &str,
        dest: &Path,
        credential: Option<&Credential>,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        command::clone(url, dest, credential, cancel).await
    }

    async fn pull(
        &self,
        url: &str,
        path: &Path,
        credential: Option<&Credential>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        command::pull(url, path, credential, cancel).await
    }

    fn open(&self, path: &Path) -> Result<Box<dyn RepoHandle>> {
        Ok(Box::new(GixHandle::open(path)?))
    }
}

/// Blob ids recorded by the most recent tree walk.
struct BlobIndex {
    commit: CommitId,
    blobs: HashMap<String, ObjectId>,
}

/// Single-owner handle on an opened repository.
pub struct GixHandle {
    repo: gix::Repository,
    path: PathBuf,
    last_walk: RefCell<Option<BlobIndex>>,
}

impl GixHandle {
    pub fn open(path: &Path) -> Result<Self> {
        let repo = gix::open(path).map_err(|e| LoctrailError::WorkingCopy {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Ok(Self {
            repo,
            path: path.to_path_buf(),
            last_walk: RefCell::new(None),
        })
    }

    fn find_commit(&self, id: &CommitId) -> Result<gix::Commit<'_>> {
        let oid = ObjectId::from_hex(id.as_str().as_bytes())
            .map_err(|_| LoctrailError::CommitNotFound(id.to_string()))?;
        self.repo
            .find_commit(oid)
            .map_err(|_| LoctrailError::CommitNotFound(id.to_string()))
    }

    fn describe(commit: &gix::Commit<'_>) -> Result<CommitInfo> {
        let seconds = commit
            .time()
            .map_err(|e| LoctrailError::git("failed to decode commit time", e))?
            .seconds;
        Ok(CommitInfo {
            id: CommitId::new(commit.id.to_string()),
            committed_at: DateTime::<Utc>::from_timestamp(seconds, 0).unwrap_or_default(),
            parent_ids: commit
                .parent_ids()
                .map(|p| CommitId::new(p.to_string()))
                .collect(),
        })
    }

    fn first_parent_tree(&self, commit: &gix::Commit<'_>) -> Result<gix::Tree<'_>> {
        match commit.parent_ids().next() {
            Some(parent) => self
                .repo
                .find_commit(parent.detach())
                .map_err(|e| LoctrailError::git("failed to find parent commit", e))?
                .tree()
                .map_err(|e| LoctrailError::git("failed to get parent tree", e)),
            None => Ok(self.repo.empty_tree()),
        }
    }

    /// Read a blob's content by object id
    fn read_object(&self, oid: ObjectId) -> Result<Vec<u8>> {
        let object = self
            .repo
            .find_object(oid)
            .map_err(|e| LoctrailError::git(&format!("failed to find object {}", oid), e))?;

        let blob = object
            .try_into_blob()
            .map_err(|_| LoctrailError::Git(format!("object {} is not a blob", oid)))?;

        Ok(blob.data.to_vec())
    }

    /// Read a blob only if its header reports at most `max_bytes`.
    fn read_object_within(&self, oid: ObjectId, max_bytes: u64) -> Result<Option<Vec<u8>>> {
        let size = self
            .repo
            .find_header(oid)
            .map_err(|e| LoctrailError::git(&format!("failed to read header of {}", oid), e))?
            .size();
        if size > max_bytes {
            trace!(object = %oid, bytes = size, "Skipped oversized blob");
            return Ok(None);
        }
        self.read_object(oid).map(Some)
    }

    fn line_changes(
        &self,
        old: Option<ObjectId>,
        new: Option<ObjectId>,
        max_blob_bytes: u64,
    ) -> Result<DiffStats> {
        let side = |oid: Option<ObjectId>| match oid {
            Some(oid) => self.read_object_within(oid, max_blob_bytes),
            None => Ok(Some(Vec::new())),
        };
        let (Some(old), Some(new)) = (side(old)?, side(new)?) else {
            return Ok(DiffStats::default());
        };
        if is_binary(&old) || is_binary(&new) {
            return Ok(DiffStats::default());
        }

        let old = String::from_utf8_lossy(&old);
        let new = String::from_utf8_lossy(&new);
        let input = InternedInput::new(old.as_ref(), new.as_ref());
        let counts = gix::diff::blob::diff(Algorithm::Histogram, &input, Counter::default());

        Ok(DiffStats::new(
            u64::from(counts.insertions),
            u64::from(counts.removals),
        ))
    }

    fn visit_tree(
        &self,
        tree: &gix::Tree<'_>,
        prefix: &str,
        visit: &mut dyn FnMut(&TreeEntry<'_>) -> WalkAction,
        blobs: &mut HashMap<String, ObjectId>,
    ) -> Result<()> {
        for entry in tree.iter() {
            let entry =
                entry.map_err(|e| LoctrailError::git("failed to read tree entry", e))?;

            let name = gix::path::from_bstr(entry.filename())
                .to_string_lossy()
                .into_owned();
            let path = if prefix.is_empty() {
                name.clone()
            } else {
                format!("{}/{}", prefix, name)
            };

            if entry.mode().is_tree() {
                let action = visit(&TreeEntry {
                    path: &path,
                    name: &name,
                    kind: EntryKind::Directory,
                });
                if action == WalkAction::Prune {
                    trace!(path = %path, "Pruned directory");
                    continue;
                }
                let subtree = self
                    .repo
                    .find_object(entry.oid())
                    .map_err(|e| LoctrailError::git("failed to find tree", e))?
                    .try_into_tree()
                    .map_err(|_| LoctrailError::Git("object is not a tree".to_string()))?;
                self.visit_tree(&subtree, &path, visit, blobs)?;
            } else if entry.mode().is_blob() {
                blobs.insert(path.clone(), entry.oid().to_owned());
                visit(&TreeEntry {
                    path: &path,
                    name: &name,
                    kind: EntryKind::File,
                });
            }
        }
        Ok(())
    }

    /// Blob id of `path`, from the last walk of `commit` when possible.
    fn blob_id(&self, commit: &CommitId, path: &str) -> Result<ObjectId> {
        let cached = self
            .last_walk
            .borrow()
            .as_ref()
            .filter(|index| index.commit == *commit)
            .and_then(|index| index.blobs.get(path).copied());

        match cached {
            Some(oid) => Ok(oid),
            None => self.lookup_blob(commit, path),
        }
    }

    /// Resolve `path` component by component from the commit's root tree.
    fn lookup_blob(&self, commit: &CommitId, path: &str) -> Result<ObjectId> {
        let not_found = || LoctrailError::BlobNotFound {
            commit: commit.to_string(),
            path: path.to_string(),
        };

        let mut tree = self
            .find_commit(commit)?
            .tree()
            .map_err(|e| LoctrailError::git("failed to get commit tree", e))?;
        let mut components = path.split('/').filter(|c| !c.is_empty()).peekable();

        while let Some(component) = components.next() {
            let (mode, oid) = tree
                .iter()
                .filter_map(|entry| entry.ok())
                .find(|entry| entry.filename() == component)
                .map(|entry| (entry.mode(), entry.oid().to_owned()))
                .ok_or_else(not_found)?;

            if components.peek().is_none() {
                return if mode.is_blob() { Ok(oid) } else { Err(not_found()) };
            }
            if !mode.is_tree() {
                return Err(not_found());
            }
            tree = self
                .repo
                .find_object(oid)
                .map_err(|e| LoctrailError::git("failed to find tree", e))?
                .try_into_tree()
                .map_err(|_| not_found())?;
        }

        Err(not_found())
    }
}

impl RepoHandle for GixHandle {
    fn path(&self) -> &Path {
        &self.path
    }

    fn enumerate_commits(&self) -> Result<Vec<CommitInfo>> {
        let head = self
            .repo
            .head()
            .map_err(|e| LoctrailError::git("failed to read HEAD", e))?;
        let Some(head_id) = head.id() else {
            // unborn branch: no history yet
            return Ok(Vec::new());
        };

        let mut seen = HashSet::new();
        let mut stack = vec![head_id.detach()];
        let mut commits = Vec::new();

        while let Some(oid) = stack.pop() {
            if !seen.insert(oid) {
                continue;
            }
            let commit = self
                .repo
                .find_commit(oid)
                .map_err(|e| LoctrailError::git(&format!("failed to find commit {}", oid), e))?;
            stack.extend(
                commit
                    .parent_ids()
                    .map(|p| p.detach())
                    .filter(|p| !seen.contains(p)),
            );
            commits.push(Self::describe(&commit)?);
        }

        Ok(order_oldest_first(commits))
    }

    fn commit_info(&self, id: &CommitId) -> Result<CommitInfo> {
        Self::describe(&self.find_commit(id)?)
    }

    fn diff_stats(&self, id: &CommitId, max_blob_bytes: u64) -> Result<DiffStats> {
        use gix::object::tree::diff::{Action, Change};

        let commit = self.find_commit(id)?;
        let tree = commit
            .tree()
            .map_err(|e| LoctrailError::git("failed to get commit tree", e))?;
        let parent_tree = self.first_parent_tree(&commit)?;

        let mut pairs: Vec<(Option<ObjectId>, Option<ObjectId>)> = Vec::new();
        let mut platform = parent_tree
            .changes()
            .map_err(|e| LoctrailError::git("failed to get tree changes", e))?;
        platform.options(|opts| {
            opts.track_rewrites(None);
        });
        platform
            .for_each_to_obtain_tree(&tree, |change| {
                match change {
                    Change::Addition { entry_mode, id, .. } if entry_mode.is_blob() => {
                        pairs.push((None, Some(id.detach())));
                    }
                    Change::Deletion { entry_mode, id, .. } if entry_mode.is_blob() => {
                        pairs.push((Some(id.detach()), None));
                    }
                    Change::Modification {
                        previous_entry_mode,
                        previous_id,
                        entry_mode,
                        id,
                        ..
                    } => {
                        let old = previous_entry_mode.is_blob().then(|| previous_id.detach());
                        let new = entry_mode.is_blob().then(|| id.detach());
                        if old.is_some() || new.is_some() {
                            pairs.push((old, new));
                        }
                    }
                    _ => {}
                }
                Ok::<_, std::convert::Infallible>(Action::Continue)
            })
            .map_err(|e| LoctrailError::git("failed to compute tree diff", e))?;

        let mut stats = DiffStats::default();
        for (old, new) in pairs {
            stats += self.line_changes(old, new, max_blob_bytes)?;
        }
        Ok(stats)
    }

    fn walk_tree(
        &self,
        commit: &CommitId,
        visit: &mut dyn FnMut(&TreeEntry<'_>) -> WalkAction,
    ) -> Result<()> {
        let tree = self
            .find_commit(commit)?
            .tree()
            .map_err(|e| LoctrailError::git("failed to get commit tree", e))?;

        let mut blobs = HashMap::new();
        self.visit_tree(&tree, "", visit, &mut blobs)?;
        *self.last_walk.borrow_mut() = Some(BlobIndex {
            commit: commit.clone(),
            blobs,
        });
        Ok(())
    }

    fn read_blob(&self, commit: &CommitId, path: &str) -> Result<Vec<u8>> {
        self.read_object(self.blob_id(commit, path)?)
    }

    fn read_blob_within(
        &self,
        commit: &CommitId,
        path: &str,
        max_bytes: u64,
    ) -> Result<Option<Vec<u8>>> {
        self.read_object_within(self.blob_id(commit, path)?, max_bytes)
    }
}
