//! Recursive listing and sequential bulk execution.

use std::collections::{BTreeSet, HashSet};
use std::future::Future;

use filestorage_common::{Error, Result, StoragePath};

use crate::backend::{Backend, EntryKind, ObjectInfo};
use crate::file::File;
use crate::pattern::{GlobPattern, ListOptions};

/// List entries of `kind` below `root`.
///
/// Traversal is depth-first in name order and never enters a directory
/// twice. The pattern is matched against the path relative to `root`, then
/// the filter may veto the entry.
///
/// # Errors
/// - `NOT_FOUND` if `root` is not a directory
pub(crate) async fn walk(
    backend: &dyn Backend,
    bucket: &str,
    root: &StoragePath,
    options: &ListOptions,
    kind: EntryKind,
) -> Result<Vec<ObjectInfo>> {
    let pattern = options.compile()?;

    if !root.is_root() {
        match backend.stat(bucket, root).await? {
            Some(info) if info.is_directory() => {}
            _ => {
                return Err(Error::not_found(format!(
                    "directory {} not found in '{}'",
                    root, bucket
                )))
            }
        }
    }

    let mut visited: HashSet<StoragePath> = HashSet::new();
    visited.insert(root.clone());

    let mut results = Vec::new();
    let mut stack = vec![(root.clone(), sorted_children(backend, bucket, root).await?)];

    loop {
        let Some((parent, children)) = stack.last_mut() else {
            break;
        };
        let next = children.next();
        let parent = parent.clone();
        let Some(entry) = next else {
            stack.pop();
            continue;
        };

        if entry.kind == kind && accepts(options, pattern.as_ref(), root, &parent, &entry) {
            results.push(entry.clone());
        }

        if options.recursive && entry.is_directory() && visited.insert(entry.path.clone()) {
            let children = sorted_children(backend, bucket, &entry.path).await?;
            stack.push((entry.path, children));
        }
    }

    Ok(results)
}

async fn sorted_children(
    backend: &dyn Backend,
    bucket: &str,
    path: &StoragePath,
) -> Result<std::vec::IntoIter<ObjectInfo>> {
    let mut children = backend.list(bucket, path).await?;
    children.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(children.into_iter())
}

fn accepts(
    options: &ListOptions,
    pattern: Option<&GlobPattern>,
    root: &StoragePath,
    parent: &StoragePath,
    entry: &ObjectInfo,
) -> bool {
    if let Some(pattern) = pattern {
        let relative = entry.path.relative_to(root).unwrap_or_default();
        if !pattern.matches(&relative) {
            return false;
        }
    }
    match &options.filter {
        Some(filter) => filter(entry, parent, entry.kind),
        None => true,
    }
}

/// Run `op` on each file in order, stopping at the first failure.
///
/// The error raised on failure is `NATIVE_ERROR` with the already completed
/// results in its detail.
pub(crate) async fn run_sequential<F, Fut>(files: Vec<File>, mut op: F) -> Result<Vec<File>>
where
    F: FnMut(File) -> Fut,
    Fut: Future<Output = Result<File>>,
{
    let mut done: Vec<File> = Vec::with_capacity(files.len());
    for file in files {
        let label = file.uri();
        match op(file).await {
            Ok(result) => done.push(result),
            Err(err) => {
                let completed = done.iter().map(File::descriptor).collect();
                return Err(Error::partial(&label, err, completed));
            }
        }
    }
    Ok(done)
}

async fn is_empty_directory(backend: &dyn Backend, bucket: &str, path: &StoragePath) -> Result<bool> {
    match backend.stat(bucket, path).await? {
        Some(info) if info.is_directory() => Ok(backend.list(bucket, path).await?.is_empty()),
        _ => Ok(false),
    }
}

/// From each start directory, remove empty directories walking upward until
/// a non-empty directory or the bucket root.
pub(crate) async fn prune_upwards(
    backend: &dyn Backend,
    bucket: &str,
    starts: Vec<StoragePath>,
) -> Result<usize> {
    // Deepest first, so a parent is examined after its emptied children.
    let mut pending: BTreeSet<(std::cmp::Reverse<usize>, StoragePath)> = starts
        .into_iter()
        .map(|p| (std::cmp::Reverse(p.depth()), p))
        .collect();
    let mut removed = 0;

    while let Some(entry) = pending.pop_first() {
        let path = entry.1;
        if path.is_root() {
            continue;
        }
        let exists = backend.stat(bucket, &path).await?.is_some();
        if exists {
            if !is_empty_directory(backend, bucket, &path).await? {
                continue;
            }
            backend.delete_dir(bucket, &path).await?;
            removed += 1;
        }
        if let Some(parent) = path.parent() {
            pending.insert((std::cmp::Reverse(parent.depth()), parent));
        }
    }
    Ok(removed)
}

/// Remove every empty directory below `path`, then `path` itself unless it
/// is the root.
pub(crate) async fn remove_empty_directories(
    backend: &dyn Backend,
    bucket: &str,
    path: &StoragePath,
) -> Result<bool> {
    let directories = walk(
        backend,
        bucket,
        path,
        &ListOptions::recursive(),
        EntryKind::Directory,
    )
    .await?;

    let mut removed = false;
    // Reverse pre-order visits descendants before their ancestors.
    for dir in directories.iter().rev() {
        if is_empty_directory(backend, bucket, &dir.path).await? {
            backend.delete_dir(bucket, &dir.path).await?;
            removed = true;
        }
    }
    if !path.is_root() && is_empty_directory(backend, bucket, path).await? {
        backend.delete_dir(bucket, path).await?;
        removed = true;
    }
    Ok(removed)
}
