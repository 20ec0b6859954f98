//! Copy and move between arbitrary buckets.
//!
//! When both buckets belong to the same provider and that backend can work
//! across buckets, the backend's native copy/move is used. Otherwise the
//! source is streamed out of one provider into the other, and a move deletes
//! the source after the copy succeeded. The streamed path is not atomic: a
//! failure mid-way can leave a partial destination behind.

use serde_json::json;
use std::sync::Arc;
use tracing::debug;

use filestorage_common::{Error, Result, StoragePath, StorageResponse};

use crate::backend::Contents;
use crate::bucket::Bucket;
use crate::bulk;
use crate::file::File;
use crate::pattern::ListOptions;
use crate::provider::{Access, CopyOptions, Provider};

fn is_native(src_provider: &Arc<Provider>, dest_provider: &Arc<Provider>, src: &Bucket, dest: &Bucket) -> bool {
    Arc::ptr_eq(src_provider, dest_provider)
        && (src.same_as(dest) || src_provider.supports_cross_bucket_operations())
}

async fn pipe(
    src_provider: &Provider,
    src: &Bucket,
    src_path: &StoragePath,
    dest_provider: &Provider,
    dest: &Bucket,
    dest_path: &StoragePath,
    options: &CopyOptions,
) -> Result<StorageResponse<File>> {
    if dest_path.is_root() {
        return Err(Error::invalid_params("cannot write a file at the bucket root"));
    }
    dest_provider.prepare(dest, Access::Write).await?;
    if !options.overwrite && dest_provider.file_exists(dest, dest_path).await? {
        return Err(Error::duplicated(format!(
            "{} already exists in bucket '{}'",
            dest_path,
            dest.absolute_name()
        )));
    }

    if src_provider.logging() {
        debug!(
            from = %format!("{}{}", src.absolute_name(), src_path),
            to = %format!("{}{}", dest.absolute_name(), dest_path),
            "Streaming file between providers"
        );
    }
    let stream = src_provider.get_file_stream(src, src_path).await?;
    let put = dest_provider
        .put_file(dest, dest_path, Contents::Stream(stream))
        .await?;
    Ok(StorageResponse::new(
        put.result,
        json!({ "strategy": "stream", "put": put.native }),
    ))
}

/// Copy one file, possibly across providers.
pub async fn copy_file(
    src: &Bucket,
    src_path: &StoragePath,
    dest: &Bucket,
    dest_path: &StoragePath,
    options: &CopyOptions,
) -> Result<StorageResponse<File>> {
    let src_provider = src.provider()?;
    let dest_provider = dest.provider()?;

    if is_native(&src_provider, &dest_provider, src, dest) {
        return src_provider
            .copy_file_to(src, src_path, dest, dest_path, options)
            .await;
    }
    pipe(&src_provider, src, src_path, &dest_provider, dest, dest_path, options).await
}

/// Move one file, possibly across providers.
///
/// # Postconditions
/// - On success the source no longer exists
/// - A streamed move that fails after writing may leave the destination
///   behind; the source is only deleted once the copy succeeded
pub async fn move_file(
    src: &Bucket,
    src_path: &StoragePath,
    dest: &Bucket,
    dest_path: &StoragePath,
    options: &CopyOptions,
) -> Result<StorageResponse<File>> {
    let src_provider = src.provider()?;
    let dest_provider = dest.provider()?;

    if is_native(&src_provider, &dest_provider, src, dest) {
        return src_provider
            .move_file_to(src, src_path, dest, dest_path, options)
            .await;
    }

    // The source must be deletable before anything is written.
    src_provider.prepare(src, Access::Write).await?;
    let copied = pipe(&src_provider, src, src_path, &dest_provider, dest, dest_path, options).await?;
    src_provider.delete_file(src, src_path).await?;
    Ok(copied)
}

/// Permissions of both ends, checked before the source is listed.
fn check_bulk_access(src: &Bucket, dest: &Bucket, src_access: Access) -> Result<()> {
    let src_provider = src.provider()?;
    src_provider.check_access(src, Access::List)?;
    src_provider.check_access(src, src_access)?;
    dest.provider()?.check_access(dest, Access::Write)
}

async fn matching_files(src: &Bucket, src_root: &StoragePath, pattern: &str) -> Result<Vec<File>> {
    let provider = src.provider()?;
    let listing = provider
        .list_files(src, src_root, &ListOptions::recursive().with_pattern(pattern))
        .await?;
    if provider.logging() {
        debug!(
            bucket = %src.absolute_name(),
            root = %src_root,
            pattern,
            matches = listing.len(),
            "Resolved bulk transfer"
        );
    }
    Ok(listing.entries)
}

fn destination_for(file: &File, src_root: &StoragePath, dest_root: &StoragePath) -> Result<StoragePath> {
    file.path().rebase(src_root, dest_root).ok_or_else(|| {
        Error::unknown(format!("{} is not below {}", file.path(), src_root))
    })
}

/// Copy every file under `src_root` matching `pattern`, preserving the path
/// relative to `src_root` under `dest_root`.
///
/// Matches are processed one at a time; the first failure stops the batch
/// and the error detail lists the files already copied.
pub async fn copy_files(
    src: &Bucket,
    src_root: &StoragePath,
    dest: &Bucket,
    dest_root: &StoragePath,
    pattern: &str,
    options: &CopyOptions,
) -> Result<Vec<File>> {
    check_bulk_access(src, dest, Access::Read)?;
    let files = matching_files(src, src_root, pattern).await?;
    bulk::run_sequential(files, |file| async move {
        let target = destination_for(&file, src_root, dest_root)?;
        Ok(copy_file(src, file.path(), dest, &target, options).await?.result)
    })
    .await
}

/// Move every file under `src_root` matching `pattern` under `dest_root`.
pub async fn move_files(
    src: &Bucket,
    src_root: &StoragePath,
    dest: &Bucket,
    dest_root: &StoragePath,
    pattern: &str,
    options: &CopyOptions,
) -> Result<Vec<File>> {
    check_bulk_access(src, dest, Access::Write)?;
    let files = matching_files(src, src_root, pattern).await?;
    bulk::run_sequential(files, |file| async move {
        let target = destination_for(&file, src_root, dest_root)?;
        Ok(move_file(src, file.path(), dest, &target, options).await?.result)
    })
    .await
}
