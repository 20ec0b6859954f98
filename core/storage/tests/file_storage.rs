//! End-to-end behavior of `FileStorage` over the bundled backends.

use filestorage::{
    BucketAliasStrategy, BucketConfig, CopyOptions, DeleteOptions, ErrorKind, FileStorage,
    ListOptions, LocalBackend, MemoryBackend, StorageConfig, StorageEvent,
};
use tempfile::TempDir;

/// Registration replaces in place, so concurrent cases never observe a
/// missing type. Cases that clear the registry live in `provider_types.rs`.
fn register_types() {
    FileStorage::register_provider_type("memory", MemoryBackend::factory(), true).unwrap();
    FileStorage::register_provider_type("local", LocalBackend::factory(), true).unwrap();
}

fn storage(strategy: BucketAliasStrategy) -> FileStorage {
    register_types();
    FileStorage::new(
        StorageConfig::default()
            .with_strategy(strategy)
            .with_logger(false),
    )
}

fn local_uri(temp: &TempDir, name: &str) -> String {
    format!("local://{}?name={}", temp.path().display(), name)
}

#[tokio::test]
async fn test_alias_collision_is_rejected_without_partial_state() {
    let storage = storage(BucketAliasStrategy::Name);
    storage.add_provider("memory://?name=p1").await.unwrap();
    storage.add_provider("memory://?name=p2").await.unwrap();

    storage
        .add_bucket("p1", BucketConfig::new("b").with_create(true))
        .await
        .unwrap();
    let err = storage
        .add_bucket("p2", BucketConfig::new("B").with_create(true))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::DuplicatedElement);
    assert_eq!(storage.buckets().len(), 1);
    assert!(storage.get_provider("p2").unwrap().buckets().is_empty());
    assert_eq!(storage.get_bucket("b").unwrap().provider_name(), "p1");
}

#[tokio::test]
async fn test_disposal_frees_aliases() {
    let storage = storage(BucketAliasStrategy::Name);
    storage.add_provider("memory://?name=p1").await.unwrap();
    storage.add_provider("memory://?name=p2").await.unwrap();
    let old = storage
        .add_bucket("p1", BucketConfig::new("b").with_create(true))
        .await
        .unwrap();

    storage.dispose_provider("p1").await.unwrap();
    assert!(!storage.has_bucket("b"));
    assert!(!storage.has_provider("p1"));

    let bucket = storage
        .add_bucket("p2", BucketConfig::new("b").with_create(true))
        .await
        .unwrap();
    assert_eq!(bucket.provider_name(), "p2");

    // Handles on the released bucket no longer accept operations.
    let err = old.put_file("/late.txt", "x").await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_provider_name_strategy_allows_same_bucket_names() {
    let storage = storage(BucketAliasStrategy::ProviderName);
    storage.add_provider("memory://?name=p1").await.unwrap();
    storage.add_provider("memory://?name=p2").await.unwrap();

    let first = storage
        .add_bucket("p1", BucketConfig::new("b").with_create(true))
        .await
        .unwrap();
    let second = storage
        .add_bucket("p2", BucketConfig::new("b").with_create(true))
        .await
        .unwrap();

    assert_eq!(first.absolute_name(), "p1:b");
    assert_eq!(second.absolute_name(), "p2:b");
    assert!(storage.get_bucket("p1:b").unwrap().same_as(&first));
    assert!(storage
        .get_bucket("storage://p2:b/any/path")
        .unwrap()
        .same_as(&second));
}

#[tokio::test]
async fn test_cross_provider_copy_and_move() {
    let temp = TempDir::new().unwrap();
    let storage = storage(BucketAliasStrategy::Name);
    storage.add_provider("memory://?name=mem").await.unwrap();
    storage.add_provider(local_uri(&temp, "disk")).await.unwrap();
    storage
        .add_bucket("mem", BucketConfig::new("bucketA").with_create(true))
        .await
        .unwrap();
    storage
        .add_bucket("disk", BucketConfig::new("bucketB").with_create(true))
        .await
        .unwrap();

    storage
        .put_file("bucketA://x.txt", "Hello world!")
        .await
        .unwrap();
    let copied = storage
        .copy_file("bucketA://x.txt", "bucketB://y.txt", &CopyOptions::default())
        .await
        .unwrap();

    assert_eq!(copied.native["strategy"], "stream");
    assert!(storage.file_exists("bucketA://x.txt").await.unwrap());
    assert!(storage.file_exists("bucketB://y.txt").await.unwrap());
    assert_eq!(
        storage.get_file_contents("bucketA://x.txt").await.unwrap(),
        storage.get_file_contents("bucketB://y.txt").await.unwrap()
    );

    storage
        .move_file("bucketA://x.txt", "bucketB://z.txt", &CopyOptions::default())
        .await
        .unwrap();
    assert!(!storage.file_exists("bucketA://x.txt").await.unwrap());
    assert_eq!(
        &storage.get_file_contents("bucketB://z.txt").await.unwrap()[..],
        b"Hello world!"
    );
}

#[tokio::test]
async fn test_same_provider_uses_native_copy() {
    let storage = storage(BucketAliasStrategy::Name);
    storage.add_provider("memory://?name=mem").await.unwrap();
    for name in ["left", "right"] {
        storage
            .add_bucket("mem", BucketConfig::new(name).with_create(true))
            .await
            .unwrap();
    }
    storage.put_file("left://a.txt", "native").await.unwrap();

    let copied = storage
        .copy_file("left://a.txt", "right://b.txt", &CopyOptions::default())
        .await
        .unwrap();
    assert_eq!(copied.native["strategy"], "memory-copy");
    assert_eq!(copied.result.bucket().absolute_name(), "right");
}

#[tokio::test]
async fn test_pattern_bulk_copy_and_move() {
    let temp = TempDir::new().unwrap();
    let storage = storage(BucketAliasStrategy::Name);
    storage.add_provider("memory://?name=mem").await.unwrap();
    storage.add_provider(local_uri(&temp, "disk")).await.unwrap();
    storage
        .add_bucket("mem", BucketConfig::new("src").with_create(true))
        .await
        .unwrap();
    storage
        .add_bucket("disk", BucketConfig::new("dst").with_create(true))
        .await
        .unwrap();

    for i in 1..=10 {
        for j in 1..=10 {
            storage
                .put_file(&format!("src://multiple/{i}/file {i} {j}.txt"), format!("{i}-{j}"))
                .await
                .unwrap();
        }
    }

    let copied = storage
        .copy_files("src://multiple", "dst://copied", "**/*1.txt", &CopyOptions::default())
        .await
        .unwrap();
    assert_eq!(copied.len(), 10);
    let listed = storage
        .list_files("dst://copied", &ListOptions::recursive())
        .await
        .unwrap();
    assert_eq!(listed.len(), 10);
    assert!(storage
        .file_exists("dst://copied/3/file 3 1.txt")
        .await
        .unwrap());

    let moved = storage
        .move_files("src://multiple", "dst://moved", "**/*1.txt", &CopyOptions::default())
        .await
        .unwrap();
    assert_eq!(moved.len(), 10);
    let remaining = storage
        .list_files("src://multiple", &ListOptions::recursive())
        .await
        .unwrap();
    assert_eq!(remaining.len(), 90);
    assert!(remaining
        .into_iter()
        .all(|file| !file.name().ends_with(" 1.txt")));
}

#[tokio::test]
async fn test_bulk_failure_reports_completed_entries() {
    let storage = storage(BucketAliasStrategy::Name);
    storage.add_provider("memory://?name=mem").await.unwrap();
    storage
        .add_bucket("mem", BucketConfig::new("bulk").with_create(true))
        .await
        .unwrap();
    for n in 1..=3 {
        storage
            .put_file(&format!("bulk://a/{n}.txt"), "data")
            .await
            .unwrap();
    }
    storage.put_file("bulk://b/2.txt", "taken").await.unwrap();

    let err = storage
        .copy_files("bulk://a", "bulk://b", "*.txt", &CopyOptions { overwrite: false })
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Native);
    assert_eq!(err.completed_paths(), vec!["/b/1.txt"]);
    let detail = err.detail().unwrap();
    assert_eq!(detail["causeKind"], "DUPLICATED_ELEMENT");
    assert!(!storage.file_exists("bulk://b/3.txt").await.unwrap());
}

#[tokio::test]
async fn test_delete_files_with_cleanup() {
    let temp = TempDir::new().unwrap();
    let storage = storage(BucketAliasStrategy::Name);
    storage.add_provider(local_uri(&temp, "disk")).await.unwrap();
    storage
        .add_bucket("disk", BucketConfig::new("tree").with_create(true))
        .await
        .unwrap();
    storage.put_file("tree://top/a/b/c.txt", "c").await.unwrap();
    storage.put_file("tree://top/x.txt", "x").await.unwrap();

    let deleted = storage
        .delete_files("tree://top", "**/c.txt", &DeleteOptions { cleanup: true })
        .await
        .unwrap();
    assert_eq!(deleted.len(), 1);
    assert!(!deleted[0].exists());

    assert!(!temp.path().join("tree/top/a").exists());
    assert!(temp.path().join("tree/top/x.txt").is_file());
}

#[tokio::test]
async fn test_remove_empty_directories_keeps_root() {
    let temp = TempDir::new().unwrap();
    let storage = storage(BucketAliasStrategy::Name);
    storage.add_provider(local_uri(&temp, "disk")).await.unwrap();
    storage
        .add_bucket("disk", BucketConfig::new("dirs").with_create(true))
        .await
        .unwrap();
    storage.make_directory("dirs://e1/e2").await.unwrap();
    storage.put_file("dirs://full/f.txt", "f").await.unwrap();

    assert!(storage.remove_empty_directories("dirs://").await.unwrap());
    assert!(!temp.path().join("dirs/e1").exists());
    assert!(temp.path().join("dirs/full/f.txt").is_file());
    assert!(temp.path().join("dirs").is_dir());

    assert!(!storage.remove_empty_directories("dirs://").await.unwrap());
}

#[tokio::test]
async fn test_read_only_provider() {
    let temp = TempDir::new().unwrap();
    let storage = storage(BucketAliasStrategy::ProviderName);
    storage.add_provider(local_uri(&temp, "rw")).await.unwrap();
    storage
        .add_provider(format!("{}&mode=0500", local_uri(&temp, "ro")))
        .await
        .unwrap();

    storage
        .add_bucket("rw", BucketConfig::new("shared").with_create(true))
        .await
        .unwrap();
    storage.put_file("storage://rw:shared/doc.txt", "doc").await.unwrap();

    let err = storage
        .add_bucket("ro", BucketConfig::new("fresh").with_create(true))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Permission);

    storage
        .add_bucket("ro", BucketConfig::new("shared"))
        .await
        .unwrap();
    assert_eq!(
        &storage
            .get_file_contents("storage://ro:shared/doc.txt")
            .await
            .unwrap()[..],
        b"doc"
    );
    let err = storage
        .put_file("storage://ro:shared/new.txt", "nope")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Permission);
}

#[tokio::test]
async fn test_missing_container_without_create() {
    let storage = storage(BucketAliasStrategy::Name);
    storage.add_provider("memory://?name=mem").await.unwrap();
    let err = storage
        .add_bucket("mem", BucketConfig::new("absent"))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    assert!(!storage.has_bucket("absent"));
}

#[tokio::test]
async fn test_file_handle_follows_move() {
    let temp = TempDir::new().unwrap();
    let storage = storage(BucketAliasStrategy::Name);
    storage.add_provider("memory://?name=mem").await.unwrap();
    storage.add_provider(local_uri(&temp, "disk")).await.unwrap();
    let inbox = storage
        .add_bucket("mem", BucketConfig::new("inbox").with_create(true))
        .await
        .unwrap();
    let archive = storage
        .add_bucket("disk", BucketConfig::new("archive").with_create(true))
        .await
        .unwrap();

    let mut file = inbox.file("/Mail/Letter.TXT");
    file.save("dear reader").await.unwrap();
    assert!(file.exists());
    assert_eq!(file.path().to_string_path(), "/mail/letter.txt");

    let copy = file
        .copy_to("/mail/copy.txt", &CopyOptions::default())
        .await
        .unwrap();
    assert_eq!(copy.text().await.unwrap(), "dear reader");

    file.move_to_bucket(&archive, "/2024/letter.txt", &CopyOptions::default())
        .await
        .unwrap();
    assert!(file.bucket().same_as(&archive));
    assert_eq!(file.path().to_string_path(), "/2024/letter.txt");
    assert_eq!(file.text().await.unwrap(), "dear reader");
    assert!(!inbox.file_exists("/mail/letter.txt").await.unwrap());
}

#[tokio::test]
async fn test_scenario_filesystem_and_object_store() {
    register_types();
    let temp = TempDir::new().unwrap();
    let storage = FileStorage::new(StorageConfig::default());

    let fs = storage.add_provider(local_uri(&temp, "fs")).await.unwrap();
    let objects = storage.add_provider("memory://?name=objects").await.unwrap();
    assert_eq!(fs.provider_type(), "local");
    assert_eq!(objects.provider_type(), "memory");

    fs.add_bucket(BucketConfig::new("bucket1").with_create(true))
        .await
        .unwrap();
    objects
        .add_bucket(BucketConfig::new("bucket2").with_create(true))
        .await
        .unwrap();

    storage
        .put_file("bucket1://notes/hello.txt", "Hello world!")
        .await
        .unwrap();
    storage
        .copy_file(
            "bucket1://notes/hello.txt",
            "bucket2://notes/hello.txt",
            &CopyOptions::default(),
        )
        .await
        .unwrap();

    assert!(storage.file_exists("bucket1://notes/hello.txt").await.unwrap());
    assert!(storage.file_exists("bucket2://notes/hello.txt").await.unwrap());

    storage.dispose().await.unwrap();
}

#[tokio::test]
async fn test_local_paths_cannot_leave_the_bucket() {
    let temp = TempDir::new().unwrap();
    let storage = storage(BucketAliasStrategy::Name);
    storage
        .add_provider(format!("local://{}?name=disk", temp.path().join("root").display()))
        .await
        .unwrap();
    storage
        .add_bucket("disk", BucketConfig::new("b").with_create(true))
        .await
        .unwrap();

    let err = storage
        .put_file("storage://disk:b/../../escaped.txt", "pwn")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidParams);
    assert!(!temp.path().join("escaped.txt").exists());
    assert!(!temp.path().join("root/escaped.txt").exists());

    let err = storage.file_exists("b://a/../../../etc/passwd").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidParams);
}

#[tokio::test]
async fn test_directory_cannot_move_into_itself() {
    let storage = storage(BucketAliasStrategy::Name);
    storage.add_provider("memory://?name=mem").await.unwrap();
    storage
        .add_bucket("mem", BucketConfig::new("box").with_create(true))
        .await
        .unwrap();
    storage.put_file("box://a/one.txt", "1").await.unwrap();
    storage.put_file("box://a/two.txt", "2").await.unwrap();

    let mut dir = storage.directory("box://a").unwrap();
    for target in ["box://a/sub", "box://a"] {
        let dest = storage.directory(target).unwrap();
        let err = dir.move_to(&dest, &CopyOptions::default()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParams);
    }
    let root = storage.directory("box://").unwrap();
    let mut whole = root.clone();
    let err = whole.move_to(&dir, &CopyOptions::default()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidParams);

    let all = storage
        .list_files("box://", &ListOptions::recursive())
        .await
        .unwrap();
    assert_eq!(all.len(), 2);

    let dest = storage.directory("box://b").unwrap();
    let moved = dir.move_to(&dest, &CopyOptions::default()).await.unwrap();
    assert_eq!(moved.len(), 2);
    assert_eq!(dir.path().to_string_path(), "/b");
    assert!(storage.file_exists("box://b/one.txt").await.unwrap());
    assert!(!storage.file_exists("box://a/one.txt").await.unwrap());
}

#[tokio::test]
async fn test_bulk_permission_fails_before_listing() {
    let temp = TempDir::new().unwrap();
    let storage = storage(BucketAliasStrategy::ProviderName);
    storage.add_provider(local_uri(&temp, "rw")).await.unwrap();
    storage
        .add_provider(format!("{}&mode=0500", local_uri(&temp, "ro")))
        .await
        .unwrap();
    for name in ["src", "locked"] {
        storage
            .add_bucket("rw", BucketConfig::new(name).with_create(true))
            .await
            .unwrap();
    }
    storage.add_bucket("ro", BucketConfig::new("locked")).await.unwrap();
    storage.put_file("storage://rw:src/d/x.txt", "x").await.unwrap();
    storage.put_file("storage://rw:locked/d/y.txt", "y").await.unwrap();

    let err = storage
        .copy_files("storage://rw:src/d", "storage://ro:locked/d", "**", &CopyOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Permission);
    assert!(err.completed_paths().is_empty());
    assert!(!temp.path().join("locked/d/x.txt").exists());

    let err = storage
        .move_files("storage://ro:locked/d", "storage://rw:src/e", "**", &CopyOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Permission);
    assert!(temp.path().join("locked/d/y.txt").is_file());

    let err = storage
        .delete_files("storage://ro:locked/d", "**", &DeleteOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Permission);
    assert!(temp.path().join("locked/d/y.txt").is_file());

    // Reading stays allowed on the read-only provider.
    let copied = storage
        .copy_files("storage://ro:locked/d", "storage://rw:src/e", "**", &CopyOptions::default())
        .await
        .unwrap();
    assert_eq!(copied.len(), 1);
}

#[tokio::test]
async fn test_listing_needs_execute_permission() {
    let temp = TempDir::new().unwrap();
    let storage = storage(BucketAliasStrategy::ProviderName);
    storage.add_provider(local_uri(&temp, "rw")).await.unwrap();
    let opaque = storage
        .add_provider(format!("{}&mode=0600", local_uri(&temp, "opaque")))
        .await
        .unwrap();
    assert!(opaque.can_read() && !opaque.can_execute());

    storage
        .add_bucket("rw", BucketConfig::new("data").with_create(true))
        .await
        .unwrap();
    storage.put_file("storage://rw:data/f.txt", "f").await.unwrap();
    storage.add_bucket("opaque", BucketConfig::new("data")).await.unwrap();

    assert_eq!(
        &storage
            .get_file_contents("storage://opaque:data/f.txt")
            .await
            .unwrap()[..],
        b"f"
    );
    let err = storage
        .list_files("storage://opaque:data/", &ListOptions::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Permission);
    let err = opaque.list_unregistered_buckets().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Permission);
}

#[tokio::test]
async fn test_list_directories() {
    let storage = storage(BucketAliasStrategy::Name);
    storage.add_provider("memory://?name=mem").await.unwrap();
    storage
        .add_bucket("mem", BucketConfig::new("dirs").with_create(true))
        .await
        .unwrap();
    storage.put_file("dirs://a/b/c/file.txt", "x").await.unwrap();
    storage.put_file("dirs://d/file.txt", "x").await.unwrap();
    storage.make_directory("dirs://empty").await.unwrap();

    let top: Vec<String> = storage
        .list_directories("dirs://", &ListOptions::new())
        .await
        .unwrap()
        .into_iter()
        .map(|d| d.name().to_string())
        .collect();
    assert_eq!(top, vec!["a", "d", "empty"]);

    let deep: Vec<String> = storage
        .list_directories("dirs://a", &ListOptions::recursive())
        .await
        .unwrap()
        .into_iter()
        .map(|d| d.path().to_string_path())
        .collect();
    assert_eq!(deep, vec!["/a/b", "/a/b/c"]);

    let filtered = storage
        .list_directories(
            "dirs://",
            &ListOptions::recursive().with_filter(|entry, _, _| entry.name() != "b"),
        )
        .await
        .unwrap();
    assert_eq!(filtered.len(), 4);
    assert!(filtered.into_iter().all(|d| d.name() != "b"));
}

#[tokio::test]
async fn test_list_unregistered_buckets() {
    let temp = TempDir::new().unwrap();
    std::fs::create_dir_all(temp.path().join("stray")).unwrap();
    std::fs::write(temp.path().join("loose.txt"), "not a bucket").unwrap();

    let storage = storage(BucketAliasStrategy::Name);
    let disk = storage.add_provider(local_uri(&temp, "disk")).await.unwrap();
    disk.add_bucket(BucketConfig::new("known").with_create(true))
        .await
        .unwrap();

    let names: Vec<String> = disk
        .list_unregistered_buckets()
        .await
        .unwrap()
        .into_iter()
        .map(|config| config.name)
        .collect();
    assert_eq!(names, vec!["stray"]);

    disk.add_bucket(BucketConfig::new("stray")).await.unwrap();
    assert!(disk.list_unregistered_buckets().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_failed_add_bucket_is_announced() {
    let storage = storage(BucketAliasStrategy::Name);
    storage.add_provider("memory://?name=mem").await.unwrap();
    let mut events = storage.subscribe();

    let err = storage
        .add_bucket("mem", BucketConfig::new("absent"))
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    assert_eq!(
        events.recv().await.unwrap(),
        StorageEvent::BeforeAddBucket {
            provider: "mem".into(),
            bucket: "absent".into(),
        }
    );
    match events.recv().await.unwrap() {
        StorageEvent::BucketAddError { provider, bucket, kind, .. } => {
            assert_eq!(provider, "mem");
            assert_eq!(bucket, "absent");
            assert_eq!(kind, ErrorKind::NotFound);
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test]
async fn test_destroy_bucket_with_events() {
    let storage = storage(BucketAliasStrategy::Name);
    let mem = storage.add_provider("memory://?name=mem").await.unwrap();
    storage
        .add_bucket("mem", BucketConfig::new("doomed").with_create(true))
        .await
        .unwrap();
    storage.put_file("doomed://f.txt", "bye").await.unwrap();
    let mut events = storage.subscribe();

    storage.destroy_bucket("doomed").await.unwrap();
    assert!(!storage.has_bucket("doomed"));
    assert!(!mem.has_bucket("doomed"));
    assert!(mem.list_unregistered_buckets().await.unwrap().is_empty());

    assert!(matches!(
        events.recv().await.unwrap(),
        StorageEvent::BeforeDestroyBucket { .. }
    ));
    match events.recv().await.unwrap() {
        StorageEvent::BucketDestroyed { alias, .. } => assert_eq!(alias, "doomed"),
        other => panic!("unexpected event {:?}", other),
    }

    let err = mem.destroy_bucket("doomed").await.unwrap_err();
    assert!(err.is_not_found());
    assert!(matches!(
        events.recv().await.unwrap(),
        StorageEvent::BeforeDestroyBucket { .. }
    ));
    match events.recv().await.unwrap() {
        StorageEvent::BucketDestroyError { kind, .. } => assert_eq!(kind, ErrorKind::NotFound),
        other => panic!("unexpected event {:?}", other),
    }

    // The alias is free again.
    storage
        .add_bucket("mem", BucketConfig::new("doomed").with_create(true))
        .await
        .unwrap();
    assert!(!storage.file_exists("doomed://f.txt").await.unwrap());
}
