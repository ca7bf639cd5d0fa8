//! End-to-end runs over the local filesystem backends.

use std::fs;
use std::io::Read;
use std::sync::Arc;

use rzipstream::io::{LocalDestination, LocalSource};
use rzipstream::{ArchiveError, ArchiveOptions, ArchiveSize, Pipeline};
use tempfile::TempDir;

fn populate() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("src");
    fs::create_dir_all(src.join("nested/deeper")).unwrap();
    fs::write(src.join("readme.md"), "# hello\n").unwrap();
    fs::write(src.join("nested/data.bin"), vec![7u8; 200_000]).unwrap();
    fs::write(src.join("nested/deeper/empty"), b"").unwrap();
    dir
}

fn unzip(path: &std::path::Path) -> Vec<(String, Vec<u8>)> {
    let mut archive = zip::ZipArchive::new(fs::File::open(path).unwrap()).unwrap();
    (0..archive.len())
        .map(|i| {
            let mut file = archive.by_index(i).unwrap();
            let mut data = Vec::new();
            file.read_to_end(&mut data).unwrap();
            (file.name().to_string(), data)
        })
        .collect()
}

fn pipeline() -> Pipeline {
    Pipeline::new(Arc::new(LocalSource), Arc::new(LocalDestination))
}

#[tokio::test]
async fn stored_directory_archive() {
    let dir = populate();
    let src = dir.path().join("src");
    let out = dir.path().join("out/archive.zip");

    let result = pipeline()
        .run(
            src.to_str().unwrap(),
            out.to_str().unwrap(),
            &ArchiveOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(result.name, "archive.zip");
    let len = fs::metadata(&out).unwrap().len();
    assert_eq!(result.size, ArchiveSize::Exact(len));

    let entries = unzip(&out);
    let names: Vec<_> = entries.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(names, ["nested/data.bin", "nested/deeper/empty", "readme.md"]);
    assert_eq!(entries[0].1, vec![7u8; 200_000]);
    assert_eq!(entries[2].1, b"# hello\n");
}

#[tokio::test]
async fn compressed_single_file() {
    let dir = populate();
    let file = dir.path().join("src/nested/data.bin");
    let out = dir.path().join("data.zip");

    let options = ArchiveOptions {
        compress: true,
        ..Default::default()
    };
    let result = pipeline()
        .run(file.to_str().unwrap(), out.to_str().unwrap(), &options)
        .await
        .unwrap();

    assert_eq!(result.size, ArchiveSize::Indeterminate);
    assert!(fs::metadata(&out).unwrap().len() < 200_000);
    assert_eq!(unzip(&out), [("data.bin".to_string(), vec![7u8; 200_000])]);
}

#[tokio::test]
async fn dry_run_creates_nothing() {
    let dir = populate();
    let src = dir.path().join("src");
    let out = dir.path().join("never.zip");

    let options = ArchiveOptions {
        dry_run: true,
        ..Default::default()
    };
    let result = pipeline()
        .run(src.to_str().unwrap(), out.to_str().unwrap(), &options)
        .await
        .unwrap();

    assert!(matches!(result.size, ArchiveSize::Exact(n) if n > 200_000));
    assert!(!out.exists());
}

#[tokio::test]
async fn missing_source_is_a_listing_error() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out.zip");

    let err = pipeline()
        .run(
            dir.path().join("absent").to_str().unwrap(),
            out.to_str().unwrap(),
            &ArchiveOptions::default(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, ArchiveError::Listing { .. }));
    assert!(!out.exists());
}
