#[path = "../src/backup.rs"]
mod backup;

use std::fs::File;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};
use zip::write::FileOptions;

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

#[test]
fn zip_export_and_import_roundtrip() {
    let workspace = temp_dir("dojod-bundle-src");
    let workspace2 = temp_dir("dojod-bundle-dst");
    let out_dir = temp_dir("dojod-bundle-out");

    let bytes = b"sqlite-test-payload";
    std::fs::write(workspace.join("dojo.sqlite3"), bytes).expect("write source db");

    let bundle_path = out_dir.join("nested").join("dojo-backup.zip");
    let export = backup::export_workspace_bundle(&workspace, &bundle_path).expect("export bundle");
    assert_eq!(export.bundle_format, backup::BUNDLE_FORMAT_V1);
    assert_eq!(export.entry_count, 3);
    assert_eq!(export.db_sha256.len(), 64);

    let f = File::open(&bundle_path).expect("open bundle");
    let mut archive = zip::ZipArchive::new(f).expect("open zip archive");
    let mut manifest = String::new();
    archive
        .by_name("manifest.json")
        .expect("manifest entry")
        .read_to_string(&mut manifest)
        .expect("read manifest");
    assert!(manifest.contains(backup::BUNDLE_FORMAT_V1));
    assert!(manifest.contains(&export.db_sha256));
    archive
        .by_name("db/dojo.sqlite3")
        .expect("database entry in bundle");
    archive
        .by_name("meta/workspace.json")
        .expect("workspace metadata entry");

    let import = backup::import_workspace_bundle(&bundle_path, &workspace2).expect("import bundle");
    assert_eq!(import.bundle_format_detected, backup::BUNDLE_FORMAT_V1);
    assert_eq!(import.db_sha256, export.db_sha256);

    let restored = std::fs::read(workspace2.join("dojo.sqlite3")).expect("read restored db");
    assert_eq!(restored, bytes);
    assert!(!workspace2.join("dojo.sqlite3.importing").exists());

    let _ = std::fs::remove_dir_all(workspace);
    let _ = std::fs::remove_dir_all(workspace2);
    let _ = std::fs::remove_dir_all(out_dir);
}

#[test]
fn export_requires_a_workspace_database() {
    let workspace = temp_dir("dojod-bundle-empty");
    let out = workspace.join("out.zip");
    let err = backup::export_workspace_bundle(&workspace, &out).expect_err("missing db");
    assert!(err.to_string().contains("workspace database not found"));
    assert!(!out.exists());
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn raw_sqlite_file_imports_as_legacy_backup() {
    let src_dir = temp_dir("dojod-legacy-src");
    let workspace = temp_dir("dojod-legacy-dst");

    let legacy = src_dir.join("old-backup.sqlite3");
    let bytes = b"SQLite format 3\0legacy-payload";
    std::fs::write(&legacy, bytes).expect("write legacy backup");

    let import = backup::import_workspace_bundle(&legacy, &workspace).expect("import legacy");
    assert_eq!(import.bundle_format_detected, backup::LEGACY_SQLITE_FORMAT);
    let restored = std::fs::read(workspace.join("dojo.sqlite3")).expect("read restored db");
    assert_eq!(restored, bytes);

    let _ = std::fs::remove_dir_all(src_dir);
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn checksum_mismatch_leaves_workspace_untouched() {
    let out_dir = temp_dir("dojod-bundle-bad");
    let workspace = temp_dir("dojod-bundle-bad-dst");
    let bundle_path = out_dir.join("tampered.zip");

    {
        let f = File::create(&bundle_path).expect("create bundle");
        let mut zip = zip::ZipWriter::new(f);
        let opts = FileOptions::default();
        zip.start_file("manifest.json", opts).expect("start manifest");
        zip.write_all(
            serde_json::json!({
                "format": backup::BUNDLE_FORMAT_V1,
                "version": 1,
                "dbSha256": "0000000000000000000000000000000000000000000000000000000000000000",
            })
            .to_string()
            .as_bytes(),
        )
        .expect("write manifest");
        zip.start_file("db/dojo.sqlite3", opts).expect("start db");
        zip.write_all(b"tampered-payload").expect("write db");
        zip.finish().expect("finish zip");
    }

    let err = backup::import_workspace_bundle(&bundle_path, &workspace).expect_err("mismatch");
    assert!(err.to_string().contains("checksum mismatch"));
    assert!(!workspace.join("dojo.sqlite3").exists());
    assert!(!workspace.join("dojo.sqlite3.importing").exists());

    let _ = std::fs::remove_dir_all(out_dir);
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn unknown_bundle_format_is_rejected() {
    let out_dir = temp_dir("dojod-bundle-format");
    let workspace = temp_dir("dojod-bundle-format-dst");
    let bundle_path = out_dir.join("other.zip");

    {
        let f = File::create(&bundle_path).expect("create bundle");
        let mut zip = zip::ZipWriter::new(f);
        zip.start_file("manifest.json", FileOptions::default())
            .expect("start manifest");
        zip.write_all(br#"{"format":"something-else"}"#)
            .expect("write manifest");
        zip.finish().expect("finish zip");
    }

    let err = backup::import_workspace_bundle(&bundle_path, &workspace).expect_err("format");
    assert!(err.to_string().contains("unsupported bundle format"));

    let _ = std::fs::remove_dir_all(out_dir);
    let _ = std::fs::remove_dir_all(workspace);
}

fn write_bundle(path: &std::path::Path, manifest: serde_json::Value, db: &[u8]) {
    let f = File::create(path).expect("create bundle");
    let mut zip = zip::ZipWriter::new(f);
    let opts = FileOptions::default();
    zip.start_file("manifest.json", opts).expect("start manifest");
    zip.write_all(manifest.to_string().as_bytes())
        .expect("write manifest");
    zip.start_file("db/dojo.sqlite3", opts).expect("start db");
    zip.write_all(db).expect("write db");
    zip.finish().expect("finish zip");
}

#[test]
fn bundle_without_checksum_is_rejected() {
    let out_dir = temp_dir("dojod-bundle-nosha");
    let workspace = temp_dir("dojod-bundle-nosha-dst");
    std::fs::write(workspace.join("dojo.sqlite3"), b"current-db").expect("write current db");

    let stripped = out_dir.join("stripped.zip");
    write_bundle(
        &stripped,
        serde_json::json!({ "format": backup::BUNDLE_FORMAT_V1, "version": 1 }),
        b"replacement-db",
    );
    let err = backup::import_workspace_bundle(&stripped, &workspace).expect_err("no checksum");
    assert!(err.to_string().contains("dbSha256"), "{}", err);

    let garbled = out_dir.join("garbled.zip");
    write_bundle(
        &garbled,
        serde_json::json!({ "format": backup::BUNDLE_FORMAT_V1, "version": 1, "dbSha256": "not-a-digest" }),
        b"replacement-db",
    );
    let err = backup::import_workspace_bundle(&garbled, &workspace).expect_err("bad checksum");
    assert!(err.to_string().contains("not a sha256 hex digest"), "{}", err);

    let kept = std::fs::read(workspace.join("dojo.sqlite3")).expect("read current db");
    assert_eq!(kept, b"current-db");
    assert!(!workspace.join("dojo.sqlite3.importing").exists());

    let _ = std::fs::remove_dir_all(out_dir);
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn size_mismatch_and_foreign_files_are_rejected() {
    let out_dir = temp_dir("dojod-bundle-size");
    let workspace = temp_dir("dojod-bundle-size-dst");
    let payload = b"exact-payload";
    let sha: String = {
        use sha2::{Digest, Sha256};
        Sha256::digest(payload)
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect()
    };

    let resized = out_dir.join("resized.zip");
    write_bundle(
        &resized,
        serde_json::json!({
            "format": backup::BUNDLE_FORMAT_V1,
            "version": 1,
            "dbSha256": sha.to_ascii_uppercase(),
            "dbBytes": 99,
        }),
        payload,
    );
    let err = backup::import_workspace_bundle(&resized, &workspace).expect_err("size");
    assert!(err.to_string().contains("size mismatch"), "{}", err);
    assert!(!workspace.join("dojo.sqlite3").exists());

    let text = out_dir.join("notes.txt");
    std::fs::write(&text, b"just some notes").expect("write text file");
    let err = backup::import_workspace_bundle(&text, &workspace).expect_err("foreign file");
    assert!(err.to_string().contains("neither a workspace bundle nor a sqlite database"));
    assert!(!workspace.join("dojo.sqlite3").exists());

    let _ = std::fs::remove_dir_all(out_dir);
    let _ = std::fs::remove_dir_all(workspace);
}
