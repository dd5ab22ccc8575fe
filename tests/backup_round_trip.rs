mod test_support;

use serde_json::json;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use test_support::{add_student, seed_school, spawn_sidecar, temp_dir};

#[test]
fn exported_bundle_restores_into_a_fresh_workspace() {
    let workspace = temp_dir("tutord-backup-src");
    let restored = temp_dir("tutord-backup-dst");
    let out_dir = temp_dir("tutord-backup-out");
    let bundle = out_dir.path().join("school.tutorbackup.zip");

    let mut sc = spawn_sidecar();
    sc.select_workspace(workspace.path());
    let school = seed_school(&mut sc);
    let student = add_student(&mut sc, &school.admin, "Aziza", "Rahimova", "10-A");
    sc.request_ok(
        Some(&school.teacher.user_id),
        "attendance.mark",
        json!({ "studentId": student.profile_id, "topicId": school.topic_id, "status": "present" }),
    );

    assert_eq!(
        sc.request_err(
            Some(&student.user_id),
            "backup.exportWorkspaceBundle",
            json!({ "outPath": bundle.to_string_lossy() }),
        ),
        "forbidden"
    );
    let export = sc.request_ok(
        Some(&school.admin),
        "backup.exportWorkspaceBundle",
        json!({ "outPath": bundle.to_string_lossy() }),
    );
    assert_eq!(export["bundleFormat"], json!("tutor-workspace-v1"));
    assert_eq!(export["entryCount"], json!(2));
    assert_eq!(export["userCount"], json!(3));

    let mut archive = zip::ZipArchive::new(File::open(&bundle).expect("open bundle")).expect("zip");
    let mut manifest = String::new();
    archive
        .by_name("manifest.json")
        .expect("manifest entry")
        .read_to_string(&mut manifest)
        .expect("read manifest");
    assert!(manifest.contains("tutor-workspace-v1"));
    archive.by_name("db/tutor.sqlite3").expect("database entry");

    let import = sc.request_ok(
        Some(&school.admin),
        "backup.importWorkspaceBundle",
        json!({
            "inPath": bundle.to_string_lossy(),
            "workspacePath": restored.path().to_string_lossy(),
        }),
    );
    assert_eq!(import["bundleFormatDetected"], json!("tutor-workspace-v1"));

    let health = sc.request_ok(None, "health", json!({}));
    assert_eq!(
        health["workspacePath"].as_str(),
        Some(restored.path().to_string_lossy().as_ref())
    );
    let stats = sc.request_ok(
        Some(&school.admin),
        "stats.attendance",
        json!({ "studentId": student.profile_id }),
    );
    assert_eq!(stats.pointer("/attendance/rate").and_then(|v| v.as_f64()), Some(100.0));
}

#[test]
fn import_rejects_missing_and_foreign_files() {
    let workspace = temp_dir("tutord-backup-reject");
    let mut sc = spawn_sidecar();
    sc.select_workspace(workspace.path());

    let missing = workspace.path().join("nope.zip");
    assert_eq!(
        sc.request_err(None, "backup.importWorkspaceBundle", json!({ "inPath": missing.to_string_lossy() })),
        "not_found"
    );

    let junk = workspace.path().join("junk.txt");
    std::fs::write(&junk, b"plain text, not an archive").expect("write junk");
    assert_eq!(
        sc.request_err(None, "backup.importWorkspaceBundle", json!({ "inPath": junk.to_string_lossy() })),
        "backup_failed"
    );
}

#[test]
fn failed_import_keeps_the_current_workspace() {
    let workspace = temp_dir("tutord-backup-keep");
    let mut sc = spawn_sidecar();
    sc.select_workspace(workspace.path());
    let school = seed_school(&mut sc);

    let junk = workspace.path().join("junk.zip");
    std::fs::write(&junk, b"PK but not really").expect("write junk");
    assert_eq!(
        sc.request_err(
            Some(&school.admin),
            "backup.importWorkspaceBundle",
            json!({ "inPath": junk.to_string_lossy() }),
        ),
        "backup_failed"
    );
    let subjects = sc.request_ok(Some(&school.admin), "subjects.list", json!({}));
    assert_eq!(subjects["subjects"].as_array().map(|a| a.len()), Some(1));
}

/// Valid manifest whose digest matches a database entry that is not a database.
fn write_corrupt_bundle(path: &Path) {
    let junk = b"SQLite format 3\0 followed by pages of nothing".repeat(32);
    let manifest = json!({
        "format": "tutor-workspace-v1",
        "appVersion": "0.1.0",
        "exportedAt": "2026-01-01T00:00:00Z",
        "dbSha256": hex::encode(Sha256::digest(&junk)),
        "tableCount": 20,
        "userCount": 2,
    });
    let mut zip = zip::ZipWriter::new(File::create(path).expect("create bundle"));
    let opts = zip::write::FileOptions::default();
    zip.start_file("manifest.json", opts).expect("manifest entry");
    zip.write_all(manifest.to_string().as_bytes()).expect("manifest body");
    zip.start_file("db/tutor.sqlite3", opts).expect("db entry");
    zip.write_all(&junk).expect("db body");
    zip.finish().expect("finish bundle");
}

#[test]
fn corrupt_database_entry_is_rejected_in_place() {
    let workspace = temp_dir("tutord-backup-corrupt");
    let out_dir = temp_dir("tutord-backup-corrupt-out");
    let bundle = out_dir.path().join("corrupt.zip");
    write_corrupt_bundle(&bundle);

    let mut sc = spawn_sidecar();
    sc.select_workspace(workspace.path());
    let school = seed_school(&mut sc);

    // Restoring over the open workspace itself.
    assert_eq!(
        sc.request_err(
            Some(&school.admin),
            "backup.importWorkspaceBundle",
            json!({ "inPath": bundle.to_string_lossy() }),
        ),
        "backup_failed"
    );

    let health = sc.request_ok(None, "health", json!({}));
    assert_eq!(
        health["workspacePath"].as_str(),
        Some(workspace.path().to_string_lossy().as_ref())
    );
    let subjects = sc.request_ok(Some(&school.admin), "subjects.list", json!({}));
    assert_eq!(subjects["subjects"].as_array().map(|a| a.len()), Some(1));
    assert!(!workspace.path().join("tutor.sqlite3.importing").exists());
}

#[test]
fn restore_runs_before_any_workspace_is_open() {
    let source = temp_dir("tutord-backup-fresh-src");
    let restored = temp_dir("tutord-backup-fresh-dst");
    let out_dir = temp_dir("tutord-backup-fresh-out");
    let bundle = out_dir.path().join("school.zip");

    let school = {
        let mut sc = spawn_sidecar();
        sc.select_workspace(source.path());
        let school = seed_school(&mut sc);
        sc.request_ok(
            Some(&school.admin),
            "backup.exportWorkspaceBundle",
            json!({ "outPath": bundle.to_string_lossy() }),
        );
        school
    };

    let mut sc = spawn_sidecar();
    assert_eq!(
        sc.request_err(
            None,
            "backup.exportWorkspaceBundle",
            json!({ "outPath": out_dir.path().join("x.zip").to_string_lossy() }),
        ),
        "no_workspace"
    );
    assert_eq!(
        sc.request_err(None, "backup.importWorkspaceBundle", json!({ "inPath": bundle.to_string_lossy() })),
        "no_workspace"
    );
    sc.request_ok(
        None,
        "backup.importWorkspaceBundle",
        json!({
            "inPath": bundle.to_string_lossy(),
            "workspacePath": restored.path().to_string_lossy(),
        }),
    );
    let subjects = sc.request_ok(Some(&school.admin), "subjects.list", json!({}));
    assert_eq!(subjects["subjects"].as_array().map(|a| a.len()), Some(1));
}
