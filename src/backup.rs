//! Workspace bundles: a zip with `manifest.json` and a snapshot of the database.
//!
//! The manifest records a digest and a few row counts of the snapshot so a
//! restore can check what it extracted before it touches the live database.

use crate::db::{self, DB_FILE_NAME};
use anyhow::{anyhow, bail, Context};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const MANIFEST_ENTRY: &str = "manifest.json";
const DB_ENTRY: &str = "db/tutor.sqlite3";
pub const BUNDLE_FORMAT: &str = "tutor-workspace-v1";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub format: String,
    pub app_version: String,
    pub exported_at: String,
    pub db_sha256: String,
    pub table_count: i64,
    pub user_count: i64,
}

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub manifest: Manifest,
    pub entry_count: usize,
}

#[derive(Debug, Clone)]
pub struct ImportSummary {
    pub manifest: Manifest,
}

fn table_count(conn: &Connection) -> anyhow::Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
        [],
        |r| r.get(0),
    )
    .context("failed to count tables")
}

fn user_count(conn: &Connection) -> anyhow::Result<i64> {
    conn.query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))
        .context("failed to count users")
}

fn sha256_file(path: &Path) -> anyhow::Result<String> {
    let mut file = File::open(path)
        .with_context(|| format!("failed to open {}", path.to_string_lossy()))?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)
        .with_context(|| format!("failed to read {}", path.to_string_lossy()))?;
    Ok(hex::encode(hasher.finalize()))
}

/// Sibling path for a scratch file; removed on drop.
struct Scratch(PathBuf);

impl Drop for Scratch {
    fn drop(&mut self) {
        if self.0.exists() {
            let _ = std::fs::remove_file(&self.0);
        }
    }
}

/// Writes a bundle from a consistent `VACUUM INTO` snapshot of `conn`.
pub fn export_workspace_bundle(conn: &Connection, out_path: &Path) -> anyhow::Result<ExportSummary> {
    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
    }

    let snapshot = Scratch(PathBuf::from(format!(
        "{}.snapshot",
        out_path.to_string_lossy()
    )));
    if snapshot.0.exists() {
        std::fs::remove_file(&snapshot.0).with_context(|| {
            format!("failed to remove stale snapshot {}", snapshot.0.to_string_lossy())
        })?;
    }
    conn.execute("VACUUM INTO ?1", [snapshot.0.to_string_lossy().into_owned()])
        .context("failed to snapshot database")?;

    let manifest = Manifest {
        format: BUNDLE_FORMAT.to_string(),
        app_version: env!("CARGO_PKG_VERSION").to_string(),
        exported_at: chrono::Utc::now().to_rfc3339(),
        db_sha256: sha256_file(&snapshot.0)?,
        table_count: table_count(conn)?,
        user_count: user_count(conn)?,
    };

    let out_file = File::create(out_path).with_context(|| {
        format!(
            "failed to create output file {}",
            out_path.to_string_lossy()
        )
    })?;
    let mut zip = ZipWriter::new(out_file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    zip.start_file(MANIFEST_ENTRY, opts)
        .context("failed to start manifest entry")?;
    zip.write_all(
        serde_json::to_string_pretty(&manifest)
            .context("failed to serialize manifest")?
            .as_bytes(),
    )
    .context("failed to write manifest entry")?;

    zip.start_file(DB_ENTRY, opts)
        .context("failed to start database entry")?;
    let mut db_file = File::open(&snapshot.0).with_context(|| {
        format!("failed to open snapshot {}", snapshot.0.to_string_lossy())
    })?;
    std::io::copy(&mut db_file, &mut zip).context("failed to write database entry")?;

    zip.finish().context("failed to finalize zip bundle")?;

    Ok(ExportSummary {
        manifest,
        entry_count: 2,
    })
}

fn read_manifest<R: Read + std::io::Seek>(archive: &mut ZipArchive<R>) -> anyhow::Result<Manifest> {
    let mut text = String::new();
    archive
        .by_name(MANIFEST_ENTRY)
        .context("bundle missing manifest.json")?
        .read_to_string(&mut text)
        .context("failed to read manifest.json")?;
    let raw: serde_json::Value =
        serde_json::from_str(&text).context("manifest.json is invalid JSON")?;
    let format = raw.get("format").and_then(|v| v.as_str()).unwrap_or("");
    if format != BUNDLE_FORMAT {
        bail!("unsupported bundle format: {}", format);
    }
    serde_json::from_value(raw).context("manifest.json is incomplete")
}

/// Checks an extracted database against its manifest and brings it up to the
/// current schema. Nothing is written outside `staged`.
fn verify_staged(staged: &Path, manifest: &Manifest) -> anyhow::Result<()> {
    let digest = sha256_file(staged)?;
    if !digest.eq_ignore_ascii_case(&manifest.db_sha256) {
        bail!("database digest mismatch: bundle says {}, got {}", manifest.db_sha256, digest);
    }

    let conn = Connection::open(staged).context("failed to open extracted database")?;
    let check: String = conn
        .query_row("PRAGMA quick_check", [], |r| r.get(0))
        .context("extracted database is not readable")?;
    if check != "ok" {
        bail!("extracted database failed integrity check: {}", check);
    }
    let tables = table_count(&conn)?;
    if tables != manifest.table_count {
        bail!("table count mismatch: bundle says {}, got {}", manifest.table_count, tables);
    }
    let users = user_count(&conn)?;
    if users != manifest.user_count {
        bail!("user count mismatch: bundle says {}, got {}", manifest.user_count, users);
    }
    db::create_schema(&conn).context("failed to upgrade extracted database")?;
    conn.close()
        .map_err(|(_, e)| anyhow!(e))
        .context("failed to close extracted database")?;
    Ok(())
}

/// Replaces the workspace database with the one inside the bundle.
///
/// The bundle is extracted next to the live file and verified there; the live
/// database is only replaced, by rename, once that succeeds. The caller must
/// drop any open connection first.
pub fn import_workspace_bundle(
    in_path: &Path,
    workspace_path: &Path,
) -> anyhow::Result<ImportSummary> {
    let in_file = File::open(in_path)
        .with_context(|| format!("failed to open bundle {}", in_path.to_string_lossy()))?;
    let mut archive = ZipArchive::new(in_file)
        .map_err(|_| anyhow!("not a workspace bundle: {}", in_path.to_string_lossy()))?;
    let manifest = read_manifest(&mut archive)?;

    std::fs::create_dir_all(workspace_path).with_context(|| {
        format!(
            "failed to create workspace {}",
            workspace_path.to_string_lossy()
        )
    })?;
    let dst = workspace_path.join(DB_FILE_NAME);
    let staged = Scratch(workspace_path.join(format!("{}.importing", DB_FILE_NAME)));
    if staged.0.exists() {
        std::fs::remove_file(&staged.0).with_context(|| {
            format!("failed to remove stale {}", staged.0.to_string_lossy())
        })?;
    }

    {
        let mut db_out = File::create(&staged.0).with_context(|| {
            format!(
                "failed to create temp database {}",
                staged.0.to_string_lossy()
            )
        })?;
        let mut db_entry = archive
            .by_name(DB_ENTRY)
            .with_context(|| format!("bundle missing {}", DB_ENTRY))?;
        std::io::copy(&mut db_entry, &mut db_out).context("failed to extract database entry")?;
        db_out
            .sync_all()
            .context("failed to flush extracted database")?;
    }

    verify_staged(&staged.0, &manifest)?;

    std::fs::rename(&staged.0, &dst).with_context(|| {
        format!(
            "failed to move extracted database to {}",
            dst.to_string_lossy()
        )
    })?;

    Ok(ImportSummary { manifest })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded_workspace() -> (tempfile::TempDir, Connection) {
        let dir = tempfile::tempdir().expect("workspace dir");
        let conn = db::open_db(dir.path()).expect("open workspace");
        conn.execute("INSERT INTO subjects(id, name) VALUES('s1', 'Math')", [])
            .expect("insert");
        (dir, conn)
    }

    fn write_bundle(path: &Path, manifest: &serde_json::Value, db_bytes: &[u8]) {
        let mut zip = ZipWriter::new(File::create(path).expect("create bundle"));
        let opts = FileOptions::default();
        zip.start_file(MANIFEST_ENTRY, opts).expect("manifest entry");
        zip.write_all(manifest.to_string().as_bytes()).expect("manifest body");
        zip.start_file(DB_ENTRY, opts).expect("db entry");
        zip.write_all(db_bytes).expect("db body");
        zip.finish().expect("finish bundle");
    }

    fn subject_name(workspace: &Path) -> String {
        let conn = db::open_db(workspace).expect("reopen");
        conn.query_row("SELECT name FROM subjects WHERE id = 's1'", [], |r| r.get(0))
            .expect("row")
    }

    #[test]
    fn bundle_round_trip_restores_rows() {
        let (_src, conn) = seeded_workspace();
        let dst = tempfile::tempdir().expect("dst dir");
        let out = tempfile::tempdir().expect("out dir");
        let bundle = out.path().join("nested/backup.zip");

        let export = export_workspace_bundle(&conn, &bundle).expect("export");
        assert_eq!(export.entry_count, 2);
        assert_eq!(export.manifest.user_count, 0);
        assert_eq!(export.manifest.db_sha256.len(), 64);
        assert!(!PathBuf::from(format!("{}.snapshot", bundle.to_string_lossy())).exists());

        let import = import_workspace_bundle(&bundle, dst.path()).expect("import");
        assert_eq!(import.manifest.format, BUNDLE_FORMAT);
        assert_eq!(import.manifest.db_sha256, export.manifest.db_sha256);
        assert_eq!(subject_name(dst.path()), "Math");
        assert!(!dst.path().join("tutor.sqlite3.importing").exists());
    }

    #[test]
    fn import_rejects_non_zip_input() {
        let dir = tempfile::tempdir().expect("dir");
        let bogus = dir.path().join("bogus.zip");
        std::fs::write(&bogus, b"not a zip").expect("write");
        let e = import_workspace_bundle(&bogus, dir.path()).expect_err("must reject");
        assert!(e.to_string().contains("not a workspace bundle"));
    }

    #[test]
    fn corrupt_database_entry_leaves_live_file_alone() {
        let (live, conn) = seeded_workspace();
        drop(conn);
        let out = tempfile::tempdir().expect("out dir");
        let bundle = out.path().join("corrupt.zip");
        let junk = b"SQLite format 3\0 but the pages are garbage".repeat(64);
        let manifest = serde_json::json!({
            "format": BUNDLE_FORMAT,
            "appVersion": "0.0.0",
            "exportedAt": "2026-01-01T00:00:00Z",
            "dbSha256": hex::encode(Sha256::digest(&junk)),
            "tableCount": 20,
            "userCount": 0,
        });
        write_bundle(&bundle, &manifest, &junk);

        import_workspace_bundle(&bundle, live.path()).expect_err("must reject");
        assert_eq!(subject_name(live.path()), "Math");
        assert!(!live.path().join("tutor.sqlite3.importing").exists());
    }

    #[test]
    fn digest_mismatch_is_rejected_before_open() {
        let (live, conn) = seeded_workspace();
        let out = tempfile::tempdir().expect("out dir");
        let good = out.path().join("good.zip");
        let export = export_workspace_bundle(&conn, &good).expect("export");
        drop(conn);

        let mut db_bytes = Vec::new();
        ZipArchive::new(File::open(&good).expect("open good"))
            .expect("zip")
            .by_name(DB_ENTRY)
            .expect("db entry")
            .read_to_end(&mut db_bytes)
            .expect("read db");
        let last = db_bytes.len() - 1;
        db_bytes[last] ^= 0xff;

        let tampered = out.path().join("tampered.zip");
        let manifest = serde_json::to_value(&export.manifest).expect("manifest json");
        write_bundle(&tampered, &manifest, &db_bytes);

        let e = import_workspace_bundle(&tampered, live.path()).expect_err("must reject");
        assert!(format!("{e:#}").contains("digest mismatch"));
        assert_eq!(subject_name(live.path()), "Math");
    }

    #[test]
    fn manifest_without_digest_is_rejected() {
        let dir = tempfile::tempdir().expect("dir");
        let bundle = dir.path().join("old.zip");
        write_bundle(&bundle, &serde_json::json!({ "format": BUNDLE_FORMAT }), b"x");
        let e = import_workspace_bundle(&bundle, dir.path()).expect_err("must reject");
        assert!(format!("{e:#}").contains("manifest.json is incomplete"));
        assert!(!dir.path().join(DB_FILE_NAME).exists());
    }
}
