//! Export/import pipeline tests.
//!
//! Each case gets its own temp directory with a source pool (the exporting
//! installation), a target pool (the importing one) and a staging root.

use std::collections::BTreeSet;
use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};
use showcomposer::models::SESSION_ANNOTATION;
use showcomposer::store::{AssetPool, DirAssetPool};
use showcomposer::transfer::*;
use showcomposer::Error;
use speculate2::speculate;
use tempfile::TempDir;
use uuid::Uuid;
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

struct ManualClock(Mutex<DateTime<Utc>>);

impl ManualClock {
    fn advance(&self, by: Duration) {
        *self.0.lock().unwrap() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}

struct Fixture {
    dir: TempDir,
    source: DirAssetPool,
    target: DirAssetPool,
    clock: Arc<ManualClock>,
    sessions: SessionStore,
    stager: Stager,
    reconciler: Reconciler,
}

impl Fixture {
    fn new() -> Self {
        Self::with_strategy(RewriteStrategy::Structural)
    }

    fn with_strategy(strategy: RewriteStrategy) -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let source = DirAssetPool::open(dir.path().join("source")).expect("source pool");
        let target = DirAssetPool::open(dir.path().join("target")).expect("target pool");
        let clock = Arc::new(ManualClock(Mutex::new(Utc::now())));
        let sessions = SessionStore::new(clock.clone());
        let stager = Stager::new(dir.path().join("staging"), sessions.clone()).expect("stager");
        let reconciler = Reconciler::new(sessions.clone(), strategy);
        Self {
            dir,
            source,
            target,
            clock,
            sessions,
            stager,
            reconciler,
        }
    }

    /// Store `bytes` in `pool` under `name`.
    fn seed(&self, pool: &DirAssetPool, name: &str, bytes: &[u8]) {
        let src = self.dir.path().join(format!("seed-{}", Uuid::new_v4()));
        fs::write(&src, bytes).unwrap();
        pool.put(name, &src).expect("Failed to seed pool");
        fs::remove_file(src).unwrap();
    }

    /// Export from the source pool into an upload file.
    fn export(&self, document: &Value) -> (PathBuf, ExportSummary) {
        let mut sink = Cursor::new(Vec::new());
        let summary = write_archive(document, &self.source, &mut sink).expect("Export failed");
        (self.upload(&sink.into_inner()), summary)
    }

    /// Deposit archive bytes where an upload would land.
    fn upload(&self, bytes: &[u8]) -> PathBuf {
        let path = self.dir.path().join(format!("upload-{}.zip", Uuid::new_v4()));
        fs::write(&path, bytes).unwrap();
        path
    }

    fn staging_entries(&self) -> usize {
        fs::read_dir(self.stager.staging_root()).unwrap().count()
    }

    fn read_target(&self, name: &str) -> Vec<u8> {
        fs::read(self.target.resolve(name).expect("asset missing from target")).unwrap()
    }
}

fn zip_bytes<B: AsRef<[u8]>>(entries: &[(&str, B)]) -> Vec<u8> {
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut zip = ZipWriter::new(&mut cursor);
        for (name, bytes) in entries {
            zip.start_file(*name, SimpleFileOptions::default()).unwrap();
            zip.write_all(bytes.as_ref()).unwrap();
        }
        zip.finish().unwrap();
    }
    cursor.into_inner()
}

fn entry_names(path: &Path) -> Vec<String> {
    let archive = ZipArchive::new(fs::File::open(path).unwrap()).unwrap();
    archive.file_names().map(str::to_string).collect()
}

fn without_annotation(mut document: Value) -> Value {
    if let Some(map) = document.as_object_mut() {
        map.remove(SESSION_ANNOTATION);
    }
    document
}

fn demo_document() -> Value {
    json!({
        "settingsStore": { "projectName": "Demo" },
        "slides": [{ "bg": "/uploads/x.png" }]
    })
}

/// Delegates to a real pool, optionally failing on the nth put or having
/// another writer grab a name just before a put.
struct FlakyPool {
    inner: DirAssetPool,
    fail_on_put: Option<usize>,
    steal: Option<String>,
    puts: Mutex<usize>,
}

impl AssetPool for FlakyPool {
    fn list(&self) -> showcomposer::Result<BTreeSet<String>> {
        self.inner.list()
    }

    fn put(&self, filename: &str, source: &Path) -> showcomposer::Result<()> {
        let mut puts = self.puts.lock().unwrap();
        *puts += 1;
        if Some(*puts) == self.fail_on_put {
            return Err(Error::io(
                format!("copying asset {filename}"),
                std::io::Error::other("disk full"),
            ));
        }
        if let Some(stolen) = &self.steal {
            if stolen == filename && *puts == 1 {
                self.inner.put(filename, source)?;
            }
        }
        self.inner.put(filename, source)
    }

    fn resolve(&self, filename: &str) -> showcomposer::Result<PathBuf> {
        self.inner.resolve(filename)
    }

    fn remove(&self, filename: &str) -> showcomposer::Result<()> {
        self.inner.remove(filename)
    }
}

speculate! {
    before {
        let fx = Fixture::new();
    }

    describe "write_archive" {
        it "packages the document and every referenced asset" {
            fx.seed(&fx.source, "x.png", b"x-bytes");
            let (path, summary) = fx.export(&demo_document());

            assert_eq!(summary.included, vec!["x.png".to_string()]);
            assert!(summary.skipped.is_empty());
            assert_eq!(entry_names(&path), vec!["data.json", "uploads/x.png"]);
        }

        it "skips references missing from the pool" {
            let doc = json!({
                "settingsStore": { "projectName": "Gaps" },
                "bg": "/uploads/missing.png"
            });
            let (path, summary) = fx.export(&doc);

            assert_eq!(summary.skipped, vec!["missing.png".to_string()]);
            assert_eq!(entry_names(&path), vec!["data.json"]);
        }

        it "writes a document member that parses back to the input" {
            let doc = demo_document();
            let (path, _) = fx.export(&doc);

            let mut archive = ZipArchive::new(fs::File::open(&path).unwrap()).unwrap();
            let member = archive.by_name(DOCUMENT_ENTRY).unwrap();
            let parsed: Value = serde_json::from_reader(member).unwrap();
            assert_eq!(parsed, doc);
        }

        it "produces identical bytes for identical input" {
            fx.seed(&fx.source, "a.png", b"a");
            fx.seed(&fx.source, "b.gif", b"b");
            let doc = json!({ "list": ["/uploads/b.gif", "/uploads/a.png"] });

            let mut first = Cursor::new(Vec::new());
            let mut second = Cursor::new(Vec::new());
            write_archive(&doc, &fx.source, &mut first).unwrap();
            write_archive(&doc, &fx.source, &mut second).unwrap();

            assert_eq!(first.into_inner(), second.into_inner());
        }
    }

    describe "begin_import" {
        it "stages the document and assets and consumes the upload" {
            fx.seed(&fx.source, "x.png", b"x-bytes");
            let (path, _) = fx.export(&demo_document());

            let session = fx.stager.begin_import(&path).expect("Staging failed");

            assert!(!path.exists());
            assert!(session.workspace.join("uploads/x.png").is_file());
            assert_eq!(without_annotation(session.document.clone()), demo_document());
            assert_eq!(session.document[SESSION_ANNOTATION], json!(session.id.to_string()));
            assert!(fx.sessions.contains(session.id));
        }

        it "fails with a format error when data.json is missing" {
            let path = fx.upload(&zip_bytes(&[("uploads/x.png", b"x")]));

            let result = fx.stager.begin_import(&path);

            assert!(matches!(result, Err(Error::Format(_))));
            assert!(!path.exists());
            assert_eq!(fx.staging_entries(), 0);
            assert!(fx.sessions.is_empty());
        }

        it "fails with a format error when data.json is not JSON" {
            let path = fx.upload(&zip_bytes(&[("data.json", b"{not json")]));

            assert!(matches!(fx.stager.begin_import(&path), Err(Error::Format(_))));
            assert!(!path.exists());
            assert_eq!(fx.staging_entries(), 0);
        }

        it "fails with a format error when the upload is not a zip" {
            let path = fx.upload(b"definitely not a zip archive");

            assert!(matches!(fx.stager.begin_import(&path), Err(Error::Format(_))));
            assert!(!path.exists());
            assert_eq!(fx.staging_entries(), 0);
        }

        it "rejects documents that are not objects" {
            let path = fx.upload(&zip_bytes(&[("data.json", b"[1, 2, 3]")]));

            assert!(matches!(fx.stager.begin_import(&path), Err(Error::Format(_))));
            assert_eq!(fx.staging_entries(), 0);
        }
    }

    describe "confirm_import" {
        it "imports into an empty pool without renaming" {
            fx.seed(&fx.source, "x.png", b"x-bytes");
            let (path, _) = fx.export(&demo_document());
            let session = fx.stager.begin_import(&path).unwrap();

            let document = fx.reconciler.confirm_import(session.id, &fx.target).unwrap();

            assert_eq!(document, demo_document());
            assert_eq!(fx.target.list().unwrap().into_iter().collect::<Vec<_>>(), vec!["x.png"]);
            assert_eq!(fx.read_target("x.png"), b"x-bytes");
            assert!(!session.workspace.exists());
        }

        it "round-trips a document with several assets" {
            fx.seed(&fx.source, "a.png", b"a");
            fx.seed(&fx.source, "b.jpg", b"b");
            let doc = json!({
                "settingsStore": { "projectName": "Round Trip" },
                "slides": [
                    { "bg": "/uploads/a.png", "items": [{ "src": "/uploads/b.jpg" }] },
                    { "bg": "/uploads/a.png" }
                ]
            });
            let (path, _) = fx.export(&doc);
            let session = fx.stager.begin_import(&path).unwrap();

            let document = fx.reconciler.confirm_import(session.id, &fx.target).unwrap();

            assert_eq!(document, doc);
            for name in referenced_filenames(&document) {
                assert!(fx.target.resolve(&name).is_ok(), "{name} not in pool");
            }
        }

        it "renames a colliding asset and rewrites its references" {
            fx.seed(&fx.target, "a.png", b"original");
            fx.seed(&fx.source, "a.png", b"imported");
            let doc = json!({
                "settingsStore": { "projectName": "Clash" },
                "bg": "/uploads/a.png",
                "thumbs": ["/uploads/a.png"]
            });
            let (path, _) = fx.export(&doc);
            let session = fx.stager.begin_import(&path).unwrap();

            let document = fx.reconciler.confirm_import(session.id, &fx.target).unwrap();

            let new_name = asset_filename(document["bg"].as_str().unwrap()).unwrap().to_string();
            assert_ne!(new_name, "a.png");
            assert!(new_name.starts_with("a_") && new_name.ends_with(".png"));
            assert_eq!(document["thumbs"][0], json!(format!("/uploads/{new_name}")));
            assert_eq!(fx.read_target("a.png"), b"original");
            assert_eq!(fx.read_target(&new_name), b"imported");

            let names = fx.target.list().unwrap();
            assert!(names.contains("a.png") && names.contains(&new_name));
        }

        it "leaves unrelated strings alone when renaming" {
            fx.seed(&fx.target, "a.png", b"original");
            fx.seed(&fx.source, "a.png", b"imported");
            let doc = json!({ "bg": "/uploads/a.png", "note": "a.png is the logo" });
            let (path, _) = fx.export(&doc);
            let session = fx.stager.begin_import(&path).unwrap();

            let document = fx.reconciler.confirm_import(session.id, &fx.target).unwrap();

            assert_eq!(document["note"], json!("a.png is the logo"));
        }

        it "imports images stored at the archive root" {
            let doc = json!({ "settingsStore": { "projectName": "Legacy" }, "bg": "/uploads/old.GIF" });
            let data = serde_json::to_vec(&doc).unwrap();
            let path = fx.upload(&zip_bytes(&[
                ("data.json", &data[..]),
                ("old.GIF", &b"gif"[..]),
                ("notes.txt", &b"ignored"[..]),
            ]));
            let session = fx.stager.begin_import(&path).unwrap();

            let document = fx.reconciler.confirm_import(session.id, &fx.target).unwrap();

            assert_eq!(document, doc);
            let names: Vec<_> = fx.target.list().unwrap().into_iter().collect();
            assert_eq!(names, vec!["old.GIF"]);
        }

        it "skips hidden files the archiver left in uploads" {
            let doc = demo_document();
            let data = serde_json::to_vec(&doc).unwrap();
            let path = fx.upload(&zip_bytes(&[
                ("data.json", &data[..]),
                ("uploads/.DS_Store", &b"finder"[..]),
                ("uploads/x.png", &b"x-bytes"[..]),
            ]));
            let session = fx.stager.begin_import(&path).unwrap();

            let document = fx.reconciler.confirm_import(session.id, &fx.target).unwrap();

            assert_eq!(document, doc);
            let names: Vec<_> = fx.target.list().unwrap().into_iter().collect();
            assert_eq!(names, vec!["x.png"]);
            assert_eq!(fx.read_target("x.png"), b"x-bytes");
        }

        it "retries under a new name when another writer takes the name first" {
            fx.seed(&fx.source, "x.png", b"mine");
            let (path, _) = fx.export(&demo_document());
            let session = fx.stager.begin_import(&path).unwrap();
            let pool = FlakyPool {
                inner: fx.target.clone(),
                fail_on_put: None,
                steal: Some("x.png".to_string()),
                puts: Mutex::new(0),
            };

            let document = fx.reconciler.confirm_import(session.id, &pool).unwrap();

            let stored = asset_filename(document["slides"][0]["bg"].as_str().unwrap())
                .unwrap()
                .to_string();
            assert_ne!(stored, "x.png");
            assert_eq!(fx.read_target(&stored), b"mine");
            assert_eq!(fx.target.list().unwrap().len(), 2);
        }

        it "rolls back placed assets when a copy fails" {
            fx.seed(&fx.source, "a.png", b"a");
            fx.seed(&fx.source, "b.png", b"b");
            let doc = json!({ "a": "/uploads/a.png", "b": "/uploads/b.png" });
            let (path, _) = fx.export(&doc);
            let session = fx.stager.begin_import(&path).unwrap();
            let pool = FlakyPool {
                inner: fx.target.clone(),
                fail_on_put: Some(2),
                steal: None,
                puts: Mutex::new(0),
            };

            let result = fx.reconciler.confirm_import(session.id, &pool);

            match result {
                Err(Error::CommitFailed { filename, .. }) => assert_eq!(filename, "b.png"),
                other => panic!("expected commit failure, got {other:?}"),
            }
            assert!(fx.target.list().unwrap().is_empty());
            assert!(!session.workspace.exists());
            assert!(matches!(
                fx.reconciler.confirm_import(session.id, &fx.target),
                Err(Error::SessionNotFound(_))
            ));
        }

        it "reports unknown sessions as not found" {
            let result = fx.reconciler.confirm_import(Uuid::new_v4(), &fx.target);
            assert!(matches!(result, Err(Error::SessionNotFound(_))));
        }

        it "cannot confirm a session twice" {
            let (path, _) = fx.export(&demo_document());
            let session = fx.stager.begin_import(&path).unwrap();

            fx.reconciler.confirm_import(session.id, &fx.target).unwrap();

            assert!(matches!(
                fx.reconciler.confirm_import(session.id, &fx.target),
                Err(Error::SessionNotFound(_))
            ));
        }
    }

    describe "reject_import" {
        it "deletes the workspace and leaves the pool untouched" {
            fx.seed(&fx.source, "x.png", b"x");
            let (path, _) = fx.export(&demo_document());
            let session = fx.stager.begin_import(&path).unwrap();

            fx.reconciler.reject_import(session.id).unwrap();

            assert!(!session.workspace.exists());
            assert!(fx.target.list().unwrap().is_empty());
            assert_eq!(fx.staging_entries(), 0);
        }

        it "reports not found on the second call with no further changes" {
            let (path, _) = fx.export(&demo_document());
            let session = fx.stager.begin_import(&path).unwrap();

            fx.reconciler.reject_import(session.id).unwrap();
            let entries_after_first = fx.staging_entries();
            let second = fx.reconciler.reject_import(session.id);

            assert!(matches!(second, Err(Error::SessionNotFound(id)) if id == session.id));
            assert_eq!(fx.staging_entries(), entries_after_first);
            assert!(fx.target.list().unwrap().is_empty());
        }

        it "makes a later confirm fail" {
            let (path, _) = fx.export(&demo_document());
            let session = fx.stager.begin_import(&path).unwrap();

            fx.reconciler.reject_import(session.id).unwrap();

            assert!(matches!(
                fx.reconciler.confirm_import(session.id, &fx.target),
                Err(Error::SessionNotFound(_))
            ));
        }
    }

    describe "sweep_expired" {
        it "discards sessions older than the ttl" {
            let (old_path, _) = fx.export(&demo_document());
            let old = fx.stager.begin_import(&old_path).unwrap();
            fx.clock.advance(Duration::minutes(45));
            let (fresh_path, _) = fx.export(&demo_document());
            let fresh = fx.stager.begin_import(&fresh_path).unwrap();
            fx.clock.advance(Duration::minutes(20));

            let swept = fx.reconciler.sweep_expired(Duration::hours(1));

            assert_eq!(swept, 1);
            assert!(!old.workspace.exists());
            assert!(fresh.workspace.exists());
            assert!(matches!(
                fx.reconciler.reject_import(old.id),
                Err(Error::SessionNotFound(_))
            ));
            fx.reconciler.reject_import(fresh.id).unwrap();
        }
    }

    describe "substring rewrite" {
        it "rewrites every occurrence of a renamed file" {
            let fx = Fixture::with_strategy(RewriteStrategy::Substring);
            fx.seed(&fx.target, "a.png", b"original");
            fx.seed(&fx.source, "a.png", b"imported");
            let doc = json!({ "bg": "/uploads/a.png", "note": "a.png is the logo" });
            let (path, _) = fx.export(&doc);
            let session = fx.stager.begin_import(&path).unwrap();

            let document = fx.reconciler.confirm_import(session.id, &fx.target).unwrap();

            let new_name = asset_filename(document["bg"].as_str().unwrap()).unwrap().to_string();
            assert_eq!(document["note"], json!(format!("{new_name} is the logo")));
        }
    }
}
