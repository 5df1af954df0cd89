use std::fs;

use serde_json::json;
use showcomposer::store::{AssetPool, DirAssetPool, DirProjectStore, ProjectStore};
use showcomposer::Error;
use speculate2::speculate;

speculate! {
    before {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let source = dir.path().join("source.bin");
        fs::write(&source, b"asset bytes").expect("Failed to write source");
    }

    describe "asset pool" {
        before {
            let pool = DirAssetPool::open(dir.path().join("uploads")).expect("Failed to open pool");
        }

        describe "put" {
            it "stores a copy under the given name" {
                pool.put("a.png", &source).expect("put failed");

                let stored = pool.resolve("a.png").expect("resolve failed");
                assert_eq!(fs::read(stored).unwrap(), b"asset bytes");
                assert!(source.exists());
            }

            it "refuses to overwrite an existing asset" {
                pool.put("a.png", &source).unwrap();
                let other = dir.path().join("other.bin");
                fs::write(&other, b"different").unwrap();

                let result = pool.put("a.png", &other);

                assert!(matches!(result, Err(Error::AlreadyExists(name)) if name == "a.png"));
                assert_eq!(fs::read(pool.resolve("a.png").unwrap()).unwrap(), b"asset bytes");
            }

            it "rejects names that escape the pool" {
                assert!(matches!(pool.put("../a.png", &source), Err(Error::Validation(_))));
                assert!(matches!(pool.put(".hidden", &source), Err(Error::Validation(_))));
            }

            it "leaves no file behind when the source is missing" {
                let result = pool.put("a.png", &dir.path().join("nope.bin"));

                assert!(matches!(result, Err(Error::Io { .. })));
                assert!(pool.list().unwrap().is_empty());
            }
        }

        describe "list" {
            it "returns only visible regular files" {
                pool.put("b.png", &source).unwrap();
                pool.put("a.gif", &source).unwrap();
                fs::create_dir(pool.root().join("nested")).unwrap();
                fs::write(pool.root().join(".partial"), b"x").unwrap();

                let names: Vec<_> = pool.list().unwrap().into_iter().collect();
                assert_eq!(names, vec!["a.gif", "b.png"]);
            }
        }

        describe "resolve" {
            it "reports missing assets as not found" {
                assert!(pool.resolve("missing.png").unwrap_err().is_not_found());
                assert!(pool.resolve("../secret").unwrap_err().is_not_found());
            }
        }

        describe "remove" {
            it "deletes an asset and tolerates a second call" {
                pool.put("a.png", &source).unwrap();

                pool.remove("a.png").unwrap();
                pool.remove("a.png").unwrap();

                assert!(pool.list().unwrap().is_empty());
            }
        }
    }

    describe "project store" {
        before {
            let store = DirProjectStore::open(dir.path().join("projects")).expect("Failed to open store");
        }

        it "saves and loads a document" {
            let doc = json!({ "settingsStore": { "projectName": "Demo" }, "slides": [] });

            store.save("Demo", &doc).unwrap();

            assert_eq!(store.load("Demo").unwrap(), doc);
            assert!(store.root().join("Demo.json").is_file());
        }

        it "overwrites an existing project" {
            store.save("Demo", &json!({ "v": 1 })).unwrap();
            store.save("Demo", &json!({ "v": 2 })).unwrap();

            assert_eq!(store.load("Demo").unwrap(), json!({ "v": 2 }));
            assert_eq!(store.list().unwrap().len(), 1);
        }

        it "reports missing projects as not found" {
            assert!(matches!(store.load("Nope"), Err(Error::NotFound(_))));
            assert!(matches!(store.load("../Nope"), Err(Error::NotFound(_))));
        }

        it "lists projects by name with relative paths" {
            store.save("Zebra", &json!({})).unwrap();
            store.save("Alpha", &json!({})).unwrap();
            fs::write(store.root().join("notes.txt"), b"ignored").unwrap();

            let projects = store.list().unwrap();

            assert_eq!(projects.len(), 2);
            assert_eq!(projects[0].project_name, "Alpha");
            assert_eq!(projects[0].file_path, "./projects/Alpha.json");
            assert_eq!(projects[1].project_name, "Zebra");
        }
    }
}
