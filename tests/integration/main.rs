//! Integration tests for modcache

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use tempfile::TempDir;

    fn modcache(config_dir: &TempDir) -> Command {
        let mut cmd = cargo_bin_cmd!("modcache");
        cmd.env("MODCACHE_CONFIG", config_dir.path().join("config.toml"));
        cmd
    }

    #[test]
    fn help_displays() {
        let dir = TempDir::new().unwrap();
        modcache(&dir)
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("Write-behind object-store cache"));
    }

    #[test]
    fn version_displays() {
        let dir = TempDir::new().unwrap();
        modcache(&dir)
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("modcache"));
    }

    #[test]
    fn config_show_defaults() {
        let dir = TempDir::new().unwrap();
        modcache(&dir)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[redirect]"))
            .stdout(predicate::str::contains("bucket = \"modcache\""));
    }

    #[test]
    fn config_path_uses_env() {
        let dir = TempDir::new().unwrap();
        modcache(&dir)
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));
    }

    #[test]
    fn config_set_persists() {
        let dir = TempDir::new().unwrap();
        modcache(&dir)
            .args(["config", "set", "redirect.auto_redirect_min_size", "1000"])
            .assert()
            .success();

        modcache(&dir)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("auto_redirect_min_size = 1000"));
    }

    #[test]
    fn config_set_unknown_key_fails() {
        let dir = TempDir::new().unwrap();
        modcache(&dir)
            .args(["config", "set", "vm.name", "x"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Unknown config key"));
    }

    #[test]
    fn invalid_config_reports_hint() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("config.toml"), "[cache\n").unwrap();

        modcache(&dir)
            .args(["config", "show"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid configuration"))
            .stderr(predicate::str::contains("Hint:"));
    }

    #[test]
    fn inspect_json() {
        let dir = TempDir::new().unwrap();
        modcache(&dir)
            .args([
                "inspect",
                "--format",
                "json",
                "/example.com/mod/@v/v1.0.0.zip",
            ])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"redirectable\": true"))
            .stdout(predicate::str::contains("application/zip"));
    }

    #[test]
    fn inspect_plain_prints_staged_name() {
        let dir = TempDir::new().unwrap();
        modcache(&dir)
            .args(["inspect", "--format", "plain", "sumdb/sum.golang.org/latest"])
            .assert()
            .success()
            .stdout(
                predicate::str::is_match("^[0-9a-f]{64} sumdb/sum.golang.org/latest\n$").unwrap(),
            );
    }
}

mod cache_tests {
    use modcache::cache::SyncOutcome;
    use modcache::config::Config;
    use modcache::store::MemoryStore;
    use modcache::{CacheBackend, Cacher, Route};
    use std::sync::Arc;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    const BUCKET: &str = "goproxy";
    const ZIP: &str = "example.com/mod/@v/v1.0.0.zip";

    #[tokio::test]
    async fn miss_set_sync_then_redirect() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());

        let mut config = Config::default();
        config.store.bucket = BUCKET.to_string();
        config.cache.local_cache_root = Some(temp.path().to_path_buf());
        config.cache.sync_interval_ms = 3_600_000;
        config.cache.shutdown_retries = 3;
        config.cache.shutdown_retry_interval_ms = 1;
        config.redirect.auto_redirect = true;
        config.redirect.auto_redirect_min_size = 1000;
        config.redirect.fetch_timeout_secs = 5;

        let backend = CacheBackend::from_config(&config, store.clone())
            .await
            .unwrap();
        let cache = backend.cache();
        let policy = backend.redirect();

        // Miss: proxied, and the cache reports not found
        assert_eq!(policy.route("GET", &format!("/{ZIP}")).await.unwrap(), Route::Proxy);
        assert!(cache.get(ZIP).await.unwrap_err().is_not_found());

        // Engine fetched the artifact and stores it
        let artifact = vec![7u8; 2048];
        let mut content: &[u8] = &artifact;
        cache.set(ZIP, &mut content).await.unwrap();

        // Staged only: still a miss for readers
        assert_eq!(policy.route("GET", &format!("/{ZIP}")).await.unwrap(), Route::Proxy);

        let outcomes = cache.synchronizer().run_cycle().await;
        assert_eq!(outcomes, vec![(ZIP.to_string(), SyncOutcome::Uploaded)]);
        assert!(store.contents(BUCKET, ZIP).await.is_some());

        let mut entry = cache.get(ZIP).await.unwrap();
        let mut body = Vec::new();
        entry.read_to_end(&mut body).await.unwrap();
        assert_eq!(body, artifact);
        assert_eq!(entry.checksum().len(), 16);

        match policy.route("GET", &format!("/{ZIP}")).await.unwrap() {
            Route::Redirect(url) => {
                assert!(url.as_str().contains("response-cache-control"));
            }
            Route::Proxy => panic!("expected redirect once stored"),
        }

        let root = cache.staging_root().to_path_buf();
        backend.shutdown().await.unwrap();
        assert!(!root.exists());
    }
}
