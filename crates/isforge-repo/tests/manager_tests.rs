//! Integration tests for the repository manager: remote caching and selection

mod common;

use common::{build_image, init_repo, pool_files, repo_config, transport};
use isforge_core::transport::DefaultTransport;
use isforge_repo::{Database, RepoError, RepositoryConfig, RepositoryManager};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const MARKER: u64 = 1_700_000_000;

async fn serve(server: &MockServer, route: &str, body: Vec<u8>) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
        .mount(server)
        .await;
}

/// Serve a local repository holding `demo` 1 under `/repo`
async fn serve_origin(temp: &TempDir, server: &MockServer) -> String {
    let image = build_image(temp.path(), "demo", "1", b"hello");
    let mut origin = init_repo(temp.path(), "origin");
    origin.add(&image, false).unwrap();
    drop(origin);

    let pool = temp.path().join("origin");
    serve(server, "/repo/db", std::fs::read(pool.join("db")).unwrap()).await;
    serve(server, "/repo/last", format!("{}\n", MARKER).into_bytes()).await;
    for file in pool_files(&pool) {
        serve(server, &format!("/repo/{}", file), std::fs::read(pool.join(&file)).unwrap()).await;
    }
    image.hash().to_string()
}

fn mtime(path: &Path) -> u64 {
    std::fs::metadata(path)
        .unwrap()
        .modified()
        .unwrap()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

fn stamp(path: &Path, secs: u64) {
    File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(UNIX_EPOCH + Duration::from_secs(secs))
        .unwrap();
}

fn unreachable_transport() -> Arc<DefaultTransport> {
    Arc::new(DefaultTransport::new(Duration::from_secs(1)))
}

mod remote {
    use super::*;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_remote_store_is_cached() {
        let temp = TempDir::new().unwrap();
        let server = MockServer::start().await;
        let hash = serve_origin(&temp, &server).await;
        let url = format!("{}/repo", server.uri());
        let cache = temp.path().join("cache");

        tokio::task::spawn_blocking(move || {
            let mut manager = RepositoryManager::new(Some(cache.clone()), transport());
            let repo = manager
                .register(RepositoryConfig::new("mirror", url), false, false, false)
                .unwrap()
                .unwrap();
            assert!(repo.is_online());
            assert_eq!(repo.last().unwrap(), MARKER as i64);

            let cached = cache.join("mirror");
            assert_eq!(mtime(&cached), MARKER);

            let image = manager.get("mirror").unwrap().get("demo", None).unwrap();
            assert_eq!(image.hash(), hash);
            image.payload("data").unwrap().check().unwrap();

            let selected = manager.select_images(&["mirror/demo"]).unwrap();
            assert_eq!(selected.len(), 1);
            assert_eq!(selected[0].image.hash, hash);

            manager.purge_cache().unwrap();
            assert!(!cached.exists());
            assert!(!manager.get("mirror").unwrap().is_online());
        })
        .await
        .unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_store_mtime_preferred_over_marker_file() {
        let temp = TempDir::new().unwrap();
        let server = MockServer::start().await;
        let image = build_image(temp.path(), "demo", "1", b"hello");
        let mut origin = init_repo(temp.path(), "origin");
        origin.add(&image, false).unwrap();
        drop(origin);

        // No /repo/last route: the marker can only come from Last-Modified
        let db = std::fs::read(temp.path().join("origin/db")).unwrap();
        Mock::given(method("GET"))
            .and(path("/repo/db"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Last-Modified", "Tue, 14 Nov 2023 22:13:20 GMT")
                    .set_body_bytes(db),
            )
            .mount(&server)
            .await;
        let url = format!("{}/repo", server.uri());
        let cache = temp.path().join("cache");

        tokio::task::spawn_blocking(move || {
            let mut manager = RepositoryManager::new(Some(cache.clone()), transport());
            let repo = manager
                .register(RepositoryConfig::new("mirror", url), false, false, false)
                .unwrap()
                .unwrap();
            assert!(repo.is_online());
            assert_eq!(repo.images().unwrap().len(), 1);
            assert_eq!(mtime(&cache.join("mirror")), MARKER);
        })
        .await
        .unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cache_refreshed_only_when_marker_moves() {
        let temp = TempDir::new().unwrap();
        let server = MockServer::start().await;
        serve_origin(&temp, &server).await;
        let url = format!("{}/repo", server.uri());
        let cache = temp.path().join("cache");
        let empty = repo_config(temp.path(), "empty");
        Database::create(&empty.db_location()).unwrap();

        tokio::task::spawn_blocking(move || {
            let register = || {
                let mut manager = RepositoryManager::new(Some(cache.clone()), transport());
                manager
                    .register(RepositoryConfig::new("mirror", url.clone()), false, false, false)
                    .unwrap();
                manager
            };

            // An up to date cache is used as is, whatever it holds
            let cached = cache.join("mirror");
            std::fs::create_dir_all(&cache).unwrap();
            std::fs::copy(empty.db_location(), &cached).unwrap();
            stamp(&cached, MARKER);
            let manager = register();
            assert!(manager.get("mirror").unwrap().images().unwrap().is_empty());
            drop(manager);

            // A moved marker brings the remote store in
            stamp(&cached, MARKER - 60);
            let manager = register();
            assert_eq!(manager.get("mirror").unwrap().images().unwrap().len(), 1);
            assert_eq!(mtime(&cached), MARKER);
        })
        .await
        .unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_temporary_cache() {
        let temp = TempDir::new().unwrap();
        let server = MockServer::start().await;
        serve_origin(&temp, &server).await;
        let url = format!("{}/repo", server.uri());

        tokio::task::spawn_blocking(move || {
            let mut manager = RepositoryManager::new(None, transport());
            let repo = manager
                .register(RepositoryConfig::new("mirror", url), true, false, false)
                .unwrap()
                .unwrap();
            assert!(repo.is_online());
            let dbpath = PathBuf::from(repo.config().dbpath.clone().unwrap());
            assert!(dbpath.is_file());

            manager.purge_cache().unwrap();
            assert!(!dbpath.exists());
        })
        .await
        .unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_missing_marker_goes_offline() {
        let temp = TempDir::new().unwrap();
        let server = MockServer::start().await;
        serve(&server, "/repo/db", b"not fetched".to_vec()).await;
        let url = format!("{}/repo", server.uri());
        let cache = temp.path().join("cache");

        tokio::task::spawn_blocking(move || {
            let mut manager = RepositoryManager::new(Some(cache), transport());
            let repo = manager
                .register(RepositoryConfig::new("mirror", url), false, false, false)
                .unwrap()
                .unwrap();
            assert!(!repo.is_online());
        })
        .await
        .unwrap();
    }

    #[test]
    fn test_unreachable_remote_is_offline() {
        let temp = TempDir::new().unwrap();
        let mut manager =
            RepositoryManager::new(Some(temp.path().join("cache")), unreachable_transport());
        let repo = manager
            .register(
                RepositoryConfig::new("far", "http://127.0.0.1:1/repo"),
                false,
                false,
                false,
            )
            .unwrap()
            .unwrap();
        assert!(!repo.is_online());

        let err = manager.get("far").unwrap().images().unwrap_err();
        assert!(matches!(err, RepoError::Offline { ref name } if name == "far"));
        assert_eq!(err.to_string(), "Repository far is offline");
    }

    #[test]
    fn test_nosync_uses_existing_cache() {
        let temp = TempDir::new().unwrap();
        let cache = temp.path().join("cache");
        let image = build_image(temp.path(), "demo", "1", b"hello");
        let mut origin = init_repo(temp.path(), "origin");
        origin.add(&image, false).unwrap();
        drop(origin);

        std::fs::create_dir_all(&cache).unwrap();
        std::fs::copy(temp.path().join("origin/db"), cache.join("far")).unwrap();

        let mut manager = RepositoryManager::new(Some(cache), unreachable_transport());
        let repo = manager
            .register(
                RepositoryConfig::new("far", "http://127.0.0.1:1/repo"),
                false,
                true,
                false,
            )
            .unwrap()
            .unwrap();
        assert!(repo.is_online());
        assert_eq!(repo.images().unwrap()[0].hash, image.hash());
    }
}

mod selection {
    use super::*;

    fn two_repositories(temp: &TempDir) -> RepositoryManager {
        let mut manager = RepositoryManager::new(None, transport());
        for name in ["A", "B"] {
            let mut repo = init_repo(temp.path(), name);
            for version in ["1", "2"] {
                let image = build_image(
                    &temp.path().join(format!("src-{}", name)),
                    "pkg",
                    version,
                    format!("{} {}", name, version).as_bytes(),
                );
                repo.add(&image, false).unwrap();
            }
            drop(repo);
            manager
                .register(repo_config(temp.path(), name), false, false, false)
                .unwrap();
        }
        manager
    }

    #[test]
    fn test_latest_per_repository() {
        let temp = TempDir::new().unwrap();
        let manager = two_repositories(&temp);

        let selected = manager.select_images(&["*/pkg"]).unwrap();
        let found: Vec<(&str, &str)> = selected
            .iter()
            .map(|s| (s.repo.as_str(), s.image.version.as_str()))
            .collect();
        assert_eq!(found, vec![("A", "2"), ("B", "2")]);

        let all = manager.select_images(&["*/pkg:*"]).unwrap();
        assert_eq!(all.len(), 4);
    }

    #[test]
    fn test_select_payloads_merges_repositories() {
        let temp = TempDir::new().unwrap();
        let manager = two_repositories(&temp);

        let payloads = manager.select_payloads(&[]).unwrap();
        assert_eq!(payloads.len(), 4);
        let prefix = &payloads[0].hash[..8];
        let selected = manager.select_payloads(&[prefix]).unwrap();
        assert_eq!(selected.len(), 1);
        assert!(
            selected[0]
                .images
                .iter()
                .all(|image| image.starts_with("A/") || image.starts_with("B/"))
        );

        let diff = manager.diff_payloads("A", "B").unwrap();
        assert_eq!(diff.only_in_first.len(), 2);
        assert_eq!(diff.only_in_second.len(), 2);
    }

    #[test]
    fn test_shared_payload_merges_images() {
        let temp = TempDir::new().unwrap();
        let mut manager = RepositoryManager::new(None, transport());
        for name in ["A", "B"] {
            let mut repo = init_repo(temp.path(), name);
            let image = build_image(&temp.path().join(format!("src-{}", name)), "pkg", "1", b"same");
            repo.add(&image, false).unwrap();
            drop(repo);
            manager
                .register(repo_config(temp.path(), name), false, false, false)
                .unwrap();
        }

        let payloads = manager.select_payloads(&[]).unwrap();
        assert_eq!(payloads.len(), 1);
        assert_eq!(
            payloads[0].images.iter().collect::<Vec<_>>(),
            vec!["A/pkg:1", "B/pkg:1"]
        );
    }
}
