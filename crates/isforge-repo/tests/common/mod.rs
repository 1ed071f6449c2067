//! Fixtures shared by the repository integration tests

#![allow(dead_code)]

use isforge_core::transport::{DefaultTransport, Transport};
use isforge_core::{BuildOptions, PackageImage, PayloadLocation, SourceImage};
use isforge_repo::{Generation, Repository, RepositoryConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub fn transport() -> Arc<dyn Transport> {
    Arc::new(DefaultTransport::default())
}

/// Write a build tree for `name` at `version` with one uncompressed file payload `data`
pub fn image_tree(root: &Path, name: &str, version: &str, data: &[u8]) -> PathBuf {
    std::fs::create_dir_all(root.join("payload")).unwrap();
    std::fs::write(
        root.join("description.yaml"),
        format!(
            "name: {}\nversion: \"{}\"\ndescription: {} image\nauthor: ops@example.com\ncompressor:\n  none: [data]\n",
            name, version, name
        ),
    )
    .unwrap();
    std::fs::write(root.join("changelog"), format!("[{}]\n- release {}\n", version, version)).unwrap();

    let setup = root.join("setup/01-setup.sh");
    std::fs::create_dir_all(setup.parent().unwrap()).unwrap();
    std::fs::write(&setup, "#!/bin/sh\necho setup\n").unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&setup, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    std::fs::write(root.join("payload/data"), data).unwrap();
    root.to_path_buf()
}

/// Build an image in its own tree under `dir` and open the result
pub fn build_image(dir: &Path, name: &str, version: &str, data: &[u8]) -> PackageImage {
    let root = image_tree(&dir.join(format!("{}-{}", name, version)), name, version, data);
    build_tree(&root)
}

/// Build the tree at `root` and open the result
pub fn build_tree(root: &Path) -> PackageImage {
    let built = SourceImage::open(root)
        .unwrap()
        .build(&BuildOptions::default())
        .unwrap();
    let location = built.path.display().to_string();
    PackageImage::open(
        transport(),
        &location,
        Some(&built.content),
        PayloadLocation::beside(&location),
    )
    .unwrap()
}

pub fn repo_config(dir: &Path, name: &str) -> RepositoryConfig {
    RepositoryConfig::new(name, dir.join(name).display().to_string())
}

/// A freshly initialized, online repository
pub fn init_repo(dir: &Path, name: &str) -> Repository {
    let mut repo = Repository::offline(repo_config(dir, name), transport());
    repo.init().unwrap();
    assert_eq!(repo.generation(), Generation::LATEST);
    repo
}

/// Hash-named files of a pool directory
pub fn pool_files(pool: &Path) -> Vec<String> {
    let mut files: Vec<String> = std::fs::read_dir(pool)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .filter(|name| isforge_core::hash::is_hash_name(name))
        .collect();
    files.sort();
    files
}
