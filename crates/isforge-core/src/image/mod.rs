//! Images: build trees on one side, packaged archives on the other

mod package;
mod source;

pub use package::{PackageImage, PayloadLocation};
pub use source::{BuildOptions, BuiltImage, PAYLOAD_DIR, SourceImage};

use crate::archive::IMAGE_EXTENSION;

/// File name of an image archive
pub fn archive_file_name(name: &str, version: &str) -> String {
    format!("{}-{}.{}", name, version, IMAGE_EXTENSION)
}

/// Directory part of a location (path or URL)
pub(crate) fn parent_location(location: &str) -> String {
    match location.trim_end_matches('/').rsplit_once('/') {
        Some(("", _)) => "/".to_string(),
        Some((parent, _)) => parent.to_string(),
        None => ".".to_string(),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Build-tree fixtures shared by image tests

    use std::path::{Path, PathBuf};

    pub fn write_script(path: &Path, content: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
    }

    /// `demo` version `version` with one uncompressed file payload `data` = "hello"
    pub fn demo_tree(root: &Path, version: &str) -> PathBuf {
        std::fs::create_dir_all(root.join("payload")).unwrap();
        std::fs::write(
            root.join("description.yaml"),
            format!(
                "name: demo\nversion: \"{}\"\ndescription: Demo image\nauthor: ops@example.com\ncompressor:\n  none: [data]\n",
                version
            ),
        )
        .unwrap();
        std::fs::write(root.join("changelog"), "[1]\n- first release\n").unwrap();
        write_script(&root.join("setup/01-setup.sh"), "#!/bin/sh\necho setup\n");
        write_script(&root.join("parser/01-parse.sh"), "#!/bin/sh\necho parse\n");
        std::fs::write(root.join("payload/data"), b"hello").unwrap();
        root.to_path_buf()
    }
}
