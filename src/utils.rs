use std::{
    ffi::OsString,
    path::{Path, PathBuf},
};

/// Name of the type-marker entry
pub const MIMETYPE_FILE: &str = "mimetype";

/// Fixed content of the type-marker entry
pub const EPUB_MIMETYPE: &str = "application/epub+zip";

/// Reserved metadata directory of the container
pub const META_INF_DIR: &str = "META-INF";

/// Path of the manifest-locator file, relative to the container root
pub const CONTAINER_PATH: &str = "META-INF/container.xml";

/// File names written by desktop operating systems that never belong in a container
const OS_ARTIFACTS: [&str; 3] = [".DS_Store", "Thumbs.db", "desktop.ini"];

/// Returns the path of `path` relative to `root` as a container entry name
///
/// Separators are normalized to forward slashes regardless of the host
/// convention. Returns `None` if `path` is not inside `root`.
pub fn entry_name<P: AsRef<Path>, Q: AsRef<Path>>(root: P, path: Q) -> Option<String> {
    let relative_path = path.as_ref().strip_prefix(root.as_ref()).ok()?;
    let name = relative_path.to_string_lossy().replace("\\", "/");

    if name.is_empty() { None } else { Some(name) }
}

/// Checks whether an entry name points at platform metadata
///
/// Covers Finder and Explorer droppings, AppleDouble `._*` files
/// and everything inside a `__MACOSX/` resource fork directory.
pub fn is_os_artifact(entry_name: &str) -> bool {
    if entry_name.split('/').any(|part| part == "__MACOSX") {
        return true;
    }

    let file_name = entry_name.rsplit('/').next().unwrap_or(entry_name);
    OS_ARTIFACTS.contains(&file_name) || file_name.starts_with("._")
}

/// Removes leading slash from a path
///
/// This function removes the leading slash from a path if it exists.
pub fn remove_leading_slash<P: AsRef<Path>>(path: P) -> PathBuf {
    if let Ok(path) = path.as_ref().strip_prefix("/") {
        path.to_path_buf()
    } else {
        path.as_ref().to_path_buf()
    }
}

/// Builds a sibling path with a suffix inserted before the extension
///
/// `books/novel.epub` with suffix `_backup` becomes `books/novel_backup.epub`.
/// A path without extension simply gets the suffix appended.
pub fn sibling_with_suffix<P: AsRef<Path>>(path: P, suffix: &str) -> PathBuf {
    let path = path.as_ref();

    let mut file_name = match path.file_stem() {
        Some(stem) => stem.to_os_string(),
        None => OsString::new(),
    };
    file_name.push(suffix);

    if let Some(extension) = path.extension() {
        file_name.push(".");
        file_name.push(extension);
    }

    path.with_file_name(file_name)
}
