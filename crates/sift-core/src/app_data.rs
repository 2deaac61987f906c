//! Where sift stores its own data (config, persisted index).
//!
//! The corpus stays in the folder the user chooses. We only store app state here.

use std::path::PathBuf;

const INDEX_FILENAME: &str = "index.sift";

/// Returns the directory where sift stores config, index, and other app data.
/// On Linux: `~/.local/share/sift/`; on macOS: `~/Library/Application Support/Sift/`.
/// Creates the directory if it doesn't exist; returns `None` if we can't determine the path.
pub fn app_data_dir() -> Option<PathBuf> {
    let dir = directories::ProjectDirs::from("app", "Sift", "Sift")?.data_local_dir().to_path_buf();
    std::fs::create_dir_all(&dir).ok()?;
    Some(dir)
}

/// Default location of the persisted vector index, used when the config names none.
pub fn default_index_path() -> Option<PathBuf> {
    app_data_dir().map(|d| d.join(INDEX_FILENAME))
}
