//! Loading source documents from a user-chosen directory or a single file.
//!
//! The corpus is chosen by the user; we only read and index it. Documents are
//! discarded once they have been chunked.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

/// File extensions picked up by a directory scan.
const EXTENSIONS: &[&str] = &["md", "txt"];

/// Raw text plus the label of where it came from (the file path).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub source: String,
    /// Content without YAML frontmatter.
    pub text: String,
}

impl Document {
    pub fn new(source: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            text: text.into(),
        }
    }
}

/// Loads `path` as a corpus: every matching file under it if it is a directory,
/// or the file itself otherwise.
pub fn load_documents(path: &Path) -> Result<Vec<Document>, ScanError> {
    if path.is_dir() {
        scan_documents(path)
    } else if path.is_file() {
        Ok(vec![read_document(path)?])
    } else {
        Err(ScanError::NotFound(path.to_path_buf()))
    }
}

/// Scans `root` for `.md` and `.txt` files, in file-name order so repeated scans
/// of an unchanged tree yield the same sequence.
/// Does not follow symlinks into directories (walkdir default).
pub fn scan_documents(root: &Path) -> Result<Vec<Document>, ScanError> {
    if !root.is_dir() {
        return Err(ScanError::NotFound(root.to_path_buf()));
    }
    let mut docs = Vec::new();
    for entry in WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e))
    {
        let entry = entry.map_err(|e| ScanError::Walk(e.to_string()))?;
        let path = entry.path();
        if entry.file_type().is_file() && has_known_extension(path) {
            docs.push(read_document(path)?);
        }
    }
    Ok(docs)
}

/// Reads one file as a document. Markdown frontmatter is stripped.
pub fn read_document(path: &Path) -> Result<Document, ScanError> {
    let raw = std::fs::read_to_string(path).map_err(|e| ScanError::Read(path.to_path_buf(), e))?;
    let text = if path.extension().is_some_and(|e| e == "md") {
        strip_frontmatter(&raw)
    } else {
        raw
    };
    Ok(Document::new(path.display().to_string(), text))
}

fn has_known_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| EXTENSIONS.contains(&e))
}

fn is_hidden(entry: &walkdir::DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|s| s.starts_with('.'))
        .unwrap_or(false)
}

/// Removes optional YAML frontmatter (lines between first --- and second ---).
fn strip_frontmatter(content: &str) -> String {
    let s = content.trim_start();
    if !s.starts_with("---") {
        return content.to_string();
    }
    let after_first = s.strip_prefix("---").unwrap_or(s).trim_start();
    if let Some(rest) = after_first.find("\n---") {
        after_first[rest + 4..].trim_start().to_string()
    } else {
        content.to_string()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("no such file or directory: {0}")]
    NotFound(PathBuf),
    #[error("walk error: {0}")]
    Walk(String),
    #[error("read error for {0}: {1}")]
    Read(PathBuf, std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_frontmatter_plain() {
        let s = "Hello world.";
        assert_eq!(strip_frontmatter(s), "Hello world.");
    }

    #[test]
    fn strip_frontmatter_with_yaml() {
        let s = "---\ntitle: Foo\ndate: 2024-01-01\n---\n\nActual content here.";
        assert_eq!(strip_frontmatter(s), "Actual content here.");
    }

    #[test]
    fn scan_picks_known_extensions_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.txt"), "second").unwrap();
        std::fs::write(dir.path().join("a.md"), "---\ntitle: A\n---\nfirst").unwrap();
        std::fs::write(dir.path().join("c.rs"), "fn main() {}").unwrap();
        std::fs::create_dir(dir.path().join(".hidden")).unwrap();
        std::fs::write(dir.path().join(".hidden/d.md"), "secret").unwrap();

        let docs = scan_documents(dir.path()).unwrap();
        let texts: Vec<&str> = docs.iter().map(|d| d.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "second"]);
        assert!(docs[0].source.ends_with("a.md"));
    }

    #[test]
    fn txt_files_keep_leading_dashes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.txt");
        std::fs::write(&path, "---\nnot: frontmatter\n---\nbody").unwrap();
        let doc = read_document(&path).unwrap();
        assert!(doc.text.starts_with("---"));
    }

    #[test]
    fn load_single_file_and_missing_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.txt");
        std::fs::write(&path, "hello").unwrap();
        assert_eq!(load_documents(&path).unwrap().len(), 1);

        let missing = dir.path().join("nope");
        assert!(matches!(load_documents(&missing), Err(ScanError::NotFound(_))));
    }
}
