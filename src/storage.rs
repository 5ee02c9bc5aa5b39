use std::ffi::OsString;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
    Other,
}

impl From<fs::FileType> for EntryKind {
    fn from(ft: fs::FileType) -> Self {
        if ft.is_dir() {
            EntryKind::Dir
        } else if ft.is_file() {
            EntryKind::File
        } else {
            EntryKind::Other
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: OsString,
    pub is_dir: bool,
}

/// Filesystem operations the router performs. Every touch of the disk made
/// while answering a request goes through here.
pub trait Storage: Send + Sync {
    /// Follows symlinks.
    fn kind(&self, path: &Path) -> io::Result<EntryKind>;
    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf>;
    fn read_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>>;
    fn open(&self, path: &Path) -> io::Result<(File, u64)>;
    /// Creates an anonymous staging file inside `dir`.
    fn stage(&self, dir: &Path) -> io::Result<NamedTempFile>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFs;

impl Storage for LocalFs {
    fn kind(&self, path: &Path) -> io::Result<EntryKind> {
        Ok(fs::metadata(path)?.file_type().into())
    }

    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf> {
        fs::canonicalize(path)
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>> {
        fs::read_dir(path)?
            .map(|entry| {
                let entry = entry?;
                // Symlinked directories list as directories.
                let is_dir = fs::metadata(entry.path())
                    .map(|m| m.is_dir())
                    .unwrap_or(false);
                Ok(DirEntry {
                    name: entry.file_name(),
                    is_dir,
                })
            })
            .collect()
    }

    fn open(&self, path: &Path) -> io::Result<(File, u64)> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        Ok((file, len))
    }

    fn stage(&self, dir: &Path) -> io::Result<NamedTempFile> {
        tempfile::Builder::new()
            .prefix(".upload-")
            .tempfile_in(dir)
    }
}
