use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;

use uuid::Uuid;

use super::BlobStore;
use crate::error::{ManagerError, Result};

/// Blob store backed by a directory of flat files, one per blob ID. Writes
/// go to a temporary file in the same directory and are renamed into place,
/// so a reader never observes a partially-written blob.
pub struct FilesystemBlobStore {
    root: PathBuf,
}

impl FilesystemBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(ManagerError::from)?;
        Ok(Self { root })
    }

    fn path_for(&self, id: &str) -> Result<PathBuf> {
        if id.is_empty() || id.contains('/') || id.contains("..") {
            return Err(ManagerError::invalid_argument(format!(
                "invalid blob id: {id:?}"
            )));
        }
        Ok(self.root.join(id))
    }
}

impl BlobStore for FilesystemBlobStore {
    fn put(&self, id: &str, data: &[u8]) -> Result<()> {
        let path = self.path_for(id)?;
        let tmp_name = format!(".tmp-{}", Uuid::new_v4());
        let tmp_path = self.root.join(tmp_name);
        fs::write(&tmp_path, data).map_err(ManagerError::from)?;
        fs::rename(&tmp_path, &path).map_err(ManagerError::from)?;
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Vec<u8>> {
        let path = self.path_for(id)?;
        match fs::read(&path) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ManagerError::NotFound),
            Err(e) => Err(ManagerError::from(e)),
        }
    }

    fn delete(&self, id: &str) -> Result<()> {
        let path = self.path_for(id)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ManagerError::from(e)),
        }
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.root).map_err(ManagerError::from)? {
            let entry = entry.map_err(ManagerError::from)?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(".tmp-") {
                continue;
            }
            if name.starts_with(prefix) {
                out.push(name);
            }
        }
        Ok(out)
    }

    /// Seeks instead of reading the whole file, so a small content fetched
    /// out of a large pack blob doesn't pull the entire pack into memory.
    fn get_range(&self, id: &str, offset: u64, length: i64) -> Result<Vec<u8>> {
        let path = self.path_for(id)?;
        let mut f = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(ManagerError::NotFound),
            Err(e) => return Err(ManagerError::from(e)),
        };
        f.seek(SeekFrom::Start(offset)).map_err(ManagerError::from)?;
        let mut buf = if length < 0 {
            let mut buf = Vec::new();
            f.read_to_end(&mut buf).map_err(ManagerError::from)?;
            buf
        } else {
            let mut buf = vec![0u8; length as usize];
            let read = f.read(&mut buf).map_err(ManagerError::from)?;
            buf.truncate(read);
            buf
        };
        buf.shrink_to_fit();
        Ok(buf)
    }
}
