use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::Arc;

use profiledb_core::{ModifiedAt, StorageLocation};
use profiledb_storage::{HostFiles, ReadStream, WriteStream};

use crate::error::{FileError, FileOp};

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Uniform byte-level access to internal paths and host documents.
#[derive(Clone)]
pub struct FileAccess {
    host: Arc<dyn HostFiles>,
}

impl FileAccess {
    pub fn new(host: Arc<dyn HostFiles>) -> Self {
        Self { host }
    }

    pub fn host(&self) -> &dyn HostFiles {
        self.host.as_ref()
    }

    /// Best effort; `None` means unknown.
    pub fn last_modified(&self, location: &StorageLocation) -> Option<ModifiedAt> {
        match location {
            StorageLocation::Internal(path) => {
                let modified = fs::metadata(path).and_then(|m| m.modified()).ok()?;
                ModifiedAt::from_system_time(modified).ok()
            }
            StorageLocation::External(external) => self.host.last_modified(&external.uri),
        }
    }

    /// Best effort; `None` means unknown.
    pub fn size(&self, location: &StorageLocation) -> Option<u64> {
        match location {
            StorageLocation::Internal(path) => fs::metadata(path).ok().map(|m| m.len()),
            StorageLocation::External(external) => self.host.size(&external.uri),
        }
    }

    /// Streams all of `source` into `destination`, replacing its content.
    ///
    /// The source is opened first, so a source that cannot be opened leaves
    /// the destination untouched. Both streams are closed on return.
    pub fn copy_bytes(
        &self,
        source: &StorageLocation,
        destination: &StorageLocation,
    ) -> Result<u64, FileError> {
        let mut reader = self.open_read(source)?;
        let mut writer = self.open_write(destination)?;
        pump(&mut reader, &mut writer)
    }

    fn open_read(&self, location: &StorageLocation) -> Result<ReadStream, FileError> {
        match location {
            StorageLocation::Internal(path) => File::open(path)
                .map(|f| Box::new(f) as ReadStream)
                .map_err(|e| FileError::from_host(e.into(), FileOp::Read)),
            StorageLocation::External(external) => self
                .host
                .open_read(&external.uri)
                .map_err(|e| FileError::from_host(e, FileOp::Read))?
                .ok_or(FileError::ContentProviderFailure { op: FileOp::Read }),
        }
    }

    fn open_write(&self, location: &StorageLocation) -> Result<WriteStream, FileError> {
        match location {
            StorageLocation::Internal(path) => {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent).map_err(|source| FileError::InputOutputError {
                        source,
                        op: FileOp::Write,
                    })?;
                }
                File::create(path)
                    .map(|f| Box::new(f) as WriteStream)
                    .map_err(|e| FileError::from_host(e.into(), FileOp::Write))
            }
            StorageLocation::External(external) => self
                .host
                .open_write(&external.uri)
                .map_err(|e| FileError::from_host(e, FileOp::Write))?
                .ok_or(FileError::ContentProviderFailure { op: FileOp::Write }),
        }
    }
}

fn pump(reader: &mut dyn Read, writer: &mut dyn Write) -> Result<u64, FileError> {
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    let mut total = 0u64;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(source) => {
                return Err(FileError::InputOutputError {
                    source,
                    op: FileOp::Read,
                });
            }
        };
        writer
            .write_all(&buf[..n])
            .map_err(|source| FileError::InputOutputError {
                source,
                op: FileOp::Write,
            })?;
        total += n as u64;
    }
    writer.flush().map_err(|source| FileError::InputOutputError {
        source,
        op: FileOp::Write,
    })?;
    Ok(total)
}

/// Deletes `path`; a file that is already gone counts as success.
pub(crate) fn remove_file_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
