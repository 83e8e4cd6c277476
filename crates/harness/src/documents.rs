use std::collections::{HashMap, VecDeque};
use std::io::{self, Cursor, Read, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use profiledb_core::{DocumentUri, ExternalRef, ModifiedAt};
use profiledb_storage::{HostError, HostFiles, ReadStream, WriteStream};

const CLOCK_START_MS: i64 = 1_700_000_000_000;

/// Ways an open call can be made to misbehave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// The host hands back no stream and no error.
    NoStream,
    NotFound,
    PermissionDenied,
    /// The stream opens, then fails on first use.
    MidStream,
}

struct Document {
    bytes: Vec<u8>,
    modified: ModifiedAt,
}

#[derive(Default)]
struct State {
    documents: HashMap<String, Document>,
    clock: i64,
    scripted: HashMap<String, VecDeque<Option<ModifiedAt>>>,
    timestamps_unknown: bool,
    read_faults: VecDeque<Fault>,
    write_faults: VecDeque<Fault>,
    grants: HashMap<String, ExternalRef>,
}

impl State {
    fn tick(&mut self) -> ModifiedAt {
        self.clock += 1;
        ModifiedAt::from_millis(CLOCK_START_MS + self.clock)
    }
}

/// In-memory `HostFiles` for driving the engine through exact interleavings.
///
/// Every write moves the document's timestamp forward by one tick. Reported
/// timestamps can be scripted per document, and faults queued per direction.
#[derive(Default)]
pub struct FakeDocuments {
    state: Arc<Mutex<State>>,
    reads_opened: AtomicUsize,
    writes_opened: AtomicUsize,
    modified_queries: AtomicUsize,
}

impl FakeDocuments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn uri(name: &str) -> DocumentUri {
        DocumentUri::parse(&format!("content://fake.documents/{name}"))
            .unwrap_or_else(|e| panic!("bad fake uri {name}: {e}"))
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Writes `bytes` as another app would.
    pub fn put(&self, uri: &DocumentUri, bytes: Vec<u8>) -> ModifiedAt {
        let mut state = self.state();
        let modified = state.tick();
        state
            .documents
            .insert(uri.as_str().to_owned(), Document { bytes, modified });
        modified
    }

    /// Bumps the timestamp without touching the content.
    pub fn touch(&self, uri: &DocumentUri) -> Option<ModifiedAt> {
        let mut state = self.state();
        let modified = state.tick();
        let doc = state.documents.get_mut(uri.as_str())?;
        doc.modified = modified;
        Some(modified)
    }

    pub fn contents(&self, uri: &DocumentUri) -> Option<Vec<u8>> {
        self.state().documents.get(uri.as_str()).map(|d| d.bytes.clone())
    }

    pub fn actual_modified(&self, uri: &DocumentUri) -> Option<ModifiedAt> {
        self.state().documents.get(uri.as_str()).map(|d| d.modified)
    }

    /// The next `values.len()` timestamp queries for `uri` return these
    /// values instead of the real one.
    pub fn script_last_modified(&self, uri: &DocumentUri, values: Vec<Option<ModifiedAt>>) {
        self.state()
            .scripted
            .entry(uri.as_str().to_owned())
            .or_default()
            .extend(values);
    }

    /// Makes the host stop reporting timestamps altogether.
    pub fn set_timestamps_unknown(&self, unknown: bool) {
        self.state().timestamps_unknown = unknown;
    }

    pub fn fail_next_read(&self, fault: Fault) {
        self.state().read_faults.push_back(fault);
    }

    pub fn fail_next_write(&self, fault: Fault) {
        self.state().write_faults.push_back(fault);
    }

    pub fn reads_opened(&self) -> usize {
        self.reads_opened.load(Ordering::SeqCst)
    }

    pub fn writes_opened(&self) -> usize {
        self.writes_opened.load(Ordering::SeqCst)
    }

    pub fn modified_queries(&self) -> usize {
        self.modified_queries.load(Ordering::SeqCst)
    }
}

fn fault_error(fault: Fault) -> Option<HostError> {
    match fault {
        Fault::NotFound => Some(HostError::NotFound(io::Error::from(io::ErrorKind::NotFound))),
        Fault::PermissionDenied => Some(HostError::PermissionDenied(io::Error::from(
            io::ErrorKind::PermissionDenied,
        ))),
        Fault::NoStream | Fault::MidStream => None,
    }
}

fn missing(uri: &DocumentUri) -> HostError {
    HostError::NotFound(io::Error::new(io::ErrorKind::NotFound, uri.to_string()))
}

struct BrokenStream;

impl Read for BrokenStream {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(io::Error::other("injected read failure"))
    }
}

impl Write for BrokenStream {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::other("injected write failure"))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Appends straight into the shared document, ticking its timestamp.
struct DocumentWriter {
    state: Arc<Mutex<State>>,
    key: String,
}

impl Write for DocumentWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let modified = state.tick();
        let doc = state
            .documents
            .get_mut(&self.key)
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))?;
        doc.bytes.extend_from_slice(buf);
        doc.modified = modified;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl HostFiles for FakeDocuments {
    fn open_read(&self, uri: &DocumentUri) -> Result<Option<ReadStream>, HostError> {
        self.reads_opened.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state();
        if let Some(fault) = state.read_faults.pop_front() {
            if let Some(err) = fault_error(fault) {
                return Err(err);
            }
            return Ok(match fault {
                Fault::MidStream => Some(Box::new(BrokenStream)),
                _ => None,
            });
        }
        let doc = state.documents.get(uri.as_str()).ok_or_else(|| missing(uri))?;
        Ok(Some(Box::new(Cursor::new(doc.bytes.clone()))))
    }

    fn open_write(&self, uri: &DocumentUri) -> Result<Option<WriteStream>, HostError> {
        self.writes_opened.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state();
        if let Some(fault) = state.write_faults.pop_front() {
            if let Some(err) = fault_error(fault) {
                return Err(err);
            }
            return Ok(match fault {
                Fault::MidStream => Some(Box::new(BrokenStream)),
                _ => None,
            });
        }
        let modified = state.tick();
        state.documents.insert(
            uri.as_str().to_owned(),
            Document {
                bytes: Vec::new(),
                modified,
            },
        );
        Ok(Some(Box::new(DocumentWriter {
            state: Arc::clone(&self.state),
            key: uri.as_str().to_owned(),
        })))
    }

    fn last_modified(&self, uri: &DocumentUri) -> Option<ModifiedAt> {
        self.modified_queries.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state();
        if let Some(value) = state
            .scripted
            .get_mut(uri.as_str())
            .and_then(VecDeque::pop_front)
        {
            return value;
        }
        if state.timestamps_unknown {
            return None;
        }
        state.documents.get(uri.as_str()).map(|d| d.modified)
    }

    fn size(&self, uri: &DocumentUri) -> Option<u64> {
        self.state()
            .documents
            .get(uri.as_str())
            .map(|d| d.bytes.len() as u64)
    }

    fn grant_persistent_access(&self, external: &ExternalRef) -> Result<(), HostError> {
        self.state()
            .grants
            .insert(external.uri.as_str().to_owned(), external.clone());
        Ok(())
    }

    fn revoke_persistent_access(&self, uri: &DocumentUri) {
        self.state().grants.remove(uri.as_str());
    }

    fn persisted_grants(&self) -> Vec<ExternalRef> {
        self.state().grants.values().cloned().collect()
    }
}
