//! Persistence gateway: shutdown flag and life-cycle history file.
//!
//! The shutdown flag is one byte stored under a key-value store behind the
//! [`KeyValueStore`] trait. The life-cycle history is a binary file:
//!
//! ```text
//! u32 version                      (major<<24 | minor<<16 | micro<<8 | nano)
//! u32 lc_count
//! per life cycle:
//!   u32 start_state                (0 = NotSet, 1 = Started, 2 = Shutdown)
//!   u32 app_count
//!   per app:
//!     u32 name_len                 (includes one trailing NUL byte)
//!     name_len bytes               (UTF-8 name followed by 0x00)
//!     u32 failcount
//! ```
//!
//! All integers are fixed 4-byte little-endian. Reads are best-effort: a
//! missing file yields an empty history, and a parse failure mid-file keeps
//! the life cycles decoded so far and drops the rest. Writes replace the
//! file atomically through a temp file in the same directory.

use crate::error::{NhmError, NhmResult};
use crate::types::{FailedApp, LcInfo, NodeShutdownState};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{error, warn};

/// Database id of the shutdown flag entry.
pub const SHUTDOWN_FLAG_DATABASE: u8 = 0xFF;
/// Key name of the shutdown flag entry.
pub const SHUTDOWN_FLAG_KEY: &str = "PKV_NHM_SHUTDOWN_FLAG";
/// File name of the life-cycle history, relative to the data directory.
pub const HISTORY_FILE_NAME: &str = "lcdata";

/// Minimal key-value persistence interface.
///
/// The production store is file-backed; tests may substitute their own
/// implementation. Keys are scoped by a one-byte database id.
pub trait KeyValueStore: Send {
    fn read_key(&self, database: u8, key: &str) -> NhmResult<Vec<u8>>;

    /// Write `value` under the key. Returns the number of bytes written.
    fn write_key(&mut self, database: u8, key: &str, value: &[u8]) -> NhmResult<usize>;
}

/// Key-value store keeping each entry in its own file below a root
/// directory.
pub struct FileKeyValueStore {
    root: PathBuf,
}

impl FileKeyValueStore {
    /// Open a store rooted at `root/kv`. A failure to create the directory
    /// is logged; subsequent operations will fail and read fail-closed.
    pub fn open(root: &Path) -> Self {
        let root = root.join("kv");
        if let Err(err) = std::fs::create_dir_all(&root) {
            warn!(dir = %root.display(), error = %err, "key-value store could not be initialized");
        }
        Self { root }
    }

    fn entry_path(&self, database: u8, key: &str) -> PathBuf {
        self.root.join(format!("{:02x}-{}", database, key))
    }
}

impl KeyValueStore for FileKeyValueStore {
    fn read_key(&self, database: u8, key: &str) -> NhmResult<Vec<u8>> {
        Ok(std::fs::read(self.entry_path(database, key))?)
    }

    fn write_key(&mut self, database: u8, key: &str, value: &[u8]) -> NhmResult<usize> {
        std::fs::write(self.entry_path(database, key), value)?;
        Ok(value.len())
    }
}

/// Gateway bundling the key-value store and the history file.
pub struct Persistence {
    store: Box<dyn KeyValueStore>,
    history_path: PathBuf,
    historic_lc_count: u32,
}

impl Persistence {
    pub fn new(store: Box<dyn KeyValueStore>, data_dir: &Path, historic_lc_count: u32) -> Self {
        Self {
            store,
            history_path: data_dir.join(HISTORY_FILE_NAME),
            historic_lc_count,
        }
    }

    /// Read the shutdown flag. Any store error, short read, or unknown byte
    /// reads as [`NodeShutdownState::NotSet`].
    pub fn read_shutdown_flag(&self) -> NodeShutdownState {
        let bytes = match self.store.read_key(SHUTDOWN_FLAG_DATABASE, SHUTDOWN_FLAG_KEY) {
            Ok(bytes) => bytes,
            Err(err) => {
                error!(
                    database = SHUTDOWN_FLAG_DATABASE,
                    key = SHUTDOWN_FLAG_KEY,
                    error = %err,
                    "failed to read shutdown flag"
                );
                return NodeShutdownState::NotSet;
            }
        };

        if bytes.len() != 1 {
            error!(
                key = SHUTDOWN_FLAG_KEY,
                len = bytes.len(),
                "shutdown flag has unexpected size"
            );
            return NodeShutdownState::NotSet;
        }

        NodeShutdownState::from_byte(bytes[0]).unwrap_or_else(|| {
            error!(key = SHUTDOWN_FLAG_KEY, value = bytes[0], "shutdown flag holds unknown value");
            NodeShutdownState::NotSet
        })
    }

    /// Write the shutdown flag. Returns true iff the full byte was written.
    pub fn write_shutdown_flag(&mut self, state: NodeShutdownState) -> bool {
        match self
            .store
            .write_key(SHUTDOWN_FLAG_DATABASE, SHUTDOWN_FLAG_KEY, &[state.to_byte()])
        {
            Ok(1) => true,
            Ok(written) => {
                error!(
                    key = SHUTDOWN_FLAG_KEY,
                    written, "short write while storing shutdown flag"
                );
                false
            }
            Err(err) => {
                error!(key = SHUTDOWN_FLAG_KEY, error = %err, "failed to write shutdown flag");
                false
            }
        }
    }

    /// Serialize at most `historic_lc_count` life cycles to the history
    /// file, replacing it atomically.
    pub fn write_history(&self, version: u32, lifecycles: &[LcInfo]) -> NhmResult<()> {
        let encoded = encode_history(version, lifecycles, self.historic_lc_count);

        let dir = self
            .history_path
            .parent()
            .ok_or_else(|| NhmError::persistence("history path has no parent directory"))?;
        std::fs::create_dir_all(dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&encoded)?;
        tmp.persist(&self.history_path)
            .map_err(|err| NhmError::persistence(format!("failed to replace history file: {err}")))?;
        Ok(())
    }

    /// Load previous life cycles from the history file. A missing file is
    /// an empty history; decode problems keep whatever was readable.
    pub fn read_history(&self) -> Vec<LcInfo> {
        let bytes = match std::fs::read(&self.history_path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(err) => {
                error!(file = %self.history_path.display(), error = %err, "failed to read history file");
                return Vec::new();
            }
        };

        let (_version, lifecycles) = decode_history(&bytes, self.historic_lc_count);
        lifecycles
    }
}

/// Pack a dotted version string into the on-disk version word. Up to four
/// components are used; missing or unparseable components count as zero.
pub fn pack_version(version: &str) -> u32 {
    version
        .split('.')
        .take(4)
        .enumerate()
        .fold(0, |word, (idx, part)| {
            let value = part.parse::<u32>().unwrap_or(0) & 0xFF;
            word | (value << (24 - 8 * idx as u32))
        })
}

/// Encode `min(lifecycles.len(), max_lc_count)` life cycles.
pub fn encode_history(version: u32, lifecycles: &[LcInfo], max_lc_count: u32) -> Vec<u8> {
    let count = lifecycles.len().min(max_lc_count as usize);
    let mut out = Vec::new();

    out.extend_from_slice(&version.to_le_bytes());
    out.extend_from_slice(&(count as u32).to_le_bytes());

    for lc in &lifecycles[..count] {
        out.extend_from_slice(&u32::from(lc.start_state.to_byte()).to_le_bytes());
        out.extend_from_slice(&(lc.failed_apps.len() as u32).to_le_bytes());

        for app in &lc.failed_apps {
            let name_len = app.name.len() as u32 + 1;
            out.extend_from_slice(&name_len.to_le_bytes());
            out.extend_from_slice(app.name.as_bytes());
            out.push(0);
            out.extend_from_slice(&app.failcount.to_le_bytes());
        }
    }

    out
}

/// Decode a history buffer, reading at most `max_lc_count` life cycles.
/// Returns the stored version word and the decoded records; decoding stops
/// at the first truncated or malformed record.
pub fn decode_history(bytes: &[u8], max_lc_count: u32) -> (u32, Vec<LcInfo>) {
    let mut reader = Reader { bytes, pos: 0 };
    let mut lifecycles = Vec::new();

    let Some(version) = reader.read_u32() else {
        return (0, lifecycles);
    };
    let Some(stored_count) = reader.read_u32() else {
        return (version, lifecycles);
    };

    let count = stored_count.min(max_lc_count);
    for _ in 0..count {
        match reader.read_lc_info() {
            Some(lc) => lifecycles.push(lc),
            None => {
                warn!(
                    decoded = lifecycles.len(),
                    expected = count,
                    "history file truncated, dropping remaining records"
                );
                break;
            }
        }
    }

    (version, lifecycles)
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl Reader<'_> {
    fn read_u32(&mut self) -> Option<u32> {
        let slice = self.bytes.get(self.pos..self.pos + 4)?;
        self.pos += 4;
        Some(u32::from_le_bytes([slice[0], slice[1], slice[2], slice[3]]))
    }

    fn read_name(&mut self, len: u32) -> Option<String> {
        let slice = self.bytes.get(self.pos..self.pos + len as usize)?;
        self.pos += len as usize;
        // The stored length includes the trailing NUL.
        let name = slice.strip_suffix(&[0u8]).unwrap_or(slice);
        String::from_utf8(name.to_vec()).ok()
    }

    fn read_lc_info(&mut self) -> Option<LcInfo> {
        let start_state = self.read_u32()?;
        let start_state = u8::try_from(start_state)
            .ok()
            .and_then(NodeShutdownState::from_byte)
            .unwrap_or(NodeShutdownState::NotSet);

        let app_count = self.read_u32()?;
        let mut failed_apps = Vec::new();
        for _ in 0..app_count {
            let name_len = self.read_u32()?;
            let name = self.read_name(name_len)?;
            let failcount = self.read_u32()?;
            failed_apps.push(FailedApp { name, failcount });
        }

        Some(LcInfo {
            start_state,
            failed_apps,
        })
    }
}
