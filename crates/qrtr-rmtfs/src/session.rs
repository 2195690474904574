// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Caller session table (§4.D "Session model").
//!
//! Mirrors `storage.c`'s fixed `rmtfds[MAX_CALLERS]` array: a caller's id
//! *is* its slot index, sessions are reused by `(node, partition)` before a
//! free slot is allocated, and in read-only mode a session's writes land in
//! an in-memory shadow buffer instead of the backing file. Every accessor
//! takes `(node, caller_id)` rather than handing out a session reference,
//! so `pread`/`pwrite` can borrow the table and the slot at once.

use crate::partition::{self, Partition};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::Path;

pub const MAX_CALLERS: usize = 10;
const STORAGE_MAX_SIZE: usize = 16 * 1024 * 1024;

#[derive(Debug)]
pub enum StorageError {
    UnknownPartition,
    NoFreeSessions,
    NoSuchCaller,
    Io(io::Error),
    WriteExceedsMax,
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownPartition => write!(f, "request for unknown partition"),
            Self::NoFreeSessions => write!(f, "out of free caller handles"),
            Self::NoSuchCaller => write!(f, "no session for that (node, caller_id)"),
            Self::Io(e) => write!(f, "storage I/O error: {e}"),
            Self::WriteExceedsMax => write!(f, "write exceeds shadow buffer max size"),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for StorageError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

enum Backing {
    File(File),
    Shadow(Vec<u8>),
}

struct Session {
    node: u32,
    dev_error: u32,
    partition: &'static Partition,
    backing: Backing,
}

/// The open-session table plus the storage-wide policy (root directory,
/// read-only shadowing, by-partlabel resolution) every session is opened
/// under.
pub struct Storage {
    storage_dir: String,
    read_only: bool,
    use_partitions: bool,
    slots: Vec<Option<Session>>,
}

impl Storage {
    pub fn new(storage_root: Option<&str>, read_only: bool, use_partitions: bool) -> Self {
        let storage_dir = match storage_root {
            Some(root) => root.to_string(),
            None if use_partitions => "/dev/disk/by-partlabel".to_string(),
            None => "/boot".to_string(),
        };

        Self {
            storage_dir,
            read_only,
            use_partitions,
            slots: (0..MAX_CALLERS).map(|_| None).collect(),
        }
    }

    fn find_reusable(&self, node: u32, partition: &'static Partition) -> Option<u32> {
        self.slots.iter().enumerate().find_map(|(idx, slot)| {
            let session = slot.as_ref()?;
            (session.node == node && std::ptr::eq(session.partition, partition)).then_some(idx as u32)
        })
    }

    fn find_free(&self) -> Option<u32> {
        self.slots.iter().position(|slot| slot.is_none()).map(|i| i as u32)
    }

    fn session_at(&self, node: u32, caller_id: u32) -> Result<&Session, StorageError> {
        let session = self
            .slots
            .get(caller_id as usize)
            .and_then(|s| s.as_ref())
            .ok_or(StorageError::NoSuchCaller)?;
        if session.node != node {
            return Err(StorageError::NoSuchCaller);
        }
        Ok(session)
    }

    fn session_at_mut(&mut self, node: u32, caller_id: u32) -> Result<&mut Session, StorageError> {
        let session = self
            .slots
            .get_mut(caller_id as usize)
            .and_then(|s| s.as_mut())
            .ok_or(StorageError::NoSuchCaller)?;
        if session.node != node {
            return Err(StorageError::NoSuchCaller);
        }
        Ok(session)
    }

    /// True iff a live session exists for `(node, caller_id)`.
    pub fn has_caller(&self, node: u32, caller_id: u32) -> bool {
        self.session_at(node, caller_id).is_ok()
    }

    pub fn dev_error(&self, node: u32, caller_id: u32) -> Result<u32, StorageError> {
        Ok(self.session_at(node, caller_id)?.dev_error)
    }

    /// Open (or reuse) a session for `client_path` on behalf of `node`,
    /// returning its caller id.
    pub fn open(&mut self, node: u32, client_path: &str) -> Result<u32, StorageError> {
        let partition = partition::lookup(client_path).ok_or(StorageError::UnknownPartition)?;

        if let Some(id) = self.find_reusable(node, partition) {
            return Ok(id);
        }

        let id = self.find_free().ok_or(StorageError::NoFreeSessions)?;
        let file_name = partition::backing_name(partition, self.use_partitions);
        let fs_path = Path::new(&self.storage_dir).join(file_name);

        let backing = if self.read_only {
            Backing::Shadow(std::fs::read(&fs_path)?)
        } else {
            let file = OpenOptions::new().read(true).write(true).open(&fs_path)?;
            Backing::File(file)
        };

        self.slots[id as usize] = Some(Session {
            node,
            dev_error: 0,
            partition,
            backing,
        });
        Ok(id)
    }

    pub fn close(&mut self, node: u32, caller_id: u32) -> bool {
        match self.slots.get_mut(caller_id as usize) {
            Some(slot) if slot.as_ref().is_some_and(|s| s.node == node) => {
                *slot = None;
                true
            }
            _ => false,
        }
    }

    /// Read `buf.len()` bytes at `offset`. Short reads (including reads
    /// entirely past the end of the backing data) are zero-filled; the
    /// full requested length is always returned, mirroring `storage_pread`.
    pub fn pread(&self, node: u32, caller_id: u32, buf: &mut [u8], offset: u64) -> Result<usize, StorageError> {
        let session = self.session_at(node, caller_id)?;
        let n = match &session.backing {
            Backing::File(file) => file.read_at(buf, offset).unwrap_or(0),
            Backing::Shadow(data) => {
                let offset = offset as usize;
                if offset >= data.len() {
                    0
                } else {
                    let avail = &data[offset..];
                    let n = avail.len().min(buf.len());
                    buf[..n].copy_from_slice(&avail[..n]);
                    n
                }
            }
        };
        if n < buf.len() {
            buf[n..].fill(0);
        }
        Ok(buf.len())
    }

    /// Write `buf` at `offset`. In read-only mode this grows the shadow
    /// buffer (capped at [`STORAGE_MAX_SIZE`]) instead of touching the
    /// backing file, mirroring `storage_pwrite`'s "read-only" naming: reads
    /// from the real device never hit disk, but a session's own shadow
    /// copy is still mutable.
    pub fn pwrite(&mut self, node: u32, caller_id: u32, buf: &[u8], offset: u64) -> Result<usize, StorageError> {
        let session = self.session_at_mut(node, caller_id)?;
        match &mut session.backing {
            Backing::File(file) => Ok(file.write_at(buf, offset)?),
            Backing::Shadow(data) => {
                let new_len = offset as usize + buf.len();
                if new_len >= STORAGE_MAX_SIZE {
                    return Err(StorageError::WriteExceedsMax);
                }
                if new_len > data.len() {
                    data.resize(new_len, 0);
                }
                data[offset as usize..new_len].copy_from_slice(buf);
                Ok(buf.len())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn make_storage_root() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for name in ["modem_fs1", "modem_fs2", "modem_fsc", "modem_fsg"] {
            let mut f = File::create(dir.path().join(name)).unwrap();
            f.write_all(&vec![0xAAu8; 4096]).unwrap();
        }
        dir
    }

    #[test]
    fn open_reuses_existing_session_for_same_node_and_partition() {
        let dir = make_storage_root();
        let mut storage = Storage::new(Some(dir.path().to_str().unwrap()), false, false);
        let id1 = storage.open(5, "/boot/modem_fs1").unwrap();
        let id2 = storage.open(5, "/boot/modem_fs1").unwrap();
        assert_eq!(id1, id2);
    }

    #[test]
    fn open_rejects_unknown_partition() {
        let dir = make_storage_root();
        let mut storage = Storage::new(Some(dir.path().to_str().unwrap()), false, false);
        assert!(matches!(storage.open(5, "/boot/nope"), Err(StorageError::UnknownPartition)));
    }

    #[test]
    fn pread_zero_fills_short_read() {
        let dir = make_storage_root();
        let mut storage = Storage::new(Some(dir.path().to_str().unwrap()), false, false);
        let id = storage.open(1, "/boot/modem_fs1").unwrap();
        let mut buf = [0xFFu8; 512];
        storage.pread(1, id, &mut buf, 4096 - 100).unwrap();
        assert_eq!(&buf[..100], &[0xAAu8; 100][..]);
        assert_eq!(&buf[100..], &[0u8; 412][..]);
    }

    #[test]
    fn read_only_pwrite_grows_shadow_buffer_and_caps_at_max() {
        let dir = make_storage_root();
        let mut storage = Storage::new(Some(dir.path().to_str().unwrap()), true, false);
        let id = storage.open(1, "/boot/modem_fs1").unwrap();
        let payload = [7u8; 512];
        storage.pwrite(1, id, &payload, 0).unwrap();
        let mut readback = [0u8; 512];
        storage.pread(1, id, &mut readback, 0).unwrap();
        assert_eq!(readback, payload);

        let result = storage.pwrite(1, id, &payload, STORAGE_MAX_SIZE as u64);
        assert!(matches!(result, Err(StorageError::WriteExceedsMax)));
    }

    #[test]
    fn close_frees_slot_for_reuse() {
        let dir = make_storage_root();
        let mut storage = Storage::new(Some(dir.path().to_str().unwrap()), false, false);
        let id = storage.open(1, "/boot/modem_fs1").unwrap();
        assert!(storage.close(1, id));
        assert!(!storage.has_caller(1, id));
    }
}
