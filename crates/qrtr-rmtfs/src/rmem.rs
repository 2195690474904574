// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Shared-memory carveout discovery and access (§4.D "Shared memory").
//!
//! The modem and this daemon exchange sector payloads through a physically
//! contiguous region the SoC's boot firmware reserves. Discovery tries
//! three mechanisms in order, same fallback chain as `sharedmem.c`:
//!
//! 1. the `qcom_rmtfs_mem` character device, with `phys_addr`/`size`
//!    published as sysfs attributes alongside it (read/write fd, no mmap);
//! 2. the UIO fallback device, whose `maps/map0/{addr,size}` attributes
//!    describe a region mmap'd directly from the UIO fd;
//! 3. a device-tree `reserved-memory` node matched by name prefix, mapped
//!    through `/dev/mem`.
//!
//! Sysfs attributes are read directly off well-known paths rather than
//! resolved via `libudev` (see `sharedmem.c`'s `ANDROID`-guarded branch,
//! which does the same): this daemon targets Android/embedded Linux
//! userspace where the device's sysfs directory is already known by name,
//! so pulling in a udev binding buys nothing.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom};
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::Path;

#[derive(Debug)]
pub enum RmemError {
    NotFound,
    Io(io::Error),
    OutOfBounds,
}

impl fmt::Display for RmemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "no rmtfs shared-memory carveout found"),
            Self::Io(e) => write!(f, "shared-memory I/O error: {e}"),
            Self::OutOfBounds => write!(f, "access outside the mapped carveout"),
        }
    }
}

impl std::error::Error for RmemError {}

impl From<io::Error> for RmemError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

fn read_hex_attr(path: impl AsRef<Path>) -> io::Result<u64> {
    let raw = fs::read_to_string(path)?;
    let trimmed = raw.trim().trim_start_matches("0x");
    u64::from_str_radix(trimmed, 16).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

enum Access {
    /// `qcom_rmtfs_mem` character device: addressed relative to `address`
    /// via `pread`/`pwrite`, never mapped.
    Unmapped { fd: File },
    /// UIO device or `/dev/mem`: `base` points at `address` already mapped
    /// into our address space.
    Mapped { fd: File, base: *mut u8 },
}

pub struct RemoteMemory {
    address: u64,
    size: u64,
    access: Access,
}

fn open_rfsa(client_id: u32) -> Result<RemoteMemory, RmemError> {
    let dev_path = format!("/dev/qcom_rmtfs_mem{client_id}");
    let fd = OpenOptions::new().read(true).write(true).open(&dev_path).map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound {
            RmemError::NotFound
        } else {
            RmemError::Io(e)
        }
    })?;

    let sysfs = format!("/sys/class/rmtfs/qcom_rmtfs_mem{client_id}");
    let address = read_hex_attr(format!("{sysfs}/phys_addr"))?;
    let size = read_hex_attr(format!("{sysfs}/size"))?;

    Ok(RemoteMemory {
        address,
        size,
        access: Access::Unmapped { fd },
    })
}

fn open_uio(client_id: u32) -> Result<RemoteMemory, RmemError> {
    let dev_path = format!("/dev/qcom_rmtfs_uio{client_id}");
    let fd = OpenOptions::new().read(true).write(true).open(&dev_path).map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound {
            RmemError::NotFound
        } else {
            RmemError::Io(e)
        }
    })?;

    let sysfs = format!("/sys/class/uio/uio{client_id}/maps/map0");
    let address = read_hex_attr(format!("{sysfs}/addr"))?;
    let size = read_hex_attr(format!("{sysfs}/size"))?;

    let base = mmap_fd(fd.as_raw_fd(), size)?;
    Ok(RemoteMemory {
        address,
        size,
        access: Access::Mapped { fd, base },
    })
}

/// Scan `/proc/device-tree/reserved-memory/` for a node whose name starts
/// with `rmtfs` and parse its `reg` property (either a pair of 32-bit or a
/// pair of 64-bit big-endian cells: address, size).
fn enumerate_reserved_memory() -> Result<(u64, u64), RmemError> {
    let base = Path::new("/proc/device-tree/reserved-memory");
    for entry in fs::read_dir(base).map_err(|_| RmemError::NotFound)? {
        let entry = entry.map_err(RmemError::Io)?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !name.starts_with("rmtfs") {
            continue;
        }

        let mut reg = File::open(entry.path().join("reg"))?;
        let mut data = Vec::new();
        reg.read_to_end(&mut data)?;

        return match data.len() {
            8 => {
                let addr = u32::from_be_bytes(data[0..4].try_into().unwrap()) as u64;
                let size = u32::from_be_bytes(data[4..8].try_into().unwrap()) as u64;
                Ok((addr, size))
            }
            16 => {
                let addr = u64::from_be_bytes(data[0..8].try_into().unwrap());
                let size = u64::from_be_bytes(data[8..16].try_into().unwrap());
                Ok((addr, size))
            }
            _ => Err(RmemError::NotFound),
        };
    }
    Err(RmemError::NotFound)
}

fn open_dev_mem(address: u64, size: u64) -> Result<RemoteMemory, RmemError> {
    let fd = OpenOptions::new().read(true).write(true).open("/dev/mem")?;
    let base = mmap_at(fd.as_raw_fd(), size, address)?;
    Ok(RemoteMemory {
        address,
        size,
        access: Access::Mapped { fd, base },
    })
}

fn mmap_fd(fd: RawFd, size: u64) -> Result<*mut u8, RmemError> {
    mmap_at(fd, size, 0)
}

fn mmap_at(fd: RawFd, size: u64, offset: u64) -> Result<*mut u8, RmemError> {
    // SAFETY: fd is a just-opened, valid file descriptor; size is non-zero
    // and comes from a trusted sysfs/device-tree attribute; the returned
    // pointer is checked against MAP_FAILED before use.
    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            size as libc::size_t,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            fd,
            offset as libc::off_t,
        )
    };
    if ptr == libc::MAP_FAILED {
        return Err(io::Error::last_os_error().into());
    }
    Ok(ptr as *mut u8)
}

impl RemoteMemory {
    /// Run the three-tier discovery chain for client id 1, matching
    /// `rmtfs_mem_open`'s hardcoded client id.
    pub fn open() -> Result<Self, RmemError> {
        match open_rfsa(1) {
            Ok(rmem) => return Ok(rmem),
            Err(RmemError::NotFound) => {}
            Err(e) => return Err(e),
        }

        match open_uio(1) {
            Ok(rmem) => return Ok(rmem),
            Err(RmemError::NotFound) => {}
            Err(e) => return Err(e),
        }

        let (address, size) = enumerate_reserved_memory()?;
        open_dev_mem(address, size)
    }

    /// Validate `[phys_address, phys_address+len)` falls within the mapped
    /// carveout, returning the carveout-relative offset.
    fn offset_of(&self, phys_address: u64, len: u64) -> Result<u64, RmemError> {
        let end = phys_address.checked_add(len).ok_or(RmemError::OutOfBounds)?;
        if phys_address < self.address || end > self.address + self.size {
            return Err(RmemError::OutOfBounds);
        }
        Ok(phys_address - self.address)
    }

    /// The carveout's base physical address, handed back to the modem as
    /// the result of an ALLOC_BUFF request once `size` is validated to fit.
    pub fn alloc(&self, size: u64) -> Result<u64, RmemError> {
        if size > self.size {
            return Err(RmemError::OutOfBounds);
        }
        Ok(self.address)
    }

    pub fn read(&self, phys_address: u64, buf: &mut [u8]) -> Result<(), RmemError> {
        let rel = self.offset_of(phys_address, buf.len() as u64)?;
        match &self.access {
            Access::Unmapped { fd } => {
                use std::os::unix::fs::FileExt;
                fd.read_exact_at(buf, rel)?;
            }
            Access::Mapped { base, .. } => {
                // SAFETY: offset_of already checked [rel, rel+buf.len())
                // falls within the mapping `base` points at, which stays
                // valid for the lifetime of this RemoteMemory.
                unsafe {
                    std::ptr::copy_nonoverlapping(base.add(rel as usize), buf.as_mut_ptr(), buf.len());
                }
            }
        }
        Ok(())
    }

    pub fn write(&self, phys_address: u64, buf: &[u8]) -> Result<(), RmemError> {
        let rel = self.offset_of(phys_address, buf.len() as u64)?;
        match &self.access {
            Access::Unmapped { fd } => {
                use std::os::unix::fs::FileExt;
                fd.write_all_at(buf, rel)?;
            }
            Access::Mapped { base, .. } => {
                // SAFETY: see `read`.
                unsafe {
                    std::ptr::copy_nonoverlapping(buf.as_ptr(), base.add(rel as usize), buf.len());
                }
            }
        }
        Ok(())
    }
}

impl Drop for RemoteMemory {
    fn drop(&mut self) {
        if let Access::Mapped { base, .. } = &self.access {
            // SAFETY: base/size were returned by a successful mmap in
            // `open` and are unmapped exactly once here.
            unsafe {
                libc::munmap(*base as *mut libc::c_void, self.size as libc::size_t);
            }
        }
    }
}

// `*mut u8` isn't Send by default; the pointer only ever refers to a
// carveout this process has exclusive mmap access to, and the daemon's
// event loop is single-threaded.
unsafe impl Send for RemoteMemory {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_hex_attr_strips_0x_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("phys_addr");
        std::fs::write(&path, "0x9bf00000\n").unwrap();
        assert_eq!(read_hex_attr(&path).unwrap(), 0x9bf0_0000);
    }

    #[test]
    fn offset_of_rejects_out_of_range_access() {
        let rmem = RemoteMemory {
            address: 0x1000,
            size: 0x100,
            access: Access::Unmapped {
                fd: File::open("/dev/null").unwrap(),
            },
        };
        assert!(rmem.offset_of(0x1000, 0x100).is_ok());
        assert!(matches!(rmem.offset_of(0x1000, 0x101), Err(RmemError::OutOfBounds)));
        assert!(matches!(rmem.offset_of(0xFFF, 0x1), Err(RmemError::OutOfBounds)));
    }
}
