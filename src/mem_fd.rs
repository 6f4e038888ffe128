use crate::error::{Error, ErrorKind};
use crate::segment::SegmentStorage;
use std::ffi::CString;
use std::os::fd::AsRawFd;
use std::os::fd::FromRawFd;
use std::os::fd::OwnedFd;
use std::os::fd::RawFd;

/// Anonymous shared memory (memfd) mapped into this process.
pub struct MemFd {
    file_fd: OwnedFd,
    addr: *mut u8,
    n_bytes: usize,
    writable: bool,
}

// the mapping is owned by this struct and only reached through &self/&mut self
unsafe impl Send for MemFd {}
unsafe impl Sync for MemFd {}

impl MemFd {
    /// Maps a memfd received from another process, read only.
    pub fn from_owned_fd(file_fd: OwnedFd) -> Result<MemFd, Error> {
        unsafe {
            // seek to end, find length
            let n_bytes = libc::lseek(file_fd.as_raw_fd(), 0, libc::SEEK_END);
            if n_bytes < 0 {
                return Err(Error::new(
                    ErrorKind::Io,
                    format!(
                        "Failed to seek to end: {}",
                        std::io::Error::last_os_error()
                    ),
                ));
            }
            if n_bytes == 0 {
                return Err(Error::new(
                    ErrorKind::Wire,
                    format!("Received an empty memfd"),
                ));
            }

            let hint: *mut libc::c_void = std::ptr::null_mut();
            let addr = libc::mmap(
                hint,
                n_bytes as usize,
                libc::PROT_READ,
                libc::MAP_SHARED, // need to get back to underlying fd
                file_fd.as_raw_fd(),
                0,
            );

            if addr == libc::MAP_FAILED {
                return Err(Error::new(
                    ErrorKind::Io,
                    format!(
                        "Failed to map memory: {}",
                        std::io::Error::last_os_error()
                    ),
                ));
            }

            return Ok(MemFd {
                addr: addr as *mut u8,
                file_fd: file_fd,
                n_bytes: n_bytes as usize,
                writable: false,
            });
        }
    }

    pub fn new(name: &str, n_bytes: usize) -> Result<MemFd, Error> {
        if n_bytes == 0 {
            return Err(Error::new(
                ErrorKind::SegmentAllocation,
                format!("Cannot map an empty memfd"),
            ));
        }
        let c_name = match CString::new(name) {
            Ok(c_name) => c_name,
            Err(err) => {
                return Err(Error::new(
                    ErrorKind::SegmentAllocation,
                    format!("Invalid memfd name {:?}: {}", name, err),
                ));
            }
        };

        unsafe {
            let raw_file_fd = libc::memfd_create(c_name.as_ptr(), libc::MFD_CLOEXEC);
            if raw_file_fd < 0 {
                return Err(Error::new(
                    ErrorKind::SegmentAllocation,
                    format!(
                        "Failed to construct memfd: {}",
                        std::io::Error::last_os_error()
                    ),
                ));
            }
            let file_fd = OwnedFd::from_raw_fd(raw_file_fd);

            if libc::ftruncate(file_fd.as_raw_fd(), n_bytes as libc::off_t) < 0 {
                return Err(Error::new(
                    ErrorKind::SegmentAllocation,
                    format!(
                        "Failed to resize memfd: {}",
                        std::io::Error::last_os_error()
                    ),
                ));
            }

            let hint: *mut libc::c_void = std::ptr::null_mut();
            let addr = libc::mmap(
                hint,
                n_bytes,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED, // need to read from underlying file
                file_fd.as_raw_fd(),
                0,
            );

            if addr == libc::MAP_FAILED {
                return Err(Error::new(
                    ErrorKind::SegmentAllocation,
                    format!(
                        "Failed to map memory: {}",
                        std::io::Error::last_os_error()
                    ),
                ));
            }

            assert!(!addr.is_null());
            return Ok(MemFd {
                addr: addr as *mut u8,
                file_fd: file_fd,
                n_bytes: n_bytes,
                writable: true,
            });
        }
    }

    pub fn len(&self) -> usize {
        return self.n_bytes;
    }

    pub fn is_writable(&self) -> bool {
        return self.writable;
    }

    pub fn to_owned_fd(&self) -> Result<OwnedFd, Error> {
        return Ok(self.file_fd.try_clone()?);
    }
}

impl SegmentStorage for MemFd {
    fn as_slice(&self) -> &[u8] {
        assert!(!self.addr.is_null());
        return unsafe { std::slice::from_raw_parts(self.addr, self.n_bytes) };
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        assert!(self.writable, "Received shared memory is mapped read only");
        return unsafe { std::slice::from_raw_parts_mut(self.addr, self.n_bytes) };
    }

    fn raw_fd(&self) -> Option<RawFd> {
        return Some(self.file_fd.as_raw_fd());
    }
}

impl Drop for MemFd {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.addr as *mut libc::c_void, self.n_bytes);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_between_mappings() {
        let mut writer = MemFd::new("mem_fd_test", 4096).expect("Should create memfd");
        assert_eq!(writer.len(), 4096);
        assert!(writer.is_writable());
        assert_eq!(writer.as_slice().as_ptr() as usize % 8, 0);

        writer.as_mut_slice()[10] = 42;

        let reader = MemFd::from_owned_fd(writer.to_owned_fd().expect("Should clone"))
            .expect("Should map");
        assert_eq!(reader.len(), 4096);
        assert!(!reader.is_writable());
        assert_eq!(reader.as_slice()[10], 42);

        // writes after mapping are visible too
        writer.as_mut_slice()[11] = 43;
        assert_eq!(reader.as_slice()[11], 43);
    }

    #[test]
    fn empty_memfd_rejected() {
        assert!(MemFd::new("empty", 0).is_err());
    }

    #[test]
    #[should_panic]
    fn received_memory_is_read_only() {
        let writer = MemFd::new("read_only_test", 64).expect("Should create memfd");
        let mut reader = MemFd::from_owned_fd(writer.to_owned_fd().expect("Should clone"))
            .expect("Should map");
        reader.as_mut_slice()[0] = 1;
    }
}
