//! Anonymous OS mappings backing megablocks.

use crate::{globals::BLOCK_SIZE, util::is_aligned};

#[derive(Debug, thiserror::Error)]
pub enum MapError {
    #[error("unable to map {size} bytes: {source}")]
    Os {
        size: usize,
        #[source]
        source: std::io::Error,
    },
    #[error("mapping at {base:#x} is not aligned to {align} bytes")]
    Misaligned { base: usize, align: usize },
}

#[cfg(windows)]
pub mod _win {
    use super::*;

    use core::ptr::null_mut;
    use winapi::um::{
        memoryapi::{VirtualAlloc, VirtualFree},
        sysinfoapi::{GetSystemInfo, SYSTEM_INFO},
        winnt::{MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_READWRITE},
    };
    pub struct Mmap {
        start: *mut u8,
        end: *mut u8,
        size: usize,
    }
    impl Mmap {
        pub fn new(size: usize) -> Result<Self, MapError> {
            unsafe {
                let mem = VirtualAlloc(null_mut(), size, MEM_RESERVE | MEM_COMMIT, PAGE_READWRITE);
                if mem.is_null() {
                    return Err(MapError::Os {
                        size,
                        source: std::io::Error::last_os_error(),
                    });
                }
                let this = Self {
                    start: mem as *mut u8,
                    end: (mem as *mut u8).add(size),
                    size,
                };
                this.check_alignment()?;
                Ok(this)
            }
        }

        pub fn start(&self) -> *mut u8 {
            self.start
        }
        pub fn end(&self) -> *mut u8 {
            self.end
        }
        pub const fn size(&self) -> usize {
            self.size
        }
    }

    impl Drop for Mmap {
        fn drop(&mut self) {
            unsafe {
                VirtualFree(self.start.cast(), 0, MEM_RELEASE);
            }
        }
    }

    pub fn page_size() -> usize {
        unsafe {
            let mut info: SYSTEM_INFO = core::mem::zeroed();
            GetSystemInfo(&mut info);
            info.dwPageSize as usize
        }
    }
}

#[cfg(unix)]
pub mod _unix {
    use super::*;

    pub struct Mmap {
        start: *mut u8,
        end: *mut u8,
        size: usize,
    }

    impl Mmap {
        pub const fn size(&self) -> usize {
            self.size
        }
        pub fn new(size: usize) -> Result<Self, MapError> {
            unsafe {
                let map = libc::mmap(
                    core::ptr::null_mut(),
                    size as _,
                    libc::PROT_READ | libc::PROT_WRITE,
                    libc::MAP_PRIVATE | libc::MAP_ANON,
                    -1,
                    0,
                );
                if map == libc::MAP_FAILED {
                    return Err(MapError::Os {
                        size,
                        source: std::io::Error::last_os_error(),
                    });
                }
                let this = Self {
                    start: map as *mut u8,
                    end: (map as usize + size) as *mut u8,
                    size,
                };
                this.check_alignment()?;
                Ok(this)
            }
        }

        pub fn start(&self) -> *mut u8 {
            self.start
        }
        pub fn end(&self) -> *mut u8 {
            self.end
        }
    }

    impl Drop for Mmap {
        fn drop(&mut self) {
            unsafe {
                libc::munmap(self.start() as *mut _, self.size as _);
            }
        }
    }

    pub fn page_size() -> usize {
        unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
    }
}

#[cfg(unix)]
pub use _unix::*;
#[cfg(windows)]
pub use _win::*;

impl Mmap {
    /// Blocks are found by rounding an address down to `BLOCK_SIZE`, so a
    /// mapping that does not start on a block boundary is useless to us.
    /// Dropping `self` on the error path unmaps it.
    fn check_alignment(&self) -> Result<(), MapError> {
        let base = self.start() as usize;
        if !is_aligned(base, BLOCK_SIZE) {
            return Err(MapError::Misaligned {
                base,
                align: BLOCK_SIZE,
            });
        }
        Ok(())
    }

    pub fn contains(&self, addr: usize) -> bool {
        self.start() as usize <= addr && addr < self.end() as usize
    }
}
