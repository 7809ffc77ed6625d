//! Platform dependent memory requests.
//!
//! The allocator itself has nothing to do with the concrete APIs each kernel offers, it
//! only needs a way to get a range of pages and give it back. [`Kernel`] provides that
//! through [`PlatformMemory`], with one implementation per supported platform.

use std::{
    ptr::NonNull,
    sync::atomic::{AtomicUsize, Ordering},
};

/// Virtual memory page size of the computer. This is usually 4096.
/// We can't know it at compile time, so it's asked once and cached.
static PAGE_SIZE: AtomicUsize = AtomicUsize::new(0);

/// Zero-sized handle on the platform's memory syscalls.
pub(crate) struct Kernel;

/// This trait provides an abstraction to handle low level memory operations
/// and syscalls.
trait PlatformMemory {
    /// Request a memory region of size `len`. It returns a Pointer to the
    /// given location or None if the underlying syscall fails.
    unsafe fn request_memory(len: usize) -> Option<NonNull<u8>>;

    /// Returns the memory of size `len` starting from `addr` back to the kernel.
    unsafe fn return_memory(addr: *mut u8, len: usize);

    /// Returns the virtual memory page size of the computer in bytes.
    unsafe fn page_size() -> usize;
}

/// Wrapper to calculate the computer's page size.
#[inline]
pub(crate) fn page_size() -> usize {
    match PAGE_SIZE.load(Ordering::Relaxed) {
        0 => {
            let size = unsafe { Kernel::page_size() };
            PAGE_SIZE.store(size, Ordering::Relaxed);
            size
        }
        size => size,
    }
}

/// Wrapper to use [`PlatformMemory::request_memory`].
///
/// **SAFETY**: `len` must be a non-zero multiple of [`page_size`].
#[inline]
pub(crate) unsafe fn request_memory(len: usize) -> Option<NonNull<u8>> {
    unsafe { Kernel::request_memory(len) }
}

/// Wrapper to use [`PlatformMemory::return_memory`].
///
/// **SAFETY**: `addr` and `len` must describe a range obtained from [`request_memory`]
/// that nobody uses anymore.
#[inline]
pub(crate) unsafe fn return_memory(addr: *mut u8, len: usize) {
    unsafe { Kernel::return_memory(addr, len) }
}

#[cfg(unix)]
mod unix {
    use super::{Kernel, PlatformMemory};

    use libc::{mmap, munmap, off_t, size_t};

    use std::{
        os::raw::{c_int, c_void},
        ptr::NonNull,
    };

    impl PlatformMemory for Kernel {
        unsafe fn request_memory(len: usize) -> Option<NonNull<u8>> {
            // mmap parameters.
            const ADDR: *mut c_void = std::ptr::null_mut::<c_void>();
            // Read-Write only memory.
            const PROT: c_int = libc::PROT_READ | libc::PROT_WRITE;
            const FLAGS: c_int = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;
            const FD: c_int = -1;
            const OFFSET: off_t = 0;

            unsafe {
                let addr = mmap(ADDR, len as size_t, PROT, FLAGS, FD, OFFSET);

                match addr {
                    libc::MAP_FAILED => None,
                    addr => NonNull::new(addr.cast::<u8>()),
                }
            }
        }

        unsafe fn return_memory(addr: *mut u8, len: usize) {
            unsafe {
                munmap(addr as *mut c_void, len as size_t);
            }
        }

        unsafe fn page_size() -> usize {
            unsafe { libc::sysconf(libc::_SC_PAGE_SIZE) as usize }
        }
    }
}

#[cfg(windows)]
mod windows {
    use std::{mem::MaybeUninit, os::raw::c_void, ptr::NonNull};

    use super::{Kernel, PlatformMemory};

    use windows::Win32::System::{Memory, SystemInformation};

    impl PlatformMemory for Kernel {
        unsafe fn request_memory(len: usize) -> Option<NonNull<u8>> {
            // Read-Write only.
            let protection = Memory::PAGE_READWRITE;

            let flags = Memory::MEM_RESERVE | Memory::MEM_COMMIT;

            unsafe {
                let addr = Memory::VirtualAlloc(None, len, flags, protection);

                NonNull::new(addr.cast())
            }
        }

        unsafe fn return_memory(addr: *mut u8, _len: usize) {
            unsafe {
                let _ = Memory::VirtualFree(addr as *mut c_void, 0, Memory::MEM_RELEASE);
            }
        }

        unsafe fn page_size() -> usize {
            unsafe {
                let mut system_info = MaybeUninit::uninit();
                SystemInformation::GetSystemInfo(system_info.as_mut_ptr());

                system_info.assume_init().dwPageSize as usize
            }
        }
    }
}

#[cfg(unix)]
pub use self::program_break::ProgramBreak;

#[cfg(unix)]
mod program_break {
    use std::ptr::NonNull;

    use libc::{c_void, intptr_t, sbrk};
    use log::debug;

    use crate::{
        block::ALIGNMENT,
        error::GrowError,
        region::RegionSource,
        utils::align,
    };

    /// Region source backed by the process' real program break.
    ///
    /// This is what a drop-in `malloc` replacement would use. The program break is
    /// process wide, so anything else moving it (the system `malloc`, another
    /// `ProgramBreak`) breaks contiguity; the heap detects that and the allocation that
    /// needed the growth fails. Prefer [`crate::Arena`] wherever the system allocator is
    /// still in use.
    #[derive(Debug, Default)]
    pub struct ProgramBreak {
        aligned: bool,
    }

    impl ProgramBreak {
        pub const fn new() -> Self {
            Self { aligned: false }
        }

        fn sbrk(increment: usize) -> Result<NonNull<u8>, GrowError> {
            let delta = intptr_t::try_from(increment)
                .map_err(|_| GrowError::Overflow { requested: increment })?;

            let old = unsafe { sbrk(delta) };

            if old == usize::MAX as *mut c_void {
                return Err(GrowError::Refused { requested: increment });
            }

            NonNull::new(old.cast::<u8>()).ok_or(GrowError::Refused { requested: increment })
        }
    }

    unsafe impl RegionSource for ProgramBreak {
        fn grow(&mut self, increment: usize) -> Result<NonNull<u8>, GrowError> {
            if !self.aligned {
                // The break may sit anywhere, our first block must not.
                let current = Self::sbrk(0)?.as_ptr() as usize;
                let padding = align(current, ALIGNMENT)
                    .ok_or(GrowError::Overflow { requested: increment })?
                    - current;

                if padding > 0 {
                    debug!("padding program break at {current:#x} by {padding} bytes");
                    Self::sbrk(padding)?;
                }

                self.aligned = true;
            }

            Self::sbrk(increment)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_size_is_power_of_two() {
        let size = page_size();
        assert!(size.is_power_of_two());
        assert_eq!(size, page_size());
    }

    #[test]
    fn requested_memory_is_writable() {
        let len = page_size();

        unsafe {
            let addr = request_memory(len).unwrap();
            addr.as_ptr().write_bytes(0xAB, len);
            assert_eq!(0xAB, *addr.as_ptr().add(len - 1));
            return_memory(addr.as_ptr(), len);
        }
    }

    #[cfg(unix)]
    #[test]
    fn program_break_grows_up_aligned() {
        use crate::RegionSource;

        let mut brk = ProgramBreak::new();

        let first = brk.grow(64).unwrap();
        let second = brk.grow(64).unwrap();

        assert_eq!(0, first.as_ptr() as usize % crate::ALIGNMENT);
        assert!(first < second);
    }
}
