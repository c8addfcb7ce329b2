use std::{
    ptr::NonNull,
    sync::atomic::{AtomicUsize, Ordering},
};

use crate::{
    error::AllocError,
    provider::RegionProvider,
    utils::{align, checked_align},
};

/// Upper bound of the region a [`Kernel`] reserves when no capacity is given.
pub const DEFAULT_MAX_HEAP: usize = 20 * (1 << 20);

/// Virtual memory page size of the computer. This is usually 4096.
/// Zero until the first call to [`page_size`].
static PAGE_SIZE: AtomicUsize = AtomicUsize::new(0);

/// Region provider backed by the operating system.
///
/// We can't rely on `sbrk` being available (or on nobody else moving the program
/// break), so instead we emulate it: a span of virtual address space is *reserved*
/// up front and pages are *committed* lazily as the break advances.
///
/// ```text
///  base                      brk        committed                  reserved
///   |                         |             |                          |
///   v                         v             v                          v
///   +-------------------------+-------------+--------------------------+
///   |   handed to the heap    | committed,  |   reserved, no access    |
///   |                         |   unused    |                          |
///   +-------------------------+-------------+--------------------------+
/// ```
///
/// Because the reservation never moves, every span handed out is contiguous with the
/// previous one, which is what [`RegionProvider`] asks for. Growing past the
/// reservation is an out of memory condition.
pub struct Kernel {
    base: NonNull<u8>,
    reserved: usize,
    committed: usize,
    brk: usize,
}

/// This trait provides an abstraction to handle low level memory operations
/// and syscalls. As the allocator, our top level view of this, has nothing
/// to do with the concrete implementations / APIs offered by each kernel.
trait PlatformMemory {
    /// Reserves `len` bytes of address space without backing them. Returns None if
    /// the underlying syscall fails.
    unsafe fn reserve(len: usize) -> Option<NonNull<u8>>;

    /// Makes `len` reserved bytes starting at `addr` readable and writable.
    unsafe fn commit(addr: NonNull<u8>, len: usize) -> bool;

    /// Returns the whole reservation starting at `addr` back to the kernel.
    unsafe fn release(addr: NonNull<u8>, len: usize);

    /// Returns the virtual memory page size of the computer in bytes.
    unsafe fn page_size() -> usize;
}

/// Wrapper to calculate the computer's page size only once.
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

impl Kernel {
    /// Reserves [`DEFAULT_MAX_HEAP`] bytes of address space.
    pub fn new() -> Result<Self, AllocError> {
        Self::with_capacity(DEFAULT_MAX_HEAP)
    }

    /// Reserves room for at least `capacity` bytes, rounded up to whole pages.
    pub fn with_capacity(capacity: usize) -> Result<Self, AllocError> {
        let page_size = page_size();

        let reserved = checked_align(capacity.max(1), page_size)
            .ok_or(AllocError::TooLarge { requested: capacity })?;

        let base = unsafe { Kernel::reserve(reserved) }
            .ok_or(AllocError::OutOfMemory { requested: reserved })?;

        log::debug!("Kernel::with_capacity({capacity:#x}): reserved {reserved:#x} bytes at {base:p}");

        Ok(Self {
            base,
            reserved,
            committed: 0,
            brk: 0,
        })
    }

    /// Bytes of address space reserved for the region.
    pub fn capacity(&self) -> usize {
        self.reserved
    }

    /// Bytes handed out so far.
    pub fn used(&self) -> usize {
        self.brk
    }
}

impl RegionProvider for Kernel {
    fn grow_by(&mut self, len: usize) -> Result<NonNull<u8>, AllocError> {
        let new_brk = self
            .brk
            .checked_add(len)
            .filter(|&brk| brk <= self.reserved)
            .ok_or(AllocError::OutOfMemory { requested: len })?;

        if new_brk > self.committed {
            // `reserved` is a whole number of pages, so this never passes it.
            let target = align(new_brk, page_size());

            unsafe {
                let addr = self.base.add(self.committed);
                if !Kernel::commit(addr, target - self.committed) {
                    return Err(AllocError::OutOfMemory { requested: len });
                }
            }

            log::trace!(
                "Kernel::grow_by({len:#x}): committed {:#x}..{target:#x}",
                self.committed
            );
            self.committed = target;
        }

        let start = unsafe { self.base.add(self.brk) };
        self.brk = new_brk;

        Ok(start)
    }
}

impl Drop for Kernel {
    fn drop(&mut self) {
        unsafe { Kernel::release(self.base, self.reserved) }
    }
}

#[cfg(unix)]
mod unix {
    use super::{Kernel, PlatformMemory};

    use libc::{mmap, mprotect, munmap, off_t, size_t};

    use std::{
        os::raw::{c_int, c_void},
        ptr::NonNull,
    };

    impl PlatformMemory for Kernel {
        unsafe fn reserve(len: usize) -> Option<NonNull<u8>> {
            // mmap parameters.
            const ADDR: *mut c_void = std::ptr::null_mut::<c_void>();
            // No access until committed.
            const PROT: c_int = libc::PROT_NONE;
            const FLAGS: c_int = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;
            const FD: c_int = -1;
            const OFFSET: off_t = 0;

            unsafe {
                let addr = mmap(ADDR, len as size_t, PROT, FLAGS, FD, OFFSET);

                if addr == libc::MAP_FAILED {
                    None
                } else {
                    Some(NonNull::new_unchecked(addr).cast::<u8>())
                }
            }
        }

        unsafe fn commit(addr: NonNull<u8>, len: usize) -> bool {
            // Read-Write only memory.
            const PROT: c_int = libc::PROT_READ | libc::PROT_WRITE;

            unsafe { mprotect(addr.as_ptr().cast(), len as size_t, PROT) == 0 }
        }

        unsafe fn release(addr: NonNull<u8>, len: usize) {
            if unsafe { munmap(addr.as_ptr().cast(), len as size_t) } != 0 {
                log::warn!(
                    "Kernel::release({addr:p}, {len:#x}): munmap failed: {}",
                    std::io::Error::last_os_error()
                );
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

    use crate::kernel::{Kernel, PlatformMemory};

    use windows::Win32::System::{Memory, SystemInformation};

    impl PlatformMemory for Kernel {
        unsafe fn reserve(len: usize) -> Option<NonNull<u8>> {
            unsafe {
                let addr = Memory::VirtualAlloc(None, len, Memory::MEM_RESERVE, Memory::PAGE_NOACCESS);

                NonNull::new(addr.cast())
            }
        }

        unsafe fn commit(addr: NonNull<u8>, len: usize) -> bool {
            // Read-Write only.
            let protection = Memory::PAGE_READWRITE;

            unsafe {
                let addr = Memory::VirtualAlloc(
                    Some(addr.as_ptr() as *const c_void),
                    len,
                    Memory::MEM_COMMIT,
                    protection,
                );

                !addr.is_null()
            }
        }

        unsafe fn release(addr: NonNull<u8>, _len: usize) {
            if let Err(err) = unsafe { Memory::VirtualFree(addr.as_ptr() as *mut c_void, 0, Memory::MEM_RELEASE) } {
                log::warn!("Kernel::release({addr:p}): VirtualFree failed: {err}");
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
