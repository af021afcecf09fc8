//! The only place the allocator talks to the kernel.

use std::{io, ptr::NonNull};

use libc::{
  _SC_PAGESIZE, MAP_ANONYMOUS, MAP_FAILED, MAP_HUGETLB, MAP_PRIVATE, MREMAP_MAYMOVE, PROT_READ,
  PROT_WRITE, c_int, c_void,
};

use crate::{
  error::{Error, Result},
  page_type::PageTypeEntry,
};

/// Bit offset of the huge page size selector in the `mmap` flags.
pub const MAP_HUGE_SHIFT: c_int = 26;

const FALLBACK_PAGE_SIZE: usize = 4096;

/// The default page size of the running system.
pub fn host_page_size() -> usize {
  let size = unsafe { libc::sysconf(_SC_PAGESIZE) };
  if size <= 0 {
    FALLBACK_PAGE_SIZE
  } else {
    size as usize
  }
}

/// `mmap` flags for a private anonymous mapping of `page_type` pages.
pub fn map_flags(page_type: &PageTypeEntry) -> c_int {
  let flags = MAP_PRIVATE | MAP_ANONYMOUS;

  if page_type.is_default {
    flags
  } else {
    flags | MAP_HUGETLB | ((page_type.selector as c_int) << MAP_HUGE_SHIFT)
  }
}

/// Hands out and takes back anonymous memory.
pub trait PageSource {
  /// Maps `len` bytes of zeroed, readable and writable memory made of
  /// `page_type` pages.
  ///
  /// # Safety
  /// `len` must be a non-zero multiple of `page_type.byte_size`.
  unsafe fn map(
    &mut self,
    len: usize,
    page_type: &PageTypeEntry,
  ) -> Result<NonNull<u8>>;

  /// Grows or shrinks a mapping obtained from [`map`](Self::map). The
  /// mapping may move.
  ///
  /// # Safety
  /// `ptr` and `old_len` must describe a live mapping from this source.
  unsafe fn remap(
    &mut self,
    ptr: NonNull<u8>,
    old_len: usize,
    new_len: usize,
  ) -> Result<NonNull<u8>>;

  /// # Safety
  /// `ptr` and `len` must describe a live mapping from this source, and
  /// nothing may touch it afterwards.
  unsafe fn unmap(
    &mut self,
    ptr: NonNull<u8>,
    len: usize,
  );
}

/// [`PageSource`] backed by `mmap(2)`, `mremap(2)` and `munmap(2)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct MmapSource;

impl PageSource for MmapSource {
  unsafe fn map(
    &mut self,
    len: usize,
    page_type: &PageTypeEntry,
  ) -> Result<NonNull<u8>> {
    let address = unsafe {
      libc::mmap(
        std::ptr::null_mut(),
        len,
        PROT_READ | PROT_WRITE,
        map_flags(page_type),
        -1,
        0,
      )
    };

    if address == MAP_FAILED {
      return Err(Error::MapFailed {
        len,
        source: io::Error::last_os_error(),
      });
    }

    NonNull::new(address as *mut u8).ok_or(Error::MapFailed {
      len,
      source: io::Error::from(io::ErrorKind::OutOfMemory),
    })
  }

  unsafe fn remap(
    &mut self,
    ptr: NonNull<u8>,
    old_len: usize,
    new_len: usize,
  ) -> Result<NonNull<u8>> {
    let address =
      unsafe { libc::mremap(ptr.as_ptr() as *mut c_void, old_len, new_len, MREMAP_MAYMOVE) };

    if address == MAP_FAILED {
      return Err(Error::RemapFailed {
        old_len,
        new_len,
        source: io::Error::last_os_error(),
      });
    }

    NonNull::new(address as *mut u8).ok_or(Error::RemapFailed {
      old_len,
      new_len,
      source: io::Error::from(io::ErrorKind::OutOfMemory),
    })
  }

  unsafe fn unmap(
    &mut self,
    ptr: NonNull<u8>,
    len: usize,
  ) {
    unsafe { libc::munmap(ptr.as_ptr() as *mut c_void, len) };
  }
}
