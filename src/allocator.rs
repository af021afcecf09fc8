use std::ptr::{self, NonNull};

use log::{debug, error, warn};

use crate::{
  align::round_up_multiple,
  chunk::{self, ChunkHeader, ChunkRef},
  config::AllocatorConfig,
  directory::{PageDirectory, PageRecord},
  error::{Error, Result},
  free_index::FreeIndex,
  os::{MmapSource, PageSource},
  page::{self, FIRST_CHUNK, FIXED_OVERHEAD, PageHeader},
  page_type::PageTypeCatalog,
};

/// Snapshot of what the allocator holds.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AllocatorStats {
  /// Pages currently mapped.
  pub pages: usize,
  /// Bytes across all mapped pages.
  pub mapped_bytes: usize,
  /// Allocations handed out and not yet released.
  pub live_allocations: usize,
  /// Chunks in the free index.
  pub free_chunks: usize,
  /// Payload bytes across the free index.
  pub free_bytes: usize,
}

/// First-fit allocator over directly mapped default and huge pages.
///
/// Not thread-safe: every operation takes `&mut self`.
pub struct PageAllocator<S: PageSource = MmapSource> {
  catalog: PageTypeCatalog,
  source: S,
  directory: PageDirectory,
  free: FreeIndex,
  live: usize,
  huge_page_fallback: bool,
}

impl PageAllocator<MmapSource> {
  /// An allocator over the host's page types, discovered once per process.
  pub fn new() -> Result<Self> {
    Ok(Self::with_source(
      PageTypeCatalog::host()?.clone(),
      MmapSource,
    ))
  }

  pub fn with_config(config: &AllocatorConfig) -> Result<Self> {
    let catalog = PageTypeCatalog::discover(config)?;
    Ok(Self::with_source(catalog, MmapSource).huge_page_fallback(config.huge_page_fallback))
  }
}

impl<S: PageSource> PageAllocator<S> {
  pub fn with_source(
    catalog: PageTypeCatalog,
    source: S,
  ) -> Self {
    Self {
      catalog,
      source,
      directory: PageDirectory::new(),
      free: FreeIndex::new(),
      live: 0,
      huge_page_fallback: false,
    }
  }

  /// Whether a refused huge page mapping is retried with default pages.
  pub fn huge_page_fallback(
    mut self,
    enabled: bool,
  ) -> Self {
    self.huge_page_fallback = enabled;
    self
  }

  pub fn catalog(&self) -> &PageTypeCatalog {
    &self.catalog
  }

  /// Returns at least `size` bytes aligned to 16, or null when `size` is
  /// beyond `isize::MAX` or the kernel refuses to map more memory.
  ///
  /// A zero-sized request yields a small, unique region.
  pub fn allocate(
    &mut self,
    size: usize,
  ) -> *mut u8 {
    let Some(size) = chunk::request_size(size) else {
      return ptr::null_mut();
    };

    unsafe {
      let chunk = match self.free.first_fit(&self.directory, size) {
        Some(chunk) => chunk,
        None => {
          if let Err(err) = self.acquire_page(size) {
            error!("cannot allocate {} bytes: {}", size, err);
            return ptr::null_mut();
          }

          match self.free.first_fit(&self.directory, size) {
            Some(chunk) => chunk,
            None => return ptr::null_mut(),
          }
        }
      };

      self.claim(chunk, size)
    }
  }

  /// Resizes an allocation, in place when possible.
  ///
  /// Shrinking always stays in place. Growing stays in place when the next
  /// chunk in the page is free and large enough; otherwise the contents
  /// move to a fresh allocation. A null `ptr` behaves like
  /// [`allocate`](Self::allocate). On failure null is returned and `ptr`
  /// stays valid.
  ///
  /// # Safety
  /// `ptr` must be null or a live allocation from this allocator.
  pub unsafe fn reallocate(
    &mut self,
    ptr: *mut u8,
    size: usize,
  ) -> *mut u8 {
    if ptr.is_null() {
      return self.allocate(size);
    }

    let Some(wanted) = chunk::request_size(size) else {
      return ptr::null_mut();
    };

    unsafe {
      let chunk = self.resolve(ptr);
      let current = (*chunk.header(&self.directory)).size;

      if wanted <= current {
        self.shrink_in_place(chunk, wanted);
        return ptr;
      }

      if self.grow_in_place(chunk, wanted) {
        return ptr;
      }

      let fresh = self.allocate(size);
      if fresh.is_null() {
        return ptr::null_mut();
      }

      ptr::copy_nonoverlapping(ptr, fresh, current.min(size));
      self.release(ptr);

      fresh
    }
  }

  /// Gives an allocation back. Null is ignored, and so is a second release
  /// of the same allocation.
  ///
  /// # Safety
  /// `ptr` must be null or an allocation from this allocator.
  pub unsafe fn release(
    &mut self,
    ptr: *mut u8,
  ) {
    if ptr.is_null() {
      return;
    }

    unsafe {
      let chunk = self.resolve(ptr);
      let header = chunk.header(&self.directory);

      if (*header).is_free() {
        warn!("ignoring release of already free allocation {:?}", ptr);
        return;
      }

      (*header).set_free(true);
      self.live -= 1;

      self.coalesce_and_index(chunk);
    }
  }

  /// Bytes usable at `ptr`, which may exceed what was requested.
  ///
  /// # Safety
  /// `ptr` must be a live allocation from this allocator.
  pub unsafe fn usable_size(
    &self,
    ptr: *mut u8,
  ) -> usize {
    unsafe { (*ChunkHeader::from_payload(ptr)).size }
  }

  pub fn stats(&self) -> AllocatorStats {
    let free_bytes = unsafe { self.free.iter(&self.directory) }
      .map(|chunk| unsafe { (*chunk.header(&self.directory)).size })
      .sum();

    AllocatorStats {
      pages: self.directory.len(),
      mapped_bytes: self.directory.iter().map(|(_, page)| page.size).sum(),
      live_allocations: self.live,
      free_chunks: self.free.len(),
      free_bytes,
    }
  }

  /// The directory record of the page holding `ptr`.
  ///
  /// # Safety
  /// `ptr` must be a live allocation from this allocator.
  pub unsafe fn page_of(
    &self,
    ptr: *mut u8,
  ) -> Option<&PageRecord> {
    let chunk = unsafe { self.resolve(ptr) };
    self.directory.get(chunk.page)
  }

  /// Maps a page able to hold `minimum_user_bytes` and indexes its single
  /// free chunk.
  fn acquire_page(
    &mut self,
    minimum_user_bytes: usize,
  ) -> Result<ChunkRef> {
    let needed = minimum_user_bytes
      .checked_add(FIXED_OVERHEAD)
      .ok_or(Error::Overflow(minimum_user_bytes))?;

    let (base, size, page_type) = self.map_page(needed, self.catalog.best_for(needed))?;

    let record = PageRecord {
      base: base.as_ptr() as usize,
      size,
      page_type,
      head: FIRST_CHUNK,
      tail: FIRST_CHUNK,
      in_use: true,
    };

    let default_page = *self.catalog.default_page();
    let slot = match self.directory.insert(&mut self.source, &default_page, record) {
      Ok(slot) => slot,
      Err(err) => {
        unsafe { self.source.unmap(base, size) };
        return Err(err);
      }
    };

    let chunk = unsafe { page::format(base, slot, size) };
    unsafe { self.free.push(&self.directory, chunk) };

    debug!(
      "mapped page {} at {:?}: {} bytes of {}-byte pages",
      slot, base, size, self.catalog.entries()[page_type].byte_size
    );

    Ok(chunk)
  }

  /// Maps the smallest multiple of the chosen page type covering `needed`.
  fn map_page(
    &mut self,
    needed: usize,
    page_type: usize,
  ) -> Result<(NonNull<u8>, usize, usize)> {
    let entry = self.catalog.entries()[page_type];
    let len = round_up_multiple(needed, entry.byte_size).ok_or(Error::Overflow(needed))?;

    match unsafe { self.source.map(len, &entry) } {
      Ok(base) => Ok((base, len, page_type)),
      Err(err) if !entry.is_default && self.huge_page_fallback => {
        warn!("{}; falling back to default pages", err);

        let fallback = self.catalog.default_index();
        let entry = self.catalog.entries()[fallback];
        let len = round_up_multiple(needed, entry.byte_size).ok_or(Error::Overflow(needed))?;
        let base = unsafe { self.source.map(len, &entry) }?;

        Ok((base, len, fallback))
      }
      Err(err) => Err(err),
    }
  }

  /// Takes `chunk` out of the free index, splits off what `size` leaves
  /// over and hands out the payload.
  unsafe fn claim(
    &mut self,
    chunk: ChunkRef,
    size: usize,
  ) -> *mut u8 {
    unsafe {
      self.free.unlink(&self.directory, chunk);

      if let Some(rest) = page::split(&mut self.directory, chunk, size) {
        self.free.push(&self.directory, rest);
      }

      let header = chunk.header(&self.directory);
      (*header).set_free(false);
      self.live += 1;

      ChunkHeader::payload(header)
    }
  }

  /// Merges the free `chunk` with free neighbours and indexes the result.
  unsafe fn coalesce_and_index(
    &mut self,
    chunk: ChunkRef,
  ) {
    unsafe {
      if let Some(next) = page::next_in_page(&self.directory, chunk) {
        if (*next.header(&self.directory)).is_free() {
          self.free.unlink(&self.directory, next);
          page::absorb_next(&mut self.directory, chunk);
        }
      }

      if let Some(prev) = page::prev_in_page(&self.directory, chunk) {
        if (*prev.header(&self.directory)).is_free() {
          // prev is indexed already and keeps its place
          page::absorb_next(&mut self.directory, prev);
          return;
        }
      }

      self.free.push(&self.directory, chunk);
    }
  }

  unsafe fn shrink_in_place(
    &mut self,
    chunk: ChunkRef,
    size: usize,
  ) {
    unsafe {
      if let Some(rest) = page::split(&mut self.directory, chunk, size) {
        self.coalesce_and_index(rest);
      }
    }
  }

  unsafe fn grow_in_place(
    &mut self,
    chunk: ChunkRef,
    size: usize,
  ) -> bool {
    unsafe {
      let Some(next) = page::next_in_page(&self.directory, chunk) else {
        return false;
      };

      let next_header = next.header(&self.directory);
      if !(*next_header).is_free() {
        return false;
      }

      let available = (*chunk.header(&self.directory)).size + (*next_header).span();
      if available < size {
        return false;
      }

      self.free.unlink(&self.directory, next);
      page::absorb_next(&mut self.directory, chunk);
      self.shrink_in_place(chunk, size);

      true
    }
  }

  /// The chunk whose payload starts at `ptr`.
  unsafe fn resolve(
    &self,
    ptr: *mut u8,
  ) -> ChunkRef {
    unsafe {
      let header = ChunkHeader::from_payload(ptr);
      debug_assert!(
        (*header).is_valid(),
        "{ptr:?} was not handed out by this allocator"
      );

      let slot = (*header).page();
      let page = self.directory.get(slot);
      debug_assert!(page.is_some_and(|p| p.contains(header as usize)
        && (*(p.base as *const PageHeader)).belongs_to(slot)));

      ChunkRef::new(slot, header as usize - page.map_or(0, |p| p.base))
    }
  }
}

impl<S: PageSource> Drop for PageAllocator<S> {
  fn drop(&mut self) {
    let mut unmapped = self.directory.backing_len();

    for slot in 0..self.directory.capacity() {
      let Some(record) = self.directory.remove(slot) else {
        continue;
      };

      if let Some(base) = NonNull::new(record.base as *mut u8) {
        unsafe { self.source.unmap(base, record.size) };
        unmapped += record.size;
      }
    }

    unsafe { self.directory.release_backing(&mut self.source) };

    debug!("allocator dropped, {} bytes unmapped", unmapped);
  }
}
