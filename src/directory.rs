//! Registry of every page the allocator has mapped.
//!
//! The slot table lives in its own anonymous mapping of default pages and
//! grows one default page at a time. Growth may move the table; slot ids do
//! not change.
//!
//! ```text
//!   backing mapping (default pages)
//!   ┌──────────┬──────────┬──────────┬─────┬──────────┐
//!   │ slot 0   │ slot 1   │ slot 2   │ ... │ slot n-1 │
//!   │ in_use   │ vacant   │ in_use   │     │ vacant   │
//!   └────┬─────┴──────────┴────┬─────┴─────┴──────────┘
//!        ▼                     ▼
//!     page A                page C
//! ```

use std::{mem, ptr::NonNull, slice};

use log::debug;

use crate::{error::Result, os::PageSource, page_type::PageTypeEntry};

/// Bookkeeping for one mapped page.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRecord {
  pub base: usize,
  pub size: usize,
  /// Index into the allocator's page type catalog.
  pub page_type: usize,
  /// Offset of the first chunk from `base`.
  pub head: usize,
  /// Offset of the last chunk from `base`.
  pub tail: usize,
  pub in_use: bool,
}

impl PageRecord {
  pub const VACANT: PageRecord = PageRecord {
    base: 0,
    size: 0,
    page_type: 0,
    head: 0,
    tail: 0,
    in_use: false,
  };

  pub fn contains(
    &self,
    address: usize,
  ) -> bool {
    self.in_use && address >= self.base && address < self.base + self.size
  }
}

pub struct PageDirectory {
  slots: Option<NonNull<PageRecord>>,
  capacity: usize,
  backing_len: usize,
  live: usize,
}

impl PageDirectory {
  pub fn new() -> Self {
    Self {
      slots: None,
      capacity: 0,
      backing_len: 0,
      live: 0,
    }
  }

  /// Stores `record` in a vacant slot and returns the slot id, growing the
  /// table by one `default_page` when every slot is taken.
  pub fn insert<S: PageSource>(
    &mut self,
    source: &mut S,
    default_page: &PageTypeEntry,
    record: PageRecord,
  ) -> Result<usize> {
    let slot = match self.slots().iter().position(|r| !r.in_use) {
      Some(slot) => slot,
      None => {
        let slot = self.capacity;
        self.grow(source, default_page)?;
        slot
      }
    };

    self.slots_mut()[slot] = PageRecord {
      in_use: true,
      ..record
    };
    self.live += 1;

    Ok(slot)
  }

  /// Vacates `slot` and hands back the record it held.
  pub fn remove(
    &mut self,
    slot: usize,
  ) -> Option<PageRecord> {
    let record = *self.get(slot)?;
    self.slots_mut()[slot] = PageRecord::VACANT;
    self.live -= 1;
    Some(record)
  }

  pub fn get(
    &self,
    slot: usize,
  ) -> Option<&PageRecord> {
    self.slots().get(slot).filter(|r| r.in_use)
  }

  pub fn get_mut(
    &mut self,
    slot: usize,
  ) -> Option<&mut PageRecord> {
    self.slots_mut().get_mut(slot).filter(|r| r.in_use)
  }

  /// Live pages with their slot ids.
  pub fn iter(&self) -> impl Iterator<Item = (usize, &PageRecord)> {
    self.slots().iter().enumerate().filter(|(_, r)| r.in_use)
  }

  /// Number of live pages.
  pub fn len(&self) -> usize {
    self.live
  }

  /// Number of slots, live or vacant.
  pub fn capacity(&self) -> usize {
    self.capacity
  }

  /// Bytes mapped for the slot table itself.
  pub fn backing_len(&self) -> usize {
    self.backing_len
  }

  /// Unmaps the slot table. Every slot is forgotten, the pages they
  /// describe are not touched.
  ///
  /// # Safety
  /// `source` must be the source the table was grown from.
  pub unsafe fn release_backing<S: PageSource>(
    &mut self,
    source: &mut S,
  ) {
    if let Some(slots) = self.slots.take() {
      unsafe { source.unmap(slots.cast(), self.backing_len) };
    }
    self.capacity = 0;
    self.backing_len = 0;
    self.live = 0;
  }

  fn grow<S: PageSource>(
    &mut self,
    source: &mut S,
    default_page: &PageTypeEntry,
  ) -> Result<()> {
    let new_len = self.backing_len + default_page.byte_size;

    let backing = unsafe {
      match self.slots {
        None => source.map(new_len, default_page)?,
        Some(slots) => source.remap(slots.cast(), self.backing_len, new_len)?,
      }
    };

    let old_capacity = self.capacity;
    self.slots = Some(backing.cast());
    self.backing_len = new_len;
    self.capacity = new_len / mem::size_of::<PageRecord>();
    self.slots_mut()[old_capacity..].fill(PageRecord::VACANT);

    debug!(
      "page directory grew to {} bytes, {} slots at {:?}",
      new_len, self.capacity, backing
    );

    Ok(())
  }

  fn slots(&self) -> &[PageRecord] {
    match self.slots {
      Some(slots) => unsafe { slice::from_raw_parts(slots.as_ptr(), self.capacity) },
      None => &[],
    }
  }

  fn slots_mut(&mut self) -> &mut [PageRecord] {
    match self.slots {
      Some(slots) => unsafe { slice::from_raw_parts_mut(slots.as_ptr(), self.capacity) },
      None => &mut [],
    }
  }
}

impl Default for PageDirectory {
  fn default() -> Self {
    Self::new()
  }
}
