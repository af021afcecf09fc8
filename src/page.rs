//! Laying out chunks inside a page.
//!
//! ```text
//!   base
//!   ▼
//!   ┌────────┬────────┬─────────┬────────┬─────────┬────────┬──────────────┐
//!   │ Page   │ Chunk  │ payload │ Chunk  │ payload │ Chunk  │   payload    │
//!   │ Header │ Header │  (used) │ Header │  (free) │ Header │    (used)    │
//!   └────────┴────────┴─────────┴────────┴─────────┴────────┴──────────────┘
//!            head ◄──────────────► ◄────────────────► tail
//!                     prev/next offsets, address order
//! ```

use std::{mem, ptr::NonNull};

use log::trace;

use crate::{
  chunk::{CHUNK_HEADER_SIZE, ChunkHeader, ChunkRef, SPLIT_THRESHOLD},
  directory::PageDirectory,
};

const PAGE_MAGIC: usize = 0x7061_6765_616c_6c63;

/// Written at the base of every page.
#[repr(C, align(16))]
pub struct PageHeader {
  slot: usize,
  magic: usize,
}

impl PageHeader {
  /// Whether this is a formatted page registered under `slot`.
  pub fn belongs_to(
    &self,
    slot: usize,
  ) -> bool {
    self.magic == PAGE_MAGIC && self.slot == slot
  }
}

pub const PAGE_HEADER_SIZE: usize = mem::size_of::<PageHeader>();

/// What a page needs beyond the user bytes: its own header plus the header
/// of the chunk handed out and of the remainder split off after it.
pub const FIXED_OVERHEAD: usize = PAGE_HEADER_SIZE + 2 * CHUNK_HEADER_SIZE;

/// Offset of the first chunk in every page.
pub const FIRST_CHUNK: usize = PAGE_HEADER_SIZE;

/// Writes the page header and one free chunk covering the rest of the page.
///
/// # Safety
/// `base` must point at `size` writable bytes, with
/// `size >= PAGE_HEADER_SIZE + CHUNK_HEADER_SIZE + MIN_PAYLOAD`.
pub unsafe fn format(
  base: NonNull<u8>,
  slot: usize,
  size: usize,
) -> ChunkRef {
  unsafe {
    (base.as_ptr() as *mut PageHeader).write(PageHeader {
      slot,
      magic: PAGE_MAGIC,
    });

    let chunk = base.as_ptr().add(FIRST_CHUNK) as *mut ChunkHeader;
    chunk.write(ChunkHeader::new(
      size - FIRST_CHUNK - CHUNK_HEADER_SIZE,
      slot,
      None,
      None,
    ));
  }

  ChunkRef::new(slot, FIRST_CHUNK)
}

/// The chunk after `chunk` in address order.
///
/// # Safety
/// `chunk` must name a live chunk of `directory`.
pub unsafe fn next_in_page(
  directory: &PageDirectory,
  chunk: ChunkRef,
) -> Option<ChunkRef> {
  let header = unsafe { chunk.header(directory) };
  unsafe { (*header).next() }.map(|offset| ChunkRef::new(chunk.page, offset))
}

/// The chunk before `chunk` in address order.
///
/// # Safety
/// `chunk` must name a live chunk of `directory`.
pub unsafe fn prev_in_page(
  directory: &PageDirectory,
  chunk: ChunkRef,
) -> Option<ChunkRef> {
  let header = unsafe { chunk.header(directory) };
  unsafe { (*header).prev() }.map(|offset| ChunkRef::new(chunk.page, offset))
}

/// Shrinks `chunk` to `size` payload bytes and carves the surplus into a
/// new free chunk right after it, provided the surplus exceeds
/// [`SPLIT_THRESHOLD`]. Returns the new chunk, which is in no free list yet.
///
/// # Safety
/// `chunk` must name a live chunk of `directory` not linked into the free
/// index, and `size` must be a multiple of the alignment.
pub unsafe fn split(
  directory: &mut PageDirectory,
  chunk: ChunkRef,
  size: usize,
) -> Option<ChunkRef> {
  unsafe {
    let header = chunk.header(directory);
    let surplus = (*header).size.checked_sub(size)?;
    if surplus <= SPLIT_THRESHOLD {
      return None;
    }

    let rest = ChunkRef::new(chunk.page, chunk.offset + CHUNK_HEADER_SIZE + size);
    let old_next = (*header).next();

    rest.header(directory).write(ChunkHeader::new(
      surplus - CHUNK_HEADER_SIZE,
      chunk.page,
      Some(chunk.offset),
      old_next,
    ));

    (*header).size = size;
    (*header).set_next(Some(rest.offset));

    match old_next {
      Some(offset) => {
        let next = ChunkRef::new(chunk.page, offset).header(directory);
        (*next).set_prev(Some(rest.offset));
      }
      None => {
        if let Some(page) = directory.get_mut(chunk.page) {
          page.tail = rest.offset;
        }
      }
    }

    trace!(
      "split chunk {:?}: {} bytes kept, {} bytes at offset {}",
      chunk,
      size,
      surplus - CHUNK_HEADER_SIZE,
      rest.offset
    );

    Some(rest)
  }
}

/// Merges the chunk after `chunk` into it. The absorbed chunk must already
/// be out of the free index.
///
/// Returns `false` when `chunk` is the last chunk of its page.
///
/// # Safety
/// `chunk` must name a live chunk of `directory`.
pub unsafe fn absorb_next(
  directory: &mut PageDirectory,
  chunk: ChunkRef,
) -> bool {
  unsafe {
    let Some(victim) = next_in_page(directory, chunk) else {
      return false;
    };

    let header = chunk.header(directory);
    let absorbed = victim.header(directory);
    let after = (*absorbed).next();

    (*header).size += (*absorbed).span();
    (*header).set_next(after);

    match after {
      Some(offset) => {
        let next = ChunkRef::new(chunk.page, offset).header(directory);
        (*next).set_prev(Some(chunk.offset));
      }
      None => {
        if let Some(page) = directory.get_mut(chunk.page) {
          page.tail = chunk.offset;
        }
      }
    }

    trace!(
      "chunk {:?} absorbed offset {}, now {} bytes",
      chunk,
      victim.offset,
      (*header).size
    );

    true
  }
}

/// Every chunk of the page in `slot`, in address order.
///
/// # Safety
/// `slot` must be live in `directory` and its chunks must stay in place
/// while the iterator is used.
#[cfg(test)]
pub unsafe fn chunks(
  directory: &PageDirectory,
  slot: usize,
) -> impl Iterator<Item = ChunkRef> + '_ {
  let mut current = directory
    .get(slot)
    .map(|page| ChunkRef::new(slot, page.head));

  std::iter::from_fn(move || {
    let chunk = current?;
    current = unsafe { next_in_page(directory, chunk) };
    Some(chunk)
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    chunk::MIN_PAYLOAD,
    directory::PageRecord,
    os::{MmapSource, PageSource, host_page_size},
    page_type::PageTypeEntry,
  };

  struct Fixture {
    source: MmapSource,
    directory: PageDirectory,
    base: NonNull<u8>,
    size: usize,
    head: ChunkRef,
  }

  impl Fixture {
    fn new() -> Self {
      let mut source = MmapSource;
      let page = PageTypeEntry {
        byte_size: host_page_size(),
        selector: host_page_size().ilog2(),
        is_default: true,
      };
      let size = page.byte_size;
      let base = unsafe { source.map(size, &page) }.unwrap();

      let mut directory = PageDirectory::new();
      let slot = directory
        .insert(
          &mut source,
          &page,
          PageRecord {
            base: base.as_ptr() as usize,
            size,
            page_type: 0,
            head: FIRST_CHUNK,
            tail: FIRST_CHUNK,
            in_use: true,
          },
        )
        .unwrap();

      let head = unsafe { format(base, slot, size) };

      Self {
        source,
        directory,
        base,
        size,
        head,
      }
    }

    fn size_of(
      &self,
      chunk: ChunkRef,
    ) -> usize {
      unsafe { (*chunk.header(&self.directory)).size }
    }
  }

  impl Drop for Fixture {
    fn drop(&mut self) {
      unsafe {
        self.source.unmap(self.base, self.size);
        self.directory.release_backing(&mut self.source);
      }
    }
  }

  #[test]
  fn test_format() {
    let fixture = Fixture::new();

    let page_header = unsafe { &*(fixture.base.as_ptr() as *const PageHeader) };
    assert!(page_header.belongs_to(fixture.head.page));
    assert!(!page_header.belongs_to(fixture.head.page + 1));

    assert_eq!(fixture.head.offset, FIRST_CHUNK);
    assert_eq!(
      fixture.size_of(fixture.head),
      fixture.size - PAGE_HEADER_SIZE - CHUNK_HEADER_SIZE
    );

    unsafe {
      let header = fixture.head.header(&fixture.directory);
      assert!((*header).is_free());
      assert_eq!(
        ChunkHeader::payload(header) as usize % crate::align::ALIGNMENT,
        0
      );
      assert!(next_in_page(&fixture.directory, fixture.head).is_none());
      assert!(prev_in_page(&fixture.directory, fixture.head).is_none());
    }
  }

  #[test]
  fn test_split_links_remainder() {
    let mut fixture = Fixture::new();
    let total = fixture.size_of(fixture.head);

    let rest = unsafe { split(&mut fixture.directory, fixture.head, 64) }.unwrap();

    assert_eq!(rest.offset, FIRST_CHUNK + CHUNK_HEADER_SIZE + 64);
    assert_eq!(fixture.size_of(fixture.head), 64);
    assert_eq!(fixture.size_of(rest), total - 64 - CHUNK_HEADER_SIZE);

    unsafe {
      assert_eq!(next_in_page(&fixture.directory, fixture.head), Some(rest));
      assert_eq!(prev_in_page(&fixture.directory, rest), Some(fixture.head));
      assert!((*rest.header(&fixture.directory)).is_free());
    }
    assert_eq!(fixture.directory.get(rest.page).unwrap().tail, rest.offset);
  }

  #[test]
  fn test_split_in_the_middle_relinks_successor() {
    let mut fixture = Fixture::new();

    let tail = unsafe { split(&mut fixture.directory, fixture.head, 256) }.unwrap();
    let middle = unsafe { split(&mut fixture.directory, fixture.head, 64) }.unwrap();

    unsafe {
      assert_eq!(next_in_page(&fixture.directory, fixture.head), Some(middle));
      assert_eq!(next_in_page(&fixture.directory, middle), Some(tail));
      assert_eq!(prev_in_page(&fixture.directory, tail), Some(middle));
    }
    assert_eq!(fixture.size_of(middle), 256 - 64 - CHUNK_HEADER_SIZE);
    assert_eq!(fixture.directory.get(tail.page).unwrap().tail, tail.offset);
  }

  #[test]
  fn test_split_below_threshold_keeps_chunk_whole() {
    let mut fixture = Fixture::new();
    let total = fixture.size_of(fixture.head);

    let keep = total - SPLIT_THRESHOLD + 16;
    assert!(unsafe { split(&mut fixture.directory, fixture.head, keep) }.is_none());
    assert_eq!(fixture.size_of(fixture.head), total);

    // a surplus of exactly one header plus the minimal payload stays put
    let keep = total - SPLIT_THRESHOLD;
    assert!(unsafe { split(&mut fixture.directory, fixture.head, keep) }.is_none());
    assert_eq!(fixture.size_of(fixture.head), total);

    let keep = total - SPLIT_THRESHOLD - 16;
    let rest = unsafe { split(&mut fixture.directory, fixture.head, keep) }.unwrap();
    assert_eq!(fixture.size_of(rest), MIN_PAYLOAD + 16);
  }

  #[test]
  fn test_chunks_walks_address_order() {
    let mut fixture = Fixture::new();

    let tail = unsafe { split(&mut fixture.directory, fixture.head, 256) }.unwrap();
    let middle = unsafe { split(&mut fixture.directory, fixture.head, 64) }.unwrap();

    let walked: Vec<ChunkRef> = unsafe { chunks(&fixture.directory, fixture.head.page) }.collect();
    assert_eq!(walked, vec![fixture.head, middle, tail]);

    let spans: usize = walked
      .iter()
      .map(|&c| unsafe { (*c.header(&fixture.directory)).span() })
      .sum();
    assert_eq!(spans + PAGE_HEADER_SIZE, fixture.size);
  }

  #[test]
  fn test_absorb_next_restores_span() {
    let mut fixture = Fixture::new();
    let total = fixture.size_of(fixture.head);

    let tail = unsafe { split(&mut fixture.directory, fixture.head, 256) }.unwrap();
    unsafe { split(&mut fixture.directory, fixture.head, 64) }.unwrap();

    assert!(unsafe { absorb_next(&mut fixture.directory, fixture.head) });
    assert_eq!(fixture.size_of(fixture.head), 256);
    unsafe {
      assert_eq!(next_in_page(&fixture.directory, fixture.head), Some(tail));
      assert_eq!(prev_in_page(&fixture.directory, tail), Some(fixture.head));
    }

    assert!(unsafe { absorb_next(&mut fixture.directory, fixture.head) });
    assert_eq!(fixture.size_of(fixture.head), total);
    assert_eq!(fixture.directory.get(fixture.head.page).unwrap().tail, FIRST_CHUNK);

    assert!(!unsafe { absorb_next(&mut fixture.directory, fixture.head) });
  }
}
