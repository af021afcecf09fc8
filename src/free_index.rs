//! Cross-page list of free chunks.
//!
//! The links live inside the free chunks themselves, so the index costs no
//! memory of its own beyond its head. Order carries no meaning; new chunks
//! go in at the front.
//!
//! ```text
//!     page 0                    page 3                  page 1
//!   ┌──────────────┐          ┌──────────────┐        ┌──────────────┐
//!   │ free (0,528) │◄────────►│ free (3,16)  │◄──────►│ free (1,96)  │
//!   └──────────────┘          └──────────────┘        └──────────────┘
//!          ▲
//!         head
//! ```

use log::trace;

use crate::{
  chunk::{ChunkHeader, ChunkRef, FreeLinks},
  directory::PageDirectory,
};

#[derive(Debug, Default)]
pub struct FreeIndex {
  head: Option<ChunkRef>,
  len: usize,
}

impl FreeIndex {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn len(&self) -> usize {
    self.len
  }

  /// Links `chunk` in at the front.
  ///
  /// # Safety
  /// `chunk` must be a live free chunk of `directory` that is not already
  /// in the index.
  pub unsafe fn push(
    &mut self,
    directory: &PageDirectory,
    chunk: ChunkRef,
  ) {
    unsafe {
      let header = chunk.header(directory);
      debug_assert!((*header).is_free());

      ChunkHeader::links(header).write(FreeLinks::new(None, self.head));

      if let Some(head) = self.head {
        (*ChunkHeader::links(head.header(directory))).set_prev(Some(chunk));
      }
    }

    self.head = Some(chunk);
    self.len += 1;
  }

  /// Takes `chunk` out of the index.
  ///
  /// # Safety
  /// `chunk` must currently be in the index.
  pub unsafe fn unlink(
    &mut self,
    directory: &PageDirectory,
    chunk: ChunkRef,
  ) {
    unsafe {
      let links = ChunkHeader::links(chunk.header(directory));
      let prev = (*links).prev();
      let next = (*links).next();

      match prev {
        Some(prev) => (*ChunkHeader::links(prev.header(directory))).set_next(next),
        None => self.head = next,
      }

      if let Some(next) = next {
        (*ChunkHeader::links(next.header(directory))).set_prev(prev);
      }
    }

    self.len -= 1;
  }

  /// The first free chunk with at least `size` payload bytes.
  ///
  /// # Safety
  /// Every chunk in the index must be live in `directory`.
  pub unsafe fn first_fit(
    &self,
    directory: &PageDirectory,
    size: usize,
  ) -> Option<ChunkRef> {
    let mut current = self.head;
    let mut visited = 0;

    while let Some(chunk) = current {
      let header = unsafe { chunk.header(directory) };

      if unsafe { (*header).size } >= size {
        trace!("first fit for {} bytes: {:?} after {} probes", size, chunk, visited);
        return Some(chunk);
      }

      visited += 1;
      current = unsafe { (*ChunkHeader::links(header)).next() };
    }

    None
  }

  /// Walks the index front to back.
  ///
  /// # Safety
  /// Every chunk in the index must stay live while the iterator is used.
  pub unsafe fn iter<'a>(
    &self,
    directory: &'a PageDirectory,
  ) -> impl Iterator<Item = ChunkRef> + 'a {
    let mut current = self.head;

    std::iter::from_fn(move || {
      let chunk = current?;
      current = unsafe { (*ChunkHeader::links(chunk.header(directory))).next() };
      Some(chunk)
    })
  }
}
