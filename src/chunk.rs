use std::mem;

use crate::{align, directory::PageDirectory};

/// Offset sentinel for "no neighbour".
const NIL: usize = usize::MAX;

const STATE_FREE: u32 = 0x4652_4545;
const STATE_USED: u32 = 0x5553_4544;

pub const CHUNK_HEADER_SIZE: usize = mem::size_of::<ChunkHeader>();

/// Smallest payload a chunk may have: a free chunk keeps its free-list
/// links in its own payload.
pub const MIN_PAYLOAD: usize = mem::size_of::<FreeLinks>();

/// A chunk is split only when its surplus exceeds this, so the remainder
/// holds a header and more than the minimal payload.
pub const SPLIT_THRESHOLD: usize = CHUNK_HEADER_SIZE + MIN_PAYLOAD;

/// A chunk, named by the directory slot of its page and the byte offset of
/// its header from the page base.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRef {
  pub page: usize,
  pub offset: usize,
}

impl ChunkRef {
  pub fn new(
    page: usize,
    offset: usize,
  ) -> Self {
    Self { page, offset }
  }

  /// # Safety
  /// `self.page` must be a live slot of `directory`.
  pub unsafe fn header(
    self,
    directory: &PageDirectory,
  ) -> *mut ChunkHeader {
    let page = directory.get(self.page);
    debug_assert!(page.is_some(), "chunk {self:?} points at a vacant slot");
    let base = page.map_or(0, |p| p.base);
    (base + self.offset) as *mut ChunkHeader
  }
}

/// Header written immediately before every user region.
///
/// ```text
///   ┌──────┬──────┬───────┬─────────────┬─────────────┐
///   │ size │ page │ state │ prev offset │ next offset │   32 bytes
///   └──────┴──────┴───────┴─────────────┴─────────────┘
/// ```
#[repr(C, align(16))]
pub struct ChunkHeader {
  /// Payload bytes, header excluded.
  pub size: usize,
  page: u32,
  state: u32,
  prev: usize,
  next: usize,
}

impl ChunkHeader {
  pub fn new(
    size: usize,
    page: usize,
    prev: Option<usize>,
    next: Option<usize>,
  ) -> Self {
    Self {
      size,
      page: page as u32,
      state: STATE_FREE,
      prev: prev.unwrap_or(NIL),
      next: next.unwrap_or(NIL),
    }
  }

  pub fn page(&self) -> usize {
    self.page as usize
  }

  pub fn is_free(&self) -> bool {
    self.state == STATE_FREE
  }

  /// Whether the state tag is one this allocator writes.
  pub fn is_valid(&self) -> bool {
    self.state == STATE_FREE || self.state == STATE_USED
  }

  pub fn set_free(
    &mut self,
    free: bool,
  ) {
    self.state = if free { STATE_FREE } else { STATE_USED };
  }

  /// Offset of the previous chunk in address order.
  pub fn prev(&self) -> Option<usize> {
    (self.prev != NIL).then_some(self.prev)
  }

  /// Offset of the next chunk in address order.
  pub fn next(&self) -> Option<usize> {
    (self.next != NIL).then_some(self.next)
  }

  pub fn set_prev(
    &mut self,
    offset: Option<usize>,
  ) {
    self.prev = offset.unwrap_or(NIL);
  }

  pub fn set_next(
    &mut self,
    offset: Option<usize>,
  ) {
    self.next = offset.unwrap_or(NIL);
  }

  /// Bytes the chunk spans, header included.
  pub fn span(&self) -> usize {
    CHUNK_HEADER_SIZE + self.size
  }

  /// # Safety
  /// `header` must point at a chunk header inside a mapped page.
  pub unsafe fn payload(header: *mut ChunkHeader) -> *mut u8 {
    unsafe { (header as *mut u8).add(CHUNK_HEADER_SIZE) }
  }

  /// # Safety
  /// `payload` must have been returned by [`payload`](Self::payload).
  pub unsafe fn from_payload(payload: *mut u8) -> *mut ChunkHeader {
    unsafe { payload.sub(CHUNK_HEADER_SIZE) as *mut ChunkHeader }
  }

  /// Free-list links of a free chunk.
  ///
  /// # Safety
  /// `header` must point at a free chunk header inside a mapped page.
  pub unsafe fn links(header: *mut ChunkHeader) -> *mut FreeLinks {
    unsafe { Self::payload(header) as *mut FreeLinks }
  }
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct Link {
  page: usize,
  offset: usize,
}

impl Link {
  const NONE: Link = Link {
    page: NIL,
    offset: NIL,
  };

  fn get(self) -> Option<ChunkRef> {
    (self.page != NIL).then_some(ChunkRef::new(self.page, self.offset))
  }
}

impl From<Option<ChunkRef>> for Link {
  fn from(chunk: Option<ChunkRef>) -> Self {
    chunk.map_or(Link::NONE, |c| Link {
      page: c.page,
      offset: c.offset,
    })
  }
}

/// Free-chunk index links, stored at the start of a free chunk's payload.
#[repr(C)]
pub struct FreeLinks {
  prev: Link,
  next: Link,
}

impl FreeLinks {
  pub fn new(
    prev: Option<ChunkRef>,
    next: Option<ChunkRef>,
  ) -> Self {
    Self {
      prev: prev.into(),
      next: next.into(),
    }
  }

  pub fn prev(&self) -> Option<ChunkRef> {
    self.prev.get()
  }

  pub fn next(&self) -> Option<ChunkRef> {
    self.next.get()
  }

  pub fn set_prev(
    &mut self,
    chunk: Option<ChunkRef>,
  ) {
    self.prev = chunk.into();
  }

  pub fn set_next(
    &mut self,
    chunk: Option<ChunkRef>,
  ) {
    self.next = chunk.into();
  }
}

/// Payload size a request of `size` bytes occupies, or `None` when `size`
/// is beyond `isize::MAX` (a negative C size lands there).
pub fn request_size(size: usize) -> Option<usize> {
  if size > isize::MAX as usize {
    return None;
  }

  Some(align!(size).max(MIN_PAYLOAD))
}
