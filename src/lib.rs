//! # pagealloc - A Page-Tiered Chunk Allocator
//!
//! This crate provides a `malloc`/`realloc`/`free` style allocator that maps
//! memory straight from the kernel with `mmap(2)`, choosing between the
//! default page size and every huge page size the host offers, and carves
//! those pages into chunks.
//!
//! ## Overview
//!
//! ```text
//!   Page Tiers:
//!
//!   ┌──────────────────────────────────────────────────────────────────────┐
//!   │  PageTypeCatalog   4 KiB (default)  │  2 MiB (huge)  │  1 GiB (huge) │
//!   └──────────────────────────────────────────────────────────────────────┘
//!                 │ best_for(request + overhead)
//!                 ▼
//!   ┌──────────────────────────────────────────────────────────────────────┐
//!   │  PageDirectory   slot 0 ─► page   slot 1 ─► page   slot 2 ─► page    │
//!   └──────────────────────────────────────────────────────────────────────┘
//!                 │
//!                 ▼
//!   ┌─────┬──────┬─────────┬──────┬─────────┬──────┬────────────────────┐
//!   │ Pg  │ Hdr  │  used   │ Hdr  │  free   │ Hdr  │        free        │
//!   └─────┴──────┴─────────┴──────┴────┬────┴──────┴─────────┬──────────┘
//!                                      │     FreeIndex       │
//!                                      └────────◄───────────►┘──► other pages
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   pagealloc
//!   ├── align       - Alignment macros (align!, align_to!)
//!   ├── allocator   - PageAllocator: allocate / reallocate / release
//!   ├── chunk       - Chunk header and free-list links (internal)
//!   ├── config      - AllocatorConfig
//!   ├── directory   - PageDirectory, the registry of mapped pages
//!   ├── error       - Error and Result
//!   ├── free_index  - Cross-page list of free chunks (internal)
//!   ├── os          - PageSource trait and the mmap-backed source
//!   ├── page        - Page header, splitting and merging chunks (internal)
//!   └── page_type   - PageTypeCatalog, host page size discovery
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pagealloc::{AllocatorConfig, PageAllocator};
//!
//! fn main() -> Result<(), pagealloc::Error> {
//!     let mut allocator = PageAllocator::with_config(&AllocatorConfig::default())?;
//!
//!     let ptr = allocator.allocate(64) as *mut u64;
//!     assert!(!ptr.is_null());
//!
//!     unsafe {
//!         *ptr = 42;
//!         let ptr = allocator.reallocate(ptr as *mut u8, 4096) as *mut u64;
//!         assert_eq!(*ptr, 42);
//!         allocator.release(ptr as *mut u8);
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! ## How It Works
//!
//! A request is rounded up to 16 bytes and looked up first-fit in the free
//! index. On a miss the allocator maps a new page: the largest page type
//! not bigger than the request plus its headers, repeated as often as
//! needed to cover it. A chunk larger than the request is split when the
//! leftover can hold a header and a minimal payload.
//!
//! ```text
//!   Single Allocation:
//!   ┌───────────────────────┬────────────────────────────────┐
//!   │    Chunk Header       │         User Data              │
//!   │  ┌─────────────────┐  │                                │
//!   │  │ size: N         │  │  ┌──────────────────────────┐  │
//!   │  │ page slot       │  │  │                          │  │
//!   │  │ state           │  │  │     N bytes usable       │  │
//!   │  │ prev/next offs  │  │  │                          │  │
//!   │  └─────────────────┘  │  └──────────────────────────┘  │
//!   │      32 bytes         │                                │
//!   └───────────────────────┴────────────────────────────────┘
//!                           ▲
//!                           └── Pointer returned to user
//! ```
//!
//! Releasing a chunk merges it with free neighbours in the same page, so
//! no two free chunks are ever adjacent.
//!
//! ## Limitations
//!
//! - **Single-threaded only**: No synchronization primitives
//! - **Pages are kept**: Memory goes back to the kernel only when the allocator is dropped
//! - **Linux-only**: Relies on `mremap`, `MAP_HUGETLB` and `/sys/kernel/mm/hugepages`
//!
//! ## Safety
//!
//! Releasing or resizing requires `unsafe`: the pointer must come from the
//! same allocator. Double releases are detected and ignored; foreign
//! pointers are undefined behaviour.

pub mod align;
mod allocator;
mod chunk;
pub mod config;
mod directory;
mod error;
mod free_index;
pub mod os;
mod page;
mod page_type;

pub use allocator::{AllocatorStats, PageAllocator};
pub use config::AllocatorConfig;
pub use directory::PageRecord;
pub use error::{Error, Result};
pub use os::{MmapSource, PageSource};
pub use page::FIXED_OVERHEAD;
pub use page_type::{PageTypeCatalog, PageTypeEntry};
