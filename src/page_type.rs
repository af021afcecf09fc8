//! Page size classes available on the host.
//!
//! ```text
//!   /sys/kernel/mm/hugepages
//!   ├── hugepages-1048576kB   ──►  1 GiB, selector 30
//!   └── hugepages-2048kB      ──►  2 MiB, selector 21
//!
//!   sysconf(_SC_PAGESIZE)     ──►  4 KiB, default page
//! ```
//!
//! The catalog is sorted ascending by size. Its first entry is always the
//! default page.

use std::{fs, path::Path, sync::OnceLock};

use log::debug;

use crate::{
  config::AllocatorConfig,
  error::{Error, Result},
  os,
};

const REGISTRY_PREFIX: &str = "hugepages-";
const REGISTRY_SUFFIX: &str = "kB";

/// One page size class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageTypeEntry {
  pub byte_size: usize,
  /// `log2(byte_size)`, the value `mmap` expects in the `MAP_HUGE_*` bits.
  pub selector: u32,
  pub is_default: bool,
}

impl PageTypeEntry {
  fn new(
    byte_size: usize,
    is_default: bool,
  ) -> Self {
    Self {
      byte_size,
      selector: byte_size.ilog2(),
      is_default,
    }
  }
}

/// Ordered list of the page types the allocator may map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageTypeCatalog {
  entries: Vec<PageTypeEntry>,
}

impl PageTypeCatalog {
  /// The catalog for this host, discovered on first use with the default
  /// [`AllocatorConfig`] and shared by the whole process afterwards.
  ///
  /// A failed discovery is not cached; the next call tries again.
  pub fn host() -> Result<&'static PageTypeCatalog> {
    static HOST: OnceLock<PageTypeCatalog> = OnceLock::new();

    if let Some(catalog) = HOST.get() {
      return Ok(catalog);
    }

    let catalog = Self::discover(&AllocatorConfig::default())?;
    Ok(HOST.get_or_init(|| catalog))
  }

  /// Builds a catalog from `config`, reading the huge page registry unless
  /// huge pages are disabled.
  pub fn discover(config: &AllocatorConfig) -> Result<Self> {
    let page_size = os::host_page_size();

    if !config.huge_pages {
      return Ok(Self::default_only(page_size));
    }

    Self::discover_in(&config.hugepage_registry, page_size, config.max_page_types)
  }

  /// Reads every `hugepages-<N>kB` entry under `registry`.
  pub fn discover_in(
    registry: &Path,
    default_page_size: usize,
    capacity: usize,
  ) -> Result<Self> {
    let unreadable = |source| Error::RegistryUnreadable {
      path: registry.to_path_buf(),
      source,
    };

    let mut sizes = Vec::new();
    for entry in fs::read_dir(registry).map_err(unreadable)? {
      let entry = entry.map_err(unreadable)?;
      let size = parse_registry_name(&entry.file_name().to_string_lossy());
      debug!("huge page registry entry {:?} -> {} bytes", entry.file_name(), size);
      sizes.push(size);
    }

    Self::from_sizes(default_page_size, &sizes, capacity)
  }

  /// Builds a catalog from a default page size and a list of huge page sizes.
  ///
  /// Sizes that are zero or not larger than the default page size are
  /// skipped, so the default page always comes first.
  pub fn from_sizes(
    default_page_size: usize,
    huge_sizes: &[usize],
    capacity: usize,
  ) -> Result<Self> {
    let mut entries = vec![PageTypeEntry::new(default_page_size, true)];

    for &size in huge_sizes {
      if size <= default_page_size {
        debug!("skipping page size {}, not above the default {}", size, default_page_size);
        continue;
      }
      entries.push(PageTypeEntry::new(size, false));
    }

    if entries.len() > capacity {
      return Err(Error::TooManyPageTypes {
        found: entries.len(),
        capacity,
      });
    }

    entries.sort_by_key(|entry| entry.byte_size);

    Ok(Self { entries })
  }

  /// A catalog holding only the default page.
  pub fn default_only(default_page_size: usize) -> Self {
    Self {
      entries: vec![PageTypeEntry::new(default_page_size, true)],
    }
  }

  pub fn entries(&self) -> &[PageTypeEntry] {
    &self.entries
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn get(
    &self,
    index: usize,
  ) -> Option<&PageTypeEntry> {
    self.entries.get(index)
  }

  /// Index of the default page type.
  pub fn default_index(&self) -> usize {
    self
      .entries
      .iter()
      .position(|entry| entry.is_default)
      .unwrap_or(0)
  }

  pub fn default_page(&self) -> &PageTypeEntry {
    &self.entries[self.default_index()]
  }

  /// Picks the page type for a page that must hold `minimum_bytes`.
  ///
  /// Returns the index of the largest type whose size does not exceed
  /// `minimum_bytes`, or the smallest type when `minimum_bytes` fits in it.
  /// A request larger than every type selects the largest one; the page is
  /// then mapped as a multiple of that size.
  pub fn best_for(
    &self,
    minimum_bytes: usize,
  ) -> usize {
    let mut best = 0;

    for (index, entry) in self.entries.iter().enumerate() {
      if entry.byte_size <= minimum_bytes {
        best = index;
      } else {
        break;
      }
    }

    best
  }
}

/// `hugepages-2048kB` -> `2097152`. Anything else yields zero.
fn parse_registry_name(name: &str) -> usize {
  name
    .strip_prefix(REGISTRY_PREFIX)
    .and_then(|rest| rest.strip_suffix(REGISTRY_SUFFIX))
    .and_then(|kb| kb.parse::<usize>().ok())
    .and_then(|kb| kb.checked_mul(1024))
    .unwrap_or(0)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::MAX_PAGE_TYPES;

  const KIB4: usize = 4096;
  const MIB2: usize = 2 << 20;
  const GIB1: usize = 1 << 30;

  fn registry(names: &[&str]) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    for name in names {
      fs::create_dir(dir.path().join(name)).unwrap();
    }
    dir
  }

  fn x86_catalog() -> PageTypeCatalog {
    PageTypeCatalog::from_sizes(KIB4, &[GIB1, MIB2], MAX_PAGE_TYPES).unwrap()
  }

  #[test]
  fn test_parse_registry_name() {
    assert_eq!(parse_registry_name("hugepages-2048kB"), MIB2);
    assert_eq!(parse_registry_name("hugepages-1048576kB"), GIB1);
    assert_eq!(parse_registry_name("hugepages-0kB"), 0);
    assert_eq!(parse_registry_name("hugepages-kB"), 0);
    assert_eq!(parse_registry_name("nr_overcommit"), 0);
  }

  #[test]
  fn test_discover_sorts_and_encodes_selectors() {
    let dir = registry(&["hugepages-1048576kB", "hugepages-2048kB"]);

    let catalog = PageTypeCatalog::discover_in(dir.path(), KIB4, MAX_PAGE_TYPES).unwrap();

    let sizes: Vec<usize> = catalog.entries().iter().map(|e| e.byte_size).collect();
    assert_eq!(sizes, vec![KIB4, MIB2, GIB1]);

    let selectors: Vec<u32> = catalog.entries().iter().map(|e| e.selector).collect();
    assert_eq!(selectors, vec![12, 21, 30]);

    assert!(catalog.entries()[0].is_default);
    assert_eq!(catalog.entries().iter().filter(|e| e.is_default).count(), 1);
  }

  #[test]
  fn test_discover_skips_zero_and_default_sized_entries() {
    let dir = registry(&["hugepages-4kB", "hugepages-0kB", "garbage", "hugepages-2048kB"]);

    let catalog = PageTypeCatalog::discover_in(dir.path(), KIB4, MAX_PAGE_TYPES).unwrap();

    assert_eq!(catalog.len(), 2);
    assert_eq!(catalog.entries()[1].byte_size, MIB2);
  }

  #[test]
  fn test_sizes_below_default_page_are_skipped() {
    let sizes = [KIB4, MIB2, 16 * 1024];

    let catalog = PageTypeCatalog::from_sizes(64 * 1024, &sizes, MAX_PAGE_TYPES).unwrap();

    let sizes: Vec<usize> = catalog.entries().iter().map(|e| e.byte_size).collect();
    assert_eq!(sizes, vec![64 * 1024, MIB2]);
    assert_eq!(catalog.default_index(), 0);
    assert_eq!(catalog.best_for(100), 0);
  }

  #[test]
  fn test_discover_missing_registry() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("hugepages");

    let err = PageTypeCatalog::discover_in(&missing, KIB4, MAX_PAGE_TYPES).unwrap_err();

    assert!(matches!(err, Error::RegistryUnreadable { ref path, .. } if *path == missing));
  }

  #[test]
  fn test_discover_over_capacity() {
    let dir = registry(&["hugepages-64kB", "hugepages-2048kB", "hugepages-1048576kB"]);

    let err = PageTypeCatalog::discover_in(dir.path(), KIB4, 3).unwrap_err();

    assert!(matches!(err, Error::TooManyPageTypes { found: 4, capacity: 3 }));
  }

  #[test]
  fn test_over_capacity_reports_every_size_found() {
    let sizes = [64 * 1024, MIB2, 32 * 1024 * 1024, GIB1, 16 * GIB1];

    let err = PageTypeCatalog::from_sizes(KIB4, &sizes, 3).unwrap_err();

    assert!(matches!(err, Error::TooManyPageTypes { found: 6, capacity: 3 }));
  }

  #[test]
  fn test_discover_with_huge_pages_disabled() {
    let config = AllocatorConfig::default()
      .hugepage_registry("/nonexistent/hugepages")
      .huge_pages(false);

    let catalog = PageTypeCatalog::discover(&config).unwrap();

    assert_eq!(catalog.len(), 1);
    assert!(catalog.default_page().is_default);
    assert_eq!(catalog.default_page().byte_size, os::host_page_size());
  }

  #[test]
  fn test_best_for_small_request_uses_default_page() {
    let catalog = x86_catalog();
    assert_eq!(catalog.best_for(1), 0);
    assert_eq!(catalog.best_for(KIB4 - 1), 0);
  }

  #[test]
  fn test_best_for_picks_largest_type_not_exceeding() {
    let catalog = x86_catalog();
    assert_eq!(catalog.best_for(KIB4 + 1), 0);
    assert_eq!(catalog.best_for(3_000_000), 1);
    assert_eq!(catalog.best_for(GIB1 - 1), 1);
  }

  #[test]
  fn test_best_for_exact_size_selects_that_type() {
    let catalog = x86_catalog();
    assert_eq!(catalog.best_for(KIB4), 0);
    assert_eq!(catalog.best_for(MIB2), 1);
    assert_eq!(catalog.best_for(GIB1), 2);
  }

  #[test]
  fn test_best_for_beyond_largest() {
    let catalog = x86_catalog();
    assert_eq!(catalog.best_for(usize::MAX), 2);
  }
}
