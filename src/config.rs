use std::path::PathBuf;

/// Where the kernel lists the huge page sizes it supports.
pub const HUGEPAGE_REGISTRY: &str = "/sys/kernel/mm/hugepages";

/// Upper bound on page types, the default page included.
pub const MAX_PAGE_TYPES: usize = 10;

/// Settings used to build a [`PageTypeCatalog`](crate::PageTypeCatalog).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocatorConfig {
  /// Directory holding one `hugepages-<N>kB` entry per huge page size.
  pub hugepage_registry: PathBuf,
  /// Maximum number of page types the catalog accepts.
  pub max_page_types: usize,
  /// When `false` the registry is not consulted and only default pages are mapped.
  pub huge_pages: bool,
  /// Map default pages instead when the kernel refuses a huge page mapping.
  /// Off by default: a refused mapping fails the request.
  pub huge_page_fallback: bool,
}

impl AllocatorConfig {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn hugepage_registry(
    mut self,
    path: impl Into<PathBuf>,
  ) -> Self {
    self.hugepage_registry = path.into();
    self
  }

  pub fn max_page_types(
    mut self,
    max: usize,
  ) -> Self {
    self.max_page_types = max;
    self
  }

  pub fn huge_pages(
    mut self,
    enabled: bool,
  ) -> Self {
    self.huge_pages = enabled;
    self
  }

  pub fn huge_page_fallback(
    mut self,
    enabled: bool,
  ) -> Self {
    self.huge_page_fallback = enabled;
    self
  }
}

impl Default for AllocatorConfig {
  fn default() -> Self {
    Self {
      hugepage_registry: PathBuf::from(HUGEPAGE_REGISTRY),
      max_page_types: MAX_PAGE_TYPES,
      huge_pages: true,
      huge_page_fallback: false,
    }
  }
}
