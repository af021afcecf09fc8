use std::{io, path::PathBuf};

/// Errors raised while building the page geometry or mapping memory.
#[derive(Debug, thiserror::Error)]
pub enum Error {
  #[error("cannot read huge page registry {}: {source}", .path.display())]
  RegistryUnreadable {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
  #[error("found {found} page types, more than the maximum of {capacity}")]
  TooManyPageTypes { found: usize, capacity: usize },
  #[error("mapping {len} bytes failed: {source}")]
  MapFailed {
    len: usize,
    #[source]
    source: io::Error,
  },
  #[error("remapping {old_len} to {new_len} bytes failed: {source}")]
  RemapFailed {
    old_len: usize,
    new_len: usize,
    #[source]
    source: io::Error,
  },
  #[error("request of {0} bytes overflows the address space")]
  Overflow(usize),
}

pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_messages() {
    let err = Error::RegistryUnreadable {
      path: PathBuf::from("/sys/kernel/mm/hugepages"),
      source: io::Error::from(io::ErrorKind::NotFound),
    };
    assert!(err.to_string().starts_with("cannot read huge page registry /sys/kernel/mm/hugepages: "));

    let err = Error::TooManyPageTypes {
      found: 11,
      capacity: 10,
    };
    assert_eq!(err.to_string(), "found 11 page types, more than the maximum of 10");
  }
}
