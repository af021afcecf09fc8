use std::{io::Read, ptr};

use pagealloc::{AllocatorConfig, PageAllocator};

/// Waits until the user presses ENTER.
/// Useful when you want to inspect the process with `pmap`, or
/// `/proc/<pid>/smaps` to see which mappings are backed by huge pages.
fn block_until_enter_pressed() {
  println!("\n>>> Press ENTER to continue...");
  let _ = std::io::stdin().bytes().next();
}

fn print_stats(
  label: &str,
  allocator: &PageAllocator,
) {
  let stats = allocator.stats();
  println!(
    "[{}] PID = {}, pages = {}, mapped = {} bytes, live = {}, free chunks = {} ({} bytes)",
    label,
    std::process::id(),
    stats.pages,
    stats.mapped_bytes,
    stats.live_allocations,
    stats.free_chunks,
    stats.free_bytes,
  );
}

fn main() -> Result<(), pagealloc::Error> {
  env_logger::init();

  // hosts without reserved huge pages still get the 3 MB request below
  let config = AllocatorConfig::default().huge_page_fallback(true);
  let mut allocator = PageAllocator::with_config(&config)?;

  println!("Page types on this host:");
  for entry in allocator.catalog().entries() {
    println!(
      "  {:>12} bytes, selector {:>2}{}",
      entry.byte_size,
      entry.selector,
      if entry.is_default { " (default)" } else { "" }
    );
  }

  print_stats("start", &allocator);
  block_until_enter_pressed();

  unsafe {
    // --------------------------------------------------------------------
    // 1) A small allocation maps one default page.
    // --------------------------------------------------------------------
    let first = allocator.allocate(4) as *mut u32;
    first.write(0xDEADBEEF);
    println!("\n[1] allocate(4) = {:?}, value = 0x{:X}", first, first.read());
    print_stats("1", &allocator);
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 2) Two more neighbours carved from the same page.
    // --------------------------------------------------------------------
    let second = allocator.allocate(12);
    ptr::write_bytes(second, 0xAB, 12);
    let third = allocator.allocate(32);
    println!("\n[2] allocate(12) = {:?}, allocate(32) = {:?}", second, third);
    print_stats("2", &allocator);
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 3) Release the first two: they merge into one free chunk, and a
    //    request that fits it is served from there.
    // --------------------------------------------------------------------
    allocator.release(second);
    allocator.release(first as *mut u8);
    print_stats("3 after release", &allocator);

    let reused = allocator.allocate(64);
    println!(
      "\n[3] allocate(64) = {:?}, reused the merged chunk? {}",
      reused,
      reused == first as *mut u8
    );
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 4) Grow in place into the free space behind `third`.
    // --------------------------------------------------------------------
    let grown = allocator.reallocate(third, 1024);
    println!("\n[4] reallocate(third, 1024) = {:?}, in place? {}", grown, grown == third);
    print_stats("4", &allocator);
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 5) A 3 MB request picks the 2 MiB page type when the host has one,
    //    and default pages when the kernel has none reserved.
    // --------------------------------------------------------------------
    let big = allocator.allocate(3_000_000);
    println!("\n[5] allocate(3_000_000) = {:?}", big);
    if !big.is_null() {
      if let Some(page) = allocator.page_of(big) {
        println!(
          "[5] page at {:#x}, {} bytes of {}-byte pages",
          page.base,
          page.size,
          allocator.catalog().entries()[page.page_type].byte_size
        );
      }
    }
    print_stats("5", &allocator);
    block_until_enter_pressed();

    allocator.release(big);
    allocator.release(grown);
    allocator.release(reused);
  }

  // --------------------------------------------------------------------
  // 6) Pages stay mapped until the allocator is dropped.
  // --------------------------------------------------------------------
  print_stats("6 before drop", &allocator);
  drop(allocator);
  println!("\n[6] Allocator dropped, every page was unmapped.");

  Ok(())
}
