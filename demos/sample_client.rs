use std::ptr::NonNull;

use blockalloc::{AllocatorConfig, BlockAllocator, block_alloc, block_free};
use tracing_subscriber::EnvFilter;

/// Prints the arena geometry the allocator settled on.
fn print_layout(allocator: &BlockAllocator) {
  println!(
    "block_data_size = {}, stride = {}, data_offset = {}, total_blocks = {}, total_size = {}",
    allocator.block_data_size(),
    allocator.stride(),
    allocator.data_offset(),
    allocator.total_blocks(),
    allocator.total_size(),
  );
}

fn main() {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
    .init();

  // 640-byte blocks out of a 5 MiB request, with both diagnostics on.
  let config = AllocatorConfig::new(640, 5 * 1024 * 1024)
    .with_debug_header(true)
    .with_stomp_detection(true);

  let mut allocator = match BlockAllocator::new(config) {
    Ok(allocator) => allocator,
    Err(err) => {
      eprintln!("Failed to initialize allocator: {err}");
      std::process::exit(1);
    }
  };
  print_layout(&allocator);

  // --------------------------------------------------------------------
  // 1) Allocate five blocks.
  // --------------------------------------------------------------------
  let mut blocks: Vec<Option<NonNull<u8>>> = Vec::with_capacity(5);
  for i in 0..5 {
    let block = block_alloc!(allocator);
    match block {
      Some(ptr) => println!("Allocated block {i} at {ptr:?}"),
      None => println!("Failed to allocate block {i}"),
    }
    blocks.push(block);
  }

  // --------------------------------------------------------------------
  // 2) Use one of them and look at it.
  // --------------------------------------------------------------------
  if let Some(ptr) = blocks[0] {
    unsafe { ptr.as_ptr().write_bytes(0xAB, allocator.block_data_size()) };
    if let Some(view) = allocator.inspect_block(ptr.as_ptr()) {
      println!("\n{view}\n");
    }
  }

  println!("{}\n", allocator.dump_state());

  // --------------------------------------------------------------------
  // 3) Free everything and tear down.
  // --------------------------------------------------------------------
  for (i, block) in blocks.into_iter().enumerate() {
    if let Some(ptr) = block {
      block_free!(allocator, ptr.as_ptr());
      println!("Freed block {i}");
    }
  }

  println!("{}", allocator.dump_state());
  allocator.teardown();
}
