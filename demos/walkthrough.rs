use std::{io::Read, ptr};

use libc::sbrk;
use segalloc::{AllocatorConfig, SbrkSource, SegregatedAllocator};

/// Waits until the user presses ENTER.
/// Useful when you want to inspect memory state with tools like `pmap`,
/// `gdb`, or just visually track how allocations change the program break.
fn block_until_enter_pressed() {
  println!("\n>>> Press ENTER to continue...");
  let _ = std::io::stdin().bytes().next();
}

/// Prints the current program break using `sbrk(0)`.
fn print_program_break(label: &str) {
  println!(
    "[{}] PID = {}, program break (sbrk(0)) = {:?}",
    label,
    std::process::id(),
    unsafe { sbrk(0) },
  );
}

fn print_alloc(
  allocator: &SegregatedAllocator<SbrkSource>,
  requested: usize,
  ptr: *mut u8,
) {
  println!(
    "requested {requested} bytes -> {ptr:p} (usable {}, heap {} bytes)",
    allocator.usable_size(ptr),
    allocator.heap_size(),
  );
}

fn main() {
  print_program_break("start");

  let source = match SbrkSource::new() {
    Ok(source) => source,
    Err(err) => {
      eprintln!("cannot use the program break: {err}");
      return;
    }
  };
  let mut allocator = SegregatedAllocator::with_config(
    source,
    AllocatorConfig::default().with_check_each_operation(true),
  );
  if let Err(err) = allocator.initialize() {
    eprintln!("heap initialization failed: {err}");
    return;
  }
  print_program_break("after initialize");
  print!("{}", allocator.dump());
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 1) Two allocations carved out of the initial free block.
  // --------------------------------------------------------------------
  let Some(first) = allocator.allocate(100) else {
    eprintln!("out of memory");
    return;
  };
  println!("\n[1] Allocate 100 bytes");
  print_alloc(&allocator, 100, first.as_ptr());
  unsafe { ptr::write_bytes(first.as_ptr(), 0xAB, 100) };

  let Some(second) = allocator.allocate(200) else {
    eprintln!("out of memory");
    return;
  };
  println!("\n[1] Allocate 200 bytes");
  print_alloc(&allocator, 200, second.as_ptr());
  print!("{}", allocator.dump());
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 2) Release the first block and ask for something smaller.
  //    The freed block sits at the head of its bucket and is reused.
  // --------------------------------------------------------------------
  unsafe { allocator.release(first.as_ptr()) };
  println!("\n[2] Released {:p}", first.as_ptr());
  print!("{}", allocator.dump());

  let Some(third) = allocator.allocate(50) else {
    eprintln!("out of memory");
    return;
  };
  println!("\n[2] Allocate 50 bytes (check reuse of freed block)");
  print_alloc(&allocator, 50, third.as_ptr());
  println!(
    "[2] third == first? {}",
    if third == first {
      "Yes, it reused the freed block"
    } else {
      "No, it allocated somewhere else"
    }
  );
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 3) A large request that no bucket can serve grows the heap.
  // --------------------------------------------------------------------
  print_program_break("before large alloc");
  let Some(big) = allocator.allocate(64 * 1024) else {
    eprintln!("out of memory");
    return;
  };
  println!("\n[3] Allocate 64 KiB");
  print_alloc(&allocator, 64 * 1024, big.as_ptr());
  print_program_break("after large alloc");
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 4) Release everything: all blocks coalesce back into one.
  // --------------------------------------------------------------------
  unsafe {
    allocator.release(big.as_ptr());
    allocator.release(second.as_ptr());
    allocator.release(third.as_ptr());
  }
  match allocator.check(true) {
    Ok(report) => println!("\n[4] Heap is consistent: {report:?}"),
    Err(violation) => println!("\n[4] Heap is corrupted: {violation}"),
  }
  print!("{}", allocator.dump());

  // --------------------------------------------------------------------
  // 5) Dropping the allocator hands the break back if nobody moved it.
  // --------------------------------------------------------------------
  drop(allocator);
  print_program_break("end");
}
