use std::{io::Read, ptr};

use tagalloc::{Heap, HeapGrowth, SbrkHeap, program_break};

/// Waits until the user presses ENTER when running with `--step`.
/// Useful when you want to inspect memory state with tools like `pmap` or
/// `gdb`, or just watch the program break move between steps.
fn pause(step: bool) {
  if step {
    println!("\n>>> Press ENTER to continue...");
    let _ = std::io::stdin().bytes().next();
  }
}

fn print_program_break(label: &str) {
  println!(
    "[{}] PID = {}, program break (sbrk(0)) = {:?}",
    label,
    std::process::id(),
    program_break(),
  );
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
  env_logger::init();
  let step = std::env::args().any(|arg| arg == "--step");

  print_program_break("start");

  // Prologue, epilogue and the first 4 KiB chunk.
  let mut heap = Heap::init(SbrkHeap::new()?)?;
  print_program_break("after init");
  heap.check_heap(line!());
  pause(step);

  // --------------------------------------------------------------------
  // 1) Allocate 100 bytes: a 128-byte block, header and footer included.
  // --------------------------------------------------------------------
  let first = heap.try_allocate(100)?.as_ptr();
  println!("\n[1] allocate(100) = {:?}, block size = {}", first, unsafe {
    heap.block_size(first)
  });
  heap.check_heap(line!());
  pause(step);

  // --------------------------------------------------------------------
  // 2) Allocate 8 bytes: still a full 32-byte minimum block.
  // --------------------------------------------------------------------
  let second = heap.try_allocate(8)?.as_ptr();
  unsafe { ptr::write_bytes(second, 0xAB, 8) };
  println!("\n[2] allocate(8) = {:?}, block size = {}", second, unsafe {
    heap.block_size(second)
  });
  heap.check_heap(line!());
  pause(step);

  // --------------------------------------------------------------------
  // 3) Release the first block and ask for the same size again.
  //    The heap grows instead of reusing the released block.
  // --------------------------------------------------------------------
  unsafe { heap.release(first) };
  let before = heap.growth().high();
  let third = heap.try_allocate(100)?.as_ptr();
  println!(
    "\n[3] allocate(100) after release = {:?}, reused = {}, heap end moved from {:?} to {:?}",
    third,
    third == first,
    before,
    heap.growth().high()
  );
  heap.check_heap(line!());
  pause(step);

  // --------------------------------------------------------------------
  // 4) Grow the 8-byte allocation to 100 bytes; the contents move along.
  // --------------------------------------------------------------------
  let moved = unsafe { heap.reallocate(second, 100) };
  if moved.is_null() {
    return Err("reallocate failed, see log".into());
  }
  println!(
    "\n[4] reallocate({:?}, 100) = {:?}, first byte = {:#X}",
    second,
    moved,
    unsafe { moved.read() }
  );
  heap.check_heap(line!());
  pause(step);

  // --------------------------------------------------------------------
  // 5) Walk the heap.
  // --------------------------------------------------------------------
  println!("\n[5] heap walk:");
  for block in heap.blocks() {
    let block = block?;
    println!(
      "    {:?}: size = {:5}, allocated = {}",
      block.ptr,
      block.size(),
      block.is_allocated()
    );
  }
  println!("    {:?}", heap.verify()?);

  print_program_break("end");
  println!("\nEnd of example. Process will exit and the OS will reclaim all memory.");
  Ok(())
}
