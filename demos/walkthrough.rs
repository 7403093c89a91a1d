use std::io::Read;

use tagalloc::{Allocator, Config, HeapGrower, Payload, SbrkHeap};

/// Waits until the user presses ENTER.
/// Useful when you want to inspect memory state with tools like `pmap`, `htop`,
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
    SbrkHeap::program_break(),
  );
}

fn print_alloc(
  allocator: &Allocator<SbrkHeap>,
  size: usize,
  payload: Payload,
) {
  println!(
    "Allocated {} bytes ({} usable), address = {:?}, program break = {:?}",
    size,
    allocator.usable_size(payload),
    allocator.as_ptr(payload),
    SbrkHeap::program_break(),
  );
}

fn print_heap(allocator: &Allocator<SbrkHeap>) {
  let base = allocator.heap().base() as usize;
  for (offset, block) in allocator.blocks() {
    println!("    {:#x}  {:?}", base + offset, block);
  }
  match allocator.check() {
    Ok(stats) => println!("    {stats:?}"),
    Err(corruption) => println!("    CORRUPT: {corruption}"),
  }
}

fn main() {
  env_logger::init();

  // Let stdio set up its buffers before we own the break. The system
  // allocator moving the break under us would make growth fail.
  print_program_break("start");
  block_until_enter_pressed();

  let mut allocator = match Allocator::init_with(SbrkHeap::new(), Config::default().with_paranoid(true)) {
    Ok(allocator) => allocator,
    Err(e) => {
      eprintln!("init failed: {e}");
      return;
    }
  };

  print_program_break("after init");

  // --------------------------------------------------------------------
  // 1) A small allocation. The heap grows by a whole chunk, the block is
  //    carved off its tail and the rest stays on the free list.
  // --------------------------------------------------------------------
  let Some(first) = allocator.malloc(16) else {
    eprintln!("out of memory");
    return;
  };
  println!("\n[1] malloc(16)");
  print_alloc(&allocator, 16, first);
  allocator.payload_mut(first)[..4].copy_from_slice(&0xDEADBEEFu32.to_ne_bytes());
  print_heap(&allocator);

  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 2) A second allocation is split off the same free block, no growth.
  // --------------------------------------------------------------------
  let Some(second) = allocator.malloc(40) else {
    eprintln!("out of memory");
    return;
  };
  println!("\n[2] malloc(40)");
  print_alloc(&allocator, 40, second);
  allocator.payload_mut(second).fill(0xAB);
  print_heap(&allocator);

  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 3) Free the first block and ask for the same size again: the most
  //    recently freed block is handed straight back.
  // --------------------------------------------------------------------
  allocator.free(Some(first));
  println!("\n[3] free(first), then malloc(16)");
  let Some(third) = allocator.malloc(16) else {
    eprintln!("out of memory");
    return;
  };
  print_alloc(&allocator, 16, third);
  println!(
    "[3] third == first? {}",
    if third == first {
      "Yes, it reused the freed block"
    } else {
      "No, it allocated somewhere else"
    }
  );
  print_heap(&allocator);

  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 4) Grow the second block. Its neighbours decide whether this happens
  //    in place or by moving the payload.
  // --------------------------------------------------------------------
  let Some(grown) = allocator.realloc(Some(second), 300) else {
    eprintln!("out of memory");
    return;
  };
  println!("\n[4] realloc(second, 300)");
  print_alloc(&allocator, 300, grown);
  println!(
    "[4] moved? {}, payload kept? {}",
    grown != second,
    allocator.payload(grown)[..40].iter().all(|b| *b == 0xAB)
  );
  print_heap(&allocator);

  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 5) A large block that no free block can serve moves the break.
  // --------------------------------------------------------------------
  print_program_break("before large alloc");
  let Some(big) = allocator.malloc(64 * 1024) else {
    eprintln!("out of memory");
    return;
  };
  println!("\n[5] malloc(64 KiB)");
  print_alloc(&allocator, 64 * 1024, big);
  print_program_break("after large alloc");

  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 6) Free everything. Coalescing leaves a single free block; the break
  //    never moves back.
  // --------------------------------------------------------------------
  for payload in [third, grown, big] {
    allocator.free(Some(payload));
  }
  println!("\n[6] freed everything");
  print_heap(&allocator);
  print_program_break("end");
}
