use segalloc::{Heap, HeapConfig, HeapPtr, LogLevel};

fn print_alloc(heap: &Heap, ptr: HeapPtr, size: usize) {
    println!("Requested {size} bytes of memory");
    println!(
        "Received {ptr:?} with {} usable bytes",
        heap.usable_size(ptr).unwrap_or_default()
    );
}

fn main() {
    let mut heap = Heap::with_config(HeapConfig::new().with_log_level(LogLevel::Debug));

    let sizes = [1, 1024, 4096];
    let ptrs: Vec<_> = sizes
        .iter()
        .map(|size| {
            let ptr = heap.allocate(*size).unwrap().unwrap();
            print_alloc(&heap, ptr, *size);
            ptr
        })
        .collect();

    println!("\nHeap after allocating: {:#?}", heap.stats());

    println!("\nDeallocating everything...");
    for ptr in ptrs {
        heap.free(ptr);
    }

    println!("\nBlocks left behind:");
    for block in heap.blocks() {
        println!("  {block:?}");
    }

    println!("\nLet's try some reallocs");
    let mut ptr = heap.allocate(16).unwrap().unwrap();
    heap.payload_mut(ptr).unwrap()[..16].copy_from_slice(b"segregated lists");
    for size in [64, 512, 2048, 24] {
        ptr = heap.resize(ptr, size).unwrap().unwrap();
        println!(
            "Resized to {size} bytes at {ptr:?}: {:?}",
            String::from_utf8_lossy(&heap.payload(ptr).unwrap()[..16])
        );
    }

    let aligned = heap.aligned_allocate(100, 256).unwrap().unwrap();
    println!("\nAligned allocation at {aligned:?}, offset % 256 = {}", aligned.offset() % 256);

    println!("\nEvents:");
    for record in heap.log().iter() {
        println!("  {record:?}");
    }

    match heap.check_invariants() {
        Ok(()) => println!("\nHeap is consistent"),
        Err(err) => println!("\n{err}"),
    }
}
