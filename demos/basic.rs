use std::ptr::NonNull;

use segalloc::{AllocError, Heap, Kernel};

fn log_alloc(what: &str, ptr: Option<NonNull<u8>>, size: usize) {
    println!("{what} {size} bytes of memory");
    println!("Received this address: {ptr:?}");
}

fn main() -> Result<(), AllocError> {
    let mut heap = Heap::new(Kernel::new()?)?;

    unsafe {
        let addr1 = heap.allocate(8);
        log_alloc("Requested", addr1, 8);

        let addr2 = heap.allocate(100);
        log_alloc("Requested", addr2, 100);

        let addr3 = heap.allocate(16);
        log_alloc("Requested", addr3, 16);

        // Freeing the neighbor lets the first block grow where it is.
        if let Some(addr2) = addr2 {
            heap.free(addr2);
        }
        let addr1 = heap.resize(addr1, 64);
        log_alloc("Resized to", addr1, 64);

        for addr in [addr1, addr3].into_iter().flatten() {
            heap.free(addr);
        }
    }

    match heap.check() {
        Ok(stats) => println!("{stats:#?}"),
        Err(err) => println!("Heap is corrupted: {err}"),
    }

    Ok(())
}
