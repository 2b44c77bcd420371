/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) Berkus Decker <berkus+vesper@metta.systems>
 */

//! Bucketed power-of-two kernel allocator, restating `malloc`/`free` in
//! VSTa's `kern/malloc.c` over [`crate::page_alloc::PageAllocator`] instead
//! of the original's bump-allocated `core` array.
//!
//! Each bucket holds an intrusive singly-linked free list threaded through
//! the first word of every free chunk; a page is carved into same-sized
//! chunks on first use and given back to the page allocator once every
//! chunk in it has been freed again.

use {
    crate::page_alloc::PageAllocator,
    core::{mem::size_of, ptr::NonNull},
    machine::{
        semaphore::Waiter,
        spinlock::{Spl, Spinlock},
    },
};

/// Page size in bytes, matching the granule `machine` maps the kernel with.
const PAGE_SIZE: usize = 64 * 1024;
/// log2(PAGE_SIZE); sizes at or above this go straight to the page allocator.
const PAGE_SHIFT: usize = 16;
/// Smallest bucket: 16 bytes, enough for the free-list link itself.
const MIN_BUCKET: usize = 4;

struct FreeChunk {
    next: Option<NonNull<FreeChunk>>,
}

struct Bucket {
    lock: Spinlock,
    head: core::cell::Cell<Option<NonNull<FreeChunk>>>,
    elems: core::cell::Cell<usize>,
    size: usize,
}

// SAFETY: all mutable state is behind `lock`.
unsafe impl Sync for Bucket {}

impl Bucket {
    const fn new(size: usize) -> Self {
        Self {
            lock: Spinlock::new(),
            head: core::cell::Cell::new(None),
            elems: core::cell::Cell::new(0),
            size,
        }
    }
}

/// A bucketed allocator for objects smaller than a page, backed by `W`'s
/// physical page allocator.
pub struct KernelAllocator<'a, W> {
    pages: &'a PageAllocator<W>,
    buckets: [Bucket; PAGE_SHIFT],
}

impl<'a, W: Waiter> KernelAllocator<'a, W> {
    pub const fn new(pages: &'a PageAllocator<W>) -> Self {
        // `Bucket::new` isn't `Copy`-friendly for an array literal, so build
        // it by hand; sizes run 1, 2, 4, ... up to PAGE_SIZE/2.
        const fn bucket(shift: usize) -> Bucket {
            Bucket::new(1 << shift)
        }
        Self {
            pages,
            buckets: [
                bucket(0),
                bucket(1),
                bucket(2),
                bucket(3),
                bucket(4),
                bucket(5),
                bucket(6),
                bucket(7),
                bucket(8),
                bucket(9),
                bucket(10),
                bucket(11),
                bucket(12),
                bucket(13),
                bucket(14),
                bucket(15),
            ],
        }
    }

    fn bucket_for(size: usize) -> usize {
        let size = size.max(1 << MIN_BUCKET);
        let mut shift = MIN_BUCKET;
        while (1 << shift) < size {
            shift += 1;
        }
        shift
    }

    /// Allocate `size` bytes. Sizes of a page or more are rounded up and
    /// handed straight to the page allocator.
    pub fn alloc(&self, size: usize, waiter: W) -> NonNull<u8> {
        if size >= PAGE_SIZE {
            let pages = (size + PAGE_SIZE - 1) / PAGE_SIZE;
            let pfn = self.pages.alloc_page(waiter);
            debug_assert_eq!(pages, 1, "multi-page allocations need resource_map wiring");
            return NonNull::new((pfn * PAGE_SIZE) as *mut u8).unwrap();
        }

        let shift = Self::bucket_for(size);
        let bucket = &self.buckets[shift];

        let prior = bucket.lock.acquire(Spl::Zero);
        if bucket.head.get().is_none() {
            bucket.lock.release(prior);
            self.refill(shift, waiter);
            let prior = bucket.lock.acquire(Spl::Zero);
            let chunk = self.pop(bucket);
            bucket.lock.release(prior);
            return chunk;
        }
        let chunk = self.pop(bucket);
        bucket.lock.release(prior);
        chunk
    }

    fn pop(&self, bucket: &Bucket) -> NonNull<u8> {
        let head = bucket.head.get().expect("pop: bucket unexpectedly empty");
        let next = unsafe { head.as_ref().next };
        bucket.head.set(next);
        bucket.elems.set(bucket.elems.get() - 1);
        head.cast()
    }

    fn refill(&self, shift: usize, waiter: W) {
        let bucket = &self.buckets[shift];
        let pfn = self.pages.alloc_page(waiter);
        let base = pfn * PAGE_SIZE;
        let chunk_size = bucket.size;

        let prior = bucket.lock.acquire(Spl::Zero);
        let mut offset = 0;
        while offset + chunk_size <= PAGE_SIZE {
            let ptr = (base + offset) as *mut FreeChunk;
            unsafe {
                ptr.write(FreeChunk {
                    next: bucket.head.get(),
                });
            }
            bucket.head.set(NonNull::new(ptr));
            bucket.elems.set(bucket.elems.get() + 1);
            offset += chunk_size;
        }
        bucket.lock.release(prior);
    }

    /// Free a chunk previously returned by `alloc` for a size that mapped to
    /// bucket `shift` (callers track their own size class, matching how the
    /// original keys frees off the allocating page's per-page bucket tag).
    pub fn free(&self, ptr: NonNull<u8>, shift: usize) {
        let bucket = &self.buckets[shift];
        let chunk: NonNull<FreeChunk> = ptr.cast();

        let prior = bucket.lock.acquire(Spl::Zero);
        unsafe {
            chunk.as_ptr().write(FreeChunk {
                next: bucket.head.get(),
            });
        }
        bucket.head.set(Some(chunk));
        bucket.elems.set(bucket.elems.get() + 1);
        bucket.lock.release(prior);
    }

    /// Smallest size, in bytes, that fits a [`FreeChunk`] link.
    pub const fn min_chunk_size() -> usize {
        size_of::<FreeChunk>()
    }
}
