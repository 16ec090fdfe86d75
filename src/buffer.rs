//! Byte storage behind every [`ByteString`].
//!
//! Two backings exist. A *wrapped* buffer is a plain heap vector and is
//! limited to 31-bit capacities. A *big* buffer is allocated manually through
//! a [`RawAlloc`], can exceed that limit and is released deterministically
//! when its owning [`BigBuffer`] handle is dropped.
//!
//! Big allocations go through an explicit retry ladder: attempt, ask the
//! allocator to reclaim memory, attempt again, sleep, attempt a last time.
//! The allocator is injectable so the ladder can be exercised with faults.

use crate::bytestring::ByteString;
use crate::config::{ALLOC_RETRY_SLEEP, COPY_BLOCK_SIZE, WRAPPED_BUFFER_MAX};
use crate::error::AllocError;
use std::alloc::{self, Layout};
use std::io::{self, Read, Write};
use std::ops::Range;
use std::ptr::NonNull;
use std::sync::Arc;
use std::thread;
use tracing::{debug, warn};

const BIG_ALIGN: usize = 8;

/// Allocation primitive used by big buffers.
pub trait RawAlloc: Send + Sync {
    /// Returns `size` bytes of zero-initialized memory aligned to 8, or
    /// `None` when the request cannot be served right now.
    fn alloc(&self, size: usize) -> Option<NonNull<u8>>;

    /// Releases memory returned by [`RawAlloc::alloc`].
    ///
    /// # Safety
    /// `ptr` must come from `self.alloc(size)` and must not be used afterwards.
    unsafe fn dealloc(&self, ptr: NonNull<u8>, size: usize);

    /// Cleanup pass run between the first and second allocation attempts.
    fn reclaim(&self) {}
}

/// The global allocator.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemAlloc;

impl RawAlloc for SystemAlloc {
    fn alloc(&self, size: usize) -> Option<NonNull<u8>> {
        let layout = Layout::from_size_align(size, BIG_ALIGN).ok()?;
        // SAFETY: size is non-zero, big buffers never request zero bytes.
        NonNull::new(unsafe { alloc::alloc_zeroed(layout) })
    }

    unsafe fn dealloc(&self, ptr: NonNull<u8>, size: usize) {
        let layout = Layout::from_size_align_unchecked(size, BIG_ALIGN);
        alloc::dealloc(ptr.as_ptr(), layout);
    }
}

/// Runs the allocation ladder: alloc, reclaim + alloc, sleep + alloc.
pub fn allocate_with_retry(
    allocator: &dyn RawAlloc,
    size: usize,
) -> Result<NonNull<u8>, AllocError> {
    if let Some(ptr) = allocator.alloc(size) {
        return Ok(ptr);
    }

    warn!(size, "Big buffer allocation failed, reclaiming memory");
    allocator.reclaim();
    if let Some(ptr) = allocator.alloc(size) {
        return Ok(ptr);
    }

    warn!(
        size,
        sleep_ms = ALLOC_RETRY_SLEEP.as_millis() as u64,
        "Big buffer allocation failed again, sleeping before last attempt"
    );
    thread::sleep(ALLOC_RETRY_SLEEP);
    if let Some(ptr) = allocator.alloc(size) {
        return Ok(ptr);
    }

    Err(AllocError {
        requested: size,
        attempts: 3,
    })
}

/// Owning handle over a manually allocated block.
pub struct BigBuffer {
    ptr: NonNull<u8>,
    capacity: usize,
    allocator: Arc<dyn RawAlloc>,
}

// SAFETY: the block is owned exclusively by the handle and only reached
// through `&self`/`&mut self`, so the usual borrow rules apply.
unsafe impl Send for BigBuffer {}
unsafe impl Sync for BigBuffer {}

impl BigBuffer {
    pub fn allocate(capacity: usize) -> Result<Self, AllocError> {
        Self::allocate_with(capacity, Arc::new(SystemAlloc))
    }

    pub fn allocate_with(
        capacity: usize,
        allocator: Arc<dyn RawAlloc>,
    ) -> Result<Self, AllocError> {
        let ptr = if capacity == 0 {
            NonNull::dangling()
        } else {
            allocate_with_retry(allocator.as_ref(), capacity)?
        };
        debug!(capacity, "Big buffer allocated");
        Ok(Self {
            ptr,
            capacity,
            allocator,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: the block holds `capacity` zero-initialized bytes for the
        // lifetime of the handle.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.capacity) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as above, and `&mut self` guarantees exclusivity.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.capacity) }
    }

    /// Copies `src` to `offset` in `COPY_BLOCK_SIZE` steps.
    pub fn copy_in(&mut self, offset: usize, src: &[u8]) {
        assert!(
            offset + src.len() <= self.capacity,
            "copy of {} bytes at {} overflows big buffer of {}",
            src.len(),
            offset,
            self.capacity
        );
        let dst = self.as_mut_slice();
        for (i, block) in src.chunks(COPY_BLOCK_SIZE).enumerate() {
            let at = offset + i * COPY_BLOCK_SIZE;
            dst[at..at + block.len()].copy_from_slice(block);
        }
    }

    /// Fills the buffer from `offset` until it is full or the reader is
    /// exhausted, reading at most `COPY_BLOCK_SIZE` bytes per call.
    pub fn read_from<R: Read>(&mut self, offset: usize, reader: &mut R) -> io::Result<usize> {
        let capacity = self.capacity;
        let dst = self.as_mut_slice();
        let mut at = offset;
        while at < capacity {
            let step = (capacity - at).min(COPY_BLOCK_SIZE);
            let n = reader.read(&mut dst[at..at + step])?;
            if n == 0 {
                break;
            }
            at += n;
        }
        Ok(at - offset)
    }

    /// Writes `range` to `writer` in `COPY_BLOCK_SIZE` steps.
    pub fn write_range_to<W: Write>(&self, range: Range<usize>, writer: &mut W) -> io::Result<()> {
        for block in self.as_slice()[range].chunks(COPY_BLOCK_SIZE) {
            writer.write_all(block)?;
        }
        Ok(())
    }
}

impl Drop for BigBuffer {
    fn drop(&mut self) {
        if self.capacity > 0 {
            // SAFETY: ptr was obtained from this allocator with this size.
            unsafe { self.allocator.dealloc(self.ptr, self.capacity) };
            debug!(capacity = self.capacity, "Big buffer released");
        }
    }
}

impl std::fmt::Debug for BigBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BigBuffer")
            .field("capacity", &self.capacity)
            .finish()
    }
}

/// Shared backing of buffers and byte strings.
#[derive(Debug)]
pub(crate) enum Storage {
    Heap(Vec<u8>),
    Big(BigBuffer),
    Static(&'static [u8]),
}

impl Storage {
    #[inline]
    pub(crate) fn as_slice(&self) -> &[u8] {
        match self {
            Storage::Heap(v) => v,
            Storage::Big(b) => b.as_slice(),
            Storage::Static(s) => s,
        }
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        match self {
            Storage::Heap(v) => v,
            Storage::Big(b) => b.as_mut_slice(),
            Storage::Static(_) => panic!("static storage is read-only"),
        }
    }

    fn len(&self) -> usize {
        self.as_slice().len()
    }
}

/// Byte storage with a `position <= limit <= capacity` cursor pair.
///
/// [`Buffer::duplicate`] and [`Buffer::view`] share the storage instead of
/// copying it. Writes require the storage to be unshared.
#[derive(Debug)]
pub struct Buffer {
    storage: Arc<Storage>,
    position: usize,
    limit: usize,
}

impl Buffer {
    /// Wrapped storage up to `WRAPPED_BUFFER_MAX`, big storage above it.
    pub fn allocate(capacity: usize) -> Result<Self, AllocError> {
        if capacity <= WRAPPED_BUFFER_MAX {
            Ok(Self::from_storage(Storage::Heap(vec![0; capacity])))
        } else {
            Self::allocate_big(capacity)
        }
    }

    pub fn allocate_big(capacity: usize) -> Result<Self, AllocError> {
        Ok(Self::from_storage(Storage::Big(BigBuffer::allocate(capacity)?)))
    }

    pub fn allocate_big_with(
        capacity: usize,
        allocator: Arc<dyn RawAlloc>,
    ) -> Result<Self, AllocError> {
        Ok(Self::from_storage(Storage::Big(BigBuffer::allocate_with(
            capacity, allocator,
        )?)))
    }

    /// Wraps existing bytes; the limit is set to their length.
    pub fn wrap(bytes: Vec<u8>) -> Self {
        Self::from_storage(Storage::Heap(bytes))
    }

    fn from_storage(storage: Storage) -> Self {
        let limit = storage.len();
        Self {
            storage: Arc::new(storage),
            position: 0,
            limit,
        }
    }

    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn remaining(&self) -> usize {
        self.limit - self.position
    }

    pub fn has_remaining(&self) -> bool {
        self.position < self.limit
    }

    pub fn is_big(&self) -> bool {
        matches!(*self.storage, Storage::Big(_))
    }

    /// True while a duplicate or view still references the storage.
    pub fn is_shared(&self) -> bool {
        Arc::strong_count(&self.storage) > 1
    }

    pub fn set_position(&mut self, position: usize) -> &mut Self {
        assert!(
            position <= self.limit,
            "position {} exceeds limit {}",
            position,
            self.limit
        );
        self.position = position;
        self
    }

    /// Moves the limit; the position is pulled back if it lies beyond it.
    pub fn set_limit(&mut self, limit: usize) -> &mut Self {
        assert!(
            limit <= self.capacity(),
            "limit {} exceeds capacity {}",
            limit,
            self.capacity()
        );
        self.limit = limit;
        self.position = self.position.min(limit);
        self
    }

    pub fn clear(&mut self) -> &mut Self {
        self.position = 0;
        self.limit = self.capacity();
        self
    }

    /// Limit to the current position, position to zero: switch from writing to reading.
    pub fn flip(&mut self) -> &mut Self {
        self.limit = self.position;
        self.position = 0;
        self
    }

    /// New cursor pair over the same storage.
    pub fn duplicate(&self) -> Buffer {
        Buffer {
            storage: Arc::clone(&self.storage),
            position: self.position,
            limit: self.limit,
        }
    }

    /// Zero-copy view of `position..limit`.
    pub fn view(&self) -> ByteString {
        ByteString::from_parts(Arc::clone(&self.storage), self.position, self.limit)
    }

    /// Converts into a view of `position..limit` without touching the refcount.
    pub fn into_view(self) -> ByteString {
        ByteString::from_parts(self.storage, self.position, self.limit)
    }

    pub fn get(&mut self) -> u8 {
        assert!(self.has_remaining(), "buffer underflow at {}", self.position);
        let b = self.storage.as_slice()[self.position];
        self.position += 1;
        b
    }

    pub fn get_at(&self, index: usize) -> u8 {
        assert!(
            index < self.limit,
            "index {} out of range for limit {}",
            index,
            self.limit
        );
        self.storage.as_slice()[index]
    }

    /// Fills `dst` from the position and advances it.
    pub fn get_slice(&mut self, dst: &mut [u8]) -> &mut Self {
        assert!(
            dst.len() <= self.remaining(),
            "buffer underflow: need {}, have {}",
            dst.len(),
            self.remaining()
        );
        let start = self.position;
        dst.copy_from_slice(&self.storage.as_slice()[start..start + dst.len()]);
        self.position += dst.len();
        self
    }

    pub fn put(&mut self, b: u8) -> &mut Self {
        assert!(self.has_remaining(), "buffer overflow at {}", self.position);
        let at = self.position;
        self.storage_mut()[at] = b;
        self.position += 1;
        self
    }

    pub fn put_at(&mut self, index: usize, b: u8) -> &mut Self {
        assert!(
            index < self.limit,
            "index {} out of range for limit {}",
            index,
            self.limit
        );
        self.storage_mut()[index] = b;
        self
    }

    /// Copies `src` at the position and advances it; big storage copies in blocks.
    pub fn put_slice(&mut self, src: &[u8]) -> &mut Self {
        assert!(
            src.len() <= self.remaining(),
            "buffer overflow: need {}, have {}",
            src.len(),
            self.remaining()
        );
        let at = self.position;
        match self.storage_mut_raw() {
            Storage::Big(big) => big.copy_in(at, src),
            other => other.as_mut_slice()[at..at + src.len()].copy_from_slice(src),
        }
        self.position += src.len();
        self
    }

    /// Reads from `reader` into `position..limit` until full or EOF.
    pub fn read_from<R: Read>(&mut self, reader: &mut R) -> io::Result<usize> {
        let (start, limit) = (self.position, self.limit);
        let n = match self.storage_mut_raw() {
            Storage::Big(big) => {
                let mut bounded = Read::take(&mut *reader, (limit - start) as u64);
                big.read_from(start, &mut bounded)?
            }
            other => {
                let dst = &mut other.as_mut_slice()[start..limit];
                let mut at = 0;
                while at < dst.len() {
                    let n = reader.read(&mut dst[at..])?;
                    if n == 0 {
                        break;
                    }
                    at += n;
                }
                at
            }
        };
        self.position += n;
        Ok(n)
    }

    fn storage_mut(&mut self) -> &mut [u8] {
        self.storage_mut_raw().as_mut_slice()
    }

    fn storage_mut_raw(&mut self) -> &mut Storage {
        match Arc::get_mut(&mut self.storage) {
            Some(storage) => storage,
            None => panic!("cannot write through a shared buffer"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails the first `failures` requests, then defers to the system allocator.
    struct FlakyAlloc {
        failures: usize,
        calls: AtomicUsize,
        reclaims: AtomicUsize,
        frees: AtomicUsize,
    }

    impl FlakyAlloc {
        fn new(failures: usize) -> Arc<Self> {
            Arc::new(Self {
                failures,
                calls: AtomicUsize::new(0),
                reclaims: AtomicUsize::new(0),
                frees: AtomicUsize::new(0),
            })
        }
    }

    impl RawAlloc for FlakyAlloc {
        fn alloc(&self, size: usize) -> Option<NonNull<u8>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                None
            } else {
                SystemAlloc.alloc(size)
            }
        }

        unsafe fn dealloc(&self, ptr: NonNull<u8>, size: usize) {
            self.frees.fetch_add(1, Ordering::SeqCst);
            SystemAlloc.dealloc(ptr, size);
        }

        fn reclaim(&self) {
            self.reclaims.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn first_attempt_succeeds_without_reclaim() {
        let alloc = FlakyAlloc::new(0);
        let buf = BigBuffer::allocate_with(64, alloc.clone()).unwrap();
        assert_eq!(buf.capacity(), 64);
        assert_eq!(alloc.calls.load(Ordering::SeqCst), 1);
        assert_eq!(alloc.reclaims.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn second_attempt_follows_reclaim() {
        let alloc = FlakyAlloc::new(1);
        BigBuffer::allocate_with(64, alloc.clone()).unwrap();
        assert_eq!(alloc.calls.load(Ordering::SeqCst), 2);
        assert_eq!(alloc.reclaims.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn third_attempt_follows_sleep() {
        let alloc = FlakyAlloc::new(2);
        BigBuffer::allocate_with(64, alloc.clone()).unwrap();
        assert_eq!(alloc.calls.load(Ordering::SeqCst), 3);
        assert_eq!(alloc.reclaims.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn ladder_exhaustion_is_an_error() {
        let alloc = FlakyAlloc::new(3);
        let err = BigBuffer::allocate_with(64, alloc.clone()).unwrap_err();
        assert_eq!(
            err,
            AllocError {
                requested: 64,
                attempts: 3
            }
        );
        assert_eq!(alloc.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn drop_releases_exactly_once() {
        let alloc = FlakyAlloc::new(0);
        {
            let buf = Buffer::allocate_big_with(128, alloc.clone()).unwrap();
            let view = buf.view();
            drop(buf);
            assert_eq!(alloc.frees.load(Ordering::SeqCst), 0);
            assert_eq!(view.len(), 128);
        }
        assert_eq!(alloc.frees.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn big_buffer_is_zeroed() {
        let buf = BigBuffer::allocate(4096).unwrap();
        assert!(buf.as_slice().iter().all(|&b| b == 0));
    }

    #[test]
    fn copy_in_spans_blocks() {
        let len = COPY_BLOCK_SIZE * 2 + 17;
        let src: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        let mut buf = BigBuffer::allocate(len + 3).unwrap();
        buf.copy_in(3, &src);
        assert_eq!(&buf.as_slice()[3..], &src[..]);
    }

    #[test]
    fn read_from_fills_until_eof() {
        let src: Vec<u8> = (0..1000u32).map(|i| i as u8).collect();
        let mut buf = BigBuffer::allocate(2000).unwrap();
        let n = buf.read_from(0, &mut &src[..]).unwrap();
        assert_eq!(n, 1000);
        assert_eq!(&buf.as_slice()[..1000], &src[..]);
    }

    #[test]
    fn cursor_put_flip_get() {
        let mut buf = Buffer::allocate(8).unwrap();
        buf.put(b'a').put(b'b').put_slice(b"cd");
        assert_eq!(buf.position(), 4);
        buf.flip();
        assert_eq!(buf.limit(), 4);
        assert_eq!(buf.get(), b'a');
        let mut rest = [0u8; 3];
        buf.get_slice(&mut rest);
        assert_eq!(&rest, b"bcd");
        assert!(!buf.has_remaining());
    }

    #[test]
    fn set_limit_pulls_position_back() {
        let mut buf = Buffer::wrap(b"hello".to_vec());
        buf.set_position(4);
        buf.set_limit(2);
        assert_eq!(buf.position(), 2);
        buf.clear();
        assert_eq!((buf.position(), buf.limit()), (0, 5));
    }

    #[test]
    fn duplicate_shares_storage() {
        let mut buf = Buffer::wrap(b"shared".to_vec());
        buf.put_at(0, b'S');
        let mut dup = buf.duplicate();
        dup.set_position(2);
        assert!(buf.is_shared());
        assert_eq!(dup.get_at(0), b'S');
        assert_eq!(dup.view().as_bytes(), b"ared");
        assert_eq!(buf.position(), 0);
    }

    #[test]
    #[should_panic(expected = "shared buffer")]
    fn write_through_shared_buffer_panics() {
        let mut buf = Buffer::wrap(b"abc".to_vec());
        let _view = buf.view();
        buf.put(b'x');
    }

    #[test]
    #[should_panic(expected = "exceeds limit")]
    fn position_beyond_limit_panics() {
        let mut buf = Buffer::wrap(b"abc".to_vec());
        buf.set_position(4);
    }

    #[test]
    fn big_buffer_cursor_ops() {
        let mut buf = Buffer::allocate_big(16).unwrap();
        assert!(buf.is_big());
        buf.put_slice(b"big data");
        buf.flip();
        assert_eq!(buf.view().as_bytes(), b"big data");
    }

    #[test]
    fn buffer_read_from_advances_position() {
        let mut buf = Buffer::allocate(10).unwrap();
        let n = buf.read_from(&mut &b"abcdef"[..]).unwrap();
        assert_eq!(n, 6);
        buf.flip();
        assert_eq!(buf.into_view().as_bytes(), b"abcdef");
    }
}
