use crate::types::{TrapCode, N_BYTES_PER_IMAGE_PAGE, N_BYTES_PER_MEMORY_PAGE, N_MAX_MEMORY_PAGES};
use bitvec::vec::BitVec;
use bytes::BytesMut;
use core::sync::atomic::{AtomicU32, Ordering};
use spin::{Mutex as SpinMutex, RwLock};

#[cfg(feature = "shared-memory")]
use alloc::sync::Arc;
#[cfg(feature = "shared-memory")]
use fnv::FnvHashMap;
#[cfg(feature = "shared-memory")]
use std::sync::{Condvar, Mutex as StdMutex};
#[cfg(feature = "shared-memory")]
use std::time::{Duration, Instant};

/// Result codes of `memory.atomic.wait*`, as pushed onto the stack.
#[cfg(feature = "shared-memory")]
pub const ATOMIC_WAIT_OK: u32 = 0;
#[cfg(feature = "shared-memory")]
pub const ATOMIC_WAIT_NOT_EQUAL: u32 = 1;
#[cfg(feature = "shared-memory")]
pub const ATOMIC_WAIT_TIMED_OUT: u32 = 2;

#[cfg(feature = "shared-memory")]
#[derive(Default)]
struct WaitCellState {
    waiters: u32,
    /// Wake budget granted by `atomic.notify` and consumed by waiters,
    /// so exactly `min(count, waiters)` of them observe a wake-up.
    wakeups: u32,
}

#[cfg(feature = "shared-memory")]
#[derive(Default)]
struct WaitCell {
    state: StdMutex<WaitCellState>,
    cond: Condvar,
}

/// A linear memory instance.
///
/// Data lives behind a read-write lock; `memory.grow` is the only
/// writer that repoints the buffer and it publishes the new byte size
/// to `data_size` *after* resizing, so concurrent readers may poll the
/// cached size without taking the lock. Atomic opcodes additionally
/// serialize on `shared_lock`. A dirty bitmap at 4096-byte granularity
/// feeds the checkpoint engine's page encoding.
pub struct LinearMemory {
    data: RwLock<BytesMut>,
    data_size: AtomicU32,
    cur_pages: AtomicU32,
    max_pages: u32,
    shared: bool,
    shared_lock: SpinMutex<()>,
    dirty: SpinMutex<BitVec>,
    #[cfg(feature = "shared-memory")]
    waiters: StdMutex<FnvHashMap<u32, Arc<WaitCell>>>,
}

impl LinearMemory {
    pub fn new(initial_pages: u32, max_pages: u32, shared: bool) -> Self {
        let max_pages = max_pages.min(N_MAX_MEMORY_PAGES);
        let initial_len = initial_pages as usize * N_BYTES_PER_MEMORY_PAGE as usize;
        let mut data = BytesMut::with_capacity(initial_len);
        data.resize(initial_len, 0);
        let dirty_bits = initial_len / N_BYTES_PER_IMAGE_PAGE as usize;
        Self {
            data: RwLock::new(data),
            data_size: AtomicU32::new(initial_len as u32),
            cur_pages: AtomicU32::new(initial_pages),
            max_pages,
            shared,
            shared_lock: SpinMutex::new(()),
            dirty: SpinMutex::new(BitVec::repeat(false, dirty_bits)),
            #[cfg(feature = "shared-memory")]
            waiters: StdMutex::new(FnvHashMap::default()),
        }
    }

    pub fn current_pages(&self) -> u32 {
        self.cur_pages.load(Ordering::Acquire)
    }

    pub fn max_pages(&self) -> u32 {
        self.max_pages
    }

    pub fn is_shared(&self) -> bool {
        self.shared
    }

    /// Cached byte size, readable without the data lock.
    pub fn data_size(&self) -> u32 {
        self.data_size.load(Ordering::Acquire)
    }

    /// Grows the memory by `delta` pages, returning the previous page
    /// count. Fails when the limit would be exceeded.
    pub fn grow(&self, delta: u32) -> Result<u32, TrapCode> {
        let mut data = self.data.write();
        let current = self.cur_pages.load(Ordering::Acquire);
        if delta == 0 {
            return Ok(current);
        }
        let desired = current
            .checked_add(delta)
            .ok_or(TrapCode::GrowthOperationLimited)?;
        if desired > self.max_pages {
            return Err(TrapCode::GrowthOperationLimited);
        }
        let new_size = desired as usize * N_BYTES_PER_MEMORY_PAGE as usize;
        data.resize(new_size, 0);
        self.dirty
            .lock()
            .resize(new_size / N_BYTES_PER_IMAGE_PAGE as usize, false);
        self.cur_pages.store(desired, Ordering::Release);
        // published after the buffer is repointed, see the reader
        // polling contract above
        self.data_size.store(new_size as u32, Ordering::Release);
        Ok(current)
    }

    fn mark_dirty(&self, offset: usize, len: usize) {
        if len == 0 {
            return;
        }
        let first = offset / N_BYTES_PER_IMAGE_PAGE as usize;
        let last = (offset + len - 1) / N_BYTES_PER_IMAGE_PAGE as usize;
        let mut dirty = self.dirty.lock();
        for page in first..=last {
            if page < dirty.len() {
                dirty.set(page, true);
            }
        }
    }

    /// Reads `buffer.len()` bytes starting at `offset`.
    pub fn read(&self, offset: u64, buffer: &mut [u8]) -> Result<(), TrapCode> {
        let data = self.data.read();
        let offset = usize::try_from(offset).map_err(|_| TrapCode::MemoryOutOfBounds)?;
        let slice = data
            .get(offset..)
            .and_then(|tail| tail.get(..buffer.len()))
            .ok_or(TrapCode::MemoryOutOfBounds)?;
        buffer.copy_from_slice(slice);
        Ok(())
    }

    /// Writes `buffer` at `offset` and marks the touched pages dirty.
    pub fn write(&self, offset: u64, buffer: &[u8]) -> Result<(), TrapCode> {
        let mut data = self.data.write();
        let offset = usize::try_from(offset).map_err(|_| TrapCode::MemoryOutOfBounds)?;
        let slice = data
            .get_mut(offset..)
            .and_then(|tail| tail.get_mut(..buffer.len()))
            .ok_or(TrapCode::MemoryOutOfBounds)?;
        slice.copy_from_slice(buffer);
        drop(data);
        self.mark_dirty(offset, buffer.len());
        Ok(())
    }

    #[inline(always)]
    pub fn load_bytes<const N: usize>(&self, addr: u64) -> Result<[u8; N], TrapCode> {
        let mut bytes = [0u8; N];
        self.read(addr, &mut bytes)?;
        Ok(bytes)
    }

    #[inline(always)]
    pub fn store_bytes<const N: usize>(&self, addr: u64, bytes: [u8; N]) -> Result<(), TrapCode> {
        self.write(addr, &bytes)
    }

    /// `memory.fill`
    pub fn fill(&self, dst: u64, value: u8, len: u64) -> Result<(), TrapCode> {
        let mut data = self.data.write();
        let dst = usize::try_from(dst).map_err(|_| TrapCode::MemoryOutOfBounds)?;
        let len = usize::try_from(len).map_err(|_| TrapCode::MemoryOutOfBounds)?;
        let slice = data
            .get_mut(dst..)
            .and_then(|tail| tail.get_mut(..len))
            .ok_or(TrapCode::MemoryOutOfBounds)?;
        slice.fill(value);
        drop(data);
        self.mark_dirty(dst, len);
        Ok(())
    }

    /// `memory.copy`; behaves as if the source were read into a
    /// temporary first, so overlapping regions are fine.
    pub fn copy_within(&self, dst: u64, src: u64, len: u64) -> Result<(), TrapCode> {
        let mut data = self.data.write();
        let dst = usize::try_from(dst).map_err(|_| TrapCode::MemoryOutOfBounds)?;
        let src = usize::try_from(src).map_err(|_| TrapCode::MemoryOutOfBounds)?;
        let len = usize::try_from(len).map_err(|_| TrapCode::MemoryOutOfBounds)?;
        // bound checks required even for len == 0
        data.get(src..)
            .and_then(|tail| tail.get(..len))
            .ok_or(TrapCode::MemoryOutOfBounds)?;
        data.get(dst..)
            .and_then(|tail| tail.get(..len))
            .ok_or(TrapCode::MemoryOutOfBounds)?;
        data.copy_within(src..src + len, dst);
        drop(data);
        self.mark_dirty(dst, len);
        Ok(())
    }

    /// `memory.init` from a (possibly dropped) data segment.
    pub fn init(&self, dst: u64, segment: &[u8], src: u64, len: u64) -> Result<(), TrapCode> {
        let mut data = self.data.write();
        let dst = usize::try_from(dst).map_err(|_| TrapCode::MemoryOutOfBounds)?;
        let src = usize::try_from(src).map_err(|_| TrapCode::MemoryOutOfBounds)?;
        let len = usize::try_from(len).map_err(|_| TrapCode::MemoryOutOfBounds)?;
        let dst_slice = data
            .get_mut(dst..)
            .and_then(|tail| tail.get_mut(..len))
            .ok_or(TrapCode::MemoryOutOfBounds)?;
        let src_slice = segment
            .get(src..)
            .and_then(|tail| tail.get(..len))
            .ok_or(TrapCode::MemoryOutOfBounds)?;
        dst_slice.copy_from_slice(src_slice);
        drop(data);
        self.mark_dirty(dst, len);
        Ok(())
    }

    /// Runs `f` over the raw data under both the shared-memory mutex
    /// and the data write lock. Atomic opcodes funnel through here.
    pub fn with_atomic<R>(
        &self,
        f: impl FnOnce(&mut [u8]) -> Result<R, TrapCode>,
    ) -> Result<R, TrapCode> {
        let _shared = self.shared_lock.lock();
        let mut data = self.data.write();
        f(&mut data[..])
    }

    /// Records an atomic write for dirty tracking; callers of
    /// [`Self::with_atomic`] that mutate must follow up with this.
    pub fn mark_atomic_write(&self, addr: u64, len: usize) {
        self.mark_dirty(addr as usize, len);
    }

    /// Visits every dirty page that still has nonzero content.
    /// Offsets are byte offsets, ascending, multiples of the image
    /// page size.
    pub fn for_each_dirty_page(
        &self,
        mut f: impl FnMut(u32, &[u8]) -> Result<(), std::io::Error>,
    ) -> Result<(), std::io::Error> {
        let data = self.data.read();
        let dirty = self.dirty.lock();
        let page_size = N_BYTES_PER_IMAGE_PAGE as usize;
        for (page, bit) in dirty.iter().enumerate() {
            if !*bit {
                continue;
            }
            let start = page * page_size;
            let end = (start + page_size).min(data.len());
            let chunk = &data[start..end];
            if chunk.iter().all(|&byte| byte == 0) {
                // restore pre-zeroes the region, all-zero pages can be
                // omitted even when they were written to
                continue;
            }
            f(start as u32, chunk)?;
        }
        Ok(())
    }

    /// Applies one page record from an image. Later records win.
    pub fn restore_page(&self, offset: u32, bytes: &[u8]) -> Result<(), TrapCode> {
        self.write(offset as u64, bytes)
    }

    #[cfg(feature = "shared-memory")]
    fn wait_cell(&self, addr: u32) -> Arc<WaitCell> {
        let mut map = self.waiters.lock().expect("wait queue poisoned");
        map.entry(addr).or_default().clone()
    }

    /// `memory.atomic.wait32/64`. `timeout_ns < 0` waits forever.
    /// `cancelled` is polled so a terminating executor unblocks.
    #[cfg(feature = "shared-memory")]
    pub fn atomic_wait(
        &self,
        addr: u32,
        expect: u64,
        is_64: bool,
        timeout_ns: i64,
        cancelled: &dyn Fn() -> bool,
    ) -> Result<u32, TrapCode> {
        if !self.shared {
            return Err(TrapCode::ExpectedSharedMemory);
        }
        let cell = self.wait_cell(addr);
        let mut state = cell.state.lock().expect("wait cell poisoned");
        // the value check and enqueue are atomic with respect to
        // notify, which also takes the cell lock
        let current = {
            let _shared = self.shared_lock.lock();
            let data = self.data.read();
            let addr = addr as usize;
            if is_64 {
                let bytes = data.get(addr..addr + 8).ok_or(TrapCode::MemoryOutOfBounds)?;
                u64::from_le_bytes(bytes.try_into().unwrap())
            } else {
                let bytes = data.get(addr..addr + 4).ok_or(TrapCode::MemoryOutOfBounds)?;
                u32::from_le_bytes(bytes.try_into().unwrap()) as u64
            }
        };
        if current != expect {
            return Ok(ATOMIC_WAIT_NOT_EQUAL);
        }
        let deadline = if timeout_ns < 0 {
            None
        } else {
            Some(Instant::now() + Duration::from_nanos(timeout_ns as u64))
        };
        state.waiters += 1;
        loop {
            if state.wakeups > 0 {
                state.wakeups -= 1;
                state.waiters -= 1;
                return Ok(ATOMIC_WAIT_OK);
            }
            if cancelled() {
                state.waiters -= 1;
                return Ok(ATOMIC_WAIT_OK);
            }
            // bounded slices keep the terminate signal observable
            let slice = Duration::from_millis(50);
            let wait_for = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        state.waiters -= 1;
                        return Ok(ATOMIC_WAIT_TIMED_OUT);
                    }
                    (deadline - now).min(slice)
                }
                None => slice,
            };
            let (next, _timed_out) = cell
                .cond
                .wait_timeout(state, wait_for)
                .expect("wait cell poisoned");
            state = next;
        }
    }

    /// `memory.atomic.notify`: wakes up to `count` waiters at `addr`,
    /// returning how many were woken.
    #[cfg(feature = "shared-memory")]
    pub fn atomic_notify(&self, addr: u32, count: u32) -> Result<u32, TrapCode> {
        if !self.shared {
            // notifying an unshared memory is valid and wakes nobody
            return Ok(0);
        }
        let cell = self.wait_cell(addr);
        let mut state = cell.state.lock().expect("wait cell poisoned");
        let woken = count.min(state.waiters.saturating_sub(state.wakeups));
        state.wakeups += woken;
        drop(state);
        cell.cond.notify_all();
        Ok(woken)
    }
}
