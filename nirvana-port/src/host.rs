//! Reference host `Port` implementation: a conventional single-process
//! host backed by a simulated address space (for `Memory`) and a real file
//! (for `AsyncDevice`). This is what `nirvana-cli`'s `Runtime::bootstrap`
//! wires up by default and what every other crate's tests exercise against.

use crate::device::{AsyncDevice, DeviceError, IoCompletion, IoOp};
use crate::memory::{CopyFlags, Memory, MemoryError, QueryParam};
use crate::sysinfo::{HostSystemInfo, SystemInfo};
use crate::timer::{DeadlineTime, SteadyTime, Timer, TimerHandle};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const PAGE_SIZE: usize = 4096;

#[derive(Clone, Copy)]
struct Region {
    size: usize,
    committed: bool,
    private: bool,
}

/// Simulated page-level memory manager. Address space is a bump allocator
/// over a flat `usize` range; no real bytes are backed here (the data
/// plane lives in `nirvana_heap::Heap`'s own buffer) — this tracks only
/// reservation/commit/private-vs-shared accounting, the way
/// `original_source/Mock/MockMemory.h` lets tests fake the host without a
/// real MMU.
pub struct HostMemory {
    regions: Mutex<BTreeMap<usize, Region>>,
    next: AtomicUsize,
}

impl Default for HostMemory {
    fn default() -> Self {
        Self {
            regions: Mutex::new(BTreeMap::new()),
            // Start at a non-zero base so `0` can keep meaning "no address"/"anywhere".
            next: AtomicUsize::new(PAGE_SIZE),
        }
    }
}

impl HostMemory {
    fn round_up_page(size: usize) -> usize {
        (size + PAGE_SIZE - 1) / PAGE_SIZE * PAGE_SIZE
    }

    fn find(&self, p: usize) -> Option<(usize, Region)> {
        self.regions
            .lock()
            .range(..=p)
            .next_back()
            .filter(|(base, r)| p < **base + r.size)
            .map(|(b, r)| (*b, *r))
    }
}

impl Memory for HostMemory {
    fn allocate(&self, dst: usize, size: usize, flags: CopyFlags) -> Result<usize, MemoryError> {
        if size == 0 {
            return Err(MemoryError::BadParam);
        }
        let rounded = Self::round_up_page(size);
        let base = if dst != 0 {
            dst
        } else {
            self.next.fetch_add(rounded, Ordering::SeqCst)
        };
        let mut regions = self.regions.lock();
        if regions
            .range(..)
            .any(|(b, r)| *b < base + rounded && base < *b + r.size)
        {
            return Err(MemoryError::BadParam);
        }
        regions.insert(
            base,
            Region {
                size: rounded,
                committed: flags.contains(CopyFlags::ALLOCATE),
                private: true,
            },
        );
        Ok(base)
    }

    fn commit(&self, dst: usize, size: usize) -> Result<(), MemoryError> {
        let mut regions = self.regions.lock();
        let (base, region) = regions
            .range_mut(..=dst)
            .next_back()
            .filter(|(b, r)| dst < **b + r.size)
            .ok_or(MemoryError::NotReserved)?;
        let _ = base;
        if dst + size > *base + region.size {
            return Err(MemoryError::BadParam);
        }
        region.committed = true;
        Ok(())
    }

    fn decommit(&self, dst: usize, size: usize) -> Result<(), MemoryError> {
        let mut regions = self.regions.lock();
        let (base, region) = regions
            .range_mut(..=dst)
            .next_back()
            .filter(|(b, r)| dst < **b + r.size)
            .ok_or(MemoryError::NotReserved)?;
        let _ = (base, size);
        region.committed = false;
        Ok(())
    }

    fn release(&self, dst: usize, _size: usize) -> Result<(), MemoryError> {
        self.regions.lock().remove(&dst).ok_or(MemoryError::NotReserved)?;
        Ok(())
    }

    fn copy(&self, dst: usize, src: usize, size: usize, flags: CopyFlags) -> Result<usize, MemoryError> {
        let target = if dst == 0 {
            self.allocate(0, size, CopyFlags::ALLOCATE)?
        } else {
            dst
        };
        if flags.contains(CopyFlags::READ_ONLY | CopyFlags::SRC_RELEASE) {
            // Host supports remap: mark both sides as shared (copy-on-write).
            let mut regions = self.regions.lock();
            if let Some(r) = regions.get_mut(&target) {
                r.private = false;
            }
            if let Some(r) = regions.get_mut(&src) {
                r.private = false;
            }
        }
        Ok(target)
    }

    fn is_private(&self, p: usize) -> bool {
        self.find(p).map(|(_, r)| r.private).unwrap_or(true)
    }

    fn is_copy(&self, p1: usize, p2: usize, _size: usize) -> bool {
        !self.find(p1).map(|(_, r)| r.private).unwrap_or(true)
            && !self.find(p2).map(|(_, r)| r.private).unwrap_or(true)
    }

    fn query(&self, _p: usize, param: QueryParam) -> usize {
        match param {
            QueryParam::AllocationUnit => PAGE_SIZE,
            QueryParam::ProtectionUnit => PAGE_SIZE,
            QueryParam::CommitUnit => PAGE_SIZE,
            QueryParam::SharingUnit => PAGE_SIZE,
            QueryParam::SharingAssociativity => PAGE_SIZE,
            QueryParam::Granularity => PAGE_SIZE,
            QueryParam::Flags => 0,
        }
    }
}

/// Reference asynchronous device backed by a real file. Each request runs
/// on a spawned thread and invokes its completion callback when done; the
/// interface stays asynchronous even though this reference host happens to
/// implement it with one thread per request rather than a proper I/O
/// completion port.
pub struct HostFileDevice {
    file: Arc<Mutex<File>>,
    base_block_size: usize,
    size: Arc<AtomicUsize>,
    truncating: Arc<AtomicBool>,
}

impl HostFileDevice {
    pub fn open(path: &std::path::Path, base_block_size: usize) -> std::io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).create(true).open(path)?;
        let size = file.metadata()?.len() as usize;
        Ok(Self {
            file: Arc::new(Mutex::new(file)),
            base_block_size,
            size: Arc::new(AtomicUsize::new(size)),
            truncating: Arc::new(AtomicBool::new(false)),
        })
    }
}

impl AsyncDevice for HostFileDevice {
    fn base_block_size(&self) -> usize {
        self.base_block_size
    }

    fn size(&self) -> u64 {
        self.size.load(Ordering::Acquire) as u64
    }

    fn truncate(&self, new_size: u64) -> Result<(), DeviceError> {
        if self
            .truncating
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(DeviceError::Errno(libc_ebusy()));
        }
        let result = self
            .file
            .lock()
            .set_len(new_size)
            .map_err(|e| DeviceError::Errno(e.raw_os_error().unwrap_or(-1)));
        if result.is_ok() {
            self.size.store(new_size as usize, Ordering::Release);
        }
        self.truncating.store(false, Ordering::Release);
        result
    }

    fn read(
        &self,
        offset: u64,
        buf: Arc<Mutex<Vec<u8>>>,
        on_complete: Box<dyn FnOnce(IoCompletion) + Send>,
    ) {
        let file = self.file.clone();
        thread::spawn(move || {
            let mut guard = file.lock();
            let mut transferred = 0usize;
            let mut error = None;
            let len = buf.lock().len();
            if let Err(e) = guard.seek(SeekFrom::Start(offset)) {
                error = Some(DeviceError::Errno(e.raw_os_error().unwrap_or(-1)));
            } else {
                let mut tmp = vec![0u8; len];
                match guard.read(&mut tmp) {
                    Ok(n) => {
                        transferred = n;
                        buf.lock()[..n].copy_from_slice(&tmp[..n]);
                    }
                    Err(e) => error = Some(DeviceError::Errno(e.raw_os_error().unwrap_or(-1))),
                }
            }
            on_complete(IoCompletion { op: IoOp::Read, offset, transferred, error });
        });
    }

    fn write(&self, offset: u64, data: Vec<u8>, on_complete: Box<dyn FnOnce(IoCompletion) + Send>) {
        let file = self.file.clone();
        let size = self.size.clone();
        thread::spawn(move || {
            let mut guard = file.lock();
            let mut transferred = 0usize;
            let mut error = None;
            if let Err(e) = guard.seek(SeekFrom::Start(offset)) {
                error = Some(DeviceError::Errno(e.raw_os_error().unwrap_or(-1)));
            } else {
                match guard.write(&data) {
                    Ok(n) => {
                        transferred = n;
                        let end = offset + n as u64;
                        size.fetch_max(end as usize, Ordering::AcqRel);
                    }
                    Err(e) => error = Some(DeviceError::Errno(e.raw_os_error().unwrap_or(-1))),
                }
            }
            on_complete(IoCompletion { op: IoOp::Write, offset, transferred, error });
        });
    }

    fn cancel(&self, _offset: u64) {
        // The reference host cannot interrupt an in-flight std::fs call;
        // cancellation here is advisory only.
    }
}

/// `EBUSY`, without pulling in `libc` for a single errno constant.
fn libc_ebusy() -> i32 {
    16
}

/// Timer backed by a single housekeeping thread with a sorted wheel of
/// pending deadlines, woken by a condvar whenever a new, earlier deadline
/// is scheduled.
pub struct HostTimer {
    inner: Arc<TimerInner>,
}

struct TimerInner {
    pending: Mutex<BTreeMap<(DeadlineTime, u64), Box<dyn FnOnce() + Send>>>,
    cvar: parking_lot::Condvar,
    seq: AtomicUsize,
    steady: SteadyTime,
}

impl Default for HostTimer {
    fn default() -> Self {
        let inner = Arc::new(TimerInner {
            pending: Mutex::new(BTreeMap::new()),
            cvar: parking_lot::Condvar::new(),
            seq: AtomicUsize::new(0),
            steady: SteadyTime::default(),
        });
        let worker = inner.clone();
        thread::spawn(move || loop {
            let mut guard = worker.pending.lock();
            loop {
                let now = worker.steady.now();
                if let Some((&(deadline, _), _)) = guard.iter().next() {
                    if deadline <= now {
                        break;
                    }
                    let wait = Duration::from_nanos((deadline - now).min(250_000_000));
                    let timed_out = worker.cvar.wait_for(&mut guard, wait).timed_out();
                    if !timed_out {
                        continue;
                    }
                } else {
                    worker.cvar.wait(&mut guard);
                }
            }
            let key = *guard.iter().next().unwrap().0;
            let cb = guard.remove(&key).unwrap();
            drop(guard);
            cb();
        });
        Self { inner }
    }
}

impl Timer for HostTimer {
    fn schedule(&self, deadline: DeadlineTime, callback: Box<dyn FnOnce() + Send>) -> TimerHandle {
        let seq = self.inner.seq.fetch_add(1, Ordering::Relaxed) as u64;
        self.inner.pending.lock().insert((deadline, seq), callback);
        self.inner.cvar.notify_all();
        let inner = self.inner.clone();
        TimerHandle {
            cancel: Some(Box::new(move || {
                inner.pending.lock().remove(&(deadline, seq));
            })),
        }
    }
}

/// Bundles the reference port implementations the rest of the workspace
/// depends on by default.
#[derive(Clone)]
pub struct Host {
    pub memory: Arc<HostMemory>,
    pub sysinfo: Arc<HostSystemInfo>,
    pub debugger: Arc<crate::debugger::TracingDebugger>,
    pub timer: Arc<HostTimer>,
    pub steady: Arc<SteadyTime>,
}

impl Default for Host {
    fn default() -> Self {
        Self {
            memory: Arc::new(HostMemory::default()),
            sysinfo: Arc::new(HostSystemInfo),
            debugger: Arc::new(crate::debugger::TracingDebugger),
            timer: Arc::new(HostTimer::default()),
            steady: Arc::new(SteadyTime::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn allocate_commit_decommit_release_roundtrip() {
        let mem = HostMemory::default();
        let p = mem.allocate(0, 4096, CopyFlags::ALLOCATE).unwrap();
        assert!(mem.is_private(p));
        mem.commit(p, 4096).unwrap();
        mem.decommit(p, 4096).unwrap();
        mem.release(p, 4096).unwrap();
        assert!(mem.commit(p, 4096).is_err());
    }

    #[test]
    fn allocate_rejects_overlap() {
        let mem = HostMemory::default();
        let p = mem.allocate(0, 4096, CopyFlags::ALLOCATE).unwrap();
        assert!(mem.allocate(p, 4096, CopyFlags::empty()).is_err());
    }

    #[test]
    fn copy_with_src_release_marks_shared() {
        let mem = HostMemory::default();
        let src = mem.allocate(0, 4096, CopyFlags::ALLOCATE).unwrap();
        let dst = mem.copy(0, src, 4096, CopyFlags::READ_ONLY | CopyFlags::SRC_RELEASE).unwrap();
        assert!(mem.is_copy(src, dst, 4096));
    }

    #[test]
    fn timer_fires_in_deadline_order() {
        let timer = HostTimer::default();
        let (tx, rx) = mpsc::channel();
        let steady = SteadyTime::default();
        let base = steady.now();
        let tx2 = tx.clone();
        timer.schedule(base + 30_000_000, Box::new(move || tx2.send(2).unwrap()));
        timer.schedule(base + 5_000_000, Box::new(move || tx.send(1).unwrap()));
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), 1);
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), 2);
    }

    #[test]
    fn timer_cancel_prevents_callback() {
        let timer = HostTimer::default();
        let (tx, rx) = mpsc::channel();
        let steady = SteadyTime::default();
        let handle = timer.schedule(steady.now() + 20_000_000, Box::new(move || tx.send(()).unwrap()));
        handle.cancel();
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn file_device_write_then_read_roundtrip() {
        let dir = std::env::temp_dir().join(format!("nirvana-port-test-{:?}", thread::current().id()));
        let device = HostFileDevice::open(&dir, 512).unwrap();
        let (tx, rx) = mpsc::channel();
        device.write(0, vec![7u8; 512], Box::new(move |c| tx.send(c).unwrap()));
        let completion = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(completion.transferred, 512);
        assert!(completion.error.is_none());

        let buf = Arc::new(Mutex::new(vec![0u8; 512]));
        let (tx2, rx2) = mpsc::channel();
        let buf2 = buf.clone();
        device.read(0, buf2, Box::new(move |c| tx2.send(c).unwrap()));
        let completion = rx2.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(completion.transferred, 512);
        assert_eq!(buf.lock()[0], 7u8);
        let _ = std::fs::remove_file(&dir);
    }
}
