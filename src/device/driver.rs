//! Driver back-end: the kernel path.
//!
//! Reads and writes are expressed as transactions: built, enqueued to the
//! device's service thread, and awaited on a single-use completion channel
//! with no timeout. The device completes the transaction, fills in status
//! and transferred length, and signals the waiter. Control operations
//! travel the same queue as typed requests with their own reply channels.

use std::io;
use std::sync::mpsc::{self, Receiver, Sender, SyncSender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use crate::device::{BlockInfo, SliceExtent, SliceRange, VolumeInfo};
use crate::error::{BlocksealError, Result};

/// Direction of a block transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoOp {
    Read,
    Write,
}

/// One block transaction, owned by the waiter while queued.
pub struct Transaction {
    pub op: IoOp,
    pub offset: u64,
    /// Write payload on submission; read payload after completion.
    pub data: Vec<u8>,
    /// Bytes actually transferred, filled in by the device.
    pub actual: usize,
    /// Completion status, filled in by the device.
    pub status: io::Result<()>,
}

/// Typed control operations, the driver face of the ioctl surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlOp {
    BlockInfo,
    VolumeQuery,
    VsliceQuery(Vec<u64>),
    Extend(SliceExtent),
}

/// Replies paired with [`ControlOp`] variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlReply {
    BlockInfo(BlockInfo),
    VolumeQuery(VolumeInfo),
    VsliceQuery(Vec<SliceRange>),
    Extend,
}

/// A request traveling a device service queue.
pub enum Request {
    Io {
        txn: Transaction,
        done: SyncSender<Transaction>,
    },
    Control {
        op: ControlOp,
        reply: SyncSender<Result<ControlReply>>,
    },
}

/// A handle onto a device service queue.
pub struct DriverBackend {
    queue: Sender<Request>,
}

impl DriverBackend {
    /// Connects to an already-running device service.
    pub fn connect(queue: Sender<Request>) -> Self {
        Self { queue }
    }

    fn transact(&self, op: IoOp, offset: u64, data: Vec<u8>) -> Result<Transaction> {
        let len = data.len();
        let (done, wait) = mpsc::sync_channel(1);
        let txn = Transaction {
            op,
            offset,
            data,
            actual: 0,
            status: Ok(()),
        };
        self.queue
            .send(Request::Io { txn, done })
            .map_err(|_| service_gone())?;
        let mut txn = wait.recv().map_err(|_| service_gone())?;
        std::mem::replace(&mut txn.status, Ok(()))?;
        if txn.actual != len {
            return Err(BlocksealError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("incomplete transaction: have {}, need {len}", txn.actual),
            )));
        }
        Ok(txn)
    }

    fn control(&self, op: ControlOp) -> Result<ControlReply> {
        let (reply, wait) = mpsc::sync_channel(1);
        self.queue
            .send(Request::Control { op, reply })
            .map_err(|_| service_gone())?;
        wait.recv().map_err(|_| service_gone())?
    }

    pub(crate) fn block_info(&mut self) -> Result<BlockInfo> {
        match self.control(ControlOp::BlockInfo)? {
            ControlReply::BlockInfo(info) => Ok(info),
            _ => Err(mismatched_reply()),
        }
    }

    pub(crate) fn volume_query(&mut self) -> Result<VolumeInfo> {
        match self.control(ControlOp::VolumeQuery)? {
            ControlReply::VolumeQuery(info) => Ok(info),
            _ => Err(mismatched_reply()),
        }
    }

    pub(crate) fn vslice_query(&mut self, starts: &[u64]) -> Result<Vec<SliceRange>> {
        match self.control(ControlOp::VsliceQuery(starts.to_vec()))? {
            ControlReply::VsliceQuery(ranges) => Ok(ranges),
            _ => Err(mismatched_reply()),
        }
    }

    pub(crate) fn extend(&mut self, extent: SliceExtent) -> Result<()> {
        match self.control(ControlOp::Extend(extent))? {
            ControlReply::Extend => Ok(()),
            _ => Err(mismatched_reply()),
        }
    }

    pub(crate) fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let txn = self.transact(IoOp::Read, offset, vec![0u8; buf.len()])?;
        buf.copy_from_slice(&txn.data);
        Ok(())
    }

    pub(crate) fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        self.transact(IoOp::Write, offset, buf.to_vec())?;
        Ok(())
    }
}

fn service_gone() -> BlocksealError {
    BlocksealError::Io(io::Error::new(
        io::ErrorKind::BrokenPipe,
        "device service disconnected",
    ))
}

fn mismatched_reply() -> BlocksealError {
    BlocksealError::Internal("mismatched control reply from device".to_string())
}

/// Volume-manager state of an in-process device.
struct SliceMap {
    slice_size: u64,
    vslice_count: u64,
    allocated: Vec<bool>,
}

struct DeviceState {
    info: BlockInfo,
    data: Vec<u8>,
    vm: Option<SliceMap>,
    writes: u64,
}

/// An in-process block device serving the driver queue from its own thread.
///
/// This is the embedding harness for driver-backed superblocks: tests and
/// in-process drivers construct one, call [`DeviceService::serve`] for a
/// [`DriverBackend`], and keep the service handle to observe or perturb the
/// device underneath the superblock.
#[derive(Clone)]
pub struct DeviceService {
    state: Arc<Mutex<DeviceState>>,
}

impl DeviceService {
    /// Creates a zero-filled device of `block_count` blocks.
    pub fn new(block_size: u32, block_count: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(DeviceState {
                info: BlockInfo {
                    block_size,
                    block_count,
                },
                data: vec![0u8; (u64::from(block_size) * block_count) as usize],
                vm: None,
                writes: 0,
            })),
        }
    }

    /// Puts a volume manager in front of the device.
    ///
    /// The device grows to `slice_size * vslice_count` bytes. Slice 0 starts
    /// allocated (it holds the head metadata region); all others start
    /// unallocated.
    pub fn with_volume_manager(self, slice_size: u64, vslice_count: u64) -> Self {
        {
            let mut dev = lock(&self.state);
            let total = slice_size * vslice_count;
            dev.data.resize(total as usize, 0);
            dev.info.block_count = total / u64::from(dev.info.block_size);
            let mut allocated = vec![false; vslice_count as usize];
            if let Some(first) = allocated.first_mut() {
                *first = true;
            }
            dev.vm = Some(SliceMap {
                slice_size,
                vslice_count,
                allocated,
            });
        }
        self
    }

    /// Spawns the service thread and returns a connected back-end.
    ///
    /// The thread exits when every connected back-end is dropped.
    pub fn serve(&self) -> Result<DriverBackend> {
        let (tx, rx) = mpsc::channel();
        let state = Arc::clone(&self.state);
        thread::Builder::new()
            .name("blockseal-device".to_string())
            .spawn(move || service_loop(state, rx))?;
        Ok(DriverBackend::connect(tx))
    }

    /// Snapshot of `len` device bytes at `offset`.
    pub fn read(&self, offset: u64, len: usize) -> Vec<u8> {
        let dev = lock(&self.state);
        let off = offset as usize;
        dev.data.get(off..off + len).map(<[u8]>::to_vec).unwrap_or_default()
    }

    /// Overwrites device bytes at `offset`.
    pub fn write(&self, offset: u64, data: &[u8]) {
        let mut dev = lock(&self.state);
        let off = offset as usize;
        if let Some(dst) = dev.data.get_mut(off..off + data.len()) {
            dst.copy_from_slice(data);
        }
    }

    /// Allocation state of one virtual slice; false without a volume manager.
    pub fn is_allocated(&self, vslice: u64) -> bool {
        let dev = lock(&self.state);
        dev.vm
            .as_ref()
            .and_then(|vm| vm.allocated.get(vslice as usize).copied())
            .unwrap_or(false)
    }

    /// Number of write transactions the device has completed.
    pub fn write_count(&self) -> u64 {
        lock(&self.state).writes
    }

    /// Forces the allocation state of one virtual slice.
    pub fn set_allocated(&self, vslice: u64, allocated: bool) {
        let mut dev = lock(&self.state);
        if let Some(vm) = dev.vm.as_mut() {
            if let Some(slot) = vm.allocated.get_mut(vslice as usize) {
                *slot = allocated;
            }
        }
    }
}

fn lock(state: &Arc<Mutex<DeviceState>>) -> MutexGuard<'_, DeviceState> {
    match state.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn service_loop(state: Arc<Mutex<DeviceState>>, rx: Receiver<Request>) {
    while let Ok(req) = rx.recv() {
        let mut dev = lock(&state);
        match req {
            Request::Io { mut txn, done } => {
                dev.transact(&mut txn);
                let _ = done.send(txn);
            }
            Request::Control { op, reply } => {
                let _ = reply.send(dev.control(op));
            }
        }
    }
}

impl DeviceState {
    fn transact(&mut self, txn: &mut Transaction) {
        let len = txn.data.len();
        let in_bounds = txn
            .offset
            .checked_add(len as u64)
            .is_some_and(|end| end <= self.data.len() as u64);
        if !in_bounds {
            txn.actual = 0;
            txn.status = Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "transaction outside device",
            ));
            return;
        }
        let off = txn.offset as usize;
        match txn.op {
            IoOp::Read => txn.data.copy_from_slice(&self.data[off..off + len]),
            IoOp::Write => {
                self.data[off..off + len].copy_from_slice(&txn.data);
                self.writes += 1;
            }
        }
        txn.actual = len;
        txn.status = Ok(());
    }

    fn control(&mut self, op: ControlOp) -> Result<ControlReply> {
        match op {
            ControlOp::BlockInfo => Ok(ControlReply::BlockInfo(self.info)),
            ControlOp::VolumeQuery => {
                let vm = self.volume_manager()?;
                Ok(ControlReply::VolumeQuery(VolumeInfo {
                    slice_size: vm.slice_size,
                    vslice_count: vm.vslice_count,
                }))
            }
            ControlOp::VsliceQuery(starts) => {
                let vm = self.volume_manager()?;
                let mut ranges = Vec::with_capacity(starts.len());
                for start in starts {
                    let start = start as usize;
                    let Some(&allocated) = vm.allocated.get(start) else {
                        return Err(BlocksealError::InvalidArgs(
                            "virtual slice out of range",
                        ));
                    };
                    let count = vm.allocated[start..]
                        .iter()
                        .take_while(|&&a| a == allocated)
                        .count();
                    ranges.push(SliceRange {
                        allocated,
                        count: count as u64,
                    });
                }
                Ok(ControlReply::VsliceQuery(ranges))
            }
            ControlOp::Extend(extent) => {
                let vm = self.volume_manager_mut()?;
                let end = extent
                    .offset
                    .checked_add(extent.length)
                    .filter(|&end| end <= vm.vslice_count)
                    .ok_or(BlocksealError::InvalidArgs("extend range out of bounds"))?;
                for slice in extent.offset..end {
                    vm.allocated[slice as usize] = true;
                }
                Ok(ControlReply::Extend)
            }
        }
    }

    fn volume_manager(&self) -> Result<&SliceMap> {
        self.vm.as_ref().ok_or_else(|| {
            BlocksealError::Unsupported("device has no volume manager".to_string())
        })
    }

    fn volume_manager_mut(&mut self) -> Result<&mut SliceMap> {
        self.vm.as_mut().ok_or_else(|| {
            BlocksealError::Unsupported("device has no volume manager".to_string())
        })
    }
}
