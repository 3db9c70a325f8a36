//! In-memory driver and fault recorder for unit tests.

use alloc::collections::VecDeque;
use alloc::string::String;
use alloc::vec::Vec;

use hashbrown::HashMap;
use spin::Mutex;

use ember_core::{
    ArgHandle, DevAddr, DeviceFeatures, DeviceId, DriverError, DriverFacade, Error,
    ExceptionInfo, FaultNotifier, HardwareEventSnapshot, QueuePair, RawReport, RawSqe, Result,
    SlotRun, StreamId,
};
use ember_sqe::{CompletionReport, Sqe};

#[derive(Debug, Default)]
struct MockState {
    features: DeviceFeatures,
    next_sq: u32,
    queue_depth: u32,
    tail: u32,
    written: Vec<RawSqe>,
    sends: Vec<SlotRun>,
    reports: VecDeque<RawReport>,
    frees: Vec<DevAddr>,
    released_handles: Vec<ArgHandle>,
    released_queues: Vec<QueuePair>,
    notify_addr: DevAddr,
    notify_lookups: usize,
    events: HardwareEventSnapshot,
    event_queries: usize,
    try_again: bool,
    memory: Vec<(u64, Vec<u8>)>,
    kernel_names: HashMap<u64, String>,
    translations: HashMap<u64, DevAddr>,
}

/// Driver double recording every call
#[derive(Debug)]
pub struct MockDriver {
    state: Mutex<MockState>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::with_features(DeviceFeatures::STARS)
    }

    pub fn with_features(features: DeviceFeatures) -> Self {
        Self {
            state: Mutex::new(MockState {
                features,
                queue_depth: 1024,
                notify_addr: DevAddr::new(0x4000_0000),
                ..MockState::default()
            }),
        }
    }

    pub fn set_queue_depth(&self, depth: u32) {
        self.state.lock().queue_depth = depth;
    }

    pub fn set_notify_address(&self, addr: DevAddr) {
        self.state.lock().notify_addr = addr;
    }

    pub fn notify_lookups(&self) -> usize {
        self.state.lock().notify_lookups
    }

    pub fn set_events(&self, events: HardwareEventSnapshot) {
        self.state.lock().events = events;
    }

    pub fn event_queries(&self) -> usize {
        self.state.lock().event_queries
    }

    /// Fail the next send with `TryAgain`
    pub fn fail_next_send(&self) {
        self.state.lock().try_again = true;
    }

    pub fn push_report(&self, report: CompletionReport) {
        self.state.lock().reports.push_back(report.encode());
    }

    pub fn written(&self) -> Vec<Sqe> {
        self.state
            .lock()
            .written
            .iter()
            .map(|raw| Sqe::decode(raw).unwrap())
            .collect()
    }

    pub fn written_raw(&self) -> Vec<RawSqe> {
        self.state.lock().written.clone()
    }

    pub fn sends(&self) -> Vec<SlotRun> {
        self.state.lock().sends.clone()
    }

    pub fn frees(&self) -> Vec<DevAddr> {
        self.state.lock().frees.clone()
    }

    pub fn released_handles(&self) -> Vec<ArgHandle> {
        self.state.lock().released_handles.clone()
    }

    pub fn released_queues(&self) -> Vec<QueuePair> {
        self.state.lock().released_queues.clone()
    }

    pub fn write_memory(&self, addr: DevAddr, bytes: &[u8]) {
        self.state.lock().memory.push((addr.raw(), bytes.to_vec()));
    }

    pub fn add_kernel_name(&self, pc: u64, name: &str) {
        self.state.lock().kernel_names.insert(pc, String::from(name));
    }

    pub fn add_translation(&self, phys: u64, addr: DevAddr) {
        self.state.lock().translations.insert(phys, addr);
    }
}

impl DriverFacade for MockDriver {
    fn allocate_queue_pair(&self, _device_id: DeviceId, _stream_id: StreamId) -> Result<QueuePair> {
        let mut s = self.state.lock();
        let sq_id = s.next_sq;
        s.next_sq += 1;
        Ok(QueuePair {
            sq_id,
            cq_id: sq_id,
            depth: s.queue_depth,
        })
    }

    fn occupy_descriptor_slots(&self, qp: &QueuePair, count: u32) -> Result<SlotRun> {
        if count > qp.depth {
            return Err(Error::QueueFull);
        }
        let mut s = self.state.lock();
        let pos = s.tail;
        s.tail = (s.tail + count) % qp.depth;
        Ok(SlotRun { pos, count })
    }

    fn write_descriptors(&self, _qp: &QueuePair, run: SlotRun, sqes: &[RawSqe]) -> Result<()> {
        if sqes.len() != run.count as usize {
            return Err(Error::InvalidParameter);
        }
        self.state.lock().written.extend_from_slice(sqes);
        Ok(())
    }

    fn send_descriptors(&self, _qp: &QueuePair, run: SlotRun) -> Result<()> {
        let mut s = self.state.lock();
        if s.try_again {
            s.try_again = false;
            return Err(Error::TryAgain);
        }
        s.sends.push(run);
        Ok(())
    }

    fn poll_completions(
        &self,
        _qp: &QueuePair,
        _timeout_ms: u32,
        out: &mut Vec<RawReport>,
    ) -> Result<usize> {
        let mut s = self.state.lock();
        let n = s.reports.len();
        out.extend(s.reports.drain(..));
        Ok(n)
    }

    fn release_queue_pair(&self, qp: &QueuePair) -> Result<()> {
        self.state.lock().released_queues.push(*qp);
        Ok(())
    }

    fn features(&self, _device_id: DeviceId) -> DeviceFeatures {
        self.state.lock().features
    }

    fn hardware_events(&self, _device_id: DeviceId) -> Result<HardwareEventSnapshot> {
        let mut s = self.state.lock();
        s.event_queries += 1;
        Ok(s.events.clone())
    }

    fn resolve_notify_address(
        &self,
        _local: DeviceId,
        _remote: DeviceId,
        _notify_id: u32,
    ) -> Result<DevAddr> {
        let mut s = self.state.lock();
        s.notify_lookups += 1;
        Ok(s.notify_addr)
    }

    fn read_device_memory(&self, _device_id: DeviceId, addr: DevAddr, buf: &mut [u8]) -> Result<()> {
        let s = self.state.lock();
        let addr = addr.raw();
        for (base, bytes) in &s.memory {
            let end = base + bytes.len() as u64;
            if addr >= *base && addr + buf.len() as u64 <= end {
                let start = (addr - base) as usize;
                buf.copy_from_slice(&bytes[start..start + buf.len()]);
                return Ok(());
            }
        }
        Err(Error::Driver(DriverError::MemoryAccess))
    }

    fn free_device_memory(&self, _device_id: DeviceId, addr: DevAddr) -> Result<()> {
        self.state.lock().frees.push(addr);
        Ok(())
    }

    fn release_arg_handle(&self, handle: ArgHandle) {
        self.state.lock().released_handles.push(handle);
    }

    fn lookup_kernel_name(&self, _device_id: DeviceId, pc_start: u64) -> Option<String> {
        self.state.lock().kernel_names.get(&pc_start).cloned()
    }

    fn translate_physical(&self, _device_id: DeviceId, phys: u64) -> Option<DevAddr> {
        self.state.lock().translations.get(&phys).copied()
    }
}

/// Fault callback that keeps every exception it receives
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    calls: Mutex<Vec<ExceptionInfo>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<ExceptionInfo> {
        self.calls.lock().clone()
    }
}

impl FaultNotifier for RecordingNotifier {
    fn notify(&self, info: &ExceptionInfo) {
        self.calls.lock().push(info.clone());
    }
}
