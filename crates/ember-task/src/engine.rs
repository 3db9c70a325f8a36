//! # Task Lifecycle Engine
//!
//! Drives tasks of one device through encode, submit, completion and
//! release. Every kind-specific step goes through the kind's slots in the
//! [`Registry`]; the engine itself only keeps the accounting.
//!
//! ## Completion routing
//!
//! ```text
//!   report (stream, task)
//!        │
//!        ├─► wire alias? ──► (owning stream, task)
//!        │
//!        ▼
//!   stream context ──► task ──► decode slot ──► received += 1
//!                                                   │
//!                                  received == expected ──► finalize (once)
//! ```
//!
//! Reports for unknown tasks and reports beyond the expected count are
//! logged and dropped; they never disturb other tasks.

use alloc::vec;
use alloc::vec::Vec;
use core::fmt;

use hashbrown::HashMap;

use ember_core::{
    DeviceFeatures, DeviceId, DispatchConfig, DriverFacade, Error, FaultNotifier,
    HardwareEventSnapshot, QueuePair, RawSqe, Result, RuntimeErrorCode, StreamId, TaskId,
    ThreadId,
};
use ember_sqe::{CompletionReport, Sqe, SqeFlags, TsCommand};

use crate::ffts::{ContextFault, HcclIndexPool};
use crate::registry::{
    DecodeAction, DecodeCtx, EncodeCtx, FinalizeCtx, LegacyEncode, Registry, TaskOps,
};
use crate::task::{Outcome, Task, TaskIdAllocator, TaskPayload, TaskState};

// =============================================================================
// STREAM CONTEXT
// =============================================================================

/// Per-stream state: queue pair, live tasks and id allocation
#[derive(Debug)]
struct StreamContext {
    qp: QueuePair,
    tasks: HashMap<TaskId, Task>,
    ids: TaskIdAllocator,
    sticky_error: RuntimeErrorCode,
    hccl_pool: HcclIndexPool,
}

impl StreamContext {
    fn task_mut(&mut self, stream_id: StreamId, task_id: TaskId) -> Result<&mut Task> {
        self.tasks
            .get_mut(&task_id)
            .ok_or(Error::UnknownTask { stream_id, task_id })
    }
}

// =============================================================================
// ENGINE
// =============================================================================

/// Lifecycle engine for the streams of one device
pub struct TaskEngine<'a, D: DriverFacade> {
    registry: &'a Registry,
    notifier: &'a dyn FaultNotifier,
    driver: D,
    config: DispatchConfig,
    device_id: DeviceId,
    features: DeviceFeatures,
    streams: HashMap<StreamId, StreamContext>,
    routes: HashMap<(StreamId, TaskId), (StreamId, TaskId)>,
}

impl<D: DriverFacade + fmt::Debug> fmt::Debug for TaskEngine<'_, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskEngine")
            .field("driver", &self.driver)
            .field("device_id", &self.device_id)
            .field("features", &self.features)
            .field("streams", &self.streams.len())
            .finish_non_exhaustive()
    }
}

impl<'a, D: DriverFacade> TaskEngine<'a, D> {
    /// Engine for `device_id`; the feature set is queried once here
    pub fn new(
        registry: &'a Registry,
        notifier: &'a dyn FaultNotifier,
        driver: D,
        config: DispatchConfig,
        device_id: DeviceId,
    ) -> Result<Self> {
        config.validate()?;
        let features = driver.features(device_id);
        log::info!(
            "task engine up, device_id={}, features={:?}",
            device_id,
            features
        );
        Ok(Self {
            registry,
            notifier,
            driver,
            config,
            device_id,
            features,
            streams: HashMap::new(),
            routes: HashMap::new(),
        })
    }

    /// Driver
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Device features
    pub fn features(&self) -> DeviceFeatures {
        self.features
    }

    /// Dispatch configuration
    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// First failure seen on a stream
    pub fn sticky_error(&self, stream_id: StreamId) -> Option<RuntimeErrorCode> {
        self.streams.get(&stream_id).map(|s| s.sticky_error)
    }

    /// Look up a live task
    pub fn task(&self, stream_id: StreamId, task_id: TaskId) -> Option<&Task> {
        self.streams.get(&stream_id)?.tasks.get(&task_id)
    }

    fn stream_mut(&mut self, stream_id: StreamId) -> Result<&mut StreamContext> {
        self.streams
            .get_mut(&stream_id)
            .ok_or(Error::UnknownStream(stream_id))
    }

    // -------------------------------------------------------------------------
    // Streams
    // -------------------------------------------------------------------------

    /// Bind a queue pair to a new stream
    pub fn open_stream(&mut self, stream_id: StreamId) -> Result<()> {
        if self.streams.contains_key(&stream_id) {
            return Err(Error::InvalidState);
        }
        let qp = self.driver.allocate_queue_pair(self.device_id, stream_id)?;
        log::debug!(
            "stream opened, stream_id={}, sq_id={}, cq_id={}, depth={}",
            stream_id,
            qp.sq_id,
            qp.cq_id,
            qp.depth
        );
        self.streams.insert(
            stream_id,
            StreamContext {
                qp,
                tasks: HashMap::new(),
                ids: TaskIdAllocator::new(self.config.task_id_max),
                sticky_error: RuntimeErrorCode::SUCCESS,
                hccl_pool: HcclIndexPool::new(),
            },
        );
        Ok(())
    }

    /// Release every remaining task and the queue pair of a stream
    ///
    /// Fails with [`Error::Busy`] while any task is still in flight.
    pub fn close_stream(&mut self, stream_id: StreamId) -> Result<()> {
        let stream = self.stream_mut(stream_id)?;
        if stream.tasks.values().any(|t| t.state().is_in_flight()) {
            return Err(Error::Busy);
        }
        let Some(mut stream) = self.streams.remove(&stream_id) else {
            return Err(Error::UnknownStream(stream_id));
        };
        for (_, mut task) in stream.tasks.drain() {
            let ops = self.registry.ops(task.kind());
            release_task(&mut task, ops, &self.driver);
        }
        self.routes.retain(|_, owner| owner.0 != stream_id);
        self.driver.release_queue_pair(&stream.qp)?;
        log::debug!("stream closed, stream_id={}", stream_id);
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Create a task in `Init` and return its id
    pub fn create_task(
        &mut self,
        stream_id: StreamId,
        thread_id: ThreadId,
        payload: TaskPayload,
    ) -> Result<TaskId> {
        let device_id = self.device_id;
        let stream = self.stream_mut(stream_id)?;
        let tasks = &stream.tasks;
        let (task_id, flip) = stream.ids.allocate(|id| tasks.contains_key(&id))?;
        let task = Task::new(payload, stream_id, task_id, flip, device_id, thread_id);
        log::trace!(
            "task created, stream_id={}, task_id={}, flip_num={}, task_type={}",
            stream_id,
            task_id,
            flip,
            task.kind().name()
        );
        stream.tasks.insert(task_id, task);
        Ok(task_id)
    }

    /// Build and write the task's descriptors
    ///
    /// A kind that cannot produce a descriptor on an SQE device gets one
    /// INVALID descriptor so the hardware still reports a completion; on a
    /// legacy device a reserved command takes that place. Legacy devices
    /// without a command for the kind fail with [`Error::NotSupported`]
    /// before any slot is occupied.
    pub fn encode(&mut self, stream_id: StreamId, task_id: TaskId) -> Result<()> {
        let Some(stream) = self.streams.get_mut(&stream_id) else {
            return Err(Error::UnknownStream(stream_id));
        };
        let StreamContext {
            qp,
            tasks,
            hccl_pool,
            ..
        } = stream;
        let task = tasks
            .get_mut(&task_id)
            .ok_or(Error::UnknownTask { stream_id, task_id })?;
        if task.state() != TaskState::Init {
            return Err(Error::InvalidState);
        }

        let ops = self.registry.ops(task.kind());
        let ctx = EncodeCtx {
            config: &self.config,
            features: self.features,
            driver: &self.driver,
            hccl_pool,
        };

        let raws: Vec<RawSqe> = if self.features.uses_sqe() {
            let mut scratch = Vec::new();
            (ops.encode_sqe)(task, &ctx, &mut scratch);
            if scratch.is_empty() {
                log::warn!(
                    "no descriptor built, invalidating, stream_id={}, task_id={}, task_type={}",
                    stream_id,
                    task_id,
                    task.kind().name()
                );
                scratch.push(Sqe::invalid(stream_id, task_id));
            }
            scratch
                .iter_mut()
                .map(|sqe| {
                    if self.config.wr_cqe {
                        sqe.header.flags |= SqeFlags::WR_CQE;
                    }
                    if self.config.overflow_detect {
                        sqe.header.flags |= SqeFlags::OVERFLOW_EN;
                    }
                    let raw = sqe.encode_or_invalid();
                    trace_sqe(&raw);
                    raw
                })
                .collect()
        } else {
            let mut cmd = match (ops.encode_legacy)(task, &ctx) {
                LegacyEncode::Command(cmd) => cmd,
                LegacyEncode::Invalid => {
                    log::warn!(
                        "no legacy command built, invalidating, stream_id={}, task_id={}, task_type={}",
                        stream_id,
                        task_id,
                        task.kind().name()
                    );
                    TsCommand::invalid(stream_id, task_id)
                }
                LegacyEncode::Unsupported => {
                    log::warn!(
                        "task type {} has no legacy command, stream_id={}, task_id={}",
                        task.kind().name(),
                        stream_id,
                        task_id
                    );
                    return Err(Error::NotSupported);
                }
            };
            if self.config.wr_cqe {
                cmd.flags |= TsCommand::FLAG_WR_CQE;
            }
            vec![cmd.encode()]
        };

        let count = raws.len() as u32;
        if count > qp.depth {
            log::error!(
                "descriptors exceed queue depth, stream_id={}, task_id={}, sqe_num={}, depth={}",
                stream_id,
                task_id,
                count,
                qp.depth
            );
            return Err(Error::QueueFull);
        }
        let run = self.driver.occupy_descriptor_slots(qp, count)?;
        self.driver.write_descriptors(qp, run, &raws)?;

        task.run = Some(run);
        task.expected = if self.config.wr_cqe { count as u16 } else { 0 };
        task.received = 0;
        task.state = TaskState::Encoded;

        if let Some(wire) = task.wire_ids() {
            if wire != (stream_id, task_id) {
                self.routes.insert(wire, (stream_id, task_id));
            }
        }

        log::debug!(
            "task encoded, stream_id={}, task_id={}, task_type={}, sq_pos={}, sqe_num={}",
            stream_id,
            task_id,
            task.kind().name(),
            run.pos,
            count
        );
        Ok(())
    }

    /// Advance the queue tail over the task's descriptors
    ///
    /// [`Error::TryAgain`] from the driver is returned as is; the task stays
    /// `Encoded` and the caller decides when to retry.
    pub fn submit(&mut self, stream_id: StreamId, task_id: TaskId) -> Result<()> {
        let Some(stream) = self.streams.get_mut(&stream_id) else {
            return Err(Error::UnknownStream(stream_id));
        };
        let StreamContext {
            qp,
            tasks,
            sticky_error,
            ..
        } = stream;
        let task = tasks
            .get_mut(&task_id)
            .ok_or(Error::UnknownTask { stream_id, task_id })?;
        let (TaskState::Encoded, Some(run)) = (task.state(), task.run) else {
            return Err(Error::InvalidState);
        };

        self.driver.send_descriptors(qp, run)?;
        task.state = TaskState::Submitted;
        log::trace!("task submitted, stream_id={}, task_id={}", stream_id, task_id);

        // nothing will report back without completion entries
        if task.expected == 0 {
            let ops = self.registry.ops(task.kind());
            let mut ctx = FinalizeCtx {
                config: &self.config,
                features: self.features,
                driver: &self.driver,
                notifier: self.notifier,
                sticky_error,
                describe_error: ops.describe_error,
            };
            finalize_task(task, ops, &mut ctx);
        }
        Ok(())
    }

    /// Fold one completion report into its task
    ///
    /// Returns the task id when this report completed the task.
    pub fn on_completion_report(&mut self, report: &CompletionReport) -> Result<Option<TaskId>> {
        let key = (report.stream_id, report.task_id);
        let (stream_id, task_id) = self.routes.get(&key).copied().unwrap_or(key);

        let Some(stream) = self.streams.get_mut(&stream_id) else {
            log::warn!(
                "report for unknown stream dropped, stream_id={}, task_id={}",
                stream_id,
                task_id
            );
            return Err(Error::UnknownStream(stream_id));
        };
        let StreamContext {
            tasks,
            sticky_error,
            ..
        } = stream;
        let Some(task) = tasks.get_mut(&task_id) else {
            log::warn!(
                "report for unknown task dropped, stream_id={}, task_id={}",
                stream_id,
                task_id
            );
            return Err(Error::UnknownTask { stream_id, task_id });
        };

        match task.state() {
            TaskState::Submitted | TaskState::AwaitingCompletion => {}
            TaskState::Completed(_) => {
                log::warn!(
                    "completion beyond expected count dropped, stream_id={}, task_id={}, expected={}",
                    stream_id,
                    task_id,
                    task.expected_completions()
                );
                return Err(Error::CompletionOverflow);
            }
            state => {
                log::warn!(
                    "report for task not in flight dropped, stream_id={}, task_id={}, state={:?}",
                    stream_id,
                    task_id,
                    state
                );
                return Err(Error::InvalidState);
            }
        }
        if task.received >= task.expected {
            return Err(Error::CompletionOverflow);
        }

        let events = if report.is_error() {
            self.driver
                .hardware_events(self.device_id)
                .unwrap_or_else(|e| {
                    log::warn!("hardware event query failed: {}", e);
                    HardwareEventSnapshot::empty()
                })
        } else {
            HardwareEventSnapshot::empty()
        };

        let ops = self.registry.ops(task.kind());
        let decode_ctx = DecodeCtx {
            config: &self.config,
            features: self.features,
            events: &events,
        };
        let action = (ops.decode)(task, report, &decode_ctx);
        task.received += 1;
        task.state = TaskState::AwaitingCompletion;

        if action == DecodeAction::CompleteNow && task.received < task.expected {
            log::warn!(
                "remaining completions written off, stream_id={}, task_id={}, received={}, expected={}",
                stream_id,
                task_id,
                task.received,
                task.expected
            );
            task.received = task.expected;
        }

        if task.received < task.expected {
            return Ok(None);
        }

        let mut ctx = FinalizeCtx {
            config: &self.config,
            features: self.features,
            driver: &self.driver,
            notifier: self.notifier,
            sticky_error,
            describe_error: ops.describe_error,
        };
        finalize_task(task, ops, &mut ctx);
        Ok(Some(task_id))
    }

    /// Drain the stream's completion queue
    ///
    /// Returns the ids of the tasks that completed.
    pub fn poll(&mut self, stream_id: StreamId, timeout_ms: u32) -> Result<Vec<TaskId>> {
        let qp = self
            .streams
            .get(&stream_id)
            .map(|s| s.qp)
            .ok_or(Error::UnknownStream(stream_id))?;

        let mut raws = Vec::new();
        self.driver.poll_completions(&qp, timeout_ms, &mut raws)?;

        let mut completed = Vec::new();
        for raw in &raws {
            let report = match CompletionReport::decode(raw) {
                Ok(report) => report,
                Err(e) => {
                    log::warn!("undecodable report dropped: {}", e);
                    continue;
                }
            };
            match self.on_completion_report(&report) {
                Ok(Some(task_id)) => completed.push(task_id),
                Ok(None) => {}
                Err(e) => log::debug!(
                    "report not applied, stream_id={}, task_id={}: {}",
                    report.stream_id,
                    report.task_id,
                    e
                ),
            }
        }
        Ok(completed)
    }

    /// Remove a task and run its release slot
    ///
    /// Tasks that were never submitted are accepted. A task still in flight
    /// is refused with [`Error::Busy`].
    pub fn release(&mut self, stream_id: StreamId, task_id: TaskId) -> Result<Task> {
        let stream = self.stream_mut(stream_id)?;
        if stream.task_mut(stream_id, task_id)?.state().is_in_flight() {
            return Err(Error::Busy);
        }
        let mut task = stream
            .tasks
            .remove(&task_id)
            .ok_or(Error::UnknownTask { stream_id, task_id })?;

        if let Some(wire) = task.wire_ids() {
            self.routes.remove(&wire);
        }
        let ops = self.registry.ops(task.kind());
        release_task(&mut task, ops, &self.driver);
        Ok(task)
    }

    // -------------------------------------------------------------------------
    // Out-of-band fault input
    // -------------------------------------------------------------------------

    /// Record a memory-fault code raised outside the completion path
    pub fn note_memory_fault(
        &mut self,
        stream_id: StreamId,
        task_id: TaskId,
        code: RuntimeErrorCode,
    ) -> Result<()> {
        let task = self.stream_mut(stream_id)?.task_mut(stream_id, task_id)?;
        if !code.is_mte_class() {
            return Err(Error::InvalidParameter);
        }
        task.set_mte_error(code);
        Ok(())
    }

    /// Append a context fault to an FFTS+ task that has not finalized
    pub fn push_context_fault(
        &mut self,
        stream_id: StreamId,
        task_id: TaskId,
        fault: ContextFault,
    ) -> Result<()> {
        let task = self.stream_mut(stream_id)?.task_mut(stream_id, task_id)?;
        if matches!(task.state(), TaskState::Completed(_) | TaskState::Released) {
            log::warn!(
                "context fault after finalize dropped, stream_id={}, task_id={}, context_id={}",
                stream_id,
                task_id,
                fault.context_id
            );
            return Err(Error::InvalidState);
        }
        match task.payload_mut() {
            TaskPayload::FftsPlus(p) => {
                p.push_context_fault(fault);
                Ok(())
            }
            _ => Err(Error::InvalidParameter),
        }
    }
}

// =============================================================================
// SHARED STEPS
// =============================================================================

fn finalize_task(task: &mut Task, ops: &TaskOps, ctx: &mut FinalizeCtx<'_>) {
    if task.state().is_completed() {
        return;
    }
    (ops.finalize)(task, ctx);
    task.state = TaskState::Completed(if task.error_code().is_success() {
        Outcome::Success
    } else {
        Outcome::Failed
    });
}

fn release_task(task: &mut Task, ops: &TaskOps, driver: &dyn DriverFacade) {
    if !task.release_done {
        (ops.release)(task, driver);
        task.release_done = true;
    }
    task.state = TaskState::Released;
}

#[cfg(feature = "trace-sqe")]
fn trace_sqe(raw: &RawSqe) {
    for (i, word) in raw.chunks_exact(4).enumerate() {
        log::trace!(
            "sqe word[{:02}]={:#010x}",
            i,
            u32::from_le_bytes([word[0], word[1], word[2], word[3]])
        );
    }
}

#[cfg(not(feature = "trace-sqe"))]
#[inline(always)]
fn trace_sqe(_raw: &RawSqe) {}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::sync::Arc;
    use alloc::vec;

    use ember_core::{DevAddr, ExpandInfo, CONTEXT_ID_NONE};
    use ember_sqe::{ErrorTypeBits, LegacyTaskType, SqeType};

    use crate::batch::{AicpuEntry, BatchEntry, BatchPayload};
    use crate::classify::{classify, ErrorFamily};
    use crate::ffts::{ContextErrorType, DumpMode, FftsPlusPayload, FftsSubType};
    use crate::generic::{KernelCore, KernelPayload};
    use crate::mock::{MockDriver, RecordingNotifier};
    use crate::notify::{Notify, NotifyRecordPayload, WriteValuePayload};
    use crate::registry::build_registry;

    fn kernel() -> TaskPayload {
        TaskPayload::Kernel(KernelPayload {
            core: KernelCore::Aic,
            block_dim: 4,
            pc: DevAddr::new(0x1000),
            args: DevAddr::new(0x2000),
            args_size: 32,
        })
    }

    fn ffts(contexts: u16, dump: DumpMode) -> TaskPayload {
        TaskPayload::FftsPlus(FftsPlusPayload::new(
            FftsSubType::Normal,
            DevAddr::new(0x10_0000),
            contexts,
            dump,
        ))
    }

    fn aicpu(on_device: bool, args: u64) -> BatchEntry {
        BatchEntry::Aicpu(AicpuEntry {
            on_device,
            kernel_type: 2,
            args: DevAddr::new(args),
            args_size: 16,
            so_name: DevAddr::new(0x100),
            kernel_name: DevAddr::new(0x200),
            arg_handle: None,
        })
    }

    fn launch<D: DriverFacade>(
        engine: &mut TaskEngine<'_, D>,
        stream_id: StreamId,
        payload: TaskPayload,
    ) -> TaskId {
        let task_id = engine.create_task(stream_id, 7, payload).unwrap();
        engine.encode(stream_id, task_id).unwrap();
        engine.submit(stream_id, task_id).unwrap();
        task_id
    }

    #[test]
    fn test_kernel_round_trip() {
        let registry = build_registry();
        let notifier = RecordingNotifier::new();
        let mut engine =
            TaskEngine::new(&registry, &notifier, MockDriver::new(), DispatchConfig::default(), 0)
                .unwrap();
        engine.open_stream(3).unwrap();
        let task_id = launch(&mut engine, 3, kernel());

        let written = engine.driver().written();
        assert_eq!(written.len(), 1);
        assert!(written[0].header.flags.contains(SqeFlags::WR_CQE));
        assert_eq!(engine.task(3, task_id).unwrap().state(), TaskState::Submitted);

        let report = CompletionReport::success(3, task_id, SqeType::Aic as u8);
        assert_eq!(engine.on_completion_report(&report), Ok(Some(task_id)));

        let task = engine.task(3, task_id).unwrap();
        assert_eq!(task.error_code(), RuntimeErrorCode::SUCCESS);
        assert_eq!(task.state(), TaskState::Completed(Outcome::Success));
        assert!(notifier.calls().is_empty());
        assert_eq!(engine.driver().event_queries(), 0);
    }

    #[test]
    fn test_received_never_exceeds_expected() {
        let registry = build_registry();
        let notifier = RecordingNotifier::new();
        let mut engine =
            TaskEngine::new(&registry, &notifier, MockDriver::new(), DispatchConfig::default(), 0)
                .unwrap();
        engine.open_stream(0).unwrap();
        let task_id = launch(&mut engine, 0, kernel());

        let failure = CompletionReport::failure(
            0,
            task_id,
            SqeType::Aic as u8,
            ErrorTypeBits::TIMEOUT,
            0,
        );
        assert_eq!(engine.on_completion_report(&failure), Ok(Some(task_id)));
        assert_eq!(
            engine.on_completion_report(&failure),
            Err(Error::CompletionOverflow)
        );

        let task = engine.task(0, task_id).unwrap();
        assert_eq!(task.received_completions(), task.expected_completions());
        assert_eq!(task.state(), TaskState::Completed(Outcome::Failed));
        assert_eq!(notifier.calls().len(), 1);
        assert_eq!(notifier.calls()[0].retcode, RuntimeErrorCode::AICORE_TIMEOUT);
        assert_eq!(engine.sticky_error(0), Some(RuntimeErrorCode::AICORE_TIMEOUT));
    }

    #[test]
    fn test_unknown_report_dropped() {
        let registry = build_registry();
        let notifier = RecordingNotifier::new();
        let mut engine =
            TaskEngine::new(&registry, &notifier, MockDriver::new(), DispatchConfig::default(), 0)
                .unwrap();
        engine.open_stream(0).unwrap();
        let task_id = launch(&mut engine, 0, kernel());

        let stray = CompletionReport::success(0, task_id + 1, 0);
        assert_eq!(
            engine.on_completion_report(&stray),
            Err(Error::UnknownTask {
                stream_id: 0,
                task_id: task_id + 1
            })
        );
        let stray = CompletionReport::success(9, task_id, 0);
        assert_eq!(
            engine.on_completion_report(&stray),
            Err(Error::UnknownStream(9))
        );
        assert_eq!(
            engine.task(0, task_id).unwrap().state(),
            TaskState::Submitted
        );
    }

    #[test]
    fn test_try_again_not_retried() {
        let registry = build_registry();
        let notifier = RecordingNotifier::new();
        let mut engine =
            TaskEngine::new(&registry, &notifier, MockDriver::new(), DispatchConfig::default(), 0)
                .unwrap();
        engine.open_stream(0).unwrap();
        let task_id = engine.create_task(0, 1, kernel()).unwrap();
        engine.encode(0, task_id).unwrap();

        engine.driver().fail_next_send();
        assert_eq!(engine.submit(0, task_id), Err(Error::TryAgain));
        assert!(engine.driver().sends().is_empty());
        assert_eq!(engine.task(0, task_id).unwrap().state(), TaskState::Encoded);

        assert_eq!(engine.submit(0, task_id), Ok(()));
        assert_eq!(engine.driver().sends().len(), 1);
    }

    #[test]
    fn test_invalid_task_gets_invalid_descriptor() {
        let registry = build_registry();
        let notifier = RecordingNotifier::new();
        let mut engine =
            TaskEngine::new(&registry, &notifier, MockDriver::new(), DispatchConfig::default(), 0)
                .unwrap();
        engine.open_stream(0).unwrap();
        let payload = TaskPayload::Kernel(KernelPayload {
            core: KernelCore::Aic,
            block_dim: 0,
            pc: DevAddr::null(),
            args: DevAddr::null(),
            args_size: 0,
        });
        let task_id = launch(&mut engine, 0, payload);

        let written = engine.driver().written();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].header.sqe_type, SqeType::Invalid);
        assert_eq!(engine.task(0, task_id).unwrap().expected_completions(), 1);
    }

    #[test]
    fn test_legacy_device() {
        let registry = build_registry();
        let notifier = RecordingNotifier::new();
        let driver = MockDriver::with_features(DeviceFeatures::empty());
        let mut engine =
            TaskEngine::new(&registry, &notifier, driver, DispatchConfig::default(), 0).unwrap();
        engine.open_stream(0).unwrap();

        let task_id = launch(&mut engine, 0, kernel());
        let raw = engine.driver().written_raw();
        let cmd = TsCommand::decode(&raw[0]).unwrap();
        assert_eq!(cmd.task_id, task_id);
        assert_ne!(cmd.flags & TsCommand::FLAG_WR_CQE, 0);

        let batch = engine
            .create_task(0, 1, TaskPayload::Batch(BatchPayload::new(vec![aicpu(false, 0x1000)])))
            .unwrap();
        assert_eq!(engine.encode(0, batch), Err(Error::NotSupported));
        assert_eq!(engine.driver().written_raw().len(), 1);
    }

    #[test]
    fn test_run_longer_than_queue_rejected() {
        let registry = build_registry();
        let notifier = RecordingNotifier::new();
        let driver = MockDriver::new();
        driver.set_queue_depth(2);
        let mut engine =
            TaskEngine::new(&registry, &notifier, driver, DispatchConfig::default(), 0).unwrap();
        engine.open_stream(0).unwrap();

        let dump = DumpMode::WithDump {
            info_addr: DevAddr::new(0x8000),
            length: 64,
        };
        let task_id = engine.create_task(0, 1, ffts(1, dump)).unwrap();
        assert_eq!(engine.encode(0, task_id), Err(Error::QueueFull));
        assert!(engine.driver().written_raw().is_empty());
        assert_eq!(engine.task(0, task_id).unwrap().state(), TaskState::Init);

        let task_id = launch(&mut engine, 0, kernel());
        assert_eq!(engine.task(0, task_id).unwrap().expected_completions(), 1);
    }

    #[test]
    fn test_legacy_malformed_payload_invalidated() {
        let registry = build_registry();
        let notifier = RecordingNotifier::new();
        let driver = MockDriver::with_features(DeviceFeatures::empty());
        let mut engine =
            TaskEngine::new(&registry, &notifier, driver, DispatchConfig::default(), 0).unwrap();
        engine.open_stream(0).unwrap();

        // three bytes has no awsize encoding
        let payload = WriteValuePayload::new(DevAddr::new(0x4000), &[1, 2, 3]).unwrap();
        let task_id = launch(&mut engine, 0, TaskPayload::WriteValue(payload));

        let raw = engine.driver().written_raw();
        assert_eq!(raw.len(), 1);
        let cmd = TsCommand::decode(&raw[0]).unwrap();
        assert_eq!(cmd.task_type, LegacyTaskType::Reserved);
        assert_eq!(cmd.task_id, task_id);
        assert_ne!(cmd.flags & TsCommand::FLAG_WR_CQE, 0);
        assert_eq!(engine.driver().sends().len(), 1);

        let task = engine.task(0, task_id).unwrap();
        assert_eq!(task.state(), TaskState::Submitted);
        assert_eq!(task.expected_completions(), 1);
    }

    #[test]
    fn test_batch_counts_encoded_entries() {
        let registry = build_registry();
        let notifier = RecordingNotifier::new();
        let mut engine =
            TaskEngine::new(&registry, &notifier, MockDriver::new(), DispatchConfig::default(), 0)
                .unwrap();
        engine.open_stream(0).unwrap();
        let entries = vec![aicpu(false, 0x1000), aicpu(false, 0), aicpu(false, 0x3000)];
        let task_id = launch(&mut engine, 0, TaskPayload::Batch(BatchPayload::new(entries)));
        assert_eq!(engine.task(0, task_id).unwrap().expected_completions(), 2);

        let ok = CompletionReport::success(0, task_id, SqeType::AicpuH as u8);
        let bad = CompletionReport::failure(
            0,
            task_id,
            SqeType::AicpuH as u8,
            ErrorTypeBits::TRAP,
            0,
        );
        assert_eq!(engine.on_completion_report(&bad), Ok(None));
        assert_eq!(engine.on_completion_report(&ok), Ok(Some(task_id)));

        let task = engine.task(0, task_id).unwrap();
        let TaskPayload::Batch(p) = task.payload() else {
            unreachable!()
        };
        assert_eq!(p.sub_state().error_type, ErrorTypeBits::TRAP);
        assert_eq!(task.error_code(), RuntimeErrorCode::TASK_TRAP);

        let calls = notifier.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0].expand,
            ExpandInfo::Batch {
                sqe_type: SqeType::AicpuH as u8,
                error_type: ErrorTypeBits::TRAP.bits(),
                completed: 2,
            }
        );
    }

    #[test]
    fn test_device_aicpu_failure_ends_batch() {
        let registry = build_registry();
        let notifier = RecordingNotifier::new();
        let mut engine =
            TaskEngine::new(&registry, &notifier, MockDriver::new(), DispatchConfig::default(), 0)
                .unwrap();
        engine.open_stream(0).unwrap();
        let entries = vec![aicpu(true, 0x1000), aicpu(true, 0x2000), aicpu(true, 0x3000)];
        let task_id = launch(&mut engine, 0, TaskPayload::Batch(BatchPayload::new(entries)));

        let bad = CompletionReport::failure(
            0,
            task_id,
            SqeType::AicpuD as u8,
            ErrorTypeBits::EXCEPTION,
            0,
        );
        assert_eq!(engine.on_completion_report(&bad), Ok(Some(task_id)));
        let task = engine.task(0, task_id).unwrap();
        assert_eq!(task.received_completions(), 3);
        assert_eq!(task.error_code(), RuntimeErrorCode::AICPU_EXCEPTION);
        assert_eq!(engine.driver().event_queries(), 1);
    }

    #[test]
    fn test_ffts_round_trip_leaves_context_list_empty() {
        let registry = build_registry();
        let notifier = RecordingNotifier::new();
        let mut engine =
            TaskEngine::new(&registry, &notifier, MockDriver::new(), DispatchConfig::default(), 0)
                .unwrap();
        engine.open_stream(1).unwrap();
        let dump = DumpMode::WithDump {
            info_addr: DevAddr::new(0x9000),
            length: 32,
        };
        let task_id = launch(&mut engine, 1, ffts(2, dump));
        assert_eq!(engine.task(1, task_id).unwrap().expected_completions(), 3);

        let mut done = None;
        for sqe_type in [SqeType::AicpuD, SqeType::FftsPlus, SqeType::AicpuD] {
            let report = CompletionReport::success(1, task_id, sqe_type as u8);
            done = engine.on_completion_report(&report).unwrap();
        }
        assert_eq!(done, Some(task_id));

        let task = engine.task(1, task_id).unwrap();
        assert_eq!(task.error_code(), RuntimeErrorCode::SUCCESS);
        let TaskPayload::FftsPlus(p) = task.payload() else {
            unreachable!()
        };
        assert!(p.context_list().is_empty());
        assert!(p.fault_report().is_empty());
    }

    #[test]
    fn test_ffts_wire_alias_routes_reports() {
        let registry = build_registry();
        let notifier = RecordingNotifier::new();
        let driver = MockDriver::with_features(DeviceFeatures::STARS | DeviceFeatures::SOFTWARE_SQ);
        let mut engine =
            TaskEngine::new(&registry, &notifier, driver, DispatchConfig::default(), 0).unwrap();
        engine.open_stream(5).unwrap();
        let task_id = launch(&mut engine, 5, ffts(1, DumpMode::NoDump));

        let (wire_stream, wire_task) = engine.task(5, task_id).unwrap().wire_ids().unwrap();
        engine
            .driver()
            .push_report(CompletionReport::success(wire_stream, wire_task, SqeType::FftsPlus as u8));
        assert_eq!(engine.poll(5, 0), Ok(vec![task_id]));

        engine.release(5, task_id).unwrap();
        assert_eq!(
            engine.on_completion_report(&CompletionReport::success(wire_stream, wire_task, 0)),
            Err(Error::UnknownStream(wire_stream))
        );
    }

    #[test]
    fn test_ffts_end_to_end_context_fault() {
        let registry = build_registry();
        let notifier = RecordingNotifier::new();
        let mut engine =
            TaskEngine::new(&registry, &notifier, MockDriver::new(), DispatchConfig::default(), 0)
                .unwrap();
        engine.open_stream(2).unwrap();
        let task_id = launch(&mut engine, 2, ffts(2, DumpMode::NoDump));

        let ctx0 = ContextFault {
            context_id: 0,
            thread_id: 0,
            error_type: ContextErrorType::Sdma,
            fault_pc: 0,
        };
        engine.push_context_fault(2, task_id, ctx0).unwrap();

        let failure = CompletionReport::failure(
            2,
            task_id,
            SqeType::FftsPlus as u8,
            ErrorTypeBits::EXCEPTION,
            7,
        );
        assert_eq!(engine.on_completion_report(&failure), Ok(Some(task_id)));

        // the success report and the second push arrive after finalize
        let success = CompletionReport::success(2, task_id, SqeType::FftsPlus as u8);
        assert_eq!(
            engine.on_completion_report(&success),
            Err(Error::CompletionOverflow)
        );
        let ctx1 = ContextFault {
            context_id: 1,
            ..ctx0
        };
        assert_eq!(
            engine.push_context_fault(2, task_id, ctx1),
            Err(Error::InvalidState)
        );

        let expected_code = classify(
            ErrorFamily::FftsPlus,
            ErrorTypeBits::EXCEPTION,
            7,
            DeviceFeatures::STARS,
            &HardwareEventSnapshot::empty(),
        );
        let calls = notifier.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].retcode, expected_code);
        assert_eq!(calls[0].retcode, RuntimeErrorCode::FFTSPLUS_EXCEPTION);
        assert!(matches!(
            calls[0].expand,
            ExpandInfo::FftsPlus { context_id: 0, .. }
        ));

        let task = engine.task(2, task_id).unwrap();
        let TaskPayload::FftsPlus(p) = task.payload() else {
            unreachable!()
        };
        assert_eq!(p.fault_report().len(), 1);
        assert_eq!(p.fault_report()[0].fault.context_id, 0);
        assert!(p.context_list().is_empty());
    }

    #[test]
    fn test_ffts_context_fault_reports_polled_in_order() {
        let registry = build_registry();
        let notifier = RecordingNotifier::new();
        let mut engine =
            TaskEngine::new(&registry, &notifier, MockDriver::new(), DispatchConfig::default(), 0)
                .unwrap();
        engine.open_stream(2).unwrap();
        let task_id = launch(&mut engine, 2, ffts(2, DumpMode::NoDump));

        let ctx0 = ContextFault {
            context_id: 0,
            thread_id: 3,
            error_type: ContextErrorType::Sdma,
            fault_pc: 0,
        };
        engine.push_context_fault(2, task_id, ctx0).unwrap();
        engine.driver().push_report(CompletionReport::failure(
            2,
            task_id,
            SqeType::FftsPlus as u8,
            ErrorTypeBits::EXCEPTION,
            7,
        ));
        engine
            .driver()
            .push_report(CompletionReport::success(2, task_id, SqeType::FftsPlus as u8));

        // one descriptor, so the failing report completes the task and the
        // trailing success is absorbed by the poll loop
        assert_eq!(engine.poll(2, 0), Ok(vec![task_id]));
        let ctx1 = ContextFault {
            context_id: 1,
            ..ctx0
        };
        assert_eq!(
            engine.push_context_fault(2, task_id, ctx1),
            Err(Error::InvalidState)
        );

        let calls = notifier.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].retcode, RuntimeErrorCode::FFTSPLUS_EXCEPTION);
        assert!(matches!(
            calls[0].expand,
            ExpandInfo::FftsPlus {
                context_id: 0,
                thread_id: 3,
                ..
            }
        ));

        let task = engine.task(2, task_id).unwrap();
        assert_eq!(task.received_completions(), 1);
        let TaskPayload::FftsPlus(p) = task.payload() else {
            unreachable!()
        };
        assert!(p.context_list().is_empty());
        let contexts: Vec<u16> = p.fault_report().iter().map(|s| s.fault.context_id).collect();
        assert_eq!(contexts, [0]);
    }

    #[test]
    fn test_ffts_failure_without_faults_reports_none_context() {
        let registry = build_registry();
        let notifier = RecordingNotifier::new();
        let mut engine =
            TaskEngine::new(&registry, &notifier, MockDriver::new(), DispatchConfig::default(), 0)
                .unwrap();
        engine.open_stream(2).unwrap();
        let task_id = launch(&mut engine, 2, ffts(1, DumpMode::NoDump));
        let failure = CompletionReport::failure(
            2,
            task_id,
            SqeType::FftsPlus as u8,
            ErrorTypeBits::TIMEOUT,
            0,
        );
        engine.on_completion_report(&failure).unwrap();
        let calls = notifier.calls();
        assert_eq!(calls.len(), 1);
        assert!(matches!(
            calls[0].expand,
            ExpandInfo::FftsPlus {
                context_id: CONTEXT_ID_NONE,
                ..
            }
        ));
    }

    #[test]
    fn test_benign_code_not_notified() {
        let registry = build_registry();
        let notifier = RecordingNotifier::new();
        let mut engine =
            TaskEngine::new(&registry, &notifier, MockDriver::new(), DispatchConfig::default(), 0)
                .unwrap();
        engine.open_stream(0).unwrap();
        let task_id = launch(&mut engine, 0, TaskPayload::PlaceHolder);
        let report = CompletionReport::failure(
            0,
            task_id,
            SqeType::PlaceHolder as u8,
            ErrorTypeBits::SW_STATUS,
            RuntimeErrorCode::END_OF_SEQUENCE.raw(),
        );
        assert_eq!(engine.on_completion_report(&report), Ok(Some(task_id)));
        assert!(notifier.calls().is_empty());
        assert_eq!(engine.sticky_error(0), Some(RuntimeErrorCode::SUCCESS));
        assert_eq!(
            engine.task(0, task_id).unwrap().error_code(),
            RuntimeErrorCode::END_OF_SEQUENCE
        );
    }

    #[test]
    fn test_release_lifecycle() {
        let registry = build_registry();
        let notifier = RecordingNotifier::new();
        let mut engine =
            TaskEngine::new(&registry, &notifier, MockDriver::new(), DispatchConfig::default(), 0)
                .unwrap();
        engine.open_stream(0).unwrap();

        let mut payload = FftsPlusPayload::new(
            FftsSubType::Normal,
            DevAddr::new(0x10_0000),
            1,
            DumpMode::NoDump,
        );
        payload.owns_context_memory = true;

        // never submitted
        let idle = engine.create_task(0, 1, TaskPayload::FftsPlus(payload)).unwrap();
        let released = engine.release(0, idle).unwrap();
        assert_eq!(released.state(), TaskState::Released);
        assert_eq!(engine.driver().frees(), [DevAddr::new(0x10_0000)]);
        assert!(engine.task(0, idle).is_none());

        // in flight
        let busy = launch(&mut engine, 0, kernel());
        assert!(matches!(engine.release(0, busy), Err(Error::Busy)));
        assert_eq!(engine.close_stream(0), Err(Error::Busy));

        engine
            .on_completion_report(&CompletionReport::success(0, busy, 0))
            .unwrap();
        assert_eq!(engine.close_stream(0), Ok(()));
        assert_eq!(engine.driver().released_queues().len(), 1);
    }

    #[test]
    fn test_in_flight_id_not_reissued() {
        let registry = build_registry();
        let notifier = RecordingNotifier::new();
        let config = DispatchConfig {
            task_id_max: 1,
            ..DispatchConfig::default()
        };
        let mut engine = TaskEngine::new(&registry, &notifier, MockDriver::new(), config, 0).unwrap();
        engine.open_stream(0).unwrap();

        assert_eq!(engine.create_task(0, 1, kernel()), Ok(0));
        assert_eq!(engine.create_task(0, 1, kernel()), Ok(1));
        assert_eq!(engine.create_task(0, 1, kernel()), Err(Error::Busy));

        engine.release(0, 0).unwrap();
        assert_eq!(engine.create_task(0, 1, kernel()), Ok(0));
        assert_eq!(engine.task(0, 0).unwrap().flip(), 1);
    }

    #[test]
    fn test_cross_device_notify_record() {
        let registry = build_registry();
        let notifier = RecordingNotifier::new();
        let mut engine =
            TaskEngine::new(&registry, &notifier, MockDriver::new(), DispatchConfig::default(), 0)
                .unwrap();
        engine.open_stream(0).unwrap();
        let notify = Arc::new(Notify::new(11, 3));
        for _ in 0..2 {
            let payload = TaskPayload::NotifyRecord(NotifyRecordPayload {
                notify: Arc::clone(&notify),
            });
            let task_id = launch(&mut engine, 0, payload);
            engine
                .on_completion_report(&CompletionReport::success(0, task_id, 0))
                .unwrap();
        }
        assert_eq!(engine.driver().notify_lookups(), 1);
        assert!(engine
            .driver()
            .written()
            .iter()
            .all(|s| s.header.sqe_type == SqeType::WriteValue));
    }

    #[test]
    fn test_sdma_failure_uses_fault_events() {
        let registry = build_registry();
        let notifier = RecordingNotifier::new();
        let driver =
            MockDriver::with_features(DeviceFeatures::STARS | DeviceFeatures::FAULT_EVENT_QUERY);
        driver.set_events(HardwareEventSnapshot {
            ras_alarm: true,
            ..HardwareEventSnapshot::empty()
        });
        let mut engine =
            TaskEngine::new(&registry, &notifier, driver, DispatchConfig::default(), 0).unwrap();
        engine.open_stream(0).unwrap();
        let payload = TaskPayload::Memcpy(crate::generic::MemcpyPayload {
            src: DevAddr::new(0x1000),
            dst: DevAddr::new(0x2000),
            len: 4096,
        });
        let task_id = launch(&mut engine, 0, payload);
        let failure = CompletionReport::failure(
            0,
            task_id,
            SqeType::Sdma as u8,
            ErrorTypeBits::EXCEPTION,
            crate::classify::SDMA_STATUS_LINK_ERROR,
        );
        engine.on_completion_report(&failure).unwrap();
        assert_eq!(
            engine.task(0, task_id).unwrap().error_code(),
            RuntimeErrorCode::SDMA_POISON_ERROR
        );
    }

    #[test]
    fn test_memory_fault_requires_mte_class() {
        let registry = build_registry();
        let notifier = RecordingNotifier::new();
        let mut engine =
            TaskEngine::new(&registry, &notifier, MockDriver::new(), DispatchConfig::default(), 0)
                .unwrap();
        engine.open_stream(0).unwrap();
        let task_id = launch(&mut engine, 0, ffts(1, DumpMode::NoDump));
        assert_eq!(
            engine.note_memory_fault(0, task_id, RuntimeErrorCode::TASK_TRAP),
            Err(Error::InvalidParameter)
        );
        engine
            .note_memory_fault(0, task_id, RuntimeErrorCode::SDMA_POISON_ERROR)
            .unwrap();
        let failure = CompletionReport::failure(
            0,
            task_id,
            SqeType::FftsPlus as u8,
            ErrorTypeBits::EXCEPTION,
            0,
        );
        engine.on_completion_report(&failure).unwrap();
        assert_eq!(
            notifier.calls()[0].retcode,
            RuntimeErrorCode::SDMA_POISON_ERROR
        );
    }
}
