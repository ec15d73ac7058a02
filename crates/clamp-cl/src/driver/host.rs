//! In-process reference driver.
//!
//! [`HostDriver`] implements [`ComputeDriver`] entirely on the host so the
//! runtime can be exercised on machines without an OpenCL ICD. Kernel source
//! is scanned for entry points and parameter signatures; the body of each
//! entry point is a Rust closure registered on the driver and run once per
//! work-item.
//!
//! Queues are in-order and deferred: an enqueue validates and snapshots the
//! bound arguments, and the work runs when an event is waited on or a
//! blocking transfer drains the queue. A fault raised by a work-item is
//! sticky and surfaces as [`StatusCode::EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST`]
//! on every later wait or transfer through that queue.
//!
//! ```
//! use clamp_cl::driver::HostDriver;
//!
//! let driver = HostDriver::new().with_kernel("fill", |item, args| {
//!     let value = args.float(1)?;
//!     args.store::<f32>(0, item.global_id(0), value)
//! });
//! assert!(driver.has_kernel("fill"));
//! ```

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytemuck::Pod;
use tracing::{debug, trace, warn};

use super::{BuildFailure, ComputeDriver, DeviceType, DriverResult, KernelArg, StatusCode};
use crate::source::{self, AddressSpace, KernelSignature, ParamKind, SourceDiagnostic};

const DEFAULT_VENDOR: &str = "Clamp Host Reference";

// ── Kernel bodies ────────────────────────────────────────────────────────────

/// A fault raised by a host kernel body.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HostFault {
    #[error("slot {slot}: element {index} out of bounds ({len} elements)")]
    OutOfBounds { slot: u32, index: usize, len: usize },

    #[error("slot {slot} is not bound to a buffer")]
    NotABuffer { slot: u32 },

    #[error("slot {slot} is not bound to a {expected} scalar")]
    WrongScalar { slot: u32, expected: &'static str },

    #[error("slot {slot} does not exist")]
    NoSuchSlot { slot: u32 },

    #[error("buffer lock poisoned: {0}")]
    Poisoned(String),

    #[error("{0}")]
    Kernel(String),
}

/// Position of one work-item in the launch grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkItem {
    id: [usize; 3],
    size: [usize; 3],
    dims: u32,
}

impl WorkItem {
    /// `get_global_id(dim)`; 0 for dimensions beyond the launch.
    pub fn global_id(&self, dim: usize) -> usize {
        self.id.get(dim).copied().unwrap_or(0)
    }

    /// `get_global_size(dim)`; 1 for dimensions beyond the launch.
    pub fn global_size(&self, dim: usize) -> usize {
        self.size.get(dim).copied().unwrap_or(1)
    }

    pub fn work_dim(&self) -> u32 {
        self.dims
    }

    /// Row-major flat index across all dimensions.
    pub fn linear_id(&self) -> usize {
        self.id[0] + self.size[0] * (self.id[1] + self.size[1] * self.id[2])
    }
}

type KernelBody = Arc<dyn Fn(&WorkItem, &mut HostArgs<'_>) -> Result<(), HostFault> + Send + Sync>;

enum SlotValue {
    Buffer(usize),
    Int(i32),
    Float(f32),
}

/// Argument view handed to a kernel body for the duration of one launch.
///
/// Each distinct buffer is locked once per launch, so two slots bound to the
/// same buffer alias the same bytes.
pub struct HostArgs<'a> {
    values: Vec<SlotValue>,
    buffers: Vec<MutexGuard<'a, Vec<u8>>>,
}

impl<'a> HostArgs<'a> {
    fn bind(args: &'a [HostArg]) -> Result<Self, HostFault> {
        let mut blocks: Vec<&'a Arc<MemoryBlock>> = Vec::new();
        let mut buffers = Vec::new();
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            let value = match arg {
                HostArg::Int(v) => SlotValue::Int(*v),
                HostArg::Float(v) => SlotValue::Float(*v),
                HostArg::Buffer(mem) => {
                    match blocks.iter().position(|b| Arc::ptr_eq(b, &mem.block)) {
                        Some(pos) => SlotValue::Buffer(pos),
                        None => {
                            let guard = mem
                                .block
                                .bytes
                                .lock()
                                .map_err(|e| HostFault::Poisoned(e.to_string()))?;
                            blocks.push(&mem.block);
                            buffers.push(guard);
                            SlotValue::Buffer(buffers.len() - 1)
                        }
                    }
                }
            };
            values.push(value);
        }
        Ok(Self { values, buffers })
    }

    fn slot(&self, slot: u32) -> Result<&SlotValue, HostFault> {
        self.values.get(slot as usize).ok_or(HostFault::NoSuchSlot { slot })
    }

    fn buffer_index(&self, slot: u32) -> Result<usize, HostFault> {
        match self.slot(slot)? {
            SlotValue::Buffer(pos) => Ok(*pos),
            _ => Err(HostFault::NotABuffer { slot }),
        }
    }

    fn bytes(&self, slot: u32) -> Result<&[u8], HostFault> {
        let pos = self.buffer_index(slot)?;
        Ok(self.buffers[pos].as_slice())
    }

    fn bytes_mut(&mut self, slot: u32) -> Result<&mut [u8], HostFault> {
        let pos = self.buffer_index(slot)?;
        Ok(self.buffers[pos].as_mut_slice())
    }

    pub fn int(&self, slot: u32) -> Result<i32, HostFault> {
        match self.slot(slot)? {
            SlotValue::Int(v) => Ok(*v),
            _ => Err(HostFault::WrongScalar { slot, expected: "int" }),
        }
    }

    pub fn float(&self, slot: u32) -> Result<f32, HostFault> {
        match self.slot(slot)? {
            SlotValue::Float(v) => Ok(*v),
            _ => Err(HostFault::WrongScalar { slot, expected: "float" }),
        }
    }

    /// Number of whole `T` elements in the buffer at `slot`.
    pub fn len<T: Pod>(&self, slot: u32) -> Result<usize, HostFault> {
        Ok(self.bytes(slot)?.len() / size_of::<T>())
    }

    pub fn load<T: Pod>(&self, slot: u32, index: usize) -> Result<T, HostFault> {
        let bytes = self.bytes(slot)?;
        let range = element_range::<T>(slot, index, bytes.len())?;
        Ok(bytemuck::pod_read_unaligned(&bytes[range]))
    }

    pub fn store<T: Pod>(&mut self, slot: u32, index: usize, value: T) -> Result<(), HostFault> {
        let bytes = self.bytes_mut(slot)?;
        let range = element_range::<T>(slot, index, bytes.len())?;
        bytes[range].copy_from_slice(bytemuck::bytes_of(&value));
        Ok(())
    }
}

fn element_range<T>(
    slot: u32,
    index: usize,
    byte_len: usize,
) -> Result<std::ops::Range<usize>, HostFault> {
    let width = size_of::<T>();
    let len = byte_len / width;
    if index >= len {
        return Err(HostFault::OutOfBounds { slot, index, len });
    }
    Ok(index * width..(index + 1) * width)
}

// ── Handles ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct HostPlatform {
    vendor: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostDevice {
    index: usize,
    name: String,
}

impl HostDevice {
    pub fn index(&self) -> usize {
        self.index
    }
}

#[derive(Debug)]
pub struct HostContext {
    devices: Vec<HostDevice>,
    device_type: DeviceType,
}

impl HostContext {
    pub fn device_type(&self) -> DeviceType {
        self.device_type
    }
}

struct MemoryBlock {
    bytes: Mutex<Vec<u8>>,
    len: usize,
    in_use: Arc<AtomicUsize>,
}

impl Drop for MemoryBlock {
    fn drop(&mut self) {
        self.in_use.fetch_sub(self.len, Ordering::SeqCst);
    }
}

/// Device memory: a shared host byte vector.
#[derive(Clone)]
pub struct HostMemory {
    block: Arc<MemoryBlock>,
}

impl HostMemory {
    pub fn len(&self) -> usize {
        self.block.len
    }

    pub fn is_empty(&self) -> bool {
        self.block.len == 0
    }
}

impl fmt::Debug for HostMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostMemory").field("len", &self.block.len).finish()
    }
}

#[derive(Clone)]
enum HostArg {
    Buffer(HostMemory),
    Int(i32),
    Float(f32),
}

struct ProgramKernel {
    signature: Arc<KernelSignature>,
    body: KernelBody,
}

pub struct HostProgram {
    kernels: HashMap<String, ProgramKernel>,
    log: String,
}

impl HostProgram {
    pub fn kernel_names(&self) -> impl Iterator<Item = &str> {
        self.kernels.keys().map(String::as_str)
    }
}

impl fmt::Debug for HostProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostProgram").field("kernels", &self.kernels.len()).finish()
    }
}

pub struct HostKernel {
    name: String,
    signature: Arc<KernelSignature>,
    body: KernelBody,
    args: Vec<Option<HostArg>>,
}

impl HostKernel {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arity(&self) -> usize {
        self.signature.arity()
    }

    /// Whether `slot` currently holds a value.
    pub fn is_bound(&self, slot: u32) -> bool {
        matches!(self.args.get(slot as usize), Some(Some(_)))
    }

    /// The integer bound at `slot`, if any.
    pub fn bound_int(&self, slot: u32) -> Option<i32> {
        match self.args.get(slot as usize) {
            Some(Some(HostArg::Int(v))) => Some(*v),
            _ => None,
        }
    }

    /// The float bound at `slot`, if any.
    pub fn bound_float(&self, slot: u32) -> Option<f32> {
        match self.args.get(slot as usize) {
            Some(Some(HostArg::Float(v))) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Debug for HostKernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostKernel").field("name", &self.name).finish()
    }
}

struct PendingLaunch {
    seq: u64,
    kernel: String,
    body: KernelBody,
    args: Vec<HostArg>,
    global: [usize; 3],
    dims: u32,
}

impl PendingLaunch {
    fn run(&self) -> Result<(), HostFault> {
        let mut args = HostArgs::bind(&self.args)?;
        let size = self.global;
        for z in 0..size[2] {
            for y in 0..size[1] {
                for x in 0..size[0] {
                    let item = WorkItem { id: [x, y, z], size, dims: self.dims };
                    (self.body)(&item, &mut args)?;
                }
            }
        }
        Ok(())
    }
}

#[derive(Default)]
struct QueueInner {
    pending: VecDeque<PendingLaunch>,
    submitted: u64,
    completed: u64,
    fault: Option<HostFault>,
}

pub struct QueueState {
    device: usize,
    inner: Mutex<QueueInner>,
}

impl QueueState {
    /// Run every pending launch in order.
    fn drain(&self) -> DriverResult<()> {
        let mut inner = self.inner.lock().map_err(|_| StatusCode::OUT_OF_RESOURCES)?;
        while let Some(launch) = inner.pending.pop_front() {
            if inner.fault.is_none() {
                trace!(device = self.device, kernel = %launch.kernel, seq = launch.seq, "running launch");
                if let Err(fault) = launch.run() {
                    warn!(device = self.device, kernel = %launch.kernel, %fault, "work-item fault");
                    inner.fault = Some(fault);
                }
            }
            inner.completed = launch.seq;
        }
        match inner.fault {
            Some(_) => Err(StatusCode::EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST),
            None => Ok(()),
        }
    }

    /// Launches enqueued but not yet run.
    pub fn pending(&self) -> usize {
        self.inner.lock().map(|inner| inner.pending.len()).unwrap_or(0)
    }

    /// The fault that poisoned this queue, if any.
    pub fn fault(&self) -> Option<HostFault> {
        self.inner.lock().ok().and_then(|inner| inner.fault.clone())
    }
}

/// An in-order command queue.
pub type HostQueue = Arc<QueueState>;

/// Completion handle for one launch.
#[derive(Clone)]
pub struct HostEvent {
    queue: HostQueue,
    seq: u64,
}

impl fmt::Debug for HostEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostEvent").field("seq", &self.seq).finish()
    }
}

impl HostEvent {
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// True once the launch has run (successfully or not).
    pub fn is_complete(&self) -> bool {
        self.queue.inner.lock().map(|inner| inner.completed >= self.seq).unwrap_or(false)
    }
}

// ── Failure injection and launch records ─────────────────────────────────────

/// A driver operation that can be forced to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    Platforms,
    Context,
    Queue,
    Allocate,
    Build,
    CreateKernel,
    SetArg,
    Enqueue,
    Wait,
    Read,
    Write,
}

/// One accepted `enqueue_kernel` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRecord {
    pub device: usize,
    pub kernel: String,
    pub global: Vec<usize>,
    pub local: Vec<usize>,
}

#[derive(Default)]
struct DriverState {
    failures: HashMap<FailPoint, StatusCode>,
    launches: Vec<LaunchRecord>,
}

// ── HostDriver ───────────────────────────────────────────────────────────────

/// Reference [`ComputeDriver`] running kernels as host closures.
pub struct HostDriver {
    vendor: String,
    device_count: usize,
    has_platform: bool,
    memory_capacity: Option<usize>,
    kernels: HashMap<String, KernelBody>,
    in_use: Arc<AtomicUsize>,
    state: Mutex<DriverState>,
}

impl Default for HostDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl HostDriver {
    /// One platform with one device and no registered kernels.
    pub fn new() -> Self {
        Self {
            vendor: DEFAULT_VENDOR.to_string(),
            device_count: 1,
            has_platform: true,
            memory_capacity: None,
            kernels: HashMap::new(),
            in_use: Arc::new(AtomicUsize::new(0)),
            state: Mutex::new(DriverState::default()),
        }
    }

    #[must_use]
    pub fn with_devices(mut self, count: usize) -> Self {
        self.device_count = count;
        self
    }

    #[must_use]
    pub fn with_vendor(mut self, vendor: impl Into<String>) -> Self {
        self.vendor = vendor.into();
        self
    }

    /// Report no platforms at all.
    #[must_use]
    pub fn without_platform(mut self) -> Self {
        self.has_platform = false;
        self
    }

    /// Cap the total bytes of live buffers.
    #[must_use]
    pub fn with_memory_capacity(mut self, bytes: usize) -> Self {
        self.memory_capacity = Some(bytes);
        self
    }

    /// Register the host implementation of kernel `name`.
    #[must_use]
    pub fn with_kernel<F>(mut self, name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&WorkItem, &mut HostArgs<'_>) -> Result<(), HostFault> + Send + Sync + 'static,
    {
        self.kernels.insert(name.into(), Arc::new(body));
        self
    }

    pub fn has_kernel(&self, name: &str) -> bool {
        self.kernels.contains_key(name)
    }

    // Plain tables with single-step updates; a poisoned lock is taken over.
    fn state(&self) -> MutexGuard<'_, DriverState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make `point` fail with `status` until [`clear_failures`](Self::clear_failures).
    pub fn fail(&self, point: FailPoint, status: StatusCode) {
        self.state().failures.insert(point, status);
    }

    pub fn clear_failures(&self) {
        self.state().failures.clear();
    }

    /// Every launch accepted so far, oldest first.
    pub fn launches(&self) -> Vec<LaunchRecord> {
        self.state().launches.clone()
    }

    /// Bytes held by live buffers.
    pub fn memory_in_use(&self) -> usize {
        self.in_use.load(Ordering::SeqCst)
    }

    fn injected(&self, point: FailPoint) -> DriverResult<()> {
        match self.state().failures.get(&point) {
            Some(&status) => {
                debug!(?point, %status, "injected failure");
                Err(status)
            }
            None => Ok(()),
        }
    }

    fn reserve(&self, size: usize) -> DriverResult<()> {
        let Some(capacity) = self.memory_capacity else {
            self.in_use.fetch_add(size, Ordering::SeqCst);
            return Ok(());
        };
        self.in_use
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                used.checked_add(size).filter(|&total| total <= capacity)
            })
            .map(|_| ())
            .map_err(|_| StatusCode::MEM_OBJECT_ALLOCATION_FAILURE)
    }
}

fn arg_matches(param: &ParamKind, arg: &KernelArg<'_, HostMemory>) -> bool {
    match (param, arg) {
        (ParamKind::Pointer { space, .. }, KernelArg::Buffer(_)) => {
            matches!(space, AddressSpace::Global | AddressSpace::Constant)
        }
        (ParamKind::Scalar { size, .. }, KernelArg::Int(_) | KernelArg::Float(_)) => *size == 4,
        _ => false,
    }
}

impl ComputeDriver for HostDriver {
    type Platform = HostPlatform;
    type Context = HostContext;
    type Device = HostDevice;
    type Queue = HostQueue;
    type Memory = HostMemory;
    type Program = HostProgram;
    type Kernel = HostKernel;
    type Event = HostEvent;

    fn name(&self) -> &'static str {
        "host"
    }

    fn platforms(&self) -> DriverResult<Vec<HostPlatform>> {
        self.injected(FailPoint::Platforms)?;
        if !self.has_platform {
            return Err(StatusCode::PLATFORM_NOT_FOUND);
        }
        Ok(vec![HostPlatform { vendor: self.vendor.clone() }])
    }

    fn platform_vendor(&self, platform: &HostPlatform) -> DriverResult<String> {
        Ok(platform.vendor.clone())
    }

    fn create_context(
        &self,
        _platform: &HostPlatform,
        device_type: DeviceType,
    ) -> DriverResult<HostContext> {
        self.injected(FailPoint::Context)?;
        if self.device_count == 0 {
            return Err(StatusCode::DEVICE_NOT_FOUND);
        }
        let devices = (0..self.device_count)
            .map(|index| HostDevice { index, name: format!("Host Reference Device {index}") })
            .collect();
        Ok(HostContext { devices, device_type })
    }

    fn context_devices(&self, context: &HostContext) -> DriverResult<Vec<HostDevice>> {
        Ok(context.devices.clone())
    }

    fn device_name(&self, device: &HostDevice) -> DriverResult<String> {
        Ok(device.name.clone())
    }

    fn create_queue(&self, context: &HostContext, device: &HostDevice) -> DriverResult<HostQueue> {
        self.injected(FailPoint::Queue)?;
        if !context.devices.contains(device) {
            return Err(StatusCode::INVALID_DEVICE);
        }
        Ok(Arc::new(QueueState { device: device.index, inner: Mutex::new(QueueInner::default()) }))
    }

    fn create_buffer(&self, _context: &HostContext, size: usize) -> DriverResult<HostMemory> {
        self.injected(FailPoint::Allocate)?;
        if size == 0 {
            return Err(StatusCode::INVALID_BUFFER_SIZE);
        }
        self.reserve(size)?;
        let block = MemoryBlock {
            bytes: Mutex::new(vec![0u8; size]),
            len: size,
            in_use: Arc::clone(&self.in_use),
        };
        Ok(HostMemory { block: Arc::new(block) })
    }

    fn build_program(
        &self,
        _context: &HostContext,
        source: &str,
        options: &str,
    ) -> Result<HostProgram, BuildFailure> {
        if let Err(status) = self.injected(FailPoint::Build) {
            return Err(BuildFailure { status, log: "build failure injected by host driver\n".into() });
        }
        let signatures = source::scan(source).map_err(|diagnostics| BuildFailure {
            status: StatusCode::BUILD_PROGRAM_FAILURE,
            log: source::format_log(&diagnostics),
        })?;

        let mut kernels = HashMap::with_capacity(signatures.len());
        let mut missing = Vec::new();
        for signature in signatures {
            match self.kernels.get(&signature.name) {
                Some(body) => {
                    let body = Arc::clone(body);
                    kernels.insert(
                        signature.name.clone(),
                        ProgramKernel { signature: Arc::new(signature), body },
                    );
                }
                None => missing.push(SourceDiagnostic {
                    line: signature.line,
                    message: format!("no host implementation registered for kernel '{}'", signature.name),
                }),
            }
        }
        if !missing.is_empty() {
            return Err(BuildFailure {
                status: StatusCode::BUILD_PROGRAM_FAILURE,
                log: source::format_log(&missing),
            });
        }

        let log = format!("host build ({options}): {} kernel(s)\n", kernels.len());
        Ok(HostProgram { kernels, log })
    }

    fn program_build_log(&self, program: &HostProgram) -> DriverResult<String> {
        Ok(program.log.clone())
    }

    fn create_kernel(&self, program: &HostProgram, name: &str) -> DriverResult<HostKernel> {
        self.injected(FailPoint::CreateKernel)?;
        let entry = program.kernels.get(name).ok_or(StatusCode::INVALID_KERNEL_NAME)?;
        Ok(HostKernel {
            name: name.to_string(),
            signature: Arc::clone(&entry.signature),
            body: Arc::clone(&entry.body),
            args: vec![None; entry.signature.arity()],
        })
    }

    fn set_kernel_arg(
        &self,
        kernel: &mut HostKernel,
        index: u32,
        arg: KernelArg<'_, HostMemory>,
    ) -> DriverResult<()> {
        self.injected(FailPoint::SetArg)?;
        let param = kernel.signature.params.get(index as usize).ok_or(StatusCode::INVALID_ARG_INDEX)?;
        if !arg_matches(param, &arg) {
            return Err(StatusCode::INVALID_ARG_SIZE);
        }
        kernel.args[index as usize] = Some(match arg {
            KernelArg::Buffer(mem) => HostArg::Buffer(mem.clone()),
            KernelArg::Int(v) => HostArg::Int(v),
            KernelArg::Float(v) => HostArg::Float(v),
        });
        Ok(())
    }

    fn enqueue_kernel(
        &self,
        queue: &HostQueue,
        kernel: &HostKernel,
        global: &[usize],
        local: &[usize],
    ) -> DriverResult<HostEvent> {
        self.injected(FailPoint::Enqueue)?;
        if global.is_empty() || global.len() > 3 || local.len() != global.len() {
            return Err(StatusCode::INVALID_WORK_DIMENSION);
        }
        if global.contains(&0) {
            return Err(StatusCode::INVALID_GLOBAL_WORK_SIZE);
        }
        if local.iter().zip(global).any(|(&l, &g)| l == 0 || g % l != 0) {
            return Err(StatusCode::INVALID_WORK_GROUP_SIZE);
        }
        let args = kernel
            .args
            .iter()
            .cloned()
            .collect::<Option<Vec<_>>>()
            .ok_or(StatusCode::INVALID_KERNEL_ARGS)?;

        let mut size = [1usize; 3];
        size[..global.len()].copy_from_slice(global);

        let mut inner = queue.inner.lock().map_err(|_| StatusCode::OUT_OF_RESOURCES)?;
        inner.submitted += 1;
        let seq = inner.submitted;
        inner.pending.push_back(PendingLaunch {
            seq,
            kernel: kernel.name.clone(),
            body: Arc::clone(&kernel.body),
            args,
            global: size,
            dims: global.len() as u32,
        });
        drop(inner);

        self.state().launches.push(LaunchRecord {
            device: queue.device,
            kernel: kernel.name.clone(),
            global: global.to_vec(),
            local: local.to_vec(),
        });
        Ok(HostEvent { queue: Arc::clone(queue), seq })
    }

    fn wait_event(&self, event: &HostEvent) -> DriverResult<()> {
        self.injected(FailPoint::Wait)?;
        event.queue.drain()
    }

    fn read_buffer(&self, queue: &HostQueue, memory: &HostMemory, dst: &mut [u8]) -> DriverResult<()> {
        self.injected(FailPoint::Read)?;
        if dst.len() != memory.len() {
            return Err(StatusCode::INVALID_VALUE);
        }
        queue.drain()?;
        let bytes = memory.block.bytes.lock().map_err(|_| StatusCode::OUT_OF_RESOURCES)?;
        dst.copy_from_slice(&bytes);
        Ok(())
    }

    fn write_buffer(&self, queue: &HostQueue, memory: &mut HostMemory, src: &[u8]) -> DriverResult<()> {
        self.injected(FailPoint::Write)?;
        if src.len() != memory.len() {
            return Err(StatusCode::INVALID_VALUE);
        }
        queue.drain()?;
        let mut bytes = memory.block.bytes.lock().map_err(|_| StatusCode::OUT_OF_RESOURCES)?;
        bytes.copy_from_slice(src);
        Ok(())
    }
}
