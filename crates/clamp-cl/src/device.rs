//! Logical devices: one physical device, one in-order queue, owned buffers.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use bytemuck::Pod;
use tracing::{debug, info};

use crate::buffer::{BufferId, DeviceBuffer};
use crate::driver::{ComputeDriver, StatusCode};
use crate::error::{CheckStatus, ClampError, Result, driver_error, poisoned};
use crate::kernel::Kernel;
use crate::policy::Recover;
use crate::runtime::PlatformInfo;

struct DeviceState<D: ComputeDriver> {
    buffers: HashMap<u64, Arc<DeviceBuffer<D>>>,
    next_serial: u64,
    last_event: Option<Arc<D::Event>>,
}

/// Awaitable completion of one dispatch.
pub struct Completion<D: ComputeDriver> {
    device: usize,
    event: Arc<D::Event>,
    driver: Arc<D>,
}

impl<D: ComputeDriver> Completion<D> {
    /// Block until this dispatch has finished.
    pub fn wait(&self) -> Result<()> {
        self.driver.wait_event(&self.event).check("wait_event")?;
        debug!(device = self.device, "dispatch complete");
        Ok(())
    }

    /// The driver's event handle.
    pub fn raw(&self) -> &D::Event {
        &self.event
    }
}

impl<D: ComputeDriver> fmt::Debug for Completion<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion").field("device", &self.device).finish_non_exhaustive()
    }
}

/// One physical device bound to its own in-order command queue.
///
/// Created once per index by [`Runtime::create_logical_device`](crate::Runtime::create_logical_device).
/// Buffers allocated here belong to this device and are freed through it.
/// Only the most recent dispatch is awaitable through
/// [`wait_idle`](Self::wait_idle); keep the [`Completion`] returned by
/// [`dispatch`](Self::dispatch) to wait on a specific one.
pub struct LogicalDevice<D: ComputeDriver> {
    index: usize,
    name: String,
    state: Mutex<DeviceState<D>>,
    queue: D::Queue,
    device: D::Device,
    context: Arc<D::Context>,
    platform: Weak<PlatformInfo>,
    driver: Arc<D>,
}

impl<D: ComputeDriver> LogicalDevice<D> {
    pub(crate) fn open(
        index: usize,
        driver: Arc<D>,
        context: Arc<D::Context>,
        device: D::Device,
        platform: Weak<PlatformInfo>,
    ) -> Result<Self> {
        let queue = driver.create_queue(&context, &device).check("create_queue")?;
        let name = driver.device_name(&device).check("device_name")?;
        let vendor = platform.upgrade().map(|p| p.vendor.clone()).unwrap_or_default();
        info!(device = index, name = %name, vendor = %vendor, "logical device created");
        Ok(Self {
            index,
            name,
            state: Mutex::new(DeviceState {
                buffers: HashMap::new(),
                next_serial: 1,
                last_event: None,
            }),
            queue,
            device,
            context,
            platform,
            driver,
        })
    }

    fn state(&self) -> Result<MutexGuard<'_, DeviceState<D>>> {
        self.state.lock().map_err(poisoned)
    }

    // ── Accessors ───────────────────────────────────────────────

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Vendor of the platform this device was opened under, while the
    /// runtime is alive.
    pub fn platform_vendor(&self) -> Option<String> {
        self.platform.upgrade().map(|p| p.vendor.clone())
    }

    pub fn raw_device(&self) -> &D::Device {
        &self.device
    }

    pub fn raw_queue(&self) -> &D::Queue {
        &self.queue
    }

    pub fn raw_context(&self) -> &D::Context {
        &self.context
    }

    // Read-only queries still see the owned set after a panic poisoned it.
    fn snapshot(&self) -> MutexGuard<'_, DeviceState<D>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn buffer_count(&self) -> usize {
        self.snapshot().buffers.len()
    }

    /// Whether `buffer` is in this device's owned set.
    pub fn owns(&self, buffer: &DeviceBuffer<D>) -> bool {
        self.snapshot()
            .buffers
            .get(&buffer.id().serial())
            .is_some_and(|b| std::ptr::eq(Arc::as_ptr(b), buffer))
    }

    // ── Allocation ──────────────────────────────────────────────

    /// Allocate `element_size × x` bytes.
    pub fn allocate(&self, element_size: usize, x: usize) -> Result<Arc<DeviceBuffer<D>>> {
        self.allocate_2d(element_size, x, 1)
    }

    /// Allocate `element_size × x × y` bytes of device memory plus an equal
    /// host mirror. Allocation failure is fatal.
    pub fn allocate_2d(
        &self,
        element_size: usize,
        x: usize,
        y: usize,
    ) -> Result<Arc<DeviceBuffer<D>>> {
        let size = element_size
            .checked_mul(x)
            .and_then(|n| n.checked_mul(y))
            .ok_or_else(|| driver_error(StatusCode::INVALID_BUFFER_SIZE, "create_buffer"))?;
        let memory = self.driver.create_buffer(&self.context, size).check("create_buffer")?;

        let mut state = self.state()?;
        let id = BufferId::new(self.index, state.next_serial);
        state.next_serial += 1;
        let buffer = Arc::new(DeviceBuffer::new(id, memory, size));
        state.buffers.insert(id.serial(), Arc::clone(&buffer));
        debug!(device = self.index, buffer = %id, size, "buffer allocated");
        Ok(buffer)
    }

    /// Remove `buffer` from the owned set and release its device memory and
    /// mirror immediately, even if other handles to it are still alive. Those
    /// handles then fail with [`ClampError::BufferReleased`]. A buffer this
    /// device does not own is [`ClampError::BufferNotOwned`] and is left
    /// untouched.
    pub fn try_free(&self, buffer: Arc<DeviceBuffer<D>>) -> Result<()> {
        let id = buffer.id();
        let mut state = self.state()?;
        let owned = state.buffers.get(&id.serial()).is_some_and(|b| Arc::ptr_eq(b, &buffer));
        if !owned {
            return Err(ClampError::BufferNotOwned { buffer: id, device: self.index });
        }
        state.buffers.remove(&id.serial());
        drop(state);
        buffer.release()?;
        debug!(device = self.index, buffer = %id, "buffer freed");
        Ok(())
    }

    /// Like [`try_free`](Self::try_free); returns `Ok(false)` for a buffer
    /// this device does not own.
    pub fn free(&self, buffer: Arc<DeviceBuffer<D>>) -> Result<bool> {
        Ok(self.try_free(buffer).absent()?.is_some())
    }

    // ── Dispatch ────────────────────────────────────────────────

    /// Enqueue `kernel` over its configured domain and return without
    /// waiting. Replaces the device's most-recent-dispatch slot.
    pub fn dispatch(&self, kernel: &Kernel<D>) -> Result<Completion<D>> {
        let domain = kernel.domain();
        let event = kernel
            .with_raw(|raw| {
                self.driver.enqueue_kernel(&self.queue, raw, &domain.global_size(), &domain.local_size())
            })
            .check("enqueue_kernel")?;
        let event = Arc::new(event);
        self.state()?.last_event = Some(Arc::clone(&event));
        debug!(device = self.index, kernel = kernel.name(), %domain, "kernel dispatched");
        Ok(Completion { device: self.index, event, driver: Arc::clone(&self.driver) })
    }

    /// Block until the most recent dispatch completes.
    ///
    /// Waiting before any dispatch is [`ClampError::NoDispatch`].
    pub fn wait_idle(&self) -> Result<()> {
        let event = self.state()?.last_event.clone();
        let event = event.ok_or(ClampError::NoDispatch { device: self.index })?;
        self.driver.wait_event(&event).check("wait_event")
    }

    // ── Transfers ───────────────────────────────────────────────

    /// Device → mirror, full size, blocking.
    pub fn read_back(&self, buffer: &DeviceBuffer<D>) -> Result<()> {
        buffer.with_storage(|storage| {
            self.driver.read_buffer(&self.queue, &storage.memory, &mut storage.mirror).check("read_buffer")
        })?;
        debug!(device = self.index, buffer = %buffer.id(), "read back");
        Ok(())
    }

    /// Device → `dst`, which must be exactly the buffer's size.
    pub fn read_back_into(&self, buffer: &DeviceBuffer<D>, dst: &mut [u8]) -> Result<()> {
        check_len(buffer, dst.len())?;
        buffer.with_storage(|storage| {
            self.driver.read_buffer(&self.queue, &storage.memory, dst).check("read_buffer")
        })?;
        debug!(device = self.index, buffer = %buffer.id(), "read back into host slice");
        Ok(())
    }

    /// Mirror → device, full size, blocking.
    pub fn write_from(&self, buffer: &DeviceBuffer<D>) -> Result<()> {
        buffer.with_storage(|storage| {
            self.driver.write_buffer(&self.queue, &mut storage.memory, &storage.mirror).check("write_buffer")
        })?;
        debug!(device = self.index, buffer = %buffer.id(), "written from mirror");
        Ok(())
    }

    /// `src` → device; `src` must be exactly the buffer's size.
    pub fn write_from_bytes(&self, buffer: &DeviceBuffer<D>, src: &[u8]) -> Result<()> {
        check_len(buffer, src.len())?;
        buffer.with_storage(|storage| {
            self.driver.write_buffer(&self.queue, &mut storage.memory, src).check("write_buffer")
        })?;
        debug!(device = self.index, buffer = %buffer.id(), "written from host slice");
        Ok(())
    }

    /// Typed [`write_from_bytes`](Self::write_from_bytes).
    pub fn write_slice<T: Pod>(&self, buffer: &DeviceBuffer<D>, data: &[T]) -> Result<()> {
        self.write_from_bytes(buffer, bytemuck::cast_slice(data))
    }

    /// Read the whole buffer as a vector of `T`.
    pub fn read_vec<T: Pod>(&self, buffer: &DeviceBuffer<D>) -> Result<Vec<T>> {
        let width = size_of::<T>();
        if width == 0 || buffer.size() % width != 0 {
            return Err(ClampError::SizeMismatch {
                expected: buffer.size(),
                actual: buffer.size() / width.max(1) * width,
            });
        }
        let mut bytes = vec![0u8; buffer.size()];
        self.read_back_into(buffer, &mut bytes)?;
        Ok(bytemuck::pod_collect_to_vec(&bytes[..]))
    }
}

fn check_len<D: ComputeDriver>(buffer: &DeviceBuffer<D>, len: usize) -> Result<()> {
    if len != buffer.size() {
        return Err(ClampError::SizeMismatch { expected: buffer.size(), actual: len });
    }
    Ok(())
}

impl<D: ComputeDriver> fmt::Debug for LogicalDevice<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogicalDevice")
            .field("index", &self.index)
            .field("name", &self.name)
            .field("buffers", &self.buffer_count())
            .finish()
    }
}
