//! Device buffers with a same-sized host mirror.

use std::fmt;
use std::sync::{Mutex, PoisonError};

use bytemuck::Pod;

use crate::driver::ComputeDriver;
use crate::error::{ClampError, Result, poisoned};

/// Identity of a buffer: owning device index plus a per-device serial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId {
    device: usize,
    serial: u64,
}

impl BufferId {
    pub const fn new(device: usize, serial: u64) -> Self {
        Self { device, serial }
    }

    pub const fn device(&self) -> usize {
        self.device
    }

    pub const fn serial(&self) -> u64 {
        self.serial
    }
}

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dev{}:buf{}", self.device, self.serial)
    }
}

pub(crate) struct BufferStorage<D: ComputeDriver> {
    pub(crate) memory: D::Memory,
    pub(crate) mirror: Box<[u8]>,
}

/// A fixed-size allocation: device memory plus a host mirror of equal size.
///
/// Only a [`LogicalDevice`](crate::LogicalDevice) creates buffers, and every
/// transfer moves exactly [`size`](Self::size) bytes. The mirror starts
/// zeroed.
///
/// Freeing the buffer through its device releases the storage at once;
/// handles that outlive the free see [`ClampError::BufferReleased`].
pub struct DeviceBuffer<D: ComputeDriver> {
    id: BufferId,
    size: usize,
    storage: Mutex<Option<BufferStorage<D>>>,
}

impl<D: ComputeDriver> DeviceBuffer<D> {
    pub(crate) fn new(id: BufferId, memory: D::Memory, size: usize) -> Self {
        let mirror = vec![0u8; size].into_boxed_slice();
        Self { id, size, storage: Mutex::new(Some(BufferStorage { memory, mirror })) }
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    /// Size in bytes of both the device region and the mirror.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Run `f` on the live storage.
    pub(crate) fn with_storage<R>(
        &self,
        f: impl FnOnce(&mut BufferStorage<D>) -> Result<R>,
    ) -> Result<R> {
        let mut guard = self.storage.lock().map_err(poisoned)?;
        let storage = guard.as_mut().ok_or(ClampError::BufferReleased { buffer: self.id })?;
        f(storage)
    }

    /// Drop the device memory and mirror. Returns whether anything was live.
    pub(crate) fn release(&self) -> Result<bool> {
        let taken = self.storage.lock().map_err(poisoned)?.take();
        Ok(taken.is_some())
    }

    /// Whether the storage has been released by a free.
    pub fn is_released(&self) -> bool {
        self.storage.lock().unwrap_or_else(PoisonError::into_inner).is_none()
    }

    /// Zero the host mirror. The device copy is untouched until the next
    /// [`write_from`](crate::LogicalDevice::write_from).
    pub fn clear(&self) -> Result<()> {
        self.with_storage(|storage| {
            storage.mirror.fill(0);
            Ok(())
        })
    }

    /// Borrow the host mirror.
    pub fn with_mirror<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Result<R> {
        self.with_storage(|storage| Ok(f(&storage.mirror)))
    }

    /// Mutably borrow the host mirror.
    pub fn with_mirror_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> Result<R> {
        self.with_storage(|storage| Ok(f(&mut storage.mirror)))
    }

    /// Borrow the raw device handle.
    pub fn with_memory<R>(&self, f: impl FnOnce(&D::Memory) -> R) -> Result<R> {
        self.with_storage(|storage| Ok(f(&storage.memory)))
    }

    /// Copy `data` into the mirror; `data` must cover the whole buffer.
    pub fn write_mirror<T: Pod>(&self, data: &[T]) -> Result<()> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        if bytes.len() != self.size {
            return Err(ClampError::SizeMismatch { expected: self.size, actual: bytes.len() });
        }
        self.with_storage(|storage| {
            storage.mirror.copy_from_slice(bytes);
            Ok(())
        })
    }

    /// Reinterpret the mirror as a vector of `T`.
    pub fn read_mirror<T: Pod>(&self) -> Result<Vec<T>> {
        let width = size_of::<T>();
        if width == 0 || self.size % width != 0 {
            return Err(ClampError::SizeMismatch {
                expected: self.size,
                actual: self.size / width.max(1) * width,
            });
        }
        self.with_storage(|storage| Ok(bytemuck::pod_collect_to_vec(&storage.mirror[..])))
    }
}

impl<D: ComputeDriver> fmt::Debug for DeviceBuffer<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceBuffer").field("id", &self.id).field("size", &self.size).finish()
    }
}
