//! Buffer lifecycle, transfers and dispatch on a logical device.

mod common;

use clamp_cl::driver::HostDriver;
use clamp_cl::driver::host::FailPoint;
use clamp_cl::{ClampError, Runtime, Severity, StatusCode};
use common::{KERNELS_SRC, runtime};

// ── Allocation ───────────────────────────────────────────────────────────────

#[test]
fn allocation_size_is_product() {
    let rt = runtime();
    let dev = rt.create_logical_device(0).unwrap().unwrap();
    let buf = dev.allocate_2d(4, 3, 5).unwrap();
    assert_eq!(buf.size(), 60);
    assert_eq!(buf.with_mirror(|m| m.len()).unwrap(), 60);
    assert_eq!(buf.with_memory(|m| m.len()).unwrap(), 60);
    assert_eq!(dev.buffer_count(), 1);
    assert!(dev.owns(&buf));
}

#[test]
fn buffer_ids_are_unique_per_device() {
    let rt = runtime();
    let dev = rt.create_logical_device(0).unwrap().unwrap();
    let a = dev.allocate(1, 1).unwrap();
    let b = dev.allocate(1, 1).unwrap();
    assert_ne!(a.id(), b.id());
    assert_eq!(a.id().device(), 0);
}

#[test]
fn zero_sized_allocation_is_fatal() {
    let rt = runtime();
    let dev = rt.create_logical_device(0).unwrap().unwrap();
    let err = dev.allocate(4, 0).unwrap_err();
    assert_eq!(err.status(), Some(("create_buffer", StatusCode::INVALID_BUFFER_SIZE)));
    assert!(err.is_fatal());
    assert_eq!(dev.buffer_count(), 0);
}

#[test]
fn overflowing_allocation_is_fatal() {
    let rt = runtime();
    let dev = rt.create_logical_device(0).unwrap().unwrap();
    let err = dev.allocate_2d(usize::MAX, 2, 1).unwrap_err();
    assert_eq!(err.status(), Some(("create_buffer", StatusCode::INVALID_BUFFER_SIZE)));
}

#[test]
fn exhausted_memory_is_fatal() {
    let rt = Runtime::new(HostDriver::new().with_memory_capacity(16)).unwrap();
    let dev = rt.create_logical_device(0).unwrap().unwrap();
    let _a = dev.allocate(4, 4).unwrap();
    let err = dev.allocate(4, 1).unwrap_err();
    assert_eq!(err.status(), Some(("create_buffer", StatusCode::MEM_OBJECT_ALLOCATION_FAILURE)));
}

// ── Free ─────────────────────────────────────────────────────────────────────

#[test]
fn free_releases_owned_buffer() {
    let rt = runtime();
    let dev = rt.create_logical_device(0).unwrap().unwrap();
    let buf = dev.allocate(4, 4).unwrap();
    assert_eq!(rt.driver().memory_in_use(), 16);
    assert!(dev.free(buf).unwrap());
    assert_eq!(dev.buffer_count(), 0);
    assert_eq!(rt.driver().memory_in_use(), 0);
}

#[test]
fn freeing_foreign_buffer_is_a_logged_no_op() {
    let rt = Runtime::new(HostDriver::new().with_devices(2)).unwrap();
    let dev0 = rt.create_logical_device(0).unwrap().unwrap();
    let dev1 = rt.create_logical_device(1).unwrap().unwrap();
    let buf = dev0.allocate(4, 1).unwrap();

    assert!(!dev1.free(buf.clone()).unwrap());
    assert_eq!(dev0.buffer_count(), 1);
    assert!(dev0.owns(&buf));
    assert!(!dev1.owns(&buf));
}

#[test]
fn foreign_buffer_with_same_serial_is_not_owned() {
    let rt = Runtime::new(HostDriver::new().with_devices(2)).unwrap();
    let dev0 = rt.create_logical_device(0).unwrap().unwrap();
    let dev1 = rt.create_logical_device(1).unwrap().unwrap();
    let mine = dev1.allocate(4, 1).unwrap();
    let theirs = dev0.allocate(4, 1).unwrap();
    assert_eq!(mine.id().serial(), theirs.id().serial());

    let err = dev1.try_free(theirs).unwrap_err();
    assert_eq!(err.severity(), Severity::Recoverable);
    assert!(matches!(err, ClampError::BufferNotOwned { device: 1, .. }));
    assert_eq!(dev1.buffer_count(), 1);
    assert!(dev1.owns(&mine));
}

#[test]
fn double_free_is_absent() {
    let rt = runtime();
    let dev = rt.create_logical_device(0).unwrap().unwrap();
    let buf = dev.allocate(4, 1).unwrap();
    assert!(dev.free(buf.clone()).unwrap());
    assert!(!dev.free(buf).unwrap());
}

#[test]
fn free_releases_storage_while_clones_survive() {
    let rt = runtime();
    let dev = rt.create_logical_device(0).unwrap().unwrap();
    let buf = dev.allocate(4, 4).unwrap();
    let alias = buf.clone();
    assert_eq!(rt.driver().memory_in_use(), 16);

    assert!(dev.free(buf).unwrap());
    assert_eq!(rt.driver().memory_in_use(), 0);
    assert!(alias.is_released());
    assert!(!dev.owns(&alias));

    let err = dev.write_from_bytes(&alias, &[0u8; 16]).unwrap_err();
    assert!(matches!(err, ClampError::BufferReleased { .. }));
    assert!(err.is_fatal());
    assert!(matches!(dev.read_vec::<f32>(&alias), Err(ClampError::BufferReleased { .. })));
    assert!(matches!(dev.read_back(&alias), Err(ClampError::BufferReleased { .. })));
    assert!(matches!(alias.write_mirror(&[1.0f32; 4]), Err(ClampError::BufferReleased { .. })));
}

// ── Transfers ────────────────────────────────────────────────────────────────

#[test]
fn round_trip_through_explicit_slices() {
    let rt = runtime();
    let dev = rt.create_logical_device(0).unwrap().unwrap();
    let buf = dev.allocate(1, 8).unwrap();
    let src = [9u8, 8, 7, 6, 5, 4, 3, 2];
    dev.write_from_bytes(&buf, &src).unwrap();
    let mut dst = [0u8; 8];
    dev.read_back_into(&buf, &mut dst).unwrap();
    assert_eq!(dst, src);
}

#[test]
fn mirror_round_trip() {
    let rt = runtime();
    let dev = rt.create_logical_device(0).unwrap().unwrap();
    let buf = dev.allocate(4, 3).unwrap();
    buf.write_mirror(&[1i32, -2, 3]).unwrap();
    dev.write_from(&buf).unwrap();
    buf.write_mirror(&[0i32, 0, 0]).unwrap();
    dev.read_back(&buf).unwrap();
    assert_eq!(buf.read_mirror::<i32>().unwrap(), vec![1, -2, 3]);
}

#[test]
fn clear_does_not_reach_the_device() {
    let rt = runtime();
    let dev = rt.create_logical_device(0).unwrap().unwrap();
    let buf = dev.allocate(1, 4).unwrap();
    dev.write_from_bytes(&buf, &[1, 2, 3, 4]).unwrap();
    dev.read_back(&buf).unwrap();

    buf.clear().unwrap();
    assert_eq!(buf.with_mirror(<[u8]>::to_vec).unwrap(), vec![0; 4]);

    dev.read_back(&buf).unwrap();
    assert_eq!(buf.with_mirror(<[u8]>::to_vec).unwrap(), vec![1, 2, 3, 4]);
}

#[test]
fn clear_then_write_from_propagates() {
    let rt = runtime();
    let dev = rt.create_logical_device(0).unwrap().unwrap();
    let buf = dev.allocate(1, 4).unwrap();
    dev.write_from_bytes(&buf, &[1, 2, 3, 4]).unwrap();
    buf.clear().unwrap();
    dev.write_from(&buf).unwrap();
    assert_eq!(dev.read_vec::<u8>(&buf).unwrap(), vec![0; 4]);
}

#[test]
fn partial_transfers_are_rejected() {
    let rt = runtime();
    let dev = rt.create_logical_device(0).unwrap().unwrap();
    let buf = dev.allocate(4, 4).unwrap();
    let err = dev.write_slice(&buf, &[1.0f32; 3]).unwrap_err();
    assert!(matches!(err, ClampError::SizeMismatch { expected: 16, actual: 12 }));
    let mut short = [0u8; 8];
    assert!(matches!(
        dev.read_back_into(&buf, &mut short),
        Err(ClampError::SizeMismatch { expected: 16, actual: 8 })
    ));
}

#[test]
fn transfer_failures_are_fatal() {
    let rt = runtime();
    let dev = rt.create_logical_device(0).unwrap().unwrap();
    let buf = dev.allocate(4, 1).unwrap();

    rt.driver().fail(FailPoint::Write, StatusCode::OUT_OF_RESOURCES);
    let err = dev.write_from(&buf).unwrap_err();
    assert_eq!(err.status(), Some(("write_buffer", StatusCode::OUT_OF_RESOURCES)));

    rt.driver().clear_failures();
    rt.driver().fail(FailPoint::Read, StatusCode::OUT_OF_RESOURCES);
    let err = dev.read_back(&buf).unwrap_err();
    assert_eq!(err.status(), Some(("read_buffer", StatusCode::OUT_OF_RESOURCES)));
    assert!(err.is_fatal());
}

// ── Dispatch and completion ──────────────────────────────────────────────────

#[test]
fn wait_idle_before_dispatch_is_fatal() {
    let rt = runtime();
    let dev = rt.create_logical_device(0).unwrap().unwrap();
    let err = dev.wait_idle().unwrap_err();
    assert!(matches!(err, ClampError::NoDispatch { device: 0 }));
    assert!(err.is_fatal());
}

#[test]
fn dispatch_does_not_block_until_waited() {
    let rt = runtime();
    let dev = rt.create_logical_device(0).unwrap().unwrap();
    let mut program = rt.compile_from_source(KERNELS_SRC).unwrap();
    let kernel = program.get_kernel("fill").unwrap().unwrap();
    let buf = dev.allocate(4, 2).unwrap();
    kernel.bind(0, &buf).unwrap();
    kernel.bind(1, 5.0f32).unwrap();
    kernel.set_domain(2);

    let done = dev.dispatch(&kernel).unwrap();
    assert_eq!(format!("{done:?}"), "Completion { device: 0, .. }");
    assert_eq!(dev.raw_queue().pending(), 1);
    assert!(!done.raw().is_complete());
    dev.wait_idle().unwrap();
    assert!(done.raw().is_complete());
    assert_eq!(dev.read_vec::<f32>(&buf).unwrap(), vec![5.0, 5.0]);
}

#[test]
fn only_latest_dispatch_is_in_the_slot_but_handles_stay_awaitable() {
    let rt = runtime();
    let dev = rt.create_logical_device(0).unwrap().unwrap();
    let mut program = rt.compile_from_source(KERNELS_SRC).unwrap();
    let buf = dev.allocate(4, 1).unwrap();
    dev.write_slice(&buf, &[1i32]).unwrap();

    let kernel = program.get_kernel("add_const").unwrap().unwrap();
    kernel.bind(0, &buf).unwrap();
    kernel.bind(1, 10i32).unwrap();
    kernel.set_domain(1);
    let first = dev.dispatch(&kernel).unwrap();
    kernel.bind(1, 100i32).unwrap();
    let second = dev.dispatch(&kernel).unwrap();

    // In-order queue: waiting on the latest also completes the first.
    dev.wait_idle().unwrap();
    assert!(first.raw().is_complete());
    assert!(second.raw().seq() > first.raw().seq());
    first.wait().unwrap();
    assert_eq!(dev.read_vec::<i32>(&buf).unwrap(), vec![111]);
}

#[test]
fn enqueue_failure_is_fatal() {
    let rt = runtime();
    let dev = rt.create_logical_device(0).unwrap().unwrap();
    let mut program = rt.compile_from_source(KERNELS_SRC).unwrap();
    let kernel = program.get_kernel("fill").unwrap().unwrap();
    let buf = dev.allocate(4, 1).unwrap();
    kernel.bind(0, &buf).unwrap();
    kernel.bind(1, 1.0f32).unwrap();
    kernel.set_domain(1);

    rt.driver().fail(FailPoint::Enqueue, StatusCode::OUT_OF_RESOURCES);
    let err = dev.dispatch(&kernel).unwrap_err();
    assert_eq!(err.status(), Some(("enqueue_kernel", StatusCode::OUT_OF_RESOURCES)));
    // A rejected dispatch leaves the slot empty.
    assert!(matches!(dev.wait_idle(), Err(ClampError::NoDispatch { .. })));
}

#[test]
fn device_fault_surfaces_at_wait() {
    let rt = runtime();
    let dev = rt.create_logical_device(0).unwrap().unwrap();
    let mut program = rt.compile_from_source(KERNELS_SRC).unwrap();
    let kernel = program.get_kernel("double_it").unwrap().unwrap();
    let buf = dev.allocate(4, 2).unwrap();
    kernel.bind(0, &buf).unwrap();
    // More work-items than elements.
    kernel.set_domain(3);

    dev.dispatch(&kernel).unwrap();
    let err = dev.wait_idle().unwrap_err();
    assert_eq!(
        err.status(),
        Some(("wait_event", StatusCode::EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST))
    );
    assert!(err.is_fatal());
    assert!(dev.read_back(&buf).is_err());
}

#[test]
fn wait_failure_is_fatal() {
    let rt = runtime();
    let dev = rt.create_logical_device(0).unwrap().unwrap();
    let mut program = rt.compile_from_source(KERNELS_SRC).unwrap();
    let kernel = program.get_kernel("fill").unwrap().unwrap();
    let buf = dev.allocate(4, 1).unwrap();
    kernel.bind(0, &buf).unwrap();
    kernel.bind(1, 1.0f32).unwrap();
    kernel.set_domain(1);
    let done = dev.dispatch(&kernel).unwrap();

    rt.driver().fail(FailPoint::Wait, StatusCode::OUT_OF_RESOURCES);
    assert!(done.wait().unwrap_err().is_fatal());
    assert!(dev.wait_idle().unwrap_err().is_fatal());
}
