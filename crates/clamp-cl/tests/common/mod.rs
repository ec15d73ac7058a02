//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use clamp_cl::Runtime;
use clamp_cl::driver::HostDriver;
use clamp_cl::driver::host::HostFault;

pub const KERNELS_SRC: &str = r#"
// Elementwise helpers used across the integration tests.
__kernel void double_it(__global float* data)
{
    const size_t i = get_global_id(0);
    data[i] = data[i] * 2.0f;
}

__kernel void fill(__global float* out, const float value)
{
    out[get_global_id(0)] = value;
}

__kernel void add_const(__global int* data, const int delta)
{
    data[get_global_id(0)] += delta;
}

__kernel void grid(__global uint* out)
{
    const size_t x = get_global_id(0);
    const size_t y = get_global_id(1);
    out[y * get_global_size(0) + x] = (uint)(x + 100 * y);
}
"#;

/// A host driver with every kernel in [`KERNELS_SRC`] registered.
pub fn host_driver() -> HostDriver {
    HostDriver::new()
        .with_kernel("double_it", |item, args| {
            let i = item.global_id(0);
            let v: f32 = args.load(0, i)?;
            args.store(0, i, v * 2.0)
        })
        .with_kernel("fill", |item, args| {
            let value = args.float(1)?;
            args.store(0, item.global_id(0), value)
        })
        .with_kernel("add_const", |item, args| {
            let i = item.global_id(0);
            let delta = args.int(1)?;
            let v: i32 = args.load(0, i)?;
            args.store(0, i, v + delta)
        })
        .with_kernel("grid", |item, args| {
            let (x, y) = (item.global_id(0), item.global_id(1));
            let value = u32::try_from(x + 100 * y)
                .map_err(|e| HostFault::Kernel(e.to_string()))?;
            args.store(0, item.linear_id(), value)
        })
}

pub fn runtime() -> Runtime<HostDriver> {
    init_tracing();
    Runtime::new(host_driver()).expect("host runtime")
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
