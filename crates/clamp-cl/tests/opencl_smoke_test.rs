//! End-to-end smoke test against a real OpenCL platform.
#![cfg(feature = "opencl-runtime")]

use clamp_cl::Runtime;
use clamp_cl::driver::OpenClDriver;

const DOUBLE_SRC: &str = r#"
__kernel void double_it(__global float* data)
{
    const size_t i = get_global_id(0);
    data[i] = data[i] * 2.0f;
}
"#;

#[test]
#[ignore = "requires OpenCL runtime - run with --ignored on GPU machine"]
fn doubles_on_first_gpu() {
    let rt = Runtime::new(OpenClDriver::new()).unwrap();
    assert!(!rt.platform_vendor().is_empty());
    let dev = rt.create_logical_device(0).unwrap().unwrap();
    let mut program = rt.compile_from_source(DOUBLE_SRC).unwrap();
    let kernel = program.get_kernel("double_it").unwrap().unwrap();

    let buf = dev.allocate(size_of::<f32>(), 4).unwrap();
    dev.write_slice(&buf, &[1.0f32, 2.0, 3.0, 4.0]).unwrap();
    kernel.bind(0, &buf).unwrap();
    kernel.set_domain(4);
    dev.dispatch(&kernel).unwrap();
    dev.wait_idle().unwrap();
    assert_eq!(dev.read_vec::<f32>(&buf).unwrap(), vec![2.0, 4.0, 6.0, 8.0]);
}

#[test]
#[ignore = "requires OpenCL runtime - run with --ignored on GPU machine"]
fn unknown_kernel_is_absent_on_hardware() {
    let rt = Runtime::new(OpenClDriver::new()).unwrap();
    let mut program = rt.compile_from_source(DOUBLE_SRC).unwrap();
    assert!(program.get_kernel("doesNotExist").unwrap().is_none());
}
