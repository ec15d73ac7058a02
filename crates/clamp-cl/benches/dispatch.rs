//! Criterion benchmarks for the host reference driver.
//!
//! Measures the runtime overhead around a dispatch (argument binding, queue
//! bookkeeping, completion) and mirror transfers, not kernel throughput.

use clamp_cl::Runtime;
use clamp_cl::driver::HostDriver;
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;

const SCALE_SRC: &str = "__kernel void scale(__global float* data, const float k) {}";

fn host_runtime() -> Runtime<HostDriver> {
    let driver = HostDriver::new().with_kernel("scale", |item, args| {
        let i = item.global_id(0);
        let k = args.float(1)?;
        let v: f32 = args.load(0, i)?;
        args.store(0, i, v * k)
    });
    Runtime::new(driver).expect("host runtime")
}

fn bench_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("host_dispatch");
    let rt = host_runtime();
    let dev = rt.create_logical_device(0).unwrap().expect("device 0");
    let mut program = rt.compile_from_source(SCALE_SRC).unwrap();
    let kernel = program.get_kernel("scale").unwrap().expect("scale kernel");

    for &n in &[64usize, 1024, 16384] {
        let buf = dev.allocate(size_of::<f32>(), n).unwrap();
        kernel.bind(0, &buf).unwrap();
        kernel.bind(1, 1.0f32).unwrap();
        kernel.set_domain(n);
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::new("dispatch_wait", n), &n, |bench, _| {
            bench.iter(|| {
                dev.dispatch(black_box(&*kernel)).unwrap();
                dev.wait_idle().unwrap();
            });
        });
    }

    group.finish();
}

fn bench_transfers(c: &mut Criterion) {
    let mut group = c.benchmark_group("host_transfers");
    let rt = host_runtime();
    let dev = rt.create_logical_device(0).unwrap().expect("device 0");

    for &bytes in &[4096usize, 1 << 20] {
        let buf = dev.allocate(1, bytes).unwrap();
        let data = vec![0xA5u8; bytes];
        group.throughput(Throughput::Bytes(bytes as u64));
        group.bench_with_input(BenchmarkId::new("write_from_bytes", bytes), &bytes, |bench, _| {
            bench.iter(|| dev.write_from_bytes(&buf, black_box(&data)).unwrap());
        });
        group.bench_with_input(BenchmarkId::new("read_back", bytes), &bytes, |bench, _| {
            bench.iter(|| dev.read_back(black_box(&buf)).unwrap());
        });
    }

    group.finish();
}

fn bench_allocation(c: &mut Criterion) {
    let rt = host_runtime();
    let dev = rt.create_logical_device(0).unwrap().expect("device 0");
    c.bench_function("allocate_free_1k", |bench| {
        bench.iter(|| {
            let buf = dev.allocate(size_of::<f32>(), black_box(256)).unwrap();
            dev.free(buf).unwrap();
        });
    });
}

criterion_group!(benches, bench_dispatch, bench_transfers, bench_allocation);
criterion_main!(benches);
