use criterion::{Criterion, criterion_group, criterion_main};
use ipvs::{Destination, ForwardingMethod, Protocol, Scheduler, Service, ServiceFlags};
use std::hint::black_box;

fn sample_service() -> Service {
    Service {
        address: "10.1.2.3".parse().unwrap(),
        protocol: Protocol::TCP,
        port: 443,
        fwmark: 0,
        scheduler: Scheduler::WeightedRoundRobin,
        flags: ServiceFlags(ServiceFlags::PERSISTENT),
        timeout: 300,
        netmask: u32::MAX,
    }
}

fn sample_dest() -> Destination {
    Destination {
        address: "192.168.10.20".parse().unwrap(),
        port: 8443,
        weight: 5,
        fwd_method: ForwardingMethod::Masquerade,
        upper_threshold: 0,
        lower_threshold: 0,
    }
}

fn pack_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("pack");

    let service = sample_service();
    group.bench_function("service_full", |b| {
        b.iter(|| black_box(&service).to_nlas(true).unwrap());
    });

    let dest = sample_dest();
    group.bench_function("dest_full", |b| {
        b.iter(|| black_box(&dest).to_nlas(true).unwrap());
    });

    group.finish();
}

fn unpack_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("unpack");

    let service_nlas = sample_service().to_nlas(true).unwrap();
    group.bench_function("service_full", |b| {
        b.iter(|| Service::from_nlas(black_box(&service_nlas)).unwrap());
    });

    let dest_nlas = sample_dest().to_nlas(true).unwrap();
    group.bench_function("dest_full", |b| {
        b.iter(|| Destination::from_nlas(libc::AF_INET as u16, black_box(&dest_nlas)).unwrap());
    });

    group.finish();
}

fn key_benchmark(c: &mut Criterion) {
    let service = sample_service();
    let dest = sample_dest();

    c.bench_function("service_key", |b| {
        b.iter(|| black_box(&service).key());
    });
    c.bench_function("dest_key", |b| {
        b.iter(|| black_box(&dest).key());
    });
}

criterion_group!(benches, pack_benchmark, unpack_benchmark, key_benchmark);
criterion_main!(benches);
