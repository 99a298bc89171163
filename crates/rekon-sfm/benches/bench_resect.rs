use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use glam::{DVec2, DVec3};
use rand::{rngs::StdRng, Rng, SeedableRng};
use rekon_lie::SO3;
use rekon_sfm::{estimate_camera_pose, Marker, Point, Reconstruction, ResectParams};

fn generate_dataset_with_seed(
    num_points: usize,
    noise: f64,
    seed: u64,
) -> (Reconstruction, Vec<Marker>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let r = SO3::exp(DVec3::new(0.1, -0.2, 0.05)).matrix();
    let t = DVec3::new(0.2, -0.1, 0.3);

    let mut reconstruction = Reconstruction::new();
    let mut markers = Vec::with_capacity(num_points);
    for track in 0..num_points as u32 {
        // points in a 1m cube around z in [3,6]
        let position = DVec3::new(
            rng.random_range(-0.5..0.5),
            rng.random_range(-0.5..0.5),
            rng.random_range(3.0..6.0),
        );
        reconstruction.add_point(Point { track, position });

        let pc = r * position + t;
        let center = DVec2::new(
            pc.x / pc.z + rng.random_range(-noise..noise),
            pc.y / pc.z + rng.random_range(-noise..noise),
        );
        markers.push(Marker::new(center, 0, 0, track));
    }

    (reconstruction, markers)
}

fn bench_resect(c: &mut Criterion) {
    let mut group = c.benchmark_group("resect");
    let params = ResectParams::default();
    for &n in &[8usize, 32, 128, 512] {
        let (reconstruction, markers) = generate_dataset_with_seed(n, 1e-3, 42);
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| {
                let res = estimate_camera_pose(&markers, &reconstruction, 0, &params).unwrap();
                std::hint::black_box(res);
            });
        });
    }
    group.finish();
}

fn bench_resect_fallback(c: &mut Criterion) {
    let mut group = c.benchmark_group("resect_fallback");
    // Forces EPnP to reject every rig so the projective path runs.
    let params = ResectParams::default()
        .with_allow_fallback(true)
        .with_epnp(rekon_pnp::EPnPParams::default().with_planar_threshold(f64::INFINITY));
    for &n in &[8usize, 32, 128] {
        let (reconstruction, markers) = generate_dataset_with_seed(n, 1e-3, 7);
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| {
                let res = estimate_camera_pose(&markers, &reconstruction, 0, &params).unwrap();
                std::hint::black_box(res);
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_resect, bench_resect_fallback);
criterion_main!(benches);
