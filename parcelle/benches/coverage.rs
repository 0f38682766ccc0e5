//! Benchmarks pour la normalisation des couvertures et l'intersection en mémoire

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use geo::{polygon, Geometry, MultiPolygon};
use parcelle::geometry::{intersection_area, project_lambert93};
use parcelle::{normalize_pairs, ParcelShape};

fn pairs(n: usize) -> Vec<(String, f64)> {
    (0..n)
        .map(|i| (format!("zone-{}", i % 17), (i % 40) as f64 * 1.7))
        .collect()
}

fn bench_normalize(c: &mut Criterion) {
    let mut group = c.benchmark_group("normalize_pairs");
    for n in [10usize, 100, 1_000] {
        let input = pairs(n);
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &input, |b, input| {
            b.iter(|| black_box(normalize_pairs(black_box(input.clone()))))
        });
    }
    group.finish();
}

fn bench_intersection(c: &mut Criterion) {
    let parcel: Geometry<f64> = polygon![
        (x: -0.490, y: 44.780),
        (x: -0.488, y: 44.780),
        (x: -0.488, y: 44.782),
        (x: -0.490, y: 44.782),
    ]
    .into();
    let shape = match ParcelShape::from_geometry("AC 0494", &parcel) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Invalid bench geometry: {}", e);
            return;
        }
    };
    let zone = MultiPolygon::new(vec![polygon![
        (x: -0.4895, y: 44.7805),
        (x: -0.4870, y: 44.7805),
        (x: -0.4870, y: 44.7830),
        (x: -0.4895, y: 44.7830),
    ]]);
    let zone = project_lambert93(&zone);

    c.bench_function("intersection_area", |b| {
        b.iter(|| black_box(intersection_area(black_box(shape.planar()), black_box(&zone))))
    });
}

criterion_group!(benches, bench_normalize, bench_intersection);
criterion_main!(benches);
