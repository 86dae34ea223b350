use criterion::{criterion_group, criterion_main, Criterion};
use surfkin_params::{ParameterSet, Strategy, Value};

fn make_set() -> ParameterSet {
    let mut set = ParameterSet::new(Strategy::MeshGrid);
    let fractions: Vec<f64> = (0..20).map(|i| i as f64 / 20.0).collect();
    set.add_literal("x_CO", "molar_fraction.CO", fractions)
        .expect("x_CO")
        .add_literal("T", "temperature", [450.0, 500.0, 550.0, 600.0, 650.0])
        .expect("T")
        .add_derived("x_O2", "molar_fraction.O2", &["x_CO"], |bound| {
            Ok(Value::Scalar(1.0 - bound.scalar("x_CO")?))
        })
        .expect("x_O2");
    set
}

fn bench_generate(c: &mut Criterion) {
    let set = make_set();
    c.bench_function("mesh_grid_generate", |b| {
        b.iter(|| {
            let overlays = set.generate().expect("generate");
            assert_eq!(overlays.len(), 100);
        })
    });
}

criterion_group!(benches, bench_generate);
criterion_main!(benches);
