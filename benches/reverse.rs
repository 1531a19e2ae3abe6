use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use nalgebra::DMatrix;
use revtape::{dot_product, gradient, mdivide_left_tri_low, Session, Var};

#[path = "common/mod.rs"]
mod common;
use common::*;

fn bench_reverse_gradient(c: &mut Criterion) {
    let mut group = c.benchmark_group("reverse_gradient");
    for n in [2, 10, 100, 1000] {
        let x = make_input(n);

        group.bench_with_input(BenchmarkId::new("f64_eval", n), &x, |b, x| {
            b.iter(|| black_box(rosenbrock::<f64>(black_box(x))))
        });

        group.bench_with_input(BenchmarkId::new("rosenbrock_rev", n), &x, |b, x| {
            b.iter(|| black_box(gradient(|v| rosenbrock(v), black_box(x))))
        });

        group.bench_with_input(BenchmarkId::new("rosenbrock_fd", n), &x, |b, x| {
            b.iter(|| black_box(finite_diff_gradient(rosenbrock::<f64>, x, 1e-7)))
        });

        group.bench_with_input(BenchmarkId::new("rastrigin_rev", n), &x, |b, x| {
            b.iter(|| black_box(gradient(|v| rastrigin(v), black_box(x))))
        });
    }
    group.finish();
}

fn bench_session_reuse(c: &mut Criterion) {
    let mut group = c.benchmark_group("session_reuse");
    for n in [10, 100, 1000] {
        let x = make_input(n);

        group.bench_with_input(BenchmarkId::new("fresh_session", n), &x, |b, x| {
            b.iter(|| {
                let _s = Session::new();
                let v = revtape::var::vars(x);
                black_box(rosenbrock(&v).grad_wrt(&v))
            })
        });

        group.bench_with_input(BenchmarkId::new("recover_memory", n), &x, |b, x| {
            let session = Session::new();
            b.iter(|| {
                let v = revtape::var::vars(x);
                let g = rosenbrock(&v).grad_wrt(&v);
                session.recover_memory().unwrap();
                black_box(g)
            })
        });
    }
    group.finish();
}

fn bench_dot_product(c: &mut Criterion) {
    let mut group = c.benchmark_group("dot_product");
    for n in [10, 100, 1000] {
        let x = make_input(n);
        let w: Vec<f64> = x.iter().map(|v| v.sin()).collect();
        let session = Session::new();

        group.bench_with_input(BenchmarkId::new("packed", n), &x, |b, x| {
            b.iter(|| {
                let v = revtape::var::vars(x);
                let g = dot_product(&v, &w).unwrap().grad_wrt(&v);
                session.recover_memory().unwrap();
                black_box(g)
            })
        });

        group.bench_with_input(BenchmarkId::new("elementwise", n), &x, |b, x| {
            b.iter(|| {
                let v = revtape::var::vars(x);
                let d: Var = v.iter().zip(&w).map(|(&vi, &wi)| vi * wi).sum();
                let g = d.grad_wrt(&v);
                session.recover_memory().unwrap();
                black_box(g)
            })
        });
    }
    group.finish();
}

fn bench_tri_solve(c: &mut Criterion) {
    let mut group = c.benchmark_group("mdivide_left_tri");
    for n in [5, 20, 50] {
        let a = lower_triangular(n);
        let rhs = DMatrix::from_fn(n, 1, |i, _| i as f64 + 1.0);
        let session = Session::new();

        group.bench_with_input(BenchmarkId::new("both_tracked", n), &a, |b, a| {
            b.iter(|| {
                let av = a.map(Var::new);
                let bv = rhs.map(Var::new);
                let x = mdivide_left_tri_low(&av, &bv).unwrap();
                let s: Var = x.iter().copied().sum();
                s.grad().unwrap();
                session.recover_memory().unwrap();
                black_box(s.value())
            })
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_reverse_gradient,
    bench_session_reuse,
    bench_dot_product,
    bench_tri_solve
);
criterion_main!(benches);
