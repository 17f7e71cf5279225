use criterion::{black_box, criterion_group, criterion_main, Criterion};
use nalgebra::{DMatrix, DVector};
use vode::{
    CallbackError, Jac, Method, QuadRhs, Rhs, SensParams, SensRhs, Task, TolControl, Vode,
};

/// Linear decay network: y_i' = -(i+1)*y_i.
struct DecayChain {
    n: usize,
}

impl Rhs<f64> for DecayChain {
    fn rhs(&self, _t: f64, y: &DVector<f64>, ydot: &mut DVector<f64>) -> Result<(), CallbackError> {
        for i in 0..self.n {
            ydot[i] = -((i + 1) as f64) * y[i];
        }
        Ok(())
    }
}

impl Jac<f64> for DecayChain {
    fn jac(
        &self,
        _t: f64,
        _y: &DVector<f64>,
        _fy: &DVector<f64>,
        j: &mut DMatrix<f64>,
    ) -> Result<(), CallbackError> {
        for i in 0..self.n {
            j[(i, i)] = -((i + 1) as f64);
        }
        Ok(())
    }
}

impl QuadRhs<f64> for DecayChain {}
impl SensRhs<f64> for DecayChain {}
impl SensParams<f64> for DecayChain {}

fn integrate(n: usize) -> usize {
    let y0 = DVector::from_element(n, 1.0);
    let mut solver: Vode<f64, DecayChain, linear::Dense, nonlinear::Newton<f64>> = Vode::new(
        DecayChain { n },
        linear::Dense::new(n),
        TolControl::new_ss(1e-6, 1e-10),
        Method::Bdf,
        0.0,
        &y0,
    )
    .unwrap();
    solver.set_max_num_steps(100_000);

    let mut tret = 0.0;
    solver.solve(5.0, &mut tret, Task::Normal).unwrap();
    solver.stats().nst
}

fn criterion_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("decay_chain");
    for n in [2usize, 10, 50] {
        group.bench_function(format!("n={n}"), |b| b.iter(|| integrate(black_box(n))));
    }
    group.finish();
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
