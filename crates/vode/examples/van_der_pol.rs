//! Van der Pol oscillator with mu = 1000: BDF, Newton iteration and the
//! dense linear solver, printed at a handful of output times.

use nalgebra::{DMatrix, DVector};
use vode::{
    CallbackError, Jac, Method, QuadRhs, Rhs, SensParams, SensRhs, Task, TolControl, Vode,
};

struct VanDerPol {
    mu: f64,
}

impl Rhs<f64> for VanDerPol {
    fn rhs(&self, _t: f64, y: &DVector<f64>, ydot: &mut DVector<f64>) -> Result<(), CallbackError> {
        ydot[0] = y[1];
        ydot[1] = self.mu * (1.0 - y[0] * y[0]) * y[1] - y[0];
        Ok(())
    }
}

impl Jac<f64> for VanDerPol {
    fn jac(
        &self,
        _t: f64,
        y: &DVector<f64>,
        _fy: &DVector<f64>,
        j: &mut DMatrix<f64>,
    ) -> Result<(), CallbackError> {
        j[(0, 0)] = 0.0;
        j[(0, 1)] = 1.0;
        j[(1, 0)] = -2.0 * self.mu * y[0] * y[1] - 1.0;
        j[(1, 1)] = self.mu * (1.0 - y[0] * y[0]);
        Ok(())
    }
}

impl QuadRhs<f64> for VanDerPol {}
impl SensRhs<f64> for VanDerPol {}
impl SensParams<f64> for VanDerPol {}

fn main() {
    env_logger::init();

    let y0 = DVector::from_vec(vec![2.0, 0.0]);
    let mut solver: Vode<f64, VanDerPol, linear::Dense, nonlinear::Newton<f64>> = Vode::new(
        VanDerPol { mu: 1000.0 },
        linear::Dense::new(2),
        TolControl::new_sv(1e-4, DVector::from_vec(vec![1e-6, 1e-6])),
        Method::Bdf,
        0.0,
        &y0,
    )
    .expect("solver construction");
    solver.set_max_num_steps(100_000);

    println!("van der pol, mu = 1000, BDF + Newton + dense");
    println!("{:>12} {:>14} {:>14} {:>8} {:>4} {:>12}", "t", "y0", "y1", "nst", "q", "h");

    let mut tret = 0.0;
    let mut tout = 187.5;
    for _ in 0..16 {
        match solver.solve(tout, &mut tret, Task::Normal) {
            Ok(_) => {
                let stats = solver.stats();
                println!(
                    "{:>12.4e} {:>14.6e} {:>14.6e} {:>8} {:>4} {:>12.4e}",
                    tret,
                    solver.y()[0],
                    solver.y()[1],
                    stats.nst,
                    stats.qu,
                    stats.hu,
                );
                tout += 187.5;
            }
            Err(e) => {
                eprintln!("solver failed: {e}");
                break;
            }
        }
    }

    let stats = solver.stats();
    println!("\nfinal statistics:");
    println!("  steps                    {}", stats.nst);
    println!("  rhs evaluations          {}", stats.nfe);
    println!("  jacobian evaluations     {}", stats.nje);
    println!("  linear setups            {}", stats.nsetups);
    println!("  nonlinear iterations     {}", stats.nni);
    println!("  error test failures      {}", stats.netf);
    println!("  convergence failures     {}", stats.ncfn);
}
