//! Bounded array sizes and algorithmic constants.

/// max method order for the Adams family
pub const ADAMS_Q_MAX: usize = 12;
/// max method order for the BDF family
pub const BDF_Q_MAX: usize = 5;
/// max method order for either family
pub const Q_MAX: usize = ADAMS_Q_MAX;
/// max number of history rows (`q_max + 1`)
pub const L_MAX: usize = Q_MAX + 1;
/// number of error-test quantities carried in `tq`
pub const NUM_TESTS: usize = 5;

/// mxstep default value
pub(crate) const MXSTEP_DEFAULT: usize = 500;
/// mxhnil default value
pub(crate) const MXHNIL_DEFAULT: i32 = 10;
/// max number of convergence failures per step attempt
pub(crate) const MXNCF: usize = 10;
/// max number of error test failures per step attempt
pub(crate) const MXNEF: usize = 7;
/// error-test failures before the order is forced down
pub(crate) const MXNEF1: usize = 3;
/// error-test failures before eta is capped at ETAMXF
pub(crate) const SMALL_NEF: usize = 2;
/// steps after which the step-growth cap drops from ETAMX2 to ETAMX3
pub(crate) const SMALL_NST: usize = 10;
/// qwait value after an order-1 restart
pub(crate) const LONG_WAIT: usize = 10;

/// max corrector iterations per solve attempt
pub(crate) const NLS_MAXCOR: usize = 3;
/// convergence-rate memory factor in the corrector test
pub(crate) const CRDOWN: f64 = 0.3;
/// divergence threshold on successive correction norms
pub(crate) const RDIV: f64 = 2.0;
/// cap on the rate estimate in the corrector test denominator
pub(crate) const RATEMAX: f64 = 0.9;
/// nonlinear convergence safety coefficient default
pub(crate) const NLSCOEF_DEFAULT: f64 = 0.1;

/// max steps between linear setups
pub(crate) const MSBP: usize = 20;
/// gamma-ratio drift that forces a linear setup
pub(crate) const DGMAX: f64 = 0.3;
/// max steps between Jacobian evaluations
pub(crate) const MSBJ: usize = 50;

/// step-growth cap for the very first step
pub(crate) const ETAMX1: f64 = 10_000.0;
/// step-growth cap for the first few steps
pub(crate) const ETAMX2: f64 = 10.0;
/// step-growth cap thereafter
pub(crate) const ETAMX3: f64 = 10.0;
/// step-reduction factor after repeated error-test failures
pub(crate) const ETAMXF: f64 = 0.2;
/// smallest step-reduction factor on an error-test failure
pub(crate) const ETAMIN: f64 = 0.1;
/// step-reduction factor after a convergence failure
pub(crate) const ETACF: f64 = 0.25;
/// efficiency bias on the local error estimates
pub(crate) const EBIAS: f64 = 2.0;
/// guard added to the biased error estimate before inversion
pub(crate) const ADDON: f64 = 0.000001;
/// eta threshold below which the step size is left alone
pub(crate) const THRESH: f64 = 1.5;

/// one plus a safety margin, for |h| <= hmin comparisons
pub(crate) const ONEPSM: f64 = 1.000001;
/// roundoff fuzz multiplier on interpolation interval checks
pub(crate) const FUZZ_FACTOR: f64 = 100.0;

/// hmin default value
pub(crate) const HMIN_DEFAULT: f64 = 0.0;
/// inverse of the hmax default (0 = unbounded)
pub(crate) const HMAX_INV_DEFAULT: f64 = 0.0;
