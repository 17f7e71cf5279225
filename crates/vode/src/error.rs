use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("illegal input: {msg}")]
    IllegalInput { msg: String },

    #[error("at t = {t:.5e}, mxstep steps ({mxstep}) taken before reaching tout")]
    TooMuchWork { t: f64, mxstep: usize },

    /// The requested accuracy is below what the arithmetic supports at the
    /// current solution magnitude. The suggested tolerance scaling is
    /// available from the stats snapshot.
    #[error("at t = {t:.5e} too much accuracy requested")]
    TooMuchAccuracy { t: f64 },

    #[error("at t = {t:.5e} and h = {h:.5e}, the error test failed repeatedly or with |h| = hmin")]
    ErrFailure { t: f64, h: f64 },

    #[error("at t = {t:.5e} and h = {h:.5e}, the corrector failed to converge repeatedly or with |h| = hmin")]
    ConvFailure { t: f64, h: f64 },

    #[error("at t = {t:.5e}, the linear solver setup failed unrecoverably")]
    SetupFailure { t: f64 },

    #[error("at t = {t:.5e}, the linear solver solve failed unrecoverably")]
    SolveFailure { t: f64 },

    #[error("at t = {t:.5e}, the right-hand side routine failed unrecoverably")]
    RhsFuncFailure { t: f64 },

    #[error("at t = {t:.5e}, the right-hand side routine repeatedly returned recoverable errors")]
    RepeatedRhsFuncErr { t: f64 },

    #[error("at t = {t:.5e}, the quadrature right-hand side routine failed unrecoverably")]
    QuadRhsFuncFailure { t: f64 },

    #[error("at t = {t:.5e}, the sensitivity right-hand side routine failed unrecoverably")]
    SensRhsFuncFailure { t: f64 },

    #[error("at t = {t:.5e}, unable to satisfy the inequality constraints")]
    ConstraintFailure { t: f64 },

    #[error("at t = {t:.5e}, a component of the error weight vector became <= 0")]
    BadErrorWeight { t: f64 },

    #[error("illegal derivative order k = {k}, must be in [0, {qu}]")]
    BadK { k: usize, qu: usize },

    #[error("illegal interpolation time t = {t:.5e}, not in [{tstart:.5e}, {tend:.5e}]")]
    BadT { t: f64, tstart: f64, tend: f64 },

    #[error("tout too close to t0 to start integration")]
    TooClose,

    #[error("the stop time tstop = {tstop:.5e} is behind the current t = {t:.5e}")]
    BadTstop { tstop: f64, t: f64 },

    #[error("sensitivity analysis was not initialized")]
    NoSens,

    #[error("quadrature integration was not initialized")]
    NoQuad,
}
