//! Primal-dual interior point method for small dense QPs
//!
//! Solves
//!
//! ```text
//! minimize    c'x + ½ x'Hx
//! subject to  Ax = b,  l <= x <= u
//! ```
//!
//! with a Mehrotra-style predictor-corrector on the slack form
//! `x - g = l`, `x + t = u` (duals `z`, `s`). Each iteration factors the
//! reduced KKT system once and reuses the factorization for the corrector.

use crate::core::SolverError;
use log::trace;

/// Objective or infeasibility magnitude treated as divergence
const DIVERGENCE: f64 = 1e101;

/// Why the interior point iteration stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpStatus {
    Optimal,
    IterationLimit,
    PrimalInfeasible,
    DualInfeasible,
    PrimalAndDualInfeasible,
    PrimalUnbounded,
    DualUnbounded,
    /// A Cholesky factorization failed (matrix not positive definite)
    Inconsistent,
    /// NaN or infinity appeared in the iterates
    NotFinite,
}

impl IpStatus {
    pub fn is_optimal(self) -> bool {
        self == IpStatus::Optimal
    }

    /// Failures that call for a more conservative step margin
    pub fn is_numerical(self) -> bool {
        matches!(self, IpStatus::Inconsistent | IpStatus::NotFinite)
    }
}

/// Tuning knobs of one interior point run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IpSettings {
    /// Stop once primal and dual objectives agree to this many digits
    pub sigfig_max: f64,
    pub max_iterations: usize,
    /// Fraction of the distance to the boundary a step may cover is `1 - margin`
    pub margin: f64,
    /// Lower bound for the initial slacks and duals
    pub bound: f64,
}

impl Default for IpSettings {
    fn default() -> Self {
        Self {
            sigfig_max: 8.0,
            max_iterations: 500,
            margin: 0.15,
            bound: 1.0,
        }
    }
}

/// Dense QP in the form accepted by [`solve`]
///
/// `hessian` is row-major `n × n`, `equality` is row-major `m × n`.
#[derive(Debug, Clone, Copy)]
pub struct BoxQp<'a> {
    pub hessian: &'a [f64],
    pub linear: &'a [f64],
    pub equality: &'a [f64],
    pub rhs: &'a [f64],
    pub lower: &'a [f64],
    pub upper: &'a [f64],
}

impl BoxQp<'_> {
    pub fn num_variables(&self) -> usize {
        self.linear.len()
    }

    pub fn num_constraints(&self) -> usize {
        self.rhs.len()
    }

    fn equality_row(&self, k: usize) -> &[f64] {
        let n = self.num_variables();
        &self.equality[k * n..(k + 1) * n]
    }
}

#[derive(Debug, Clone)]
pub struct IpSolution {
    pub x: Vec<f64>,
    /// Multipliers of the equality constraints
    pub y: Vec<f64>,
    pub status: IpStatus,
    pub iterations: usize,
}

impl IpSolution {
    /// The failure of a run that did not reach the requested precision
    ///
    /// Non-finite iterates or multipliers and failed factorizations are
    /// `NumericalInstability`; any other non-optimal stop is `QpNonConvergence`.
    pub fn failure(&self) -> Option<SolverError> {
        let not_finite = self.x.iter().chain(&self.y).any(|v| !v.is_finite());
        if self.status.is_numerical() || not_finite {
            Some(SolverError::NumericalInstability(format!(
                "{:?} after {} interior point iterations",
                self.status, self.iterations
            )))
        } else if !self.status.is_optimal() {
            Some(SolverError::QpNonConvergence(format!(
                "{:?} after {} interior point iterations",
                self.status, self.iterations
            )))
        } else {
            None
        }
    }
}

/// Lower-triangular Cholesky factor of a dense symmetric matrix
#[derive(Debug, Clone)]
struct Cholesky {
    n: usize,
    l: Vec<f64>,
}

impl Cholesky {
    fn factor(a: &[f64], n: usize) -> Option<Self> {
        let mut l = vec![0.0; n * n];
        for i in 0..n {
            for j in 0..=i {
                let mut sum = a[i * n + j];
                for k in 0..j {
                    sum -= l[i * n + k] * l[j * n + k];
                }
                if i == j {
                    if sum <= 0.0 || sum.is_nan() {
                        return None;
                    }
                    l[i * n + i] = sum.sqrt();
                } else {
                    l[i * n + j] = sum / l[j * n + j];
                }
            }
        }
        Some(Self { n, l })
    }

    /// Solve `L x = b`
    fn forward(&self, b: &[f64]) -> Vec<f64> {
        let n = self.n;
        let mut x = vec![0.0; n];
        for i in 0..n {
            let mut sum = b[i];
            for k in 0..i {
                sum -= self.l[i * n + k] * x[k];
            }
            x[i] = sum / self.l[i * n + i];
        }
        x
    }

    /// Solve `L' x = b`
    fn backward(&self, b: &[f64]) -> Vec<f64> {
        let n = self.n;
        let mut x = vec![0.0; n];
        for i in (0..n).rev() {
            let mut sum = b[i];
            for k in i + 1..n {
                sum -= self.l[k * n + i] * x[k];
            }
            x[i] = sum / self.l[i * n + i];
        }
        x
    }

    fn solve(&self, b: &[f64]) -> Vec<f64> {
        self.backward(&self.forward(b))
    }
}

/// Factorization of
///
/// ```text
/// | -H_x  A'  | |x_x|   |c_x|
/// |  A    H_y | |x_y| = |c_y|
/// ```
///
/// with `H_y = hy_diag · I`, eliminated onto the equality block.
struct ReducedSystem {
    hx: Cholesky,
    /// `L⁻¹ a_k` for each equality row
    t_a: Vec<Vec<f64>>,
    hy: Cholesky,
}

impl ReducedSystem {
    fn factor(h_x: &[f64], qp: &BoxQp<'_>, hy_diag: f64) -> Option<Self> {
        let n = qp.num_variables();
        let m = qp.num_constraints();
        let hx = Cholesky::factor(h_x, n)?;
        let t_a: Vec<Vec<f64>> = (0..m).map(|k| hx.forward(qp.equality_row(k))).collect();

        let mut h_y = vec![0.0; m * m];
        for i in 0..m {
            for j in 0..m {
                h_y[i * m + j] = dot(&t_a[i], &t_a[j]);
            }
            h_y[i * m + i] += hy_diag;
        }
        let hy = Cholesky::factor(&h_y, m)?;
        Some(Self { hx, t_a, hy })
    }

    fn solve(&self, c_x: &[f64], c_y: &[f64]) -> (Vec<f64>, Vec<f64>) {
        let t_c = self.hx.forward(c_x);
        let t_y: Vec<f64> = c_y
            .iter()
            .zip(&self.t_a)
            .map(|(c, t_a)| c + dot(t_a, &t_c))
            .collect();
        let x_y = self.hy.solve(&t_y);

        let rhs: Vec<f64> = (0..t_c.len())
            .map(|i| {
                -t_c[i]
                    + self
                        .t_a
                        .iter()
                        .zip(&x_y)
                        .map(|(t_a, y)| t_a[i] * y)
                        .sum::<f64>()
            })
            .collect();
        (self.hx.backward(&rhs), x_y)
    }
}

/// Search direction for the slack and dual variables
struct Direction {
    x: Vec<f64>,
    y: Vec<f64>,
    g: Vec<f64>,
    t: Vec<f64>,
    z: Vec<f64>,
    s: Vec<f64>,
}

struct Iterate {
    x: Vec<f64>,
    y: Vec<f64>,
    g: Vec<f64>,
    t: Vec<f64>,
    z: Vec<f64>,
    s: Vec<f64>,
}

impl Iterate {
    fn complementarity(&self) -> f64 {
        let n = self.x.len();
        let total: f64 = (0..n)
            .map(|i| self.z[i] * self.g[i] + self.s[i] * self.t[i])
            .sum();
        total / (2 * n) as f64
    }

    fn is_finite(&self) -> bool {
        [&self.x, &self.y, &self.g, &self.t, &self.z, &self.s]
            .iter()
            .all(|v| v.iter().all(|x| x.is_finite()))
    }

    /// Recover the slack and dual steps from the primal step `dx`
    fn complete(&self, dx: Vec<f64>, dy: Vec<f64>, hat: &Hat) -> Direction {
        let n = dx.len();
        let mut d = Direction {
            x: dx,
            y: dy,
            g: vec![0.0; n],
            t: vec![0.0; n],
            z: vec![0.0; n],
            s: vec![0.0; n],
        };
        for i in 0..n {
            d.s[i] = self.s[i] * (d.x[i] - hat.tau[i]) / self.t[i];
            d.z[i] = self.z[i] * (hat.nu[i] - d.x[i]) / self.g[i];
            d.g[i] = self.g[i] * (hat.gamma_z[i] - d.z[i]) / self.z[i];
            d.t[i] = self.t[i] * (hat.gamma_s[i] - d.s[i]) / self.s[i];
        }
        d
    }
}

/// Centering terms and the right hand side derived from them
struct Hat {
    gamma_z: Vec<f64>,
    gamma_s: Vec<f64>,
    nu: Vec<f64>,
    tau: Vec<f64>,
    c_x: Vec<f64>,
}

impl Hat {
    fn new(
        it: &Iterate,
        residuals: &Residuals,
        gamma_z: Vec<f64>,
        gamma_s: Vec<f64>,
    ) -> Self {
        let n = it.x.len();
        let mut nu = vec![0.0; n];
        let mut tau = vec![0.0; n];
        let mut c_x = vec![0.0; n];
        for i in 0..n {
            nu[i] = residuals.nu[i] + it.g[i] * gamma_z[i] / it.z[i];
            tau[i] = residuals.tau[i] - it.t[i] * gamma_s[i] / it.s[i];
            c_x[i] = residuals.sigma[i] - it.z[i] * nu[i] / it.g[i] - it.s[i] * tau[i] / it.t[i];
        }
        Self {
            gamma_z,
            gamma_s,
            nu,
            tau,
            c_x,
        }
    }
}

struct Residuals {
    rho: Vec<f64>,
    nu: Vec<f64>,
    tau: Vec<f64>,
    sigma: Vec<f64>,
}

/// Run the interior point method from its default starting point
pub fn solve(qp: &BoxQp<'_>, settings: &IpSettings) -> IpSolution {
    let n = qp.num_variables();
    let m = qp.num_constraints();
    if n == 0 {
        return IpSolution {
            x: Vec::new(),
            y: vec![0.0; m],
            status: IpStatus::Optimal,
            iterations: 0,
        };
    }
    let h = qp.hessian;
    let c_norm = 1.0 + qp.linear.iter().map(|v| v.abs()).sum::<f64>();

    // Starting point: solve the regularized system [-(H+I) A'; A I][x; y] = [c; b]
    let mut shifted = h.to_vec();
    for i in 0..n {
        shifted[i * n + i] += 1.0;
    }
    let Some(start) = ReducedSystem::factor(&shifted, qp, 1.0) else {
        return IpSolution {
            x: vec![0.0; n],
            y: vec![f64::NAN; m],
            status: IpStatus::Inconsistent,
            iterations: 0,
        };
    };
    let (x, y) = start.solve(qp.linear, qp.rhs);
    let bound = settings.bound;
    let mut it = Iterate {
        g: (0..n).map(|i| (x[i] - qp.lower[i]).abs().max(bound)).collect(),
        z: x.iter().map(|v| v.abs().max(bound)).collect(),
        t: (0..n).map(|i| (qp.upper[i] - x[i]).abs().max(bound)).collect(),
        s: x.iter().map(|v| v.abs().max(bound)).collect(),
        x,
        y,
    };
    let mut mu = it.complementarity();
    let mut counter = 0;

    loop {
        let h_dot_x = mat_vec(h, &it.x);
        let rho: Vec<f64> = (0..m)
            .map(|k| qp.rhs[k] - dot(qp.equality_row(k), &it.x))
            .collect();
        let mut residuals = Residuals {
            rho,
            nu: vec![0.0; n],
            tau: vec![0.0; n],
            sigma: vec![0.0; n],
        };
        for i in 0..n {
            residuals.nu[i] = qp.lower[i] - it.x[i] + it.g[i];
            residuals.tau[i] = qp.upper[i] - it.x[i] - it.t[i];
            residuals.sigma[i] = qp.linear[i] - it.z[i] + it.s[i] + h_dot_x[i]
                - (0..m).map(|k| qp.equality[k * n + i] * it.y[k]).sum::<f64>();
        }

        let x_h_x = dot(&h_dot_x, &it.x);
        let primal_inf = (sum_sq(&residuals.tau) + sum_sq(&residuals.nu) + sum_sq(&residuals.rho))
            .sqrt();
        let dual_inf = sum_sq(&residuals.sigma).sqrt() / c_norm;
        let primal_obj = 0.5 * x_h_x + dot(qp.linear, &it.x);
        let dual_obj = -0.5 * x_h_x
            + (0..n)
                .map(|i| qp.lower[i] * it.z[i] - qp.upper[i] * it.s[i])
                .sum::<f64>()
            + dot(qp.rhs, &it.y);
        let sigfig = ((primal_obj.abs() + 1.0).log10() - (primal_obj - dual_obj).abs().log10())
            .max(0.0);

        let mut status = None;
        if counter > settings.max_iterations {
            status = Some(IpStatus::IterationLimit);
        }
        if sigfig > settings.sigfig_max {
            status = Some(IpStatus::Optimal);
        }
        if primal_inf > DIVERGENCE {
            status = Some(IpStatus::PrimalInfeasible);
        }
        if dual_inf > DIVERGENCE {
            status = Some(IpStatus::DualInfeasible);
        }
        if primal_inf > DIVERGENCE && dual_inf > DIVERGENCE {
            status = Some(IpStatus::PrimalAndDualInfeasible);
        }
        if primal_obj.abs() > DIVERGENCE {
            status = Some(IpStatus::PrimalUnbounded);
        }
        if dual_obj.abs() > DIVERGENCE {
            status = Some(IpStatus::DualUnbounded);
        }
        if !primal_obj.is_finite() || !dual_obj.is_finite() || !it.is_finite() {
            status = Some(IpStatus::NotFinite);
        }

        trace!(
            "ip {counter:4} | pinf {primal_inf:.2e} | dinf {dual_inf:.2e} | pobj {primal_obj:.6e} \
             | dobj {dual_obj:.6e} | sigfig {sigfig:.3} | mu {mu:.2e}"
        );
        counter += 1;

        if let Some(status) = status {
            return IpSolution {
                x: it.x,
                y: it.y,
                status,
                iterations: counter,
            };
        }

        // predictor
        let predictor = Hat::new(
            &it,
            &residuals,
            it.z.iter().map(|z| -z).collect(),
            it.s.iter().map(|s| -s).collect(),
        );
        let mut h_d = h.to_vec();
        for i in 0..n {
            h_d[i * n + i] += it.z[i] / it.g[i] + it.s[i] / it.t[i];
        }
        let Some(system) = ReducedSystem::factor(&h_d, qp, 0.0) else {
            return IpSolution {
                x: it.x,
                y: it.y,
                status: IpStatus::Inconsistent,
                iterations: counter,
            };
        };
        let (dx, dy) = system.solve(&predictor.c_x, &residuals.rho);
        let step = it.complete(dx, dy, &predictor);

        // corrector, reusing the factorization
        let gamma_z: Vec<f64> = (0..n)
            .map(|i| mu / it.g[i] - it.z[i] - step.z[i] * step.g[i] / it.g[i])
            .collect();
        let gamma_s: Vec<f64> = (0..n)
            .map(|i| mu / it.t[i] - it.s[i] - step.s[i] * step.t[i] / it.t[i])
            .collect();
        let corrector = Hat::new(&it, &residuals, gamma_z, gamma_s);
        let (dx, dy) = system.solve(&corrector.c_x, &residuals.rho);
        let step = it.complete(dx, dy, &corrector);

        let mut alfa: f64 = -1.0;
        for i in 0..n {
            alfa = alfa
                .min(step.g[i] / it.g[i])
                .min(step.t[i] / it.t[i])
                .min(step.s[i] / it.s[i])
                .min(step.z[i] / it.z[i]);
        }
        alfa = (settings.margin - 1.0) / alfa;

        let ratio = (alfa - 1.0) / (alfa + 10.0);
        mu = it.complementarity() * ratio * ratio;

        for i in 0..n {
            it.x[i] += alfa * step.x[i];
            it.g[i] += alfa * step.g[i];
            it.t[i] += alfa * step.t[i];
            it.z[i] += alfa * step.z[i];
            it.s[i] += alfa * step.s[i];
        }
        for k in 0..m {
            it.y[k] += alfa * step.y[k];
        }
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn sum_sq(v: &[f64]) -> f64 {
    v.iter().map(|x| x * x).sum()
}

fn mat_vec(h: &[f64], x: &[f64]) -> Vec<f64> {
    let n = x.len();
    (0..n).map(|i| dot(&h[i * n..(i + 1) * n], x)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_cholesky_solve() {
        let a = [4.0, 2.0, 2.0, 3.0];
        let chol = Cholesky::factor(&a, 2).unwrap();
        let x = chol.solve(&[2.0, 1.0]);
        assert_abs_diff_eq!(4.0 * x[0] + 2.0 * x[1], 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(2.0 * x[0] + 3.0 * x[1], 1.0, epsilon = 1e-12);
        assert!(Cholesky::factor(&[1.0, 2.0, 2.0, 1.0], 2).is_none());
    }

    #[test]
    fn test_unconstrained_interior_minimum() {
        let qp = BoxQp {
            hessian: &[2.0],
            linear: &[-2.0],
            equality: &[],
            rhs: &[],
            lower: &[0.0],
            upper: &[5.0],
        };
        let solution = solve(&qp, &IpSettings::default());
        assert!(solution.status.is_optimal());
        assert_abs_diff_eq!(solution.x[0], 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_equality_constrained_pair() {
        // two examples of opposite labels with an identity kernel
        let qp = BoxQp {
            hessian: &[1.0, 0.0, 0.0, 1.0],
            linear: &[-1.0, -1.0],
            equality: &[1.0, -1.0],
            rhs: &[0.0],
            lower: &[0.0, 0.0],
            upper: &[10.0, 10.0],
        };
        let solution = solve(&qp, &IpSettings::default());
        assert!(solution.status.is_optimal());
        assert_abs_diff_eq!(solution.x[0], 1.0, epsilon = 1e-5);
        assert_abs_diff_eq!(solution.x[1], 1.0, epsilon = 1e-5);
        assert_eq!(solution.y.len(), 1);
        assert!(solution.failure().is_none());
    }

    #[test]
    fn test_active_upper_bound() {
        let qp = BoxQp {
            hessian: &[1.0, 0.0, 0.0, 1.0],
            linear: &[-1.0, -1.0],
            equality: &[1.0, -1.0],
            rhs: &[0.0],
            lower: &[0.0, 0.0],
            upper: &[0.5, 0.5],
        };
        let solution = solve(&qp, &IpSettings::default());
        assert!(solution.status.is_optimal());
        assert_abs_diff_eq!(solution.x[0], 0.5, epsilon = 1e-4);
        assert_abs_diff_eq!(solution.x[1], 0.5, epsilon = 1e-4);
    }

    #[test]
    fn test_indefinite_start_is_inconsistent() {
        let qp = BoxQp {
            hessian: &[-1e6],
            linear: &[0.0],
            equality: &[],
            rhs: &[],
            lower: &[0.0],
            upper: &[1.0],
        };
        let solution = solve(&qp, &IpSettings::default());
        assert_eq!(solution.status, IpStatus::Inconsistent);
        assert!(solution.status.is_numerical());
        let failure = solution.failure().unwrap();
        assert!(matches!(failure, SolverError::NumericalInstability(_)));
        assert!(failure.is_recoverable());
    }

    #[test]
    fn test_iteration_limit() {
        let qp = BoxQp {
            hessian: &[1.0, 0.5, 0.5, 1.0],
            linear: &[-1.0, -1.0],
            equality: &[],
            rhs: &[],
            lower: &[0.0, 0.0],
            upper: &[1.0, 1.0],
        };
        let settings = IpSettings {
            max_iterations: 0,
            sigfig_max: 14.0,
            ..Default::default()
        };
        let solution = solve(&qp, &settings);
        assert_eq!(solution.status, IpStatus::IterationLimit);
        assert!(matches!(
            solution.failure(),
            Some(SolverError::QpNonConvergence(_))
        ));
    }

    #[test]
    fn test_empty_problem() {
        let qp = BoxQp {
            hessian: &[],
            linear: &[],
            equality: &[],
            rhs: &[],
            lower: &[],
            upper: &[],
        };
        let solution = solve(&qp, &IpSettings::default());
        assert!(solution.status.is_optimal());
        assert!(solution.x.is_empty());
    }
}
