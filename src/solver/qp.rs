//! QP subproblem over the working set
//!
//! Builds the restricted dual for the current working set and drives the
//! interior point method with SVMlight-style robustness handling: restarts
//! with a more conservative step margin after numerical failures, adaptive
//! precision, KKT-based clipping of the result to the box, and fallback to
//! the previous alphas when the solver diverges.

use crate::core::SolverError;
use crate::solver::interior_point::{self, BoxQp, IpSettings, IpStatus};
use crate::solver::state::ExampleState;
use log::{debug, info, warn};
use std::sync::Arc;

/// Finest interior point precision ever requested
const MIN_PRECISION: f64 = 1e-14;
/// Retry budget per subproblem
const MAX_ATTEMPTS: usize = 8;
/// Unproductive subproblems tolerated before the KKT tolerance is relaxed
const MAX_PRECISION_VIOLATIONS: usize = 5000;

/// Dense restricted dual
///
/// ```text
/// minimize    g0'x + ½ x'Gx
/// subject to  y_W'x = rhs,  0 <= x <= cost_W
/// ```
#[derive(Debug, Clone)]
pub struct QpProblem {
    pub hessian: Vec<f64>,
    pub linear: Vec<f64>,
    /// Labels of the working set, empty for an unbiased problem
    pub equality: Vec<f64>,
    pub rhs: Vec<f64>,
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
    /// Current alphas of the working set
    pub start: Vec<f64>,
}

impl QpProblem {
    /// Build the subproblem for `working`, where `rows[k]` is the full kernel
    /// row of `working[k]`
    pub fn assemble(
        working: &[usize],
        rows: &[Arc<[f64]>],
        state: &ExampleState,
        biased: bool,
    ) -> Self {
        let n = working.len();
        let mut hessian = vec![0.0; n * n];
        let mut linear = vec![0.0; n];
        for (k, &i) in working.iter().enumerate() {
            let y_i = state.labels[i];
            let row = &rows[k];
            let mut inside = 0.0;
            for (l, &j) in working.iter().enumerate() {
                let y_j = state.labels[j];
                hessian[k * n + l] = y_i * y_j * row[j];
                inside += row[j] * state.alpha[j] * y_j;
            }
            linear[k] = state.linear_term[i] + y_i * (state.gradient[i] - inside);
        }

        let (equality, rhs) = if biased {
            let in_working: f64 = working
                .iter()
                .map(|&j| state.alpha[j] * state.labels[j])
                .sum();
            let outside = state.equality_sum() - in_working;
            (
                working.iter().map(|&j| state.labels[j]).collect(),
                vec![-outside],
            )
        } else {
            (Vec::new(), Vec::new())
        };

        Self {
            hessian,
            linear,
            equality,
            rhs,
            lower: vec![0.0; n],
            upper: working.iter().map(|&j| state.cost[j]).collect(),
            start: working.iter().map(|&j| state.alpha[j]).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.linear.len()
    }

    pub fn is_empty(&self) -> bool {
        self.linear.is_empty()
    }

    pub fn is_biased(&self) -> bool {
        !self.rhs.is_empty()
    }

    /// `g0'x + ½ x'Gx`
    pub fn objective(&self, x: &[f64]) -> f64 {
        let gx = self.hessian_times(x);
        x.iter()
            .zip(&self.linear)
            .zip(&gx)
            .map(|((x, g0), gx)| g0 * x + 0.5 * x * gx)
            .sum()
    }

    fn hessian_times(&self, x: &[f64]) -> Vec<f64> {
        let n = self.len();
        (0..n)
            .map(|i| {
                self.hessian[i * n..(i + 1) * n]
                    .iter()
                    .zip(x)
                    .map(|(h, x)| h * x)
                    .sum()
            })
            .collect()
    }

    fn equality_residual(&self, x: &[f64]) -> f64 {
        match self.rhs.first() {
            Some(rhs) => (self.equality.iter().zip(x).map(|(y, x)| y * x).sum::<f64>() - rhs).abs(),
            None => 0.0,
        }
    }

    fn as_box_qp(&self) -> BoxQp<'_> {
        BoxQp {
            hessian: &self.hessian,
            linear: &self.linear,
            equality: &self.equality,
            rhs: &self.rhs,
            lower: &self.lower,
            upper: &self.upper,
        }
    }
}

/// How the subproblem result was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QpOutcome {
    Optimal,
    /// The solver did not converge; the result is a feasible improvement or the start
    Degraded,
    /// The solver produced non-finite values; alphas were reset to the start
    Reset,
}

#[derive(Debug, Clone)]
pub struct QpSolution {
    pub alpha: Vec<f64>,
    /// Threshold estimate from the equality multiplier
    pub threshold: f64,
    pub outcome: QpOutcome,
    pub objective_before: f64,
    pub objective_after: f64,
    /// Too many unproductive subproblems: the KKT tolerance should be relaxed
    pub relax_tolerance: bool,
    /// The working-set size should be reduced
    pub reduce_qp_size: bool,
}

impl QpSolution {
    /// Change of the full dual objective caused by this subproblem
    pub fn objective_delta(&self) -> f64 {
        self.objective_after - self.objective_before
    }
}

/// Interior point driver that carries its robustness settings across calls
#[derive(Debug, Clone)]
pub struct QpSubproblemSolver {
    init_margin: f64,
    init_iter: usize,
    precision: f64,
    precision_violations: usize,
    degraded: usize,
    resets: usize,
}

impl Default for QpSubproblemSolver {
    fn default() -> Self {
        Self::new()
    }
}

impl QpSubproblemSolver {
    pub fn new() -> Self {
        Self {
            init_margin: 0.15,
            init_iter: 500,
            precision: MIN_PRECISION,
            precision_violations: 0,
            degraded: 0,
            resets: 0,
        }
    }

    pub fn degraded_count(&self) -> usize {
        self.degraded
    }

    pub fn reset_count(&self) -> usize {
        self.resets
    }

    /// Solve `qp`, clipping variables that are within the KKT tolerance
    /// `epsilon_crit` of a bound
    pub fn solve(&mut self, qp: &QpProblem, epsilon_crit: f64) -> QpSolution {
        let objective_before = qp.objective(&qp.start);
        if qp.is_empty() {
            return QpSolution {
                alpha: Vec::new(),
                threshold: 0.0,
                outcome: QpOutcome::Optimal,
                objective_before,
                objective_after: objective_before,
                relax_tolerance: false,
                reduce_qp_size: false,
            };
        }

        let box_qp = qp.as_box_qp();
        let mut margin = self.init_margin;
        let mut iterations = self.init_iter;
        let mut attempts = 0;
        let mut last = None;
        let mut failure = None;
        while margin <= 0.9999999 && attempts < MAX_ATTEMPTS {
            self.precision = self.precision.max(MIN_PRECISION);
            let settings = IpSettings {
                sigfig_max: -self.precision.log10(),
                max_iterations: iterations,
                margin,
                bound: qp.upper[0] / 4.0,
            };
            let result = interior_point::solve(&box_qp, &settings);
            attempts += 1;

            failure = result.failure();
            match &failure {
                None => {
                    last = Some(result);
                    break;
                }
                Some(SolverError::NumericalInstability(reason)) => {
                    debug!("{reason}, restarting with a more conservative margin");
                    if self.init_margin < 0.8 {
                        self.init_margin = (4.0 * margin + 1.0) / 5.0;
                    }
                    margin = (margin + 1.0) / 2.0;
                    self.precision *= 10.0;
                }
                Some(err) => {
                    debug!("{err}, reducing interior point precision");
                    iterations += 2000;
                    self.init_iter += 10;
                    self.precision *= 10.0;
                }
            }
            last = Some(result);
        }

        let (mut x, status, multiplier) = match last {
            Some(result) => {
                let b = if qp.is_biased() {
                    result.y.first().copied().unwrap_or(0.0)
                } else {
                    0.0
                };
                (result.x, result.status, b)
            }
            None => (qp.start.clone(), IpStatus::IterationLimit, 0.0),
        };
        let mut threshold = multiplier;
        self.clip_to_bounds(qp, &mut x, threshold, epsilon_crit);

        let mut objective_after = qp.objective(&x);
        let mut outcome = if status.is_optimal() {
            QpOutcome::Optimal
        } else {
            QpOutcome::Degraded
        };
        let mut reduce_qp_size = false;

        if !objective_after.is_finite() || !threshold.is_finite() || x.iter().any(|v| !v.is_finite())
        {
            x = qp.start.clone();
            threshold = 0.0;
            objective_after = objective_before;
            outcome = QpOutcome::Reset;
            reduce_qp_size = true;
            self.resets += 1;
            let err = failure.take().unwrap_or_else(|| {
                SolverError::NumericalInstability("non-finite subproblem solution".to_string())
            });
            warn!("{err}; keeping previous alphas");
        }

        if objective_after >= objective_before {
            self.precision /= 100.0;
            self.precision_violations += 1;
            debug!("increasing interior point precision");
        }
        let mut relax_tolerance = false;
        if self.precision_violations > MAX_PRECISION_VIOLATIONS {
            relax_tolerance = true;
            self.precision_violations = 0;
            info!("relaxing epsilon on KKT conditions");
        }

        let tolerance = 1e-10 * (1.0 + objective_before.abs());
        match outcome {
            QpOutcome::Optimal => {
                if objective_after > objective_before + tolerance {
                    x = qp.start.clone();
                    objective_after = objective_before;
                }
            }
            QpOutcome::Degraded => {
                if let Some(err) = failure.filter(SolverError::is_recoverable) {
                    warn!("{err}; continuing with a feasible iterate");
                }
                self.degraded += 1;
                reduce_qp_size = true;
                let scale = 1.0 + qp.upper.iter().sum::<f64>();
                let acceptable = objective_after < objective_before
                    && qp.equality_residual(&x) <= 1e-8 * scale;
                if !acceptable {
                    x = qp.start.clone();
                    objective_after = objective_before;
                }
            }
            QpOutcome::Reset => {}
        }

        QpSolution {
            alpha: x,
            threshold,
            outcome,
            objective_before,
            objective_after,
            relax_tolerance,
            reduce_qp_size,
        }
    }

    /// Snap variables to their bounds when they sit within a slack derived
    /// from the worst KKT violation among interior variables
    fn clip_to_bounds(&self, qp: &QpProblem, x: &mut [f64], threshold: f64, epsilon_crit: f64) {
        let gx = qp.hessian_times(x);
        let mut epsilon_loqo = 1e-10;
        for i in 0..x.len() {
            let coef = qp.equality.get(i).copied().unwrap_or(0.0);
            let r = gx[i] + qp.linear[i] - threshold * coef;
            if x[i] < qp.upper[i] - epsilon_loqo && r < -epsilon_crit {
                epsilon_loqo = (qp.upper[i] - x[i]) * 2.0;
            } else if x[i] > epsilon_loqo && r > epsilon_crit {
                epsilon_loqo = x[i] * 2.0;
            }
        }
        for i in 0..x.len() {
            if x[i] <= epsilon_loqo {
                x[i] = qp.lower[i];
            } else if x[i] >= qp.upper[i] - epsilon_loqo {
                x[i] = qp.upper[i];
            }
        }
    }
}
