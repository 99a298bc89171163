//! Levenberg-Marquardt optimizer for non-linear least squares.
//!
//! Each iteration solves the damped normal equations
//!
//! ```text
//! (JᵀJ + λ·diag(JᵀJ)) δ = -Jᵀr
//! ```
//!
//! and accepts the step only if it lowers the cost, so the final cost never
//! exceeds the initial one.

use nalgebra::DVector;
use thiserror::Error;

use crate::cost::CostFunction;

/// Lower bound on the diagonal used for damping, keeps the system definite
/// when a parameter has no influence on the residuals.
const DIAG_FLOOR: f64 = 1e-12;

/// Lower bound for the damping factor.
const LAMBDA_MIN: f64 = 1e-12;

/// Errors that can occur during optimization.
#[derive(Debug, Error)]
pub enum OptimizerError {
    /// The parameter vector does not match the cost function.
    #[error("Dimension mismatch: expected {expected} parameters, got {actual}")]
    DimensionMismatch {
        /// Parameters declared by the cost function.
        expected: usize,
        /// Length of the supplied parameter vector.
        actual: usize,
    },

    /// The residual vector does not match the cost function.
    #[error("Residual mismatch: expected {expected} residuals, got {actual}")]
    ResidualMismatch {
        /// Residuals declared by the cost function.
        expected: usize,
        /// Length of the evaluated residual vector.
        actual: usize,
    },

    /// The cost function has no residuals.
    #[error("Cost function has no residuals")]
    EmptyProblem,

    /// The cost at the initial parameters is NaN or infinite.
    #[error("Initial cost is not finite: {0}")]
    NonFiniteCost(f64),
}

/// Reason why the optimizer terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// Infinity norm of the gradient fell below tolerance.
    GradientConverged,
    /// Step size relative to the parameters fell below tolerance.
    StepConverged,
    /// Cost fell below the absolute threshold or stopped decreasing.
    CostConverged,
    /// Maximum iterations reached.
    MaxIterations,
    /// Damping exceeded its maximum without finding a descent step.
    LambdaMaxExceeded,
}

impl TerminationReason {
    /// Whether the reason corresponds to a clean convergence.
    pub fn is_converged(&self) -> bool {
        matches!(
            self,
            Self::GradientConverged | Self::StepConverged | Self::CostConverged
        )
    }
}

/// Result of an optimization run.
#[derive(Debug, Clone)]
pub struct OptimizerResult {
    /// Cost at the initial parameters.
    pub initial_cost: f64,
    /// Cost at the returned parameters.
    pub final_cost: f64,
    /// Number of iterations performed.
    pub iterations: usize,
    /// Reason for termination.
    pub termination_reason: TerminationReason,
}

impl OptimizerResult {
    /// Whether the optimizer terminated on a convergence criterion.
    pub fn converged(&self) -> bool {
        self.termination_reason.is_converged()
    }
}

/// Levenberg-Marquardt optimizer configuration.
#[derive(Debug, Clone)]
pub struct LevenbergMarquardt {
    /// Initial damping factor, relative to the diagonal of `JᵀJ`.
    pub lambda_init: f64,
    /// Maximum damping factor before giving up.
    pub lambda_max: f64,
    /// Factor for lambda adaptation.
    pub lambda_factor: f64,
    /// Maximum number of iterations.
    pub max_iterations: usize,
    /// Convergence threshold on the relative cost decrease of an accepted step.
    pub cost_tolerance: f64,
    /// Absolute cost below which the problem is considered solved.
    pub cost_threshold: f64,
    /// Convergence threshold on the infinity norm of `Jᵀr`.
    pub gradient_tolerance: f64,
    /// Convergence threshold on `‖δ‖ / ‖x‖`.
    pub step_tolerance: f64,
}

impl Default for LevenbergMarquardt {
    fn default() -> Self {
        Self {
            lambda_init: 1e-3,
            lambda_max: 1e10,
            lambda_factor: 10.0,
            max_iterations: 100,
            cost_tolerance: 1e-12,
            cost_threshold: 1e-24,
            gradient_tolerance: 1e-16,
            step_tolerance: 1e-14,
        }
    }
}

impl LevenbergMarquardt {
    /// Create a new optimizer with default parameters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set maximum iterations.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Set the relative cost tolerance.
    pub fn with_cost_tolerance(mut self, tol: f64) -> Self {
        self.cost_tolerance = tol;
        self
    }

    /// Set the absolute cost threshold.
    pub fn with_cost_threshold(mut self, threshold: f64) -> Self {
        self.cost_threshold = threshold;
        self
    }

    /// Set the gradient tolerance.
    pub fn with_gradient_tolerance(mut self, tol: f64) -> Self {
        self.gradient_tolerance = tol;
        self
    }

    /// Set the relative step tolerance.
    pub fn with_step_tolerance(mut self, tol: f64) -> Self {
        self.step_tolerance = tol;
        self
    }

    /// Set the initial damping factor.
    pub fn with_initial_lambda(mut self, lambda: f64) -> Self {
        self.lambda_init = lambda;
        self
    }

    /// Minimize `cost` starting from `params`, writing the optimum back in place.
    ///
    /// # Errors
    ///
    /// Returns an error if the parameter or residual dimensions disagree with
    /// the cost function, or if the initial cost is not finite. Hitting the
    /// iteration limit is not an error; check [`OptimizerResult::converged`].
    pub fn minimize<C: CostFunction + ?Sized>(
        &self,
        cost: &C,
        params: &mut DVector<f64>,
    ) -> Result<OptimizerResult, OptimizerError> {
        let n = cost.num_parameters();
        if params.len() != n {
            return Err(OptimizerError::DimensionMismatch {
                expected: n,
                actual: params.len(),
            });
        }

        let m = cost.num_residuals();
        if m == 0 {
            return Err(OptimizerError::EmptyProblem);
        }

        let mut residuals = cost.residuals(params);
        if residuals.len() != m {
            return Err(OptimizerError::ResidualMismatch {
                expected: m,
                actual: residuals.len(),
            });
        }

        let initial_cost = residuals.norm_squared();
        if !initial_cost.is_finite() {
            return Err(OptimizerError::NonFiniteCost(initial_cost));
        }

        let mut current_cost = initial_cost;
        let mut lambda = self.lambda_init;
        let mut iterations = 0;

        let termination_reason = if current_cost <= self.cost_threshold {
            TerminationReason::CostConverged
        } else {
            loop {
                if iterations >= self.max_iterations {
                    break TerminationReason::MaxIterations;
                }
                iterations += 1;

                let jacobian = cost.jacobian(params);
                let jtj = jacobian.transpose() * &jacobian;
                let jtr = jacobian.transpose() * &residuals;

                if jtr.amax() <= self.gradient_tolerance {
                    break TerminationReason::GradientConverged;
                }

                let mut damped = jtj.clone();
                for i in 0..n {
                    damped[(i, i)] += lambda * jtj[(i, i)].max(DIAG_FLOOR);
                }

                let Some(cholesky) = damped.cholesky() else {
                    lambda *= self.lambda_factor;
                    if lambda > self.lambda_max {
                        break TerminationReason::LambdaMaxExceeded;
                    }
                    continue;
                };

                let delta = cholesky.solve(&(-jtr));
                if delta.norm() <= self.step_tolerance * (params.norm() + self.step_tolerance) {
                    break TerminationReason::StepConverged;
                }

                let candidate = &*params + &delta;
                let candidate_residuals = cost.residuals(&candidate);
                let candidate_cost = candidate_residuals.norm_squared();

                if candidate_cost.is_finite() && candidate_cost < current_cost {
                    let relative_decrease = (current_cost - candidate_cost) / current_cost;

                    *params = candidate;
                    residuals = candidate_residuals;
                    current_cost = candidate_cost;
                    lambda = (lambda / self.lambda_factor).max(LAMBDA_MIN);

                    if current_cost <= self.cost_threshold
                        || relative_decrease < self.cost_tolerance
                    {
                        break TerminationReason::CostConverged;
                    }
                } else {
                    lambda *= self.lambda_factor;
                    if lambda > self.lambda_max {
                        break TerminationReason::LambdaMaxExceeded;
                    }
                }
            }
        };

        log::debug!(
            "LM finished after {} iterations: cost {:e} -> {:e} ({:?})",
            iterations,
            initial_cost,
            current_cost,
            termination_reason
        );

        Ok(OptimizerResult {
            initial_cost,
            final_cost: current_cost,
            iterations,
            termination_reason,
        })
    }
}
