//! Cost function trait for non-linear least squares.
//!
//! A cost function maps a parameter vector `x ∈ Rⁿ` to a residual vector
//! `r(x) ∈ Rᵐ`. The minimizer works on the total cost `‖r(x)‖²`.

use nalgebra::{DMatrix, DVector};

/// Relative step used by the central-difference Jacobian.
const RELATIVE_STEP: f64 = 1e-6;

/// A residual function to be minimized in the least-squares sense.
///
/// Implementors only have to provide the residuals; the Jacobian defaults to
/// central differences. Override [`CostFunction::jacobian`] when an analytic
/// form is available.
pub trait CostFunction {
    /// Dimension of the parameter vector.
    fn num_parameters(&self) -> usize;

    /// Dimension of the residual vector.
    fn num_residuals(&self) -> usize;

    /// Evaluate the residual vector at `params`.
    fn residuals(&self, params: &DVector<f64>) -> DVector<f64>;

    /// Jacobian `∂r/∂x` with shape `(num_residuals, num_parameters)`.
    fn jacobian(&self, params: &DVector<f64>) -> DMatrix<f64> {
        numerical_jacobian(self, params)
    }

    /// Sum of squared residuals.
    fn cost(&self, params: &DVector<f64>) -> f64 {
        self.residuals(params).norm_squared()
    }
}

/// Compute the Jacobian of `cost` at `params` using central differences.
pub fn numerical_jacobian<C: CostFunction + ?Sized>(
    cost: &C,
    params: &DVector<f64>,
) -> DMatrix<f64> {
    let mut jacobian = DMatrix::<f64>::zeros(cost.num_residuals(), params.len());
    let mut x = params.clone();

    for k in 0..params.len() {
        let orig = x[k];
        let h = RELATIVE_STEP * orig.abs().max(1.0);

        x[k] = orig + h;
        let r_plus = cost.residuals(&x);
        x[k] = orig - h;
        let r_minus = cost.residuals(&x);
        x[k] = orig;

        jacobian.set_column(k, &((r_plus - r_minus) / (2.0 * h)));
    }

    jacobian
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    // r(x) = [x0^2 * x1, sin(x0) + x1^3]
    struct Poly;

    impl CostFunction for Poly {
        fn num_parameters(&self) -> usize {
            2
        }

        fn num_residuals(&self) -> usize {
            2
        }

        fn residuals(&self, x: &DVector<f64>) -> DVector<f64> {
            DVector::from_vec(vec![x[0] * x[0] * x[1], x[0].sin() + x[1].powi(3)])
        }
    }

    #[test]
    fn test_numerical_jacobian_matches_analytic() {
        let x = DVector::from_vec(vec![0.7, -1.3]);
        let j = Poly.jacobian(&x);

        assert_relative_eq!(j[(0, 0)], 2.0 * x[0] * x[1], epsilon = 1e-8);
        assert_relative_eq!(j[(0, 1)], x[0] * x[0], epsilon = 1e-8);
        assert_relative_eq!(j[(1, 0)], x[0].cos(), epsilon = 1e-8);
        assert_relative_eq!(j[(1, 1)], 3.0 * x[1] * x[1], epsilon = 1e-8);
    }

    #[test]
    fn test_cost_is_sum_of_squares() {
        let x = DVector::from_vec(vec![1.0, 2.0]);
        let r = Poly.residuals(&x);
        assert_relative_eq!(Poly.cost(&x), r[0] * r[0] + r[1] * r[1]);
    }
}
