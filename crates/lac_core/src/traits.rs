use num_traits::Num;
use std::fmt::Debug;

/// A trait for types the reaction network can be evaluated over.
/// Plain `f64` drives the integrator; `Dual` drives Jacobian assembly.
/// Rate constants are lifted into the scalar type through `From<f64>`.
pub trait Scalar: Num + Copy + From<f64> + Debug + 'static {}

impl<T: Num + Copy + From<f64> + Debug + 'static> Scalar for T {}

/// Represents an autonomous or time-dependent flow `dx/dt = f(t, x)`.
pub trait DynamicalSystem<T: Scalar> {
    /// Returns the dimension of the state space.
    fn dimension(&self) -> usize;

    /// Evaluates the vector field.
    /// t: current time
    /// x: current state
    /// out: buffer to write dx/dt into
    fn apply(&self, t: T, x: &[T], out: &mut [T]);
}
