use ndarray::Array2;
use rand::Rng;

use crate::*;

pub mod binomial;

/// Responsibilities with one row per component and one column per observation.
pub type Posterior = Array2<f64>;

pub trait MixtureModel {
    /// Snapshot of everything the fit estimates
    type Parameters: Clone + std::fmt::Debug + Send + Sync;

    /// Replaces the parameters by a random starting point
    fn initialize<R: Rng + ?Sized>( &mut self, rng: &mut R );

    /// E-step: responsibilities of the components for every observation
    fn posterior( &self, data: &Dataset ) -> Posterior;

    /// M-step: refits the parameters to the responsibilities
    fn fit( &mut self, data: &Dataset, posterior: &Posterior ) -> Result<()>;

    /// Calculates the log likelihood of the data under this model
    fn calc_loglik( &self, data: &Dataset ) -> f64;

    fn parameters( &self ) -> &Self::Parameters;

    /// Largest relative change of the component probabilities since the previous parameters
    fn calc_parameter_change( &self, previous: &Self::Parameters ) -> f64;
}

pub use binomial::{BinomialMixture, BinomialFormatter, Parameters};
