
// shared by the unit tests of every module
#[cfg(test)]
macro_rules! assert_approx {
    ($real:expr, $expected:expr, $delta:expr) => {
	if !( $real >= $expected - $delta && $real <= $expected + $delta ) {
	    panic!( "Violate {:.6} == {:.6} (+-{:.6})", $real, $expected, $delta );
	}
    }
}

pub mod config;
pub mod data;
pub mod error;
pub mod evaluate;
pub mod fitter;
pub mod io;
pub mod model;

use tracing::*;

pub use config::{EmConfig, PosteriorMethod, StoppingPolicy};
pub use data::{Count, Dataset, Observation};
pub use error::{Error, Result};
pub use fitter::{EmFitter, FitResult, RestartReport, Solution, StopReason};
pub use model::{BinomialMixture, MixtureModel, Parameters, Posterior};

/// Objects that can be recorded in the log
pub trait Loggable {
    fn log( &self, message: &str, level: tracing::Level );
}

/// Fits a Binomial mixture to the data with EM and returns the best solution over all restarts.
pub fn fit( data: &Dataset, config: &EmConfig ) -> Result<FitResult> {
    EmFitter::new( config.clone() )?.fit( data )
}

/// Total log likelihood of the data under the given parameters.
pub fn log_likelihood( data: &Dataset, parameters: &Parameters ) -> f64 {
    model::binomial::calc_loglik( data, parameters )
}

/// Posterior responsibilities (components x observations) of the given parameters.
pub fn posterior( data: &Dataset, parameters: &Parameters ) -> Posterior {
    model::binomial::calc_posterior( data, parameters, PosteriorMethod::default() )
}
