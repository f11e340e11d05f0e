use std::time::Duration;

use serde::{Serialize, Deserialize};

use crate::*;

/// Decides when the change-based stopping criteria are met.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize )]
pub enum StoppingPolicy {
    /// Keep iterating while the likelihood or any success probability still moves.
    #[default]
    AllSettled,
    /// Stop as soon as either the likelihood or the success probabilities settle.
    AnySettled,
}

/// Formulation of the E-step.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize )]
pub enum PosteriorMethod {
    /// Closed form over ratios of success probabilities, each pairwise term bounded in the log domain.
    #[default]
    RatioClamp,
    /// Log-domain responsibilities normalized with a per-observation maximum shift.
    LogSumExp,
}

#[derive( Debug, Clone, Serialize, Deserialize )]
pub struct EmConfig {
    /// number of latent components K
    pub components: usize,
    /// number of random initializations
    pub restarts: usize,
    /// relative log likelihood change below which the likelihood counts as settled
    pub loglik_tolerance: f64,
    /// relative change of every success probability below which they count as settled
    pub theta_tolerance: f64,
    /// maximal number of EM iterations per restart
    pub max_steps: usize,
    /// keeps initial and fitted probabilities inside [floor, 1 - floor]
    pub floor: f64,
    pub stopping: StoppingPolicy,
    pub posterior_method: PosteriorMethod,
    /// Base seed; restart i uses seed + i. Draws from entropy if unset.
    pub seed: Option<u64>,
    /// Wall clock limit per restart, checked between iterations.
    pub time_limit: Option<Duration>,
    pub parallel_restarts: bool,
}

impl Default for EmConfig {
    fn default() -> Self {
	EmConfig {
	    components: 2,
	    restarts: 5,
	    loglik_tolerance: 0.01,
	    theta_tolerance: 0.01,
	    max_steps: 10,
	    floor: 1e-6,
	    stopping: StoppingPolicy::default(),
	    posterior_method: PosteriorMethod::default(),
	    seed: None,
	    time_limit: None,
	    parallel_restarts: true,
	}
    }
}

impl EmConfig {
    pub fn new() -> EmConfig {
	EmConfig::default()
    }

    pub fn with_components( mut self, components: usize ) -> Self { self.components = components; self }
    pub fn with_restarts( mut self, restarts: usize ) -> Self { self.restarts = restarts; self }
    pub fn with_max_steps( mut self, max_steps: usize ) -> Self { self.max_steps = max_steps; self }
    pub fn with_floor( mut self, floor: f64 ) -> Self { self.floor = floor; self }
    pub fn with_stopping( mut self, stopping: StoppingPolicy ) -> Self { self.stopping = stopping; self }
    pub fn with_posterior_method( mut self, method: PosteriorMethod ) -> Self { self.posterior_method = method; self }
    pub fn with_seed( mut self, seed: u64 ) -> Self { self.seed = Some( seed ); self }
    pub fn with_time_limit( mut self, limit: Duration ) -> Self { self.time_limit = Some( limit ); self }
    pub fn with_parallel_restarts( mut self, parallel: bool ) -> Self { self.parallel_restarts = parallel; self }

    pub fn with_tolerances( mut self, loglik_tolerance: f64, theta_tolerance: f64 ) -> Self {
	self.loglik_tolerance = loglik_tolerance;
	self.theta_tolerance = theta_tolerance;
	self
    }

    /// Checks that the configuration describes a runnable fit.
    pub fn validate( &self ) -> Result<()> {
	if self.components == 0 {
	    return Err( Error::InvalidConfig( "at least one component is required".into() ));
	}
	if self.restarts == 0 {
	    return Err( Error::InvalidConfig( "at least one restart is required".into() ));
	}
	if self.max_steps == 0 {
	    return Err( Error::InvalidConfig( "max_steps must be positive".into() ));
	}
	for (name, tolerance) in [("loglik_tolerance", self.loglik_tolerance), ("theta_tolerance", self.theta_tolerance)] {
	    if !( tolerance.is_finite() && tolerance > 0.0 ) {
		return Err( Error::InvalidConfig( format!( "{name} must be positive and finite, got {tolerance}" )));
	    }
	}
	if !( self.floor > 0.0 && self.floor < 0.5 ) {
	    return Err( Error::InvalidConfig( format!( "floor must lie in (0, 0.5), got {}", self.floor )));
	}
	Ok( () )
    }

    /// Whether the latest relative changes count as converged under the stopping policy.
    pub fn is_settled( &self, loglik_change: f64, theta_change: f64 ) -> bool {
	let loglik_moving = loglik_change > self.loglik_tolerance;
	let theta_moving = theta_change > self.theta_tolerance;
	match self.stopping {
	    StoppingPolicy::AllSettled => !( loglik_moving || theta_moving ),
	    StoppingPolicy::AnySettled => !( loglik_moving && theta_moving ),
	}
    }

    /// Whether another iteration is due given the latest relative changes and the iterations done so far.
    pub fn should_continue( &self, loglik_change: f64, theta_change: f64, iterations: usize ) -> bool {
	iterations < self.max_steps && !self.is_settled( loglik_change, theta_change )
    }
}
