use std::time::Instant;

use rand::{Rng, SeedableRng, thread_rng};
use rand::rngs::StdRng;
use rayon::prelude::*;
use serde::Serialize;

use crate::*;

/// Why a restart stopped iterating
#[derive( Debug, Clone, Copy, PartialEq, Eq, Serialize )]
pub enum StopReason {
    /// the change-based criteria were met
    Converged,
    /// max_steps ran out first
    StepLimit,
    TimeLimit,
    /// the M-step lost a component
    Degenerate,
}

/// Best record: likelihood, parameters and the posterior of exactly these parameters.
#[derive( Debug, Clone, Serialize )]
pub struct Solution<P = Parameters> {
    pub loglik: f64,
    pub parameters: P,
    #[serde( skip )]
    pub posterior: Posterior,
}

/// Diagnostics of a single restart.
#[derive( Debug, Clone, Serialize )]
pub struct RestartReport<P = Parameters> {
    pub restart: usize,
    pub seed: u64,
    pub iterations: usize,
    pub stop_reason: StopReason,
    /// log likelihood after every iteration
    pub loglik_trace: Vec<f64>,
    /// log likelihood of last_parameters
    pub final_loglik: f64,
    /// parameters the restart ended with, best or not
    pub last_parameters: P,
}

#[derive( Debug, Clone, Serialize )]
pub struct FitResult<P = Parameters> {
    pub best: Solution<P>,
    /// raw parameters of the last restart
    pub last_parameters: P,
    pub restarts: Vec<RestartReport<P>>,
}

/// Runs EM from several random starting points and keeps the most likely solution.
pub struct EmFitter {
    config: EmConfig,
}

/// Highest likelihood seen so far together with the model that produced it.
struct BestRecord<M> {
    loglik: f64,
    model: Option<M>,
}

struct RestartOutcome<M: MixtureModel> {
    report: RestartReport<M::Parameters>,
    best: BestRecord<M>,
}

impl <P> FitResult<P> {
    pub fn posterior( &self ) -> &Posterior {
	&self.best.posterior
    }

    pub fn parameters( &self ) -> &P {
	&self.best.parameters
    }

    pub fn loglik( &self ) -> f64 {
	self.best.loglik
    }
}

impl <M: MixtureModel + Clone> BestRecord<M> {
    fn new() -> BestRecord<M> {
	BestRecord { loglik: f64::NEG_INFINITY, model: None }
    }

    /// Snapshots the model if its likelihood is strictly better
    fn offer( &mut self, loglik: f64, model: &M ) {
	if loglik > self.loglik {
	    self.loglik = loglik;
	    self.model = Some( model.clone() );
	}
    }

    /// Keeps the higher of both records, self on ties
    fn merge( self, other: BestRecord<M> ) -> BestRecord<M> {
	if other.model.is_some() && other.loglik > self.loglik { other } else { self }
    }
}

impl EmFitter {
    pub fn new( config: EmConfig ) -> Result<EmFitter> {
	config.validate()?;
	Ok( EmFitter { config } )
    }

    pub fn config( &self ) -> &EmConfig {
	&self.config
    }

    /// Fits a Binomial mixture with the configured number of components.
    pub fn fit( &self, data: &Dataset ) -> Result<FitResult> {
	let template = BinomialMixture::new( &self.config );
	self.fit_model( data, &template )
    }

    /// Fits copies of the template model, each from its own random starting point.
    pub fn fit_model<M>( &self, data: &Dataset, template: &M ) -> Result<FitResult<M::Parameters>> where
	M: MixtureModel + Clone + Send + Sync,
	M::Parameters: Loggable,
    {
	let base_seed = self.config.seed.unwrap_or_else( || thread_rng().gen() );
	info!( "fitting {} observations with {} restarts (base seed {base_seed})", data.len(), self.config.restarts );

	let run = |restart: usize| {
	    let seed = base_seed.wrapping_add( restart as u64 );
	    let mut rng = StdRng::seed_from_u64( seed );
	    let mut model = template.clone();
	    model.initialize( &mut rng );
	    self.run_restart( data, model, restart, seed )
	};
	let outcomes: Vec<RestartOutcome<M>> = if self.config.parallel_restarts {
	    ( 0 .. self.config.restarts ).into_par_iter().map( run ).collect()
	} else {
	    ( 0 .. self.config.restarts ).map( run ).collect()
	};
	self.collect_best( data, outcomes )
    }

    /// Iterates EM on one starting point until it settles, runs out of steps or degenerates.
    fn run_restart<M>( &self, data: &Dataset, mut model: M, restart: usize, seed: u64 ) -> RestartOutcome<M> where
	M: MixtureModel + Clone,
	M::Parameters: Loggable,
    {
	let restart_span = info_span!( "restart", number = restart );
	let _entered = restart_span.enter();
	model.parameters().log( "initial parameters", Level::DEBUG );

	let start = Instant::now();
	let mut best = BestRecord::new();
	let mut loglik_trace = Vec::new();
	let mut last_loglik = f64::NEG_INFINITY;
	let mut iterations = 0;

	let stop_reason = loop {
	    iterations += 1;
	    let _iteration = debug_span!( "iteration", number = iterations ).entered();

	    let previous = model.parameters().clone();
	    let posterior = model.posterior( data );
	    if let Err( err ) = model.fit( data, &posterior ) {
		warn!( "abandoning restart {restart}: {err}" );
		break StopReason::Degenerate;
	    }
	    let loglik = model.calc_loglik( data );
	    if !loglik.is_finite() {
		warn!( "abandoning restart {restart}: log likelihood {loglik}" );
		break StopReason::Degenerate;
	    }

	    let loglik_change = calc_relative_change( last_loglik, loglik );
	    let theta_change = model.calc_parameter_change( &previous );
	    debug!( "Likelihood changed from {last_loglik:.3} to {loglik:.3} (theta change {theta_change:.3e})" );

	    loglik_trace.push( loglik );
	    best.offer( loglik, &model );
	    last_loglik = loglik;

	    if self.config.is_settled( loglik_change, theta_change ) {
		info!( "converged after {iterations} iterations at {loglik:.3}" );
		break StopReason::Converged;
	    }
	    if !self.config.should_continue( loglik_change, theta_change, iterations ) {
		info!( "step limit of {} reached before convergence at {loglik:.3}", self.config.max_steps );
		break StopReason::StepLimit;
	    }
	    if let Some( limit ) = self.config.time_limit {
		if start.elapsed() >= limit {
		    info!( "time limit of {limit:?} reached after {iterations} iterations at {loglik:.3}" );
		    break StopReason::TimeLimit;
		}
	    }
	};

	// a failed M-step leaves parameters that were never evaluated
	let final_loglik = match stop_reason {
	    StopReason::Degenerate => model.calc_loglik( data ),
	    _ => last_loglik,
	};
	let report = RestartReport {
	    restart,
	    seed,
	    iterations,
	    stop_reason,
	    loglik_trace,
	    final_loglik,
	    last_parameters: model.parameters().clone(),
	};
	RestartOutcome { report, best }
    }

    /// Reduces the restarts to the single best record. Fails if no restart finished without instability.
    fn collect_best<M>( &self, data: &Dataset, outcomes: Vec<RestartOutcome<M>> ) -> Result<FitResult<M::Parameters>> where
	M: MixtureModel + Clone,
	M::Parameters: Loggable,
    {
	let restarts = outcomes.len();
	if outcomes.iter().all( |outcome| outcome.report.stop_reason == StopReason::Degenerate ) {
	    error!( "all {restarts} restarts degenerated" );
	    return Err( Error::AllRestartsDegenerate { restarts } );
	}

	let mut best = BestRecord::new();
	let mut reports = Vec::with_capacity( restarts );
	for outcome in outcomes {
	    best = best.merge( outcome.best );
	    reports.push( outcome.report );
	}
	let loglik = best.loglik;
	let model = best.model.ok_or( Error::AllRestartsDegenerate { restarts } )?;
	let last_parameters = reports.last().map( |report| report.last_parameters.clone() )
	    .unwrap_or_else( || model.parameters().clone() );

	model.parameters().log( &format!( "best log likelihood {loglik:.3}" ), Level::INFO );
	let best = Solution {
	    loglik,
	    parameters: model.parameters().clone(),
	    posterior: model.posterior( data ),
	};
	Ok( FitResult { best, last_parameters, restarts: reports } )
    }
}

/// Change relative to the previous value; infinite when there was none.
fn calc_relative_change( previous: f64, current: f64 ) -> f64 {
    if !previous.is_finite() {
	f64::INFINITY
    } else if previous == 0.0 {
	current.abs()
    } else {
	( current - previous ).abs() / previous.abs()
    }
}
