mod serialize; // serialization and pretty printing of the model

use ndarray::Array2;
use rand::Rng;
use rand::distributions::Distribution;
use rayon::prelude::*;
use serde::{Serialize, Deserialize};
use statrs::distribution::Normal;
use statrs::function::gamma::ln_gamma;

use super::*;

pub use serialize::BinomialFormatter;

/// Upper bound for every pairwise term of the closed form E-step.
/// A sum of bounded terms stays finite.
const RATIO_CEILING: f64 = 1e100;

/// Observations per work unit of the parallel reductions. Fixed so that sums are reproducible.
const CHUNK_SIZE: usize = 4096;

/// Tolerance on the sum of mixing weights handed in from outside.
const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

#[derive( Debug, Clone, PartialEq, Serialize, Deserialize )]
/// Mixing weights and success probabilities of a Binomial mixture.
pub struct Parameters {
    /// probability of drawing each component
    weights: Vec<f64>,
    /// success probability of each component
    thetas: Vec<f64>,
}

#[derive( Debug, Clone )]
/// Mixture of Binomial distributions over the same trial counts.
pub struct BinomialMixture {
    parameters: Parameters,
    floor: f64,
    method: PosteriorMethod,
}

// logs of the pairwise ratios between components, indexed [m][l]
struct PairRatios {
    weights: Vec<Vec<f64>>,
    successes: Vec<Vec<f64>>,
    failures: Vec<Vec<f64>>,
}

impl Parameters {

    pub fn new( weights: Vec<f64>, thetas: Vec<f64> ) -> Result<Parameters> {
	if weights.is_empty() {
	    return Err( Error::InvalidParameters( "at least one component is required".into() ));
	}
	if weights.len() != thetas.len() {
	    return Err( Error::InvalidParameters( format!( "{} weights for {} success probabilities", weights.len(), thetas.len() )));
	}
	if let Some( w ) = weights.iter().find( |w| !( **w >= 0.0 && **w <= 1.0 )) {
	    return Err( Error::InvalidParameters( format!( "mixing weight {w} outside [0, 1]" )));
	}
	let total: f64 = weights.iter().sum();
	if ( total - 1.0 ).abs() > WEIGHT_SUM_TOLERANCE {
	    return Err( Error::InvalidParameters( format!( "mixing weights sum to {total}" )));
	}
	if let Some( theta ) = thetas.iter().find( |t| !( **t > 0.0 && **t < 1.0 )) {
	    return Err( Error::InvalidParameters( format!( "success probability {theta} outside (0, 1)" )));
	}
	Ok( Parameters { weights, thetas } )
    }

    /// Draws a random starting point.
    /// Weights are K uniform draws from [floor, 1) normalized by their total, so they stay positive.
    /// Success probabilities are drawn around 1/2 and clamped strictly inside (floor, 1 - floor).
    pub fn random<R: Rng + ?Sized>( components: usize, floor: f64, rng: &mut R ) -> Parameters {
	let mut weights: Vec<f64> = ( 0 .. components ).map( |_| rng.gen_range( floor .. 1.0 )).collect();
	let total: f64 = weights.iter().sum();
	weights.iter_mut().for_each( |w| *w /= total );
	// make the sum exact
	let head: f64 = weights[ .. components - 1 ].iter().sum();
	weights[ components - 1 ] = 1.0 - head;

	let spread = Normal::new( 0.5, 0.25 ).expect( "constant parameters are valid" );
	let (low, high) = (( 2.0 * floor ).min( 0.5 ), ( 1.0 - 2.0 * floor ).max( 0.5 ));
	let thetas = ( 0 .. components )
	    .map( |_| spread.sample( rng ).clamp( low, high ))
	    .collect();
	Parameters { weights, thetas }
    }

    pub fn components( &self ) -> usize {
	self.weights.len()
    }

    pub fn weights( &self ) -> &[f64] {
	&self.weights
    }

    pub fn thetas( &self ) -> &[f64] {
	&self.thetas
    }

    pub fn weight( &self, component: usize ) -> f64 {
	self.weights[ component ]
    }

    pub fn theta( &self, component: usize ) -> f64 {
	self.thetas[ component ]
    }

    /// Reorders the components so that component i of the result is component order[i] of self.
    pub fn permuted( &self, order: &[usize] ) -> Result<Parameters> {
	let mut seen = vec!( false; self.components() );
	for index in order {
	    match seen.get_mut( *index ) {
		Some( flag ) if !*flag => *flag = true,
		_ => return Err( Error::InvalidParameters( format!( "{order:?} is not a permutation" ))),
	    }
	}
	if order.len() != self.components() {
	    return Err( Error::InvalidParameters( format!( "{order:?} is not a permutation" )));
	}
	Ok( Parameters {
	    weights: order.iter().map( |i| self.weights[ *i ] ).collect(),
	    thetas: order.iter().map( |i| self.thetas[ *i ] ).collect(),
	})
    }

    /// Largest change of a success probability relative to its previous value.
    pub fn max_relative_theta_change( &self, previous: &Parameters ) -> f64 {
	self.thetas.iter().zip( previous.thetas.iter() )
	    .map( |(now, before)| ( now - before ).abs() / before.abs() )
	    .fold( 0.0, f64::max )
    }
}

impl Loggable for Parameters {
    fn log( &self, message: &str, level: Level ) {
	let weights = &self.weights;
	let thetas = &self.thetas;
	match level {
	    Level::ERROR => error!( "{message}: weights {weights:?} thetas {thetas:?}" ),
	    Level::WARN => warn!( "{message}: weights {weights:?} thetas {thetas:?}" ),
	    Level::INFO => info!( "{message}: weights {weights:?} thetas {thetas:?}" ),
	    Level::DEBUG => debug!( "{message}: weights {weights:?} thetas {thetas:?}" ),
	    _ => trace!( "{message}: weights {weights:?} thetas {thetas:?}" ),
	}
    }
}

impl MixtureModel for BinomialMixture {
    type Parameters = Parameters;

    fn initialize<R: Rng + ?Sized>( &mut self, rng: &mut R ) {
	self.parameters = Parameters::random( self.parameters.components(), self.floor, rng );
    }

    fn posterior( &self, data: &Dataset ) -> Posterior {
	calc_posterior( data, &self.parameters, self.method )
    }

    fn fit( &mut self, data: &Dataset, posterior: &Posterior ) -> Result<()> {
	self.parameters = calc_update( data, posterior, self.floor )?;
	Ok( () )
    }

    fn calc_loglik( &self, data: &Dataset ) -> f64 {
	calc_loglik( data, &self.parameters )
    }

    fn parameters( &self ) -> &Parameters {
	&self.parameters
    }

    fn calc_parameter_change( &self, previous: &Parameters ) -> f64 {
	self.parameters.max_relative_theta_change( previous )
    }
}

impl BinomialMixture {

    /// Model with equal weights and success probabilities spread over (0, 1).
    /// Call initialize for a random starting point.
    pub fn new( config: &EmConfig ) -> BinomialMixture {
	let k = config.components.max( 1 );
	let parameters = Parameters {
	    weights: vec!( 1.0 / k as f64; k ),
	    thetas: ( 1 ..= k ).map( |m| m as f64 / ( k + 1 ) as f64 ).collect(),
	};
	BinomialMixture::from_parameters( parameters, config )
    }

    pub fn from_parameters( parameters: Parameters, config: &EmConfig ) -> BinomialMixture {
	BinomialMixture {
	    parameters,
	    floor: config.floor,
	    method: config.posterior_method,
	}
    }
}

/// Total log likelihood of the data under a Binomial mixture.
/// Each observation's weighted sum over components is reduced in the log domain after shifting by its largest term.
pub fn calc_loglik( data: &Dataset, parameters: &Parameters ) -> f64 {
    let log_weights: Vec<f64> = parameters.weights.iter().map( |w| ln( *w )).collect();
    let log_thetas: Vec<f64> = parameters.thetas.iter().map( |t| ln( *t )).collect();
    let log_complements: Vec<f64> = parameters.thetas.iter().map( |t| ln( 1.0 - *t )).collect();

    let chunk_sums: Vec<f64> = data.observations().par_chunks( CHUNK_SIZE )
	.map( |chunk| {
	    chunk.iter().map( |obs| {
		let terms = ( 0 .. parameters.components() ).map( |m| {
		    log_weights[ m ] + calc_log_kernel( obs, log_thetas[ m ], log_complements[ m ] )
		});
		calc_ln_binomial_coefficient( obs ) + log_sum_exp( terms )
	    }).sum::<f64>()
	}).collect();
    chunk_sums.iter().sum()
}

/// E-step. Returns a fresh matrix of responsibilities, components x observations.
pub fn calc_posterior( data: &Dataset, parameters: &Parameters, method: PosteriorMethod ) -> Posterior {
    let k = parameters.components();
    let responsibilities: Vec<f64> = match method {
	PosteriorMethod::RatioClamp => {
	    let ratios = PairRatios::new( parameters );
	    data.observations().par_iter()
		.flat_map_iter( |obs| calc_ratio_responsibilities( obs, parameters, &ratios ))
		.collect()
	},
	PosteriorMethod::LogSumExp => {
	    data.observations().par_iter()
		.flat_map_iter( |obs| calc_log_responsibilities( obs, parameters ))
		.collect()
	},
    };
    // rows of the buffer are observations
    Array2::from_shape_vec( (data.len(), k), responsibilities )
	.expect( "one responsibility per component and observation" )
	.reversed_axes()
}

/// M-step. Closed form maximum likelihood update of weights and success probabilities.
/// Fails if a component has no effective weight left.
pub fn calc_update( data: &Dataset, posterior: &Posterior, floor: f64 ) -> Result<Parameters> {
    let (k, s) = posterior.dim();
    if s != data.len() {
	return Err( Error::InvalidParameters( format!( "posterior covers {s} observations, data has {}", data.len() )));
    }

    // per component: [responsibility, weighted successes, weighted trials]
    let chunk_stats: Vec<Vec<[f64; 3]>> = data.observations().par_chunks( CHUNK_SIZE ).enumerate()
	.map( |(chunk, observations)| {
	    let mut stats = vec!( [0.0; 3]; k );
	    for (offset, obs) in observations.iter().enumerate() {
		let i = chunk * CHUNK_SIZE + offset;
		for (m, stat) in stats.iter_mut().enumerate() {
		    let r = posterior[ [m, i] ];
		    stat[ 0 ] += r;
		    stat[ 1 ] += r * obs.successes as f64;
		    stat[ 2 ] += r * obs.trials as f64;
		}
	    }
	    stats
	}).collect();

    let mut totals = vec!( [0.0; 3]; k );
    for stats in &chunk_stats {
	for (total, stat) in totals.iter_mut().zip( stats ) {
	    for j in 0 .. 3 {
		total[ j ] += stat[ j ];
	    }
	}
    }

    let mut weights = Vec::with_capacity( k );
    let mut thetas = Vec::with_capacity( k );
    for (component, [responsibility, successes, trials]) in totals.into_iter().enumerate() {
	if !( trials > 0.0 && trials.is_finite() && successes.is_finite() ) {
	    return Err( Error::DegenerateComponent { component } );
	}
	weights.push( responsibility / s as f64 );
	thetas.push( ( successes / trials ).clamp( floor, 1.0 - floor ));
    }
    Ok( Parameters { weights, thetas } )
}

impl PairRatios {
    fn new( parameters: &Parameters ) -> PairRatios {
	let ratio = |values: &[f64]| -> Vec<Vec<f64>> {
	    values.iter()
		.map( |denominator| values.iter().map( |numerator| ln( *numerator ) - ln( *denominator )).collect() )
		.collect()
	};
	let complements: Vec<f64> = parameters.thetas.iter().map( |t| 1.0 - t ).collect();
	PairRatios {
	    weights: ratio( &parameters.weights ),
	    successes: ratio( &parameters.thetas ),
	    failures: ratio( &complements ),
	}
    }
}

/// Responsibility of m is 1 / sum_l (w_l / w_m) (t_l / t_m)^n ((1 - t_l) / (1 - t_m))^(N - n).
/// The exponent of every term is summed in the log domain and bounded before exponentiation,
/// so a power that overflows can never meet one that underflows.
fn calc_ratio_responsibilities( obs: &Observation, parameters: &Parameters, ratios: &PairRatios ) -> Vec<f64> {
    let k = parameters.components();
    let ceiling = RATIO_CEILING.ln();

    let mut column: Vec<f64> = ( 0 .. k ).map( |m| {
	if !( parameters.weights[ m ] > 0.0 ) {
	    return 0.0;
	}
	let mut denominator = 1.0;
	for l in ( 0 .. k ).filter( |l| *l != m && parameters.weights[ *l ] > 0.0 ) {
	    let exponent = ratios.weights[ m ][ l ]
		+ calc_log_kernel( obs, ratios.successes[ m ][ l ], ratios.failures[ m ][ l ] );
	    denominator += exponent.min( ceiling ).exp();
	}
	1.0 / denominator
    }).collect();

    // absorb the error the ceiling introduces
    normalize( &mut column );
    column
}

fn calc_log_responsibilities( obs: &Observation, parameters: &Parameters ) -> Vec<f64> {
    let mut column: Vec<f64> = parameters.weights.iter().zip( parameters.thetas.iter() )
	.map( |(w, t)| ln( *w ) + calc_log_kernel( obs, ln( *t ), ln( 1.0 - *t )))
	.collect();
    let shift = column.iter().copied().fold( f64::NEG_INFINITY, f64::max );
    column.iter_mut().for_each( |x| *x = ( *x - shift ).exp() );
    normalize( &mut column );
    column
}

fn normalize( column: &mut [f64] ) {
    let total: f64 = column.iter().sum();
    column.iter_mut().for_each( |r| *r /= total );
}

/// Log of t^n (1 - t)^(N - n), with 0 * log(0) taken as 0
fn calc_log_kernel( obs: &Observation, log_theta: f64, log_complement: f64 ) -> f64 {
    let mut loglik = 0.0;
    loglik += if obs.successes > 0 { obs.successes as f64 * log_theta } else { 0.0 };
    loglik += if obs.failures() > 0 { obs.failures() as f64 * log_complement } else { 0.0 };
    loglik
}

fn calc_ln_binomial_coefficient( obs: &Observation ) -> f64 {
    let n = obs.trials as f64;
    let k = obs.successes as f64;
    ln_gamma( n + 1.0 ) - ln_gamma( k + 1.0 ) - ln_gamma( n - k + 1.0 )
}

/// ln of the sum of exp over the terms, shifted by the largest term
fn log_sum_exp<I: Iterator<Item = f64> + Clone>( terms: I ) -> f64 {
    let shift = terms.clone().fold( f64::NEG_INFINITY, f64::max );
    if shift == f64::NEG_INFINITY {
	return shift;
    }
    shift + terms.map( |x| ( x - shift ).exp() ).sum::<f64>().ln()
}

/// Natural log that maps 0.0 to negative infinity
fn ln( x: f64 ) -> f64 {
    if x > 0.0 { x.ln() } else { f64::NEG_INFINITY }
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn check_columns( posterior: &Posterior ) {
	for column in posterior.columns() {
	    assert!( column.iter().all( |r| r.is_finite() && *r >= 0.0 && *r <= 1.0 ), "bad column {column:?}" );
	    assert_approx!( column.sum(), 1.0, 1e-6 );
	}
    }

    fn both_methods() -> [PosteriorMethod; 2] {
	[PosteriorMethod::RatioClamp, PosteriorMethod::LogSumExp]
    }

    #[test]
    /// Random starting points are valid and reproducible
    fn test_initializer() {
	let floor = 1e-6;
	for seed in 0 .. 50 {
	    let mut rng = StdRng::seed_from_u64( seed );
	    let parameters = Parameters::random( 2, floor, &mut rng );
	    assert_approx!( parameters.weights().iter().sum::<f64>(), 1.0, 1e-15 );
	    assert!( parameters.weights().iter().all( |w| *w > 0.0 && *w < 1.0 ));
	    assert!( parameters.thetas().iter().all( |t| *t > floor && *t < 1.0 - floor ));
	    assert!( Parameters::new( parameters.weights().to_vec(), parameters.thetas().to_vec() ).is_ok() );
	}
	let first = Parameters::random( 3, floor, &mut StdRng::seed_from_u64( 11 ));
	let again = Parameters::random( 3, floor, &mut StdRng::seed_from_u64( 11 ));
	let other = Parameters::random( 3, floor, &mut StdRng::seed_from_u64( 12 ));
	assert_eq!( first, again );
	assert_ne!( first, other );

	// a wide floor catches most draws at the boundary
	let wide = 0.2;
	for seed in 0 .. 20 {
	    let parameters = Parameters::random( 4, wide, &mut StdRng::seed_from_u64( seed ));
	    assert!( parameters.thetas().iter().all( |t| *t > wide && *t < 1.0 - wide ), "{parameters:?}" );
	}
	let narrow = Parameters::random( 3, 0.4, &mut StdRng::seed_from_u64( 1 ));
	assert_eq!( narrow.thetas(), &[0.5, 0.5, 0.5] );
    }

    #[test]
    /// Parameters log themselves at every level
    fn test_log_parameters() {
	let parameters = Parameters::new( vec!( 0.5, 0.5 ), vec!( 0.1, 0.9 )).unwrap();
	for level in [Level::ERROR, Level::WARN, Level::INFO, Level::DEBUG, Level::TRACE] {
	    parameters.log( "test parameters", level );
	}
    }

    #[test]
    fn test_parameter_validation() {
	assert!( Parameters::new( vec!( 0.5, 0.5 ), vec!( 0.1, 0.9 )).is_ok() );
	assert!( Parameters::new( vec!( 0.5, 0.6 ), vec!( 0.1, 0.9 )).is_err() );
	assert!( Parameters::new( vec!( 0.5, 0.5 ), vec!( 0.0, 0.9 )).is_err() );
	assert!( Parameters::new( vec!( 0.5, 0.5 ), vec!( 0.1, 1.0 )).is_err() );
	assert!( Parameters::new( vec!( 1.0 ), vec!( 0.1, 0.2 )).is_err() );
	assert!( Parameters::new( vec!(), vec!() ).is_err() );
	let parameters = Parameters::new( vec!( 0.2, 0.3, 0.5 ), vec!( 0.1, 0.5, 0.9 )).unwrap();
	assert!( parameters.permuted( &[0, 0, 1] ).is_err() );
	assert!( parameters.permuted( &[0, 1] ).is_err() );
	let swapped = parameters.permuted( &[2, 0, 1] ).unwrap();
	assert_eq!( swapped.weights(), &[0.5, 0.2, 0.3] );
	assert_eq!( swapped.thetas(), &[0.9, 0.1, 0.5] );
    }

    #[test]
    /// Check the log likelihood against the Binomial probabilities written out
    fn test_loglik_small() {
	let data = Dataset::new( &[3, 2], &[1, 2] ).unwrap();
	let parameters = Parameters::new( vec!( 0.3, 0.7 ), vec!( 0.2, 0.6 )).unwrap();
	let first = 0.3 * 3.0 * 0.2 * 0.8 * 0.8 + 0.7 * 3.0 * 0.6 * 0.4 * 0.4;
	let second = 0.3 * 0.2 * 0.2 + 0.7 * 0.6 * 0.6;
	let expected = f64::ln( first ) + f64::ln( second );
	assert_approx!( calc_loglik( &data, &parameters ), expected, 1e-9 );
    }

    #[test]
    /// Reordering components does not change the likelihood
    fn test_loglik_permutation() {
	let data = Dataset::new( &[31, 31, 31, 5, 100], &[0, 21, 2, 5, 37] ).unwrap();
	let parameters = Parameters::new( vec!( 0.1, 0.3, 0.6 ), vec!( 0.7, 0.05, 0.4 )).unwrap();
	let expected = calc_loglik( &data, &parameters );
	for order in [[0, 2, 1], [1, 0, 2], [1, 2, 0], [2, 0, 1], [2, 1, 0]] {
	    let permuted = parameters.permuted( &order ).unwrap();
	    assert_approx!( calc_loglik( &data, &permuted ), expected, 1e-9 * expected.abs() );
	}
    }

    #[test]
    /// Huge trial counts and extreme probabilities keep the likelihood finite
    fn test_loglik_extreme() {
	let data = Dataset::new( &[10_000_000, 10_000_000, 1], &[5_000_000, 0, 1] ).unwrap();
	let parameters = Parameters::new( vec!( 0.999, 0.001 ), vec!( 1e-6, 1.0 - 1e-6 )).unwrap();
	let loglik = calc_loglik( &data, &parameters );
	assert!( loglik.is_finite() );
	assert!( loglik < -1e6 );
    }

    #[test]
    /// A component without weight drops out of the likelihood and the posterior
    fn test_zero_weight() {
	let data = Dataset::new( &[10, 10], &[1, 9] ).unwrap();
	let parameters = Parameters::new( vec!( 0.0, 1.0 ), vec!( 0.9, 0.1 )).unwrap();
	let single = Parameters::new( vec!( 1.0 ), vec!( 0.1 )).unwrap();
	assert_approx!( calc_loglik( &data, &parameters ), calc_loglik( &data, &single ), 1e-9 );
	for method in both_methods() {
	    let posterior = calc_posterior( &data, &parameters, method );
	    check_columns( &posterior );
	    assert!( posterior.row( 0 ).iter().all( |r| *r == 0.0 ));
	}
    }

    #[test]
    /// Responsibilities are the Bayes posterior of the components
    fn test_posterior_small() {
	let data = Dataset::new( &[3], &[1] ).unwrap();
	let parameters = Parameters::new( vec!( 0.3, 0.7 ), vec!( 0.2, 0.6 )).unwrap();
	let joint = [0.3 * 3.0 * 0.2 * 0.8 * 0.8, 0.7 * 3.0 * 0.6 * 0.4 * 0.4];
	for method in both_methods() {
	    let posterior = calc_posterior( &data, &parameters, method );
	    assert_eq!( posterior.dim(), (2, 1) );
	    assert_approx!( posterior[ [0, 0] ], joint[ 0 ] / ( joint[ 0 ] + joint[ 1 ] ), 1e-12 );
	    assert_approx!( posterior[ [1, 0] ], joint[ 1 ] / ( joint[ 0 ] + joint[ 1 ] ), 1e-12 );
	}
    }

    #[test]
    /// Columns sum to one for two and three components, including overflowing ratios
    fn test_posterior_columns() {
	let trials = [1, 31, 31, 31, 1_000_000, 1_000_000, 5_000];
	let successes = [0, 0, 21, 31, 0, 700_000, 4_000];
	let data = Dataset::new( &trials, &successes ).unwrap();
	let settings = vec!(
	    Parameters::new( vec!( 0.001, 0.999 ), vec!( 0.7, 0.01 )).unwrap(),
	    Parameters::new( vec!( 0.5, 0.5 ), vec!( 1e-6, 1.0 - 1e-6 )).unwrap(),
	    Parameters::new( vec!( 0.2, 0.3, 0.5 ), vec!( 0.01, 0.5, 0.99 )).unwrap(),
	    Parameters::new( vec!( 1e-300, 0.5, 0.5 - 1e-300 ), vec!( 0.3, 0.3, 0.8 )).unwrap(),
	);
	for parameters in &settings {
	    for method in both_methods() {
		let posterior = calc_posterior( &data, parameters, method );
		assert_eq!( posterior.dim(), (parameters.components(), data.len()) );
		check_columns( &posterior );
	    }
	}
    }

    #[test]
    /// The closed form matches the log domain posterior where powers overflow and underflow at once
    fn test_posterior_saturated() {
	let trials = [1, 31, 31, 31, 1_000, 1_000_000, 1_000_000, 5_000];
	let successes = [0, 0, 21, 31, 500, 0, 700_000, 4_000];
	let data = Dataset::new( &trials, &successes ).unwrap();
	let settings = vec!(
	    Parameters::new( vec!( 0.5, 0.5 ), vec!( 0.9, 0.001 )).unwrap(),
	    Parameters::new( vec!( 0.001, 0.999 ), vec!( 0.7, 0.01 )).unwrap(),
	    Parameters::new( vec!( 0.5, 0.5 ), vec!( 1e-6, 1.0 - 1e-6 )).unwrap(),
	    Parameters::new( vec!( 0.2, 0.3, 0.5 ), vec!( 0.01, 0.5, 0.99 )).unwrap(),
	    Parameters::new( vec!( 1e-300, 0.5, 0.5 - 1e-300 ), vec!( 0.3, 0.3, 0.8 )).unwrap(),
	);
	for parameters in &settings {
	    let ratio = calc_posterior( &data, parameters, PosteriorMethod::RatioClamp );
	    let log = calc_posterior( &data, parameters, PosteriorMethod::LogSumExp );
	    for (a, b) in ratio.iter().zip( log.iter() ) {
		assert_approx!( *a, *b, 1e-9 );
	    }
	}

	// 500 of 1000 is hopeless under theta 0.001
	let ratio = calc_posterior( &data, &settings[ 0 ], PosteriorMethod::RatioClamp );
	assert_approx!( ratio[ [0, 4] ], 1.0, 1e-12 );
	assert_approx!( ratio[ [1, 4] ], 0.0, 1e-12 );
    }

    #[test]
    /// Only failures must not produce NaN
    fn test_posterior_all_zero() {
	let data = Dataset::new( &[31; 100], &[0; 100] ).unwrap();
	let parameters = Parameters::new( vec!( 0.4, 0.6 ), vec!( 0.999999, 0.000001 )).unwrap();
	for method in both_methods() {
	    let posterior = calc_posterior( &data, &parameters, method );
	    check_columns( &posterior );
	    assert_approx!( posterior[ [1, 0] ], 1.0, 1e-9 );
	}
	assert!( calc_loglik( &data, &parameters ).is_finite() );
    }

    #[test]
    /// Single trials are the Bernoulli case
    fn test_bernoulli() {
	let data = Dataset::new( &[1, 1, 1], &[0, 1, 1] ).unwrap();
	let parameters = Parameters::new( vec!( 0.5, 0.5 ), vec!( 1e-6, 1.0 - 1e-6 )).unwrap();
	let loglik = calc_loglik( &data, &parameters );
	assert!( loglik.is_finite() );
	assert_approx!( loglik, 3.0 * f64::ln( 0.5 ), 1e-5 );
	for method in both_methods() {
	    let posterior = calc_posterior( &data, &parameters, method );
	    check_columns( &posterior );
	    assert_approx!( posterior[ [0, 0] ], 1.0, 1e-5 );
	    assert_approx!( posterior[ [1, 2] ], 1.0, 1e-5 );
	}
    }

    #[test]
    fn test_posterior_idempotent() {
	let data = Dataset::new( &[31, 31, 31, 500], &[0, 3, 25, 250] ).unwrap();
	let parameters = Parameters::new( vec!( 0.1, 0.9 ), vec!( 0.6, 0.05 )).unwrap();
	for method in both_methods() {
	    assert_eq!( calc_posterior( &data, &parameters, method ), calc_posterior( &data, &parameters, method ));
	}
    }

    #[test]
    /// Both E-step formulations agree where neither needs clamping
    fn test_methods_agree() {
	let mut rng = StdRng::seed_from_u64( 3 );
	let sampler = data::MixtureSampler::error_model( 0.3, 0.6, 0.2, 40 ).unwrap();
	let data = sampler.sample( 2000, &mut rng ).unwrap();
	let parameters = Parameters::new( vec!( 0.25, 0.75 ), vec!( 0.55, 0.25 )).unwrap();
	let ratio = calc_posterior( &data, &parameters, PosteriorMethod::RatioClamp );
	let log = calc_posterior( &data, &parameters, PosteriorMethod::LogSumExp );
	for (a, b) in ratio.iter().zip( log.iter() ) {
	    assert_approx!( *a, *b, 1e-9 );
	}
    }

    #[test]
    /// Check the closed form update
    fn test_update() {
	let data = Dataset::new( &[10, 10, 20], &[2, 8, 10] ).unwrap();
	let posterior = Array2::from_shape_vec( (2, 3), vec!( 1.0, 0.0, 0.5, 0.0, 1.0, 0.5 )).unwrap();
	let parameters = calc_update( &data, &posterior, 1e-6 ).unwrap();
	assert_approx!( parameters.weight( 0 ), 0.5, 1e-12 );
	assert_approx!( parameters.weight( 1 ), 0.5, 1e-12 );
	assert_approx!( parameters.theta( 0 ), 0.35, 1e-12 );
	assert_approx!( parameters.theta( 1 ), 0.65, 1e-12 );
    }

    #[test]
    /// A component without responsibility is reported instead of producing NaN
    fn test_update_degenerate() {
	let data = Dataset::new( &[10, 10], &[2, 8] ).unwrap();
	let posterior = Array2::from_shape_vec( (2, 2), vec!( 1.0, 1.0, 0.0, 0.0 )).unwrap();
	match calc_update( &data, &posterior, 1e-6 ) {
	    Err( Error::DegenerateComponent { component } ) => assert_eq!( component, 1 ),
	    other => panic!( "expected degenerate component, got {other:?}" ),
	}
	let wrong_shape = Array2::from_elem( (2, 3), 0.5 );
	assert!( matches!( calc_update( &data, &wrong_shape, 1e-6 ), Err( Error::InvalidParameters( _ ))));
    }

    #[test]
    /// Success probabilities collapsing to zero are held at the floor
    fn test_update_clamps() {
	let data = Dataset::new( &[31; 10], &[0; 10] ).unwrap();
	let posterior = Array2::from_elem( (2, 10), 0.5 );
	let parameters = calc_update( &data, &posterior, 1e-6 ).unwrap();
	assert_eq!( parameters.thetas(), &[1e-6, 1e-6] );
	assert!( calc_loglik( &data, &parameters ).is_finite() );
    }

    #[test]
    /// The trait drives the same functions with the configured method and floor
    fn test_model_trait() {
	let config = EmConfig::new().with_posterior_method( PosteriorMethod::LogSumExp );
	let data = Dataset::new( &[10, 10, 20], &[2, 8, 10] ).unwrap();
	let mut model = BinomialMixture::new( &config );
	assert_eq!( model.parameters().thetas(), &[1.0 / 3.0, 2.0 / 3.0] );

	model.initialize( &mut StdRng::seed_from_u64( 5 ));
	let before = model.parameters().clone();
	let posterior = model.posterior( &data );
	assert_eq!( posterior, calc_posterior( &data, &before, PosteriorMethod::LogSumExp ));
	model.fit( &data, &posterior ).unwrap();
	assert!( model.calc_parameter_change( &before ) > 0.0 );
	assert_approx!( model.calc_loglik( &data ), calc_loglik( &data, model.parameters() ), 1e-12 );
    }
}
