use rand::Rng;
use rand::distributions::{Distribution, WeightedIndex};
use statrs::distribution::Binomial;

use crate::*;

/// Draws labelled datasets from a known Binomial mixture.
/// An observation is labelled true if it was drawn from the flagged component.
pub struct MixtureSampler {
    parameters: Parameters,
    trials: Count,
    flagged: usize,
}

impl MixtureSampler {
    pub fn new( parameters: Parameters, trials: Count, flagged: usize ) -> Result<MixtureSampler> {
	if trials == 0 {
	    return Err( Error::InvalidParameters( "observations need at least one trial".into() ));
	}
	if flagged >= parameters.components() {
	    return Err( Error::InvalidParameters( format!( "no component {flagged} to flag" )));
	}
	Ok( MixtureSampler { parameters, trials, flagged } )
    }

    /// Two components where component 0 is the flagged "error" component.
    pub fn error_model( error_weight: f64, error_theta: f64, correct_theta: f64, trials: Count ) -> Result<MixtureSampler> {
	let parameters = Parameters::new( vec!( error_weight, 1.0 - error_weight ), vec!( error_theta, correct_theta ))?;
	MixtureSampler::new( parameters, trials, 0 )
    }

    pub fn sample<R: Rng + ?Sized>( &self, size: usize, rng: &mut R ) -> Result<Dataset> {
	let chooser = WeightedIndex::new( self.parameters.weights() )
	    .map_err( |err| Error::InvalidParameters( err.to_string() ))?;
	let generators = self.parameters.thetas().iter()
	    .map( |theta| Binomial::new( *theta, self.trials ))
	    .collect::<std::result::Result<Vec<Binomial>, _>>()
	    .map_err( |err| Error::InvalidParameters( err.to_string() ))?;

	let mut observations = Vec::with_capacity( size );
	let mut labels = Vec::with_capacity( size );
	for _ in 0 .. size {
	    let component = chooser.sample( rng );
	    let successes = generators[ component ].sample( rng ) as Count;
	    observations.push( Observation::new( self.trials, successes ));
	    labels.push( component == self.flagged );
	}
	trace!( "sampled {size} observations with {} flagged", labels.iter().filter( |l| **l ).count() );
	Dataset::from_observations( observations )?.with_labels( labels )
    }
}
