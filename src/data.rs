use serde::{Serialize, Deserialize};

use crate::*;

pub mod simulate;

pub use simulate::MixtureSampler;

pub type Count = u64;

/// Number of successes out of a number of trials.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize )]
pub struct Observation {
    pub trials: Count,
    pub successes: Count,
}

/// Validated sequence of observations with optional ground truth labels.
/// Labels travel with the data for evaluation but are never read by the fit.
#[derive( Debug, Clone )]
pub struct Dataset {
    observations: Vec<Observation>,
    labels: Option<Vec<bool>>,
}

impl Observation {
    pub fn new( trials: Count, successes: Count ) -> Observation {
	Observation { trials, successes }
    }

    pub fn failures( &self ) -> Count {
	self.trials - self.successes
    }

    fn is_valid( &self ) -> bool {
	self.trials > 0 && self.successes <= self.trials
    }
}

impl Dataset {
    /// Pairs up parallel sequences of trial and success counts.
    pub fn new( trials: &[Count], successes: &[Count] ) -> Result<Dataset> {
	if trials.len() != successes.len() {
	    return Err( Error::LengthMismatch { trials: trials.len(), successes: successes.len() } );
	}
	let observations = trials.iter().zip( successes.iter() )
	    .map( |(n_trials, n_successes)| Observation::new( *n_trials, *n_successes ))
	    .collect();
	Dataset::from_observations( observations )
    }

    pub fn from_observations( observations: Vec<Observation> ) -> Result<Dataset> {
	if observations.is_empty() {
	    return Err( Error::EmptyDataset );
	}
	if let Some( (index, invalid) ) = observations.iter().enumerate().find( |(_, obs)| !obs.is_valid() ) {
	    return Err( Error::InvalidObservation { index, trials: invalid.trials, successes: invalid.successes } );
	}
	Ok( Dataset { observations, labels: None } )
    }

    /// Attaches ground truth labels, one per observation.
    pub fn with_labels( mut self, labels: Vec<bool> ) -> Result<Dataset> {
	if labels.len() != self.observations.len() {
	    return Err( Error::LabelMismatch { observations: self.observations.len(), labels: labels.len() } );
	}
	self.labels = Some( labels );
	Ok( self )
    }

    pub fn len( &self ) -> usize {
	self.observations.len()
    }

    pub fn is_empty( &self ) -> bool {
	self.observations.is_empty()
    }

    pub fn observations( &self ) -> &[Observation] {
	&self.observations
    }

    pub fn labels( &self ) -> Option<&[bool]> {
	self.labels.as_deref()
    }

    pub fn total_trials( &self ) -> Count {
	self.observations.iter().map( |obs| obs.trials ).sum()
    }

    pub fn total_successes( &self ) -> Count {
	self.observations.iter().map( |obs| obs.successes ).sum()
    }
}
