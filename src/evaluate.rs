use serde::Serialize;

use crate::*;

/// Counts of a binary classification against ground truth.
#[derive( Debug, Clone, Copy, Default, PartialEq, Eq, Serialize )]
pub struct Confusion {
    pub true_positives: usize,
    pub false_positives: usize,
    pub true_negatives: usize,
    pub false_negatives: usize,
}

/// The component with the highest success probability, conventionally the error component.
pub fn anomalous_component( parameters: &Parameters ) -> usize {
    ( 0 .. parameters.components() )
	.max_by( |left, right| parameters.theta( *left ).total_cmp( &parameters.theta( *right )))
	.unwrap_or( 0 )
}

/// Flags every observation whose responsibility of component exceeds threshold.
pub fn hard_assign( posterior: &Posterior, component: usize, threshold: f64 ) -> Vec<bool> {
    posterior.row( component ).iter().map( |r| *r > threshold ).collect()
}

/// Expected share of observations generated by component.
pub fn estimated_error_rate( posterior: &Posterior, component: usize ) -> f64 {
    posterior.row( component ).mean().unwrap_or( 0.0 )
}

impl Confusion {
    pub fn tally( predicted: &[bool], truth: &[bool] ) -> Result<Confusion> {
	if predicted.len() != truth.len() {
	    return Err( Error::LabelMismatch { observations: predicted.len(), labels: truth.len() } );
	}
	let mut confusion = Confusion::default();
	for (guess, actual) in predicted.iter().zip( truth ) {
	    match (guess, actual) {
		(true, true) => confusion.true_positives += 1,
		(true, false) => confusion.false_positives += 1,
		(false, false) => confusion.true_negatives += 1,
		(false, true) => confusion.false_negatives += 1,
	    }
	}
	Ok( confusion )
    }

    /// Share of flagged observations that are positive; 0 if nothing was flagged
    pub fn precision( &self ) -> f64 {
	ratio( self.true_positives, self.true_positives + self.false_positives )
    }

    /// Share of positive observations that were flagged; 0 if there are none
    pub fn recall( &self ) -> f64 {
	ratio( self.true_positives, self.true_positives + self.false_negatives )
    }

    pub fn f1( &self ) -> f64 {
	let (precision, recall) = (self.precision(), self.recall());
	if precision + recall > 0.0 { 2.0 * precision * recall / ( precision + recall ) } else { 0.0 }
    }
}

fn ratio( numerator: usize, denominator: usize ) -> f64 {
    if denominator == 0 { 0.0 }
    else { numerator as f64 / denominator as f64 }
}
