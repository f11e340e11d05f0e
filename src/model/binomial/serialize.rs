use serde::{Serialize, Serializer};

use crate::io::PrettyFormatter;

use super::{BinomialMixture, Parameters};

pub struct BinomialFormatter {
    by_theta: bool,
    precision: usize,
}

impl PrettyFormatter<Parameters> for BinomialFormatter {

    fn format_pretty( &self, parameters: &Parameters ) -> String {
	let mut output = String::new();
	output.push( '\n' ); // so output begins on a new line

	let mut order: Vec<usize> = ( 0 .. parameters.components() ).collect();
	if self.by_theta {
	    order.sort_by( |left, right| parameters.theta( *left ).total_cmp( &parameters.theta( *right )));
	}
	order.iter()
	    .map( |m| format_component( *m, parameters.weight( *m ), parameters.theta( *m ), self.precision ))
	    .fold( output, |acc, line| join_lines( acc, line ))
    }
}

impl Serialize for BinomialMixture {
    fn serialize<S>( &self, serializer: S ) -> std::result::Result<S::Ok, S::Error> where S: Serializer {
	self.parameters.serialize( serializer )
    }
}

fn format_component( component: usize, weight: f64, theta: f64, precision: usize ) -> String {
    format!( "{component}:  weight {weight:.precision$}  theta {theta:.precision$}" )
}

fn join_lines( mut accumulator: String, addition: String ) -> String {
    accumulator.push_str( addition.as_str() );
    accumulator.push( '\n' );
    accumulator
}

impl BinomialFormatter {
    pub fn new() -> BinomialFormatter {
	BinomialFormatter {
	    by_theta: false,
	    precision: 4,
	}
    }

    /// List components by increasing success probability
    pub fn sort_by_theta( &mut self ) { self.by_theta = true; }
    pub fn set_precision( &mut self, precision: usize ) { self.precision = precision; }
}
