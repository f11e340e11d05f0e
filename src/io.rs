use std::path::Path;
use std::fs::File;
use std::io::{BufReader, BufRead, Write};

use serde::Serialize;

use crate::*;

/// Converts a structure into a string
pub trait PrettyFormatter<T> {
    fn format_pretty( &self, object: &T ) -> String;
}

/// Reads a dataset with one observation per line: trials, successes and an optional label,
/// separated by whitespace. Blank lines and lines starting with '#' are skipped.
pub fn read_data<P: AsRef<Path>>( path: P ) -> Result<Dataset> {
    let file = File::open( path.as_ref() )?;
    parse_data( BufReader::new( file ))
}

pub fn parse_data<R: BufRead>( reader: R ) -> Result<Dataset> {
    let mut observations = Vec::new();
    let mut labels = Vec::new();
    for (number, line) in reader.lines().enumerate() {
	let line = line?;
	let content = line.trim();
	if content.is_empty() || content.starts_with( '#' ) {
	    continue;
	}
	let (observation, label) = parse_line( content )
	    .ok_or_else( || Error::Parse { line: number + 1, content: content.to_string() } )?;
	observations.push( observation );
	labels.push( label );
    }
    debug!( "read {} observations", observations.len() );

    let dataset = Dataset::from_observations( observations )?;
    match labels.iter().filter( |label| label.is_some() ).count() {
	0 => Ok( dataset ),
	n if n == labels.len() => dataset.with_labels( labels.into_iter().flatten().collect() ),
	n => {
	    warn!( "only {n} of {} observations are labelled, ignoring labels", labels.len() );
	    Ok( dataset )
	},
    }
}

/// Parses "trials successes [label]"
fn parse_line( line: &str ) -> Option<(Observation, Option<bool>)> {
    let mut chunks = line.split_whitespace();
    let trials: Count = chunks.next()?.parse().ok()?;
    let successes: Count = chunks.next()?.parse().ok()?;
    let label = match chunks.next() {
	None => None,
	Some( "1" ) | Some( "true" ) => Some( true ),
	Some( "0" ) | Some( "false" ) => Some( false ),
	Some( _ ) => return None,
    };
    if chunks.next().is_some() {
	return None;
    }
    Some( (Observation::new( trials, successes ), label) )
}

/// Writes a serializeable result to a file
pub fn write_result<T: Serialize, P: AsRef<Path>>( result: &T, path: P ) -> Result<()> {
    let json = serde_json::to_string_pretty( result )?;
    let mut file = File::create( path.as_ref() )?;
    writeln!( file, "{json}" )?;
    Ok( () )
}
