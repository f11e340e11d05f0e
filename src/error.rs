use thiserror::Error;

use crate::Count;

pub type Result<T> = std::result::Result<T, Error>;

#[derive( Error, Debug )]
pub enum Error {
    #[error( "observation {index} is invalid: {successes} successes out of {trials} trials" )]
    InvalidObservation { index: usize, trials: Count, successes: Count },

    #[error( "got {trials} trial counts but {successes} success counts" )]
    LengthMismatch { trials: usize, successes: usize },

    #[error( "got {labels} labels for {observations} observations" )]
    LabelMismatch { observations: usize, labels: usize },

    #[error( "the dataset contains no observations" )]
    EmptyDataset,

    #[error( "invalid configuration: {0}" )]
    InvalidConfig( String ),

    #[error( "invalid parameters: {0}" )]
    InvalidParameters( String ),

    /// The M-step lost all effective weight of a component.
    #[error( "component {component} captured no effective weight" )]
    DegenerateComponent { component: usize },

    #[error( "all {restarts} restarts ended in a numerical instability" )]
    AllRestartsDegenerate { restarts: usize },

    #[error( "I/O failure: {0}" )]
    Io( #[from] std::io::Error ),

    #[error( "cannot parse line {line}: {content:?}" )]
    Parse { line: usize, content: String },

    #[error( "cannot serialize result: {0}" )]
    Json( #[from] serde_json::Error ),
}
