use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::filter::LevelFilter;

use binomix::*;
use binomix::io::{PrettyFormatter, read_data, write_result};
use binomix::model::BinomialFormatter;

#[derive( Parser, Debug )]
#[command( about = "Fits a Binomial mixture to success counts with EM" )]
struct Args {
    /// Whitespace separated lines: trials successes [label]
    input: PathBuf,
    /// Number of mixture components
    #[arg( short = 'k', long, default_value_t = 2 )]
    components: usize,
    /// Number of random restarts
    #[arg( short, long, default_value_t = 5 )]
    restarts: usize,
    /// Relative log likelihood change that counts as converged
    #[arg( long, default_value_t = 0.01 )]
    loglik_tolerance: f64,
    /// Relative change of the success probabilities that counts as converged
    #[arg( long, default_value_t = 0.01 )]
    theta_tolerance: f64,
    /// Maximal EM iterations per restart
    #[arg( short, long, default_value_t = 10 )]
    max_steps: usize,
    /// Probabilities are kept inside [floor, 1 - floor]
    #[arg( long, default_value_t = 1e-6 )]
    floor: f64,
    #[arg( long, value_enum, default_value_t = Policy::All )]
    stopping: Policy,
    #[arg( long, value_enum, default_value_t = Method::Ratio )]
    method: Method,
    #[arg( long )]
    seed: Option<u64>,
    /// Wall clock limit per restart in seconds
    #[arg( long )]
    time_limit: Option<f64>,
    /// Run restarts one after another
    #[arg( long )]
    sequential: bool,
    /// Posterior threshold for flagging an observation
    #[arg( long, default_value_t = 0.5 )]
    threshold: f64,
    /// Writes the fit as JSON
    #[arg( short, long )]
    output: Option<PathBuf>,
    #[arg( short, long )]
    verbose: bool,
}

#[derive( Clone, Copy, Debug, ValueEnum )]
enum Policy {
    /// stop once the likelihood and all probabilities settled
    All,
    /// stop once either settled
    Any,
}

#[derive( Clone, Copy, Debug, ValueEnum )]
enum Method {
    Ratio,
    Log,
}

fn main() -> Result<()> {
    let args = Args::parse();
    prepare_logging( args.verbose );

    let config = configure( &args );
    let data = read_data( &args.input )?;
    info!( "read {} observations from {}", data.len(), args.input.display() );

    let result = fit( &data, &config )?;

    let mut formatter = BinomialFormatter::new();
    formatter.sort_by_theta();
    info!( "best log likelihood {:.3}{}", result.loglik(), formatter.format_pretty( result.parameters() ));

    let anomalous = evaluate::anomalous_component( result.parameters() );
    info!( "estimated error rate {:.6}", evaluate::estimated_error_rate( result.posterior(), anomalous ));
    if let Some( labels ) = data.labels() {
	let predicted = evaluate::hard_assign( result.posterior(), anomalous, args.threshold );
	let confusion = evaluate::Confusion::tally( &predicted, labels )?;
	info!( "precision {:.4} recall {:.4} f1 {:.4}", confusion.precision(), confusion.recall(), confusion.f1() );
    }

    if let Some( path ) = &args.output {
	write_result( &result, path )?;
	info!( "wrote result to {}", path.display() );
    }
    Ok( () )
}

fn configure( args: &Args ) -> EmConfig {
    let mut config = EmConfig::new()
	.with_components( args.components )
	.with_restarts( args.restarts )
	.with_tolerances( args.loglik_tolerance, args.theta_tolerance )
	.with_max_steps( args.max_steps )
	.with_floor( args.floor )
	.with_parallel_restarts( !args.sequential )
	.with_stopping( match args.stopping {
	    Policy::All => StoppingPolicy::AllSettled,
	    Policy::Any => StoppingPolicy::AnySettled,
	})
	.with_posterior_method( match args.method {
	    Method::Ratio => PosteriorMethod::RatioClamp,
	    Method::Log => PosteriorMethod::LogSumExp,
	});
    if let Some( seed ) = args.seed {
	config = config.with_seed( seed );
    }
    match args.time_limit.map( Duration::try_from_secs_f64 ) {
	Some( Ok( limit ) ) => config = config.with_time_limit( limit ),
	Some( Err( err ) ) => warn!( "ignoring time limit: {err}" ),
	None => {},
    }
    config
}

fn prepare_logging( verbose: bool ) {
    let level = if verbose { LevelFilter::DEBUG } else { LevelFilter::INFO };
    let tracer = tracing_subscriber::fmt::fmt()
        .with_max_level( level )
        .finish();
    if tracing::subscriber::set_global_default( tracer ).is_err() {
	eprintln!( "logging was already initialized" );
    }
}
