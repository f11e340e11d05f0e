use tracing::info;

use rand::prelude::*;

use std::time::*;

use binomix::*;
use binomix::data::MixtureSampler;

fn main() -> Result<()> {
    prepare_logging();

    let mut rng = StdRng::seed_from_u64( 31 );
    let sampler = MixtureSampler::error_model( 0.001, 0.70, 0.01, 31 )?;

    for size in [100_000, 1_000_000, 5_000_000] {
	let data = sampler.sample( size, &mut rng )?;
	benchmark_size( &data )?;
    }
    Result::Ok( () )
}

fn benchmark_size( data: &Dataset ) -> Result<()> {
    let n = data.len();
    let parameters = Parameters::new( vec!( 0.5, 0.5 ), vec!( 0.3, 0.6 ))?;

    info!( "Start benchmark: {n} observations" );
    for method in [PosteriorMethod::RatioClamp, PosteriorMethod::LogSumExp] {
	let start = Instant::now();
	let responsibilities = model::binomial::calc_posterior( data, &parameters, method );
	info!( "{method:?} posterior took {}ms ({} columns)", start.elapsed().as_millis(), responsibilities.ncols() );
    }

    let start = Instant::now();
    let loglik = log_likelihood( data, &parameters );
    info!( "log likelihood {loglik:.3} took {}ms", start.elapsed().as_millis() );

    for parallel in [false, true] {
	let config = EmConfig::new().with_seed( 7 ).with_parallel_restarts( parallel );
	let start = Instant::now();
	let result = fit( data, &config )?;
	let iterations: usize = result.restarts.iter().map( |report| report.iterations ).sum();
	info!( "Result: fit (parallel restarts {parallel}) took {}ms over {iterations} iterations, log likelihood {:.3}",
	       start.elapsed().as_millis(), result.loglik() );
    }
    Ok( () )
}

fn prepare_logging() {
    let tracer = tracing_subscriber::fmt::fmt()
        .with_max_level( tracing_subscriber::filter::LevelFilter::INFO )
        .finish();
    tracing::subscriber::set_global_default( tracer ).expect( "logging is initialized once" );
}
