//! Logging setup.

use eyre::Result;
use tracing_subscriber::EnvFilter;

use crate::cli::LogArgs;

/// Initialize logging based on command line arguments.
///
/// The filter is built with the following precedence:
/// 1. If `--quiet` is set, only errors are shown
/// 2. Otherwise, start with `RUST_LOG` if set, or the level implied by `-v`
/// 3. Apply any custom directives from `--log.filter`
pub(crate) fn init_logging(args: &LogArgs) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(build_filter(args))
        .with_writer(std::io::stderr)
        .without_time()
        .try_init()
        .map_err(|e| eyre::eyre!(e))
}

fn build_filter(args: &LogArgs) -> EnvFilter {
    if args.quiet {
        return EnvFilter::new("error");
    }

    let base_level = match args.verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let mut filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(base_level));

    if let Some(custom) = &args.filter {
        for directive in custom.split(',') {
            match directive.parse() {
                Ok(d) => filter = filter.add_directive(d),
                Err(e) => eprintln!("ignoring invalid log directive {directive:?}: {e}"),
            }
        }
    }

    filter
}
