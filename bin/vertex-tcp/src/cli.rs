//! Command-line arguments.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use libp2p::Multiaddr;

/// Vertex TCP - listen, dial and inspect multiaddrs over plain TCP
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub(crate) struct Cli {
    /// Logging configuration (applies to all subcommands).
    #[command(flatten)]
    pub(crate) logs: LogArgs,

    /// Transport configuration file (TOML).
    #[arg(long, global = true, value_name = "FILE", env = "VERTEX_TCP_CONFIG")]
    pub(crate) config: Option<PathBuf>,

    #[command(subcommand)]
    pub(crate) command: Commands,
}

#[derive(Debug, Subcommand)]
pub(crate) enum Commands {
    /// Listen on an address and echo everything received.
    Listen {
        /// Address to listen on, e.g. `/ip4/0.0.0.0/tcp/0`.
        addr: Multiaddr,
    },
    /// Dial an address, send a message and print the reply.
    Dial {
        addr: Multiaddr,
        message: String,
    },
    /// Print the given addresses this transport can use.
    Addrs {
        #[arg(required = true)]
        addrs: Vec<Multiaddr>,
    },
}

/// Logging configuration.
#[derive(Debug, Args, Clone, Default)]
#[command(next_help_heading = "Logging")]
pub(crate) struct LogArgs {
    /// Silence all output.
    #[arg(short, long, global = true)]
    pub(crate) quiet: bool,

    /// Verbose mode (-v, -vv, -vvv, etc.).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub(crate) verbosity: u8,

    /// Log filter directive (e.g., "vertex_net_tcp=trace").
    #[arg(long = "log.filter", global = true, value_name = "DIRECTIVE")]
    pub(crate) filter: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_dial() {
        let cli = Cli::try_parse_from([
            "vertex-tcp",
            "-vv",
            "dial",
            "/ip4/127.0.0.1/tcp/9090",
            "hey!",
        ])
        .unwrap();

        assert_eq!(cli.logs.verbosity, 2);
        match cli.command {
            Commands::Dial { addr, message } => {
                assert_eq!(addr.to_string(), "/ip4/127.0.0.1/tcp/9090");
                assert_eq!(message, "hey!");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_rejects_malformed_multiaddr() {
        assert!(Cli::try_parse_from(["vertex-tcp", "listen", "not-an-addr"]).is_err());
    }
}
