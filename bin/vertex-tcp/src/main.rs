//! Vertex TCP transport driver.

mod cli;
mod logging;

use clap::Parser;
use color_eyre::eyre::{self, WrapErr};
use futures::StreamExt;
use libp2p::Multiaddr;
use tracing::{info, warn};
use vertex_net_tcp::{TcpConfig, TcpConnection, TcpTransport};

use crate::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    logging::init_logging(&cli.logs)?;

    let config = TcpConfig::load(cli.config.as_deref()).wrap_err("failed to load transport config")?;
    let transport = TcpTransport::new(config);

    match cli.command {
        Commands::Listen { addr } => listen(&transport, addr).await,
        Commands::Dial { addr, message } => dial(&transport, &addr, message.as_bytes()).await,
        Commands::Addrs { addrs } => {
            for addr in transport.filter(addrs) {
                println!("{addr}");
            }
            Ok(())
        }
    }
}

async fn listen(transport: &TcpTransport, addr: Multiaddr) -> eyre::Result<()> {
    let mut listener = transport.listen(addr)?;
    for addr in listener.get_addrs().await? {
        println!("{addr}");
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                listener.close();
                return Ok(());
            }
            conn = listener.next() => match conn {
                Some(Ok(conn)) => {
                    tokio::spawn(echo(conn));
                }
                Some(Err(e)) => return Err(e).wrap_err("listener failed"),
                None => return Ok(()),
            },
        }
    }
}

async fn echo(mut conn: TcpConnection) {
    let remote = conn.remote_multiaddr().clone();
    info!(%remote, "connection accepted");

    while let Some(chunk) = conn.next().await {
        let result = match chunk {
            Ok(chunk) => conn.send(&chunk).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!(%remote, %e, "echo failed");
            break;
        }
    }

    conn.close().await;
    info!(%remote, "connection closed");
}

async fn dial(transport: &TcpTransport, addr: &Multiaddr, message: &[u8]) -> eyre::Result<()> {
    let mut conn = transport.dial(addr).await?;
    conn.send(message).await?;

    let mut reply = Vec::with_capacity(message.len());
    while reply.len() < message.len() {
        match conn.next().await {
            Some(chunk) => reply.extend_from_slice(&chunk?),
            None => break,
        }
    }
    conn.close().await;

    println!("{}", String::from_utf8_lossy(&reply));
    Ok(())
}
