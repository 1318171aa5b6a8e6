//! Frontend process entry point: serves browser WebSocket connections,
//! resolving backend addresses either from `--backend-addr` or from the
//! scratchpad registry (spec.md §4.7, §6).

use clap::Parser;
use hangman_cluster::config::FrontendArgs;
use hangman_cluster::frontend::FrontendServer;
use hangman_cluster::registry::{FileRegistryClient, RegistryClient};
use hangman_cluster::rpc::Resolver;
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;

fn main() -> std::process::ExitCode {
    env_logger::init();
    let args = FrontendArgs::parse();

    if let Err(e) = run(args) {
        log::error!("frontend exiting: {e}");
        return std::process::ExitCode::FAILURE;
    }
    std::process::ExitCode::SUCCESS
}

fn run(args: FrontendArgs) -> std::io::Result<()> {
    let seeds = if args.backend_addr.is_empty() {
        let registry = FileRegistryClient::new(FileRegistryClient::default_path());
        registry.lookup()?
    } else {
        args.backend_addr.clone()
    };
    if seeds.is_empty() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "no backend addresses given and none found in the registry",
        ));
    }
    log::info!("resolving backend servers starting from {seeds:?}");

    let resolver = Arc::new(Resolver::new(seeds));
    let server = FrontendServer::new(resolver);

    let bind_addr: SocketAddr = format!("0.0.0.0:{}", args.port).parse().unwrap();
    let listener = TcpListener::bind(bind_addr)?;
    log::info!("frontend listening on {bind_addr}");

    server.serve(listener).join().ok();
    Ok(())
}
