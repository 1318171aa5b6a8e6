//! Backend process entry point: binds the shared raft/RPC port, boots the
//! consensus engine, joins the gossip cluster, and serves the `GameService`
//! RPC surface (spec.md §6).

use clap::Parser;
use hangman_cluster::config::BackendArgs;
use hangman_cluster::consensus::raft::{Raft, RaftConfig};
use hangman_cluster::discovery::{Discovery, DiscoveryConfig, RaftHandler};
use hangman_cluster::mux::PortMultiplexer;
use hangman_cluster::registry::{FileRegistryClient, RegistryClient};
use hangman_cluster::rpc::service::GameServiceHandler;
use hangman_cluster::rpc::server::RpcServer;
use std::path::PathBuf;
use std::sync::Arc;

fn main() -> std::process::ExitCode {
    env_logger::init();
    let args = BackendArgs::parse();

    if let Err(e) = run(args) {
        log::error!("backend exiting: {e}");
        return std::process::ExitCode::FAILURE;
    }
    std::process::ExitCode::SUCCESS
}

fn run(args: BackendArgs) -> std::io::Result<()> {
    let rpc_addr = args.rpc_addr();
    let (bound_addr, raft_listener, rpc_listener) = PortMultiplexer::bind(rpc_addr)?;
    log::info!("{} listening on {bound_addr}", args.node_name);

    let raft_config = RaftConfig {
        node_id: args.node_name.clone(),
        rpc_addr: bound_addr,
        data_dir: args.data_dir.as_ref().map(PathBuf::from),
        bootstrap: args.bootstrap,
        secret: "hangman".to_string(),
    };
    let raft = Raft::start(raft_config, raft_listener)?;

    let mut rpc_server = RpcServer::new();
    GameServiceHandler::register_all(raft.clone(), &mut rpc_server);
    Arc::new(rpc_server).serve(rpc_listener);

    let handler: Arc<dyn hangman_cluster::discovery::Handler> = Arc::new(RaftHandler::new(raft.clone()));
    let discovery = Discovery::start(
        DiscoveryConfig {
            node_id: args.node_name.clone(),
            bind_addr: args.bind_addr,
            rpc_addr: bound_addr,
            seeds: args.start_join_addrs.clone(),
        },
        handler,
    )?;

    let registry = FileRegistryClient::new(FileRegistryClient::default_path());
    if let Err(e) = registry.register(&args.node_name, bound_addr) {
        log::warn!("failed to register with the scratchpad registry: {e}");
    }

    // The mux accept loop, RPC server, raft main loop, and discovery threads
    // all run in the background; block the main thread until killed. `raft`
    // and `discovery` stay alive for the loop's entire (infinite) lifetime.
    let _ = &raft;
    let _ = &discovery;
    loop {
        std::thread::sleep(std::time::Duration::from_secs(3600));
    }
}
