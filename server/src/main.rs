use arena_server::config::{Args, ServerConfig};
use arena_server::maps::MapCatalog;
use arena_server::network::{Server, ServerMessage};
use clap::Parser;
use log::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config = ServerConfig::from(Args::parse());
    info!(
        "Starting arena server on {} with {} slots",
        config.bind_addr, config.slot_count
    );

    let mut server = Server::new(&config, MapCatalog::builtin()).await?;
    let shutdown = server.shutdown_handle();

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, shutting down gracefully...");
                if shutdown.send(ServerMessage::Shutdown).is_err() {
                    error!("Server loop already stopped");
                }
            }
            Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
        }
    });

    server.run().await
}
