use clap::Parser;
use log::error;
use server::game::{GameServer, ServerConfig};

#[derive(Parser)]
#[command(about = "Authoritative game server")]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on
    #[arg(long, default_value_t = 8080)]
    port: u16,

    /// Simulation ticks per second
    #[arg(long, default_value_t = 60)]
    tick_rate: u32,
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let args = Args::parse();

    let config = ServerConfig {
        host: args.host,
        port: args.port,
        tick_rate: args.tick_rate,
        ..ServerConfig::default()
    };

    match GameServer::bind(config).await {
        Ok(server) => {
            if let Err(e) = server.run().await {
                error!("server stopped with error: {}", e);
                std::process::exit(1);
            }
        }
        Err(e) => {
            error!("failed to start server: {}", e);
            std::process::exit(1);
        }
    }
}
