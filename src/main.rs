use clap::Parser;
use tracing::info;

use vetrelay::config::RelayConfig;
use vetrelay::signaling::SignalingServer;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt::init();

    let config = RelayConfig::parse();

    println!("   Vetrelay Signaling Relay");
    println!("   Binding to {}", config.bind_addr());
    println!("   Admitted rooms: {}", config.rooms.join(", "));
    println!("   Press Ctrl+C to stop\n");

    let server = SignalingServer::bind(&config).await?;
    server
        .run_until(async {
            if tokio::signal::ctrl_c().await.is_err() {
                std::future::pending::<()>().await;
            }
            info!("Ctrl+C received");
        })
        .await
}
