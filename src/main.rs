use log::error;

use signaling_hub::{HubConfig, SignalingHub};

const DEFAULT_ADDR: &str = "0.0.0.0:4000";

#[tokio::main]
async fn main() {
    let bind_addr = std::env::var("HUB_ADDR").unwrap_or_else(|_| DEFAULT_ADDR.to_string());

    // Healthcheck mode: exit 0 if server is running (port in use), exit 1 if not
    if std::env::args().any(|a| a == "--healthcheck") {
        use std::net::TcpListener;
        match TcpListener::bind(&bind_addr) {
            Ok(_) => std::process::exit(1),  // Port free = server NOT running
            Err(_) => std::process::exit(0), // Port in use = server IS running (healthy)
        }
    }

    env_logger::init();

    let hub = SignalingHub::new(HubConfig { bind_addr });
    if let Err(e) = hub.run().await {
        error!("Server error: {}", e);
    }
}
