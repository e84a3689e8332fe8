//! Fetch a URL through DNS-over-HTTPS resolution and address failover.
//!
//! Usage: cargo run --example fetch -- [URL] [DOH_SERVER_IP]

use doh_network::{Network, NetworkConfig, TcpDialer, Transport};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let mut args = std::env::args().skip(1);
    let url = args
        .next()
        .unwrap_or_else(|| "https://www.cloudflare.com/cdn-cgi/trace".to_string());
    let doh_host = args.next().unwrap_or_else(|| "1.1.1.1".to_string());

    let config = NetworkConfig::new("doh-network-demo/0.1.0", doh_host, 10.0);
    let network = Network::new(Arc::new(TcpDialer::new()), &config)?;

    let uri: http::Uri = url.parse()?;
    if let Some(host) = uri.host() {
        let host = host.trim_start_matches('[').trim_end_matches(']');
        let ips = network
            .resolver()
            .resolve(&doh_network::Context::background(), Transport::Tcp, host)
            .await?;
        log::info!("{} resolves to {:?}", host, ips);
    }

    log::info!("Fetching {} ...", url);
    let client = network.make_http_client(None)?;
    let response = client.get(&url).await?;

    log::info!("Response status: {}", response.status());

    println!();
    println!("{}", "=".repeat(70));
    println!("{}", String::from_utf8_lossy(response.body()));
    println!("{}", "=".repeat(70));

    Ok(())
}
