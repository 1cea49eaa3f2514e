//! Queue Bridge Service
//!
//! Binary entry point.

#[tokio::main]
async fn main() {
    if let Err(e) = queue_bridge::run().await {
        eprintln!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}
