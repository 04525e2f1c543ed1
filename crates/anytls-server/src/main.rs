use clap::Parser;

use anytls_server::cli::{ServerArgs, run};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    run(ServerArgs::parse()).await
}
