//! rainsd - RAINS name server daemon

use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    rainsd::run().await
}
