use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    solsniffer_app::run().await?;
    Ok(())
}
