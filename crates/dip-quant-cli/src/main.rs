use anyhow::Result;
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = dip_quant_cli::Cli::parse();
    dip_quant_cli::app_init()?;
    dip_quant_cli::run(cli).await
}
