use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    automock_cli::init_tracing();
    let cli = automock_cli::Cli::parse();
    automock_cli::run(cli).await
}
