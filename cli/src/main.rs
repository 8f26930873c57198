#[tokio::main]
async fn main() -> anyhow::Result<()> {
    livescribe_cli::run().await
}
