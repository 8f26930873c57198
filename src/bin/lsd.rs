#[tokio::main]
async fn main() -> anyhow::Result<()> {
    livescribe_daemon::run().await
}
