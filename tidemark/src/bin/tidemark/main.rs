#[tokio::main]
async fn main() {
    tidemark::cli::run().await;
}
