#[tokio::main(flavor = "multi_thread")]
pub async fn main() -> miette::Result<()> {
    modcdn_server::run_cli().await
}
