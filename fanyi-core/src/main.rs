use anyhow::Result;
use fanyi_core::{run, Dispatcher};
use fanyi_lib::TranslationService;
use plugin_tencent::TencentTranslator;
use std::sync::Arc;
use tokio::io::BufReader;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // stdout 只输出协议响应，日志写 stderr
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_env("FANYI_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let service = TranslationService::new(Arc::new(TencentTranslator::new()));
    let dispatcher = Dispatcher::new(service);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "fanyi-core started");

    run(
        &dispatcher,
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
    )
    .await?;

    tracing::info!("fanyi-core stopped");

    Ok(())
}
