/// Smoke-test for `BrowserExtractorFactory`.
///
/// Launches a headless Chromium, extracts metrics for the post URL given as
/// the first argument, and prints them.
///
/// Run with:
///   cargo run --example browser_smoke --features browser -- https://x.com/<user>/status/<id>
use anyhow::Context;
use pulse_client::BrowserExtractorFactory;
use pulse_core::traits::{ExtractorFactory, MetricsExtractor};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("info")
        .init();

    let url = std::env::args()
        .nth(1)
        .context("usage: browser_smoke <post-url>")?;

    println!("Launching headless browser...");
    let extractor = BrowserExtractorFactory::new().open().await?;

    println!("Extracting {url} ...");
    let result = extractor.extract(&url).await;
    extractor.close().await;

    let metrics = result?;
    println!("{}", summary(&metrics));
    Ok(())
}

fn summary(m: &pulse_core::Metrics) -> String {
    format!(
        "impressions={} likes={} reposts={} replies={} posted_at={:?} author={:?}",
        m.impressions, m.likes, m.reposts, m.replies, m.posted_at, m.author_handle
    )
}
