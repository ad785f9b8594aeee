use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::config::FeedsConfig;
use crate::error::TsuzukiError;
use crate::models::FeedItem;

/// GET a URL and return the body as text. Non-2xx responses are errors.
pub async fn fetch_text(
    client: &reqwest::Client,
    url: &str,
    timeout: Duration,
) -> Result<String, TsuzukiError> {
    let response = client
        .get(url)
        .timeout(timeout)
        .send()
        .await
        .and_then(reqwest::Response::error_for_status)
        .map_err(|e| TsuzukiError::Feed(format!("fetch {url}: {e}")))?;

    response
        .text()
        .await
        .map_err(|e| TsuzukiError::Feed(format!("read {url}: {e}")))
}

/// Fetch and parse a single RSS feed.
pub async fn fetch_feed(
    client: &reqwest::Client,
    url: &str,
    timeout: Duration,
) -> Result<Vec<FeedItem>, TsuzukiError> {
    let response = client
        .get(url)
        .timeout(timeout)
        .send()
        .await
        .and_then(reqwest::Response::error_for_status)
        .map_err(|e| TsuzukiError::Feed(format!("fetch {url}: {e}")))?;

    let bytes = response
        .bytes()
        .await
        .map_err(|e| TsuzukiError::Feed(format!("read {url}: {e}")))?;

    parse_channel(&bytes).map_err(|e| TsuzukiError::Feed(format!("parse {url}: {e}")))
}

/// Fetch a feed, retrying with a fixed backoff per the feed settings.
pub async fn fetch_with_retry(
    client: &reqwest::Client,
    url: &str,
    config: &FeedsConfig,
) -> Result<Vec<FeedItem>, TsuzukiError> {
    let timeout = Duration::from_secs(config.timeout_secs);
    with_retry(
        config.retry_attempts,
        Duration::from_secs(config.retry_backoff_secs),
        || fetch_feed(client, url, timeout),
    )
    .await
}

/// Run `op` up to `attempts` times, sleeping `backoff` between failures.
/// Returns the last error once attempts run out.
pub async fn with_retry<T, F, Fut>(
    attempts: u32,
    backoff: Duration,
    mut op: F,
) -> Result<T, TsuzukiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TsuzukiError>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= attempts => return Err(e),
            Err(e) => {
                warn!(attempt, attempts, error = %e, "Attempt failed, retrying");
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
        }
    }
}

/// Decode an RSS document into feed items. Items without any link are
/// dropped.
pub fn parse_channel(bytes: &[u8]) -> Result<Vec<FeedItem>, rss::Error> {
    let channel = rss::Channel::read_from(bytes)?;

    let items = channel
        .items()
        .iter()
        .filter_map(|rss_item: &rss::Item| {
            let title = rss_item.title().unwrap_or("").to_string();

            // Prefer a magnet URI from either the link or the enclosure.
            let links = [
                rss_item.link(),
                rss_item.enclosure().map(|e| e.url()),
            ];
            let link = links
                .iter()
                .flatten()
                .find(|l| l.starts_with("magnet:"))
                .or_else(|| links.iter().flatten().next())
                .map(|l| l.to_string());
            let Some(link) = link else {
                debug!(title = %title, "Feed item has no link, skipping");
                return None;
            };

            let guid = rss_item
                .guid()
                .map(|g| g.value().to_string())
                .unwrap_or_else(|| link.clone());

            let pub_date: Option<DateTime<Utc>> = rss_item
                .pub_date()
                .and_then(|s| DateTime::parse_from_rfc2822(s).ok())
                .map(|dt| dt.with_timezone(&Utc));

            Some(FeedItem {
                guid,
                title,
                link,
                pub_date,
            })
        })
        .collect();

    Ok(items)
}
