//! Spot USD prices from a CoinGecko-compatible `/simple/price` endpoint.

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::Utc;
use metrics::counter;
use moka::future::Cache;
use tracing::{debug, warn};

use donation_watch_domain::{policy, BootstrapConfig, PriceSource, PriceTable};

use crate::{error::AdapterResult, http::HttpClient};

/// Source of USD conversion rates. Never fails: callers always get a table.
#[async_trait]
pub trait PriceFeed: Send + Sync {
    async fn get_prices(&self) -> Arc<PriceTable>;
}

/// The table served when the live feed cannot be reached.
pub fn fallback_prices() -> PriceTable {
    policy::FALLBACK_PRICES
        .iter()
        .fold(PriceTable::new(PriceSource::Fallback), |table, (symbol, usd)| {
            table.with_price(symbol, *usd)
        })
}

pub struct PriceOracle {
    http: Arc<HttpClient>,
    base_url: String,
    // Single entry: the whole table is cached, not individual symbols.
    cache: Cache<(), Arc<PriceTable>>,
}

impl PriceOracle {
    pub fn new(http: Arc<HttpClient>, base_url: &str) -> Self {
        Self::with_ttl(http, base_url, policy::PRICE_CACHE_TTL)
    }

    pub fn with_ttl(http: Arc<HttpClient>, base_url: &str, ttl: Duration) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            cache: Cache::builder().max_capacity(1).time_to_live(ttl).build(),
        }
    }

    pub fn from_config(config: &BootstrapConfig) -> AdapterResult<Self> {
        let http = Arc::new(HttpClient::new(config.http_timeout())?);
        Ok(Self::new(http, &config.endpoints().price_api_url))
    }

    /// Drops the cached table so the next lookup refetches.
    pub async fn invalidate(&self) {
        self.cache.invalidate(&()).await;
    }

    async fn fetch_live(&self) -> AdapterResult<PriceTable> {
        let ids = policy::PRICE_FEED_IDS
            .iter()
            .map(|(_, id)| *id)
            .collect::<Vec<_>>()
            .join(",");
        let request = self
            .http
            .get(&format!("{}/simple/price", self.base_url))
            .query(&[("ids", ids.as_str()), ("vs_currencies", "usd")]);
        let quotes: HashMap<String, HashMap<String, f64>> = self.http.send_json(request).await?;

        let mut table = PriceTable::new(PriceSource::Live);
        for (symbol, id) in policy::PRICE_FEED_IDS {
            if let Some(usd) = quotes.get(id).and_then(|quote| quote.get("usd")) {
                table.insert(symbol, *usd);
            }
        }
        for (symbol, usd) in policy::FALLBACK_PRICES {
            if !table.contains(symbol) {
                debug!(symbol, "price missing from live feed, using fallback");
                table.insert(symbol, usd);
            }
        }
        table.fetched_at = Utc::now();
        Ok(table)
    }

    async fn load(&self) -> Arc<PriceTable> {
        match self.fetch_live().await {
            Ok(table) => {
                counter!("price_oracle_fetch_total", "result" => "live").increment(1);
                Arc::new(table)
            }
            Err(err) => {
                warn!(?err, "price feed unavailable, serving fallback prices");
                counter!("price_oracle_fetch_total", "result" => "fallback").increment(1);
                Arc::new(fallback_prices())
            }
        }
    }
}

#[async_trait]
impl PriceFeed for PriceOracle {
    async fn get_prices(&self) -> Arc<PriceTable> {
        self.cache.get_with((), self.load()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    fn oracle(url: &str) -> PriceOracle {
        PriceOracle::new(
            Arc::new(HttpClient::new(Duration::from_secs(5)).unwrap()),
            url,
        )
    }

    #[tokio::test]
    async fn live_prices_are_cached_for_the_ttl() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/simple/price")
            .match_query(Matcher::UrlEncoded("vs_currencies".into(), "usd".into()))
            .with_body(r#"{"bitcoin":{"usd":60000.5},"ethereum":{"usd":3000.0},"tether":{"usd":1.0}}"#)
            .expect(1)
            .create_async()
            .await;

        let oracle = oracle(&server.url());
        let first = oracle.get_prices().await;
        let second = oracle.get_prices().await;

        assert_eq!(first.source, PriceSource::Live);
        assert_eq!(first.usd_price("BTC"), Some(60000.5));
        assert_eq!(second.usd_price("ETH"), Some(3000.0));
        // Filled in from the fallback table.
        assert_eq!(first.usd_price("SOL"), Some(100.0));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn outage_serves_fallback_without_error() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/simple/price")
            .match_query(Matcher::Any)
            .with_status(503)
            .create_async()
            .await;

        let prices = oracle(&server.url()).get_prices().await;
        assert_eq!(prices.source, PriceSource::Fallback);
        assert_eq!(prices.usd_price("BTC"), Some(45_000.0));
        assert_eq!(prices.len(), policy::FALLBACK_PRICES.len());
    }

    #[tokio::test]
    async fn invalidate_forces_a_refetch() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/simple/price")
            .match_query(Matcher::Any)
            .with_body(r#"{"ripple":{"usd":0.62}}"#)
            .expect(2)
            .create_async()
            .await;

        let oracle = oracle(&server.url());
        assert_eq!(oracle.get_prices().await.usd_price("XRP"), Some(0.62));
        oracle.invalidate().await;
        assert_eq!(oracle.get_prices().await.usd_price("xrp"), Some(0.62));
        mock.assert_async().await;
    }
}
