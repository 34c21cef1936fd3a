// =============================================================================
// Kraken REST API Client — HMAC-SHA512 signed private requests
// =============================================================================
//
// SECURITY: The secret key is never logged or serialized. Private endpoints
// are signed with API-Sign = base64(HMAC-SHA512(path + SHA256(nonce ||
// postdata), base64-decode(secret))).
//
// Nonces are derived from wall-clock milliseconds plus a server-time offset
// measured by `sync_server_time`. A nonce rejection triggers one re-sync and
// retry before the error is surfaced.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use async_trait::async_trait;
use base64::Engine;
use hmac::{Hmac, Mac};
use parking_lot::RwLock;
use sha2::{Digest, Sha256, Sha512};
use tracing::{debug, instrument, warn};

use crate::market_data::Candle;
use crate::types::{Pair, Side};

use super::{
    BookLevel, ExchangeApi, ExchangeError, OrderBook, OrderKind, OrderRequest, OrderResult,
    OrderStatus, PairFilters, Ticker,
};

type HmacSha512 = Hmac<Sha512>;

/// Request timeout applied to every REST call.
const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Kraken REST client implementing the [`ExchangeApi`] capability.
pub struct KrakenClient {
    api_key: String,
    secret: String,
    base_url: String,
    client: reqwest::Client,
    /// Server minus local clock, milliseconds.
    time_offset_ms: AtomicI64,
    /// Last nonce issued, to keep nonces strictly increasing even when the
    /// clock jitters backwards.
    last_nonce: AtomicU64,
    filters_cache: RwLock<HashMap<Pair, PairFilters>>,
}

impl KrakenClient {
    // -------------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------------

    pub fn new(api_key: impl Into<String>, secret: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("failed to build reqwest client");

        debug!("KrakenClient initialised (base_url=https://api.kraken.com)");

        Self {
            api_key: api_key.into(),
            secret: secret.into(),
            base_url: "https://api.kraken.com".to_string(),
            client,
            time_offset_ms: AtomicI64::new(0),
            last_nonce: AtomicU64::new(0),
            filters_cache: RwLock::new(HashMap::new()),
        }
    }

    /// Measure the server clock offset. Called once at startup and again when
    /// the server rejects a nonce.
    pub async fn sync_server_time(&self) -> Result<(), ExchangeError> {
        let body = self.get_public("/0/public/Time", &[]).await?;
        let server_secs = body
            .get("unixtime")
            .and_then(|v| v.as_i64())
            .ok_or_else(|| ExchangeError::Unknown("Time response missing unixtime".into()))?;

        let local_ms = chrono::Utc::now().timestamp_millis();
        let offset = server_secs * 1000 - local_ms;
        self.time_offset_ms.store(offset, Ordering::SeqCst);

        debug!(offset_ms = offset, "server time synced");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Signing helpers
    // -------------------------------------------------------------------------

    fn next_nonce(&self) -> u64 {
        let now = (chrono::Utc::now().timestamp_millis()
            + self.time_offset_ms.load(Ordering::SeqCst)) as u64;
        self.last_nonce
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |prev| {
                Some(now.max(prev + 1))
            })
            .map(|prev| now.max(prev + 1))
            .unwrap_or(now)
    }

    /// API-Sign for a private request.
    fn sign(&self, path: &str, nonce: u64, postdata: &str) -> Result<String, ExchangeError> {
        let secret = base64::engine::general_purpose::STANDARD
            .decode(&self.secret)
            .map_err(|e| ExchangeError::Auth(format!("secret is not valid base64: {e}")))?;

        let mut sha = Sha256::new();
        sha.update(nonce.to_string().as_bytes());
        sha.update(postdata.as_bytes());
        let digest = sha.finalize();

        let mut mac = HmacSha512::new_from_slice(&secret)
            .map_err(|e| ExchangeError::Auth(format!("invalid HMAC key: {e}")))?;
        mac.update(path.as_bytes());
        mac.update(&digest);

        Ok(base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
    }

    // -------------------------------------------------------------------------
    // Transport
    // -------------------------------------------------------------------------

    async fn get_public(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<serde_json::Value, ExchangeError> {
        let url = format!("{}{}", self.base_url, path);

        let resp = self
            .client
            .get(&url)
            .query(params)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        Self::unwrap_envelope(resp).await
    }

    async fn post_private(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<serde_json::Value, ExchangeError> {
        match self.post_private_once(path, params).await {
            Err(ExchangeError::Auth(msg)) if msg.contains("Invalid nonce") => {
                warn!("nonce rejected — re-syncing server time and retrying once");
                self.sync_server_time().await?;
                self.post_private_once(path, params).await
            }
            other => other,
        }
    }

    async fn post_private_once(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<serde_json::Value, ExchangeError> {
        let nonce = self.next_nonce();

        let mut form = format!("nonce={nonce}");
        for (k, v) in params {
            form.push_str(&format!("&{k}={v}"));
        }

        let signature = self.sign(path, nonce, &form)?;
        let url = format!("{}{}", self.base_url, path);

        let resp = self
            .client
            .post(&url)
            .header("API-Key", &self.api_key)
            .header("API-Sign", signature)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(form)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        Self::unwrap_envelope(resp).await
    }

    /// Parse the `{ "error": [...], "result": {...} }` envelope, mapping
    /// error strings onto canonical kinds.
    async fn unwrap_envelope(resp: reqwest::Response) -> Result<serde_json::Value, ExchangeError> {
        let status = resp.status();
        if status.as_u16() == 429 {
            return Err(ExchangeError::RateLimit("HTTP 429".into()));
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ExchangeError::Network(format!("failed to parse response body: {e}")))?;

        if let Some(errors) = body.get("error").and_then(|v| v.as_array()) {
            if let Some(first) = errors.first().and_then(|v| v.as_str()) {
                return Err(map_api_error(first));
            }
        }

        if !status.is_success() {
            return Err(ExchangeError::Network(format!("HTTP {status}: {body}")));
        }

        body.get("result")
            .cloned()
            .ok_or_else(|| ExchangeError::Unknown(format!("response missing result: {body}")))
    }

    // -------------------------------------------------------------------------
    // Symbol mapping
    // -------------------------------------------------------------------------

    /// Kraken's wire symbol for a pair (`BTC/AUD` -> `XBTAUD`).
    fn wire_symbol(pair: &Pair) -> String {
        format!("{}{}", to_kraken_asset(&pair.base), pair.quote)
    }

    /// Extract the single pair-keyed entry from a result object (the OHLC
    /// result also carries a `last` cursor alongside it).
    fn pair_entry(result: &serde_json::Value) -> Result<&serde_json::Value, ExchangeError> {
        result
            .as_object()
            .and_then(|map| {
                map.iter()
                    .find(|(k, _)| k.as_str() != "last")
                    .map(|(_, v)| v)
            })
            .ok_or_else(|| ExchangeError::NotFound("pair missing from response".into()))
    }

    fn parse_order_info(
        order_id: &str,
        info: &serde_json::Value,
    ) -> Result<OrderResult, ExchangeError> {
        let raw_status = info.get("status").and_then(|v| v.as_str()).unwrap_or("");
        let filled_base = field_f64(info, "vol_exec");
        let filled_quote = field_f64(info, "cost");
        let fees = field_f64(info, "fee");
        let average_price = field_f64(info, "price");

        let status = match raw_status {
            "pending" | "open" => {
                if filled_base > 0.0 {
                    OrderStatus::Partial
                } else {
                    OrderStatus::Pending
                }
            }
            "closed" => OrderStatus::Filled,
            "canceled" | "expired" => OrderStatus::Canceled,
            other => {
                warn!(order_id, status = other, "unrecognized order status");
                OrderStatus::Failed
            }
        };

        Ok(OrderResult {
            order_id: order_id.to_string(),
            status,
            filled_base,
            filled_quote,
            average_price,
            fees,
            exchange_raw: info.clone(),
        })
    }
}

#[async_trait]
impl ExchangeApi for KrakenClient {
    #[instrument(skip(self), name = "kraken::get_ticker")]
    async fn get_ticker(&self, pair: &Pair) -> Result<Ticker, ExchangeError> {
        let result = self
            .get_public("/0/public/Ticker", &[("pair", Self::wire_symbol(pair))])
            .await?;
        let entry = Self::pair_entry(&result)?;

        // Kraken ticker arrays: c=[last, lot], b=[bid,...], a=[ask,...],
        // h=[today, 24h], l=[today, 24h], v=[today, 24h].
        let first = |key: &str| array_head_f64(entry, key, 0);
        let second = |key: &str| array_head_f64(entry, key, 1);

        Ok(Ticker {
            price: first("c"),
            bid: first("b"),
            ask: first("a"),
            high_24h: second("h"),
            low_24h: second("l"),
            volume_24h: second("v"),
        })
    }

    #[instrument(skip(self), name = "kraken::get_ohlcv")]
    async fn get_ohlcv(
        &self,
        pair: &Pair,
        interval_minutes: u32,
        limit: usize,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let result = self
            .get_public(
                "/0/public/OHLC",
                &[
                    ("pair", Self::wire_symbol(pair)),
                    ("interval", interval_minutes.to_string()),
                ],
            )
            .await?;

        let rows = Self::pair_entry(&result)?
            .as_array()
            .ok_or_else(|| ExchangeError::Unknown("OHLC entry is not an array".into()))?;

        // Rows: [time, open, high, low, close, vwap, volume, count].
        let mut candles = Vec::with_capacity(rows.len());
        for row in rows {
            let arr = match row.as_array() {
                Some(a) if a.len() >= 7 => a,
                _ => {
                    warn!("skipping malformed OHLC row");
                    continue;
                }
            };
            candles.push(Candle {
                timestamp: arr[0].as_i64().unwrap_or(0) * 1000,
                open: value_f64(&arr[1]),
                high: value_f64(&arr[2]),
                low: value_f64(&arr[3]),
                close: value_f64(&arr[4]),
                volume: value_f64(&arr[6]),
            });
        }

        // Oldest first; keep only the trailing `limit`.
        if candles.len() > limit {
            candles.drain(..candles.len() - limit);
        }

        debug!(pair = %pair, count = candles.len(), "OHLC fetched");
        Ok(candles)
    }

    #[instrument(skip(self), name = "kraken::get_order_book")]
    async fn get_order_book(
        &self,
        pair: &Pair,
        depth: usize,
    ) -> Result<OrderBook, ExchangeError> {
        let result = self
            .get_public(
                "/0/public/Depth",
                &[
                    ("pair", Self::wire_symbol(pair)),
                    ("count", depth.to_string()),
                ],
            )
            .await?;
        let entry = Self::pair_entry(&result)?;

        let parse_side = |key: &str| -> Vec<BookLevel> {
            entry
                .get(key)
                .and_then(|v| v.as_array())
                .map(|rows| {
                    rows.iter()
                        .filter_map(|row| {
                            let arr = row.as_array()?;
                            Some(BookLevel {
                                price: value_f64(arr.first()?),
                                quantity: value_f64(arr.get(1)?),
                            })
                        })
                        .collect()
                })
                .unwrap_or_default()
        };

        let mut bids = parse_side("bids");
        let mut asks = parse_side("asks");
        bids.sort_by(|a, b| b.price.total_cmp(&a.price));
        asks.sort_by(|a, b| a.price.total_cmp(&b.price));

        Ok(OrderBook { bids, asks })
    }

    #[instrument(skip(self), name = "kraken::get_balance")]
    async fn get_balance(&self) -> Result<HashMap<String, f64>, ExchangeError> {
        let result = self.post_private("/0/private/Balance", &[]).await?;

        let map = result
            .as_object()
            .ok_or_else(|| ExchangeError::Unknown("Balance result is not an object".into()))?;

        let mut balances = HashMap::new();
        for (asset, value) in map {
            let free = value_f64(value);
            if free > 0.0 {
                balances.insert(from_kraken_asset(asset), free);
            }
        }

        debug!(assets = balances.len(), "balances retrieved");
        Ok(balances)
    }

    #[instrument(skip(self, request), name = "kraken::place_order", fields(pair = %request.pair, side = %request.side))]
    async fn place_order(&self, request: &OrderRequest) -> Result<OrderResult, ExchangeError> {
        let mut params: Vec<(&str, String)> = vec![
            ("pair", Self::wire_symbol(&request.pair)),
            (
                "type",
                match request.side {
                    Side::Buy => "buy".to_string(),
                    Side::Sell => "sell".to_string(),
                },
            ),
            (
                "ordertype",
                match request.kind {
                    OrderKind::Market => "market".to_string(),
                    OrderKind::Limit => "limit".to_string(),
                },
            ),
            ("volume", format!("{:.10}", request.size)),
            ("cl_ord_id", request.request_id.clone()),
        ];

        // Market BUYs are sized in quote notional.
        if request.kind == OrderKind::Market && request.side == Side::Buy {
            params.push(("oflags", "viqc".to_string()));
        }
        if let Some(price) = request.price {
            params.push(("price", format!("{price:.10}")));
        }

        let result = self.post_private("/0/private/AddOrder", &params).await?;

        // AddOrder returns a txid list; the first element is canonical.
        let order_id = result
            .get("txid")
            .and_then(|v| v.as_array())
            .and_then(|arr| arr.first())
            .and_then(|v| v.as_str())
            .ok_or_else(|| ExchangeError::Unknown(format!("AddOrder missing txid: {result}")))?
            .to_string();

        debug!(order_id = %order_id, "order accepted");

        // AddOrder acknowledges without fill detail; follow up immediately so
        // callers see current fill state.
        match self.query_order(&order_id, &request.pair).await {
            Ok(state) => Ok(state),
            Err(e) => {
                warn!(order_id = %order_id, error = %e, "post-placement query failed");
                Ok(OrderResult {
                    order_id,
                    status: OrderStatus::Pending,
                    filled_base: 0.0,
                    filled_quote: 0.0,
                    average_price: 0.0,
                    fees: 0.0,
                    exchange_raw: result,
                })
            }
        }
    }

    #[instrument(skip(self), name = "kraken::query_order")]
    async fn query_order(
        &self,
        order_id: &str,
        _pair: &Pair,
    ) -> Result<OrderResult, ExchangeError> {
        let result = self
            .post_private("/0/private/QueryOrders", &[("txid", order_id.to_string())])
            .await?;

        let info = result
            .get(order_id)
            .ok_or_else(|| ExchangeError::NotFound(format!("order {order_id} not found")))?;

        Self::parse_order_info(order_id, info)
    }

    #[instrument(skip(self), name = "kraken::cancel_order")]
    async fn cancel_order(
        &self,
        order_id: &str,
        pair: &Pair,
    ) -> Result<OrderResult, ExchangeError> {
        self.post_private("/0/private/CancelOrder", &[("txid", order_id.to_string())])
            .await?;

        // Return the post-cancel state so partial fills are visible.
        match self.query_order(order_id, pair).await {
            Ok(state) => Ok(state),
            Err(_) => Ok(OrderResult {
                order_id: order_id.to_string(),
                status: OrderStatus::Canceled,
                filled_base: 0.0,
                filled_quote: 0.0,
                average_price: 0.0,
                fees: 0.0,
                exchange_raw: serde_json::Value::Null,
            }),
        }
    }

    #[instrument(skip(self), name = "kraken::get_exchange_info")]
    async fn get_exchange_info(&self, pair: &Pair) -> Result<PairFilters, ExchangeError> {
        if let Some(cached) = self.filters_cache.read().get(pair) {
            return Ok(*cached);
        }

        let result = self
            .get_public("/0/public/AssetPairs", &[("pair", Self::wire_symbol(pair))])
            .await?;
        let entry = Self::pair_entry(&result)?;

        let lot_decimals = entry
            .get("lot_decimals")
            .and_then(|v| v.as_u64())
            .unwrap_or(8);
        let pair_decimals = entry
            .get("pair_decimals")
            .and_then(|v| v.as_u64())
            .unwrap_or(2);
        let min_notional = entry
            .get("costmin")
            .map(value_f64)
            .filter(|v| *v > 0.0)
            .unwrap_or(10.0);

        let filters = PairFilters {
            step_size: 10f64.powi(-(lot_decimals as i32)),
            tick_size: 10f64.powi(-(pair_decimals as i32)),
            min_notional,
        };

        self.filters_cache.write().insert(pair.clone(), filters);
        debug!(pair = %pair, ?filters, "pair filters cached");
        Ok(filters)
    }

    #[instrument(skip(self), name = "kraken::get_listed_pairs")]
    async fn get_listed_pairs(&self, quote: &str) -> Result<Vec<Pair>, ExchangeError> {
        let result = self.get_public("/0/public/AssetPairs", &[]).await?;

        let map = result
            .as_object()
            .ok_or_else(|| ExchangeError::Unknown("AssetPairs result is not an object".into()))?;

        let quote = quote.to_uppercase();
        let mut pairs = Vec::new();
        for entry in map.values() {
            let Some(wsname) = entry.get("wsname").and_then(|v| v.as_str()) else {
                continue;
            };
            // wsname is "XBT/AUD" style.
            if let Some((base, q)) = wsname.split_once('/') {
                if q.eq_ignore_ascii_case(&quote) {
                    pairs.push(Pair::new(from_kraken_asset(base), &quote));
                }
            }
        }

        Ok(pairs)
    }
}

// ---------------------------------------------------------------------------
// Mapping helpers
// ---------------------------------------------------------------------------

/// Map Kraken error strings onto canonical kinds.
fn map_api_error(error: &str) -> ExchangeError {
    let msg = error.to_string();
    if error.contains("Rate limit") || error.contains("Too many requests") {
        ExchangeError::RateLimit(msg)
    } else if error.contains("Invalid key")
        || error.contains("Invalid signature")
        || error.contains("Invalid nonce")
        || error.contains("Permission denied")
    {
        ExchangeError::Auth(msg)
    } else if error.contains("Unknown asset") || error.contains("Unknown order") {
        ExchangeError::NotFound(msg)
    } else if error.contains("Insufficient funds")
        || error.contains("Invalid arguments")
        || error.contains("volume minimum not met")
        || error.contains("Order minimum not met")
    {
        ExchangeError::FilterRejected(msg)
    } else if error.contains("Service unavailable") || error.contains("Internal error") {
        ExchangeError::Network(msg)
    } else {
        ExchangeError::Unknown(msg)
    }
}

fn map_reqwest_error(e: reqwest::Error) -> ExchangeError {
    if e.is_timeout() || e.is_connect() {
        ExchangeError::Network(format!("request failed: {e}"))
    } else if let Some(status) = e.status() {
        match status.as_u16() {
            401 | 403 => ExchangeError::Auth(format!("HTTP {status}")),
            429 => ExchangeError::RateLimit(format!("HTTP {status}")),
            _ => ExchangeError::Network(format!("HTTP {status}")),
        }
    } else {
        ExchangeError::Network(format!("request failed: {e}"))
    }
}

/// Kraken uses `XBT` for Bitcoin.
fn to_kraken_asset(asset: &str) -> String {
    match asset {
        "BTC" => "XBT".to_string(),
        other => other.to_string(),
    }
}

/// Normalize a Kraken asset name (`XXBT`, `ZAUD`, `XBT`) to the canonical
/// form (`BTC`, `AUD`).
fn from_kraken_asset(asset: &str) -> String {
    let trimmed = if asset.len() > 3 && (asset.starts_with('X') || asset.starts_with('Z')) {
        &asset[1..]
    } else {
        asset
    };
    match trimmed {
        "XBT" => "BTC".to_string(),
        other => other.to_string(),
    }
}

/// Parse a JSON value that may be either a string or a number into `f64`.
fn value_f64(val: &serde_json::Value) -> f64 {
    if let Some(s) = val.as_str() {
        s.parse().unwrap_or(0.0)
    } else {
        val.as_f64().unwrap_or(0.0)
    }
}

fn field_f64(obj: &serde_json::Value, key: &str) -> f64 {
    obj.get(key).map(value_f64).unwrap_or(0.0)
}

/// First (or nth) element of a ticker array field, as f64.
fn array_head_f64(entry: &serde_json::Value, key: &str, index: usize) -> f64 {
    entry
        .get(key)
        .and_then(|v| v.as_array())
        .and_then(|arr| arr.get(index).or_else(|| arr.first()))
        .map(value_f64)
        .unwrap_or(0.0)
}

impl std::fmt::Debug for KrakenClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KrakenClient")
            .field("api_key", &"<redacted>")
            .field("secret", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn asset_mapping_round_trip() {
        assert_eq!(to_kraken_asset("BTC"), "XBT");
        assert_eq!(to_kraken_asset("ETH"), "ETH");
        assert_eq!(from_kraken_asset("XXBT"), "BTC");
        assert_eq!(from_kraken_asset("ZAUD"), "AUD");
        assert_eq!(from_kraken_asset("XBT"), "BTC");
        assert_eq!(from_kraken_asset("SOL"), "SOL");
    }

    #[test]
    fn wire_symbol_uses_kraken_names() {
        let pair = Pair::new("BTC", "AUD");
        assert_eq!(KrakenClient::wire_symbol(&pair), "XBTAUD");
        let pair = Pair::new("ETH", "AUD");
        assert_eq!(KrakenClient::wire_symbol(&pair), "ETHAUD");
    }

    #[test]
    fn api_error_mapping() {
        assert!(matches!(
            map_api_error("EAPI:Rate limit exceeded"),
            ExchangeError::RateLimit(_)
        ));
        assert!(matches!(
            map_api_error("EAPI:Invalid key"),
            ExchangeError::Auth(_)
        ));
        assert!(matches!(
            map_api_error("EQuery:Unknown asset pair"),
            ExchangeError::NotFound(_)
        ));
        assert!(matches!(
            map_api_error("EOrder:Insufficient funds"),
            ExchangeError::FilterRejected(_)
        ));
        assert!(matches!(
            map_api_error("ESomething:Else entirely"),
            ExchangeError::Unknown(_)
        ));
    }

    #[test]
    fn order_status_normalization() {
        let info = serde_json::json!({
            "status": "open",
            "vol_exec": "0.5",
            "cost": "25000.0",
            "fee": "40.0",
            "price": "50000.0",
        });
        let result = KrakenClient::parse_order_info("OABC-123", &info).unwrap();
        assert_eq!(result.status, OrderStatus::Partial);
        assert!((result.filled_base - 0.5).abs() < 1e-12);
        assert!((result.average_price - 50000.0).abs() < 1e-12);

        let closed = serde_json::json!({ "status": "closed", "vol_exec": "1.0" });
        let result = KrakenClient::parse_order_info("OABC-123", &closed).unwrap();
        assert_eq!(result.status, OrderStatus::Filled);

        let canceled = serde_json::json!({ "status": "canceled" });
        let result = KrakenClient::parse_order_info("OABC-123", &canceled).unwrap();
        assert_eq!(result.status, OrderStatus::Canceled);
    }

    #[test]
    fn nonce_is_strictly_increasing() {
        let client = KrakenClient::new("key", "secret");
        let a = client.next_nonce();
        let b = client.next_nonce();
        let c = client.next_nonce();
        assert!(b > a);
        assert!(c > b);
    }

    #[test]
    fn sign_is_deterministic_for_same_input() {
        // Secret must be valid base64.
        let secret = base64::engine::general_purpose::STANDARD.encode(b"super-secret-key");
        let client = KrakenClient::new("key", secret);
        let s1 = client.sign("/0/private/Balance", 1700000000000, "nonce=1700000000000");
        let s2 = client.sign("/0/private/Balance", 1700000000000, "nonce=1700000000000");
        assert_eq!(s1.unwrap(), s2.unwrap());
    }
}
