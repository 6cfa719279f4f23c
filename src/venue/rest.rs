//! REST adapter for a KRW-quoted spot exchange.
//!
//! Public endpoints (ticker, order book, candles) are plain GETs retried with
//! exponential backoff. Private endpoints (balance, order placement) are
//! HMAC-SHA512 signed form POSTs and are never retried here.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use base64::Engine as _;
use chrono::{TimeZone, Utc};
use hmac::{Hmac, Mac};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha512;
use tracing::{debug, warn};

use super::{Balance, OrderAck, Quote, RawOrderBook, Venue};
use crate::error::{EngineError, EngineResult};
use crate::indicators::Bar;
use crate::models::{BookLevel, OrderSide, Timeframe};

const API_BASE: &str = "https://api.bithumb.com";
const QUOTE_CURRENCY: &str = "KRW";
const STATUS_OK: &str = "0000";

type HmacSha512 = Hmac<Sha512>;

/// API key pair for private endpoints.
#[derive(Clone)]
pub struct Credentials {
    pub api_key: String,
    pub api_secret: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"***")
            .field("api_secret", &"***")
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    order_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TickerData {
    closing_price: String,
    #[serde(rename = "units_traded_24H", default)]
    units_traded_24h: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LevelData {
    price: String,
    quantity: String,
}

#[derive(Debug, Deserialize)]
struct OrderBookData {
    #[serde(default)]
    bids: Vec<LevelData>,
    #[serde(default)]
    asks: Vec<LevelData>,
}

pub struct RestVenue {
    client: Client,
    base_url: String,
    credentials: Option<Credentials>,
    retry_window: Duration,
}

impl RestVenue {
    pub fn new(credentials: Option<Credentials>, timeout: Duration) -> EngineResult<Self> {
        Self::with_base_url(API_BASE.to_string(), credentials, timeout)
    }

    /// Create with custom base URL (for testing).
    pub fn with_base_url(
        base_url: String,
        credentials: Option<Credentials>,
        timeout: Duration,
    ) -> EngineResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(EngineError::venue)?;

        Ok(Self {
            client,
            base_url,
            credentials,
            retry_window: timeout,
        })
    }

    /// GET a public endpoint, retrying transient failures inside the retry window.
    async fn public_get(&self, endpoint: &str) -> EngineResult<Value> {
        let url = format!("{}{}", self.base_url, endpoint);
        let url = url.as_str();
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(200))
            .with_max_elapsed_time(Some(self.retry_window))
            .build();

        let envelope = backoff::future::retry(policy, || async move {
            debug!(url = %url, "GET");
            let response = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|e| backoff::Error::transient(EngineError::from(e)))?;

            let status = response.status();
            if status.is_server_error() || status.as_u16() == 429 {
                return Err(backoff::Error::transient(EngineError::Venue(format!(
                    "{} returned {}",
                    endpoint, status
                ))));
            }
            if !status.is_success() {
                return Err(backoff::Error::permanent(EngineError::Venue(format!(
                    "{} returned {}",
                    endpoint, status
                ))));
            }

            response
                .json::<Envelope>()
                .await
                .map_err(|e| backoff::Error::permanent(EngineError::from(e)))
        })
        .await?;

        Self::unwrap_envelope(endpoint, envelope)
    }

    /// POST a signed request to a private endpoint.
    async fn private_post(&self, endpoint: &str, params: Vec<(&str, String)>) -> EngineResult<Envelope> {
        let creds = self
            .credentials
            .as_ref()
            .ok_or_else(|| EngineError::FatalConfiguration("private endpoint requires API credentials".into()))?;

        let mut params = params;
        params.insert(0, ("endpoint", endpoint.to_string()));
        let body = serde_urlencoded::to_string(&params).map_err(EngineError::venue)?;
        let nonce = Utc::now().timestamp_millis().to_string();
        let signature = sign(&creds.api_secret, endpoint, &body, &nonce)?;

        let response = self
            .client
            .post(format!("{}{}", self.base_url, endpoint))
            .header("Api-Key", &creds.api_key)
            .header("Api-Sign", signature)
            .header("Api-Nonce", nonce)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(EngineError::Venue(format!("{} returned {}: {}", endpoint, status, text)));
        }

        let envelope: Envelope = response.json().await?;
        if envelope.status != STATUS_OK {
            return Err(EngineError::Venue(format!(
                "{} failed with status {}: {}",
                endpoint,
                envelope.status,
                envelope.message.unwrap_or_default()
            )));
        }
        Ok(envelope)
    }

    fn unwrap_envelope(endpoint: &str, envelope: Envelope) -> EngineResult<Value> {
        if envelope.status != STATUS_OK {
            return Err(EngineError::Venue(format!(
                "{} failed with status {}: {}",
                endpoint,
                envelope.status,
                envelope.message.unwrap_or_default()
            )));
        }
        Ok(envelope.data)
    }
}

/// Api-Sign header: base64(hex(HMAC-SHA512(endpoint \0 body \0 nonce))).
fn sign(secret: &str, endpoint: &str, body: &str, nonce: &str) -> EngineResult<String> {
    let mut mac = HmacSha512::new_from_slice(secret.as_bytes())
        .map_err(|e| EngineError::FatalConfiguration(format!("invalid API secret: {}", e)))?;
    let message = format!("{}\0{}\0{}", endpoint, body, nonce);
    mac.update(message.as_bytes());
    let digest = hex::encode(mac.finalize().into_bytes());
    Ok(base64::engine::general_purpose::STANDARD.encode(digest))
}

fn parse_decimal(field: &str, raw: &str) -> EngineResult<Decimal> {
    Decimal::from_str(raw.trim())
        .or_else(|_| Decimal::from_scientific(raw.trim()))
        .map_err(|e| EngineError::Venue(format!("bad {} '{}': {}", field, raw, e)))
}

fn value_to_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn parse_levels(levels: Vec<LevelData>) -> EngineResult<Vec<BookLevel>> {
    levels
        .into_iter()
        .map(|l| {
            Ok(BookLevel::new(
                parse_decimal("price", &l.price)?,
                parse_decimal("quantity", &l.quantity)?,
            ))
        })
        .collect()
}

/// Candle rows are `[ts_ms, open, close, high, low, volume]`.
fn parse_candles(data: Value) -> Vec<Bar> {
    let rows = match data {
        Value::Array(rows) => rows,
        _ => return Vec::new(),
    };

    rows.iter()
        .filter_map(|row| {
            let cols = row.as_array()?;
            if cols.len() < 6 {
                return None;
            }
            let ts = cols[0].as_i64().or_else(|| value_to_f64(&cols[0]).map(|v| v as i64))?;
            Some(Bar {
                start: Utc.timestamp_millis_opt(ts).single()?,
                open: value_to_f64(&cols[1])?,
                close: value_to_f64(&cols[2])?,
                high: value_to_f64(&cols[3])?,
                low: value_to_f64(&cols[4])?,
                volume: value_to_f64(&cols[5])?,
            })
        })
        .collect()
}

#[async_trait]
impl Venue for RestVenue {
    async fn get_quote(&self, instrument: &str) -> EngineResult<Quote> {
        let endpoint = format!("/public/ticker/{}_{}", instrument, QUOTE_CURRENCY);
        let data = self.public_get(&endpoint).await?;
        let ticker: TickerData = serde_json::from_value(data).map_err(EngineError::venue)?;

        Ok(Quote {
            price: parse_decimal("closing_price", &ticker.closing_price)?,
            volume_24h: match ticker.units_traded_24h {
                Some(v) => parse_decimal("units_traded_24H", &v)?,
                None => Decimal::ZERO,
            },
        })
    }

    async fn get_orderbook(&self, instrument: &str) -> EngineResult<RawOrderBook> {
        let endpoint = format!("/public/orderbook/{}_{}", instrument, QUOTE_CURRENCY);
        let data = self.public_get(&endpoint).await?;
        let book: OrderBookData = serde_json::from_value(data).map_err(EngineError::venue)?;

        Ok(RawOrderBook {
            bids: parse_levels(book.bids)?,
            asks: parse_levels(book.asks)?,
        })
    }

    async fn place_order(
        &self,
        instrument: &str,
        side: OrderSide,
        quantity: Decimal,
        price: Option<Decimal>,
    ) -> EngineResult<OrderAck> {
        let order_type = match side {
            OrderSide::Buy => "bid",
            OrderSide::Sell => "ask",
        };
        let mut params = vec![
            ("order_currency", instrument.to_string()),
            ("payment_currency", QUOTE_CURRENCY.to_string()),
            ("units", quantity.round_dp(8).normalize().to_string()),
            ("type", order_type.to_string()),
        ];
        if let Some(p) = price {
            params.push(("price", p.round_dp(0).to_string()));
        }

        let envelope = self.private_post("/trade/place", params).await?;
        let order_id = envelope
            .order_id
            .ok_or_else(|| EngineError::Venue("order accepted without order_id".into()))?;

        Ok(OrderAck {
            order_id,
            status: envelope.status,
        })
    }

    async fn get_balance(&self) -> EngineResult<Balance> {
        let envelope = self
            .private_post("/info/balance", vec![("currency", "ALL".to_string())])
            .await?;

        let fields = match envelope.data {
            Value::Object(map) => map,
            other => {
                return Err(EngineError::Venue(format!("unexpected balance payload: {}", other)));
            }
        };

        let mut available = Decimal::ZERO;
        let mut holdings = HashMap::new();
        for (key, value) in fields {
            let raw = match &value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                _ => continue,
            };
            let amount = match parse_decimal(&key, &raw) {
                Ok(a) => a,
                Err(e) => {
                    warn!(field = %key, error = %e, "Skipping unparsable balance field");
                    continue;
                }
            };

            if key == "available_krw" {
                available = amount;
            } else if let Some(asset) = key.strip_prefix("total_") {
                if asset != "krw" {
                    holdings.insert(asset.to_uppercase(), amount);
                }
            }
        }

        Ok(Balance { available, holdings })
    }

    async fn get_candles(&self, instrument: &str, timeframe: Timeframe) -> EngineResult<Vec<Bar>> {
        let endpoint = format!(
            "/public/candlestick/{}_{}/{}",
            instrument,
            QUOTE_CURRENCY,
            timeframe.as_str()
        );
        let data = self.public_get(&endpoint).await?;
        Ok(parse_candles(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_sign_is_deterministic_base64() {
        let a = sign("secret", "/info/balance", "endpoint=%2Finfo%2Fbalance", "1").unwrap();
        let b = sign("secret", "/info/balance", "endpoint=%2Finfo%2Fbalance", "1").unwrap();
        let c = sign("secret", "/info/balance", "endpoint=%2Finfo%2Fbalance", "2").unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
        // base64 of a 128-char hex digest
        assert_eq!(a.len(), 172);
    }

    #[test]
    fn test_parse_candles_skips_malformed_rows() {
        let data = json!([
            [1700000000000i64, "100", "101", "102", "99", "12.5"],
            ["bad"],
            [1700000060000i64, "101", "103", "104", "100", "8"]
        ]);
        let bars = parse_candles(data);

        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].close, 101.0);
        assert_eq!(bars[1].high, 104.0);
    }

    #[test]
    fn test_parse_decimal_accepts_exchange_strings() {
        assert_eq!(parse_decimal("p", "50000000").unwrap(), dec!(50000000));
        assert_eq!(parse_decimal("q", " 0.00012 ").unwrap(), dec!(0.00012));
        assert!(parse_decimal("q", "n/a").is_err());
    }

    #[test]
    fn test_envelope_error_status() {
        let env = Envelope {
            status: "5600".into(),
            message: Some("bad request".into()),
            data: Value::Null,
            order_id: None,
        };
        assert!(RestVenue::unwrap_envelope("/public/ticker/BTC_KRW", env).is_err());
    }
}
