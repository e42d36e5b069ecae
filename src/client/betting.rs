//! Market discovery, price retrieval, and order placement.
//!
//! All calls go through the JSON-RPC transport and its retry ladder.
//! The exchange is strict about wire types on `placeOrders`: selection id
//! as integer, size and price as numbers. Strings are silently rejected.

use crate::client::RpcTransport;
use crate::error::{EngineError, Result};
use crate::types::{
    snap_to_tick, BookRunner, ClearedBet, Market, MarketBook, MarketBookFull, MarketStatus,
    OrderAck, AckStatus, PriceLevel, Runner, RunnerDepth,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;

const EVENT_TYPE_HORSE_RACING: &str = "7";
const MAX_CATALOGUE_RESULTS: u32 = 200;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarketCatalogue {
    market_id: String,
    #[serde(default)]
    market_name: Option<String>,
    #[serde(default)]
    market_start_time: Option<String>,
    #[serde(default)]
    event: Option<EventInfo>,
    #[serde(default)]
    runners: Vec<RunnerCatalogue>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventInfo {
    #[serde(default)]
    venue: Option<String>,
    #[serde(default)]
    country_code: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunnerCatalogue {
    selection_id: i64,
    #[serde(default)]
    runner_name: Option<String>,
    #[serde(default)]
    sort_priority: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarketBookWire {
    market_id: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    in_play: Option<bool>,
    #[serde(default)]
    runners: Vec<RunnerBookWire>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunnerBookWire {
    selection_id: i64,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    last_price_traded: Option<Decimal>,
    #[serde(default)]
    ex: Option<ExchangePricesWire>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExchangePricesWire {
    #[serde(default)]
    available_to_back: Vec<PriceSizeWire>,
    #[serde(default)]
    available_to_lay: Vec<PriceSizeWire>,
}

#[derive(Debug, Deserialize)]
struct PriceSizeWire {
    price: Decimal,
    size: Decimal,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaceExecutionReport {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    instruction_reports: Vec<InstructionReport>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstructionReport {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    bet_id: Option<String>,
    #[serde(default)]
    size_matched: Option<Decimal>,
    #[serde(default)]
    average_price_matched: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClearedOrderSummaryReport {
    #[serde(default)]
    cleared_orders: Vec<ClearedOrderWire>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClearedOrderWire {
    #[serde(default)]
    bet_id: Option<String>,
    #[serde(default)]
    market_id: Option<String>,
    #[serde(default)]
    selection_id: Option<i64>,
    #[serde(default)]
    bet_outcome: Option<String>,
    #[serde(default)]
    size_settled: Option<Decimal>,
    #[serde(default)]
    price_matched: Option<Decimal>,
    #[serde(default)]
    commission: Option<Decimal>,
    #[serde(default)]
    settled_date: Option<String>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct BettingClient {
    rpc: RpcTransport,
}

impl BettingClient {
    pub fn new(rpc: RpcTransport) -> Self {
        Self { rpc }
    }

    /// All horse-racing WIN markets starting inside `[from, to)` for the
    /// given country set. Runner metadata only, no prices. Sorted by
    /// race time ascending.
    pub async fn list_win_markets(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        countries: &[String],
    ) -> Result<Vec<Market>> {
        let params = serde_json::json!({
            "filter": {
                "eventTypeIds": [EVENT_TYPE_HORSE_RACING],
                "marketCountries": countries,
                "marketTypeCodes": ["WIN"],
                "marketStartTime": {
                    "from": from.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
                    "to": to.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
                },
            },
            "maxResults": MAX_CATALOGUE_RESULTS.to_string(),
            "marketProjection": ["EVENT", "RUNNER_DESCRIPTION", "MARKET_START_TIME"],
            "sort": "FIRST_TO_START",
        });

        let catalogues: Vec<MarketCatalogue> = match self
            .rpc
            .call("SportsAPING/v1.0/listMarketCatalogue", params)
            .await
        {
            Ok(c) => c,
            Err(e @ EngineError::Malformed(_)) => {
                tracing::warn!(error = %e, "malformed market catalogue, treating as empty");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };

        let mut markets: Vec<Market> = catalogues
            .into_iter()
            .filter_map(|c| {
                let race_time = c
                    .market_start_time
                    .as_deref()
                    .and_then(|s| DateTime::parse_from_rfc3339(&s.replace('Z', "+00:00")).ok())
                    .map(|dt| dt.with_timezone(&Utc))?;
                let event = c.event.unwrap_or(EventInfo {
                    venue: None,
                    country_code: None,
                });
                Some(Market {
                    market_id: c.market_id,
                    market_name: c.market_name.unwrap_or_default(),
                    venue: event.venue.unwrap_or_else(|| "Unknown".to_string()),
                    country: event.country_code.unwrap_or_default(),
                    race_time,
                    status: MarketStatus::Open,
                    in_play: false,
                    runners: c
                        .runners
                        .into_iter()
                        .map(|r| Runner {
                            name: r
                                .runner_name
                                .unwrap_or_else(|| format!("Selection {}", r.selection_id)),
                            selection_id: r.selection_id,
                            sort_priority: r.sort_priority.unwrap_or(99),
                            best_available_to_lay: None,
                            best_available_to_back: None,
                            last_price_traded: None,
                        })
                        .collect(),
                })
            })
            .collect();

        markets.sort_by(|a, b| a.race_time.cmp(&b.race_time).then(a.market_id.cmp(&b.market_id)));
        tracing::info!(count = markets.len(), "win markets discovered");
        Ok(markets)
    }

    /// Best lay, best back, and last traded price for every runner.
    pub async fn get_book(&self, market_id: &str) -> Result<MarketBook> {
        let wire = self.fetch_book(market_id).await?;
        Ok(Self::convert_book(wire))
    }

    /// Same as [`get_book`] plus up to `depth` price levels each side.
    pub async fn get_book_full(&self, market_id: &str, depth: usize) -> Result<MarketBookFull> {
        let wire = self.fetch_book(market_id).await?;
        let depth_levels = wire
            .runners
            .iter()
            .map(|r| {
                let (lay, back) = match &r.ex {
                    Some(ex) => (
                        levels(&ex.available_to_lay, depth),
                        levels(&ex.available_to_back, depth),
                    ),
                    None => (Vec::new(), Vec::new()),
                };
                RunnerDepth {
                    selection_id: r.selection_id,
                    available_to_lay: lay,
                    available_to_back: back,
                }
            })
            .collect();
        Ok(MarketBookFull {
            book: Self::convert_book(wire),
            depth: depth_levels,
        })
    }

    async fn fetch_book(&self, market_id: &str) -> Result<MarketBookWire> {
        let params = serde_json::json!({
            "marketIds": [market_id],
            "priceProjection": {
                "priceData": ["EX_BEST_OFFERS"],
                "exBestOffersOverrides": { "bestPricesDepth": 3 },
                "virtualise": true,
                "rolloverStakes": true,
            },
        });

        let books: Vec<MarketBookWire> = self
            .rpc
            .call("SportsAPING/v1.0/listMarketBook", params)
            .await?;
        books
            .into_iter()
            .next()
            .ok_or_else(|| EngineError::Malformed(format!("no book returned for {market_id}")))
    }

    fn convert_book(wire: MarketBookWire) -> MarketBook {
        let status = match wire.status.as_deref() {
            Some("SUSPENDED") => MarketStatus::Suspended,
            Some("CLOSED") => MarketStatus::Closed,
            _ => MarketStatus::Open,
        };
        MarketBook {
            market_id: wire.market_id,
            status,
            in_play: wire.in_play.unwrap_or(false),
            runners: wire
                .runners
                .into_iter()
                .filter(|r| r.status.as_deref().unwrap_or("ACTIVE") == "ACTIVE")
                .map(|r| {
                    let (lay, back) = match &r.ex {
                        Some(ex) => (
                            ex.available_to_lay.first().map(|p| p.price),
                            ex.available_to_back.first().map(|p| p.price),
                        ),
                        None => (None, None),
                    };
                    BookRunner {
                        selection_id: r.selection_id,
                        best_available_to_lay: lay,
                        best_available_to_back: back,
                        last_price_traded: r.last_price_traded,
                    }
                })
                .collect(),
        }
    }

    /// Place a single LAY limit order. Price is snapped onto the exchange
    /// tick grid before submission.
    pub async fn submit_lay(
        &self,
        market_id: &str,
        selection_id: i64,
        size: Decimal,
        price: Decimal,
        handicap: i32,
    ) -> Result<OrderAck> {
        let params = serde_json::json!({
            "marketId": market_id,
            "instructions": [{
                "selectionId": selection_id,
                "handicap": handicap,
                "side": "LAY",
                "orderType": "LIMIT",
                "limitOrder": {
                    "size": decimal_number(size.round_dp(2)),
                    "price": decimal_number(snap_to_tick(price)),
                    "persistenceType": "LAPSE",
                },
            }],
        });

        let report: PlaceExecutionReport = self
            .rpc
            .call("SportsAPING/v1.0/placeOrders", params)
            .await?;

        if report.status.as_deref() != Some("SUCCESS") {
            let code = report
                .instruction_reports
                .first()
                .and_then(|r| r.error_code.clone())
                .or(report.error_code)
                .unwrap_or_else(|| "UNKNOWN".to_string());
            return Ok(OrderAck::failure(code));
        }

        let instruction = report
            .instruction_reports
            .into_iter()
            .next()
            .ok_or_else(|| EngineError::Malformed("placeOrders: empty instruction report".into()))?;

        if instruction.status.as_deref() == Some("SUCCESS") {
            Ok(OrderAck {
                status: AckStatus::Success,
                bet_id: instruction.bet_id,
                size_matched: instruction.size_matched,
                avg_price_matched: instruction.average_price_matched,
                error_code: None,
            })
        } else {
            Ok(OrderAck::failure(
                instruction.error_code.unwrap_or_else(|| "UNKNOWN".to_string()),
            ))
        }
    }

    /// Settled bets in the given date range, win/loss outcome included.
    pub async fn list_cleared(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ClearedBet>> {
        let params = serde_json::json!({
            "betStatus": "SETTLED",
            "settledDateRange": {
                "from": from.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
                "to": to.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            },
            "includeItemDescription": false,
        });

        let report: ClearedOrderSummaryReport = match self
            .rpc
            .call("SportsAPING/v1.0/listClearedOrders", params)
            .await
        {
            Ok(r) => r,
            Err(e @ EngineError::Malformed(_)) => {
                tracing::warn!(error = %e, "malformed cleared orders, treating as empty");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };

        Ok(report
            .cleared_orders
            .into_iter()
            .filter_map(|o| {
                Some(ClearedBet {
                    bet_id: o.bet_id?,
                    market_id: o.market_id?,
                    selection_id: o.selection_id?,
                    outcome: o.bet_outcome.unwrap_or_else(|| "UNKNOWN".to_string()),
                    size_settled: o.size_settled.unwrap_or(Decimal::ZERO),
                    avg_price_matched: o.price_matched.unwrap_or(Decimal::ZERO),
                    commission: o.commission.unwrap_or(Decimal::ZERO),
                    settled_at: o
                        .settled_date
                        .as_deref()
                        .and_then(|s| DateTime::parse_from_rfc3339(&s.replace('Z', "+00:00")).ok())
                        .map(|dt| dt.with_timezone(&Utc))?,
                })
            })
            .collect())
    }
}

fn levels(wire: &[PriceSizeWire], depth: usize) -> Vec<PriceLevel> {
    wire.iter()
        .take(depth)
        .map(|p| PriceLevel {
            price: p.price,
            size: p.size,
        })
        .collect()
}

/// The exchange rejects stringly-typed numbers, so order fields go out as
/// JSON numbers.
fn decimal_number(d: Decimal) -> serde_json::Value {
    use rust_decimal::prelude::ToPrimitive;
    serde_json::Number::from_f64(d.to_f64().unwrap_or(0.0))
        .map(serde_json::Value::Number)
        .unwrap_or(serde_json::Value::Null)
}
