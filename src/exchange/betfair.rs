//! Betfair Exchange client.
//!
//! Real-money betting exchange (JSON over REST). Horse racing WIN markets
//! use decimal odds and a back/lay order model; this bot only backs.
//!
//! API docs: https://docs.developer.betfair.com/display/1smk3cen4v3lu3yomq5qye0ni/API+Overview
//! Auth requires an App Key plus a session token from username/password SSO
//! login. Headers: `X-Application: {app_key}`, `X-Authentication: {token}`.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{MarketBook, MarketClient, MarketRef, RunnerPrice};
use crate::config::ExchangeConfig;
use crate::error::BotError;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Betfair event type id for horse racing.
const HORSE_RACING_EVENT_TYPE: &str = "7";

/// Catalogue search half-width around the scheduled off. Exchange market
/// start times occasionally differ from the card by a few minutes.
const OFF_TIME_SLACK_MINS: i64 = 15;

/// Maximum catalogue entries per lookup.
const CATALOGUE_FETCH_LIMIT: u32 = 50;

// ---------------------------------------------------------------------------
// Betfair API types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct LoginResponse {
    #[serde(rename = "sessionToken")]
    session_token: Option<String>,
    #[serde(rename = "loginStatus")]
    login_status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarketCatalogue {
    market_id: String,
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
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunnerCatalogue {
    selection_id: u64,
    runner_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiMarketBook {
    market_id: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    total_matched: Option<f64>,
    #[serde(default)]
    runners: Vec<RunnerBook>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunnerBook {
    selection_id: u64,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    ex: Option<ExchangePrices>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExchangePrices {
    #[serde(default)]
    available_to_back: Vec<PriceSize>,
}

#[derive(Debug, Deserialize, Serialize)]
struct PriceSize {
    price: f64,
    size: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaceOrdersResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    instruction_reports: Vec<InstructionReport>,
    #[serde(default)]
    error_code: Option<String>,
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
    average_price_matched: Option<f64>,
    #[serde(default)]
    size_matched: Option<f64>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Betfair exchange client. One per process; the session token is shared
/// behind a lock and refreshed on 401.
pub struct BetfairClient {
    http: Client,
    app_key: String,
    username: String,
    password: String,
    api_endpoint: String,
    login_endpoint: String,
    session_token: std::sync::RwLock<Option<String>>,
}

impl BetfairClient {
    /// Build a client from the exchange config, resolving credentials from
    /// the environment variables the config names.
    pub fn from_config(cfg: &ExchangeConfig) -> Result<Self, BotError> {
        let app_key = std::env::var(&cfg.app_key_env)
            .map_err(|_| BotError::Auth(format!("{} not set", cfg.app_key_env)))?;
        let username = std::env::var(&cfg.username_env)
            .map_err(|_| BotError::Auth(format!("{} not set", cfg.username_env)))?;
        let password = std::env::var(&cfg.password_env)
            .map_err(|_| BotError::Auth(format!("{} not set", cfg.password_env)))?;

        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(cfg.timeout_secs))
            .user_agent("paddock/0.1.0")
            .build()?;

        Ok(Self {
            http,
            app_key,
            username,
            password,
            api_endpoint: cfg.api_endpoint.clone(),
            login_endpoint: cfg.login_endpoint.clone(),
            session_token: std::sync::RwLock::new(None),
        })
    }

    fn token(&self) -> Option<String> {
        match self.session_token.read() {
            Ok(guard) => guard.clone(),
            Err(_) => None,
        }
    }

    fn set_token(&self, token: Option<String>) {
        if let Ok(mut guard) = self.session_token.write() {
            *guard = token;
        }
    }

    async fn ensure_session(&self) -> Result<String, BotError> {
        if let Some(token) = self.token() {
            return Ok(token);
        }
        self.login().await?;
        self.token()
            .ok_or_else(|| BotError::Auth("session token missing after login".into()))
    }

    /// Authenticated POST to the Betting API. Retries once on an expired
    /// session (401).
    async fn betting_api<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        body: &serde_json::Value,
    ) -> Result<T, BotError> {
        let url = format!("{}/{endpoint}/", self.api_endpoint);

        for attempt in 0..2 {
            let token = self.ensure_session().await?;
            debug!(url = %url, attempt, "Betfair API request");

            let resp = self
                .http
                .post(&url)
                .header("X-Application", &self.app_key)
                .header("X-Authentication", &token)
                .header("Content-Type", "application/json")
                .json(body)
                .send()
                .await?;

            if resp.status() == reqwest::StatusCode::UNAUTHORIZED && attempt == 0 {
                warn!("Betfair session expired, re-authenticating");
                self.set_token(None);
                continue;
            }

            if !resp.status().is_success() {
                let status = resp.status();
                let text = resp.text().await.unwrap_or_default();
                return Err(BotError::OddsUnavailable {
                    market_id: endpoint.to_string(),
                    detail: format!("HTTP {status}: {text}"),
                });
            }

            return Ok(resp.json().await?);
        }

        Err(BotError::Auth("session refresh failed".into()))
    }

    /// Case-insensitive runner match, ignoring the saddle-cloth prefix
    /// Betfair sometimes includes ("3. Thunder Run").
    fn runner_matches(runner_name: &str, horse: &str) -> bool {
        let name = runner_name
            .split_once(". ")
            .map(|(prefix, rest)| {
                if prefix.chars().all(|c| c.is_ascii_digit()) {
                    rest
                } else {
                    runner_name
                }
            })
            .unwrap_or(runner_name);
        name.trim().eq_ignore_ascii_case(horse.trim())
    }

    fn venue_matches(event: &EventInfo, course: &str) -> bool {
        let course = course.trim();
        if let Some(venue) = event.venue.as_deref() {
            if venue.trim().eq_ignore_ascii_case(course) {
                return true;
            }
        }
        // Event names read like "Ascot 27th Aug"; fall back to a prefix match.
        event
            .name
            .as_deref()
            .map(|n| n.trim().to_lowercase().starts_with(&course.to_lowercase()))
            .unwrap_or(false)
    }
}

// ---------------------------------------------------------------------------
// MarketClient implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl MarketClient for BetfairClient {
    async fn login(&self) -> Result<(), BotError> {
        info!("Authenticating with Betfair");

        let resp = self
            .http
            .post(&self.login_endpoint)
            .header("X-Application", &self.app_key)
            .header("Accept", "application/json")
            .form(&[
                ("username", self.username.as_str()),
                ("password", self.password.as_str()),
            ])
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            return Err(BotError::Auth(format!("login failed: HTTP {status}")));
        }

        let login: LoginResponse = resp.json().await?;
        if login.login_status != "SUCCESS" {
            return Err(BotError::Auth(format!(
                "login rejected: {}",
                login.login_status
            )));
        }

        let token = login
            .session_token
            .ok_or_else(|| BotError::Auth("login succeeded but no session token".into()))?;
        self.set_token(Some(token));

        info!("Betfair authentication successful");
        Ok(())
    }

    async fn logout(&self) -> Result<(), BotError> {
        // Dropping the token ends our use of the session; Betfair expires
        // it server-side.
        self.set_token(None);
        info!("Betfair session released");
        Ok(())
    }

    async fn find_market(
        &self,
        course: &str,
        horse: &str,
        off_time: NaiveDateTime,
    ) -> Result<MarketRef, BotError> {
        let race = format!("{} {}", off_time.format("%H:%M"), course);
        let slack = chrono::Duration::minutes(OFF_TIME_SLACK_MINS);
        let from = (off_time - slack).format("%Y-%m-%dT%H:%M:%SZ").to_string();
        let to = (off_time + slack).format("%Y-%m-%dT%H:%M:%SZ").to_string();

        let body = serde_json::json!({
            "filter": {
                "eventTypeIds": [HORSE_RACING_EVENT_TYPE],
                "marketTypeCodes": ["WIN"],
                "marketStartTime": { "from": from, "to": to }
            },
            "maxResults": CATALOGUE_FETCH_LIMIT,
            "marketProjection": ["EVENT", "RUNNER_DESCRIPTION", "MARKET_START_TIME"]
        });

        let catalogues: Vec<MarketCatalogue> =
            self.betting_api("listMarketCatalogue", &body).await?;

        for catalogue in &catalogues {
            let venue_ok = catalogue
                .event
                .as_ref()
                .map(|e| Self::venue_matches(e, course))
                .unwrap_or(false);
            if !venue_ok {
                continue;
            }
            if let Some(runner) = catalogue
                .runners
                .iter()
                .find(|r| Self::runner_matches(&r.runner_name, horse))
            {
                debug!(
                    market_id = %catalogue.market_id,
                    selection_id = runner.selection_id,
                    horse = %horse,
                    "Market resolved"
                );
                return Ok(MarketRef {
                    market_id: catalogue.market_id.clone(),
                    selection_id: runner.selection_id.to_string(),
                });
            }
        }

        Err(BotError::MarketLookup {
            race,
            detail: format!(
                "no WIN market with runner '{horse}' among {} catalogues",
                catalogues.len()
            ),
        })
    }

    async fn market_book(&self, market_id: &str) -> Result<MarketBook, BotError> {
        let body = serde_json::json!({
            "marketIds": [market_id],
            "priceProjection": { "priceData": ["EX_BEST_OFFERS"], "virtualise": true }
        });

        let books: Vec<ApiMarketBook> = self.betting_api("listMarketBook", &body).await?;
        let book = books
            .into_iter()
            .find(|b| b.market_id == market_id)
            .ok_or_else(|| BotError::OddsUnavailable {
                market_id: market_id.to_string(),
                detail: "market not in listMarketBook response".into(),
            })?;

        if book.status.as_deref() == Some("CLOSED") {
            return Err(BotError::OddsUnavailable {
                market_id: market_id.to_string(),
                detail: "market closed".into(),
            });
        }

        let runners = book
            .runners
            .iter()
            .filter(|r| r.status.as_deref().map(|s| s == "ACTIVE").unwrap_or(true))
            .map(|r| {
                let best = r
                    .ex
                    .as_ref()
                    .and_then(|ex| ex.available_to_back.first());
                RunnerPrice {
                    selection_id: r.selection_id.to_string(),
                    back_odds: best.map(|p| p.price),
                    available_gbp: best.map(|p| p.size).unwrap_or(0.0),
                }
            })
            .collect();

        Ok(MarketBook {
            market_id: book.market_id,
            total_matched_gbp: book.total_matched.unwrap_or(0.0),
            runners,
        })
    }

    async fn place_back_bet(
        &self,
        market_id: &str,
        selection_id: &str,
        odds: f64,
        stake_gbp: f64,
    ) -> Result<String, BotError> {
        let selection: u64 = selection_id.parse().map_err(|_| BotError::Placement {
            market_id: market_id.to_string(),
            detail: format!("non-numeric selection id '{selection_id}'"),
        })?;

        let body = serde_json::json!({
            "marketId": market_id,
            "instructions": [{
                "orderType": "LIMIT",
                "selectionId": selection,
                "side": "BACK",
                "limitOrder": {
                    "size": (stake_gbp * 100.0).round() / 100.0,
                    "price": odds,
                    "persistenceType": "LAPSE"
                }
            }]
        });

        let resp: PlaceOrdersResponse = self.betting_api("placeOrders", &body).await?;

        if let Some(code) = resp.error_code {
            return Err(BotError::Placement {
                market_id: market_id.to_string(),
                detail: code,
            });
        }
        if resp.status.as_deref() == Some("FAILURE") {
            let code = resp
                .instruction_reports
                .first()
                .and_then(|r| r.error_code.as_deref())
                .unwrap_or("UNKNOWN");
            return Err(BotError::Placement {
                market_id: market_id.to_string(),
                detail: code.to_string(),
            });
        }

        let report = resp
            .instruction_reports
            .first()
            .ok_or_else(|| BotError::Placement {
                market_id: market_id.to_string(),
                detail: "no instruction report in response".into(),
            })?;
        if report.status.as_deref() != Some("SUCCESS") {
            return Err(BotError::Placement {
                market_id: market_id.to_string(),
                detail: report
                    .error_code
                    .clone()
                    .unwrap_or_else(|| "instruction not successful".into()),
            });
        }

        let bet_id = report
            .bet_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        info!(
            bet_id = %bet_id,
            market_id = %market_id,
            selection_id = %selection_id,
            odds = format!("{:.2}", report.average_price_matched.unwrap_or(odds)),
            stake = format!("£{:.2}", report.size_matched.unwrap_or(stake_gbp)),
            "Back bet placed"
        );
        Ok(bet_id)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runner_matches_plain_name() {
        assert!(BetfairClient::runner_matches("Thunder Run", "Thunder Run"));
        assert!(BetfairClient::runner_matches("thunder run", "Thunder Run"));
        assert!(!BetfairClient::runner_matches("Thunder", "Thunder Run"));
    }

    #[test]
    fn test_runner_matches_saddle_cloth_prefix() {
        assert!(BetfairClient::runner_matches("3. Thunder Run", "Thunder Run"));
        assert!(BetfairClient::runner_matches("12. Silver Mist", "silver mist"));
        // a dotted name that is not a saddle cloth number stays intact
        assert!(!BetfairClient::runner_matches("Mr. Thunder Run", "Thunder Run"));
    }

    #[test]
    fn test_venue_matches() {
        let event = EventInfo {
            venue: Some("Ascot".into()),
            name: Some("Ascot 27th Aug".into()),
        };
        assert!(BetfairClient::venue_matches(&event, "Ascot"));
        assert!(BetfairClient::venue_matches(&event, "ascot"));
        assert!(!BetfairClient::venue_matches(&event, "York"));

        let no_venue = EventInfo {
            venue: None,
            name: Some("York 27th Aug".into()),
        };
        assert!(BetfairClient::venue_matches(&no_venue, "York"));
    }

    #[test]
    fn test_market_book_parsing() {
        let json = r#"[{
            "marketId": "1.234567890",
            "status": "OPEN",
            "totalMatched": 52000.0,
            "runners": [
                {
                    "selectionId": 101,
                    "status": "ACTIVE",
                    "ex": { "availableToBack": [{ "price": 9.0, "size": 250.0 }] }
                },
                {
                    "selectionId": 102,
                    "status": "REMOVED",
                    "ex": { "availableToBack": [{ "price": 4.0, "size": 100.0 }] }
                },
                { "selectionId": 103, "status": "ACTIVE" }
            ]
        }]"#;
        let books: Vec<ApiMarketBook> = serde_json::from_str(json).unwrap();
        assert_eq!(books.len(), 1);
        assert_eq!(books[0].runners.len(), 3);
        assert_eq!(books[0].runners[0].selection_id, 101);
        assert!(books[0].runners[2].ex.is_none());
    }

    #[test]
    fn test_place_orders_response_parsing() {
        let json = r#"{
            "status": "SUCCESS",
            "instructionReports": [{
                "status": "SUCCESS",
                "betId": "298251394861",
                "averagePriceMatched": 9.2,
                "sizeMatched": 2.5
            }]
        }"#;
        let resp: PlaceOrdersResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.status.as_deref(), Some("SUCCESS"));
        assert_eq!(
            resp.instruction_reports[0].bet_id.as_deref(),
            Some("298251394861")
        );
    }
}
