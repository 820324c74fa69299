use crate::application::ports::analytics_sink::AnalyticsSink;
use crate::application::ports::daily_action::DailyActionInvoker;
use crate::application::ports::ledger_gateway::LedgerGateway;
use crate::application::services::session::SessionState;
use crate::domain::entities::{AnalyticsRecord, LedgerSnapshot};
use crate::domain::value_objects::UserId;
use crate::shared::config::BackendConfig;
use crate::shared::error::AppError;
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, warn};

const LEDGER_TABLE_PATH: &str = "rest/v1/user_coins";
const ANALYTICS_TABLE_PATH: &str = "rest/v1/analytics_events";
const RPC_PATH: &str = "rest/v1/rpc";

#[derive(Debug, Deserialize)]
struct LedgerRow {
    user_id: String,
    #[serde(default)]
    balance: i64,
    #[serde(default)]
    total_earned: i64,
    #[serde(default)]
    total_spent: i64,
}

/// PostgREST 互換のバックエンドに対する HTTP クライアント
pub struct BackendClient {
    client: Client,
    base_url: String,
    api_key: String,
    session: Arc<SessionState>,
}

impl BackendClient {
    pub fn new(config: &BackendConfig) -> Result<Self, AppError> {
        let base_url = normalize_base_url(&config.base_url)?;
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|err| AppError::ConfigurationError(err.to_string()))?;

        Ok(Self {
            client,
            base_url,
            api_key: config.api_key.clone(),
            session: Arc::new(SessionState::new()),
        })
    }

    /// アプリのセッションと共有し、ログイン中はそのトークンで認可する
    pub fn with_session(mut self, session: Arc<SessionState>) -> Self {
        self.session = session;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// ログインユーザーのトークン。未設定なら API キーで認可する。
    pub async fn set_access_token(&self, token: Option<String>) {
        self.session.set_access_token(token).await;
    }

    async fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let token = self
            .session
            .access_token()
            .await
            .unwrap_or_else(|| self.api_key.clone());
        let builder = builder.header("apikey", &self.api_key);
        if token.is_empty() {
            builder
        } else {
            builder.bearer_auth(token)
        }
    }
}

#[async_trait]
impl LedgerGateway for BackendClient {
    async fn fetch_snapshot(&self, user_id: &UserId) -> Result<LedgerSnapshot, AppError> {
        let url = build_url(&self.base_url, LEDGER_TABLE_PATH);
        let filter = format!("eq.{user_id}");
        let request = self
            .client
            .get(url)
            .query(&[
                ("user_id", filter.as_str()),
                ("select", "user_id,balance,total_earned,total_spent"),
            ])
            .header("Accept", "application/json");

        let rows: Vec<LedgerRow> = request_json(self.authorized(request).await).await?;
        let Some(row) = rows.into_iter().next() else {
            // 残高行がまだ作られていないユーザー
            debug!(target: "backend", user_id = %user_id, "no ledger row; treating as empty balance");
            return Ok(LedgerSnapshot::new(user_id.clone(), 0, 0, 0));
        };

        if row.user_id != user_id.as_str() {
            return Err(AppError::ValidationError(format!(
                "ledger row for {} returned for {user_id}",
                row.user_id
            )));
        }
        Ok(LedgerSnapshot::new(
            user_id.clone(),
            row.balance,
            row.total_earned,
            row.total_spent,
        ))
    }
}

#[async_trait]
impl AnalyticsSink for BackendClient {
    async fn insert_events(&self, records: &[AnalyticsRecord]) -> Result<(), AppError> {
        if records.is_empty() {
            return Ok(());
        }

        let url = build_url(&self.base_url, ANALYTICS_TABLE_PATH);
        let request = self
            .client
            .post(url)
            .header("Prefer", "return=minimal")
            .json(records);
        send_checked(self.authorized(request).await).await?;

        debug!(target: "backend", count = records.len(), "analytics events inserted");
        Ok(())
    }
}

#[async_trait]
impl DailyActionInvoker for BackendClient {
    async fn invoke_daily_action(
        &self,
        function: &str,
        user_id: &UserId,
    ) -> Result<Value, AppError> {
        if function.trim().is_empty() || function.contains('/') {
            return Err(AppError::InvalidInput(format!(
                "invalid rpc function name: {function:?}"
            )));
        }

        let url = build_url(&self.base_url, &format!("{RPC_PATH}/{function}"));
        let request = self
            .client
            .post(url)
            .json(&json!({ "p_user_id": user_id.as_str() }));
        let body = send_checked(self.authorized(request).await).await?;

        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body).map_err(|err| AppError::DeserializationError(err.to_string()))
    }
}

fn normalize_base_url(raw: &str) -> Result<String, AppError> {
    let trimmed = raw.trim().trim_end_matches('/').to_string();
    let url = Url::parse(&trimmed)
        .map_err(|err| AppError::ConfigurationError(format!("Invalid backend URL: {err}")))?;
    match url.scheme() {
        "http" | "https" => Ok(trimmed),
        _ => Err(AppError::ConfigurationError(
            "Backend URL scheme must be http or https".to_string(),
        )),
    }
}

fn build_url(base_url: &str, path: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{base}/{path}")
}

async fn send_checked(builder: reqwest::RequestBuilder) -> Result<String, AppError> {
    let response = builder.send().await?;
    let status = response.status();
    let body = response.text().await?;

    if status.is_success() {
        return Ok(body);
    }

    warn!(target: "backend", %status, "backend request failed");
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(AppError::Unauthorized(format!(
            "Backend rejected credentials ({status}): {body}"
        ))),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
            Err(AppError::Timeout(format!("Backend timed out ({status})")))
        }
        _ => Err(AppError::Network(format!("Backend error ({status}): {body}"))),
    }
}

async fn request_json<T: DeserializeOwned>(
    builder: reqwest::RequestBuilder,
) -> Result<T, AppError> {
    let body = send_checked(builder).await?;
    serde_json::from_str(&body).map_err(|err| AppError::DeserializationError(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_http_base_url() {
        let config = BackendConfig {
            base_url: "ftp://backend.local".into(),
            api_key: "anon".into(),
            request_timeout_secs: 5,
            daily_reward_function: "claim_daily_login_reward".into(),
        };
        assert!(matches!(
            BackendClient::new(&config),
            Err(AppError::ConfigurationError(_))
        ));
    }

    #[test]
    fn build_url_joins_segments() {
        assert_eq!(
            build_url("https://api.example.com/", "/rest/v1/user_coins"),
            "https://api.example.com/rest/v1/user_coins"
        );
    }

    #[tokio::test]
    async fn rejects_path_like_function_names() {
        let config = BackendConfig {
            base_url: "http://127.0.0.1:9".into(),
            api_key: String::new(),
            request_timeout_secs: 1,
            daily_reward_function: "x".into(),
        };
        let client = BackendClient::new(&config).unwrap();
        let user = UserId::parse("buyer-1").unwrap();
        let result = client.invoke_daily_action("../admin", &user).await;
        assert!(matches!(result, Err(AppError::InvalidInput(_))));
    }
}
