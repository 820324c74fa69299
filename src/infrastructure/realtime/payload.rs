use crate::application::ports::ledger_gateway::LedgerPush;
use crate::domain::entities::LedgerTransaction;
use crate::domain::value_objects::UserId;
use crate::shared::error::AppError;
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

pub const BALANCE_TABLE: &str = "user_coins";
pub const TRANSACTION_TABLE: &str = "coin_transactions";

#[derive(Debug, Error)]
pub enum RealtimePayloadError {
    #[error("malformed change payload: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("unsupported table: {0}")]
    UnsupportedTable(String),
    #[error("unsupported event {event_type} on {table}")]
    UnsupportedEvent { table: String, event_type: String },
    #[error("missing field: {0}")]
    MissingField(&'static str),
    #[error("invalid field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

impl From<RealtimePayloadError> for AppError {
    fn from(err: RealtimePayloadError) -> Self {
        AppError::DeserializationError(err.to_string())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawChange {
    table: String,
    #[serde(alias = "type")]
    event_type: String,
    #[serde(default)]
    new: Option<Map<String, Value>>,
}

/// 生の変更通知をドメインのプッシュに変換する
///
/// `user_coins` の UPDATE と `coin_transactions` の INSERT 以外は受け付けない。
pub fn parse_change(raw: &Value) -> Result<LedgerPush, RealtimePayloadError> {
    let change = RawChange::deserialize(raw)?;
    let event_type = change.event_type.to_ascii_uppercase();

    match (change.table.as_str(), event_type.as_str()) {
        (BALANCE_TABLE, "UPDATE") => {
            let row = change.new.ok_or(RealtimePayloadError::MissingField("new"))?;
            Ok(LedgerPush::BalanceChanged {
                user_id: user_field(&row)?,
                new_balance: int_field(&row, "balance")?,
            })
        }
        (TRANSACTION_TABLE, "INSERT") => {
            let row = change.new.ok_or(RealtimePayloadError::MissingField("new"))?;
            let description = match row.get("description") {
                None | Some(Value::Null) => None,
                Some(Value::String(text)) => Some(text.clone()),
                Some(other) => {
                    return Err(RealtimePayloadError::InvalidField {
                        field: "description",
                        reason: format!("expected string, got {other}"),
                    });
                }
            };
            Ok(LedgerPush::TransactionInserted(LedgerTransaction {
                user_id: user_field(&row)?,
                amount: int_field(&row, "amount")?,
                description,
            }))
        }
        (BALANCE_TABLE | TRANSACTION_TABLE, _) => Err(RealtimePayloadError::UnsupportedEvent {
            table: change.table,
            event_type: change.event_type,
        }),
        _ => Err(RealtimePayloadError::UnsupportedTable(change.table)),
    }
}

/// 購読ユーザー以外の行を弾いたうえで変換する
pub fn parse_change_for(
    raw: &Value,
    expected: &UserId,
) -> Result<Option<LedgerPush>, RealtimePayloadError> {
    let push = parse_change(raw)?;
    if push.user_id() == expected {
        Ok(Some(push))
    } else {
        Ok(None)
    }
}

fn user_field(row: &Map<String, Value>) -> Result<UserId, RealtimePayloadError> {
    let raw = row
        .get("user_id")
        .and_then(Value::as_str)
        .ok_or(RealtimePayloadError::MissingField("user_id"))?;
    UserId::parse(raw).map_err(|reason| RealtimePayloadError::InvalidField {
        field: "user_id",
        reason,
    })
}

/// 数値は JSON の整数か整数文字列（bigint がテキストで届く場合）を受け付ける
fn int_field(row: &Map<String, Value>, field: &'static str) -> Result<i64, RealtimePayloadError> {
    match row.get(field) {
        Some(Value::Number(number)) => {
            number
                .as_i64()
                .ok_or_else(|| RealtimePayloadError::InvalidField {
                    field,
                    reason: format!("{number} is not an integer"),
                })
        }
        Some(Value::String(text)) => {
            text.trim()
                .parse::<i64>()
                .map_err(|err| RealtimePayloadError::InvalidField {
                    field,
                    reason: err.to_string(),
                })
        }
        Some(other) => Err(RealtimePayloadError::InvalidField {
            field,
            reason: format!("expected integer, got {other}"),
        }),
        None => Err(RealtimePayloadError::MissingField(field)),
    }
}
