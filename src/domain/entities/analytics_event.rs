use crate::domain::value_objects::{EventName, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// フラットなプロパティ（値はスカラーのみ）
pub type EventProperties = Map<String, Value>;

/// 送信待ちの分析イベント
///
/// キューに入った時点で不変。`id` はクライアント採番で、再送時にバックエンド側で
/// 重複排除するために使う。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedEvent {
    id: Uuid,
    name: EventName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    properties: Option<EventProperties>,
    timestamp_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    actor_id: Option<UserId>,
}

impl QueuedEvent {
    pub fn new(
        name: EventName,
        properties: Option<EventProperties>,
        timestamp_ms: i64,
        actor_id: Option<UserId>,
    ) -> Result<Self, String> {
        if let Some(props) = &properties {
            validate_flat(props)?;
        }

        Ok(Self {
            id: Uuid::new_v4(),
            name,
            properties: properties.filter(|props| !props.is_empty()),
            timestamp_ms,
            actor_id,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &EventName {
        &self.name
    }

    pub fn properties(&self) -> Option<&EventProperties> {
        self.properties.as_ref()
    }

    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp_ms
    }

    pub fn actor_id(&self) -> Option<&UserId> {
        self.actor_id.as_ref()
    }

    pub fn to_record(&self) -> AnalyticsRecord {
        AnalyticsRecord {
            event_id: self.id,
            event_name: self.name.to_string(),
            properties: self.properties.clone(),
            actor_id: self.actor_id.as_ref().map(|id| id.to_string()),
            occurred_at: DateTime::<Utc>::from_timestamp_millis(self.timestamp_ms)
                .unwrap_or_default(),
        }
    }
}

fn validate_flat(properties: &EventProperties) -> Result<(), String> {
    for (key, value) in properties {
        if key.trim().is_empty() {
            return Err("Event property keys cannot be empty".to_string());
        }
        if value.is_object() || value.is_array() {
            return Err(format!("Event property '{key}' must be a scalar value"));
        }
    }
    Ok(())
}

/// 分析シンクへ送る一件分の行
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsRecord {
    pub event_id: Uuid,
    pub event_name: String,
    pub properties: Option<EventProperties>,
    pub actor_id: Option<String>,
    pub occurred_at: DateTime<Utc>,
}
