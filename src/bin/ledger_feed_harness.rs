//! 標準入力から変更通知（1 行 1 JSON）を流し込み、残高フィードバックを表示する検証用ハーネス
use panda_sync::domain::value_objects::UserId;
use panda_sync::shared::{AppConfig, init_logging};
use panda_sync::state::{AppLifecycleEvent, AppState};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

fn harness_user() -> anyhow::Result<UserId> {
    let raw = std::env::var("PANDA_HARNESS_USER").unwrap_or_else(|_| "harness-user".to_string());
    UserId::parse(&raw).map_err(|err| anyhow::anyhow!("invalid PANDA_HARNESS_USER: {err}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let config = AppConfig::from_env();
    let user_id = harness_user()?;
    info!(user_id = %user_id, backend = %config.backend.base_url, "Starting ledger feed harness");

    let state = AppState::new(config).await?;
    let hub = state
        .realtime_hub()
        .ok_or_else(|| anyhow::anyhow!("realtime hub is not available"))?;

    let mut feedback = state.feedback.subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(item) = feedback.recv().await {
            println!("{}", item.message());
        }
    });

    let token = std::env::var("PANDA_HARNESS_TOKEN").ok();
    let ledger = state.login(user_id, token).await;
    if let Some(snapshot) = ledger.snapshot().await {
        info!(balance = snapshot.balance, level = %snapshot.level, "initial ledger");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(trimmed) {
            Ok(raw) => {
                hub.publish_change(raw);
            }
            Err(err) => warn!(error = %err, "skipping non-JSON line"),
        }
        // 転送タスクに処理させる
        tokio::task::yield_now().await;
    }

    state.handle_lifecycle(AppLifecycleEvent::Background).await;
    state.logout().await;
    state.shutdown().await;
    printer.abort();
    Ok(())
}
