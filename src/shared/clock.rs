use chrono::{DateTime, Local, NaiveDate, TimeZone, Utc};
use std::sync::atomic::{AtomicI64, Ordering};

/// 現在時刻の取得元
///
/// キャッシュの期限判定・イベントのタイムスタンプ・日次ガードの日付判定は
/// すべてこのトレイト経由で時刻を読む。
pub trait Clock: Send + Sync {
    /// エポックからのミリ秒
    fn now_ms(&self) -> i64;

    /// ユーザーのローカルタイムゾーンでの暦日
    fn today_local(&self) -> NaiveDate {
        match Local.timestamp_millis_opt(self.now_ms()).single() {
            Some(local) => local.date_naive(),
            None => Local::now().date_naive(),
        }
    }

    fn now_utc(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp_millis(self.now_ms()).unwrap_or_else(Utc::now)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// 手動で進める時計（テスト用）
#[derive(Debug)]
pub struct ManualClock {
    now_ms: AtomicI64,
    offset_secs: Option<i32>,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now_ms: AtomicI64::new(start_ms),
            offset_secs: None,
        }
    }

    /// 暦日の判定を固定オフセットで行う（ホストのタイムゾーンに依存させない）
    pub fn with_utc_offset(start_ms: i64, offset_secs: i32) -> Self {
        Self {
            now_ms: AtomicI64::new(start_ms),
            offset_secs: Some(offset_secs),
        }
    }

    pub fn advance_ms(&self, delta_ms: i64) {
        self.now_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }

    pub fn set_ms(&self, now_ms: i64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }

    fn today_local(&self) -> NaiveDate {
        let Some(offset_secs) = self.offset_secs else {
            return match Local.timestamp_millis_opt(self.now_ms()).single() {
                Some(local) => local.date_naive(),
                None => Local::now().date_naive(),
            };
        };
        let shifted = self.now_ms() + i64::from(offset_secs) * 1_000;
        DateTime::<Utc>::from_timestamp_millis(shifted)
            .map(|dt| dt.date_naive())
            .unwrap_or_else(|| Utc::now().date_naive())
    }
}
