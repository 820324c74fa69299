use crate::domain::value_objects::UserId;
use tokio::sync::RwLock;

/// ログイン中のユーザーとそのアクセストークン
#[derive(Default)]
pub struct SessionState {
    current: RwLock<Option<UserId>>,
    access_token: RwLock<Option<String>>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn current_user(&self) -> Option<UserId> {
        self.current.read().await.clone()
    }

    /// 直前のユーザーを返す
    pub async fn set_user(&self, user_id: UserId) -> Option<UserId> {
        self.current.write().await.replace(user_id)
    }

    pub async fn access_token(&self) -> Option<String> {
        self.access_token.read().await.clone()
    }

    /// 空文字のトークンは未設定として扱う
    pub async fn set_access_token(&self, token: Option<String>) {
        *self.access_token.write().await = token.filter(|value| !value.trim().is_empty());
    }

    pub async fn clear(&self) -> Option<UserId> {
        self.access_token.write().await.take();
        self.current.write().await.take()
    }
}
