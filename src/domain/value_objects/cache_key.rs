use std::fmt;

/// キャッシュキーの命名規則
///
/// `family:` 接頭辞でまとめて無効化できるようにしている。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Product(String),
    ProductList(String),
    User(String),
    Ledger(String),
}

/// まとめて無効化する単位
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheFamily {
    /// 商品詳細と商品一覧の両方
    Products,
    /// 商品一覧のみ
    ProductLists,
    Users,
    Ledgers,
}

impl CacheKey {
    pub fn family(&self) -> CacheFamily {
        match self {
            CacheKey::Product(_) => CacheFamily::Products,
            CacheKey::ProductList(_) => CacheFamily::ProductLists,
            CacheKey::User(_) => CacheFamily::Users,
            CacheKey::Ledger(_) => CacheFamily::Ledgers,
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKey::Product(id) => write!(f, "products:{id}"),
            CacheKey::ProductList(filter) => write!(f, "products:list:{filter}"),
            CacheKey::User(id) => write!(f, "user:{id}"),
            CacheKey::Ledger(user_id) => write!(f, "ledger:{user_id}"),
        }
    }
}

impl From<CacheKey> for String {
    fn from(key: CacheKey) -> Self {
        key.to_string()
    }
}

impl CacheFamily {
    /// `invalidate_pattern` に渡す正規表現
    pub fn pattern(&self) -> &'static str {
        match self {
            CacheFamily::Products => "^products:",
            CacheFamily::ProductLists => "^products:list:",
            CacheFamily::Users => "^user:",
            CacheFamily::Ledgers => "^ledger:",
        }
    }
}
