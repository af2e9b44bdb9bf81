use std::fmt;
use rusqlite;

#[derive(Debug)]
pub enum MedisyncSDKError {
    SqliteError(rusqlite::Error),
    JsonError(String),
    InvalidArgument(String),
    NotFound(String),
    // 存储层
    KvStore(String),
    Serialization(String),
    IO(String),
    Database(String),
    /// 文档未通过集合 schema 校验（属于编程错误，不应在正常流程出现）
    SchemaViolation(String),
    // 网络/同步层
    /// 网络不可达或超时；写路径永远不把它当作用户错误上抛
    Connectivity(String),
    Timeout(String),
    /// 服务端 5xx，可重试
    ServerError(u16, String),
    /// 远端业务校验拒绝（success:false），对该文档终态，不自动重试
    DomainRejected(String),
    /// 远端因版本过期拒绝写入，交由冲突解决器处理，不上抛给用户
    StaleConflict(String),
    // SDK 生命周期
    Config(String),
    NotInitialized(String),
    ShuttingDown(String),
    InvalidOperation(String),
    Other(String),
}

impl fmt::Display for MedisyncSDKError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MedisyncSDKError::SqliteError(e) => write!(f, "SQLite error: {}", e),
            MedisyncSDKError::JsonError(e) => write!(f, "JSON error: {}", e),
            MedisyncSDKError::InvalidArgument(e) => write!(f, "Invalid argument: {}", e),
            MedisyncSDKError::NotFound(e) => write!(f, "Not found: {}", e),
            MedisyncSDKError::KvStore(e) => write!(f, "KV store error: {}", e),
            MedisyncSDKError::Serialization(e) => write!(f, "Serialization error: {}", e),
            MedisyncSDKError::IO(e) => write!(f, "IO error: {}", e),
            MedisyncSDKError::Database(e) => write!(f, "Database error: {}", e),
            MedisyncSDKError::SchemaViolation(e) => write!(f, "Schema violation: {}", e),
            MedisyncSDKError::Connectivity(e) => write!(f, "Connectivity error: {}", e),
            MedisyncSDKError::Timeout(e) => write!(f, "Timeout: {}", e),
            MedisyncSDKError::ServerError(code, e) => write!(f, "Server error [{}]: {}", code, e),
            MedisyncSDKError::DomainRejected(e) => write!(f, "Rejected by server: {}", e),
            MedisyncSDKError::StaleConflict(e) => write!(f, "Stale write conflict: {}", e),
            MedisyncSDKError::Config(e) => write!(f, "Config error: {}", e),
            MedisyncSDKError::NotInitialized(e) => write!(f, "Not initialized: {}", e),
            MedisyncSDKError::ShuttingDown(e) => write!(f, "Shutting down: {}", e),
            MedisyncSDKError::InvalidOperation(e) => write!(f, "Invalid operation: {}", e),
            MedisyncSDKError::Other(e) => write!(f, "Other error: {}", e),
        }
    }
}

impl std::error::Error for MedisyncSDKError {}

impl From<rusqlite::Error> for MedisyncSDKError {
    fn from(error: rusqlite::Error) -> Self {
        MedisyncSDKError::SqliteError(error)
    }
}

impl From<serde_json::Error> for MedisyncSDKError {
    fn from(error: serde_json::Error) -> Self {
        MedisyncSDKError::JsonError(error.to_string())
    }
}

impl From<std::io::Error> for MedisyncSDKError {
    fn from(error: std::io::Error) -> Self {
        MedisyncSDKError::IO(error.to_string())
    }
}

impl From<reqwest::Error> for MedisyncSDKError {
    fn from(error: reqwest::Error) -> Self {
        // reqwest 层的失败都属于连通性问题；业务拒绝在响应体里，由调用方分类
        if error.is_timeout() {
            MedisyncSDKError::Timeout(error.to_string())
        } else {
            MedisyncSDKError::Connectivity(error.to_string())
        }
    }
}

impl MedisyncSDKError {
    /// 是否属于连通性失败（网络不可达/超时）。
    /// 写路径用它决定「降级为离线写」而不是把错误抛给用户。
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            MedisyncSDKError::Connectivity(_) | MedisyncSDKError::Timeout(_)
        )
    }

    /// 是否为版本过期冲突（交由冲突解决器，静默处理）
    pub fn is_stale_conflict(&self) -> bool {
        matches!(self, MedisyncSDKError::StaleConflict(_))
    }
}

pub type Result<T> = std::result::Result<T, MedisyncSDKError>;
