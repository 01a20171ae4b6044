//! 同步层错误类型
//!
//! 网关、同步器与鉴权 API 统一使用 [`SyncError`]，调用方按错误种类决定
//! 跳转登录、降级为本地模式，还是保留失败消息等待重发。

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// 缺少凭证、凭证无效或已过期（上层应跳转登录）
    #[error("未授权：凭证缺失或已失效")]
    Unauthorized,

    #[error("资源不存在: {0}")]
    NotFound(String),

    /// 网络不可达、超时，或非 2xx 且响应体没有结构化错误信息
    #[error("网络错误: {0}")]
    Transport(String),

    /// 客户端本地校验失败，不会发出任何请求
    #[error("参数校验失败: {0}")]
    Validation(String),

    #[error("未知错误: {0}")]
    Unexpected(String),
}

impl SyncError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, SyncError::Unauthorized)
    }

    /// 读路径上可以降级为本地数据的错误
    pub fn is_degradable(&self) -> bool {
        matches!(
            self,
            SyncError::Transport(_) | SyncError::Unexpected(_) | SyncError::NotFound(_)
        )
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            SyncError::Transport(format!("请求超时: {}", e))
        } else if e.is_decode() {
            SyncError::Unexpected(format!("解析响应失败: {}", e))
        } else {
            SyncError::Transport(e.to_string())
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Unexpected(format!("反序列化响应失败: {}", e))
    }
}

pub type SyncResult<T> = std::result::Result<T, SyncError>;
