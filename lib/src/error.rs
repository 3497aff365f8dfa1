use std::time::Duration;
use thiserror::Error;

/// 翻译过程中的错误
///
/// 需要 `Clone`: 合并的并发请求共享同一个结果。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TranslateError {
    /// 输入无效 (JSON 格式错误或缺少必填字段)
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// 未知命令
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// 配置格式错误
    #[error("invalid config: {0}")]
    ConfigError(String),

    /// 上游服务失败
    #[error("upstream failure: {0}")]
    Upstream(String),

    /// 请求超时
    #[error("translation timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    /// 上游返回成功但没有译文
    #[error("upstream returned no translated text")]
    EmptyResult,
}

impl TranslateError {
    /// 响应中的错误码
    pub fn code(&self) -> i32 {
        1
    }
}

impl From<anyhow::Error> for TranslateError {
    fn from(err: anyhow::Error) -> Self {
        TranslateError::Upstream(format!("{:#}", err))
    }
}

pub type Result<T, E = TranslateError> = std::result::Result<T, E>;
