pub mod audit;
pub mod error;
pub mod invoker;
pub mod key;
pub mod service;
pub mod settings;
pub mod singleflight;
pub mod utils;

pub use error::{Result, TranslateError};
pub use key::RequestKey;
pub use service::TranslationService;
pub use settings::{Settings, SettingsStore};

use async_trait::async_trait;
use derive_builder::Builder;
use serde::{Deserialize, Serialize};

pub const DEFAULT_SOURCE_LANGUAGE: &str = "en";
pub const DEFAULT_TARGET_LANGUAGE: &str = "zh";

#[derive(Debug, Clone, PartialEq, Eq, Builder, Serialize, Deserialize)]
#[builder(setter(into))]
pub struct TranslateRequest {
    /// 原文
    pub text: String,
    /// 源语言，空串表示未指定
    #[builder(default)]
    pub source_language: String,
    /// 目标语言，空串表示未指定
    #[builder(default)]
    pub target_language: String,
}

impl TranslateRequest {
    pub fn new(
        text: impl Into<String>,
        source_language: impl Into<String>,
        target_language: impl Into<String>,
    ) -> Self {
        TranslateRequest {
            text: text.into(),
            source_language: source_language.into(),
            target_language: target_language.into(),
        }
    }

    /// 规范化语言代码
    ///
    /// 源语言或目标语言任意一个为空时，两者同时回落到 `en` / `zh`，
    /// 不会只补齐缺失的那一个。
    pub fn normalized(&self) -> Self {
        if self.source_language.is_empty() || self.target_language.is_empty() {
            TranslateRequest {
                text: self.text.clone(),
                source_language: DEFAULT_SOURCE_LANGUAGE.to_string(),
                target_language: DEFAULT_TARGET_LANGUAGE.to_string(),
            }
        } else {
            self.clone()
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranslateResult {
    /// 译文，上游未返回时为 None
    pub content: Option<String>,
}

/// 上游翻译服务
#[async_trait]
pub trait Translator: Send + Sync {
    /// 服务名称
    fn name(&self) -> &str;

    /// 翻译，一次调用对应一次上游请求
    ///
    /// 凭证等配置从每次调用传入的快照中读取。
    async fn translate(
        &self,
        request: &TranslateRequest,
        settings: &Settings,
    ) -> anyhow::Result<TranslateResult>;
}

#[test]
fn test_normalize_defaults_both_when_either_missing() {
    let request = TranslateRequest::new("hello", "", "");
    let normalized = request.normalized();
    assert_eq!(normalized.source_language, "en");
    assert_eq!(normalized.target_language, "zh");

    // 只缺目标语言时，已指定的源语言也会被覆盖
    let normalized = TranslateRequest::new("hello", "ja", "").normalized();
    assert_eq!(normalized.source_language, "en");
    assert_eq!(normalized.target_language, "zh");

    let normalized = TranslateRequest::new("hello", "", "fr").normalized();
    assert_eq!(normalized.source_language, "en");
    assert_eq!(normalized.target_language, "zh");
}

#[test]
fn test_normalize_keeps_explicit_languages() {
    let request = TranslateRequest::new("bonjour", "fr", "de");
    assert_eq!(request.normalized(), request);
}

#[test]
fn test_builder_defaults_languages() -> anyhow::Result<()> {
    let request = TranslateRequestBuilder::default().text("hello").build()?;
    assert_eq!(request, TranslateRequest::new("hello", "", ""));
    Ok(())
}
