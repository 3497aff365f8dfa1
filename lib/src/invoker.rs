use crate::audit::{AuditLog, AuditWriter};
use crate::{Result, Settings, TranslateError, TranslateRequest, TranslateResult, Translator};
use std::sync::Arc;
use tracing::warn;

#[cfg(test)]
use crate::utils::StaticTranslator;
#[cfg(test)]
use serde_json::json;
#[cfg(test)]
use std::time::Duration;

/// 执行一次上游翻译，受配置中的超时限制
pub struct Invoker {
    translator: Arc<dyn Translator>,
    audit: AuditWriter,
}

impl Invoker {
    pub fn new(translator: Arc<dyn Translator>) -> Self {
        Invoker::with_audit(translator, AuditLog::new())
    }

    pub fn with_audit(translator: Arc<dyn Translator>, audit: AuditLog) -> Self {
        Invoker {
            translator,
            audit: AuditWriter::spawn(audit),
        }
    }

    /// 等待已提交的审计日志落盘
    pub async fn flush_audit(&self) {
        self.audit.flush().await;
    }

    pub async fn call(&self, request: &TranslateRequest, settings: &Settings) -> Result<String> {
        let timeout = settings.timeout();

        self.audit(settings, || {
            format!(
                "translate request - text: {}, source: {}, target: {}",
                request.text, request.source_language, request.target_language
            )
        });

        let outcome =
            tokio::time::timeout(timeout, self.translator.translate(request, settings)).await;

        match outcome {
            Err(_) => {
                warn!(provider = self.translator.name(), ?timeout, "translation timed out");
                self.audit(settings, || {
                    format!("translate timeout - text: {}, after: {:?}", request.text, timeout)
                });
                Err(TranslateError::Timeout(timeout))
            }
            Ok(Err(err)) => {
                warn!(provider = self.translator.name(), "translation failed: {:#}", err);
                self.audit(settings, || {
                    format!("translate failed - text: {}, error: {:#}", request.text, err)
                });
                Err(err.into())
            }
            Ok(Ok(TranslateResult {
                content: Some(text),
            })) if !text.is_empty() => {
                self.audit(settings, || {
                    format!(
                        "translate success - text: {}, result: {}, source: {}, target: {}",
                        request.text, text, request.source_language, request.target_language
                    )
                });
                Ok(text)
            }
            Ok(Ok(_)) => {
                warn!(provider = self.translator.name(), "upstream returned no text");
                self.audit(settings, || {
                    format!("translate empty response - text: {}", request.text)
                });
                Err(TranslateError::EmptyResult)
            }
        }
    }

    fn audit(&self, settings: &Settings, message: impl FnOnce() -> String) {
        if settings.audit_enabled() {
            self.audit.record(settings.audit_path(), message());
        }
    }
}

#[cfg(test)]
fn settings(value: serde_json::Value) -> Settings {
    Settings::new(value.as_object().cloned().unwrap_or_default())
}

#[tokio::test]
async fn test_call_returns_text() {
    let translator = Arc::new(StaticTranslator::echo());
    let invoker = Invoker::new(translator.clone());

    let result = invoker
        .call(&TranslateRequest::new("hello", "en", "zh"), &Settings::default())
        .await;

    assert_eq!(result, Ok("[en>zh] hello".to_string()));
    assert_eq!(translator.calls(), 1);
}

#[tokio::test]
async fn test_missing_text_is_empty_result() {
    let invoker = Invoker::new(Arc::new(StaticTranslator::no_text()));
    let result = invoker
        .call(&TranslateRequest::new("hello", "en", "zh"), &Settings::default())
        .await;
    assert_eq!(result, Err(TranslateError::EmptyResult));

    let invoker = Invoker::new(Arc::new(StaticTranslator::fixed("")));
    let result = invoker
        .call(&TranslateRequest::new("hello", "en", "zh"), &Settings::default())
        .await;
    assert_eq!(result, Err(TranslateError::EmptyResult));
}

#[tokio::test]
async fn test_upstream_error_is_kept() {
    let invoker = Invoker::new(Arc::new(StaticTranslator::failing(
        "AuthFailure.SignatureFailure: bad signature",
    )));

    let result = invoker
        .call(&TranslateRequest::new("hello", "en", "zh"), &Settings::default())
        .await;

    assert_eq!(
        result,
        Err(TranslateError::Upstream(
            "AuthFailure.SignatureFailure: bad signature".to_string()
        ))
    );
}

#[tokio::test(start_paused = true)]
async fn test_timeout_from_settings() {
    let translator = Arc::new(StaticTranslator::echo().with_delay(Duration::from_secs(5)));
    let invoker = Invoker::new(translator.clone());

    let result = invoker
        .call(
            &TranslateRequest::new("hello", "en", "zh"),
            &settings(json!({"timeout": 1})),
        )
        .await;

    assert_eq!(result, Err(TranslateError::Timeout(Duration::from_secs(1))));
    assert_eq!(translator.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_non_positive_timeout_defaults_to_sixty_seconds() {
    let request = TranslateRequest::new("hello", "en", "zh");
    let config = settings(json!({"timeout": -5}));

    let slow = Invoker::new(Arc::new(
        StaticTranslator::echo().with_delay(Duration::from_secs(59)),
    ));
    assert_eq!(
        slow.call(&request, &config).await,
        Ok("[en>zh] hello".to_string())
    );

    let too_slow = Invoker::new(Arc::new(
        StaticTranslator::echo().with_delay(Duration::from_secs(61)),
    ));
    assert_eq!(
        too_slow.call(&request, &config).await,
        Err(TranslateError::Timeout(Duration::from_secs(60)))
    );
}

#[tokio::test]
async fn test_audit_written_when_enabled() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("fanyi.log");
    let invoker = Invoker::new(Arc::new(StaticTranslator::fixed("你好")));

    invoker
        .call(
            &TranslateRequest::new("hello", "en", "zh"),
            &settings(json!({
                "log_file_enable": true,
                "log_file_path": path.to_string_lossy(),
            })),
        )
        .await?;
    invoker.flush_audit().await;

    let content = std::fs::read_to_string(&path)?;
    let lines = content.lines().collect::<Vec<_>>();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].contains("translate request - text: hello"));
    assert!(lines[1].contains("result: 你好"));

    Ok(())
}

#[tokio::test]
async fn test_audit_skipped_when_disabled() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("fanyi.log");
    let invoker = Invoker::new(Arc::new(StaticTranslator::fixed("你好")));

    invoker
        .call(
            &TranslateRequest::new("hello", "en", "zh"),
            &settings(json!({"log_file_path": path.to_string_lossy()})),
        )
        .await?;
    invoker.flush_audit().await;

    assert!(!path.exists());

    Ok(())
}

#[tokio::test]
async fn test_audit_failure_does_not_fail_call() {
    let invoker = Invoker::new(Arc::new(StaticTranslator::fixed("你好")));

    let result = invoker
        .call(
            &TranslateRequest::new("hello", "en", "zh"),
            &settings(json!({
                "log_file_enable": true,
                "log_file_path": "/nonexistent-dir/fanyi/app.log",
            })),
        )
        .await;

    assert_eq!(result, Ok("你好".to_string()));
    invoker.flush_audit().await;
}
