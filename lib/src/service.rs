use crate::invoker::Invoker;
use crate::singleflight::Group;
use crate::{Result, SettingsStore, TranslateError, TranslateRequest, Translator};
use serde_json::{Map, Value};
use std::sync::Arc;

#[cfg(test)]
use crate::utils::StaticTranslator;
#[cfg(test)]
use serde_json::json;
#[cfg(test)]
use std::time::Duration;

/// 配置、请求合并与上游调用的组合入口
pub struct TranslationService {
    settings: Arc<SettingsStore>,
    group: Group,
    invoker: Arc<Invoker>,
}

impl TranslationService {
    pub fn new(translator: Arc<dyn Translator>) -> Self {
        TranslationService::with_invoker(Invoker::new(translator))
    }

    pub fn with_invoker(invoker: Invoker) -> Self {
        TranslationService {
            settings: Arc::new(SettingsStore::new()),
            group: Group::new(),
            invoker: Arc::new(invoker),
        }
    }

    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    /// 整体替换配置
    pub fn configure(&self, values: Map<String, Value>) {
        self.settings.replace(values);
    }

    /// 翻译文本，相同请求的并发调用只访问一次上游
    ///
    /// 配置快照在真正发起调用时读取，等待中的调用者拿到的是这次调用的结果，
    /// 即使期间配置已被替换。
    pub async fn translate(&self, request: &TranslateRequest) -> Result<String> {
        if request.text.is_empty() {
            return Err(TranslateError::InvalidInput(
                "text must not be empty".to_string(),
            ));
        }

        let settings = self.settings.clone();
        let invoker = self.invoker.clone();

        self.group
            .resolve(request, move |request| async move {
                let snapshot = settings.snapshot();
                invoker.call(&request, &snapshot).await
            })
            .await
    }

    /// 等待已提交的审计日志落盘
    pub async fn flush_audit(&self) {
        self.invoker.flush_audit().await;
    }
}

#[cfg(test)]
fn object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

#[tokio::test]
async fn test_empty_text_rejected_before_upstream() {
    let translator = Arc::new(StaticTranslator::echo());
    let service = TranslationService::new(translator.clone());

    let result = service.translate(&TranslateRequest::new("", "en", "zh")).await;

    assert_eq!(
        result,
        Err(TranslateError::InvalidInput("text must not be empty".to_string()))
    );
    assert_eq!(translator.calls(), 0);
}

#[tokio::test]
async fn test_translate_uses_normalized_languages() {
    let service = TranslationService::new(Arc::new(StaticTranslator::echo()));

    let result = service.translate(&TranslateRequest::new("hello", "", "")).await;

    assert_eq!(result, Ok("[en>zh] hello".to_string()));
}

#[tokio::test]
async fn test_configure_reaches_provider() {
    let translator = Arc::new(StaticTranslator::echo());
    let service = TranslationService::new(translator.clone());

    service.configure(object(json!({"tencent_ak": "AK", "tencent_secret": "SK"})));
    service
        .translate(&TranslateRequest::new("hello", "en", "zh"))
        .await
        .unwrap();

    service.configure(object(json!({"tencent_ak": "AK2"})));
    service
        .translate(&TranslateRequest::new("hello", "en", "zh"))
        .await
        .unwrap();

    let last = translator.last_settings().unwrap();
    assert_eq!(last.get_string("tencent_ak"), "AK2");
    assert_eq!(last.get_string("tencent_secret"), "");
    assert_eq!(translator.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_waiter_gets_result_computed_under_original_settings() {
    let translator = Arc::new(StaticTranslator::echo().with_delay(Duration::from_millis(100)));
    let service = TranslationService::new(translator.clone());
    service.configure(object(json!({"tencent_ak": "first"})));

    let request = TranslateRequest::new("hello", "en", "zh");
    let (leader, waiter) = tokio::join!(service.translate(&request), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        service.configure(object(json!({"tencent_ak": "second"})));
        service.translate(&request).await
    });

    assert_eq!(leader, waiter);
    assert_eq!(translator.calls(), 1);
    assert_eq!(
        translator.last_settings().unwrap().get_string("tencent_ak"),
        "first"
    );
    assert_eq!(service.settings().get_string("tencent_ak"), "second");
}

#[tokio::test(start_paused = true)]
async fn test_timeout_reaches_every_waiter() {
    let translator = Arc::new(StaticTranslator::echo().with_delay(Duration::from_secs(5)));
    let service = TranslationService::new(translator.clone());
    service.configure(object(json!({"timeout": 1})));

    let request = TranslateRequest::new("hello", "en", "zh");
    let (leader, waiter) = tokio::join!(service.translate(&request), service.translate(&request));

    let expected = Err(TranslateError::Timeout(Duration::from_secs(1)));
    assert_eq!(leader, expected);
    assert_eq!(waiter, expected);
    assert_eq!(translator.calls(), 1);
}
