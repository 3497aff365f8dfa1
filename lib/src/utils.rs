use crate::{Settings, TranslateRequest, TranslateResult, Translator};
use anyhow::{bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug, Clone)]
enum Reply {
    Echo,
    Fixed(String),
    Fail(String),
    NoText,
}

/// 本地翻译实现，不访问网络，用于测试
///
/// 记录调用次数和最近一次收到的配置快照。
#[derive(Debug)]
pub struct StaticTranslator {
    reply: Reply,
    delay: Duration,
    calls: AtomicUsize,
    last_settings: Mutex<Option<Settings>>,
}

impl StaticTranslator {
    fn with_reply(reply: Reply) -> Self {
        StaticTranslator {
            reply,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            last_settings: Mutex::new(None),
        }
    }

    /// 返回 `[src>to] text`
    pub fn echo() -> Self {
        Self::with_reply(Reply::Echo)
    }

    pub fn fixed(text: impl Into<String>) -> Self {
        Self::with_reply(Reply::Fixed(text.into()))
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self::with_reply(Reply::Fail(message.into()))
    }

    /// 上游成功但没有译文
    pub fn no_text() -> Self {
        Self::with_reply(Reply::NoText)
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_settings(&self) -> Option<Settings> {
        self.last_settings.lock().clone()
    }
}

#[async_trait]
impl Translator for StaticTranslator {
    fn name(&self) -> &str {
        "static"
    }

    async fn translate(
        &self,
        request: &TranslateRequest,
        settings: &Settings,
    ) -> Result<TranslateResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_settings.lock() = Some(settings.clone());

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let content = match &self.reply {
            Reply::Echo => Some(format!(
                "[{}>{}] {}",
                request.source_language, request.target_language, request.text
            )),
            Reply::Fixed(text) => Some(text.clone()),
            Reply::Fail(message) => bail!("{}", message),
            Reply::NoText => None,
        };

        Ok(TranslateResult { content })
    }
}

pub async fn test_translate<T: Translator>(translator: T, settings: Settings) -> Result<()> {
    let request = TranslateRequest::new("落霞与孤鹜齐飞，秋水共长天一色。", "zh", "en");

    let result = translator.translate(&request, &settings).await?;

    println!("{:?}", result);

    Ok(())
}
