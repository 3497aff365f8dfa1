use crate::protocol::{Command, InitResponse, Response, TranslateTextData, TranslateTextResponse};
use anyhow::Context;
use fanyi_lib::{TranslateError, TranslateRequest, TranslationService};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{info, warn};

#[cfg(test)]
use fanyi_lib::utils::StaticTranslator;
#[cfg(test)]
use serde_json::json;
#[cfg(test)]
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

/// 把一行命令分发给配置或翻译
pub struct Dispatcher {
    service: TranslationService,
}

impl Dispatcher {
    pub fn new(service: TranslationService) -> Self {
        Dispatcher { service }
    }

    pub fn service(&self) -> &TranslationService {
        &self.service
    }

    /// 空行返回 None，不产生响应
    pub async fn handle_line(&self, line: &str) -> Option<(Response, Flow)> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        let command = match serde_json::from_str::<Command>(line) {
            Ok(command) => command,
            Err(err) => {
                let err = TranslateError::InvalidInput(format!("malformed JSON: {}", err));
                return Some((Response::error(&err), Flow::Continue));
            }
        };

        Some(self.dispatch(command).await)
    }

    pub async fn dispatch(&self, command: Command) -> (Response, Flow) {
        let result = match command.command.as_str() {
            "init" => self.handle_init(command.data),
            "translateText" => self.handle_translate(command.data).await,
            "exit" => {
                info!("exit requested");
                return (Response::ok("exit"), Flow::Exit);
            }
            other => Err(TranslateError::UnknownCommand(other.to_string())),
        };

        match result {
            Ok(response) => (response, Flow::Continue),
            Err(err) => (Response::error(&err), Flow::Continue),
        }
    }

    fn handle_init(&self, data: Value) -> Result<Response, TranslateError> {
        let values = match data {
            Value::Object(values) => values,
            Value::Null => Default::default(),
            other => {
                return Err(TranslateError::ConfigError(format!(
                    "init data must be an object, got {}",
                    other
                )))
            }
        };

        info!(keys = values.len(), "settings replaced");
        self.service.configure(values);

        Response::ok_with("initialized", InitResponse { success: true })
            .map_err(|e| TranslateError::ConfigError(e.to_string()))
    }

    async fn handle_translate(&self, data: Value) -> Result<Response, TranslateError> {
        let data = match data {
            Value::Null => TranslateTextData::default(),
            data => serde_json::from_value::<TranslateTextData>(data).map_err(|e| {
                TranslateError::InvalidInput(format!("malformed translateText data: {}", e))
            })?,
        };

        let request = TranslateRequest::new(data.text, data.src, data.to);
        let text = self.service.translate(&request).await?;
        let normalized = request.normalized();

        Response::ok_with(
            "translated",
            TranslateTextResponse {
                text,
                original: normalized.text,
                src: normalized.source_language,
                to: normalized.target_language,
            },
        )
        .map_err(|e| TranslateError::InvalidInput(e.to_string()))
    }
}

/// 逐行读取命令并写出响应，直到输入结束或收到 exit
///
/// 只有读写流本身出错时才返回错误。
pub async fn run<R, W>(dispatcher: &Dispatcher, mut reader: R, mut writer: W) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = Vec::new();

    loop {
        buf.clear();
        let read = reader
            .read_until(b'\n', &mut buf)
            .await
            .context("failed to read input")?;
        if read == 0 {
            break;
        }

        let handled = match std::str::from_utf8(&buf) {
            Ok(line) => dispatcher.handle_line(line).await,
            Err(err) => {
                let err = TranslateError::InvalidInput(format!("input is not valid UTF-8: {}", err));
                Some((Response::error(&err), Flow::Continue))
            }
        };
        let Some((response, flow)) = handled else {
            continue;
        };

        if !response.is_success() {
            warn!(code = response.code, "{}", response.message);
        }

        let mut out = serde_json::to_string(&response)?;
        out.push('\n');
        writer
            .write_all(out.as_bytes())
            .await
            .context("failed to write response")?;
        writer.flush().await.context("failed to flush response")?;

        if flow == Flow::Exit {
            break;
        }
    }

    dispatcher.service().flush_audit().await;

    Ok(())
}

#[cfg(test)]
fn dispatcher_with(translator: StaticTranslator) -> (Dispatcher, Arc<StaticTranslator>) {
    let translator = Arc::new(translator);
    let dispatcher = Dispatcher::new(TranslationService::new(translator.clone()));
    (dispatcher, translator)
}

#[tokio::test]
async fn test_init() {
    let (dispatcher, _) = dispatcher_with(StaticTranslator::echo());

    let (response, flow) = dispatcher
        .handle_line(r#"{"command":"init","data":{"tencent_ak":"AK","tencent_secret":"SK","timeout":30}}"#)
        .await
        .unwrap();

    assert_eq!(flow, Flow::Continue);
    assert_eq!(response.code, 0);
    assert_eq!(response.data, Some(json!({"success": true})));
    assert_eq!(dispatcher.service().settings().get_string("tencent_ak"), "AK");
    assert_eq!(dispatcher.service().settings().get_int("timeout"), 30);
}

#[tokio::test]
async fn test_init_replaces_wholesale() {
    let (dispatcher, _) = dispatcher_with(StaticTranslator::echo());

    dispatcher
        .handle_line(r#"{"command":"init","data":{"tencent_ak":"AK","log_file_enable":true}}"#)
        .await;
    dispatcher
        .handle_line(r#"{"command":"init","data":{"tencent_secret":"SK"}}"#)
        .await;

    let settings = dispatcher.service().settings();
    assert_eq!(settings.get_string("tencent_ak"), "");
    assert_eq!(settings.get_string("tencent_secret"), "SK");
    assert!(!settings.get_bool("log_file_enable"));
}

#[tokio::test]
async fn test_init_rejects_non_object() {
    let (dispatcher, _) = dispatcher_with(StaticTranslator::echo());

    let (response, flow) = dispatcher
        .handle_line(r#"{"command":"init","data":[1,2]}"#)
        .await
        .unwrap();

    assert_eq!(flow, Flow::Continue);
    assert_eq!(response.code, 1);
    assert!(response.message.starts_with("invalid config:"));
}

#[tokio::test]
async fn test_init_without_data_clears_settings() {
    let (dispatcher, _) = dispatcher_with(StaticTranslator::echo());

    dispatcher
        .handle_line(r#"{"command":"init","data":{"tencent_ak":"AK"}}"#)
        .await;
    let (response, _) = dispatcher.handle_line(r#"{"command":"init"}"#).await.unwrap();

    assert_eq!(response.code, 0);
    assert_eq!(dispatcher.service().settings().get_string("tencent_ak"), "");
}

#[tokio::test]
async fn test_translate_defaults_languages() {
    let (dispatcher, translator) = dispatcher_with(StaticTranslator::fixed("你好"));

    let (response, _) = dispatcher
        .handle_line(r#"{"command":"translateText","data":{"text":"hello","src":"","to":""}}"#)
        .await
        .unwrap();

    assert_eq!(response.code, 0);
    assert_eq!(
        response.data,
        Some(json!({"text": "你好", "original": "hello", "src": "en", "to": "zh"}))
    );
    assert_eq!(translator.calls(), 1);
}

#[tokio::test]
async fn test_translate_single_language_falls_back_to_both_defaults() {
    let (dispatcher, _) = dispatcher_with(StaticTranslator::echo());

    let (response, _) = dispatcher
        .handle_line(r#"{"command":"translateText","data":{"text":"hello","src":"ja"}}"#)
        .await
        .unwrap();

    assert_eq!(
        response.data,
        Some(json!({"text": "[en>zh] hello", "original": "hello", "src": "en", "to": "zh"}))
    );
}

#[tokio::test]
async fn test_translate_empty_text() {
    let (dispatcher, translator) = dispatcher_with(StaticTranslator::echo());

    let (response, flow) = dispatcher
        .handle_line(r#"{"command":"translateText","data":{"text":""}}"#)
        .await
        .unwrap();

    assert_eq!(flow, Flow::Continue);
    assert_eq!(response.code, 1);
    assert!(response.message.contains("text must not be empty"));
    assert_eq!(translator.calls(), 0);
}

#[tokio::test]
async fn test_translate_wrong_field_type() {
    let (dispatcher, translator) = dispatcher_with(StaticTranslator::echo());

    let (response, _) = dispatcher
        .handle_line(r#"{"command":"translateText","data":{"text":42}}"#)
        .await
        .unwrap();

    assert_eq!(response.code, 1);
    assert!(response.message.starts_with("invalid input:"));
    assert_eq!(translator.calls(), 0);
}

#[tokio::test]
async fn test_translate_upstream_failure() {
    let (dispatcher, _) = dispatcher_with(StaticTranslator::failing("network unreachable"));

    let (response, _) = dispatcher
        .handle_line(r#"{"command":"translateText","data":{"text":"hello"}}"#)
        .await
        .unwrap();

    assert_eq!(response.code, 1);
    assert_eq!(response.message, "upstream failure: network unreachable");
    assert_eq!(response.data, None);
}

#[tokio::test]
async fn test_translate_empty_result() {
    let (dispatcher, _) = dispatcher_with(StaticTranslator::no_text());

    let (response, _) = dispatcher
        .handle_line(r#"{"command":"translateText","data":{"text":"hello"}}"#)
        .await
        .unwrap();

    assert_eq!(response.code, 1);
    assert_eq!(response.message, "upstream returned no translated text");
}

#[tokio::test]
async fn test_malformed_json() {
    let (dispatcher, _) = dispatcher_with(StaticTranslator::echo());

    let (response, flow) = dispatcher.handle_line("not json").await.unwrap();

    assert_eq!(flow, Flow::Continue);
    assert_eq!(response.code, 1);
    assert!(response.message.starts_with("invalid input: malformed JSON"));
}

#[tokio::test]
async fn test_unknown_command() {
    let (dispatcher, _) = dispatcher_with(StaticTranslator::echo());

    let (response, flow) = dispatcher
        .handle_line(r#"{"command":"detect","data":{}}"#)
        .await
        .unwrap();

    assert_eq!(flow, Flow::Continue);
    assert_eq!(response.code, 1);
    assert_eq!(response.message, "unknown command: detect");
}

#[tokio::test]
async fn test_exit_and_blank_lines() {
    let (dispatcher, _) = dispatcher_with(StaticTranslator::echo());

    assert!(dispatcher.handle_line("   ").await.is_none());

    let (response, flow) = dispatcher.handle_line(r#"{"command":"exit"}"#).await.unwrap();
    assert_eq!(flow, Flow::Exit);
    assert_eq!(response, Response::ok("exit"));
}

#[tokio::test]
async fn test_run_one_response_per_line() -> anyhow::Result<()> {
    let (dispatcher, translator) = dispatcher_with(StaticTranslator::fixed("你好"));

    let input = [
        r#"{"command":"init","data":{"tencent_ak":"AK","tencent_secret":"SK"}}"#,
        "not json",
        "",
        r#"{"command":"translateText","data":{"text":"hello","src":"","to":""}}"#,
        r#"{"command":"exit"}"#,
        r#"{"command":"translateText","data":{"text":"never"}}"#,
    ]
    .join("\n");

    let mut output = Vec::new();
    run(&dispatcher, input.as_bytes(), &mut output).await?;

    let responses = String::from_utf8(output)?
        .lines()
        .map(serde_json::from_str::<Response>)
        .collect::<Result<Vec<_>, _>>()?;

    assert_eq!(responses.len(), 4);
    assert_eq!(responses[0].code, 0);
    assert_eq!(responses[1].code, 1);
    assert_eq!(responses[2].code, 0);
    assert_eq!(responses[2].data.as_ref().unwrap()["text"], json!("你好"));
    assert_eq!(responses[3], Response::ok("exit"));
    assert_eq!(translator.calls(), 1);

    Ok(())
}

#[tokio::test]
async fn test_run_answers_invalid_utf8_and_continues() -> anyhow::Result<()> {
    let (dispatcher, translator) = dispatcher_with(StaticTranslator::fixed("你好"));

    let mut input = b"\xff\xfe garbage\n".to_vec();
    input.extend_from_slice(br#"{"command":"translateText","data":{"text":"hello"}}"#);
    input.push(b'\n');

    let mut output = Vec::new();
    run(&dispatcher, input.as_slice(), &mut output).await?;

    let responses = String::from_utf8(output)?
        .lines()
        .map(serde_json::from_str::<Response>)
        .collect::<Result<Vec<_>, _>>()?;

    assert_eq!(responses.len(), 2);
    assert_eq!(responses[0].code, 1);
    assert!(responses[0].message.starts_with("invalid input: input is not valid UTF-8"));
    assert_eq!(responses[1].code, 0);
    assert_eq!(responses[1].data.as_ref().unwrap()["text"], json!("你好"));
    assert_eq!(translator.calls(), 1);

    Ok(())
}

#[tokio::test]
async fn test_run_stops_at_end_of_input() -> anyhow::Result<()> {
    let (dispatcher, _) = dispatcher_with(StaticTranslator::echo());

    let mut output = Vec::new();
    run(&dispatcher, r#"{"command":"ping"}"#.as_bytes(), &mut output).await?;

    let output = String::from_utf8(output)?;
    assert_eq!(output.lines().count(), 1);
    assert!(output.contains("unknown command: ping"));

    Ok(())
}

#[tokio::test]
async fn test_run_leaves_audit_log_written() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("app.log");
    let (dispatcher, _) = dispatcher_with(StaticTranslator::fixed("你好"));

    let init = json!({
        "command": "init",
        "data": {"log_file_enable": true, "log_file_path": path.to_string_lossy()},
    });
    let input = [
        init.to_string(),
        r#"{"command":"translateText","data":{"text":"hello"}}"#.to_string(),
        r#"{"command":"exit"}"#.to_string(),
    ]
    .join("\n");

    let mut output = Vec::new();
    run(&dispatcher, input.as_bytes(), &mut output).await?;

    let content = std::fs::read_to_string(&path)?;
    assert_eq!(content.lines().count(), 2);
    assert!(content.contains("translate success - text: hello, result: 你好"));

    Ok(())
}
