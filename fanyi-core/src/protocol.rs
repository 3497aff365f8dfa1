use fanyi_lib::TranslateError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 一行输入
#[derive(Debug, Clone, Deserialize)]
pub struct Command {
    pub command: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TranslateTextData {
    /// 原文
    #[serde(default)]
    pub text: String,
    /// 源语言
    #[serde(default)]
    pub src: String,
    /// 目标语言
    #[serde(default)]
    pub to: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InitResponse {
    pub success: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TranslateTextResponse {
    /// 译文
    pub text: String,
    /// 原文
    pub original: String,
    pub src: String,
    pub to: String,
}

/// 一行输出，`code == 0` 表示成功
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Response {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Response {
    pub fn ok(message: impl Into<String>) -> Self {
        Response {
            code: 0,
            message: message.into(),
            data: None,
        }
    }

    pub fn ok_with<T: Serialize>(message: impl Into<String>, data: T) -> serde_json::Result<Self> {
        Ok(Response {
            code: 0,
            message: message.into(),
            data: Some(serde_json::to_value(data)?),
        })
    }

    pub fn error(err: &TranslateError) -> Self {
        Response {
            code: err.code(),
            message: err.to_string(),
            data: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == 0
    }
}

#[test]
fn test_response_omits_missing_data() -> anyhow::Result<()> {
    let line = serde_json::to_string(&Response::ok("exit"))?;
    assert_eq!(line, r#"{"code":0,"message":"exit"}"#);

    let line = serde_json::to_string(&Response::ok_with(
        "initialized",
        InitResponse { success: true },
    )?)?;
    assert_eq!(line, r#"{"code":0,"message":"initialized","data":{"success":true}}"#);

    Ok(())
}

#[test]
fn test_error_response() {
    let response = Response::error(&TranslateError::UnknownCommand("foo".to_string()));
    assert_eq!(response.code, 1);
    assert_eq!(response.message, "unknown command: foo");
    assert!(!response.is_success());
}

#[test]
fn test_command_without_data() -> anyhow::Result<()> {
    let command = serde_json::from_str::<Command>(r#"{"command":"exit"}"#)?;
    assert_eq!(command.command, "exit");
    assert!(command.data.is_null());
    Ok(())
}
