use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use fanyi_lib::{Settings, TranslateRequest, TranslateResult, Translator};
use hmac::{Hmac, Mac};
use reqwest::{Client, Request};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tokio::sync::OnceCell;
use tracing::debug;

#[cfg(test)]
use fanyi_lib::utils::test_translate;

const HOST: &str = "tmt.tencentcloudapi.com";
const SERVICE: &str = "tmt";
const ACTION: &str = "TextTranslate";
const VERSION: &str = "2018-03-21";
const ALGORITHM: &str = "TC3-HMAC-SHA256";
const CONTENT_TYPE: &str = "application/json; charset=utf-8";

pub const DEFAULT_REGION: &str = "ap-guangzhou";
pub const DEFAULT_PROJECT_ID: i64 = 88;

#[derive(Serialize, Deserialize, Debug, Clone)]
struct TencentCredential {
    pub secret_id: String,
    pub secret_key: String,
}

impl TencentCredential {
    fn from_settings(settings: &Settings) -> Result<Self> {
        let secret_id = settings.get_string("tencent_ak");
        let secret_key = settings.get_string("tencent_secret");

        if secret_id.is_empty() || secret_key.is_empty() {
            bail!("missing tencent_ak / tencent_secret, send init first");
        }

        Ok(TencentCredential {
            secret_id,
            secret_key,
        })
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct TencentCloudRequest {
    pub host: String,
    pub service: String,
    pub action: String,
    pub region: String,
    pub version: String,
    pub credential: TencentCredential,
    pub body: Value,
}

impl TencentCloudRequest {
    fn build_request(&self, client: &Client, timestamp: i64) -> Result<Request> {
        let payload = serde_json::to_string(&self.body)?;
        let authorization = self.authorization(&payload, timestamp)?;

        let request = client
            .post(format!("https://{}/", self.host))
            .header("Host", &self.host)
            .header("Content-Type", CONTENT_TYPE)
            .header("X-TC-Action", &self.action)
            .header("X-TC-Version", &self.version)
            .header("X-TC-Region", &self.region)
            .header("X-TC-Timestamp", timestamp.to_string())
            .header("Authorization", authorization)
            .body(payload)
            .build()?;

        Ok(request)
    }

    fn signed_headers(&self) -> &'static str {
        "content-type;host;x-tc-action"
    }

    fn canonical_request(&self, payload: &str) -> String {
        let canonical_headers = format!(
            "content-type:{}\nhost:{}\nx-tc-action:{}\n",
            CONTENT_TYPE,
            self.host,
            self.action.to_lowercase()
        );

        [
            "POST".to_string(),
            "/".to_string(),
            String::new(),
            canonical_headers,
            self.signed_headers().to_string(),
            hex::encode(Sha256::digest(payload.as_bytes())),
        ]
        .join("\n")
    }

    fn authorization(&self, payload: &str, timestamp: i64) -> Result<String> {
        let date = chrono::DateTime::from_timestamp(timestamp, 0)
            .ok_or(anyhow!("invalid timestamp: {}", timestamp))?
            .format("%Y-%m-%d")
            .to_string();

        let credential_scope = format!("{}/{}/tc3_request", date, self.service);

        let string_to_sign = [
            ALGORITHM.to_string(),
            timestamp.to_string(),
            credential_scope.clone(),
            hex::encode(Sha256::digest(self.canonical_request(payload).as_bytes())),
        ]
        .join("\n");

        let secret_date = hmac_sha256(
            format!("TC3{}", self.credential.secret_key).as_bytes(),
            &date,
        )?;
        let secret_service = hmac_sha256(&secret_date, &self.service)?;
        let secret_signing = hmac_sha256(&secret_service, "tc3_request")?;
        let signature = hex::encode(hmac_sha256(&secret_signing, &string_to_sign)?);

        Ok(format!(
            "{} Credential={}/{}, SignedHeaders={}, Signature={}",
            ALGORITHM,
            self.credential.secret_id,
            credential_scope,
            self.signed_headers(),
            signature
        ))
    }
}

fn hmac_sha256(key: &[u8], data: &str) -> Result<Vec<u8>> {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(key).map_err(|e| anyhow!("invalid hmac key: {}", e))?;
    mac.update(data.as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct TencentCloudResponseError {
    #[serde(rename = "Code")]
    pub code: String,
    #[serde(rename = "Message")]
    pub message: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct TextTranslateResponse {
    #[serde(rename = "RequestId", default)]
    pub request_id: String,
    #[serde(rename = "Error")]
    pub error: Option<TencentCloudResponseError>,
    #[serde(rename = "TargetText")]
    pub target_text: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct TencentCloudResponse {
    #[serde(rename = "Response")]
    pub response: TextTranslateResponse,
}

impl TencentCloudResponse {
    fn into_result(self) -> Result<TranslateResult> {
        if let Some(error) = self.response.error {
            bail!(
                "{}: {} (RequestId: {})",
                error.code,
                error.message,
                self.response.request_id
            );
        }

        Ok(TranslateResult {
            content: self.response.target_text,
        })
    }
}

/// 腾讯云机器翻译 TextTranslate
///
/// HTTP 客户端在第一次翻译时创建，之后复用。凭证每次从配置快照读取。
#[derive(Debug, Default)]
pub struct TencentTranslator {
    client: OnceCell<Client>,
}

impl TencentTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    async fn client(&self) -> Result<&Client> {
        self.client
            .get_or_try_init(|| async { Client::builder().build().map_err(|e| anyhow!(e)) })
            .await
    }

    fn build_cloud_request(
        &self,
        request: &TranslateRequest,
        settings: &Settings,
    ) -> Result<TencentCloudRequest> {
        let credential = TencentCredential::from_settings(settings)?;

        let region = match settings.get_string("tencent_region") {
            region if region.is_empty() => DEFAULT_REGION.to_string(),
            region => region,
        };

        let project_id = if settings.contains("tencent_project_id") {
            settings.get_int("tencent_project_id")
        } else {
            DEFAULT_PROJECT_ID
        };

        Ok(TencentCloudRequest {
            host: HOST.to_string(),
            service: SERVICE.to_string(),
            action: ACTION.to_string(),
            region,
            version: VERSION.to_string(),
            credential,
            body: json!({
                "SourceText": request.text,
                "Source": request.source_language,
                "Target": request.target_language,
                "ProjectId": project_id,
            }),
        })
    }
}

#[async_trait]
impl Translator for TencentTranslator {
    fn name(&self) -> &str {
        "tencent"
    }

    async fn translate(
        &self,
        request: &TranslateRequest,
        settings: &Settings,
    ) -> Result<TranslateResult> {
        let cloud_request = self.build_cloud_request(request, settings)?;
        let client = self.client().await?;

        let req = cloud_request.build_request(client, chrono::Utc::now().timestamp())?;
        debug!(region = %cloud_request.region, "sending TextTranslate");

        let resp = client.execute(req).await.map_err(|e| anyhow!(e))?;
        let status = resp.status();
        let body = resp.text().await.map_err(|e| anyhow!(e))?;

        let obj = serde_json::from_str::<TencentCloudResponse>(body.as_str())
            .with_context(|| format!("unexpected response ({}): {}", status, body))?;

        obj.into_result()
    }
}

#[cfg(test)]
fn settings(value: Value) -> Settings {
    Settings::new(value.as_object().cloned().unwrap_or_default())
}

#[cfg(test)]
fn sample_request() -> Result<TencentCloudRequest> {
    TencentTranslator::new().build_cloud_request(
        &TranslateRequest::new("hello", "en", "zh"),
        &settings(json!({"tencent_ak": "AKIDEXAMPLE", "tencent_secret": "SECRETEXAMPLE"})),
    )
}

#[test]
fn test_build_cloud_request_defaults() -> Result<()> {
    let request = sample_request()?;

    assert_eq!(request.region, "ap-guangzhou");
    assert_eq!(
        request.body,
        json!({"SourceText": "hello", "Source": "en", "Target": "zh", "ProjectId": 88})
    );

    Ok(())
}

#[test]
fn test_build_cloud_request_overrides() -> Result<()> {
    let request = TencentTranslator::new().build_cloud_request(
        &TranslateRequest::new("hello", "en", "ja"),
        &settings(json!({
            "tencent_ak": "AK",
            "tencent_secret": "SK",
            "tencent_region": "ap-shanghai",
            "tencent_project_id": 0,
        })),
    )?;

    assert_eq!(request.region, "ap-shanghai");
    assert_eq!(request.body["ProjectId"], json!(0));
    assert_eq!(request.body["Target"], json!("ja"));

    Ok(())
}

#[test]
fn test_missing_credentials() {
    let result = TencentTranslator::new().build_cloud_request(
        &TranslateRequest::new("hello", "en", "zh"),
        &settings(json!({"tencent_ak": "AK"})),
    );

    assert!(result.is_err());
}

#[test]
fn test_canonical_request() -> Result<()> {
    let request = sample_request()?;
    let canonical = request.canonical_request("{}");

    let expected = format!(
        "POST\n/\n\ncontent-type:application/json; charset=utf-8\nhost:tmt.tencentcloudapi.com\nx-tc-action:texttranslate\n\ncontent-type;host;x-tc-action\n{}",
        hex::encode(Sha256::digest(b"{}"))
    );
    assert_eq!(canonical, expected);

    Ok(())
}

#[test]
fn test_authorization() -> Result<()> {
    let request = sample_request()?;
    // 2023-11-14T22:13:20Z
    let timestamp = 1_700_000_000;

    let authorization = request.authorization("{}", timestamp)?;

    assert!(authorization.starts_with(
        "TC3-HMAC-SHA256 Credential=AKIDEXAMPLE/2023-11-14/tmt/tc3_request, SignedHeaders=content-type;host;x-tc-action, Signature="
    ));
    let signature = authorization.rsplit("Signature=").next().unwrap_or("");
    assert_eq!(signature.len(), 64);
    assert!(signature.chars().all(|c| c.is_ascii_hexdigit()));

    assert_eq!(authorization, request.authorization("{}", timestamp)?);
    assert_ne!(authorization, request.authorization("{\"a\":1}", timestamp)?);

    Ok(())
}

#[test]
fn test_build_request_headers() -> Result<()> {
    let request = sample_request()?;
    let built = request.build_request(&Client::new(), 1_700_000_000)?;

    assert_eq!(built.url().as_str(), "https://tmt.tencentcloudapi.com/");
    assert_eq!(built.headers()["X-TC-Action"], "TextTranslate");
    assert_eq!(built.headers()["X-TC-Version"], "2018-03-21");
    assert_eq!(built.headers()["X-TC-Region"], "ap-guangzhou");
    assert_eq!(built.headers()["X-TC-Timestamp"], "1700000000");
    assert!(built.headers().contains_key("Authorization"));

    Ok(())
}

#[test]
fn test_parse_success() -> Result<()> {
    let obj = serde_json::from_str::<TencentCloudResponse>(
        r#"{"Response":{"TargetText":"你好","Source":"en","Target":"zh","RequestId":"r-1"}}"#,
    )?;

    assert_eq!(obj.into_result()?.content, Some("你好".to_string()));

    Ok(())
}

#[test]
fn test_parse_missing_target_text() -> Result<()> {
    let obj = serde_json::from_str::<TencentCloudResponse>(r#"{"Response":{"RequestId":"r-2"}}"#)?;

    assert_eq!(obj.into_result()?.content, None);

    Ok(())
}

#[test]
fn test_parse_error() -> Result<()> {
    let obj = serde_json::from_str::<TencentCloudResponse>(
        r#"{"Response":{"Error":{"Code":"AuthFailure.SecretIdNotFound","Message":"The SecretId is not found"},"RequestId":"r-3"}}"#,
    )?;

    let err = obj.into_result().unwrap_err();
    assert_eq!(
        err.to_string(),
        "AuthFailure.SecretIdNotFound: The SecretId is not found (RequestId: r-3)"
    );

    Ok(())
}

#[tokio::test]
#[ignore = "requires TENCENT_AK / TENCENT_SECRET"]
async fn test_tencent() -> Result<()> {
    let (Ok(ak), Ok(secret)) = (
        std::env::var("TENCENT_AK"),
        std::env::var("TENCENT_SECRET"),
    ) else {
        return Ok(());
    };

    test_translate(
        TencentTranslator::new(),
        settings(json!({"tencent_ak": ak, "tencent_secret": secret})),
    )
    .await
}
