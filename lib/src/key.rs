use crate::TranslateRequest;
use sha2::{Digest, Sha256};
use std::fmt::{Display, Formatter};

/// 翻译请求的唯一标识
///
/// 对规范化后的 `(text, source, target)` 做 SHA-256。每个字段前写入长度，
/// 字段内容里的分隔符不会让两个不同请求得到同一个 key。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey(String);

impl RequestKey {
    pub fn new(request: &TranslateRequest) -> Self {
        let request = request.normalized();

        let mut hasher = Sha256::new();
        for field in [
            &request.text,
            &request.source_language,
            &request.target_language,
        ] {
            hasher.update((field.len() as u64).to_le_bytes());
            hasher.update(field.as_bytes());
        }

        RequestKey(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&TranslateRequest> for RequestKey {
    fn from(request: &TranslateRequest) -> Self {
        RequestKey::new(request)
    }
}

impl Display for RequestKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[test]
fn test_same_request_same_key() {
    let a = RequestKey::new(&TranslateRequest::new("hello", "en", "zh"));
    let b = RequestKey::new(&TranslateRequest::new("hello", "en", "zh"));
    assert_eq!(a, b);
    assert_eq!(a.as_str().len(), 64);
}

#[test]
fn test_key_uses_normalized_languages() {
    let explicit = RequestKey::new(&TranslateRequest::new("hello", "en", "zh"));

    assert_eq!(RequestKey::new(&TranslateRequest::new("hello", "", "")), explicit);
    assert_eq!(RequestKey::new(&TranslateRequest::new("hello", "ja", "")), explicit);
    assert_eq!(RequestKey::new(&TranslateRequest::new("hello", "", "zh")), explicit);
}

#[test]
fn test_different_fields_different_keys() {
    let base = RequestKey::new(&TranslateRequest::new("hello", "en", "zh"));

    assert_ne!(RequestKey::new(&TranslateRequest::new("hello!", "en", "zh")), base);
    assert_ne!(RequestKey::new(&TranslateRequest::new("hello", "fr", "zh")), base);
    assert_ne!(RequestKey::new(&TranslateRequest::new("hello", "en", "ja")), base);
}

#[test]
fn test_separator_in_text_does_not_collide() {
    let a = RequestKey::new(&TranslateRequest::new("a|b", "c", "d"));
    let b = RequestKey::new(&TranslateRequest::new("a", "b|c", "d"));
    assert_ne!(a, b);
}
