use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[cfg(test)]
use serde_json::json;

pub const DEFAULT_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_AUDIT_PATH: &str = "app.log";

/// 某一时刻的配置快照，只读
#[derive(Debug, Clone, Default)]
pub struct Settings {
    values: Arc<Map<String, Value>>,
}

impl Settings {
    pub fn new(values: Map<String, Value>) -> Self {
        Settings {
            values: Arc::new(values),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// 字符串值，不存在或类型不符时返回空串
    pub fn get_string(&self, key: &str) -> String {
        match self.values.get(key) {
            Some(Value::String(s)) => s.clone(),
            _ => String::new(),
        }
    }

    /// `true`、非零数字或字符串 `"true"` 视为真
    pub fn get_bool(&self, key: &str) -> bool {
        match self.values.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
            Some(Value::String(s)) => s == "true",
            _ => false,
        }
    }

    /// 字符串按整数解析，浮点数向零截断；其余情况返回 0
    pub fn get_int(&self, key: &str) -> i64 {
        match self.values.get(key) {
            Some(Value::String(s)) => s.parse::<i64>().unwrap_or(0),
            Some(Value::Number(n)) => {
                if let Some(i) = n.as_i64() {
                    i
                } else if let Some(u) = n.as_u64() {
                    i64::try_from(u).unwrap_or(i64::MAX)
                } else {
                    n.as_f64().map(|f| f.trunc() as i64).unwrap_or(0)
                }
            }
            _ => 0,
        }
    }

    /// 上游调用的超时时间，未设置或非正数时为 60 秒
    pub fn timeout(&self) -> Duration {
        match self.get_int("timeout") {
            secs if secs <= 0 => Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            secs => Duration::from_secs(secs as u64),
        }
    }

    pub fn audit_enabled(&self) -> bool {
        self.get_bool("log_file_enable")
    }

    pub fn audit_path(&self) -> PathBuf {
        match self.get_string("log_file_path") {
            path if path.is_empty() => PathBuf::from(DEFAULT_AUDIT_PATH),
            path => PathBuf::from(path),
        }
    }
}

/// 进程内共享的配置
///
/// 读和整体替换互斥；锁内只交换或克隆 `Arc`，读者拿到的总是完整的旧快照或新快照。
#[derive(Debug, Default)]
pub struct SettingsStore {
    current: Mutex<Settings>,
}

impl SettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 整体替换配置，不做合并
    pub fn replace(&self, values: Map<String, Value>) {
        let next = Settings::new(values);
        let previous = std::mem::replace(&mut *self.current.lock(), next);
        drop(previous);
    }

    pub fn snapshot(&self) -> Settings {
        self.current.lock().clone()
    }

    pub fn get_string(&self, key: &str) -> String {
        self.snapshot().get_string(key)
    }

    pub fn get_bool(&self, key: &str) -> bool {
        self.snapshot().get_bool(key)
    }

    pub fn get_int(&self, key: &str) -> i64 {
        self.snapshot().get_int(key)
    }
}

#[cfg(test)]
fn object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

#[cfg(test)]
fn store_with(value: Value) -> SettingsStore {
    let store = SettingsStore::new();
    store.replace(object(value));
    store
}

#[test]
fn test_get_bool() {
    let store = store_with(json!({
        "bool_true": true,
        "bool_false": false,
        "str_true": "true",
        "str_false": "false",
        "str_one": "1",
        "num_one": 1,
        "num_zero": 0,
        "float": 0.5,
        "list": [true],
    }));

    assert!(store.get_bool("bool_true"));
    assert!(store.get_bool("str_true"));
    assert!(store.get_bool("num_one"));
    assert!(store.get_bool("float"));

    assert!(!store.get_bool("bool_false"));
    assert!(!store.get_bool("str_false"));
    assert!(!store.get_bool("str_one"));
    assert!(!store.get_bool("num_zero"));
    assert!(!store.get_bool("list"));
    assert!(!store.get_bool("missing"));
}

#[test]
fn test_get_int() {
    let store = store_with(json!({
        "int": 30,
        "negative": -4,
        "str": "45",
        "bad_str": "forty",
        "float": 12.9,
        "negative_float": -2.7,
        "bool": true,
        "object": {"a": 1},
    }));

    assert_eq!(store.get_int("int"), 30);
    assert_eq!(store.get_int("negative"), -4);
    assert_eq!(store.get_int("str"), 45);
    assert_eq!(store.get_int("bad_str"), 0);
    assert_eq!(store.get_int("float"), 12);
    assert_eq!(store.get_int("negative_float"), -2);
    assert_eq!(store.get_int("bool"), 0);
    assert_eq!(store.get_int("object"), 0);
    assert_eq!(store.get_int("missing"), 0);
}

#[test]
fn test_get_string() {
    let store = store_with(json!({"tencent_ak": "AK", "timeout": 30}));

    assert_eq!(store.get_string("tencent_ak"), "AK");
    assert_eq!(store.get_string("timeout"), "");
    assert_eq!(store.get_string("missing"), "");
}

#[test]
fn test_timeout_defaults() {
    assert_eq!(Settings::default().timeout(), Duration::from_secs(60));
    assert_eq!(
        store_with(json!({"timeout": -5})).snapshot().timeout(),
        Duration::from_secs(60)
    );
    assert_eq!(
        store_with(json!({"timeout": "bogus"})).snapshot().timeout(),
        Duration::from_secs(60)
    );
    assert_eq!(
        store_with(json!({"timeout": 30})).snapshot().timeout(),
        Duration::from_secs(30)
    );
}

#[test]
fn test_replace_discards_previous() {
    let store = store_with(json!({"tencent_ak": "AK", "log_file_enable": true}));
    let before = store.snapshot();

    store.replace(object(json!({"tencent_secret": "SK"})));

    assert_eq!(store.get_string("tencent_ak"), "");
    assert_eq!(store.get_string("tencent_secret"), "SK");
    assert!(!store.get_bool("log_file_enable"));

    // 旧快照不受影响
    assert_eq!(before.get_string("tencent_ak"), "AK");
    assert!(before.get_bool("log_file_enable"));
}

#[test]
fn test_concurrent_replace_is_atomic() {
    let store = Arc::new(SettingsStore::new());

    let writers = (0..4)
        .map(|n| {
            let store = store.clone();
            std::thread::spawn(move || {
                for i in 0..500 {
                    let tag = format!("{}-{}", n, i);
                    store.replace(object(json!({"tencent_ak": tag.clone(), "tencent_secret": tag})));
                }
            })
        })
        .collect::<Vec<_>>();

    let readers = (0..4)
        .map(|_| {
            let store = store.clone();
            std::thread::spawn(move || {
                for _ in 0..500 {
                    let snapshot = store.snapshot();
                    assert_eq!(
                        snapshot.get_string("tencent_ak"),
                        snapshot.get_string("tencent_secret")
                    );
                }
            })
        })
        .collect::<Vec<_>>();

    for handle in writers.into_iter().chain(readers) {
        handle.join().unwrap();
    }
}
