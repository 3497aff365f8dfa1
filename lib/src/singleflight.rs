use crate::{RequestKey, Result, TranslateError, TranslateRequest};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::debug;
#[cfg(test)]
use futures_util::future::join_all;
#[cfg(test)]
use std::sync::atomic::{AtomicUsize, Ordering};
#[cfg(test)]
use std::time::Duration;

type Call = Shared<BoxFuture<'static, Result<String>>>;

/// 合并相同请求的并发调用
///
/// 同一个 [`RequestKey`] 同时只有一个上游调用，期间到达的调用者等待并拿到同一个结果。
/// 调用完成后记录立即移除，之后的请求会重新发起调用，不缓存结果。
#[derive(Default, Clone)]
pub struct Group {
    calls: Arc<Mutex<HashMap<RequestKey, Call>>>,
}

impl Group {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前进行中的调用数
    pub fn in_flight(&self) -> usize {
        self.calls.lock().len()
    }

    /// 没有进行中的调用时用 `produce` 发起一次，否则等待已有调用的结果
    ///
    /// `produce` 收到的是规范化后的请求。
    pub async fn resolve<F, Fut>(&self, request: &TranslateRequest, produce: F) -> Result<String>
    where
        F: FnOnce(TranslateRequest) -> Fut,
        Fut: Future<Output = Result<String>> + Send + 'static,
    {
        let key = RequestKey::new(request);

        let call = {
            let mut calls = self.calls.lock();
            match calls.get(&key) {
                Some(call) => {
                    debug!(key = %key, "joining in-flight translation");
                    call.clone()
                }
                None => {
                    debug!(key = %key, "starting translation");
                    let call = self.track(key.clone(), produce(request.normalized()));
                    calls.insert(key, call.clone());
                    call
                }
            }
        };

        call.await
    }

    /// 包装上游调用，结束时先移除记录再把结果交给等待者
    ///
    /// 上游 panic 转成 `Upstream` 错误交给所有等待者，记录同样被移除。
    fn track<Fut>(&self, key: RequestKey, fut: Fut) -> Call
    where
        Fut: Future<Output = Result<String>> + Send + 'static,
    {
        let retire = Retire {
            calls: self.calls.clone(),
            key,
        };
        async move {
            let result = AssertUnwindSafe(fut).catch_unwind().await;
            drop(retire);
            result.unwrap_or_else(|_| {
                Err(TranslateError::Upstream("translation panicked".to_string()))
            })
        }
        .boxed()
        .shared()
    }
}

/// drop 时移除对应的进行中记录
struct Retire {
    calls: Arc<Mutex<HashMap<RequestKey, Call>>>,
    key: RequestKey,
}

impl Drop for Retire {
    fn drop(&mut self) {
        self.calls.lock().remove(&self.key);
    }
}

#[cfg(test)]
fn counting(
    counter: &Arc<AtomicUsize>,
    output: Result<String>,
) -> impl FnOnce(TranslateRequest) -> BoxFuture<'static, Result<String>> {
    let counter = counter.clone();
    move |_| {
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            output
        }
        .boxed()
    }
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_calls_collapse() {
    let group = Group::new();
    let counter = Arc::new(AtomicUsize::new(0));
    let request = TranslateRequest::new("hello", "en", "zh");

    let results = join_all((0..10).map(|n| {
        group.resolve(&request, counting(&counter, Ok(format!("你好 {}", n))))
    }))
    .await;

    assert_eq!(counter.load(Ordering::SeqCst), 1);
    for result in results {
        assert_eq!(result, Ok("你好 0".to_string()));
    }
    assert_eq!(group.in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_calls_share_error() {
    let group = Group::new();
    let counter = Arc::new(AtomicUsize::new(0));
    let request = TranslateRequest::new("hello", "en", "zh");
    let error = TranslateError::Upstream("AuthFailure".to_string());

    let results = join_all(
        (0..5).map(|_| group.resolve(&request, counting(&counter, Err(error.clone())))),
    )
    .await;

    assert_eq!(counter.load(Ordering::SeqCst), 1);
    for result in results {
        assert_eq!(result, Err(error.clone()));
    }
}

#[tokio::test(start_paused = true)]
async fn test_completed_call_is_retired() {
    let group = Group::new();
    let counter = Arc::new(AtomicUsize::new(0));
    let request = TranslateRequest::new("hello", "en", "zh");

    let first = group
        .resolve(&request, counting(&counter, Ok("first".to_string())))
        .await;
    let second = group
        .resolve(&request, counting(&counter, Ok("second".to_string())))
        .await;

    assert_eq!(counter.load(Ordering::SeqCst), 2);
    assert_eq!(first, Ok("first".to_string()));
    assert_eq!(second, Ok("second".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_failed_call_is_retired() {
    let group = Group::new();
    let counter = Arc::new(AtomicUsize::new(0));
    let request = TranslateRequest::new("hello", "en", "zh");

    let first = group
        .resolve(&request, counting(&counter, Err(TranslateError::EmptyResult)))
        .await;
    let second = group
        .resolve(&request, counting(&counter, Ok("你好".to_string())))
        .await;

    assert_eq!(first, Err(TranslateError::EmptyResult));
    assert_eq!(second, Ok("你好".to_string()));
    assert_eq!(counter.load(Ordering::SeqCst), 2);
}

#[cfg(test)]
async fn crash() -> Result<String> {
    tokio::time::sleep(Duration::from_millis(50)).await;
    panic!("provider crashed");
}

#[tokio::test(start_paused = true)]
async fn test_panicking_producer_is_retired() {
    let group = Group::new();
    let counter = Arc::new(AtomicUsize::new(0));
    let request = TranslateRequest::new("hello", "en", "zh");

    let (first, joined) = tokio::join!(
        group.resolve(&request, |_| crash()),
        group.resolve(&request, counting(&counter, Ok("unused".to_string()))),
    );

    let failure = Err(TranslateError::Upstream("translation panicked".to_string()));
    assert_eq!(first, failure);
    assert_eq!(joined, failure);
    assert_eq!(group.in_flight(), 0);

    let again = group
        .resolve(&request, counting(&counter, Ok("你好".to_string())))
        .await;
    assert_eq!(again, Ok("你好".to_string()));
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_distinct_keys_run_separately() {
    let group = Group::new();
    let counter = Arc::new(AtomicUsize::new(0));
    let hello = TranslateRequest::new("hello", "en", "zh");
    let world = TranslateRequest::new("world", "en", "zh");

    let (a, b) = tokio::join!(
        group.resolve(&hello, counting(&counter, Ok("你好".to_string()))),
        group.resolve(&world, counting(&counter, Ok("世界".to_string()))),
    );

    assert_eq!(counter.load(Ordering::SeqCst), 2);
    assert_eq!(a, Ok("你好".to_string()));
    assert_eq!(b, Ok("世界".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_equivalent_requests_collapse_after_normalization() {
    let group = Group::new();
    let counter = Arc::new(AtomicUsize::new(0));
    let implicit = TranslateRequest::new("hello", "", "");
    let explicit = TranslateRequest::new("hello", "en", "zh");

    let (a, b) = tokio::join!(
        group.resolve(&implicit, counting(&counter, Ok("你好".to_string()))),
        group.resolve(&explicit, counting(&counter, Ok("unused".to_string()))),
    );

    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert_eq!(a, b);
}

#[tokio::test(start_paused = true)]
async fn test_producer_receives_normalized_request() {
    let group = Group::new();

    let result = group
        .resolve(&TranslateRequest::new("hello", "ja", ""), |request| async move {
            Ok(format!("{}>{}", request.source_language, request.target_language))
        })
        .await;

    assert_eq!(result, Ok("en>zh".to_string()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_collapse_across_tasks() {
    let group = Group::new();
    let counter = Arc::new(AtomicUsize::new(0));
    let (release, gate) = tokio::sync::watch::channel(false);

    let first = {
        let group = group.clone();
        let counter = counter.clone();
        let mut gate = gate.clone();
        tokio::spawn(async move {
            group
                .resolve(&TranslateRequest::new("hello", "en", "zh"), move |_| async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    let _ = gate.wait_for(|open| *open).await;
                    Ok("你好".to_string())
                })
                .await
        })
    };

    while group.in_flight() == 0 {
        tokio::task::yield_now().await;
    }

    let arrived = Arc::new(AtomicUsize::new(0));
    let waiters = (0..8)
        .map(|_| {
            let group = group.clone();
            let counter = counter.clone();
            let arrived = arrived.clone();
            tokio::spawn(async move {
                arrived.fetch_add(1, Ordering::SeqCst);
                group
                    .resolve(&TranslateRequest::new("hello", "en", "zh"), move |_| async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok("duplicate".to_string())
                    })
                    .await
            })
        })
        .collect::<Vec<_>>();

    // 等待者全部挂上之后再放行
    while arrived.load(Ordering::SeqCst) < 8 {
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
    let _ = release.send(true);

    assert_eq!(first.await.unwrap(), Ok("你好".to_string()));
    for waiter in waiters {
        assert_eq!(waiter.await.unwrap(), Ok("你好".to_string()));
    }
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}
