use parking_lot::Mutex;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::{mpsc, oneshot};

/// 10 MiB
pub const MAX_AUDIT_SIZE: u64 = 10 * 1024 * 1024;

/// 追加写入的诊断日志
///
/// 写入前检查文件大小，达到上限时先清空。大小检查和写入在同一把锁内完成。
/// 所有 I/O 错误都被忽略，不影响翻译本身。
#[derive(Debug)]
pub struct AuditLog {
    max_size: u64,
    lock: Mutex<()>,
}

impl Default for AuditLog {
    fn default() -> Self {
        AuditLog::with_max_size(MAX_AUDIT_SIZE)
    }
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_size(max_size: u64) -> Self {
        AuditLog {
            max_size,
            lock: Mutex::new(()),
        }
    }

    pub fn record(&self, path: &Path, message: &str) {
        let _guard = self.lock.lock();

        if let Err(err) = self.append(path, message) {
            tracing::trace!(path = %path.display(), "audit log write skipped: {}", err);
        }
    }

    fn append(&self, path: &Path, message: &str) -> std::io::Result<()> {
        if let Ok(metadata) = fs::metadata(path) {
            if metadata.len() >= self.max_size {
                OpenOptions::new().write(true).truncate(true).open(path)?;
            }
        }

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;

        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
        file.write_all(format!("[{}] {}\n", timestamp, message).as_bytes())
    }
}

enum Entry {
    Line { path: PathBuf, message: String },
    Flush(oneshot::Sender<()>),
}

/// 在独立线程上写 [`AuditLog`]，调用方不等待文件 I/O
///
/// 条目按提交顺序写入。所有句柄释放后线程退出。
#[derive(Debug, Clone)]
pub struct AuditWriter {
    sender: mpsc::UnboundedSender<Entry>,
}

impl AuditWriter {
    pub fn spawn(log: AuditLog) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Entry>();

        let spawned = std::thread::Builder::new()
            .name("fanyi-audit".to_string())
            .spawn(move || {
                while let Some(entry) = receiver.blocking_recv() {
                    match entry {
                        Entry::Line { path, message } => log.record(&path, &message),
                        Entry::Flush(done) => {
                            let _ = done.send(());
                        }
                    }
                }
            });

        if let Err(err) = spawned {
            tracing::warn!("audit writer not started, audit log disabled: {}", err);
        }

        AuditWriter { sender }
    }

    pub fn record(&self, path: PathBuf, message: String) {
        if self.sender.send(Entry::Line { path, message }).is_err() {
            tracing::trace!("audit writer stopped, entry dropped");
        }
    }

    /// 等待此前提交的条目全部写完
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.sender.send(Entry::Flush(done)).is_ok() {
            let _ = wait.await;
        }
    }
}

#[test]
fn test_record_appends_lines() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("app.log");
    let audit = AuditLog::new();

    audit.record(&path, "request hello");
    audit.record(&path, "success 你好");

    let content = fs::read_to_string(&path)?;
    let lines = content.lines().collect::<Vec<_>>();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with('['));
    assert!(lines[0].ends_with("] request hello"));
    assert!(lines[1].ends_with("] success 你好"));

    Ok(())
}

#[test]
fn test_truncates_when_over_ceiling() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("app.log");
    fs::write(&path, "x".repeat(128))?;

    let audit = AuditLog::with_max_size(64);
    audit.record(&path, "fresh");

    let content = fs::read_to_string(&path)?;
    assert!(!content.contains('x'));
    assert!(content.ends_with("] fresh\n"));

    Ok(())
}

#[test]
fn test_keeps_content_under_ceiling() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("app.log");
    fs::write(&path, "old\n")?;

    AuditLog::with_max_size(64).record(&path, "new");

    let content = fs::read_to_string(&path)?;
    assert!(content.starts_with("old\n"));
    assert!(content.ends_with("] new\n"));

    Ok(())
}

#[test]
fn test_unwritable_path_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing").join("app.log");

    AuditLog::new().record(&path, "dropped");

    assert!(!path.exists());
}

#[test]
fn test_concurrent_records_do_not_interleave() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("app.log");
    let audit = std::sync::Arc::new(AuditLog::new());

    let handles = (0..8)
        .map(|n| {
            let audit = audit.clone();
            let path = path.clone();
            std::thread::spawn(move || {
                for i in 0..50 {
                    audit.record(&path, &format!("writer {} line {}", n, i));
                }
            })
        })
        .collect::<Vec<_>>();

    for handle in handles {
        handle.join().unwrap();
    }

    let content = fs::read_to_string(&path)?;
    assert_eq!(content.lines().count(), 400);
    assert!(content.lines().all(|line| line.contains("] writer ")));

    Ok(())
}

#[tokio::test]
async fn test_writer_keeps_submission_order() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("app.log");
    let writer = AuditWriter::spawn(AuditLog::new());

    for i in 0..100 {
        writer.record(path.clone(), format!("line {}", i));
    }
    writer.flush().await;

    let content = fs::read_to_string(&path)?;
    let lines = content.lines().collect::<Vec<_>>();
    assert_eq!(lines.len(), 100);
    for (i, line) in lines.iter().enumerate() {
        assert!(line.ends_with(&format!("] line {}", i)));
    }

    Ok(())
}

#[tokio::test]
async fn test_writer_clones_share_one_thread() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("app.log");
    let writer = AuditWriter::spawn(AuditLog::with_max_size(64));
    let other = writer.clone();

    writer.record(path.clone(), "x".repeat(80));
    other.record(path.clone(), "fresh".to_string());
    other.flush().await;

    let content = fs::read_to_string(&path)?;
    assert!(!content.contains('x'));
    assert!(content.ends_with("] fresh\n"));

    Ok(())
}
