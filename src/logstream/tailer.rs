// ABOUTME: Offset-tracking poller that streams lines appended to a runtime log file.
// ABOUTME: Sends a trailing backlog first, then new complete lines every 500ms.

use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const POLL_INTERVAL: Duration = Duration::from_millis(500);
const CHANNEL_BUFFER: usize = 64;

pub struct Tailer {
    path: PathBuf,
    backlog: usize,
}

impl Tailer {
    /// Tail `path`, emitting the last `backlog` lines as initial context.
    pub fn new(path: PathBuf, backlog: usize) -> Tailer {
        Tailer { path, backlog }
    }

    /// Start tailing. The returned channel closes when `cancel` fires.
    /// The file not existing yet is fine: we wait for it.
    pub fn start(self, cancel: CancellationToken) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(CHANNEL_BUFFER);
        tokio::spawn(self.run(tx, cancel));
        rx
    }

    async fn run(self, tx: mpsc::Sender<String>, cancel: CancellationToken) {
        // Wait for the file to appear.
        let mut offset: u64;
        loop {
            match tokio::fs::metadata(&self.path).await {
                Ok(_) => {
                    offset = match self.send_backlog(&tx).await {
                        Some(offset) => offset,
                        None => return,
                    };
                    break;
                }
                Err(_) => {
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(POLL_INTERVAL) => {}
                    }
                }
            }
        }

        let mut partial = String::new();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
            }

            let Ok(meta) = tokio::fs::metadata(&self.path).await else {
                continue;
            };
            let size = meta.len();
            if size < offset {
                // Truncated: start over from the top.
                offset = 0;
                partial.clear();
            }
            if size == offset {
                continue;
            }

            match self.read_from(offset).await {
                Ok((chunk, new_offset)) => {
                    offset = new_offset;
                    partial.push_str(&chunk);
                    // Emit only complete lines; keep the trailing partial.
                    while let Some(idx) = partial.find('\n') {
                        let line: String = partial.drain(..=idx).collect();
                        if tx.send(line.trim_end_matches('\n').to_string()).await.is_err() {
                            return;
                        }
                    }
                }
                Err(_) => continue,
            }
        }
    }

    /// Send the last `backlog` complete lines; returns the offset to resume
    /// from, or None if the receiver went away.
    async fn send_backlog(&self, tx: &mpsc::Sender<String>) -> Option<u64> {
        let Ok(content) = tokio::fs::read_to_string(&self.path).await else {
            return Some(0);
        };
        let size = content.len() as u64;

        let lines: Vec<&str> = content.lines().collect();
        let start = lines.len().saturating_sub(self.backlog);
        for line in &lines[start..] {
            if tx.send(line.to_string()).await.is_err() {
                return None;
            }
        }
        Some(size)
    }

    async fn read_from(&self, offset: u64) -> std::io::Result<(String, u64)> {
        let mut file = tokio::fs::File::open(&self.path).await?;
        file.seek(std::io::SeekFrom::Start(offset)).await?;
        let mut buf = String::new();
        file.read_to_string(&mut buf).await?;
        let new_offset = offset + buf.len() as u64;
        Ok((buf, new_offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    async fn collect(rx: &mut mpsc::Receiver<String>, n: usize, within: Duration) -> Vec<String> {
        let mut out = Vec::new();
        let deadline = tokio::time::Instant::now() + within;
        while out.len() < n && tokio::time::Instant::now() < deadline {
            match tokio::time::timeout(Duration::from_millis(200), rx.recv()).await {
                Ok(Some(line)) => out.push(line),
                _ => {}
            }
        }
        out
    }

    #[tokio::test]
    async fn sends_backlog_then_new_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "old 1\nold 2\nold 3\n").unwrap();

        let cancel = CancellationToken::new();
        let mut rx = Tailer::new(path.clone(), 2).start(cancel.clone());

        let backlog = collect(&mut rx, 2, Duration::from_secs(2)).await;
        assert_eq!(backlog, vec!["old 2", "old 3"]);

        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "new 1").unwrap();
        drop(file);

        let new = collect(&mut rx, 1, Duration::from_secs(2)).await;
        assert_eq!(new, vec!["new 1"]);
        cancel.cancel();
    }

    #[tokio::test]
    async fn waits_for_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("late.log");

        let cancel = CancellationToken::new();
        let mut rx = Tailer::new(path.clone(), 10).start(cancel.clone());

        tokio::time::sleep(Duration::from_millis(200)).await;
        std::fs::write(&path, "appeared\n").unwrap();

        let lines = collect(&mut rx, 1, Duration::from_secs(3)).await;
        assert_eq!(lines, vec!["appeared"]);
        cancel.cancel();
    }

    #[tokio::test]
    async fn truncation_resets_offset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "first run line\n").unwrap();

        let cancel = CancellationToken::new();
        let mut rx = Tailer::new(path.clone(), 10).start(cancel.clone());
        let _ = collect(&mut rx, 1, Duration::from_secs(2)).await;

        // Truncate and write less than before.
        std::fs::write(&path, "fresh\n").unwrap();
        let lines = collect(&mut rx, 1, Duration::from_secs(3)).await;
        assert_eq!(lines, vec!["fresh"]);
        cancel.cancel();
    }

    #[tokio::test]
    async fn cancel_closes_the_channel() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "line\n").unwrap();

        let cancel = CancellationToken::new();
        let mut rx = Tailer::new(path, 10).start(cancel.clone());
        let _ = collect(&mut rx, 1, Duration::from_secs(2)).await;

        cancel.cancel();
        let closed = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if rx.recv().await.is_none() {
                    break;
                }
            }
        })
        .await;
        assert!(closed.is_ok());
    }
}
