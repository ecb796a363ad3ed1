//! Bounded, lossy line delivery.
//!
//! The engine never waits on its consumer: pushing into a full queue evicts
//! the oldest queued line. Losing history under backpressure is accepted in
//! exchange for keeping discovery and reading live.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::stream::{self, Stream};
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::reader::Line;

#[derive(Debug)]
struct Shared {
    buf: Mutex<VecDeque<Line>>,
    capacity: usize,
    closed: AtomicBool,
    dropped: AtomicU64,
    notify: Notify,
}

/// Creates a queue holding at most `capacity` lines (minimum one).
pub(crate) fn line_queue(capacity: usize) -> (LineSender, LineReceiver) {
    let capacity = capacity.max(1);
    let shared = Arc::new(Shared {
        buf: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
        capacity,
        closed: AtomicBool::new(false),
        dropped: AtomicU64::new(0),
        notify: Notify::new(),
    });
    (
        LineSender {
            shared: Arc::clone(&shared),
        },
        LineReceiver { shared },
    )
}

/// Producer half, owned by the engine loop.
#[derive(Debug)]
pub(crate) struct LineSender {
    shared: Arc<Shared>,
}

impl LineSender {
    /// Queues `line`, evicting the oldest entry if the queue is full.
    pub fn push(&self, line: Line) {
        {
            let mut buf = self.shared.buf.lock();
            if buf.len() >= self.shared.capacity {
                buf.pop_front();
                self.shared.dropped.fetch_add(1, Ordering::Relaxed);
            }
            buf.push_back(line);
        }
        self.shared.notify.notify_one();
    }

    /// Marks the queue closed. Lines already queued can still be received.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.notify.notify_one();
    }
}

impl Drop for LineSender {
    fn drop(&mut self) {
        self.close();
    }
}

/// Consumer half of the line queue.
#[derive(Debug)]
pub struct LineReceiver {
    shared: Arc<Shared>,
}

impl LineReceiver {
    /// Waits for the next line. Returns `None` once the engine has stopped
    /// and every queued line has been received.
    pub async fn recv(&mut self) -> Option<Line> {
        loop {
            if let Some(line) = self.try_recv() {
                return Some(line);
            }
            if self.shared.closed.load(Ordering::Acquire) {
                // A push may have raced the close flag.
                return self.try_recv();
            }
            self.shared.notify.notified().await;
        }
    }

    /// Takes a queued line without waiting.
    pub fn try_recv(&mut self) -> Option<Line> {
        self.shared.buf.lock().pop_front()
    }

    /// Number of lines currently queued.
    pub fn len(&self) -> usize {
        self.shared.buf.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total lines evicted because the consumer fell behind.
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    /// Adapts the receiver into a [`Stream`] of lines.
    pub fn into_stream(self) -> impl Stream<Item = Line> {
        stream::unfold(self, |mut rx| async move {
            let line = rx.recv().await?;
            Some((line, rx))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use std::time::Duration;

    fn line(text: &str) -> Line {
        Line::new("a.log", text)
    }

    #[test]
    fn test_drop_oldest_when_full() {
        let (tx, mut rx) = line_queue(2);
        tx.push(line("1"));
        tx.push(line("2"));
        tx.push(line("3"));

        assert_eq!(rx.len(), 2);
        assert_eq!(rx.dropped(), 1);
        assert_eq!(rx.try_recv().unwrap().text(), "2");
        assert_eq!(rx.try_recv().unwrap().text(), "3");
        assert!(rx.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_recv_drains_after_close() {
        let (tx, mut rx) = line_queue(8);
        tx.push(line("a"));
        tx.push(line("b"));
        drop(tx);

        assert_eq!(rx.recv().await.unwrap().text(), "a");
        assert_eq!(rx.recv().await.unwrap().text(), "b");
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_recv_wakes_on_push() {
        let (tx, mut rx) = line_queue(8);

        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            tx.push(line("late"));
            tx
        });

        let got = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.text(), "late");
        drop(handle.await.unwrap());
    }

    #[tokio::test]
    async fn test_into_stream() {
        let (tx, rx) = line_queue(8);
        for t in ["x", "y", "z"] {
            tx.push(line(t));
        }
        tx.close();

        let texts: Vec<String> = rx
            .into_stream()
            .map(|l| l.text().to_string())
            .collect()
            .await;
        assert_eq!(texts, vec!["x", "y", "z"]);
    }
}
