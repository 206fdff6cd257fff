// ABOUTME: Single-consumer build queue serialising all deploys on this host.
// ABOUTME: Bounded; a full buffer rejects the job so the HTTP layer can 503.

use crate::error::{Error, Result};
use futures::future::BoxFuture;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A queued deploy. The closure receives the queue's cancellation token and
/// is expected to abort at its next natural suspension point once fired.
pub struct Job {
    pub app_id: String,
    pub run: Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, Result<()>> + Send>,
}

pub struct BuildQueue {
    tx: mpsc::Sender<Job>,
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl BuildQueue {
    /// Create the queue and start its single consumer task.
    ///
    /// One consumer is the whole point: deploys must not run concurrently,
    /// or they race over ports, toolchain state, the proxy config dir, and
    /// the app directories.
    pub fn new(capacity: usize) -> BuildQueue {
        let (tx, rx) = mpsc::channel(capacity);
        let cancel = CancellationToken::new();
        let worker = tokio::spawn(consume(rx, cancel.clone()));
        BuildQueue {
            tx,
            cancel,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Non-blocking enqueue. A full buffer is backpressure, not an error to
    /// retry here.
    pub fn enqueue(&self, job: Job) -> Result<()> {
        self.tx.try_send(job).map_err(|_| Error::QueueFull)
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancel the in-flight deploy (at its next step boundary) and wait for
    /// the consumer to wind down.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let worker = self.worker.lock().unwrap().take();
        if let Some(worker) = worker {
            let _ = worker.await;
        }
    }
}

async fn consume(mut rx: mpsc::Receiver<Job>, cancel: CancellationToken) {
    loop {
        let job = tokio::select! {
            _ = cancel.cancelled() => return,
            job = rx.recv() => match job {
                Some(job) => job,
                None => return,
            },
        };

        tracing::info!(app_id = %job.app_id, "buildqueue: starting job");
        match (job.run)(cancel.clone()).await {
            Ok(()) => tracing::info!(app_id = %job.app_id, "buildqueue: job completed"),
            Err(err) => tracing::warn!(app_id = %job.app_id, %err, "buildqueue: job failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn job(app_id: &str, counter: Arc<AtomicUsize>) -> Job {
        Job {
            app_id: app_id.to_string(),
            run: Box::new(move |_cancel| {
                Box::pin(async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            }),
        }
    }

    #[tokio::test]
    async fn jobs_run_in_order_on_one_consumer() {
        let queue = BuildQueue::new(10);
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..5 {
            let order = Arc::clone(&order);
            queue
                .enqueue(Job {
                    app_id: format!("pr-{i}"),
                    run: Box::new(move |_c| {
                        Box::pin(async move {
                            order.lock().unwrap().push(i);
                            Ok(())
                        })
                    }),
                })
                .unwrap();
        }

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn overflow_is_rejected() {
        // A blocked consumer keeps queued jobs in the buffer.
        let queue = BuildQueue::new(2);
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let release_rx = Arc::new(tokio::sync::Mutex::new(Some(release_rx)));

        let blocker = Arc::clone(&release_rx);
        queue
            .enqueue(Job {
                app_id: "blocker".to_string(),
                run: Box::new(move |_c| {
                    Box::pin(async move {
                        let rx = blocker.lock().await.take().unwrap();
                        let _ = rx.await;
                        Ok(())
                    })
                }),
            })
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let counter = Arc::new(AtomicUsize::new(0));
        queue.enqueue(job("pr-1", Arc::clone(&counter))).unwrap();
        queue.enqueue(job("pr-2", Arc::clone(&counter))).unwrap();
        let overflow = queue.enqueue(job("pr-3", Arc::clone(&counter)));
        assert!(matches!(overflow, Err(Error::QueueFull)));

        release_tx.send(()).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn stop_cancels_and_joins() {
        let queue = BuildQueue::new(4);
        let started = Arc::new(AtomicUsize::new(0));

        let flag = Arc::clone(&started);
        queue
            .enqueue(Job {
                app_id: "long".to_string(),
                run: Box::new(move |cancel| {
                    Box::pin(async move {
                        flag.fetch_add(1, Ordering::SeqCst);
                        cancel.cancelled().await;
                        Err(Error::Cancelled)
                    })
                }),
            })
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(started.load(Ordering::SeqCst), 1);
        queue.stop().await;
    }
}
