//! Per-transfer bookkeeping and the byte-counting I/O adapters that drive it.

use super::types::{Transfer, TransferStatus};
use chrono::Utc;
use parking_lot::{ReentrantMutex, RwLock};
use std::cell::Cell;
use std::io::{self, Read, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;

/// Progress notification, called with the new percentage
pub type ProgressCallback = Arc<dyn Fn(f64) + Send + Sync>;

thread_local! {
    static CALLBACK_DEPTH: Cell<u32> = const { Cell::new(0) };
}

/// Marks the current thread as running a progress callback
struct CallbackScope;

impl CallbackScope {
    fn enter() -> Self {
        CALLBACK_DEPTH.with(|d| d.set(d.get() + 1));
        CallbackScope
    }

    fn active() -> bool {
        CALLBACK_DEPTH.with(|d| d.get() > 0)
    }
}

impl Drop for CallbackScope {
    fn drop(&mut self) {
        CALLBACK_DEPTH.with(|d| d.set(d.get().saturating_sub(1)));
    }
}

fn notify(callback: &ProgressCallback, progress: f64) {
    let _scope = CallbackScope::enter();
    callback(progress);
}

struct State {
    transfer: Transfer,
    started: Instant,
    sample_at: Instant,
    sample_bytes: u64,
    reported: Option<f64>,
}

/// Owns the record of one transfer
///
/// Callbacks fire while `emit` is held and `cancel` takes it as well, so once
/// `cancel` returns no further notification can arrive. The lock is reentrant
/// so a callback may cancel its own transfer. From inside a callback, cancelling
/// another transfer does not wait for that transfer's in-flight notification,
/// so two callbacks cancelling each other cannot deadlock.
pub struct TransferHandle {
    id: String,
    state: RwLock<State>,
    emit: ReentrantMutex<()>,
    cancel_notify: Notify,
    sample_interval: Duration,
}

impl TransferHandle {
    pub(crate) fn new(transfer: Transfer, sample_interval: Duration) -> Self {
        let now = Instant::now();
        Self {
            id: transfer.id.clone(),
            state: RwLock::new(State {
                transfer,
                started: now,
                sample_at: now,
                sample_bytes: 0,
                reported: None,
            }),
            emit: ReentrantMutex::new(()),
            cancel_notify: Notify::new(),
            sample_interval,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn snapshot(&self) -> Transfer {
        self.state.read().transfer.clone()
    }

    pub fn status(&self) -> TransferStatus {
        self.state.read().transfer.status
    }

    /// `Pending -> InProgress`. False if the transfer was cancelled meanwhile.
    pub(crate) fn start(&self) -> bool {
        let mut state = self.state.write();
        if state.transfer.status != TransferStatus::Pending {
            return false;
        }
        let now = Instant::now();
        state.transfer.status = TransferStatus::InProgress;
        state.started = now;
        state.sample_at = now;
        true
    }

    /// Resolves once the transfer is cancelled; pends forever otherwise
    pub(crate) async fn cancelled(&self) {
        loop {
            // registered before the check so a concurrent cancel is not missed
            let notified = self.cancel_notify.notified();
            if self.status() == TransferStatus::Cancelled {
                return;
            }
            notified.await;
        }
    }

    pub(crate) fn set_total(&self, total: u64) {
        self.state.write().transfer.total_size = total;
    }

    pub(crate) fn ensure_running(&self) -> io::Result<()> {
        if self.status() == TransferStatus::InProgress {
            Ok(())
        } else {
            Err(stopped(&self.id))
        }
    }

    /// Count `bytes` more and notify. False once the transfer left `InProgress`.
    pub(crate) fn advance(&self, bytes: u64, on_progress: Option<&ProgressCallback>) -> bool {
        let _emit = self.emit.lock();

        let progress = {
            let mut state = self.state.write();
            if state.transfer.status != TransferStatus::InProgress {
                return false;
            }

            state.transfer.transferred_size += bytes;
            let t = &state.transfer;
            let progress = if t.total_size > 0 {
                (t.transferred_size as f64 / t.total_size as f64 * 100.0)
                    .min(100.0)
                    .max(t.progress)
            } else {
                0.0
            };
            state.transfer.progress = progress;

            let elapsed = state.sample_at.elapsed();
            if elapsed >= self.sample_interval {
                let moved = state.transfer.transferred_size - state.sample_bytes;
                state.transfer.speed = moved as f64 / elapsed.as_secs_f64().max(f64::EPSILON);
                state.sample_at = Instant::now();
                state.sample_bytes = state.transfer.transferred_size;
            }

            state.reported = Some(progress);
            progress
        };

        if let Some(callback) = on_progress {
            notify(callback, progress);
        }
        true
    }

    /// Finish successfully. False if the transfer was cancelled first.
    pub(crate) fn complete(&self, on_progress: Option<&ProgressCallback>) -> bool {
        let _emit = self.emit.lock();

        let needs_final = {
            let mut state = self.state.write();
            if state.transfer.status != TransferStatus::InProgress {
                return false;
            }

            let elapsed = state.started.elapsed().as_secs_f64();
            let t = &mut state.transfer;
            t.status = TransferStatus::Completed;
            t.total_size = t.transferred_size;
            t.progress = 100.0;
            t.end_time = Some(Utc::now());
            if elapsed > 0.0 {
                t.speed = t.transferred_size as f64 / elapsed;
            }

            let needs_final = state.reported != Some(100.0);
            state.reported = Some(100.0);
            needs_final
        };

        if needs_final {
            if let Some(callback) = on_progress {
                notify(callback, 100.0);
            }
        }
        true
    }

    /// Record a failure. False if the transfer had already finished.
    pub(crate) fn fail(&self, message: String) -> bool {
        let mut state = self.state.write();
        if state.transfer.status.is_terminal() {
            return false;
        }
        state.transfer.status = TransferStatus::Failed;
        state.transfer.error = Some(message);
        state.transfer.end_time = Some(Utc::now());
        state.transfer.speed = 0.0;
        true
    }

    /// Cancel a pending or running transfer; terminal transfers are left alone
    pub(crate) fn cancel(&self) -> bool {
        // own lock is reentrant; another transfer's may be held by its callback
        let _emit = if CallbackScope::active() {
            self.emit.try_lock()
        } else {
            Some(self.emit.lock())
        };
        {
            let mut state = self.state.write();
            if state.transfer.status.is_terminal() {
                return false;
            }
            state.transfer.status = TransferStatus::Cancelled;
            state.transfer.end_time = Some(Utc::now());
            state.transfer.speed = 0.0;
        }
        self.cancel_notify.notify_waiters();
        true
    }
}

fn stopped(id: &str) -> io::Error {
    io::Error::new(io::ErrorKind::Other, format!("transfer {} stopped", id))
}

/// Counts bytes read from a local file on their way to the server
pub(crate) struct ProgressReader<'a, R> {
    inner: R,
    handle: &'a TransferHandle,
    on_progress: Option<&'a ProgressCallback>,
}

impl<'a, R: Read> ProgressReader<'a, R> {
    pub(crate) fn new(
        inner: R,
        handle: &'a TransferHandle,
        on_progress: Option<&'a ProgressCallback>,
    ) -> Self {
        Self {
            inner,
            handle,
            on_progress,
        }
    }
}

impl<R: Read> Read for ProgressReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.handle.ensure_running()?;
        let n = self.inner.read(buf)?;
        if n > 0 && !self.handle.advance(n as u64, self.on_progress) {
            return Err(stopped(self.handle.id()));
        }
        Ok(n)
    }
}

/// Counts bytes written to a local file as they arrive from the server
pub(crate) struct ProgressWriter<'a, W> {
    inner: W,
    handle: &'a TransferHandle,
    on_progress: Option<&'a ProgressCallback>,
}

impl<'a, W: Write> ProgressWriter<'a, W> {
    pub(crate) fn new(
        inner: W,
        handle: &'a TransferHandle,
        on_progress: Option<&'a ProgressCallback>,
    ) -> Self {
        Self {
            inner,
            handle,
            on_progress,
        }
    }
}

impl<W: Write> Write for ProgressWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.handle.ensure_running()?;
        let n = self.inner.write(buf)?;
        if n > 0 && !self.handle.advance(n as u64, self.on_progress) {
            return Err(stopped(self.handle.id()));
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::types::TransferDirection;
    use parking_lot::Mutex;

    fn handle(total: u64) -> TransferHandle {
        let transfer = Transfer {
            id: "upload_test".into(),
            profile_id: "p1".into(),
            file_name: "a.txt".into(),
            local_path: "/tmp/a.txt".into(),
            remote_path: "/a.txt".into(),
            direction: TransferDirection::Upload,
            status: TransferStatus::Pending,
            progress: 0.0,
            total_size: total,
            transferred_size: 0,
            speed: 0.0,
            start_time: Utc::now(),
            end_time: None,
            error: None,
        };
        TransferHandle::new(transfer, Duration::from_millis(0))
    }

    fn recorder() -> (ProgressCallback, Arc<Mutex<Vec<f64>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (Arc::new(move |p| sink.lock().push(p)), seen)
    }

    #[test]
    fn test_reader_reports_monotonic_progress() {
        let handle = handle(4000);
        assert!(handle.start());
        let (callback, seen) = recorder();

        let data = vec![7u8; 4000];
        let mut reader = ProgressReader::new(&data[..], &handle, Some(&callback));
        let mut sink = Vec::new();
        crate::transport::copy_chunked(&mut reader, &mut sink, 1000).unwrap();
        assert!(handle.complete(Some(&callback)));

        let seen = seen.lock().clone();
        assert_eq!(seen, vec![25.0, 50.0, 75.0, 100.0]);
        let t = handle.snapshot();
        assert_eq!(t.status, TransferStatus::Completed);
        assert_eq!(t.transferred_size, t.total_size);
        assert!(t.end_time.is_some());
    }

    #[test]
    fn test_unknown_total_reports_final_hundred() {
        let handle = handle(0);
        assert!(handle.start());
        let (callback, seen) = recorder();

        let mut writer = ProgressWriter::new(Vec::new(), &handle, Some(&callback));
        writer.write_all(&[1u8; 300]).unwrap();
        assert!(handle.complete(Some(&callback)));

        assert_eq!(seen.lock().last().copied(), Some(100.0));
        let t = handle.snapshot();
        assert_eq!(t.total_size, 300);
        assert_eq!(t.progress, 100.0);
    }

    #[test]
    fn test_cancel_stops_io_and_is_final() {
        let handle = handle(100);
        assert!(handle.start());
        assert!(handle.cancel());

        let mut reader = ProgressReader::new(&[0u8; 10][..], &handle, None);
        let mut buf = [0u8; 10];
        assert!(reader.read(&mut buf).is_err());
        assert!(!handle.complete(None));
        assert!(!handle.fail("late".into()));
        assert!(!handle.cancel());
        assert_eq!(handle.status(), TransferStatus::Cancelled);
    }

    #[test]
    fn test_callback_may_cancel_its_own_transfer() {
        let handle = Arc::new(handle(1000));
        assert!(handle.start());
        let inner = Arc::clone(&handle);
        let callback: ProgressCallback = Arc::new(move |p| {
            if p >= 50.0 {
                inner.cancel();
            }
        });

        let data = vec![0u8; 1000];
        let mut reader = ProgressReader::new(&data[..], &handle, Some(&callback));
        let mut sink = Vec::new();
        assert!(crate::transport::copy_chunked(&mut reader, &mut sink, 100).is_err());
        assert_eq!(handle.status(), TransferStatus::Cancelled);
        assert_eq!(handle.snapshot().transferred_size, 500);
    }

    #[test]
    fn test_pending_cancel_blocks_start() {
        let handle = handle(10);
        assert!(handle.cancel());
        assert!(!handle.start());
    }

    #[test]
    fn test_callbacks_cancelling_each_other_do_not_deadlock() {
        use std::sync::{Barrier, OnceLock};

        let first = Arc::new(handle(100));
        let second = Arc::new(handle(100));
        assert!(first.start());
        assert!(second.start());
        let both_inside = Arc::new(Barrier::new(2));

        let cancels = |other: &Arc<TransferHandle>| -> ProgressCallback {
            let other = Arc::clone(other);
            let barrier = Arc::clone(&both_inside);
            let once = Arc::new(OnceLock::new());
            Arc::new(move |_| {
                if once.set(()).is_ok() {
                    barrier.wait();
                    other.cancel();
                }
            })
        };
        let first_cb = cancels(&second);
        let second_cb = cancels(&first);

        let (h1, h2) = (Arc::clone(&first), Arc::clone(&second));
        let t1 = std::thread::spawn(move || h1.advance(10, Some(&first_cb)));
        let t2 = std::thread::spawn(move || h2.advance(10, Some(&second_cb)));
        assert!(t1.join().unwrap());
        assert!(t2.join().unwrap());

        assert_eq!(first.status(), TransferStatus::Cancelled);
        assert_eq!(second.status(), TransferStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_cancelled_wakes_waiter() {
        let handle = Arc::new(handle(10));
        let waiter = Arc::clone(&handle);
        let task = tokio::spawn(async move { waiter.cancelled().await });

        tokio::task::yield_now().await;
        assert!(handle.cancel());
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();

        // already cancelled resolves at once
        tokio::time::timeout(Duration::from_millis(100), handle.cancelled())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_pends_for_finished_transfer() {
        let handle = handle(10);
        assert!(handle.start());
        assert!(handle.complete(None));
        assert!(
            tokio::time::timeout(Duration::from_millis(50), handle.cancelled())
                .await
                .is_err()
        );
    }
}
