//! Bounded worker pool for frame processing.
//!
//! Sockets never leave the reactor thread; workers only run
//! [`process_session`] jobs against a session's shared queues.
//!
//! Sizing follows three knobs: `min` threads are started up front and never
//! retire, extra threads up to `max` are spawned when a job arrives and
//! nobody is idle, and extra threads exit after `idle_timeout` without work.
//! The run queue is bounded. When it is full the job runs on the submitting
//! thread instead (caller-runs), which slows the reactor down rather than
//! letting the backlog grow without limit.

use crate::protocols::{FrameHandler, Outcome};
use crate::runtime::notice::{Notice, Notifier};
use crate::runtime::session::SessionShared;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use std::sync::atomic::{fence, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, info_span, trace};

/// A unit of work.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Worker pool sizing.
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    pub min: usize,
    pub max: usize,
    pub idle_timeout: Duration,
    pub queue_capacity: usize,
}

/// Where a submitted job ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submitted {
    Queued,
    RanOnCaller,
}

struct PoolShared {
    receiver: Receiver<Job>,
    config: PoolConfig,
    live: AtomicUsize,
    idle: AtomicUsize,
    spawned: AtomicUsize,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

/// Bounded pool of processing threads.
pub struct WorkerPool {
    sender: Option<Sender<Job>>,
    shared: Arc<PoolShared>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("config", &self.shared.config)
            .field("live", &self.live_workers())
            .finish()
    }
}

impl WorkerPool {
    /// Start a pool with `config.min` threads.
    pub fn new(config: PoolConfig) -> Self {
        let max = config.max.max(1);
        let config = PoolConfig {
            min: config.min.min(max),
            max,
            idle_timeout: config.idle_timeout,
            queue_capacity: config.queue_capacity.max(1),
        };
        let (sender, receiver) = crossbeam_channel::bounded(config.queue_capacity);

        let pool = Self {
            sender: Some(sender),
            shared: Arc::new(PoolShared {
                receiver,
                config,
                live: AtomicUsize::new(0),
                idle: AtomicUsize::new(0),
                spawned: AtomicUsize::new(0),
                handles: Mutex::new(Vec::new()),
            }),
        };

        for _ in 0..config.min {
            pool.try_spawn();
        }

        info!(
            min = config.min,
            max = config.max,
            idle_ms = config.idle_timeout.as_millis() as u64,
            queue = config.queue_capacity,
            "Worker pool started"
        );

        pool
    }

    /// Number of worker threads currently alive.
    pub fn live_workers(&self) -> usize {
        self.shared.live.load(Ordering::Acquire)
    }

    /// Hand a job to the pool, or run it here if the pool is saturated.
    pub fn submit(&self, job: Job) -> Submitted {
        let Some(sender) = self.sender.as_ref() else {
            job();
            return Submitted::RanOnCaller;
        };

        if self.shared.idle.load(Ordering::Acquire) == 0 {
            self.try_spawn();
        }

        match sender.try_send(job) {
            Ok(()) => {
                // The last worker may have retired between the idle check and
                // the send; make sure someone is left to take the job.
                fence(Ordering::SeqCst);
                if self.shared.live.load(Ordering::Acquire) == 0 {
                    self.try_spawn();
                }
                Submitted::Queued
            }
            Err(TrySendError::Full(job)) | Err(TrySendError::Disconnected(job)) => {
                debug!("Worker pool saturated, running job on caller");
                job();
                Submitted::RanOnCaller
            }
        }
    }

    /// Stop accepting work, let queued jobs finish, and join every worker.
    pub fn shutdown(&mut self) {
        if self.sender.take().is_none() {
            return;
        }

        let handles = std::mem::take(
            &mut *self
                .shared
                .handles
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for handle in handles {
            if handle.join().is_err() {
                error!("Worker thread panicked");
            }
        }
        info!("Worker pool stopped");
    }

    fn try_spawn(&self) -> bool {
        let shared = &self.shared;
        let mut live = shared.live.load(Ordering::Acquire);
        loop {
            if live >= shared.config.max {
                return false;
            }
            match shared.live.compare_exchange_weak(
                live,
                live + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(current) => live = current,
            }
        }

        let worker_id = shared.spawned.fetch_add(1, Ordering::Relaxed);
        let worker_shared = Arc::clone(shared);
        let spawned = thread::Builder::new()
            .name(format!("worker-{worker_id}"))
            .spawn(move || worker_loop(worker_id, worker_shared));

        match spawned {
            Ok(handle) => {
                let mut handles = shared
                    .handles
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                handles.retain(|h| !h.is_finished());
                handles.push(handle);
                true
            }
            Err(e) => {
                shared.live.fetch_sub(1, Ordering::AcqRel);
                error!(worker = worker_id, error = %e, "Failed to spawn worker");
                false
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(worker_id: usize, shared: Arc<PoolShared>) {
    trace!(worker = worker_id, "Worker started");

    loop {
        shared.idle.fetch_add(1, Ordering::AcqRel);
        let next = shared.receiver.recv_timeout(shared.config.idle_timeout);
        shared.idle.fetch_sub(1, Ordering::AcqRel);

        match next {
            Ok(job) => job(),
            Err(RecvTimeoutError::Timeout) => {
                if retire(&shared) {
                    fence(Ordering::SeqCst);
                    // A job sent while this worker was timing out would
                    // otherwise wait for the next submit to spawn a thread.
                    if shared.receiver.is_empty() || !rejoin(&shared) {
                        trace!(worker = worker_id, "Idle worker retired");
                        return;
                    }
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                shared.live.fetch_sub(1, Ordering::AcqRel);
                trace!(worker = worker_id, "Worker stopped");
                return;
            }
        }
    }
}

/// Give up this worker's slot if the pool is above its minimum.
fn retire(shared: &PoolShared) -> bool {
    let live = shared.live.load(Ordering::Acquire);
    live > shared.config.min
        && shared
            .live
            .compare_exchange(live, live - 1, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
}

/// Take back a slot given up by [`retire`], unless the pool is full again.
fn rejoin(shared: &PoolShared) -> bool {
    let mut live = shared.live.load(Ordering::Acquire);
    while live < shared.config.max {
        match shared.live.compare_exchange_weak(
            live,
            live + 1,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => return true,
            Err(current) => live = current,
        }
    }
    false
}

/// Process every frame queued on one session.
///
/// Frames are handled strictly in order. Replies go to the outbound queue and
/// the reactor is asked to flush them. A session the reactor has already
/// closed still has its queued frames handled, but the replies are dropped.
/// A `Terminate` outcome closes the session and drops whatever is still
/// queued. The session's processing claim
/// (see [`SessionShared::try_schedule`]) must be held on entry and is released
/// on return.
pub fn process_session(session: &SessionShared, handler: &dyn FrameHandler, notifier: &Notifier) {
    let span = info_span!("session", id = session.id(), peer = %session.peer());
    let _entered = span.enter();

    loop {
        let mut replies = 0usize;

        while let Some(frame) = session.pop_inbound() {
            if session.is_terminated() {
                continue;
            }
            match handler.handle(session.id(), frame) {
                Outcome::Reply(reply) if session.is_open() => {
                    session.outbound().enqueue(reply);
                    replies += 1;
                }
                Outcome::Reply(_) => trace!("Session closed, reply dropped"),
                Outcome::Ignore => {}
                Outcome::Terminate => {
                    if session.terminate() {
                        notifier.notify(Notice::Close {
                            token: session.token(),
                            session: session.id(),
                        });
                    }
                }
            }
        }

        if replies > 0 && session.is_open() {
            trace!(replies, "Replies queued");
            notifier.notify(Notice::WantsWrite {
                token: session.token(),
                session: session.id(),
            });
        }

        session.finish_processing();

        // Frames may have arrived after the queue looked empty but before the
        // claim was released; take the claim back and go again if so.
        if session.inbound_len() == 0 || !session.try_schedule() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;
    use crossbeam_channel::{bounded, unbounded};
    use mio::{Poll, Token, Waker};
    use std::time::Instant;

    fn pool(min: usize, max: usize, idle_ms: u64, queue: usize) -> WorkerPool {
        WorkerPool::new(PoolConfig {
            min,
            max,
            idle_timeout: Duration::from_millis(idle_ms),
            queue_capacity: queue,
        })
    }

    fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    fn notifier() -> (Poll, Notifier, Receiver<Notice>) {
        let poll = Poll::new().unwrap();
        let waker = Arc::new(Waker::new(poll.registry(), Token(usize::MAX)).unwrap());
        let (notifier, notices) = Notifier::new(waker);
        (poll, notifier, notices)
    }

    #[test]
    fn test_starts_min_workers() {
        let pool = pool(2, 4, 1000, 8);
        assert_eq!(pool.live_workers(), 2);
    }

    #[test]
    fn test_runs_jobs() {
        let pool = pool(1, 2, 1000, 8);
        let (tx, rx) = unbounded();

        for i in 0..10 {
            let tx = tx.clone();
            pool.submit(Box::new(move || tx.send(i).unwrap()));
        }

        let mut got: Vec<i32> = (0..10)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        got.sort();
        assert_eq!(got, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_grows_to_max_when_busy() {
        let pool = pool(1, 3, 1000, 8);
        let (started_tx, started_rx) = unbounded();
        let (release_tx, release_rx) = unbounded::<()>();

        for _ in 0..3 {
            let started = started_tx.clone();
            let release = release_rx.clone();
            pool.submit(Box::new(move || {
                started.send(()).unwrap();
                let _ = release.recv();
            }));
            started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        }

        assert_eq!(pool.live_workers(), 3);
        drop(release_tx);
    }

    #[test]
    fn test_caller_runs_when_saturated() {
        let pool = pool(1, 1, 1000, 1);
        let (started_tx, started_rx) = bounded(1);
        let (release_tx, release_rx) = unbounded::<()>();

        // Occupy the only worker
        let release = release_rx.clone();
        assert_eq!(
            pool.submit(Box::new(move || {
                started_tx.send(()).unwrap();
                let _ = release.recv();
            })),
            Submitted::Queued
        );
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        // Fill the run queue
        assert_eq!(pool.submit(Box::new(|| {})), Submitted::Queued);

        // Nothing left: this one runs right here
        let caller = thread::current().id();
        let (ran_tx, ran_rx) = unbounded();
        assert_eq!(
            pool.submit(Box::new(move || ran_tx.send(thread::current().id()).unwrap())),
            Submitted::RanOnCaller
        );
        assert_eq!(ran_rx.try_recv().unwrap(), caller);

        drop(release_tx);
    }

    #[test]
    fn test_idle_workers_retire_to_min() {
        let pool = pool(1, 3, 50, 8);
        let (started_tx, started_rx) = unbounded();
        let (release_tx, release_rx) = unbounded::<()>();

        for _ in 0..3 {
            let started = started_tx.clone();
            let release = release_rx.clone();
            pool.submit(Box::new(move || {
                started.send(()).unwrap();
                let _ = release.recv();
            }));
            started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        }
        assert_eq!(pool.live_workers(), 3);

        drop(release_tx);
        assert!(wait_for(|| pool.live_workers() == 1));
    }

    #[test]
    fn test_shutdown_joins_workers() {
        let mut pool = pool(2, 2, 1000, 8);
        pool.shutdown();
        assert_eq!(pool.live_workers(), 0);

        // After shutdown jobs run inline
        let (tx, rx) = unbounded();
        assert_eq!(
            pool.submit(Box::new(move || tx.send(()).unwrap())),
            Submitted::RanOnCaller
        );
        assert!(rx.try_recv().is_ok());
    }

    fn shared_session(id: u64) -> Arc<SessionShared> {
        Arc::new(SessionShared::new(
            id,
            Token(id as usize),
            "127.0.0.1:7000".parse().unwrap(),
        ))
    }

    fn echo(_: u64, frame: Frame) -> Outcome {
        if &frame.body()[..] == b"quit" {
            Outcome::Terminate
        } else {
            Outcome::Reply(frame)
        }
    }

    fn drain_outbound(session: &SessionShared) -> Vec<Frame> {
        let codec = crate::frame::FrameCodec::new(crate::frame::FrameFormat::Sequenced, 1024);
        let mut writer = crate::runtime::outbound::OutboundWriter::new(1024);
        let mut bytes = Vec::new();
        writer.drain(session.outbound(), &codec, &mut bytes).unwrap();
        let mut decoder = crate::frame::FrameDecoder::new(codec, 0);
        decoder.feed(&bytes).unwrap().frames
    }

    #[test]
    fn test_process_session_replies_in_order() {
        let (_poll, notifier, notices) = notifier();
        let session = shared_session(1);
        for i in 0..5u32 {
            session.push_inbound(Frame::with_id(1, i, vec![i as u8]));
        }
        assert!(session.try_schedule());

        process_session(&session, &echo, &notifier);

        let ids: Vec<_> = drain_outbound(&session).iter().map(|f| f.id()).collect();
        assert_eq!(ids, (0..5).map(Some).collect::<Vec<_>>());
        assert!(matches!(
            notices.try_recv().unwrap(),
            Notice::WantsWrite { session: 1, .. }
        ));
        // Claim released
        assert!(session.try_schedule());
    }

    #[test]
    fn test_process_session_terminate() {
        let (_poll, notifier, notices) = notifier();
        let session = shared_session(2);
        session.push_inbound(Frame::with_id(1, 0, &b"first"[..]));
        session.push_inbound(Frame::with_id(1, 1, &b"quit"[..]));
        session.push_inbound(Frame::with_id(1, 2, &b"never"[..]));
        assert!(session.try_schedule());

        process_session(&session, &echo, &notifier);

        // The frame before quit was handled, the one after was dropped
        let replies = drain_outbound(&session);
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].id(), Some(0));
        assert_eq!(session.inbound_len(), 0);
        assert!(!session.is_open());
        assert!(matches!(
            notices.try_recv().unwrap(),
            Notice::Close { session: 2, .. }
        ));
        assert!(notices.try_recv().is_err());
    }

    #[test]
    fn test_closed_session_still_handles_queued_frames() {
        let (_poll, notifier, notices) = notifier();
        let session = shared_session(3);
        session.push_inbound(Frame::with_id(1, 0, &b"last"[..]));
        // The reactor saw EOF right after queueing the frame
        session.begin_close();
        session.mark_closed();
        assert!(session.try_schedule());

        let (seen_tx, seen_rx) = unbounded();
        let handler = move |_: u64, frame: Frame| {
            seen_tx.send(frame.clone()).unwrap();
            Outcome::Reply(frame)
        };
        process_session(&session, &handler, &notifier);

        assert_eq!(seen_rx.try_recv().unwrap().body(), &b"last"[..]);
        // Nobody is left to send the reply to
        assert!(session.outbound().is_empty());
        assert!(notices.try_recv().is_err());
    }

    #[test]
    fn test_jobs_run_with_no_minimum_workers() {
        let pool = pool(0, 1, 1, 8);
        let (tx, rx) = unbounded();

        // Workers keep retiring between submits; every job must still run
        for i in 0..200 {
            let tx = tx.clone();
            pool.submit(Box::new(move || tx.send(i).unwrap()));
            if i % 10 == 0 {
                thread::sleep(Duration::from_millis(2));
            }
        }

        for _ in 0..200 {
            rx.recv_timeout(Duration::from_secs(5)).unwrap();
        }
        assert!(wait_for(|| pool.live_workers() == 0));

        // After the pool drained to zero a new job still gets a worker
        let tx = tx.clone();
        assert_eq!(
            pool.submit(Box::new(move || tx.send(-1).unwrap())),
            Submitted::Queued
        );
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), -1);
    }

    #[test]
    fn test_concurrent_sessions_keep_their_order() {
        let (_poll, notifier, _notices) = notifier();
        let pool = pool(4, 4, 1000, 64);
        let sessions = [shared_session(1), shared_session(2)];

        // Feed both sessions in small batches, scheduling as the reactor does
        for batch in 0..50u32 {
            for session in &sessions {
                for i in 0..4 {
                    session.push_inbound(Frame::with_id(1, batch * 4 + i, &b"x"[..]));
                }
                if session.try_schedule() {
                    let session = Arc::clone(session);
                    let notifier = notifier.clone();
                    pool.submit(Box::new(move || process_session(&session, &echo, &notifier)));
                }
            }
        }

        for session in &sessions {
            assert!(wait_for(|| session.outbound().len() == 200));
            let ids: Vec<_> = drain_outbound(session).iter().map(|f| f.id()).collect();
            assert_eq!(ids, (0..200).map(Some).collect::<Vec<_>>());
        }
    }
}
