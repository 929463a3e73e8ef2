//! Binary audio streams between components and the engine.
//!
//! Fetch streams copy engine output into a component's pipe; push streams
//! copy a component's pipe into the engine. Each flow runs on its own
//! fixed-size pool of blocking workers. Only fetch streams are registered,
//! since only they can be cancelled from outside. Oversized envelopes a
//! component pulls from the sender cache are written on a third pool, so a
//! slow reader never stalls dispatch.

use std::io::{ErrorKind, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use voxbus_core::engine::{EngineStream, MessageBroker, StreamMode};
use voxbus_ipc::{PipeCloser, PipeSink, PipeSource};
use voxbus_settings::StreamSettings;

use crate::errors::StreamError;

/// Fixed-size pool running blocking jobs.
struct WorkerPool {
    name: &'static str,
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
    runtime: Handle,
}

impl WorkerPool {
    fn new(name: &'static str, workers: usize, runtime: Handle) -> Self {
        Self {
            name,
            permits: Arc::new(Semaphore::new(workers.max(1))),
            tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
            runtime,
        }
    }

    /// Queue `job`. Returns `false` (dropping the job) once the pool is closed.
    fn submit<F>(&self, stream_id: String, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        if self.tracker.is_closed() {
            return false;
        }
        let permits = self.permits.clone();
        let shutdown = self.shutdown.clone();
        let name = self.name;
        let _ = self.tracker.spawn_on(
            async move {
                let _permit = tokio::select! {
                    permit = permits.acquire_owned() => match permit {
                        Ok(p) => p,
                        Err(_) => return,
                    },
                    () = shutdown.cancelled() => {
                        debug!(pool = name, %stream_id, "dropping queued stream job at shutdown");
                        return;
                    }
                };
                if let Err(e) = tokio::task::spawn_blocking(job).await {
                    if e.is_panic() {
                        error!(pool = name, %stream_id, "stream worker panicked");
                    } else {
                        warn!(pool = name, %stream_id, error = %e, "stream worker aborted");
                    }
                }
            },
            &self.runtime,
        );
        true
    }

    fn close(&self) {
        self.shutdown.cancel();
        let _ = self.tracker.close();
    }

    fn in_flight(&self) -> usize {
        self.tracker.len()
    }
}

/// Registered fetch stream. The sink is taken out on cancel.
struct FetchHandle {
    sink: Mutex<Option<PipeSink>>,
    closer: Option<PipeCloser>,
    cancelled: AtomicBool,
}

impl FetchHandle {
    fn new(sink: PipeSink) -> Self {
        Self {
            closer: sink.closer(),
            sink: Mutex::new(Some(sink)),
            cancelled: AtomicBool::new(false),
        }
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        // A worker blocked in a write holds the lock. The closer fails that
        // write; the worker then drops the sink on its way out.
        if let Some(close) = &self.closer {
            close();
        }
        if let Some(mut slot) = self.sink.try_lock() {
            drop(slot.take());
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

type FetchRegistry = Arc<DashMap<String, Arc<FetchHandle>>>;

/// Removes the registry entry and closes the pipe on every exit path.
struct FetchGuard {
    registry: FetchRegistry,
    stream_id: String,
    handle: Arc<FetchHandle>,
}

impl Drop for FetchGuard {
    fn drop(&mut self) {
        let _ = self
            .registry
            .remove_if(&self.stream_id, |_, h| Arc::ptr_eq(h, &self.handle));
        drop(self.handle.sink.lock().take());
        debug!(stream_id = %self.stream_id, "fetch stream closed");
    }
}

type DeliveryRegistry = Arc<DashMap<u64, PipeCloser>>;

/// Unregisters a cached-envelope delivery when its job ends or is dropped.
struct DeliveryGuard {
    registry: DeliveryRegistry,
    key: u64,
}

impl Drop for DeliveryGuard {
    fn drop(&mut self) {
        let _ = self.registry.remove(&self.key);
    }
}

/// Closes the engine-side stream when dropped.
struct EngineStreamGuard(Box<dyn EngineStream>);

impl Drop for EngineStreamGuard {
    fn drop(&mut self) {
        self.0.close();
    }
}

pub struct StreamManager {
    broker: Arc<dyn MessageBroker>,
    settings: StreamSettings,
    registry: FetchRegistry,
    deliveries: DeliveryRegistry,
    next_delivery: AtomicU64,
    fetch_pool: WorkerPool,
    push_pool: WorkerPool,
    delivery_pool: WorkerPool,
}

impl StreamManager {
    /// Pool sizes are fixed here. `runtime` hosts the pool bookkeeping.
    pub fn new(broker: Arc<dyn MessageBroker>, settings: StreamSettings, runtime: Handle) -> Self {
        info!(
            fetch_workers = settings.fetch_workers,
            push_workers = settings.push_workers,
            "stream manager started"
        );
        Self {
            fetch_pool: WorkerPool::new("fetch", settings.fetch_workers, runtime.clone()),
            push_pool: WorkerPool::new("push", settings.push_workers, runtime.clone()),
            delivery_pool: WorkerPool::new("delivery", settings.fetch_workers, runtime),
            broker,
            settings,
            registry: Arc::new(DashMap::new()),
            deliveries: Arc::new(DashMap::new()),
            next_delivery: AtomicU64::new(0),
        }
    }

    /// Copy the engine stream `stream_id` into `sink` until EOF or cancel.
    ///
    /// On error the sink has already been dropped, closing the pipe.
    pub fn open_fetch(&self, stream_id: &str, sink: PipeSink) -> Result<(), StreamError> {
        if self.fetch_pool.tracker.is_closed() {
            return Err(StreamError::PoolClosed("fetch"));
        }

        let handle = Arc::new(FetchHandle::new(sink));
        match self.registry.entry(stream_id.to_owned()) {
            Entry::Occupied(_) => {
                warn!(stream_id, "fetch requested for a stream that is already open");
                return Err(StreamError::DuplicateStream(stream_id.to_owned()));
            }
            Entry::Vacant(slot) => {
                let _ = slot.insert(handle.clone());
            }
        }
        let guard = FetchGuard {
            registry: self.registry.clone(),
            stream_id: stream_id.to_owned(),
            handle,
        };

        let Some(stream) = self.broker.open_stream(stream_id, StreamMode::Read) else {
            warn!(stream_id, "no engine stream to fetch from, closing pipe");
            drop(guard);
            return Err(StreamError::NoEngineStream(stream_id.to_owned()));
        };

        let chunk = self.settings.fetch_chunk_bytes;
        let job = move || fetch_loop(guard, EngineStreamGuard(stream), chunk);
        if !self.fetch_pool.submit(stream_id.to_owned(), job) {
            return Err(StreamError::PoolClosed("fetch"));
        }
        debug!(stream_id, "fetch stream opened");
        Ok(())
    }

    /// Copy `source` into the engine stream `stream_id` until EOF.
    pub fn open_push(&self, stream_id: &str, source: Box<dyn PipeSource>) -> Result<(), StreamError> {
        let broker = self.broker.clone();
        let id = stream_id.to_owned();
        let min = self.settings.push_min_chunk_bytes;
        let max = self.settings.push_max_chunk_bytes;
        let job = move || push_loop(broker, id, source, min, max);
        if !self.push_pool.submit(stream_id.to_owned(), job) {
            warn!(stream_id, "push pool closed, dropping pipe");
            return Err(StreamError::PoolClosed("push"));
        }
        debug!(stream_id, "push stream submitted");
        Ok(())
    }

    /// Write a cached envelope into a component's pipe on the delivery pool.
    /// The pipe is closed once the content is written or the write fails.
    pub fn deliver_cached(
        &self,
        resource_id: &str,
        content: Bytes,
        sink: PipeSink,
    ) -> Result<(), StreamError> {
        if self.delivery_pool.tracker.is_closed() {
            return Err(StreamError::PoolClosed("delivery"));
        }
        let key = self.next_delivery.fetch_add(1, Ordering::Relaxed);
        if let Some(close) = sink.closer() {
            let _ = self.deliveries.insert(key, close);
        }
        let guard = DeliveryGuard {
            registry: self.deliveries.clone(),
            key,
        };
        let id = resource_id.to_owned();
        let bytes = content.len();
        let job = move || write_cached(guard, &id, &content, sink);
        if !self.delivery_pool.submit(resource_id.to_owned(), job) {
            return Err(StreamError::PoolClosed("delivery"));
        }
        debug!(resource_id, bytes, "cached delivery submitted");
        Ok(())
    }

    /// Cancel one fetch stream. Returns whether it was open.
    pub fn cancel_stream(&self, stream_id: &str) -> bool {
        match self.registry.remove(stream_id) {
            Some((_, handle)) => {
                handle.cancel();
                info!(stream_id, "fetch stream cancelled");
                true
            }
            None => {
                debug!(stream_id, "cancel for unknown stream");
                false
            }
        }
    }

    pub fn cancel_all(&self) {
        let ids: Vec<String> = self.registry.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            let _ = self.cancel_stream(&id);
        }
    }

    pub fn is_open(&self, stream_id: &str) -> bool {
        self.registry.contains_key(stream_id)
    }

    pub fn open_fetch_streams(&self) -> usize {
        self.registry.len()
    }

    pub fn in_flight(&self) -> usize {
        self.fetch_pool.in_flight() + self.push_pool.in_flight() + self.delivery_pool.in_flight()
    }

    /// Cancel fetch streams and cached deliveries, refuse new work, and wait
    /// for running jobs up to `deadline`. Returns whether everything drained
    /// in time.
    pub async fn shutdown(&self, deadline: Duration) -> bool {
        self.cancel_all();
        self.fetch_pool.close();
        self.push_pool.close();
        self.delivery_pool.close();
        for delivery in self.deliveries.iter() {
            (delivery.value())();
        }
        let drained = tokio::time::timeout(deadline, async {
            self.fetch_pool.tracker.wait().await;
            self.push_pool.tracker.wait().await;
            self.delivery_pool.tracker.wait().await;
        })
        .await
        .is_ok();
        if drained {
            info!("stream pools drained");
        } else {
            warn!(in_flight = self.in_flight(), ?deadline, "stream pools did not drain in time");
        }
        drained
    }
}

fn fetch_loop(guard: FetchGuard, mut stream: EngineStreamGuard, chunk: usize) {
    let stream_id = guard.stream_id.clone();
    let mut buf = vec![0u8; chunk.max(1)];
    let mut total = 0usize;
    loop {
        if guard.handle.is_cancelled() || stream.0.is_closed() {
            break;
        }
        let n = match stream.0.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!(%stream_id, error = %e, "engine stream read failed");
                break;
            }
        };
        let mut slot = guard.handle.sink.lock();
        let Some(sink) = slot.as_mut() else {
            break;
        };
        if let Err(e) = sink.write_all(&buf[..n]) {
            warn!(%stream_id, error = %e, "pipe write failed");
            break;
        }
        total += n;
        if guard.handle.is_cancelled() {
            break;
        }
    }
    debug!(%stream_id, bytes = total, "fetch loop finished");
}

fn write_cached(_guard: DeliveryGuard, resource_id: &str, content: &[u8], mut sink: PipeSink) {
    match sink.write_all(content).and_then(|()| sink.flush()) {
        Ok(()) => debug!(resource_id, bytes = content.len(), "cached message delivered"),
        Err(e) => warn!(resource_id, error = %e, "cached message delivery failed"),
    }
}

fn push_loop(
    broker: Arc<dyn MessageBroker>,
    stream_id: String,
    mut source: Box<dyn PipeSource>,
    min: usize,
    max: usize,
) {
    let Some(stream) = broker.open_stream(&stream_id, StreamMode::Write) else {
        warn!(%stream_id, "no engine stream to push into, closing pipe");
        return;
    };
    let mut stream = EngineStreamGuard(stream);
    let mut buf = vec![0u8; max.max(1)];
    let mut total = 0usize;
    loop {
        let size = push_chunk_size(source.available(), min, max);
        let n = match source.read(&mut buf[..size]) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!(%stream_id, error = %e, "pipe read failed");
                break;
            }
        };
        if let Err(e) = stream.0.write(&buf[..n]) {
            warn!(%stream_id, error = %e, "engine stream write failed");
            break;
        }
        total += n;
    }
    debug!(%stream_id, bytes = total, "push loop finished");
}

/// Adaptive chunk: what the pipe has ready, kept within `[min, max]`.
pub fn push_chunk_size(available: usize, min: usize, max: usize) -> usize {
    available.min(max).max(min).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::{self, Cursor, Read};
    use std::os::unix::net::UnixStream;
    use voxbus_core::engine::MessageHandler;
    use voxbus_core::errors::EngineError;
    use voxbus_ipc::CapturePipe;

    /// Engine side of a test stream: bytes to hand out, or a gate that
    /// blocks reads until released.
    #[derive(Clone, Default)]
    struct FakeBroker {
        sources: Arc<Mutex<HashMap<String, Vec<u8>>>>,
        endless: Arc<Mutex<Vec<String>>>,
        sinks: Arc<Mutex<HashMap<String, Arc<Mutex<Vec<u8>>>>>>,
        panicking: Arc<Mutex<Vec<String>>>,
        failing_writes: Arc<Mutex<Vec<String>>>,
        flooding: Arc<Mutex<Vec<String>>>,
    }

    struct BytesStream {
        data: Cursor<Vec<u8>>,
        closed: bool,
    }

    impl EngineStream for BytesStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.data.read(buf)
        }
        fn write(&mut self, _data: &[u8]) -> io::Result<()> {
            Ok(())
        }
        fn is_closed(&self) -> bool {
            self.closed
        }
        fn close(&mut self) {
            self.closed = true;
        }
    }

    /// Produces bytes forever, slowly.
    struct EndlessStream;

    impl EngineStream for EndlessStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            std::thread::sleep(Duration::from_millis(2));
            let n = buf.len().min(16);
            buf[..n].fill(7);
            Ok(n)
        }
        fn write(&mut self, _data: &[u8]) -> io::Result<()> {
            Ok(())
        }
        fn is_closed(&self) -> bool {
            false
        }
        fn close(&mut self) {}
    }

    /// Produces full buffers forever, as fast as the pipe takes them.
    struct FloodStream;

    impl EngineStream for FloodStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            buf.fill(1);
            Ok(buf.len())
        }
        fn write(&mut self, _data: &[u8]) -> io::Result<()> {
            Ok(())
        }
        fn is_closed(&self) -> bool {
            false
        }
        fn close(&mut self) {}
    }

    struct PanicStream;

    impl EngineStream for PanicStream {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            panic!("engine stream exploded");
        }
        fn write(&mut self, _data: &[u8]) -> io::Result<()> {
            Ok(())
        }
        fn is_closed(&self) -> bool {
            false
        }
        fn close(&mut self) {}
    }

    struct SinkStream(Arc<Mutex<Vec<u8>>>);

    impl EngineStream for SinkStream {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Ok(0)
        }
        fn write(&mut self, data: &[u8]) -> io::Result<()> {
            self.0.lock().extend_from_slice(data);
            Ok(())
        }
        fn is_closed(&self) -> bool {
            false
        }
        fn close(&mut self) {}
    }

    struct FailingWriteStream;

    impl EngineStream for FailingWriteStream {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Ok(0)
        }
        fn write(&mut self, _data: &[u8]) -> io::Result<()> {
            Err(io::Error::other("engine rejected audio"))
        }
        fn is_closed(&self) -> bool {
            false
        }
        fn close(&mut self) {}
    }

    /// Component pipe that records when the bus lets go of it.
    struct TrackedSource {
        data: Cursor<Vec<u8>>,
        fail_reads: bool,
        dropped: Arc<AtomicBool>,
    }

    impl TrackedSource {
        fn new(data: Vec<u8>, fail_reads: bool) -> (Box<dyn PipeSource>, Arc<AtomicBool>) {
            let dropped = Arc::new(AtomicBool::new(false));
            let source = Self {
                data: Cursor::new(data),
                fail_reads,
                dropped: dropped.clone(),
            };
            (Box::new(source), dropped)
        }
    }

    impl Read for TrackedSource {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.fail_reads {
                return Err(io::Error::from(io::ErrorKind::ConnectionReset));
            }
            self.data.read(buf)
        }
    }

    impl PipeSource for TrackedSource {}

    impl Drop for TrackedSource {
        fn drop(&mut self) {
            self.dropped.store(true, Ordering::SeqCst);
        }
    }

    impl MessageBroker for FakeBroker {
        fn publish(&self, _raw: &str) -> Result<(), EngineError> {
            Ok(())
        }
        fn subscribe(&self, _handler: MessageHandler) {}
        fn open_stream(&self, stream_id: &str, mode: StreamMode) -> Option<Box<dyn EngineStream>> {
            match mode {
                StreamMode::Read => {
                    if self.panicking.lock().iter().any(|s| s == stream_id) {
                        return Some(Box::new(PanicStream));
                    }
                    if self.endless.lock().iter().any(|s| s == stream_id) {
                        return Some(Box::new(EndlessStream));
                    }
                    if self.flooding.lock().iter().any(|s| s == stream_id) {
                        return Some(Box::new(FloodStream));
                    }
                    let data = self.sources.lock().get(stream_id)?.clone();
                    Some(Box::new(BytesStream {
                        data: Cursor::new(data),
                        closed: false,
                    }))
                }
                StreamMode::Write => {
                    if self.failing_writes.lock().iter().any(|s| s == stream_id) {
                        return Some(Box::new(FailingWriteStream));
                    }
                    if stream_id.starts_with("missing") {
                        return None;
                    }
                    let sink = Arc::new(Mutex::new(Vec::new()));
                    let _ = self.sinks.lock().insert(stream_id.to_owned(), sink.clone());
                    Some(Box::new(SinkStream(sink)))
                }
            }
        }
    }

    fn manager(broker: &FakeBroker) -> StreamManager {
        StreamManager::new(Arc::new(broker.clone()), StreamSettings::default(), Handle::current())
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        for _ in 0..500 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not met in time");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn fetch_copies_until_eof_and_closes() {
        let broker = FakeBroker::default();
        let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let _ = broker.sources.lock().insert("s1".into(), payload.clone());
        let streams = manager(&broker);

        let (pipe, handle) = CapturePipe::pair();
        streams.open_fetch("s1", Box::new(pipe)).unwrap();

        wait_until(|| handle.is_closed()).await;
        assert_eq!(handle.bytes(), payload);
        wait_until(|| !streams.is_open("s1")).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn fetch_without_engine_stream_closes_pipe_empty() {
        let broker = FakeBroker::default();
        let streams = manager(&broker);
        let (pipe, handle) = CapturePipe::pair();

        let err = streams.open_fetch("ghost", Box::new(pipe)).unwrap_err();
        assert!(matches!(err, StreamError::NoEngineStream(_)));
        assert!(handle.is_closed());
        assert!(handle.is_empty());
        assert!(!streams.is_open("ghost"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn duplicate_open_stream_is_rejected() {
        let broker = FakeBroker::default();
        broker.endless.lock().push("s1".into());
        let streams = manager(&broker);
        let (first, _h1) = CapturePipe::pair();
        streams.open_fetch("s1", Box::new(first)).unwrap();

        let (second, h2) = CapturePipe::pair();
        let err = streams.open_fetch("s1", Box::new(second)).unwrap_err();
        assert!(matches!(err, StreamError::DuplicateStream(_)));
        assert!(h2.is_closed());

        assert!(streams.cancel_stream("s1"));
        assert!(streams.shutdown(Duration::from_secs(2)).await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cancel_isolates_streams() {
        let broker = FakeBroker::default();
        broker.endless.lock().push("a".into());
        broker.endless.lock().push("b".into());
        let streams = manager(&broker);

        let (pa, ha) = CapturePipe::pair();
        let (pb, hb) = CapturePipe::pair();
        streams.open_fetch("a", Box::new(pa)).unwrap();
        streams.open_fetch("b", Box::new(pb)).unwrap();
        wait_until(|| !ha.is_empty() && !hb.is_empty()).await;

        assert!(streams.cancel_stream("a"));
        wait_until(|| ha.is_closed()).await;
        assert!(!streams.is_open("a"));

        let before = hb.len();
        wait_until(|| hb.len() > before).await;
        assert!(!hb.is_closed());
        assert!(streams.is_open("b"));

        assert!(streams.shutdown(Duration::from_secs(2)).await);
        assert!(hb.is_closed());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stream_id_reusable_after_close() {
        let broker = FakeBroker::default();
        let _ = broker.sources.lock().insert("s".into(), vec![1, 2, 3]);
        let streams = manager(&broker);

        let (p1, h1) = CapturePipe::pair();
        streams.open_fetch("s", Box::new(p1)).unwrap();
        wait_until(|| h1.is_closed() && !streams.is_open("s")).await;

        let (p2, h2) = CapturePipe::pair();
        streams.open_fetch("s", Box::new(p2)).unwrap();
        wait_until(|| h2.is_closed()).await;
        assert_eq!(h2.bytes(), vec![1, 2, 3]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn panic_in_one_stream_closes_only_that_pipe() {
        let broker = FakeBroker::default();
        broker.panicking.lock().push("bad".into());
        let _ = broker.sources.lock().insert("good".into(), vec![9; 100]);
        let streams = manager(&broker);

        let (bad, hbad) = CapturePipe::pair();
        let (good, hgood) = CapturePipe::pair();
        streams.open_fetch("bad", Box::new(bad)).unwrap();
        streams.open_fetch("good", Box::new(good)).unwrap();

        wait_until(|| hbad.is_closed() && hgood.is_closed()).await;
        assert!(hbad.is_empty());
        assert_eq!(hgood.len(), 100);
        assert!(!streams.is_open("bad"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn push_drains_pipe_into_engine() {
        let broker = FakeBroker::default();
        let streams = manager(&broker);
        let data: Vec<u8> = (0..1_000u32).map(|i| (i % 13) as u8).collect();

        streams
            .open_push("mic", Box::new(Cursor::new(data.clone())))
            .unwrap();
        wait_until(|| {
            broker
                .sinks
                .lock()
                .get("mic")
                .is_some_and(|s| s.lock().len() == data.len())
        })
        .await;
        assert!(streams.shutdown(Duration::from_secs(2)).await);
        let sinks = broker.sinks.lock();
        assert_eq!(*sinks["mic"].lock(), data);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cancel_unblocks_writer_on_full_pipe() {
        let broker = FakeBroker::default();
        broker.flooding.lock().push("slow-1".into());
        broker.flooding.lock().push("slow-2".into());
        let _ = broker.sources.lock().insert("next".into(), vec![4; 64]);
        let streams = manager(&broker);

        // Nobody reads the other ends, so both workers end up blocked in a
        // write and every fetch permit is taken.
        let (w1, _r1) = UnixStream::pair().unwrap();
        let (w2, _r2) = UnixStream::pair().unwrap();
        streams.open_fetch("slow-1", Box::new(w1)).unwrap();
        streams.open_fetch("slow-2", Box::new(w2)).unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert!(streams.cancel_stream("slow-1"));
        assert!(streams.cancel_stream("slow-2"));

        let (pipe, handle) = CapturePipe::pair();
        streams.open_fetch("next", Box::new(pipe)).unwrap();
        wait_until(|| handle.is_closed()).await;
        assert_eq!(handle.len(), 64);

        assert!(streams.shutdown(Duration::from_secs(2)).await);
        assert_eq!(streams.in_flight(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn shutdown_unblocks_stuck_fetch() {
        let broker = FakeBroker::default();
        broker.flooding.lock().push("slow".into());
        let streams = manager(&broker);
        let (writer, _unread) = UnixStream::pair().unwrap();
        streams.open_fetch("slow", Box::new(writer)).unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert!(streams.shutdown(Duration::from_secs(2)).await);
        assert!(!streams.is_open("slow"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn failing_push_streams_do_not_disturb_others() {
        let broker = FakeBroker::default();
        broker.failing_writes.lock().push("rejected".into());
        broker.endless.lock().push("live".into());
        let streams = manager(&broker);

        let (live, hlive) = CapturePipe::pair();
        streams.open_fetch("live", Box::new(live)).unwrap();

        let (broken_pipe, pipe_dropped) = TrackedSource::new(vec![1; 100], true);
        let (rejected, rejected_dropped) = TrackedSource::new(vec![2; 100], false);
        let (missing, missing_dropped) = TrackedSource::new(vec![3; 100], false);
        streams.open_push("broken", broken_pipe).unwrap();
        streams.open_push("rejected", rejected).unwrap();
        streams.open_push("missing", missing).unwrap();

        let data: Vec<u8> = (0..2_000u32).map(|i| (i % 7) as u8).collect();
        let (healthy, healthy_dropped) = TrackedSource::new(data.clone(), false);
        streams.open_push("mic", healthy).unwrap();

        wait_until(|| {
            pipe_dropped.load(Ordering::SeqCst)
                && rejected_dropped.load(Ordering::SeqCst)
                && missing_dropped.load(Ordering::SeqCst)
                && healthy_dropped.load(Ordering::SeqCst)
        })
        .await;
        assert_eq!(*broker.sinks.lock()["mic"].lock(), data);
        assert!(!broker.sinks.lock().contains_key("missing"));

        let before = hlive.len();
        wait_until(|| hlive.len() > before).await;
        assert!(!hlive.is_closed());
        assert!(streams.is_open("live"));

        assert!(streams.shutdown(Duration::from_secs(2)).await);
        assert!(hlive.is_closed());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cached_delivery_writes_and_closes() {
        let broker = FakeBroker::default();
        let streams = manager(&broker);
        let content = Bytes::from(vec![5u8; 10_000]);

        let (pipe, handle) = CapturePipe::pair();
        streams.deliver_cached("res_1", content.clone(), Box::new(pipe)).unwrap();
        wait_until(|| handle.is_closed()).await;
        assert_eq!(handle.bytes(), content.to_vec());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn unread_cached_delivery_does_not_block_and_drains_on_shutdown() {
        let broker = FakeBroker::default();
        let _ = broker.sources.lock().insert("s".into(), vec![8; 32]);
        let streams = manager(&broker);

        let (writer, _unread) = UnixStream::pair().unwrap();
        streams
            .deliver_cached("res_big", Bytes::from(vec![0u8; 4 * 1024 * 1024]), Box::new(writer))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(streams.in_flight() >= 1);

        let (pipe, handle) = CapturePipe::pair();
        streams.open_fetch("s", Box::new(pipe)).unwrap();
        wait_until(|| handle.is_closed()).await;
        assert_eq!(handle.len(), 32);

        assert!(streams.shutdown(Duration::from_secs(2)).await);
        assert_eq!(streams.in_flight(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn submissions_after_shutdown_close_pipe() {
        let broker = FakeBroker::default();
        let _ = broker.sources.lock().insert("s".into(), vec![1]);
        let streams = manager(&broker);
        assert!(streams.shutdown(Duration::from_millis(100)).await);

        let (pipe, handle) = CapturePipe::pair();
        let err = streams.open_fetch("s", Box::new(pipe)).unwrap_err();
        assert!(matches!(err, StreamError::PoolClosed("fetch")));
        assert!(handle.is_closed());

        let err = streams
            .open_push("m", Box::new(Cursor::new(vec![1, 2])))
            .unwrap_err();
        assert!(matches!(err, StreamError::PoolClosed("push")));

        let (pipe, handle) = CapturePipe::pair();
        let err = streams
            .deliver_cached("res_1", Bytes::from_static(b"{}"), Box::new(pipe))
            .unwrap_err();
        assert!(matches!(err, StreamError::PoolClosed("delivery")));
        assert!(handle.is_closed());
    }

    #[test]
    fn push_chunk_is_clamped() {
        assert_eq!(push_chunk_size(0, 20, 300), 20);
        assert_eq!(push_chunk_size(150, 20, 300), 150);
        assert_eq!(push_chunk_size(5_000, 20, 300), 300);
    }
}
