use std::pin::pin;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Mutex, Notify, Semaphore};
use tokio::time::{sleep, timeout, timeout_at, Instant};
use tracing::{debug, info_span, trace, warn, Instrument};

use proto::{
    clamp_mtu, plan_writes, AttemptBudget, ConfigError, ConnectError, Connection, ErrorClass,
    FrameError, Header, InsufficientMtu, PeripheralState, Readiness, ReorderBuffer,
    SequenceInUse, SequenceNumber, TransportConfig, WriteState, MAX_MTU, MIN_MTU,
};

use crate::link::{BleLink, CharacteristicHandle, LinkError, LinkEvent};
use crate::link::{SMP_CHARACTERISTIC_UUID, SMP_SERVICE_UUID};
use crate::observer::{ConnectionObserver, ObserverList};

/// Reliable request/response transport for SMP messages over one BLE link
///
/// Turns an unreliable, MTU-constrained, notification-based link into a
/// reliable channel carrying opaque SMP request/response payloads. Connects
/// lazily on first [`send`](Self::send); requests are correlated to responses
/// by the sequence number in their header, so several may be pipelined when
/// the configured concurrency allows.
///
/// Handles are cheap to clone and share one underlying connection. Must be
/// created inside a tokio runtime.
#[derive(Clone)]
pub struct SmpTransport {
    inner: Arc<Inner>,
}

struct Inner {
    link: Arc<dyn BleLink>,
    config: TransportConfig,
    state: Mutex<State>,
    /// Signaled on every lifecycle state change, waking `ensure_connected`
    readiness: Notify,
    /// Bounds the number of concurrently in-flight requests
    permits: Semaphore,
    /// Callers currently blocked in `ensure_connected`; connection outcomes
    /// are only parked while this is nonzero
    connect_waiters: AtomicUsize,
    observers: ObserverList,
    next_seq: AtomicU8,
}

/// Drops a caller's claim on connection outcomes when it leaves
/// `ensure_connected`, whichever exit it takes
struct WaiterGuard<'a>(&'a AtomicUsize);

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

type Waiter = oneshot::Sender<Result<Bytes, SendError>>;

struct State {
    conn: Connection,
    writes: WriteState<Waiter>,
    rob: ReorderBuffer,
    mtu: usize,
    /// Cached only once notifications are enabled; cleared on disconnect
    smp_char: Option<CharacteristicHandle>,
    /// A drain stopped on backpressure and a resume is owed
    paused: bool,
    /// Terminal outcome of the current connection attempt, delivered to the
    /// first waiter that observes it
    connect_error: Option<ConnectError>,
}

/// Errors surfaced by [`SmpTransport::send`]
#[derive(Debug, Error, Clone)]
pub enum SendError {
    /// Connection setup failed
    #[error("connect: {0}")]
    Connect(#[from] ConnectError),
    /// The link dropped while the request was outstanding
    #[error("disconnected")]
    Disconnected,
    /// The request or response violated SMP framing
    #[error(transparent)]
    Frame(#[from] FrameError),
    /// The request exceeds the MTU and chunking is disabled
    #[error(transparent)]
    InsufficientMtu(#[from] InsufficientMtu),
    /// The platform stack reported a write failure
    #[error("link: {0}")]
    Link(#[from] LinkError),
    /// Another request currently owns this sequence number
    #[error("sequence number {0} busy")]
    SequenceBusy(SequenceNumber),
    /// The link cannot accept more writes right now
    #[error("peripheral not ready for write without response")]
    NotReady,
    /// The attempt outlived its timeout with no bytes in flight
    #[error("request timed out")]
    Timeout,
    /// Every attempt failed with a transient condition
    #[error("request not completed after {0} attempts")]
    SendFailed(u8),
}

impl SendError {
    /// How the retry loop treats this failure
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Connect(ConnectError::Busy) | Self::SequenceBusy(_) | Self::Timeout => {
                ErrorClass::WaitAndRetry
            }
            Self::NotReady => ErrorClass::NotReady,
            _ => ErrorClass::Terminal,
        }
    }
}

impl SmpTransport {
    /// Create a transport over `link`, consuming its event stream
    ///
    /// Spawns the driver task that feeds `events` into the protocol state
    /// machines; the transport stops driving when the stream ends, failing
    /// anything still pending.
    pub fn new(
        link: Arc<dyn BleLink>,
        events: mpsc::Receiver<LinkEvent>,
        config: TransportConfig,
    ) -> Self {
        let inner = Arc::new(Inner {
            permits: Semaphore::new(config.get_max_in_flight()),
            state: Mutex::new(State {
                conn: Connection::new(link.radio_state()),
                writes: WriteState::new(),
                rob: ReorderBuffer::new(),
                mtu: config.get_initial_mtu(),
                smp_char: None,
                paused: false,
                connect_error: None,
            }),
            link,
            config,
            readiness: Notify::new(),
            connect_waiters: AtomicUsize::new(0),
            observers: ObserverList::default(),
            next_seq: AtomicU8::new(0),
        });
        tokio::spawn(drive(inner.clone(), events).instrument(info_span!("transport")));
        Self { inner }
    }

    /// Exchange one SMP request for its response
    ///
    /// `request` must already carry a valid SMP header; the sequence number
    /// therein correlates the response. `timeout` overrides the configured
    /// per-request timeout. Transient link conditions are retried up to the
    /// configured attempt budget; every failure, including exhaustion of the
    /// budget, surfaces here.
    pub async fn send(
        &self,
        request: Bytes,
        timeout: Option<Duration>,
    ) -> Result<Bytes, SendError> {
        let header = Header::parse(&request)?;
        let seq = header.sequence;
        let timeout = timeout.unwrap_or_else(|| self.inner.config.get_send_timeout());
        let _permit = self
            .inner
            .permits
            .acquire()
            .await
            .expect("semaphore is never closed");

        let mut budget = AttemptBudget::new(self.inner.config.get_max_attempts());
        while budget.begin() {
            match self.attempt(&request, seq, timeout).await {
                Ok(response) => return Ok(response),
                Err(e) => match e.class() {
                    ErrorClass::Terminal => return Err(e),
                    ErrorClass::WaitAndRetry => {
                        trace!(seq, attempt = budget.used(), "transient failure: {e}");
                        sleep(self.inner.config.get_retry_interval()).await;
                    }
                    ErrorClass::NotReady => {
                        trace!(seq, attempt = budget.used(), "retrying while bytes in flight");
                    }
                },
            }
        }
        Err(SendError::SendFailed(budget.limit()))
    }

    /// One bounded attempt: connect if needed, queue the chunks, await the
    /// reassembled response
    async fn attempt(
        &self,
        request: &Bytes,
        seq: SequenceNumber,
        timeout_after: Duration,
    ) -> Result<Bytes, SendError> {
        self.ensure_connected().await?;

        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.inner.state.lock().await;
            if state.conn.state() != PeripheralState::Connected {
                return Err(SendError::Disconnected);
            }
            let chunks = plan_writes(request, state.mtu, self.inner.config.get_chunking())?;
            state
                .writes
                .new_write(seq, tx)
                .map_err(|SequenceInUse(s)| SendError::SequenceBusy(s))?;
            // A retry of a timed-out attempt finds its chunks still queued
            // and resumes the existing drain instead of duplicating them
            state.rob.enqueue(seq, chunks);
            Inner::drain(&self.inner, &mut state).await;
        }

        let result = timeout(timeout_after, rx).await;
        let mut state = self.inner.state.lock().await;
        match result {
            Ok(Ok(outcome)) => {
                state.writes.completed_write(seq);
                outcome
            }
            Ok(Err(_)) => {
                // Waiter dropped without a verdict; only teardown does that
                state.writes.completed_write(seq);
                Err(SendError::Disconnected)
            }
            Err(_elapsed) => {
                let transmitting = state.rob.is_in_flight(seq);
                state.writes.on_write_error(seq);
                state.writes.completed_write(seq);
                if transmitting {
                    // Bytes may still arrive; treat as backpressure so the
                    // retry re-awaits rather than abandoning the request
                    Err(SendError::NotReady)
                } else {
                    state.rob.remove(seq);
                    Err(SendError::Timeout)
                }
            }
        }
    }

    /// Block until the peripheral is ready for traffic, driving connection
    /// setup when no attempt is underway
    async fn ensure_connected(&self) -> Result<(), SendError> {
        let deadline = Instant::now() + self.inner.config.get_connect_timeout();
        self.inner.connect_waiters.fetch_add(1, Ordering::SeqCst);
        let _waiting = WaiterGuard(&self.inner.connect_waiters);
        loop {
            let mut notified = pin!(self.inner.readiness.notified());
            {
                let mut state = self.inner.state.lock().await;
                if let Some(e) = state.connect_error.take() {
                    return Err(SendError::Connect(e));
                }
                match state.conn.readiness().map_err(SendError::Connect)? {
                    Readiness::Ready => return Ok(()),
                    Readiness::Start => {
                        debug!("initiating connection");
                        self.inner.observers.notify(PeripheralState::Connecting);
                        if let Err(e) = self.inner.link.connect().await {
                            state.conn.on_connect_failed();
                            self.inner.observers.notify(PeripheralState::Disconnected);
                            return Err(SendError::Link(e));
                        }
                    }
                    Readiness::InProgress => {}
                }
                // Register interest before releasing the lock so a state
                // change between unlock and await cannot be missed
                notified.as_mut().enable();
            }
            if timeout_at(deadline, notified).await.is_err() {
                return Err(SendError::Connect(ConnectError::Timeout));
            }
        }
    }

    /// Drive connection setup now instead of waiting for the first `send`
    pub async fn connect(&self) -> Result<(), SendError> {
        self.ensure_connected().await
    }

    /// Tear down the link
    ///
    /// Pending requests fail with [`SendError::Disconnected`] once the link
    /// confirms the disconnect. Idempotent. This is the only cancellation
    /// path; individual requests cannot be cancelled.
    pub async fn close(&self) {
        let must_cancel = {
            let mut state = self.inner.state.lock().await;
            state.conn.close()
        };
        if must_cancel {
            self.inner.observers.notify(PeripheralState::Disconnecting);
            if let Err(e) = self.inner.link.cancel_connection().await {
                warn!("cancelling connection failed: {e}");
            }
        }
    }

    /// Current lifecycle state of the peripheral
    pub async fn state(&self) -> PeripheralState {
        self.inner.state.lock().await.conn.state()
    }

    /// MTU currently in force
    pub async fn mtu(&self) -> usize {
        self.inner.state.lock().await.mtu
    }

    /// Renegotiate the MTU downward mid-session
    ///
    /// Used when a peer response reveals the link's true limit is smaller
    /// than assumed.
    pub async fn set_mtu(&self, mtu: usize) -> Result<(), ConfigError> {
        if !(MIN_MTU..=MAX_MTU).contains(&mtu) {
            return Err(ConfigError::OutOfBounds);
        }
        self.inner.state.lock().await.mtu = mtu;
        Ok(())
    }

    /// Next sequence number for callers building SMP frames
    ///
    /// Wraps through the one-byte space; uniqueness among in-flight requests
    /// follows from the in-flight limit being below 256.
    pub fn next_sequence(&self) -> SequenceNumber {
        self.inner.next_seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Register a lifecycle observer
    pub fn add_observer(&self, observer: Arc<dyn ConnectionObserver>) {
        self.inner.observers.add(observer);
    }

    /// Remove a previously registered observer; `false` if unknown
    pub fn remove_observer(&self, observer: &Arc<dyn ConnectionObserver>) -> bool {
        self.inner.observers.remove(observer)
    }
}

impl Inner {
    /// Hand queued chunks to the link until it backpressures or the queue
    /// empties
    ///
    /// Runs under the state lock, which is the serial context keeping the
    /// chunk total order intact.
    async fn drain(inner: &Inner, state: &mut State) {
        let Some(characteristic) = state.smp_char else {
            return;
        };
        loop {
            if !inner.link.can_write_without_response() {
                state.paused = true;
                trace!("drain paused on backpressure");
                return;
            }
            let Some(chunk) = state.rob.poll_transmit() else {
                return;
            };
            let seq = chunk.sequence;
            trace!(seq, index = chunk.index, len = chunk.payload.len(), "writing chunk");
            let result = inner
                .link
                .write_without_response(characteristic, &chunk.payload)
                .await;
            state.rob.written();
            if let Err(e) = result {
                warn!(seq, "chunk write failed: {e}");
                state.rob.remove(seq);
                if let Some(waiter) = state.writes.on_write_error(seq) {
                    let _ = waiter.send(Err(SendError::Link(e)));
                }
            }
        }
    }

    /// Run the discovery ladder after the link connects
    async fn initialize(inner: &Inner, state: &mut State) -> Result<(), ConnectError> {
        let service = inner
            .link
            .discover_service(SMP_SERVICE_UUID)
            .await
            .map_err(|_| ConnectError::ServiceNotFound)?;
        state.conn.on_service_discovered(service.is_some())?;
        let Some(service) = service else {
            return Err(ConnectError::ServiceNotFound);
        };

        let characteristic = inner
            .link
            .discover_characteristic(service, SMP_CHARACTERISTIC_UUID)
            .await
            .map_err(|_| ConnectError::CharacteristicNotFound)?;
        state
            .conn
            .on_characteristic_discovered(characteristic.map(|c| c.props))?;
        let Some(characteristic) = characteristic else {
            return Err(ConnectError::CharacteristicNotFound);
        };

        let subscribed = inner.link.subscribe(characteristic.handle).await;
        state.conn.on_notifications_enabled(subscribed.is_ok())?;

        state.smp_char = Some(characteristic.handle);
        state.mtu = clamp_mtu(inner.link.max_write_len());
        debug!(mtu = state.mtu, "discovery complete, transport ready");
        Ok(())
    }

    /// The link is gone: reset state and fail everything pending, once each
    fn handle_disconnect(state: &mut State) {
        state.conn.on_disconnected();
        state.smp_char = None;
        state.rob.clear();
        state.paused = false;
        for waiter in state.writes.on_error() {
            let _ = waiter.send(Err(SendError::Disconnected));
        }
    }
}

/// Driver task: feeds link events into the protocol state machines
async fn drive(inner: Arc<Inner>, mut events: mpsc::Receiver<LinkEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            LinkEvent::RadioStateChanged(radio) => {
                let mut state = inner.state.lock().await;
                state.conn.on_radio_state(radio);
                inner.readiness.notify_waiters();
            }
            LinkEvent::Connected => {
                let mut state = inner.state.lock().await;
                state.conn.on_connected();
                inner.observers.notify(PeripheralState::Initializing);
                match Inner::initialize(&inner, &mut state).await {
                    Ok(()) => {
                        inner.observers.notify(PeripheralState::Connected);
                    }
                    Err(e) => {
                        warn!("discovery failed: {e}");
                        // Park the outcome only while a request waits for
                        // it; left behind it would poison a later send
                        if inner.connect_waiters.load(Ordering::SeqCst) > 0 {
                            state.connect_error = Some(e);
                        }
                        if state.conn.close() {
                            inner.observers.notify(PeripheralState::Disconnecting);
                            let _ = inner.link.cancel_connection().await;
                        }
                    }
                }
                inner.readiness.notify_waiters();
            }
            LinkEvent::ConnectFailed => {
                let mut state = inner.state.lock().await;
                state.conn.on_connect_failed();
                if inner.connect_waiters.load(Ordering::SeqCst) > 0 {
                    state.connect_error = Some(ConnectError::Failed);
                } else {
                    debug!("connection attempt failed with no request waiting");
                }
                inner.observers.notify(PeripheralState::Disconnected);
                inner.readiness.notify_waiters();
            }
            LinkEvent::Disconnected => {
                let mut state = inner.state.lock().await;
                Inner::handle_disconnect(&mut state);
                inner.observers.notify(PeripheralState::Disconnected);
                inner.readiness.notify_waiters();
            }
            LinkEvent::Notification { characteristic, value } => {
                let mut state = inner.state.lock().await;
                if state.smp_char != Some(characteristic) {
                    trace!("ignoring notification on unrelated characteristic");
                    continue;
                }
                let Some(seq) = state.writes.resolve_sequence(&value) else {
                    warn!(len = value.len(), "dropping unattributable notification");
                    continue;
                };
                match state.writes.received(seq, &value) {
                    proto::Received::Complete(waiter, message) => {
                        trace!(seq, len = message.len(), "response complete");
                        let _ = waiter.send(Ok(message));
                    }
                    proto::Received::Failed(waiter, e) => {
                        let _ = waiter.send(Err(SendError::Frame(e)));
                    }
                    proto::Received::Incomplete
                    | proto::Received::Unmatched
                    | proto::Received::Stale => {}
                }
            }
            LinkEvent::ReadyToWrite => {
                let mut state = inner.state.lock().await;
                if state.paused {
                    state.paused = false;
                    Inner::drain(&inner, &mut state).await;
                }
            }
        }
    }
    // Event stream ended: the link is gone for good
    debug!("link event stream ended");
    let mut state = inner.state.lock().await;
    if state.conn.state() != PeripheralState::Disconnected {
        Inner::handle_disconnect(&mut state);
        inner.observers.notify(PeripheralState::Disconnected);
    }
    inner.readiness.notify_waiters();
}
