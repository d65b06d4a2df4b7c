//! # Record Dispatcher
//!
//! Fans every decoded [`TickerRecord`] out to the client's consumers:
//!
//! - **Stream listeners**: any number of receivers obtained through
//!   [`TickerStream::listen`]. Each listener owns an unbounded channel, so a
//!   record is never dropped while the listener is alive and each listener sees
//!   records in arrival order. The record is wrapped in an `Arc` once and every
//!   listener receives a pointer to the same allocation. Listeners whose
//!   receiver was dropped are pruned on the next dispatch.
//!
//! - **Callback**: at most one function, invoked synchronously on the session
//!   task after the listeners were fed. The registration is an explicit
//!   [`ConsumerRegistration`]; replacing the callback returns the previous one.
//!   A panicking callback is caught and reported in the [`DispatchReport`]; it
//!   never unwinds into the session task.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;

use crate::logger::{panic_message, ClientLogger};
use crate::record::TickerRecord;

/// Single-callback consumer.
pub type Callback = Arc<dyn Fn(&TickerRecord) + Send + Sync>;

/// Which consumers besides the stream are registered.
#[derive(Clone, Default)]
pub enum ConsumerRegistration {
    /// Records go to stream listeners only.
    #[default]
    StreamOnly,
    /// Records go to stream listeners and to the callback.
    StreamAndCallback(Callback),
}

impl ConsumerRegistration {
    pub fn has_callback(&self) -> bool {
        matches!(self, ConsumerRegistration::StreamAndCallback(_))
    }
}

impl fmt::Debug for ConsumerRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsumerRegistration::StreamOnly => f.write_str("StreamOnly"),
            ConsumerRegistration::StreamAndCallback(_) => f.write_str("StreamAndCallback(..)"),
        }
    }
}

/// Outcome of one [`Dispatcher::dispatch`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Listeners the record was queued for.
    pub listeners: usize,
    /// The callback ran and panicked.
    pub callback_panicked: bool,
}

struct ListenerHandle {
    id: u64,
    sender: mpsc::UnboundedSender<Arc<TickerRecord>>,
}

pub struct Dispatcher {
    listeners: Mutex<Vec<ListenerHandle>>,
    registration: Mutex<ConsumerRegistration>,
    next_listener_id: AtomicU64,
    logger: ClientLogger,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Dispatcher {
    pub fn new(logger: ClientLogger) -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
            registration: Mutex::new(ConsumerRegistration::StreamOnly),
            next_listener_id: AtomicU64::new(1),
            logger,
        }
    }

    /// Registers a new stream listener.
    pub fn add_listener(&self) -> TickerListener {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.listeners).push(ListenerHandle { id, sender: tx });
        self.logger.debug(format_args!("Listener {} registered", id));
        TickerListener { id, receiver: rx }
    }

    /// Listeners registered and not yet pruned.
    pub fn listener_count(&self) -> usize {
        lock(&self.listeners).len()
    }

    /// Installs `callback`, returning the one it replaces.
    pub fn replace_callback(&self, callback: Callback) -> Option<Callback> {
        let previous = std::mem::replace(
            &mut *lock(&self.registration),
            ConsumerRegistration::StreamAndCallback(callback),
        );
        match previous {
            ConsumerRegistration::StreamAndCallback(old) => {
                self.logger.debug(format_args!("Callback replaced"));
                Some(old)
            }
            ConsumerRegistration::StreamOnly => None,
        }
    }

    /// Returns to stream-only delivery, handing back the removed callback.
    pub fn clear_callback(&self) -> Option<Callback> {
        match std::mem::take(&mut *lock(&self.registration)) {
            ConsumerRegistration::StreamAndCallback(old) => Some(old),
            ConsumerRegistration::StreamOnly => None,
        }
    }

    pub fn registration(&self) -> ConsumerRegistration {
        lock(&self.registration).clone()
    }

    /// Delivers `record` to every consumer.
    pub fn dispatch(&self, record: TickerRecord) -> DispatchReport {
        let record = Arc::new(record);

        let listeners = {
            let mut listeners = lock(&self.listeners);
            listeners.retain(|listener| match listener.sender.send(Arc::clone(&record)) {
                Ok(()) => true,
                Err(_) => {
                    self.logger.debug(format_args!("Listener {} dropped. Removing.", listener.id));
                    false
                }
            });
            listeners.len()
        };

        // Clone out of the lock so the callback may re-register itself.
        let callback = match &*lock(&self.registration) {
            ConsumerRegistration::StreamAndCallback(callback) => Some(Arc::clone(callback)),
            ConsumerRegistration::StreamOnly => None,
        };
        let callback_panicked = match callback {
            Some(callback) => {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| callback(&record)));
                if let Err(payload) = &outcome {
                    self.logger.error(format_args!(
                        "Callback panicked on record {:?}: {}",
                        record.symbol(),
                        panic_message(payload.as_ref())
                    ));
                }
                outcome.is_err()
            }
            None => false,
        };

        DispatchReport {
            listeners,
            callback_panicked,
        }
    }
}

/// Receiving end of one stream listener.
#[derive(Debug)]
pub struct TickerListener {
    id: u64,
    receiver: mpsc::UnboundedReceiver<Arc<TickerRecord>>,
}

impl TickerListener {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next record; `None` once the owning client is gone.
    pub async fn recv(&mut self) -> Option<Arc<TickerRecord>> {
        self.receiver.recv().await
    }

    /// Next record if one is already queued.
    pub fn try_recv(&mut self) -> Option<Arc<TickerRecord>> {
        self.receiver.try_recv().ok()
    }
}

/// The client's shared event stream. Every `subscribe` on one client returns a
/// handle to the same stream; clones compare equal.
#[derive(Clone)]
pub struct TickerStream {
    dispatcher: Arc<Dispatcher>,
}

impl TickerStream {
    pub(crate) fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }

    /// Opens a new listener that receives every record dispatched from now on.
    pub fn listen(&self) -> TickerListener {
        self.dispatcher.add_listener()
    }

    pub fn listener_count(&self) -> usize {
        self.dispatcher.listener_count()
    }
}

impl PartialEq for TickerStream {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.dispatcher, &other.dispatcher)
    }
}

impl Eq for TickerStream {}

impl fmt::Debug for TickerStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TickerStream")
            .field("listeners", &self.listener_count())
            .finish()
    }
}
