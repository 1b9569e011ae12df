use std::{fmt::Debug, sync::Arc};

use parking_lot::Mutex;

type Callback<T> = Box<dyn FnOnce(T) + Send>;

enum Slot<T> {
    Empty,
    Waiting(Callback<T>),
    Ready(T),
    Taken,
    Abandoned,
}

impl<T> Slot<T> {
    fn state_name(&self) -> &'static str {
        match self {
            Slot::Empty => "Empty",
            Slot::Waiting(_) => "Waiting",
            Slot::Ready(_) => "Ready",
            Slot::Taken => "Taken",
            Slot::Abandoned => "Abandoned",
        }
    }
}

/// A sender for the [`Eventual`] synchronization primitive.
#[must_use = "Promise must be used to send a value to the corresponding Eventual"]
pub struct Promise<T> {
    slot: Arc<Mutex<Slot<T>>>,
}

impl<T> Promise<T> {
    /// Sends a value to the corresponding [`Eventual`].
    ///
    /// This function consumes the [`Promise`], so it can only be used once.
    /// If a follow-up was registered on the [`Eventual`], it runs right here,
    /// on the calling thread.
    ///
    /// Returns the value back if the [`Eventual`] was dropped in the meantime;
    /// nobody is listening anymore, and fulfilling is a no-op.
    pub fn fulfill(self, value: T) -> Result<(), T> {
        let mut slot = self.slot.lock();
        match std::mem::replace(&mut *slot, Slot::Taken) {
            Slot::Empty => {
                *slot = Slot::Ready(value);
                Ok(())
            }
            Slot::Waiting(callback) => {
                drop(slot);
                callback(value);
                Ok(())
            }
            Slot::Abandoned => {
                *slot = Slot::Abandoned;
                Err(value)
            }
            Slot::Ready(_) | Slot::Taken => {
                unreachable!("Promise is consumed on fulfillment, so its slot cannot be filled yet")
            }
        }
    }

    /// Returns `true` if the receiving [`Eventual`] was dropped.
    pub fn is_abandoned(&self) -> bool {
        matches!(*self.slot.lock(), Slot::Abandoned)
    }
}

impl<T> Debug for Promise<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Promise({})", self.slot.lock().state_name())
    }
}

/// A value that becomes available later, possibly after crossing a thread
/// or process boundary.
///
/// The value is set exactly once, through the paired [`Promise`]. Exactly one
/// follow-up may be registered with [`on_fulfill()`](Eventual::on_fulfill),
/// [`then()`](Eventual::then) or [`and_then()`](Eventual::and_then), all of
/// which consume the [`Eventual`]. The follow-up runs on whichever thread
/// calls [`Promise::fulfill()`], or immediately if the value is already there.
///
/// There is no explicit cancellation. Dropping an unfulfilled [`Eventual`]
/// turns the eventual fulfillment into a no-op, and follow-ups that capture
/// only weak references to their context do nothing once that context is gone.
#[must_use = "Eventual must be used to receive a value from the corresponding Promise"]
pub struct Eventual<T> {
    slot: Arc<Mutex<Slot<T>>>,
}

impl<T> Eventual<T> {
    /// Creates a new [`Eventual`] and its corresponding [`Promise`].
    #[inline]
    pub fn new() -> (Self, Promise<T>) {
        let slot = Arc::new(Mutex::new(Slot::Empty));
        (
            Self { slot: slot.clone() },
            Promise { slot },
        )
    }

    /// Creates an [`Eventual`] that is already fulfilled.
    pub fn ready(value: T) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Slot::Ready(value))),
        }
    }

    /// Checks if the value is set and has not been taken yet.
    #[inline]
    pub fn is_set(&self) -> bool {
        matches!(*self.slot.lock(), Slot::Ready(_))
    }

    /// Takes the value out if it has been set.
    ///
    /// This function will not block the current thread.
    pub fn try_take(&mut self) -> Option<T> {
        let mut slot = self.slot.lock();
        match std::mem::replace(&mut *slot, Slot::Taken) {
            Slot::Ready(value) => Some(value),
            other => {
                *slot = other;
                None
            }
        }
    }
}

impl<T: Send + 'static> Eventual<T> {
    /// Registers `f` to run with the value once it is available.
    ///
    /// If the value was already taken with [`try_take()`](Eventual::try_take),
    /// `f` never runs.
    pub fn on_fulfill<F>(self, f: F)
    where
        F: FnOnce(T) + Send + 'static,
    {
        let mut slot = self.slot.lock();
        match std::mem::replace(&mut *slot, Slot::Taken) {
            Slot::Empty => {
                *slot = Slot::Waiting(Box::new(f));
            }
            Slot::Ready(value) => {
                drop(slot);
                f(value);
            }
            other => {
                *slot = other;
            }
        }
    }

    /// Chains a computation that maps the value once it is available.
    pub fn then<U, F>(self, f: F) -> Eventual<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        let (next, promise) = Eventual::new();
        self.on_fulfill(move |value| {
            let _ = promise.fulfill(f(value));
        });
        next
    }

    /// Chains another asynchronous step, flattening the result.
    pub fn and_then<U, F>(self, f: F) -> Eventual<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> Eventual<U> + Send + 'static,
    {
        let (next, promise) = Eventual::new();
        self.on_fulfill(move |value| {
            f(value).on_fulfill(move |inner| {
                let _ = promise.fulfill(inner);
            });
        });
        next
    }
}

impl<T> Drop for Eventual<T> {
    fn drop(&mut self) {
        let mut slot = self.slot.lock();
        if matches!(*slot, Slot::Empty | Slot::Ready(_)) {
            *slot = Slot::Abandoned;
        }
    }
}

impl<T> Debug for Eventual<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Eventual({})", self.slot.lock().state_name())
    }
}

struct Join<T> {
    values: Vec<Option<T>>,
    remaining: usize,
    promise: Option<Promise<Vec<T>>>,
}

/// Waits for all `eventuals`, yielding their values in the same order.
pub fn join_all<T: Send + 'static>(eventuals: Vec<Eventual<T>>) -> Eventual<Vec<T>> {
    if eventuals.is_empty() {
        return Eventual::ready(Vec::new());
    }

    let (joined, promise) = Eventual::new();
    let state = Arc::new(Mutex::new(Join {
        values: eventuals.iter().map(|_| None).collect(),
        remaining: eventuals.len(),
        promise: Some(promise),
    }));

    for (index, eventual) in eventuals.into_iter().enumerate() {
        let state = state.clone();
        eventual.on_fulfill(move |value| {
            let mut join = state.lock();
            join.values[index] = Some(value);
            join.remaining -= 1;
            if join.remaining > 0 {
                return;
            }
            let values = join.values.drain(..).flatten().collect();
            let promise = join.promise.take();
            drop(join);
            if let Some(promise) = promise {
                let _ = promise.fulfill(values);
            }
        });
    }

    joined
}
