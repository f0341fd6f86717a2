//! The process-wide event bus: typed publish/subscribe between host and
//! runtime.
//!
//! All user-observable output (the `LOG_*` kinds) flows through here; no
//! component writes to standard streams directly. The bus is the sole
//! cross-thread surface of the runtime: a host thread may publish `INPUT`
//! events while the interpreter runs, and payloads land in a mailbox the
//! interpreter thread drains. Subscriber lists are guarded by a single
//! mutex; subscribers must not block.

use std::{
    collections::VecDeque,
    sync::{Condvar, LazyLock, Mutex, PoisonError},
};

use ahash::AHashMap;
use strum::{Display, FromRepr, IntoStaticStr};

/// The closed set of event kinds. Discriminants are part of the C surface.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, FromRepr, IntoStaticStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    LogInfo = 0,
    LogWarning = 1,
    LogError = 2,
    LogDebug = 3,
    ExitProgram = 4,
    Input = 5,
}

/// A subscriber callback, invoked with the published payload.
pub type Callback = Box<dyn Fn(&str) + Send + 'static>;

struct Subscription {
    id: u32,
    callback: Callback,
}

#[derive(Default)]
struct BusInner {
    subscriptions: AHashMap<EventKind, Vec<Subscription>>,
    next_id: u32,
}

static BUS: LazyLock<Mutex<BusInner>> = LazyLock::new(|| Mutex::new(BusInner::default()));

#[derive(Default)]
struct InputMailbox {
    payloads: VecDeque<String>,
    closed: bool,
}

static INPUT_MAILBOX: LazyLock<(Mutex<InputMailbox>, Condvar)> =
    LazyLock::new(|| (Mutex::new(InputMailbox::default()), Condvar::new()));

/// Subscribes to an event kind, returning a monotonic non-zero id.
pub fn subscribe(kind: EventKind, callback: Callback) -> u32 {
    let mut bus = BUS.lock().unwrap_or_else(PoisonError::into_inner);
    bus.next_id += 1;
    let id = bus.next_id;
    bus.subscriptions
        .entry(kind)
        .or_default()
        .push(Subscription { id, callback });
    id
}

/// Removes the subscription with the given id from whichever list holds it.
/// Id 0 (and unknown ids) are no-ops.
pub fn unsubscribe(id: u32) {
    if id == 0 {
        return;
    }
    let mut bus = BUS.lock().unwrap_or_else(PoisonError::into_inner);
    for subscriptions in bus.subscriptions.values_mut() {
        subscriptions.retain(|subscription| subscription.id != id);
    }
}

/// Invokes every live subscriber for `kind` in subscription order with the
/// payload. `INPUT` events additionally land in the interpreter's mailbox.
pub fn publish(kind: EventKind, data: &str) {
    {
        let bus = BUS.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(subscriptions) = bus.subscriptions.get(&kind) {
            for subscription in subscriptions {
                (subscription.callback)(data);
            }
        }
    }
    if kind == EventKind::Input {
        let (mailbox, condvar) = &*INPUT_MAILBOX;
        let mut mailbox = mailbox.lock().unwrap_or_else(PoisonError::into_inner);
        mailbox.payloads.push_back(data.to_owned());
        condvar.notify_all();
    }
}

/// Marks the input stream closed (host reached end of input). Blocked
/// waiters wake and give up.
pub fn close_input() {
    let (mailbox, condvar) = &*INPUT_MAILBOX;
    let mut mailbox = mailbox.lock().unwrap_or_else(PoisonError::into_inner);
    mailbox.closed = true;
    condvar.notify_all();
}

/// Reopens a closed input stream; primarily for embedders that run several
/// programs in one process.
pub fn reopen_input() {
    let (mailbox, _) = &*INPUT_MAILBOX;
    let mut mailbox = mailbox.lock().unwrap_or_else(PoisonError::into_inner);
    mailbox.closed = false;
    mailbox.payloads.clear();
}

/// Pops the oldest pending input payload, if any.
pub(crate) fn take_input() -> Option<String> {
    let (mailbox, _) = &*INPUT_MAILBOX;
    let mut mailbox = mailbox.lock().unwrap_or_else(PoisonError::into_inner);
    mailbox.payloads.pop_front()
}

/// Blocks until an input payload is available (true) or the stream is
/// closed with nothing pending (false). The payload itself is consumed by
/// a following `take_input`.
pub(crate) fn wait_for_input() -> bool {
    let (mailbox, condvar) = &*INPUT_MAILBOX;
    let mut mailbox = mailbox.lock().unwrap_or_else(PoisonError::into_inner);
    loop {
        if !mailbox.payloads.is_empty() {
            return true;
        }
        if mailbox.closed {
            return false;
        }
        mailbox = condvar.wait(mailbox).unwrap_or_else(PoisonError::into_inner);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[test]
    fn subscribers_run_in_insertion_order_and_unsubscribe_removes() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let first = {
            let seen = Arc::clone(&seen);
            subscribe(EventKind::ExitProgram, Box::new(move |data| {
                seen.lock().unwrap().push(format!("first:{data}"));
            }))
        };
        let second = {
            let seen = Arc::clone(&seen);
            subscribe(EventKind::ExitProgram, Box::new(move |data| {
                seen.lock().unwrap().push(format!("second:{data}"));
            }))
        };
        assert_ne!(first, 0);
        assert_ne!(second, 0);
        assert!(second > first);

        publish(EventKind::ExitProgram, "0");
        unsubscribe(first);
        publish(EventKind::ExitProgram, "1");
        unsubscribe(second);

        let seen = seen.lock().unwrap();
        assert_eq!(*seen, vec!["first:0", "second:0", "second:1"]);
    }

    #[test]
    fn unsubscribe_of_id_zero_is_a_no_op() {
        unsubscribe(0);
    }
}
