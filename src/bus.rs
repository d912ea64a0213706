//! Cross-process publish/subscribe message bus.
//!
//! One shared-memory region holds a bounded circular queue of messages, a
//! subscription table, and a reference count, all guarded by a single
//! process-shared [`RegionLock`]. Every operation acquires the lock, does
//! bounded in-memory work, and releases it before returning — nothing here
//! blocks on I/O and nothing blocks indefinitely.
//!
//! Delivery semantics: `try_receive` scans from the oldest slot and returns
//! the first message whose kind matches one of the caller's subscriptions.
//! A match at the head advances the read cursor; a match deeper in the
//! window is tombstoned in place (the queue never compacts). Messages that
//! do not match are skipped, not removed — they wait for their own
//! subscriber or for the age-based prune. A subscriber that never drains
//! its kind can therefore hold the head until pruning clears it; that
//! starvation is accepted behavior, not a defect to paper over.

use std::mem;

use static_assertions::const_assert;
use tracing::{debug, trace, warn};

use crate::error::BusError;
use crate::messages::{unix_time, ComponentId, Message, MessageKind, Position};
use crate::shm::{RegionLock, RegionToken, SharedRegion};

/// Queue capacity in messages.
pub const BUS_CAPACITY: usize = 100;
/// Subscription table size.
pub const MAX_SUBSCRIPTIONS: usize = 16;
/// Default age after which an undelivered message is pruned.
pub const MESSAGE_TIMEOUT_SECS: u64 = 5;

#[derive(Clone, Copy)]
#[repr(C)]
struct Slot {
    message: Message,
    /// Unix seconds at enqueue, for age-based pruning.
    enqueued_at: u64,
    /// Cleared when a mid-window message is consumed out of order.
    live: bool,
}

#[repr(C)]
struct MessageQueue {
    slots: [Slot; BUS_CAPACITY],
    read_idx: u32,
    write_idx: u32,
    /// Number of slots in the window `[read_idx, write_idx)`, tombstones
    /// included. `0 <= count <= BUS_CAPACITY` always holds.
    count: u32,
}

#[derive(Clone, Copy)]
#[repr(C)]
struct Subscription {
    subscriber: ComponentId,
    kind: MessageKind,
    active: bool,
}

/// The region layout. Mutated only while `lock` is held.
#[repr(C)]
struct BusShared {
    lock: RegionLock,
    ref_count: u32,
    message_timeout_secs: u64,
    queue: MessageQueue,
    subscriptions: [Subscription; MAX_SUBSCRIPTIONS],
}

/// Region size: the layout itself. The mapping is exactly as large as the
/// shared state, no slack to get out of sync over.
pub const BUS_REGION_SIZE: usize = mem::size_of::<BusShared>();

// The mapping is page-aligned; the layout must not demand more.
const_assert!(mem::align_of::<BusShared>() <= 4096);
const_assert!(mem::size_of::<Message>() <= 256);

/// A per-process handle to the shared bus.
///
/// Dropping the handle detaches it: the reference count is decremented
/// under the lock and the last detach unlinks the region. Handles must not
/// outlive the simulation they belong to; there is no double-detach
/// protection beyond single ownership of the handle itself.
pub struct Bus {
    region: SharedRegion,
    shared: *mut BusShared,
    detached: bool,
}

// All mutation happens behind the in-region lock, and the handle itself
// carries no thread-affine state.
unsafe impl Send for Bus {}
unsafe impl Sync for Bus {}

struct BusGuard<'a> {
    shared: &'a mut BusShared,
}

impl Drop for BusGuard<'_> {
    fn drop(&mut self) {
        self.shared.lock.release();
    }
}

impl Bus {
    /// Allocate the shared region, zero-initialize the queue and table, and
    /// take the first reference.
    pub fn create() -> Result<Self, BusError> {
        Self::create_with_timeout(MESSAGE_TIMEOUT_SECS)
    }

    /// Like [`Bus::create`] with an explicit prune timeout. Mostly a test
    /// hook; production uses [`MESSAGE_TIMEOUT_SECS`].
    pub fn create_with_timeout(message_timeout_secs: u64) -> Result<Self, BusError> {
        let region = SharedRegion::create(BUS_REGION_SIZE)?;
        let shared = region.base_ptr() as *mut BusShared;
        // The file is created zero-filled and all-zero is valid for every
        // field, so only the non-zero defaults need explicit writes.
        unsafe {
            (*shared).ref_count = 1;
            (*shared).message_timeout_secs = message_timeout_secs;
        }
        debug!(token = %region.token(), "bus region created");
        Ok(Self {
            region,
            shared,
            detached: false,
        })
    }

    /// Map an existing bus region and increment its reference count.
    ///
    /// Fails when the region's reference count has already reached zero:
    /// that region is mid-teardown (the final detach unlinks under the
    /// lock), and bumping its count back to one would resurrect a mapping
    /// whose file is gone.
    pub fn attach(token: &RegionToken) -> Result<Self, BusError> {
        let region = SharedRegion::attach(token, BUS_REGION_SIZE)?;
        let shared = region.base_ptr() as *mut BusShared;
        // Marked detached until the refcount bump succeeds, so the error
        // path below does not decrement a count it never incremented.
        let mut bus = Self {
            region,
            shared,
            detached: true,
        };
        let refs = {
            let mut guard = bus.lock();
            if guard.shared.ref_count == 0 {
                return Err(BusError::Region(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "bus region is being torn down",
                )));
            }
            guard.shared.ref_count += 1;
            guard.shared.ref_count
        };
        bus.detached = false;
        debug!(token = %token, refs, "attached to bus region");
        Ok(bus)
    }

    /// The token a spawned child needs to attach.
    pub fn token(&self) -> RegionToken {
        self.region.token().clone()
    }

    /// Current number of attached handles.
    pub fn attachments(&self) -> u32 {
        self.lock().shared.ref_count
    }

    fn lock(&self) -> BusGuard<'_> {
        unsafe {
            (*self.shared).lock.acquire();
            BusGuard {
                shared: &mut *self.shared,
            }
        }
    }

    /// Record interest in a message kind. Duplicate subscriptions are
    /// wasteful but accepted; there is no unsubscribe.
    pub fn subscribe(&self, subscriber: ComponentId, kind: MessageKind) -> Result<(), BusError> {
        let mut guard = self.lock();
        for slot in guard.shared.subscriptions.iter_mut() {
            if !slot.active {
                *slot = Subscription {
                    subscriber,
                    kind,
                    active: true,
                };
                trace!(?subscriber, ?kind, "subscription added");
                return Ok(());
            }
        }
        warn!(?subscriber, ?kind, "subscription table full");
        Err(BusError::SubscriptionTableFull {
            capacity: MAX_SUBSCRIPTIONS,
        })
    }

    /// Append a message. Fails with [`BusError::QueueFull`] when the window
    /// is at capacity; callers treat that as back-pressure and retry.
    pub fn publish(&self, message: &Message) -> Result<(), BusError> {
        let now = unix_time();
        let mut guard = self.lock();
        let queue = &mut guard.shared.queue;
        if queue.count as usize >= BUS_CAPACITY {
            return Err(BusError::QueueFull {
                capacity: BUS_CAPACITY,
            });
        }
        let w = queue.write_idx as usize;
        queue.slots[w] = Slot {
            message: *message,
            enqueued_at: now,
            live: true,
        };
        queue.write_idx = (queue.write_idx + 1) % BUS_CAPACITY as u32;
        queue.count += 1;
        trace!(
            kind = ?message.header.kind,
            sender = ?message.header.sender,
            count = queue.count,
            "message published"
        );
        Ok(())
    }

    /// Non-blocking receive: returns the oldest live message matching one
    /// of `subscriber`'s subscriptions, or `None`.
    pub fn try_receive(&self, subscriber: ComponentId) -> Option<Message> {
        let now = unix_time();
        let mut guard = self.lock();
        let timeout = guard.shared.message_timeout_secs;
        Self::prune_head(guard.shared, now, timeout);

        let BusShared {
            queue,
            subscriptions,
            ..
        } = &mut *guard.shared;
        if queue.count == 0 {
            return None;
        }

        let mut idx = queue.read_idx as usize;
        for offset in 0..queue.count as usize {
            let slot = &queue.slots[idx];
            let matched = slot.live
                && subscriptions.iter().any(|s| {
                    s.active && s.subscriber == subscriber && s.kind == slot.message.header.kind
                });
            if matched {
                let message = slot.message;
                if offset == 0 {
                    queue.read_idx = (queue.read_idx + 1) % BUS_CAPACITY as u32;
                    queue.count -= 1;
                    Self::drop_leading_tombstones(queue);
                } else {
                    // Out-of-order consumption: tombstone in place, the
                    // window does not compact.
                    queue.slots[idx].live = false;
                }
                return Some(message);
            }
            idx = (idx + 1) % BUS_CAPACITY;
        }
        None
    }

    /// Drop the contiguous head run of expired entries and tombstones.
    /// Enqueue times are monotone within the window, so every expired
    /// entry is in that run; tombstones it uncovers go with it, otherwise
    /// an already-consumed slot would hold a capacity unit until its own
    /// enqueue time ages out. Pruned messages are silently lost: a
    /// consumer that reads too slowly loses old data rather than wedging
    /// producers.
    fn prune_head(shared: &mut BusShared, now: u64, timeout: u64) {
        let queue = &mut shared.queue;
        let mut pruned = 0u32;
        while queue.count > 0 {
            let slot = &queue.slots[queue.read_idx as usize];
            if !slot.live || now.saturating_sub(slot.enqueued_at) > timeout {
                queue.read_idx = (queue.read_idx + 1) % BUS_CAPACITY as u32;
                queue.count -= 1;
                pruned += 1;
            } else {
                break;
            }
        }
        if pruned > 0 {
            debug!(pruned, remaining = queue.count, "pruned expired messages");
        }
    }

    /// Advance the head past slots already consumed out of order, so
    /// tombstones never pin the window open once they reach the front.
    fn drop_leading_tombstones(queue: &mut MessageQueue) {
        while queue.count > 0 && !queue.slots[queue.read_idx as usize].live {
            queue.read_idx = (queue.read_idx + 1) % BUS_CAPACITY as u32;
            queue.count -= 1;
        }
    }

    fn detach_inner(&mut self) {
        if self.detached {
            return;
        }
        self.detached = true;
        let remaining = {
            let mut guard = self.lock();
            guard.shared.ref_count -= 1;
            let remaining = guard.shared.ref_count;
            if remaining == 0 {
                // Unlink while the lock is still held. An attacher that
                // already opened and mapped the file will acquire the lock
                // next, see the zero count, and refuse — it can never bump
                // the count of a region whose file is about to vanish.
                if let Err(e) = self.region.unlink() {
                    warn!(error = %e, "failed to unlink bus region");
                }
            }
            remaining
        };
        debug!(token = %self.region.token(), remaining, "detached from bus region");
    }

    /// Explicit detach; equivalent to dropping the handle.
    pub fn detach(mut self) {
        self.detach_inner();
    }

    /// Unconditionally remove the region file, regardless of stale
    /// reference counts left behind by force-killed children. Only the
    /// supervisor calls this, after every child has been reaped.
    pub fn teardown(mut self) {
        self.detach_inner();
        // Stale attachments cannot race us: their processes are gone.
        let _ = self.region.unlink();
    }
}

impl Drop for Bus {
    fn drop(&mut self) {
        self.detach_inner();
    }
}

/// Convenience for producers: publish with bounded retries on transient
/// back-pressure, dropping the message (with a warning) once exhausted.
pub fn publish_with_retry(bus: &Bus, message: &Message, attempts: u32) -> Result<(), BusError> {
    let mut last = None;
    for _ in 0..attempts {
        match bus.publish(message) {
            Ok(()) => return Ok(()),
            Err(e) if e.is_transient() => {
                last = Some(e);
                std::thread::sleep(std::time::Duration::from_millis(2));
            }
            Err(e) => return Err(e),
        }
    }
    warn!(kind = ?message.header.kind, "dropping message after retries");
    Err(last.unwrap_or(BusError::QueueFull {
        capacity: BUS_CAPACITY,
    }))
}

/// Helper used by the simulated sensors: a position update already wrapped
/// in a publish-with-retry.
pub fn publish_position(bus: &Bus, sender: ComponentId, position: Position) -> Result<(), BusError> {
    publish_with_retry(bus, &Message::position_update(sender, position), 3)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tombstones_collapse_when_they_reach_the_head() {
        let bus = Bus::create().expect("create bus");
        bus.subscribe(ComponentId::FlightController, MessageKind::PositionUpdate)
            .unwrap();
        bus.subscribe(ComponentId::Autopilot, MessageKind::StateResponse)
            .unwrap();

        // Head: a state response only the autopilot wants. Behind it: a
        // position update.
        bus.publish(&Message::state_response(
            ComponentId::Autopilot,
            Default::default(),
        ))
        .unwrap();
        let pos = Position {
            latitude: 1.0,
            longitude: 2.0,
            altitude: 3.0,
        };
        bus.publish(&Message::position_update(ComponentId::Gps, pos))
            .unwrap();

        // The flight controller matches mid-window, tombstoning the second
        // slot while the head stays put.
        let got = bus
            .try_receive(ComponentId::FlightController)
            .expect("mid-window match");
        assert_eq!(got.kind(), MessageKind::PositionUpdate);

        // Now the autopilot drains the head; the tombstone behind it must
        // collapse and empty the window.
        let got = bus.try_receive(ComponentId::Autopilot).expect("head match");
        assert_eq!(got.kind(), MessageKind::StateResponse);
        assert!(bus.try_receive(ComponentId::Autopilot).is_none());
        assert!(bus.try_receive(ComponentId::FlightController).is_none());

        // Window fully drained: capacity is available again.
        for _ in 0..BUS_CAPACITY {
            bus.publish(&Message::position_update(ComponentId::Gps, pos))
                .unwrap();
        }
    }
}
