// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The priority-preemptive cooperative dispatcher.
//!
//! Registered active objects each get a fixed priority, a bounded FIFO
//! mailbox, a bounded deferral queue, and one timer. `run_ready` always
//! picks the highest-priority non-empty mailbox, runs that object's
//! `handle` to completion (handlers never block), and applies the
//! effects it returns. This is "cooperative" in the sense that nothing
//! preempts a running handler -- there is exactly one thread of
//! execution -- and "priority" in the sense that a lower-priority
//! object never runs while a higher-priority one has work pending,
//! matching the original firmware's active-object scheduler.

use std::collections::{HashMap, VecDeque};

use crate::active_object::{ActiveObject, Effect, Priority};
use crate::config::{DEFERRAL_CAPACITY, MAILBOX_CAPACITY};
use crate::event::{Event, Payload, SignalId};
use crate::pool::{EventHandle, EventPools};
use crate::time::TimeEvent;

struct Registration {
    object: &'static dyn ActiveObject,
    priority: Priority,
    mailbox: VecDeque<EventHandle>,
    deferral: VecDeque<EventHandle>,
    timer: TimeEvent,
}

/// The event kernel for one board: the shared event pools, the
/// registered active objects, and the signal subscription table used
/// by `Effect::Publish`.
pub struct Dispatcher {
    pools: EventPools<Event>,
    objects: Vec<Registration>,
    by_name: HashMap<&'static str, usize>,
    subscriptions: HashMap<SignalId, Vec<usize>>,
}

impl Dispatcher {
    pub fn new(pools: EventPools<Event>) -> Self {
        Self {
            pools,
            objects: Vec::new(),
            by_name: HashMap::new(),
            subscriptions: HashMap::new(),
        }
    }

    /// Registers an active object. Takes a `&'static` reference rather
    /// than an owned `Box` because the same object is typically also
    /// registered as a `&'static` HIL `Client` with a chip peripheral
    /// and/or kept by the board to call its own `poll` -- see
    /// `boards/dc3-coupler` for how one value is leaked once and handed
    /// out to all three places.
    pub fn register(&mut self, object: &'static dyn ActiveObject) {
        let name = object.name();
        let priority = object.priority();
        let index = self.objects.len();
        self.objects.push(Registration {
            object,
            priority,
            mailbox: VecDeque::with_capacity(MAILBOX_CAPACITY),
            deferral: VecDeque::with_capacity(DEFERRAL_CAPACITY),
            timer: TimeEvent::disarmed(),
        });
        self.by_name.insert(name, index);
    }

    /// Subscribes the named active object to a published signal.
    pub fn subscribe(&mut self, name: &'static str, signal: SignalId) {
        let index = *self
            .by_name
            .get(name)
            .unwrap_or_else(|| panic!("subscribe: unknown active object {name}"));
        self.subscriptions.entry(signal).or_default().push(index);
    }

    /// Posts an event directly into a named active object's mailbox,
    /// as board/test setup code (rather than another active object's
    /// effect) would to kick things off.
    pub fn post(&mut self, target: &'static str, signal: SignalId, payload: Payload) {
        let index = *self
            .by_name
            .get(target)
            .unwrap_or_else(|| panic!("post: unknown active object {target}"));
        self.enqueue(index, signal, payload);
    }

    fn enqueue(&mut self, index: usize, signal: SignalId, payload: Payload) {
        let class = payload.suggested_class();
        let event = Event::new(signal, payload);
        let handle = self
            .pools
            .alloc(class, event)
            .expect("event pool exhausted: increase pool capacity");
        let reg = &mut self.objects[index];
        assert!(
            reg.mailbox.len() < MAILBOX_CAPACITY,
            "mailbox overflow for active object {}: this is a fatal design error, not a runtime condition to recover from",
            reg.object.name()
        );
        reg.mailbox.push_back(handle);
    }

    fn publish(&mut self, signal: SignalId, payload: Payload) {
        let Some(subscribers) = self.subscriptions.get(&signal).cloned() else {
            return;
        };
        if subscribers.is_empty() {
            return;
        }
        let class = payload.suggested_class();
        let event = Event::new(signal, payload);
        let handle = self
            .pools
            .alloc(class, event)
            .expect("event pool exhausted: increase pool capacity");
        for (i, &index) in subscribers.iter().enumerate() {
            if i > 0 {
                self.pools.retain(handle).expect("retain on fresh handle");
            }
            let reg = &mut self.objects[index];
            assert!(
                reg.mailbox.len() < MAILBOX_CAPACITY,
                "mailbox overflow for active object {}",
                reg.object.name()
            );
            reg.mailbox.push_back(handle);
        }
    }

    /// True if any active object has work pending.
    pub fn has_ready_work(&self) -> bool {
        self.objects.iter().any(|r| !r.mailbox.is_empty())
    }

    /// Runs one step: the highest-priority active object with a
    /// non-empty mailbox handles exactly one event. Returns the name of
    /// the active object that ran, or `None` if nothing was ready.
    pub fn run_ready(&mut self) -> Option<&'static str> {
        let index = self
            .objects
            .iter()
            .enumerate()
            .filter(|(_, r)| !r.mailbox.is_empty())
            .min_by_key(|(_, r)| r.priority)
            .map(|(i, _)| i)?;

        let handle = self.objects[index].mailbox.pop_front().unwrap();
        let event = self
            .pools
            .peek(handle, Clone::clone)
            .expect("handle taken from our own mailbox must be live");

        let effects = self.objects[index].object.handle(&event);

        let mut deferred = false;
        for effect in effects {
            match effect {
                Effect::Post { target, signal, payload } => self.post(target, signal, payload),
                Effect::Publish { signal, payload } => self.publish(signal, payload),
                Effect::ArmTimer { ticks, periodic, signal } => {
                    self.objects[index].timer.arm(ticks, periodic, signal);
                }
                Effect::DisarmTimer => self.objects[index].timer.disarm(),
                Effect::Defer => {
                    let reg = &mut self.objects[index];
                    assert!(
                        reg.deferral.len() < DEFERRAL_CAPACITY,
                        "deferral overflow for active object {}",
                        reg.object.name()
                    );
                    // The handler's own reference transfers straight to the
                    // deferral queue; no retain here, and `release` below is
                    // skipped for the same reason -- exactly one reference
                    // moves from "in the handler" to "in the queue".
                    reg.deferral.push_back(handle);
                    deferred = true;
                }
                Effect::RecallOne => {
                    if let Some(recalled) = self.objects[index].deferral.pop_front() {
                        self.objects[index].mailbox.push_front(recalled);
                    }
                }
            }
        }

        if !deferred {
            self.pools.release(handle).expect("release our own live handle");
        }

        Some(self.objects[index].object.name())
    }

    /// Drains all currently-ready work, running each ready active
    /// object once per pass until none have pending events. Newly
    /// posted events from effects are picked up on subsequent passes.
    pub fn run_to_quiescence(&mut self) {
        while self.run_ready().is_some() {}
    }

    /// Advances every registered timer by one tick, posting the
    /// configured signal to its owner for any timer that expires.
    pub fn tick(&mut self) {
        for index in 0..self.objects.len() {
            if let Some(signal) = self.objects[index].timer.tick() {
                self.enqueue(index, signal, Payload::Empty);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DEFAULT_MEDIUM_POOL_CAPACITY, DEFAULT_SMALL_POOL_CAPACITY, DEFAULT_LARGE_POOL_CAPACITY};

    const SIG_PING: SignalId = 1;
    const SIG_PONG: SignalId = 2;

    struct Echo {
        name: &'static str,
        priority: Priority,
        replies_to: Option<&'static str>,
        seen: std::cell::RefCell<Vec<SignalId>>,
    }

    impl ActiveObject for Echo {
        fn name(&self) -> &'static str {
            self.name
        }
        fn priority(&self) -> Priority {
            self.priority
        }
        fn handle(&self, event: &Event) -> Vec<Effect> {
            self.seen.borrow_mut().push(event.signal);
            match self.replies_to {
                Some(target) => vec![Effect::Post {
                    target,
                    signal: SIG_PONG,
                    payload: Payload::Empty,
                }],
                None => vec![],
            }
        }
    }

    fn fresh_pools() -> EventPools<Event> {
        EventPools::new(
            DEFAULT_SMALL_POOL_CAPACITY,
            DEFAULT_MEDIUM_POOL_CAPACITY,
            DEFAULT_LARGE_POOL_CAPACITY,
        )
    }

    #[test]
    fn higher_priority_object_runs_first() {
        let mut d = Dispatcher::new(fresh_pools());
        d.register(Box::leak(Box::new(Echo {
            name: "low",
            priority: Priority::new(2),
            replies_to: None,
            seen: Default::default(),
        })));
        d.register(Box::leak(Box::new(Echo {
            name: "high",
            priority: Priority::new(1),
            replies_to: None,
            seen: Default::default(),
        })));
        d.post("low", SIG_PING, Payload::Empty);
        d.post("high", SIG_PING, Payload::Empty);
        assert_eq!(d.run_ready(), Some("high"));
        assert_eq!(d.run_ready(), Some("low"));
        assert_eq!(d.run_ready(), None);
    }

    #[test]
    fn post_effect_chains_to_another_object() {
        let mut d = Dispatcher::new(fresh_pools());
        d.register(Box::leak(Box::new(Echo {
            name: "pinger",
            priority: Priority::new(1),
            replies_to: Some("ponger"),
            seen: Default::default(),
        })));
        d.register(Box::leak(Box::new(Echo {
            name: "ponger",
            priority: Priority::new(2),
            replies_to: None,
            seen: Default::default(),
        })));
        d.post("pinger", SIG_PING, Payload::Empty);
        d.run_to_quiescence();
        assert!(!d.has_ready_work());
    }

    #[test]
    fn publish_reaches_every_subscriber() {
        let mut d = Dispatcher::new(fresh_pools());
        d.register(Box::leak(Box::new(Echo {
            name: "a",
            priority: Priority::new(1),
            replies_to: None,
            seen: Default::default(),
        })));
        d.register(Box::leak(Box::new(Echo {
            name: "b",
            priority: Priority::new(2),
            replies_to: None,
            seen: Default::default(),
        })));
        d.subscribe("a", SIG_PONG);
        d.subscribe("b", SIG_PONG);
        d.publish(SIG_PONG, Payload::Empty);
        d.run_to_quiescence();
        assert!(!d.has_ready_work());
    }

    #[test]
    #[should_panic(expected = "mailbox overflow")]
    fn mailbox_overflow_is_a_fatal_assertion() {
        let mut d = Dispatcher::new(fresh_pools());
        d.register(Box::leak(Box::new(Echo {
            name: "sink",
            priority: Priority::new(1),
            replies_to: None,
            seen: Default::default(),
        })));
        for _ in 0..(MAILBOX_CAPACITY + 1) {
            d.post("sink", SIG_PING, Payload::Empty);
        }
    }

    const SIG_WORK: SignalId = 3;
    const SIG_KICK: SignalId = 4;

    /// Defers the first `SIG_WORK` event it sees; a `SIG_KICK` then
    /// recalls it, and its second pass through `handle` completes
    /// normally. Exercises exactly one defer/recall/release cycle per
    /// round trip.
    struct DeferRecall {
        has_deferred: std::cell::Cell<bool>,
    }

    impl ActiveObject for DeferRecall {
        fn name(&self) -> &'static str {
            "cycler"
        }
        fn priority(&self) -> Priority {
            Priority::new(1)
        }
        fn handle(&self, event: &Event) -> Vec<Effect> {
            match event.signal {
                SIG_WORK if !self.has_deferred.get() => {
                    self.has_deferred.set(true);
                    vec![Effect::Defer]
                }
                SIG_WORK => {
                    self.has_deferred.set(false);
                    vec![]
                }
                SIG_KICK if self.has_deferred.get() => vec![Effect::RecallOne],
                _ => vec![],
            }
        }
    }

    #[test]
    fn defer_then_recall_releases_exactly_one_reference() {
        let mut d = Dispatcher::new(fresh_pools());
        d.register(Box::leak(Box::new(DeferRecall { has_deferred: std::cell::Cell::new(false) })));

        // More round trips than the small pool has slots: a leaked
        // reference on defer would exhaust the pool well before this
        // loop finishes.
        for _ in 0..(DEFAULT_SMALL_POOL_CAPACITY as u32 + 4) {
            d.post("cycler", SIG_WORK, Payload::Empty);
            d.run_ready();
            d.post("cycler", SIG_KICK, Payload::Empty);
            d.run_ready();
            d.run_ready();
        }
        assert!(!d.has_ready_work());
    }

    #[test]
    fn timer_tick_posts_to_owner() {
        let mut d = Dispatcher::new(fresh_pools());
        d.register(Box::leak(Box::new(Echo {
            name: "timed",
            priority: Priority::new(1),
            replies_to: None,
            seen: Default::default(),
        })));
        let index = d.by_name["timed"];
        d.objects[index].timer.arm(2, false, SIG_PING);
        d.tick();
        assert!(!d.has_ready_work());
        d.tick();
        assert!(d.has_ready_work());
    }
}
