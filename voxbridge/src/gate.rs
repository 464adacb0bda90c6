//! One-shot readiness barrier between session events and the audio units.
//!
//! Audio may only flow once the remote join has completed and the session has
//! mapped its microphone to our virtual device. Either precondition failing
//! releases the gate early with a sticky failure flag, so waiting units exit
//! instead of hanging.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadinessFlags {
    pub inputs_configured: bool,
    pub joined: bool,
    pub failed: bool,
}

impl ReadinessFlags {
    fn should_release(&self) -> bool {
        self.failed || (self.inputs_configured && self.joined)
    }
}

#[derive(Default)]
struct GateState {
    flags: ReadinessFlags,
    released: bool,
}

#[derive(Default)]
pub struct ReadinessGate {
    state: Mutex<GateState>,
    released: Condvar,
}

impl ReadinessGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signal_inputs_configured(&self) {
        self.update(|flags| flags.inputs_configured = true);
    }

    pub fn signal_joined(&self) {
        self.update(|flags| flags.joined = true);
    }

    /// Mark the session as failed. The flag is never cleared.
    pub fn signal_failed(&self) {
        self.update(|flags| flags.failed = true);
    }

    /// Block until the gate releases. Returns `false` if the session failed.
    pub fn wait(&self) -> bool {
        let mut state = self.state.lock();
        while !state.released {
            self.released.wait(&mut state);
        }
        !state.flags.failed
    }

    /// Like [`wait`](Self::wait) but gives up after `timeout`, returning `false`.
    /// Expiry does not touch the flags.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while !state.released {
            if self.released.wait_until(&mut state, deadline).timed_out() {
                return state.released && !state.flags.failed;
            }
        }
        !state.flags.failed
    }

    /// Wait with an optional join deadline. On expiry the gate is failed so
    /// every other waiter is released as well.
    pub fn wait_or_fail(&self, timeout: Option<Duration>) -> bool {
        let Some(timeout) = timeout else {
            return self.wait();
        };
        if self.wait_timeout(timeout) {
            return true;
        }
        if self.poll().is_none() {
            tracing::warn!(?timeout, "Session not ready in time, failing readiness gate");
            self.signal_failed();
        }
        self.wait()
    }

    /// Non-blocking check for callback-driven units.
    /// `None` until released, then whether audio should flow.
    pub fn poll(&self) -> Option<bool> {
        let state = self.state.lock();
        state.released.then_some(!state.flags.failed)
    }

    pub fn flags(&self) -> ReadinessFlags {
        self.state.lock().flags
    }

    fn update(&self, f: impl FnOnce(&mut ReadinessFlags)) {
        let mut state = self.state.lock();
        f(&mut state.flags);
        if !state.released && state.flags.should_release() {
            state.released = true;
            tracing::debug!(flags = ?state.flags, "Readiness gate released");
            self.released.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[derive(Debug, Clone, Copy)]
    enum Signal {
        Inputs,
        Joined,
        Failed,
    }

    fn apply(gate: &ReadinessGate, signal: Signal) {
        match signal {
            Signal::Inputs => gate.signal_inputs_configured(),
            Signal::Joined => gate.signal_joined(),
            Signal::Failed => gate.signal_failed(),
        }
    }

    fn sequences(len: usize) -> Vec<Vec<Signal>> {
        let signals = [Signal::Inputs, Signal::Joined, Signal::Failed];
        let mut out = vec![Vec::new()];
        for _ in 0..len {
            out = out
                .into_iter()
                .flat_map(|prefix| {
                    signals.iter().map(move |s| {
                        let mut next = prefix.clone();
                        next.push(*s);
                        next
                    })
                })
                .collect();
        }
        out
    }

    #[test]
    fn release_matches_predicate_for_all_sequences() {
        for len in 0..=4 {
            for sequence in sequences(len) {
                let gate = ReadinessGate::new();
                let mut inputs = false;
                let mut joined = false;
                let mut failed = false;
                let mut released = false;
                for signal in &sequence {
                    apply(&gate, *signal);
                    match signal {
                        Signal::Inputs => inputs = true,
                        Signal::Joined => joined = true,
                        Signal::Failed => failed = true,
                    }
                    released |= failed || (inputs && joined);
                    let expected = released.then_some(!failed);
                    assert_eq!(gate.poll(), expected, "sequence {sequence:?}");
                }
            }
        }
    }

    #[test]
    fn wait_returns_true_after_both_preconditions() {
        let gate = Arc::new(ReadinessGate::new());
        let waiter = {
            let gate = gate.clone();
            thread::spawn(move || gate.wait())
        };
        gate.signal_joined();
        assert_eq!(gate.poll(), None);
        gate.signal_inputs_configured();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn failure_releases_every_waiter_with_false() {
        let gate = Arc::new(ReadinessGate::new());
        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let gate = gate.clone();
                thread::spawn(move || gate.wait())
            })
            .collect();
        gate.signal_failed();
        for waiter in waiters {
            assert!(!waiter.join().unwrap());
        }
    }

    #[test]
    fn failure_is_sticky() {
        let gate = ReadinessGate::new();
        gate.signal_failed();
        gate.signal_joined();
        gate.signal_inputs_configured();
        assert_eq!(gate.poll(), Some(false));
        assert!(gate.flags().failed);
    }

    #[test]
    fn released_gate_never_blocks_again() {
        let gate = ReadinessGate::new();
        gate.signal_joined();
        gate.signal_inputs_configured();
        assert!(gate.wait());
        assert!(gate.wait_timeout(Duration::from_millis(1)));
    }

    #[test]
    fn wait_timeout_expires_without_failing() {
        let gate = ReadinessGate::new();
        assert!(!gate.wait_timeout(Duration::from_millis(20)));
        assert_eq!(gate.poll(), None);
        assert!(!gate.flags().failed);
    }

    #[test]
    fn wait_or_fail_fails_gate_on_expiry() {
        let gate = Arc::new(ReadinessGate::new());
        let other = {
            let gate = gate.clone();
            thread::spawn(move || gate.wait())
        };
        assert!(!gate.wait_or_fail(Some(Duration::from_millis(20))));
        assert!(!other.join().unwrap());
        assert_eq!(gate.poll(), Some(false));
    }

    #[test]
    fn wait_or_fail_without_timeout_waits() {
        let gate = Arc::new(ReadinessGate::new());
        let waiter = {
            let gate = gate.clone();
            thread::spawn(move || gate.wait_or_fail(None))
        };
        gate.signal_inputs_configured();
        gate.signal_joined();
        assert!(waiter.join().unwrap());
    }
}
