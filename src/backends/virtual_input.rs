//! In-memory injector.
//!
//! [`VirtualInjector`] injects nothing; it appends every call, stamped with the monotonic
//! instant it was made, to a shared [`VirtualLog`]. Used for `--dry-run` replays and as
//! the observation point in timing tests.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::device::Injector;
use crate::error::InjectError;
use crate::keycode::DeviceCode;

/// One recorded injection call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Op {
    Press(DeviceCode),
    Release(DeviceCode),
    Move { x: i32, y: i32 },
}

#[derive(Clone, Copy, Debug)]
pub struct InjectedCall {
    pub at: Instant,
    pub op: Op,
}

/// Shared, cloneable view of everything a [`VirtualInjector`] was asked to do.
#[derive(Clone, Default)]
pub struct VirtualLog(Arc<Mutex<Vec<InjectedCall>>>);

impl VirtualLog {
    pub fn calls(&self) -> Vec<InjectedCall> {
        self.0.lock().clone()
    }

    pub fn ops(&self) -> Vec<Op> {
        self.0.lock().iter().map(|c| c.op).collect()
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }

    pub fn clear(&self) {
        self.0.lock().clear();
    }

    /// Presses minus releases per code. A balanced replay leaves every entry at zero.
    pub fn net_presses(&self) -> BTreeMap<DeviceCode, i64> {
        let mut net = BTreeMap::new();
        for call in self.0.lock().iter() {
            match call.op {
                Op::Press(code) => *net.entry(code).or_insert(0) += 1,
                Op::Release(code) => *net.entry(code).or_insert(0) -= 1,
                Op::Move { .. } => {}
            }
        }
        net
    }

    fn push(&self, op: Op) {
        self.0.lock().push(InjectedCall {
            at: Instant::now(),
            op,
        });
    }
}

/// Injector that records instead of injecting.
pub struct VirtualInjector {
    name: String,
    log: VirtualLog,
    failing: BTreeSet<DeviceCode>,
    stalls: BTreeMap<DeviceCode, Duration>,
}

impl VirtualInjector {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            log: VirtualLog::default(),
            failing: BTreeSet::new(),
            stalls: BTreeMap::new(),
        }
    }

    /// Make every press/release of `code` fail (without recording it).
    pub fn fail_on(mut self, code: DeviceCode) -> Self {
        self.failing.insert(code);
        self
    }

    /// Make every press of `code` block for `stall` before it is recorded, the way a
    /// hung OS call would.
    pub fn stall_on(mut self, code: DeviceCode, stall: Duration) -> Self {
        self.stalls.insert(code, stall);
        self
    }

    pub fn log(&self) -> VirtualLog {
        self.log.clone()
    }

    fn check(&self, code: DeviceCode) -> Result<(), InjectError> {
        if self.failing.contains(&code) {
            return Err(InjectError::Call(format!("{code} rejected by {}", self.name)));
        }
        Ok(())
    }
}

impl Injector for VirtualInjector {
    fn press(&mut self, code: DeviceCode) -> Result<(), InjectError> {
        if let Some(stall) = self.stalls.get(&code) {
            thread::sleep(*stall);
        }
        self.check(code)?;
        self.log.push(Op::Press(code));
        Ok(())
    }

    fn release(&mut self, code: DeviceCode) -> Result<(), InjectError> {
        self.check(code)?;
        self.log.push(Op::Release(code));
        Ok(())
    }

    fn move_cursor(&mut self, x: i32, y: i32) -> Result<(), InjectError> {
        self.log.push(Op::Move { x, y });
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keycode::{Button, Key};

    #[test]
    fn records_calls_in_order() {
        let mut inj = VirtualInjector::new("virtual:test");
        let log = inj.log();
        inj.press(DeviceCode::Key(Key::Shift)).unwrap();
        inj.move_cursor(3, 4).unwrap();
        inj.release(DeviceCode::Key(Key::Shift)).unwrap();

        assert_eq!(
            log.ops(),
            vec![
                Op::Press(DeviceCode::Key(Key::Shift)),
                Op::Move { x: 3, y: 4 },
                Op::Release(DeviceCode::Key(Key::Shift)),
            ]
        );
        assert!(log.net_presses().values().all(|n| *n == 0));
    }

    #[test]
    fn failing_code_is_not_recorded() {
        let left = DeviceCode::Button(Button::Left);
        let mut inj = VirtualInjector::new("virtual:test").fail_on(left);
        let log = inj.log();
        assert!(matches!(inj.press(left), Err(InjectError::Call(_))));
        assert!(log.is_empty());
    }
}
