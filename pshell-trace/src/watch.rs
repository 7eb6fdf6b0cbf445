//! Watchpoints and condition callbacks (spec.md §3, §4.7). At most one of
//! each is active; both read through a caller-supplied accessor rather
//! than a raw pointer + width, since a `*mut u8` with a byte width has no
//! safe Rust equivalent - the accessor closure is the idiomatic stand-in.

use std::sync::Arc;

/// What happens once a watchpoint/callback fires (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// Only the first transition is reported.
    Once,
    /// Every transition is reported.
    Continuous,
    /// Report the transition, then halt the process.
    Abort,
}

/// Reads the current value of a watched symbol. Boxed so the host can
/// close over whatever storage it is actually watching.
pub type ValueReader = Arc<dyn Fn() -> u64 + Send + Sync>;

/// Where a value was observed: file, line, function - the same triple a
/// trace site reports to `is_filter_passed`.
pub type Site = (String, u32, String);

/// A confirmed change, reported as two watch lines (spec.md §8 scenario 6):
/// where/what the value was, and where/what it became.
pub struct WatchTransition {
    pub previous_value: u64,
    pub previous_site: Site,
    pub current_value: u64,
    pub current_site: Site,
}

pub struct Watchpoint {
    pub symbol: String,
    pub read: ValueReader,
    pub width: u8,
    pub format_spec: String,
    pub control: Control,
    previous: Option<(u64, Site)>,
    hit: bool,
}

#[derive(Debug)]
pub struct InvalidWidth(pub u8);

impl Watchpoint {
    pub fn new(symbol: &str, read: ValueReader, width: u8, format_spec: &str, control: Control) -> Result<Watchpoint, InvalidWidth> {
        if !matches!(width, 1 | 2 | 4 | 8) {
            return Err(InvalidWidth(width));
        }
        Ok(Watchpoint {
            symbol: symbol.to_string(),
            read,
            width,
            format_spec: format_spec.to_string(),
            control,
            previous: None,
            hit: false,
        })
    }

    /// Returns `Some(transition)` the first time this call should emit a
    /// watch trace; `None` when the value is unchanged or the hit budget
    /// (`Once`) is exhausted. The very first poll only primes the baseline
    /// reading and site and never fires.
    pub fn poll(&mut self, file: &str, line: u32, function: &str) -> Option<WatchTransition> {
        let current = (self.read)();
        let current_site: Site = (file.to_string(), line, function.to_string());

        let (previous, previous_site) = match self.previous.take() {
            None => {
                self.previous = Some((current, current_site));
                return None;
            }
            Some(pair) => pair,
        };

        if previous == current {
            self.previous = Some((previous, previous_site));
            return None;
        }
        self.previous = Some((current, current_site.clone()));

        if self.hit && self.control == Control::Once {
            return None;
        }
        self.hit = true;
        Some(WatchTransition { previous_value: previous, previous_site, current_value: current, current_site })
    }

    pub fn should_abort(&self, fired: bool) -> bool {
        fired && self.control == Control::Abort
    }
}

pub type ConditionFn = Arc<dyn Fn() -> bool + Send + Sync>;

pub struct ConditionCallback {
    pub callback: ConditionFn,
    pub control: Control,
    last: Option<bool>,
    hit: bool,
    reentrant: std::sync::atomic::AtomicBool,
}

impl ConditionCallback {
    pub fn new(callback: ConditionFn, control: Control) -> ConditionCallback {
        ConditionCallback {
            callback,
            control,
            last: None,
            hit: false,
            reentrant: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Evaluate the callback, guarding against reentrant invocation from a
    /// trace site inside the callback itself (spec.md §4.7 step 7).
    /// Returns `true` when an edge fired and should be reported.
    pub fn poll(&mut self) -> bool {
        use std::sync::atomic::Ordering;
        if self.reentrant.swap(true, Ordering::SeqCst) {
            return false;
        }
        let current = (self.callback)();
        self.reentrant.store(false, Ordering::SeqCst);

        let previous = match self.last {
            None => {
                self.last = Some(current);
                return false;
            }
            Some(previous) => previous,
        };
        self.last = Some(current);

        if previous == current {
            return false;
        }
        if self.hit && self.control == Control::Once {
            return false;
        }
        self.hit = true;
        true
    }

    pub fn should_abort(&self, fired: bool) -> bool {
        fired && self.control == Control::Abort
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[test]
    fn continuous_reports_every_change() {
        let value = Arc::new(AtomicU64::new(0));
        let reader: ValueReader = {
            let value = value.clone();
            Arc::new(move || value.load(Ordering::SeqCst))
        };
        let mut watch = Watchpoint::new("x", reader, 4, "0x%08x", Control::Continuous).unwrap();

        assert!(watch.poll("a.rs", 1, "f").is_none());
        value.store(1, Ordering::SeqCst);
        let first = watch.poll("a.rs", 2, "f").unwrap();
        assert_eq!((first.previous_value, first.current_value), (0, 1));
        assert_eq!(first.previous_site, ("a.rs".to_string(), 1, "f".to_string()));
        assert_eq!(first.current_site, ("a.rs".to_string(), 2, "f".to_string()));

        value.store(2, Ordering::SeqCst);
        let second = watch.poll("b.rs", 3, "g").unwrap();
        assert_eq!((second.previous_value, second.current_value), (1, 2));
        assert_eq!(second.previous_site, ("a.rs".to_string(), 2, "f".to_string()));
        assert_eq!(second.current_site, ("b.rs".to_string(), 3, "g".to_string()));
    }

    #[test]
    fn once_reports_only_first_transition() {
        let value = Arc::new(AtomicU64::new(0));
        let reader: ValueReader = {
            let value = value.clone();
            Arc::new(move || value.load(Ordering::SeqCst))
        };
        let mut watch = Watchpoint::new("x", reader, 4, "0x%08x", Control::Once).unwrap();

        watch.poll("a.rs", 1, "f");
        value.store(1, Ordering::SeqCst);
        assert!(watch.poll("a.rs", 2, "f").is_some());
        value.store(2, Ordering::SeqCst);
        assert!(watch.poll("a.rs", 3, "f").is_none());
    }

    #[test]
    fn rejects_invalid_width() {
        let reader: ValueReader = Arc::new(|| 0);
        assert!(Watchpoint::new("x", reader, 3, "%d", Control::Once).is_err());
    }

    #[test]
    fn condition_callback_reports_edges() {
        let flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let callback: ConditionFn = {
            let flag = flag.clone();
            Arc::new(move || flag.load(Ordering::SeqCst))
        };
        let mut cb = ConditionCallback::new(callback, Control::Continuous);

        assert!(!cb.poll());
        flag.store(true, Ordering::SeqCst);
        assert!(cb.poll());
        assert!(!cb.poll());
    }
}
