//! Rule records: the atomic unit of a chain
//!
//! A rule carries an opaque set of match payloads, exactly one target
//! (a fixed verdict or a jump to another chain), and a traffic counter.
//! The counter's dirty flag decides whether commit preserves the kernel's
//! accumulated value or overwrites it with the caller's.

use std::fmt;

/// Per-rule traffic counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Counter {
    pub packets: u64,
    pub bytes: u64,
}

impl Counter {
    pub const ZERO: Counter = Counter {
        packets: 0,
        bytes: 0,
    };

    pub fn new(packets: u64, bytes: u64) -> Self {
        Self { packets, bytes }
    }
}

/// Terminal verdicts, with their signed wire encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Drop,
    Continue,
    Return,
}

impl Verdict {
    /// Signed code used on the wire. Non-negative values are chain-start
    /// byte offsets, not verdicts.
    pub fn code(self) -> i32 {
        match self {
            Verdict::Accept => -1,
            Verdict::Drop => -2,
            Verdict::Continue => -3,
            Verdict::Return => -4,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            -1 => Some(Verdict::Accept),
            -2 => Some(Verdict::Drop),
            -3 => Some(Verdict::Continue),
            -4 => Some(Verdict::Return),
            _ => None,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Verdict::Accept => "ACCEPT",
            Verdict::Drop => "DROP",
            Verdict::Continue => "CONTINUE",
            Verdict::Return => "RETURN",
        };
        write!(f, "{}", s)
    }
}

/// Symbolic chain identity, assigned monotonically per session.
///
/// Independent of storage offsets: a jump target keeps its identity
/// across rule insertions and chain reordering until compile time, when
/// identities are resolved back to byte offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChainId(pub u32);

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Opaque plugin payload (match or extension target), carried through
/// load and compile untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchPayload {
    pub name: String,
    pub payload: Vec<u8>,
}

impl MatchPayload {
    pub fn new(name: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }
}

/// Rule target: exactly one per record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Verdict(Verdict),
    Jump(ChainId),
    /// Non-standard target owned by a plugin; payload is opaque here.
    Extension(MatchPayload),
}

/// A single rule within a chain.
#[derive(Debug, Clone)]
pub struct RuleRecord {
    pub matches: Vec<MatchPayload>,
    pub target: Target,
    counter: Counter,
    counter_dirty: bool,
    origin: Option<usize>,
}

impl RuleRecord {
    pub fn new(target: Target) -> Self {
        Self {
            matches: Vec::new(),
            target,
            counter: Counter::ZERO,
            counter_dirty: false,
            origin: None,
        }
    }

    pub fn with_match(mut self, m: MatchPayload) -> Self {
        self.matches.push(m);
        self
    }

    pub fn counter(&self) -> Counter {
        self.counter
    }

    /// Overwrite the counter. Marks it dirty so commit submits this value
    /// instead of the load-time kernel snapshot.
    pub fn set_counter(&mut self, counter: Counter) {
        self.counter = counter;
        self.counter_dirty = true;
    }

    /// Explicit dirty set-to-zero, never an omission.
    pub fn zero_counter(&mut self) {
        self.set_counter(Counter::ZERO);
    }

    pub fn counter_dirty(&self) -> bool {
        self.counter_dirty
    }

    /// Load-time position of this rule, if it came from the transport.
    /// `None` for rules added since load.
    pub fn origin(&self) -> Option<usize> {
        self.origin
    }

    pub(crate) fn set_loaded(&mut self, origin: usize, counter: Counter) {
        self.origin = Some(origin);
        self.counter = counter;
        self.counter_dirty = false;
    }

    pub(crate) fn mark_committed(&mut self, origin: usize, counter: Counter) {
        self.origin = Some(origin);
        self.counter = counter;
        self.counter_dirty = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict_codes() {
        for v in [
            Verdict::Accept,
            Verdict::Drop,
            Verdict::Continue,
            Verdict::Return,
        ] {
            assert!(v.code() < 0);
            assert_eq!(Verdict::from_code(v.code()), Some(v));
        }
        assert_eq!(Verdict::from_code(0), None);
        assert_eq!(Verdict::from_code(-5), None);
        assert_eq!(Verdict::from_code(64), None);
    }

    #[test]
    fn test_rule_counter_dirty_tracking() {
        let mut rule = RuleRecord::new(Target::Verdict(Verdict::Accept));
        assert!(!rule.counter_dirty());
        assert_eq!(rule.counter(), Counter::ZERO);

        rule.set_counter(Counter::new(5, 400));
        assert!(rule.counter_dirty());
        assert_eq!(rule.counter(), Counter::new(5, 400));
    }

    #[test]
    fn test_rule_zero_is_explicit_dirty() {
        let mut rule = RuleRecord::new(Target::Verdict(Verdict::Drop));
        rule.set_loaded(3, Counter::new(10, 1000));
        assert!(!rule.counter_dirty());
        assert_eq!(rule.origin(), Some(3));

        rule.zero_counter();
        assert!(rule.counter_dirty());
        assert_eq!(rule.counter(), Counter::ZERO);
        assert_eq!(rule.origin(), Some(3));
    }

    #[test]
    fn test_rule_with_matches() {
        let rule = RuleRecord::new(Target::Verdict(Verdict::Accept))
            .with_match(MatchPayload::new("mac", vec![1, 2, 3]))
            .with_match(MatchPayload::new("ip", vec![4]));
        assert_eq!(rule.matches.len(), 2);
        assert_eq!(rule.matches[0].name, "mac");
    }
}
