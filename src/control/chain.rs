//! Chains: ordered rule collections, built-in or user-defined

use crate::control::record::{ChainId, RuleRecord, Verdict};
use crate::{Error, Result};

/// Built-in hook points, in canonical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinHook {
    PreRouting,
    LocalIn,
    Forward,
    LocalOut,
    PostRouting,
    Brouting,
}

impl BuiltinHook {
    pub const ALL: [BuiltinHook; 6] = [
        BuiltinHook::PreRouting,
        BuiltinHook::LocalIn,
        BuiltinHook::Forward,
        BuiltinHook::LocalOut,
        BuiltinHook::PostRouting,
        BuiltinHook::Brouting,
    ];

    pub fn index(self) -> usize {
        match self {
            BuiltinHook::PreRouting => 0,
            BuiltinHook::LocalIn => 1,
            BuiltinHook::Forward => 2,
            BuiltinHook::LocalOut => 3,
            BuiltinHook::PostRouting => 4,
            BuiltinHook::Brouting => 5,
        }
    }

    pub fn bit(self) -> u32 {
        1 << self.index()
    }

    pub fn name(self) -> &'static str {
        match self {
            BuiltinHook::PreRouting => "PREROUTING",
            BuiltinHook::LocalIn => "INPUT",
            BuiltinHook::Forward => "FORWARD",
            BuiltinHook::LocalOut => "OUTPUT",
            BuiltinHook::PostRouting => "POSTROUTING",
            BuiltinHook::Brouting => "BROUTING",
        }
    }
}

/// An ordered rule collection with a name, an optional built-in hook, and
/// (for built-in chains) a default policy.
#[derive(Debug, Clone)]
pub struct ChainTable {
    name: String,
    id: ChainId,
    hook: Option<BuiltinHook>,
    policy: Verdict,
    rules: Vec<RuleRecord>,
}

impl ChainTable {
    pub(crate) fn new(name: String, id: ChainId, hook: Option<BuiltinHook>) -> Self {
        Self {
            name,
            id,
            hook,
            policy: Verdict::Accept,
            rules: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> ChainId {
        self.id
    }

    pub fn hook(&self) -> Option<BuiltinHook> {
        self.hook
    }

    pub fn is_builtin(&self) -> bool {
        self.hook.is_some()
    }

    /// Default policy. Only meaningful for built-in chains; user chains
    /// fall through to `Return`.
    pub fn policy(&self) -> Verdict {
        self.policy
    }

    pub fn rules(&self) -> &[RuleRecord] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub(crate) fn set_name(&mut self, name: String) {
        self.name = name;
    }

    pub(crate) fn set_policy(&mut self, policy: Verdict) {
        self.policy = policy;
    }

    pub(crate) fn insert(&mut self, index: usize, rule: RuleRecord) -> Result<()> {
        if index > self.rules.len() {
            return Err(self.out_of_range(index));
        }
        self.rules.insert(index, rule);
        Ok(())
    }

    pub(crate) fn replace(&mut self, index: usize, rule: RuleRecord) -> Result<()> {
        if index >= self.rules.len() {
            return Err(self.out_of_range(index));
        }
        // Old rule's counter is discarded, not carried over.
        self.rules[index] = rule;
        Ok(())
    }

    pub(crate) fn push(&mut self, rule: RuleRecord) {
        self.rules.push(rule);
    }

    pub(crate) fn remove(&mut self, index: usize) -> Result<RuleRecord> {
        if index >= self.rules.len() {
            return Err(self.out_of_range(index));
        }
        Ok(self.rules.remove(index))
    }

    pub(crate) fn rule(&self, index: usize) -> Result<&RuleRecord> {
        self.rules.get(index).ok_or_else(|| self.out_of_range(index))
    }

    pub(crate) fn rule_mut(&mut self, index: usize) -> Result<&mut RuleRecord> {
        let len = self.rules.len();
        match self.rules.get_mut(index) {
            Some(rule) => Ok(rule),
            None => Err(Error::IndexOutOfRange {
                chain: self.name.clone(),
                index,
                len,
            }),
        }
    }

    pub(crate) fn clear(&mut self) {
        self.rules.clear();
    }

    pub(crate) fn rules_mut(&mut self) -> &mut [RuleRecord] {
        &mut self.rules
    }

    fn out_of_range(&self, index: usize) -> Error {
        Error::IndexOutOfRange {
            chain: self.name.clone(),
            index,
            len: self.rules.len(),
        }
    }
}
