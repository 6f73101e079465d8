//! The in-memory rule table: named chains, mutation contract, dirty tracking
//!
//! Single-writer by design: one caller holds one model per load/modify/commit
//! cycle. No internal locking; concurrent mutation is the caller's problem to
//! serialize. Iteration cursors obtained from accessors must not outlive a
//! subsequent mutation.

use crate::control::chain::{BuiltinHook, ChainTable};
use crate::control::layout;
use crate::control::record::{ChainId, Counter, RuleRecord, Verdict};
use crate::{Error, Result};
use tracing::debug;

/// A full rule table ("filter", "nat", "broute"): built-in chains first in
/// canonical hook order, then user chains in creation order.
#[derive(Debug)]
pub struct RuleTableModel {
    name: String,
    chains: Vec<ChainTable>,
    next_chain_id: u32,
    structure_changed: bool,
    counters_changed: bool,
}

impl RuleTableModel {
    /// Empty table with no chains.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            chains: Vec::new(),
            next_chain_id: 0,
            structure_changed: false,
            counters_changed: false,
        }
    }

    /// Table with the given built-in chains, created in canonical hook
    /// order regardless of argument order. Policies default to `Accept`.
    pub fn with_builtins(name: impl Into<String>, hooks: &[BuiltinHook]) -> Self {
        let mut model = Self::new(name);
        for hook in BuiltinHook::ALL {
            if hooks.contains(&hook) {
                let id = model.alloc_id();
                model
                    .chains
                    .push(ChainTable::new(hook.name().to_string(), id, Some(hook)));
            }
        }
        model
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bitmask of the hooks this table attaches to.
    pub fn valid_hooks(&self) -> u32 {
        self.chains
            .iter()
            .filter_map(|c| c.hook())
            .fold(0, |mask, hook| mask | hook.bit())
    }

    // ---- chain operations ----

    pub fn create_chain(&mut self, name: &str) -> Result<ChainId> {
        layout::check_name(name)?;
        if self.chain(name).is_some() {
            return Err(Error::AlreadyExists { name: name.into() });
        }
        let id = self.alloc_id();
        self.chains.push(ChainTable::new(name.to_string(), id, None));
        self.structure_changed = true;
        debug!(table = %self.name, chain = name, "created chain");
        Ok(id)
    }

    /// Delete a user chain. Rules in other chains that still jump to it are
    /// not scanned for here; a dangling jump surfaces at compile time.
    pub fn delete_chain(&mut self, name: &str) -> Result<()> {
        let pos = self.chain_pos(name)?;
        if self.chains[pos].is_builtin() {
            return Err(Error::BuiltinProtected { name: name.into() });
        }
        self.chains.remove(pos);
        self.structure_changed = true;
        debug!(table = %self.name, chain = name, "deleted chain");
        Ok(())
    }

    pub fn rename_chain(&mut self, old: &str, new: &str) -> Result<()> {
        layout::check_name(new)?;
        if self.chain(new).is_some() {
            return Err(Error::AlreadyExists { name: new.into() });
        }
        let pos = self.chain_pos(old)?;
        if self.chains[pos].is_builtin() {
            return Err(Error::BuiltinProtected { name: old.into() });
        }
        self.chains[pos].set_name(new.to_string());
        self.structure_changed = true;
        Ok(())
    }

    /// Remove all rules from one chain.
    pub fn flush_chain(&mut self, name: &str) -> Result<()> {
        let pos = self.chain_pos(name)?;
        self.chains[pos].clear();
        self.structure_changed = true;
        Ok(())
    }

    /// Remove all rules from every chain.
    pub fn flush_all(&mut self) {
        for chain in &mut self.chains {
            chain.clear();
        }
        self.structure_changed = true;
    }

    pub fn set_policy(&mut self, name: &str, policy: Verdict) -> Result<()> {
        if !matches!(policy, Verdict::Accept | Verdict::Drop) {
            return Err(Error::InvalidVerdict {
                verdict: policy.to_string(),
            });
        }
        let pos = self.chain_pos(name)?;
        if !self.chains[pos].is_builtin() {
            return Err(Error::NotBuiltin { name: name.into() });
        }
        if self.chains[pos].policy() == policy {
            // Unchanged value: not a mutation.
            return Ok(());
        }
        self.chains[pos].set_policy(policy);
        self.structure_changed = true;
        Ok(())
    }

    pub fn policy(&self, name: &str) -> Result<Verdict> {
        let pos = self.chain_pos(name)?;
        if !self.chains[pos].is_builtin() {
            return Err(Error::NotBuiltin { name: name.into() });
        }
        Ok(self.chains[pos].policy())
    }

    // ---- rule operations ----

    pub fn insert_rule(&mut self, chain: &str, rule: RuleRecord, index: usize) -> Result<()> {
        let pos = self.chain_pos(chain)?;
        self.chains[pos].insert(index, rule)?;
        self.structure_changed = true;
        Ok(())
    }

    /// Replace the rule at `index`. The old rule's counter is discarded.
    pub fn replace_rule(&mut self, chain: &str, rule: RuleRecord, index: usize) -> Result<()> {
        let pos = self.chain_pos(chain)?;
        self.chains[pos].replace(index, rule)?;
        self.structure_changed = true;
        Ok(())
    }

    pub fn append_rule(&mut self, chain: &str, rule: RuleRecord) -> Result<()> {
        let pos = self.chain_pos(chain)?;
        self.chains[pos].push(rule);
        self.structure_changed = true;
        Ok(())
    }

    pub fn delete_rule(&mut self, chain: &str, index: usize) -> Result<()> {
        let pos = self.chain_pos(chain)?;
        self.chains[pos].remove(index)?;
        self.structure_changed = true;
        Ok(())
    }

    // ---- counter operations ----

    pub fn read_counter(&self, chain: &str, index: usize) -> Result<Counter> {
        let pos = self.chain_pos(chain)?;
        Ok(self.chains[pos].rule(index)?.counter())
    }

    pub fn set_counter(&mut self, chain: &str, index: usize, counter: Counter) -> Result<()> {
        let pos = self.chain_pos(chain)?;
        self.chains[pos].rule_mut(index)?.set_counter(counter);
        self.counters_changed = true;
        Ok(())
    }

    pub fn zero_counter(&mut self, chain: &str, index: usize) -> Result<()> {
        self.set_counter(chain, index, Counter::ZERO)
    }

    /// Explicit dirty set-to-zero across every rule.
    pub fn zero_all_counters(&mut self) {
        for chain in &mut self.chains {
            for rule in chain.rules_mut() {
                rule.zero_counter();
            }
        }
        self.counters_changed = true;
    }

    // ---- accessors ----

    pub fn chain(&self, name: &str) -> Option<&ChainTable> {
        self.chains.iter().find(|c| c.name() == name)
    }

    pub fn chain_by_id(&self, id: ChainId) -> Option<&ChainTable> {
        self.chains.iter().find(|c| c.id() == id)
    }

    pub fn chain_id(&self, name: &str) -> Option<ChainId> {
        self.chain(name).map(|c| c.id())
    }

    pub fn chains(&self) -> impl Iterator<Item = &ChainTable> {
        self.chains.iter()
    }

    pub fn chain_names(&self) -> impl Iterator<Item = &str> {
        self.chains.iter().map(|c| c.name())
    }

    pub fn is_builtin(&self, name: &str) -> Result<bool> {
        Ok(self.chains[self.chain_pos(name)?].is_builtin())
    }

    pub fn chain_len(&self, name: &str) -> Result<usize> {
        Ok(self.chains[self.chain_pos(name)?].len())
    }

    /// Total rules across all chains.
    pub fn rule_count(&self) -> usize {
        self.chains.iter().map(|c| c.len()).sum()
    }

    /// Rules in serialization order: chain declaration order, rules in
    /// chain order. This is the order the counter array follows.
    pub fn rules_in_commit_order(&self) -> impl Iterator<Item = &RuleRecord> {
        self.chains.iter().flat_map(|c| c.rules().iter())
    }

    pub(crate) fn rules_in_commit_order_mut(&mut self) -> impl Iterator<Item = &mut RuleRecord> {
        self.chains.iter_mut().flat_map(|c| c.rules_mut().iter_mut())
    }

    // ---- dirty tracking ----

    pub fn dirty(&self) -> bool {
        self.structure_changed || self.counters_changed
    }

    pub fn structure_changed(&self) -> bool {
        self.structure_changed
    }

    pub fn counters_changed(&self) -> bool {
        self.counters_changed
    }

    pub(crate) fn clear_dirty(&mut self) {
        self.structure_changed = false;
        self.counters_changed = false;
    }

    pub(crate) fn push_loaded_chain(&mut self, chain: ChainTable) {
        self.chains.push(chain);
    }

    pub(crate) fn alloc_id(&mut self) -> ChainId {
        let id = ChainId(self.next_chain_id);
        self.next_chain_id += 1;
        id
    }

    fn chain_pos(&self, name: &str) -> Result<usize> {
        self.chains
            .iter()
            .position(|c| c.name() == name)
            .ok_or_else(|| Error::ChainNotFound { name: name.into() })
    }
}
