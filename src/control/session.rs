//! Load/modify/commit sessions over a table transport
//!
//! One session owns one table for one cycle: open snapshots the peer's
//! state, the caller mutates the model, commit pushes the whole table
//! back. Commit is two-phase: replace the entries, then overwrite the
//! counter array. Either phase failing leaves the dirty flags set, so
//! retrying the identical commit is always legal.

use tracing::{debug, info};

use crate::control::compiler;
use crate::control::counters::CounterCache;
use crate::control::table::RuleTableModel;
use crate::control::transport::{TableTransport, TransportError};
use crate::{Error, Result};

pub struct TableSession<T: TableTransport> {
    transport: T,
    model: RuleTableModel,
    cache: CounterCache,
}

impl<T: TableTransport> TableSession<T> {
    /// Fetch and load the named table from the peer.
    pub fn open(mut transport: T, table: &str) -> Result<Self> {
        let info = transport
            .get_info(table)
            .map_err(|e| rejected("get_info", e))?;
        let blob = transport
            .get_entries(table, info.byte_size)
            .map_err(|e| rejected("get_entries", e))?;
        let loaded = compiler::load(table, &info, &blob)?;
        debug!(
            table,
            rules = info.entry_count,
            bytes = info.byte_size,
            "opened table session"
        );
        Ok(Self {
            transport,
            model: loaded.model,
            cache: loaded.counters,
        })
    }

    pub fn model(&self) -> &RuleTableModel {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut RuleTableModel {
        &mut self.model
    }

    pub fn counter_cache(&self) -> &CounterCache {
        &self.cache
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Push the session's state back to the peer. A clean model performs
    /// no transport calls. Entry replacement is skipped when only
    /// counters changed; the counter phase always runs on a dirty model,
    /// since a replace resets the peer's accumulated values.
    pub fn commit(&mut self) -> Result<()> {
        if !self.model.dirty() {
            debug!(table = self.model.name(), "commit skipped, model clean");
            return Ok(());
        }

        let compiled = compiler::compile(&self.model, &self.cache)?;
        let rules = compiled.info.entry_count;

        if self.model.structure_changed() {
            self.transport
                .set_entries(self.model.name(), &compiled.info, &compiled.blob)
                .map_err(|e| rejected("set_entries", e))?;
        }
        self.transport
            .set_counters(self.model.name(), &compiled.counters)
            .map_err(|e| Error::CountersNotApplied { reason: e.reason })?;

        // Rebase: the just-committed state becomes the new load point.
        for (index, (rule, counter)) in self
            .model
            .rules_in_commit_order_mut()
            .zip(&compiled.counters)
            .enumerate()
        {
            rule.mark_committed(index, *counter);
        }
        self.cache.reset(compiled.counters);
        self.model.clear_dirty();

        info!(table = self.model.name(), rules, "committed table");
        Ok(())
    }
}

fn rejected(operation: &str, e: TransportError) -> Error {
    Error::TransportRejected {
        operation: operation.into(),
        reason: e.reason,
    }
}
