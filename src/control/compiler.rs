//! Compile and load: between the chain model and the wire blob
//!
//! Compile serializes a [`RuleTableModel`] into the replacement blob,
//! resolving symbolic jump identities to chain-start byte offsets. A jump
//! whose target chain no longer exists fails here, before any transport
//! call. Load is the inverse: it rebuilds the model from a blob, assigns
//! fresh chain identities, and translates non-negative verdict codes back
//! to identities by offset membership in a chain's rule region.

use std::collections::HashMap;

use crate::control::chain::{BuiltinHook, ChainTable};
use crate::control::counters::CounterCache;
use crate::control::layout::{self, Reader, Writer};
use crate::control::record::{ChainId, Counter, MatchPayload, RuleRecord, Target, Verdict};
use crate::control::table::RuleTableModel;
use crate::control::transport::TableInfo;
use crate::{Error, Result};

/// Serialized table, ready for the two-phase commit.
#[derive(Debug)]
pub struct CompiledTable {
    pub blob: Vec<u8>,
    /// Counter array in serialized rule order, reconciled against the
    /// load-time cache: clean loaded rules keep their snapshot, dirty or
    /// new rules carry their own value.
    pub counters: Vec<Counter>,
    pub info: TableInfo,
}

/// Model rebuilt from a blob, with the counter snapshots taken at load.
#[derive(Debug)]
pub struct LoadedTable {
    pub model: RuleTableModel,
    pub counters: CounterCache,
}

pub fn compile(model: &RuleTableModel, cache: &CounterCache) -> Result<CompiledTable> {
    // First pass: chain header and start offsets.
    let mut starts: HashMap<ChainId, u32> = HashMap::new();
    let mut hook_offsets = [0u32; 6];
    let mut offset = 0usize;
    for chain in model.chains() {
        layout::check_name(chain.name())?;
        if let Some(hook) = chain.hook() {
            hook_offsets[hook.index()] = offset as u32;
        }
        offset += layout::CHAIN_HEADER_SIZE;
        starts.insert(chain.id(), offset as u32);
        for rule in chain.rules() {
            offset += rule_size(rule);
        }
    }
    let byte_size = offset;

    let counters = reconcile_counters(model, cache);

    // Second pass: serialize with jumps resolved.
    let mut w = Writer::new();
    let mut counter_base = 0u32;
    let mut rule_index = 0usize;
    for chain in model.chains() {
        w.write_name(chain.name());
        let policy_code = if chain.is_builtin() {
            chain.policy().code()
        } else {
            0
        };
        w.write_i32(policy_code);
        w.write_u32(chain.len() as u32);
        w.write_u32(counter_base);
        w.pad();
        counter_base += chain.len() as u32;

        for rule in chain.rules() {
            write_rule(&mut w, rule, &starts, counters[rule_index])?;
            rule_index += 1;
        }
    }

    let blob = w.into_bytes();
    debug_assert_eq!(blob.len(), byte_size);

    Ok(CompiledTable {
        blob,
        counters,
        info: TableInfo {
            valid_hooks: model.valid_hooks(),
            hook_offsets,
            entry_count: model.rule_count() as u32,
            byte_size: byte_size as u32,
        },
    })
}

/// One counter per rule, in serialized order.
fn reconcile_counters(model: &RuleTableModel, cache: &CounterCache) -> Vec<Counter> {
    model
        .rules_in_commit_order()
        .map(|rule| match rule.origin() {
            Some(origin) if !rule.counter_dirty() => {
                cache.get(origin).unwrap_or_else(|| rule.counter())
            }
            _ => rule.counter(),
        })
        .collect()
}

fn match_region_size(rule: &RuleRecord) -> usize {
    rule.matches
        .iter()
        .map(|m| layout::entry_size(m.payload.len()))
        .sum()
}

fn target_payload_len(rule: &RuleRecord) -> usize {
    match &rule.target {
        Target::Verdict(_) | Target::Jump(_) => 4,
        Target::Extension(mp) => mp.payload.len(),
    }
}

fn rule_size(rule: &RuleRecord) -> usize {
    layout::RULE_HEAD_SIZE
        + match_region_size(rule)
        + layout::entry_size(target_payload_len(rule))
}

fn write_rule(
    w: &mut Writer,
    rule: &RuleRecord,
    starts: &HashMap<ChainId, u32>,
    counter: Counter,
) -> Result<()> {
    let match_size = match_region_size(rule);
    // Watchers are not supported, so the watcher region is empty and the
    // target follows the matches directly.
    let watcher_offset = layout::RULE_HEAD_SIZE + match_size;
    let target_offset = watcher_offset;

    let standard_code;
    let (target_name, target_payload): (&str, &[u8]) = match &rule.target {
        Target::Verdict(v) => {
            standard_code = v.code().to_ne_bytes();
            (layout::STANDARD_TARGET, &standard_code)
        }
        Target::Jump(id) => {
            let start = starts
                .get(id)
                .ok_or(Error::DanglingJump { id: id.0 })?;
            standard_code = (*start as i32).to_ne_bytes();
            (layout::STANDARD_TARGET, &standard_code)
        }
        Target::Extension(mp) => (mp.name.as_str(), mp.payload.as_slice()),
    };
    let next_offset = target_offset + layout::entry_size(target_payload.len());

    w.write_u32(match_size as u32);
    w.write_u32(watcher_offset as u32);
    w.write_u32(target_offset as u32);
    w.write_u32(next_offset as u32);
    w.write_u64(counter.packets);
    w.write_u64(counter.bytes);

    for m in &rule.matches {
        write_entry(w, &m.name, &m.payload)?;
    }
    write_entry(w, target_name, target_payload)
}

fn write_entry(w: &mut Writer, name: &str, payload: &[u8]) -> Result<()> {
    layout::check_name(name)?;
    w.write_name(name);
    w.write_u32(payload.len() as u32);
    w.write_bytes(payload);
    w.pad();
    Ok(())
}

pub fn load(table_name: &str, info: &TableInfo, blob: &[u8]) -> Result<LoadedTable> {
    if blob.len() != info.byte_size as usize {
        return Err(Error::Parse(format!(
            "blob is {} bytes, table info says {}",
            blob.len(),
            info.byte_size
        )));
    }

    let raw_chains = parse_chains(blob)?;

    let total_rules: usize = raw_chains.iter().map(|c| c.rules.len()).sum();
    if total_rules != info.entry_count as usize {
        return Err(Error::Parse(format!(
            "blob holds {} rules, table info says {}",
            total_rules, info.entry_count
        )));
    }

    let hooks = assign_hooks(&raw_chains, info.valid_hooks)?;

    // Chain identities and rule regions, for jump resolution.
    let mut model = RuleTableModel::new(table_name);
    let mut regions: Vec<(u32, u32, ChainId)> = Vec::with_capacity(raw_chains.len());
    for raw in &raw_chains {
        let id = model.alloc_id();
        regions.push((raw.start, raw.end, id));
    }

    let mut snapshots = Vec::with_capacity(total_rules);
    let mut rule_index = 0usize;
    for (pos, raw) in raw_chains.into_iter().enumerate() {
        let (_, _, id) = regions[pos];
        let mut chain = ChainTable::new(raw.name, id, hooks[pos]);
        if let Some(hook) = hooks[pos] {
            let policy = Verdict::from_code(raw.policy_code).ok_or_else(|| {
                Error::Parse(format!(
                    "chain {} ({}) has invalid policy code {}",
                    chain.name(),
                    hook.name(),
                    raw.policy_code
                ))
            })?;
            chain.set_policy(policy);
        }
        for raw_rule in raw.rules {
            let target = match raw_rule.target {
                RawTarget::Verdict(v) => Target::Verdict(v),
                RawTarget::Offset(offset) => Target::Jump(resolve_jump(&regions, offset)?),
                RawTarget::Extension(mp) => Target::Extension(mp),
            };
            let mut rule = RuleRecord::new(target);
            rule.matches = raw_rule.matches;
            rule.set_loaded(rule_index, raw_rule.counter);
            snapshots.push(raw_rule.counter);
            chain.push(rule);
            rule_index += 1;
        }
        model.push_loaded_chain(chain);
    }

    Ok(LoadedTable {
        model,
        counters: CounterCache::from_snapshots(snapshots),
    })
}

struct RawChain {
    name: String,
    policy_code: i32,
    rules: Vec<RawRule>,
    /// Byte range of this chain's rule records.
    start: u32,
    end: u32,
}

struct RawRule {
    matches: Vec<MatchPayload>,
    target: RawTarget,
    counter: Counter,
}

enum RawTarget {
    Verdict(Verdict),
    /// Non-negative standard-target code: a chain-start byte offset,
    /// resolved once every chain region is known.
    Offset(u32),
    Extension(MatchPayload),
}

fn parse_chains(blob: &[u8]) -> Result<Vec<RawChain>> {
    let mut r = Reader::new(blob);
    let mut chains = Vec::new();
    while !r.is_at_end() {
        let name = r.read_name()?;
        layout::check_name(&name)?;
        let policy_code = r.read_i32()?;
        let rule_count = r.read_u32()?;
        let counter_base = r.read_u32()?;
        r.skip_padding()?;

        let expected_base: usize = chains.iter().map(|c: &RawChain| c.rules.len()).sum();
        if counter_base as usize != expected_base {
            return Err(Error::Parse(format!(
                "chain {} declares counter base {}, expected {}",
                name, counter_base, expected_base
            )));
        }

        let start = r.pos() as u32;
        let mut rules = Vec::with_capacity(rule_count as usize);
        for _ in 0..rule_count {
            rules.push(parse_rule(&mut r)?);
        }
        let end = r.pos() as u32;
        chains.push(RawChain {
            name,
            policy_code,
            rules,
            start,
            end,
        });
    }
    Ok(chains)
}

fn parse_rule(r: &mut Reader<'_>) -> Result<RawRule> {
    let head = r.pos();
    let match_size = r.read_u32()? as usize;
    let watcher_offset = r.read_u32()? as usize;
    let target_offset = r.read_u32()? as usize;
    let next_offset = r.read_u32()? as usize;
    let packets = r.read_u64()?;
    let bytes = r.read_u64()?;

    if watcher_offset > target_offset || target_offset > next_offset {
        return Err(Error::Parse(format!(
            "rule at offset {} has disordered offsets {}/{}/{}",
            head, watcher_offset, target_offset, next_offset
        )));
    }
    if watcher_offset % layout::ALIGN != 0
        || target_offset % layout::ALIGN != 0
        || next_offset % layout::ALIGN != 0
    {
        return Err(Error::Parse(format!(
            "rule at offset {} has misaligned offsets {}/{}/{}",
            head, watcher_offset, target_offset, next_offset
        )));
    }
    if watcher_offset != layout::RULE_HEAD_SIZE + match_size {
        return Err(Error::Parse(format!(
            "rule at offset {} has watcher offset {} for match size {}",
            head, watcher_offset, match_size
        )));
    }
    if target_offset != watcher_offset {
        return Err(Error::Parse(format!(
            "rule at offset {} carries watchers, which are not supported",
            head
        )));
    }

    let mut matches = Vec::new();
    while r.pos() < head + watcher_offset {
        let (name, payload) = parse_entry(r)?;
        if r.pos() > head + watcher_offset {
            return Err(Error::Parse(format!(
                "match entries overrun their region in rule at offset {}",
                head
            )));
        }
        matches.push(MatchPayload::new(name, payload));
    }

    let (target_name, target_payload) = parse_entry(r)?;
    if r.pos() != head + next_offset {
        return Err(Error::Parse(format!(
            "rule at offset {} declares next offset {} but target ends at {}",
            head,
            next_offset,
            r.pos() - head
        )));
    }

    let target = if target_name == layout::STANDARD_TARGET {
        let code = standard_code(&target_payload, head)?;
        if code < 0 {
            let verdict = Verdict::from_code(code).ok_or(Error::InvalidVerdict {
                verdict: code.to_string(),
            })?;
            RawTarget::Verdict(verdict)
        } else {
            RawTarget::Offset(code as u32)
        }
    } else {
        RawTarget::Extension(MatchPayload::new(target_name, target_payload))
    };

    Ok(RawRule {
        matches,
        target,
        counter: Counter::new(packets, bytes),
    })
}

fn parse_entry(r: &mut Reader<'_>) -> Result<(String, Vec<u8>)> {
    let name = r.read_name()?;
    let payload_size = r.read_u32()? as usize;
    let payload = r.read_bytes(payload_size)?.to_vec();
    r.skip_padding()?;
    Ok((name, payload))
}

fn standard_code(payload: &[u8], rule_offset: usize) -> Result<i32> {
    let bytes: [u8; 4] = payload.try_into().map_err(|_| {
        Error::Parse(format!(
            "standard target in rule at offset {} has a {}-byte payload",
            rule_offset,
            payload.len()
        ))
    })?;
    Ok(i32::from_ne_bytes(bytes))
}

/// A jump code points into the target chain's rule region. Membership is
/// by range, not pointer equality; an empty chain is matched by its start
/// offset alone.
fn resolve_jump(regions: &[(u32, u32, ChainId)], offset: u32) -> Result<ChainId> {
    for &(start, end, id) in regions {
        if (start..end).contains(&offset) || (start == end && offset == start) {
            return Ok(id);
        }
    }
    Err(Error::Parse(format!(
        "jump target offset {} is not inside any chain",
        offset
    )))
}

/// Walk hooks in canonical order, pairing each set `valid_hooks` bit with
/// the next chain carrying a nonzero policy code.
fn assign_hooks(chains: &[RawChain], valid_hooks: u32) -> Result<Vec<Option<BuiltinHook>>> {
    let mut pending = BuiltinHook::ALL
        .into_iter()
        .filter(|hook| valid_hooks & hook.bit() != 0);
    let mut hooks = Vec::with_capacity(chains.len());
    for chain in chains {
        if chain.policy_code != 0 {
            let hook = pending.next().ok_or_else(|| {
                Error::Parse(format!(
                    "chain {} has a policy but every valid hook is taken",
                    chain.name
                ))
            })?;
            hooks.push(Some(hook));
        } else {
            hooks.push(None);
        }
    }
    if let Some(hook) = pending.next() {
        return Err(Error::Parse(format!(
            "hook {} is in valid_hooks but no chain is left to attach",
            hook.name()
        )));
    }
    Ok(hooks)
}
