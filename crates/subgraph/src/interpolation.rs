//! Patching per-instantiation argument bytes into operation templates.
//!
//! Rules are applied in declaration order. An overwrite copies bytes from the
//! instantiation arguments into the target buffer; a reduction folds them in
//! with a registered operator (`lhs` = target bytes, `rhs` = argument bytes,
//! one element). Out-of-range byte offsets are programming errors in the
//! definition and panic.

use std::collections::HashMap;
use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use weave_core::{ReductionOp, ReductionOpId, ReductionRegistry};

use crate::definition::{Interpolation, InterpolationTarget, OpKey};
use crate::error::{Result, SubgraphError};

/// Upper bound for the inline part of [`InterpolationScratch`].
pub const INLINE_SCRATCH_BYTES: usize = 1024;

/// Reusable buffer for copy-on-demand interpolation.
///
/// Patched copies up to `threshold` bytes live in a fixed inline array;
/// larger ones fall back to a heap buffer that is kept for reuse.
pub struct InterpolationScratch {
    inline: [u8; INLINE_SCRATCH_BYTES],
    heap: Vec<u8>,
    threshold: usize,
}

impl InterpolationScratch {
    pub fn new(threshold: usize) -> Self {
        Self {
            inline: [0; INLINE_SCRATCH_BYTES],
            heap: Vec::new(),
            threshold: threshold.min(INLINE_SCRATCH_BYTES),
        }
    }

    /// A writable slot of exactly `len` bytes.
    pub fn slot(&mut self, len: usize) -> &mut [u8] {
        if len <= self.threshold {
            &mut self.inline[..len]
        } else {
            self.heap.clear();
            self.heap.resize(len, 0);
            &mut self.heap[..]
        }
    }

    /// Whether the last slot of `len` bytes would spill to the heap.
    pub fn spills(&self, len: usize) -> bool {
        len > self.threshold
    }
}

impl Default for InterpolationScratch {
    fn default() -> Self {
        Self::new(INLINE_SCRATCH_BYTES)
    }
}

/// Reduction operators referenced by a compiled subgraph, resolved once at
/// compile time.
#[derive(Clone, Default)]
pub struct ReductionTable {
    ops: HashMap<ReductionOpId, Arc<dyn ReductionOp>>,
}

impl ReductionTable {
    /// Look up every reduction used by `rules`, checking that the operator
    /// exists and that its right-hand operand matches the rule's byte count.
    pub fn resolve(rules: &[Interpolation], registry: &ReductionRegistry) -> Result<Self> {
        let mut ops: HashMap<ReductionOpId, Arc<dyn ReductionOp>> = HashMap::new();
        for rule in rules.iter().filter(|r| !r.redop.is_none()) {
            let op = match ops.get(&rule.redop) {
                Some(op) => Arc::clone(op),
                None => {
                    let op = registry
                        .lookup(rule.redop)
                        .ok_or(SubgraphError::MissingReductionOp(rule.redop))?;
                    ops.insert(rule.redop, Arc::clone(&op));
                    op
                }
            };
            if op.sizeof_rhs() != rule.bytes {
                return Err(SubgraphError::ReductionSizeMismatch {
                    redop: rule.redop,
                    expected: op.sizeof_rhs(),
                    bytes: rule.bytes,
                });
            }
        }
        Ok(Self { ops })
    }

    pub fn get(&self, id: ReductionOpId) -> Option<&Arc<dyn ReductionOp>> {
        self.ops.get(&id)
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

impl fmt::Debug for ReductionTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<_> = self.ops.keys().map(|id| id.0).collect();
        ids.sort_unstable();
        f.debug_struct("ReductionTable").field("ops", &ids).finish()
    }
}

/// Stably sort rules so each operation's rules are contiguous, ordered by
/// target kind then target index.
pub fn sort_rules(rules: &mut [Interpolation]) {
    rules.sort_by_key(|r| r.target_key());
}

/// Range of `rules` (sorted with [`sort_rules`]) that targets `key`.
pub fn rule_range(rules: &[Interpolation], key: OpKey) -> Range<usize> {
    match rules.binary_search_by_key(&key, |r| r.target_key()) {
        Ok(hit) => {
            let mut lo = hit;
            while lo > 0 && rules[lo - 1].target_key() == key {
                lo -= 1;
            }
            let mut hi = hit + 1;
            while hi < rules.len() && rules[hi].target_key() == key {
                hi += 1;
            }
            lo..hi
        }
        Err(at) => at..at,
    }
}

/// Applies one operation's rules.
#[derive(Clone, Copy)]
pub struct Interpolator<'a> {
    rules: &'a [Interpolation],
    reductions: &'a ReductionTable,
}

impl<'a> Interpolator<'a> {
    pub fn new(rules: &'a [Interpolation], reductions: &'a ReductionTable) -> Self {
        Self { rules, reductions }
    }

    pub fn has_match(&self, target: InterpolationTarget) -> bool {
        self.rules.iter().any(|r| r.target == target)
    }

    /// Copy-on-demand: returns `template` untouched when no rule applies to
    /// `target`, otherwise a patched copy held in `scratch`. The template is
    /// never written.
    pub fn interpolate<'s>(
        &self,
        target: InterpolationTarget,
        template: &'s [u8],
        args: &[u8],
        scratch: &'s mut InterpolationScratch,
    ) -> &'s [u8] {
        let mut scratch = Some(scratch);
        let mut patched: Option<&'s mut [u8]> = None;
        for rule in self.rules.iter().filter(|r| r.target == target) {
            if patched.is_none() {
                if let Some(scratch) = scratch.take() {
                    let slot = scratch.slot(template.len());
                    slot.copy_from_slice(template);
                    patched = Some(slot);
                }
            }
            if let Some(buf) = patched.as_deref_mut() {
                self.apply(rule, args, buf);
            }
        }
        match patched {
            Some(buf) => buf,
            None => template,
        }
    }

    /// Patch `buf`, which the caller already owns privately.
    pub fn interpolate_in_place(&self, target: InterpolationTarget, buf: &mut [u8], args: &[u8]) {
        for rule in self.rules.iter().filter(|r| r.target == target) {
            self.apply(rule, args, buf);
        }
    }

    fn apply(&self, rule: &Interpolation, args: &[u8], dst: &mut [u8]) {
        let src_end = rule.offset + rule.bytes;
        assert!(
            src_end <= args.len(),
            "interpolation reads args[{}..{}] but only {} bytes were passed",
            rule.offset,
            src_end,
            args.len()
        );
        let src = &args[rule.offset..src_end];

        if rule.redop.is_none() {
            let dst_end = rule.target_offset + rule.bytes;
            assert!(
                dst_end <= dst.len(),
                "interpolation writes {:?}[{}..{}] of a {}-byte buffer",
                rule.target,
                rule.target_offset,
                dst_end,
                dst.len()
            );
            dst[rule.target_offset..dst_end].copy_from_slice(src);
            return;
        }

        let Some(op) = self.reductions.get(rule.redop) else {
            panic!("reduction op {:?} was not resolved at compile time", rule.redop);
        };
        let dst_end = rule.target_offset + op.sizeof_lhs();
        assert!(
            dst_end <= dst.len(),
            "reduction into {:?}[{}..{}] of a {}-byte buffer",
            rule.target,
            rule.target_offset,
            dst_end,
            dst.len()
        );
        op.apply_exclusive(&mut dst[rule.target_offset..dst_end], src);
    }
}
