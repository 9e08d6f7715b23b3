use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::error::CoreError;
use crate::ids::ReductionOpId;

/// A reduction operator working on raw little-endian element bytes.
pub trait ReductionOp: Send + Sync {
    fn sizeof_lhs(&self) -> usize;
    fn sizeof_rhs(&self) -> usize;

    /// `lhs = lhs op rhs` for a single element, caller holds exclusive access.
    fn apply_exclusive(&self, lhs: &mut [u8], rhs: &[u8]);
}

type ApplyFn = dyn Fn(&mut [u8], &[u8]) + Send + Sync;

/// Reduction operator backed by a closure.
pub struct FnReduction {
    sizeof_lhs: usize,
    sizeof_rhs: usize,
    apply: Box<ApplyFn>,
}

impl FnReduction {
    pub fn new(
        sizeof_lhs: usize,
        sizeof_rhs: usize,
        apply: impl Fn(&mut [u8], &[u8]) + Send + Sync + 'static,
    ) -> Self {
        Self {
            sizeof_lhs,
            sizeof_rhs,
            apply: Box::new(apply),
        }
    }

    /// Wrapping `i32` addition.
    pub fn i32_add() -> Self {
        Self::new(4, 4, |lhs, rhs| {
            let a = i32::from_le_bytes(lhs[..4].try_into().unwrap_or_default());
            let b = i32::from_le_bytes(rhs[..4].try_into().unwrap_or_default());
            lhs[..4].copy_from_slice(&a.wrapping_add(b).to_le_bytes());
        })
    }

    /// Wrapping `i64` addition.
    pub fn i64_add() -> Self {
        Self::new(8, 8, |lhs, rhs| {
            let a = i64::from_le_bytes(lhs[..8].try_into().unwrap_or_default());
            let b = i64::from_le_bytes(rhs[..8].try_into().unwrap_or_default());
            lhs[..8].copy_from_slice(&a.wrapping_add(b).to_le_bytes());
        })
    }
}

impl ReductionOp for FnReduction {
    fn sizeof_lhs(&self) -> usize {
        self.sizeof_lhs
    }

    fn sizeof_rhs(&self) -> usize {
        self.sizeof_rhs
    }

    fn apply_exclusive(&self, lhs: &mut [u8], rhs: &[u8]) {
        (self.apply)(lhs, rhs)
    }
}

/// Table of reduction operators, owned by the runtime context.
#[derive(Default)]
pub struct ReductionRegistry {
    ops: RwLock<HashMap<ReductionOpId, Arc<dyn ReductionOp>>>,
}

impl ReductionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: ReductionOpId, op: Arc<dyn ReductionOp>) -> Result<(), CoreError> {
        if id.is_none() {
            return Err(CoreError::ReservedReductionOp);
        }
        let mut ops = self.ops.write();
        if ops.contains_key(&id) {
            return Err(CoreError::DuplicateReductionOp(id));
        }
        debug!(
            redop = id.0,
            lhs = op.sizeof_lhs(),
            rhs = op.sizeof_rhs(),
            "registered reduction op"
        );
        ops.insert(id, op);
        Ok(())
    }

    pub fn lookup(&self, id: ReductionOpId) -> Option<Arc<dyn ReductionOp>> {
        self.ops.read().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.ops.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn i32_add_applies_in_place() {
        let op = FnReduction::i32_add();
        let mut lhs = 40i32.to_le_bytes();
        op.apply_exclusive(&mut lhs, &2i32.to_le_bytes());
        assert_eq!(i32::from_le_bytes(lhs), 42);
    }

    #[test]
    fn registry_rejects_reserved_and_duplicate_ids() {
        let reg = ReductionRegistry::new();
        assert!(matches!(
            reg.register(ReductionOpId::NONE, Arc::new(FnReduction::i32_add())),
            Err(CoreError::ReservedReductionOp)
        ));
        reg.register(ReductionOpId(60), Arc::new(FnReduction::i32_add()))
            .unwrap();
        assert!(matches!(
            reg.register(ReductionOpId(60), Arc::new(FnReduction::i64_add())),
            Err(CoreError::DuplicateReductionOp(_))
        ));
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.lookup(ReductionOpId(60)).unwrap().sizeof_rhs(), 4);
        assert!(reg.lookup(ReductionOpId(61)).is_none());
    }
}
