// Copyright (c) 2025 Joshua Seaton
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Per-instruction cost accounting ("gas") and execution counters.
//!
//! A [`Statistics`] sink is owned by a single invocation of the interpreter.
//! It is infallible and allocation-free (matching the `ContextStack`
//! diagnostic trail's own no-allocation discipline in [`crate::decode`]):
//! charging gas can only ever report that the configured ceiling was
//! exceeded, never fail for any other reason.

use crate::config::EngineConfig;
use crate::types::{AtomicOpcode, BulkOpcode, GcOpcode, Opcode, VectorOpcode};

/// The opcode family a charged cost belongs to, mirroring the resolution of
/// the cost-table aliasing question in the expanded specification: prefixed
/// opcodes are billed against their own, independently-sized tables rather
/// than against the prefix byte's slot in the base 256-entry table.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CostKind {
    Base(Opcode),
    Bulk(BulkOpcode),
    Vector(VectorOpcode),
    Atomic(AtomicOpcode),
    Gc(GcOpcode),
}

/// Accumulates gas usage and per-instruction counts over one invocation.
///
/// Cheap to construct and reset; an embedder that wants persistent counters
/// across invocations keeps its own running total and folds in
/// [`Statistics::gas_used`] after each call.
#[derive(Clone, Debug, Default)]
pub struct Statistics {
    gas_used: u64,
    instructions_executed: u64,
    enabled: bool,
}

impl Statistics {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            gas_used: 0,
            instructions_executed: 0,
            enabled: config.stats_enabled,
        }
    }

    pub fn gas_used(&self) -> u64 {
        self.gas_used
    }

    pub fn instructions_executed(&self) -> u64 {
        self.instructions_executed
    }

    fn cost_of(config: &EngineConfig, kind: CostKind) -> u64 {
        match kind {
            CostKind::Base(op) => config.cost_table[op as u8 as usize],
            CostKind::Bulk(op) => config.bulk_cost_table[op as u32 as usize],
            CostKind::Vector(op) => config.vector_cost_table[op as u32 as usize],
            CostKind::Atomic(op) => config.atomic_cost_table[op as u32 as usize],
            CostKind::Gc(op) => config.gc_cost_table[op as u32 as usize],
        }
    }

    /// Charges the fixed cost of a single instruction. Returns `Err(())` if
    /// doing so would exceed `config.cost_limit`; the interpreter turns that
    /// into a `Trap::CostLimitExceeded` at the current instruction boundary.
    #[must_use]
    pub fn charge(&mut self, config: &EngineConfig, kind: CostKind) -> Result<(), ()> {
        self.instructions_executed += 1;
        if !self.enabled && config.cost_limit.is_none() {
            return Ok(());
        }
        self.charge_raw(config, Self::cost_of(config, kind))
    }

    /// Charges the variable cost of a bulk memory/table copy of `bytes`
    /// bytes (or lane-equivalent units), per the spec's `k * ceil(n/32)`
    /// formula.
    #[must_use]
    pub fn charge_bulk_copy(&mut self, config: &EngineConfig, bytes: usize) -> Result<(), ()> {
        if !self.enabled && config.cost_limit.is_none() {
            return Ok(());
        }
        let units = bytes.div_ceil(32) as u64;
        self.charge_raw(config, config.bulk_copy_cost_factor.saturating_mul(units))
    }

    fn charge_raw(&mut self, config: &EngineConfig, cost: u64) -> Result<(), ()> {
        self.gas_used = self.gas_used.saturating_add(cost);
        if let Some(limit) = config.cost_limit
            && self.gas_used > limit
        {
            return Err(());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{CostKind, Statistics};
    use crate::config::EngineConfig;
    use crate::types::Opcode;

    #[test]
    fn charges_default_weight_of_one() {
        let config = EngineConfig {
            stats_enabled: true,
            ..EngineConfig::default()
        };
        let mut stats = Statistics::new(&config);
        stats.charge(&config, CostKind::Base(Opcode::I32Add)).unwrap();
        stats.charge(&config, CostKind::Base(Opcode::I32Add)).unwrap();
        assert_eq!(stats.gas_used(), 2);
        assert_eq!(stats.instructions_executed(), 2);
    }

    #[test]
    fn trips_cost_limit() {
        let config = EngineConfig {
            cost_limit: Some(1),
            ..EngineConfig::default()
        };
        let mut stats = Statistics::new(&config);
        stats.charge(&config, CostKind::Base(Opcode::Nop)).unwrap();
        assert!(stats.charge(&config, CostKind::Base(Opcode::Nop)).is_err());
    }

    #[test]
    fn bulk_copy_cost_rounds_up() {
        let config = EngineConfig {
            cost_limit: Some(u64::MAX),
            bulk_copy_cost_factor: 2,
            ..EngineConfig::default()
        };
        let mut stats = Statistics::new(&config);
        stats.charge_bulk_copy(&config, 33).unwrap();
        assert_eq!(stats.gas_used(), 4); // ceil(33/32) = 2, * factor 2
    }
}
