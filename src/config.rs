// Copyright (c) 2025 Joshua Seaton
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Engine-wide configuration: which proposals are enabled, resource limits,
//! and gas accounting parameters.
//!
//! `EngineConfig` is threaded by reference through instantiation and
//! execution exactly as [`crate::Allocator`] is threaded through decoding:
//! callers construct one up front and hand it to [`crate::instantiate`] and
//! [`crate::invoke`].

/// The number of independently-toggleable proposals this engine recognizes.
///
/// Proposal gating happens at two points: the decoder always accepts the full
/// instruction and type space so that a single parse can't silently desync on
/// an opcode from a disabled proposal, while the interpreter and instantiator
/// consult [`EngineConfig::proposal_enabled`] before executing or validating
/// proposal-specific behavior (e.g. a shared memory import, or a `struct.new`
/// instruction), raising a trap/error that names the gating proposal.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum Proposal {
    MultiValue,
    BulkMemory,
    ReferenceTypes,
    Simd,
    TailCall,
    Threads,
    MultiMemory,
    MutableGlobalsInImportsExports,
    SignExtensionOps,
    NonTrappingFloatToInt,
    FunctionReferences,
    Gc,
    ExceptionHandling,
    Memory64,
    RelaxedSimd,
    ComponentModel,
}

/// Total number of [`Proposal`] variants, kept in sync by a unit test below.
const PROPOSAL_COUNT: usize = 16;

/// Engine-wide configuration.
///
/// The proposal defaults mirror the staged rollout of a real engine: MVP-era
/// and long-stabilized proposals default on, while the newer, still-evolving
/// proposals (GC, exception-handling, memory64, relaxed-SIMD,
/// component-model) default off and must be opted into explicitly.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    proposals: [bool; PROPOSAL_COUNT],

    /// Clamp on the number of pages any single memory may grow to, regardless
    /// of its declared maximum. Defaults to the full 32-bit page space.
    pub max_memory_pages: u32,

    /// Gas ceiling for a single invocation. `None` means unmetered.
    pub cost_limit: Option<u64>,

    /// Per-opcode gas weights for the unprefixed opcode space (0x00-0xFF).
    /// Defaults to a uniform weight of 1 per instruction.
    pub cost_table: [u64; 256],

    /// Per-sub-opcode gas weights for each prefixed instruction family,
    /// addressed independently of the base `cost_table` (see
    /// [`crate::stats`] for the resolution of why prefixed opcodes don't
    /// alias the prefix byte's own slot).
    pub bulk_cost_table: [u64; 32],
    pub vector_cost_table: [u64; 256],
    pub atomic_cost_table: [u64; 96],
    pub gc_cost_table: [u64; 32],

    /// Gas multiplier `k` applied to bulk byte/element copies, charged as
    /// `k * ceil(bytes / 32)` in addition to the bulk op's own fixed cost.
    pub bulk_copy_cost_factor: u64,

    /// Ignore any embedded AOT payload and always run the bytecode
    /// interpreter. This engine implements no AOT backend, so this is always
    /// `true` and is not settable; it's retained as a field so the type
    /// matches the full configuration surface an embedder expects.
    pub force_interpreter: bool,

    /// Maximum nesting depth of function activations within a single
    /// invocation, guarding against exhausting the host's own call stack.
    /// Exceeding it raises `Trap::CallStackExhausted`.
    pub max_call_depth: usize,

    /// Enable per-instruction counters and timing in the [`crate::stats`]
    /// sink.
    pub stats_enabled: bool,
}

impl EngineConfig {
    /// The default maximum number of 64 KiB pages a memory may grow to.
    pub const DEFAULT_MAX_MEMORY_PAGES: u32 = 65_536;

    /// Returns whether `proposal` is currently enabled.
    pub fn proposal_enabled(&self, proposal: Proposal) -> bool {
        self.proposals[proposal as usize]
    }

    /// Enables or disables `proposal`.
    pub fn set_proposal_enabled(&mut self, proposal: Proposal, enabled: bool) {
        self.proposals[proposal as usize] = enabled;
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        let mut proposals = [true; PROPOSAL_COUNT];
        for disabled in [
            Proposal::Gc,
            Proposal::ExceptionHandling,
            Proposal::Memory64,
            Proposal::RelaxedSimd,
            Proposal::ComponentModel,
        ] {
            proposals[disabled as usize] = false;
        }

        Self {
            proposals,
            max_memory_pages: Self::DEFAULT_MAX_MEMORY_PAGES,
            cost_limit: None,
            cost_table: [1; 256],
            bulk_cost_table: [1; 32],
            vector_cost_table: [1; 256],
            atomic_cost_table: [1; 96],
            gc_cost_table: [1; 32],
            bulk_copy_cost_factor: 1,
            force_interpreter: true,
            max_call_depth: 512,
            stats_enabled: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{EngineConfig, PROPOSAL_COUNT, Proposal};

    #[test]
    fn proposal_count_matches_enum() {
        // Keeps PROPOSAL_COUNT honest without relying on the unstable
        // variant_count intrinsic (see the similar TODO in types::instr).
        let all = [
            Proposal::MultiValue,
            Proposal::BulkMemory,
            Proposal::ReferenceTypes,
            Proposal::Simd,
            Proposal::TailCall,
            Proposal::Threads,
            Proposal::MultiMemory,
            Proposal::MutableGlobalsInImportsExports,
            Proposal::SignExtensionOps,
            Proposal::NonTrappingFloatToInt,
            Proposal::FunctionReferences,
            Proposal::Gc,
            Proposal::ExceptionHandling,
            Proposal::Memory64,
            Proposal::RelaxedSimd,
            Proposal::ComponentModel,
        ];
        assert_eq!(all.len(), PROPOSAL_COUNT);
    }

    #[test]
    fn defaults_match_staged_rollout() {
        let config = EngineConfig::default();
        assert!(config.proposal_enabled(Proposal::BulkMemory));
        assert!(config.proposal_enabled(Proposal::ReferenceTypes));
        assert!(!config.proposal_enabled(Proposal::Gc));
        assert!(!config.proposal_enabled(Proposal::ExceptionHandling));
        assert!(!config.proposal_enabled(Proposal::Memory64));
        assert_eq!(config.max_memory_pages, EngineConfig::DEFAULT_MAX_MEMORY_PAGES);
        assert!(config.cost_limit.is_none());
        assert!(config.force_interpreter);
    }

    #[test]
    fn set_proposal_enabled_roundtrips() {
        let mut config = EngineConfig::default();
        config.set_proposal_enabled(Proposal::Gc, true);
        assert!(config.proposal_enabled(Proposal::Gc));
        config.set_proposal_enabled(Proposal::Gc, false);
        assert!(!config.proposal_enabled(Proposal::Gc));
    }
}
