//! Memory lowering over scheduled functions.
//!
//! Covers:
//! - No abstract memory gate survives
//! - Barrier call counts per store classification
//! - Allocation block shapes per region
//! - Placement integrity across any sequence of splits

mod common;

use common::{memory_function, placed_where, MemOp, MemoryFunction};
use proptest::prelude::*;
use strata_jit::ir::{
    Barrier, ControlFlowGraph, GateRef, GateType, MachineType, MemoryAttribute, OpCode, RegionFlag,
    ShareKind,
};
use strata_jit::lower::{verify_lowered, MemoryLowering};
use strata_jit::runtime::RuntimeStub;
use strata_jit::{compile_function, BarrierOrdering, CompilationContext, LoweringConfig, MemoryLoweringStats};

fn lower(f: &mut MemoryFunction, config: LoweringConfig) -> MemoryLoweringStats {
    MemoryLowering::new(&mut f.circuit, config).run(&mut f.cfg)
}

fn is_barrier_call(op: OpCode) -> bool {
    matches!(op, OpCode::Call { stub, .. } if stub.is_write_barrier())
}

fn block_of(cfg: &ControlFlowGraph, g: GateRef) -> usize {
    match cfg.position_of(g) {
        Some((block, _)) => block.as_usize(),
        None => panic!("{g} is not placed"),
    }
}

// =============================================================================
// Elimination
// =============================================================================

#[test]
fn test_every_abstract_gate_is_eliminated() {
    let ops = vec![
        MemOp::Alloc(RegionFlag::Young),
        MemOp::Store(MemoryAttribute::unknown_barrier(), false),
        MemOp::Load(MemoryAttribute::needs_barrier()),
        MemOp::Alloc(RegionFlag::Old),
        MemOp::Store(MemoryAttribute::needs_barrier(), false),
        MemOp::Load(MemoryAttribute::unknown_barrier()),
    ];
    let mut f = memory_function(&[ops]);
    lower(&mut f, LoweringConfig::for_testing());

    assert!(f.circuit.collect(|op| op.is_abstract_memory()).is_empty());
    assert_eq!(verify_lowered(&f.circuit, &f.cfg), Ok(()));
    assert_eq!(f.cfg.verify(&f.circuit), Ok(()));
    assert_eq!(f.circuit.verify(), Ok(()));
}

#[test]
fn test_plain_loads_without_read_barrier() {
    let ops = vec![
        MemOp::Load(MemoryAttribute::needs_barrier()),
        MemOp::Load(MemoryAttribute::unknown_barrier()),
    ];
    let mut f = memory_function(&[ops]);
    let stats = lower(&mut f, LoweringConfig::default());

    assert_eq!(stats.splits, 0);
    assert_eq!(stats.read_barriers, 0);
    for &g in &f.memory {
        assert_eq!(f.circuit.op(g), OpCode::RawLoad);
    }
}

#[test]
fn test_read_barrier_splits_on_marking_flag() {
    let mut f = memory_function(&[vec![MemOp::Load(MemoryAttribute::needs_barrier())]]);
    let stats = lower(&mut f, LoweringConfig::for_testing());
    let c = &f.circuit;
    let load = f.memory[0];

    assert_eq!(stats.read_barriers, 1);
    assert_eq!(f.cfg.len(), 4);
    assert_eq!(c.op(load), OpCode::ValueSelector(2));

    let calls = placed_where(c, &f.cfg, |op| matches!(op, OpCode::Call { stub: RuntimeStub::ReadBarrier, .. }));
    assert_eq!(calls.len(), 1);
    let arm = f.cfg.blocks()[block_of(&f.cfg, calls[0])].head().unwrap();
    assert_eq!(c.op(arm), OpCode::IfTrue);
    assert_eq!(c.value_in(load, 0), calls[0]);
}

// =============================================================================
// Barrier cardinality
// =============================================================================

#[test]
fn test_barrier_calls_per_store_kind() {
    let cases = [
        (MemoryAttribute::no_barrier(), 0),
        (MemoryAttribute::needs_barrier(), 1),
        (MemoryAttribute::needs_barrier().with_share(ShareKind::Shared), 1),
        (MemoryAttribute::unknown_barrier(), 1),
    ];
    for ordering in [BarrierOrdering::PostWrite, BarrierOrdering::StoreAtBarrier] {
        for (attr, expected) in cases {
            let mut f = memory_function(&[vec![MemOp::Store(attr, false)]]);
            let config = LoweringConfig {
                barrier_ordering: ordering,
                ..LoweringConfig::default()
            };
            let stats = lower(&mut f, config);

            let calls = placed_where(&f.circuit, &f.cfg, is_barrier_call);
            assert_eq!(calls.len(), expected, "{attr:?} under {ordering:?}");
            assert_eq!(stats.barrier_calls, expected);
        }
    }
}

#[test]
fn test_unknown_barrier_only_on_heap_side() {
    for ordering in [BarrierOrdering::PostWrite, BarrierOrdering::StoreAtBarrier] {
        let attr = MemoryAttribute::unknown_barrier();
        let mut f = memory_function(&[vec![MemOp::Store(attr, false)]]);
        let config = LoweringConfig {
            barrier_ordering: ordering,
            ..LoweringConfig::default()
        };
        let stats = lower(&mut f, config);
        let c = &f.circuit;

        assert_eq!(stats.type_checks, 1);
        let checks = placed_where(c, &f.cfg, |op| op == OpCode::IsHeapObject);
        assert_eq!(checks.len(), 1);

        let calls = placed_where(c, &f.cfg, is_barrier_call);
        assert_eq!(calls.len(), 1);
        let arm = f.cfg.blocks()[block_of(&f.cfg, calls[0])].head().unwrap();
        assert_eq!(c.op(arm), OpCode::IfTrue);
        let branch = c.state_in(arm, 0);
        assert_eq!(c.value_in(branch, 0), checks[0]);

        // The store is now the merge's effect join.
        assert_eq!(c.op(f.memory[0]), OpCode::DependSelector(2));
        assert_eq!(c.depend_in(f.ret, 0), f.memory[0]);
    }
}

#[test]
fn test_unknown_barrier_constant_store_skips_check() {
    let mut f = memory_function(&[vec![MemOp::Store(MemoryAttribute::unknown_barrier(), true)]]);
    let stats = lower(&mut f, LoweringConfig::default());

    assert_eq!(stats.type_checks, 0);
    assert_eq!(stats.splits, 0);
    assert_eq!(f.circuit.op(f.memory[0]), OpCode::RawStore);
    assert!(placed_where(&f.circuit, &f.cfg, is_barrier_call).is_empty());
}

// =============================================================================
// Allocation shape
// =============================================================================

#[test]
fn test_old_space_allocation_adds_no_blocks() {
    let mut f = memory_function(&[vec![MemOp::Alloc(RegionFlag::Old)]]);
    let stats = lower(&mut f, LoweringConfig::default());

    assert_eq!(f.cfg.len(), 1);
    assert_eq!(stats.allocations, 1);
    assert_eq!(stats.inline_allocations, 0);
    assert!(placed_where(&f.circuit, &f.cfg, |op| op == OpCode::IfBranch).is_empty());
}

#[test]
fn test_inline_allocation_shape() {
    for region in [RegionFlag::Young, RegionFlag::SharedOld, RegionFlag::SharedNonMovable] {
        let mut f = memory_function(&[vec![MemOp::Alloc(region)]]);
        lower(&mut f, LoweringConfig::default());
        let c = &f.circuit;

        assert_eq!(f.cfg.len(), 4, "{region:?}");
        assert_eq!(placed_where(c, &f.cfg, |op| op == OpCode::IfBranch).len(), 1);
        assert_eq!(placed_where(c, &f.cfg, |op| matches!(op, OpCode::Merge(_))).len(), 1);

        let heads: Vec<_> = f.cfg.iter().map(|(_, b)| c.op(b.head().unwrap())).collect();
        assert_eq!(
            heads,
            vec![OpCode::StateEntry, OpCode::IfFalse, OpCode::IfTrue, OpCode::Merge(2)]
        );
    }
}

#[test]
fn test_allocation_consumers_see_merge_result() {
    let mut c = strata_jit::ir::Circuit::new();
    let root = c.state_root();
    let dep = c.depend_root();
    let glue = c.new_gate(OpCode::Argument(0), MachineType::ArchPtr, &[], GateType::Raw);
    let size = c.constant(MachineType::I64, 16, GateType::Raw);
    let alloc = c.new_gate(OpCode::HeapAlloc(RegionFlag::Young), MachineType::I64, &[dep, glue, size], GateType::TaggedPointer);
    let eight = c.constant(MachineType::I64, 8, GateType::Raw);
    let field = c.new_gate(OpCode::PtrAdd, MachineType::ArchPtr, &[alloc, eight], GateType::Raw);
    let ret = c.new_gate(OpCode::Return, MachineType::NoValue, &[root, alloc, alloc], GateType::Empty);
    let mut cfg = ControlFlowGraph::from_blocks([vec![root, alloc, field, ret]]);

    MemoryLowering::new(&mut c, LoweringConfig::default()).run(&mut cfg);

    let merge = c.state_in(alloc, 0);
    assert_eq!(c.op(merge), OpCode::Merge(2));
    assert_eq!(c.op(alloc), OpCode::ValueSelector(2));
    assert_eq!(c.value_in(field, 0), alloc);
    assert_eq!(c.value_in(ret, 0), alloc);
    assert_eq!(c.state_in(ret, 0), merge);

    // Consumers stay after the result in the merge block.
    let (block, at) = cfg.position_of(alloc).unwrap();
    assert_eq!(cfg.position_of(field), Some((block, at + 1)));
    assert_eq!(cfg.block(block).head(), Some(merge));
}

#[test]
fn test_sanitizer_allocations_are_calls() {
    let ops: Vec<_> = RegionFlag::ALL.iter().map(|&r| MemOp::Alloc(r)).collect();
    let mut f = memory_function(&[ops]);
    let stats = lower(&mut f, LoweringConfig::sanitizer());

    assert_eq!(stats.allocations, 4);
    assert_eq!(stats.splits, 0);
    assert_eq!(f.cfg.len(), 1);
}

// =============================================================================
// Streaming across blocks
// =============================================================================

#[test]
fn test_later_blocks_follow_merge() {
    let mut f = memory_function(&[
        vec![MemOp::Alloc(RegionFlag::Young), MemOp::Alloc(RegionFlag::Young)],
        vec![MemOp::Store(MemoryAttribute::unknown_barrier(), false)],
    ]);
    let stats = lower(&mut f, LoweringConfig::default());
    let c = &f.circuit;

    assert_eq!(stats.splits, 3);
    assert_eq!(f.cfg.len(), 2 + 3 * 3);

    // The second block was opened by the first block's head; it now
    // follows the last merge of that block.
    let second_head = f.cfg.blocks()[7].head().unwrap();
    assert_eq!(c.op(second_head), OpCode::IfSuccess);
    assert_eq!(c.state_in(second_head, 0), c.state_in(f.memory[1], 0));
    assert_eq!(f.cfg.verify(c), Ok(()));
}

#[test]
fn test_pipeline_with_scheduler_closure() {
    let mut f = memory_function(&[vec![
        MemOp::Alloc(RegionFlag::SharedOld),
        MemOp::Store(MemoryAttribute::unknown_barrier(), false),
    ]]);
    let scheduled = f.cfg.clone();
    let mut scheduler = move |_: &strata_jit::ir::Circuit| scheduled.clone();
    let mut ctx = CompilationContext::new("pipeline", LoweringConfig::default());

    let cfg = compile_function(&mut ctx, &mut f.circuit, None, &mut scheduler);

    assert_eq!(ctx.memory_stats.splits, 2);
    assert_eq!(cfg.len(), 7);
    assert_eq!(verify_lowered(&f.circuit, &cfg), Ok(()));
}

// =============================================================================
// Properties
// =============================================================================

fn arb_attr() -> impl Strategy<Value = MemoryAttribute> {
    let barrier = prop_oneof![
        Just(Barrier::NoBarrier),
        Just(Barrier::NeedsBarrier),
        Just(Barrier::Unknown),
    ];
    let share = prop_oneof![
        Just(ShareKind::Shared),
        Just(ShareKind::NonShared),
        Just(ShareKind::Unknown),
    ];
    (barrier, share).prop_map(|(b, s)| MemoryAttribute::new(b, s))
}

fn arb_op() -> impl Strategy<Value = MemOp> {
    prop_oneof![
        prop::sample::select(RegionFlag::ALL.to_vec()).prop_map(MemOp::Alloc),
        arb_attr().prop_map(MemOp::Load),
        (arb_attr(), any::<bool>()).prop_map(|(a, k)| MemOp::Store(a, k)),
    ]
}

fn arb_config() -> impl Strategy<Value = LoweringConfig> {
    prop_oneof![
        Just(LoweringConfig::default()),
        Just(LoweringConfig::satb()),
        Just(LoweringConfig::sanitizer()),
        Just(LoweringConfig::for_testing()),
    ]
}

/// Whether lowering `op` under `config` splits its block.
fn splits(op: MemOp, config: &LoweringConfig) -> bool {
    match op {
        MemOp::Alloc(region) => region.has_inline_fast_path() && !config.sanitizer,
        MemOp::Load(attr) => attr.barrier != Barrier::NoBarrier && config.read_barrier,
        MemOp::Store(attr, constant) => attr.barrier == Barrier::Unknown && !constant,
    }
}

fn barrier_calls(op: MemOp) -> usize {
    match op {
        MemOp::Store(attr, constant) => match attr.barrier {
            Barrier::NeedsBarrier => 1,
            Barrier::Unknown if !constant => 1,
            _ => 0,
        },
        _ => 0,
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn prop_no_abstract_gate_survives(
        blocks in prop::collection::vec(prop::collection::vec(arb_op(), 0..5), 1..4),
        config in arb_config(),
    ) {
        let mut f = memory_function(&blocks);
        lower(&mut f, config);

        prop_assert!(f.circuit.collect(|op| op.is_abstract_memory()).is_empty());
        prop_assert_eq!(verify_lowered(&f.circuit, &f.cfg), Ok(()));
        prop_assert_eq!(f.circuit.verify(), Ok(()));
    }

    #[test]
    fn prop_placement_survives_splicing(
        blocks in prop::collection::vec(prop::collection::vec(arb_op(), 0..5), 1..4),
        config in arb_config(),
    ) {
        let mut f = memory_function(&blocks);
        let expected_splits = blocks.iter().flatten().filter(|&&op| splits(op, &config)).count();
        let stats = lower(&mut f, config);

        prop_assert_eq!(f.cfg.verify(&f.circuit), Ok(()));
        prop_assert_eq!(stats.visited, f.placed.len());
        prop_assert_eq!(stats.splits, expected_splits);
        prop_assert_eq!(f.cfg.len(), blocks.len() + 3 * expected_splits);
        for &g in &f.placed {
            prop_assert!(f.cfg.position_of(g).is_some(), "{} lost", g);
        }

        // Effect order is preserved.
        let order: Vec<_> = f.cfg.placed_gates().filter(|g| f.memory.contains(g)).collect();
        prop_assert_eq!(&order, &f.memory);

        let last = f.cfg.blocks().last().map(|b| b.contains(f.ret));
        prop_assert_eq!(last, Some(true));
    }

    #[test]
    fn prop_barrier_call_count(
        ops in prop::collection::vec(arb_op(), 0..8),
        config in arb_config(),
    ) {
        let mut f = memory_function(&[ops.clone()]);
        let stats = lower(&mut f, config);

        let expected: usize = ops.iter().map(|&op| barrier_calls(op)).sum();
        prop_assert_eq!(placed_where(&f.circuit, &f.cfg, is_barrier_call).len(), expected);
        prop_assert_eq!(stats.barrier_calls, expected);
    }
}
