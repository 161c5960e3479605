//! パース → シンボル解決 → トリガー評価の一連の流れのテスト

use tsubaki_core::{
    collect_referenced_symbol_names, on_trace_event, resolve, BreakpointRegistry, BreakpointSpec,
    Handoff, HandoffError, Phase, ResolutionWarning, SegmentBases, Symbol, SymbolKind,
    SymbolResolver, TraceEvent,
};

const BASE: u64 = 0x5555_5555_4000;

/// 発火したブレークポイント名を記録するだけの引き渡し
#[derive(Default)]
struct RecordingHandoff {
    fired: Vec<(String, u64)>,
}

impl Handoff for RecordingHandoff {
    fn hand_off(&mut self, breakpoint: &BreakpointSpec) -> Result<(), HandoffError> {
        self.fired.push((breakpoint.name.clone(), breakpoint.hit_count));
        Ok(())
    }
}

fn symbol_table() -> SymbolResolver {
    SymbolResolver::from_symbols(vec![
        Symbol::new("main".to_string(), SymbolKind::Static, 0x1139, 0x60),
        Symbol::new("helper".to_string(), SymbolKind::Static, 0x1200, 0x10),
        Symbol::new("printf".to_string(), SymbolKind::Dynamic, 0, 0),
    ])
}

fn bases() -> SegmentBases {
    SegmentBases {
        binary_base: BASE,
        libc_base: Some(0x7fff_f7d8_0000),
        is_dynamic: true,
    }
}

#[test]
fn test_address_breakpoint_fires_on_threshold() {
    let mut registry = BreakpointRegistry::from_specs(["addr=main+0x10 2"]).unwrap();
    assert_eq!(collect_referenced_symbol_names(&registry), ["main"]);

    let warnings = resolve(&mut registry, &symbol_table(), &bases());
    assert!(warnings.is_empty());

    let target = BASE + 0x1139 + 0x10;
    let mut handoff = RecordingHandoff::default();

    // 別のアドレスでは数えない
    let miss = TraceEvent::operation(Phase::Before, 1, target + 1);
    assert_eq!(on_trace_event(&mut registry, &miss, &mut handoff).unwrap(), None);

    let hit = TraceEvent::operation(Phase::Before, 2, target);
    assert_eq!(on_trace_event(&mut registry, &hit, &mut handoff).unwrap(), None);
    assert_eq!(on_trace_event(&mut registry, &hit, &mut handoff).unwrap(), Some(0));
    assert_eq!(on_trace_event(&mut registry, &hit, &mut handoff).unwrap(), Some(0));

    assert_eq!(
        handoff.fired,
        [
            ("addr=main+0x10 2".to_string(), 2),
            ("addr=main+0x10 2".to_string(), 3)
        ]
    );
}

#[test]
fn test_unknown_symbol_is_evaluable_as_zero() {
    let mut registry = BreakpointRegistry::from_specs(["addr=missing+0x20"]).unwrap();

    let warnings = resolve(&mut registry, &symbol_table(), &bases());
    assert!(matches!(
        warnings.as_slice(),
        [ResolutionWarning::UnknownSymbol { symbol, .. }] if symbol == "missing"
    ));

    let mut handoff = RecordingHandoff::default();
    let event = TraceEvent::operation(Phase::Before, 1, 0x20);
    assert_eq!(
        on_trace_event(&mut registry, &event, &mut handoff).unwrap(),
        Some(0)
    );
}

#[test]
fn test_mixed_registry_fires_in_registration_order() {
    let mut registry = BreakpointRegistry::from_specs([
        "oid=3",
        "addr=helper",
        "addr=printf",
        "segfault",
        "entry",
    ])
    .unwrap();

    let warnings = resolve(&mut registry, &symbol_table(), &bases());
    assert_eq!(warnings.len(), 1);

    let mut handoff = RecordingHandoff::default();

    // helper の3回目の呼び出し: oid=3 が先に登録されているのでそちらが発火する
    let event = TraceEvent::operation(Phase::Before, 3, BASE + 0x1200);
    assert_eq!(on_trace_event(&mut registry, &event, &mut handoff).unwrap(), Some(0));
    assert_eq!(registry.get(1).unwrap().hit_count, 0);

    let event = TraceEvent::operation(Phase::Before, 4, BASE + 0x1200);
    assert_eq!(on_trace_event(&mut registry, &event, &mut handoff).unwrap(), Some(1));

    let event = TraceEvent::segfault(4, None);
    assert_eq!(on_trace_event(&mut registry, &event, &mut handoff).unwrap(), Some(3));

    let event = TraceEvent::entry(0);
    assert_eq!(on_trace_event(&mut registry, &event, &mut handoff).unwrap(), Some(4));

    let names: Vec<&str> = handoff.fired.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(names, ["oid=3", "addr=helper", "segfault", "entry"]);
}

#[test]
fn test_syntax_error_is_reported_with_caret() {
    let err = BreakpointRegistry::from_specs(["entry", "addr=main+"]).unwrap_err();
    assert_eq!(err.input, "addr=main+");
    assert_eq!(err.render(), "    addr=main+\n             ^-- missing expression after operator");
}
