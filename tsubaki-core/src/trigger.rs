//! ブレークポイントのトリガー評価

use crate::errors::TriggerError;
use crate::event::TraceEvent;
use crate::handoff::Handoff;
use crate::registry::BreakpointRegistry;
use tracing::debug;

/// トレースイベントごとにブレークポイントを評価する
///
/// 条件が成立したブレークポイントのヒット回数を増やし、閾値に達したものがあれば
/// デバッガへ引き渡します。閾値に達した後は一致するたびに発火します。
/// 1回のイベントで発火するのは最初の1つだけで、そのインデックスを返します。
///
/// 本番の [`Handoff`] はプロセスイメージを置き換えるので、発火した場合は戻りません。
pub fn on_trace_event(
    registry: &mut BreakpointRegistry,
    event: &TraceEvent,
    handoff: &mut dyn Handoff,
) -> Result<Option<usize>, TriggerError> {
    for (index, breakpoint) in registry.iter_mut().enumerate() {
        if !breakpoint.matches(event)? {
            continue;
        }

        breakpoint.hit_count += 1;
        debug!(
            "user breakpoint \"{}\" hit ({}/{}) at oid {}",
            breakpoint.name, breakpoint.hit_count, breakpoint.trigger_threshold, event.oid
        );

        if breakpoint.hit_count >= breakpoint.trigger_threshold {
            handoff.hand_off(breakpoint)?;
            return Ok(Some(index));
        }
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breakpoint::{BreakpointSpec, Phase};
    use crate::handoff::HandoffError;

    #[derive(Default)]
    struct Recorder {
        fired: Vec<String>,
    }

    impl Handoff for Recorder {
        fn hand_off(&mut self, breakpoint: &BreakpointSpec) -> Result<(), HandoffError> {
            self.fired.push(breakpoint.name.clone());
            Ok(())
        }
    }

    struct Failing;

    impl Handoff for Failing {
        fn hand_off(&mut self, _breakpoint: &BreakpointSpec) -> Result<(), HandoffError> {
            Err(HandoffError::Exec {
                path: "/nonexistent/gdb".to_string(),
                reason: nix::errno::Errno::ENOENT,
            })
        }
    }

    #[test]
    fn test_threshold_is_a_repeating_latch() {
        let mut registry = BreakpointRegistry::from_specs(["oid=5 3"]).unwrap();
        let mut recorder = Recorder::default();
        let event = TraceEvent::operation(Phase::Before, 5, 0x1000);

        assert_eq!(on_trace_event(&mut registry, &event, &mut recorder).unwrap(), None);
        assert_eq!(on_trace_event(&mut registry, &event, &mut recorder).unwrap(), None);
        assert_eq!(on_trace_event(&mut registry, &event, &mut recorder).unwrap(), Some(0));
        assert_eq!(on_trace_event(&mut registry, &event, &mut recorder).unwrap(), Some(0));
        assert_eq!(recorder.fired.len(), 2);
        assert_eq!(registry.get(0).unwrap().hit_count, 4);
    }

    #[test]
    fn test_non_matching_events_do_not_count() {
        let mut registry = BreakpointRegistry::from_specs(["oid=5"]).unwrap();
        let mut recorder = Recorder::default();

        let other = TraceEvent::operation(Phase::Before, 4, 0x1000);
        let after = TraceEvent::operation(Phase::After, 5, 0x1000);
        assert_eq!(on_trace_event(&mut registry, &other, &mut recorder).unwrap(), None);
        assert_eq!(on_trace_event(&mut registry, &after, &mut recorder).unwrap(), None);
        assert_eq!(registry.get(0).unwrap().hit_count, 0);
    }

    #[test]
    fn test_at_most_one_fires_per_event() {
        let mut registry = BreakpointRegistry::from_specs(["segv", "sigsegv"]).unwrap();
        let mut recorder = Recorder::default();

        let fired =
            on_trace_event(&mut registry, &TraceEvent::segfault(0, None), &mut recorder).unwrap();
        assert_eq!(fired, Some(0));
        assert_eq!(recorder.fired, ["segv"]);
        assert_eq!(registry.get(1).unwrap().hit_count, 0);
    }

    #[test]
    fn test_entry_condition() {
        let mut registry = BreakpointRegistry::from_specs(["oid=9", "entry"]).unwrap();
        let mut recorder = Recorder::default();

        let fired =
            on_trace_event(&mut registry, &TraceEvent::entry(0), &mut recorder).unwrap();
        assert_eq!(fired, Some(1));
    }

    #[test]
    fn test_unresolved_symbol_is_internal_error() {
        let mut registry = BreakpointRegistry::from_specs(["addr=main"]).unwrap();
        let mut recorder = Recorder::default();
        let event = TraceEvent::operation(Phase::Before, 1, 0x1000);

        let err = on_trace_event(&mut registry, &event, &mut recorder).unwrap_err();
        assert!(matches!(err, TriggerError::UnresolvedSymbol { .. }));
    }

    #[test]
    fn test_addressless_event_skips_unresolved_address() {
        // 解決前に届いたSIGSEGVでも、アドレス条件は評価されずsegvが発火する
        let mut registry = BreakpointRegistry::from_specs(["addr=main", "segv"]).unwrap();
        let mut recorder = Recorder::default();

        let fired =
            on_trace_event(&mut registry, &TraceEvent::segfault(0, None), &mut recorder).unwrap();
        assert_eq!(fired, Some(1));
        assert_eq!(recorder.fired, ["segv"]);
        assert_eq!(registry.get(0).unwrap().hit_count, 0);
    }

    #[test]
    fn test_entry_event_does_not_count_address_breakpoint() {
        let mut registry = BreakpointRegistry::from_specs(["addr=0x401000", "entry"]).unwrap();
        let mut recorder = Recorder::default();

        on_trace_event(&mut registry, &TraceEvent::entry(0), &mut recorder).unwrap();
        assert_eq!(registry.get(0).unwrap().hit_count, 0);
        assert_eq!(recorder.fired, ["entry"]);
    }

    #[test]
    fn test_handoff_failure_propagates() {
        let mut registry = BreakpointRegistry::from_specs(["segv"]).unwrap();
        let err = on_trace_event(&mut registry, &TraceEvent::segfault(0, None), &mut Failing)
            .unwrap_err();
        assert!(matches!(err, TriggerError::Handoff(HandoffError::Exec { .. })));
    }
}
