//! ブレークポイント記述子

use crate::errors::TriggerError;
use crate::event::{ProcessState, TraceEvent};

/// アドレス項の符号
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sign {
    Add,
    Subtract,
}

impl Sign {
    /// `-` を1つ適用した符号
    pub fn negate(self) -> Self {
        match self {
            Sign::Add => Sign::Subtract,
            Sign::Subtract => Sign::Add,
        }
    }
}

/// アドレス項の値
///
/// パース直後のシンボルは `UnresolvedSymbol`、シンボル解決後は `ResolvedSymbol` になります。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TermValue {
    /// 整数リテラル: `0x10`
    Literal(u64),
    /// 未解決のシンボル名: `main`
    UnresolvedSymbol(String),
    /// 解決済みのシンボルアドレス
    ResolvedSymbol(u64),
}

/// 符号付きのアドレス項
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressTerm {
    pub sign: Sign,
    pub value: TermValue,
}

impl AddressTerm {
    pub fn new(sign: Sign, value: TermValue) -> Self {
        Self { sign, value }
    }

    /// 未解決のシンボル名（解決済みならNone）
    pub fn unresolved_symbol(&self) -> Option<&str> {
        match &self.value {
            TermValue::UnresolvedSymbol(name) => Some(name),
            _ => None,
        }
    }
}

/// 条件を判定するタイミング
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    /// 操作の前
    #[default]
    Before,
    /// 操作の後
    After,
}

/// ブレークポイントの条件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    /// アドレス式の値が現在の停止アドレスと一致する
    Address(Vec<AddressTerm>),
    /// 操作番号が一致する
    OperationId(u64),
    /// プロセスがセグメンテーション違反を起こした
    Segfault,
    /// プロセスがエントリポイントに到達した
    EntryPoint,
}

/// ブレークポイント記述子
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakpointSpec {
    /// 元の指定文字列（診断用）
    pub name: String,
    pub condition: Condition,
    pub phase: Phase,
    /// 発火に必要なヒット回数（1以上）
    pub trigger_threshold: u64,
    /// これまでのヒット回数
    pub hit_count: u64,
}

impl BreakpointSpec {
    /// デフォルト値（Before, 閾値1）でブレークポイントを作成する
    pub fn new(name: impl Into<String>, condition: Condition) -> Self {
        Self {
            name: name.into(),
            condition,
            phase: Phase::Before,
            trigger_threshold: 1,
            hit_count: 0,
        }
    }

    /// アドレス式（Address条件の場合のみ）
    pub fn address_terms(&self) -> Option<&[AddressTerm]> {
        match &self.condition {
            Condition::Address(terms) => Some(terms),
            _ => None,
        }
    }

    /// アドレス式を評価する
    ///
    /// Address条件でなければ `Ok(None)` を返します。
    /// 未解決のシンボルが残っている場合は内部エラーです。
    pub fn target_address(&self) -> Result<Option<u64>, TriggerError> {
        let Some(terms) = self.address_terms() else {
            return Ok(None);
        };

        let mut address = 0u64;
        for term in terms {
            let value = match &term.value {
                TermValue::Literal(value) | TermValue::ResolvedSymbol(value) => *value,
                TermValue::UnresolvedSymbol(symbol) => {
                    return Err(TriggerError::UnresolvedSymbol {
                        breakpoint: self.name.clone(),
                        symbol: symbol.clone(),
                    });
                }
            };

            address = match term.sign {
                Sign::Add => address.wrapping_add(value),
                Sign::Subtract => address.wrapping_sub(value),
            };
        }

        Ok(Some(address))
    }

    /// トレースイベントに対して条件が成立するか判定する
    pub fn matches(&self, event: &TraceEvent) -> Result<bool, TriggerError> {
        if self.phase != event.phase {
            return Ok(false);
        }

        Ok(match &self.condition {
            Condition::OperationId(oid) => event.oid == *oid,
            Condition::Segfault => event.state == ProcessState::Segfault,
            Condition::EntryPoint => event.state == ProcessState::Entry,
            Condition::Address(_) => {
                event.address.is_some() && event.address == self.target_address()?
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address_spec(terms: Vec<AddressTerm>) -> BreakpointSpec {
        BreakpointSpec::new("test", Condition::Address(terms))
    }

    #[test]
    fn test_target_address_accumulates_left_to_right() {
        let spec = address_spec(vec![
            AddressTerm::new(Sign::Add, TermValue::ResolvedSymbol(0x1000)),
            AddressTerm::new(Sign::Add, TermValue::Literal(0x20)),
            AddressTerm::new(Sign::Subtract, TermValue::Literal(0x8)),
        ]);
        assert_eq!(spec.target_address().unwrap(), Some(0x1018));
    }

    #[test]
    fn test_target_address_wraps() {
        let spec = address_spec(vec![AddressTerm::new(Sign::Subtract, TermValue::Literal(1))]);
        assert_eq!(spec.target_address().unwrap(), Some(u64::MAX));
    }

    #[test]
    fn test_target_address_rejects_unresolved() {
        let spec = address_spec(vec![AddressTerm::new(
            Sign::Add,
            TermValue::UnresolvedSymbol("main".to_string()),
        )]);
        assert!(matches!(
            spec.target_address(),
            Err(TriggerError::UnresolvedSymbol { ref symbol, .. }) if symbol == "main"
        ));
    }

    #[test]
    fn test_non_address_condition_has_no_target() {
        let spec = BreakpointSpec::new("segv", Condition::Segfault);
        assert_eq!(spec.target_address().unwrap(), None);
        assert!(spec.address_terms().is_none());
    }

    #[test]
    fn test_matches_respects_phase() {
        let spec = BreakpointSpec::new("oid=3", Condition::OperationId(3));
        let before = TraceEvent::operation(Phase::Before, 3, 0x1000);
        let after = TraceEvent::operation(Phase::After, 3, 0x1000);

        assert!(spec.matches(&before).unwrap());
        assert!(!spec.matches(&after).unwrap());
    }

    #[test]
    fn test_matches_address_requires_event_address() {
        let spec = address_spec(vec![AddressTerm::new(Sign::Add, TermValue::Literal(0))]);
        let event = TraceEvent {
            phase: Phase::Before,
            oid: 0,
            state: ProcessState::Running,
            address: None,
        };
        assert!(!spec.matches(&event).unwrap());
    }
}
