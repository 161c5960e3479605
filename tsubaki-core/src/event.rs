//! トレースイベント

use crate::breakpoint::Phase;

/// イベント発生時のプロセス状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Running,
    /// SIGSEGVで停止している
    Segfault,
    /// エントリポイントで停止している
    Entry,
}

/// トレースループから渡されるイベント
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceEvent {
    pub phase: Phase,
    /// 現在の操作番号
    pub oid: u64,
    pub state: ProcessState,
    /// プロセスが停止している命令アドレス
    ///
    /// Address条件はこの値と比較されます。Noneのイベントには一致しません。
    pub address: Option<u64>,
}

impl TraceEvent {
    /// トレース対象の関数呼び出し（またはその戻り）
    pub fn operation(phase: Phase, oid: u64, address: u64) -> Self {
        Self {
            phase,
            oid,
            state: ProcessState::Running,
            address: Some(address),
        }
    }

    pub fn segfault(oid: u64, address: Option<u64>) -> Self {
        Self {
            phase: Phase::Before,
            oid,
            state: ProcessState::Segfault,
            address,
        }
    }

    /// エントリポイント到達
    ///
    /// エントリポイントの命令はこの後のトラップで改めて報告されるので、アドレスを持ちません。
    pub fn entry(oid: u64) -> Self {
        Self {
            phase: Phase::Before,
            oid,
            state: ProcessState::Entry,
            address: None,
        }
    }
}
