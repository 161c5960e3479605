//! ソフトウェアブレークポイント（INT3）

use crate::{Memory, Process, Registers, Result, StopReason};
use nix::sys::signal::Signal;
use std::collections::HashMap;
use tracing::{debug, warn};

/// INT3命令のオペコード
const INT3_OPCODE: u8 = 0xCC;

/// ソフトウェアブレークポイント（INT3命令）
pub struct SoftwareBreakpoint {
    address: u64,
    original_byte: u8,
    enabled: bool,
}

impl SoftwareBreakpoint {
    /// ブレークポイントを作成する
    pub fn new(address: u64) -> Self {
        Self {
            address,
            original_byte: 0,
            enabled: false,
        }
    }

    /// ブレークポイントを設定する
    ///
    /// 指定されたアドレスの命令を0xCC（INT3）で置き換えます。
    pub fn enable(&mut self, memory: &Memory) -> Result<()> {
        if self.enabled {
            return Ok(());
        }

        self.original_byte = memory.read_u8(self.address as usize)?;
        memory.write_u8(self.address as usize, INT3_OPCODE)?;

        self.enabled = true;
        Ok(())
    }

    /// ブレークポイントを解除する
    ///
    /// INT3命令を元のバイトで置き換えます。
    pub fn disable(&mut self, memory: &Memory) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        memory.write_u8(self.address as usize, self.original_byte)?;

        self.enabled = false;
        Ok(())
    }
}

/// [`TrapSet::step_over`] の結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOver {
    /// ステップ完了時の停止理由（正常に踏み越えた場合は `Trap`）
    pub stop: StopReason,
    /// ステップ中に届き、配送を保留したシグナル（到着順）
    pub deferred_signals: Vec<Signal>,
}

/// トレース対象に埋め込んだINT3の集合
///
/// アドレスごとに1つだけ保持します。
#[derive(Default)]
pub struct TrapSet {
    traps: HashMap<u64, SoftwareBreakpoint>,
}

impl TrapSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// トラップを追加して有効化する
    ///
    /// 既に同じアドレスにトラップがある場合は何もせず `false` を返します。
    pub fn insert(&mut self, address: u64, memory: &Memory) -> Result<bool> {
        if self.traps.contains_key(&address) {
            return Ok(false);
        }

        let mut trap = SoftwareBreakpoint::new(address);
        trap.enable(memory)?;
        self.traps.insert(address, trap);
        debug!("Trap installed at 0x{:x}", address);
        Ok(true)
    }

    /// トラップを無効化して削除する
    pub fn remove(&mut self, address: u64, memory: &Memory) -> Result<()> {
        if let Some(mut trap) = self.traps.remove(&address) {
            trap.disable(memory)?;
            debug!("Trap removed at 0x{:x}", address);
        }
        Ok(())
    }

    /// すべてのトラップを無効化して削除する
    ///
    /// 解除に失敗したトラップは集合に残したまま、残りの解除を続けます。
    pub fn remove_all(&mut self, memory: &Memory) -> Result<()> {
        let mut failed = 0;
        let mut first_error = None;

        for (address, mut trap) in std::mem::take(&mut self.traps) {
            if let Err(e) = trap.disable(memory) {
                warn!("Failed to remove trap at 0x{:x}: {}", address, e);
                failed += 1;
                first_error.get_or_insert(e);
                self.traps.insert(address, trap);
            }
        }

        match first_error {
            Some(e) => Err(e.context(format!("{} trap(s) are still armed", failed))),
            None => Ok(()),
        }
    }

    pub fn contains(&self, address: u64) -> bool {
        self.traps.contains_key(&address)
    }

    /// INT3でヒットした直後のプロセスを、トラップ位置の命令から再開できる状態にする
    ///
    /// 元のバイトを戻してPCをトラップ位置に巻き戻し、1命令だけ実行してから
    /// トラップを再設定します。
    ///
    /// ステップ中に届いたシグナルは配送せずに記録し、命令を実行し終えるまでステップを
    /// やり直します。記録したシグナルは呼び出し側が次の再開時に配送します。
    /// SIGSEGVは命令自体のフォールトなので、トラップを戻したうえでそのまま返します。
    /// プロセスが終了した場合はトラップを戻さずにその停止理由を返します。
    pub fn step_over(
        &mut self,
        address: u64,
        process: &Process,
        memory: &Memory,
        registers: &Registers,
    ) -> Result<StepOver> {
        let trap = self
            .traps
            .get_mut(&address)
            .ok_or_else(|| anyhow::anyhow!("No trap installed at 0x{:x}", address))?;

        trap.disable(memory)?;
        registers.set_pc(address)?;

        let mut deferred_signals = Vec::new();
        let stop = loop {
            match process.step()? {
                StopReason::Signal(Signal::SIGSEGV) => break StopReason::Signal(Signal::SIGSEGV),
                StopReason::Signal(signal) => {
                    debug!("Deferring {:?} received while stepping over 0x{:x}", signal, address);
                    deferred_signals.push(signal);
                }
                StopReason::Other => {}
                reason => break reason,
            }
        };

        if matches!(stop, StopReason::Trap | StopReason::Signal(_)) {
            trap.enable(memory)?;
        }
        Ok(StepOver {
            stop,
            deferred_signals,
        })
    }
}
