//! デバッガへの引き渡し

use crate::breakpoint::BreakpointSpec;
use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use thiserror::Error;
use tracing::error;
use tsubaki_target::{Memory, Process, TrapSet};

/// デバッガ引き渡しの失敗
#[derive(Debug, Error)]
pub enum HandoffError {
    #[error("failed to remove breakpoints from the traced process: {0:#}")]
    Instrumentation(anyhow::Error),

    #[error("failed to detach from process {pid}: {reason:#}")]
    Detach { pid: i32, reason: anyhow::Error },

    #[error("failed to execute debugger {path}: {reason}")]
    Exec { path: String, reason: nix::errno::Errno },

    #[error("invalid debugger path {0:?}")]
    InvalidPath(String),
}

/// ブレークポイント発火時の引き渡し処理
pub trait Handoff {
    /// トレース対象をデバッガに引き渡す
    ///
    /// 本番の実装はプロセスイメージを置き換えるので、成功した場合は戻りません。
    fn hand_off(&mut self, breakpoint: &BreakpointSpec) -> Result<(), HandoffError>;
}

/// `<gdb> -p <pid>` でトレーサー自身をデバッガに置き換える
pub struct DebuggerHandoff<'a> {
    gdb_path: &'a Path,
    process: &'a Process,
    memory: &'a Memory,
    traps: &'a mut TrapSet,
}

impl<'a> DebuggerHandoff<'a> {
    pub fn new(
        gdb_path: &'a Path,
        process: &'a Process,
        memory: &'a Memory,
        traps: &'a mut TrapSet,
    ) -> Self {
        Self {
            gdb_path,
            process,
            memory,
            traps,
        }
    }
}

impl Handoff for DebuggerHandoff<'_> {
    fn hand_off(&mut self, breakpoint: &BreakpointSpec) -> Result<(), HandoffError> {
        let pid = self.process.pid();
        let path_display = self.gdb_path.display().to_string();

        error!("    [   PROCESS PAUSED   ]");
        error!("    |   * user breakpoint \"{}\" hit {} time(s)", breakpoint.name, breakpoint.hit_count);
        error!("    |   * attaching debugger via: {} -p {}", path_display, pid);

        let path = CString::new(self.gdb_path.as_os_str().as_bytes())
            .map_err(|_| HandoffError::InvalidPath(path_display.clone()))?;
        // pidの文字列にNULが含まれることはない
        let args = [
            path.clone(),
            CString::from(c"-p"),
            CString::new(pid.to_string()).unwrap_or_default(),
        ];

        self.traps
            .remove_all(self.memory)
            .map_err(HandoffError::Instrumentation)?;
        self.process
            .detach_stopped()
            .map_err(|reason| HandoffError::Detach { pid, reason })?;

        // execvが成功すると戻ってこない
        match nix::unistd::execv(&path, &args) {
            Ok(never) => match never {},
            Err(reason) => Err(HandoffError::Exec {
                path: path_display,
                reason,
            }),
        }
    }
}
