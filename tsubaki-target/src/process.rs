//! プロセス制御機能

use crate::Result;
use nix::sys::ptrace;
use nix::sys::signal::Signal;
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::Pid;
use std::ffi::CString;
use std::path::{Path, PathBuf};

/// 停止イベントの種類
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// INT3またはステップ実行による停止（SIGTRAP）
    Trap,
    /// シグナル受信による停止
    Signal(Signal),
    /// プロセス終了
    Exited(i32),
    /// シグナルによる終了
    Signaled(Signal),
    /// その他の停止
    Other,
}

impl From<WaitStatus> for StopReason {
    fn from(status: WaitStatus) -> Self {
        match status {
            WaitStatus::Stopped(_, Signal::SIGTRAP) => StopReason::Trap,
            WaitStatus::Stopped(_, signal) => StopReason::Signal(signal),
            WaitStatus::Exited(_, code) => StopReason::Exited(code),
            WaitStatus::Signaled(_, signal, _) => StopReason::Signaled(signal),
            _ => StopReason::Other,
        }
    }
}

/// トレース対象のプロセス
pub struct Process {
    pid: Pid,
}

impl Process {
    /// 実行可能ファイルを起動してトレース対象プロセスを開始する
    ///
    /// 新しいプロセスをforkして起動し、PTRACE_TRACEMEを設定してから
    /// 指定された実行可能ファイルをexecveで実行します。
    /// プロセスはexecve直後の停止状態で返されます。
    /// この時点でメインバイナリと動的リンカはマップ済みですが、libcはまだロードされていません。
    pub fn spawn<P: AsRef<Path>>(program: P, args: &[String]) -> Result<Self> {
        use nix::unistd::{execve, fork, ForkResult};

        let program_path = program
            .as_ref()
            .to_str()
            .ok_or_else(|| anyhow::anyhow!("Invalid program path"))?;
        let program_cstring = CString::new(program_path)?;

        let mut cstring_args = vec![program_cstring.clone()];
        for arg in args {
            cstring_args.push(CString::new(arg.as_str())?);
        }

        // 環境変数は親プロセスから継承
        let env: Vec<CString> = std::env::vars()
            .map(|(key, val)| {
                CString::new(format!("{}={}", key, val)).map_err(anyhow::Error::from)
            })
            .collect::<Result<Vec<_>>>()?;

        match unsafe { fork()? } {
            ForkResult::Parent { child } => match waitpid(child, None)? {
                WaitStatus::Stopped(_, _) => Ok(Self { pid: child }),
                status => Err(anyhow::anyhow!(
                    "Unexpected wait status after execve: {:?}",
                    status
                )),
            },
            ForkResult::Child => {
                // 子プロセスではエラーを呼び出し元に返さず、その場で終了する
                if ptrace::traceme().is_ok() {
                    // execveを実行（成功すると戻ってこない）
                    let _ = execve(&program_cstring, &cstring_args, &env);
                }
                unsafe { nix::libc::_exit(127) }
            }
        }
    }

    /// 既存のプロセスにアタッチし、停止するまで待機する
    pub fn attach(pid: i32) -> Result<Self> {
        let pid = Pid::from_raw(pid);
        ptrace::attach(pid)?;
        match waitpid(pid, None)? {
            WaitStatus::Stopped(_, _) => Ok(Self { pid }),
            status => Err(anyhow::anyhow!(
                "Unexpected wait status after attach: {:?}",
                status
            )),
        }
    }

    /// プロセスIDを取得する
    pub fn pid(&self) -> i32 {
        self.pid.as_raw()
    }

    /// 実行ファイルのパスを取得する（/proc/pid/exe）
    pub fn exe_path(&self) -> Result<PathBuf> {
        let link = format!("/proc/{}/exe", self.pid);
        std::fs::read_link(&link).map_err(|e| anyhow::anyhow!("Failed to read {}: {}", link, e))
    }

    /// プロセスを実行継続して停止イベントを待機する
    ///
    /// `signal` が指定された場合は、そのシグナルを配送してから再開します。
    pub fn continue_and_wait(&self, signal: Option<Signal>) -> Result<StopReason> {
        ptrace::cont(self.pid, signal)?;
        let status = waitpid(self.pid, None)?;
        Ok(status.into())
    }

    /// 1命令だけ実行して停止する（ステップ実行）
    pub fn step(&self) -> Result<StopReason> {
        ptrace::step(self.pid, None)?;
        let status = waitpid(self.pid, None)?;
        Ok(status.into())
    }

    /// 停止状態のままデタッチする
    ///
    /// SIGSTOPを配送してデタッチするので、プロセスは停止したまま残り
    /// 別のデバッガからアタッチできます。
    pub fn detach_stopped(&self) -> Result<()> {
        ptrace::detach(self.pid, Some(Signal::SIGSTOP))?;
        Ok(())
    }
}

impl Drop for Process {
    fn drop(&mut self) {
        let _ = ptrace::detach(self.pid, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_reason_from_wait_status() {
        let pid = Pid::from_raw(1);
        assert_eq!(
            StopReason::from(WaitStatus::Stopped(pid, Signal::SIGTRAP)),
            StopReason::Trap
        );
        assert_eq!(
            StopReason::from(WaitStatus::Stopped(pid, Signal::SIGSEGV)),
            StopReason::Signal(Signal::SIGSEGV)
        );
        assert_eq!(
            StopReason::from(WaitStatus::Exited(pid, 3)),
            StopReason::Exited(3)
        );
        assert_eq!(
            StopReason::from(WaitStatus::Signaled(pid, Signal::SIGKILL, false)),
            StopReason::Signaled(Signal::SIGKILL)
        );
    }
}
