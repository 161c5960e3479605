//! レジスタアクセス機能

use crate::Result;
use nix::sys::ptrace;
use nix::unistd::Pid;

/// トレース対象のレジスタ（x86_64）
pub struct Registers {
    pid: Pid,
}

impl Registers {
    pub fn new(pid: i32) -> Self {
        Self {
            pid: Pid::from_raw(pid),
        }
    }

    /// プログラムカウンタ（RIP）を取得する
    pub fn get_pc(&self) -> Result<u64> {
        Ok(ptrace::getregs(self.pid)?.rip)
    }

    /// プログラムカウンタ（RIP）を設定する
    ///
    /// INT3で停止した直後はRIPがトラップの次を指しているので、トラップ位置に戻すのに使います。
    pub fn set_pc(&self, pc: u64) -> Result<()> {
        let mut regs = ptrace::getregs(self.pid)?;
        regs.rip = pc;
        ptrace::setregs(self.pid, regs)?;
        Ok(())
    }

    /// スタックポインタ（RSP）を取得する
    ///
    /// 関数の入口では [RSP] が戻りアドレスになります。
    pub fn get_sp(&self) -> Result<u64> {
        Ok(ptrace::getregs(self.pid)?.rsp)
    }
}
