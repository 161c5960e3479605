//! メモリアクセス機能

use crate::Result;
use nix::unistd::Pid;
use std::fs::{File, OpenOptions};
use std::io::{Read as _, Seek, SeekFrom, Write as _};

/// メモリアクセス
pub struct Memory {
    pid: Pid,
}

impl Memory {
    /// メモリアクセスを作成する
    pub fn new(pid: i32) -> Self {
        Self {
            pid: Pid::from_raw(pid),
        }
    }

    /// /proc/pid/mem のパスを取得する
    fn mem_path(&self) -> String {
        format!("/proc/{}/mem", self.pid)
    }

    /// メモリからデータを読み取る
    ///
    /// /proc/pid/memを使用してターゲットプロセスのメモリを読み取ります。
    /// /proc/pid/memが使用できない場合（EIOエラー）、PTRACE_PEEKDATAにフォールバックします。
    pub fn read(&self, addr: usize, size: usize) -> Result<Vec<u8>> {
        match self.read_via_proc_mem(addr, size) {
            Ok(data) => Ok(data),
            Err(e) => {
                if let Some(io_err) = e.downcast_ref::<std::io::Error>() {
                    if io_err.raw_os_error() == Some(nix::libc::EIO) {
                        return self.read_via_ptrace(addr, size);
                    }
                }
                Err(e)
            }
        }
    }

    fn read_via_proc_mem(&self, addr: usize, size: usize) -> Result<Vec<u8>> {
        let mut file = File::open(self.mem_path())?;
        file.seek(SeekFrom::Start(addr as u64))?;

        let mut buffer = vec![0u8; size];
        file.read_exact(&mut buffer)?;

        Ok(buffer)
    }

    /// メモリにデータを書き込む
    ///
    /// /proc/pid/memは読み取り専用のテキストセグメントにも書き込めるため、
    /// INT3の埋め込みにそのまま使えます。
    pub fn write(&self, addr: usize, data: &[u8]) -> Result<()> {
        let mem_path = self.mem_path();
        let mut file = OpenOptions::new()
            .write(true)
            .open(&mem_path)
            .map_err(|e| anyhow::anyhow!("Failed to open {} for writing: {}", mem_path, e))?;

        file.seek(SeekFrom::Start(addr as u64))
            .map_err(|e| anyhow::anyhow!("Failed to seek to address 0x{:x}: {}", addr, e))?;

        file.write_all(data).map_err(|e| {
            anyhow::anyhow!("Failed to write {} bytes to 0x{:x}: {}", data.len(), addr, e)
        })?;

        Ok(())
    }

    /// u64値を読み取る（リトルエンディアン）
    pub fn read_u64(&self, addr: usize) -> Result<u64> {
        let bytes = self.read(addr, 8)?;
        let array: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
            anyhow::anyhow!("Failed to convert {} bytes to u64 array (expected 8 bytes)", bytes.len())
        })?;
        Ok(u64::from_le_bytes(array))
    }

    /// u8値を読み取る
    pub fn read_u8(&self, addr: usize) -> Result<u8> {
        self.read(addr, 1)?
            .first()
            .copied()
            .ok_or_else(|| anyhow::anyhow!("Cannot read u8 from empty bytes"))
    }

    /// u8値を書き込む
    pub fn write_u8(&self, addr: usize, value: u8) -> Result<()> {
        self.write(addr, &[value])
    }

    /// PTRACE_PEEKDATAを使用してメモリからデータを読み取る
    ///
    /// /proc/pid/memが使用できない場合のフォールバック。
    pub fn read_via_ptrace(&self, addr: usize, size: usize) -> Result<Vec<u8>> {
        use nix::sys::ptrace;

        let mut data = Vec::with_capacity(size);
        let word_size = std::mem::size_of::<usize>();

        for offset in (0..size).step_by(word_size) {
            let word_addr = (addr + offset) as *mut std::ffi::c_void;
            let word = ptrace::read(self.pid, word_addr).map_err(|e| {
                anyhow::anyhow!("Failed to read via ptrace at 0x{:x}: {}", addr + offset, e)
            })?;

            let bytes = word.to_ne_bytes();
            let copy_size = (size - offset).min(word_size);
            data.extend_from_slice(&bytes[..copy_size]);
        }

        data.truncate(size);
        Ok(data)
    }
}
