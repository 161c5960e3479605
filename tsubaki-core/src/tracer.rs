//! トレースループ
//!
//! トレース対象を実行しながらイベントを生成し、ブレークポイントを評価します。

use crate::breakpoint::{Condition, Phase};
use crate::event::TraceEvent;
use crate::handoff::DebuggerHandoff;
use crate::registry::BreakpointRegistry;
use crate::resolve::{collect_referenced_symbol_names, resolve, SegmentBases};
use crate::trigger::on_trace_event;
use crate::Result;
use nix::sys::signal::Signal;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use tsubaki_elf::{ElfLoader, SymbolResolver};
use tsubaki_target::{Memory, Process, Registers, SegmentMap, StopReason, TrapSet};

/// 操作として数える既定の関数
pub const DEFAULT_TRACED_FUNCTIONS: [&str; 4] = ["malloc", "calloc", "realloc", "free"];

/// トレーサーの設定
#[derive(Debug, Clone)]
pub struct TracerConfig {
    /// 発火時に起動するデバッガ
    pub gdb_path: PathBuf,
    /// 呼び出しを操作として数える関数名
    pub traced_functions: Vec<String>,
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            gdb_path: PathBuf::from("/usr/bin/gdb"),
            traced_functions: DEFAULT_TRACED_FUNCTIONS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// 停止イベント処理後の動作
enum Flow {
    /// 指定したシグナルを配送して再開
    Continue(Option<Signal>),
    /// トレース対象が終了した
    Exit(i32),
}

/// トレーサー
pub struct Tracer {
    config: TracerConfig,
    registry: BreakpointRegistry,
    /// トレース対象プロセス
    process: Process,
    memory: Memory,
    registers: Registers,
    /// ELF情報ローダー
    elf: ElfLoader,
    /// シンボル解決器
    symbols: SymbolResolver,
    /// libcのシンボル（最初に必要になった時に読み込む）
    libc_symbols: Option<SymbolResolver>,
    /// 埋め込んだINT3
    traps: TrapSet,
    /// エントリポイントのトラップ（到達前のみSome）
    entry_trap: Option<u64>,
    /// 関数アドレス -> 関数名
    operations: HashMap<u64, String>,
    /// 戻りアドレス -> 呼び出し時の操作番号（再帰呼び出し用にスタック）
    pending_returns: HashMap<u64, Vec<u64>>,
    /// Address条件のためだけに置いたトラップ
    address_traps: HashSet<u64>,
    /// 現在の操作番号
    oid: u64,
    /// シンボル解決が済んだか
    resolved: bool,
    /// トラップを踏み越える間に届き、まだ配送していないシグナル
    pending_signals: VecDeque<Signal>,
}

impl Tracer {
    /// 実行可能ファイルを起動してトレースを開始する
    ///
    /// プロセスはexecve直後で停止しており、エントリポイントにトラップを置いた状態で返ります。
    pub fn spawn<P: AsRef<Path>>(
        program: P,
        args: &[String],
        registry: BreakpointRegistry,
        config: TracerConfig,
    ) -> Result<Self> {
        let elf = ElfLoader::load(&program)?;
        let symbols = SymbolResolver::new(&elf)?;
        let process = Process::spawn(&program, args)?;
        info!("Spawned {} as pid {}", program.as_ref().display(), process.pid());

        let mut tracer = Self::new(process, elf, symbols, registry, config);

        let segments = SegmentMap::read(tracer.process.pid())?;
        let binary_base = tracer.binary_base(&segments)?;
        let entry = binary_base.wrapping_add(tracer.elf.entry_offset());
        tracer.traps.insert(entry, &tracer.memory)?;
        tracer.entry_trap = Some(entry);
        debug!("Entry point trap at 0x{:x}", entry);

        Ok(tracer)
    }

    /// 既存のプロセスにアタッチしてトレースを開始する
    ///
    /// エントリポイントは既に過ぎているので、その場でシンボルを解決します。
    /// Entryイベントは発生しません。
    pub fn attach(pid: i32, registry: BreakpointRegistry, config: TracerConfig) -> Result<Self> {
        let process = Process::attach(pid)?;
        let exe = process.exe_path()?;
        let elf = ElfLoader::load(&exe)?;
        let symbols = SymbolResolver::new(&elf)?;
        info!("Attached to pid {} ({})", pid, exe.display());

        let mut tracer = Self::new(process, elf, symbols, registry, config);
        tracer.prepare()?;
        Ok(tracer)
    }

    fn new(
        process: Process,
        elf: ElfLoader,
        symbols: SymbolResolver,
        registry: BreakpointRegistry,
        config: TracerConfig,
    ) -> Self {
        let pid = process.pid();
        Self {
            config,
            registry,
            process,
            memory: Memory::new(pid),
            registers: Registers::new(pid),
            elf,
            symbols,
            libc_symbols: None,
            traps: TrapSet::new(),
            entry_trap: None,
            operations: HashMap::new(),
            pending_returns: HashMap::new(),
            address_traps: HashSet::new(),
            oid: 0,
            resolved: false,
            pending_signals: VecDeque::new(),
        }
    }

    /// プロセスIDを取得する
    pub fn pid(&self) -> i32 {
        self.process.pid()
    }

    /// これまでに数えた操作の数（現在の操作番号）
    pub fn oid(&self) -> u64 {
        self.oid
    }

    /// トレース対象が終了するまで実行する
    ///
    /// 終了コード（シグナルで終了した場合は128+シグナル番号）を返します。
    /// ブレークポイントが発火した場合はデバッガに置き換わるので戻りません。
    pub fn run(&mut self) -> Result<i32> {
        let mut signal = None;
        loop {
            let deliver = signal.take().or_else(|| self.pending_signals.pop_front());
            let reason = self.process.continue_and_wait(deliver)?;
            match self.dispatch(reason)? {
                Flow::Continue(next) => signal = next,
                Flow::Exit(code) => return Ok(code),
            }
        }
    }

    fn dispatch(&mut self, reason: StopReason) -> Result<Flow> {
        match reason {
            StopReason::Trap => match self.handle_trap()? {
                Some(next) => self.dispatch(next),
                None => Ok(Flow::Continue(None)),
            },
            StopReason::Signal(Signal::SIGSEGV) => {
                // 解決前のアドレスは比較できないので、アドレス条件には渡さない
                let pc = if self.resolved {
                    self.registers.get_pc().ok()
                } else {
                    None
                };
                warn!("Process {} received SIGSEGV", self.pid());
                self.emit(TraceEvent::segfault(self.oid, pc))?;
                Ok(Flow::Continue(Some(Signal::SIGSEGV)))
            }
            StopReason::Signal(signal) => {
                debug!("Forwarding {:?} to process {}", signal, self.pid());
                Ok(Flow::Continue(Some(signal)))
            }
            StopReason::Exited(code) => {
                info!("Process {} exited with status {}", self.pid(), code);
                Ok(Flow::Exit(code))
            }
            StopReason::Signaled(signal) => {
                info!("Process {} terminated by {:?}", self.pid(), signal);
                Ok(Flow::Exit(128 + signal as i32))
            }
            StopReason::Other => Ok(Flow::Continue(None)),
        }
    }

    /// SIGTRAPを処理する
    ///
    /// トラップを踏み越える途中でプロセスが別の理由で停止した場合は、その停止理由を返します。
    fn handle_trap(&mut self) -> Result<Option<StopReason>> {
        let pc = self.registers.get_pc()?;
        let address = pc.wrapping_sub(1);
        if !self.traps.contains(address) {
            debug!("Ignoring SIGTRAP at 0x{:x}", pc);
            return Ok(None);
        }

        if self.entry_trap == Some(address) {
            self.entry_trap = None;
            self.traps.remove(address, &self.memory)?;
            self.registers.set_pc(address)?;
            // libcがマップされた後なので、ここで解決する
            self.prepare()?;
            self.emit(TraceEvent::entry(self.oid))?;
            return Ok(None);
        }

        let returning = self.pop_pending_return(address);
        if let Some(oid) = returning {
            self.emit(TraceEvent::operation(Phase::After, oid, address))?;
        }

        if self.operations.contains_key(&address) {
            self.oid += 1;
            self.emit(TraceEvent::operation(Phase::Before, self.oid, address))?;
            self.arm_return_trap()?;
        } else if self.address_traps.contains(&address) {
            self.emit(TraceEvent::operation(Phase::Before, self.oid, address))?;
        }

        if self.is_needed(address) {
            let step = self
                .traps
                .step_over(address, &self.process, &self.memory, &self.registers)?;
            self.pending_signals.extend(step.deferred_signals);
            if step.stop != StopReason::Trap {
                return Ok(Some(step.stop));
            }
        } else {
            // 役目を終えた戻りトラップ
            self.traps.remove(address, &self.memory)?;
            self.registers.set_pc(address)?;
        }

        Ok(None)
    }

    /// まだトラップを残す必要があるアドレスか
    fn is_needed(&self, address: u64) -> bool {
        self.operations.contains_key(&address)
            || self.address_traps.contains(&address)
            || self.pending_returns.contains_key(&address)
    }

    fn pop_pending_return(&mut self, address: u64) -> Option<u64> {
        let stack = self.pending_returns.get_mut(&address)?;
        let oid = stack.pop();
        if stack.is_empty() {
            self.pending_returns.remove(&address);
        }
        oid
    }

    /// 関数の入口で、戻りアドレスに一時的なトラップを置く
    fn arm_return_trap(&mut self) -> Result<()> {
        let sp = self.registers.get_sp()?;
        let return_address = self.memory.read_u64(sp as usize)?;
        self.traps.insert(return_address, &self.memory)?;
        self.pending_returns
            .entry(return_address)
            .or_default()
            .push(self.oid);
        Ok(())
    }

    /// ブレークポイントを評価する
    fn emit(&mut self, event: TraceEvent) -> Result<()> {
        let mut handoff = DebuggerHandoff::new(
            &self.config.gdb_path,
            &self.process,
            &self.memory,
            &mut self.traps,
        );
        if let Some(index) = on_trace_event(&mut self.registry, &event, &mut handoff)? {
            return Err(anyhow::anyhow!(
                "debugger hand-off for breakpoint #{} returned without replacing the tracer",
                index
            ));
        }
        Ok(())
    }

    /// メインバイナリのロードベースアドレス
    fn binary_base(&self, segments: &SegmentMap) -> Result<u64> {
        let exe = self.process.exe_path()?;
        segments
            .base_of(&exe)
            .ok_or_else(|| anyhow::anyhow!("cannot find binary base address for {}", exe.display()))
    }

    /// シンボルを解決し、操作とアドレス条件のトラップを設置する
    fn prepare(&mut self) -> Result<()> {
        let segments = SegmentMap::read(self.pid())?;
        let bases = SegmentBases {
            binary_base: self.binary_base(&segments)?,
            libc_base: segments.libc_base(),
            is_dynamic: self.elf.is_dynamic(),
        };
        debug!("Segment bases: {:?}", bases);

        let referenced = collect_referenced_symbol_names(&self.registry);
        if !referenced.is_empty() {
            debug!("User breakpoints reference symbols: {}", referenced.join(", "));
        }
        resolve(&mut self.registry, &self.symbols, &bases);
        self.resolved = true;

        self.install_operation_traps(&segments, bases.binary_base);
        self.install_address_traps(&segments)?;
        Ok(())
    }

    /// トレース対象の関数の入口にトラップを置く
    ///
    /// メインバイナリに定義がなければlibcから探します。
    fn install_operation_traps(&mut self, segments: &SegmentMap, binary_base: u64) {
        let names = self.config.traced_functions.clone();
        for name in &names {
            let address = match self.symbols.lookup(name) {
                Some(symbol) if symbol.is_static() => {
                    debug!("Tracing {} in the target binary", symbol.display_name());
                    binary_base.wrapping_add(symbol.offset)
                }
                _ => match self.libc_address(name, segments) {
                    Some(address) => {
                        debug!("Tracing {} in libc", name);
                        address
                    }
                    None => {
                        debug!("Traced function {} not present in target", name);
                        continue;
                    }
                },
            };

            match self.traps.insert(address, &self.memory) {
                Ok(_) => {
                    self.operations.insert(address, name.clone());
                }
                Err(e) => warn!("cannot trace {} at 0x{:x}: {}", name, address, e),
            }
        }

        if self.operations.is_empty() && !names.is_empty() {
            warn!(
                "none of the traced functions ({}) were found; operation ids will stay at 0",
                names.join(", ")
            );
        }
    }

    /// libcに定義された関数のアドレス
    fn libc_address(&mut self, name: &str, segments: &SegmentMap) -> Option<u64> {
        let base = segments.libc_base()?;
        if self.libc_symbols.is_none() {
            let path = segments.libc_path()?;
            let symbols = match ElfLoader::load(path).and_then(|elf| SymbolResolver::new(&elf)) {
                Ok(symbols) => symbols,
                Err(e) => {
                    warn!("cannot read libc symbols from {}: {:#}", path, e);
                    SymbolResolver::default()
                }
            };
            self.libc_symbols = Some(symbols);
        }

        let symbol = self.libc_symbols.as_ref()?.lookup(name)?;
        symbol
            .is_static()
            .then(|| base.wrapping_add(symbol.offset))
    }

    fn install_address_traps(&mut self, segments: &SegmentMap) -> Result<()> {
        for bp in self.registry.iter() {
            if !matches!(bp.condition, Condition::Address(_)) {
                continue;
            }
            let Some(address) = bp.target_address()? else {
                continue;
            };

            if !segments.is_mapped(address) {
                warn!(
                    "user breakpoint \"{}\" evaluates to unmapped address 0x{:x}; it will never fire",
                    bp.name, address
                );
                continue;
            }

            match self.traps.insert(address, &self.memory) {
                Ok(_) => {
                    self.address_traps.insert(address);
                }
                Err(e) => warn!(
                    "cannot place user breakpoint \"{}\" at 0x{:x}: {}",
                    bp.name, address, e
                ),
            }
        }
        Ok(())
    }
}

impl Drop for Tracer {
    fn drop(&mut self) {
        // 異常終了時にもINT3を残さない
        let _ = self.traps.remove_all(&self.memory);
    }
}
