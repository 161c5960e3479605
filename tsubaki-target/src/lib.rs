//! Tsubaki ターゲットプロセス制御
//!
//! このクレートは、トレース対象のプロセスを制御するための低レベル機能を提供します。
//! ptrace、レジスタアクセス、メモリアクセス、INT3の設定、セグメントマップの読み取りなどを行います。

pub mod process;
pub mod memory;
pub mod registers;
pub mod breakpoint;
pub mod maps;

pub use process::{Process, StopReason};
pub use memory::Memory;
pub use registers::Registers;
pub use breakpoint::{SoftwareBreakpoint, StepOver, TrapSet};
pub use maps::{MemoryMapping, SegmentMap};

/// ターゲット制御の結果型
pub type Result<T> = anyhow::Result<T>;
