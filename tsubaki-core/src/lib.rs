//! Tsubaki のコア機能
//!
//! このクレートは、ユーザーブレークポイントの字句解析・構文解析、シンボル解決、
//! トレースイベントごとのトリガー評価、デバッガへの引き渡しを提供します。
//! トレースループもここにあり、ターゲットプロセスの制御とELF解析を統合します。

pub mod breakpoint;
pub mod errors;
pub mod event;
pub mod handoff;
pub mod lexer;
pub mod parse;
pub mod registry;
pub mod resolve;
pub mod tracer;
pub mod trigger;

pub use breakpoint::{AddressTerm, BreakpointSpec, Condition, Phase, Sign, TermValue};
pub use errors::{SyntaxError, TriggerError};
pub use event::{ProcessState, TraceEvent};
pub use handoff::{DebuggerHandoff, Handoff, HandoffError};
pub use lexer::{tokenize, Token, TokenKind};
pub use parse::{parse, parse_expression};
pub use registry::BreakpointRegistry;
pub use resolve::{collect_referenced_symbol_names, resolve, ResolutionWarning, SegmentBases};
pub use tracer::{Tracer, TracerConfig, DEFAULT_TRACED_FUNCTIONS};
pub use trigger::on_trace_event;

// 他のクレートから使用するために再エクスポート
pub use tsubaki_elf::{Symbol, SymbolKind, SymbolResolver};

/// トレーサーの結果型
pub type Result<T> = anyhow::Result<T>;
