//! Tsubaki ELF解析
//!
//! このクレートは、トレース対象のELFファイルの解析機能を提供します。
//! エントリポイントやイメージ先頭アドレスの取得、静的/動的シンボルテーブルの構築を行います。

pub mod loader;
pub mod symbols;

pub use loader::ElfLoader;
pub use symbols::{Symbol, SymbolKind, SymbolResolver};

/// ELF解析の結果型
pub type Result<T> = anyhow::Result<T>;
