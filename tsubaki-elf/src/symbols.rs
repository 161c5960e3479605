//! シンボルテーブル

use crate::{ElfLoader, Result};
use object::{Object, ObjectSymbol};
use std::collections::HashMap;
use tracing::debug;

/// シンボルの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    /// このイメージ内に定義されたシンボル（.symtab または .dynsym）
    Static,
    /// .dynsym にインポートとしてのみ存在するシンボル（PLT/GOT経由）
    Dynamic,
}

/// シンボル情報
#[derive(Debug, Clone)]
pub struct Symbol {
    /// マングルされたシンボル名
    pub name: String,
    /// デマングルされたシンボル名（可読な形式）
    pub demangled_name: String,
    pub kind: SymbolKind,
    /// イメージ先頭からのオフセット
    pub offset: u64,
    pub size: u64,
}

impl Symbol {
    /// シンボルを作成し、デマングルされた名前を設定する
    pub fn new(name: String, kind: SymbolKind, offset: u64, size: u64) -> Self {
        let demangled_name = demangle_symbol(&name);
        Self {
            name,
            demangled_name,
            kind,
            offset,
            size,
        }
    }

    /// 表示用の名前を取得
    pub fn display_name(&self) -> &str {
        &self.demangled_name
    }

    pub fn is_static(&self) -> bool {
        self.kind == SymbolKind::Static
    }
}

/// シンボル名をデマングルする
fn demangle_symbol(name: &str) -> String {
    if let Ok(demangled) = rustc_demangle::try_demangle(name) {
        return format!("{:#}", demangled);
    }
    name.to_string()
}

/// シンボル解決
///
/// 名前の完全一致で引けるシンボルテーブル。
/// マングルされた名前で見つからない場合は、デマングルされた名前でも検索します。
/// 同名のシンボルがある場合は先に登録された方（.symtab、次に .dynsym の定義）を優先します。
#[derive(Debug, Default)]
pub struct SymbolResolver {
    symbols_by_name: HashMap<String, Symbol>,
    /// デマングルされた名前 -> マングルされた名前
    demangled_names: HashMap<String, String>,
}

impl SymbolResolver {
    /// ELFローダーからシンボルテーブルを構築する
    pub fn new(loader: &ElfLoader) -> Result<Self> {
        let object_file = loader.object_file();
        let image_base = loader.image_base();
        let mut resolver = Self::default();

        for symbol in object_file.symbols() {
            if symbol.is_undefined() {
                continue;
            }
            if let Ok(name) = symbol.name() {
                if !name.is_empty() {
                    resolver.insert(Symbol::new(
                        name.to_string(),
                        SymbolKind::Static,
                        symbol.address().wrapping_sub(image_base),
                        symbol.size(),
                    ));
                }
            }
        }

        // strip済みの共有ライブラリは .dynsym にしか定義がない。
        // 未定義の動的シンボル（インポート）も警告のために登録しておく
        for symbol in object_file.dynamic_symbols() {
            if let Ok(name) = symbol.name() {
                if name.is_empty() || resolver.symbols_by_name.contains_key(name) {
                    continue;
                }
                let (kind, offset) = if symbol.is_undefined() {
                    (SymbolKind::Dynamic, 0)
                } else {
                    (SymbolKind::Static, symbol.address().wrapping_sub(image_base))
                };
                resolver.insert(Symbol::new(name.to_string(), kind, offset, symbol.size()));
            }
        }

        debug!("Loaded {} symbols from {:?}", resolver.len(), loader.path());
        Ok(resolver)
    }

    /// シンボル列から直接構築する
    pub fn from_symbols<I: IntoIterator<Item = Symbol>>(symbols: I) -> Self {
        let mut resolver = Self::default();
        for symbol in symbols {
            resolver.insert(symbol);
        }
        resolver
    }

    fn insert(&mut self, symbol: Symbol) {
        if symbol.demangled_name != symbol.name {
            self.demangled_names
                .entry(symbol.demangled_name.clone())
                .or_insert_with(|| symbol.name.clone());
        }
        // 先に登録された方を残す
        self.symbols_by_name
            .entry(symbol.name.clone())
            .or_insert(symbol);
    }

    /// 名前の完全一致でシンボルを検索する
    ///
    /// マングルされた名前を優先し、なければデマングルされた名前で探します。
    pub fn lookup(&self, name: &str) -> Option<&Symbol> {
        self.symbols_by_name.get(name).or_else(|| {
            self.demangled_names
                .get(name)
                .and_then(|mangled| self.symbols_by_name.get(mangled))
        })
    }

    /// 登録されているシンボル数
    pub fn len(&self) -> usize {
        self.symbols_by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols_by_name.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_exact_match() {
        let resolver = SymbolResolver::from_symbols(vec![
            Symbol::new("main".to_string(), SymbolKind::Static, 0x1139, 0x20),
            Symbol::new("malloc".to_string(), SymbolKind::Dynamic, 0, 0),
        ]);

        assert_eq!(resolver.lookup("main").map(|s| s.offset), Some(0x1139));
        assert!(resolver.lookup("mai").is_none());
        assert!(!resolver.lookup("malloc").unwrap().is_static());
    }

    #[test]
    fn test_static_symbol_wins_over_dynamic() {
        let resolver = SymbolResolver::from_symbols(vec![
            Symbol::new("free".to_string(), SymbolKind::Static, 0x2000, 0),
            Symbol::new("free".to_string(), SymbolKind::Dynamic, 0, 0),
        ]);

        assert_eq!(resolver.len(), 1);
        assert!(resolver.lookup("free").unwrap().is_static());
    }

    #[test]
    fn test_demangled_display_name() {
        let sym = Symbol::new(
            "_ZN4core3ptr13drop_in_place17h0123456789abcdefE".to_string(),
            SymbolKind::Static,
            0,
            0,
        );
        assert_eq!(sym.display_name(), "core::ptr::drop_in_place");
    }

    #[test]
    fn test_lookup_by_demangled_name() {
        let mangled = "_ZN7tracee9operation17h0123456789abcdefE";
        let resolver = SymbolResolver::from_symbols(vec![
            Symbol::new(mangled.to_string(), SymbolKind::Static, 0x1500, 0x10),
            Symbol::new("malloc".to_string(), SymbolKind::Dynamic, 0, 0),
        ]);

        let sym = resolver.lookup("tracee::operation").unwrap();
        assert_eq!(sym.name, mangled);
        assert_eq!(sym.offset, 0x1500);
        assert_eq!(resolver.lookup(mangled).map(|s| s.offset), Some(0x1500));
        // C の名前はそのまま
        assert!(resolver.lookup("malloc").is_some());
    }
}
