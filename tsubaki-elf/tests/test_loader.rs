//! ELFローダーとシンボル解決のテスト
//!
//! テストバイナリ自身を解析対象にします。

use tsubaki_elf::{ElfLoader, SymbolKind, SymbolResolver};
use object::Object;

fn load_self() -> ElfLoader {
    let exe = std::env::current_exe().expect("Failed to get test binary path");
    ElfLoader::load(&exe).expect("Failed to load test binary")
}

#[test]
fn test_load_test_binary() {
    let loader = load_self();

    // エントリポイントはイメージ先頭より後ろにある
    assert!(loader.entry_offset() > 0);
    assert!(loader.object_file().entry() >= loader.image_base());
}

#[test]
fn test_resolve_main_as_static_symbol() {
    let loader = load_self();
    let resolver = SymbolResolver::new(&loader).expect("Failed to create symbol resolver");

    assert!(!resolver.is_empty());

    let main = resolver.lookup("main").expect("Should find main");
    println!("main @ offset 0x{:x} (size: {})", main.offset, main.size);
    assert_eq!(main.kind, SymbolKind::Static);
    assert!(main.offset > 0);
}

#[test]
fn test_missing_symbol() {
    let loader = load_self();
    let resolver = SymbolResolver::new(&loader).expect("Failed to create symbol resolver");

    assert!(resolver.lookup("this_symbol_does_not_exist_anywhere").is_none());
}

#[test]
fn test_load_missing_file() {
    assert!(ElfLoader::load("/nonexistent/binary").is_err());
}
