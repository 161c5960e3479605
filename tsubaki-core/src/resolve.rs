//! アドレス式のシンボル解決

use crate::breakpoint::{Condition, TermValue};
use crate::registry::BreakpointRegistry;
use thiserror::Error;
use tracing::{debug, warn};
use tsubaki_elf::SymbolResolver;

/// セグメントのベースアドレスを表す予約名
pub const REFERENCE_CONSTANTS: [&str; 2] = ["bin", "libc"];

/// 予約名かどうか
pub fn is_reference_constant(name: &str) -> bool {
    REFERENCE_CONSTANTS.contains(&name)
}

/// シンボル解決に使うロードアドレス
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentBases {
    /// メインバイナリのロードベース
    pub binary_base: u64,
    /// libcのロードベース（マップされていなければNone）
    pub libc_base: Option<u64>,
    /// ターゲットが動的リンクされているか
    pub is_dynamic: bool,
}

/// シンボル解決時の警告
///
/// いずれも致命的ではなく、該当する項は0として解決されます。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionWarning {
    #[error("user breakpoint \"{breakpoint}\" references symbol {symbol} which is a dynamic symbol. Only static symbols are currently supported.")]
    DynamicSymbol { breakpoint: String, symbol: String },

    #[error("user breakpoint \"{breakpoint}\" references {symbol} but the symbol could not be resolved. Will assume {symbol}=0x0")]
    UnknownSymbol { breakpoint: String, symbol: String },

    #[error("user breakpoint \"{breakpoint}\" references libc but target binary is statically linked")]
    LibcInStaticBinary { breakpoint: String },

    #[error("user breakpoint \"{breakpoint}\" references libc but no libc segment is mapped. Will assume libc=0x0")]
    LibcNotMapped { breakpoint: String },
}

/// 登録済みブレークポイントが参照しているシンボル名を列挙する
///
/// 予約名（`bin`, `libc`）と解決済みの項は含みません。
/// 登録順・項の順に並び、重複もそのまま残します。
pub fn collect_referenced_symbol_names(registry: &BreakpointRegistry) -> Vec<String> {
    registry
        .iter()
        .filter_map(|bp| bp.address_terms())
        .flatten()
        .filter_map(|term| term.unresolved_symbol())
        .filter(|name| !is_reference_constant(name))
        .map(str::to_string)
        .collect()
}

/// すべての未解決シンボルをアドレスに置き換える
///
/// 解決できなかった項も0として `ResolvedSymbol` にするので、
/// この後のトリガー評価で未解決の項に出会うことはありません。
/// 既に解決済みの項には触れないため、何度呼んでも結果は変わりません。
pub fn resolve(
    registry: &mut BreakpointRegistry,
    symbols: &SymbolResolver,
    segments: &SegmentBases,
) -> Vec<ResolutionWarning> {
    let mut warnings = Vec::new();

    for bp in registry.iter_mut() {
        let Condition::Address(terms) = &mut bp.condition else {
            continue;
        };

        for term in terms.iter_mut() {
            let TermValue::UnresolvedSymbol(symbol) = &term.value else {
                continue;
            };

            let (address, warning) = resolve_symbol(&bp.name, symbol, symbols, segments);
            debug!(
                "user breakpoint \"{}\": {} resolved to 0x{:x}",
                bp.name, symbol, address
            );
            if let Some(warning) = warning {
                warn!("{}", warning);
                warnings.push(warning);
            }
            term.value = TermValue::ResolvedSymbol(address);
        }
    }

    warnings
}

fn resolve_symbol(
    breakpoint: &str,
    symbol: &str,
    symbols: &SymbolResolver,
    segments: &SegmentBases,
) -> (u64, Option<ResolutionWarning>) {
    match symbol {
        "bin" => (segments.binary_base, None),
        "libc" => {
            if !segments.is_dynamic {
                let warning = ResolutionWarning::LibcInStaticBinary {
                    breakpoint: breakpoint.to_string(),
                };
                return (segments.libc_base.unwrap_or(0), Some(warning));
            }
            match segments.libc_base {
                Some(base) => (base, None),
                None => (
                    0,
                    Some(ResolutionWarning::LibcNotMapped {
                        breakpoint: breakpoint.to_string(),
                    }),
                ),
            }
        }
        _ => match symbols.lookup(symbol) {
            Some(entry) if entry.is_static() => {
                (segments.binary_base.wrapping_add(entry.offset), None)
            }
            Some(_) => (
                0,
                Some(ResolutionWarning::DynamicSymbol {
                    breakpoint: breakpoint.to_string(),
                    symbol: symbol.to_string(),
                }),
            ),
            None => (
                0,
                Some(ResolutionWarning::UnknownSymbol {
                    breakpoint: breakpoint.to_string(),
                    symbol: symbol.to_string(),
                }),
            ),
        },
    }
}
