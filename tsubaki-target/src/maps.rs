//! セグメントマップ（/proc/pid/maps）

use crate::Result;
use std::fs;
use std::path::Path;

/// メモリマッピング情報
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryMapping {
    pub start: u64,
    pub end: u64,
    /// マップ元ファイル内のオフセット
    pub offset: u64,
    /// マップ元のパス（無名マッピングの場合はNone）
    pub pathname: Option<String>,
}

impl MemoryMapping {
    /// このマッピングから逆算したファイルのロードベース
    pub fn load_base(&self) -> u64 {
        self.start.wrapping_sub(self.offset)
    }

    /// パスのファイル名部分
    fn file_name(&self) -> Option<&str> {
        let path = self.pathname.as_deref()?;
        Path::new(path).file_name()?.to_str()
    }
}

/// プロセスのセグメントマップ
#[derive(Debug, Clone, Default)]
pub struct SegmentMap {
    mappings: Vec<MemoryMapping>,
}

impl SegmentMap {
    /// /proc/pid/maps を読み込む
    pub fn read(pid: i32) -> Result<Self> {
        let maps_path = format!("/proc/{}/maps", pid);
        let content = fs::read_to_string(&maps_path)
            .map_err(|e| anyhow::anyhow!("Failed to open {}: {}", maps_path, e))?;
        Self::parse(&content)
    }

    /// maps形式のテキストを解析する
    ///
    /// フォーマット: "address perms offset dev inode pathname"
    /// 例: "7f1234567000-7f1234568000 r-xp 00000000 08:01 123456 /lib/libc.so.6"
    pub fn parse(content: &str) -> Result<Self> {
        let mut mappings = Vec::new();

        for line in content.lines() {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 5 {
                continue;
            }

            let (start, end) = parts[0]
                .split_once('-')
                .ok_or_else(|| anyhow::anyhow!("Malformed address range '{}'", parts[0]))?;
            let start = u64::from_str_radix(start, 16)
                .map_err(|e| anyhow::anyhow!("Failed to parse start address: {}", e))?;
            let end = u64::from_str_radix(end, 16)
                .map_err(|e| anyhow::anyhow!("Failed to parse end address: {}", e))?;
            let offset = u64::from_str_radix(parts[2], 16)
                .map_err(|e| anyhow::anyhow!("Failed to parse segment offset: {}", e))?;

            let pathname = if parts.len() > 5 {
                Some(parts[5..].join(" "))
            } else {
                None
            };

            mappings.push(MemoryMapping {
                start,
                end,
                offset,
                pathname,
            });
        }

        Ok(Self { mappings })
    }

    /// すべてのマッピング
    pub fn mappings(&self) -> &[MemoryMapping] {
        &self.mappings
    }

    /// 指定されたアドレスが有効なマッピング内にあるかチェックする
    pub fn is_mapped(&self, addr: u64) -> bool {
        self.mappings.iter().any(|m| addr >= m.start && addr < m.end)
    }

    /// 指定されたパスのロードベースアドレスを取得する
    ///
    /// 同じファイルの複数のマッピングのうち、最も低いアドレスのものを使います。
    pub fn base_of(&self, path: &Path) -> Option<u64> {
        let path = path.to_str()?;
        self.mappings
            .iter()
            .filter(|m| m.pathname.as_deref() == Some(path))
            .min_by_key(|m| m.start)
            .map(MemoryMapping::load_base)
    }

    /// libcのロードベースアドレスを取得する
    pub fn libc_base(&self) -> Option<u64> {
        self.libc_mapping().map(MemoryMapping::load_base)
    }

    /// マップされているlibcのパス
    pub fn libc_path(&self) -> Option<&str> {
        self.libc_mapping()?.pathname.as_deref()
    }

    /// libcの最も低いアドレスのマッピング
    fn libc_mapping(&self) -> Option<&MemoryMapping> {
        self.mappings
            .iter()
            .filter(|m| {
                m.file_name()
                    .is_some_and(|name| name.starts_with("libc.so") || name.starts_with("libc-"))
            })
            .min_by_key(|m| m.start)
    }
}
