//! ELFの読み込み機能

use crate::Result;
use object::{Object, ObjectSegment};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// ELFローダー
pub struct ElfLoader {
    /// 読み込んだファイルのパス
    path: PathBuf,
    /// オブジェクトファイル
    object_file: object::File<'static>,
}

impl ElfLoader {
    /// ELFファイルを読み込む
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let file_data = fs::read(path)
            .map_err(|e| anyhow::anyhow!("Failed to read file {:?}: {}", path, e))?;

        // トレース中はずっと参照するので、Box::leakで'staticライフタイムを得る
        let file_data: &'static [u8] = Box::leak(file_data.into_boxed_slice());

        let object_file = object::File::parse(file_data)
            .map_err(|e| anyhow::anyhow!("Failed to parse ELF file {:?}: {}", path, e))?;

        debug!(
            "Loaded ELF {:?}: pie={}, entry=0x{:x}",
            path,
            matches!(object_file.kind(), object::ObjectKind::Dynamic),
            object_file.entry()
        );

        Ok(Self {
            path: path.to_path_buf(),
            object_file,
        })
    }

    /// 読み込んだファイルのパスを取得
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// オブジェクトファイルへの参照を取得
    pub fn object_file(&self) -> &object::File<'static> {
        &self.object_file
    }

    /// 動的リンクされているかどうか（.interpセクションの有無で判定）
    pub fn is_dynamic(&self) -> bool {
        self.object_file.section_by_name(".interp").is_some()
    }

    /// イメージの先頭仮想アドレス（最小のロードセグメントアドレス）
    ///
    /// PIEの場合は通常0、非PIEの場合は0x400000などの固定アドレスになります。
    pub fn image_base(&self) -> u64 {
        self.object_file
            .segments()
            .map(|segment| segment.address())
            .min()
            .unwrap_or(0)
    }

    /// エントリポイントのイメージ先頭からのオフセット
    pub fn entry_offset(&self) -> u64 {
        self.object_file.entry().wrapping_sub(self.image_base())
    }
}
