//! エラー型

use crate::handoff::HandoffError;
use thiserror::Error;

/// ブレークポイント指定文字列の構文エラー
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid user breakpoint syntax in \"{input}\" at offset {offset}: {message}")]
pub struct SyntaxError {
    /// 元の指定文字列
    pub input: String,
    pub message: String,
    /// 問題のあるトークンの位置（文字単位）
    pub offset: usize,
}

impl SyntaxError {
    pub fn new(input: &str, offset: usize, message: impl Into<String>) -> Self {
        Self {
            input: input.to_string(),
            message: message.into(),
            offset,
        }
    }

    /// キャレットで位置を示した診断メッセージを生成する
    ///
    /// ```text
    ///     addr=main+
    ///              ^-- missing expression after operator
    /// ```
    pub fn render(&self) -> String {
        format!(
            "    {}\n    {}^-- {}",
            self.input,
            " ".repeat(self.offset),
            self.message
        )
    }
}

/// トリガー評価中の内部エラー
///
/// 利用者の入力ではなくプログラムの不整合を表します。
#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("unable to check user breakpoint \"{breakpoint}\"; symbol \"{symbol}\" not resolved")]
    UnresolvedSymbol { breakpoint: String, symbol: String },

    #[error(transparent)]
    Handoff(#[from] HandoffError),
}
