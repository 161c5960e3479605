//! ブレークポイント指定文字列の字句解析

/// トークンの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// 区切り文字以外の連続した文字列
    Identifier,
    /// `:` `+` `-` `=` のいずれか1文字
    Punctuator,
}

/// トークン
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    /// 入力文字列中の開始位置（文字単位）
    pub offset: usize,
}

impl Token {
    pub fn is_punctuator(&self, text: &str) -> bool {
        self.kind == TokenKind::Punctuator && self.text == text
    }
}

fn is_punctuator(c: char) -> bool {
    matches!(c, ':' | '+' | '-' | '=')
}

fn is_whitespace(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n')
}

/// 指定文字列をトークン列に分割する
///
/// # Examples
/// ```
/// use tsubaki_core::lexer::{tokenize, TokenKind};
///
/// let tokens = tokenize("addr=main+4");
/// let texts: Vec<&str> = tokens.iter().map(|t| t.text.as_str()).collect();
/// assert_eq!(texts, ["addr", "=", "main", "+", "4"]);
/// assert_eq!(tokens[1].kind, TokenKind::Punctuator);
/// ```
pub fn tokenize(input: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut start = 0;

    for (offset, c) in input.chars().enumerate() {
        if is_punctuator(c) || is_whitespace(c) {
            flush_identifier(&mut tokens, &mut current, start);
            if is_punctuator(c) {
                tokens.push(Token {
                    kind: TokenKind::Punctuator,
                    text: c.to_string(),
                    offset,
                });
            }
        } else {
            if current.is_empty() {
                start = offset;
            }
            current.push(c);
        }
    }

    // 入力の終端も区切りとして扱う
    flush_identifier(&mut tokens, &mut current, start);

    tokens
}

fn flush_identifier(tokens: &mut Vec<Token>, current: &mut String, start: usize) {
    if current.is_empty() {
        return;
    }
    tokens.push(Token {
        kind: TokenKind::Identifier,
        text: std::mem::take(current),
        offset: start,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(input: &str) -> Vec<(TokenKind, String, usize)> {
        tokenize(input)
            .into_iter()
            .map(|t| (t.kind, t.text, t.offset))
            .collect()
    }

    #[test]
    fn test_tokenize_expression() {
        use TokenKind::*;
        assert_eq!(
            summary("addr=main+4"),
            vec![
                (Identifier, "addr".to_string(), 0),
                (Punctuator, "=".to_string(), 4),
                (Identifier, "main".to_string(), 5),
                (Punctuator, "+".to_string(), 9),
                (Identifier, "4".to_string(), 10),
            ]
        );
    }

    #[test]
    fn test_tokenize_skips_whitespace() {
        let tokens = tokenize("  oid =\t7 \n 3 ");
        let texts: Vec<&str> = tokens.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, ["oid", "=", "7", "3"]);
        assert_eq!(tokens[0].offset, 2);
        assert_eq!(tokens[3].offset, 12);
    }

    #[test]
    fn test_tokenize_adjacent_punctuators() {
        let tokens = tokenize("a--b");
        let kinds: Vec<TokenKind> = tokens.iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            [
                TokenKind::Identifier,
                TokenKind::Punctuator,
                TokenKind::Punctuator,
                TokenKind::Identifier
            ]
        );
        assert_eq!(tokens[2].offset, 2);
    }

    #[test]
    fn test_tokenize_empty() {
        assert!(tokenize("").is_empty());
        assert!(tokenize(" \t\n").is_empty());
    }

    #[test]
    fn test_tokenize_trailing_identifier() {
        let tokens = tokenize("segv");
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].text, "segv");
    }
}
