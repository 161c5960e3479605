//! ブレークポイント指定文字列のパーサー
//!
//! ```text
//! breakpoint := what [ '=' expression ] [ count ]
//! expression := [sign] term ( sign term )* [ ':' ]
//! count      := IDENTIFIER
//! ```

use crate::breakpoint::{AddressTerm, BreakpointSpec, Condition, Sign, TermValue};
use crate::errors::SyntaxError;
use crate::lexer::{tokenize, Token, TokenKind};
use anyhow::Result;
use tracing::warn;

const UNKNOWN_WHAT: &str = "unknown 'what': please choose one of [oid, address, segfault, entry]";

/// 符号なし整数をパース
///
/// 16進数（0xプレフィックス付き）または10進数をサポート。
/// プレフィックスのない16進数はシンボル名と区別できないので受け付けません。
///
/// # Examples
/// ```
/// use tsubaki_core::parse::parse_uint;
///
/// assert_eq!(parse_uint("0x1234").unwrap(), 0x1234);
/// assert_eq!(parse_uint("1234").unwrap(), 1234);
/// assert!(parse_uint("beef").is_err());
/// ```
pub fn parse_uint(s: &str) -> Result<u64> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16)
            .map_err(|e| anyhow::anyhow!("Invalid hexadecimal integer '{}': {}", s, e))
    } else if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) {
        s.parse::<u64>()
            .map_err(|e| anyhow::anyhow!("Invalid integer '{}': {}", s, e))
    } else {
        Err(anyhow::anyhow!("Invalid integer '{}'", s))
    }
}

/// ブレークポイント指定文字列をパースする
///
/// # Examples
/// ```
/// use tsubaki_core::parse::parse;
/// use tsubaki_core::Condition;
///
/// let spec = parse("segfault").unwrap();
/// assert_eq!(spec.condition, Condition::Segfault);
/// ```
pub fn parse(name: &str) -> Result<BreakpointSpec, SyntaxError> {
    Parser::new(name).breakpoint()
}

/// 字句解析済みのトークン列からアドレス式だけをパースする
///
/// `input` はエラー表示に使う元の文字列です。
/// 式の後ろにトークンが残っている場合はエラーになります。
///
/// # Examples
/// ```
/// use tsubaki_core::{parse_expression, tokenize};
///
/// let input = "main+0x10";
/// let terms = parse_expression(input, &tokenize(input)).unwrap();
/// assert_eq!(terms.len(), 2);
/// ```
pub fn parse_expression(input: &str, tokens: &[Token]) -> Result<Vec<AddressTerm>, SyntaxError> {
    let mut parser = Parser::with_tokens(input, tokens.to_vec());
    let expression = parser.expression(None)?;
    if let Some(token) = parser.peek() {
        return Err(parser.error_at(token, "unexpected token after expression"));
    }
    Ok(expression.terms)
}

/// パース済みの式
struct Expression {
    terms: Vec<AddressTerm>,
    /// 各項のトークン位置
    offsets: Vec<usize>,
    /// `:` で終わったか
    saw_colon: bool,
}

/// 条件の種類（パース中のみ使用）
enum What {
    Address,
    OperationId,
}

struct Parser<'a> {
    input: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self::with_tokens(input, tokenize(input))
    }

    fn with_tokens(input: &'a str, tokens: Vec<Token>) -> Self {
        Self {
            input,
            tokens,
            pos: 0,
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn error_at(&self, token: &Token, message: &str) -> SyntaxError {
        SyntaxError::new(self.input, token.offset, message)
    }

    fn error_at_offset(&self, offset: usize, message: &str) -> SyntaxError {
        SyntaxError::new(self.input, offset, message)
    }

    /// 入力終端を指すエラー
    fn error_at_end(&self, message: &str) -> SyntaxError {
        SyntaxError::new(self.input, self.input.chars().count(), message)
    }

    fn breakpoint(&mut self) -> Result<BreakpointSpec, SyntaxError> {
        let what = self
            .advance()
            .ok_or_else(|| SyntaxError::new(self.input, 0, "empty breakpoint specification"))?;
        if what.kind != TokenKind::Identifier {
            return Err(self.error_at(&what, "expected an identifier"));
        }

        let kind = match what.text.as_str() {
            "address" | "addr" => What::Address,
            "oid" | "operation" | "number" => What::OperationId,
            "segfault" | "sigsegv" | "segv" => return Ok(self.finish_bare(Condition::Segfault)),
            "main" | "entry" | "start" | "_entry" => {
                return Ok(self.finish_bare(Condition::EntryPoint))
            }
            _ => return Err(self.error_at(&what, UNKNOWN_WHAT)),
        };

        let equals = self
            .advance()
            .ok_or_else(|| self.error_at(&what, "expected a token following this one"))?;
        if !equals.is_punctuator("=") {
            return Err(self.error_at(&equals, "unexpected token, expected '='"));
        }

        let expression = self.expression(Some(&equals))?;
        let saw_colon = expression.saw_colon;
        let condition = match kind {
            What::OperationId => Condition::OperationId(self.operation_id(&expression)?),
            What::Address => Condition::Address(expression.terms),
        };

        let mut spec = BreakpointSpec::new(self.input, condition);
        spec.trigger_threshold = self.count(saw_colon)?;
        Ok(spec)
    }

    /// 追加のフィールドを持たない条件
    fn finish_bare(&self, condition: Condition) -> BreakpointSpec {
        if let Some(token) = self.peek() {
            warn!(
                "user breakpoint \"{}\": ignoring trailing tokens starting at offset {}",
                self.input, token.offset
            );
        }
        BreakpointSpec::new(self.input, condition)
    }

    /// 操作番号はリテラルのみの式として書かれ、その符号付き和を値とする
    fn operation_id(&self, expression: &Expression) -> Result<u64, SyntaxError> {
        let mut terms = expression.terms.iter().zip(&expression.offsets);
        terms.try_fold(0u64, |acc, (term, &offset)| {
            let value = match &term.value {
                TermValue::Literal(value) => *value,
                _ => {
                    return Err(self.error_at_offset(
                        offset,
                        "operation id must be an unsigned integer, not a symbol",
                    ))
                }
            };
            Ok(match term.sign {
                Sign::Add => acc.wrapping_add(value),
                Sign::Subtract => acc.wrapping_sub(value),
            })
        })
    }

    /// 式の後に続く繰り返し回数
    fn count(&mut self, saw_colon: bool) -> Result<u64, SyntaxError> {
        let Some(token) = self.advance() else {
            if saw_colon {
                return Err(self.error_at_end("expected identifier 'count'"));
            }
            return Ok(1);
        };

        if token.kind != TokenKind::Identifier {
            return Err(self.error_at(&token, "expected identifier 'count'"));
        }

        let count = parse_uint(&token.text)
            .map_err(|_| self.error_at(&token, "count must be an unsigned integer"))?;
        if count == 0 {
            return Err(self.error_at(&token, "count must be at least 1"));
        }

        if let Some(extra) = self.peek() {
            return Err(self.error_at(extra, "unexpected token after count"));
        }

        Ok(count)
    }

    /// 符号付きの項の列をパースする
    ///
    /// 式は最初の `:`（消費する）、入力終端、または項の直後に現れた識別子（消費しない）で終わる。
    fn expression(&mut self, anchor: Option<&Token>) -> Result<Expression, SyntaxError> {
        let mut terms = Vec::new();
        let mut offsets = Vec::new();
        let mut sign = Sign::Add;
        let mut after_term = false;
        let mut pending_operator: Option<Token> = None;
        let mut saw_colon = false;

        while let Some(token) = self.peek().cloned() {
            match token.kind {
                TokenKind::Identifier => {
                    if after_term {
                        break;
                    }
                    let value = match parse_uint(&token.text) {
                        Ok(literal) => TermValue::Literal(literal),
                        Err(_) => TermValue::UnresolvedSymbol(token.text.clone()),
                    };
                    terms.push(AddressTerm::new(sign, value));
                    offsets.push(token.offset);
                    sign = Sign::Add;
                    after_term = true;
                    pending_operator = None;
                }
                TokenKind::Punctuator => {
                    if token.text == ":" {
                        self.pos += 1;
                        saw_colon = true;
                        break;
                    }
                    if after_term {
                        sign = Sign::Add;
                        after_term = false;
                    }
                    match token.text.as_str() {
                        "+" => {}
                        "-" => sign = sign.negate(),
                        _ => return Err(self.error_at(&token, "invalid operation")),
                    }
                    pending_operator = Some(token);
                }
            }
            self.pos += 1;
        }

        if let Some(operator) = pending_operator {
            return Err(self.error_at(&operator, "missing expression after operator"));
        }
        if terms.is_empty() {
            return Err(match anchor {
                Some(anchor) => self.error_at(anchor, "expression missing"),
                None => self.error_at_end("expression missing"),
            });
        }

        Ok(Expression {
            terms,
            offsets,
            saw_colon,
        })
    }
}
