//! Breakpoint condition and log-point expressions.
//!
//! A small C-like language over registers and memory:
//!
//! - numbers: `42`, `0x2A`, `$2A`, `2Ah`, `%101010`, `0b101010`
//! - registers: `a`, `hl`, `ix`, `af'` (any name [`Reg`] accepts)
//! - memory: `b@(expr)` reads a byte, `w@(expr)` a little-endian word
//! - operators, loosest first: `||`, `&&`, `|`, `^`, `&`, `==` `!=`,
//!   `<` `<=` `>` `>=`, `<<` `>>`, `+` `-`, `*` `/` `%`, then unary
//!   `-` `!` `~`
//!
//! Values are 64-bit signed; comparisons and logical operators yield 0 or 1.
//! Expressions are parsed once when the breakpoint is set and evaluated
//! against a read-only [`ExprContext`] on every hit.

use std::str::FromStr;

use thiserror::Error;
use zilog_z80::Reg;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExprError {
    #[error("syntax error at {position}: {message}")]
    Parse { position: usize, message: String },
    #[error("unknown register '{name}' at {position}")]
    UnknownRegister { position: usize, name: String },
    #[error("division by zero")]
    DivisionByZero,
}

/// What an expression can look at.
pub trait ExprContext {
    fn register(&self, reg: Reg) -> u16;

    /// Side-effect-free memory read.
    fn read_byte(&self, address: u16) -> u8;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
    Complement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    LogicalOr,
    LogicalAnd,
    Or,
    Xor,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Shl,
    Shr,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl BinaryOp {
    fn from_symbol(symbol: &str) -> Option<(u8, BinaryOp)> {
        Some(match symbol {
            "||" => (1, BinaryOp::LogicalOr),
            "&&" => (2, BinaryOp::LogicalAnd),
            "|" => (3, BinaryOp::Or),
            "^" => (4, BinaryOp::Xor),
            "&" => (5, BinaryOp::And),
            "==" | "=" => (6, BinaryOp::Eq),
            "!=" => (6, BinaryOp::Ne),
            "<" => (7, BinaryOp::Lt),
            "<=" => (7, BinaryOp::Le),
            ">" => (7, BinaryOp::Gt),
            ">=" => (7, BinaryOp::Ge),
            "<<" => (8, BinaryOp::Shl),
            ">>" => (8, BinaryOp::Shr),
            "+" => (9, BinaryOp::Add),
            "-" => (9, BinaryOp::Sub),
            "*" => (10, BinaryOp::Mul),
            "/" => (10, BinaryOp::Div),
            "%" => (10, BinaryOp::Rem),
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Number(i64),
    Register(Reg),
    Byte(Box<Expr>),
    Word(Box<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
}

impl Expr {
    pub fn parse(text: &str) -> Result<Self, ExprError> {
        let tokens = tokenize(text)?;
        let mut parser = Parser {
            tokens: &tokens,
            pos: 0,
            end: text.len(),
        };
        let expr = parser.expression(1)?;
        if let Some(token) = parser.peek() {
            return Err(parser.error_at(token.position, "unexpected trailing input"));
        }
        Ok(expr)
    }

    pub fn eval(&self, ctx: &dyn ExprContext) -> Result<i64, ExprError> {
        Ok(match self {
            Expr::Number(n) => *n,
            Expr::Register(reg) => i64::from(ctx.register(*reg)),
            Expr::Byte(addr) => i64::from(ctx.read_byte(address(addr.eval(ctx)?))),
            Expr::Word(addr) => {
                let a = address(addr.eval(ctx)?);
                i64::from(u16::from_le_bytes([
                    ctx.read_byte(a),
                    ctx.read_byte(a.wrapping_add(1)),
                ]))
            }
            Expr::Unary(op, operand) => {
                let v = operand.eval(ctx)?;
                match op {
                    UnaryOp::Neg => v.wrapping_neg(),
                    UnaryOp::Not => i64::from(v == 0),
                    UnaryOp::Complement => !v,
                }
            }
            Expr::Binary(BinaryOp::LogicalOr, lhs, rhs) => {
                i64::from(lhs.eval(ctx)? != 0 || rhs.eval(ctx)? != 0)
            }
            Expr::Binary(BinaryOp::LogicalAnd, lhs, rhs) => {
                i64::from(lhs.eval(ctx)? != 0 && rhs.eval(ctx)? != 0)
            }
            Expr::Binary(op, lhs, rhs) => binary(*op, lhs.eval(ctx)?, rhs.eval(ctx)?)?,
        })
    }

    /// Evaluate as a condition: non-zero is true.
    pub fn is_true(&self, ctx: &dyn ExprContext) -> Result<bool, ExprError> {
        Ok(self.eval(ctx)? != 0)
    }
}

impl FromStr for Expr {
    type Err = ExprError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Expr::parse(s)
    }
}

fn address(value: i64) -> u16 {
    (value & 0xFFFF) as u16
}

fn shift_amount(value: i64) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

fn binary(op: BinaryOp, l: i64, r: i64) -> Result<i64, ExprError> {
    Ok(match op {
        BinaryOp::Or => l | r,
        BinaryOp::Xor => l ^ r,
        BinaryOp::And => l & r,
        BinaryOp::Eq => i64::from(l == r),
        BinaryOp::Ne => i64::from(l != r),
        BinaryOp::Lt => i64::from(l < r),
        BinaryOp::Le => i64::from(l <= r),
        BinaryOp::Gt => i64::from(l > r),
        BinaryOp::Ge => i64::from(l >= r),
        BinaryOp::Shl => l.checked_shl(shift_amount(r)).unwrap_or(0),
        BinaryOp::Shr => l.checked_shr(shift_amount(r)).unwrap_or(if l < 0 { -1 } else { 0 }),
        BinaryOp::Add => l.wrapping_add(r),
        BinaryOp::Sub => l.wrapping_sub(r),
        BinaryOp::Mul => l.wrapping_mul(r),
        BinaryOp::Div => l.checked_div(r).ok_or(ExprError::DivisionByZero)?,
        BinaryOp::Rem => l.checked_rem(r).ok_or(ExprError::DivisionByZero)?,
        BinaryOp::LogicalOr => i64::from(l != 0 || r != 0),
        BinaryOp::LogicalAnd => i64::from(l != 0 && r != 0),
    })
}

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
enum TokenKind {
    Number(i64),
    Ident(String),
    /// `b@` or `w@`.
    Memory { word: bool },
    Op(&'static str),
    LParen,
    RParen,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Token {
    kind: TokenKind,
    position: usize,
}

impl TokenKind {
    /// True if the token can end an operand, so a following `%` is modulo.
    fn ends_operand(&self) -> bool {
        matches!(
            self,
            TokenKind::Number(_) | TokenKind::Ident(_) | TokenKind::RParen
        )
    }
}

const OPERATORS: [&str; 21] = [
    "||", "&&", "==", "!=", "<=", ">=", "<<", ">>", "|", "^", "&", "=", "<", ">", "+", "-", "*",
    "/", "%", "!", "~",
];

fn parse_error(position: usize, message: impl Into<String>) -> ExprError {
    ExprError::Parse {
        position,
        message: message.into(),
    }
}

fn parse_number(text: &str, radix: u32, position: usize) -> Result<i64, ExprError> {
    if text.is_empty() {
        return Err(parse_error(position, "missing digits"));
    }
    i64::from_str_radix(text, radix)
        .map_err(|_| parse_error(position, format!("invalid number '{text}'")))
}

/// A literal starting with a decimal digit.
fn decimal_literal(word: &str, position: usize) -> Result<i64, ExprError> {
    let lower = word.to_ascii_lowercase();
    if let Some(hex) = lower.strip_prefix("0x") {
        parse_number(hex, 16, position)
    } else if let Some(hex) = lower.strip_suffix('h') {
        parse_number(hex, 16, position)
    } else if let Some(bin) = lower.strip_prefix("0b") {
        parse_number(bin, 2, position)
    } else {
        parse_number(&lower, 10, position)
    }
}

fn tokenize(text: &str) -> Result<Vec<Token>, ExprError> {
    let bytes = text.as_bytes();
    let mut tokens: Vec<Token> = Vec::new();
    let mut i = 0;

    let word_end = |from: usize| {
        let mut end = from;
        while end < bytes.len() && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_') {
            end += 1;
        }
        end
    };

    while i < bytes.len() {
        let c = bytes[i];
        let start = i;
        let operand_expected = tokens.last().is_none_or(|t| !t.kind.ends_operand());

        let kind = if c.is_ascii_whitespace() {
            i += 1;
            continue;
        } else if c.is_ascii_digit() {
            i = word_end(i);
            TokenKind::Number(decimal_literal(&text[start..i], start)?)
        } else if c == b'$' {
            i = word_end(i + 1);
            TokenKind::Number(parse_number(&text[start + 1..i], 16, start)?)
        } else if c == b'%' && operand_expected {
            i = word_end(i + 1);
            TokenKind::Number(parse_number(&text[start + 1..i], 2, start)?)
        } else if c.is_ascii_alphabetic() || c == b'_' {
            i = word_end(i);
            let word = &text[start..i];
            let is_memory = word.eq_ignore_ascii_case("b") || word.eq_ignore_ascii_case("w");
            if is_memory && bytes.get(i) == Some(&b'@') {
                i += 1;
                TokenKind::Memory {
                    word: word.eq_ignore_ascii_case("w"),
                }
            } else {
                if i < bytes.len() && bytes[i] == b'\'' {
                    i += 1;
                }
                TokenKind::Ident(text[start..i].to_string())
            }
        } else if c == b'(' {
            i += 1;
            TokenKind::LParen
        } else if c == b')' {
            i += 1;
            TokenKind::RParen
        } else if let Some(op) = OPERATORS.iter().find(|op| text[i..].starts_with(**op)) {
            i += op.len();
            TokenKind::Op(op)
        } else {
            return Err(parse_error(
                start,
                format!("unexpected character '{}'", text[start..].chars().next().unwrap_or(' ')),
            ));
        };
        tokens.push(Token {
            kind,
            position: start,
        });
    }
    Ok(tokens)
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    end: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<&Token> {
        let token = self.tokens.get(self.pos);
        self.pos += 1;
        token
    }

    fn error_at(&self, position: usize, message: &str) -> ExprError {
        parse_error(position, message)
    }

    /// Precedence climbing over binary operators of at least `min`.
    fn expression(&mut self, min: u8) -> Result<Expr, ExprError> {
        let mut lhs = self.unary()?;
        while let Some(Token {
            kind: TokenKind::Op(symbol),
            ..
        }) = self.peek()
        {
            let Some((precedence, op)) = BinaryOp::from_symbol(symbol) else {
                break;
            };
            if precedence < min {
                break;
            }
            self.pos += 1;
            let rhs = self.expression(precedence + 1)?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, ExprError> {
        let op = match self.peek().map(|t| &t.kind) {
            Some(TokenKind::Op("-")) => Some(UnaryOp::Neg),
            Some(TokenKind::Op("!")) => Some(UnaryOp::Not),
            Some(TokenKind::Op("~")) => Some(UnaryOp::Complement),
            Some(TokenKind::Op("+")) => {
                self.pos += 1;
                return self.unary();
            }
            _ => None,
        };
        if let Some(op) = op {
            self.pos += 1;
            return Ok(Expr::Unary(op, Box::new(self.unary()?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, ExprError> {
        let end = self.end;
        let Some(token) = self.next().cloned() else {
            return Err(self.error_at(end, "unexpected end of expression"));
        };
        match token.kind {
            TokenKind::Number(n) => Ok(Expr::Number(n)),
            TokenKind::Ident(name) => {
                name.parse::<Reg>()
                    .map(Expr::Register)
                    .map_err(|_| ExprError::UnknownRegister {
                        position: token.position,
                        name,
                    })
            }
            TokenKind::Memory { word } => {
                if !matches!(self.next().map(|t| &t.kind), Some(TokenKind::LParen)) {
                    return Err(self.error_at(token.position, "expected '(' after '@'"));
                }
                let inner = Box::new(self.parenthesised_rest(token.position)?);
                Ok(if word { Expr::Word(inner) } else { Expr::Byte(inner) })
            }
            TokenKind::LParen => self.parenthesised_rest(token.position),
            TokenKind::RParen | TokenKind::Op(_) => {
                Err(self.error_at(token.position, "expected an operand"))
            }
        }
    }

    /// The inside of a group whose `(` has been consumed.
    fn parenthesised_rest(&mut self, open: usize) -> Result<Expr, ExprError> {
        let inner = self.expression(1)?;
        match self.next().map(|t| &t.kind) {
            Some(TokenKind::RParen) => Ok(inner),
            _ => Err(self.error_at(open, "unbalanced '('")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Machine {
        regs: zilog_z80::Registers,
        mem: Vec<u8>,
    }

    impl ExprContext for Machine {
        fn register(&self, reg: Reg) -> u16 {
            self.regs.get(reg)
        }

        fn read_byte(&self, address: u16) -> u8 {
            self.mem[usize::from(address)]
        }
    }

    fn make_machine() -> Machine {
        let mut regs = zilog_z80::Registers::default();
        regs.set(Reg::Hl, 0x4000);
        regs.set(Reg::A, 0x07);
        regs.set(Reg::BcAlt, 0x1234);
        let mut mem = vec![0; 0x10000];
        mem[0x4000] = 0x34;
        mem[0x4001] = 0x12;
        Machine { regs, mem }
    }

    fn eval(text: &str) -> Result<i64, ExprError> {
        Expr::parse(text)?.eval(&make_machine())
    }

    #[test]
    fn number_formats() {
        for text in ["42", "0x2A", "$2A", "2Ah", "%101010", "0b101010", "0X2a"] {
            assert_eq!(eval(text), Ok(42), "{text}");
        }
    }

    #[test]
    fn registers_and_memory() {
        assert_eq!(eval("hl"), Ok(0x4000));
        assert_eq!(eval("A + 1"), Ok(8));
        assert_eq!(eval("bc'"), Ok(0x1234));
        assert_eq!(eval("b@(hl)"), Ok(0x34));
        assert_eq!(eval("w@(hl)"), Ok(0x1234));
        assert_eq!(eval("b@(hl+1) == $12"), Ok(1));
    }

    #[test]
    fn precedence() {
        assert_eq!(eval("2 + 3 * 4"), Ok(14));
        assert_eq!(eval("(2 + 3) * 4"), Ok(20));
        assert_eq!(eval("1 << 2 + 1"), Ok(8));
        assert_eq!(eval("a == 7 && hl >= $4000"), Ok(1));
        assert_eq!(eval("0 || 0 && 1"), Ok(0));
        assert_eq!(eval("6 & 3 | 8"), Ok(10));
        assert_eq!(eval("-a + 10"), Ok(3));
        assert_eq!(eval("!0 + ~0"), Ok(0));
    }

    #[test]
    fn percent_is_modulo_after_operand() {
        assert_eq!(eval("10 % 3"), Ok(1));
        assert_eq!(eval("a %11"), Ok(7));
        assert_eq!(eval("%11 + 1"), Ok(4));
    }

    #[test]
    fn evaluation_errors() {
        assert_eq!(eval("1 / (a - 7)"), Err(ExprError::DivisionByZero));
        assert_eq!(eval("5 % 0"), Err(ExprError::DivisionByZero));
    }

    #[test]
    fn parse_errors_carry_position() {
        assert!(matches!(
            Expr::parse("a +"),
            Err(ExprError::Parse { position: 3, .. })
        ));
        assert!(matches!(
            Expr::parse("(a + 1"),
            Err(ExprError::Parse { position: 0, .. })
        ));
        assert!(matches!(
            Expr::parse("a 1"),
            Err(ExprError::Parse { position: 2, .. })
        ));
        assert!(matches!(
            Expr::parse("1 # 2"),
            Err(ExprError::Parse { position: 2, .. })
        ));
        assert!(matches!(Expr::parse("$"), Err(ExprError::Parse { .. })));
    }

    #[test]
    fn unknown_register() {
        assert_eq!(
            Expr::parse("hl + foo"),
            Err(ExprError::UnknownRegister {
                position: 5,
                name: "foo".to_string()
            })
        );
    }

    #[test]
    fn logical_operators_short_circuit() {
        assert_eq!(eval("1 || 1 / 0"), Ok(1));
        assert_eq!(eval("0 && 1 / 0"), Ok(0));
    }
}
