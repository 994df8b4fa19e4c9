//! Debugger expressions.
//!
//! Text is split into tokens by an ordered rule table, then evaluated by
//! recursing over index ranges of the token buffer. No syntax tree is built:
//! each range is split at its main operator, the lowest precedence operator
//! outside parentheses (rightmost on ties, which makes binary operators left
//! associative).

use log::trace;
use nom::{
    bytes::complete::{tag, take_while_m_n},
    character::complete::{char, digit0, digit1, multispace1, one_of},
    combinator::recognize,
    sequence::tuple,
    IResult,
};
use thiserror::Error;

use crate::memory::MemoryError;

/// Upper bound on tokens per expression.
pub const MAX_TOKENS: usize = 8192;
/// Upper bound on the text of a single token.
pub const MAX_TOKEN_LEN: usize = 31;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Decimal,
    Hex,
    Reg,
    Plus,
    /// Binary subtraction.
    Minus,
    /// Binary multiplication.
    Star,
    Slash,
    Eq,
    Neq,
    And,
    LParen,
    RParen,
    /// Unary minus.
    Neg,
    /// Unary `*`: read a word from guest memory.
    Deref,
}

impl TokenKind {
    fn is_operand(self) -> bool {
        matches!(
            self,
            TokenKind::Decimal | TokenKind::Hex | TokenKind::Reg | TokenKind::RParen
        )
    }

    fn is_unary(self) -> bool {
        matches!(self, TokenKind::Neg | TokenKind::Deref)
    }

    /// Lower binds looser. Non-operators have no precedence.
    fn precedence(self) -> Option<u8> {
        match self {
            TokenKind::And => Some(0),
            TokenKind::Eq | TokenKind::Neq => Some(1),
            TokenKind::Plus | TokenKind::Minus => Some(2),
            TokenKind::Star | TokenKind::Slash => Some(3),
            TokenKind::Deref | TokenKind::Neg => Some(4),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
}

/// Where expressions read registers and memory from.
pub trait Environment {
    /// Value of the register called `name` (without the `$` prefix).
    fn register(&self, name: &str) -> Option<u32>;
    fn read_word(&self, addr: u32) -> Result<u32, MemoryError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExprError {
    #[error("no match at position {position}")]
    NoMatch { position: usize, text: String },
    #[error("token at position {position} is longer than {max} characters", max = MAX_TOKEN_LEN)]
    TokenTooLong { position: usize },
    #[error("expression has more than {max} tokens", max = MAX_TOKENS)]
    TooManyTokens,
    #[error("brackets don't match")]
    UnbalancedParentheses,
    #[error("missing operand")]
    MissingOperand,
    #[error("missing operator")]
    MissingOperator,
    #[error("cannot convert literal `{0}`")]
    BadLiteral(String),
    #[error("unknown register `{0}`")]
    UnknownRegister(String),
    #[error("division by zero")]
    DivideByZero,
    #[error("cannot dereference: {0}")]
    Memory(#[from] MemoryError),
}

impl ExprError {
    /// For lexing failures, the input with a caret under the failing
    /// position.
    pub fn pointer(&self) -> Option<String> {
        match self {
            ExprError::NoMatch { position, text } => {
                Some(format!("{text}\n{:>width$}", "^", width = position + 1))
            }
            _ => None,
        }
    }
}

/// A lexing rule: recognize a prefix of the input and return it.
type Rule = fn(&str) -> IResult<&str, &str>;

fn hex(input: &str) -> IResult<&str, &str> {
    recognize(tuple((
        char('0'),
        one_of("xX"),
        take_while_m_n(1, 8, |c: char| c.is_ascii_hexdigit()),
    )))(input)
}

fn register(input: &str) -> IResult<&str, &str> {
    recognize(tuple((
        char('$'),
        take_while_m_n(1, 2, |c: char| c.is_ascii_lowercase()),
        digit0,
    )))(input)
}

/// Lexing rules in priority order; the first that matches wins. `None`
/// discards the match.
const RULES: &[(Rule, Option<TokenKind>)] = &[
    (|i| multispace1(i), None),
    (|i| tag("*")(i), Some(TokenKind::Star)),
    (|i| tag("/")(i), Some(TokenKind::Slash)),
    (|i| tag("+")(i), Some(TokenKind::Plus)),
    (|i| tag("-")(i), Some(TokenKind::Minus)),
    (|i| tag("==")(i), Some(TokenKind::Eq)),
    (|i| tag("!=")(i), Some(TokenKind::Neq)),
    (|i| tag("&&")(i), Some(TokenKind::And)),
    (hex, Some(TokenKind::Hex)),
    (register, Some(TokenKind::Reg)),
    (|i| digit1(i), Some(TokenKind::Decimal)),
    (|i| tag("(")(i), Some(TokenKind::LParen)),
    (|i| tag(")")(i), Some(TokenKind::RParen)),
];

/// Tokenizer and evaluator sharing one reusable token buffer.
#[derive(Debug)]
pub struct Evaluator {
    tokens: Vec<Token>,
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl Evaluator {
    pub fn new() -> Self {
        Self {
            tokens: Vec::with_capacity(MAX_TOKENS),
        }
    }

    /// Tokens of the last tokenized expression.
    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    pub fn tokenize(&mut self, text: &str) -> Result<&[Token], ExprError> {
        self.tokens.clear();
        let mut position = 0;

        while position < text.len() {
            let rest = &text[position..];
            let Some((lexeme, kind)) = RULES
                .iter()
                .find_map(|(rule, kind)| rule(rest).ok().map(|(_, lexeme)| (lexeme, *kind)))
            else {
                return Err(ExprError::NoMatch {
                    position,
                    text: text.to_string(),
                });
            };

            let len = lexeme.len();
            trace!("match {kind:?} at position {position} with len {len}: {lexeme}");

            if let Some(kind) = kind {
                if len > MAX_TOKEN_LEN {
                    return Err(ExprError::TokenTooLong { position });
                }
                if self.tokens.len() == MAX_TOKENS {
                    return Err(ExprError::TooManyTokens);
                }
                let binary = self.tokens.last().is_some_and(|t| t.kind.is_operand());
                let kind = match kind {
                    TokenKind::Star if !binary => TokenKind::Deref,
                    TokenKind::Minus if !binary => TokenKind::Neg,
                    other => other,
                };
                self.tokens.push(Token {
                    kind,
                    text: lexeme.to_string(),
                });
            }
            position += len;
        }

        Ok(&self.tokens)
    }

    /// Tokenize and evaluate `text`. The token buffer is reused, so the
    /// result of a previous call's [`Evaluator::tokens`] is overwritten.
    pub fn evaluate(&mut self, text: &str, env: &dyn Environment) -> Result<u32, ExprError> {
        self.tokenize(text)?;
        if !balanced(&self.tokens) {
            return Err(ExprError::UnbalancedParentheses);
        }
        if self.tokens.is_empty() {
            return Err(ExprError::MissingOperand);
        }
        eval(&self.tokens, 0, self.tokens.len() - 1, env)
    }
}

/// Parentheses never close below depth zero and end at depth zero.
pub fn balanced(tokens: &[Token]) -> bool {
    let mut depth = 0usize;
    for token in tokens {
        match token.kind {
            TokenKind::LParen => depth += 1,
            TokenKind::RParen => {
                if depth == 0 {
                    return false;
                }
                depth -= 1;
            }
            _ => {}
        }
    }
    depth == 0
}

/// `tokens[p..=q]` is one parenthesized group wrapping a balanced interior.
fn wrapped_in_parens(tokens: &[Token], p: usize, q: usize) -> bool {
    q > p
        && tokens[p].kind == TokenKind::LParen
        && tokens[q].kind == TokenKind::RParen
        && balanced(&tokens[p + 1..q])
}

/// Position of the main operator of `tokens[p..=q]`.
fn main_operator(tokens: &[Token], p: usize, q: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut best: Option<(usize, u8)> = None;
    for (i, token) in tokens.iter().enumerate().take(q + 1).skip(p) {
        match token.kind {
            TokenKind::LParen => depth += 1,
            TokenKind::RParen => depth = depth.saturating_sub(1),
            kind => {
                let Some(prec) = kind.precedence() else {
                    continue;
                };
                if depth == 0 && best.is_none_or(|(_, min)| prec <= min) {
                    best = Some((i, prec));
                }
            }
        }
    }
    best.map(|(i, _)| i)
}

/// Evaluate `tokens[p..=q]`. All arithmetic wraps on 32 bits.
pub fn eval(tokens: &[Token], p: usize, q: usize, env: &dyn Environment) -> Result<u32, ExprError> {
    if p > q {
        return Err(ExprError::MissingOperand);
    }

    if p == q {
        let token = &tokens[p];
        return match token.kind {
            TokenKind::Decimal => token
                .text
                .parse::<u32>()
                .map_err(|_| ExprError::BadLiteral(token.text.clone())),
            TokenKind::Hex => u32::from_str_radix(&token.text[2..], 16)
                .map_err(|_| ExprError::BadLiteral(token.text.clone())),
            TokenKind::Reg => env
                .register(&token.text[1..])
                .ok_or_else(|| ExprError::UnknownRegister(token.text.clone())),
            _ => Err(ExprError::MissingOperand),
        };
    }

    if wrapped_in_parens(tokens, p, q) {
        return eval(tokens, p + 1, q - 1, env);
    }

    let pos = main_operator(tokens, p, q).ok_or(ExprError::MissingOperator)?;
    let op = tokens[pos].kind;

    if op.is_unary() {
        // Every binary operator binds looser than a unary one, so the range
        // is a run of prefix operators ahead of one operand. The run is
        // applied in a loop, innermost first, to keep long chains off the
        // stack.
        if !tokens[p].kind.is_unary() {
            return Err(ExprError::MissingOperator);
        }
        let operand = (p..=q)
            .find(|&i| !tokens[i].kind.is_unary())
            .ok_or(ExprError::MissingOperand)?;
        let mut value = eval(tokens, operand, q, env)?;
        for token in tokens[p..operand].iter().rev() {
            value = match token.kind {
                TokenKind::Deref => env.read_word(value)?,
                _ => value.wrapping_neg(),
            };
        }
        return Ok(value);
    }

    if pos == p {
        return Err(ExprError::MissingOperand);
    }
    let lhs = eval(tokens, p, pos - 1, env)?;
    let rhs = eval(tokens, pos + 1, q, env)?;

    match op {
        TokenKind::Plus => Ok(lhs.wrapping_add(rhs)),
        TokenKind::Minus => Ok(lhs.wrapping_sub(rhs)),
        TokenKind::Star => Ok(lhs.wrapping_mul(rhs)),
        TokenKind::Slash => lhs.checked_div(rhs).ok_or(ExprError::DivideByZero),
        TokenKind::Eq => Ok((lhs == rhs) as u32),
        TokenKind::Neq => Ok((lhs != rhs) as u32),
        TokenKind::And => Ok((lhs != 0 && rhs != 0) as u32),
        _ => Err(ExprError::MissingOperator),
    }
}
