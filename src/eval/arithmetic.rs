//! Infix arithmetic over exact decimals.
//!
//! Grammar:
//!
//! ```text
//! expr   := term (('+' | '-') term)*
//! term   := unary (('*' | '/') unary)*
//! unary  := ('+' | '-') unary | atom
//! atom   := number | '(' expr ')'
//! ```

use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;

use super::Evaluator;
use crate::error::EvalError;

/// Nesting limit for parentheses and unary chains.
const MAX_DEPTH: usize = 256;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(Decimal),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Number(n) => n.to_string(),
            Token::Plus => "+".into(),
            Token::Minus => "-".into(),
            Token::Star => "*".into(),
            Token::Slash => "/".into(),
            Token::LParen => "(".into(),
            Token::RParen => ")".into(),
        }
    }
}

/// Split the input into tokens, each tagged with its character offset.
fn tokenize(input: &str) -> Result<Vec<(Token, usize)>, EvalError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let token = match c {
            c if c.is_whitespace() => {
                i += 1;
                continue;
            }
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' => Token::Star,
            '/' => Token::Slash,
            '(' => Token::LParen,
            ')' => Token::RParen,
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let literal: String = chars[start..i].iter().collect();
                let value = literal
                    .parse::<Decimal>()
                    .map_err(|_| EvalError::InvalidNumber(literal.clone()))?;
                tokens.push((Token::Number(value), start));
                continue;
            }
            other => {
                return Err(EvalError::UnexpectedToken {
                    token: other.to_string(),
                    position: i,
                });
            }
        };
        tokens.push((token, i));
        i += 1;
    }

    Ok(tokens)
}

/// Recursive-descent parser that evaluates as it goes.
///
/// With `evaluate == false` it only validates structure, so runtime faults
/// like division by zero are not reported.
struct Parser<'a> {
    tokens: Vec<(Token, usize)>,
    pos: usize,
    depth: usize,
    evaluate: bool,
    cancel: Option<&'a CancellationToken>,
}

impl<'a> Parser<'a> {
    fn new(tokens: Vec<(Token, usize)>, evaluate: bool, cancel: Option<&'a CancellationToken>) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
            evaluate,
            cancel,
        }
    }

    fn check_cancelled(&self) -> Result<(), EvalError> {
        match self.cancel {
            Some(token) if token.is_cancelled() => Err(EvalError::Cancelled),
            _ => Ok(()),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(t, _)| t.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn unexpected(&self) -> EvalError {
        match self.tokens.get(self.pos) {
            Some((token, position)) => EvalError::UnexpectedToken {
                token: token.describe(),
                position: *position,
            },
            None => EvalError::UnexpectedEnd,
        }
    }

    fn parse(mut self) -> Result<Decimal, EvalError> {
        let value = self.expr()?;
        if self.pos < self.tokens.len() {
            return Err(self.unexpected());
        }
        Ok(value)
    }

    fn expr(&mut self) -> Result<Decimal, EvalError> {
        let mut acc = self.term()?;
        loop {
            self.check_cancelled()?;
            match self.peek() {
                Some(Token::Plus) => {
                    self.advance();
                    let rhs = self.term()?;
                    acc = self.apply(acc, rhs, Decimal::checked_add)?;
                }
                Some(Token::Minus) => {
                    self.advance();
                    let rhs = self.term()?;
                    acc = self.apply(acc, rhs, Decimal::checked_sub)?;
                }
                _ => return Ok(acc),
            }
        }
    }

    fn term(&mut self) -> Result<Decimal, EvalError> {
        let mut acc = self.unary()?;
        loop {
            self.check_cancelled()?;
            match self.peek() {
                Some(Token::Star) => {
                    self.advance();
                    let rhs = self.unary()?;
                    acc = self.apply(acc, rhs, Decimal::checked_mul)?;
                }
                Some(Token::Slash) => {
                    self.advance();
                    let rhs = self.unary()?;
                    if self.evaluate && rhs.is_zero() {
                        return Err(EvalError::DivisionByZero);
                    }
                    acc = self.apply(acc, rhs, Decimal::checked_div)?;
                }
                _ => return Ok(acc),
            }
        }
    }

    fn unary(&mut self) -> Result<Decimal, EvalError> {
        self.check_cancelled()?;
        match self.peek() {
            Some(Token::Minus) => {
                self.advance();
                let value = self.nested(Self::unary)?;
                Ok(-value)
            }
            Some(Token::Plus) => {
                self.advance();
                self.nested(Self::unary)
            }
            _ => self.atom(),
        }
    }

    fn atom(&mut self) -> Result<Decimal, EvalError> {
        match self.peek() {
            Some(Token::Number(_)) => match self.advance() {
                Some(Token::Number(n)) => Ok(n),
                _ => Err(EvalError::UnexpectedEnd),
            },
            Some(Token::LParen) => {
                self.advance();
                let value = self.nested(Self::expr)?;
                match self.peek() {
                    Some(Token::RParen) => {
                        self.advance();
                        Ok(value)
                    }
                    _ => Err(self.unexpected()),
                }
            }
            _ => Err(self.unexpected()),
        }
    }

    fn nested(&mut self, f: fn(&mut Self) -> Result<Decimal, EvalError>) -> Result<Decimal, EvalError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(EvalError::TooDeep { limit: MAX_DEPTH });
        }
        let value = f(self);
        self.depth -= 1;
        value
    }

    fn apply(
        &self,
        lhs: Decimal,
        rhs: Decimal,
        op: fn(Decimal, Decimal) -> Option<Decimal>,
    ) -> Result<Decimal, EvalError> {
        if !self.evaluate {
            return Ok(Decimal::ZERO);
        }
        op(lhs, rhs).ok_or(EvalError::Overflow)
    }
}

/// Default [`Evaluator`]: `+ - * /`, parentheses, unary signs and decimal
/// literals, computed exactly with [`Decimal`].
#[derive(Debug, Clone, Default)]
pub struct ArithmeticEvaluator;

impl ArithmeticEvaluator {
    pub fn new() -> Self {
        Self
    }
}

impl Evaluator for ArithmeticEvaluator {
    fn evaluate(&self, expression: &str, cancel: &CancellationToken) -> Result<String, EvalError> {
        let tokens = tokenize(expression)?;
        if tokens.is_empty() {
            return Err(EvalError::Empty);
        }
        let value = Parser::new(tokens, true, Some(cancel)).parse()?;
        Ok(value.normalize().to_string())
    }

    fn check_syntax(&self, expression: &str) -> Result<(), EvalError> {
        let tokens = tokenize(expression)?;
        if tokens.is_empty() {
            return Err(EvalError::Empty);
        }
        Parser::new(tokens, false, None).parse().map(|_| ())
    }
}
