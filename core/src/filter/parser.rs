//! Recursive-descent parser producing the filter AST.
//!
//! Precedence, loosest first: `|`, `,`, `//`, `or`, `and`, comparisons,
//! postfix (`.a`, `[i]`, `[a:b]`, `[]`, `?`), primaries. Function
//! arguments are separated by `;`.

use serde_json::Value;

use super::lexer::{tokenize, Segment, Spanned, Token};
use super::FilterError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Builtin {
    Length,
    Keys,
    Type,
    Not,
    Empty,
    Add,
    Select,
    Map,
    ToEntries,
    FromEntries,
    WithEntries,
    Sort,
    SortBy,
    Has,
    Join,
    ToString,
    Test,
}

impl Builtin {
    fn lookup(name: &str, arity: usize) -> Option<Self> {
        let builtin = match (name, arity) {
            ("length", 0) => Builtin::Length,
            ("keys", 0) => Builtin::Keys,
            ("type", 0) => Builtin::Type,
            ("not", 0) => Builtin::Not,
            ("empty", 0) => Builtin::Empty,
            ("add", 0) => Builtin::Add,
            ("select", 1) => Builtin::Select,
            ("map", 1) => Builtin::Map,
            ("to_entries", 0) => Builtin::ToEntries,
            ("from_entries", 0) => Builtin::FromEntries,
            ("with_entries", 1) => Builtin::WithEntries,
            ("sort", 0) => Builtin::Sort,
            ("sort_by", 1) => Builtin::SortBy,
            ("has", 1) => Builtin::Has,
            ("join", 1) => Builtin::Join,
            ("tostring", 0) => Builtin::ToString,
            ("test", 1 | 2) => Builtin::Test,
            _ => return None,
        };
        Some(builtin)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Identity,
    Literal(Value),
    Index(Box<Expr>, Box<Expr>),
    Iterate(Box<Expr>),
    /// `target[from:to]`, either bound optional.
    Slice(Box<Expr>, Option<Box<Expr>>, Option<Box<Expr>>),
    Try(Box<Expr>),
    Pipe(Box<Expr>, Box<Expr>),
    Comma(Box<Expr>, Box<Expr>),
    Alt(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Compare(CompareOp, Box<Expr>, Box<Expr>),
    Array(Option<Box<Expr>>),
    Object(Vec<(String, Expr)>),
    /// Interpolated string: literal text and expressions, concatenated.
    Template(Vec<Expr>),
    Call(Builtin, Vec<Expr>),
}

pub(crate) fn parse(src: &str) -> Result<Expr, FilterError> {
    parse_tokens(tokenize(src)?)
}

fn parse_tokens(tokens: Vec<Spanned>) -> Result<Expr, FilterError> {
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.pipe()?;
    parser.expect(&Token::Eof, "end of expression")?;
    Ok(expr)
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos].0
    }

    fn offset(&self) -> usize {
        self.tokens[self.pos].1
    }

    fn advance(&mut self) -> Token {
        let token = self.tokens[self.pos].0.clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == token {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if matches!(self.peek(), Token::Ident(name) if name == keyword) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn error(&self, message: impl Into<String>) -> FilterError {
        FilterError::Parse { offset: self.offset(), message: message.into() }
    }

    fn expect(&mut self, token: &Token, what: &str) -> Result<(), FilterError> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(self.error(format!("expected {what}, found {:?}", self.peek())))
        }
    }

    fn pipe(&mut self) -> Result<Expr, FilterError> {
        let lhs = self.comma()?;
        if self.eat(&Token::Pipe) {
            let rhs = self.pipe()?;
            return Ok(Expr::Pipe(Box::new(lhs), Box::new(rhs)));
        }
        Ok(lhs)
    }

    fn comma(&mut self) -> Result<Expr, FilterError> {
        let mut lhs = self.alternative()?;
        while self.eat(&Token::Comma) {
            let rhs = self.alternative()?;
            lhs = Expr::Comma(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn alternative(&mut self) -> Result<Expr, FilterError> {
        let lhs = self.or()?;
        if self.eat(&Token::Alt) {
            let rhs = self.alternative()?;
            return Ok(Expr::Alt(Box::new(lhs), Box::new(rhs)));
        }
        Ok(lhs)
    }

    fn or(&mut self) -> Result<Expr, FilterError> {
        let mut lhs = self.and()?;
        while self.eat_keyword("or") {
            let rhs = self.and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn and(&mut self) -> Result<Expr, FilterError> {
        let mut lhs = self.comparison()?;
        while self.eat_keyword("and") {
            let rhs = self.comparison()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn comparison(&mut self) -> Result<Expr, FilterError> {
        let lhs = self.postfix()?;
        let op = match self.peek() {
            Token::Eq => CompareOp::Eq,
            Token::Ne => CompareOp::Ne,
            Token::Lt => CompareOp::Lt,
            Token::Le => CompareOp::Le,
            Token::Gt => CompareOp::Gt,
            Token::Ge => CompareOp::Ge,
            _ => return Ok(lhs),
        };
        self.advance();
        let rhs = self.postfix()?;
        Ok(Expr::Compare(op, Box::new(lhs), Box::new(rhs)))
    }

    fn postfix(&mut self) -> Result<Expr, FilterError> {
        let mut expr = self.primary()?;
        loop {
            expr = match self.peek().clone() {
                Token::Field(name) => {
                    self.advance();
                    Expr::Index(Box::new(expr), Box::new(Expr::Literal(Value::String(name))))
                }
                Token::Dot if matches!(self.tokens.get(self.pos + 1), Some((Token::Str(_), _))) => {
                    self.advance();
                    let Token::Str(name) = self.advance() else {
                        return Err(self.error("expected a string after `.`"));
                    };
                    Expr::Index(Box::new(expr), Box::new(Expr::Literal(Value::String(name))))
                }
                Token::Dot if matches!(self.tokens.get(self.pos + 1), Some((Token::LBracket, _))) => {
                    self.advance();
                    self.bracket_suffix(expr)?
                }
                Token::LBracket => self.bracket_suffix(expr)?,
                Token::Question => {
                    self.advance();
                    Expr::Try(Box::new(expr))
                }
                _ => return Ok(expr),
            };
        }
    }

    /// `[]`, `[expr]` or `[from:to]` applied to `target`; the current
    /// token is `[`.
    fn bracket_suffix(&mut self, target: Expr) -> Result<Expr, FilterError> {
        self.expect(&Token::LBracket, "`[`")?;
        if self.eat(&Token::RBracket) {
            return Ok(Expr::Iterate(Box::new(target)));
        }
        let from = if self.peek() == &Token::Colon { None } else { Some(Box::new(self.pipe()?)) };
        if !self.eat(&Token::Colon) {
            self.expect(&Token::RBracket, "`]`")?;
            let index = from.ok_or_else(|| self.error("expected an index"))?;
            return Ok(Expr::Index(Box::new(target), index));
        }
        let to = if self.peek() == &Token::RBracket { None } else { Some(Box::new(self.pipe()?)) };
        if from.is_none() && to.is_none() {
            return Err(self.error("a slice needs at least one bound"));
        }
        self.expect(&Token::RBracket, "`]`")?;
        Ok(Expr::Slice(Box::new(target), from, to))
    }

    fn primary(&mut self) -> Result<Expr, FilterError> {
        match self.peek().clone() {
            Token::Dot => {
                self.advance();
                match self.peek().clone() {
                    Token::Str(name) => {
                        self.advance();
                        Ok(Expr::Index(Box::new(Expr::Identity), Box::new(Expr::Literal(Value::String(name)))))
                    }
                    Token::LBracket => self.bracket_suffix(Expr::Identity),
                    _ => Ok(Expr::Identity),
                }
            }
            Token::Field(name) => {
                self.advance();
                Ok(Expr::Index(Box::new(Expr::Identity), Box::new(Expr::Literal(Value::String(name)))))
            }
            Token::Str(s) => {
                self.advance();
                Ok(Expr::Literal(Value::String(s)))
            }
            Token::Template(segments) => {
                self.advance();
                let parts = segments
                    .into_iter()
                    .map(|segment| match segment {
                        Segment::Text(text) => Ok(Expr::Literal(Value::String(text))),
                        Segment::Code(tokens) => parse_tokens(tokens),
                    })
                    .collect::<Result<_, _>>()?;
                Ok(Expr::Template(parts))
            }
            Token::Num(n) => {
                self.advance();
                Ok(Expr::Literal(Value::Number(n)))
            }
            Token::Minus => {
                self.advance();
                match self.advance() {
                    Token::Num(n) => negate(&n).map(Expr::Literal).ok_or_else(|| self.error("invalid number")),
                    _ => Err(self.error("expected a number after `-`")),
                }
            }
            Token::LParen => {
                self.advance();
                let inner = self.pipe()?;
                self.expect(&Token::RParen, "`)`")?;
                Ok(inner)
            }
            Token::LBracket => {
                self.advance();
                if self.eat(&Token::RBracket) {
                    return Ok(Expr::Array(None));
                }
                let inner = self.pipe()?;
                self.expect(&Token::RBracket, "`]`")?;
                Ok(Expr::Array(Some(Box::new(inner))))
            }
            Token::LBrace => self.object(),
            Token::Ident(name) => {
                self.advance();
                self.call(&name)
            }
            other => Err(self.error(format!("unexpected {other:?}"))),
        }
    }

    fn call(&mut self, name: &str) -> Result<Expr, FilterError> {
        match name {
            "true" => return Ok(Expr::Literal(Value::Bool(true))),
            "false" => return Ok(Expr::Literal(Value::Bool(false))),
            "null" => return Ok(Expr::Literal(Value::Null)),
            _ => {}
        }

        let mut args = Vec::new();
        if self.eat(&Token::LParen) {
            loop {
                args.push(self.pipe()?);
                if !self.eat(&Token::Semicolon) {
                    break;
                }
            }
            self.expect(&Token::RParen, "`)`")?;
        }
        let builtin = Builtin::lookup(name, args.len())
            .ok_or_else(|| self.error(format!("unknown function {name}/{}", args.len())))?;
        Ok(Expr::Call(builtin, args))
    }

    /// `{key: expr, key, "key": expr}`
    fn object(&mut self) -> Result<Expr, FilterError> {
        self.expect(&Token::LBrace, "`{`")?;
        let mut entries = Vec::new();
        if self.eat(&Token::RBrace) {
            return Ok(Expr::Object(entries));
        }
        loop {
            let key = match self.advance() {
                Token::Ident(k) | Token::Str(k) => k,
                other => return Err(self.error(format!("expected an object key, found {other:?}"))),
            };
            let value = if self.eat(&Token::Colon) {
                self.alternative()?
            } else {
                Expr::Index(Box::new(Expr::Identity), Box::new(Expr::Literal(Value::String(key.clone()))))
            };
            entries.push((key, value));
            if self.eat(&Token::RBrace) {
                return Ok(Expr::Object(entries));
            }
            self.expect(&Token::Comma, "`,` or `}`")?;
        }
    }
}

fn negate(n: &serde_json::Number) -> Option<Value> {
    if let Some(i) = n.as_i64() {
        return Some(Value::from(-i));
    }
    n.as_f64()
        .and_then(|f| serde_json::Number::from_f64(-f))
        .map(Value::Number)
}
