use crate::{
    lexer::{Token, TokenKind},
    Lexer,
};
use miette::{Diagnostic, Error, LabeledSpan};
use thiserror::Error;

#[derive(Diagnostic, Debug, Error)]
#[error("unexpected EOF")]
pub struct Eof;

/// Binding strength of an infix operator symbol. `None` means the symbol is
/// not an infix operator (`?` and `:` are consumed by the ternary rule).
pub fn precedence(op: &str) -> Option<u8> {
    Some(match op {
        "=" => 1,
        "||" => 2,
        "&&" => 3,
        "<" | "<=" | ">" | ">=" | "==" | "!=" => 7,
        "+" | "-" => 10,
        "*" | "/" | "%" => 20,
        _ => return None,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Equal,
    NotEqual,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl BinaryOp {
    fn from_symbol(symbol: &str) -> Option<Self> {
        Some(match symbol {
            "||" => BinaryOp::Or,
            "&&" => BinaryOp::And,
            "<" => BinaryOp::Less,
            "<=" => BinaryOp::LessEqual,
            ">" => BinaryOp::Greater,
            ">=" => BinaryOp::GreaterEqual,
            "==" => BinaryOp::Equal,
            "!=" => BinaryOp::NotEqual,
            "+" => BinaryOp::Add,
            "-" => BinaryOp::Sub,
            "*" => BinaryOp::Mul,
            "/" => BinaryOp::Div,
            "%" => BinaryOp::Rem,
            _ => return None,
        })
    }

    fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Or => "||",
            BinaryOp::And => "&&",
            BinaryOp::Less => "<",
            BinaryOp::LessEqual => "<=",
            BinaryOp::Greater => ">",
            BinaryOp::GreaterEqual => ">=",
            BinaryOp::Equal => "==",
            BinaryOp::NotEqual => "!=",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
        }
    }
}

impl std::fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Num(f64),
    Str(String),
    Bool(bool),
    Var(String),
    List(Vec<Expr>),
    Assign {
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Cond {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Option<Box<Expr>>,
    },
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
    },
    Prog(Vec<Expr>),
}

impl std::fmt::Display for Expr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn write_list(
            f: &mut std::fmt::Formatter<'_>,
            items: &[Expr],
            separator: &str,
        ) -> std::fmt::Result {
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    write!(f, "{separator}")?;
                }
                write!(f, "{item}")?;
            }
            Ok(())
        }

        match self {
            Expr::Num(n) => write!(f, "{n}"),
            Expr::Str(s) => write!(f, "{s:?}"),
            Expr::Bool(b) => write!(f, "{b}"),
            Expr::Var(name) => write!(f, "{name}"),
            Expr::List(items) => {
                write!(f, "[")?;
                write_list(f, items, ", ")?;
                write!(f, "]")
            }
            Expr::Assign { left, right } => write!(f, "({left} = {right})"),
            Expr::Binary { op, left, right } => write!(f, "({left} {op} {right})"),
            Expr::Cond {
                cond,
                then,
                otherwise: Some(otherwise),
            } => write!(f, "({cond} ? {then} : {otherwise})"),
            Expr::Cond {
                cond,
                then,
                otherwise: None,
            } => write!(f, "(if {cond} then {then})"),
            Expr::Call { func, args } => {
                write!(f, "{func}(")?;
                write_list(f, args, ", ")?;
                write!(f, ")")
            }
            Expr::Prog(exprs) => write_list(f, exprs, "; "),
        }
    }
}

pub struct Parser<'a> {
    source: &'a str,
    lexer: Lexer<'a>,
}

impl<'a> Parser<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            source: input,
            lexer: Lexer::new(input),
        }
    }

    /// Parses the whole input as a program: expressions separated by `;`.
    pub fn parse(&mut self) -> Result<Expr, Error> {
        let mut prog = Vec::new();
        while !self.at_eof() {
            prog.push(self.parse_expression()?);
            if !self.at_eof() {
                self.expect(TokenKind::Punc, ";")?;
            }
        }
        Ok(Expr::Prog(prog))
    }

    fn at_eof(&mut self) -> bool {
        self.lexer.peek().is_none()
    }

    fn peek_is(&mut self, kind: TokenKind, slice: &str) -> bool {
        matches!(
            self.lexer.peek(),
            Some(Ok(token)) if token.kind == kind && token.slice == slice
        )
    }

    fn peek_operator(&mut self) -> Option<Token<'a>> {
        match self.lexer.peek() {
            Some(Ok(token)) if token.kind == TokenKind::Op => Some(*token),
            _ => None,
        }
    }

    fn advance(&mut self) -> Result<Token<'a>, Error> {
        match self.lexer.next() {
            Some(Ok(token)) => Ok(token),
            Some(Err(err)) => Err(err),
            None => Err(Eof.into()),
        }
    }

    fn expect(&mut self, kind: TokenKind, slice: &str) -> Result<(), Error> {
        if self.peek_is(kind, slice) {
            self.lexer.next();
            return Ok(());
        }
        let token = self.advance()?;
        Err(self.error_at(token, &format!("expected `{slice}`")))
    }

    fn error_at(&self, token: Token<'_>, help: &str) -> Error {
        miette::miette! {
            labels = vec![
                LabeledSpan::at(token.offset..token.offset + token.slice.len(), "here"),
            ],
            help = format!("{help}, found {:?} `{}`", token.kind, token.slice),
            "unexpected token",
        }
        .with_source_code(self.source.to_string())
    }

    fn parse_expression(&mut self) -> Result<Expr, Error> {
        let atom = self.parse_atom()?;
        let expr = self.maybe_binary(atom, 0)?;
        let expr = self.maybe_conditional(expr)?;
        self.maybe_call(expr)
    }

    fn parse_atom(&mut self) -> Result<Expr, Error> {
        let expr = if self.peek_is(TokenKind::Punc, "(") {
            self.lexer.next();
            let expr = self.parse_expression()?;
            self.expect(TokenKind::Punc, ")")?;
            expr
        } else if self.peek_is(TokenKind::Punc, "{") {
            Expr::Prog(self.delimited("{", "}", ";")?)
        } else if self.peek_is(TokenKind::Punc, "[") {
            Expr::List(self.delimited("[", "]", ",")?)
        } else if self.peek_is(TokenKind::Keyword, "if") {
            self.parse_if()?
        } else if self.peek_is(TokenKind::Keyword, "true") || self.peek_is(TokenKind::Keyword, "false")
        {
            let token = self.advance()?;
            Expr::Bool(token.slice == "true")
        } else {
            let token = self.advance()?;
            match token.kind {
                TokenKind::Num => {
                    let value = token.slice.parse().map_err(|err| {
                        miette::miette! {
                            labels = vec![
                                LabeledSpan::at(
                                    token.offset..token.offset + token.slice.len(),
                                    "this numeric literal",
                                ),
                            ],
                            "{err}",
                        }
                        .with_source_code(self.source.to_string())
                    })?;
                    Expr::Num(value)
                }
                TokenKind::Str => Expr::Str(unescape(token.slice)),
                TokenKind::Ident => Expr::Var(token.slice.to_string()),
                _ => return Err(self.error_at(token, "expected an expression")),
            }
        };
        self.maybe_call(expr)
    }

    /// `if <cond> [then] <expr> [else <expr>]`; `then` may be omitted only
    /// when the consequent is a brace block.
    fn parse_if(&mut self) -> Result<Expr, Error> {
        self.expect(TokenKind::Keyword, "if")?;
        let cond = self.parse_expression()?;
        if !self.peek_is(TokenKind::Punc, "{") {
            self.expect(TokenKind::Keyword, "then")?;
        }
        let then = self.parse_expression()?;
        let otherwise = if self.peek_is(TokenKind::Keyword, "else") {
            self.lexer.next();
            Some(Box::new(self.parse_expression()?))
        } else {
            None
        };
        Ok(Expr::Cond {
            cond: Box::new(cond),
            then: Box::new(then),
            otherwise,
        })
    }

    fn delimited(&mut self, start: &str, stop: &str, separator: &str) -> Result<Vec<Expr>, Error> {
        let mut items = Vec::new();
        let mut first = true;

        self.expect(TokenKind::Punc, start)?;

        while !self.at_eof() {
            if self.peek_is(TokenKind::Punc, stop) {
                break;
            }
            if first {
                first = false;
            } else {
                self.expect(TokenKind::Punc, separator)?;
            }
            if self.peek_is(TokenKind::Punc, stop) {
                break;
            }
            items.push(self.parse_expression()?);
        }

        self.expect(TokenKind::Punc, stop)?;

        Ok(items)
    }

    fn maybe_call(&mut self, expr: Expr) -> Result<Expr, Error> {
        if self.peek_is(TokenKind::Punc, "(") {
            return Ok(Expr::Call {
                func: Box::new(expr),
                args: self.delimited("(", ")", ",")?,
            });
        }
        Ok(expr)
    }

    // Precedence climbing: equal-or-lower precedence continues on the left,
    // strictly-higher precedence recurses on the right.
    fn maybe_binary(&mut self, left: Expr, my_prec: u8) -> Result<Expr, Error> {
        if let Some(token) = self.peek_operator() {
            if let Some(op_prec) = precedence(token.slice) {
                if op_prec > my_prec {
                    self.lexer.next();
                    let atom = self.parse_atom()?;
                    let right = self.maybe_binary(atom, op_prec)?;
                    let node = match BinaryOp::from_symbol(token.slice) {
                        Some(op) => Expr::Binary {
                            op,
                            left: Box::new(left),
                            right: Box::new(right),
                        },
                        // `=` is the only table entry with no binary variant.
                        None => Expr::Assign {
                            left: Box::new(left),
                            right: Box::new(right),
                        },
                    };
                    return self.maybe_binary(node, my_prec);
                }
            }
        }
        Ok(left)
    }

    fn maybe_conditional(&mut self, expr: Expr) -> Result<Expr, Error> {
        if self.peek_is(TokenKind::Op, "?") {
            self.lexer.next();
            let then = self.parse_expression()?;
            self.expect(TokenKind::Op, ":")?;
            let otherwise = self.parse_expression()?;
            return Ok(Expr::Cond {
                cond: Box::new(expr),
                then: Box::new(then),
                otherwise: Some(Box::new(otherwise)),
            });
        }
        Ok(expr)
    }
}

fn unescape(slice: &str) -> String {
    let inner = &slice[1..slice.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}
