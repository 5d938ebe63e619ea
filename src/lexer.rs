use miette::{Error, LabeledSpan};

pub const KEYWORDS: &[&str] = &["true", "false", "if", "then", "else"];

const PUNCTUATION: &str = ",;(){}[]";
const OPERATOR_CHARS: &str = "+-*/%=&|<>!?:";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Token<'a> {
    pub slice: &'a str,
    pub offset: usize,
    pub kind: TokenKind,
}

impl<'a> std::fmt::Display for Token<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.slice)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TokenKind {
    Str,
    Num,
    Keyword,
    Ident,
    Punc,
    Op,
}

#[derive(Debug)]
pub struct Lexer<'a> {
    source: &'a str,
    rest: &'a str,
    byte: usize,
    line: usize,
    col: usize,
    pub peeked: Option<Result<Token<'a>, miette::Error>>,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            source: input,
            rest: input,
            byte: 0,
            line: 1,
            col: 1,
            peeked: None,
        }
    }

    pub fn peek(&mut self) -> Option<&Result<Token<'a>, miette::Error>> {
        if self.peeked.is_some() {
            return self.peeked.as_ref();
        }

        self.peeked = self.next();
        self.peeked.as_ref()
    }

    fn peek_char(&self) -> Option<char> {
        self.rest.chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.rest.chars().next()?;
        self.rest = &self.rest[c.len_utf8()..];
        self.byte += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn eat_while(&mut self, mut predicate: impl FnMut(char) -> bool) -> &'a str {
        let start = self.byte;
        let rest = self.rest;
        while let Some(c) = self.peek_char() {
            if !predicate(c) {
                break;
            }
            self.bump();
        }
        &rest[..self.byte - start]
    }

    // A literal opened by either quote character is closed by either quote
    // character; a backslash escapes the following character verbatim.
    fn read_string(&mut self) -> Result<Token<'a>, Error> {
        let start = self.byte;
        let rest = self.rest;
        self.bump();

        let mut escaped = false;
        while let Some(c) = self.bump() {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' || c == '\'' {
                return Ok(Token {
                    slice: &rest[..self.byte - start],
                    offset: start,
                    kind: TokenKind::Str,
                });
            }
        }

        Err(miette::miette! {
            labels = vec![
                LabeledSpan::at(start..self.byte, "this string literal"),
            ],
            "unterminated string",
        }
        .with_source_code(self.source.to_string()))
    }
}

impl<'a> Iterator for Lexer<'a> {
    type Item = Result<Token<'a>, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(next) = self.peeked.take() {
            return Some(next);
        }

        loop {
            let c = self.peek_char()?;

            if c.is_whitespace() {
                self.bump();
                continue;
            }
            if c == '#' {
                self.eat_while(|c| c != '\n');
                continue;
            }

            let offset = self.byte;
            let line = self.line;
            let col = self.col;

            return Some(match c {
                '"' | '\'' => self.read_string(),
                '0'..='9' => {
                    let mut has_dot = false;
                    let slice = self.eat_while(|c| {
                        if c == '.' {
                            if has_dot {
                                return false;
                            }
                            has_dot = true;
                            return true;
                        }
                        c.is_ascii_digit()
                    });
                    Ok(Token {
                        slice,
                        offset,
                        kind: TokenKind::Num,
                    })
                }
                'a'..='z' | 'A'..='Z' | '_' => {
                    let slice = self.eat_while(|c| c.is_ascii_alphanumeric() || c == '_');
                    let kind = if KEYWORDS.contains(&slice) {
                        TokenKind::Keyword
                    } else {
                        TokenKind::Ident
                    };
                    Ok(Token {
                        slice,
                        offset,
                        kind,
                    })
                }
                c if PUNCTUATION.contains(c) => {
                    let rest = self.rest;
                    self.bump();
                    Ok(Token {
                        slice: &rest[..c.len_utf8()],
                        offset,
                        kind: TokenKind::Punc,
                    })
                }
                c if OPERATOR_CHARS.contains(c) => {
                    let slice = self.eat_while(|c| OPERATOR_CHARS.contains(c));
                    Ok(Token {
                        slice,
                        offset,
                        kind: TokenKind::Op,
                    })
                }
                c => {
                    self.bump();
                    Err(miette::miette! {
                        labels = vec![
                            LabeledSpan::at(offset..offset + c.len_utf8(), "this input character"),
                        ],
                        "can't handle character {c:?} at {line}:{col}",
                    }
                    .with_source_code(self.source.to_string()))
                }
            });
        }
    }
}
