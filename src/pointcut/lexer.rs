//! Pointcut expression lexer.
//!
//! Tokenizes expressions like `execution("% Queue::%(...)") && !cflow(call("% lock()"))`.

use super::PointcutError;

/// Function-style combinators of the pointcut language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Combinator {
    Execution,
    Call,
    Construction,
    Destruction,
    Get,
    Set,
    Ref,
    Alias,
    Builtin,
    Base,
    Derived,
    That,
    Target,
    Args,
    Result,
    CFlow,
    Classes,
    Within,
    Member,
}

impl Combinator {
    pub const ALL: [Combinator; 19] = [
        Combinator::Execution,
        Combinator::Call,
        Combinator::Construction,
        Combinator::Destruction,
        Combinator::Get,
        Combinator::Set,
        Combinator::Ref,
        Combinator::Alias,
        Combinator::Builtin,
        Combinator::Base,
        Combinator::Derived,
        Combinator::That,
        Combinator::Target,
        Combinator::Args,
        Combinator::Result,
        Combinator::CFlow,
        Combinator::Classes,
        Combinator::Within,
        Combinator::Member,
    ];

    pub fn keyword(self) -> &'static str {
        match self {
            Combinator::Execution => "execution",
            Combinator::Call => "call",
            Combinator::Construction => "construction",
            Combinator::Destruction => "destruction",
            Combinator::Get => "get",
            Combinator::Set => "set",
            Combinator::Ref => "ref",
            Combinator::Alias => "alias",
            Combinator::Builtin => "builtin",
            Combinator::Base => "base",
            Combinator::Derived => "derived",
            Combinator::That => "that",
            Combinator::Target => "target",
            Combinator::Args => "args",
            Combinator::Result => "result",
            Combinator::CFlow => "cflow",
            Combinator::Classes => "classes",
            Combinator::Within => "within",
            Combinator::Member => "member",
        }
    }

    pub fn from_keyword(word: &str) -> Option<Combinator> {
        Self::ALL.into_iter().find(|c| c.keyword() == word)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    LParen,
    RParen,
    Comma,
    Or,          // ||
    And,         // &&
    Not,         // !
    ScopeSep,    // ::
    Keyword(Combinator),
    /// Quoted match expression; adjacent literals are already joined.
    MatchExpr(String),
    Ident(String),
}

/// A token together with its byte offset in the input.
#[derive(Debug, Clone, PartialEq)]
pub struct Lexeme {
    pub token: Token,
    pub offset: usize,
}

pub struct Lexer<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input: input.as_bytes(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn peek_at(&self, n: usize) -> Option<u8> {
        self.input.get(self.pos + n).copied()
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(|c| c.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn read_while(&mut self, pred: impl Fn(u8) -> bool) -> String {
        let start = self.pos;
        while self.pos < self.input.len() && pred(self.input[self.pos]) {
            self.pos += 1;
        }
        String::from_utf8_lossy(&self.input[start..self.pos]).into_owned()
    }

    fn is_ident_start(ch: u8) -> bool {
        ch.is_ascii_alphabetic() || ch == b'_'
    }

    fn is_ident_char(ch: u8) -> bool {
        ch.is_ascii_alphanumeric() || ch == b'_'
    }

    fn read_string(&mut self) -> Result<String, PointcutError> {
        let start = self.pos;
        self.pos += 1; // opening quote
        let body = self.read_while(|c| c != b'"');
        if self.peek() != Some(b'"') {
            return Err(PointcutError::UnterminatedString { offset: start });
        }
        self.pos += 1;
        Ok(body)
    }

    fn two(&mut self, second: u8, token: Token, tokens: &mut Vec<Lexeme>) -> Result<(), PointcutError> {
        let offset = self.pos;
        if self.peek_at(1) == Some(second) {
            self.pos += 2;
            tokens.push(Lexeme { token, offset });
            Ok(())
        } else {
            Err(PointcutError::UnexpectedChar {
                ch: self.input[offset] as char,
                offset,
            })
        }
    }

    pub fn tokenize(&mut self) -> Result<Vec<Lexeme>, PointcutError> {
        let mut tokens = Vec::new();

        loop {
            self.skip_whitespace();
            let Some(ch) = self.peek() else { break };
            let offset = self.pos;

            match ch {
                b'(' => {
                    self.pos += 1;
                    tokens.push(Lexeme { token: Token::LParen, offset });
                }
                b')' => {
                    self.pos += 1;
                    tokens.push(Lexeme { token: Token::RParen, offset });
                }
                b',' => {
                    self.pos += 1;
                    tokens.push(Lexeme { token: Token::Comma, offset });
                }
                b'!' => {
                    self.pos += 1;
                    tokens.push(Lexeme { token: Token::Not, offset });
                }
                b'|' => self.two(b'|', Token::Or, &mut tokens)?,
                b'&' => self.two(b'&', Token::And, &mut tokens)?,
                b':' => self.two(b':', Token::ScopeSep, &mut tokens)?,
                b'"' => {
                    let mut text = self.read_string()?;
                    // "a" "b" is the same match expression as "ab"
                    loop {
                        let save = self.pos;
                        self.skip_whitespace();
                        if self.peek() == Some(b'"') {
                            text.push_str(&self.read_string()?);
                        } else {
                            self.pos = save;
                            break;
                        }
                    }
                    tokens.push(Lexeme {
                        token: Token::MatchExpr(text),
                        offset,
                    });
                }
                _ if Self::is_ident_start(ch) => {
                    let word = self.read_while(Self::is_ident_char);
                    let token = match Combinator::from_keyword(&word) {
                        Some(c) => Token::Keyword(c),
                        None => Token::Ident(word),
                    };
                    tokens.push(Lexeme { token, offset });
                }
                _ => {
                    return Err(PointcutError::UnexpectedChar {
                        ch: ch as char,
                        offset,
                    });
                }
            }
        }

        Ok(tokens)
    }
}
