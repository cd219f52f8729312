//! Prolog reader: lexer and parser
//!
//! The dialect is small: atoms (alphanumeric or symbolic), variables
//! (upper-case or `_` start), compounds in functional notation, facts and
//! rules terminated by `.`, and goal sequences for queries. `t1 = t2` is
//! accepted at goal level as sugar for `'='(t1, t2)`. `%` starts a line
//! comment.

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Atom(String),
    Variable(String),
    LParen,
    RParen,
    Comma,
    Dot,
    If,    // :-
    Query, // ?-
    Equals,
    Eof,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Token::Atom(s) => write!(f, "{}", s),
            Token::Variable(s) => write!(f, "{}", s),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::Comma => write!(f, ","),
            Token::Dot => write!(f, "."),
            Token::If => write!(f, ":-"),
            Token::Query => write!(f, "?-"),
            Token::Equals => write!(f, "="),
            Token::Eof => write!(f, "EOF"),
        }
    }
}

/// A token with its source position.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub line: usize,
    pub column: usize,
}

/// Reader errors, with the position they were detected at.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadError {
    UnexpectedChar {
        ch: char,
        line: usize,
        column: usize,
    },
    UnexpectedToken {
        found: String,
        expected: &'static str,
        line: usize,
        column: usize,
    },
    UnexpectedEof,
}

impl fmt::Display for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedChar { ch, line, column } => {
                write!(f, "unexpected character '{}' at {}:{}", ch, line, column)
            }
            Self::UnexpectedToken {
                found,
                expected,
                line,
                column,
            } => write!(
                f,
                "unexpected '{}' at {}:{}, expected {}",
                found, line, column, expected
            ),
            Self::UnexpectedEof => write!(f, "unexpected end of input"),
        }
    }
}

impl std::error::Error for ReadError {}

/// A source-level term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Term {
    Atom(String),
    Var(String),
    Compound(String, Vec<Term>),
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Atom(name) | Term::Var(name) => write!(f, "{}", name),
            Term::Compound(name, args) => {
                write!(f, "{}(", name)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")
            }
        }
    }
}

/// A fact or rule: `head.` or `head :- goal, ...`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clause {
    pub head: Term,
    pub body: Vec<Term>,
}

fn is_symbolic(ch: char) -> bool {
    matches!(
        ch,
        '+' | '-' | '*' | '/' | '\\' | '^' | '<' | '>' | '=' | '~' | ':' | '?' | '@' | '#' | '&'
    )
}

fn is_ident(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_'
}

pub struct Lexer {
    input: Vec<char>,
    pos: usize,
    line: usize,
    column: usize,
}

impl Lexer {
    pub fn new(input: &str) -> Self {
        Lexer {
            input: input.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
        }
    }

    fn current(&self) -> Option<char> {
        self.input.get(self.pos).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.current()?;
        self.pos += 1;
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(ch)
    }

    fn skip_whitespace_and_comments(&mut self) {
        while let Some(ch) = self.current() {
            if ch.is_whitespace() {
                self.advance();
            } else if ch == '%' {
                while let Some(ch) = self.advance() {
                    if ch == '\n' {
                        break;
                    }
                }
            } else {
                break;
            }
        }
    }

    fn take_while(&mut self, pred: fn(char) -> bool) -> String {
        let mut out = String::new();
        while let Some(ch) = self.current() {
            if pred(ch) {
                out.push(ch);
                self.advance();
            } else {
                break;
            }
        }
        out
    }

    pub fn tokenize(&mut self) -> Result<Vec<Spanned>, ReadError> {
        let mut tokens = Vec::new();
        loop {
            self.skip_whitespace_and_comments();
            let (line, column) = (self.line, self.column);
            let Some(ch) = self.current() else {
                tokens.push(Spanned {
                    token: Token::Eof,
                    line,
                    column,
                });
                return Ok(tokens);
            };
            let token = match ch {
                '(' => {
                    self.advance();
                    Token::LParen
                }
                ')' => {
                    self.advance();
                    Token::RParen
                }
                ',' => {
                    self.advance();
                    Token::Comma
                }
                '.' => {
                    self.advance();
                    Token::Dot
                }
                _ if ch.is_ascii_uppercase() || ch == '_' => {
                    Token::Variable(self.take_while(is_ident))
                }
                _ if ch.is_ascii_lowercase() || ch.is_ascii_digit() => {
                    Token::Atom(self.take_while(is_ident))
                }
                _ if is_symbolic(ch) => {
                    let run = self.take_while(is_symbolic);
                    match run.as_str() {
                        ":-" => Token::If,
                        "?-" => Token::Query,
                        "=" => Token::Equals,
                        _ => Token::Atom(run),
                    }
                }
                _ => return Err(ReadError::UnexpectedChar { ch, line, column }),
            };
            tokens.push(Spanned {
                token,
                line,
                column,
            });
        }
    }
}

pub struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
}

impl Parser {
    pub fn new(mut tokens: Vec<Spanned>) -> Self {
        // The stream must end with Eof so peeking never runs off the end.
        if tokens.last().map(|s| &s.token) != Some(&Token::Eof) {
            tokens.push(Spanned {
                token: Token::Eof,
                line: 1,
                column: 1,
            });
        }
        Parser { tokens, pos: 0 }
    }

    fn peek(&self) -> &Spanned {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> Spanned {
        let spanned = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        spanned
    }

    fn unexpected(&self, expected: &'static str) -> ReadError {
        let spanned = self.peek();
        if spanned.token == Token::Eof {
            ReadError::UnexpectedEof
        } else {
            ReadError::UnexpectedToken {
                found: spanned.token.to_string(),
                expected,
                line: spanned.line,
                column: spanned.column,
            }
        }
    }

    fn expect(&mut self, token: Token, expected: &'static str) -> Result<(), ReadError> {
        if self.peek().token == token {
            self.advance();
            Ok(())
        } else {
            Err(self.unexpected(expected))
        }
    }

    fn parse_term(&mut self) -> Result<Term, ReadError> {
        match self.peek().token.clone() {
            Token::Atom(name) => {
                self.advance();
                if self.peek().token == Token::LParen {
                    self.advance();
                    let mut args = vec![self.parse_term()?];
                    while self.peek().token == Token::Comma {
                        self.advance();
                        args.push(self.parse_term()?);
                    }
                    self.expect(Token::RParen, "')'")?;
                    Ok(Term::Compound(name, args))
                } else {
                    Ok(Term::Atom(name))
                }
            }
            Token::Variable(name) => {
                self.advance();
                Ok(Term::Var(name))
            }
            _ => Err(self.unexpected("a term")),
        }
    }

    /// A body or query goal: a term, optionally `= term`.
    fn parse_goal(&mut self) -> Result<Term, ReadError> {
        let term = self.parse_term()?;
        if self.peek().token == Token::Equals {
            self.advance();
            let rhs = self.parse_term()?;
            Ok(Term::Compound("=".to_string(), vec![term, rhs]))
        } else {
            Ok(term)
        }
    }

    fn parse_goals(&mut self) -> Result<Vec<Term>, ReadError> {
        let mut goals = vec![self.parse_goal()?];
        while self.peek().token == Token::Comma {
            self.advance();
            goals.push(self.parse_goal()?);
        }
        Ok(goals)
    }

    fn parse_clause(&mut self) -> Result<Clause, ReadError> {
        let head = self.parse_term()?;
        let body = if self.peek().token == Token::If {
            self.advance();
            self.parse_goals()?
        } else {
            Vec::new()
        };
        self.expect(Token::Dot, "'.' after clause")?;
        Ok(Clause { head, body })
    }

    pub fn parse_program(&mut self) -> Result<Vec<Clause>, ReadError> {
        let mut clauses = Vec::new();
        while self.peek().token != Token::Eof {
            clauses.push(self.parse_clause()?);
        }
        Ok(clauses)
    }

    pub fn parse_query(&mut self) -> Result<Vec<Term>, ReadError> {
        if self.peek().token == Token::Query {
            self.advance();
        }
        let goals = self.parse_goals()?;
        if self.peek().token == Token::Dot {
            self.advance();
        }
        if self.peek().token != Token::Eof {
            return Err(self.unexpected("end of query"));
        }
        Ok(goals)
    }
}

/// Parse a sequence of facts and rules.
pub fn parse_program(src: &str) -> Result<Vec<Clause>, ReadError> {
    Parser::new(Lexer::new(src).tokenize()?).parse_program()
}

/// Parse a query: goals with an optional leading `?-` and final `.`.
pub fn parse_query(src: &str) -> Result<Vec<Term>, ReadError> {
    Parser::new(Lexer::new(src).tokenize()?).parse_query()
}
