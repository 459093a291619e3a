use super::{BytecodeError, BytecodeResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum TokenKind {
    Int(i32),
    /// Escape sequences are decoded here; the printer re-escapes.
    Str(String),
    /// Identifiers, structural keywords and instruction mnemonics alike;
    /// the parser tells them apart.
    Ident(String),
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Assign,
    Eof,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct Token {
    pub(super) kind: TokenKind,
    pub(super) line: usize,
    pub(super) column: usize,
}

impl Token {
    pub(super) fn describe(&self) -> String {
        match &self.kind {
            TokenKind::Int(value) => value.to_string(),
            TokenKind::Str(value) => format!("\"{value}\""),
            TokenKind::Ident(name) => name.clone(),
            TokenKind::LBrace => "{".to_string(),
            TokenKind::RBrace => "}".to_string(),
            TokenKind::LBracket => "[".to_string(),
            TokenKind::RBracket => "]".to_string(),
            TokenKind::Comma => ",".to_string(),
            TokenKind::Assign => "=".to_string(),
            TokenKind::Eof => "end of input".to_string(),
        }
    }
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    column: usize,
}

impl Lexer {
    fn new(input: &str) -> Self {
        Self {
            chars: input.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
        }
    }

    fn lex(mut self) -> BytecodeResult<Vec<Token>> {
        let mut tokens = Vec::new();
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.bump();
                continue;
            }
            if c == '/' && self.peek_at(1) == Some('/') {
                while self.peek().is_some_and(|c| c != '\n') {
                    self.bump();
                }
                continue;
            }

            let line = self.line;
            let column = self.column;
            if let Some(kind) = self.lex_symbol(c) {
                tokens.push(Token { kind, line, column });
                continue;
            }
            if c.is_ascii_digit() || (c == '-' && self.peek_at(1).is_some_and(|d| d.is_ascii_digit()))
            {
                tokens.push(Token {
                    kind: self.lex_int(line, column)?,
                    line,
                    column,
                });
                continue;
            }
            if c.is_ascii_alphabetic() || c == '_' {
                tokens.push(Token {
                    kind: self.lex_ident(),
                    line,
                    column,
                });
                continue;
            }
            if c == '"' {
                tokens.push(Token {
                    kind: self.lex_string(line, column)?,
                    line,
                    column,
                });
                continue;
            }

            return Err(BytecodeError::UnexpectedCharacter {
                character: c,
                line,
                column,
            });
        }

        tokens.push(Token {
            kind: TokenKind::Eof,
            line: self.line,
            column: self.column,
        });
        Ok(tokens)
    }

    fn lex_symbol(&mut self, c: char) -> Option<TokenKind> {
        let kind = match c {
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            ',' => TokenKind::Comma,
            '=' => TokenKind::Assign,
            _ => return None,
        };
        self.bump();
        Some(kind)
    }

    fn lex_int(&mut self, line: usize, column: usize) -> BytecodeResult<TokenKind> {
        let mut text = String::new();
        if self.peek() == Some('-') {
            text.push('-');
            self.bump();
        }
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            text.push(self.bump().expect("digit was peeked"));
        }
        let value = text
            .parse::<i32>()
            .map_err(|_| BytecodeError::IntegerOutOfRange { line, column })?;
        Ok(TokenKind::Int(value))
    }

    fn lex_ident(&mut self) -> TokenKind {
        let mut name = String::new();
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            name.push(self.bump().expect("character was peeked"));
        }
        TokenKind::Ident(name)
    }

    fn lex_string(&mut self, line: usize, column: usize) -> BytecodeResult<TokenKind> {
        self.bump(); // opening quote
        let mut decoded = String::new();
        loop {
            let Some(c) = self.bump() else {
                return Err(BytecodeError::UnterminatedString { line, column });
            };
            match c {
                '"' => return Ok(TokenKind::Str(decoded)),
                '\\' => {
                    let escape_line = self.line;
                    let escape_column = self.column;
                    match self.bump() {
                        Some('n') => decoded.push('\n'),
                        Some('t') => decoded.push('\t'),
                        Some('"') => decoded.push('"'),
                        Some('\\') => decoded.push('\\'),
                        Some(other) => {
                            return Err(BytecodeError::InvalidEscape {
                                escape: other,
                                line: escape_line,
                                column: escape_column,
                            });
                        }
                        None => {
                            return Err(BytecodeError::UnterminatedString { line, column });
                        }
                    }
                }
                other => decoded.push(other),
            }
        }
    }

    fn peek(&self) -> Option<char> {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }
}

pub(super) fn lex(input: &str) -> BytecodeResult<Vec<Token>> {
    Lexer::new(input).lex()
}
