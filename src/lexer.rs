use std::io::{self, Write};

use crate::token::{Token, TokenKind};

/// Line-oriented scanner. Lexical problems never abort the scan: they are
/// recorded as in-band `Error` tokens whose lexeme is the message, and the
/// caller decides whether to stop the pipeline.
pub struct Lexer<'a> {
    input: &'a str,
    tokens: Vec<Token>,
    open_brackets: Vec<Token>,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            tokens: Vec::new(),
            open_brackets: Vec::new(),
        }
    }

    pub fn lex(mut self) -> Vec<Token> {
        let input = self.input;
        let mut line_count = 0;
        for (index, line) in input.lines().enumerate() {
            line_count = index + 1;
            self.lex_line(line, line_count);
        }

        // Residual openers are unmatched, most recently opened first.
        while let Some(open) = self.open_brackets.pop() {
            self.tokens.push(Token::new(
                TokenKind::Error,
                format!("unmatched '{}'", open.lexeme),
                open.line,
            ));
        }

        self.tokens.push(Token::new(TokenKind::EoF, "", line_count));
        self.tokens
    }

    fn lex_line(&mut self, line: &str, line_no: usize) {
        let chars: Vec<char> = line.chars().collect();
        let mut i = 0;

        while i < chars.len() {
            if chars[i] == '/' && chars.get(i + 1) == Some(&'/') {
                break;
            }
            if chars[i].is_whitespace() {
                i += 1;
                continue;
            }

            // Rule order matters: strings before symbols (the quote),
            // numbers before identifiers, two-char comparisons before
            // single-char symbols.
            if let Some(token) = read_string(&chars, &mut i, line_no) {
                self.tokens.push(token);
                continue;
            }
            if let Some(token) = read_number(&chars, &mut i, line_no) {
                self.tokens.push(token);
                continue;
            }
            if let Some(token) = read_identifier_or_keyword(&chars, &mut i, line_no) {
                self.tokens.push(token);
                continue;
            }
            if let Some(token) = read_comparison(&chars, &mut i, line_no) {
                self.tokens.push(token);
                continue;
            }
            if let Some(token) = read_symbol(&chars, &mut i, line_no) {
                self.handle_brackets(&token);
                self.tokens.push(token);
                continue;
            }

            self.tokens.push(Token::new(
                TokenKind::Error,
                format!("unrecognized character '{}'", chars[i]),
                line_no,
            ));
            i += 1;
        }
    }

    fn handle_brackets(&mut self, token: &Token) {
        let expected_open = match token.kind {
            TokenKind::LBrace | TokenKind::LParen | TokenKind::LBracket => {
                self.open_brackets.push(token.clone());
                return;
            }
            TokenKind::RBrace => TokenKind::LBrace,
            TokenKind::RParen => TokenKind::LParen,
            TokenKind::RBracket => TokenKind::LBracket,
            _ => return,
        };

        if self.open_brackets.last().map(|open| open.kind) == Some(expected_open) {
            self.open_brackets.pop();
        } else {
            self.tokens.push(Token::new(
                TokenKind::Error,
                format!("unmatched '{}'", token.lexeme),
                token.line,
            ));
        }
    }
}

fn read_string(chars: &[char], i: &mut usize, line_no: usize) -> Option<Token> {
    if chars[*i] != '"' {
        return None;
    }
    *i += 1;

    // The lexeme keeps the outer quotes and raw two-character escapes; the
    // parser decodes them exactly once.
    let mut lexeme = String::from("\"");
    let mut error: Option<String> = None;

    while *i < chars.len() {
        let c = chars[*i];

        if c == '"' {
            lexeme.push('"');
            *i += 1;
            return Some(match error {
                Some(message) => Token::new(TokenKind::Error, message, line_no),
                None => Token::new(TokenKind::StringLiteral, lexeme, line_no),
            });
        }

        if c == '\\' {
            let Some(&next) = chars.get(*i + 1) else {
                return Some(Token::new(
                    TokenKind::Error,
                    "unterminated escape sequence",
                    line_no,
                ));
            };
            if !matches!(next, '"' | '\\' | 'n' | 't') && error.is_none() {
                error = Some(format!("invalid escape sequence \\{next}"));
            }
            lexeme.push('\\');
            lexeme.push(next);
            *i += 2;
            continue;
        }

        if !(' '..='~').contains(&c) && error.is_none() {
            error = Some(format!("invalid character in string (ASCII {})", c as u32));
        }
        lexeme.push(c);
        *i += 1;
    }

    Some(Token::new(
        TokenKind::Error,
        "unterminated string literal",
        line_no,
    ))
}

fn read_number(chars: &[char], i: &mut usize, line_no: usize) -> Option<Token> {
    if !chars[*i].is_ascii_digit() {
        return None;
    }
    let start = *i;

    if chars[*i] == '0' {
        *i += 1;
        if chars.get(*i).is_some_and(char::is_ascii_digit) {
            while chars.get(*i).is_some_and(char::is_ascii_digit) {
                *i += 1;
            }
            return Some(Token::new(
                TokenKind::Error,
                "invalid number with leading zero",
                line_no,
            ));
        }
        return Some(Token::new(TokenKind::IntLiteral, "0", line_no));
    }

    while chars.get(*i).is_some_and(char::is_ascii_digit) {
        *i += 1;
    }

    // A digit run glued to an identifier is a single bad token.
    if chars.get(*i).is_some_and(|c| c.is_ascii_alphabetic() || *c == '_') {
        while chars.get(*i).is_some_and(|c| c.is_ascii_alphanumeric() || *c == '_') {
            *i += 1;
        }
        let bad: String = chars[start..*i].iter().collect();
        return Some(Token::new(
            TokenKind::Error,
            format!("invalid token '{bad}'"),
            line_no,
        ));
    }

    let lexeme: String = chars[start..*i].iter().collect();
    Some(Token::new(TokenKind::IntLiteral, lexeme, line_no))
}

fn read_identifier_or_keyword(chars: &[char], i: &mut usize, line_no: usize) -> Option<Token> {
    if !chars[*i].is_ascii_alphabetic() && chars[*i] != '_' {
        return None;
    }
    let start = *i;
    *i += 1;
    while chars.get(*i).is_some_and(|c| c.is_ascii_alphanumeric() || *c == '_') {
        *i += 1;
    }

    let word: String = chars[start..*i].iter().collect();
    let kind = match word.as_str() {
        "global" | "return" | "while" | "if" | "else" | "fun" | "None" => TokenKind::Keyword,
        "true" | "false" => TokenKind::BooleanLiteral,
        _ => TokenKind::Identifier,
    };
    Some(Token::new(kind, word, line_no))
}

fn read_comparison(chars: &[char], i: &mut usize, line_no: usize) -> Option<Token> {
    if let (Some(&a), Some(&b)) = (chars.get(*i), chars.get(*i + 1)) {
        let kind = match (a, b) {
            ('<', '=') => Some(TokenKind::Leq),
            ('>', '=') => Some(TokenKind::Geq),
            ('=', '=') => Some(TokenKind::Eq),
            _ => None,
        };
        if let Some(kind) = kind {
            *i += 2;
            return Some(Token::new(kind, format!("{a}{b}"), line_no));
        }
    }
    match chars.get(*i) {
        Some('<') => {
            *i += 1;
            Some(Token::new(TokenKind::Lt, "<", line_no))
        }
        Some('>') => {
            *i += 1;
            Some(Token::new(TokenKind::Gt, ">", line_no))
        }
        _ => None,
    }
}

fn read_symbol(chars: &[char], i: &mut usize, line_no: usize) -> Option<Token> {
    let kind = match chars[*i] {
        ';' => TokenKind::Semicolon,
        '=' => TokenKind::Assign,
        ',' => TokenKind::Comma,
        '{' => TokenKind::LBrace,
        '}' => TokenKind::RBrace,
        '(' => TokenKind::LParen,
        ')' => TokenKind::RParen,
        '[' => TokenKind::LBracket,
        ']' => TokenKind::RBracket,
        '+' => TokenKind::Add,
        '-' => TokenKind::Sub,
        '*' => TokenKind::Mul,
        '/' => TokenKind::Div,
        '&' => TokenKind::And,
        '|' => TokenKind::Or,
        '!' => TokenKind::Not,
        '.' => TokenKind::Dot,
        ':' => TokenKind::Colon,
        _ => return None,
    };
    let token = Token::new(kind, chars[*i].to_string(), line_no);
    *i += 1;
    Some(token)
}

pub fn lex(source: &str) -> Vec<Token> {
    Lexer::new(source).lex()
}

pub fn has_errors(tokens: &[Token]) -> bool {
    tokens.iter().any(|token| token.kind == TokenKind::Error)
}

/// `scan` output: one line per non-EoF, non-error token.
pub fn write_tokens(tokens: &[Token], out: &mut dyn Write) -> io::Result<()> {
    for token in tokens {
        if matches!(token.kind, TokenKind::EoF | TokenKind::Error) {
            continue;
        }
        match token.kind.category() {
            Some(category) => writeln!(out, "{} {} {}", token.line, category, token.lexeme)?,
            None => writeln!(out, "{} {}", token.line, token.lexeme)?,
        }
    }
    Ok(())
}
