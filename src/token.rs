#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    // Literals
    IntLiteral,
    StringLiteral,
    BooleanLiteral,
    Identifier,
    Keyword,

    // Operators
    Add,    // +
    Sub,    // -
    Mul,    // *
    Div,    // /
    And,    // &
    Or,     // |
    Not,    // !
    Lt,     // <
    Gt,     // >
    Leq,    // <=
    Geq,    // >=
    Eq,     // ==
    Assign, // =

    // Punctuation
    Semicolon,
    Comma,
    Dot,
    Colon,
    LBrace,
    RBrace,
    LParen,
    RParen,
    LBracket,
    RBracket,

    // Structural
    Error,
    EoF,
}

impl TokenKind {
    /// Category label used by the `scan` output mode. Structural and
    /// operator tokens have no category.
    pub fn category(self) -> Option<&'static str> {
        match self {
            TokenKind::StringLiteral => Some("STRINGLITERAL"),
            TokenKind::IntLiteral => Some("INTLITERAL"),
            TokenKind::BooleanLiteral => Some("BOOLEANLITERAL"),
            TokenKind::Identifier => Some("IDENTIFIER"),
            _ => None,
        }
    }
}

/// A source token. Error tokens carry a human-readable message as their
/// lexeme; string literals keep their outer quotes and raw escapes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub lexeme: String,
    pub line: usize,
}

impl Token {
    pub fn new(kind: TokenKind, lexeme: impl Into<String>, line: usize) -> Self {
        Self {
            kind,
            lexeme: lexeme.into(),
            line,
        }
    }

    pub fn is_keyword(&self, word: &str) -> bool {
        self.kind == TokenKind::Keyword && self.lexeme == word
    }
}
