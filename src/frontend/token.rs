/// A token of one assembly source line.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// `[A-Za-z_][A-Za-z0-9_]*`
    Ident(String),

    /// Optionally negative decimal literal.
    Integer(i64),

    /// Single- or double-quoted literal, contents verbatim.
    Str(String),

    Colon,

    /// Any other non-whitespace character. Never valid, but tokenized so
    /// the line parser sees malformed lines uniformly.
    Other(char),
}

impl Token {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Token::Ident(_) => "identifier",
            Token::Integer(_) => "integer",
            Token::Str(_) => "string",
            Token::Colon => "':'",
            Token::Other(_) => "character",
        }
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Ident(s) => write!(f, "{}", s),
            Token::Integer(n) => write!(f, "{}", n),
            Token::Str(s) => write!(f, "\"{}\"", s),
            Token::Colon => write!(f, ":"),
            Token::Other(c) => write!(f, "{}", c),
        }
    }
}
