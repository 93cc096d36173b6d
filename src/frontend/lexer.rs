use crate::frontend::assemble_error::AssembleError;
use crate::frontend::token::Token;

/// Tokenizer for a single physical source line.
///
/// `;` outside a quoted literal starts a comment that runs to end of line.
pub struct Lexer {
    source: Vec<char>,
    pos: usize,
    /// 1-based, for error reporting.
    line: usize,
}

impl Lexer {
    pub fn new(source: &str, line: usize) -> Self {
        Lexer {
            source: source.chars().collect(),
            pos: 0,
            line,
        }
    }

    fn current(&self) -> Option<char> {
        self.source.get(self.pos).copied()
    }

    fn peek(&self) -> Option<char> {
        self.source.get(self.pos + 1).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.current();
        self.pos += 1;
        ch
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.current() {
            if ch.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn read_identifier(&mut self) -> Token {
        let mut ident = String::new();
        while let Some(ch) = self.current() {
            if ch.is_ascii_alphanumeric() || ch == '_' {
                ident.push(ch);
                self.advance();
            } else {
                break;
            }
        }
        Token::Ident(ident)
    }

    fn read_integer(&mut self) -> Result<Token, AssembleError> {
        let mut literal = String::new();
        if self.current() == Some('-') {
            literal.push('-');
            self.advance();
        }
        while let Some(ch) = self.current() {
            if ch.is_ascii_digit() {
                literal.push(ch);
                self.advance();
            } else {
                break;
            }
        }

        literal
            .parse()
            .map(Token::Integer)
            .map_err(|_| AssembleError::InvalidInteger {
                literal,
                line: self.line,
            })
    }

    /// A quote with no matching closer on the same line is not a literal;
    /// it falls through as a lone character.
    fn read_string(&mut self, quote: char) -> Token {
        let start = self.pos + 1;
        let close = self.source[start..].iter().position(|&c| c == quote);

        match close {
            Some(len) => {
                let text: String = self.source[start..start + len].iter().collect();
                self.pos = start + len + 1;
                Token::Str(text)
            }
            None => {
                self.advance();
                Token::Other(quote)
            }
        }
    }

    pub fn tokenize(&mut self) -> Result<Vec<Token>, AssembleError> {
        let mut tokens = Vec::new();

        loop {
            self.skip_whitespace();

            let Some(ch) = self.current() else {
                break;
            };

            let token = match ch {
                ';' => break,
                c if c.is_ascii_alphabetic() || c == '_' => self.read_identifier(),
                c if c.is_ascii_digit() => self.read_integer()?,
                '-' if self.peek().is_some_and(|c| c.is_ascii_digit()) => self.read_integer()?,
                '"' | '\'' => self.read_string(ch),
                ':' => {
                    self.advance();
                    Token::Colon
                }
                other => {
                    self.advance();
                    Token::Other(other)
                }
            };
            tokens.push(token);
        }

        Ok(tokens)
    }
}

/// Tokenize one line. `line` is 1-based and only used in errors.
pub fn tokenize_line(source: &str, line: usize) -> Result<Vec<Token>, AssembleError> {
    Lexer::new(source, line).tokenize()
}
