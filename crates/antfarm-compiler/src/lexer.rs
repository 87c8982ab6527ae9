//! Hand-rolled lexer for ant assembly source. Tokens are produced one at a
//! time; the current source line is tracked for diagnostics.

use std::fmt;

use crate::{CompileError, CompileErrorKind};

/// One lexical token. Sigil-prefixed names carry the name without the sigil.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    LeftParen,
    RightParen,
    Colon,
    Comma,
    Assign,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Or,
    And,
    Xor,
    Plus,
    Minus,
    Star,
    Slash,
    Bang,
    /// `$name` variable reference.
    Variable(String),
    /// `#Name` named constant.
    Constant(String),
    /// `%name` label reference or definition.
    Label(String),
    /// Bare instruction mnemonic.
    Identifier(String),
    /// Decimal literal, accumulated with wrapping 16-bit arithmetic.
    Number(i16),
    DefineAnt,
    Configuration,
    Program,
    Eof,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::LeftParen => f.write_str("'('"),
            Token::RightParen => f.write_str("')'"),
            Token::Colon => f.write_str("':'"),
            Token::Comma => f.write_str("','"),
            Token::Assign => f.write_str("'='"),
            Token::Equal => f.write_str("'=='"),
            Token::NotEqual => f.write_str("'!='"),
            Token::Less => f.write_str("'<'"),
            Token::LessEqual => f.write_str("'<='"),
            Token::Greater => f.write_str("'>'"),
            Token::GreaterEqual => f.write_str("'>='"),
            Token::Or => f.write_str("'|'"),
            Token::And => f.write_str("'&'"),
            Token::Xor => f.write_str("'^'"),
            Token::Plus => f.write_str("'+'"),
            Token::Minus => f.write_str("'-'"),
            Token::Star => f.write_str("'*'"),
            Token::Slash => f.write_str("'/'"),
            Token::Bang => f.write_str("'!'"),
            Token::Variable(name) => write!(f, "'${name}'"),
            Token::Constant(name) => write!(f, "'#{name}'"),
            Token::Label(name) => write!(f, "'%{name}'"),
            Token::Identifier(name) => write!(f, "'{name}'"),
            Token::Number(value) => write!(f, "'{value}'"),
            Token::DefineAnt => f.write_str("'DefineAnt'"),
            Token::Configuration => f.write_str("'Configuration'"),
            Token::Program => f.write_str("'Program'"),
            Token::Eof => f.write_str("end of input"),
        }
    }
}

pub struct Lexer {
    source: Vec<char>,
    pos: usize,
    line: usize,
}

impl Lexer {
    pub fn new(source: &str) -> Self {
        Self {
            source: source.chars().collect(),
            pos: 0,
            line: 1,
        }
    }

    /// 1-based line of the most recently lexed token.
    pub fn line(&self) -> usize {
        self.line
    }

    fn current(&self) -> Option<char> {
        self.source.get(self.pos).copied()
    }

    fn peek(&self) -> Option<char> {
        self.source.get(self.pos + 1).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.current();
        if ch == Some('\n') {
            self.line += 1;
        }
        self.pos += 1;
        ch
    }

    fn error(&self, kind: CompileErrorKind) -> CompileError {
        CompileError {
            line: self.line,
            kind,
        }
    }

    fn skip_trivia(&mut self) {
        while let Some(ch) = self.current() {
            if ch.is_whitespace() {
                self.advance();
            } else if ch == ';' {
                while let Some(ch) = self.current() {
                    if ch == '\n' {
                        break;
                    }
                    self.advance();
                }
            } else {
                break;
            }
        }
    }

    fn identifier_tail(&mut self, first: char) -> String {
        let mut name = String::new();
        name.push(first);
        while let Some(ch) = self.current() {
            if ch.is_ascii_alphanumeric() || ch == '_' {
                name.push(ch);
                self.advance();
            } else {
                break;
            }
        }
        name
    }

    /// Read the name after `$`, `#`, or `%`. The sigil must be followed by a
    /// letter.
    fn sigil_name(&mut self, sigil: char) -> Result<String, CompileError> {
        self.advance();
        match self.current() {
            Some(ch) if ch.is_ascii_alphabetic() => {
                self.advance();
                Ok(self.identifier_tail(ch))
            }
            _ => Err(self.error(CompileErrorKind::MalformedSigil(sigil))),
        }
    }

    fn number(&mut self, first: char) -> Token {
        let mut value = first.to_digit(10).unwrap_or(0) as i16;
        while let Some(ch) = self.current() {
            let Some(digit) = ch.to_digit(10) else {
                break;
            };
            value = value.wrapping_mul(10).wrapping_add(digit as i16);
            self.advance();
        }
        Token::Number(value)
    }

    /// Lex the next token, skipping whitespace and `;` comments.
    pub fn next_token(&mut self) -> Result<Token, CompileError> {
        self.skip_trivia();
        let Some(ch) = self.current() else {
            return Ok(Token::Eof);
        };

        match ch {
            '(' => {
                self.advance();
                Ok(Token::LeftParen)
            }
            ')' => {
                self.advance();
                Ok(Token::RightParen)
            }
            ':' => {
                self.advance();
                Ok(Token::Colon)
            }
            ',' => {
                self.advance();
                Ok(Token::Comma)
            }
            '=' => {
                self.advance();
                if self.current() == Some('=') {
                    self.advance();
                    Ok(Token::Equal)
                } else {
                    Ok(Token::Assign)
                }
            }
            '!' => {
                self.advance();
                if self.current() == Some('=') {
                    self.advance();
                    Ok(Token::NotEqual)
                } else {
                    Ok(Token::Bang)
                }
            }
            '<' => {
                self.advance();
                if self.current() == Some('=') {
                    self.advance();
                    Ok(Token::LessEqual)
                } else {
                    Ok(Token::Less)
                }
            }
            '>' => {
                self.advance();
                if self.current() == Some('=') {
                    self.advance();
                    Ok(Token::GreaterEqual)
                } else {
                    Ok(Token::Greater)
                }
            }
            '|' => {
                self.advance();
                Ok(Token::Or)
            }
            '&' => {
                self.advance();
                Ok(Token::And)
            }
            '^' => {
                self.advance();
                Ok(Token::Xor)
            }
            '+' => {
                self.advance();
                Ok(Token::Plus)
            }
            '-' => {
                self.advance();
                Ok(Token::Minus)
            }
            '*' => {
                self.advance();
                Ok(Token::Star)
            }
            '/' => {
                self.advance();
                Ok(Token::Slash)
            }
            '$' => Ok(Token::Variable(self.sigil_name('$')?)),
            '#' => Ok(Token::Constant(self.sigil_name('#')?)),
            '%' => Ok(Token::Label(self.sigil_name('%')?)),
            _ if ch.is_ascii_digit() => {
                self.advance();
                Ok(self.number(ch))
            }
            _ if ch.is_ascii_alphabetic() => {
                self.advance();
                let name = self.identifier_tail(ch);
                Ok(match name.as_str() {
                    "DefineAnt" => Token::DefineAnt,
                    "Configuration" => Token::Configuration,
                    "Program" => Token::Program,
                    _ => Token::Identifier(name),
                })
            }
            _ => Err(self.error(CompileErrorKind::UnexpectedCharacter(ch))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex_all(source: &str) -> Vec<Token> {
        let mut lexer = Lexer::new(source);
        let mut tokens = Vec::new();
        loop {
            let token = lexer.next_token().expect("token");
            let done = token == Token::Eof;
            tokens.push(token);
            if done {
                return tokens;
            }
        }
    }

    #[test]
    fn lexes_all_token_kinds() {
        let tokens = lex_all("( ) : , = == != < <= > >= | & ^ + - * / !");
        assert_eq!(
            tokens,
            vec![
                Token::LeftParen,
                Token::RightParen,
                Token::Colon,
                Token::Comma,
                Token::Assign,
                Token::Equal,
                Token::NotEqual,
                Token::Less,
                Token::LessEqual,
                Token::Greater,
                Token::GreaterEqual,
                Token::Or,
                Token::And,
                Token::Xor,
                Token::Plus,
                Token::Minus,
                Token::Star,
                Token::Slash,
                Token::Bang,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn lexes_sigils_numbers_and_keywords() {
        let tokens = lex_all("DefineAnt Worker $x_1 #North %loop 42 Move Configuration Program");
        assert_eq!(
            tokens,
            vec![
                Token::DefineAnt,
                Token::Identifier("Worker".into()),
                Token::Variable("x_1".into()),
                Token::Constant("North".into()),
                Token::Label("loop".into()),
                Token::Number(42),
                Token::Identifier("Move".into()),
                Token::Configuration,
                Token::Program,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn skips_comments_and_counts_lines() {
        let mut lexer = Lexer::new("; header comment\n$a ; trailing\n\n$b");
        assert_eq!(lexer.next_token().expect("token"), Token::Variable("a".into()));
        assert_eq!(lexer.line(), 2);
        assert_eq!(lexer.next_token().expect("token"), Token::Variable("b".into()));
        assert_eq!(lexer.line(), 4);
        assert_eq!(lexer.next_token().expect("token"), Token::Eof);
    }

    #[test]
    fn number_literals_wrap_at_sixteen_bits() {
        assert_eq!(lex_all("32767")[0], Token::Number(32767));
        assert_eq!(lex_all("32768")[0], Token::Number(-32768));
        assert_eq!(lex_all("65536")[0], Token::Number(0));
    }

    #[test]
    fn sigils_require_a_letter() {
        let mut lexer = Lexer::new("$1");
        let err = lexer.next_token().expect_err("malformed sigil");
        assert_eq!(err.kind, CompileErrorKind::MalformedSigil('$'));
        assert_eq!(err.line, 1);

        let mut lexer = Lexer::new("\n#");
        let err = lexer.next_token().expect_err("malformed sigil");
        assert_eq!(err.kind, CompileErrorKind::MalformedSigil('#'));
        assert_eq!(err.line, 2);
    }

    #[test]
    fn rejects_unexpected_characters() {
        let mut lexer = Lexer::new("\n\n@");
        let err = lexer.next_token().expect_err("unexpected character");
        assert_eq!(err.kind, CompileErrorKind::UnexpectedCharacter('@'));
        assert_eq!(err.line, 3);
    }
}
