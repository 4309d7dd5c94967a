//! Tokenizer for the analysis dialect: indentation-sensitive, with implicit
//! line joining inside brackets and triple-quoted string support (generated
//! SQL often spans lines).

use crate::error::{AgentError, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Name(String),
    Int(i64),
    Float(f64),
    Str(String),
    // keywords
    Def,
    Return,
    If,
    Elif,
    Else,
    For,
    In,
    And,
    Or,
    Not,
    True,
    False,
    None,
    Pass,
    // punctuation
    Plus,
    Minus,
    Star,
    Slash,
    DoubleSlash,
    Percent,
    Assign,
    EqEq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Dot,
    Newline,
    Indent,
    Dedent,
    Eof,
}

pub struct Lexer<'a> {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    src: std::marker::PhantomData<&'a str>,
    tokens: Vec<Token>,
    indent_stack: Vec<usize>,
    bracket_depth: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            src: std::marker::PhantomData,
            tokens: Vec::new(),
            indent_stack: vec![0],
            bracket_depth: 0,
        }
    }

    fn err(&self, msg: &str) -> AgentError {
        AgentError::Syntax(format!("line {}: {}", self.line, msg))
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if c == Some('\n') {
            self.line += 1;
        }
        self.pos += 1;
        c
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>> {
        loop {
            self.at_line_start()?;
            if self.pos >= self.chars.len() {
                break;
            }
            self.lex_line()?;
        }
        // close any open indentation
        while self.indent_stack.len() > 1 {
            self.indent_stack.pop();
            self.tokens.push(Token::Dedent);
        }
        self.tokens.push(Token::Eof);
        Ok(self.tokens)
    }

    /// Handle indentation at a logical line start; skips blank and
    /// comment-only lines.
    fn at_line_start(&mut self) -> Result<()> {
        loop {
            let mut indent = 0usize;
            let mut scan = self.pos;
            while let Some(c) = self.chars.get(scan).copied() {
                match c {
                    ' ' => indent += 1,
                    '\t' => indent += 4,
                    _ => break,
                }
                scan += 1;
            }
            match self.chars.get(scan).copied() {
                Option::None => {
                    self.pos = scan;
                    return Ok(());
                }
                Some('\n') => {
                    // blank line
                    self.pos = scan + 1;
                    self.line += 1;
                    continue;
                }
                Some('#') => {
                    // comment-only line
                    self.pos = scan;
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            self.bump();
                            break;
                        }
                        self.bump();
                    }
                    continue;
                }
                Some(_) => {
                    self.pos = scan;
                    let current = *self.indent_stack.last().unwrap_or(&0);
                    if indent > current {
                        self.indent_stack.push(indent);
                        self.tokens.push(Token::Indent);
                    } else if indent < current {
                        while *self.indent_stack.last().unwrap_or(&0) > indent {
                            self.indent_stack.pop();
                            self.tokens.push(Token::Dedent);
                        }
                        if *self.indent_stack.last().unwrap_or(&0) != indent {
                            return Err(self.err("inconsistent indentation"));
                        }
                    }
                    return Ok(());
                }
            }
        }
    }

    /// Lex one logical line (may span physical lines inside brackets).
    fn lex_line(&mut self) -> Result<()> {
        loop {
            match self.peek() {
                Option::None => {
                    if self.bracket_depth > 0 {
                        return Err(self.err("unclosed bracket at end of input"));
                    }
                    self.tokens.push(Token::Newline);
                    return Ok(());
                }
                Some('\n') => {
                    self.bump();
                    if self.bracket_depth == 0 {
                        self.tokens.push(Token::Newline);
                        return Ok(());
                    }
                }
                Some(' ') | Some('\t') | Some('\r') => {
                    self.bump();
                }
                Some('#') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                Some(c) if c == '"' || c == '\'' => {
                    let s = self.lex_string(c)?;
                    self.tokens.push(Token::Str(s));
                }
                Some(c) if c.is_ascii_digit() => {
                    self.lex_number()?;
                }
                Some(c) if c.is_alphabetic() || c == '_' => {
                    self.lex_word();
                }
                Some(_) => {
                    self.lex_punct()?;
                }
            }
        }
    }

    fn lex_string(&mut self, quote: char) -> Result<String> {
        let triple = self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote);
        if triple {
            self.bump();
            self.bump();
            self.bump();
        } else {
            self.bump();
        }
        let mut out = String::new();
        loop {
            match self.peek() {
                Option::None => return Err(self.err("unterminated string literal")),
                Some('\\') => {
                    self.bump();
                    match self.bump() {
                        Some('n') => out.push('\n'),
                        Some('t') => out.push('\t'),
                        Some('r') => out.push('\r'),
                        Some('\\') => out.push('\\'),
                        Some('\'') => out.push('\''),
                        Some('"') => out.push('"'),
                        Some(other) => {
                            out.push('\\');
                            out.push(other);
                        }
                        Option::None => return Err(self.err("unterminated escape")),
                    }
                }
                Some(c) if c == quote => {
                    if triple {
                        if self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote) {
                            self.bump();
                            self.bump();
                            self.bump();
                            return Ok(out);
                        }
                        self.bump();
                        out.push(c);
                    } else {
                        self.bump();
                        return Ok(out);
                    }
                }
                Some('\n') if !triple => return Err(self.err("newline in string literal")),
                Some(c) => {
                    self.bump();
                    out.push(c);
                }
            }
        }
    }

    fn lex_number(&mut self) -> Result<()> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.bump();
        }
        let mut is_float = false;
        if self.peek() == Some('.') && matches!(self.peek_at(1), Some(c) if c.is_ascii_digit()) {
            is_float = true;
            self.bump();
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                self.bump();
            }
        }
        if matches!(self.peek(), Some('e') | Some('E')) {
            let mut scan = 1;
            if matches!(self.peek_at(1), Some('+') | Some('-')) {
                scan = 2;
            }
            if matches!(self.peek_at(scan), Some(c) if c.is_ascii_digit()) {
                is_float = true;
                for _ in 0..scan {
                    self.bump();
                }
                while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                    self.bump();
                }
            }
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        if is_float {
            let value: f64 = text
                .parse()
                .map_err(|_| self.err(&format!("invalid number `{}`", text)))?;
            self.tokens.push(Token::Float(value));
        } else {
            match text.parse::<i64>() {
                Ok(value) => self.tokens.push(Token::Int(value)),
                Err(_) => {
                    let value: f64 = text
                        .parse()
                        .map_err(|_| self.err(&format!("invalid number `{}`", text)))?;
                    self.tokens.push(Token::Float(value));
                }
            }
        }
        Ok(())
    }

    fn lex_word(&mut self) {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_alphanumeric() || c == '_') {
            self.bump();
        }
        let word: String = self.chars[start..self.pos].iter().collect();
        let token = match word.as_str() {
            "def" => Token::Def,
            "return" => Token::Return,
            "if" => Token::If,
            "elif" => Token::Elif,
            "else" => Token::Else,
            "for" => Token::For,
            "in" => Token::In,
            "and" => Token::And,
            "or" => Token::Or,
            "not" => Token::Not,
            "True" => Token::True,
            "False" => Token::False,
            "None" => Token::None,
            "pass" => Token::Pass,
            _ => Token::Name(word),
        };
        self.tokens.push(token);
    }

    fn lex_punct(&mut self) -> Result<()> {
        let c = self.bump().unwrap_or(' ');
        let token = match c {
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' => Token::Star,
            '/' => {
                if self.peek() == Some('/') {
                    self.bump();
                    Token::DoubleSlash
                } else {
                    Token::Slash
                }
            }
            '%' => Token::Percent,
            '=' => {
                if self.peek() == Some('=') {
                    self.bump();
                    Token::EqEq
                } else {
                    Token::Assign
                }
            }
            '!' => {
                if self.peek() == Some('=') {
                    self.bump();
                    Token::NotEq
                } else {
                    return Err(self.err("unexpected `!`"));
                }
            }
            '<' => {
                if self.peek() == Some('=') {
                    self.bump();
                    Token::LtEq
                } else {
                    Token::Lt
                }
            }
            '>' => {
                if self.peek() == Some('=') {
                    self.bump();
                    Token::GtEq
                } else {
                    Token::Gt
                }
            }
            '(' => {
                self.bracket_depth += 1;
                Token::LParen
            }
            ')' => {
                self.bracket_depth = self.bracket_depth.saturating_sub(1);
                Token::RParen
            }
            '[' => {
                self.bracket_depth += 1;
                Token::LBracket
            }
            ']' => {
                self.bracket_depth = self.bracket_depth.saturating_sub(1);
                Token::RBracket
            }
            '{' => {
                self.bracket_depth += 1;
                Token::LBrace
            }
            '}' => {
                self.bracket_depth = self.bracket_depth.saturating_sub(1);
                Token::RBrace
            }
            ',' => Token::Comma,
            ':' => Token::Colon,
            '.' => Token::Dot,
            other => return Err(self.err(&format!("unexpected character `{}`", other))),
        };
        self.tokens.push(token);
        Ok(())
    }
}

pub fn tokenize(source: &str) -> Result<Vec<Token>> {
    Lexer::new(source).tokenize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_assignment() {
        let tokens = tokenize("x = 1\n").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Name("x".into()),
                Token::Assign,
                Token::Int(1),
                Token::Newline,
                Token::Eof
            ]
        );
    }

    #[test]
    fn joins_lines_inside_brackets() {
        let tokens = tokenize("x = f(\n    1,\n    2\n)\n").unwrap();
        assert!(!tokens[..tokens.len() - 2].contains(&Token::Newline));
        assert!(!tokens.contains(&Token::Indent));
    }

    #[test]
    fn triple_quoted_string_spans_lines() {
        let tokens = tokenize("q = \"\"\"SELECT *\nFROM t\"\"\"\n").unwrap();
        assert!(tokens.contains(&Token::Str("SELECT *\nFROM t".into())));
    }

    #[test]
    fn indent_dedent_pairs() {
        let tokens = tokenize("if x:\n    y = 1\nz = 2\n").unwrap();
        let indents = tokens.iter().filter(|t| **t == Token::Indent).count();
        let dedents = tokens.iter().filter(|t| **t == Token::Dedent).count();
        assert_eq!(indents, 1);
        assert_eq!(dedents, 1);
    }

    #[test]
    fn comments_are_skipped() {
        let tokens = tokenize("# header\nx = 1  # trailing\n").unwrap();
        assert_eq!(tokens.iter().filter(|t| matches!(t, Token::Name(_))).count(), 1);
    }

    #[test]
    fn rejects_unterminated_string() {
        assert!(tokenize("x = \"oops\n").is_err());
    }
}
