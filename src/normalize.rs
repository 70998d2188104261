//! Source normalization: a canonical token string that ignores layout, comments,
//! literal contents and local names, so renamed or reformatted copies of the same
//! program compare equal.

use std::collections::HashMap;

use crate::{EcoResult, Language};

pub const STR_PLACEHOLDER: &str = "<STR>";
pub const CHAR_PLACEHOLDER: &str = "<CHAR>";

const PYTHON_STRING_PREFIXES: &str = "rRuUbBfF";

/// Punctuation that never has a space on either side in the canonical form.
const TIGHT_PUNCT: &[char] = &['(', ')', ';', ',', '{', '}', '[', ']'];

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String),
    Number(String),
    Literal(&'static str),
    Punct(char),
}

/// Normalize `source` written in the language named by `language` (e.g. `"python"`).
pub fn normalize(source: &str, language: &str) -> EcoResult<String> {
    let language: Language = language.parse()?;
    Ok(normalize_language(source, language))
}

pub fn normalize_language(source: &str, language: Language) -> String {
    let tokens = Lexer::new(source, language).tokenize();
    join(&classify(&tokens, language))
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    language: Language,
}

impl Lexer {
    fn new(source: &str, language: Language) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            language,
        }
    }

    fn peek(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn tokenize(mut self) -> Vec<Token> {
        let mut out = Vec::new();
        while let Some(c) = self.peek(0) {
            if c.is_whitespace() {
                self.pos += 1;
                continue;
            }

            if self.language.has_c_comments() && c == '/' {
                match self.peek(1) {
                    Some('/') => {
                        self.skip_line();
                        continue;
                    }
                    Some('*') => {
                        self.skip_block_comment();
                        continue;
                    }
                    _ => {}
                }
            }

            if self.language == Language::Python {
                if c == '#' {
                    self.skip_line();
                    continue;
                }
                if let Some(tok) = self.python_string() {
                    out.push(tok);
                    continue;
                }
            }

            if self.language == Language::Javascript && c == '`' {
                self.skip_template();
                out.push(Token::Literal(STR_PLACEHOLDER));
                continue;
            }

            if c == '"' || c == '\'' {
                if let Some(end) = self.quoted_end(self.pos) {
                    self.pos = end;
                    out.push(Token::Literal(self.quote_placeholder(c)));
                } else {
                    self.pos += 1;
                    out.push(Token::Punct(c));
                }
                continue;
            }

            if is_ident_start(c) {
                out.push(Token::Ident(self.take_ident()));
                continue;
            }

            if c.is_ascii_digit() {
                out.push(Token::Number(self.take_number()));
                continue;
            }

            self.pos += 1;
            out.push(Token::Punct(c));
        }
        out
    }

    fn quote_placeholder(&self, quote: char) -> &'static str {
        if quote == '\'' && self.language.has_char_literals() {
            CHAR_PLACEHOLDER
        } else {
            STR_PLACEHOLDER
        }
    }

    fn skip_line(&mut self) {
        while let Some(c) = self.peek(0) {
            if c == '\n' {
                break;
            }
            self.pos += 1;
        }
    }

    fn skip_block_comment(&mut self) {
        self.pos += 2;
        while let Some(c) = self.peek(0) {
            if c == '*' && self.peek(1) == Some('/') {
                self.pos += 2;
                return;
            }
            self.pos += 1;
        }
    }

    fn skip_template(&mut self) {
        self.pos += 1;
        while let Some(c) = self.peek(0) {
            match c {
                '\\' => self.pos += 2,
                '`' => {
                    self.pos += 1;
                    return;
                }
                _ => self.pos += 1,
            }
        }
        self.pos = self.pos.min(self.chars.len());
    }

    /// Index just past the closing quote of the literal opened at `open`, if it closes
    /// on the same line.
    fn quoted_end(&self, open: usize) -> Option<usize> {
        let quote = *self.chars.get(open)?;
        let mut i = open + 1;
        loop {
            match self.chars.get(i) {
                None | Some('\n') => return None,
                Some('\\') => i += 2,
                Some(&c) if c == quote => return Some(i + 1),
                Some(_) => i += 1,
            }
        }
    }

    /// Python literals with optional prefixes, including triple-quoted blocks.
    fn python_string(&mut self) -> Option<Token> {
        let mut prefix = 0;
        while prefix < 2
            && self
                .peek(prefix)
                .is_some_and(|c| PYTHON_STRING_PREFIXES.contains(c))
        {
            prefix += 1;
        }
        let quote = self.peek(prefix).filter(|c| *c == '"' || *c == '\'')?;

        if self.peek(prefix + 1) == Some(quote) && self.peek(prefix + 2) == Some(quote) {
            self.pos += prefix + 3;
            self.skip_triple(quote);
            return Some(Token::Literal(STR_PLACEHOLDER));
        }

        let end = self.quoted_end(self.pos + prefix)?;
        self.pos = end;
        Some(Token::Literal(STR_PLACEHOLDER))
    }

    fn skip_triple(&mut self, quote: char) {
        while let Some(c) = self.peek(0) {
            if c == '\\' {
                self.pos += 2;
                continue;
            }
            if c == quote && self.peek(1) == Some(quote) && self.peek(2) == Some(quote) {
                self.pos += 3;
                return;
            }
            self.pos += 1;
        }
        self.pos = self.pos.min(self.chars.len());
    }

    fn take_ident(&mut self) -> String {
        let start = self.pos;
        while self.peek(0).is_some_and(is_ident_continue) {
            self.pos += 1;
        }
        self.chars[start..self.pos].iter().collect()
    }

    fn take_number(&mut self) -> String {
        let start = self.pos;
        let is_hex = self.peek(0) == Some('0')
            && matches!(self.peek(1), Some('x' | 'X'))
            && self.peek(2).is_some_and(|c| c.is_ascii_hexdigit());

        if is_hex {
            self.pos += 2;
            while self.peek(0).is_some_and(|c| c.is_ascii_hexdigit()) {
                self.pos += 1;
            }
        } else {
            self.skip_digits();
            if self.peek(0) == Some('.') && self.peek(1).is_some_and(|c| c.is_ascii_digit()) {
                self.pos += 1;
                self.skip_digits();
            }
            if matches!(self.peek(0), Some('e' | 'E')) {
                let signed = matches!(self.peek(1), Some('+' | '-'));
                let digit_at = if signed { 2 } else { 1 };
                if self.peek(digit_at).is_some_and(|c| c.is_ascii_digit()) {
                    self.pos += digit_at;
                    self.skip_digits();
                }
            }
        }

        // Type suffixes (`10L`, `1.5f`, `7n`) stay attached to the literal.
        while self.peek(0).is_some_and(is_ident_continue) {
            self.pos += 1;
        }
        self.chars[start..self.pos].iter().collect()
    }

    fn skip_digits(&mut self) {
        while self.peek(0).is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn is_all_caps(name: &str) -> bool {
    name.chars().any(char::is_uppercase) && !name.chars().any(char::is_lowercase)
}

fn classify(tokens: &[Token], language: Language) -> Vec<String> {
    let mut renames: HashMap<&str, String> = HashMap::new();
    let mut out = Vec::with_capacity(tokens.len());

    for (i, tok) in tokens.iter().enumerate() {
        let text = match tok {
            Token::Ident(name) => {
                // Covers free calls, constructors and `obj.method(` alike.
                let is_call = matches!(tokens.get(i + 1), Some(Token::Punct('(')));
                if language.is_keyword(name) || is_call || is_all_caps(name) {
                    name.clone()
                } else {
                    let next = renames.len() + 1;
                    renames
                        .entry(name.as_str())
                        .or_insert_with(|| format!("VAR{next}"))
                        .clone()
                }
            }
            Token::Number(n) => n.clone(),
            Token::Literal(placeholder) => (*placeholder).to_string(),
            Token::Punct(c) => c.to_string(),
        };
        out.push(text);
    }
    out
}

fn is_tight(token: &str) -> bool {
    let mut chars = token.chars();
    matches!((chars.next(), chars.next()), (Some(c), None) if TIGHT_PUNCT.contains(&c))
}

fn join(tokens: &[String]) -> String {
    let mut out = String::new();
    let mut prev_tight = true;
    for tok in tokens {
        let tight = is_tight(tok);
        if !prev_tight && !tight {
            out.push(' ');
        }
        out.push_str(tok);
        prev_tight = tight;
    }
    out
}
