//! Parser for the rule-definition language.
//!
//! The language is a deliberately small YARA-style surface: each rule has an
//! identifier, an optional `meta:` section of key/value pairs, an optional
//! `strings:` section of named literal or regex patterns, and an optional
//! `condition:` boolean expression over which patterns matched. Hex-string
//! patterns, tags, and module imports are not part of the surface; rules
//! using them are rejected at parse time rather than silently skipped.
//!
//! ```text
//! rule SlackBotToken {
//!     meta:
//!         name = "Slack bot token"
//!         severity = "high"
//!     strings:
//!         $token = /xox[aboprs]-(?:[0-9]+-)+[0-9A-Za-z]+/
//!         $word  = "slack" nocase
//!     condition:
//!         $token or ($word and filename != "")
//! }
//! ```

use std::fmt;

use super::model::{
    ConditionExpr, MetaEntry, MetaValue, PatternDef, PatternKind, PatternSet, Quantifier, RuleDef,
};

/// A parse failure with the source line it occurred on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    /// 1-based line number in the rule source.
    pub line: usize,
    /// Human-readable description of the failure.
    pub message: String,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

impl std::error::Error for ParseError {}

/// Parse a rule source into its rule definitions.
///
/// An empty (or comment-only) source parses to an empty list; whether that
/// is acceptable is the compiler's call.
///
/// # Errors
///
/// Returns [`ParseError`] on any lexical or structural defect, with the
/// offending line number.
pub fn parse_rules(source: &str) -> Result<Vec<RuleDef>, ParseError> {
    let tokens = tokenize(source)?;
    Parser::new(tokens).parse_corpus()
}

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Var(String),
    VarGlob(String),
    Str(String),
    Regex(String),
    Int(i64),
    LBrace,
    RBrace,
    LParen,
    RParen,
    Colon,
    Eq,
    EqEq,
    NotEq,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ident(s) => write!(f, "`{s}`"),
            Self::Var(s) => write!(f, "`${s}`"),
            Self::VarGlob(s) => write!(f, "`${s}*`"),
            Self::Str(_) => f.write_str("string literal"),
            Self::Regex(_) => f.write_str("regex literal"),
            Self::Int(n) => write!(f, "`{n}`"),
            Self::LBrace => f.write_str("`{`"),
            Self::RBrace => f.write_str("`}`"),
            Self::LParen => f.write_str("`(`"),
            Self::RParen => f.write_str("`)`"),
            Self::Colon => f.write_str("`:`"),
            Self::Eq => f.write_str("`=`"),
            Self::EqEq => f.write_str("`==`"),
            Self::NotEq => f.write_str("`!=`"),
        }
    }
}

fn err(line: usize, message: impl Into<String>) -> ParseError {
    ParseError {
        line,
        message: message.into(),
    }
}

fn tokenize(source: &str) -> Result<Vec<(Token, usize)>, ParseError> {
    let mut tokens = Vec::new();
    let mut chars = source.chars().peekable();
    let mut line: usize = 1;

    while let Some(c) = chars.next() {
        match c {
            '\n' => line = line.saturating_add(1),
            c if c.is_whitespace() => {}
            '{' => tokens.push((Token::LBrace, line)),
            '}' => tokens.push((Token::RBrace, line)),
            '(' => tokens.push((Token::LParen, line)),
            ')' => tokens.push((Token::RParen, line)),
            ':' => tokens.push((Token::Colon, line)),
            '=' => {
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push((Token::EqEq, line));
                } else {
                    tokens.push((Token::Eq, line));
                }
            }
            '!' => {
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push((Token::NotEq, line));
                } else {
                    return Err(err(line, "unexpected `!` (did you mean `!=` or `not`?)"));
                }
            }
            '/' => match chars.peek() {
                Some('/') => {
                    // Line comment.
                    for c in chars.by_ref() {
                        if c == '\n' {
                            line = line.saturating_add(1);
                            break;
                        }
                    }
                }
                Some('*') => {
                    chars.next();
                    let mut closed = false;
                    while let Some(c) = chars.next() {
                        if c == '\n' {
                            line = line.saturating_add(1);
                        } else if c == '*' && chars.peek() == Some(&'/') {
                            chars.next();
                            closed = true;
                            break;
                        }
                    }
                    if !closed {
                        return Err(err(line, "unterminated block comment"));
                    }
                }
                _ => {
                    let token = lex_regex(&mut chars, line)?;
                    tokens.push((token, line));
                }
            },
            '"' => {
                let token = lex_string(&mut chars, line)?;
                tokens.push((token, line));
            }
            '$' => {
                let name = lex_ident_tail(&mut chars, String::new());
                if name.is_empty() {
                    return Err(err(line, "anonymous `$` patterns are not supported"));
                }
                if chars.peek() == Some(&'*') {
                    chars.next();
                    tokens.push((Token::VarGlob(name), line));
                } else {
                    tokens.push((Token::Var(name), line));
                }
            }
            '-' => {
                let digits = lex_digit_tail(&mut chars, String::from("-"));
                let value = digits
                    .parse::<i64>()
                    .map_err(|_| err(line, format!("invalid integer `{digits}`")))?;
                tokens.push((Token::Int(value), line));
            }
            c if c.is_ascii_digit() => {
                let digits = lex_digit_tail(&mut chars, c.to_string());
                let value = digits
                    .parse::<i64>()
                    .map_err(|_| err(line, format!("invalid integer `{digits}`")))?;
                tokens.push((Token::Int(value), line));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let ident = lex_ident_tail(&mut chars, c.to_string());
                tokens.push((Token::Ident(ident), line));
            }
            other => return Err(err(line, format!("unexpected character `{other}`"))),
        }
    }

    Ok(tokens)
}

fn lex_ident_tail(
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
    mut out: String,
) -> String {
    while let Some(&c) = chars.peek() {
        if c.is_ascii_alphanumeric() || c == '_' {
            out.push(c);
            chars.next();
        } else {
            break;
        }
    }
    out
}

fn lex_digit_tail(
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
    mut out: String,
) -> String {
    while let Some(&c) = chars.peek() {
        if c.is_ascii_digit() {
            out.push(c);
            chars.next();
        } else {
            break;
        }
    }
    out
}

fn lex_string(
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
    line: usize,
) -> Result<Token, ParseError> {
    let mut out = String::new();
    while let Some(c) = chars.next() {
        match c {
            '"' => return Ok(Token::Str(out)),
            '\n' => return Err(err(line, "unterminated string literal")),
            '\\' => match chars.next() {
                Some('"') => out.push('"'),
                Some('\\') => out.push('\\'),
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('r') => out.push('\r'),
                Some(other) => {
                    return Err(err(line, format!("unsupported string escape `\\{other}`")))
                }
                None => return Err(err(line, "unterminated string literal")),
            },
            other => out.push(other),
        }
    }
    Err(err(line, "unterminated string literal"))
}

/// Lex `/pattern/flags`. Trailing `i`/`s` flags are folded into an inline
/// `(?...)` group so downstream code only ever sees plain regex text.
fn lex_regex(
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
    line: usize,
) -> Result<Token, ParseError> {
    let mut body = String::new();
    loop {
        match chars.next() {
            Some('/') => break,
            Some('\n') | None => return Err(err(line, "unterminated regex literal")),
            Some('\\') => match chars.next() {
                // `\/` is the only escape the lexer interprets; everything
                // else belongs to the regex engine.
                Some('/') => body.push('/'),
                Some(other) => {
                    body.push('\\');
                    body.push(other);
                }
                None => return Err(err(line, "unterminated regex literal")),
            },
            Some(other) => body.push(other),
        }
    }

    let mut flags = String::new();
    while let Some(&c) = chars.peek() {
        match c {
            'i' | 's' => {
                if !flags.contains(c) {
                    flags.push(c);
                }
                chars.next();
            }
            c if c.is_ascii_alphanumeric() => {
                return Err(err(line, format!("unsupported regex flag `{c}`")))
            }
            _ => break,
        }
    }

    if flags.is_empty() {
        Ok(Token::Regex(body))
    } else {
        Ok(Token::Regex(format!("(?{flags}){body}")))
    }
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<(Token, usize)>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens
            .get(self.pos.saturating_add(offset))
            .map(|(t, _)| t)
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map_or(1, |(_, line)| *line)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(t, _)| t.clone());
        if token.is_some() {
            self.pos = self.pos.saturating_add(1);
        }
        token
    }

    fn expect_ident(&mut self, expected: &str) -> Result<(), ParseError> {
        let line = self.line();
        match self.next() {
            Some(Token::Ident(ref s)) if s == expected => Ok(()),
            Some(other) => Err(err(line, format!("expected `{expected}`, found {other}"))),
            None => Err(err(line, format!("expected `{expected}`, found end of input"))),
        }
    }

    fn expect(&mut self, expected: &Token) -> Result<(), ParseError> {
        let line = self.line();
        match self.next() {
            Some(ref t) if t == expected => Ok(()),
            Some(other) => Err(err(line, format!("expected {expected}, found {other}"))),
            None => Err(err(line, format!("expected {expected}, found end of input"))),
        }
    }

    fn parse_corpus(&mut self) -> Result<Vec<RuleDef>, ParseError> {
        let mut rules = Vec::new();
        while self.peek().is_some() {
            rules.push(self.parse_rule()?);
        }
        Ok(rules)
    }

    fn parse_rule(&mut self) -> Result<RuleDef, ParseError> {
        self.expect_ident("rule")?;
        let line = self.line();
        let identifier = match self.next() {
            Some(Token::Ident(name)) => name,
            Some(other) => return Err(err(line, format!("expected rule name, found {other}"))),
            None => return Err(err(line, "expected rule name, found end of input")),
        };
        self.expect(&Token::LBrace)?;

        let mut meta = None;
        let mut patterns = None;
        let mut condition = None;

        loop {
            let line = self.line();
            match self.next() {
                Some(Token::RBrace) => break,
                Some(Token::Ident(section)) => {
                    self.expect(&Token::Colon)?;
                    match section.as_str() {
                        "meta" if meta.is_none() => meta = Some(self.parse_meta()?),
                        "strings" if patterns.is_none() => {
                            patterns = Some(self.parse_strings(&identifier)?);
                        }
                        "condition" if condition.is_none() => {
                            condition = Some(self.parse_condition()?);
                        }
                        "meta" | "strings" | "condition" => {
                            return Err(err(
                                line,
                                format!("duplicate `{section}` section in rule `{identifier}`"),
                            ));
                        }
                        other => {
                            return Err(err(
                                line,
                                format!("unknown section `{other}` in rule `{identifier}`"),
                            ));
                        }
                    }
                }
                Some(other) => {
                    return Err(err(
                        line,
                        format!("expected section or `}}` in rule `{identifier}`, found {other}"),
                    ));
                }
                None => {
                    return Err(err(line, format!("unterminated rule `{identifier}`")));
                }
            }
        }

        Ok(RuleDef {
            identifier,
            meta: meta.unwrap_or_default(),
            patterns: patterns.unwrap_or_default(),
            condition,
        })
    }

    /// `meta:` entries end where the next section (ident + colon) or the
    /// closing brace begins; an ident followed by `=` is always an entry.
    fn parse_meta(&mut self) -> Result<Vec<MetaEntry>, ParseError> {
        let mut entries = Vec::new();
        while let (Some(Token::Ident(_)), Some(Token::Eq)) = (self.peek(), self.peek_at(1)) {
            let key = match self.next() {
                Some(Token::Ident(key)) => key,
                _ => unreachable!("peeked ident"),
            };
            self.expect(&Token::Eq)?;
            let line = self.line();
            let value = match self.next() {
                Some(Token::Str(s)) => MetaValue::Str(s),
                Some(Token::Int(n)) => MetaValue::Int(n),
                Some(Token::Ident(ref w)) if w == "true" => MetaValue::Bool(true),
                Some(Token::Ident(ref w)) if w == "false" => MetaValue::Bool(false),
                Some(other) => {
                    return Err(err(line, format!("invalid meta value for `{key}`: {other}")))
                }
                None => return Err(err(line, format!("missing meta value for `{key}`"))),
            };
            entries.push(MetaEntry { key, value });
        }
        Ok(entries)
    }

    fn parse_strings(&mut self, rule: &str) -> Result<Vec<PatternDef>, ParseError> {
        let mut patterns: Vec<PatternDef> = Vec::new();
        while let Some(Token::Var(_)) = self.peek() {
            let line = self.line();
            let name = match self.next() {
                Some(Token::Var(name)) => name,
                _ => unreachable!("peeked var"),
            };
            if patterns.iter().any(|p| p.name == name) {
                return Err(err(
                    line,
                    format!("duplicate pattern `${name}` in rule `{rule}`"),
                ));
            }
            self.expect(&Token::Eq)?;
            let line = self.line();
            let kind = match self.next() {
                Some(Token::Str(text)) => self.parse_literal_modifiers(text, line)?,
                Some(Token::Regex(pattern)) => PatternKind::Regex(pattern),
                Some(other) => {
                    return Err(err(
                        line,
                        format!("expected string or regex for `${name}`, found {other}"),
                    ));
                }
                None => {
                    return Err(err(line, format!("missing pattern body for `${name}`")));
                }
            };
            patterns.push(PatternDef { name, kind });
        }
        Ok(patterns)
    }

    /// Consume trailing literal modifiers (`nocase`, `fullword`, `ascii`).
    ///
    /// `fullword` is folded into an anchored regex here so the compiler
    /// only has to handle the three pattern kinds. `ascii` is the default
    /// matching mode and parses as a no-op; `wide` and the rest of YARA's
    /// modifier zoo are rejected.
    fn parse_literal_modifiers(
        &mut self,
        text: String,
        line: usize,
    ) -> Result<PatternKind, ParseError> {
        let mut nocase = false;
        let mut fullword = false;
        while let Some(Token::Ident(word)) = self.peek() {
            match word.as_str() {
                "nocase" => {
                    nocase = true;
                    self.next();
                }
                "fullword" => {
                    fullword = true;
                    self.next();
                }
                "ascii" => {
                    self.next();
                }
                "wide" | "xor" | "base64" | "base64wide" | "private" => {
                    return Err(err(line, format!("unsupported pattern modifier `{word}`")));
                }
                _ => break,
            }
        }

        if fullword {
            let escaped = regex::escape(&text);
            let flags = if nocase { "(?i)" } else { "" };
            return Ok(PatternKind::Regex(format!("{flags}\\b{escaped}\\b")));
        }
        if nocase {
            return Ok(PatternKind::LiteralNoCase(text));
        }
        Ok(PatternKind::Literal(text))
    }

    fn parse_condition(&mut self) -> Result<ConditionExpr, ParseError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<ConditionExpr, ParseError> {
        let mut left = self.parse_and()?;
        while let Some(Token::Ident(w)) = self.peek() {
            if w != "or" {
                break;
            }
            self.next();
            let right = self.parse_and()?;
            left = ConditionExpr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<ConditionExpr, ParseError> {
        let mut left = self.parse_unary()?;
        while let Some(Token::Ident(w)) = self.peek() {
            if w != "and" {
                break;
            }
            self.next();
            let right = self.parse_unary()?;
            left = ConditionExpr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<ConditionExpr, ParseError> {
        if let Some(Token::Ident(w)) = self.peek() {
            if w == "not" {
                self.next();
                let inner = self.parse_unary()?;
                return Ok(ConditionExpr::Not(Box::new(inner)));
            }
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<ConditionExpr, ParseError> {
        let line = self.line();
        match self.next() {
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Var(name)) => Ok(ConditionExpr::Pattern(name)),
            Some(Token::Int(n)) => {
                let count = u32::try_from(n)
                    .map_err(|_| err(line, format!("invalid pattern count `{n}`")))?;
                self.parse_of(Quantifier::AtLeast(count))
            }
            Some(Token::Ident(word)) => match word.as_str() {
                "any" => self.parse_of(Quantifier::Any),
                "all" => self.parse_of(Quantifier::All),
                "true" => Ok(ConditionExpr::Bool(true)),
                "false" => Ok(ConditionExpr::Bool(false)),
                _ => {
                    // External variable: bare, `== "..."`, or `!= "..."`.
                    match self.peek() {
                        Some(Token::EqEq) => {
                            self.next();
                            let value = self.expect_string()?;
                            Ok(ConditionExpr::ExternalEq(word, value))
                        }
                        Some(Token::NotEq) => {
                            self.next();
                            let value = self.expect_string()?;
                            Ok(ConditionExpr::ExternalNe(word, value))
                        }
                        _ => Ok(ConditionExpr::External(word)),
                    }
                }
            },
            Some(other) => Err(err(line, format!("unexpected {other} in condition"))),
            None => Err(err(line, "unexpected end of input in condition")),
        }
    }

    fn parse_of(&mut self, quantifier: Quantifier) -> Result<ConditionExpr, ParseError> {
        self.expect_ident("of")?;
        let line = self.line();
        match self.next() {
            Some(Token::Ident(ref w)) if w == "them" => {
                Ok(ConditionExpr::Of(quantifier, PatternSet::Them))
            }
            Some(Token::LParen) => {
                let line = self.line();
                let prefix = match self.next() {
                    Some(Token::VarGlob(prefix)) => prefix,
                    Some(other) => {
                        return Err(err(
                            line,
                            format!("expected `$prefix*` in `of (...)`, found {other}"),
                        ));
                    }
                    None => return Err(err(line, "unterminated `of (...)` group")),
                };
                self.expect(&Token::RParen)?;
                Ok(ConditionExpr::Of(quantifier, PatternSet::Prefix(prefix)))
            }
            Some(other) => Err(err(
                line,
                format!("expected `them` or `($prefix*)` after `of`, found {other}"),
            )),
            None => Err(err(line, "expected `them` or `($prefix*)` after `of`")),
        }
    }

    fn expect_string(&mut self) -> Result<String, ParseError> {
        let line = self.line();
        match self.next() {
            Some(Token::Str(s)) => Ok(s),
            Some(other) => Err(err(line, format!("expected string literal, found {other}"))),
            None => Err(err(line, "expected string literal, found end of input")),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
