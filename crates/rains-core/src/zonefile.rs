//! Zonefile compiler: turns the textual zone format into assertion sets.
//!
//! ```text
//! # comment
//! :Z: example.com. . [
//!     :S: ( , ) [
//!         :A: _smtp._tcp [ :srv: mx 25 10 ]
//!         :A: aaa [
//!             :ip4: 192.0.2.33
//!             :ip6: 2001:db8:cffe:7ea::33
//!         ]
//!     ]
//!     :A: www [ :name: www.example.com. ]
//! ]
//! ```
//!
//! Each `:Z:` block becomes one complete zone set. Shard blocks inside a
//! zone are checked for well-formed bounds and their assertions folded into
//! the zone.
//!
//! A zone or assertion body may carry signatures, each written as
//!
//! ```text
//! :sig: ecdsa-256 2017-01-01T00:00:00 2017-02-01T00:00:00 [content-hex]
//! ```
//!
//! with UTC timestamps bounding the validity window. Zones without one are
//! signed by the loader.

use chrono::{DateTime, NaiveDateTime, Utc};
use std::net::{Ipv4Addr, Ipv6Addr};

use crate::error::ZonefileError;
use crate::types::{
    Algorithm, Assertion, AssertionSet, Object, PublicKey, ServiceInfo, ShardRange, Signature,
};

type Result<T> = std::result::Result<T, ZonefileError>;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Open,
    Close,
    OpenBracket,
    CloseBracket,
    Comma,
    /// `:word:`
    Keyword(String),
    Word(String),
}

fn tokenize(text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '#' => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        break;
                    }
                }
            }
            '(' | ')' | '[' | ']' | ',' => {
                chars.next();
                tokens.push(match c {
                    '(' => Token::Open,
                    ')' => Token::Close,
                    '[' => Token::OpenBracket,
                    ']' => Token::CloseBracket,
                    _ => Token::Comma,
                });
            }
            _ => {
                let mut word = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() || matches!(c, '(' | ')' | '[' | ']' | ',' | '#') {
                        break;
                    }
                    word.push(c);
                    chars.next();
                }
                tokens.push(classify(word));
            }
        }
    }
    tokens
}

fn classify(word: String) -> Token {
    let inner = word
        .strip_prefix(':')
        .and_then(|w| w.strip_suffix(':'))
        .filter(|w| !w.is_empty() && w.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
    match inner {
        Some(name) => Token::Keyword(name.to_string()),
        None => Token::Word(word),
    }
}

/// Compile zonefile text into complete zone sets.
pub fn parse(text: &str) -> Result<Vec<AssertionSet>> {
    let mut parser = Parser {
        tokens: tokenize(text),
        pos: 0,
    };
    let mut zones = Vec::new();
    while !parser.at_end() {
        zones.push(parser.zone()?);
    }
    Ok(zones)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn error(&self, message: impl Into<String>) -> ZonefileError {
        ZonefileError {
            position: self.pos,
            message: message.into(),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Result<Token> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(|| self.error("unexpected end of input"))?;
        self.pos += 1;
        Ok(token)
    }

    fn expect(&mut self, want: &Token) -> Result<()> {
        let got = self.next()?;
        if &got == want {
            Ok(())
        } else {
            self.pos -= 1;
            Err(self.error(format!("expected {want:?}, found {got:?}")))
        }
    }

    fn keyword(&mut self, name: &str) -> Result<()> {
        self.expect(&Token::Keyword(name.to_string()))
    }

    fn word(&mut self, what: &str) -> Result<String> {
        match self.next()? {
            Token::Word(w) => Ok(w),
            other => {
                self.pos -= 1;
                Err(self.error(format!("expected {what}, found {other:?}")))
            }
        }
    }

    fn number<T: std::str::FromStr>(&mut self, what: &str) -> Result<T> {
        let w = self.word(what)?;
        w.parse()
            .map_err(|_| self.error(format!("invalid {what} '{w}'")))
    }

    fn zone(&mut self) -> Result<AssertionSet> {
        self.keyword("Z")?;
        let zone = self.word("zone name")?;
        let context = self.word("context")?;
        let mut set = AssertionSet::zone(zone.clone(), context.clone());

        self.expect(&Token::OpenBracket)?;
        loop {
            match self.peek() {
                Some(Token::CloseBracket) => {
                    self.pos += 1;
                    break;
                }
                Some(Token::Keyword(k)) if k == "S" => {
                    set.assertions.extend(self.shard(&zone, &context)?);
                }
                Some(Token::Keyword(k)) if k == "A" => {
                    set.assertions.push(self.assertion(&zone, &context)?);
                }
                Some(Token::Keyword(k)) if k == "sig" => {
                    set.signatures.push(self.signature()?);
                }
                Some(other) => {
                    return Err(self.error(format!(
                        "expected :S:, :A:, :sig: or ], found {other:?}"
                    )))
                }
                None => return Err(self.error("unterminated zone")),
            }
        }
        Ok(set)
    }

    fn shard(&mut self, zone: &str, context: &str) -> Result<Vec<Assertion>> {
        self.keyword("S")?;
        self.expect(&Token::Open)?;
        let lower = self.optional_bound()?;
        self.expect(&Token::Comma)?;
        let upper = self.optional_bound()?;
        self.expect(&Token::Close)?;

        let range = ShardRange { lower, upper };
        if range.is_inverted() {
            return Err(self.error("shard range is inverted"));
        }

        self.expect(&Token::OpenBracket)?;
        let mut assertions = Vec::new();
        while !matches!(self.peek(), Some(Token::CloseBracket)) {
            let assertion = self.assertion(zone, context)?;
            if !range.contains(&assertion.subject) {
                return Err(self.error(format!(
                    "subject '{}' lies outside its shard",
                    assertion.subject
                )));
            }
            assertions.push(assertion);
        }
        self.pos += 1;
        Ok(assertions)
    }

    fn optional_bound(&mut self) -> Result<Option<String>> {
        match self.peek() {
            Some(Token::Word(_)) => self.word("shard bound").map(Some),
            _ => Ok(None),
        }
    }

    fn assertion(&mut self, zone: &str, context: &str) -> Result<Assertion> {
        self.keyword("A")?;
        let mut assertion = Assertion::new(self.word("subject name")?, zone, context);
        self.expect(&Token::OpenBracket)?;
        loop {
            match self.peek() {
                Some(Token::CloseBracket) => break,
                Some(Token::Keyword(k)) if k == "sig" => {
                    assertion.signatures.push(self.signature()?);
                }
                _ => assertion.objects.push(self.object()?),
            }
        }
        self.pos += 1;
        Ok(assertion)
    }

    fn signature(&mut self) -> Result<Signature> {
        self.keyword("sig")?;
        let algorithm = self.algorithm()?;
        let valid_from = self.timestamp("signature start")?;
        let valid_until = self.timestamp("signature end")?;
        if valid_from >= valid_until {
            return Err(self.error("signature ends before it starts"));
        }
        let mut signature = Signature::new(algorithm, valid_from, valid_until);
        if matches!(self.peek(), Some(Token::Word(_))) {
            signature.content = self.hex("signature content")?;
        }
        Ok(signature)
    }

    fn timestamp(&mut self, what: &str) -> Result<DateTime<Utc>> {
        let w = self.word(what)?;
        NaiveDateTime::parse_from_str(&w, TIMESTAMP_FORMAT)
            .map(|t| t.and_utc())
            .map_err(|e| self.error(format!("invalid {what} '{w}': {e}")))
    }

    fn object(&mut self) -> Result<Object> {
        let Token::Keyword(kind) = self.next()? else {
            self.pos -= 1;
            return Err(self.error("expected an object keyword"));
        };
        let obj = match kind.as_str() {
            "ip4" => {
                let w = self.word("IPv4 address")?;
                let addr: Ipv4Addr = w
                    .parse()
                    .map_err(|_| self.error(format!("invalid IPv4 address '{w}'")))?;
                Object::Ip4(addr)
            }
            "ip6" => {
                let w = self.word("IPv6 address")?;
                let addr: Ipv6Addr = w
                    .parse()
                    .map_err(|_| self.error(format!("invalid IPv6 address '{w}'")))?;
                Object::Ip6(addr)
            }
            "name" => Object::Name(self.word("name")?),
            "redir" => Object::Redirection(self.word("redirection target")?),
            "nameset" => Object::Nameset(self.word("nameset expression")?),
            "regr" => Object::Registrar(self.word("registrar")?),
            "regt" => Object::Registrant(self.word("registrant")?),
            "cert" => Object::Certificate(self.hex("certificate")?),
            "deleg" => Object::Delegation(self.public_key()?),
            "infra" => Object::InfraKey(self.public_key()?),
            "srv" => Object::Service(ServiceInfo {
                hostname: self.word("service host")?,
                port: self.number("service port")?,
                priority: self.number("service priority")?,
            }),
            other => {
                self.pos -= 1;
                return Err(self.error(format!("unknown object type :{other}:")));
            }
        };
        Ok(obj)
    }

    fn hex(&mut self, what: &str) -> Result<Vec<u8>> {
        let w = self.word(what)?;
        hex::decode(&w).map_err(|e| self.error(format!("invalid hex for {what}: {e}")))
    }

    fn algorithm(&mut self) -> Result<Algorithm> {
        let alg = self.word("algorithm")?;
        match alg.as_str() {
            "ecdsa-256" | "2" => Ok(Algorithm::Ecdsa256),
            "ecdsa-384" | "3" => Ok(Algorithm::Ecdsa384),
            _ => Err(self.error(format!("unknown algorithm '{alg}'"))),
        }
    }

    fn public_key(&mut self) -> Result<PublicKey> {
        Ok(PublicKey {
            algorithm: self.algorithm()?,
            key: self.hex("public key")?,
        })
    }
}
