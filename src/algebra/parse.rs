//! Parser for expression and set text.
//!
//! Accepts the textual set notation produced by `Space::to_set_text`
//! (`name := {[i,j] : 0 <= i && i < N}`) as well as the conjunction form
//! with `^` separators used by computation display. Parsing then rendering
//! yields the canonical text again.

use crate::utils::errors::{ParseError, ParseErrorKind};

use super::constraint::{Constr, RelOp};
use super::expr::Expr;

/// A parsed set: optional name, iterator tuple, constraint conjunction.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedSet {
    pub name: Option<String>,
    pub iters: Vec<String>,
    pub constraints: Vec<Constr>,
}

/// Parse set text into its name, tuple, and constraints.
pub fn parse_set(text: &str) -> Result<ParsedSet, ParseError> {
    Parser::new(text).set()
}

/// Parse a single expression.
pub fn parse_expr(text: &str) -> Result<Expr, ParseError> {
    let mut p = Parser::new(text);
    let e = p.expr()?;
    p.expect_eof()?;
    Ok(e)
}

/// Parse a conjunction of constraints (no surrounding braces).
pub fn parse_constraints(text: &str) -> Result<Vec<Constr>, ParseError> {
    let mut p = Parser::new(text);
    let cs = p.conjunction()?;
    p.expect_eof()?;
    Ok(cs)
}

struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
    iters: Vec<String>,
}

impl<'a> Parser<'a> {
    fn new(text: &'a str) -> Self {
        Self { input: text.as_bytes(), pos: 0, iters: Vec::new() }
    }

    fn err(&self, message: &str, kind: ParseErrorKind) -> ParseError {
        ParseError::new(message, self.pos, kind)
    }

    fn skip_ws(&mut self) {
        while self.pos < self.input.len() && self.input[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    fn peek(&mut self) -> Option<u8> {
        self.skip_ws();
        self.input.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn eat(&mut self, c: u8) -> bool {
        if self.peek() == Some(c) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_str(&mut self, s: &str) -> bool {
        self.skip_ws();
        if self.input[self.pos..].starts_with(s.as_bytes()) {
            self.pos += s.len();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, c: u8) -> Result<(), ParseError> {
        if self.eat(c) {
            Ok(())
        } else {
            Err(self.err(
                &format!("expected '{}'", c as char),
                ParseErrorKind::UnexpectedToken,
            ))
        }
    }

    fn expect_eof(&mut self) -> Result<(), ParseError> {
        if self.peek().is_none() {
            Ok(())
        } else {
            Err(self.err("trailing input", ParseErrorKind::UnexpectedToken))
        }
    }

    fn ident(&mut self) -> Option<String> {
        self.skip_ws();
        let start = self.pos;
        while self.pos < self.input.len() {
            let c = self.input[self.pos];
            let ok = c.is_ascii_alphanumeric() || c == b'_';
            let first = self.pos == start;
            if (first && (c.is_ascii_alphabetic() || c == b'_')) || (!first && ok) {
                self.pos += 1;
            } else {
                break;
            }
        }
        if self.pos > start {
            Some(String::from_utf8_lossy(&self.input[start..self.pos]).into_owned())
        } else {
            None
        }
    }

    fn number(&mut self) -> Result<Expr, ParseError> {
        self.skip_ws();
        let start = self.pos;
        while self.pos < self.input.len()
            && (self.input[self.pos].is_ascii_digit() || self.input[self.pos] == b'.')
        {
            self.pos += 1;
        }
        let text = std::str::from_utf8(&self.input[start..self.pos])
            .map_err(|_| self.err("bad number", ParseErrorKind::UnexpectedChar))?;
        if text.contains('.') {
            text.parse::<f64>()
                .map(Expr::Real)
                .map_err(|_| self.err("bad real literal", ParseErrorKind::UnexpectedToken))
        } else {
            text.parse::<i64>()
                .map(Expr::Int)
                .map_err(|_| self.err("bad integer literal", ParseErrorKind::UnexpectedToken))
        }
    }

    fn set(&mut self) -> Result<ParsedSet, ParseError> {
        // Optional "name :=" prefix.
        let mark = self.pos;
        let mut name = None;
        if let Some(id) = self.ident() {
            if self.eat_str(":=") {
                name = Some(id);
            } else {
                self.pos = mark;
            }
        }
        self.expect(b'{')?;
        self.expect(b'[')?;
        let mut iters = Vec::new();
        if self.peek() != Some(b']') {
            loop {
                let id = self
                    .ident()
                    .ok_or_else(|| self.err("expected iterator", ParseErrorKind::UnexpectedToken))?;
                iters.push(id);
                if !self.eat(b',') {
                    break;
                }
            }
        }
        self.expect(b']')?;
        self.iters = iters.clone();
        let mut constraints = Vec::new();
        if self.eat(b':') {
            constraints = self.conjunction()?;
        }
        self.expect(b'}')?;
        self.expect_eof()?;
        Ok(ParsedSet { name, iters, constraints })
    }

    fn conjunction(&mut self) -> Result<Vec<Constr>, ParseError> {
        let mut out = Vec::new();
        loop {
            self.constraint(&mut out)?;
            if !(self.eat_str("&&") || self.eat(b'^')) {
                break;
            }
        }
        Ok(out)
    }

    fn constraint(&mut self, out: &mut Vec<Constr>) -> Result<(), ParseError> {
        let mark = self.pos;
        if let Some(id) = self.ident() {
            if id == "exists" && self.peek() == Some(b'(') {
                self.expect(b'(')?;
                let mut inner = Vec::new();
                loop {
                    self.constraint(&mut inner)?;
                    if !(self.eat_str("&&") || self.eat(b'^')) {
                        break;
                    }
                }
                self.expect(b')')?;
                out.extend(inner.into_iter().map(Constr::existential));
                return Ok(());
            }
            self.pos = mark;
        }
        // Relational chains like `0 <= i < N` expand in place.
        let first = self.expr()?;
        let op = self.relop()?;
        let second = self.expr()?;
        out.push(Constr::new(first, op, second.clone()));
        if let Ok(op2) = self.try_relop() {
            let third = self.expr()?;
            out.push(Constr::new(second, op2, third));
        }
        Ok(())
    }

    fn try_relop(&mut self) -> Result<RelOp, ParseError> {
        let mark = self.pos;
        match self.relop() {
            Ok(op) => Ok(op),
            Err(e) => {
                self.pos = mark;
                Err(e)
            }
        }
    }

    fn relop(&mut self) -> Result<RelOp, ParseError> {
        self.skip_ws();
        if self.eat_str("<=") {
            Ok(RelOp::Le)
        } else if self.eat_str(">=") {
            Ok(RelOp::Ge)
        } else if self.eat_str("==") {
            Ok(RelOp::Eq)
        } else if self.eat_str("!=") {
            Ok(RelOp::Ne)
        } else if self.eat(b'<') {
            Ok(RelOp::Lt)
        } else if self.eat(b'>') {
            Ok(RelOp::Gt)
        } else if self.eat(b'=') {
            Ok(RelOp::Eq)
        } else {
            Err(self.err("expected relational operator", ParseErrorKind::UnexpectedToken))
        }
    }

    fn expr(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.term()?;
        loop {
            if self.eat(b'+') {
                let rhs = self.term()?;
                lhs = lhs + rhs;
            } else if self.peek() == Some(b'-') {
                self.pos += 1;
                let rhs = self.term()?;
                lhs = lhs - rhs;
            } else {
                break;
            }
        }
        Ok(lhs)
    }

    fn term(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.factor()?;
        loop {
            if self.eat(b'*') {
                lhs = lhs * self.factor()?;
            } else if self.eat(b'/') {
                lhs = lhs / self.factor()?;
            } else if self.eat(b'%') {
                lhs = lhs % self.factor()?;
            } else {
                break;
            }
        }
        Ok(lhs)
    }

    fn factor(&mut self) -> Result<Expr, ParseError> {
        match self.peek() {
            Some(b'(') => {
                self.pos += 1;
                let e = self.expr()?;
                self.expect(b')')?;
                Ok(e)
            }
            Some(b'-') => {
                self.pos += 1;
                Ok(-self.factor()?)
            }
            Some(c) if c.is_ascii_digit() || c == b'.' => self.number(),
            Some(c) if c.is_ascii_alphabetic() || c == b'_' => {
                let id = self.ident().ok_or_else(|| {
                    self.err("expected identifier", ParseErrorKind::UnexpectedToken)
                })?;
                if self.peek() == Some(b'(') {
                    self.pos += 1;
                    let mut args = Vec::new();
                    if self.peek() != Some(b')') {
                        loop {
                            args.push(self.expr()?);
                            if !self.eat(b',') {
                                break;
                            }
                        }
                    }
                    self.expect(b')')?;
                    Ok(Expr::func(id, args))
                } else if self.iters.iter().any(|i| *i == id) {
                    Ok(Expr::iter(id))
                } else {
                    Ok(Expr::sym(id))
                }
            }
            Some(_) => Err(self.err("unexpected character", ParseErrorKind::UnexpectedChar)),
            None => Err(self.err("unexpected end of input", ParseErrorKind::UnexpectedEof)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_expr() {
        let e = parse_expr("col(n)+1").unwrap();
        assert_eq!(e.to_string(), "col(n)+1");
        let e = parse_expr("(i+j)*8").unwrap();
        assert_eq!(e.to_string(), "(i+j)*8");
    }

    #[test]
    fn test_parse_set_named() {
        let s = parse_set("Icoo := {[n,i,j] : 0 <= n && n < NNZ && i = row(n) && j = col(n)}")
            .unwrap();
        assert_eq!(s.name.as_deref(), Some("Icoo"));
        assert_eq!(s.iters, vec!["n", "i", "j"]);
        assert_eq!(s.constraints.len(), 4);
        assert_eq!(s.constraints[2].to_string(), "i = row(n)");
    }

    #[test]
    fn test_parse_chained_range() {
        let s = parse_set("{[i] : 0 <= i < N}").unwrap();
        assert_eq!(s.constraints.len(), 2);
        assert_eq!(s.constraints[0].to_string(), "0 <= i");
        assert_eq!(s.constraints[1].to_string(), "i < N");
    }

    #[test]
    fn test_parse_caret_conjunction() {
        let s = parse_set("{[m,i] : 0 <= m ^ m < NZR ^ i = crow(m)}").unwrap();
        assert_eq!(s.constraints.len(), 3);
    }

    #[test]
    fn test_parse_exists() {
        let s = parse_set("{[t0,i0] : exists(0 <= r0 && r0 < 8)}").unwrap();
        assert!(s.constraints.iter().all(|c| c.exists));
        assert_eq!(s.constraints.len(), 2);
    }

    #[test]
    fn test_parse_scalar_set() {
        let s = parse_set("{[]}").unwrap();
        assert!(s.iters.is_empty());
        assert!(s.constraints.is_empty());
    }

    #[test]
    fn test_round_trip() {
        let text = "{[i,n,j] : 0 <= i && i < N && rp(i) <= n && n < rp(i+1) && j = col(n)}";
        let s = parse_set(text).unwrap();
        let rendered: Vec<String> = s.constraints.iter().map(|c| c.to_string()).collect();
        let again = format!("{{[{}] : {}}}", s.iters.join(","), rendered.join(" && "));
        assert_eq!(again, text);
    }
}
