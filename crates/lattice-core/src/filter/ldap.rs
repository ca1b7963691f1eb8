//! RFC 1960 filter strings, e.g. `(&(objectclass=Greeter)(service.ranking>=5))`.

use std::fmt;

use serde_json::Value;

use crate::filter::{FilterError, FilterPredicate};
use crate::properties::Properties;

#[derive(Debug, Clone, PartialEq)]
enum Node {
    And(Vec<Node>),
    Or(Vec<Node>),
    Not(Box<Node>),
    Compare { attr: String, op: Op },
}

#[derive(Debug, Clone, PartialEq)]
enum Op {
    Equal(String),
    Approx(String),
    GreaterEq(String),
    LessEq(String),
    Present,
    /// Pieces between unescaped `*`. The first and last piece may be empty.
    Substring(Vec<String>),
}

/// A parsed LDAP filter.
#[derive(Clone, PartialEq)]
pub struct LdapFilter {
    source: String,
    root: Node,
}

impl LdapFilter {
    pub fn parse(expression: &str) -> Result<Self, FilterError> {
        if expression.trim().is_empty() {
            return Err(FilterError::Empty);
        }
        let mut parser = Parser { src: expression, chars: expression.char_indices().collect(), pos: 0 };
        parser.skip_ws();
        let root = parser.filter()?;
        parser.skip_ws();
        if parser.pos < parser.chars.len() {
            return Err(parser.error("extraneous trailing characters"));
        }
        Ok(Self { source: expression.to_string(), root })
    }

    pub fn matches(&self, props: &Properties) -> bool {
        eval(&self.root, props, false)
    }

    pub fn matches_case(&self, props: &Properties) -> bool {
        eval(&self.root, props, true)
    }
}

impl fmt::Debug for LdapFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("LdapFilter").field(&self.source).finish()
    }
}

impl fmt::Display for LdapFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl FilterPredicate for LdapFilter {
    fn evaluate(&self, props: &Properties, match_case: bool) -> bool {
        eval(&self.root, props, match_case)
    }

    fn expression(&self) -> String {
        self.source.clone()
    }

    fn simple_terms(&self, keys: &[&str]) -> Option<Vec<Vec<String>>> {
        let mut terms = vec![Vec::new(); keys.len()];
        collect_simple(&self.root, keys, &mut terms).then_some(terms)
    }
}

/// An equality on a hashed key, or a disjunction of those.
fn collect_simple(node: &Node, keys: &[&str], terms: &mut [Vec<String>]) -> bool {
    match node {
        Node::Compare { attr, op: Op::Equal(value) } if canonical_literal(value) => {
            match keys.iter().position(|k| k.eq_ignore_ascii_case(attr)) {
                Some(idx) => {
                    terms[idx].push(value.clone());
                    true
                }
                None => false,
            }
        }
        Node::Or(children) => children.iter().all(|child| collect_simple(child, keys, terms)),
        _ => false,
    }
}

/// Whether `literal` equals a property value exactly when their string
/// forms are equal, whatever the value's type. Literals that only match
/// after trimming, case folding or numeric parsing are not indexable.
fn canonical_literal(literal: &str) -> bool {
    if literal.is_empty() || literal.trim() != literal {
        return false;
    }
    if literal.eq_ignore_ascii_case("true") || literal.eq_ignore_ascii_case("false") {
        return literal == "true" || literal == "false";
    }
    match literal.parse::<f64>() {
        Ok(_) => literal.parse::<i64>().is_ok_and(|n| n.to_string() == literal),
        Err(_) => true,
    }
}

struct Parser<'a> {
    src: &'a str,
    chars: Vec<(usize, char)>,
    pos: usize,
}

impl Parser<'_> {
    fn error(&self, reason: &str) -> FilterError {
        FilterError::Syntax {
            expression: self.src.to_string(),
            position: self.pos,
            reason: reason.to_string(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).map(|(_, c)| *c)
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, expected: char) -> Result<(), FilterError> {
        if self.peek() == Some(expected) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(&format!("expected '{expected}'")))
        }
    }

    fn filter(&mut self) -> Result<Node, FilterError> {
        self.expect('(')?;
        self.skip_ws();
        let node = match self.peek() {
            Some('&') => {
                self.pos += 1;
                Node::And(self.filter_list()?)
            }
            Some('|') => {
                self.pos += 1;
                Node::Or(self.filter_list()?)
            }
            Some('!') => {
                self.pos += 1;
                self.skip_ws();
                Node::Not(Box::new(self.filter()?))
            }
            Some(_) => self.item()?,
            None => return Err(self.error("unexpected end of filter")),
        };
        self.skip_ws();
        self.expect(')')?;
        Ok(node)
    }

    fn filter_list(&mut self) -> Result<Vec<Node>, FilterError> {
        let mut nodes = Vec::new();
        self.skip_ws();
        while self.peek() == Some('(') {
            nodes.push(self.filter()?);
            self.skip_ws();
        }
        if nodes.is_empty() {
            return Err(self.error("missing operand"));
        }
        Ok(nodes)
    }

    fn item(&mut self) -> Result<Node, FilterError> {
        let attr = self.attribute()?;
        let op = match (self.peek(), self.chars.get(self.pos + 1).map(|(_, c)| *c)) {
            (Some('~'), Some('=')) => {
                self.pos += 2;
                Op::Approx(self.value()?.into_iter().collect::<Vec<_>>().join("*"))
            }
            (Some('>'), Some('=')) => {
                self.pos += 2;
                Op::GreaterEq(self.single_value()?)
            }
            (Some('<'), Some('=')) => {
                self.pos += 2;
                Op::LessEq(self.single_value()?)
            }
            (Some('='), _) => {
                self.pos += 1;
                let pieces = self.value()?;
                match pieces.as_slice() {
                    [single] => Op::Equal(single.clone()),
                    [a, b] if a.is_empty() && b.is_empty() => Op::Present,
                    _ => Op::Substring(pieces),
                }
            }
            _ => return Err(self.error("invalid operator")),
        };
        Ok(Node::Compare { attr, op })
    }

    fn attribute(&mut self) -> Result<String, FilterError> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if matches!(c, '=' | '~' | '<' | '>' | '(' | ')') {
                break;
            }
            self.pos += 1;
        }
        let attr: String = self.chars[start..self.pos].iter().map(|(_, c)| *c).collect();
        let attr = attr.trim_end().to_string();
        if attr.is_empty() {
            return Err(self.error("missing attribute name"));
        }
        Ok(attr)
    }

    /// Reads a value up to the closing parenthesis, splitting on unescaped `*`.
    fn value(&mut self) -> Result<Vec<String>, FilterError> {
        let mut pieces = vec![String::new()];
        loop {
            match self.peek() {
                None => return Err(self.error("unterminated value")),
                Some(')') => break,
                Some('(') => return Err(self.error("unescaped '(' in value")),
                Some('\\') => {
                    self.pos += 1;
                    let escaped = self.peek().ok_or_else(|| self.error("dangling escape"))?;
                    if let Some(piece) = pieces.last_mut() {
                        piece.push(escaped);
                    }
                    self.pos += 1;
                }
                Some('*') => {
                    pieces.push(String::new());
                    self.pos += 1;
                }
                Some(c) => {
                    if let Some(piece) = pieces.last_mut() {
                        piece.push(c);
                    }
                    self.pos += 1;
                }
            }
        }
        Ok(pieces)
    }

    fn single_value(&mut self) -> Result<String, FilterError> {
        let pieces = self.value()?;
        if pieces.len() != 1 {
            return Err(self.error("wildcards are only allowed with '='"));
        }
        Ok(pieces.into_iter().next().unwrap_or_default())
    }
}

fn eval(node: &Node, props: &Properties, match_case: bool) -> bool {
    match node {
        Node::And(children) => children.iter().all(|c| eval(c, props, match_case)),
        Node::Or(children) => children.iter().any(|c| eval(c, props, match_case)),
        Node::Not(child) => !eval(child, props, match_case),
        Node::Compare { attr, op } => match props.value(attr, match_case) {
            Some(value) => compare(value, op),
            None => false,
        },
    }
}

fn compare(value: &Value, op: &Op) -> bool {
    if *op == Op::Present {
        return !value.is_null();
    }
    match value {
        Value::Array(items) => items.iter().any(|item| compare(item, op)),
        Value::String(s) => compare_str(s, op),
        Value::Number(n) => compare_number(n, op),
        Value::Bool(b) => match op {
            Op::Equal(v) | Op::Approx(v) => v.trim().eq_ignore_ascii_case(if *b { "true" } else { "false" }),
            _ => false,
        },
        Value::Null | Value::Object(_) => false,
    }
}

fn compare_str(s: &str, op: &Op) -> bool {
    match op {
        Op::Equal(v) => s == v,
        Op::Approx(v) => normalize(s) == normalize(v),
        Op::GreaterEq(v) => s >= v.as_str(),
        Op::LessEq(v) => s <= v.as_str(),
        Op::Present => true,
        Op::Substring(pieces) => substring_match(s, pieces),
    }
}

fn normalize(s: &str) -> String {
    s.chars().filter(|c| !c.is_whitespace()).flat_map(char::to_lowercase).collect()
}

fn substring_match(s: &str, pieces: &[String]) -> bool {
    let Some((first, rest)) = pieces.split_first() else {
        return false;
    };
    let Some(mut remaining) = s.strip_prefix(first.as_str()) else {
        return false;
    };
    let Some((last, middle)) = rest.split_last() else {
        return remaining.is_empty();
    };
    for piece in middle {
        match remaining.find(piece.as_str()) {
            Some(idx) => remaining = &remaining[idx + piece.len()..],
            None => return false,
        }
    }
    remaining.ends_with(last.as_str())
}

fn compare_number(n: &serde_json::Number, op: &Op) -> bool {
    let literal = match op {
        Op::Equal(v) | Op::Approx(v) | Op::GreaterEq(v) | Op::LessEq(v) => v.trim(),
        Op::Present => return true,
        Op::Substring(_) => return false,
    };
    let ordering = match (n.as_i64(), literal.parse::<i64>()) {
        (Some(lhs), Ok(rhs)) => lhs.cmp(&rhs),
        _ => match (n.as_f64(), literal.parse::<f64>()) {
            (Some(lhs), Ok(rhs)) => match lhs.partial_cmp(&rhs) {
                Some(ordering) => ordering,
                None => return false,
            },
            _ => return false,
        },
    };
    match op {
        Op::Equal(_) | Op::Approx(_) => ordering.is_eq(),
        Op::GreaterEq(_) => ordering.is_ge(),
        Op::LessEq(_) => ordering.is_le(),
        _ => false,
    }
}
