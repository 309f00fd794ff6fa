//! XPath-subset expression engine for Schematron rule evaluation.
//!
//! The bundled rule sets restrict themselves to a small XPath 1.0 subset:
//! relative child/attribute paths with `[@A]` / `[@A='v']` predicates, the
//! `count`, `string-length`, `starts-with`, `normalize-space` and `not`
//! functions, comparisons and `and`/`or`. Expressions are parsed once when
//! a rule set loads and evaluated against `roxmltree` nodes.

use std::fmt;

use thiserror::Error;

/// Error raised when a rule expression cannot be parsed.
#[derive(Debug, Error)]
#[error("invalid xpath expression '{expression}': {reason}")]
pub struct XPathParseError {
    /// The offending expression text.
    pub expression: String,
    /// What went wrong.
    pub reason: String,
}

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// A namespaced name; `ns` is `None` for unqualified names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QName {
    pub ns: Option<String>,
    pub local: String,
}

/// One location step.
#[derive(Debug, Clone)]
pub enum StepKind {
    /// `qname` child element step.
    Child(QName),
    /// `@qname` attribute step.
    Attribute(QName),
    /// `.` self step.
    SelfNode,
}

/// A step with its predicates.
#[derive(Debug, Clone)]
pub struct Step {
    pub kind: StepKind,
    pub predicates: Vec<Expr>,
}

/// A relative location path.
#[derive(Debug, Clone)]
pub struct Path {
    pub steps: Vec<Step>,
}

/// Parsed expression tree.
#[derive(Debug, Clone)]
pub enum Expr {
    Or(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Compare(Box<Expr>, CmpOp, Box<Expr>),
    Count(Path),
    StringLength(Option<Path>),
    StartsWith(Box<Expr>, Box<Expr>),
    NormalizeSpace(Option<Path>),
    Literal(String),
    Number(f64),
    Path(Path),
}

/// Resolves namespace prefixes while parsing.
pub trait PrefixResolver {
    /// Namespace URI bound to `prefix`, if any.
    fn resolve(&self, prefix: &str) -> Option<&str>;
}

impl PrefixResolver for std::collections::HashMap<String, String> {
    fn resolve(&self, prefix: &str) -> Option<&str> {
        self.get(prefix).map(String::as_str)
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Literal(String),
    Number(f64),
    At,
    Slash,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Comma,
    Dot,
    Op(CmpOp),
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' | '\n' | '\r' => {
                chars.next();
            }
            '@' => {
                chars.next();
                tokens.push(Token::At);
            }
            '/' => {
                chars.next();
                tokens.push(Token::Slash);
            }
            '[' => {
                chars.next();
                tokens.push(Token::LBracket);
            }
            ']' => {
                chars.next();
                tokens.push(Token::RBracket);
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            '.' => {
                chars.next();
                tokens.push(Token::Dot);
            }
            '=' => {
                chars.next();
                tokens.push(Token::Op(CmpOp::Eq));
            }
            '!' => {
                chars.next();
                if chars.next() != Some('=') {
                    return Err("expected '=' after '!'".into());
                }
                tokens.push(Token::Op(CmpOp::Ne));
            }
            '<' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Op(CmpOp::Le));
                } else {
                    tokens.push(Token::Op(CmpOp::Lt));
                }
            }
            '>' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Op(CmpOp::Ge));
                } else {
                    tokens.push(Token::Op(CmpOp::Gt));
                }
            }
            '\'' | '"' => {
                let quote = c;
                chars.next();
                let mut value = String::new();
                loop {
                    match chars.next() {
                        Some(ch) if ch == quote => break,
                        Some(ch) => value.push(ch),
                        None => return Err("unterminated string literal".into()),
                    }
                }
                tokens.push(Token::Literal(value));
            }
            '0'..='9' => {
                let mut value = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' {
                        value.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let number: f64 = value.parse().map_err(|_| format!("bad number '{value}'"))?;
                tokens.push(Token::Number(number));
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut value = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_alphanumeric() || matches!(d, '_' | ':' | '-' | '.') {
                        value.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(value));
            }
            other => return Err(format!("unexpected character '{other}'")),
        }
    }
    Ok(tokens)
}

struct Parser<'r> {
    tokens: Vec<Token>,
    pos: usize,
    resolver: &'r dyn PrefixResolver,
}

impl<'r> Parser<'r> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, token: Token) -> Result<(), String> {
        match self.next() {
            Some(t) if t == token => Ok(()),
            other => Err(format!("expected {token:?}, found {other:?}")),
        }
    }

    fn parse_expr(&mut self) -> Result<Expr, String> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_and()?;
        while matches!(self.peek(), Some(Token::Ident(kw)) if kw == "or") {
            self.next();
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_comparison()?;
        while matches!(self.peek(), Some(Token::Ident(kw)) if kw == "and") {
            self.next();
            let right = self.parse_comparison()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_comparison(&mut self) -> Result<Expr, String> {
        let left = self.parse_value()?;
        if let Some(Token::Op(op)) = self.peek().cloned() {
            self.next();
            let right = self.parse_value()?;
            return Ok(Expr::Compare(Box::new(left), op, Box::new(right)));
        }
        Ok(left)
    }

    fn parse_value(&mut self) -> Result<Expr, String> {
        match self.peek().cloned() {
            Some(Token::Literal(value)) => {
                self.next();
                Ok(Expr::Literal(value))
            }
            Some(Token::Number(value)) => {
                self.next();
                Ok(Expr::Number(value))
            }
            Some(Token::LParen) => {
                self.next();
                let inner = self.parse_expr()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Ident(name)) if self.tokens.get(self.pos + 1) == Some(&Token::LParen) => {
                self.next();
                self.next();
                self.parse_function(&name)
            }
            Some(Token::At) | Some(Token::Ident(_)) | Some(Token::Dot) => {
                Ok(Expr::Path(self.parse_path()?))
            }
            other => Err(format!("unexpected token {other:?}")),
        }
    }

    fn parse_function(&mut self, name: &str) -> Result<Expr, String> {
        match name {
            "not" => {
                let inner = self.parse_expr()?;
                self.expect(Token::RParen)?;
                Ok(Expr::Not(Box::new(inner)))
            }
            "count" => {
                let path = self.parse_path()?;
                self.expect(Token::RParen)?;
                Ok(Expr::Count(path))
            }
            "string-length" => {
                if self.peek() == Some(&Token::RParen) {
                    self.next();
                    return Ok(Expr::StringLength(None));
                }
                let path = self.parse_path()?;
                self.expect(Token::RParen)?;
                Ok(Expr::StringLength(Some(path)))
            }
            "normalize-space" => {
                if self.peek() == Some(&Token::RParen) {
                    self.next();
                    return Ok(Expr::NormalizeSpace(None));
                }
                let path = self.parse_path()?;
                self.expect(Token::RParen)?;
                Ok(Expr::NormalizeSpace(Some(path)))
            }
            "starts-with" => {
                let left = self.parse_value()?;
                self.expect(Token::Comma)?;
                let right = self.parse_value()?;
                self.expect(Token::RParen)?;
                Ok(Expr::StartsWith(Box::new(left), Box::new(right)))
            }
            other => Err(format!("unsupported function '{other}'")),
        }
    }

    fn parse_path(&mut self) -> Result<Path, String> {
        let mut steps = vec![self.parse_step()?];
        while self.peek() == Some(&Token::Slash) {
            self.next();
            steps.push(self.parse_step()?);
        }
        Ok(Path { steps })
    }

    fn parse_step(&mut self) -> Result<Step, String> {
        let kind = match self.next() {
            Some(Token::Dot) => StepKind::SelfNode,
            Some(Token::At) => match self.next() {
                Some(Token::Ident(name)) => StepKind::Attribute(self.qname(&name)?),
                other => return Err(format!("expected attribute name, found {other:?}")),
            },
            Some(Token::Ident(name)) => StepKind::Child(self.qname(&name)?),
            other => return Err(format!("expected step, found {other:?}")),
        };
        let mut predicates = Vec::new();
        while self.peek() == Some(&Token::LBracket) {
            self.next();
            predicates.push(self.parse_expr()?);
            self.expect(Token::RBracket)?;
        }
        Ok(Step { kind, predicates })
    }

    fn qname(&self, name: &str) -> Result<QName, String> {
        match name.split_once(':') {
            Some((prefix, local)) => {
                let ns = self
                    .resolver
                    .resolve(prefix)
                    .ok_or_else(|| format!("unbound namespace prefix '{prefix}'"))?;
                Ok(QName {
                    ns: Some(ns.to_string()),
                    local: local.to_string(),
                })
            }
            None => Ok(QName {
                ns: None,
                local: name.to_string(),
            }),
        }
    }
}

/// Parse one expression with the given prefix bindings.
pub fn parse(expression: &str, resolver: &dyn PrefixResolver) -> Result<Expr, XPathParseError> {
    let fail = |reason: String| XPathParseError {
        expression: expression.to_string(),
        reason,
    };
    let tokens = tokenize(expression).map_err(fail)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        resolver,
    };
    let expr = parser.parse_expr().map_err(fail)?;
    if parser.pos != parser.tokens.len() {
        return Err(XPathParseError {
            expression: expression.to_string(),
            reason: "trailing tokens".into(),
        });
    }
    Ok(expr)
}

/// Parse a location path (rule context) with the given prefix bindings.
pub fn parse_path(expression: &str, resolver: &dyn PrefixResolver) -> Result<Path, XPathParseError> {
    match parse(expression, resolver)? {
        Expr::Path(path) => Ok(path),
        _ => Err(XPathParseError {
            expression: expression.to_string(),
            reason: "expected a location path".into(),
        }),
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// One item a path evaluates to: an element node or an attribute value.
#[derive(Debug, Clone)]
pub enum Item<'a, 'd> {
    Elem(roxmltree::Node<'a, 'd>),
    Attr(String),
}

impl Item<'_, '_> {
    fn string_value(&self) -> String {
        match self {
            Item::Elem(node) => node
                .descendants()
                .filter(|n| n.is_text())
                .filter_map(|n| n.text())
                .collect(),
            Item::Attr(value) => value.clone(),
        }
    }
}

/// Evaluation result.
#[derive(Debug, Clone)]
pub enum Value<'a, 'd> {
    Items(Vec<Item<'a, 'd>>),
    Str(String),
    Num(f64),
    Bool(bool),
}

impl Value<'_, '_> {
    /// XPath effective boolean value.
    pub fn boolean(&self) -> bool {
        match self {
            Value::Items(items) => !items.is_empty(),
            Value::Str(s) => !s.is_empty(),
            Value::Num(n) => *n != 0.0,
            Value::Bool(b) => *b,
        }
    }

    fn string(&self) -> String {
        match self {
            Value::Items(items) => items.first().map(Item::string_value).unwrap_or_default(),
            Value::Str(s) => s.clone(),
            Value::Num(n) => format_number(*n),
            Value::Bool(b) => b.to_string(),
        }
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

/// Evaluate an expression with `context` as the context node.
pub fn evaluate<'a, 'd>(expr: &Expr, context: roxmltree::Node<'a, 'd>) -> Value<'a, 'd> {
    match expr {
        Expr::Or(left, right) => {
            Value::Bool(evaluate(left, context).boolean() || evaluate(right, context).boolean())
        }
        Expr::And(left, right) => {
            Value::Bool(evaluate(left, context).boolean() && evaluate(right, context).boolean())
        }
        Expr::Not(inner) => Value::Bool(!evaluate(inner, context).boolean()),
        Expr::Compare(left, op, right) => Value::Bool(compare(
            &evaluate(left, context),
            *op,
            &evaluate(right, context),
        )),
        Expr::Count(path) => Value::Num(eval_path(path, context).len() as f64),
        Expr::StringLength(path) => {
            let text = match path {
                Some(path) => Value::Items(eval_path(path, context)).string(),
                None => Item::Elem(context).string_value(),
            };
            Value::Num(text.chars().count() as f64)
        }
        Expr::NormalizeSpace(path) => {
            let text = match path {
                Some(path) => Value::Items(eval_path(path, context)).string(),
                None => Item::Elem(context).string_value(),
            };
            Value::Str(text.split_whitespace().collect::<Vec<_>>().join(" "))
        }
        Expr::StartsWith(left, right) => {
            let haystack = evaluate(left, context).string();
            let needle = evaluate(right, context).string();
            Value::Bool(haystack.starts_with(&needle))
        }
        Expr::Literal(value) => Value::Str(value.clone()),
        Expr::Number(value) => Value::Num(*value),
        Expr::Path(path) => Value::Items(eval_path(path, context)),
    }
}

/// Evaluate a path from the document root: the first step matches the root
/// element itself, the way an absolute Schematron context does.
pub fn evaluate_context<'a, 'd>(
    path: &Path,
    document: &'a roxmltree::Document<'d>,
) -> Vec<roxmltree::Node<'a, 'd>> {
    let Some((first, rest)) = path.steps.split_first() else {
        return Vec::new();
    };
    let root = document.root_element();
    let mut current: Vec<roxmltree::Node> = match &first.kind {
        StepKind::Child(qname) if element_matches(root, qname) => {
            if first
                .predicates
                .iter()
                .all(|p| evaluate(p, root).boolean())
            {
                vec![root]
            } else {
                Vec::new()
            }
        }
        _ => Vec::new(),
    };
    for step in rest {
        let mut next = Vec::new();
        for node in current {
            for item in apply_step(step, node) {
                if let Item::Elem(elem) = item {
                    next.push(elem);
                }
            }
        }
        current = next;
    }
    current
}

fn eval_path<'a, 'd>(path: &Path, context: roxmltree::Node<'a, 'd>) -> Vec<Item<'a, 'd>> {
    let mut current = vec![Item::Elem(context)];
    for step in &path.steps {
        let mut next = Vec::new();
        for item in current {
            if let Item::Elem(node) = item {
                next.extend(apply_step(step, node));
            }
        }
        current = next;
    }
    current
}

fn apply_step<'a, 'd>(step: &Step, node: roxmltree::Node<'a, 'd>) -> Vec<Item<'a, 'd>> {
    match &step.kind {
        StepKind::SelfNode => vec![Item::Elem(node)],
        StepKind::Attribute(qname) => node
            .attributes()
            .find(|attr| {
                attr.name() == qname.local && attr.namespace() == qname.ns.as_deref()
            })
            .map(|attr| vec![Item::Attr(attr.value().to_string())])
            .unwrap_or_default(),
        StepKind::Child(qname) => node
            .children()
            .filter(|child| child.is_element() && element_matches(*child, qname))
            .filter(|child| {
                step.predicates
                    .iter()
                    .all(|p| evaluate(p, *child).boolean())
            })
            .map(Item::Elem)
            .collect(),
    }
}

fn element_matches(node: roxmltree::Node<'_, '_>, qname: &QName) -> bool {
    node.tag_name().name() == qname.local
        && node.tag_name().namespace() == qname.ns.as_deref()
}

fn compare(left: &Value<'_, '_>, op: CmpOp, right: &Value<'_, '_>) -> bool {
    // node sets compare existentially, everything else by value
    match (left, right) {
        (Value::Items(items), other) => items
            .iter()
            .any(|item| compare_scalar(&item.string_value(), op, &other.string())),
        (other, Value::Items(items)) => items
            .iter()
            .any(|item| compare_scalar(&other.string(), op, &item.string_value())),
        (a, b) => compare_scalar(&a.string(), op, &b.string()),
    }
}

fn compare_scalar(left: &str, op: CmpOp, right: &str) -> bool {
    if let (Ok(l), Ok(r)) = (left.parse::<f64>(), right.parse::<f64>()) {
        return match op {
            CmpOp::Eq => l == r,
            CmpOp::Ne => l != r,
            CmpOp::Lt => l < r,
            CmpOp::Le => l <= r,
            CmpOp::Gt => l > r,
            CmpOp::Ge => l >= r,
        };
    }
    match op {
        CmpOp::Eq => left == right,
        CmpOp::Ne => left != right,
        CmpOp::Lt => left < right,
        CmpOp::Le => left <= right,
        CmpOp::Gt => left > right,
        CmpOp::Ge => left >= right,
    }
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            CmpOp::Eq => "=",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        };
        write!(f, "{symbol}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const DOC: &str = r#"
<m:mets xmlns:m="http://www.loc.gov/METS/" OBJID="pkg-1" TYPE="SIP">
  <m:metsHdr CREATEDATE="2020-01-01">
    <m:agent ROLE="CREATOR" TYPE="OTHER" OTHERTYPE="SOFTWARE">
      <m:name>tool</m:name>
    </m:agent>
    <m:agent ROLE="ARCHIVIST"/>
  </m:metsHdr>
  <m:fileSec>
    <m:fileGrp USE="Documentation"/>
    <m:fileGrp USE="Representations/rep1"/>
  </m:fileSec>
</m:mets>
"#;

    fn prefixes() -> HashMap<String, String> {
        let mut map = HashMap::new();
        map.insert("mets".to_string(), "http://www.loc.gov/METS/".to_string());
        map
    }

    fn eval_bool(doc: &roxmltree::Document<'_>, expression: &str) -> bool {
        let expr = parse(expression, &prefixes()).unwrap();
        evaluate(&expr, doc.root_element()).boolean()
    }

    #[test]
    fn attribute_presence_and_equality() {
        let doc = roxmltree::Document::parse(DOC).unwrap();
        assert!(eval_bool(&doc, "@OBJID"));
        assert!(eval_bool(&doc, "@TYPE = 'SIP'"));
        assert!(!eval_bool(&doc, "@PROFILE"));
        assert!(!eval_bool(&doc, "@TYPE = 'AIP'"));
    }

    #[test]
    fn child_paths_and_predicates() {
        let doc = roxmltree::Document::parse(DOC).unwrap();
        assert!(eval_bool(&doc, "mets:metsHdr/@CREATEDATE"));
        assert!(eval_bool(&doc, "mets:metsHdr/mets:agent[@ROLE='CREATOR']"));
        assert!(!eval_bool(&doc, "mets:metsHdr/mets:agent[@ROLE='OTHER']"));
        assert!(eval_bool(
            &doc,
            "mets:metsHdr/mets:agent[@ROLE='CREATOR'][@TYPE='OTHER']/mets:name"
        ));
    }

    #[test]
    fn count_comparisons() {
        let doc = roxmltree::Document::parse(DOC).unwrap();
        assert!(eval_bool(&doc, "count(mets:metsHdr/mets:agent) = 2"));
        assert!(eval_bool(
            &doc,
            "count(mets:fileSec/mets:fileGrp[@USE='Documentation']) >= 1"
        ));
        assert!(!eval_bool(&doc, "count(mets:dmdSec) > 0"));
    }

    #[test]
    fn string_functions() {
        let doc = roxmltree::Document::parse(DOC).unwrap();
        assert!(eval_bool(&doc, "string-length(@OBJID) > 0"));
        assert!(eval_bool(&doc, "starts-with(@OBJID, 'pkg')"));
        assert!(!eval_bool(&doc, "starts-with(@OBJID, 'rep')"));
    }

    #[test]
    fn boolean_connectives() {
        let doc = roxmltree::Document::parse(DOC).unwrap();
        assert!(eval_bool(&doc, "@OBJID and @TYPE = 'SIP'"));
        assert!(eval_bool(&doc, "@PROFILE or @OBJID"));
        assert!(eval_bool(&doc, "not(@PROFILE)"));
        assert!(!eval_bool(&doc, "@PROFILE and @OBJID"));
    }

    #[test]
    fn context_paths_match_from_root() {
        let doc = roxmltree::Document::parse(DOC).unwrap();
        let path = parse_path("mets:mets/mets:metsHdr/mets:agent", &prefixes()).unwrap();
        assert_eq!(evaluate_context(&path, &doc).len(), 2);
        let path = parse_path("mets:mets", &prefixes()).unwrap();
        assert_eq!(evaluate_context(&path, &doc).len(), 1);
        let path = parse_path("mets:other", &prefixes()).unwrap();
        assert!(evaluate_context(&path, &doc).is_empty());
    }

    #[test]
    fn unbound_prefix_is_rejected() {
        let err = parse("foo:bar", &prefixes()).unwrap_err();
        assert!(err.reason.contains("unbound"));
    }

    #[test]
    fn numeric_string_comparison_is_numeric() {
        assert!(compare_scalar("10", CmpOp::Gt, "9"));
        // lexicographic would say "10" < "9"
        assert!(compare_scalar("abc", CmpOp::Lt, "abd"));
    }
}
