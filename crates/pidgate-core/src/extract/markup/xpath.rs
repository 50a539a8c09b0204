//! A compact XPath 1.0 subset over [`Document`]
//!
//! Supported: location paths (absolute, relative, `//`, `.`, `..`, `@`),
//! the child, descendant, descendant-or-self, self, parent, ancestor,
//! ancestor-or-self, attribute, following-sibling and preceding-sibling axes,
//! name / wildcard / `text()` / `node()` tests, predicates, unions,
//! comparisons, `and` / `or`, and a handful of core functions.
//!
//! Expressions are compiled once and evaluated against any number of
//! documents. Evaluation never fails: an unbound prefix simply matches
//! nothing.

use std::collections::BTreeMap;

use thiserror::Error;

use super::dom::{Document, NodeId, NodeKind};

/// Namespace prefix bindings used during evaluation
pub type Namespaces = BTreeMap<String, String>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Invalid path expression {expression:?}: {message}")]
pub struct XPathError {
    pub expression: String,
    pub message: String,
}

/// A node selected by an expression
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Item {
    Node(NodeId),
    /// Attribute `index` of element `NodeId`
    Attr(NodeId, usize),
}

impl Item {
    fn sort_key(&self) -> (NodeId, usize) {
        match *self {
            Item::Node(id) => (id, 0),
            Item::Attr(id, index) => (id, index + 1),
        }
    }

    pub fn string_value(&self, doc: &Document) -> String {
        match *self {
            Item::Node(id) => doc.string_value(id),
            Item::Attr(id, index) => doc
                .element(id)
                .and_then(|element| element.attributes.get(index))
                .map(|attribute| attribute.value.clone())
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Nodes(Vec<Item>),
    Str(String),
    Num(f64),
    Bool(bool),
}

impl Value {
    pub fn to_bool(&self) -> bool {
        match self {
            Value::Nodes(items) => !items.is_empty(),
            Value::Str(s) => !s.is_empty(),
            Value::Num(n) => *n != 0.0 && !n.is_nan(),
            Value::Bool(b) => *b,
        }
    }

    pub fn to_string_value(&self, doc: &Document) -> String {
        match self {
            Value::Nodes(items) => items
                .first()
                .map(|item| item.string_value(doc))
                .unwrap_or_default(),
            Value::Str(s) => s.clone(),
            Value::Num(n) => format_number(*n),
            Value::Bool(b) => b.to_string(),
        }
    }

    pub fn to_number(&self, doc: &Document) -> f64 {
        match self {
            Value::Num(n) => *n,
            Value::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            other => parse_number(&other.to_string_value(doc)),
        }
    }
}

fn parse_number(s: &str) -> f64 {
    s.trim().parse().unwrap_or(f64::NAN)
}

fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    Child,
    Descendant,
    DescendantOrSelf,
    SelfAxis,
    Parent,
    Ancestor,
    AncestorOrSelf,
    Attribute,
    FollowingSibling,
    PrecedingSibling,
}

impl Axis {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "child" => Axis::Child,
            "descendant" => Axis::Descendant,
            "descendant-or-self" => Axis::DescendantOrSelf,
            "self" => Axis::SelfAxis,
            "parent" => Axis::Parent,
            "ancestor" => Axis::Ancestor,
            "ancestor-or-self" => Axis::AncestorOrSelf,
            "attribute" => Axis::Attribute,
            "following-sibling" => Axis::FollowingSibling,
            "preceding-sibling" => Axis::PrecedingSibling,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
enum NodeTest {
    Name {
        prefix: Option<String>,
        local: String,
    },
    Any,
    AnyInPrefix(String),
    Text,
    Node,
}

#[derive(Debug, Clone, PartialEq)]
struct Step {
    axis: Axis,
    test: NodeTest,
    predicates: Vec<Expr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Comparison {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Function {
    Contains,
    StartsWith,
    Not,
    NormalizeSpace,
    String,
    Concat,
    Count,
    Position,
    Last,
    LocalName,
    True,
    False,
}

impl Function {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "contains" => Function::Contains,
            "starts-with" => Function::StartsWith,
            "not" => Function::Not,
            "normalize-space" => Function::NormalizeSpace,
            "string" => Function::String,
            "concat" => Function::Concat,
            "count" => Function::Count,
            "position" => Function::Position,
            "last" => Function::Last,
            "local-name" => Function::LocalName,
            "true" => Function::True,
            "false" => Function::False,
            _ => return None,
        })
    }

    /// Accepted argument counts; `None` for unbounded
    fn arity(&self) -> (usize, Option<usize>) {
        match self {
            Function::Contains | Function::StartsWith => (2, Some(2)),
            Function::Not | Function::Count => (1, Some(1)),
            Function::NormalizeSpace | Function::String | Function::LocalName => (0, Some(1)),
            Function::Concat => (2, None),
            Function::Position | Function::Last | Function::True | Function::False => {
                (0, Some(0))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Or(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Compare(Comparison, Box<Expr>, Box<Expr>),
    Union(Box<Expr>, Box<Expr>),
    Literal(String),
    Number(f64),
    Call(Function, Vec<Expr>),
    Path { absolute: bool, steps: Vec<Step> },
    Filter {
        primary: Box<Expr>,
        predicates: Vec<Expr>,
        steps: Vec<Step>,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Slash,
    DoubleSlash,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Dot,
    DotDot,
    At,
    Comma,
    Pipe,
    Star,
    DoubleColon,
    Op(Comparison),
    Literal(String),
    Number(f64),
    /// NCName or `prefix:local` / `prefix:*`
    Name(String),
}

fn tokenize(source: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    let is_name_start = |c: char| c.is_alphabetic() || c == '_';
    let is_name_char = |c: char| c.is_alphanumeric() || c == '_' || c == '-' || c == '.';

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match c {
            ' ' | '\t' | '\n' | '\r' => {
                i += 1;
            }
            '/' if next == Some('/') => {
                tokens.push(Token::DoubleSlash);
                i += 2;
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            '@' => {
                tokens.push(Token::At);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '|' => {
                tokens.push(Token::Pipe);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            ':' if next == Some(':') => {
                tokens.push(Token::DoubleColon);
                i += 2;
            }
            '=' => {
                tokens.push(Token::Op(Comparison::Eq));
                i += 1;
            }
            '!' if next == Some('=') => {
                tokens.push(Token::Op(Comparison::Ne));
                i += 2;
            }
            '<' if next == Some('=') => {
                tokens.push(Token::Op(Comparison::Le));
                i += 2;
            }
            '<' => {
                tokens.push(Token::Op(Comparison::Lt));
                i += 1;
            }
            '>' if next == Some('=') => {
                tokens.push(Token::Op(Comparison::Ge));
                i += 2;
            }
            '>' => {
                tokens.push(Token::Op(Comparison::Gt));
                i += 1;
            }
            '"' | '\'' => {
                let end = chars[i + 1..]
                    .iter()
                    .position(|&q| q == c)
                    .ok_or_else(|| "unterminated string literal".to_string())?;
                tokens.push(Token::Literal(chars[i + 1..i + 1 + end].iter().collect()));
                i += end + 2;
            }
            '.' if next == Some('.') => {
                tokens.push(Token::DotDot);
                i += 2;
            }
            '.' if !next.map(|n| n.is_ascii_digit()).unwrap_or(false) => {
                tokens.push(Token::Dot);
                i += 1;
            }
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let number = text
                    .parse()
                    .map_err(|_| format!("invalid number {}", text))?;
                tokens.push(Token::Number(number));
            }
            c if is_name_start(c) => {
                let start = i;
                while i < chars.len() && is_name_char(chars[i]) {
                    i += 1;
                }
                // prefix:local or prefix:*, but not axis::
                if i + 1 < chars.len() && chars[i] == ':' && chars[i + 1] != ':' {
                    if chars[i + 1] == '*' {
                        i += 2;
                    } else if is_name_start(chars[i + 1]) {
                        i += 1;
                        while i < chars.len() && is_name_char(chars[i]) {
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Name(chars[start..i].iter().collect()));
            }
            other => return Err(format!("unexpected character {:?}", other)),
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    position: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.position + offset)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).cloned();
        self.position += 1;
        token
    }

    fn expect(&mut self, expected: Token) -> Result<(), String> {
        match self.advance() {
            Some(token) if token == expected => Ok(()),
            Some(token) => Err(format!("expected {:?}, found {:?}", expected, token)),
            None => Err(format!("expected {:?}, found end of expression", expected)),
        }
    }

    fn next_is_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Name(name)) if name == keyword)
    }

    fn parse_or(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_and()?;
        while self.next_is_keyword("or") {
            self.advance();
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_equality()?;
        while self.next_is_keyword("and") {
            self.advance();
            let right = self.parse_equality()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_relational()?;
        while let Some(Token::Op(op @ (Comparison::Eq | Comparison::Ne))) = self.peek().cloned() {
            self.advance();
            let right = self.parse_relational()?;
            left = Expr::Compare(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_relational(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_union()?;
        while let Some(Token::Op(
            op @ (Comparison::Lt | Comparison::Le | Comparison::Gt | Comparison::Ge),
        )) = self.peek().cloned()
        {
            self.advance();
            let right = self.parse_union()?;
            left = Expr::Compare(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_union(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_path()?;
        while self.peek() == Some(&Token::Pipe) {
            self.advance();
            let right = self.parse_path()?;
            left = Expr::Union(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn starts_primary(&self) -> bool {
        match self.peek() {
            Some(Token::Literal(_)) | Some(Token::Number(_)) | Some(Token::LParen) => true,
            Some(Token::Name(name)) => {
                self.peek_at(1) == Some(&Token::LParen) && !is_node_type(name)
            }
            _ => false,
        }
    }

    fn parse_path(&mut self) -> Result<Expr, String> {
        if self.starts_primary() {
            let primary = self.parse_primary()?;
            let predicates = self.parse_predicates()?;
            let steps = match self.peek() {
                Some(Token::Slash) => {
                    self.advance();
                    self.parse_relative_steps()?
                }
                Some(Token::DoubleSlash) => {
                    self.advance();
                    let mut steps = vec![descendant_or_self()];
                    steps.extend(self.parse_relative_steps()?);
                    steps
                }
                _ => Vec::new(),
            };
            if predicates.is_empty() && steps.is_empty() {
                return Ok(primary);
            }
            return Ok(Expr::Filter {
                primary: Box::new(primary),
                predicates,
                steps,
            });
        }

        match self.peek() {
            Some(Token::Slash) => {
                self.advance();
                let steps = if self.starts_step() {
                    self.parse_relative_steps()?
                } else {
                    Vec::new()
                };
                Ok(Expr::Path {
                    absolute: true,
                    steps,
                })
            }
            Some(Token::DoubleSlash) => {
                self.advance();
                let mut steps = vec![descendant_or_self()];
                steps.extend(self.parse_relative_steps()?);
                Ok(Expr::Path {
                    absolute: true,
                    steps,
                })
            }
            _ => Ok(Expr::Path {
                absolute: false,
                steps: self.parse_relative_steps()?,
            }),
        }
    }

    fn starts_step(&self) -> bool {
        matches!(
            self.peek(),
            Some(Token::Name(_))
                | Some(Token::Star)
                | Some(Token::At)
                | Some(Token::Dot)
                | Some(Token::DotDot)
        )
    }

    fn parse_relative_steps(&mut self) -> Result<Vec<Step>, String> {
        let mut steps = vec![self.parse_step()?];
        loop {
            match self.peek() {
                Some(Token::Slash) => {
                    self.advance();
                    steps.push(self.parse_step()?);
                }
                Some(Token::DoubleSlash) => {
                    self.advance();
                    steps.push(descendant_or_self());
                    steps.push(self.parse_step()?);
                }
                _ => return Ok(steps),
            }
        }
    }

    fn parse_step(&mut self) -> Result<Step, String> {
        match self.peek() {
            Some(Token::Dot) => {
                self.advance();
                return Ok(Step {
                    axis: Axis::SelfAxis,
                    test: NodeTest::Node,
                    predicates: Vec::new(),
                });
            }
            Some(Token::DotDot) => {
                self.advance();
                return Ok(Step {
                    axis: Axis::Parent,
                    test: NodeTest::Node,
                    predicates: Vec::new(),
                });
            }
            _ => {}
        }

        let axis = if self.peek() == Some(&Token::At) {
            self.advance();
            Axis::Attribute
        } else if let (Some(Token::Name(name)), Some(Token::DoubleColon)) =
            (self.peek().cloned(), self.peek_at(1))
        {
            self.position += 2;
            Axis::from_name(&name).ok_or_else(|| format!("unknown axis {}", name))?
        } else {
            Axis::Child
        };

        let test = self.parse_node_test()?;
        let predicates = self.parse_predicates()?;
        Ok(Step {
            axis,
            test,
            predicates,
        })
    }

    fn parse_node_test(&mut self) -> Result<NodeTest, String> {
        match self.advance() {
            Some(Token::Star) => Ok(NodeTest::Any),
            Some(Token::Name(name)) => {
                if is_node_type(&name) && self.peek() == Some(&Token::LParen) {
                    self.advance();
                    self.expect(Token::RParen)?;
                    return match name.as_str() {
                        "text" => Ok(NodeTest::Text),
                        "node" => Ok(NodeTest::Node),
                        other => Err(format!("unsupported node type {}()", other)),
                    };
                }
                Ok(match name.split_once(':') {
                    Some((prefix, "*")) => NodeTest::AnyInPrefix(prefix.to_string()),
                    Some((prefix, local)) => NodeTest::Name {
                        prefix: Some(prefix.to_string()),
                        local: local.to_string(),
                    },
                    None => NodeTest::Name {
                        prefix: None,
                        local: name,
                    },
                })
            }
            Some(token) => Err(format!("expected a node test, found {:?}", token)),
            None => Err("expected a node test, found end of expression".to_string()),
        }
    }

    fn parse_predicates(&mut self) -> Result<Vec<Expr>, String> {
        let mut predicates = Vec::new();
        while self.peek() == Some(&Token::LBracket) {
            self.advance();
            predicates.push(self.parse_or()?);
            self.expect(Token::RBracket)?;
        }
        Ok(predicates)
    }

    fn parse_primary(&mut self) -> Result<Expr, String> {
        match self.advance() {
            Some(Token::Literal(s)) => Ok(Expr::Literal(s)),
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Name(name)) => {
                let function =
                    Function::from_name(&name).ok_or_else(|| format!("unknown function {}", name))?;
                self.expect(Token::LParen)?;
                let mut args = Vec::new();
                if self.peek() != Some(&Token::RParen) {
                    args.push(self.parse_or()?);
                    while self.peek() == Some(&Token::Comma) {
                        self.advance();
                        args.push(self.parse_or()?);
                    }
                }
                self.expect(Token::RParen)?;

                let (min, max) = function.arity();
                if args.len() < min || max.map(|max| args.len() > max).unwrap_or(false) {
                    return Err(format!("wrong number of arguments to {}()", name));
                }
                Ok(Expr::Call(function, args))
            }
            Some(token) => Err(format!("unexpected {:?}", token)),
            None => Err("unexpected end of expression".to_string()),
        }
    }
}

fn is_node_type(name: &str) -> bool {
    matches!(
        name,
        "text" | "node" | "comment" | "processing-instruction"
    )
}

fn descendant_or_self() -> Step {
    Step {
        axis: Axis::DescendantOrSelf,
        test: NodeTest::Node,
        predicates: Vec::new(),
    }
}

/// A compiled path expression
#[derive(Debug, Clone, PartialEq)]
pub struct XPath {
    source: String,
    expr: Expr,
}

impl XPath {
    pub fn compile(source: &str) -> Result<Self, XPathError> {
        let error = |message: String| XPathError {
            expression: source.to_string(),
            message,
        };

        let tokens = tokenize(source).map_err(error)?;
        if tokens.is_empty() {
            return Err(error("empty expression".to_string()));
        }
        let mut parser = Parser {
            tokens,
            position: 0,
        };
        let expr = parser.parse_or().map_err(error)?;
        if let Some(token) = parser.peek() {
            return Err(error(format!("unexpected trailing {:?}", token)));
        }

        Ok(Self {
            source: source.to_string(),
            expr,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Evaluate with `context` as the context node
    pub fn evaluate(&self, doc: &Document, context: NodeId, namespaces: &Namespaces) -> Value {
        let evaluator = Evaluator { doc, namespaces };
        evaluator.eval(
            &self.expr,
            &Context {
                item: Item::Node(context),
                position: 1,
                size: 1,
            },
        )
    }

    /// Selected nodes; empty when the expression yields a non-node value
    pub fn select(&self, doc: &Document, context: NodeId, namespaces: &Namespaces) -> Vec<Item> {
        match self.evaluate(doc, context, namespaces) {
            Value::Nodes(items) => items,
            _ => Vec::new(),
        }
    }

    /// Every result as a string: one per selected node, or the single atomic value
    pub fn strings(&self, doc: &Document, context: NodeId, namespaces: &Namespaces) -> Vec<String> {
        match self.evaluate(doc, context, namespaces) {
            Value::Nodes(items) => items.iter().map(|item| item.string_value(doc)).collect(),
            atomic => vec![atomic.to_string_value(doc)],
        }
    }
}

struct Context {
    item: Item,
    position: usize,
    size: usize,
}

struct Evaluator<'a> {
    doc: &'a Document,
    namespaces: &'a Namespaces,
}

impl<'a> Evaluator<'a> {
    fn eval(&self, expr: &Expr, ctx: &Context) -> Value {
        match expr {
            Expr::Or(left, right) => {
                Value::Bool(self.eval(left, ctx).to_bool() || self.eval(right, ctx).to_bool())
            }
            Expr::And(left, right) => {
                Value::Bool(self.eval(left, ctx).to_bool() && self.eval(right, ctx).to_bool())
            }
            Expr::Compare(op, left, right) => {
                let left = self.eval(left, ctx);
                let right = self.eval(right, ctx);
                Value::Bool(self.compare(*op, &left, &right))
            }
            Expr::Union(left, right) => {
                let mut items = self.nodes(self.eval(left, ctx));
                items.extend(self.nodes(self.eval(right, ctx)));
                Value::Nodes(document_order(items))
            }
            Expr::Literal(s) => Value::Str(s.clone()),
            Expr::Number(n) => Value::Num(*n),
            Expr::Call(function, args) => self.call(*function, args, ctx),
            Expr::Path { absolute, steps } => {
                let start = if *absolute {
                    Item::Node(Document::ROOT)
                } else {
                    ctx.item
                };
                Value::Nodes(self.apply_steps(vec![start], steps))
            }
            Expr::Filter {
                primary,
                predicates,
                steps,
            } => {
                let mut items = document_order(self.nodes(self.eval(primary, ctx)));
                for predicate in predicates {
                    items = self.filter(items, predicate);
                }
                Value::Nodes(self.apply_steps(items, steps))
            }
        }
    }

    fn nodes(&self, value: Value) -> Vec<Item> {
        match value {
            Value::Nodes(items) => items,
            _ => Vec::new(),
        }
    }

    fn apply_steps(&self, mut items: Vec<Item>, steps: &[Step]) -> Vec<Item> {
        for step in steps {
            let mut next = Vec::new();
            for item in &items {
                let mut candidates: Vec<Item> = self
                    .axis(step.axis, *item)
                    .into_iter()
                    .filter(|candidate| self.matches(step.axis, &step.test, *candidate))
                    .collect();
                for predicate in &step.predicates {
                    candidates = self.filter(candidates, predicate);
                }
                next.extend(candidates);
            }
            items = document_order(next);
        }
        items
    }

    /// Keep the items for which `predicate` holds, positions taken in input order
    fn filter(&self, items: Vec<Item>, predicate: &Expr) -> Vec<Item> {
        let size = items.len();
        items
            .into_iter()
            .enumerate()
            .filter(|(index, item)| {
                let ctx = Context {
                    item: *item,
                    position: index + 1,
                    size,
                };
                match self.eval(predicate, &ctx) {
                    Value::Num(n) => n == (index + 1) as f64,
                    other => other.to_bool(),
                }
            })
            .map(|(_, item)| item)
            .collect()
    }

    /// Axis members of `item`, in axis order
    fn axis(&self, axis: Axis, item: Item) -> Vec<Item> {
        let doc = self.doc;
        let Item::Node(id) = item else {
            // Attributes only have a parent and themselves
            return match (axis, item) {
                (Axis::SelfAxis, _) => vec![item],
                (Axis::Parent, Item::Attr(owner, _)) => vec![Item::Node(owner)],
                (Axis::Ancestor | Axis::AncestorOrSelf, Item::Attr(owner, _)) => {
                    let mut items = if axis == Axis::AncestorOrSelf {
                        vec![item]
                    } else {
                        Vec::new()
                    };
                    items.push(Item::Node(owner));
                    items.extend(self.ancestors(owner));
                    items
                }
                _ => Vec::new(),
            };
        };

        match axis {
            Axis::Child => doc.children(id).iter().map(|&c| Item::Node(c)).collect(),
            Axis::Descendant => doc.descendants(id).into_iter().map(Item::Node).collect(),
            Axis::DescendantOrSelf => std::iter::once(Item::Node(id))
                .chain(doc.descendants(id).into_iter().map(Item::Node))
                .collect(),
            Axis::SelfAxis => vec![item],
            Axis::Parent => doc.parent(id).map(Item::Node).into_iter().collect(),
            Axis::Ancestor => self.ancestors(id),
            Axis::AncestorOrSelf => std::iter::once(item).chain(self.ancestors(id)).collect(),
            Axis::Attribute => doc
                .element(id)
                .map(|element| {
                    (0..element.attributes.len())
                        .map(|index| Item::Attr(id, index))
                        .collect()
                })
                .unwrap_or_default(),
            Axis::FollowingSibling | Axis::PrecedingSibling => {
                let Some(parent) = doc.parent(id) else {
                    return Vec::new();
                };
                let siblings = doc.children(parent);
                let Some(index) = siblings.iter().position(|&s| s == id) else {
                    return Vec::new();
                };
                if axis == Axis::FollowingSibling {
                    siblings[index + 1..].iter().map(|&s| Item::Node(s)).collect()
                } else {
                    siblings[..index].iter().rev().map(|&s| Item::Node(s)).collect()
                }
            }
        }
    }

    fn ancestors(&self, id: NodeId) -> Vec<Item> {
        let mut items = Vec::new();
        let mut current = self.doc.parent(id);
        while let Some(node) = current {
            items.push(Item::Node(node));
            current = self.doc.parent(node);
        }
        items
    }

    fn matches(&self, axis: Axis, test: &NodeTest, item: Item) -> bool {
        let doc = self.doc;

        let name = match item {
            Item::Attr(id, index) => {
                if axis != Axis::Attribute {
                    return matches!(test, NodeTest::Node);
                }
                doc.element(id)
                    .and_then(|element| element.attributes.get(index))
                    .map(|attribute| &attribute.name)
            }
            Item::Node(id) => match &doc.node(id).kind {
                NodeKind::Text(_) => {
                    return matches!(test, NodeTest::Text | NodeTest::Node);
                }
                NodeKind::Root => return matches!(test, NodeTest::Node),
                NodeKind::Element(element) => {
                    if axis == Axis::Attribute {
                        return false;
                    }
                    Some(&element.name)
                }
            },
        };
        let Some(name) = name else {
            return false;
        };

        match test {
            NodeTest::Node | NodeTest::Any => true,
            NodeTest::Text => false,
            NodeTest::AnyInPrefix(prefix) => match self.namespaces.get(prefix) {
                Some(uri) => name.namespace.as_deref() == Some(uri.as_str()),
                None => false,
            },
            NodeTest::Name { prefix, local } => {
                if name.local != *local {
                    return false;
                }
                match prefix {
                    None => name.namespace.is_none(),
                    Some(prefix) => match self.namespaces.get(prefix) {
                        Some(uri) => name.namespace.as_deref() == Some(uri.as_str()),
                        None => false,
                    },
                }
            }
        }
    }

    fn call(&self, function: Function, args: &[Expr], ctx: &Context) -> Value {
        let doc = self.doc;
        let string_arg = |index: usize| -> String {
            match args.get(index) {
                Some(arg) => self.eval(arg, ctx).to_string_value(doc),
                None => ctx.item.string_value(doc),
            }
        };

        match function {
            Function::Contains => Value::Bool(string_arg(0).contains(&string_arg(1))),
            Function::StartsWith => Value::Bool(string_arg(0).starts_with(&string_arg(1))),
            Function::Not => Value::Bool(!self.eval(&args[0], ctx).to_bool()),
            Function::NormalizeSpace => Value::Str(
                string_arg(0)
                    .split_whitespace()
                    .collect::<Vec<_>>()
                    .join(" "),
            ),
            Function::String => Value::Str(string_arg(0)),
            Function::Concat => Value::Str(
                (0..args.len())
                    .map(string_arg)
                    .collect::<Vec<_>>()
                    .concat(),
            ),
            Function::Count => match self.eval(&args[0], ctx) {
                Value::Nodes(items) => Value::Num(items.len() as f64),
                _ => Value::Num(f64::NAN),
            },
            Function::Position => Value::Num(ctx.position as f64),
            Function::Last => Value::Num(ctx.size as f64),
            Function::LocalName => {
                let item = match args.first() {
                    Some(arg) => document_order(self.nodes(self.eval(arg, ctx)))
                        .first()
                        .copied(),
                    None => Some(ctx.item),
                };
                Value::Str(item.map(|item| self.local_name(item)).unwrap_or_default())
            }
            Function::True => Value::Bool(true),
            Function::False => Value::Bool(false),
        }
    }

    fn local_name(&self, item: Item) -> String {
        match item {
            Item::Node(id) => self
                .doc
                .element(id)
                .map(|element| element.name.local.clone())
                .unwrap_or_default(),
            Item::Attr(id, index) => self
                .doc
                .element(id)
                .and_then(|element| element.attributes.get(index))
                .map(|attribute| attribute.name.local.clone())
                .unwrap_or_default(),
        }
    }

    fn compare(&self, op: Comparison, left: &Value, right: &Value) -> bool {
        let doc = self.doc;
        match (left, right) {
            (Value::Nodes(a), Value::Nodes(b)) => a.iter().any(|x| {
                let x = Value::Str(x.string_value(doc));
                b.iter()
                    .any(|y| self.compare_atomic(op, &x, &Value::Str(y.string_value(doc))))
            }),
            (Value::Nodes(_), Value::Bool(b)) => {
                self.compare_atomic(op, &Value::Bool(left.to_bool()), &Value::Bool(*b))
            }
            (Value::Bool(b), Value::Nodes(_)) => {
                self.compare_atomic(op, &Value::Bool(*b), &Value::Bool(right.to_bool()))
            }
            (Value::Nodes(a), atomic) => a
                .iter()
                .any(|x| self.compare_atomic(op, &Value::Str(x.string_value(doc)), atomic)),
            (atomic, Value::Nodes(b)) => b
                .iter()
                .any(|y| self.compare_atomic(op, atomic, &Value::Str(y.string_value(doc)))),
            (a, b) => self.compare_atomic(op, a, b),
        }
    }

    fn compare_atomic(&self, op: Comparison, left: &Value, right: &Value) -> bool {
        let doc = self.doc;
        match op {
            Comparison::Eq | Comparison::Ne => {
                let equal = match (left, right) {
                    (Value::Bool(_), _) | (_, Value::Bool(_)) => left.to_bool() == right.to_bool(),
                    (Value::Num(_), _) | (_, Value::Num(_)) => {
                        left.to_number(doc) == right.to_number(doc)
                    }
                    _ => left.to_string_value(doc) == right.to_string_value(doc),
                };
                equal == (op == Comparison::Eq)
            }
            _ => {
                let (l, r) = (left.to_number(doc), right.to_number(doc));
                match op {
                    Comparison::Lt => l < r,
                    Comparison::Le => l <= r,
                    Comparison::Gt => l > r,
                    _ => l >= r,
                }
            }
        }
    }
}

fn document_order(mut items: Vec<Item>) -> Vec<Item> {
    items.sort_by_key(Item::sort_key);
    items.dedup();
    items
}
