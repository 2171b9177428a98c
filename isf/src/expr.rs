//! Arithmetic expressions for pass `WIDTH` and `HEIGHT` like `"floor($WIDTH / 2.0)"`.
//!
//! Expressions are parsed once when the document is loaded
//! and evaluated again whenever the render size changes.
use indexmap::IndexMap;

use crate::error::ParseExprError;

/// The maximum nesting of parentheses, function calls, and unary operators.
pub const MAX_DEPTH: usize = 64;

/// Named values like `WIDTH` or input names available to expressions.
pub type SubstitutionMap = IndexMap<String, f64>;

#[derive(Debug, PartialEq, Clone)]
pub enum Expr {
    /// A numeric literal like `2` or `0.5`.
    Float(f64),
    /// A variable like `$WIDTH` stored without the leading `$`.
    Variable(String),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Func { func: Func, args: Vec<Expr> },
}

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum UnaryOp {
    Negate,
}

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum Func {
    Floor,
    Ceil,
    Round,
    Abs,
    Sqrt,
    Min,
    Max,
    Pow,
}

impl Func {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "floor" => Some(Self::Floor),
            "ceil" => Some(Self::Ceil),
            "round" => Some(Self::Round),
            "abs" => Some(Self::Abs),
            "sqrt" => Some(Self::Sqrt),
            "min" => Some(Self::Min),
            "max" => Some(Self::Max),
            "pow" => Some(Self::Pow),
            _ => None,
        }
    }

    fn arg_count(&self) -> usize {
        match self {
            Self::Floor | Self::Ceil | Self::Round | Self::Abs | Self::Sqrt => 1,
            Self::Min | Self::Max | Self::Pow => 2,
        }
    }
}

impl Expr {
    pub fn parse(text: &str) -> Result<Self, ParseExprError> {
        let tokens = tokenize(text)?;
        let mut parser = Parser {
            tokens: &tokens,
            index: 0,
            depth: 0,
        };
        let expr = parser.expr()?;
        match parser.peek() {
            Some((token, position)) => Err(ParseExprError::UnexpectedToken {
                token: token.to_string(),
                position: *position,
            }),
            None => Ok(expr),
        }
    }

    /// Evaluate the expression using `values` for variables.
    /// Variables missing from `values` evaluate to `0.0`.
    pub fn eval(&self, values: &SubstitutionMap) -> f64 {
        match self {
            Expr::Float(f) => *f,
            Expr::Variable(name) => values.get(name).copied().unwrap_or(0.0),
            Expr::Unary(UnaryOp::Negate, e) => -e.eval(values),
            Expr::Binary(op, a, b) => {
                let a = a.eval(values);
                let b = b.eval(values);
                match op {
                    BinaryOp::Add => a + b,
                    BinaryOp::Sub => a - b,
                    BinaryOp::Mul => a * b,
                    BinaryOp::Div => a / b,
                }
            }
            Expr::Func { func, args } => {
                let arg = |i: usize| args[i].eval(values);
                match func {
                    Func::Floor => arg(0).floor(),
                    Func::Ceil => arg(0).ceil(),
                    Func::Round => arg(0).round(),
                    Func::Abs => arg(0).abs(),
                    Func::Sqrt => arg(0).sqrt(),
                    Func::Min => arg(0).min(arg(1)),
                    Func::Max => arg(0).max(arg(1)),
                    Func::Pow => arg(0).powf(arg(1)),
                }
            }
        }
    }

    /// The names of all variables in the order they appear.
    pub fn variables(&self) -> Vec<&str> {
        let mut names = Vec::new();
        add_variables(&mut names, self);
        names
    }
}

fn add_variables<'a>(names: &mut Vec<&'a str>, expr: &'a Expr) {
    match expr {
        Expr::Float(_) => (),
        Expr::Variable(name) => names.push(name),
        Expr::Unary(_, e) => add_variables(names, e),
        Expr::Binary(_, a, b) => {
            add_variables(names, a);
            add_variables(names, b);
        }
        Expr::Func { args, .. } => {
            for arg in args {
                add_variables(names, arg);
            }
        }
    }
}

#[derive(Debug, PartialEq, Clone)]
enum Token {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
    Comma,
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Number(n) => write!(f, "{n}"),
            Token::Ident(i) => write!(f, "{i}"),
            Token::Plus => write!(f, "+"),
            Token::Minus => write!(f, "-"),
            Token::Star => write!(f, "*"),
            Token::Slash => write!(f, "/"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::Comma => write!(f, ","),
        }
    }
}

fn tokenize(text: &str) -> Result<Vec<(Token, usize)>, ParseExprError> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();

    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let start = i;
        let token = match c {
            c if c.is_whitespace() => {
                i += 1;
                continue;
            }
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' => Token::Star,
            '/' => Token::Slash,
            '(' => Token::LParen,
            ')' => Token::RParen,
            ',' => Token::Comma,
            c if c.is_ascii_digit() || c == '.' => {
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                // Exponents like 1e-3.
                if i < chars.len() && matches!(chars[i], 'e' | 'E') {
                    let mut j = i + 1;
                    if j < chars.len() && matches!(chars[j], '+' | '-') {
                        j += 1;
                    }
                    if j < chars.len() && chars[j].is_ascii_digit() {
                        i = j;
                        while i < chars.len() && chars[i].is_ascii_digit() {
                            i += 1;
                        }
                    }
                }
                let literal: String = chars[start..i].iter().collect();
                let value = literal
                    .parse()
                    .map_err(|_| ParseExprError::UnexpectedToken {
                        token: literal.clone(),
                        position: start,
                    })?;
                tokens.push((Token::Number(value), start));
                continue;
            }
            c if c == '$' || c.is_ascii_alphabetic() || c == '_' => {
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                if c == '$' && i == start + 1 {
                    return Err(ParseExprError::UnexpectedChar { c, position: start });
                }
                let ident: String = chars[start..i].iter().collect();
                tokens.push((Token::Ident(ident), start));
                continue;
            }
            c => return Err(ParseExprError::UnexpectedChar { c, position: start }),
        };
        tokens.push((token, start));
        i += 1;
    }

    Ok(tokens)
}

struct Parser<'a> {
    tokens: &'a [(Token, usize)],
    index: usize,
    depth: usize,
}

impl Parser<'_> {
    fn nested<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, ParseExprError>,
    ) -> Result<T, ParseExprError> {
        if self.depth >= MAX_DEPTH {
            return Err(ParseExprError::TooDeep { max: MAX_DEPTH });
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    fn peek(&self) -> Option<&(Token, usize)> {
        self.tokens.get(self.index)
    }

    fn next(&mut self) -> Result<&(Token, usize), ParseExprError> {
        let token = self
            .tokens
            .get(self.index)
            .ok_or(ParseExprError::UnexpectedEnd)?;
        self.index += 1;
        Ok(token)
    }

    fn expect(&mut self, expected: Token) -> Result<(), ParseExprError> {
        let (token, position) = self.next()?;
        if *token == expected {
            Ok(())
        } else {
            Err(ParseExprError::UnexpectedToken {
                token: token.to_string(),
                position: *position,
            })
        }
    }

    fn expr(&mut self) -> Result<Expr, ParseExprError> {
        let mut lhs = self.term()?;
        while let Some((token, _)) = self.peek() {
            let op = match token {
                Token::Plus => BinaryOp::Add,
                Token::Minus => BinaryOp::Sub,
                _ => break,
            };
            self.index += 1;
            let rhs = self.term()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn term(&mut self) -> Result<Expr, ParseExprError> {
        let mut lhs = self.unary()?;
        while let Some((token, _)) = self.peek() {
            let op = match token {
                Token::Star => BinaryOp::Mul,
                Token::Slash => BinaryOp::Div,
                _ => break,
            };
            self.index += 1;
            let rhs = self.unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, ParseExprError> {
        match self.peek() {
            Some((Token::Minus, _)) => {
                self.index += 1;
                let expr = self.nested(Self::unary)?;
                Ok(Expr::Unary(UnaryOp::Negate, Box::new(expr)))
            }
            Some((Token::Plus, _)) => {
                self.index += 1;
                self.nested(Self::unary)
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<Expr, ParseExprError> {
        let (token, position) = self.next()?.clone();
        match token {
            Token::Number(n) => Ok(Expr::Float(n)),
            Token::Ident(name) => {
                if let Some(variable) = name.strip_prefix('$') {
                    Ok(Expr::Variable(variable.to_string()))
                } else if let Some((Token::LParen, _)) = self.peek() {
                    self.index += 1;
                    self.nested(|p| p.call(name))
                } else {
                    Ok(Expr::Variable(name))
                }
            }
            Token::LParen => self.nested(|p| {
                let expr = p.expr()?;
                p.expect(Token::RParen)?;
                Ok(expr)
            }),
            token => Err(ParseExprError::UnexpectedToken {
                token: token.to_string(),
                position,
            }),
        }
    }

    fn call(&mut self, name: String) -> Result<Expr, ParseExprError> {
        let func = Func::from_name(&name)
            .ok_or_else(|| ParseExprError::UnknownFunction { name: name.clone() })?;

        let mut args = Vec::new();
        if let Some((Token::RParen, _)) = self.peek() {
            self.index += 1;
        } else {
            loop {
                args.push(self.expr()?);
                let (token, position) = self.next()?;
                match token {
                    Token::Comma => (),
                    Token::RParen => break,
                    token => {
                        return Err(ParseExprError::UnexpectedToken {
                            token: token.to_string(),
                            position: *position,
                        })
                    }
                }
            }
        }

        if args.len() != func.arg_count() {
            return Err(ParseExprError::ArgumentCount {
                name,
                expected: func.arg_count(),
                found: args.len(),
            });
        }

        Ok(Expr::Func { func, args })
    }
}
