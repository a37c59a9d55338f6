//! Safe arithmetic expression evaluator for risk-divisor formulas
//!
//! Divisor formulas arrive as configuration strings like
//! `"10 - (win_rate - 0.45) * 20"`. They are parsed once at config load into
//! an AST restricted to arithmetic operators, parentheses, the single
//! variable `win_rate`, and an allow-listed function set (`min`, `max`,
//! `abs`, `sqrt`, `log`). Nothing else parses; user-controlled strings never
//! reach a general-purpose interpreter.

use std::fmt;

/// Compiled formula over a single `win_rate` variable.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Num(f64),
    WinRate,
    Neg(Box<Expr>),
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    Div(Box<Expr>, Box<Expr>),
    Call(Func, Vec<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Func {
    Min,
    Max,
    Abs,
    Sqrt,
    Log,
}

impl Func {
    fn arity(&self) -> usize {
        match self {
            Func::Min | Func::Max => 2,
            Func::Abs | Func::Sqrt | Func::Log => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParseError(String);

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "formula parse error: {}", self.0)
    }
}

impl std::error::Error for ParseError {}

impl Expr {
    /// Parse a formula string. Unknown identifiers, unknown functions, and
    /// anything outside the grammar are rejected.
    pub fn parse(input: &str) -> Result<Expr, ParseError> {
        let tokens = tokenize(input)?;
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.expression()?;
        if parser.pos != parser.tokens.len() {
            return Err(ParseError(format!(
                "unexpected trailing input at token {}",
                parser.pos
            )));
        }
        Ok(expr)
    }

    /// Evaluate against a historical win rate. Non-finite intermediate
    /// results surface as non-finite output; callers clamp and fall back.
    pub fn eval(&self, win_rate: f64) -> f64 {
        match self {
            Expr::Num(n) => *n,
            Expr::WinRate => win_rate,
            Expr::Neg(e) => -e.eval(win_rate),
            Expr::Add(a, b) => a.eval(win_rate) + b.eval(win_rate),
            Expr::Sub(a, b) => a.eval(win_rate) - b.eval(win_rate),
            Expr::Mul(a, b) => a.eval(win_rate) * b.eval(win_rate),
            Expr::Div(a, b) => a.eval(win_rate) / b.eval(win_rate),
            Expr::Call(f, args) => {
                let vals: Vec<f64> = args.iter().map(|a| a.eval(win_rate)).collect();
                match f {
                    Func::Min => vals[0].min(vals[1]),
                    Func::Max => vals[0].max(vals[1]),
                    Func::Abs => vals[0].abs(),
                    Func::Sqrt => vals[0].sqrt(),
                    Func::Log => vals[0].ln(),
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
    Comma,
}

fn tokenize(input: &str) -> Result<Vec<Token>, ParseError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
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
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '0'..='9' | '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let value = text
                    .parse::<f64>()
                    .map_err(|_| ParseError(format!("bad number {text:?}")))?;
                tokens.push(Token::Num(value));
            }
            'a'..='z' | 'A'..='Z' | '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => return Err(ParseError(format!("unexpected character {other:?}"))),
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn expect(&mut self, want: Token) -> Result<(), ParseError> {
        match self.next() {
            Some(t) if t == want => Ok(()),
            other => Err(ParseError(format!("expected {want:?}, got {other:?}"))),
        }
    }

    fn expression(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.term()?;
        while let Some(op) = self.peek() {
            match op {
                Token::Plus => {
                    self.next();
                    lhs = Expr::Add(Box::new(lhs), Box::new(self.term()?));
                }
                Token::Minus => {
                    self.next();
                    lhs = Expr::Sub(Box::new(lhs), Box::new(self.term()?));
                }
                _ => break,
            }
        }
        Ok(lhs)
    }

    fn term(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.factor()?;
        while let Some(op) = self.peek() {
            match op {
                Token::Star => {
                    self.next();
                    lhs = Expr::Mul(Box::new(lhs), Box::new(self.factor()?));
                }
                Token::Slash => {
                    self.next();
                    lhs = Expr::Div(Box::new(lhs), Box::new(self.factor()?));
                }
                _ => break,
            }
        }
        Ok(lhs)
    }

    fn factor(&mut self) -> Result<Expr, ParseError> {
        match self.next() {
            Some(Token::Num(n)) => Ok(Expr::Num(n)),
            Some(Token::Minus) => Ok(Expr::Neg(Box::new(self.factor()?))),
            Some(Token::LParen) => {
                let inner = self.expression()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => self.ident(name),
            other => Err(ParseError(format!("unexpected token {other:?}"))),
        }
    }

    fn ident(&mut self, name: String) -> Result<Expr, ParseError> {
        if name == "win_rate" {
            return Ok(Expr::WinRate);
        }

        let func = match name.as_str() {
            "min" => Func::Min,
            "max" => Func::Max,
            "abs" => Func::Abs,
            "sqrt" => Func::Sqrt,
            "log" => Func::Log,
            other => return Err(ParseError(format!("unknown identifier {other:?}"))),
        };

        self.expect(Token::LParen)?;
        let mut args = vec![self.expression()?];
        while self.peek() == Some(&Token::Comma) {
            self.next();
            args.push(self.expression()?);
        }
        self.expect(Token::RParen)?;

        if args.len() != func.arity() {
            return Err(ParseError(format!(
                "{name} takes {} argument(s), got {}",
                func.arity(),
                args.len()
            )));
        }
        Ok(Expr::Call(func, args))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_formula() {
        let e = Expr::parse("10 - (win_rate - 0.45) * 20").unwrap();
        assert!((e.eval(0.45) - 10.0).abs() < 1e-9);
        assert!((e.eval(0.55) - 8.0).abs() < 1e-9);
    }

    #[test]
    fn test_functions() {
        let e = Expr::parse("max(2, min(20, 8 - win_rate * 4))").unwrap();
        assert!((e.eval(0.5) - 6.0).abs() < 1e-9);

        let e = Expr::parse("sqrt(abs(-16))").unwrap();
        assert!((e.eval(0.0) - 4.0).abs() < 1e-9);

        let e = Expr::parse("log(win_rate)").unwrap();
        assert!((e.eval(1.0)).abs() < 1e-9);
    }

    #[test]
    fn test_unary_minus_and_precedence() {
        let e = Expr::parse("-win_rate * 2 + 1").unwrap();
        assert!((e.eval(0.5) - 0.0).abs() < 1e-9);

        let e = Expr::parse("2 + 3 * 4").unwrap();
        assert!((e.eval(0.0) - 14.0).abs() < 1e-9);
    }

    #[test]
    fn test_rejects_unsafe_constructs() {
        assert!(Expr::parse("__import__").is_err());
        assert!(Expr::parse("win_rate ** 2").is_err());
        assert!(Expr::parse("open(1)").is_err());
        assert!(Expr::parse("bankroll + 1").is_err());
        assert!(Expr::parse("min(1)").is_err());
        assert!(Expr::parse("1 +").is_err());
        assert!(Expr::parse("(1").is_err());
    }

    #[test]
    fn test_division_by_zero_is_non_finite() {
        let e = Expr::parse("1 / (win_rate - win_rate)").unwrap();
        assert!(!e.eval(0.5).is_finite());
    }
}
