//! Arithmetic formula language for model terms.
//!
//! Formulas are tokenized and parsed once when a model is constructed.
//! Evaluation walks the resulting tree against a variable lookup.

use std::collections::BTreeSet;
use std::fmt;

use super::errors::{EngineError, EngineResult};

/// Token types.
#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Caret,
    LParen,
    RParen,
    Comma,
}

#[derive(Debug, Clone, PartialEq)]
struct Token {
    kind: TokenKind,
    offset: usize,
}

fn formula_error(message: impl Into<String>, offset: usize) -> EngineError {
    EngineError::Formula {
        message: message.into(),
        offset,
    }
}

fn tokenize(source: &str) -> EngineResult<Vec<Token>> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let c = bytes[pos];
        if c.is_ascii_whitespace() {
            pos += 1;
            continue;
        }

        let single = match c {
            b'+' => Some(TokenKind::Plus),
            b'-' => Some(TokenKind::Minus),
            b'*' => Some(TokenKind::Star),
            b'/' => Some(TokenKind::Slash),
            b'%' => Some(TokenKind::Percent),
            b'^' => Some(TokenKind::Caret),
            b'(' => Some(TokenKind::LParen),
            b')' => Some(TokenKind::RParen),
            b',' => Some(TokenKind::Comma),
            _ => None,
        };
        if let Some(kind) = single {
            tokens.push(Token { kind, offset: pos });
            pos += 1;
            continue;
        }

        if c.is_ascii_digit() || c == b'.' {
            let start = pos;
            while pos < bytes.len() && (bytes[pos].is_ascii_digit() || bytes[pos] == b'.') {
                pos += 1;
            }
            // Exponent part: 1e6, 2.5E-3
            if pos < bytes.len() && (bytes[pos] == b'e' || bytes[pos] == b'E') {
                let mut lookahead = pos + 1;
                if lookahead < bytes.len() && (bytes[lookahead] == b'+' || bytes[lookahead] == b'-') {
                    lookahead += 1;
                }
                if lookahead < bytes.len() && bytes[lookahead].is_ascii_digit() {
                    pos = lookahead;
                    while pos < bytes.len() && bytes[pos].is_ascii_digit() {
                        pos += 1;
                    }
                }
            }
            let text = &source[start..pos];
            let value = text
                .parse::<f64>()
                .map_err(|_| formula_error(format!("invalid number '{text}'"), start))?;
            tokens.push(Token {
                kind: TokenKind::Number(value),
                offset: start,
            });
            continue;
        }

        if c.is_ascii_alphabetic() || c == b'_' {
            let start = pos;
            while pos < bytes.len() && (bytes[pos].is_ascii_alphanumeric() || bytes[pos] == b'_') {
                pos += 1;
            }
            tokens.push(Token {
                kind: TokenKind::Ident(source[start..pos].to_string()),
                offset: start,
            });
            continue;
        }

        let ch = source[pos..].chars().next().unwrap_or('?');
        return Err(formula_error(format!("unexpected character '{ch}'"), pos));
    }

    Ok(tokens)
}

/// Built-in functions callable from formulas
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Min,
    Max,
    Abs,
    Sqrt,
    Ceil,
    Floor,
    Round,
    Clamp,
}

impl Function {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "min" => Some(Function::Min),
            "max" => Some(Function::Max),
            "abs" => Some(Function::Abs),
            "sqrt" => Some(Function::Sqrt),
            "ceil" => Some(Function::Ceil),
            "floor" => Some(Function::Floor),
            "round" => Some(Function::Round),
            "clamp" => Some(Function::Clamp),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Function::Min => "min",
            Function::Max => "max",
            Function::Abs => "abs",
            Function::Sqrt => "sqrt",
            Function::Ceil => "ceil",
            Function::Floor => "floor",
            Function::Round => "round",
            Function::Clamp => "clamp",
        }
    }

    /// Accepted argument count as (min, max)
    fn arity(self) -> (usize, usize) {
        match self {
            Function::Min | Function::Max => (1, usize::MAX),
            Function::Clamp => (3, 3),
            _ => (1, 1),
        }
    }

    fn apply(self, args: &[f64]) -> f64 {
        match self {
            Function::Min => args.iter().copied().fold(f64::INFINITY, f64::min),
            Function::Max => args.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Function::Abs => args[0].abs(),
            Function::Sqrt => args[0].sqrt(),
            Function::Ceil => args[0].ceil(),
            Function::Floor => args[0].floor(),
            Function::Round => args[0].round(),
            Function::Clamp => {
                // f64::clamp panics when lo > hi; keep evaluation total.
                let (lo, hi) = (args[1], args[2]);
                if lo > hi {
                    f64::NAN
                } else {
                    args[0].max(lo).min(hi)
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
}

impl BinOp {
    fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Rem => "%",
            BinOp::Pow => "^",
        }
    }
}

/// Parsed formula expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Var(String),
    Neg(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Call(Function, Vec<Expr>),
}

impl Expr {
    /// Evaluate with `lookup` resolving every identifier.
    ///
    /// Identifiers are checked when the owning model is built, so an
    /// unresolved name here evaluates to NaN and surfaces as a non-finite
    /// term rather than a panic.
    pub fn eval<F>(&self, lookup: &F) -> f64
    where
        F: Fn(&str) -> Option<f64>,
    {
        match self {
            Expr::Number(n) => *n,
            Expr::Var(name) => lookup(name).unwrap_or(f64::NAN),
            Expr::Neg(inner) => -inner.eval(lookup),
            Expr::Binary(op, lhs, rhs) => {
                let a = lhs.eval(lookup);
                let b = rhs.eval(lookup);
                match op {
                    BinOp::Add => a + b,
                    BinOp::Sub => a - b,
                    BinOp::Mul => a * b,
                    BinOp::Div => a / b,
                    BinOp::Rem => a % b,
                    BinOp::Pow => a.powf(b),
                }
            }
            Expr::Call(func, args) => {
                let values: Vec<f64> = args.iter().map(|a| a.eval(lookup)).collect();
                func.apply(&values)
            }
        }
    }

    /// Every identifier referenced by the expression
    pub fn identifiers(&self) -> BTreeSet<&str> {
        let mut out = BTreeSet::new();
        self.collect_identifiers(&mut out);
        out
    }

    fn collect_identifiers<'a>(&'a self, out: &mut BTreeSet<&'a str>) {
        match self {
            Expr::Number(_) => {}
            Expr::Var(name) => {
                out.insert(name.as_str());
            }
            Expr::Neg(inner) => inner.collect_identifiers(out),
            Expr::Binary(_, lhs, rhs) => {
                lhs.collect_identifiers(out);
                rhs.collect_identifiers(out);
            }
            Expr::Call(_, args) => {
                for arg in args {
                    arg.collect_identifiers(out);
                }
            }
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Number(n) => write!(f, "{n}"),
            Expr::Var(name) => write!(f, "{name}"),
            Expr::Neg(inner) => write!(f, "-({inner})"),
            Expr::Binary(op, lhs, rhs) => write!(f, "({lhs} {} {rhs})", op.symbol()),
            Expr::Call(func, args) => {
                write!(f, "{}(", func.name())?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, ")")
            }
        }
    }
}

/// Parser state wrapping a token stream.
struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    end: usize,
}

impl Parser {
    fn peek_kind(&self) -> Option<&TokenKind> {
        self.tokens.get(self.pos).map(|t| &t.kind)
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map_or(self.end, |t| t.offset)
    }

    fn advance(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn expect(&mut self, expected: TokenKind, what: &str) -> EngineResult<()> {
        match self.peek_kind() {
            Some(kind) if *kind == expected => {
                self.pos += 1;
                Ok(())
            }
            Some(kind) => Err(formula_error(
                format!("expected {what}, got {kind:?}"),
                self.offset(),
            )),
            None => Err(formula_error(
                format!("expected {what}, got end of input"),
                self.end,
            )),
        }
    }

    // --- Expression parsing (precedence climbing) ---

    fn parse_expr(&mut self) -> EngineResult<Expr> {
        let mut lhs = self.parse_term()?;
        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::Plus) => BinOp::Add,
                Some(TokenKind::Minus) => BinOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.parse_term()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_term(&mut self) -> EngineResult<Expr> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::Star) => BinOp::Mul,
                Some(TokenKind::Slash) => BinOp::Div,
                Some(TokenKind::Percent) => BinOp::Rem,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> EngineResult<Expr> {
        if matches!(self.peek_kind(), Some(TokenKind::Minus)) {
            self.pos += 1;
            let inner = self.parse_unary()?;
            return Ok(Expr::Neg(Box::new(inner)));
        }
        self.parse_power()
    }

    fn parse_power(&mut self) -> EngineResult<Expr> {
        let base = self.parse_primary()?;
        if matches!(self.peek_kind(), Some(TokenKind::Caret)) {
            self.pos += 1;
            // Right-associative: 2^3^2 == 2^(3^2)
            let exponent = self.parse_unary()?;
            return Ok(Expr::Binary(BinOp::Pow, Box::new(base), Box::new(exponent)));
        }
        Ok(base)
    }

    fn parse_primary(&mut self) -> EngineResult<Expr> {
        let offset = self.offset();
        let Some(tok) = self.advance() else {
            return Err(formula_error("unexpected end of input", self.end));
        };

        match tok.kind {
            TokenKind::Number(n) => Ok(Expr::Number(n)),
            TokenKind::LParen => {
                let inner = self.parse_expr()?;
                self.expect(TokenKind::RParen, "')'")?;
                Ok(inner)
            }
            TokenKind::Ident(name) => {
                if !matches!(self.peek_kind(), Some(TokenKind::LParen)) {
                    return Ok(Expr::Var(name));
                }
                let func = Function::from_name(&name)
                    .ok_or_else(|| formula_error(format!("unknown function '{name}'"), offset))?;
                self.pos += 1;
                let args = self.parse_args()?;
                let (min, max) = func.arity();
                if args.len() < min || args.len() > max {
                    return Err(formula_error(
                        format!("{name}() takes {} argument(s), got {}", arity_label(min, max), args.len()),
                        offset,
                    ));
                }
                Ok(Expr::Call(func, args))
            }
            other => Err(formula_error(format!("unexpected token {other:?}"), offset)),
        }
    }

    fn parse_args(&mut self) -> EngineResult<Vec<Expr>> {
        let mut args = Vec::new();
        if matches!(self.peek_kind(), Some(TokenKind::RParen)) {
            self.pos += 1;
            return Ok(args);
        }
        loop {
            args.push(self.parse_expr()?);
            match self.peek_kind() {
                Some(TokenKind::Comma) => self.pos += 1,
                _ => {
                    self.expect(TokenKind::RParen, "',' or ')'")?;
                    return Ok(args);
                }
            }
        }
    }
}

fn arity_label(min: usize, max: usize) -> String {
    if min == max {
        min.to_string()
    } else {
        format!("at least {min}")
    }
}

/// Parse formula source into an expression tree.
pub fn parse(source: &str) -> EngineResult<Expr> {
    let tokens = tokenize(source)?;
    if tokens.is_empty() {
        return Err(formula_error("formula is empty", 0));
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        end: source.len(),
    };
    let expr = parser.parse_expr()?;
    if parser.pos < parser.tokens.len() {
        let offset = parser.offset();
        let kind = &parser.tokens[parser.pos].kind;
        return Err(formula_error(format!("unexpected trailing token {kind:?}"), offset));
    }
    Ok(expr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn eval_with(source: &str, vars: &[(&str, f64)]) -> f64 {
        let vars: HashMap<&str, f64> = vars.iter().copied().collect();
        parse(source).unwrap().eval(&|name: &str| vars.get(name).copied())
    }

    // ==================== parsing tests ====================

    #[test]
    fn test_parse_precedence() {
        assert_eq!(eval_with("2 + 3 * 4", &[]), 14.0);
        assert_eq!(eval_with("(2 + 3) * 4", &[]), 20.0);
        assert_eq!(eval_with("10 - 4 - 3", &[]), 3.0); // left-associative
        assert_eq!(eval_with("2 ^ 3 ^ 2", &[]), 512.0); // right-associative
        assert_eq!(eval_with("-2 ^ 2", &[]), -4.0);
        assert_eq!(eval_with("7 % 4", &[]), 3.0);
    }

    #[test]
    fn test_parse_scientific_numbers() {
        assert_eq!(eval_with("1e3", &[]), 1000.0);
        assert_eq!(eval_with("2.5E-1 * 4", &[]), 1.0);
        assert_eq!(eval_with(".5 + .5", &[]), 1.0);
    }

    #[test]
    fn test_parse_variables() {
        let result = eval_with(
            "rate * hours + fixedFee",
            &[("rate", 50.0), ("hours", 10.0), ("fixedFee", 100.0)],
        );
        assert_eq!(result, 600.0);
    }

    #[test]
    fn test_parse_functions() {
        assert_eq!(eval_with("min(3, 1, 2)", &[]), 1.0);
        assert_eq!(eval_with("max(3, 1, 2)", &[]), 3.0);
        assert_eq!(eval_with("abs(-4)", &[]), 4.0);
        assert_eq!(eval_with("sqrt(16)", &[]), 4.0);
        assert_eq!(eval_with("ceil(1.2) + floor(1.8)", &[]), 3.0);
        assert_eq!(eval_with("round(2.5)", &[]), 3.0);
        assert_eq!(eval_with("clamp(15, 0, 10)", &[]), 10.0);
    }

    #[test]
    fn test_clamp_with_inverted_bounds_is_nan() {
        assert!(eval_with("clamp(1, 10, 0)", &[]).is_nan());
    }

    #[test]
    fn test_identifiers_collected() {
        let expr = parse("max(rate, floor_rate) * hours + 3").unwrap();
        let ids: Vec<&str> = expr.identifiers().into_iter().collect();
        assert_eq!(ids, vec!["floor_rate", "hours", "rate"]);
    }

    #[test]
    fn test_unknown_variable_evaluates_to_nan() {
        assert!(eval_with("missing * 2", &[]).is_nan());
    }

    // ==================== error tests ====================

    #[test]
    fn test_parse_errors_carry_offset() {
        match parse("rate * $hours") {
            Err(EngineError::Formula { offset, .. }) => assert_eq!(offset, 7),
            other => panic!("expected formula error, got {other:?}"),
        }

        match parse("(rate + 1") {
            Err(EngineError::Formula { offset, message }) => {
                assert_eq!(offset, 9);
                assert!(message.contains("')'"));
            }
            other => panic!("expected formula error, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_rejects_empty_and_trailing() {
        assert!(matches!(parse("   "), Err(EngineError::Formula { .. })));
        assert!(matches!(parse("1 2"), Err(EngineError::Formula { offset: 2, .. })));
        assert!(matches!(parse("1 +"), Err(EngineError::Formula { .. })));
    }

    #[test]
    fn test_parse_rejects_unknown_function_and_bad_arity() {
        assert!(matches!(parse("log(2)"), Err(EngineError::Formula { offset: 0, .. })));
        assert!(matches!(parse("abs(1, 2)"), Err(EngineError::Formula { .. })));
        assert!(matches!(parse("clamp(1, 2)"), Err(EngineError::Formula { .. })));
        assert!(matches!(parse("min()"), Err(EngineError::Formula { .. })));
    }

    #[test]
    fn test_display_round_trips_through_parser() {
        let expr = parse("-(a + 2) * max(b, 3) ^ 2").unwrap();
        let reparsed = parse(&expr.to_string()).unwrap();
        assert_eq!(expr, reparsed);
    }
}
