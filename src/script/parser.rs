//! Recursive-descent parser for the analysis dialect.

use crate::error::{AgentError, Result};
use crate::script::ast::{BinOp, BoolOp, CmpOp, Expr, Stmt, Target};
use crate::script::lexer::{tokenize, Token};

pub fn parse(source: &str) -> Result<Vec<Stmt>> {
    let tokens = tokenize(source)?;
    Parser::new(tokens).parse_program()
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn err(&self, msg: &str) -> AgentError {
        AgentError::Syntax(format!("{} (near token {:?})", msg, self.peek()))
    }

    fn peek(&self) -> &Token {
        self.tokens.get(self.pos).unwrap_or(&Token::Eof)
    }

    fn bump(&mut self) -> Token {
        let t = self.tokens.get(self.pos).cloned().unwrap_or(Token::Eof);
        self.pos += 1;
        t
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == token {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: Token, what: &str) -> Result<()> {
        if self.eat(&token) {
            Ok(())
        } else {
            Err(self.err(&format!("expected {}", what)))
        }
    }

    fn parse_program(&mut self) -> Result<Vec<Stmt>> {
        let mut stmts = Vec::new();
        loop {
            while self.eat(&Token::Newline) {}
            if self.peek() == &Token::Eof {
                return Ok(stmts);
            }
            stmts.push(self.parse_stmt()?);
        }
    }

    fn parse_stmt(&mut self) -> Result<Stmt> {
        match self.peek() {
            Token::Def => self.parse_def(),
            Token::Return => {
                self.bump();
                let value = if matches!(self.peek(), Token::Newline | Token::Eof) {
                    None
                } else {
                    Some(self.parse_expr()?)
                };
                self.end_of_line()?;
                Ok(Stmt::Return(value))
            }
            Token::If => self.parse_if(),
            Token::For => self.parse_for(),
            Token::Pass => {
                self.bump();
                self.end_of_line()?;
                Ok(Stmt::Pass)
            }
            _ => self.parse_assign_or_expr(),
        }
    }

    fn end_of_line(&mut self) -> Result<()> {
        if self.eat(&Token::Newline) || self.peek() == &Token::Eof {
            Ok(())
        } else {
            Err(self.err("expected end of line"))
        }
    }

    fn parse_def(&mut self) -> Result<Stmt> {
        self.bump(); // def
        let name = match self.bump() {
            Token::Name(n) => n,
            _ => return Err(self.err("expected function name")),
        };
        self.expect(Token::LParen, "`(`")?;
        let mut params = Vec::new();
        if !self.eat(&Token::RParen) {
            loop {
                match self.bump() {
                    Token::Name(p) => params.push(p),
                    _ => return Err(self.err("expected parameter name")),
                }
                if self.eat(&Token::Comma) {
                    if self.eat(&Token::RParen) {
                        break;
                    }
                    continue;
                }
                self.expect(Token::RParen, "`)`")?;
                break;
            }
        }
        let body = self.parse_block()?;
        Ok(Stmt::FunctionDef { name, params, body })
    }

    fn parse_if(&mut self) -> Result<Stmt> {
        self.bump(); // if
        let mut branches = Vec::new();
        let cond = self.parse_expr()?;
        let body = self.parse_block()?;
        branches.push((cond, body));
        let mut orelse = Vec::new();
        loop {
            if self.eat(&Token::Elif) {
                let cond = self.parse_expr()?;
                let body = self.parse_block()?;
                branches.push((cond, body));
            } else if self.eat(&Token::Else) {
                orelse = self.parse_block()?;
                break;
            } else {
                break;
            }
        }
        Ok(Stmt::If { branches, orelse })
    }

    fn parse_for(&mut self) -> Result<Stmt> {
        self.bump(); // for
        let var = match self.bump() {
            Token::Name(n) => n,
            _ => return Err(self.err("expected loop variable")),
        };
        self.expect(Token::In, "`in`")?;
        let iter = self.parse_expr()?;
        let body = self.parse_block()?;
        Ok(Stmt::For { var, iter, body })
    }

    fn parse_block(&mut self) -> Result<Vec<Stmt>> {
        self.expect(Token::Colon, "`:`")?;
        self.expect(Token::Newline, "newline after `:`")?;
        self.expect(Token::Indent, "indented block")?;
        let mut stmts = Vec::new();
        loop {
            while self.eat(&Token::Newline) {}
            if self.eat(&Token::Dedent) {
                break;
            }
            if self.peek() == &Token::Eof {
                break;
            }
            stmts.push(self.parse_stmt()?);
        }
        if stmts.is_empty() {
            return Err(self.err("empty block"));
        }
        Ok(stmts)
    }

    fn parse_assign_or_expr(&mut self) -> Result<Stmt> {
        let expr = self.parse_expr()?;
        if self.eat(&Token::Assign) {
            let target = match expr {
                Expr::Name(name) => Target::Name(name),
                Expr::Subscript { value, index } => match *value {
                    Expr::Name(name) => Target::Subscript {
                        name,
                        index: *index,
                    },
                    _ => return Err(self.err("invalid assignment target")),
                },
                _ => return Err(self.err("invalid assignment target")),
            };
            let value = self.parse_expr()?;
            self.end_of_line()?;
            Ok(Stmt::Assign { target, value })
        } else {
            self.end_of_line()?;
            Ok(Stmt::Expr(expr))
        }
    }

    fn parse_expr(&mut self) -> Result<Expr> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut left = self.parse_and()?;
        while self.eat(&Token::Or) {
            let right = self.parse_and()?;
            left = Expr::Logic {
                op: BoolOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut left = self.parse_not()?;
        while self.eat(&Token::And) {
            let right = self.parse_not()?;
            left = Expr::Logic {
                op: BoolOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr> {
        if self.eat(&Token::Not) {
            let operand = self.parse_not()?;
            Ok(Expr::Unary {
                negate: false,
                not: true,
                operand: Box::new(operand),
            })
        } else {
            self.parse_comparison()
        }
    }

    fn parse_comparison(&mut self) -> Result<Expr> {
        let left = self.parse_arith()?;
        let op = match self.peek() {
            Token::EqEq => Some(CmpOp::Eq),
            Token::NotEq => Some(CmpOp::NotEq),
            Token::Lt => Some(CmpOp::Lt),
            Token::LtEq => Some(CmpOp::LtEq),
            Token::Gt => Some(CmpOp::Gt),
            Token::GtEq => Some(CmpOp::GtEq),
            _ => None,
        };
        if let Some(op) = op {
            self.bump();
            let right = self.parse_arith()?;
            Ok(Expr::Compare {
                op,
                left: Box::new(left),
                right: Box::new(right),
            })
        } else {
            Ok(left)
        }
    }

    fn parse_arith(&mut self) -> Result<Expr> {
        let mut left = self.parse_term()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinOp::Add,
                Token::Minus => BinOp::Sub,
                _ => break,
            };
            self.bump();
            let right = self.parse_term()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_term(&mut self) -> Result<Expr> {
        let mut left = self.parse_factor()?;
        loop {
            let op = match self.peek() {
                Token::Star => BinOp::Mul,
                Token::Slash => BinOp::Div,
                Token::DoubleSlash => BinOp::FloorDiv,
                Token::Percent => BinOp::Mod,
                _ => break,
            };
            self.bump();
            let right = self.parse_factor()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_factor(&mut self) -> Result<Expr> {
        if self.eat(&Token::Minus) {
            let operand = self.parse_factor()?;
            Ok(Expr::Unary {
                negate: true,
                not: false,
                operand: Box::new(operand),
            })
        } else if self.eat(&Token::Plus) {
            self.parse_factor()
        } else {
            self.parse_postfix()
        }
    }

    fn parse_postfix(&mut self) -> Result<Expr> {
        let mut expr = self.parse_atom()?;
        loop {
            match self.peek() {
                Token::LParen => {
                    self.bump();
                    let (args, kwargs) = self.parse_args()?;
                    expr = Expr::Call {
                        func: Box::new(expr),
                        args,
                        kwargs,
                    };
                }
                Token::Dot => {
                    self.bump();
                    let attr = match self.bump() {
                        Token::Name(n) => n,
                        _ => return Err(self.err("expected attribute name")),
                    };
                    expr = Expr::Attribute {
                        value: Box::new(expr),
                        attr,
                    };
                }
                Token::LBracket => {
                    self.bump();
                    let index = self.parse_expr()?;
                    self.expect(Token::RBracket, "`]`")?;
                    expr = Expr::Subscript {
                        value: Box::new(expr),
                        index: Box::new(index),
                    };
                }
                _ => return Ok(expr),
            }
        }
    }

    fn parse_args(&mut self) -> Result<(Vec<Expr>, Vec<(String, Expr)>)> {
        let mut args = Vec::new();
        let mut kwargs = Vec::new();
        if self.eat(&Token::RParen) {
            return Ok((args, kwargs));
        }
        loop {
            // keyword argument: Name '=' expr
            if let Token::Name(name) = self.peek().clone() {
                if self.tokens.get(self.pos + 1) == Some(&Token::Assign) {
                    self.bump();
                    self.bump();
                    let value = self.parse_expr()?;
                    kwargs.push((name, value));
                    if self.eat(&Token::Comma) {
                        if self.eat(&Token::RParen) {
                            break;
                        }
                        continue;
                    }
                    self.expect(Token::RParen, "`)`")?;
                    break;
                }
            }
            args.push(self.parse_expr()?);
            if self.eat(&Token::Comma) {
                if self.eat(&Token::RParen) {
                    break;
                }
                continue;
            }
            self.expect(Token::RParen, "`)`")?;
            break;
        }
        Ok((args, kwargs))
    }

    fn parse_atom(&mut self) -> Result<Expr> {
        match self.bump() {
            Token::Int(v) => Ok(Expr::Int(v)),
            Token::Float(v) => Ok(Expr::Float(v)),
            Token::Str(s) => Ok(Expr::Str(s)),
            Token::True => Ok(Expr::Bool(true)),
            Token::False => Ok(Expr::Bool(false)),
            Token::None => Ok(Expr::None),
            Token::Name(n) => Ok(Expr::Name(n)),
            Token::LParen => {
                let first = self.parse_expr()?;
                if self.eat(&Token::Comma) {
                    let mut items = vec![first];
                    if !self.eat(&Token::RParen) {
                        loop {
                            items.push(self.parse_expr()?);
                            if self.eat(&Token::Comma) {
                                if self.eat(&Token::RParen) {
                                    break;
                                }
                                continue;
                            }
                            self.expect(Token::RParen, "`)`")?;
                            break;
                        }
                    }
                    Ok(Expr::Tuple(items))
                } else {
                    self.expect(Token::RParen, "`)`")?;
                    Ok(first)
                }
            }
            Token::LBracket => {
                let mut items = Vec::new();
                if self.eat(&Token::RBracket) {
                    return Ok(Expr::List(items));
                }
                loop {
                    items.push(self.parse_expr()?);
                    if self.eat(&Token::Comma) {
                        if self.eat(&Token::RBracket) {
                            break;
                        }
                        continue;
                    }
                    self.expect(Token::RBracket, "`]`")?;
                    break;
                }
                Ok(Expr::List(items))
            }
            Token::LBrace => {
                let mut pairs = Vec::new();
                if self.eat(&Token::RBrace) {
                    return Ok(Expr::Dict(pairs));
                }
                loop {
                    let key = self.parse_expr()?;
                    self.expect(Token::Colon, "`:` in dict literal")?;
                    let value = self.parse_expr()?;
                    pairs.push((key, value));
                    if self.eat(&Token::Comma) {
                        if self.eat(&Token::RBrace) {
                            break;
                        }
                        continue;
                    }
                    self.expect(Token::RBrace, "`}`")?;
                    break;
                }
                Ok(Expr::Dict(pairs))
            }
            other => Err(AgentError::Syntax(format!(
                "unexpected token {:?}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sql_pipeline() {
        let code = r#"
sql_query = "SELECT COUNT(*) AS n FROM employees"
df = execute_sql_query(sql_query)
result = {"type": "number", "value": df["n"][0]}
"#;
        let stmts = parse(code).unwrap();
        assert_eq!(stmts.len(), 3);
        assert!(matches!(&stmts[0], Stmt::Assign { target: Target::Name(n), .. } if n == "sql_query"));
    }

    #[test]
    fn parses_function_def_and_return() {
        let code = "def execute_sql_query(sql):\n    return None\n";
        let stmts = parse(code).unwrap();
        match &stmts[0] {
            Stmt::FunctionDef { name, params, body } => {
                assert_eq!(name, "execute_sql_query");
                assert_eq!(params, &vec!["sql".to_string()]);
                assert_eq!(body.len(), 1);
            }
            other => panic!("unexpected stmt {:?}", other),
        }
    }

    #[test]
    fn parses_if_elif_else() {
        let code = "if x > 1:\n    y = 1\nelif x < 0:\n    y = 2\nelse:\n    y = 3\n";
        let stmts = parse(code).unwrap();
        match &stmts[0] {
            Stmt::If { branches, orelse } => {
                assert_eq!(branches.len(), 2);
                assert_eq!(orelse.len(), 1);
            }
            other => panic!("unexpected stmt {:?}", other),
        }
    }

    #[test]
    fn parses_kwargs_and_nesting() {
        let code = "charts.bar(df, x=\"name\", y=\"salary\")\n";
        let stmts = parse(code).unwrap();
        match &stmts[0] {
            Stmt::Expr(Expr::Call { func, args, kwargs }) => {
                assert_eq!(Expr::call_name(func).as_deref(), Some("charts.bar"));
                assert_eq!(args.len(), 1);
                assert_eq!(kwargs.len(), 2);
            }
            other => panic!("unexpected stmt {:?}", other),
        }
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse("x = = 2\n").is_err());
        assert!(parse("1 = x\n").is_err());
    }
}
