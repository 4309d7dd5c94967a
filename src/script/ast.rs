//! Syntax tree for the analysis dialect.
//!
//! Generated scripts are parsed into this tree before anything else touches
//! them: the validator walks it, the cleaner rewrites it, the interpreter
//! evaluates it. String-level passes over generated code are deliberately
//! avoided.

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Assign { target: Target, value: Expr },
    Expr(Expr),
    FunctionDef { name: String, params: Vec<String>, body: Vec<Stmt> },
    Return(Option<Expr>),
    If { branches: Vec<(Expr, Vec<Stmt>)>, orelse: Vec<Stmt> },
    For { var: String, iter: Expr, body: Vec<Stmt> },
    Pass,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Name(String),
    Subscript { name: String, index: Expr },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolOp {
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    None,
    Name(String),
    List(Vec<Expr>),
    Tuple(Vec<Expr>),
    Dict(Vec<(Expr, Expr)>),
    Attribute { value: Box<Expr>, attr: String },
    Subscript { value: Box<Expr>, index: Box<Expr> },
    Call { func: Box<Expr>, args: Vec<Expr>, kwargs: Vec<(String, Expr)> },
    Unary { negate: bool, not: bool, operand: Box<Expr> },
    Binary { op: BinOp, left: Box<Expr>, right: Box<Expr> },
    Compare { op: CmpOp, left: Box<Expr>, right: Box<Expr> },
    Logic { op: BoolOp, left: Box<Expr>, right: Box<Expr> },
}

impl Expr {
    /// Dotted call name the validator records: `f` for `f(...)`,
    /// `obj.method` for `obj.method(...)`.
    pub fn call_name(func: &Expr) -> Option<String> {
        match func {
            Expr::Name(name) => Some(name.clone()),
            Expr::Attribute { value, attr } => match value.as_ref() {
                Expr::Name(base) => Some(format!("{}.{}", base, attr)),
                _ => None,
            },
            _ => None,
        }
    }
}

/// Visit every expression in a statement, depth first.
pub fn visit_exprs<'a>(stmt: &'a Stmt, f: &mut dyn FnMut(&'a Expr)) {
    match stmt {
        Stmt::Assign { target, value } => {
            if let Target::Subscript { index, .. } = target {
                visit_expr(index, f);
            }
            visit_expr(value, f);
        }
        Stmt::Expr(e) => visit_expr(e, f),
        Stmt::FunctionDef { body, .. } => {
            for s in body {
                visit_exprs(s, f);
            }
        }
        Stmt::Return(Some(e)) => visit_expr(e, f),
        Stmt::Return(None) | Stmt::Pass => {}
        Stmt::If { branches, orelse } => {
            for (cond, body) in branches {
                visit_expr(cond, f);
                for s in body {
                    visit_exprs(s, f);
                }
            }
            for s in orelse {
                visit_exprs(s, f);
            }
        }
        Stmt::For { iter, body, .. } => {
            visit_expr(iter, f);
            for s in body {
                visit_exprs(s, f);
            }
        }
    }
}

pub fn visit_expr<'a>(expr: &'a Expr, f: &mut dyn FnMut(&'a Expr)) {
    f(expr);
    match expr {
        Expr::List(items) | Expr::Tuple(items) => {
            for item in items {
                visit_expr(item, f);
            }
        }
        Expr::Dict(pairs) => {
            for (k, v) in pairs {
                visit_expr(k, f);
                visit_expr(v, f);
            }
        }
        Expr::Attribute { value, .. } => visit_expr(value, f),
        Expr::Subscript { value, index } => {
            visit_expr(value, f);
            visit_expr(index, f);
        }
        Expr::Call { func, args, kwargs } => {
            visit_expr(func, f);
            for a in args {
                visit_expr(a, f);
            }
            for (_, v) in kwargs {
                visit_expr(v, f);
            }
        }
        Expr::Unary { operand, .. } => visit_expr(operand, f),
        Expr::Binary { left, right, .. }
        | Expr::Compare { left, right, .. }
        | Expr::Logic { left, right, .. } => {
            visit_expr(left, f);
            visit_expr(right, f);
        }
        _ => {}
    }
}

/// Visit every string literal in a statement mutably. Used by the cleaner
/// for chart-path canonicalization.
pub fn visit_strings_mut(stmt: &mut Stmt, f: &mut dyn FnMut(&mut String)) {
    match stmt {
        Stmt::Assign { target, value } => {
            if let Target::Subscript { index, .. } = target {
                visit_expr_strings_mut(index, f);
            }
            visit_expr_strings_mut(value, f);
        }
        Stmt::Expr(e) => visit_expr_strings_mut(e, f),
        Stmt::FunctionDef { body, .. } => {
            for s in body {
                visit_strings_mut(s, f);
            }
        }
        Stmt::Return(Some(e)) => visit_expr_strings_mut(e, f),
        Stmt::Return(None) | Stmt::Pass => {}
        Stmt::If { branches, orelse } => {
            for (cond, body) in branches {
                visit_expr_strings_mut(cond, f);
                for s in body {
                    visit_strings_mut(s, f);
                }
            }
            for s in orelse {
                visit_strings_mut(s, f);
            }
        }
        Stmt::For { iter, body, .. } => {
            visit_expr_strings_mut(iter, f);
            for s in body {
                visit_strings_mut(s, f);
            }
        }
    }
}

fn visit_expr_strings_mut(expr: &mut Expr, f: &mut dyn FnMut(&mut String)) {
    match expr {
        Expr::Str(s) => f(s),
        Expr::List(items) | Expr::Tuple(items) => {
            for item in items {
                visit_expr_strings_mut(item, f);
            }
        }
        Expr::Dict(pairs) => {
            for (k, v) in pairs {
                visit_expr_strings_mut(k, f);
                visit_expr_strings_mut(v, f);
            }
        }
        Expr::Attribute { value, .. } => visit_expr_strings_mut(value, f),
        Expr::Subscript { value, index } => {
            visit_expr_strings_mut(value, f);
            visit_expr_strings_mut(index, f);
        }
        Expr::Call { func, args, kwargs } => {
            visit_expr_strings_mut(func, f);
            for a in args {
                visit_expr_strings_mut(a, f);
            }
            for (_, v) in kwargs {
                visit_expr_strings_mut(v, f);
            }
        }
        Expr::Unary { operand, .. } => visit_expr_strings_mut(operand, f),
        Expr::Binary { left, right, .. }
        | Expr::Compare { left, right, .. }
        | Expr::Logic { left, right, .. } => {
            visit_expr_strings_mut(left, f);
            visit_expr_strings_mut(right, f);
        }
        _ => {}
    }
}

/// Collect all dotted call names in a program, at any nesting depth.
pub fn collect_call_names(stmts: &[Stmt]) -> Vec<String> {
    let mut names = Vec::new();
    for stmt in stmts {
        visit_exprs(stmt, &mut |expr| {
            if let Expr::Call { func, .. } = expr {
                if let Some(name) = Expr::call_name(func) {
                    names.push(name);
                }
            }
        });
    }
    names
}
