//! Canonical source printer. The cleaner emits its rewritten tree through
//! this printer; printing then re-parsing yields the same tree, which is
//! what makes cleaning idempotent.

use crate::script::ast::{BinOp, BoolOp, CmpOp, Expr, Stmt, Target};

const INDENT: &str = "    ";

pub fn to_source(stmts: &[Stmt]) -> String {
    let mut out = String::new();
    for stmt in stmts {
        print_stmt(stmt, 0, &mut out);
    }
    out
}

fn print_stmt(stmt: &Stmt, depth: usize, out: &mut String) {
    let pad = INDENT.repeat(depth);
    match stmt {
        Stmt::Assign { target, value } => {
            out.push_str(&pad);
            match target {
                Target::Name(name) => out.push_str(name),
                Target::Subscript { name, index } => {
                    out.push_str(name);
                    out.push('[');
                    out.push_str(&print_expr(index, 0));
                    out.push(']');
                }
            }
            out.push_str(" = ");
            out.push_str(&print_expr(value, 0));
            out.push('\n');
        }
        Stmt::Expr(e) => {
            out.push_str(&pad);
            out.push_str(&print_expr(e, 0));
            out.push('\n');
        }
        Stmt::FunctionDef { name, params, body } => {
            out.push_str(&pad);
            out.push_str("def ");
            out.push_str(name);
            out.push('(');
            out.push_str(&params.join(", "));
            out.push_str("):\n");
            for s in body {
                print_stmt(s, depth + 1, out);
            }
        }
        Stmt::Return(value) => {
            out.push_str(&pad);
            out.push_str("return");
            if let Some(v) = value {
                out.push(' ');
                out.push_str(&print_expr(v, 0));
            }
            out.push('\n');
        }
        Stmt::If { branches, orelse } => {
            for (i, (cond, body)) in branches.iter().enumerate() {
                out.push_str(&pad);
                out.push_str(if i == 0 { "if " } else { "elif " });
                out.push_str(&print_expr(cond, 0));
                out.push_str(":\n");
                for s in body {
                    print_stmt(s, depth + 1, out);
                }
            }
            if !orelse.is_empty() {
                out.push_str(&pad);
                out.push_str("else:\n");
                for s in orelse {
                    print_stmt(s, depth + 1, out);
                }
            }
        }
        Stmt::For { var, iter, body } => {
            out.push_str(&pad);
            out.push_str("for ");
            out.push_str(var);
            out.push_str(" in ");
            out.push_str(&print_expr(iter, 0));
            out.push_str(":\n");
            for s in body {
                print_stmt(s, depth + 1, out);
            }
        }
        Stmt::Pass => {
            out.push_str(&pad);
            out.push_str("pass\n");
        }
    }
}

// precedence levels, higher binds tighter
const PREC_OR: u8 = 1;
const PREC_AND: u8 = 2;
const PREC_NOT: u8 = 3;
const PREC_CMP: u8 = 4;
const PREC_ADD: u8 = 5;
const PREC_MUL: u8 = 6;
const PREC_UNARY: u8 = 7;

fn expr_prec(expr: &Expr) -> u8 {
    match expr {
        Expr::Logic { op: BoolOp::Or, .. } => PREC_OR,
        Expr::Logic { op: BoolOp::And, .. } => PREC_AND,
        Expr::Unary { not: true, .. } => PREC_NOT,
        Expr::Compare { .. } => PREC_CMP,
        Expr::Binary { op, .. } => match op {
            BinOp::Add | BinOp::Sub => PREC_ADD,
            _ => PREC_MUL,
        },
        Expr::Unary { .. } => PREC_UNARY,
        _ => u8::MAX,
    }
}

fn print_expr(expr: &Expr, parent_prec: u8) -> String {
    let prec = expr_prec(expr);
    let rendered = match expr {
        Expr::Int(v) => v.to_string(),
        Expr::Float(v) => format!("{:?}", v),
        Expr::Str(s) => quote(s),
        Expr::Bool(true) => "True".to_string(),
        Expr::Bool(false) => "False".to_string(),
        Expr::None => "None".to_string(),
        Expr::Name(n) => n.clone(),
        Expr::List(items) => format!(
            "[{}]",
            items
                .iter()
                .map(|e| print_expr(e, 0))
                .collect::<Vec<_>>()
                .join(", ")
        ),
        Expr::Tuple(items) => {
            let inner = items
                .iter()
                .map(|e| print_expr(e, 0))
                .collect::<Vec<_>>()
                .join(", ");
            if items.len() == 1 {
                format!("({},)", inner)
            } else {
                format!("({})", inner)
            }
        }
        Expr::Dict(pairs) => format!(
            "{{{}}}",
            pairs
                .iter()
                .map(|(k, v)| format!("{}: {}", print_expr(k, 0), print_expr(v, 0)))
                .collect::<Vec<_>>()
                .join(", ")
        ),
        Expr::Attribute { value, attr } => {
            format!("{}.{}", print_expr(value, u8::MAX), attr)
        }
        Expr::Subscript { value, index } => {
            format!("{}[{}]", print_expr(value, u8::MAX), print_expr(index, 0))
        }
        Expr::Call { func, args, kwargs } => {
            let mut parts: Vec<String> = args.iter().map(|a| print_expr(a, 0)).collect();
            parts.extend(
                kwargs
                    .iter()
                    .map(|(k, v)| format!("{}={}", k, print_expr(v, 0))),
            );
            format!("{}({})", print_expr(func, u8::MAX), parts.join(", "))
        }
        Expr::Unary { negate, not, operand } => {
            let inner = print_expr(operand, prec);
            if *not {
                format!("not {}", inner)
            } else if *negate {
                format!("-{}", inner)
            } else {
                inner
            }
        }
        Expr::Binary { op, left, right } => {
            let symbol = match op {
                BinOp::Add => "+",
                BinOp::Sub => "-",
                BinOp::Mul => "*",
                BinOp::Div => "/",
                BinOp::FloorDiv => "//",
                BinOp::Mod => "%",
            };
            format!(
                "{} {} {}",
                print_expr(left, prec),
                symbol,
                print_expr(right, prec + 1)
            )
        }
        Expr::Compare { op, left, right } => {
            let symbol = match op {
                CmpOp::Eq => "==",
                CmpOp::NotEq => "!=",
                CmpOp::Lt => "<",
                CmpOp::LtEq => "<=",
                CmpOp::Gt => ">",
                CmpOp::GtEq => ">=",
            };
            format!(
                "{} {} {}",
                print_expr(left, prec + 1),
                symbol,
                print_expr(right, prec + 1)
            )
        }
        Expr::Logic { op, left, right } => {
            let symbol = match op {
                BoolOp::And => "and",
                BoolOp::Or => "or",
            };
            format!(
                "{} {} {}",
                print_expr(left, prec),
                symbol,
                print_expr(right, prec + 1)
            )
        }
    };
    if prec < parent_prec {
        format!("({})", rendered)
    } else {
        rendered
    }
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::parser::parse;

    fn round_trip(code: &str) {
        let first = parse(code).unwrap();
        let printed = to_source(&first);
        let second = parse(&printed).unwrap();
        assert_eq!(first, second, "print→parse changed the tree for:\n{}", code);
        // printing is a fixpoint
        assert_eq!(printed, to_source(&second));
    }

    #[test]
    fn round_trips_simple_pipeline() {
        round_trip(
            "sql_query = \"SELECT * FROM t\"\ndf = execute_sql_query(sql_query)\nresult = {\"type\": \"dataframe\", \"value\": df}\n",
        );
    }

    #[test]
    fn round_trips_control_flow() {
        round_trip(
            "total = 0\nfor x in range(3):\n    if x > 1:\n        total = total + x\n    else:\n        pass\n",
        );
    }

    #[test]
    fn round_trips_operator_nesting() {
        round_trip("y = (1 + 2) * 3 - 4 / (5 - 2)\n");
        round_trip("z = not (a and b) or c == 1\n");
        round_trip("w = -(1 + x)\n");
    }

    #[test]
    fn escapes_strings() {
        round_trip("s = \"line\\none \\\"quoted\\\"\"\n");
    }
}
