//! Tree-walking evaluator for the analysis dialect.

use crate::error::{AgentError, Result};
use crate::executor::environment::{Environment, SQL_GATEWAY_NAME};
use crate::executor::value::{any_value_to_value, dataframe_to_rows_json, Value};
use crate::script::ast::{BinOp, BoolOp, CmpOp, Expr, Stmt, Target};
use polars::prelude::*;

const MAX_CALL_DEPTH: usize = 32;

enum Flow {
    Normal,
    Return(Value),
}

pub struct Interpreter {
    pub env: Environment,
    call_depth: usize,
}

impl Interpreter {
    pub fn new(env: Environment) -> Self {
        Self { env, call_depth: 0 }
    }

    pub fn run(&mut self, program: &[Stmt]) -> Result<()> {
        for stmt in program {
            if let Flow::Return(_) = self.exec_stmt(stmt)? {
                return Err(AgentError::Runtime("`return` outside function".into()));
            }
        }
        Ok(())
    }

    /// The `result` binding left behind by the script, if any.
    pub fn result(&self) -> Option<&Value> {
        self.env.vars.get("result")
    }

    fn exec_block(&mut self, stmts: &[Stmt]) -> Result<Flow> {
        for stmt in stmts {
            if let Flow::Return(v) = self.exec_stmt(stmt)? {
                return Ok(Flow::Return(v));
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, stmt: &Stmt) -> Result<Flow> {
        match stmt {
            Stmt::Assign { target, value } => {
                let value = self.eval(value)?;
                match target {
                    Target::Name(name) => {
                        self.env.vars.insert(name.clone(), value);
                    }
                    Target::Subscript { name, index } => {
                        let index = self.eval(index)?;
                        let container = self.env.vars.get_mut(name).ok_or_else(|| {
                            AgentError::Runtime(format!("name `{}` is not defined", name))
                        })?;
                        match container {
                            Value::Dict(_) => {
                                let key = match &index {
                                    Value::Str(k) => k.clone(),
                                    other => {
                                        return Err(AgentError::Runtime(format!(
                                            "dict keys must be strings, got {}",
                                            other.type_label()
                                        )))
                                    }
                                };
                                container.set_key(&key, value)?;
                            }
                            Value::List(items) => {
                                let i = match &index {
                                    Value::Int(i) => *i,
                                    other => {
                                        return Err(AgentError::Runtime(format!(
                                            "list indices must be ints, got {}",
                                            other.type_label()
                                        )))
                                    }
                                };
                                let len = items.len() as i64;
                                let idx = if i < 0 { i + len } else { i };
                                if idx < 0 || idx >= len {
                                    return Err(AgentError::Runtime(format!(
                                        "list index {} out of range",
                                        i
                                    )));
                                }
                                items[idx as usize] = value;
                            }
                            other => {
                                return Err(AgentError::Runtime(format!(
                                    "cannot index-assign into a {}",
                                    other.type_label()
                                )))
                            }
                        }
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::Expr(e) => {
                self.eval(e)?;
                Ok(Flow::Normal)
            }
            Stmt::FunctionDef { name, params, body } => {
                self.env
                    .functions
                    .insert(name.clone(), (params.clone(), body.clone()));
                Ok(Flow::Normal)
            }
            Stmt::Return(value) => {
                let v = match value {
                    Some(e) => self.eval(e)?,
                    None => Value::None,
                };
                Ok(Flow::Return(v))
            }
            Stmt::If { branches, orelse } => {
                for (cond, body) in branches {
                    if self.eval(cond)?.truthy() {
                        return self.exec_block(body);
                    }
                }
                self.exec_block(orelse)
            }
            Stmt::For { var, iter, body } => {
                let items = self.iterable(iter)?;
                for item in items {
                    self.env.vars.insert(var.clone(), item);
                    if let Flow::Return(v) = self.exec_block(body)? {
                        return Ok(Flow::Return(v));
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::Pass => Ok(Flow::Normal),
        }
    }

    fn iterable(&mut self, expr: &Expr) -> Result<Vec<Value>> {
        match self.eval(expr)? {
            Value::List(items) => Ok(items),
            Value::Series(s) => Ok((0..s.len())
                .map(|i| any_value_to_value(&s.get(i).unwrap_or(AnyValue::Null)))
                .collect()),
            other => Err(AgentError::Runtime(format!(
                "cannot iterate over a {}",
                other.type_label()
            ))),
        }
    }

    fn eval(&mut self, expr: &Expr) -> Result<Value> {
        match expr {
            Expr::Int(v) => Ok(Value::Int(*v)),
            Expr::Float(v) => Ok(Value::Float(*v)),
            Expr::Str(s) => Ok(Value::Str(s.clone())),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::None => Ok(Value::None),
            Expr::Name(name) => self.eval_name(name),
            Expr::List(items) => Ok(Value::List(
                items.iter().map(|e| self.eval(e)).collect::<Result<_>>()?,
            )),
            Expr::Tuple(items) => Ok(Value::List(
                items.iter().map(|e| self.eval(e)).collect::<Result<_>>()?,
            )),
            Expr::Dict(pairs) => {
                let mut out = Vec::with_capacity(pairs.len());
                for (k, v) in pairs {
                    let key = match self.eval(k)? {
                        Value::Str(s) => s,
                        other => {
                            return Err(AgentError::Runtime(format!(
                                "dict keys must be strings, got {}",
                                other.type_label()
                            )))
                        }
                    };
                    out.push((key, self.eval(v)?));
                }
                Ok(Value::Dict(out))
            }
            Expr::Attribute { value, attr } => {
                if let Expr::Name(base) = value.as_ref() {
                    if Environment::is_forbidden(base) {
                        return Err(AgentError::Security(format!(
                            "restricted module `{}` is not available",
                            base
                        )));
                    }
                    if !self.env.vars.contains_key(base) && Environment::is_module(base) {
                        return Err(AgentError::Runtime(format!(
                            "`{}.{}` must be called, not referenced",
                            base, attr
                        )));
                    }
                }
                let receiver = self.eval(value)?;
                self.value_attribute(&receiver, attr)
            }
            Expr::Subscript { value, index } => {
                let container = self.eval(value)?;
                let index = self.eval(index)?;
                self.index(&container, &index)
            }
            Expr::Call { func, args, kwargs } => self.eval_call(func, args, kwargs),
            Expr::Unary { negate, not, operand } => {
                let v = self.eval(operand)?;
                if *not {
                    return Ok(Value::Bool(!v.truthy()));
                }
                if *negate {
                    return match v {
                        Value::Int(i) => Ok(Value::Int(-i)),
                        Value::Float(f) => Ok(Value::Float(-f)),
                        other => Err(AgentError::Runtime(format!(
                            "cannot negate a {}",
                            other.type_label()
                        ))),
                    };
                }
                Ok(v)
            }
            Expr::Binary { op, left, right } => {
                let l = self.eval(left)?;
                let r = self.eval(right)?;
                binary(*op, l, r)
            }
            Expr::Compare { op, left, right } => {
                let l = self.eval(left)?;
                let r = self.eval(right)?;
                compare(*op, &l, &r)
            }
            Expr::Logic { op, left, right } => {
                let l = self.eval(left)?;
                match op {
                    BoolOp::And => {
                        if !l.truthy() {
                            Ok(l)
                        } else {
                            self.eval(right)
                        }
                    }
                    BoolOp::Or => {
                        if l.truthy() {
                            Ok(l)
                        } else {
                            self.eval(right)
                        }
                    }
                }
            }
        }
    }

    fn eval_name(&mut self, name: &str) -> Result<Value> {
        if let Some(v) = self.env.vars.get(name) {
            return Ok(v.clone());
        }
        if Environment::is_forbidden(name) {
            return Err(AgentError::Security(format!(
                "restricted module `{}` is not available",
                name
            )));
        }
        Err(AgentError::Runtime(format!(
            "name `{}` is not defined",
            name
        )))
    }

    fn eval_call(
        &mut self,
        func: &Expr,
        arg_exprs: &[Expr],
        kwarg_exprs: &[(String, Expr)],
    ) -> Result<Value> {
        let mut args = Vec::with_capacity(arg_exprs.len());
        for a in arg_exprs {
            args.push(self.eval(a)?);
        }
        let mut kwargs = Vec::with_capacity(kwarg_exprs.len());
        for (k, v) in kwarg_exprs {
            kwargs.push((k.clone(), self.eval(v)?));
        }
        // string arguments are screened before reaching any wrapped function
        for v in args.iter().chain(kwargs.iter().map(|(_, v)| v)) {
            if let Value::Str(s) = v {
                Environment::guard_module_string(s)?;
            }
        }

        match func {
            Expr::Name(name) => {
                if name == SQL_GATEWAY_NAME {
                    let sql = match args.first() {
                        Some(Value::Str(s)) => s.clone(),
                        _ => {
                            return Err(AgentError::Runtime(
                                "execute_sql_query expects a single SQL string".into(),
                            ))
                        }
                    };
                    let df = (self.env.sql)(&sql)?;
                    return Ok(Value::Frame(df));
                }
                if self.env.functions.contains_key(name.as_str()) {
                    return self.call_function(name, args);
                }
                if Environment::is_builtin(name) {
                    return self.call_builtin(name, args, kwargs);
                }
                if Environment::is_forbidden(name) {
                    return Err(AgentError::Security(format!(
                        "restricted module `{}` is not available",
                        name
                    )));
                }
                Err(AgentError::Runtime(format!(
                    "function `{}` is not defined",
                    name
                )))
            }
            Expr::Attribute { value, attr } => {
                if let Expr::Name(base) = value.as_ref() {
                    if Environment::is_forbidden(base) {
                        return Err(AgentError::Security(format!(
                            "restricted module `{}` is not available",
                            base
                        )));
                    }
                    if !self.env.vars.contains_key(base) && Environment::is_module(base) {
                        return self.call_module(base, attr, args, kwargs);
                    }
                }
                let receiver = self.eval(value)?;
                self.call_method(&receiver, attr, args, kwargs)
            }
            _ => Err(AgentError::Runtime("expression is not callable".into())),
        }
    }

    fn call_function(&mut self, name: &str, args: Vec<Value>) -> Result<Value> {
        if self.call_depth >= MAX_CALL_DEPTH {
            return Err(AgentError::Runtime("maximum call depth exceeded".into()));
        }
        let (params, body) = self
            .env
            .functions
            .get(name)
            .cloned()
            .ok_or_else(|| AgentError::Runtime(format!("function `{}` is not defined", name)))?;
        if params.len() != args.len() {
            return Err(AgentError::Runtime(format!(
                "`{}` takes {} argument(s), got {}",
                name,
                params.len(),
                args.len()
            )));
        }
        // function bodies see a copy of the globals; their writes are local
        let saved = self.env.vars.clone();
        for (param, arg) in params.iter().zip(args) {
            self.env.vars.insert(param.clone(), arg);
        }
        self.call_depth += 1;
        let flow = self.exec_block(&body);
        self.call_depth -= 1;
        self.env.vars = saved;
        match flow? {
            Flow::Return(v) => Ok(v),
            Flow::Normal => Ok(Value::None),
        }
    }

    fn call_builtin(
        &mut self,
        name: &str,
        args: Vec<Value>,
        _kwargs: Vec<(String, Value)>,
    ) -> Result<Value> {
        match name {
            "len" => {
                let v = one_arg("len", &args)?;
                let n = match v {
                    Value::Str(s) => s.chars().count(),
                    Value::List(items) => items.len(),
                    Value::Dict(pairs) => pairs.len(),
                    Value::Frame(df) => df.height(),
                    Value::Series(s) => s.len(),
                    other => {
                        return Err(AgentError::Runtime(format!(
                            "object of type {} has no len()",
                            other.type_label()
                        )))
                    }
                };
                Ok(Value::Int(n as i64))
            }
            "str" => Ok(Value::Str(one_arg("str", &args)?.display())),
            "int" => match one_arg("int", &args)? {
                Value::Int(i) => Ok(Value::Int(*i)),
                Value::Float(f) => Ok(Value::Int(*f as i64)),
                Value::Bool(b) => Ok(Value::Int(*b as i64)),
                Value::Str(s) => s
                    .trim()
                    .parse::<i64>()
                    .map(Value::Int)
                    .map_err(|_| AgentError::Runtime(format!("invalid int literal `{}`", s))),
                other => Err(AgentError::Runtime(format!(
                    "cannot convert {} to int",
                    other.type_label()
                ))),
            },
            "float" => match one_arg("float", &args)? {
                Value::Int(i) => Ok(Value::Float(*i as f64)),
                Value::Float(f) => Ok(Value::Float(*f)),
                Value::Str(s) => s
                    .trim()
                    .parse::<f64>()
                    .map(Value::Float)
                    .map_err(|_| AgentError::Runtime(format!("invalid float literal `{}`", s))),
                other => Err(AgentError::Runtime(format!(
                    "cannot convert {} to float",
                    other.type_label()
                ))),
            },
            "round" => {
                let x = number_arg("round", args.first())?;
                let digits = match args.get(1) {
                    Some(Value::Int(d)) => *d,
                    None => 0,
                    Some(other) => {
                        return Err(AgentError::Runtime(format!(
                            "round() digits must be int, got {}",
                            other.type_label()
                        )))
                    }
                };
                let factor = 10f64.powi(digits as i32);
                let rounded = (x * factor).round() / factor;
                if digits <= 0 {
                    Ok(Value::Int(rounded as i64))
                } else {
                    Ok(Value::Float(rounded))
                }
            }
            "abs" => match one_arg("abs", &args)? {
                Value::Int(i) => Ok(Value::Int(i.abs())),
                Value::Float(f) => Ok(Value::Float(f.abs())),
                other => Err(AgentError::Runtime(format!(
                    "bad operand type for abs(): {}",
                    other.type_label()
                ))),
            },
            "min" | "max" | "sum" => {
                let values = if args.len() == 1 {
                    numeric_sequence(&args[0])?
                } else {
                    args.iter()
                        .map(|v| {
                            v.as_number().ok_or_else(|| {
                                AgentError::Runtime(format!(
                                    "{}() expects numbers, got {}",
                                    name,
                                    v.type_label()
                                ))
                            })
                        })
                        .collect::<Result<Vec<f64>>>()?
                };
                if values.is_empty() && name != "sum" {
                    return Err(AgentError::Runtime(format!("{}() of empty sequence", name)));
                }
                let out = match name {
                    "min" => values.iter().cloned().fold(f64::INFINITY, f64::min),
                    "max" => values.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
                    _ => values.iter().sum(),
                };
                Ok(float_or_int(out))
            }
            "range" => {
                let (start, stop) = match (args.first(), args.get(1)) {
                    (Some(Value::Int(n)), Option::None) => (0, *n),
                    (Some(Value::Int(a)), Some(Value::Int(b))) => (*a, *b),
                    _ => {
                        return Err(AgentError::Runtime(
                            "range() expects one or two int arguments".into(),
                        ))
                    }
                };
                Ok(Value::List((start..stop).map(Value::Int).collect()))
            }
            other => Err(AgentError::Runtime(format!(
                "builtin `{}` is not available",
                other
            ))),
        }
    }

    fn call_module(
        &mut self,
        module: &str,
        func: &str,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Result<Value> {
        match (module, func) {
            ("tab", "frame") => {
                let dict = match args.first() {
                    Some(Value::Dict(pairs)) => pairs.clone(),
                    _ => {
                        return Err(AgentError::Runtime(
                            "tab.frame expects a dict of column -> list".into(),
                        ))
                    }
                };
                Ok(Value::Frame(dict_to_frame(&dict)?))
            }
            ("tab", "concat") => {
                let frames = match args.first() {
                    Some(Value::List(items)) => items.clone(),
                    _ => {
                        return Err(AgentError::Runtime(
                            "tab.concat expects a list of dataframes".into(),
                        ))
                    }
                };
                let mut out: Option<DataFrame> = Option::None;
                for item in frames {
                    let df = match item {
                        Value::Frame(df) => df,
                        other => {
                            return Err(AgentError::Runtime(format!(
                                "tab.concat expects dataframes, got {}",
                                other.type_label()
                            )))
                        }
                    };
                    out = Some(match out {
                        Some(acc) => acc.vstack(&df)?,
                        Option::None => df,
                    });
                }
                out.map(Value::Frame)
                    .ok_or_else(|| AgentError::Runtime("tab.concat of empty list".into()))
            }
            ("num", "sum") | ("num", "mean") | ("num", "min") | ("num", "max") => {
                let values = numeric_sequence(
                    args.first()
                        .ok_or_else(|| AgentError::Runtime(format!("num.{} needs an argument", func)))?,
                )?;
                if values.is_empty() {
                    return Err(AgentError::Runtime(format!("num.{} of empty sequence", func)));
                }
                let out = match func {
                    "sum" => values.iter().sum(),
                    "mean" => values.iter().sum::<f64>() / values.len() as f64,
                    "min" => values.iter().cloned().fold(f64::INFINITY, f64::min),
                    _ => values.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
                };
                Ok(float_or_int(out))
            }
            ("num", "round") => self.call_builtin("round", args, kwargs),
            ("num", "abs") => self.call_builtin("abs", args, kwargs),
            ("charts", "bar") | ("charts", "line") | ("charts", "scatter") | ("charts", "hist") => {
                let mut figure = std::mem::take(&mut self.env.figure);
                figure.kind = Some(func.to_string());
                if let Some(Value::Frame(df)) = args.first() {
                    figure.data = Some(dataframe_to_rows_json(df));
                }
                for (key, value) in &kwargs {
                    if let Value::Str(s) = value {
                        match key.as_str() {
                            "x" => figure.x = Some(s.clone()),
                            "y" => figure.y = Some(s.clone()),
                            "title" => figure.title = Some(s.clone()),
                            "column" => figure.x = Some(s.clone()),
                            _ => {}
                        }
                    }
                }
                self.env.figure = figure;
                Ok(Value::None)
            }
            ("charts", "title") => {
                if let Some(Value::Str(s)) = args.first() {
                    self.env.figure.title = Some(s.clone());
                }
                Ok(Value::None)
            }
            ("charts", "save") => {
                let path = match args.first() {
                    Some(Value::Str(s)) => std::path::PathBuf::from(s),
                    _ => self.env.chart_path.clone(),
                };
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)
                        .map_err(|e| AgentError::Runtime(format!("cannot create chart dir: {}", e)))?;
                }
                let payload = serde_json::to_vec(&self.env.figure)
                    .map_err(|e| AgentError::Runtime(e.to_string()))?;
                std::fs::write(&path, payload)
                    .map_err(|e| AgentError::Runtime(format!("cannot write chart: {}", e)))?;
                Ok(Value::Str(path.to_string_lossy().to_string()))
            }
            ("charts", "show") => Ok(Value::None),
            ("dates", "today") => Ok(Value::Str(
                chrono::Local::now().format("%Y-%m-%d").to_string(),
            )),
            ("dates", "now") => Ok(Value::Str(chrono::Local::now().to_rfc3339())),
            ("b64", "encode") => match args.first() {
                Some(Value::Str(s)) => {
                    use base64::Engine as _;
                    Ok(Value::Str(
                        base64::engine::general_purpose::STANDARD.encode(s.as_bytes()),
                    ))
                }
                _ => Err(AgentError::Runtime("b64.encode expects a string".into())),
            },
            ("b64", "decode") => match args.first() {
                Some(Value::Str(s)) => {
                    use base64::Engine as _;
                    let bytes = base64::engine::general_purpose::STANDARD
                        .decode(s.as_bytes())
                        .map_err(|e| AgentError::Runtime(format!("invalid base64: {}", e)))?;
                    Ok(Value::Str(String::from_utf8_lossy(&bytes).to_string()))
                }
                _ => Err(AgentError::Runtime("b64.decode expects a string".into())),
            },
            ("json", "dumps") => {
                let v = args
                    .first()
                    .ok_or_else(|| AgentError::Runtime("json.dumps needs an argument".into()))?;
                Ok(Value::Str(v.to_wire_json()?.to_string()))
            }
            ("json", "loads") => match args.first() {
                Some(Value::Str(s)) => {
                    let parsed: serde_json::Value = serde_json::from_str(s)
                        .map_err(|e| AgentError::Runtime(format!("invalid json: {}", e)))?;
                    Value::from_wire_json(&parsed)
                }
                _ => Err(AgentError::Runtime("json.loads expects a string".into())),
            },
            (module, func) => Err(AgentError::Runtime(format!(
                "`{}.{}` is not available",
                module, func
            ))),
        }
    }

    fn call_method(
        &mut self,
        receiver: &Value,
        method: &str,
        args: Vec<Value>,
        _kwargs: Vec<(String, Value)>,
    ) -> Result<Value> {
        match (receiver, method) {
            (Value::Frame(df), "head") => {
                let n = match args.first() {
                    Some(Value::Int(n)) => *n as usize,
                    _ => 5,
                };
                Ok(Value::Frame(df.head(Some(n))))
            }
            (Value::Frame(df), "to_dict") => {
                let mut pairs = Vec::new();
                for series in df.get_columns() {
                    let items: Vec<Value> = (0..series.len())
                        .map(|i| any_value_to_value(&series.get(i).unwrap_or(AnyValue::Null)))
                        .collect();
                    pairs.push((series.name().to_string(), Value::List(items)));
                }
                Ok(Value::Dict(pairs))
            }
            (Value::Series(s), "to_list") => Ok(Value::List(
                (0..s.len())
                    .map(|i| any_value_to_value(&s.get(i).unwrap_or(AnyValue::Null)))
                    .collect(),
            )),
            (Value::Series(s), "sum") | (Value::Series(s), "mean")
            | (Value::Series(s), "min") | (Value::Series(s), "max") => {
                self.call_module("num", method, vec![Value::Series(s.clone())], vec![])
            }
            (Value::Series(s), "count") => Ok(Value::Int(
                (s.len() - s.null_count()) as i64,
            )),
            (Value::Str(s), "upper") => Ok(Value::Str(s.to_uppercase())),
            (Value::Str(s), "lower") => Ok(Value::Str(s.to_lowercase())),
            (Value::Str(s), "strip") => Ok(Value::Str(s.trim().to_string())),
            (Value::Dict(_), "get") => {
                let key = match args.first() {
                    Some(Value::Str(k)) => k.clone(),
                    _ => return Err(AgentError::Runtime("dict.get expects a string key".into())),
                };
                Ok(receiver
                    .get_key(&key)
                    .cloned()
                    .unwrap_or_else(|| args.get(1).cloned().unwrap_or(Value::None)))
            }
            (Value::Dict(pairs), "keys") => Ok(Value::List(
                pairs.iter().map(|(k, _)| Value::Str(k.clone())).collect(),
            )),
            (Value::Dict(pairs), "values") => {
                Ok(Value::List(pairs.iter().map(|(_, v)| v.clone()).collect()))
            }
            (other, method) => Err(AgentError::Runtime(format!(
                "{} has no method `{}`",
                other.type_label(),
                method
            ))),
        }
    }

    fn value_attribute(&self, receiver: &Value, attr: &str) -> Result<Value> {
        match (receiver, attr) {
            (Value::Frame(df), "columns") => Ok(Value::List(
                df.get_column_names()
                    .iter()
                    .map(|s| Value::Str(s.to_string()))
                    .collect(),
            )),
            (Value::Frame(df), "shape") => Ok(Value::List(vec![
                Value::Int(df.height() as i64),
                Value::Int(df.width() as i64),
            ])),
            (other, attr) => Err(AgentError::Runtime(format!(
                "{} has no attribute `{}`",
                other.type_label(),
                attr
            ))),
        }
    }

    fn index(&self, container: &Value, index: &Value) -> Result<Value> {
        match (container, index) {
            (Value::Frame(df), Value::Str(column)) => {
                let series = df
                    .column(column)
                    .map_err(|_| AgentError::Runtime(format!("no column `{}`", column)))?;
                Ok(Value::Series(series.clone()))
            }
            (Value::Series(s), Value::Int(i)) => {
                let len = s.len() as i64;
                let idx = if *i < 0 { i + len } else { *i };
                if idx < 0 || idx >= len {
                    return Err(AgentError::Runtime(format!("index {} out of range", i)));
                }
                Ok(any_value_to_value(
                    &s.get(idx as usize).unwrap_or(AnyValue::Null),
                ))
            }
            (Value::List(items), Value::Int(i)) => {
                let len = items.len() as i64;
                let idx = if *i < 0 { i + len } else { *i };
                items
                    .get(idx as usize)
                    .cloned()
                    .ok_or_else(|| AgentError::Runtime(format!("index {} out of range", i)))
            }
            (dict @ Value::Dict(_), Value::Str(key)) => dict
                .get_key(key)
                .cloned()
                .ok_or_else(|| AgentError::Runtime(format!("key `{}` not found", key))),
            (container, index) => Err(AgentError::Runtime(format!(
                "cannot index {} with {}",
                container.type_label(),
                index.type_label()
            ))),
        }
    }
}

fn one_arg<'a>(name: &str, args: &'a [Value]) -> Result<&'a Value> {
    args.first()
        .ok_or_else(|| AgentError::Runtime(format!("{}() needs an argument", name)))
}

fn number_arg(name: &str, arg: Option<&Value>) -> Result<f64> {
    arg.and_then(|v| v.as_number())
        .ok_or_else(|| AgentError::Runtime(format!("{}() expects a number", name)))
}

fn numeric_sequence(value: &Value) -> Result<Vec<f64>> {
    match value {
        Value::List(items) => items
            .iter()
            .map(|v| {
                v.as_number().ok_or_else(|| {
                    AgentError::Runtime(format!("expected numbers, got {}", v.type_label()))
                })
            })
            .collect(),
        Value::Series(s) => Ok((0..s.len())
            .filter_map(|i| match s.get(i) {
                Ok(av) => any_value_to_value(&av).as_number(),
                Err(_) => Option::None,
            })
            .collect()),
        Value::Int(_) | Value::Float(_) => Ok(vec![value.as_number().unwrap_or(0.0)]),
        other => Err(AgentError::Runtime(format!(
            "expected a numeric sequence, got {}",
            other.type_label()
        ))),
    }
}

fn float_or_int(x: f64) -> Value {
    if x.fract() == 0.0 && x.abs() < i64::MAX as f64 {
        Value::Int(x as i64)
    } else {
        Value::Float(x)
    }
}

fn dict_to_frame(pairs: &[(String, Value)]) -> Result<DataFrame> {
    let mut series = Vec::with_capacity(pairs.len());
    for (name, value) in pairs {
        let items = match value {
            Value::List(items) => items.clone(),
            other => {
                return Err(AgentError::Runtime(format!(
                    "tab.frame column `{}` must be a list, got {}",
                    name,
                    other.type_label()
                )))
            }
        };
        series.push(values_to_series(name, &items)?);
    }
    Ok(DataFrame::new(series)?)
}

fn values_to_series(name: &str, items: &[Value]) -> Result<Series> {
    let all_int = items
        .iter()
        .all(|v| matches!(v, Value::Int(_) | Value::None));
    let all_numeric = items
        .iter()
        .all(|v| matches!(v, Value::Int(_) | Value::Float(_) | Value::None));
    if all_int {
        let out: Vec<Option<i64>> = items
            .iter()
            .map(|v| match v {
                Value::Int(i) => Some(*i),
                _ => Option::None,
            })
            .collect();
        Ok(Series::new(name, out))
    } else if all_numeric {
        let out: Vec<Option<f64>> = items.iter().map(|v| v.as_number()).collect();
        Ok(Series::new(name, out))
    } else {
        let out: Vec<Option<String>> = items
            .iter()
            .map(|v| match v {
                Value::None => Option::None,
                other => Some(other.display()),
            })
            .collect();
        Ok(Series::new(name, out))
    }
}

fn binary(op: BinOp, l: Value, r: Value) -> Result<Value> {
    match (&l, &r) {
        (Value::Str(a), Value::Str(b)) if op == BinOp::Add => {
            return Ok(Value::Str(format!("{}{}", a, b)))
        }
        (Value::List(a), Value::List(b)) if op == BinOp::Add => {
            let mut out = a.clone();
            out.extend(b.clone());
            return Ok(Value::List(out));
        }
        _ => {}
    }
    let (x, y) = match (l.as_number(), r.as_number()) {
        (Some(x), Some(y)) => (x, y),
        _ => {
            return Err(AgentError::Runtime(format!(
                "unsupported operand types: {} and {}",
                l.type_label(),
                r.type_label()
            )))
        }
    };
    let both_int = matches!(l, Value::Int(_)) && matches!(r, Value::Int(_));
    match op {
        BinOp::Add | BinOp::Sub | BinOp::Mul => {
            let out = match op {
                BinOp::Add => x + y,
                BinOp::Sub => x - y,
                _ => x * y,
            };
            if both_int {
                Ok(Value::Int(out as i64))
            } else {
                Ok(Value::Float(out))
            }
        }
        BinOp::Div => {
            if y == 0.0 {
                Err(AgentError::Runtime("division by zero".into()))
            } else {
                Ok(Value::Float(x / y))
            }
        }
        BinOp::FloorDiv => {
            if y == 0.0 {
                Err(AgentError::Runtime("division by zero".into()))
            } else {
                Ok(Value::Int((x / y).floor() as i64))
            }
        }
        BinOp::Mod => {
            if y == 0.0 {
                Err(AgentError::Runtime("modulo by zero".into()))
            } else if both_int {
                Ok(Value::Int((x as i64).rem_euclid(y as i64)))
            } else {
                Ok(Value::Float(x % y))
            }
        }
    }
}

fn compare(op: CmpOp, l: &Value, r: &Value) -> Result<Value> {
    let out = match op {
        CmpOp::Eq => l == r,
        CmpOp::NotEq => l != r,
        _ => {
            let ordering = match (l, r) {
                (Value::Str(a), Value::Str(b)) => a.partial_cmp(b),
                _ => match (l.as_number(), r.as_number()) {
                    (Some(x), Some(y)) => x.partial_cmp(&y),
                    _ => Option::None,
                },
            };
            let ordering = ordering.ok_or_else(|| {
                AgentError::Runtime(format!(
                    "cannot order {} and {}",
                    l.type_label(),
                    r.type_label()
                ))
            })?;
            match op {
                CmpOp::Lt => ordering.is_lt(),
                CmpOp::LtEq => ordering.is_le(),
                CmpOp::Gt => ordering.is_gt(),
                CmpOp::GtEq => ordering.is_ge(),
                _ => unreachable!(),
            }
        }
    };
    Ok(Value::Bool(out))
}
