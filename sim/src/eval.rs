//! Expression evaluator.
//!
//! A tree walk over the resolved [`Expr`] form. Evaluation only reads the
//! store; the random built-ins draw from the run's seeded generator, which
//! keeps every run with the same seed identical.

use rand::Rng;
use rand_chacha::ChaCha8Rng;

use crate::components::EntityId;
use crate::error::{Result, SimError};
use crate::program::{BinaryOp, Builtin, Callee, Expr, Function, Program, UnaryOp};
use crate::store::Store;
use crate::value::Value;

/// Seeded generator behind `random` / `random_range`.
pub type SimRng = ChaCha8Rng;

/// Maximum nesting of function calls.
pub const MAX_CALL_DEPTH: usize = 64;

/// Rule-local variable bindings. Later bindings shadow earlier ones.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    vars: Vec<(String, Value)>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, name: impl Into<String>, value: Value) {
        self.vars.push((name.into(), value));
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars
            .iter()
            .rev()
            .find(|(var, _)| var == name)
            .map(|(_, value)| value)
    }

    /// Current depth, for [`Scope::truncate`].
    pub fn mark(&self) -> usize {
        self.vars.len()
    }

    /// Drop bindings made after `mark`.
    pub fn truncate(&mut self, mark: usize) {
        self.vars.truncate(mark);
    }
}

/// Interpret an entity-reference value. Integral numbers are accepted as ids
/// so hosts may pass entities through plain JSON event fields.
pub fn entity_ref(value: &Value, context: &str) -> Result<EntityId> {
    match value {
        Value::Entity(id) => Ok(*id),
        Value::Null => Err(SimError::NullEntityReference {
            context: context.to_string(),
        }),
        Value::Number(n) if *n >= 0.0 && n.fract() == 0.0 => Ok(EntityId(*n as u64)),
        other => Err(SimError::mismatch(context, "entity", other.type_name())),
    }
}

pub struct Evaluator<'a> {
    program: &'a Program,
    store: &'a Store,
    rng: &'a mut SimRng,
    now: f64,
}

impl<'a> Evaluator<'a> {
    pub fn new(program: &'a Program, store: &'a Store, rng: &'a mut SimRng, now: f64) -> Self {
        Self {
            program,
            store,
            rng,
            now,
        }
    }

    /// Evaluate an expression in a rule scope.
    pub fn eval(&mut self, expr: &Expr, scope: &Scope) -> Result<Value> {
        self.eval_in(expr, scope, &[], 0)
    }

    /// Evaluate a boolean expression.
    pub fn condition(&mut self, expr: &Expr, scope: &Scope) -> Result<bool> {
        let value = self.eval(expr, scope)?;
        value
            .as_bool()
            .ok_or_else(|| SimError::mismatch("condition", "boolean", value.type_name()))
    }

    /// Call a module or choice function with already-evaluated arguments.
    pub fn call(&mut self, function: &Function, args: Vec<Value>) -> Result<Value> {
        self.call_at(function, args, 0)
    }

    fn eval_in(&mut self, expr: &Expr, scope: &Scope, params: &[Value], depth: usize) -> Result<Value> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Var(name) => self.lookup(name, scope),
            Expr::Param(index) => params
                .get(*index)
                .cloned()
                .ok_or_else(|| SimError::UnknownVariable(format!("parameter {index}"))),
            Expr::Field {
                entity,
                component,
                field,
            } => {
                let def = self.store.schema().component(*component);
                let context = format!("{}.{}", def.name, def.fields[*field].name);
                let target = self.eval_in(entity, scope, params, depth)?;
                let id = entity_ref(&target, &context)?;
                let set = self
                    .store
                    .component_set(id)
                    .ok_or_else(|| SimError::NullEntityReference {
                        context: format!("{context} of despawned entity {id}"),
                    })?;
                let instance = set.get(*component).ok_or_else(|| SimError::InvalidComponent {
                    component: def.name.clone(),
                    message: format!("entity {id} has no such component"),
                })?;
                Ok(instance.fields[*field].clone())
            }
            Expr::Binary { op, left, right } => match op {
                BinaryOp::And | BinaryOp::Or => {
                    let lhs = self.eval_in(left, scope, params, depth)?;
                    let lhs = expect_bool(&lhs, op_name(*op))?;
                    if (*op == BinaryOp::And && !lhs) || (*op == BinaryOp::Or && lhs) {
                        return Ok(Value::Bool(lhs));
                    }
                    let rhs = self.eval_in(right, scope, params, depth)?;
                    Ok(Value::Bool(expect_bool(&rhs, op_name(*op))?))
                }
                _ => {
                    let lhs = self.eval_in(left, scope, params, depth)?;
                    let rhs = self.eval_in(right, scope, params, depth)?;
                    binary(*op, lhs, rhs)
                }
            },
            Expr::Unary { op, expr } => {
                let value = self.eval_in(expr, scope, params, depth)?;
                match (op, &value) {
                    (UnaryOp::Negate, Value::Number(n)) => Ok(Value::Number(-n)),
                    (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
                    (UnaryOp::Negate, other) => {
                        Err(SimError::mismatch("negate", "number", other.type_name()))
                    }
                    (UnaryOp::Not, other) => {
                        Err(SimError::mismatch("not", "boolean", other.type_name()))
                    }
                }
            }
            Expr::If {
                condition,
                then,
                otherwise,
            } => {
                let test = self.eval_in(condition, scope, params, depth)?;
                if expect_bool(&test, "if")? {
                    self.eval_in(then, scope, params, depth)
                } else {
                    self.eval_in(otherwise, scope, params, depth)
                }
            }
            Expr::Call { callee, args } => {
                let values = args
                    .iter()
                    .map(|arg| self.eval_in(arg, scope, params, depth))
                    .collect::<Result<Vec<_>>>()?;
                match callee {
                    Callee::User(index) => {
                        let function = self.program.function(*index).clone();
                        self.call_at(&function, values, depth + 1)
                    }
                    Callee::Builtin(builtin) => self.builtin(*builtin, values, depth),
                }
            }
        }
    }

    fn lookup(&self, name: &str, scope: &Scope) -> Result<Value> {
        if let Some(value) = scope.get(name) {
            return Ok(value.clone());
        }
        if let Some(entity) = name.strip_prefix('@') {
            return self
                .store
                .entity_by_name(entity)
                .map(Value::Entity)
                .ok_or_else(|| SimError::UnknownVariable(name.to_string()));
        }
        if let Some(value) = self.program.constant(name) {
            return Ok(value.clone());
        }
        self.store
            .entity_by_name(name)
            .map(Value::Entity)
            .ok_or_else(|| SimError::UnknownVariable(name.to_string()))
    }

    fn call_at(&mut self, function: &Function, args: Vec<Value>, depth: usize) -> Result<Value> {
        if depth > MAX_CALL_DEPTH {
            return Err(SimError::RecursionLimit(MAX_CALL_DEPTH));
        }
        if args.len() != function.params.len() {
            return Err(SimError::InvalidArgument {
                function: function.name.clone(),
                message: format!("expected {} arguments, got {}", function.params.len(), args.len()),
            });
        }
        for ((param, ty), arg) in function.params.iter().zip(&args) {
            if !arg.conforms_to(ty) {
                return Err(SimError::mismatch(
                    format!("{} parameter {param}", function.name),
                    ty.to_string(),
                    arg.type_name(),
                ));
            }
        }
        let result = self.eval_in(&function.body, &Scope::new(), &args, depth)?;
        if !result.conforms_to(&function.return_type) {
            return Err(SimError::mismatch(
                format!("{} return value", function.name),
                function.return_type.to_string(),
                result.type_name(),
            ));
        }
        Ok(result)
    }

    fn builtin(&mut self, builtin: Builtin, args: Vec<Value>, depth: usize) -> Result<Value> {
        let name = builtin.name();
        let number = |index: usize| -> Result<f64> {
            args[index]
                .as_number()
                .ok_or_else(|| SimError::mismatch(name, "number", args[index].type_name()))
        };

        let value = match builtin {
            Builtin::Min | Builtin::Max => {
                let items: &[Value] = match args.as_slice() {
                    [Value::List(items)] => items,
                    all => all,
                };
                let mut best: Option<f64> = None;
                for item in items {
                    let n = item
                        .as_number()
                        .ok_or_else(|| SimError::mismatch(name, "number", item.type_name()))?;
                    best = Some(match best {
                        None => n,
                        Some(b) if builtin == Builtin::Min => b.min(n),
                        Some(b) => b.max(n),
                    });
                }
                Value::Number(best.ok_or_else(|| invalid(name, "no values"))?)
            }
            Builtin::Abs => Value::Number(number(0)?.abs()),
            Builtin::Floor => Value::Number(number(0)?.floor()),
            Builtin::Ceil => Value::Number(number(0)?.ceil()),
            // Halves round toward positive infinity.
            Builtin::Round => Value::Number((number(0)? + 0.5).floor()),
            Builtin::Sqrt => {
                let n = number(0)?;
                if n < 0.0 {
                    return Err(invalid(name, format!("negative operand {n}")));
                }
                Value::Number(n.sqrt())
            }
            Builtin::Pow => Value::Number(number(0)?.powf(number(1)?)),
            Builtin::Clamp => {
                let (x, lo, hi) = (number(0)?, number(1)?, number(2)?);
                if lo > hi {
                    return Err(invalid(name, format!("empty range {lo}..{hi}")));
                }
                Value::Number(x.clamp(lo, hi))
            }
            Builtin::Len => match &args[0] {
                Value::List(items) => Value::Number(items.len() as f64),
                Value::Map(entries) => Value::Number(entries.len() as f64),
                Value::String(s) => Value::Number(s.chars().count() as f64),
                other => return Err(SimError::mismatch(name, "list", other.type_name())),
            },
            Builtin::Get => match (&args[0], &args[1]) {
                (Value::List(items), Value::Number(n)) if *n >= 0.0 && n.fract() == 0.0 => {
                    items.get(*n as usize).cloned().unwrap_or_default()
                }
                (Value::List(_), other) => {
                    return Err(SimError::mismatch(name, "list index", other.type_name()))
                }
                (Value::Map(entries), Value::String(key)) => {
                    entries.get(key).cloned().unwrap_or_default()
                }
                (Value::Map(_), other) => {
                    return Err(SimError::mismatch(name, "string key", other.type_name()))
                }
                (other, _) => return Err(SimError::mismatch(name, "list or map", other.type_name())),
            },
            Builtin::List => Value::List(args),
            Builtin::Contains => match (&args[0], &args[1]) {
                (Value::List(items), needle) => Value::Bool(items.contains(needle)),
                (Value::Map(entries), Value::String(key)) => Value::Bool(entries.contains_key(key)),
                (Value::String(hay), Value::String(needle)) => Value::Bool(hay.contains(needle.as_str())),
                (other, _) => return Err(SimError::mismatch(name, "list", other.type_name())),
            },
            Builtin::HasComponent => {
                let component = self.component_arg(name, &args[1])?;
                let has = match &args[0] {
                    Value::Null => false,
                    value => {
                        let id = entity_ref(value, name)?;
                        self.store.instance(id, component).is_some()
                    }
                };
                Value::Bool(has)
            }
            Builtin::EntitiesWith => {
                let components = args
                    .iter()
                    .map(|arg| self.component_arg(name, arg))
                    .collect::<Result<Vec<_>>>()?;
                Value::List(
                    self.store
                        .query(&components)
                        .into_iter()
                        .map(Value::Entity)
                        .collect(),
                )
            }
            Builtin::Random => Value::Number(self.rng.gen::<f64>()),
            Builtin::RandomRange => {
                let (lo, hi) = (number(0)?, number(1)?);
                if lo > hi || !lo.is_finite() || !hi.is_finite() {
                    return Err(invalid(name, format!("empty range {lo}..{hi}")));
                }
                if lo == hi {
                    Value::Number(lo)
                } else {
                    Value::Number(self.rng.gen_range(lo..hi))
                }
            }
            Builtin::Choose => {
                let entity = entity_ref(&args[0], name)?;
                let choice = args[1]
                    .as_str()
                    .ok_or_else(|| SimError::mismatch(name, "string", args[1].type_name()))?
                    .to_string();
                let function = self.store.choice_function(entity, &choice).ok_or(
                    SimError::MissingChoiceFunction {
                        entity,
                        name: choice,
                    },
                )?;
                let rest = args[2..].to_vec();
                return self.call_at(&function, rest, depth + 1);
            }
            Builtin::Now => Value::Number(self.now),
        };
        Ok(value)
    }

    fn component_arg(&self, function: &str, value: &Value) -> Result<crate::components::ComponentId> {
        let name = value
            .as_str()
            .ok_or_else(|| SimError::mismatch(function, "component name", value.type_name()))?;
        self.store
            .schema()
            .component_id(name)
            .ok_or_else(|| SimError::InvalidComponent {
                component: name.to_string(),
                message: "unknown component".to_string(),
            })
    }
}

fn invalid(function: &str, message: impl Into<String>) -> SimError {
    SimError::InvalidArgument {
        function: function.to_string(),
        message: message.into(),
    }
}

fn expect_bool(value: &Value, context: &str) -> Result<bool> {
    value
        .as_bool()
        .ok_or_else(|| SimError::mismatch(context, "boolean", value.type_name()))
}

fn op_name(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "add",
        BinaryOp::Subtract => "subtract",
        BinaryOp::Multiply => "multiply",
        BinaryOp::Divide => "divide",
        BinaryOp::Modulo => "modulo",
        BinaryOp::Eq => "eq",
        BinaryOp::Neq => "neq",
        BinaryOp::Lt => "lt",
        BinaryOp::Lte => "lte",
        BinaryOp::Gt => "gt",
        BinaryOp::Gte => "gte",
        BinaryOp::And => "and",
        BinaryOp::Or => "or",
    }
}

fn binary(op: BinaryOp, lhs: Value, rhs: Value) -> Result<Value> {
    let name = op_name(op);
    match op {
        BinaryOp::Eq => return Ok(Value::Bool(lhs == rhs)),
        BinaryOp::Neq => return Ok(Value::Bool(lhs != rhs)),
        _ => {}
    }
    match (&lhs, &rhs) {
        (Value::Number(a), Value::Number(b)) => {
            let (a, b) = (*a, *b);
            Ok(match op {
                BinaryOp::Add => Value::Number(a + b),
                BinaryOp::Subtract => Value::Number(a - b),
                BinaryOp::Multiply => Value::Number(a * b),
                BinaryOp::Divide | BinaryOp::Modulo if b == 0.0 => {
                    return Err(SimError::DivisionByZero)
                }
                BinaryOp::Divide => Value::Number(a / b),
                BinaryOp::Modulo => Value::Number(a % b),
                BinaryOp::Lt => Value::Bool(a < b),
                BinaryOp::Lte => Value::Bool(a <= b),
                BinaryOp::Gt => Value::Bool(a > b),
                BinaryOp::Gte => Value::Bool(a >= b),
                BinaryOp::Eq | BinaryOp::Neq | BinaryOp::And | BinaryOp::Or => {
                    unreachable!("handled before numeric dispatch")
                }
            })
        }
        (Value::String(a), Value::String(b)) => match op {
            BinaryOp::Add => Ok(Value::String(format!("{a}{b}"))),
            BinaryOp::Lt => Ok(Value::Bool(a < b)),
            BinaryOp::Lte => Ok(Value::Bool(a <= b)),
            BinaryOp::Gt => Ok(Value::Bool(a > b)),
            BinaryOp::Gte => Ok(Value::Bool(a >= b)),
            _ => Err(SimError::mismatch(name, "number", "string")),
        },
        (Value::Number(_), other) | (other, _) => {
            Err(SimError::mismatch(name, "number", other.type_name()))
        }
    }
}
