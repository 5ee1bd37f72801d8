//! Load-time validation and resolution of an IR module.
//!
//! Everything name-based in the IR (components, fields, functions, operators,
//! trigger event types) is resolved here into indices and enums. A module
//! that references anything undeclared is rejected with `MalformedIr` before
//! a single step runs, so the evaluator never has to look a name up in the
//! schema.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::info;

use crate::components::{ComponentId, EntityId};
use crate::error::{Result, SimError};
use crate::ir::{
    IrAction, IrComponentInit, IrEntityRef, IrExpression, IrInitialState, IrModule, IrParam,
    IrRule, IrTracker,
};
use crate::schema::Schema;
use crate::store::ModifyOp;
use crate::timeline::{is_internal, TICK_EVENT};
use crate::value::{FieldType, Value};

// ============================================================================
// RESOLVED EXPRESSIONS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    And,
    Or,
}

impl BinaryOp {
    pub fn parse(op: &str) -> Option<Self> {
        Some(match op {
            "add" | "+" => Self::Add,
            "subtract" | "-" => Self::Subtract,
            "multiply" | "*" => Self::Multiply,
            "divide" | "/" => Self::Divide,
            "modulo" | "%" => Self::Modulo,
            "eq" | "==" => Self::Eq,
            "neq" | "!=" => Self::Neq,
            "lt" | "<" => Self::Lt,
            "lte" | "<=" => Self::Lte,
            "gt" | ">" => Self::Gt,
            "gte" | ">=" => Self::Gte,
            "and" | "&&" => Self::And,
            "or" | "||" => Self::Or,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Negate,
    Not,
}

impl UnaryOp {
    pub fn parse(op: &str) -> Option<Self> {
        match op {
            "negate" | "neg" | "-" => Some(Self::Negate),
            "not" | "!" => Some(Self::Not),
            _ => None,
        }
    }
}

/// Built-in functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Min,
    Max,
    Abs,
    Floor,
    Ceil,
    Round,
    Sqrt,
    Pow,
    Clamp,
    Len,
    Get,
    List,
    Contains,
    HasComponent,
    EntitiesWith,
    Random,
    RandomRange,
    Choose,
    Now,
}

impl Builtin {
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "min" => Self::Min,
            "max" => Self::Max,
            "abs" => Self::Abs,
            "floor" => Self::Floor,
            "ceil" => Self::Ceil,
            "round" => Self::Round,
            "sqrt" => Self::Sqrt,
            "pow" => Self::Pow,
            "clamp" => Self::Clamp,
            "len" => Self::Len,
            "get" => Self::Get,
            "list" => Self::List,
            "contains" => Self::Contains,
            "has_component" => Self::HasComponent,
            "entities_with" => Self::EntitiesWith,
            "random" => Self::Random,
            "random_range" => Self::RandomRange,
            "choose" => Self::Choose,
            "now" => Self::Now,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Min => "min",
            Self::Max => "max",
            Self::Abs => "abs",
            Self::Floor => "floor",
            Self::Ceil => "ceil",
            Self::Round => "round",
            Self::Sqrt => "sqrt",
            Self::Pow => "pow",
            Self::Clamp => "clamp",
            Self::Len => "len",
            Self::Get => "get",
            Self::List => "list",
            Self::Contains => "contains",
            Self::HasComponent => "has_component",
            Self::EntitiesWith => "entities_with",
            Self::Random => "random",
            Self::RandomRange => "random_range",
            Self::Choose => "choose",
            Self::Now => "now",
        }
    }

    /// Accepted argument count: (min, max).
    fn arity(self) -> (usize, Option<usize>) {
        match self {
            Self::Min | Self::Max | Self::EntitiesWith => (1, None),
            Self::Abs | Self::Floor | Self::Ceil | Self::Round | Self::Sqrt | Self::Len => {
                (1, Some(1))
            }
            Self::Pow | Self::Get | Self::Contains | Self::HasComponent | Self::RandomRange => {
                (2, Some(2))
            }
            Self::Clamp => (3, Some(3)),
            Self::List => (0, None),
            Self::Random | Self::Now => (0, Some(0)),
            Self::Choose => (2, None),
        }
    }
}

/// Call target, resolved at load time. Module functions shadow built-ins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Callee {
    User(usize),
    Builtin(Builtin),
}

/// Resolved expression tree.
#[derive(Debug, Clone)]
pub enum Expr {
    Literal(Value),
    /// Rule-scope variable, constant or entity name, looked up at run time.
    Var(String),
    /// Positional parameter of the enclosing function.
    Param(usize),
    Field {
        entity: Box<Expr>,
        component: ComponentId,
        field: usize,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Call {
        callee: Callee,
        args: Vec<Expr>,
    },
    If {
        condition: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
}

// ============================================================================
// RESOLVED ACTIONS AND RULES
// ============================================================================

/// Component initializer of spawn / add_component.
#[derive(Debug, Clone)]
pub struct ComponentInit {
    pub component: ComponentId,
    pub fields: Vec<(usize, Expr)>,
}

#[derive(Debug, Clone)]
pub enum Action {
    Modify {
        entity: Expr,
        component: ComponentId,
        field: usize,
        op: ModifyOp,
        value: Expr,
    },
    Schedule {
        event: String,
        delay: Option<Expr>,
        fields: Vec<(String, Expr)>,
        recurring: bool,
    },
    Emit {
        event: String,
        fields: Vec<(String, Expr)>,
    },
    Spawn {
        components: Vec<ComponentInit>,
    },
    Despawn {
        entity: Expr,
    },
    AddComponent {
        entity: Expr,
        component: ComponentInit,
    },
    RemoveComponent {
        entity: Expr,
        component: ComponentId,
    },
    Conditional {
        condition: Expr,
        then_actions: Vec<Action>,
        else_actions: Vec<Action>,
    },
    Loop {
        variable: String,
        iterable: Expr,
        body: Vec<Action>,
    },
    Let {
        name: String,
        value: Expr,
    },
    Cancel {
        event: Expr,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    Event(String),
    Tick,
}

#[derive(Debug, Clone)]
pub struct Rule {
    pub id: u32,
    pub name: Option<String>,
    pub trigger: Trigger,
    /// Rule variable -> event field.
    pub bindings: Vec<(String, String)>,
    /// Components the bound entity must have.
    pub filter: Vec<ComponentId>,
    pub condition: Option<Expr>,
    pub actions: Vec<Action>,
}

impl Rule {
    /// Event type this rule is dispatched on.
    pub fn event_type(&self) -> &str {
        match &self.trigger {
            Trigger::Event(event) => event,
            Trigger::Tick => TICK_EVENT,
        }
    }
}

/// A module-level or bound (choice) function.
#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub params: Vec<(String, FieldType)>,
    pub return_type: FieldType,
    pub body: Expr,
}

#[derive(Debug, Clone)]
pub struct Tracker {
    pub id: u32,
    pub component: ComponentId,
    pub event: String,
}

/// Resolved initial-state entity.
#[derive(Debug, Clone)]
pub struct InitialEntity {
    pub id: EntityId,
    pub name: Option<String>,
    pub components: Vec<(ComponentId, Vec<(usize, Value)>)>,
    pub choices: BTreeMap<String, Arc<Function>>,
}

// ============================================================================
// PROGRAM
// ============================================================================

/// A validated, index-resolved IR module. Immutable after load.
#[derive(Debug)]
pub struct Program {
    module: String,
    schema: Arc<Schema>,
    rules: Vec<Rule>,
    rules_by_event: HashMap<String, Vec<usize>>,
    functions: Vec<Arc<Function>>,
    function_index: HashMap<String, usize>,
    trackers: Vec<Tracker>,
    trackers_by_event: HashMap<String, Vec<usize>>,
    constants: IndexMap<String, Value>,
    initial: Vec<InitialEntity>,
    events: Option<HashSet<String>>,
}

impl Program {
    /// Validate and resolve a module.
    pub fn load(module: &IrModule) -> Result<Self> {
        let schema = Arc::new(Schema::from_ir(&module.components)?);
        let events: Option<HashSet<String>> =
            module.events.as_ref().map(|e| e.iter().cloned().collect());

        // Function names first so bodies may call each other.
        let mut function_index = HashMap::new();
        let mut arities = Vec::with_capacity(module.functions.len());
        for (index, function) in module.functions.iter().enumerate() {
            if function_index.insert(function.name.clone(), index).is_some() {
                return Err(SimError::malformed(
                    format!("function {}", function.name),
                    "duplicate function name",
                ));
            }
            arities.push(function.params.len());
        }

        let base = Compiler {
            schema: &schema,
            function_index: &function_index,
            arities: &arities,
            events: events.as_ref(),
            location: String::new(),
            params: &[],
        };

        let mut functions = Vec::with_capacity(module.functions.len());
        for function in &module.functions {
            let compiler = base.at(format!("function {}", function.name), &function.params);
            functions.push(Arc::new(Function {
                name: function.name.clone(),
                params: compile_params(&function.params),
                return_type: FieldType::from(&function.return_type),
                body: compiler.expr(&function.body)?,
            }));
        }

        let mut rules = module
            .rules
            .iter()
            .map(|rule| base.rule(rule))
            .collect::<Result<Vec<_>>>()?;
        rules.sort_by_key(|rule| rule.id);
        if let Some(pair) = rules.windows(2).find(|pair| pair[0].id == pair[1].id) {
            return Err(SimError::malformed(
                format!("rule {}", pair[0].id),
                "duplicate rule id",
            ));
        }
        let mut rules_by_event: HashMap<String, Vec<usize>> = HashMap::new();
        for (index, rule) in rules.iter().enumerate() {
            rules_by_event
                .entry(rule.event_type().to_string())
                .or_default()
                .push(index);
        }

        let trackers = module
            .trackers
            .iter()
            .map(|tracker| base.tracker(tracker))
            .collect::<Result<Vec<_>>>()?;
        let mut trackers_by_event: HashMap<String, Vec<usize>> = HashMap::new();
        for (index, tracker) in trackers.iter().enumerate() {
            trackers_by_event
                .entry(tracker.event.clone())
                .or_default()
                .push(index);
        }

        let constants = module
            .constants
            .iter()
            .map(|(name, value)| (name.clone(), Value::from_ir(value)))
            .collect();

        let mut program = Program {
            module: module.module.clone(),
            schema,
            rules,
            rules_by_event,
            functions,
            function_index,
            trackers,
            trackers_by_event,
            constants,
            initial: Vec::new(),
            events,
        };
        if let Some(state) = &module.initial_state {
            program.initial = program.compile_initial_state(state)?;
        }

        info!(
            module = %program.module,
            components = program.schema.len(),
            rules = program.rules.len(),
            functions = program.functions.len(),
            trackers = program.trackers.len(),
            entities = program.initial.len(),
            "loaded IR module"
        );
        Ok(program)
    }

    /// Resolve an initial-state document against this program's schema.
    ///
    /// Entity-typed values may name another entity of the same document.
    pub fn compile_initial_state(&self, state: &IrInitialState) -> Result<Vec<InitialEntity>> {
        let mut names: HashMap<&str, EntityId> = HashMap::new();
        let mut ids = HashSet::new();
        for entity in &state.entities {
            if !ids.insert(entity.id) {
                return Err(SimError::malformed(
                    format!("initial_state entity {}", entity.id),
                    "duplicate entity id",
                ));
            }
            if let Some(name) = &entity.name {
                if names.insert(name.as_str(), EntityId(entity.id as u64)).is_some() {
                    return Err(SimError::malformed(
                        format!("initial_state entity {}", entity.id),
                        format!("duplicate entity name {name}"),
                    ));
                }
            }
        }
        let resolve = |name: &str| names.get(name).copied();

        let arities: Vec<usize> = self.functions.iter().map(|f| f.params.len()).collect();
        let base = Compiler {
            schema: &self.schema,
            function_index: &self.function_index,
            arities: &arities,
            events: self.events.as_ref(),
            location: String::new(),
            params: &[],
        };

        let mut resolved = Vec::with_capacity(state.entities.len());
        for entity in &state.entities {
            let location = format!("initial_state entity {}", entity.id);
            let mut components = Vec::with_capacity(entity.components.len());
            for (component, fields) in &entity.components {
                let def = self.schema.by_name(component).ok_or_else(|| {
                    SimError::malformed(location.clone(), format!("unknown component {component}"))
                })?;
                let mut values = Vec::with_capacity(fields.len());
                for (field, raw) in fields {
                    let index = def.field_index(field).ok_or_else(|| {
                        SimError::malformed(
                            location.clone(),
                            format!("unknown field {component}.{field}"),
                        )
                    })?;
                    let ty = &def.fields[index].ty;
                    let value = Value::from_ir_typed(raw, ty, &resolve).ok_or_else(|| {
                        SimError::malformed(
                            location.clone(),
                            format!("{component}.{field} is not a valid {ty}"),
                        )
                    })?;
                    values.push((index, value));
                }
                components.push((def.id, values));
            }

            let mut choices = BTreeMap::new();
            for (name, bound) in entity.bound_functions.iter().flatten() {
                let compiler = base.at(format!("{location} choice {name}"), &bound.params);
                choices.insert(
                    name.clone(),
                    Arc::new(Function {
                        name: name.clone(),
                        params: compile_params(&bound.params),
                        return_type: FieldType::from(&bound.return_type),
                        body: compiler.expr(&bound.body)?,
                    }),
                );
            }

            resolved.push(InitialEntity {
                id: EntityId(entity.id as u64),
                name: entity.name.clone(),
                components,
                choices,
            });
        }
        Ok(resolved)
    }

    pub fn module_name(&self) -> &str {
        &self.module
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Rules in ascending id order.
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Rules triggered by an event type, ascending id.
    pub fn rules_for<'a>(&'a self, event_type: &str) -> impl Iterator<Item = &'a Rule> + 'a {
        self.rules_by_event
            .get(event_type)
            .into_iter()
            .flatten()
            .map(move |&index| &self.rules[index])
    }

    pub fn has_tick_rules(&self) -> bool {
        self.rules_by_event.contains_key(TICK_EVENT)
    }

    pub fn function(&self, index: usize) -> &Arc<Function> {
        &self.functions[index]
    }

    pub fn function_by_name(&self, name: &str) -> Option<&Arc<Function>> {
        self.function_index.get(name).map(|&index| &self.functions[index])
    }

    pub fn trackers(&self) -> &[Tracker] {
        &self.trackers
    }

    pub fn trackers_for<'a>(&'a self, event_type: &str) -> impl Iterator<Item = &'a Tracker> + 'a {
        self.trackers_by_event
            .get(event_type)
            .into_iter()
            .flatten()
            .map(move |&index| &self.trackers[index])
    }

    pub fn constant(&self, name: &str) -> Option<&Value> {
        self.constants.get(name)
    }

    pub fn initial_state(&self) -> &[InitialEntity] {
        &self.initial
    }
}

fn compile_params(params: &[IrParam]) -> Vec<(String, FieldType)> {
    params
        .iter()
        .map(|p| (p.name.clone(), FieldType::from(&p.param_type)))
        .collect()
}

// ============================================================================
// COMPILER
// ============================================================================

struct Compiler<'a> {
    schema: &'a Schema,
    function_index: &'a HashMap<String, usize>,
    arities: &'a [usize],
    events: Option<&'a HashSet<String>>,
    location: String,
    params: &'a [IrParam],
}

impl<'a> Compiler<'a> {
    fn at(&self, location: String, params: &'a [IrParam]) -> Compiler<'a> {
        Compiler {
            schema: self.schema,
            function_index: self.function_index,
            arities: self.arities,
            events: self.events,
            location,
            params,
        }
    }

    fn error(&self, message: impl Into<String>) -> SimError {
        SimError::malformed(self.location.clone(), message)
    }

    fn rule(&self, rule: &IrRule) -> Result<Rule> {
        let location = match &rule.name {
            Some(name) => format!("rule {} ({name})", rule.id),
            None => format!("rule {}", rule.id),
        };
        let compiler = self.at(location, &[]);

        let trigger = match (rule.trigger.trigger_type.as_str(), &rule.trigger.event) {
            ("event", Some(event)) => {
                compiler.check_event(event)?;
                Trigger::Event(event.clone())
            }
            ("event", None) => return Err(compiler.error("event trigger without an event type")),
            ("tick", _) => Trigger::Tick,
            (other, _) => return Err(compiler.error(format!("unknown trigger type {other}"))),
        };

        let bindings = rule
            .trigger
            .bindings
            .iter()
            .flatten()
            .map(|(var, field)| (var.clone(), field.clone()))
            .collect();

        let filter = rule
            .filter
            .iter()
            .flat_map(|f| f.components.iter())
            .map(|name| compiler.component(name))
            .collect::<Result<Vec<_>>>()?;

        Ok(Rule {
            id: rule.id,
            name: rule.name.clone(),
            trigger,
            bindings,
            filter,
            condition: rule.condition.as_ref().map(|c| compiler.expr(c)).transpose()?,
            actions: compiler.actions(&rule.actions)?,
        })
    }

    fn tracker(&self, tracker: &IrTracker) -> Result<Tracker> {
        let compiler = self.at(format!("tracker {}", tracker.id), &[]);
        compiler.check_event(&tracker.event)?;
        Ok(Tracker {
            id: tracker.id,
            component: compiler.component(&tracker.component)?,
            event: tracker.event.clone(),
        })
    }

    fn check_event(&self, event: &str) -> Result<()> {
        if is_internal(event) {
            return Err(self.error(format!("event type {event} is reserved")));
        }
        match self.events {
            Some(declared) if !declared.contains(event) => {
                Err(self.error(format!("undeclared event type {event}")))
            }
            _ => Ok(()),
        }
    }

    fn component(&self, name: &str) -> Result<ComponentId> {
        self.schema
            .component_id(name)
            .ok_or_else(|| self.error(format!("unknown component {name}")))
    }

    fn field(&self, component: &str, field: &str) -> Result<(ComponentId, usize)> {
        let id = self.component(component)?;
        let index = self
            .schema
            .component(id)
            .field_index(field)
            .ok_or_else(|| self.error(format!("unknown field {component}.{field}")))?;
        Ok((id, index))
    }

    fn param_index(&self, name: &str) -> Option<usize> {
        self.params.iter().position(|p| p.name == name)
    }

    fn var(&self, name: &str) -> Expr {
        match self.param_index(name) {
            Some(index) => Expr::Param(index),
            None => Expr::Var(name.to_string()),
        }
    }

    fn boxed(&self, expr: &IrExpression) -> Result<Box<Expr>> {
        self.expr(expr).map(Box::new)
    }

    fn expr(&self, expr: &IrExpression) -> Result<Expr> {
        Ok(match expr {
            IrExpression::Literal { value } => Expr::Literal(Value::from_ir(value)),
            IrExpression::Var { name } => self.var(name),
            IrExpression::Param { name } => Expr::Param(
                self.param_index(name)
                    .ok_or_else(|| self.error(format!("unknown parameter {name}")))?,
            ),
            IrExpression::Field {
                entity,
                component,
                field,
            } => {
                let entity = match entity {
                    IrEntityRef::Var(name) => self.var(name),
                    IrEntityRef::Expr(inner) => self.expr(inner)?,
                };
                let (component, field) = self.field(component, field)?;
                Expr::Field {
                    entity: Box::new(entity),
                    component,
                    field,
                }
            }
            IrExpression::Binary { op, left, right } => Expr::Binary {
                op: BinaryOp::parse(op)
                    .ok_or_else(|| self.error(format!("unknown binary operator {op}")))?,
                left: self.boxed(left)?,
                right: self.boxed(right)?,
            },
            IrExpression::Unary { op, expr } => Expr::Unary {
                op: UnaryOp::parse(op)
                    .ok_or_else(|| self.error(format!("unknown unary operator {op}")))?,
                expr: self.boxed(expr)?,
            },
            IrExpression::Call { function, args } => {
                let callee = self.callee(function, args.len())?;
                Expr::Call {
                    callee,
                    args: args.iter().map(|a| self.expr(a)).collect::<Result<_>>()?,
                }
            }
            IrExpression::If {
                condition,
                then,
                else_expr,
            } => Expr::If {
                condition: self.boxed(condition)?,
                then: self.boxed(then)?,
                otherwise: self.boxed(else_expr)?,
            },
        })
    }

    fn callee(&self, name: &str, argc: usize) -> Result<Callee> {
        if let Some(&index) = self.function_index.get(name) {
            let expected = self.arities[index];
            if argc != expected {
                return Err(self.error(format!(
                    "function {name} takes {expected} arguments, got {argc}"
                )));
            }
            return Ok(Callee::User(index));
        }
        let builtin =
            Builtin::parse(name).ok_or_else(|| self.error(format!("unknown function {name}")))?;
        let (min, max) = builtin.arity();
        if argc < min || max.is_some_and(|max| argc > max) {
            return Err(self.error(format!("wrong number of arguments to {name}: {argc}")));
        }
        Ok(Callee::Builtin(builtin))
    }

    fn fields(
        &self,
        fields: Option<&IndexMap<String, IrExpression>>,
    ) -> Result<Vec<(String, Expr)>> {
        fields
            .into_iter()
            .flatten()
            .map(|(name, expr)| Ok((name.clone(), self.expr(expr)?)))
            .collect()
    }

    fn init(&self, init: &IrComponentInit) -> Result<ComponentInit> {
        let component = self.component(&init.name)?;
        let def = self.schema.component(component);
        let fields = init
            .fields
            .iter()
            .map(|(field, expr)| {
                let index = def
                    .field_index(field)
                    .ok_or_else(|| self.error(format!("unknown field {}.{field}", init.name)))?;
                Ok((index, self.expr(expr)?))
            })
            .collect::<Result<_>>()?;
        Ok(ComponentInit { component, fields })
    }

    fn actions(&self, actions: &[IrAction]) -> Result<Vec<Action>> {
        actions.iter().map(|a| self.action(a)).collect()
    }

    fn action(&self, action: &IrAction) -> Result<Action> {
        Ok(match action {
            IrAction::Modify {
                entity,
                component,
                field,
                op,
                value,
            } => {
                let (component, field) = self.field(component, field)?;
                Action::Modify {
                    entity: self.expr(entity)?,
                    component,
                    field,
                    op: ModifyOp::parse(op)
                        .ok_or_else(|| self.error(format!("unknown modify op {op}")))?,
                    value: self.expr(value)?,
                }
            }
            IrAction::Schedule {
                event,
                source,
                delay,
                fields,
                recurring,
            } => {
                self.check_event(event)?;
                let mut compiled = self.fields(fields.as_ref())?;
                if let Some(source) = source {
                    if !compiled.iter().any(|(name, _)| name == "source") {
                        compiled.insert(0, ("source".to_string(), self.expr(source)?));
                    }
                }
                if *recurring && delay.is_none() {
                    return Err(self.error(format!("recurring schedule of {event} needs a delay")));
                }
                Action::Schedule {
                    event: event.clone(),
                    delay: delay.as_ref().map(|d| self.expr(d)).transpose()?,
                    fields: compiled,
                    recurring: *recurring,
                }
            }
            IrAction::Emit { event, fields } => {
                self.check_event(event)?;
                Action::Emit {
                    event: event.clone(),
                    fields: self.fields(fields.as_ref())?,
                }
            }
            IrAction::Spawn { components } => Action::Spawn {
                components: components.iter().map(|c| self.init(c)).collect::<Result<_>>()?,
            },
            IrAction::Despawn { entity } => Action::Despawn {
                entity: self.expr(entity)?,
            },
            IrAction::AddComponent { entity, component } => Action::AddComponent {
                entity: self.expr(entity)?,
                component: self.init(component)?,
            },
            IrAction::RemoveComponent { entity, component } => Action::RemoveComponent {
                entity: self.expr(entity)?,
                component: self.component(component)?,
            },
            IrAction::Conditional {
                condition,
                then_actions,
                else_actions,
            } => Action::Conditional {
                condition: self.expr(condition)?,
                then_actions: self.actions(then_actions)?,
                else_actions: self.actions(else_actions.as_deref().unwrap_or_default())?,
            },
            IrAction::Loop {
                variable,
                iterable,
                body,
            } => Action::Loop {
                variable: variable.clone(),
                iterable: self.expr(iterable)?,
                body: self.actions(body)?,
            },
            IrAction::Let { name, value } => Action::Let {
                name: name.clone(),
                value: self.expr(value)?,
            },
            IrAction::Cancel { event } => Action::Cancel {
                event: self.expr(event)?,
            },
        })
    }
}
