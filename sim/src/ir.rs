//! IR document model.
//!
//! These types mirror the JSON document produced by the rule compiler. They
//! are plain data: nothing here is validated. [`crate::program::Program`]
//! resolves and checks an [`IrModule`] before any simulation runs.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A compiled rule module.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IrModule {
    /// IR format version.
    #[serde(default = "IrModule::default_version")]
    pub version: String,

    /// Module name.
    #[serde(default)]
    pub module: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<IrMetadata>,

    #[serde(default)]
    pub components: Vec<IrComponent>,

    #[serde(default)]
    pub rules: Vec<IrRule>,

    #[serde(default)]
    pub functions: Vec<IrFunction>,

    #[serde(default)]
    pub trackers: Vec<IrTracker>,

    /// Declared event types. When present, every trigger, schedule, emit and
    /// tracker must name one of them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub events: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub constants: IndexMap<String, IrValue>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_state: Option<IrInitialState>,
}

impl IrModule {
    fn default_version() -> String {
        "1.0".to_string()
    }

    /// Parse a module from JSON text.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Convert an already-parsed JSON value.
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }
}

/// Compiler metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IrMetadata {
    #[serde(default)]
    pub compiled_at: String,
    #[serde(default)]
    pub compiler_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_hash: Option<String>,
}

/// Component definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IrComponent {
    #[serde(default)]
    pub id: u32,
    pub name: String,
    #[serde(default)]
    pub fields: Vec<IrField>,
}

/// Field definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IrField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: IrType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<IrValue>,
}

/// Declared type of a field, parameter or return value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum IrType {
    #[serde(rename = "number")]
    Number,
    #[serde(rename = "string")]
    String,
    #[serde(rename = "boolean")]
    Boolean,
    #[serde(rename = "entity")]
    Entity,
    #[serde(rename = "list")]
    List { element: Box<IrType> },
    #[serde(rename = "map")]
    Map { key: Box<IrType>, value: Box<IrType> },
}

/// Untyped literal value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IrValue {
    Null,
    Boolean(bool),
    Number(f64),
    String(String),
    List(Vec<IrValue>),
    Object(IndexMap<String, IrValue>),
}

/// Rule definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IrRule {
    pub id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub trigger: IrTrigger,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<IrFilter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<IrExpression>,
    #[serde(default)]
    pub actions: Vec<IrAction>,
}

/// Rule trigger: `"event"` (with an event name) or `"tick"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IrTrigger {
    #[serde(rename = "type")]
    pub trigger_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    /// Rule variable name -> event field name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bindings: Option<IndexMap<String, String>>,
}

/// Required component set on the bound entity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IrFilter {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub components: Vec<String>,
}

/// Entity operand of a field access: a variable name or a nested expression.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IrEntityRef {
    Var(String),
    Expr(Box<IrExpression>),
}

/// Expression tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum IrExpression {
    #[serde(rename = "literal")]
    Literal { value: IrValue },

    #[serde(rename = "var")]
    Var { name: String },

    #[serde(rename = "param")]
    Param { name: String },

    #[serde(rename = "field")]
    Field {
        entity: IrEntityRef,
        component: String,
        field: String,
    },

    #[serde(rename = "binary")]
    Binary {
        op: String,
        left: Box<IrExpression>,
        right: Box<IrExpression>,
    },

    #[serde(rename = "unary")]
    Unary { op: String, expr: Box<IrExpression> },

    #[serde(rename = "call")]
    Call {
        function: String,
        #[serde(default)]
        args: Vec<IrExpression>,
    },

    #[serde(rename = "if")]
    If {
        condition: Box<IrExpression>,
        then: Box<IrExpression>,
        #[serde(rename = "else")]
        else_expr: Box<IrExpression>,
    },
}

/// Rule action.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum IrAction {
    #[serde(rename = "modify")]
    Modify {
        entity: IrExpression,
        component: String,
        field: String,
        op: String,
        value: IrExpression,
    },

    #[serde(rename = "schedule")]
    Schedule {
        event: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source: Option<IrExpression>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        delay: Option<IrExpression>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fields: Option<IndexMap<String, IrExpression>>,
        /// Re-fire every `delay` until cancelled.
        #[serde(default)]
        recurring: bool,
    },

    #[serde(rename = "emit")]
    Emit {
        event: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fields: Option<IndexMap<String, IrExpression>>,
    },

    #[serde(rename = "spawn")]
    Spawn { components: Vec<IrComponentInit> },

    #[serde(rename = "despawn")]
    Despawn { entity: IrExpression },

    #[serde(rename = "add_component")]
    AddComponent {
        entity: IrExpression,
        component: IrComponentInit,
    },

    #[serde(rename = "remove_component")]
    RemoveComponent {
        entity: IrExpression,
        component: String,
    },

    #[serde(rename = "conditional")]
    Conditional {
        condition: IrExpression,
        #[serde(default)]
        then_actions: Vec<IrAction>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        else_actions: Option<Vec<IrAction>>,
    },

    #[serde(rename = "loop")]
    Loop {
        variable: String,
        iterable: IrExpression,
        #[serde(default)]
        body: Vec<IrAction>,
    },

    #[serde(rename = "let")]
    Let { name: String, value: IrExpression },

    #[serde(rename = "cancel")]
    Cancel { event: IrExpression },
}

/// Component initializer used by spawn / add_component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IrComponentInit {
    pub name: String,
    #[serde(default)]
    pub fields: IndexMap<String, IrExpression>,
}

/// Module-level function.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IrFunction {
    #[serde(default)]
    pub id: u32,
    pub name: String,
    #[serde(default)]
    pub params: Vec<IrParam>,
    pub return_type: IrType,
    pub body: IrExpression,
}

/// Function parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IrParam {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: IrType,
}

/// Tracker definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IrTracker {
    pub id: u32,
    pub component: String,
    pub event: String,
}

/// Initial entity snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IrInitialState {
    #[serde(default)]
    pub entities: Vec<IrEntity>,
}

/// One entity of the initial state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IrEntity {
    pub id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub components: IndexMap<String, IndexMap<String, IrValue>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bound_functions: Option<IndexMap<String, IrBoundFunction>>,
}

/// Choice function bound to an entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IrBoundFunction {
    #[serde(default)]
    pub params: Vec<IrParam>,
    pub return_type: IrType,
    pub body: IrExpression,
    /// Original source text, kept for display only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_minimal_module() {
        let module = IrModule::from_json(r#"{"components": [], "rules": []}"#).unwrap();
        assert_eq!(module.version, "1.0");
        assert!(module.functions.is_empty());
        assert!(module.initial_state.is_none());
    }

    #[test]
    fn test_field_entity_accepts_name_or_expression() {
        let expr: IrExpression = serde_json::from_value(json!({
            "type": "field",
            "entity": "source",
            "component": "Health",
            "field": "current"
        }))
        .unwrap();
        assert!(matches!(
            expr,
            IrExpression::Field { entity: IrEntityRef::Var(ref v), .. } if v == "source"
        ));

        let nested: IrExpression = serde_json::from_value(json!({
            "type": "field",
            "entity": {"type": "field", "entity": "source", "component": "Target", "field": "entity"},
            "component": "Health",
            "field": "current"
        }))
        .unwrap();
        assert!(matches!(
            nested,
            IrExpression::Field { entity: IrEntityRef::Expr(_), .. }
        ));
    }

    #[test]
    fn test_schedule_defaults_to_one_shot() {
        let action: IrAction = serde_json::from_value(json!({
            "type": "schedule",
            "event": "Tick",
            "delay": {"type": "literal", "value": 1.0}
        }))
        .unwrap();
        assert!(matches!(action, IrAction::Schedule { recurring: false, .. }));
    }

    #[test]
    fn test_unknown_top_level_fields_are_ignored() {
        let module = IrModule::from_value(json!({
            "version": "1.0",
            "module": "demo",
            "components": [],
            "rules": [],
            "functions": [],
            "trackers": [],
            "source_map": {"files": []}
        }))
        .unwrap();
        assert_eq!(module.module, "demo");
    }

    #[test]
    fn test_rejects_bad_json() {
        assert!(IrModule::from_json("{not json").is_err());
    }
}
