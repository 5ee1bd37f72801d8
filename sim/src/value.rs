//! Runtime values and declared field types.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Serialize, Serializer};

use crate::components::EntityId;
use crate::ir::{IrType, IrValue};

/// Declared type of a component field, parameter or return value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    Number,
    String,
    Boolean,
    Entity,
    List(Box<FieldType>),
    Map(Box<FieldType>, Box<FieldType>),
}

impl FieldType {
    /// Zero value used when a field declares no default.
    pub fn zero(&self) -> Value {
        match self {
            FieldType::Number => Value::Number(0.0),
            FieldType::String => Value::String(String::new()),
            FieldType::Boolean => Value::Bool(false),
            FieldType::Entity => Value::Null,
            FieldType::List(_) => Value::List(Vec::new()),
            FieldType::Map(_, _) => Value::Map(BTreeMap::new()),
        }
    }
}

impl From<&IrType> for FieldType {
    fn from(ty: &IrType) -> Self {
        match ty {
            IrType::Number => FieldType::Number,
            IrType::String => FieldType::String,
            IrType::Boolean => FieldType::Boolean,
            IrType::Entity => FieldType::Entity,
            IrType::List { element } => FieldType::List(Box::new(element.as_ref().into())),
            IrType::Map { key, value } => {
                FieldType::Map(Box::new(key.as_ref().into()), Box::new(value.as_ref().into()))
            }
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Number => f.write_str("number"),
            FieldType::String => f.write_str("string"),
            FieldType::Boolean => f.write_str("boolean"),
            FieldType::Entity => f.write_str("entity"),
            FieldType::List(element) => write!(f, "list<{element}>"),
            FieldType::Map(key, value) => write!(f, "map<{key}, {value}>"),
        }
    }
}

/// A runtime value.
///
/// Map keys are stored as strings in a `BTreeMap` so that iteration order is
/// the same in every run.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Entity(EntityId),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Entity(_) => "entity",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_entity(&self) -> Option<EntityId> {
        match self {
            Value::Entity(id) => Some(*id),
            _ => None,
        }
    }

    /// Convert a whole non-negative number to an entity reference when the
    /// slot holds entities, so ids passed through plain JSON fields store
    /// cleanly. Every other value is returned unchanged.
    pub fn coerce_to(self, ty: &FieldType) -> Value {
        match (self, ty) {
            (Value::Number(n), FieldType::Entity) if n >= 0.0 && n.fract() == 0.0 => {
                Value::Entity(EntityId(n as u64))
            }
            (value, _) => value,
        }
    }

    /// Whether this value may be stored in a slot of the given type.
    ///
    /// `null` is only accepted for entity references ("no entity").
    pub fn conforms_to(&self, ty: &FieldType) -> bool {
        match (self, ty) {
            (Value::Number(_), FieldType::Number) => true,
            (Value::String(_), FieldType::String) => true,
            (Value::Bool(_), FieldType::Boolean) => true,
            (Value::Entity(_) | Value::Null, FieldType::Entity) => true,
            (Value::List(items), FieldType::List(element)) => {
                items.iter().all(|item| item.conforms_to(element))
            }
            (Value::Map(entries), FieldType::Map(_, value)) => {
                entries.values().all(|item| item.conforms_to(value))
            }
            _ => false,
        }
    }

    /// Convert an untyped IR literal.
    pub fn from_ir(value: &IrValue) -> Value {
        match value {
            IrValue::Null => Value::Null,
            IrValue::Boolean(b) => Value::Bool(*b),
            IrValue::Number(n) => Value::Number(*n),
            IrValue::String(s) => Value::String(s.clone()),
            IrValue::List(items) => Value::List(items.iter().map(Value::from_ir).collect()),
            IrValue::Object(entries) => Value::Map(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::from_ir(v)))
                    .collect(),
            ),
        }
    }

    /// Convert an IR literal against a declared type.
    ///
    /// Entity references may be written as a numeric id or as an entity name
    /// (with or without a leading `@`); `resolve_name` maps names to ids.
    /// Returns `None` when the literal cannot inhabit the type.
    pub fn from_ir_typed<F>(value: &IrValue, ty: &FieldType, resolve_name: &F) -> Option<Value>
    where
        F: Fn(&str) -> Option<EntityId>,
    {
        match (value, ty) {
            (IrValue::Number(n), FieldType::Number) => Some(Value::Number(*n)),
            (IrValue::String(s), FieldType::String) => Some(Value::String(s.clone())),
            (IrValue::Boolean(b), FieldType::Boolean) => Some(Value::Bool(*b)),
            (IrValue::Null, FieldType::Entity) => Some(Value::Null),
            (IrValue::Number(n), FieldType::Entity) => {
                if *n >= 0.0 && n.fract() == 0.0 {
                    Some(Value::Entity(EntityId(*n as u64)))
                } else {
                    None
                }
            }
            (IrValue::String(name), FieldType::Entity) => {
                resolve_name(name.trim_start_matches('@')).map(Value::Entity)
            }
            (IrValue::List(items), FieldType::List(element)) => items
                .iter()
                .map(|item| Value::from_ir_typed(item, element, resolve_name))
                .collect::<Option<Vec<_>>>()
                .map(Value::List),
            (IrValue::Object(entries), FieldType::Map(_, element)) => entries
                .iter()
                .map(|(k, v)| Value::from_ir_typed(v, element, resolve_name).map(|v| (k.clone(), v)))
                .collect::<Option<BTreeMap<_, _>>>()
                .map(Value::Map),
            _ => None,
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<EntityId> for Value {
    fn from(id: EntityId) -> Self {
        Value::Entity(id)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::String(s) => write!(f, "{s:?}"),
            Value::Entity(id) => write!(f, "{id}"),
            Value::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Value::Map(entries) => {
                f.write_str("{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k:?}: {v}")?;
                }
                f.write_str("}")
            }
        }
    }
}

/// Entity references serialize as their numeric id, matching the IR's
/// representation of entity-typed fields.
impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Number(n) => serializer.serialize_f64(*n),
            Value::String(s) => serializer.serialize_str(s),
            Value::Entity(id) => serializer.serialize_u64(id.0),
            Value::List(items) => items.serialize(serializer),
            Value::Map(entries) => entries.serialize(serializer),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_names(_: &str) -> Option<EntityId> {
        None
    }

    #[test]
    fn test_null_only_conforms_to_entity() {
        assert!(Value::Null.conforms_to(&FieldType::Entity));
        assert!(!Value::Null.conforms_to(&FieldType::Number));
        assert!(!Value::Number(1.0).conforms_to(&FieldType::Entity));
    }

    #[test]
    fn test_whole_numbers_coerce_to_entities() {
        assert_eq!(Value::Number(3.0).coerce_to(&FieldType::Entity), Value::Entity(EntityId(3)));
        assert_eq!(Value::Number(3.5).coerce_to(&FieldType::Entity), Value::Number(3.5));
        assert_eq!(Value::Number(-1.0).coerce_to(&FieldType::Entity), Value::Number(-1.0));
        assert_eq!(Value::Number(3.0).coerce_to(&FieldType::Number), Value::Number(3.0));
    }

    #[test]
    fn test_nested_list_conformance() {
        let ty = FieldType::List(Box::new(FieldType::Number));
        assert!(Value::List(vec![1.0.into(), 2.0.into()]).conforms_to(&ty));
        assert!(!Value::List(vec![1.0.into(), "x".into()]).conforms_to(&ty));
    }

    #[test]
    fn test_typed_entity_literals() {
        let names = |name: &str| (name == "goblin").then_some(EntityId(7));
        assert_eq!(
            Value::from_ir_typed(&IrValue::String("@goblin".into()), &FieldType::Entity, &names),
            Some(Value::Entity(EntityId(7)))
        );
        assert_eq!(
            Value::from_ir_typed(&IrValue::Number(3.0), &FieldType::Entity, &no_names),
            Some(Value::Entity(EntityId(3)))
        );
        assert_eq!(
            Value::from_ir_typed(&IrValue::Number(1.5), &FieldType::Entity, &no_names),
            None
        );
        assert_eq!(
            Value::from_ir_typed(&IrValue::String("troll".into()), &FieldType::Entity, &names),
            None
        );
    }

    #[test]
    fn test_zero_values() {
        assert_eq!(FieldType::Number.zero(), Value::Number(0.0));
        assert_eq!(FieldType::Entity.zero(), Value::Null);
        assert_eq!(
            FieldType::Map(Box::new(FieldType::String), Box::new(FieldType::Number)).zero(),
            Value::Map(BTreeMap::new())
        );
    }

    #[test]
    fn test_serialize_entity_as_id() {
        let json = serde_json::to_string(&Value::List(vec![
            Value::Entity(EntityId(4)),
            Value::Null,
            Value::Number(2.5),
        ]))
        .unwrap();
        assert_eq!(json, "[4,null,2.5]");
    }
}
