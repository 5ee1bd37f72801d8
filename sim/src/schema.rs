//! Component definitions, fixed at load time.

use std::collections::HashMap;

use indexmap::IndexMap;

use crate::components::{ComponentId, ComponentInstance};
use crate::error::{Result, SimError};
use crate::ir::IrComponent;
use crate::value::{FieldType, Value};

/// Field of a component definition.
#[derive(Debug, Clone)]
pub struct FieldDef {
    pub name: String,
    pub ty: FieldType,
    pub default: Value,
}

/// A component definition.
#[derive(Debug, Clone)]
pub struct ComponentDef {
    pub id: ComponentId,
    pub name: String,
    pub fields: Vec<FieldDef>,
}

impl ComponentDef {
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }
}

/// The set of component definitions of a loaded module.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    components: Vec<ComponentDef>,
    by_name: HashMap<String, ComponentId>,
}

impl Schema {
    /// Build the schema from IR component definitions.
    ///
    /// Rejects duplicate component or field names and defaults that do not
    /// match their declared type.
    pub fn from_ir(components: &[IrComponent]) -> Result<Self> {
        let mut schema = Schema::default();
        for comp in components {
            let location = format!("component {}", comp.name);
            if schema.by_name.contains_key(&comp.name) {
                return Err(SimError::malformed(location, "duplicate component name"));
            }
            let mut fields: Vec<FieldDef> = Vec::with_capacity(comp.fields.len());
            for field in &comp.fields {
                if fields.iter().any(|f| f.name == field.name) {
                    return Err(SimError::malformed(
                        location,
                        format!("duplicate field {}", field.name),
                    ));
                }
                let ty = FieldType::from(&field.field_type);
                let default = match &field.default {
                    None => ty.zero(),
                    Some(raw) => Value::from_ir_typed(raw, &ty, &|_| None).ok_or_else(|| {
                        SimError::malformed(
                            location.clone(),
                            format!("default of field {} is not a {}", field.name, ty),
                        )
                    })?,
                };
                fields.push(FieldDef {
                    name: field.name.clone(),
                    ty,
                    default,
                });
            }
            let id = ComponentId(schema.components.len() as u32);
            schema.by_name.insert(comp.name.clone(), id);
            schema.components.push(ComponentDef {
                id,
                name: comp.name.clone(),
                fields,
            });
        }
        Ok(schema)
    }

    pub fn component_id(&self, name: &str) -> Option<ComponentId> {
        self.by_name.get(name).copied()
    }

    /// Definition for a resolved id. Ids only come from this schema.
    pub fn component(&self, id: ComponentId) -> &ComponentDef {
        &self.components[id.0 as usize]
    }

    pub fn by_name(&self, name: &str) -> Option<&ComponentDef> {
        self.component_id(name).map(|id| self.component(id))
    }

    pub fn components(&self) -> &[ComponentDef] {
        &self.components
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Create an instance from declared defaults plus overrides.
    ///
    /// Fails with `InvalidComponent` when an override violates its field's
    /// declared type.
    pub fn instantiate(
        &self,
        id: ComponentId,
        overrides: &[(usize, Value)],
    ) -> Result<ComponentInstance> {
        let def = self.component(id);
        let mut fields: Vec<Value> = def.fields.iter().map(|f| f.default.clone()).collect();
        for (index, value) in overrides {
            let field = &def.fields[*index];
            let value = value.clone().coerce_to(&field.ty);
            if !value.conforms_to(&field.ty) {
                return Err(SimError::InvalidComponent {
                    component: def.name.clone(),
                    message: format!(
                        "field {} expects {}, got {}",
                        field.name,
                        field.ty,
                        value.type_name()
                    ),
                });
            }
            fields[*index] = value;
        }
        Ok(ComponentInstance { fields })
    }

    /// Resolve a name-keyed field patch to field indices.
    pub fn resolve_fields(
        &self,
        component: &str,
        patch: &IndexMap<String, Value>,
    ) -> Result<(ComponentId, Vec<(usize, Value)>)> {
        let def = self.by_name(component).ok_or_else(|| SimError::InvalidComponent {
            component: component.to_string(),
            message: "unknown component".to_string(),
        })?;
        let mut resolved = Vec::with_capacity(patch.len());
        for (field, value) in patch {
            let index = def.field_index(field).ok_or_else(|| SimError::InvalidComponent {
                component: component.to_string(),
                message: format!("unknown field {field}"),
            })?;
            resolved.push((index, value.clone()));
        }
        Ok((def.id, resolved))
    }

    /// Render an instance as a name-keyed map, in field declaration order.
    pub fn describe(&self, id: ComponentId, instance: &ComponentInstance) -> IndexMap<String, Value> {
        self.component(id)
            .fields
            .iter()
            .zip(instance.fields.iter())
            .map(|(def, value)| (def.name.clone(), value.clone()))
            .collect()
    }
}
