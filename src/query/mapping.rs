//! Entity mapping descriptors bridging entity members to physical Hive
//! tables and columns.
//!
//! Descriptors are declared at configuration time, either in code through
//! the builder methods or from TOML `[[entities]]` tables, and are validated
//! when registered. A built [`StaticMapping`] is immutable; the binder and the
//! executor share it read-only through `Arc`.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::query::errors::MappingError;
use crate::query::value::WireType;
use crate::types::Result;

/// Provides entity descriptors to the binder and the executor.
pub trait MappingProvider: Send + Sync {
    /// Resolves an entity name to its descriptor.
    fn entity(&self, name: &str) -> Result<Arc<EntityMapping>>;
    /// Lists the registered entity names in sorted order.
    fn entity_names(&self) -> Vec<String>;
}

/// Member-to-column descriptor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMapping {
    /// Entity member name.
    pub member: String,
    /// Physical column name.
    pub column: String,
    /// Column wire type.
    #[serde(rename = "type")]
    pub wire: WireType,
    /// Column values are generated by the store.
    #[serde(default)]
    pub generated: bool,
}

/// Navigation from one entity to another through equal key members.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssociationMapping {
    /// Navigation member name on the owning entity.
    pub member: String,
    /// Target entity name.
    pub target: String,
    /// `(owning member, target member)` pairs joined with equality.
    pub keys: Vec<(String, String)>,
}

/// Descriptor of one mapped entity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityMapping {
    /// Entity name, used as the mapping key.
    pub name: String,
    /// Physical table name.
    pub table: String,
    /// Ordered column descriptors.
    #[serde(default)]
    pub columns: Vec<ColumnMapping>,
    /// Navigation descriptors.
    #[serde(default)]
    pub associations: Vec<AssociationMapping>,
}

impl EntityMapping {
    /// Starts a descriptor for `name` stored in `table`.
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            columns: Vec::new(),
            associations: Vec::new(),
        }
    }

    /// Adds a column whose member and column names are equal.
    pub fn column(self, name: impl Into<String>, wire: WireType) -> Self {
        let name = name.into();
        self.member(name.clone(), name, wire)
    }

    /// Adds a column mapped under a different member name.
    pub fn member(
        mut self,
        member: impl Into<String>,
        column: impl Into<String>,
        wire: WireType,
    ) -> Self {
        self.columns.push(ColumnMapping {
            member: member.into(),
            column: column.into(),
            wire,
            generated: false,
        });
        self
    }

    /// Adds a store-generated column.
    pub fn generated(mut self, name: impl Into<String>, wire: WireType) -> Self {
        let name = name.into();
        self.columns.push(ColumnMapping {
            member: name.clone(),
            column: name,
            wire,
            generated: true,
        });
        self
    }

    /// Adds a navigation member.
    pub fn association<K, T>(
        mut self,
        member: impl Into<String>,
        target: impl Into<String>,
        keys: impl IntoIterator<Item = (K, T)>,
    ) -> Self
    where
        K: Into<String>,
        T: Into<String>,
    {
        self.associations.push(AssociationMapping {
            member: member.into(),
            target: target.into(),
            keys: keys
                .into_iter()
                .map(|(this, other)| (this.into(), other.into()))
                .collect(),
        });
        self
    }

    /// Looks up the column descriptor for `member`.
    pub fn find_member(&self, member: &str) -> Option<&ColumnMapping> {
        self.columns.iter().find(|col| col.member == member)
    }

    /// Looks up the column descriptor for `member`, failing when unmapped.
    pub fn resolve_member(&self, member: &str) -> Result<&ColumnMapping> {
        self.find_member(member)
            .ok_or_else(|| MappingError::unknown_member(&self.name, member).into())
    }

    /// Looks up the association descriptor for `member`.
    pub fn resolve_association(&self, member: &str) -> Result<&AssociationMapping> {
        self.associations
            .iter()
            .find(|assoc| assoc.member == member)
            .ok_or_else(|| {
                MappingError::UnknownAssociation {
                    entity: self.name.clone(),
                    member: member.to_owned(),
                }
                .into()
            })
    }

    fn validate(&self) -> Result<()> {
        if self.columns.is_empty() {
            return Err(MappingError::EmptyEntity {
                entity: self.name.clone(),
            }
            .into());
        }
        let mut members = HashSet::new();
        let mut columns = HashSet::new();
        for col in &self.columns {
            if !members.insert(col.member.as_str()) {
                return Err(self.duplicate(&col.member));
            }
            if !columns.insert(col.column.to_ascii_lowercase()) {
                return Err(self.duplicate(&col.column));
            }
        }
        for assoc in &self.associations {
            if assoc.keys.is_empty() {
                return Err(self.bad_association(assoc, "no key pairs".to_owned()));
            }
            if let Some((missing, _)) = assoc
                .keys
                .iter()
                .find(|(this, _)| self.find_member(this).is_none())
            {
                return Err(self.bad_association(assoc, format!("unknown key member '{missing}'")));
            }
        }
        Ok(())
    }

    fn duplicate(&self, name: &str) -> crate::types::HiveError {
        MappingError::DuplicateColumn {
            entity: self.name.clone(),
            name: name.to_owned(),
        }
        .into()
    }

    fn bad_association(
        &self,
        assoc: &AssociationMapping,
        reason: String,
    ) -> crate::types::HiveError {
        MappingError::BadAssociation {
            entity: self.name.clone(),
            member: assoc.member.clone(),
            reason,
        }
        .into()
    }
}

/// TOML document holding `[[entities]]` declarations.
#[derive(Debug, Default, Deserialize)]
pub struct MappingDocument {
    /// Declared entities.
    #[serde(default)]
    pub entities: Vec<EntityMapping>,
}

/// Immutable, validated set of entity descriptors.
#[derive(Clone, Debug, Default)]
pub struct StaticMapping {
    entities: BTreeMap<String, Arc<EntityMapping>>,
}

impl StaticMapping {
    /// Creates an empty mapping.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an entity after validating its own descriptors.
    pub fn with_entity(mut self, entity: EntityMapping) -> Result<Self> {
        self.insert(entity)?;
        Ok(self)
    }

    fn insert(&mut self, entity: EntityMapping) -> Result<()> {
        entity.validate()?;
        if self.entities.contains_key(&entity.name) {
            return Err(MappingError::DuplicateEntity {
                entity: entity.name,
            }
            .into());
        }
        self.entities.insert(entity.name.clone(), Arc::new(entity));
        Ok(())
    }

    /// Builds a mapping from declarations and checks cross-entity references.
    pub fn from_entities(entities: impl IntoIterator<Item = EntityMapping>) -> Result<Self> {
        let mut mapping = Self::new();
        for entity in entities {
            mapping.insert(entity)?;
        }
        mapping.validate()?;
        Ok(mapping)
    }

    /// Decodes `[[entities]]` tables from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let doc: MappingDocument =
            toml::from_str(text).map_err(|err| MappingError::Decode(err.to_string()))?;
        Self::from_entities(doc.entities)
    }

    /// Checks that every association targets a registered entity member.
    pub fn validate(&self) -> Result<()> {
        for entity in self.entities.values() {
            for assoc in &entity.associations {
                let Some(target) = self.entities.get(&assoc.target) else {
                    return Err(entity.bad_association(
                        assoc,
                        format!("unknown target entity '{}'", assoc.target),
                    ));
                };
                if let Some((_, missing)) = assoc
                    .keys
                    .iter()
                    .find(|(_, other)| target.find_member(other).is_none())
                {
                    return Err(entity.bad_association(
                        assoc,
                        format!("target has no member '{missing}'"),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Returns a copy with `entity` added or replaced.
    pub fn with_replaced(&self, entity: EntityMapping) -> Result<Self> {
        entity.validate()?;
        let mut next = self.clone();
        next.entities.insert(entity.name.clone(), Arc::new(entity));
        Ok(next)
    }

    /// Returns a copy without the entity named `name`.
    pub fn without(&self, name: &str) -> Self {
        let mut next = self.clone();
        next.entities.remove(name);
        next
    }

    /// Number of registered entities.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// True when no entity is registered.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

impl MappingProvider for StaticMapping {
    fn entity(&self, name: &str) -> Result<Arc<EntityMapping>> {
        self.entities.get(name).cloned().ok_or_else(|| {
            MappingError::UnknownEntity {
                entity: name.to_owned(),
            }
            .into()
        })
    }

    fn entity_names(&self) -> Vec<String> {
        self.entities.keys().cloned().collect()
    }
}
