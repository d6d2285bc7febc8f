//! Type definition payloads carried by TypeDef events.

use serde::{Deserialize, Serialize};

use crate::{OmrsError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TypeDefCategory {
    #[default]
    Unknown,
    EntityDef,
    RelationshipDef,
    ClassificationDef,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttributeTypeDefCategory {
    #[default]
    Unknown,
    Primitive,
    Collection,
    EnumDef,
}

/// Identity and version of a TypeDef without its attribute definitions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeDefSummary {
    pub guid: String,
    pub name: String,
    pub version: i64,
    #[serde(default)]
    pub version_name: String,
    #[serde(default)]
    pub category: TypeDefCategory,
}

impl TypeDefSummary {
    pub fn new(guid: impl Into<String>, name: impl Into<String>, version: i64) -> Self {
        Self {
            guid: guid.into(),
            name: name.into(),
            version,
            version_name: format!("{}.0", version),
            category: TypeDefCategory::EntityDef,
        }
    }

    pub fn with_category(mut self, category: TypeDefCategory) -> Self {
        self.category = category;
        self
    }

    /// Either identifier may be stale in a replica's cache, so a match
    /// requires both the GUID and the name to agree.
    pub fn matches(&self, guid: &str, name: &str) -> bool {
        self.guid == guid && self.name == name
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeDefAttribute {
    pub attribute_name: String,
    pub attribute_type_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute_description: Option<String>,
    #[serde(default)]
    pub unique: bool,
}

impl TypeDefAttribute {
    pub fn new(attribute_name: impl Into<String>, attribute_type_name: impl Into<String>) -> Self {
        Self {
            attribute_name: attribute_name.into(),
            attribute_type_name: attribute_type_name.into(),
            attribute_description: None,
            unique: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeDef {
    #[serde(flatten)]
    pub summary: TypeDefSummary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub super_type: Option<TypeDefSummary>,
    #[serde(default)]
    pub property_definitions: Vec<TypeDefAttribute>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub options: serde_json::Map<String, serde_json::Value>,
}

impl TypeDef {
    pub fn new(summary: TypeDefSummary) -> Self {
        Self {
            summary,
            description: None,
            super_type: None,
            property_definitions: Vec::new(),
            options: serde_json::Map::new(),
        }
    }

    pub fn with_attribute(mut self, attribute: TypeDefAttribute) -> Self {
        self.property_definitions.push(attribute);
        self
    }

    pub fn with_super_type(mut self, super_type: TypeDefSummary) -> Self {
        self.super_type = Some(super_type);
        self
    }

    pub fn guid(&self) -> &str {
        &self.summary.guid
    }

    pub fn name(&self) -> &str {
        &self.summary.name
    }

    pub fn version(&self) -> i64 {
        self.summary.version
    }

    /// Apply an incremental patch, producing the next version of this TypeDef.
    ///
    /// Fails when the patch targets a different TypeDef or a different
    /// patch level; the caller reports the latter as a patch mismatch.
    pub fn apply_patch(&self, patch: &TypeDefPatch) -> Result<TypeDef> {
        patch.validate()?;
        if !self.summary.matches(&patch.type_def_guid, &patch.type_def_name) {
            return Err(OmrsError::InvalidPatch(format!(
                "patch for {} ({}) cannot be applied to {} ({})",
                patch.type_def_name, patch.type_def_guid, self.summary.name, self.summary.guid
            )));
        }
        if patch.apply_to_version != self.summary.version {
            return Err(OmrsError::InvalidPatch(format!(
                "patch applies to version {} of {} but the local version is {}",
                patch.apply_to_version, self.summary.name, self.summary.version
            )));
        }

        let mut patched = self.clone();
        patched.summary.version = patch.update_to_version;
        patched.summary.version_name = patch.new_version_name.clone();
        if let Some(description) = &patch.description {
            patched.description = Some(description.clone());
        }
        for attribute in &patch.property_definitions {
            match patched
                .property_definitions
                .iter_mut()
                .find(|existing| existing.attribute_name == attribute.attribute_name)
            {
                Some(existing) => *existing = attribute.clone(),
                None => patched.property_definitions.push(attribute.clone()),
            }
        }
        for (key, value) in &patch.type_def_options {
            patched.options.insert(key.clone(), value.clone());
        }
        Ok(patched)
    }
}

/// Definition of a primitive, collection or enum type used by attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeTypeDef {
    pub guid: String,
    pub name: String,
    pub version: i64,
    #[serde(default)]
    pub category: AttributeTypeDefCategory,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl AttributeTypeDef {
    pub fn new(
        guid: impl Into<String>,
        name: impl Into<String>,
        category: AttributeTypeDefCategory,
    ) -> Self {
        Self {
            guid: guid.into(),
            name: name.into(),
            version: 1,
            category,
            description: None,
        }
    }

    pub fn matches(&self, guid: &str, name: &str) -> bool {
        self.guid == guid && self.name == name
    }
}

/// An incremental change to an existing TypeDef, never a full replacement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeDefPatch {
    pub type_def_guid: String,
    pub type_def_name: String,
    pub apply_to_version: i64,
    pub update_to_version: i64,
    pub new_version_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub property_definitions: Vec<TypeDefAttribute>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub type_def_options: serde_json::Map<String, serde_json::Value>,
}

impl TypeDefPatch {
    pub fn new(
        type_def_guid: impl Into<String>,
        type_def_name: impl Into<String>,
        apply_to_version: i64,
        update_to_version: i64,
    ) -> Self {
        Self {
            type_def_guid: type_def_guid.into(),
            type_def_name: type_def_name.into(),
            apply_to_version,
            update_to_version,
            new_version_name: format!("{}.0", update_to_version),
            description: None,
            property_definitions: Vec::new(),
            type_def_options: serde_json::Map::new(),
        }
    }

    pub fn with_attribute(mut self, attribute: TypeDefAttribute) -> Self {
        self.property_definitions.push(attribute);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.type_def_guid.is_empty() || self.type_def_name.is_empty() {
            return Err(OmrsError::InvalidPatch(
                "patch must identify the TypeDef by GUID and name".to_string(),
            ));
        }
        if self.update_to_version <= self.apply_to_version {
            return Err(OmrsError::InvalidPatch(format!(
                "patch for {} must move forward: {} -> {}",
                self.type_def_name, self.apply_to_version, self.update_to_version
            )));
        }
        Ok(())
    }
}
