//! Instance payloads carried by instance events.
//!
//! These are the cohort-facing shapes of entities, relationships and
//! classifications. The authoritative representation belongs to the
//! repository's store; events only carry copies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::typedef::TypeDefSummary;

/// Property values of an instance, keyed by attribute name.
pub type InstanceProperties = serde_json::Map<String, serde_json::Value>;

/// Fresh GUID for a new or re-identified instance.
pub fn new_guid() -> String {
    Uuid::new_v4().to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceStatus {
    #[default]
    Unknown,
    Draft,
    Proposed,
    Approved,
    Active,
    Deleted,
}

/// Where a copy of an instance came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceProvenance {
    #[default]
    Unknown,
    LocalCohort,
    ExportArchive,
    ContentPack,
    DeregisteredRepository,
    Configuration,
    ExternalSource,
}

/// The type an instance belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceType {
    pub type_def_guid: String,
    pub type_def_name: String,
    pub type_def_version: i64,
}

impl InstanceType {
    pub fn new(
        type_def_guid: impl Into<String>,
        type_def_name: impl Into<String>,
        type_def_version: i64,
    ) -> Self {
        Self {
            type_def_guid: type_def_guid.into(),
            type_def_name: type_def_name.into(),
            type_def_version,
        }
    }

    /// True when both describe the same TypeDef, ignoring version.
    pub fn same_type(&self, other: &InstanceType) -> bool {
        self.type_def_guid == other.type_def_guid && self.type_def_name == other.type_def_name
    }

    pub fn matches_summary(&self, summary: &TypeDefSummary) -> bool {
        summary.matches(&self.type_def_guid, &self.type_def_name)
    }
}

/// Identity and audit header shared by entities, proxies and relationships.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceHeader {
    pub guid: String,
    #[serde(rename = "type")]
    pub instance_type: InstanceType,
    /// Home metadata collection, the authoritative owner.
    pub metadata_collection_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_collection_name: Option<String>,
    #[serde(default)]
    pub instance_provenance_type: InstanceProvenance,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicated_by: Option<String>,
    #[serde(default)]
    pub status: InstanceStatus,
    #[serde(default)]
    pub version: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_time: Option<DateTime<Utc>>,
}

impl InstanceHeader {
    pub fn new(
        guid: impl Into<String>,
        instance_type: InstanceType,
        home_metadata_collection_id: impl Into<String>,
    ) -> Self {
        Self {
            guid: guid.into(),
            instance_type,
            metadata_collection_id: home_metadata_collection_id.into(),
            metadata_collection_name: None,
            instance_provenance_type: InstanceProvenance::LocalCohort,
            replicated_by: None,
            status: InstanceStatus::Active,
            version: 1,
            created_by: None,
            updated_by: None,
            create_time: None,
            update_time: None,
        }
    }
}

/// Accessors every instance payload offers, used to derive event identifiers.
pub trait InstanceIdentity {
    fn header(&self) -> &InstanceHeader;

    fn guid(&self) -> &str {
        &self.header().guid
    }

    fn type_def_guid(&self) -> &str {
        &self.header().instance_type.type_def_guid
    }

    fn type_def_name(&self) -> &str {
        &self.header().instance_type.type_def_name
    }

    fn home_metadata_collection_id(&self) -> &str {
        &self.header().metadata_collection_id
    }

    fn identifiers(&self) -> InstanceIdentifiers {
        InstanceIdentifiers::new(self.type_def_guid(), self.type_def_name(), self.guid())
    }
}

/// The `(typeDefGUID, typeDefName, instanceGUID)` triple used when the full
/// instance is not needed, such as purges and refresh requests.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceIdentifiers {
    pub type_def_guid: String,
    pub type_def_name: String,
    pub instance_guid: String,
}

impl InstanceIdentifiers {
    pub fn new(
        type_def_guid: impl Into<String>,
        type_def_name: impl Into<String>,
        instance_guid: impl Into<String>,
    ) -> Self {
        Self {
            type_def_guid: type_def_guid.into(),
            type_def_name: type_def_name.into(),
            instance_guid: instance_guid.into(),
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.type_def_guid.is_empty()
            && !self.type_def_name.is_empty()
            && !self.instance_guid.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Classification {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[serde(rename = "type")]
    pub classification_type: Option<InstanceType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classification_origin_guid: Option<String>,
    #[serde(default)]
    pub properties: InstanceProperties,
    #[serde(default)]
    pub version: i64,
    #[serde(default)]
    pub status: InstanceStatus,
}

impl Classification {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            classification_type: None,
            classification_origin_guid: None,
            properties: InstanceProperties::new(),
            version: 1,
            status: InstanceStatus::Active,
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityDetail {
    #[serde(flatten)]
    pub header: InstanceHeader,
    #[serde(default)]
    pub properties: InstanceProperties,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub classifications: Vec<Classification>,
}

impl EntityDetail {
    pub fn new(
        guid: impl Into<String>,
        instance_type: InstanceType,
        home_metadata_collection_id: impl Into<String>,
    ) -> Self {
        Self {
            header: InstanceHeader::new(guid, instance_type, home_metadata_collection_id),
            properties: InstanceProperties::new(),
            classifications: Vec::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    pub fn with_version(mut self, version: i64) -> Self {
        self.header.version = version;
        self
    }

    pub fn with_classification(mut self, classification: Classification) -> Self {
        self.classifications.push(classification);
        self
    }

    pub fn classification(&self, name: &str) -> Option<&Classification> {
        self.classifications.iter().find(|c| c.name == name)
    }

    /// Copy of this entity under a fresh GUID, as sent in a re-identified
    /// event. Returns the copy and the GUID it replaces.
    pub fn re_identified(&self) -> (EntityDetail, String) {
        let mut entity = self.clone();
        entity.header.guid = new_guid();
        entity.header.version += 1;
        (entity, self.header.guid.clone())
    }

    /// Reference to this entity suitable for relationship ends.
    pub fn to_proxy(&self) -> EntityProxy {
        EntityProxy {
            header: self.header.clone(),
            unique_properties: InstanceProperties::new(),
            classifications: self.classifications.clone(),
        }
    }
}

impl InstanceIdentity for EntityDetail {
    fn header(&self) -> &InstanceHeader {
        &self.header
    }
}

/// A stub for an entity whose details are held elsewhere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityProxy {
    #[serde(flatten)]
    pub header: InstanceHeader,
    #[serde(default)]
    pub unique_properties: InstanceProperties,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub classifications: Vec<Classification>,
}

impl EntityProxy {
    pub fn new(
        guid: impl Into<String>,
        instance_type: InstanceType,
        home_metadata_collection_id: impl Into<String>,
    ) -> Self {
        Self {
            header: InstanceHeader::new(guid, instance_type, home_metadata_collection_id),
            unique_properties: InstanceProperties::new(),
            classifications: Vec::new(),
        }
    }
}

impl InstanceIdentity for EntityProxy {
    fn header(&self) -> &InstanceHeader {
        &self.header
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Relationship {
    #[serde(flatten)]
    pub header: InstanceHeader,
    #[serde(default)]
    pub properties: InstanceProperties,
    pub entity_one_proxy: EntityProxy,
    pub entity_two_proxy: EntityProxy,
}

impl Relationship {
    pub fn new(
        guid: impl Into<String>,
        instance_type: InstanceType,
        home_metadata_collection_id: impl Into<String>,
        entity_one_proxy: EntityProxy,
        entity_two_proxy: EntityProxy,
    ) -> Self {
        Self {
            header: InstanceHeader::new(guid, instance_type, home_metadata_collection_id),
            properties: InstanceProperties::new(),
            entity_one_proxy,
            entity_two_proxy,
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    pub fn with_version(mut self, version: i64) -> Self {
        self.header.version = version;
        self
    }

    pub fn re_identified(&self) -> (Relationship, String) {
        let mut relationship = self.clone();
        relationship.header.guid = new_guid();
        relationship.header.version += 1;
        (relationship, self.header.guid.clone())
    }

    pub fn connects(&self, entity_guid: &str) -> bool {
        self.entity_one_proxy.guid() == entity_guid || self.entity_two_proxy.guid() == entity_guid
    }
}

impl InstanceIdentity for Relationship {
    fn header(&self) -> &InstanceHeader {
        &self.header
    }
}

/// A set of entities and the relationships between them, transferred in bulk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceGraph {
    #[serde(default)]
    pub entities: Vec<EntityDetail>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
}

impl InstanceGraph {
    pub fn new(entities: Vec<EntityDetail>, relationships: Vec<Relationship>) -> Self {
        Self {
            entities,
            relationships,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relationships.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entities.len() + self.relationships.len()
    }
}
