//! Conflict reports exchanged across the cohort.
//!
//! Conflicts are data, not local errors: they travel in the envelope's
//! conflict block so every member can react. Which side wins a conflict is
//! decided elsewhere; this module only carries the report.

use serde::{Deserialize, Serialize};

use crate::model::{AttributeTypeDef, InstanceProvenance, TypeDef, TypeDefSummary};
use crate::registry_event::RemoteConnection;
use crate::vocabulary::{GenericErrorCode, InstanceErrorCode, RegistryErrorCode, TypeDefErrorCode};
use crate::{OmrsError, Result};

/// The optional error section of the envelope.
///
/// Only present when `generic_error_code` is not `NotInUse`, and never
/// without at least one target or other identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictBlock {
    pub generic_error_code: GenericErrorCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_metadata_collection_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_remote_connection: Option<RemoteConnection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_type_def_summary: Option<TypeDefSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_attribute_type_def: Option<AttributeTypeDef>,
    #[serde(
        rename = "targetInstanceGUID",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub target_instance_guid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub other_metadata_collection_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub other_origin: Option<InstanceProvenance>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub other_type_def_summary: Option<TypeDefSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub other_type_def: Option<TypeDef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub other_attribute_type_def: Option<AttributeTypeDef>,
    #[serde(
        rename = "otherInstanceGUID",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub other_instance_guid: Option<String>,
}

impl ConflictBlock {
    pub fn new(generic_error_code: GenericErrorCode, error_message: impl Into<String>) -> Self {
        Self {
            generic_error_code,
            error_message: Some(error_message.into()),
            target_metadata_collection_id: None,
            target_remote_connection: None,
            target_type_def_summary: None,
            target_attribute_type_def: None,
            target_instance_guid: None,
            other_metadata_collection_id: None,
            other_origin: None,
            other_type_def_summary: None,
            other_type_def: None,
            other_attribute_type_def: None,
            other_instance_guid: None,
        }
    }

    pub fn is_in_use(&self) -> bool {
        self.generic_error_code != GenericErrorCode::NotInUse
    }

    pub fn has_identifiers(&self) -> bool {
        self.target_metadata_collection_id.is_some()
            || self.target_type_def_summary.is_some()
            || self.target_attribute_type_def.is_some()
            || self.target_instance_guid.is_some()
            || self.other_metadata_collection_id.is_some()
            || self.other_type_def_summary.is_some()
            || self.other_type_def.is_some()
            || self.other_attribute_type_def.is_some()
            || self.other_instance_guid.is_some()
    }

    pub fn validate(&self) -> Result<()> {
        if !self.is_in_use() {
            return Err(OmrsError::InvalidConflict(
                "conflict block present but the error code is not in use".to_string(),
            ));
        }
        if !self.has_identifiers() {
            return Err(OmrsError::InvalidConflict(format!(
                "{} report names neither a target nor an other party",
                self.generic_error_code
            )));
        }
        Ok(())
    }

    fn message(&self) -> String {
        self.error_message.clone().unwrap_or_default()
    }
}

fn required<T>(value: Option<T>, field: &str, code: GenericErrorCode) -> Result<T> {
    value.ok_or_else(|| {
        OmrsError::DecodeError(format!("{} conflict block is missing {}", code, field))
    })
}

fn require_message(message: &str, code: impl std::fmt::Display) -> Result<()> {
    if message.trim().is_empty() {
        return Err(OmrsError::InvalidConflict(format!(
            "{} report must carry an error message",
            code
        )));
    }
    Ok(())
}

fn require_id(value: &str, field: &str, code: impl std::fmt::Display) -> Result<()> {
    if value.trim().is_empty() {
        return Err(OmrsError::InvalidConflict(format!(
            "{} report must carry {}",
            code, field
        )));
    }
    Ok(())
}

// =============================================================================
// Instance conflicts
// =============================================================================

/// Two instances share a GUID but have different types.
///
/// Both sides quarantine their reference copies; the home side re-identifies
/// one instance and broadcasts a re-identified event.
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictingInstances {
    pub target_metadata_collection_id: String,
    pub target_type_def: TypeDefSummary,
    pub target_instance_guid: String,
    pub other_metadata_collection_id: String,
    pub other_origin: InstanceProvenance,
    pub other_type_def: TypeDefSummary,
    pub other_instance_guid: String,
    pub error_message: String,
}

/// An instance's TypeDef version disagrees between members.
///
/// Receivers fetch the newer TypeDef before reapplying the instance.
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictingType {
    pub target_metadata_collection_id: String,
    pub target_type_def: TypeDefSummary,
    pub target_instance_guid: String,
    pub other_type_def: TypeDefSummary,
    pub error_message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InvalidInstanceEvent {
    pub target_metadata_collection_id: Option<String>,
    pub target_instance_guid: Option<String>,
    pub error_message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InstanceConflict {
    ConflictingInstances(ConflictingInstances),
    ConflictingType(ConflictingType),
    InvalidEvent(InvalidInstanceEvent),
}

impl InstanceConflict {
    pub fn error_code(&self) -> InstanceErrorCode {
        match self {
            InstanceConflict::ConflictingInstances(_) => InstanceErrorCode::ConflictingInstances,
            InstanceConflict::ConflictingType(_) => InstanceErrorCode::ConflictingType,
            InstanceConflict::InvalidEvent(_) => InstanceErrorCode::InvalidInstanceEvent,
        }
    }

    pub fn generic_error_code(&self) -> GenericErrorCode {
        self.error_code().to_generic()
    }

    pub fn error_message(&self) -> &str {
        match self {
            InstanceConflict::ConflictingInstances(c) => &c.error_message,
            InstanceConflict::ConflictingType(c) => &c.error_message,
            InstanceConflict::InvalidEvent(c) => &c.error_message,
        }
    }

    pub fn target_instance_guid(&self) -> Option<&str> {
        match self {
            InstanceConflict::ConflictingInstances(c) => Some(&c.target_instance_guid),
            InstanceConflict::ConflictingType(c) => Some(&c.target_instance_guid),
            InstanceConflict::InvalidEvent(c) => c.target_instance_guid.as_deref(),
        }
    }

    pub fn target_type_def(&self) -> Option<&TypeDefSummary> {
        match self {
            InstanceConflict::ConflictingInstances(c) => Some(&c.target_type_def),
            InstanceConflict::ConflictingType(c) => Some(&c.target_type_def),
            InstanceConflict::InvalidEvent(_) => None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let code = self.error_code();
        require_message(self.error_message(), code)?;
        match self {
            InstanceConflict::ConflictingInstances(c) => {
                require_id(&c.target_metadata_collection_id, "a target metadata collection id", code)?;
                require_id(&c.other_metadata_collection_id, "an other metadata collection id", code)?;
                require_id(&c.target_instance_guid, "a target instance GUID", code)?;
                require_id(&c.other_instance_guid, "an other instance GUID", code)?;
                if c.target_metadata_collection_id == c.other_metadata_collection_id {
                    return Err(OmrsError::InvalidConflict(format!(
                        "{} report names the same metadata collection {} on both sides",
                        code, c.target_metadata_collection_id
                    )));
                }
            }
            InstanceConflict::ConflictingType(c) => {
                require_id(&c.target_metadata_collection_id, "a target metadata collection id", code)?;
                require_id(&c.target_instance_guid, "a target instance GUID", code)?;
                if c.target_type_def == c.other_type_def {
                    return Err(OmrsError::InvalidConflict(format!(
                        "{} report carries identical TypeDefs on both sides",
                        code
                    )));
                }
            }
            InstanceConflict::InvalidEvent(c) => {
                if c.target_metadata_collection_id.is_none() && c.target_instance_guid.is_none() {
                    return Err(OmrsError::InvalidConflict(format!(
                        "{} report names neither a metadata collection nor an instance",
                        code
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn to_block(&self) -> ConflictBlock {
        let mut block = ConflictBlock::new(self.generic_error_code(), self.error_message());
        match self {
            InstanceConflict::ConflictingInstances(c) => {
                block.target_metadata_collection_id = Some(c.target_metadata_collection_id.clone());
                block.target_type_def_summary = Some(c.target_type_def.clone());
                block.target_instance_guid = Some(c.target_instance_guid.clone());
                block.other_metadata_collection_id = Some(c.other_metadata_collection_id.clone());
                block.other_origin = Some(c.other_origin);
                block.other_type_def_summary = Some(c.other_type_def.clone());
                block.other_instance_guid = Some(c.other_instance_guid.clone());
            }
            InstanceConflict::ConflictingType(c) => {
                block.target_metadata_collection_id = Some(c.target_metadata_collection_id.clone());
                block.target_type_def_summary = Some(c.target_type_def.clone());
                block.target_instance_guid = Some(c.target_instance_guid.clone());
                block.other_type_def_summary = Some(c.other_type_def.clone());
            }
            InstanceConflict::InvalidEvent(c) => {
                block.target_metadata_collection_id = c.target_metadata_collection_id.clone();
                block.target_instance_guid = c.target_instance_guid.clone();
            }
        }
        block
    }

    /// Rebuild the typed report; returns `None` for error codes this member
    /// does not recognize.
    pub fn from_block(block: &ConflictBlock) -> Result<Option<Self>> {
        let code = block.generic_error_code;
        let conflict = match InstanceErrorCode::from(code) {
            InstanceErrorCode::ConflictingInstances => {
                InstanceConflict::ConflictingInstances(ConflictingInstances {
                    target_metadata_collection_id: required(
                        block.target_metadata_collection_id.clone(),
                        "targetMetadataCollectionId",
                        code,
                    )?,
                    target_type_def: required(
                        block.target_type_def_summary.clone(),
                        "targetTypeDefSummary",
                        code,
                    )?,
                    target_instance_guid: required(
                        block.target_instance_guid.clone(),
                        "targetInstanceGUID",
                        code,
                    )?,
                    other_metadata_collection_id: required(
                        block.other_metadata_collection_id.clone(),
                        "otherMetadataCollectionId",
                        code,
                    )?,
                    other_origin: block.other_origin.unwrap_or_default(),
                    other_type_def: required(
                        block.other_type_def_summary.clone(),
                        "otherTypeDefSummary",
                        code,
                    )?,
                    other_instance_guid: required(
                        block.other_instance_guid.clone(),
                        "otherInstanceGUID",
                        code,
                    )?,
                    error_message: block.message(),
                })
            }
            InstanceErrorCode::ConflictingType => InstanceConflict::ConflictingType(ConflictingType {
                target_metadata_collection_id: required(
                    block.target_metadata_collection_id.clone(),
                    "targetMetadataCollectionId",
                    code,
                )?,
                target_type_def: required(
                    block.target_type_def_summary.clone(),
                    "targetTypeDefSummary",
                    code,
                )?,
                target_instance_guid: required(
                    block.target_instance_guid.clone(),
                    "targetInstanceGUID",
                    code,
                )?,
                other_type_def: required(
                    block.other_type_def_summary.clone(),
                    "otherTypeDefSummary",
                    code,
                )?,
                error_message: block.message(),
            }),
            InstanceErrorCode::InvalidInstanceEvent => {
                InstanceConflict::InvalidEvent(InvalidInstanceEvent {
                    target_metadata_collection_id: block.target_metadata_collection_id.clone(),
                    target_instance_guid: block.target_instance_guid.clone(),
                    error_message: block.message(),
                })
            }
            InstanceErrorCode::NotInUse | InstanceErrorCode::Unknown => return Ok(None),
        };
        Ok(Some(conflict))
    }
}

// =============================================================================
// TypeDef conflicts
// =============================================================================

/// Two different TypeDefs claim the same identity.
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictingTypeDefs {
    pub target_metadata_collection_id: String,
    pub target_type_def: TypeDefSummary,
    pub other_metadata_collection_id: String,
    pub other_type_def: TypeDefSummary,
    pub error_message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConflictingAttributeTypeDefs {
    pub target_metadata_collection_id: String,
    pub target_attribute_type_def: AttributeTypeDef,
    pub other_metadata_collection_id: String,
    pub other_attribute_type_def: AttributeTypeDef,
    pub error_message: String,
}

/// Two members hold different patch levels of the same TypeDef.
///
/// Replicas converge on the highest compatible patch level.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeDefPatchMismatch {
    pub target_metadata_collection_id: String,
    pub target_type_def: TypeDefSummary,
    pub other_type_def: TypeDef,
    pub error_message: String,
}

impl TypeDefPatchMismatch {
    /// Build a report with a generated error message.
    pub fn new(
        target_metadata_collection_id: impl Into<String>,
        target_type_def: TypeDefSummary,
        other_type_def: TypeDef,
    ) -> Self {
        let target_metadata_collection_id = target_metadata_collection_id.into();
        let error_message = format!(
            "TypeDef {} ({}) is at version {} in metadata collection {} but version {} was received",
            target_type_def.name,
            target_type_def.guid,
            target_type_def.version,
            target_metadata_collection_id,
            other_type_def.version()
        );
        Self {
            target_metadata_collection_id,
            target_type_def,
            other_type_def,
            error_message,
        }
    }

    /// The higher of the two patch levels, which both sides converge on.
    pub fn highest_version(&self) -> i64 {
        self.target_type_def.version.max(self.other_type_def.version())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InvalidTypeDefEvent {
    pub target_metadata_collection_id: Option<String>,
    pub target_type_def: Option<TypeDefSummary>,
    pub error_message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypeDefConflict {
    ConflictingTypeDefs(ConflictingTypeDefs),
    ConflictingAttributeTypeDefs(ConflictingAttributeTypeDefs),
    PatchMismatch(TypeDefPatchMismatch),
    InvalidEvent(InvalidTypeDefEvent),
}

impl TypeDefConflict {
    pub fn error_code(&self) -> TypeDefErrorCode {
        match self {
            TypeDefConflict::ConflictingTypeDefs(_) => TypeDefErrorCode::ConflictingTypeDefs,
            TypeDefConflict::ConflictingAttributeTypeDefs(_) => {
                TypeDefErrorCode::ConflictingAttributeTypeDefs
            }
            TypeDefConflict::PatchMismatch(_) => TypeDefErrorCode::TypeDefPatchMismatch,
            TypeDefConflict::InvalidEvent(_) => TypeDefErrorCode::InvalidTypeDefEvent,
        }
    }

    pub fn generic_error_code(&self) -> GenericErrorCode {
        self.error_code().to_generic()
    }

    pub fn error_message(&self) -> &str {
        match self {
            TypeDefConflict::ConflictingTypeDefs(c) => &c.error_message,
            TypeDefConflict::ConflictingAttributeTypeDefs(c) => &c.error_message,
            TypeDefConflict::PatchMismatch(c) => &c.error_message,
            TypeDefConflict::InvalidEvent(c) => &c.error_message,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let code = self.error_code();
        require_message(self.error_message(), code)?;
        match self {
            TypeDefConflict::ConflictingTypeDefs(c) => {
                require_id(&c.target_metadata_collection_id, "a target metadata collection id", code)?;
                require_id(&c.other_metadata_collection_id, "an other metadata collection id", code)?;
            }
            TypeDefConflict::ConflictingAttributeTypeDefs(c) => {
                require_id(&c.target_metadata_collection_id, "a target metadata collection id", code)?;
                require_id(&c.other_metadata_collection_id, "an other metadata collection id", code)?;
            }
            TypeDefConflict::PatchMismatch(c) => {
                require_id(&c.target_metadata_collection_id, "a target metadata collection id", code)?;
                if !c
                    .target_type_def
                    .matches(c.other_type_def.guid(), c.other_type_def.name())
                {
                    return Err(OmrsError::InvalidConflict(format!(
                        "{} report compares different TypeDefs {} and {}",
                        code,
                        c.target_type_def.name,
                        c.other_type_def.name()
                    )));
                }
                if c.target_type_def.version == c.other_type_def.version() {
                    return Err(OmrsError::InvalidConflict(format!(
                        "{} report carries the same version {} on both sides",
                        code, c.target_type_def.version
                    )));
                }
            }
            TypeDefConflict::InvalidEvent(c) => {
                if c.target_metadata_collection_id.is_none() && c.target_type_def.is_none() {
                    return Err(OmrsError::InvalidConflict(format!(
                        "{} report names neither a metadata collection nor a TypeDef",
                        code
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn to_block(&self) -> ConflictBlock {
        let mut block = ConflictBlock::new(self.generic_error_code(), self.error_message());
        match self {
            TypeDefConflict::ConflictingTypeDefs(c) => {
                block.target_metadata_collection_id = Some(c.target_metadata_collection_id.clone());
                block.target_type_def_summary = Some(c.target_type_def.clone());
                block.other_metadata_collection_id = Some(c.other_metadata_collection_id.clone());
                block.other_type_def_summary = Some(c.other_type_def.clone());
            }
            TypeDefConflict::ConflictingAttributeTypeDefs(c) => {
                block.target_metadata_collection_id = Some(c.target_metadata_collection_id.clone());
                block.target_attribute_type_def = Some(c.target_attribute_type_def.clone());
                block.other_metadata_collection_id = Some(c.other_metadata_collection_id.clone());
                block.other_attribute_type_def = Some(c.other_attribute_type_def.clone());
            }
            TypeDefConflict::PatchMismatch(c) => {
                block.target_metadata_collection_id = Some(c.target_metadata_collection_id.clone());
                block.target_type_def_summary = Some(c.target_type_def.clone());
                block.other_type_def = Some(c.other_type_def.clone());
            }
            TypeDefConflict::InvalidEvent(c) => {
                block.target_metadata_collection_id = c.target_metadata_collection_id.clone();
                block.target_type_def_summary = c.target_type_def.clone();
            }
        }
        block
    }

    pub fn from_block(block: &ConflictBlock) -> Result<Option<Self>> {
        let code = block.generic_error_code;
        let conflict = match TypeDefErrorCode::from(code) {
            TypeDefErrorCode::ConflictingTypeDefs => {
                TypeDefConflict::ConflictingTypeDefs(ConflictingTypeDefs {
                    target_metadata_collection_id: required(
                        block.target_metadata_collection_id.clone(),
                        "targetMetadataCollectionId",
                        code,
                    )?,
                    target_type_def: required(
                        block.target_type_def_summary.clone(),
                        "targetTypeDefSummary",
                        code,
                    )?,
                    other_metadata_collection_id: required(
                        block.other_metadata_collection_id.clone(),
                        "otherMetadataCollectionId",
                        code,
                    )?,
                    other_type_def: required(
                        block.other_type_def_summary.clone(),
                        "otherTypeDefSummary",
                        code,
                    )?,
                    error_message: block.message(),
                })
            }
            TypeDefErrorCode::ConflictingAttributeTypeDefs => {
                TypeDefConflict::ConflictingAttributeTypeDefs(ConflictingAttributeTypeDefs {
                    target_metadata_collection_id: required(
                        block.target_metadata_collection_id.clone(),
                        "targetMetadataCollectionId",
                        code,
                    )?,
                    target_attribute_type_def: required(
                        block.target_attribute_type_def.clone(),
                        "targetAttributeTypeDef",
                        code,
                    )?,
                    other_metadata_collection_id: required(
                        block.other_metadata_collection_id.clone(),
                        "otherMetadataCollectionId",
                        code,
                    )?,
                    other_attribute_type_def: required(
                        block.other_attribute_type_def.clone(),
                        "otherAttributeTypeDef",
                        code,
                    )?,
                    error_message: block.message(),
                })
            }
            TypeDefErrorCode::TypeDefPatchMismatch => {
                TypeDefConflict::PatchMismatch(TypeDefPatchMismatch {
                    target_metadata_collection_id: required(
                        block.target_metadata_collection_id.clone(),
                        "targetMetadataCollectionId",
                        code,
                    )?,
                    target_type_def: required(
                        block.target_type_def_summary.clone(),
                        "targetTypeDefSummary",
                        code,
                    )?,
                    other_type_def: required(block.other_type_def.clone(), "otherTypeDef", code)?,
                    error_message: block.message(),
                })
            }
            TypeDefErrorCode::InvalidTypeDefEvent => {
                TypeDefConflict::InvalidEvent(InvalidTypeDefEvent {
                    target_metadata_collection_id: block.target_metadata_collection_id.clone(),
                    target_type_def: block.target_type_def_summary.clone(),
                    error_message: block.message(),
                })
            }
            TypeDefErrorCode::NotInUse | TypeDefErrorCode::Unknown => return Ok(None),
        };
        Ok(Some(conflict))
    }
}

// =============================================================================
// Registry conflicts
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum RegistryConflict {
    /// One side must regenerate its metadata collection id; events from
    /// either member are unreliable until then.
    ConflictingCollectionId {
        target_metadata_collection_id: String,
        error_message: String,
    },
    /// The member is treated as unreachable until it republishes.
    BadRemoteConnection {
        target_metadata_collection_id: String,
        target_remote_connection: Option<RemoteConnection>,
        error_message: String,
    },
    InvalidEvent {
        target_metadata_collection_id: Option<String>,
        error_message: String,
    },
}

impl RegistryConflict {
    pub fn error_code(&self) -> RegistryErrorCode {
        match self {
            RegistryConflict::ConflictingCollectionId { .. } => {
                RegistryErrorCode::ConflictingCollectionId
            }
            RegistryConflict::BadRemoteConnection { .. } => RegistryErrorCode::BadRemoteConnection,
            RegistryConflict::InvalidEvent { .. } => RegistryErrorCode::InvalidRegistryEvent,
        }
    }

    pub fn generic_error_code(&self) -> GenericErrorCode {
        self.error_code().to_generic()
    }

    pub fn error_message(&self) -> &str {
        match self {
            RegistryConflict::ConflictingCollectionId { error_message, .. }
            | RegistryConflict::BadRemoteConnection { error_message, .. }
            | RegistryConflict::InvalidEvent { error_message, .. } => error_message,
        }
    }

    pub fn target_metadata_collection_id(&self) -> Option<&str> {
        match self {
            RegistryConflict::ConflictingCollectionId {
                target_metadata_collection_id,
                ..
            }
            | RegistryConflict::BadRemoteConnection {
                target_metadata_collection_id,
                ..
            } => Some(target_metadata_collection_id),
            RegistryConflict::InvalidEvent {
                target_metadata_collection_id,
                ..
            } => target_metadata_collection_id.as_deref(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let code = self.error_code();
        require_message(self.error_message(), code)?;
        match self.target_metadata_collection_id() {
            Some(id) => require_id(id, "a target metadata collection id", code),
            None => Err(OmrsError::InvalidConflict(format!(
                "{} report does not name a metadata collection",
                code
            ))),
        }
    }

    pub fn to_block(&self) -> ConflictBlock {
        let mut block = ConflictBlock::new(self.generic_error_code(), self.error_message());
        block.target_metadata_collection_id = self.target_metadata_collection_id().map(String::from);
        if let RegistryConflict::BadRemoteConnection {
            target_remote_connection,
            ..
        } = self
        {
            block.target_remote_connection = target_remote_connection.clone();
        }
        block
    }

    pub fn from_block(block: &ConflictBlock) -> Result<Option<Self>> {
        let code = block.generic_error_code;
        let conflict = match RegistryErrorCode::from(code) {
            RegistryErrorCode::ConflictingCollectionId => RegistryConflict::ConflictingCollectionId {
                target_metadata_collection_id: required(
                    block.target_metadata_collection_id.clone(),
                    "targetMetadataCollectionId",
                    code,
                )?,
                error_message: block.message(),
            },
            RegistryErrorCode::BadRemoteConnection => RegistryConflict::BadRemoteConnection {
                target_metadata_collection_id: required(
                    block.target_metadata_collection_id.clone(),
                    "targetMetadataCollectionId",
                    code,
                )?,
                target_remote_connection: block.target_remote_connection.clone(),
                error_message: block.message(),
            },
            RegistryErrorCode::InvalidRegistryEvent => RegistryConflict::InvalidEvent {
                target_metadata_collection_id: block.target_metadata_collection_id.clone(),
                error_message: block.message(),
            },
            RegistryErrorCode::NotInUse | RegistryErrorCode::Unknown => return Ok(None),
        };
        Ok(Some(conflict))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asset_summary(version: i64) -> TypeDefSummary {
        TypeDefSummary::new("t-asset", "Asset", version)
    }

    fn conflicting_instances() -> ConflictingInstances {
        ConflictingInstances {
            target_metadata_collection_id: "mc-A".to_string(),
            target_type_def: asset_summary(1),
            target_instance_guid: "e2".to_string(),
            other_metadata_collection_id: "mc-B".to_string(),
            other_origin: InstanceProvenance::LocalCohort,
            other_type_def: TypeDefSummary::new("t-process", "Process", 1),
            other_instance_guid: "e2".to_string(),
            error_message: "GUID e2 is used for an Asset and a Process".to_string(),
        }
    }

    #[test]
    fn test_conflicting_instances_report() {
        let conflict = InstanceConflict::ConflictingInstances(conflicting_instances());
        conflict.validate().unwrap();

        assert_eq!(conflict.error_code(), InstanceErrorCode::ConflictingInstances);
        assert_eq!(
            conflict.generic_error_code(),
            GenericErrorCode::ConflictingInstances
        );

        let block = conflict.to_block();
        assert!(block.is_in_use());
        assert_eq!(block.target_metadata_collection_id.as_deref(), Some("mc-A"));
        assert_eq!(block.other_metadata_collection_id.as_deref(), Some("mc-B"));
        assert_ne!(
            block.target_metadata_collection_id,
            block.other_metadata_collection_id
        );
        assert_eq!(InstanceConflict::from_block(&block).unwrap(), Some(conflict));
    }

    #[test]
    fn test_conflicting_instances_rejects_same_collection() {
        let mut report = conflicting_instances();
        report.other_metadata_collection_id = "mc-A".to_string();
        let result = InstanceConflict::ConflictingInstances(report).validate();
        assert!(matches!(result, Err(OmrsError::InvalidConflict(_))));
    }

    #[test]
    fn test_conflict_requires_message() {
        let mut report = conflicting_instances();
        report.error_message = " ".to_string();
        assert!(InstanceConflict::ConflictingInstances(report).validate().is_err());
    }

    #[test]
    fn test_invalid_event_requires_an_identifier() {
        let conflict = InstanceConflict::InvalidEvent(InvalidInstanceEvent {
            target_metadata_collection_id: None,
            target_instance_guid: None,
            error_message: "unparseable".to_string(),
        });
        assert!(conflict.validate().is_err());
    }

    #[test]
    fn test_patch_mismatch_message() {
        let other = TypeDef::new(asset_summary(3));
        let mismatch = TypeDefPatchMismatch::new("mc-A", asset_summary(2), other);

        assert!(!mismatch.error_message.is_empty());
        assert!(mismatch.error_message.contains("version 2"));
        assert_eq!(mismatch.highest_version(), 3);

        let conflict = TypeDefConflict::PatchMismatch(mismatch);
        conflict.validate().unwrap();
        assert_eq!(
            conflict.generic_error_code(),
            GenericErrorCode::TypeDefPatchMismatch
        );
    }

    #[test]
    fn test_patch_mismatch_requires_same_typedef() {
        let other = TypeDef::new(TypeDefSummary::new("t-process", "Process", 3));
        let conflict =
            TypeDefConflict::PatchMismatch(TypeDefPatchMismatch::new("mc-A", asset_summary(2), other));
        assert!(conflict.validate().is_err());
    }

    #[test]
    fn test_block_without_identifiers_is_invalid() {
        let block = ConflictBlock::new(GenericErrorCode::ConflictingType, "oops");
        assert!(block.validate().is_err());

        let mut not_in_use = ConflictBlock::new(GenericErrorCode::NotInUse, "");
        not_in_use.target_instance_guid = Some("e1".to_string());
        assert!(not_in_use.validate().is_err());
    }

    #[test]
    fn test_from_block_missing_field() {
        let mut block = ConflictBlock::new(GenericErrorCode::ConflictingType, "skew");
        block.target_metadata_collection_id = Some("mc-A".to_string());
        let result = InstanceConflict::from_block(&block);
        assert!(matches!(result, Err(OmrsError::DecodeError(_))));
    }

    #[test]
    fn test_from_block_foreign_code() {
        let mut block = ConflictBlock::new(GenericErrorCode::ConflictingCollectionId, "dup");
        block.target_metadata_collection_id = Some("mc-A".to_string());

        assert_eq!(InstanceConflict::from_block(&block).unwrap(), None);
        let registry = RegistryConflict::from_block(&block).unwrap().unwrap();
        assert_eq!(registry.error_code(), RegistryErrorCode::ConflictingCollectionId);
    }
}
