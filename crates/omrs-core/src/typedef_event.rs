//! TypeDef events: changes to the type system shared by the cohort.

use crate::conflict::TypeDefConflict;
use crate::envelope::{EventHeader, Originator};
use crate::model::{AttributeTypeDef, TypeDef, TypeDefPatch, TypeDefSummary};
use crate::vocabulary::{EventCategory, TypeDefErrorCode, TypeDefEventType, WireDescriptor};
use crate::{OmrsError, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum TypeDefEventKind {
    NewTypeDef {
        type_def: TypeDef,
    },
    NewAttributeTypeDef {
        attribute_type_def: AttributeTypeDef,
    },
    /// Updates always travel as a patch against a known version.
    UpdatedTypeDef {
        patch: TypeDefPatch,
    },
    DeletedTypeDef {
        type_def_guid: String,
        type_def_name: String,
    },
    DeletedAttributeTypeDef {
        attribute_type_def_guid: String,
        attribute_type_def_name: String,
    },
    ReIdentifiedTypeDef {
        original_type_def_summary: TypeDefSummary,
        type_def: TypeDef,
    },
    ReIdentifiedAttributeTypeDef {
        original_attribute_type_def: AttributeTypeDef,
        attribute_type_def: AttributeTypeDef,
    },
    TypeDefError {
        conflict: TypeDefConflict,
    },
    Unknown {
        event_type: WireDescriptor,
    },
}

impl TypeDefEventKind {
    pub fn event_type(&self) -> TypeDefEventType {
        match self {
            TypeDefEventKind::NewTypeDef { .. } => TypeDefEventType::NewTypeDef,
            TypeDefEventKind::NewAttributeTypeDef { .. } => TypeDefEventType::NewAttributeTypeDef,
            TypeDefEventKind::UpdatedTypeDef { .. } => TypeDefEventType::UpdatedTypeDef,
            TypeDefEventKind::DeletedTypeDef { .. } => TypeDefEventType::DeletedTypeDef,
            TypeDefEventKind::DeletedAttributeTypeDef { .. } => {
                TypeDefEventType::DeletedAttributeTypeDef
            }
            TypeDefEventKind::ReIdentifiedTypeDef { .. } => TypeDefEventType::ReIdentifiedTypeDef,
            TypeDefEventKind::ReIdentifiedAttributeTypeDef { .. } => {
                TypeDefEventType::ReIdentifiedAttributeTypeDef
            }
            TypeDefEventKind::TypeDefError { .. } => TypeDefEventType::TypeDefError,
            TypeDefEventKind::Unknown { .. } => TypeDefEventType::UnknownTypeDefEvent,
        }
    }

    /// `(guid, name)` of the TypeDef or AttributeTypeDef the event is about.
    pub fn identity(&self) -> Option<(&str, &str)> {
        match self {
            TypeDefEventKind::NewTypeDef { type_def }
            | TypeDefEventKind::ReIdentifiedTypeDef { type_def, .. } => {
                Some((type_def.guid(), type_def.name()))
            }
            TypeDefEventKind::NewAttributeTypeDef { attribute_type_def }
            | TypeDefEventKind::ReIdentifiedAttributeTypeDef {
                attribute_type_def, ..
            } => Some((attribute_type_def.guid.as_str(), attribute_type_def.name.as_str())),
            TypeDefEventKind::UpdatedTypeDef { patch } => {
                Some((patch.type_def_guid.as_str(), patch.type_def_name.as_str()))
            }
            TypeDefEventKind::DeletedTypeDef {
                type_def_guid,
                type_def_name,
            } => Some((type_def_guid.as_str(), type_def_name.as_str())),
            TypeDefEventKind::DeletedAttributeTypeDef {
                attribute_type_def_guid,
                attribute_type_def_name,
            } => Some((
                attribute_type_def_guid.as_str(),
                attribute_type_def_name.as_str(),
            )),
            TypeDefEventKind::TypeDefError { .. } | TypeDefEventKind::Unknown { .. } => None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let event_type = self.event_type();
        if let Some((guid, name)) = self.identity() {
            if guid.trim().is_empty() || name.trim().is_empty() {
                return Err(OmrsError::invalid_event(format!(
                    "{} must identify the type by GUID and name",
                    event_type
                )));
            }
        }

        match self {
            TypeDefEventKind::UpdatedTypeDef { patch } => patch.validate(),
            TypeDefEventKind::ReIdentifiedTypeDef {
                original_type_def_summary,
                type_def,
            } => {
                if original_type_def_summary.matches(type_def.guid(), type_def.name()) {
                    return Err(OmrsError::invalid_event(format!(
                        "{} does not change the identity of {}",
                        event_type,
                        type_def.name()
                    )));
                }
                Ok(())
            }
            TypeDefEventKind::ReIdentifiedAttributeTypeDef {
                original_attribute_type_def,
                attribute_type_def,
            } => {
                if original_attribute_type_def
                    .matches(&attribute_type_def.guid, &attribute_type_def.name)
                {
                    return Err(OmrsError::invalid_event(format!(
                        "{} does not change the identity of {}",
                        event_type, attribute_type_def.name
                    )));
                }
                Ok(())
            }
            TypeDefEventKind::TypeDefError { conflict } => conflict.validate(),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeDefEvent {
    header: EventHeader,
    kind: TypeDefEventKind,
}

impl TypeDefEvent {
    pub fn new(header: EventHeader, kind: TypeDefEventKind) -> Result<Self> {
        header.originator.validate()?;
        kind.validate()?;
        Ok(Self { header, kind })
    }

    pub fn outbound(originator: Originator, kind: TypeDefEventKind) -> Result<Self> {
        Self::new(EventHeader::outbound(originator), kind)
    }

    pub fn category(&self) -> EventCategory {
        EventCategory::TypeDef
    }

    pub fn event_type(&self) -> TypeDefEventType {
        self.kind.event_type()
    }

    pub fn header(&self) -> &EventHeader {
        &self.header
    }

    pub fn originator(&self) -> &Originator {
        &self.header.originator
    }

    pub fn kind(&self) -> &TypeDefEventKind {
        &self.kind
    }

    pub fn into_kind(self) -> TypeDefEventKind {
        self.kind
    }

    pub fn error_code(&self) -> TypeDefErrorCode {
        match &self.kind {
            TypeDefEventKind::TypeDefError { conflict } => conflict.error_code(),
            _ => TypeDefErrorCode::NotInUse,
        }
    }

    pub fn conflict(&self) -> Option<&TypeDefConflict> {
        match &self.kind {
            TypeDefEventKind::TypeDefError { conflict } => Some(conflict),
            _ => None,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self.kind, TypeDefEventKind::Unknown { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflict::TypeDefPatchMismatch;
    use crate::model::AttributeTypeDefCategory;

    fn outbound(kind: TypeDefEventKind) -> Result<TypeDefEvent> {
        TypeDefEvent::outbound(Originator::new("mc-A"), kind)
    }

    fn asset(version: i64) -> TypeDef {
        TypeDef::new(TypeDefSummary::new("t-asset", "Asset", version))
    }

    #[test]
    fn test_type_transitions_are_typedef_events() {
        let events = vec![
            outbound(TypeDefEventKind::NewTypeDef { type_def: asset(1) }).unwrap(),
            outbound(TypeDefEventKind::UpdatedTypeDef {
                patch: TypeDefPatch::new("t-asset", "Asset", 1, 2),
            })
            .unwrap(),
            outbound(TypeDefEventKind::DeletedTypeDef {
                type_def_guid: "t-asset".to_string(),
                type_def_name: "Asset".to_string(),
            })
            .unwrap(),
        ];
        for event in events {
            assert_eq!(event.category(), EventCategory::TypeDef);
            assert_eq!(event.error_code(), TypeDefErrorCode::NotInUse);
        }
    }

    #[test]
    fn test_backwards_patch_rejected() {
        let result = outbound(TypeDefEventKind::UpdatedTypeDef {
            patch: TypeDefPatch::new("t-asset", "Asset", 3, 2),
        });
        assert!(matches!(result, Err(OmrsError::InvalidPatch(_))));
    }

    #[test]
    fn test_delete_needs_both_identifiers() {
        let result = outbound(TypeDefEventKind::DeletedAttributeTypeDef {
            attribute_type_def_guid: "a-string".to_string(),
            attribute_type_def_name: String::new(),
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_reidentify_must_change_identity() {
        assert!(outbound(TypeDefEventKind::ReIdentifiedTypeDef {
            original_type_def_summary: TypeDefSummary::new("t-asset", "Asset", 1),
            type_def: asset(1),
        })
        .is_err());

        let original = AttributeTypeDef::new("a-str", "string", AttributeTypeDefCategory::Primitive);
        let renamed = AttributeTypeDef::new("a-str", "text", AttributeTypeDefCategory::Primitive);
        assert!(outbound(TypeDefEventKind::ReIdentifiedAttributeTypeDef {
            original_attribute_type_def: original,
            attribute_type_def: renamed,
        })
        .is_ok());
    }

    #[test]
    fn test_patch_mismatch_error_event() {
        let mismatch = TypeDefPatchMismatch::new(
            "mc-A",
            TypeDefSummary::new("t-asset", "Asset", 2),
            asset(3),
        );
        let event = outbound(TypeDefEventKind::TypeDefError {
            conflict: TypeDefConflict::PatchMismatch(mismatch),
        })
        .unwrap();

        assert_eq!(event.event_type(), TypeDefEventType::TypeDefError);
        assert_eq!(event.error_code(), TypeDefErrorCode::TypeDefPatchMismatch);
        assert!(!event.conflict().unwrap().error_message().is_empty());
    }
}
