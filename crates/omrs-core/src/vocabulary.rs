//! Self-describing enumerations shared by every cohort event.
//!
//! Each value carries an ordinal, a short name and a description. Only the
//! ordinal is significant when decoding: a value this binary does not know
//! resolves to the enumeration's unknown sentinel instead of failing, so
//! members running different software levels can share one cohort.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Static metadata for one enumerated value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Descriptor {
    pub ordinal: i32,
    pub name: &'static str,
    pub description: &'static str,
}

/// The `{ordinal, name, description}` triple as it travels on the wire.
///
/// Receivers keep the raw triple for values they cannot resolve so the
/// value can still be rendered in logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireDescriptor {
    pub ordinal: i32,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
}

impl WireDescriptor {
    /// Resolve the triple against a local vocabulary.
    pub fn resolve<T: EventVocabulary>(&self) -> T {
        T::from_ordinal(self.ordinal)
    }
}

impl From<Descriptor> for WireDescriptor {
    fn from(descriptor: Descriptor) -> Self {
        Self {
            ordinal: descriptor.ordinal,
            name: descriptor.name.to_string(),
            description: descriptor.description.to_string(),
        }
    }
}

impl fmt::Display for WireDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name.is_empty() {
            write!(f, "#{}", self.ordinal)
        } else {
            write!(f, "{} (#{})", self.name, self.ordinal)
        }
    }
}

/// Behaviour shared by all enumerations defined with `event_vocabulary!`.
pub trait EventVocabulary: Copy + Sized + 'static {
    /// Every defined value, excluding the unknown sentinel.
    fn values() -> &'static [Self];

    fn descriptor(&self) -> Descriptor;

    /// Resolve an ordinal, falling back to the unknown sentinel.
    fn from_ordinal(ordinal: i32) -> Self;

    fn is_unknown(&self) -> bool;

    fn to_wire(&self) -> WireDescriptor {
        self.descriptor().into()
    }
}

macro_rules! event_vocabulary {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $(
                $(#[$vmeta:meta])*
                $variant:ident = ($ord:literal, $vname:literal, $desc:literal),
            )+
        }
        unknown = $unknown:ident ($uord:literal, $uname:literal, $udesc:literal);
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $(
                $(#[$vmeta])*
                $variant,
            )+
            /// Value not recognized by this software level.
            $unknown,
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub const fn descriptor(&self) -> Descriptor {
                match self {
                    $(
                        $name::$variant => Descriptor {
                            ordinal: $ord,
                            name: $vname,
                            description: $desc,
                        },
                    )+
                    $name::$unknown => Descriptor {
                        ordinal: $uord,
                        name: $uname,
                        description: $udesc,
                    },
                }
            }

            pub const fn ordinal(&self) -> i32 {
                self.descriptor().ordinal
            }

            pub const fn name(&self) -> &'static str {
                self.descriptor().name
            }

            pub const fn description(&self) -> &'static str {
                self.descriptor().description
            }

            pub fn from_ordinal(ordinal: i32) -> Self {
                match ordinal {
                    $($ord => $name::$variant,)+
                    _ => $name::$unknown,
                }
            }

            pub fn from_name(name: &str) -> Self {
                Self::ALL
                    .iter()
                    .copied()
                    .find(|value| value.name() == name)
                    .unwrap_or($name::$unknown)
            }

            pub const fn is_unknown(&self) -> bool {
                matches!(self, $name::$unknown)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                $name::$unknown
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.name())
            }
        }

        impl EventVocabulary for $name {
            fn values() -> &'static [Self] {
                Self::ALL
            }

            fn descriptor(&self) -> Descriptor {
                $name::descriptor(self)
            }

            fn from_ordinal(ordinal: i32) -> Self {
                $name::from_ordinal(ordinal)
            }

            fn is_unknown(&self) -> bool {
                $name::is_unknown(self)
            }
        }

        impl Serialize for $name {
            fn serialize<S: serde::Serializer>(
                &self,
                serializer: S,
            ) -> std::result::Result<S::Ok, S::Error> {
                WireDescriptor::from(self.descriptor()).serialize(serializer)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: serde::Deserializer<'de>>(
                deserializer: D,
            ) -> std::result::Result<Self, D::Error> {
                let wire = WireDescriptor::deserialize(deserializer)?;
                Ok($name::from_ordinal(wire.ordinal))
            }
        }
    };
}

event_vocabulary! {
    /// Which section of the envelope carries the payload.
    pub enum EventCategory {
        Registry = (1, "RegistryEvent", "Event used to manage the membership of the metadata repository cohort."),
        TypeDef = (2, "TypeDefEvent", "Event used to manage the type definitions known across the cohort."),
        Instance = (3, "InstanceEvent", "Event used to replicate metadata instances across the cohort."),
        Generic = (99, "GenericEvent", "Event that is not tied to a registry, type or instance change."),
    }
    unknown = Unknown(0, "UnknownEvent", "Event category not recognized by this member.");
}

event_vocabulary! {
    pub enum EventDirection {
        Inbound = (1, "InboundEvent", "Event received from another member of the cohort."),
        Outbound = (2, "OutboundEvent", "Event sent by this member to the rest of the cohort."),
    }
    unknown = Unknown(0, "UnknownDirection", "Direction of the event is not known.");
}

event_vocabulary! {
    /// Version of the envelope layout.
    pub enum EventProtocolVersion {
        V1 = (1, "V1", "Initial protocol level of the cohort event envelope."),
    }
    unknown = Unknown(0, "UnknownProtocolVersion", "Protocol level not supported by this member.");
}

event_vocabulary! {
    /// Error codes carried in the envelope's conflict block, shared by all categories.
    pub enum GenericErrorCode {
        NotInUse = (0, "NotInUse", "No error has been detected, so the error code is not in use."),
        ConflictingCollectionId = (1, "ConflictingCollectionId", "Two members of the cohort are using the same metadata collection id."),
        BadRemoteConnection = (2, "BadRemoteConnection", "The remote connection published by a member does not produce a usable connector."),
        ConflictingTypeDefs = (3, "ConflictingTypeDefs", "Two different type definitions claim the same identity."),
        ConflictingAttributeTypeDefs = (4, "ConflictingAttributeTypeDefs", "Two different attribute type definitions claim the same identity."),
        TypeDefPatchMismatch = (5, "TypeDefPatchMismatch", "Two members hold different patch levels of the same type definition."),
        InvalidEventFormat = (6, "InvalidEventFormat", "The event could not be parsed."),
        InvalidRegistryEvent = (7, "InvalidRegistryEvent", "The registry event is incomplete or inconsistent."),
        InvalidTypeDefEvent = (8, "InvalidTypeDefEvent", "The type definition event is incomplete or inconsistent."),
        InvalidInstanceEvent = (9, "InvalidInstanceEvent", "The instance event is incomplete or inconsistent."),
        ConflictingInstances = (10, "ConflictingInstances", "Two instances share a unique identifier but have different types."),
        ConflictingType = (11, "ConflictingType", "The version of an instance's type definition differs between members."),
    }
    unknown = Unknown(99, "UnknownErrorCode", "Error code not recognized by this member.");
}

event_vocabulary! {
    pub enum InstanceErrorCode {
        NotInUse = (0, "NotInUse", "No error has been detected, so the error code is not in use."),
        ConflictingInstances = (1, "ConflictingInstances", "Two instances share a unique identifier but have different types."),
        ConflictingType = (2, "ConflictingType", "The version of an instance's type definition differs between members."),
        InvalidInstanceEvent = (3, "InvalidInstanceEvent", "The instance event is incomplete or inconsistent."),
    }
    unknown = Unknown(99, "UnknownInstanceErrorCode", "Instance error code not recognized by this member.");
}

event_vocabulary! {
    pub enum TypeDefErrorCode {
        NotInUse = (0, "NotInUse", "No error has been detected, so the error code is not in use."),
        ConflictingTypeDefs = (1, "ConflictingTypeDefs", "Two different type definitions claim the same identity."),
        ConflictingAttributeTypeDefs = (2, "ConflictingAttributeTypeDefs", "Two different attribute type definitions claim the same identity."),
        TypeDefPatchMismatch = (3, "TypeDefPatchMismatch", "Two members hold different patch levels of the same type definition."),
        InvalidTypeDefEvent = (4, "InvalidTypeDefEvent", "The type definition event is incomplete or inconsistent."),
    }
    unknown = Unknown(99, "UnknownTypeDefErrorCode", "TypeDef error code not recognized by this member.");
}

event_vocabulary! {
    pub enum RegistryErrorCode {
        NotInUse = (0, "NotInUse", "No error has been detected, so the error code is not in use."),
        ConflictingCollectionId = (1, "ConflictingCollectionId", "Two members of the cohort are using the same metadata collection id."),
        BadRemoteConnection = (2, "BadRemoteConnection", "The remote connection published by a member does not produce a usable connector."),
        InvalidRegistryEvent = (3, "InvalidRegistryEvent", "The registry event is incomplete or inconsistent."),
    }
    unknown = Unknown(99, "UnknownRegistryErrorCode", "Registry error code not recognized by this member.");
}

event_vocabulary! {
    /// Lifecycle transitions of entities and relationships.
    pub enum InstanceEventType {
        NewEntity = (1, "NewEntity", "A new entity has been created."),
        UpdatedEntity = (2, "UpdatedEntity", "An existing entity has been updated."),
        ClassifiedEntity = (3, "ClassifiedEntity", "A classification has been added to an entity."),
        ReclassifiedEntity = (4, "ReclassifiedEntity", "An entity's classification has been changed."),
        DeclassifiedEntity = (5, "DeclassifiedEntity", "A classification has been removed from an entity."),
        DeletedEntity = (6, "DeletedEntity", "An entity has been soft-deleted and is hidden from queries."),
        PurgedEntity = (7, "PurgedEntity", "An entity has been permanently removed."),
        UndoneEntity = (8, "UndoneEntity", "An update to an entity has been reverted to an earlier version."),
        RestoredEntity = (9, "RestoredEntity", "A soft-deleted entity has been restored to its state before deletion."),
        RefreshEntityRequest = (10, "RefreshEntityRequest", "The home repository is asked to resend the current state of an entity."),
        RefreshedEntity = (11, "RefreshedEntity", "The home repository resends the current state of an entity."),
        ReHomedEntity = (12, "ReHomedEntity", "The home metadata collection of an entity has changed."),
        ReTypedEntity = (13, "ReTypedEntity", "The type of an entity has changed."),
        ReIdentifiedEntity = (14, "ReIdentifiedEntity", "The unique identifier of an entity has changed."),
        NewRelationship = (15, "NewRelationship", "A new relationship has been created."),
        UpdatedRelationship = (16, "UpdatedRelationship", "An existing relationship has been updated."),
        DeletedRelationship = (17, "DeletedRelationship", "A relationship has been soft-deleted and is hidden from queries."),
        PurgedRelationship = (18, "PurgedRelationship", "A relationship has been permanently removed."),
        UndoneRelationship = (19, "UndoneRelationship", "An update to a relationship has been reverted to an earlier version."),
        RestoredRelationship = (20, "RestoredRelationship", "A soft-deleted relationship has been restored to its state before deletion."),
        RefreshRelationshipRequest = (21, "RefreshRelationshipRequest", "The home repository is asked to resend the current state of a relationship."),
        RefreshedRelationship = (22, "RefreshedRelationship", "The home repository resends the current state of a relationship."),
        ReIdentifiedRelationship = (23, "ReIdentifiedRelationship", "The unique identifier of a relationship has changed."),
        ReHomedRelationship = (24, "ReHomedRelationship", "The home metadata collection of a relationship has changed."),
        ReTypedRelationship = (25, "ReTypedRelationship", "The type of a relationship has changed."),
        BatchInstances = (26, "BatchInstances", "A graph of entities and relationships is being transferred in bulk."),
        DeletePurgedEntity = (27, "DeletePurgedEntity", "An entity has been soft-deleted and then purged in one action."),
        DeletePurgedRelationship = (28, "DeletePurgedRelationship", "A relationship has been soft-deleted and then purged in one action."),
        InstanceError = (99, "InstanceErrorEvent", "An error has been detected in the exchange of instances."),
    }
    unknown = UnknownInstanceEvent(0, "UnknownInstanceEvent", "Instance event type not recognized by this member.");
}

event_vocabulary! {
    /// Lifecycle transitions of type definitions and attribute type definitions.
    pub enum TypeDefEventType {
        NewTypeDef = (1, "NewTypeDef", "A new type definition has been defined."),
        NewAttributeTypeDef = (2, "NewAttributeTypeDef", "A new attribute type definition has been defined."),
        UpdatedTypeDef = (3, "UpdatedTypeDef", "A patch has been applied to a type definition."),
        DeletedTypeDef = (4, "DeletedTypeDef", "A type definition has been deleted."),
        DeletedAttributeTypeDef = (5, "DeletedAttributeTypeDef", "An attribute type definition has been deleted."),
        ReIdentifiedTypeDef = (6, "ReIdentifiedTypeDef", "The identity of a type definition has changed."),
        ReIdentifiedAttributeTypeDef = (7, "ReIdentifiedAttributeTypeDef", "The identity of an attribute type definition has changed."),
        TypeDefError = (99, "TypeDefErrorEvent", "An error has been detected in the exchange of type definitions."),
    }
    unknown = UnknownTypeDefEvent(0, "UnknownTypeDefEvent", "TypeDef event type not recognized by this member.");
}

event_vocabulary! {
    /// Cohort membership transitions.
    pub enum RegistryEventType {
        Registration = (1, "RegistrationEvent", "A new member has joined the cohort."),
        RefreshRegistrationRequest = (2, "RefreshRegistrationRequest", "Members are asked to resend their registration details."),
        ReRegistration = (3, "ReRegistrationEvent", "A member is resending or updating its registration details."),
        UnRegistration = (4, "UnRegistrationEvent", "A member is leaving the cohort."),
        RegistryError = (99, "RegistryErrorEvent", "An error has been detected in the cohort registration exchange."),
    }
    unknown = UnknownRegistryEvent(0, "UnknownRegistryEvent", "Registry event type not recognized by this member.");
}

impl InstanceEventType {
    pub fn is_entity_event(&self) -> bool {
        use InstanceEventType::*;
        matches!(
            self,
            NewEntity
                | UpdatedEntity
                | ClassifiedEntity
                | ReclassifiedEntity
                | DeclassifiedEntity
                | DeletedEntity
                | PurgedEntity
                | UndoneEntity
                | RestoredEntity
                | RefreshEntityRequest
                | RefreshedEntity
                | ReHomedEntity
                | ReTypedEntity
                | ReIdentifiedEntity
                | DeletePurgedEntity
        )
    }

    pub fn is_relationship_event(&self) -> bool {
        use InstanceEventType::*;
        matches!(
            self,
            NewRelationship
                | UpdatedRelationship
                | DeletedRelationship
                | PurgedRelationship
                | UndoneRelationship
                | RestoredRelationship
                | RefreshRelationshipRequest
                | RefreshedRelationship
                | ReIdentifiedRelationship
                | ReHomedRelationship
                | ReTypedRelationship
                | DeletePurgedRelationship
        )
    }

    /// No further transition is valid for the instance after this one.
    pub fn is_terminal(&self) -> bool {
        use InstanceEventType::*;
        matches!(
            self,
            PurgedEntity | PurgedRelationship | DeletePurgedEntity | DeletePurgedRelationship
        )
    }
}

impl InstanceErrorCode {
    pub fn to_generic(self) -> GenericErrorCode {
        match self {
            InstanceErrorCode::NotInUse => GenericErrorCode::NotInUse,
            InstanceErrorCode::ConflictingInstances => GenericErrorCode::ConflictingInstances,
            InstanceErrorCode::ConflictingType => GenericErrorCode::ConflictingType,
            InstanceErrorCode::InvalidInstanceEvent => GenericErrorCode::InvalidInstanceEvent,
            InstanceErrorCode::Unknown => GenericErrorCode::Unknown,
        }
    }
}

impl From<GenericErrorCode> for InstanceErrorCode {
    fn from(code: GenericErrorCode) -> Self {
        match code {
            GenericErrorCode::NotInUse => InstanceErrorCode::NotInUse,
            GenericErrorCode::ConflictingInstances => InstanceErrorCode::ConflictingInstances,
            GenericErrorCode::ConflictingType => InstanceErrorCode::ConflictingType,
            GenericErrorCode::InvalidInstanceEvent => InstanceErrorCode::InvalidInstanceEvent,
            _ => InstanceErrorCode::Unknown,
        }
    }
}

impl TypeDefErrorCode {
    pub fn to_generic(self) -> GenericErrorCode {
        match self {
            TypeDefErrorCode::NotInUse => GenericErrorCode::NotInUse,
            TypeDefErrorCode::ConflictingTypeDefs => GenericErrorCode::ConflictingTypeDefs,
            TypeDefErrorCode::ConflictingAttributeTypeDefs => {
                GenericErrorCode::ConflictingAttributeTypeDefs
            }
            TypeDefErrorCode::TypeDefPatchMismatch => GenericErrorCode::TypeDefPatchMismatch,
            TypeDefErrorCode::InvalidTypeDefEvent => GenericErrorCode::InvalidTypeDefEvent,
            TypeDefErrorCode::Unknown => GenericErrorCode::Unknown,
        }
    }
}

impl From<GenericErrorCode> for TypeDefErrorCode {
    fn from(code: GenericErrorCode) -> Self {
        match code {
            GenericErrorCode::NotInUse => TypeDefErrorCode::NotInUse,
            GenericErrorCode::ConflictingTypeDefs => TypeDefErrorCode::ConflictingTypeDefs,
            GenericErrorCode::ConflictingAttributeTypeDefs => {
                TypeDefErrorCode::ConflictingAttributeTypeDefs
            }
            GenericErrorCode::TypeDefPatchMismatch => TypeDefErrorCode::TypeDefPatchMismatch,
            GenericErrorCode::InvalidTypeDefEvent => TypeDefErrorCode::InvalidTypeDefEvent,
            _ => TypeDefErrorCode::Unknown,
        }
    }
}

impl RegistryErrorCode {
    pub fn to_generic(self) -> GenericErrorCode {
        match self {
            RegistryErrorCode::NotInUse => GenericErrorCode::NotInUse,
            RegistryErrorCode::ConflictingCollectionId => GenericErrorCode::ConflictingCollectionId,
            RegistryErrorCode::BadRemoteConnection => GenericErrorCode::BadRemoteConnection,
            RegistryErrorCode::InvalidRegistryEvent => GenericErrorCode::InvalidRegistryEvent,
            RegistryErrorCode::Unknown => GenericErrorCode::Unknown,
        }
    }
}

impl From<GenericErrorCode> for RegistryErrorCode {
    fn from(code: GenericErrorCode) -> Self {
        match code {
            GenericErrorCode::NotInUse => RegistryErrorCode::NotInUse,
            GenericErrorCode::ConflictingCollectionId => RegistryErrorCode::ConflictingCollectionId,
            GenericErrorCode::BadRemoteConnection => RegistryErrorCode::BadRemoteConnection,
            GenericErrorCode::InvalidRegistryEvent => RegistryErrorCode::InvalidRegistryEvent,
            _ => RegistryErrorCode::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn assert_unique_ordinals<T: EventVocabulary>() {
        let mut seen = HashSet::new();
        for value in T::values() {
            assert!(
                seen.insert(value.descriptor().ordinal),
                "duplicate ordinal {}",
                value.descriptor().ordinal
            );
            assert!(!value.is_unknown());
            assert!(!value.descriptor().name.is_empty());
            assert!(!value.descriptor().description.is_empty());
        }
    }

    #[test]
    fn test_ordinals_are_unique() {
        assert_unique_ordinals::<EventCategory>();
        assert_unique_ordinals::<EventDirection>();
        assert_unique_ordinals::<EventProtocolVersion>();
        assert_unique_ordinals::<GenericErrorCode>();
        assert_unique_ordinals::<InstanceErrorCode>();
        assert_unique_ordinals::<TypeDefErrorCode>();
        assert_unique_ordinals::<RegistryErrorCode>();
        assert_unique_ordinals::<InstanceEventType>();
        assert_unique_ordinals::<TypeDefEventType>();
        assert_unique_ordinals::<RegistryEventType>();
    }

    #[test]
    fn test_unknown_ordinal_falls_back_to_sentinel() {
        assert_eq!(
            InstanceEventType::from_ordinal(250),
            InstanceEventType::UnknownInstanceEvent
        );
        assert_eq!(
            TypeDefEventType::from_ordinal(-3),
            TypeDefEventType::UnknownTypeDefEvent
        );
        assert_eq!(EventProtocolVersion::from_ordinal(2), EventProtocolVersion::Unknown);
        assert!(EventCategory::from_ordinal(42).is_unknown());
    }

    #[test]
    fn test_wire_triple_serialization() {
        let json = serde_json::to_value(InstanceEventType::NewEntity).unwrap();
        assert_eq!(json["ordinal"], 1);
        assert_eq!(json["name"], "NewEntity");
        assert_eq!(json["description"], "A new entity has been created.");
    }

    #[test]
    fn test_deserialization_only_needs_ordinal() {
        let parsed: EventCategory = serde_json::from_str(r#"{"ordinal": 2}"#).unwrap();
        assert_eq!(parsed, EventCategory::TypeDef);

        let renamed: EventCategory =
            serde_json::from_str(r#"{"ordinal": 3, "name": "Renamed", "description": "x"}"#)
                .unwrap();
        assert_eq!(renamed, EventCategory::Instance);

        let future: EventCategory = serde_json::from_str(r#"{"ordinal": 17}"#).unwrap();
        assert_eq!(future, EventCategory::Unknown);
    }

    #[test]
    fn test_error_code_conversions() {
        for code in InstanceErrorCode::ALL {
            assert_eq!(InstanceErrorCode::from(code.to_generic()), *code);
        }
        for code in TypeDefErrorCode::ALL {
            assert_eq!(TypeDefErrorCode::from(code.to_generic()), *code);
        }
        for code in RegistryErrorCode::ALL {
            assert_eq!(RegistryErrorCode::from(code.to_generic()), *code);
        }
        assert_eq!(
            InstanceErrorCode::from(GenericErrorCode::ConflictingTypeDefs),
            InstanceErrorCode::Unknown
        );
    }

    #[test]
    fn test_instance_event_type_families() {
        let entity = InstanceEventType::ALL
            .iter()
            .filter(|t| t.is_entity_event())
            .count();
        let relationship = InstanceEventType::ALL
            .iter()
            .filter(|t| t.is_relationship_event())
            .count();
        assert_eq!(entity, 15);
        assert_eq!(relationship, 12);
        assert!(InstanceEventType::DeletePurgedEntity.is_terminal());
        assert!(!InstanceEventType::DeletedEntity.is_terminal());
    }

    #[test]
    fn test_from_name() {
        assert_eq!(
            TypeDefEventType::from_name("UpdatedTypeDef"),
            TypeDefEventType::UpdatedTypeDef
        );
        assert!(RegistryEventType::from_name("Nope").is_unknown());
    }
}
