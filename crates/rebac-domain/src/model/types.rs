//! Core type definitions for the authorization model.
//!
//! The string forms `"type:id"`, `"type:id#relation"` and `"type:*"` are the
//! wire contract with callers; every type here parses from and displays back
//! to exactly those forms.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Identifier used for typed wildcards (`user:*`).
pub const WILDCARD_ID: &str = "*";

/// An object identifier (e.g., "document:readme").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypedId {
    /// The type portion (e.g., "document").
    pub object_type: String,
    /// The ID portion (e.g., "readme").
    pub object_id: String,
}

impl TypedId {
    /// Creates a new TypedId from type and ID.
    pub fn new(object_type: impl Into<String>, object_id: impl Into<String>) -> Self {
        Self {
            object_type: object_type.into(),
            object_id: object_id.into(),
        }
    }

    /// Parses an object from "type:id" format.
    pub fn parse(value: &str) -> DomainResult<Self> {
        let invalid = || DomainError::InvalidObjectFormat {
            value: value.to_string(),
        };
        let (object_type, object_id) = value.split_once(':').ok_or_else(invalid)?;
        if object_type.is_empty() || object_id.is_empty() || value.contains('#') {
            return Err(invalid());
        }
        Ok(Self::new(object_type, object_id))
    }

    /// Returns true if this is a typed wildcard (`type:*`).
    pub fn is_wildcard(&self) -> bool {
        self.object_id == WILDCARD_ID
    }
}

impl fmt::Display for TypedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.object_type, self.object_id)
    }
}

/// "All subjects holding `relation` on `object`" (e.g., "group:eng#member").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UsersetRef {
    pub object: TypedId,
    pub relation: String,
}

impl UsersetRef {
    pub fn new(object: TypedId, relation: impl Into<String>) -> Self {
        Self {
            object,
            relation: relation.into(),
        }
    }
}

impl fmt::Display for UsersetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.object, self.relation)
    }
}

/// The subject of a tuple or a check: a concrete object, a userset, or a
/// typed wildcard.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Subject {
    /// A concrete subject (e.g., user:alice).
    Object(TypedId),
    /// A userset reference (e.g., group:eng#member).
    Userset(UsersetRef),
    /// Every concrete subject of a type (e.g., user:*).
    Wildcard { user_type: String },
}

impl Subject {
    /// Parses "type:id", "type:id#relation" or "type:*".
    pub fn parse(value: &str) -> DomainResult<Self> {
        let invalid = || DomainError::InvalidUserFormat {
            value: value.to_string(),
        };

        if let Some((object_part, relation)) = value.split_once('#') {
            if relation.is_empty() || relation.contains('#') || relation.contains(':') {
                return Err(invalid());
            }
            let object = TypedId::parse(object_part).map_err(|_| invalid())?;
            if object.is_wildcard() {
                return Err(invalid());
            }
            return Ok(Subject::Userset(UsersetRef::new(object, relation)));
        }

        let object = TypedId::parse(value).map_err(|_| invalid())?;
        if object.is_wildcard() {
            Ok(Subject::Wildcard {
                user_type: object.object_type,
            })
        } else {
            Ok(Subject::Object(object))
        }
    }

    /// Builds a subject from the decomposed columns of a persisted tuple.
    pub fn from_parts(user_type: &str, user_id: &str, user_relation: Option<&str>) -> Self {
        match user_relation {
            Some(relation) => {
                Subject::Userset(UsersetRef::new(TypedId::new(user_type, user_id), relation))
            }
            None if user_id == WILDCARD_ID => Subject::Wildcard {
                user_type: user_type.to_string(),
            },
            None => Subject::Object(TypedId::new(user_type, user_id)),
        }
    }

    /// Returns the subject's type name.
    pub fn user_type(&self) -> &str {
        match self {
            Subject::Object(id) => &id.object_type,
            Subject::Userset(us) => &us.object.object_type,
            Subject::Wildcard { user_type } => user_type,
        }
    }

    /// Returns the userset relation, if any.
    pub fn user_relation(&self) -> Option<&str> {
        match self {
            Subject::Userset(us) => Some(&us.relation),
            _ => None,
        }
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, Subject::Wildcard { .. })
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subject::Object(id) => id.fmt(f),
            Subject::Userset(us) => us.fmt(f),
            Subject::Wildcard { user_type } => write!(f, "{}:{}", user_type, WILDCARD_ID),
        }
    }
}

/// A tuple in wire form: `user` is "type:id" or "type:id#relation",
/// `object` is "type:id".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TupleKey {
    /// The user (subject) of the relationship.
    pub user: String,
    /// The relation between user and object.
    pub relation: String,
    /// The object of the relationship.
    pub object: String,
    /// Optional condition name guarding this tuple.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition_name: Option<String>,
    /// Optional condition parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition_context: Option<serde_json::Value>,
}

impl TupleKey {
    /// Creates a new unconditional TupleKey.
    pub fn new(
        user: impl Into<String>,
        relation: impl Into<String>,
        object: impl Into<String>,
    ) -> Self {
        Self {
            user: user.into(),
            relation: relation.into(),
            object: object.into(),
            condition_name: None,
            condition_context: None,
        }
    }

    /// Attaches a condition to this tuple.
    pub fn with_condition(
        mut self,
        condition_name: impl Into<String>,
        condition_context: Option<serde_json::Value>,
    ) -> Self {
        self.condition_name = Some(condition_name.into());
        self.condition_context = condition_context;
        self
    }

    /// Parses the user and object fields.
    pub fn parse(&self) -> DomainResult<(Subject, TypedId)> {
        if self.relation.is_empty() {
            return Err(DomainError::InvalidRelationFormat {
                value: self.relation.clone(),
            });
        }
        Ok((Subject::parse(&self.user)?, TypedId::parse(&self.object)?))
    }
}

impl fmt::Display for TupleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}@{}", self.object, self.relation, self.user)
    }
}

/// A type allowed on a direct relation: `user`, `group#member` or `user:*`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypeRestriction {
    pub type_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation: Option<String>,
    #[serde(default)]
    pub wildcard: bool,
}

impl TypeRestriction {
    /// A concrete type (`user`).
    pub fn direct(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            relation: None,
            wildcard: false,
        }
    }

    /// A userset type (`group#member`).
    pub fn userset(type_name: impl Into<String>, relation: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            relation: Some(relation.into()),
            wildcard: false,
        }
    }

    /// A typed wildcard (`user:*`).
    pub fn wildcard(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            relation: None,
            wildcard: true,
        }
    }

    /// Parses `user`, `group#member` or `user:*`.
    pub fn parse(value: &str) -> DomainResult<Self> {
        let invalid = || DomainError::ModelValidation {
            message: format!("invalid type restriction '{value}'"),
        };
        if let Some(type_name) = value.strip_suffix(":*") {
            if type_name.is_empty() || type_name.contains(['#', ':']) {
                return Err(invalid());
            }
            return Ok(Self::wildcard(type_name));
        }
        match value.split_once('#') {
            Some((type_name, relation)) if !type_name.is_empty() && !relation.is_empty() => {
                Ok(Self::userset(type_name, relation))
            }
            Some(_) => Err(invalid()),
            None if !value.is_empty() && !value.contains(':') => Ok(Self::direct(value)),
            None => Err(invalid()),
        }
    }

    /// Returns true if a tuple subject of this shape is admitted.
    pub fn admits(&self, subject: &Subject) -> bool {
        if subject.user_type() != self.type_name {
            return false;
        }
        match subject {
            Subject::Object(_) => !self.wildcard && self.relation.is_none(),
            Subject::Userset(us) => self.relation.as_deref() == Some(us.relation.as_str()),
            Subject::Wildcard { .. } => self.wildcard,
        }
    }
}

impl fmt::Display for TypeRestriction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.relation, self.wildcard) {
            (_, true) => write!(f, "{}:*", self.type_name),
            (Some(relation), false) => write!(f, "{}#{}", self.type_name, relation),
            (None, false) => f.write_str(&self.type_name),
        }
    }
}

/// A rewrite defines how a relation is computed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rewrite {
    /// Direct assignment, restricted to the listed subject types.
    /// An empty list admits any subject type.
    Direct(Vec<TypeRestriction>),
    /// Another relation on the same object.
    Computed(String),
    /// `computed_relation` on every object reached through `tupleset`.
    TupleToUserset {
        tupleset: String,
        computed_relation: String,
    },
    /// Any child grants.
    Union(Vec<Rewrite>),
    /// Every child grants.
    Intersection(Vec<Rewrite>),
    /// `base` grants and `subtract` does not.
    Exclusion {
        base: Box<Rewrite>,
        subtract: Box<Rewrite>,
    },
}

impl Rewrite {
    /// Direct rewrite from restriction strings (`"user"`, `"group#member"`, `"user:*"`).
    ///
    /// Unparseable restrictions are reported by model validation, so here they
    /// are kept as plain type names.
    pub fn direct(types: &[&str]) -> Self {
        Rewrite::Direct(
            types
                .iter()
                .map(|t| TypeRestriction::parse(t).unwrap_or_else(|_| TypeRestriction::direct(*t)))
                .collect(),
        )
    }

    pub fn computed(relation: impl Into<String>) -> Self {
        Rewrite::Computed(relation.into())
    }

    pub fn tuple_to_userset(
        tupleset: impl Into<String>,
        computed_relation: impl Into<String>,
    ) -> Self {
        Rewrite::TupleToUserset {
            tupleset: tupleset.into(),
            computed_relation: computed_relation.into(),
        }
    }

    pub fn union(children: Vec<Rewrite>) -> Self {
        Rewrite::Union(children)
    }

    pub fn intersection(children: Vec<Rewrite>) -> Self {
        Rewrite::Intersection(children)
    }

    pub fn exclusion(base: Rewrite, subtract: Rewrite) -> Self {
        Rewrite::Exclusion {
            base: Box::new(base),
            subtract: Box::new(subtract),
        }
    }

    /// Short name of the rewrite form.
    pub fn kind(&self) -> &'static str {
        match self {
            Rewrite::Direct(_) => "direct",
            Rewrite::Computed(_) => "computed",
            Rewrite::TupleToUserset { .. } => "tuple_to_userset",
            Rewrite::Union(_) => "union",
            Rewrite::Intersection(_) => "intersection",
            Rewrite::Exclusion { .. } => "exclusion",
        }
    }

    fn collect_direct_types(&self, out: &mut Vec<TypeRestriction>) {
        match self {
            Rewrite::Direct(types) => {
                for t in types {
                    if !out.contains(t) {
                        out.push(t.clone());
                    }
                }
            }
            Rewrite::Computed(_) | Rewrite::TupleToUserset { .. } => {}
            Rewrite::Union(children) | Rewrite::Intersection(children) => {
                for child in children {
                    child.collect_direct_types(out);
                }
            }
            Rewrite::Exclusion { base, subtract } => {
                base.collect_direct_types(out);
                subtract.collect_direct_types(out);
            }
        }
    }

    fn has_direct(&self) -> bool {
        match self {
            Rewrite::Direct(_) => true,
            Rewrite::Computed(_) | Rewrite::TupleToUserset { .. } => false,
            Rewrite::Union(children) | Rewrite::Intersection(children) => {
                children.iter().any(Rewrite::has_direct)
            }
            Rewrite::Exclusion { base, subtract } => base.has_direct() || subtract.has_direct(),
        }
    }
}

/// A relation definition on a type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationDefinition {
    /// The relation name.
    pub name: String,
    /// The rewrite for this relation.
    pub rewrite: Rewrite,
    /// Leaf set of every `Direct` restriction in `rewrite`, used to validate
    /// writes without walking the tree.
    pub directly_assignable_types: Vec<TypeRestriction>,
    /// Whether the rewrite contains a `Direct` leaf at all.
    pub assignable: bool,
}

impl RelationDefinition {
    pub fn new(name: impl Into<String>, rewrite: Rewrite) -> Self {
        let mut directly_assignable_types = Vec::new();
        rewrite.collect_direct_types(&mut directly_assignable_types);
        let assignable = rewrite.has_direct();
        Self {
            name: name.into(),
            rewrite,
            directly_assignable_types,
            assignable,
        }
    }

    /// Returns true if a tuple with this subject may be written for the relation.
    pub fn accepts_subject(&self, subject: &Subject) -> bool {
        if !self.assignable {
            return false;
        }
        if self.directly_assignable_types.is_empty() {
            return true;
        }
        self.directly_assignable_types
            .iter()
            .any(|restriction| restriction.admits(subject))
    }
}

/// A type definition within the authorization model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDefinition {
    /// The type name (e.g., "document", "folder").
    pub name: String,
    /// Relations defined on this type.
    pub relations: BTreeMap<String, RelationDefinition>,
}

impl TypeDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            relations: BTreeMap::new(),
        }
    }

    /// Adds a relation (builder style).
    pub fn with_relation(mut self, name: impl Into<String>, rewrite: Rewrite) -> Self {
        let def = RelationDefinition::new(name, rewrite);
        self.relations.insert(def.name.clone(), def);
        self
    }
}

/// A compiled authorization model version.
///
/// Once published to a model store a version never mutates; activation is
/// tracked by the store, not by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationModel {
    /// Model identifier, assigned on publish.
    pub id: String,
    /// Monotonic version number, assigned on publish (0 before).
    pub version_id: u64,
    /// Schema version (e.g., "1.1").
    pub schema_version: String,
    /// Source the compiler produced this model from.
    pub dsl_source: String,
    /// Type definitions keyed by name.
    pub types: BTreeMap<String, TypeDefinition>,
    pub created_at: DateTime<Utc>,
    pub notes: Option<String>,
}

impl AuthorizationModel {
    /// Creates an empty, unpublished model.
    pub fn new(schema_version: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            version_id: 0,
            schema_version: schema_version.into(),
            dsl_source: String::new(),
            types: BTreeMap::new(),
            created_at: Utc::now(),
            notes: None,
        }
    }

    pub fn with_type(mut self, type_def: TypeDefinition) -> Self {
        self.types.insert(type_def.name.clone(), type_def);
        self
    }

    pub fn with_dsl_source(mut self, dsl_source: impl Into<String>) -> Self {
        self.dsl_source = dsl_source.into();
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    /// Looks up a type definition.
    pub fn type_definition(&self, type_name: &str) -> DomainResult<&TypeDefinition> {
        self.types
            .get(type_name)
            .ok_or_else(|| DomainError::TypeNotFound {
                type_name: type_name.to_string(),
            })
    }

    /// Looks up a relation definition on a type.
    pub fn relation(&self, type_name: &str, relation: &str) -> DomainResult<&RelationDefinition> {
        self.type_definition(type_name)?
            .relations
            .get(relation)
            .ok_or_else(|| DomainError::RelationNotFound {
                type_name: type_name.to_string(),
                relation: relation.to_string(),
            })
    }

    /// Validates a tuple against the model's directly assignable types.
    pub fn validate_tuple(&self, tuple: &TupleKey) -> DomainResult<()> {
        let (subject, object) = tuple.parse()?;
        let relation = self.relation(&object.object_type, &tuple.relation)?;
        if !relation.accepts_subject(&subject) {
            return Err(DomainError::InvalidRequest {
                message: format!(
                    "subject '{}' is not assignable to {}#{}",
                    tuple.user, object.object_type, tuple.relation
                ),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_id_parse() {
        let obj = TypedId::parse("document:readme").unwrap();
        assert_eq!(obj.object_type, "document");
        assert_eq!(obj.object_id, "readme");
        assert_eq!(obj.to_string(), "document:readme");
    }

    #[test]
    fn test_typed_id_invalid_format() {
        assert!(TypedId::parse("invalid").is_err());
        assert!(TypedId::parse(":id").is_err());
        assert!(TypedId::parse("type:").is_err());
        assert!(TypedId::parse("group:eng#member").is_err());
    }

    #[test]
    fn test_subject_parse_variants() {
        assert_eq!(
            Subject::parse("user:alice").unwrap(),
            Subject::Object(TypedId::new("user", "alice"))
        );
        assert_eq!(
            Subject::parse("group:eng#member").unwrap(),
            Subject::Userset(UsersetRef::new(TypedId::new("group", "eng"), "member"))
        );
        assert_eq!(
            Subject::parse("user:*").unwrap(),
            Subject::Wildcard {
                user_type: "user".to_string()
            }
        );
        assert!(Subject::parse("group:eng#").is_err());
        assert!(Subject::parse("user:*#member").is_err());
        assert!(Subject::parse("alice").is_err());
    }

    #[test]
    fn test_subject_from_parts_matches_parse() {
        let s = Subject::from_parts("group", "eng", Some("member"));
        assert_eq!(s.to_string(), "group:eng#member");
        let w = Subject::from_parts("user", "*", None);
        assert!(w.is_wildcard());
    }

    #[test]
    fn test_type_restriction_parse_and_admit() {
        let user = TypeRestriction::parse("user").unwrap();
        let member = TypeRestriction::parse("group#member").unwrap();
        let any_user = TypeRestriction::parse("user:*").unwrap();

        let alice = Subject::parse("user:alice").unwrap();
        let eng = Subject::parse("group:eng#member").unwrap();
        let all = Subject::parse("user:*").unwrap();

        assert!(user.admits(&alice));
        assert!(!user.admits(&all));
        assert!(member.admits(&eng));
        assert!(!member.admits(&alice));
        assert!(any_user.admits(&all));
        assert!(!any_user.admits(&alice));
        assert_eq!(any_user.to_string(), "user:*");
        assert!(TypeRestriction::parse("#x").is_err());
    }

    #[test]
    fn test_directly_assignable_types_are_cached() {
        let rel = RelationDefinition::new(
            "viewer",
            Rewrite::union(vec![
                Rewrite::direct(&["user", "group#member"]),
                Rewrite::computed("editor"),
                Rewrite::exclusion(Rewrite::direct(&["user:*"]), Rewrite::computed("blocked")),
            ]),
        );
        assert!(rel.assignable);
        assert_eq!(rel.directly_assignable_types.len(), 3);

        let computed_only = RelationDefinition::new("admin", Rewrite::computed("owner"));
        assert!(!computed_only.assignable);
        assert!(!computed_only.accepts_subject(&Subject::parse("user:alice").unwrap()));
    }

    #[test]
    fn test_validate_tuple() {
        let model = AuthorizationModel::new("1.1")
            .with_type(TypeDefinition::new("user"))
            .with_type(
                TypeDefinition::new("document")
                    .with_relation("viewer", Rewrite::direct(&["user"]))
                    .with_relation("admin", Rewrite::computed("viewer")),
            );

        assert!(model
            .validate_tuple(&TupleKey::new("user:alice", "viewer", "document:1"))
            .is_ok());
        assert!(matches!(
            model.validate_tuple(&TupleKey::new("user:alice", "admin", "document:1")),
            Err(DomainError::InvalidRequest { .. })
        ));
        assert!(matches!(
            model.validate_tuple(&TupleKey::new("user:alice", "viewer", "folder:1")),
            Err(DomainError::TypeNotFound { .. })
        ));
        assert!(matches!(
            model.validate_tuple(&TupleKey::new("user:alice", "owner", "document:1")),
            Err(DomainError::RelationNotFound { .. })
        ));
    }
}
