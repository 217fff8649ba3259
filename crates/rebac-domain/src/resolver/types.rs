//! Request, response and trace types for the resolver.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::model::{Subject, TypedId};

/// Request for a permission check.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckRequest {
    /// The user identifier (e.g., "user:alice" or "group:eng#member").
    pub user: String,
    /// The relation to check (e.g., "viewer").
    pub relation: String,
    /// The object identifier (e.g., "document:readme").
    pub object: String,
    /// Request-scoped tuples, never persisted.
    /// Wrapped in Arc for cheap cloning into batch items.
    #[serde(default)]
    pub contextual_tuples: Arc<Vec<crate::model::TupleKey>>,
    /// Return a resolution tree alongside the decision.
    #[serde(default)]
    pub trace: bool,
    /// Token returned by a previous call or write; pins snapshot and model.
    #[serde(default)]
    pub consistency_token: Option<String>,
    /// Per-call deadline, overriding the resolver default.
    #[serde(skip)]
    pub timeout: Option<Duration>,
}

impl CheckRequest {
    pub fn new(
        user: impl Into<String>,
        relation: impl Into<String>,
        object: impl Into<String>,
    ) -> Self {
        Self {
            user: user.into(),
            relation: relation.into(),
            object: object.into(),
            ..Default::default()
        }
    }

    pub fn with_contextual_tuples(mut self, tuples: Vec<crate::model::TupleKey>) -> Self {
        self.contextual_tuples = Arc::new(tuples);
        self
    }

    pub fn with_trace(mut self) -> Self {
        self.trace = true;
        self
    }

    pub fn with_consistency_token(mut self, token: impl Into<String>) -> Self {
        self.consistency_token = Some(token.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Result of a permission check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    /// Whether the check is allowed.
    pub allowed: bool,
    /// Resolution tree, present when a trace was requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<ResolutionNode>,
    /// Token identifying the snapshot and model the decision was made at.
    pub consistency_token: String,
}

/// Kind of a node in a check resolution tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    /// Evaluation of `(user, relation, object)`.
    Relation,
    Direct,
    Computed,
    TupleToUserset,
    Union,
    Intersection,
    Exclusion,
    /// The relation was already resolved earlier in this call.
    Cached,
    /// The relation is already on the current path; not expanded further.
    Cycle,
}

/// One evaluated node of a check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionNode {
    pub node_type: NodeType,
    /// What was evaluated, e.g. "document:1#viewer" or "parent->viewer".
    pub label: String,
    pub result: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ResolutionNode>,
    pub duration_us: u64,
}

impl ResolutionNode {
    pub fn leaf(node_type: NodeType, label: impl Into<String>, result: bool) -> Self {
        Self {
            node_type,
            label: label.into(),
            result,
            children: Vec::new(),
            duration_us: 0,
        }
    }
}

/// A stored tuple as seen from its object side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredTupleRef {
    pub subject: Subject,
    /// Name of a condition guarding the tuple.
    pub condition_name: Option<String>,
    pub condition_context: Option<serde_json::Value>,
}

impl StoredTupleRef {
    /// An unconditional tuple subject.
    pub fn new(subject: Subject) -> Self {
        Self {
            subject,
            condition_name: None,
            condition_context: None,
        }
    }

    /// Builds a reference from decomposed subject columns.
    pub fn from_parts(user_type: &str, user_id: &str, user_relation: Option<&str>) -> Self {
        Self::new(Subject::from_parts(user_type, user_id, user_relation))
    }

    pub fn with_condition(mut self, condition_name: impl Into<String>) -> Self {
        self.condition_name = Some(condition_name.into());
        self
    }

    pub fn is_conditional(&self) -> bool {
        self.condition_name.is_some()
    }
}

/// A stored tuple as seen from its subject side (reverse index).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReverseTupleRef {
    pub object: TypedId,
    pub relation: String,
    /// Userset relation on the subject, if the subject was `type:id#relation`.
    pub user_relation: Option<String>,
    pub condition_name: Option<String>,
}

/// Request for expanding a relation into its userset tree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExpandRequest {
    pub object: String,
    pub relation: String,
    #[serde(default)]
    pub consistency_token: Option<String>,
    #[serde(skip)]
    pub timeout: Option<Duration>,
}

impl ExpandRequest {
    pub fn new(object: impl Into<String>, relation: impl Into<String>) -> Self {
        Self {
            object: object.into(),
            relation: relation.into(),
            ..Default::default()
        }
    }
}

/// Expanded userset tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExpandNode {
    /// Subjects stored directly on `name`. Userset subjects are expanded in
    /// `expanded`, one subtree per userset.
    Leaf {
        name: String,
        users: Vec<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        expanded: Vec<ExpandNode>,
    },
    Computed {
        name: String,
        relation: String,
        child: Box<ExpandNode>,
    },
    /// One child per tupleset target.
    TupleToUserset {
        name: String,
        tupleset: String,
        computed_relation: String,
        children: Vec<ExpandNode>,
    },
    Union {
        name: String,
        children: Vec<ExpandNode>,
    },
    Intersection {
        name: String,
        children: Vec<ExpandNode>,
    },
    Exclusion {
        name: String,
        base: Box<ExpandNode>,
        subtract: Box<ExpandNode>,
    },
    /// `name` is already being expanded on this path.
    Cycle { name: String },
    /// `name` was expanded elsewhere in this tree; its subtree appears once.
    Ref { name: String },
}

impl ExpandNode {
    pub fn name(&self) -> &str {
        match self {
            ExpandNode::Leaf { name, .. }
            | ExpandNode::Computed { name, .. }
            | ExpandNode::TupleToUserset { name, .. }
            | ExpandNode::Union { name, .. }
            | ExpandNode::Intersection { name, .. }
            | ExpandNode::Exclusion { name, .. }
            | ExpandNode::Cycle { name }
            | ExpandNode::Ref { name } => name,
        }
    }
}

/// Result of an expand call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpandResult {
    pub tree: ExpandNode,
    pub consistency_token: String,
}

/// Request for the objects of a type a user holds a relation on.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListObjectsRequest {
    pub user: String,
    pub relation: String,
    pub object_type: String,
    #[serde(default)]
    pub page_size: Option<u32>,
    #[serde(default)]
    pub page_token: Option<String>,
    #[serde(default)]
    pub contextual_tuples: Arc<Vec<crate::model::TupleKey>>,
    #[serde(default)]
    pub consistency_token: Option<String>,
    #[serde(skip)]
    pub timeout: Option<Duration>,
}

impl ListObjectsRequest {
    pub fn new(
        user: impl Into<String>,
        relation: impl Into<String>,
        object_type: impl Into<String>,
    ) -> Self {
        Self {
            user: user.into(),
            relation: relation.into(),
            object_type: object_type.into(),
            ..Default::default()
        }
    }

    pub fn with_page(mut self, page_size: u32, page_token: Option<String>) -> Self {
        self.page_size = Some(page_size);
        self.page_token = page_token;
        self
    }
}

/// A page of ListObjects results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListObjectsResult {
    /// Sorted, deduplicated `"type:id"` strings.
    pub objects: Vec<String>,
    pub next_page_token: Option<String>,
    /// Candidate generation hit a bound or some candidates failed to evaluate.
    pub truncated: bool,
    pub consistency_token: String,
}

/// Request for the users holding a relation on an object.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListUsersRequest {
    pub object: String,
    pub relation: String,
    /// Allowed result types: `"user"` or `"group#member"`. Empty allows all.
    #[serde(default)]
    pub user_types: Vec<String>,
    /// Return usersets as results instead of expanding them to members.
    #[serde(default)]
    pub userset_granularity: bool,
    #[serde(default)]
    pub page_size: Option<u32>,
    #[serde(default)]
    pub page_token: Option<String>,
    #[serde(default)]
    pub contextual_tuples: Arc<Vec<crate::model::TupleKey>>,
    #[serde(default)]
    pub consistency_token: Option<String>,
    #[serde(skip)]
    pub timeout: Option<Duration>,
}

impl ListUsersRequest {
    pub fn new(object: impl Into<String>, relation: impl Into<String>) -> Self {
        Self {
            object: object.into(),
            relation: relation.into(),
            ..Default::default()
        }
    }

    pub fn with_user_types(mut self, user_types: &[&str]) -> Self {
        self.user_types = user_types.iter().map(|t| t.to_string()).collect();
        self
    }
}

/// A ListUsers result entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserResult {
    /// A concrete user, `"user:alice"`.
    Object(String),
    /// A userset, `"group:eng#member"`.
    Userset(String),
    /// Every user of a type.
    Wildcard(String),
}

impl From<&Subject> for UserResult {
    fn from(subject: &Subject) -> Self {
        match subject {
            Subject::Object(id) => UserResult::Object(id.to_string()),
            Subject::Userset(us) => UserResult::Userset(us.to_string()),
            Subject::Wildcard { user_type } => UserResult::Wildcard(user_type.clone()),
        }
    }
}

impl fmt::Display for UserResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserResult::Object(value) | UserResult::Userset(value) => f.write_str(value),
            UserResult::Wildcard(user_type) => write!(f, "{user_type}:*"),
        }
    }
}

/// A page of ListUsers results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListUsersResult {
    pub users: Vec<UserResult>,
    pub next_page_token: Option<String>,
    pub truncated: bool,
    pub consistency_token: String,
}
