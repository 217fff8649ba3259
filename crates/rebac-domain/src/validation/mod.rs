//! Authorization model validation.
//!
//! Validates that authorization models are semantically correct before they
//! are published:
//! - At least one type is defined
//! - All referenced relations exist
//! - All type restrictions refer to defined types and relations
//! - Tuplesets are directly assignable relations
//! - No relation computes itself on the same object
//!
//! Cycles that only appear through tuple data cannot be seen here; the
//! resolver detects those at evaluation time.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use crate::model::{AuthorizationModel, Rewrite, TypeDefinition, TypeRestriction};

/// Validation error types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A relation computes itself through computed references.
    CyclicRelation {
        type_name: String,
        relation_name: String,
        cycle_path: Vec<String>,
    },
    /// A referenced relation does not exist
    UndefinedRelation {
        type_name: String,
        relation_name: String,
        referenced_relation: String,
    },
    /// Type restriction references an undefined type or relation
    InvalidTypeRestriction {
        type_name: String,
        relation_name: String,
        restriction: String,
    },
    /// Tupleset relation cannot hold tuples
    TuplesetNotAssignable {
        type_name: String,
        relation_name: String,
        tupleset: String,
    },
    /// Empty model (no type definitions)
    EmptyModel,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::CyclicRelation {
                type_name,
                relation_name,
                cycle_path,
            } => write!(
                f,
                "cyclic relation definition in {}#{}: {}",
                type_name,
                relation_name,
                cycle_path.join(" -> ")
            ),
            ValidationError::UndefinedRelation {
                type_name,
                relation_name,
                referenced_relation,
            } => write!(
                f,
                "undefined relation '{}' referenced in {}#{}",
                referenced_relation, type_name, relation_name
            ),
            ValidationError::InvalidTypeRestriction {
                type_name,
                relation_name,
                restriction,
            } => write!(
                f,
                "invalid type restriction '{}' in {}#{}",
                restriction, type_name, relation_name
            ),
            ValidationError::TuplesetNotAssignable {
                type_name,
                relation_name,
                tupleset,
            } => write!(
                f,
                "tupleset '{}' used in {}#{} is not directly assignable",
                tupleset, type_name, relation_name
            ),
            ValidationError::EmptyModel => {
                write!(f, "model must have at least one type definition")
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Result type for validation operations
pub type ValidationResult<T> = Result<T, Vec<ValidationError>>;

/// Model validator
pub struct ModelValidator<'a> {
    model: &'a AuthorizationModel,
}

impl<'a> ModelValidator<'a> {
    /// Create a new validator for the given model
    pub fn new(model: &'a AuthorizationModel) -> Self {
        Self { model }
    }

    /// Validate the model and return every error found
    pub fn validate(&self) -> ValidationResult<()> {
        if self.model.types.is_empty() {
            return Err(vec![ValidationError::EmptyModel]);
        }

        let mut errors = Vec::new();
        for type_def in self.model.types.values() {
            self.validate_type_definition(type_def, &mut errors);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_type_definition(&self, type_def: &TypeDefinition, errors: &mut Vec<ValidationError>) {
        for relation_def in type_def.relations.values() {
            self.validate_rewrite(type_def, &relation_def.name, &relation_def.rewrite, errors);
        }

        if let Some((relation_name, cycle_path)) = detect_cycle_in_type(type_def) {
            errors.push(ValidationError::CyclicRelation {
                type_name: type_def.name.clone(),
                relation_name,
                cycle_path,
            });
        }
    }

    fn validate_rewrite(
        &self,
        type_def: &TypeDefinition,
        relation_name: &str,
        rewrite: &Rewrite,
        errors: &mut Vec<ValidationError>,
    ) {
        match rewrite {
            Rewrite::Direct(restrictions) => {
                for restriction in restrictions {
                    if !self.restriction_is_defined(restriction) {
                        errors.push(ValidationError::InvalidTypeRestriction {
                            type_name: type_def.name.clone(),
                            relation_name: relation_name.to_string(),
                            restriction: restriction.to_string(),
                        });
                    }
                }
            }
            Rewrite::Computed(relation) => {
                if !type_def.relations.contains_key(relation) {
                    errors.push(ValidationError::UndefinedRelation {
                        type_name: type_def.name.clone(),
                        relation_name: relation_name.to_string(),
                        referenced_relation: relation.clone(),
                    });
                }
            }
            Rewrite::TupleToUserset {
                tupleset,
                computed_relation,
            } => match type_def.relations.get(tupleset) {
                None => errors.push(ValidationError::UndefinedRelation {
                    type_name: type_def.name.clone(),
                    relation_name: relation_name.to_string(),
                    referenced_relation: tupleset.clone(),
                }),
                Some(tupleset_def) if !tupleset_def.assignable => {
                    errors.push(ValidationError::TuplesetNotAssignable {
                        type_name: type_def.name.clone(),
                        relation_name: relation_name.to_string(),
                        tupleset: tupleset.clone(),
                    })
                }
                Some(tupleset_def) => {
                    // At least one concrete target type must define the computed relation.
                    let targets: Vec<&TypeRestriction> = tupleset_def
                        .directly_assignable_types
                        .iter()
                        .filter(|t| t.relation.is_none() && !t.wildcard)
                        .collect();
                    let defined_somewhere = targets.is_empty()
                        || targets.iter().any(|t| {
                            self.model
                                .types
                                .get(&t.type_name)
                                .is_some_and(|td| td.relations.contains_key(computed_relation))
                        });
                    if !defined_somewhere {
                        errors.push(ValidationError::UndefinedRelation {
                            type_name: type_def.name.clone(),
                            relation_name: relation_name.to_string(),
                            referenced_relation: format!("{tupleset}->{computed_relation}"),
                        });
                    }
                }
            },
            Rewrite::Union(children) | Rewrite::Intersection(children) => {
                for child in children {
                    self.validate_rewrite(type_def, relation_name, child, errors);
                }
            }
            Rewrite::Exclusion { base, subtract } => {
                self.validate_rewrite(type_def, relation_name, base, errors);
                self.validate_rewrite(type_def, relation_name, subtract, errors);
            }
        }
    }

    fn restriction_is_defined(&self, restriction: &TypeRestriction) -> bool {
        match self.model.types.get(&restriction.type_name) {
            None => false,
            Some(td) => restriction
                .relation
                .as_ref()
                .map_or(true, |rel| td.relations.contains_key(rel)),
        }
    }
}

/// Convenience wrapper: validates a model in one call.
pub fn validate_model(model: &AuthorizationModel) -> ValidationResult<()> {
    ModelValidator::new(model).validate()
}

/// Detect relations that compute themselves on the same object, using DFS.
fn detect_cycle_in_type(type_def: &TypeDefinition) -> Option<(String, Vec<String>)> {
    let mut graph: BTreeMap<&str, HashSet<&str>> = BTreeMap::new();
    for rel_def in type_def.relations.values() {
        let mut refs = HashSet::new();
        collect_referenced_relations(&rel_def.rewrite, &mut refs);
        graph.insert(rel_def.name.as_str(), refs);
    }

    let mut visited = HashSet::new();
    for rel_name in graph.keys() {
        let mut rec_stack = HashSet::new();
        let mut path = Vec::new();
        if dfs_cycle_detect(rel_name, &graph, &mut visited, &mut rec_stack, &mut path) {
            return Some((rel_name.to_string(), path));
        }
    }
    None
}

/// Collect same-object relation references. Tuple-to-userset leaves the
/// object, so it cannot close a local cycle.
fn collect_referenced_relations<'a>(rewrite: &'a Rewrite, refs: &mut HashSet<&'a str>) {
    match rewrite {
        Rewrite::Direct(_) | Rewrite::TupleToUserset { .. } => {}
        Rewrite::Computed(relation) => {
            refs.insert(relation.as_str());
        }
        Rewrite::Union(children) | Rewrite::Intersection(children) => {
            for child in children {
                collect_referenced_relations(child, refs);
            }
        }
        Rewrite::Exclusion { base, subtract } => {
            collect_referenced_relations(base, refs);
            collect_referenced_relations(subtract, refs);
        }
    }
}

fn dfs_cycle_detect<'a>(
    node: &'a str,
    graph: &BTreeMap<&'a str, HashSet<&'a str>>,
    visited: &mut HashSet<&'a str>,
    rec_stack: &mut HashSet<&'a str>,
    path: &mut Vec<String>,
) -> bool {
    if rec_stack.contains(node) {
        path.push(node.to_string());
        return true;
    }
    if visited.contains(node) {
        return false;
    }

    visited.insert(node);
    rec_stack.insert(node);
    path.push(node.to_string());

    if let Some(neighbors) = graph.get(node) {
        let mut sorted: Vec<&&str> = neighbors.iter().collect();
        sorted.sort();
        for neighbor in sorted {
            if dfs_cycle_detect(neighbor, graph, visited, rec_stack, path) {
                return true;
            }
        }
    }

    rec_stack.remove(node);
    path.pop();
    false
}
