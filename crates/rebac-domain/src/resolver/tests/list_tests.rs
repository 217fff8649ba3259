//! ListObjects and ListUsers tests.

use std::sync::Arc;

use super::mocks::*;
use crate::error::DomainError;
use crate::model::{AuthorizationModel, Rewrite, TupleKey, TypeDefinition};
use crate::resolver::{
    ListConfig, ListObjectsRequest, ListStrategy, ListUsersRequest, ResolverConfig, UserResult,
};

fn model() -> AuthorizationModel {
    AuthorizationModel::new("1.1")
        .with_type(TypeDefinition::new("user"))
        .with_type(
            TypeDefinition::new("group")
                .with_relation("member", Rewrite::direct(&["user", "group#member"])),
        )
        .with_type(
            TypeDefinition::new("folder")
                .with_relation("viewer", Rewrite::direct(&["user", "group#member"])),
        )
        .with_type(
            TypeDefinition::new("document")
                .with_relation("parent", Rewrite::direct(&["folder", "document"]))
                .with_relation("owner", Rewrite::direct(&["user"]))
                .with_relation("blocked", Rewrite::direct(&["user"]))
                .with_relation(
                    "viewer",
                    Rewrite::union(vec![
                        Rewrite::direct(&["user", "user:*", "group#member"]),
                        Rewrite::computed("owner"),
                        Rewrite::tuple_to_userset("parent", "viewer"),
                    ]),
                )
                .with_relation(
                    "can_read",
                    Rewrite::exclusion(Rewrite::computed("viewer"), Rewrite::computed("blocked")),
                )
                .with_relation(
                    "guarded",
                    Rewrite::exclusion(
                        Rewrite::computed("owner"),
                        Rewrite::tuple_to_userset("parent", "guarded"),
                    ),
                ),
        )
}

fn config_with(strategy: ListStrategy) -> ResolverConfig {
    ResolverConfig::default().with_list_config(ListConfig {
        strategy,
        ..ListConfig::default()
    })
}

async fn seed(tuples: &MockTupleReader) {
    tuples.add_tuple("group:eng", "member", "user:alice").await;
    tuples.add_tuple("document:1", "viewer", "group:eng#member").await;
    tuples.add_tuple("document:2", "viewer", "user:alice").await;
    tuples.add_tuple("document:3", "viewer", "user:bob").await;
    tuples.add_tuple("document:4", "viewer", "user:*").await;
    tuples.add_tuple("document:5", "owner", "user:alice").await;
    tuples.add_tuple("folder:f", "viewer", "user:alice").await;
    tuples.add_tuple("document:6", "parent", "folder:f").await;
}

async fn list(resolver: &MockResolver, user: &str, relation: &str) -> Vec<String> {
    resolver
        .list_objects(&ListObjectsRequest::new(user, relation, "document"))
        .await
        .unwrap()
        .objects
}

// ========== Section 1: ListObjects ==========

#[tokio::test]
async fn test_list_objects_strategies_agree() {
    let expected = vec![
        "document:1",
        "document:2",
        "document:4",
        "document:5",
        "document:6",
    ];

    for strategy in [ListStrategy::ReverseIndex, ListStrategy::Exhaustive, ListStrategy::Auto] {
        let (tuples, _, resolver) = create_resolver_with_config(model(), config_with(strategy)).await;
        seed(&tuples).await;

        let objects = list(&resolver, "user:alice", "viewer").await;
        assert_eq!(objects, expected, "strategy {strategy:?}");
    }
}

#[tokio::test]
async fn test_list_objects_honours_exclusion() {
    for strategy in [ListStrategy::ReverseIndex, ListStrategy::Exhaustive] {
        let (tuples, _, resolver) = create_resolver_with_config(model(), config_with(strategy)).await;
        seed(&tuples).await;
        tuples.add_tuple("document:2", "blocked", "user:alice").await;

        let objects = list(&resolver, "user:alice", "can_read").await;
        assert!(!objects.contains(&"document:2".to_string()));
        assert!(objects.contains(&"document:1".to_string()));
    }
}

#[tokio::test]
async fn test_list_objects_paginates_over_sorted_results() {
    let (tuples, _, resolver) = create_resolver(model()).await;
    seed(&tuples).await;

    let mut collected = Vec::new();
    let mut token = None;
    loop {
        let page = resolver
            .list_objects(&ListObjectsRequest::new("user:alice", "viewer", "document").with_page(2, token))
            .await
            .unwrap();
        assert!(page.objects.len() <= 2);
        collected.extend(page.objects);
        match page.next_page_token {
            Some(next) => token = Some(next),
            None => break,
        }
    }

    assert_eq!(collected.len(), 5);
    let mut sorted = collected.clone();
    sorted.sort();
    assert_eq!(collected, sorted);
}

#[tokio::test]
async fn test_list_objects_candidate_bound_marks_truncated() {
    let config = ResolverConfig::default().with_list_config(ListConfig {
        max_candidates: 2,
        strategy: ListStrategy::ReverseIndex,
        ..ListConfig::default()
    });
    let (tuples, _, resolver) = create_resolver_with_config(model(), config).await;
    for i in 0..5 {
        tuples
            .add_tuple(&format!("document:{i}"), "owner", "user:alice")
            .await;
    }

    let result = resolver
        .list_objects(&ListObjectsRequest::new("user:alice", "viewer", "document"))
        .await
        .unwrap();
    assert!(result.truncated);
    assert_eq!(result.objects.len(), 2);
}

#[tokio::test]
async fn test_list_objects_drops_failing_candidate_and_marks_truncated() {
    let (tuples, _, resolver) = create_resolver(model()).await;
    tuples.add_tuple("document:1", "owner", "user:alice").await;
    tuples.add_tuple("document:1", "parent", "document:1").await;
    tuples.add_tuple("document:2", "owner", "user:alice").await;

    let result = resolver
        .list_objects(&ListObjectsRequest::new("user:alice", "guarded", "document"))
        .await
        .unwrap();
    assert_eq!(result.objects, vec!["document:2"]);
    assert!(result.truncated);
}

#[tokio::test]
async fn test_list_objects_includes_contextual_grants() {
    let (tuples, _, resolver) = create_resolver(model()).await;
    seed(&tuples).await;

    let mut request = ListObjectsRequest::new("user:bob", "viewer", "document");
    request.contextual_tuples =
        Arc::new(vec![TupleKey::new("user:bob", "owner", "document:9")]);
    let objects = resolver.list_objects(&request).await.unwrap().objects;
    assert_eq!(objects, vec!["document:3", "document:4", "document:9"]);

    // Not visible without the contextual tuple.
    let objects = list(&resolver, "user:bob", "viewer").await;
    assert_eq!(objects, vec!["document:3", "document:4"]);
}

#[tokio::test]
async fn test_list_objects_unknown_relation() {
    let (_, _, resolver) = create_resolver(model()).await;
    let err = resolver
        .list_objects(&ListObjectsRequest::new("user:alice", "admin", "document"))
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::RelationNotFound { .. }));
}

#[tokio::test]
async fn test_page_token_rejected_after_model_change() {
    let (tuples, models, resolver) = create_resolver(model()).await;
    seed(&tuples).await;

    let page = resolver
        .list_objects(&ListObjectsRequest::new("user:alice", "viewer", "document").with_page(1, None))
        .await
        .unwrap();
    models.set_model(model()).await;

    let err = resolver
        .list_objects(
            &ListObjectsRequest::new("user:alice", "viewer", "document")
                .with_page(1, page.next_page_token),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::InvalidPageToken { .. }));
}

// ========== Section 2: ListUsers ==========

async fn users(resolver: &MockResolver, request: ListUsersRequest) -> Vec<UserResult> {
    resolver.list_users(&request).await.unwrap().users
}

#[tokio::test]
async fn test_list_users_expands_usersets_to_members() {
    let (tuples, _, resolver) = create_resolver(model()).await;
    tuples.add_tuple("document:1", "viewer", "group:eng#member").await;
    tuples.add_tuple("group:eng", "member", "user:carol").await;
    tuples.add_tuple("group:eng", "member", "group:infra#member").await;
    tuples.add_tuple("group:infra", "member", "user:dave").await;
    tuples.add_tuple("document:1", "owner", "user:erin").await;

    let result = users(&resolver, ListUsersRequest::new("document:1", "viewer")).await;
    assert_eq!(
        result,
        vec![
            UserResult::Object("user:carol".to_string()),
            UserResult::Object("user:dave".to_string()),
            UserResult::Object("user:erin".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_list_users_userset_granularity() {
    let (tuples, _, resolver) = create_resolver(model()).await;
    tuples.add_tuple("document:1", "viewer", "group:eng#member").await;
    tuples.add_tuple("group:eng", "member", "user:carol").await;

    let mut request = ListUsersRequest::new("document:1", "viewer");
    request.userset_granularity = true;
    let result = users(&resolver, request).await;
    assert_eq!(result, vec![UserResult::Userset("group:eng#member".to_string())]);

    let named = ListUsersRequest::new("document:1", "viewer").with_user_types(&["group#member"]);
    let result = users(&resolver, named).await;
    assert_eq!(result, vec![UserResult::Userset("group:eng#member".to_string())]);
}

#[tokio::test]
async fn test_list_users_reports_wildcards_and_filters_types() {
    let (tuples, _, resolver) = create_resolver(model()).await;
    tuples.add_tuple("document:1", "viewer", "user:*").await;
    tuples.add_tuple("document:1", "viewer", "user:alice").await;
    tuples.add_tuple("document:1", "viewer", "group:eng#member").await;

    let result = users(
        &resolver,
        ListUsersRequest::new("document:1", "viewer").with_user_types(&["user"]),
    )
    .await;
    assert_eq!(
        result,
        vec![
            UserResult::Wildcard("user".to_string()),
            UserResult::Object("user:alice".to_string()),
        ]
    );
    assert_eq!(result[0].to_string(), "user:*");
}

#[tokio::test]
async fn test_list_users_wildcard_filter_returns_only_public_access() {
    let (tuples, _, resolver) = create_resolver(model()).await;
    tuples.add_tuple("document:1", "viewer", "user:*").await;
    tuples.add_tuple("document:1", "viewer", "user:alice").await;
    tuples.add_tuple("document:2", "viewer", "user:bob").await;

    let public = users(
        &resolver,
        ListUsersRequest::new("document:1", "viewer").with_user_types(&["user:*"]),
    )
    .await;
    assert_eq!(public, vec![UserResult::Wildcard("user".to_string())]);

    let none = users(
        &resolver,
        ListUsersRequest::new("document:2", "viewer").with_user_types(&["user:*"]),
    )
    .await;
    assert!(none.is_empty());
}

#[tokio::test]
async fn test_list_users_honours_exclusion_and_tuple_to_userset() {
    let (tuples, _, resolver) = create_resolver(model()).await;
    tuples.add_tuple("document:1", "parent", "folder:f").await;
    tuples.add_tuple("folder:f", "viewer", "user:alice").await;
    tuples.add_tuple("folder:f", "viewer", "user:bob").await;
    tuples.add_tuple("document:1", "blocked", "user:bob").await;

    let result = users(&resolver, ListUsersRequest::new("document:1", "can_read")).await;
    assert_eq!(result, vec![UserResult::Object("user:alice".to_string())]);
}

#[tokio::test]
async fn test_list_users_paginates() {
    let (tuples, _, resolver) = create_resolver(model()).await;
    for name in ["e", "a", "d", "b", "c"] {
        tuples
            .add_tuple("document:1", "viewer", &format!("user:{name}"))
            .await;
    }

    let mut request = ListUsersRequest::new("document:1", "viewer");
    request.page_size = Some(3);
    let first = resolver.list_users(&request).await.unwrap();
    assert_eq!(first.users.len(), 3);
    assert_eq!(first.users[0], UserResult::Object("user:a".to_string()));

    request.page_token = first.next_page_token;
    let second = resolver.list_users(&request).await.unwrap();
    assert_eq!(
        second.users,
        vec![
            UserResult::Object("user:d".to_string()),
            UserResult::Object("user:e".to_string()),
        ]
    );
    assert!(second.next_page_token.is_none());
}

#[tokio::test]
async fn test_list_users_contextual_tuples() {
    let (_, _, resolver) = create_resolver(model()).await;

    let mut request = ListUsersRequest::new("document:1", "viewer");
    request.contextual_tuples = Arc::new(vec![TupleKey::new("user:zoe", "viewer", "document:1")]);
    let result = users(&resolver, request).await;
    assert_eq!(result, vec![UserResult::Object("user:zoe".to_string())]);

    assert!(users(&resolver, ListUsersRequest::new("document:1", "viewer"))
        .await
        .is_empty());
}

#[tokio::test]
async fn test_list_users_rejects_bad_filter() {
    let (_, _, resolver) = create_resolver(model()).await;
    let request = ListUsersRequest::new("document:1", "viewer").with_user_types(&["user#"]);
    assert!(matches!(
        resolver.list_users(&request).await,
        Err(DomainError::InvalidRequest { .. })
    ));
}
