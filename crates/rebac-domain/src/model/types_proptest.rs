//! Property-based tests for identifier parsing.

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use crate::model::{Subject, TupleKey, TypeRestriction, TypedId};

    fn typed_id_strategy() -> impl Strategy<Value = String> {
        ("[a-z]{1,10}", "[a-z0-9_-]{1,20}").prop_map(|(t, id)| format!("{t}:{id}"))
    }

    fn userset_strategy() -> impl Strategy<Value = String> {
        ("[a-z]{1,10}", "[a-z0-9]{1,10}", "[a-z_]{1,10}")
            .prop_map(|(t, id, rel)| format!("{t}:{id}#{rel}"))
    }

    proptest! {
        #[test]
        fn test_typed_id_display_matches_input(input in typed_id_strategy()) {
            let parsed = TypedId::parse(&input);
            prop_assert!(parsed.is_ok(), "failed for {}", input);
            prop_assert_eq!(parsed.unwrap().to_string(), input);
        }

        #[test]
        fn test_userset_subject_display_matches_input(input in userset_strategy()) {
            let subject = Subject::parse(&input).unwrap();
            prop_assert!(subject.user_relation().is_some());
            prop_assert_eq!(subject.to_string(), input);
        }

        #[test]
        fn test_string_without_colon_is_rejected(s in "[a-z#]{1,20}") {
            prop_assert!(Subject::parse(&s).is_err());
            prop_assert!(TypedId::parse(&s).is_err());
        }

        #[test]
        fn test_from_parts_agrees_with_parse(
            user_type in "[a-z]{1,10}",
            user_id in "[a-z0-9]{1,10}",
            relation in proptest::option::of("[a-z]{1,8}"),
        ) {
            let wire = match &relation {
                Some(r) => format!("{user_type}:{user_id}#{r}"),
                None => format!("{user_type}:{user_id}"),
            };
            let from_parts = Subject::from_parts(&user_type, &user_id, relation.as_deref());
            prop_assert_eq!(Subject::parse(&wire).unwrap(), from_parts);
        }

        #[test]
        fn test_wildcard_restriction_admits_only_wildcards(
            user_type in "[a-z]{1,10}",
            user_id in "[a-z0-9]{1,10}",
        ) {
            let restriction = TypeRestriction::wildcard(user_type.clone());
            let concrete = Subject::parse(&format!("{user_type}:{user_id}")).unwrap();
            let wildcard = Subject::parse(&format!("{user_type}:*")).unwrap();
            prop_assert!(!restriction.admits(&concrete));
            prop_assert!(restriction.admits(&wildcard));
        }

        #[test]
        fn test_tuple_key_parse_accepts_valid_fields(
            user in typed_id_strategy(),
            relation in "[a-z]{1,10}",
            object in typed_id_strategy(),
        ) {
            let tuple = TupleKey::new(user, relation, object);
            prop_assert!(tuple.parse().is_ok());
        }
    }
}
