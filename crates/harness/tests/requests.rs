use proptest::prelude::*;
use tierstore_core::{CoreError, Model, ObjectId, Predicate, Query};
use tierstore_engine::{EngineError, StackError};
use tierstore_harness::{Post, TestStack, User};
use tierstore_storage::StoreKind;

fn create_user(
    stack: &TestStack,
    name: &str,
    email: Option<&str>,
) -> Result<User, Box<dyn std::error::Error>> {
    let created = stack.request().create::<User, _>(|user, _| {
        user.set_name(name);
        user.set_email(email);
    });
    Ok(created.into_first().ok_or("create returned no record")?)
}

// ============================================================================
// Create / fetch
// ============================================================================

#[test]
fn created_user_is_visible_by_identity() -> Result<(), Box<dyn std::error::Error>> {
    let stack = TestStack::new()?;
    let paco = create_user(&stack, "paco", Some("paco@x.com"))?;

    let fetched = stack.request().fetch_by_identity(&paco).into_result()?;
    assert_eq!(fetched.len(), 1);
    assert_eq!(fetched[0].id(), paco.id());
    assert_eq!(fetched[0].name(), Some("paco"));
    assert_eq!(fetched[0].email(), Some("paco@x.com"));
    Ok(())
}

#[test]
fn paco_lifecycle() -> Result<(), Box<dyn std::error::Error>> {
    let stack = TestStack::new()?;
    let scope = stack.request();

    let paco = create_user(&stack, "paco", Some("paco@x.com"))?;
    let users = scope.fetch_all::<User>().into_result()?;
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].name(), Some("paco"));

    let updated = scope
        .update(&paco, |user, _| user.set_email(Some("new@x.com")))
        .into_result()?;
    assert_eq!(updated[0].email(), Some("new@x.com"));
    assert_eq!(updated[0].name(), Some("paco"));

    let refetched = scope.fetch_by_identity(&paco).into_result()?;
    assert_eq!(refetched[0].email(), Some("new@x.com"));
    assert_eq!(refetched[0].name(), Some("paco"));

    assert!(scope.delete(&paco).is_none());
    assert!(scope.fetch_all::<User>().into_result()?.is_empty());
    Ok(())
}

#[test]
fn missing_identity_is_an_empty_result() -> Result<(), Box<dyn std::error::Error>> {
    let stack = TestStack::new()?;
    let result = stack.request().fetch_by_id::<User>(ObjectId::new());
    assert!(result.is_ok());
    assert!(result.is_empty());
    Ok(())
}

#[test]
fn query_filters_sorts_and_pages() -> Result<(), Box<dyn std::error::Error>> {
    let stack = TestStack::new()?;
    for name in ["dora", "ana", "carla", "bea"] {
        create_user(&stack, name, None)?;
    }
    create_user(&stack, "eva", Some("eva@x.com"))?;

    let scope = stack.request();
    let names = |query: &Query| -> Result<Vec<String>, StackError> {
        Ok(scope
            .fetch::<User>(query)
            .into_result()?
            .iter()
            .filter_map(|u| u.name().map(str::to_string))
            .collect())
    };

    let sorted = Query::of::<User>().sort_by("name", true);
    assert_eq!(names(&sorted)?, vec!["ana", "bea", "carla", "dora", "eva"]);
    assert_eq!(names(&sorted.clone().offset(1).limit(2))?, vec!["bea", "carla"]);

    let with_email = Query::of::<User>().filter(Predicate::IsNull("email".into()).negate());
    assert_eq!(names(&with_email)?, vec!["eva"]);
    Ok(())
}

// ============================================================================
// Updates / deletes
// ============================================================================

#[test]
fn deleted_user_disappears_from_fetch_all() -> Result<(), Box<dyn std::error::Error>> {
    let stack = TestStack::new()?;
    let scope = stack.request();
    let ana = create_user(&stack, "ana", None)?;
    let bea = create_user(&stack, "bea", None)?;

    assert!(scope.delete(&ana).is_none());
    let remaining: Vec<ObjectId> = scope
        .fetch_all::<User>()
        .into_result()?
        .iter()
        .map(Model::id)
        .collect();
    assert_eq!(remaining, vec![bea.id()]);
    Ok(())
}

#[test]
fn update_of_a_deleted_user_is_a_system_error() -> Result<(), Box<dyn std::error::Error>> {
    let stack = TestStack::new()?;
    let scope = stack.request();
    let ana = create_user(&stack, "ana", None)?;
    assert!(scope.delete(&ana).is_none());

    let result = scope.update(&ana, |user, _| user.set_name("ghost"));
    match result.error() {
        Some(StackError::System(cause)) => {
            assert!(matches!(cause.as_ref(), EngineError::ObjectNotFound(id) if *id == ana.id()));
        }
        other => panic!("expected system error, got {other:?}"),
    }

    let deleted_again = scope.delete(&ana);
    assert!(matches!(deleted_again, Some(StackError::System(_))));
    Ok(())
}

#[test]
fn delete_all_removes_one_entity_only() -> Result<(), Box<dyn std::error::Error>> {
    let stack = TestStack::new()?;
    let scope = stack.request();
    let ana = create_user(&stack, "ana", None)?;
    create_user(&stack, "bea", None)?;
    scope
        .create::<Post, _>(|post, _| {
            post.set_desc("hello");
            post.set_owner(&ana);
        })
        .into_result()?;

    assert!(scope.delete_all::<User>().is_none());
    assert!(scope.fetch_all::<User>().into_result()?.is_empty());
    assert_eq!(scope.fetch_all::<Post>().into_result()?.len(), 1);
    Ok(())
}

#[test]
fn deleting_an_owner_clears_references_to_it() -> Result<(), Box<dyn std::error::Error>> {
    let stack = TestStack::new()?;
    let scope = stack.request();
    let ana = create_user(&stack, "ana", None)?;
    let bea = create_user(&stack, "bea", None)?;
    let post = scope
        .create::<Post, _>(|post, _| {
            post.set_desc("hello");
            post.set_owner(&ana);
            post.set_viewer(&bea);
        })
        .into_first()
        .ok_or("no post")?;

    assert!(scope.delete(&ana).is_none());
    let fetched = scope.fetch_by_identity(&post).into_first().ok_or("post missing")?;
    assert_eq!(fetched.owner_id(), None);
    assert_eq!(fetched.viewer_id(), Some(bea.id()));
    assert!(fetched.owner(&scope).is_empty());

    let unowned = scope.fetch::<Post>(&Query::of::<Post>().filter(Predicate::eq("owner", ana.id())));
    assert!(unowned.into_result()?.is_empty());
    Ok(())
}

#[test]
fn transactional_delete_clears_references_on_commit() -> Result<(), Box<dyn std::error::Error>> {
    let stack = TestStack::new()?;
    let scope = stack.request();
    let ana = create_user(&stack, "ana", None)?;
    let post = scope
        .create::<Post, _>(|post, _| {
            post.set_desc("hello");
            post.set_owner(&ana);
            post.set_viewer(&ana);
        })
        .into_first()
        .ok_or("no post")?;

    let doomed = ana.clone();
    let outcome = stack.run_transaction(move |scope, observer| match scope.delete(&doomed) {
        Some(e) => observer.on_abort(e),
        None => observer.on_success(),
    });
    assert!(outcome.is_none(), "unexpected outcome: {outcome:?}");

    let fetched = scope.fetch_by_identity(&post).into_first().ok_or("post missing")?;
    assert_eq!(fetched.owner_id(), None);
    assert_eq!(fetched.viewer_id(), None);
    assert!(scope.fetch_by_identity(&ana).is_empty());
    Ok(())
}

// ============================================================================
// Failures
// ============================================================================

fn is_owner_validation_error(error: Option<&StackError>) -> bool {
    match error {
        Some(StackError::System(cause)) => matches!(
            cause.as_ref(),
            EngineError::Core(CoreError::Validation { attribute, .. }) if attribute == "owner"
        ),
        _ => false,
    }
}

#[test]
fn references_must_resolve_to_the_declared_entity() -> Result<(), Box<dyn std::error::Error>> {
    let stack = TestStack::new()?;
    let scope = stack.request();
    let first = scope
        .create::<Post, _>(|post, _| post.set_desc("first"))
        .into_first()
        .ok_or("no post")?;

    let owned_by_a_post = scope.create::<Post, _>(|post, _| {
        post.set_desc("second");
        post.as_record_mut().set("owner", first.id());
    });
    assert!(is_owner_validation_error(owned_by_a_post.error()));

    let owned_by_nobody = scope.create::<Post, _>(|post, _| {
        post.set_desc("third");
        post.as_record_mut().set("owner", ObjectId::new());
    });
    assert!(is_owner_validation_error(owned_by_nobody.error()));

    let repointed = scope.update(&first, |post, _| {
        post.as_record_mut().set("owner", ObjectId::new());
    });
    assert!(is_owner_validation_error(repointed.error()));

    let posts = scope.fetch_all::<Post>().into_result()?;
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].id(), first.id());
    assert_eq!(posts[0].owner_id(), None);
    Ok(())
}

#[test]
fn references_to_objects_deleted_in_the_same_transaction_fail_the_commit()
-> Result<(), Box<dyn std::error::Error>> {
    let stack = TestStack::new()?;
    let ana = create_user(&stack, "ana", None)?;

    let doomed = ana.clone();
    let outcome = stack.run_transaction(move |scope, observer| {
        if let Some(e) = scope.delete(&doomed) {
            return observer.on_abort(e);
        }
        let post = scope.create::<Post, _>(|post, _| {
            post.set_desc("orphan");
            post.set_owner(&doomed);
        });
        match post.error() {
            Some(e) => observer.on_abort(e.clone()),
            None => observer.on_success(),
        }
    });
    assert!(outcome.is_some());

    let scope = stack.request();
    assert_eq!(scope.fetch_by_identity(&ana).into_result()?.len(), 1);
    assert!(scope.fetch_all::<Post>().into_result()?.is_empty());
    Ok(())
}

#[test]
fn invalid_create_is_rolled_back() -> Result<(), Box<dyn std::error::Error>> {
    let stack = TestStack::new()?;
    let scope = stack.request();

    let result = scope.create::<User, _>(|user, _| user.set_email(Some("nameless@x.com")));
    assert!(matches!(result.error(), Some(StackError::System(_))));
    assert!(result.is_empty());

    // The rejected insert does not ride along with the next save.
    create_user(&stack, "paco", None)?;
    let users = scope.fetch_all::<User>().into_result()?;
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].name(), Some("paco"));
    Ok(())
}

#[test]
fn invalid_update_keeps_the_stored_values() -> Result<(), Box<dyn std::error::Error>> {
    let stack = TestStack::new()?;
    let scope = stack.request();
    let paco = create_user(&stack, "paco", None)?;

    let result = scope.update(&paco, |user, _| {
        user.as_record_mut().set("name", Option::<&str>::None);
    });
    assert!(matches!(result.error(), Some(StackError::System(_))));

    let fetched = scope.fetch_by_identity(&paco).into_result()?;
    assert_eq!(fetched[0].name(), Some("paco"));
    Ok(())
}

#[test]
fn unknown_entities_and_type_mismatches_are_invalid_state() -> Result<(), Box<dyn std::error::Error>> {
    let stack = TestStack::new()?;
    let scope = stack.request();
    let paco = create_user(&stack, "paco", None)?;

    let unknown = scope.fetch_records(&Query::new("Comment"));
    assert!(matches!(unknown.error(), Some(StackError::InvalidState(_))));

    let mismatch = scope.fetch_by_id::<Post>(paco.id());
    assert!(matches!(mismatch.error(), Some(StackError::InvalidState(_))));

    let wrong_query = scope.fetch::<Post>(&Query::of::<User>());
    assert!(matches!(wrong_query.error(), Some(StackError::InvalidState(_))));
    Ok(())
}

// ============================================================================
// Re-entrancy
// ============================================================================

#[test]
fn initializer_may_call_back_into_its_scope() -> Result<(), Box<dyn std::error::Error>> {
    let stack = TestStack::new()?;
    let scope = stack.request();

    let post = scope
        .create::<Post, _>(|post, scope| {
            post.set_desc("first post");
            post.set_created_at(1_700_000_000_000);
            if let Some(owner) = scope
                .create::<User, _>(|user, _| user.set_name("paco"))
                .into_first()
            {
                post.set_owner(&owner);
            }
        })
        .into_first()
        .ok_or("no post")?;

    assert_eq!(post.created_at(), Some(1_700_000_000_000));
    let owner = post.owner(&scope).into_first().ok_or("owner missing")?;
    assert_eq!(owner.name(), Some("paco"));
    Ok(())
}

#[test]
fn nested_update_of_the_same_object_rejects_the_outer_write() -> Result<(), Box<dyn std::error::Error>> {
    let stack = TestStack::new()?;
    let scope = stack.request();
    let paco = create_user(&stack, "paco", None)?;

    let outer = scope.update(&paco, |user, scope| {
        let inner = scope.update(&*user, |inner, _| inner.set_email(Some("inner@x.com")));
        assert!(inner.is_ok(), "inner update failed: {:?}", inner.error());
        user.set_name("outer");
    });
    assert!(matches!(outer.error(), Some(StackError::InvalidState(_))));

    let fetched = scope.fetch_by_identity(&paco).into_first().ok_or("user missing")?;
    assert_eq!(fetched.name(), Some("paco"));
    assert_eq!(fetched.email(), Some("inner@x.com"));
    Ok(())
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn create_then_refetch_preserves_fields(
        name in "[a-zA-Z ]{1,24}",
        email in proptest::option::of("[a-z]{1,8}@[a-z]{1,8}\\.com"),
    ) {
        let stack = TestStack::with_kind(StoreKind::Memory).map_err(|e| TestCaseError::fail(e.to_string()))?;
        let created = create_user(&stack, &name, email.as_deref()).map_err(|e| TestCaseError::fail(e.to_string()))?;
        let fetched = stack.request().fetch_by_identity(&created).into_first();

        prop_assert_eq!(fetched.as_ref().and_then(User::name), Some(name.as_str()));
        prop_assert_eq!(fetched.as_ref().and_then(User::email), email.as_deref());
    }
}
