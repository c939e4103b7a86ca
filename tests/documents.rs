use relaydb_schema::catalog::schema::RelationType;
use relaydb_schema::query::Query;
use relaydb_schema::{
    AttributeSpec, Authorization, CollectionSpec, Document, EngineConfig, ErrorCode, MemorySink,
    MemoryStore, Permission, PermissionSet, RelationshipSpec, Role, SchemaEngine, Value,
    WorkerOutcome,
};
use std::sync::Arc;

const DB: &str = "main";

struct Fixture {
    store: Arc<MemoryStore>,
    engine: SchemaEngine<MemoryStore>,
    admin: Authorization,
}

async fn setup_with(config: EngineConfig) -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let engine = SchemaEngine::new(store.clone(), Arc::new(MemorySink::new()), config);
    let admin = Authorization::privileged();
    engine.create_database(&admin, DB, "Main").await.expect("database");
    let fx = Fixture {
        store,
        engine,
        admin,
    };

    fx.collection(CollectionSpec::new("posts", "Posts").permissions(&["read:any", "create:any"]))
        .await;
    fx.collection(CollectionSpec::new("authors", "Authors").document_security(true))
        .await;
    fx.collection(
        CollectionSpec::new("notes", "Notes")
            .document_security(true)
            .permissions(&["create:users"]),
    )
    .await;
    fx.collection(
        CollectionSpec::new("people", "People").permissions(&["read:any", "create:any"]),
    )
    .await;

    fx.available("posts", AttributeSpec::string("title", 128)).await;
    fx.available(
        "posts",
        AttributeSpec::relationship(
            "author",
            RelationshipSpec::new("authors", RelationType::ManyToOne),
        ),
    )
    .await;
    fx.available("authors", AttributeSpec::string("name", 64)).await;
    fx.available("notes", AttributeSpec::string("body", 256)).await;
    fx.available("people", AttributeSpec::string("name", 64)).await;
    fx.available(
        "people",
        AttributeSpec::relationship(
            "friends",
            RelationshipSpec::new("people", RelationType::ManyToMany),
        ),
    )
    .await;
    fx
}

async fn setup() -> Fixture {
    setup_with(EngineConfig::default()).await
}

fn reader(user: &str) -> Authorization {
    Authorization::new([Role::Any, Role::users(), Role::user(user)])
}

fn readable_by(user: &str) -> PermissionSet {
    PermissionSet::new([Permission::read(Role::user(user))])
}

impl Fixture {
    async fn collection(&self, spec: CollectionSpec) {
        self.engine
            .create_collection(&self.admin, DB, spec)
            .await
            .expect("collection");
    }

    async fn available(&self, collection_id: &str, spec: AttributeSpec) {
        let key = spec.key.clone();
        self.engine
            .create_attribute(&self.admin, DB, collection_id, spec)
            .await
            .expect("create attribute");
        self.engine
            .complete_attribute(&self.admin, DB, collection_id, &key, WorkerOutcome::Succeeded)
            .await
            .expect("complete attribute");
    }

    async fn seed(&self, collection_id: &str, document: Document) -> Document {
        self.engine
            .create_document(&self.admin, DB, collection_id, document)
            .await
            .expect("seed document")
    }
}

fn friends(document: &Document) -> &[Value] {
    match document.field("friends") {
        Some(Value::List(items)) => items,
        other => panic!("expected a friend list, got {other:?}"),
    }
}

#[tokio::test]
async fn collection_permissions_gate_documents() {
    let fx = setup().await;
    let created = fx
        .engine
        .create_document(
            &reader("u1"),
            DB,
            "posts",
            Document::new("p1").with_field("title", "Hello"),
        )
        .await
        .expect("create:any");
    assert_eq!(created.database_id, DB);
    assert_eq!(created.collection_id, "posts");

    let read = fx
        .engine
        .get_document(&reader("u2"), DB, "posts", "p1")
        .await
        .expect("read:any");
    assert_eq!(read.field("title"), Some(&Value::from("Hello")));

    let err = fx
        .engine
        .delete_document(&reader("u1"), DB, "posts", "p1")
        .await
        .expect_err("no delete grant");
    assert_eq!(err.code(), ErrorCode::Unauthorized);

    let err = fx
        .engine
        .create_document(&reader("u1"), DB, "authors", Document::new("a1"))
        .await
        .expect_err("no create grant");
    assert_eq!(err.code(), ErrorCode::Unauthorized);
}

#[tokio::test]
async fn generated_ids_and_granted_roles() {
    let fx = setup().await;
    let created = fx
        .engine
        .create_document(
            &reader("u1"),
            DB,
            "notes",
            Document::new("")
                .with_field("body", "mine")
                .with_permissions(readable_by("u1")),
        )
        .await
        .expect("create");
    assert_eq!(created.id.len(), 32);

    let err = fx
        .engine
        .create_document(
            &reader("u1"),
            DB,
            "notes",
            Document::new("n2").with_permissions(readable_by("u2")),
        )
        .await
        .expect_err("granting a foreign role");
    assert_eq!(err.code(), ErrorCode::Unauthorized);
}

#[tokio::test]
async fn document_security_lists_only_readable_documents() {
    let fx = setup().await;
    for (id, owner) in [("n1", "u1"), ("n2", "u2"), ("n3", "u1")] {
        fx.seed(
            "notes",
            Document::new(id)
                .with_field("body", id)
                .with_permissions(readable_by(owner)),
        )
        .await;
    }

    let u1 = reader("u1");
    fx.engine
        .get_document(&u1, DB, "notes", "n1")
        .await
        .expect("granted on the document");
    let err = fx
        .engine
        .get_document(&u1, DB, "notes", "n2")
        .await
        .expect_err("someone else's note");
    assert_eq!(err.code(), ErrorCode::Unauthorized);

    let listed = fx
        .engine
        .list_documents(&u1, DB, "notes", Vec::new())
        .await
        .expect("list");
    assert_eq!(listed.total, 2);
    let ids: Vec<&str> = listed.documents.iter().map(|d| d.id.as_str()).collect();
    assert_eq!(ids, ["n1", "n3"]);

    let page = fx
        .engine
        .list_documents(&u1, DB, "notes", vec![Query::Limit(1)])
        .await
        .expect("page");
    assert_eq!(page.total, 2);
    assert_eq!(page.documents.len(), 1);
}

#[tokio::test]
async fn listing_without_any_grant_is_unauthorized() {
    let fx = setup().await;
    fx.seed("people", Document::new("alice").with_field("name", "Alice"))
        .await;
    fx.engine
        .create_collection(&fx.admin, DB, CollectionSpec::new("secrets", "Secrets"))
        .await
        .expect("collection");
    let err = fx
        .engine
        .list_documents(&reader("u1"), DB, "secrets", Vec::new())
        .await
        .expect_err("no read grant");
    assert_eq!(err.code(), ErrorCode::Unauthorized);

    let listed = fx
        .engine
        .list_documents(&reader("u1"), DB, "people", Vec::new())
        .await
        .expect("read:any");
    assert_eq!(listed.total, 1);
}

#[tokio::test]
async fn nested_documents_need_create_on_their_collection() {
    let fx = setup().await;
    let post = || {
        Document::new("p1")
            .with_field("title", "Nested")
            .with_field("author", Document::new("").with_field("name", "Ada"))
    };

    let err = fx
        .engine
        .create_document(&reader("u1"), DB, "posts", post())
        .await
        .expect_err("no create on authors");
    assert_eq!(err.code(), ErrorCode::Unauthorized);
    assert!(fx.store.document_records(DB, "posts").is_empty());
    assert!(fx.store.document_records(DB, "authors").is_empty());

    let created = fx.seed("posts", post()).await;
    let authors = fx.store.document_records(DB, "authors");
    assert_eq!(authors.len(), 1);
    assert!(!authors[0].id.is_empty());
    assert_eq!(authors[0].field("name"), Some(&Value::from("Ada")));

    match created.field("author") {
        Some(Value::Document(author)) => {
            assert_eq!(author.id, authors[0].id);
            assert_eq!(author.collection_id, "authors");
        }
        other => panic!("expected the author inline, got {other:?}"),
    }
    let stored = fx.store.document_records(DB, "posts");
    assert_eq!(
        stored[0].field("author"),
        Some(&Value::Reference(authors[0].id.clone()))
    );
}

#[tokio::test]
async fn unreadable_related_documents_are_hidden() {
    let fx = setup().await;
    fx.seed(
        "authors",
        Document::new("a1")
            .with_field("name", "Ada")
            .with_permissions(readable_by("u1")),
    )
    .await;
    fx.seed("authors", Document::new("a2").with_field("name", "Bob"))
        .await;
    fx.seed(
        "posts",
        Document::new("p1")
            .with_field("title", "First")
            .with_field("author", "a1"),
    )
    .await;
    fx.seed(
        "posts",
        Document::new("p2")
            .with_field("title", "Second")
            .with_field("author", Value::Reference("a2".into())),
    )
    .await;

    let u1 = reader("u1");
    let first = fx
        .engine
        .get_document(&u1, DB, "posts", "p1")
        .await
        .expect("p1");
    match first.field("author") {
        Some(Value::Document(author)) => assert_eq!(author.field("name"), Some(&Value::from("Ada"))),
        other => panic!("expected a readable author, got {other:?}"),
    }
    let second = fx
        .engine
        .get_document(&u1, DB, "posts", "p2")
        .await
        .expect("p2");
    assert_eq!(second.field("author"), Some(&Value::Null));
}

#[tokio::test]
async fn missing_references_are_rejected_on_write() {
    let fx = setup().await;
    let err = fx
        .engine
        .create_document(
            &fx.admin,
            DB,
            "people",
            Document::new("alice").with_field("friends", Value::List(vec![Value::from("ghost")])),
        )
        .await
        .expect_err("dangling");
    assert_eq!(err.code(), ErrorCode::DocumentNotFound);

    let err = fx
        .engine
        .create_document(
            &fx.admin,
            DB,
            "people",
            Document::new("alice").with_field("friends", "bob"),
        )
        .await
        .expect_err("single value for a list relationship");
    assert_eq!(err.code(), ErrorCode::InvalidValue);
}

#[tokio::test]
async fn self_referential_cycles_terminate() {
    let fx = setup().await;
    fx.seed("people", Document::new("bob").with_field("name", "Bob"))
        .await;
    fx.seed(
        "people",
        Document::new("alice")
            .with_field("name", "Alice")
            .with_field("friends", Value::List(vec![Value::from("bob")])),
    )
    .await;
    fx.engine
        .update_document(
            &fx.admin,
            DB,
            "people",
            "bob",
            Document::default().with_field("friends", Value::List(vec![Value::from("alice")])),
        )
        .await
        .expect("close the cycle");

    let alice = fx
        .engine
        .get_document(&reader("u1"), DB, "people", "alice")
        .await
        .expect("alice");
    let bob = match friends(&alice) {
        [Value::Document(bob)] => bob,
        other => panic!("expected bob inline, got {other:?}"),
    };
    assert_eq!(bob.id, "bob");
    assert_eq!(friends(bob), [Value::Reference("alice".into())]);
}

#[tokio::test]
async fn depth_limit_leaves_references() {
    let fx = setup_with(EngineConfig::default().with_max_relationship_depth(1)).await;
    fx.seed("people", Document::new("a").with_field("name", "A"))
        .await;
    fx.seed(
        "people",
        Document::new("b").with_field("friends", Value::List(vec![Value::from("a")])),
    )
    .await;
    fx.seed(
        "people",
        Document::new("c").with_field("friends", Value::List(vec![Value::from("b")])),
    )
    .await;

    let c = fx
        .engine
        .get_document(&reader("u1"), DB, "people", "c")
        .await
        .expect("c");
    let b = match friends(&c) {
        [Value::Document(b)] => b,
        other => panic!("expected b inline, got {other:?}"),
    };
    assert_eq!(friends(b), [Value::Reference("a".into())]);

    let err = fx
        .engine
        .create_document(
            &fx.admin,
            DB,
            "people",
            Document::new("d").with_field(
                "friends",
                Value::List(vec![Value::from(
                    Document::new("e")
                        .with_field("friends", Value::List(vec![Value::from("a")])),
                )]),
            ),
        )
        .await
        .expect_err("nested past the limit");
    assert_eq!(err.code(), ErrorCode::InvalidValue);
}

#[tokio::test]
async fn disabled_collections_are_hidden_from_callers() {
    let fx = setup().await;
    fx.collection(CollectionSpec::new("drafts", "Drafts").enabled(false).permissions(&["read:any"]))
        .await;
    let err = fx
        .engine
        .list_documents(&reader("u1"), DB, "drafts", Vec::new())
        .await
        .expect_err("disabled");
    assert_eq!(err.code(), ErrorCode::CollectionNotFound);
    fx.engine
        .list_documents(&fx.admin, DB, "drafts", Vec::new())
        .await
        .expect("privileged");
}

#[tokio::test]
async fn nested_documents_follow_their_collection_schema() {
    let fx = setup().await;
    let u1 = reader("u1");
    let with_friend = |friend: Document| {
        Document::new("root").with_field("friends", Value::List(vec![Value::from(friend)]))
    };

    let err = fx
        .engine
        .create_document(
            &u1,
            DB,
            "people",
            with_friend(Document::new("f1").with_field("bogus", 42i64)),
        )
        .await
        .expect_err("unknown attribute");
    assert_eq!(err.code(), ErrorCode::InvalidValue);

    let err = fx
        .engine
        .create_document(
            &u1,
            DB,
            "people",
            with_friend(Document::new("f1").with_field("name", 42i64)),
        )
        .await
        .expect_err("wrong type");
    assert_eq!(err.code(), ErrorCode::InvalidValue);
    assert!(fx.store.document_records(DB, "people").is_empty());

    fx.seed("people", Document::new("f2").with_field("name", "Existing"))
        .await;
    let err = fx
        .engine
        .create_document(
            &fx.admin,
            DB,
            "people",
            with_friend(Document::new("f2").with_field("bogus", 1i64)),
        )
        .await
        .expect_err("unknown attribute on update");
    assert_eq!(err.code(), ErrorCode::InvalidValue);
}

#[tokio::test]
async fn nested_documents_grant_only_held_roles() {
    let fx = setup().await;
    let u1 = reader("u1");
    let nested = |owner: &str| {
        Document::new("root").with_field(
            "friends",
            Value::List(vec![Value::from(
                Document::new("f1")
                    .with_field("name", "Friend")
                    .with_permissions(readable_by(owner)),
            )]),
        )
    };

    let err = fx
        .engine
        .create_document(&u1, DB, "people", nested("someone_else"))
        .await
        .expect_err("foreign grant");
    assert_eq!(err.code(), ErrorCode::Unauthorized);
    assert!(fx.store.document_records(DB, "people").is_empty());

    fx.engine
        .create_document(&u1, DB, "people", nested("u1"))
        .await
        .expect("own grant");
    let stored = fx.store.document_records(DB, "people");
    let friend = stored.iter().find(|d| d.id == "f1").expect("friend stored");
    assert_eq!(friend.permissions, readable_by("u1"));
}

#[tokio::test]
async fn shared_documents_expand_under_every_parent() {
    let fx = setup().await;
    fx.seed("people", Document::new("shared").with_field("name", "Shared"))
        .await;
    for id in ["a", "b"] {
        fx.seed(
            "people",
            Document::new(id).with_field("friends", Value::List(vec![Value::from("shared")])),
        )
        .await;
    }
    fx.seed(
        "people",
        Document::new("root").with_field(
            "friends",
            Value::List(vec![Value::from("a"), Value::from("b")]),
        ),
    )
    .await;

    let root = fx
        .engine
        .get_document(&reader("u1"), DB, "people", "root")
        .await
        .expect("root");
    let children = friends(&root);
    assert_eq!(children.len(), 2);
    for child in children {
        let child = match child {
            Value::Document(child) => child,
            other => panic!("expected a friend inline, got {other:?}"),
        };
        match friends(child) {
            [Value::Document(shared)] => assert_eq!(shared.id, "shared"),
            other => panic!("expected shared inline under {}, got {other:?}", child.id),
        }
    }
}
