//! Integration tests for relationship persistence and hydration.

use onyx_core::catalog::{
    CascadePolicy, EntityDef, FetchPolicy, FieldDef, FieldType, OrderBy, RelationshipDef,
    ScalarType, SchemaBundle,
};
use onyx_core::{EngineConfig, Entity, EntityHandle, EntityManager, Error, Related};
use onyx_proto::{Criterion, Query, Value};

struct TestContext {
    manager: EntityManager,
    _dir: tempfile::TempDir,
}

impl TestContext {
    fn new() -> Self {
        Self::with_config(|config| config)
    }

    fn with_config(configure: impl FnOnce(EngineConfig) -> EngineConfig) -> Self {
        init_tracing();
        let dir = tempfile::tempdir().unwrap();
        let config = configure(EngineConfig::new(dir.path()).with_fanout_threads(2));
        let manager = EntityManager::open(config).unwrap();
        manager.apply_schema(schema()).unwrap();
        Self { manager, _dir: dir }
    }
}

fn string_id(name: &str) -> EntityDef {
    EntityDef::new(name, "id").with_field(FieldDef::new("id", FieldType::scalar(ScalarType::String)))
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn schema() -> SchemaBundle {
    let team = string_id("Team").with_relationship(
        RelationshipDef::one_to_many("players", "Player")
            .with_cascade(CascadePolicy::None)
            .with_fetch(FetchPolicy::Lazy),
    );
    let player = string_id("Player")
        .with_field(FieldDef::optional("name", FieldType::scalar(ScalarType::String)));

    let library = string_id("Library").with_relationship(
        RelationshipDef::one_to_many("books", "Book")
            .with_inverse("library")
            .with_cascade(CascadePolicy::All)
            .with_fetch(FetchPolicy::Lazy),
    );
    let book = string_id("Book")
        .with_field(FieldDef::optional("title", FieldType::scalar(ScalarType::String)))
        .with_relationship(RelationshipDef::many_to_one("library", "Library").with_inverse("books"))
        .with_default_order(OrderBy::asc("title"));

    let node = string_id("Node").with_relationship(
        RelationshipDef::many_to_one("next", "Node")
            .with_cascade(CascadePolicy::Save)
            .with_fetch(FetchPolicy::Eager),
    );

    let peer = string_id("Peer").with_relationship(
        RelationshipDef::many_to_one("partner", "Peer")
            .with_cascade(CascadePolicy::All)
            .with_fetch(FetchPolicy::Eager),
    );

    let post = string_id("Post").with_relationship(
        RelationshipDef::many_to_many("tags", "Tag")
            .with_inverse("posts")
            .with_cascade(CascadePolicy::Save)
            .with_fetch(FetchPolicy::Lazy),
    );
    let tag = string_id("Tag")
        .with_relationship(RelationshipDef::many_to_many("posts", "Post").with_inverse("tags"));

    let account = string_id("Account").with_relationship(
        RelationshipDef::one_to_one("profile", "Profile")
            .with_cascade(CascadePolicy::All)
            .with_fetch(FetchPolicy::Eager),
    );
    let profile = string_id("Profile")
        .with_field(FieldDef::optional("bio", FieldType::scalar(ScalarType::String)));

    SchemaBundle::new(1)
        .with_entity(team)
        .with_entity(player)
        .with_entity(library)
        .with_entity(book)
        .with_entity(node)
        .with_entity(peer)
        .with_entity(post)
        .with_entity(tag)
        .with_entity(account)
        .with_entity(profile)
}

fn handle(entity: &str, id: &str) -> EntityHandle {
    EntityHandle::new(Entity::new(entity).with("id", id))
}

fn related(handle: &EntityHandle, relationship: &str) -> Related {
    handle.read().related(relationship).cloned().unwrap()
}

#[test]
fn test_cascade_none_links_existing_keys() {
    let ctx = TestContext::new();
    let team = handle("Team", "t1");
    team.write()
        .set_many("players", vec![handle("Player", "p1"), handle("Player", "p2")]);
    ctx.manager.save(&team).unwrap();

    // members are linked by key without being saved
    assert!(!ctx.manager.exists("Player", "p1").unwrap());
    let loaded = ctx.manager.find_by_id("Team", "t1").unwrap().unwrap();
    let players = related(&loaded, "players");
    assert_eq!(players.len(), 2);
    assert!(!players.as_lazy().unwrap().is_loaded());

    loaded.write().set_many("players", Vec::new());
    ctx.manager.save(&loaded).unwrap();
    let reloaded = ctx.manager.find_by_id("Team", "t1").unwrap().unwrap();
    assert_eq!(related(&reloaded, "players").len(), 0);
}

#[test]
fn test_dangling_member_fails_hydration() {
    let ctx = TestContext::new();
    let team = handle("Team", "t1");
    team.write().set_many("players", vec![handle("Player", "ghost")]);
    ctx.manager.save(&team).unwrap();

    let loaded = ctx.manager.find_by_id("Team", "t1").unwrap().unwrap();
    let players = related(&loaded, "players");
    let lazy = players.as_lazy().unwrap();
    assert!(matches!(
        ctx.manager.initialize(lazy),
        Err(Error::RelationshipHydration { .. })
    ));
}

fn seed_library(manager: &EntityManager) -> EntityHandle {
    let library = handle("Library", "central");
    let books = ["c", "a", "b"]
        .iter()
        .map(|title| {
            EntityHandle::new(
                Entity::new("Book")
                    .with("id", format!("book-{}", title))
                    .with("title", *title),
            )
        })
        .collect();
    library.write().set_many("books", books);
    manager.save(&library).unwrap();
    library
}

#[test]
fn test_lazy_collection_initialize() {
    let ctx = TestContext::new();
    seed_library(&ctx.manager);

    let loaded = ctx.manager.find_by_id("Library", "central").unwrap().unwrap();
    let books = related(&loaded, "books");
    let lazy = books.as_lazy().unwrap();
    assert_eq!(lazy.len(), 3);
    assert!(!lazy.is_loaded());

    let members = ctx.manager.initialize(lazy).unwrap();
    assert!(lazy.is_loaded());
    let titles: Vec<Value> = members.iter().map(|b| b.get("title").unwrap()).collect();
    assert_eq!(titles, vec![Value::from("a"), Value::from("b"), Value::from("c")]);

    // the inverse side was written by the cascade
    let book = ctx.manager.find_by_id("Book", "book-a").unwrap().unwrap();
    let owner = ctx.manager.find_relationship(&book, "library").unwrap();
    assert_eq!(owner.as_one().unwrap().get("id"), Some(Value::from("central")));
}

#[test]
fn test_cascade_save_is_idempotent() {
    let ctx = TestContext::new();
    let library = seed_library(&ctx.manager);
    ctx.manager.save(&library).unwrap();
    ctx.manager.save(&library).unwrap();

    assert_eq!(ctx.manager.count(&Query::new("Book")).unwrap(), 3);
    let loaded = ctx.manager.find_by_id("Library", "central").unwrap().unwrap();
    assert_eq!(related(&loaded, "books").len(), 3);
}

#[test]
fn test_bulk_delete_cascades_without_counting_members() {
    let ctx = TestContext::new();
    seed_library(&ctx.manager);

    let query = Query::new("Library").with_criterion(Criterion::eq("id", "central"));
    assert_eq!(ctx.manager.execute_delete(&query).unwrap(), 1);
    assert_eq!(ctx.manager.count(&Query::new("Book")).unwrap(), 0);
}

#[test]
fn test_cyclic_graph_saves_and_loads_once() {
    let ctx = TestContext::new();
    let a = handle("Node", "a");
    let b = handle("Node", "b");
    a.write().set_one("next", Some(b.clone()));
    b.write().set_one("next", Some(a.clone()));
    ctx.manager.save(&a).unwrap();
    assert!(ctx.manager.exists("Node", "b").unwrap());

    let loaded = ctx.manager.find_by_id("Node", "a").unwrap().unwrap();
    let next = related(&loaded, "next").as_one().cloned().unwrap();
    assert_eq!(next.get("id"), Some(Value::from("b")));
    let back = related(&next, "next").as_one().cloned().unwrap();
    assert!(back.ptr_eq(&loaded));

    // break the cycle so the handles can be dropped
    loaded.write().clear_relationships();
}

#[test]
fn test_to_one_replacement_deletes_orphan() {
    let ctx = TestContext::new();
    let account = handle("Account", "acc");
    account.write().set_one("profile", Some(handle("Profile", "old")));
    ctx.manager.save(&account).unwrap();
    assert!(ctx.manager.exists("Profile", "old").unwrap());

    account.write().set_one("profile", Some(handle("Profile", "new")));
    ctx.manager.save(&account).unwrap();
    assert!(!ctx.manager.exists("Profile", "old").unwrap());
    assert!(ctx.manager.exists("Profile", "new").unwrap());

    let loaded = ctx.manager.find_by_id("Account", "acc").unwrap().unwrap();
    let profile = related(&loaded, "profile");
    assert_eq!(profile.as_one().unwrap().get("id"), Some(Value::from("new")));

    ctx.manager.delete(&loaded).unwrap();
    assert!(!ctx.manager.exists("Profile", "new").unwrap());
}

#[test]
fn test_cyclic_cascade_delete_terminates() {
    let ctx = TestContext::new();
    let a = handle("Peer", "a");
    let b = handle("Peer", "b");
    a.write().set_one("partner", Some(b.clone()));
    b.write().set_one("partner", Some(a.clone()));
    ctx.manager.save(&a).unwrap();
    assert!(ctx.manager.exists("Peer", "b").unwrap());

    assert!(ctx.manager.delete(&a).unwrap());
    assert!(!ctx.manager.exists("Peer", "a").unwrap());
    assert!(!ctx.manager.exists("Peer", "b").unwrap());

    a.write().clear_relationships();
}

#[test]
fn test_many_to_many_links_both_sides() {
    let ctx = TestContext::new();
    let first = handle("Post", "p1");
    first
        .write()
        .set_many("tags", vec![handle("Tag", "rust"), handle("Tag", "db")]);
    ctx.manager.save(&first).unwrap();
    let second = handle("Post", "p2");
    second.write().set_many("tags", vec![handle("Tag", "db")]);
    ctx.manager.save(&second).unwrap();

    let db = ctx.manager.find_by_id("Tag", "db").unwrap().unwrap();
    assert_eq!(related(&db, "posts").len(), 2);
    let rust = ctx.manager.find_by_id("Tag", "rust").unwrap().unwrap();
    assert_eq!(related(&rust, "posts").len(), 1);

    // dropping a tag unlinks the post from it
    first.write().set_many("tags", vec![handle("Tag", "rust")]);
    ctx.manager.save(&first).unwrap();
    let db = ctx.manager.find_by_id("Tag", "db").unwrap().unwrap();
    let posts = ctx.manager.initialize(related(&db, "posts").as_lazy().unwrap()).unwrap();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].get("id"), Some(Value::from("p2")));
}

#[test]
fn test_cascade_depth_limit() {
    let ctx = TestContext::with_config(|config| config.with_max_cascade_depth(2));
    let nodes: Vec<EntityHandle> = ["a", "b", "c", "d"].iter().map(|id| handle("Node", id)).collect();
    for pair in nodes.windows(2) {
        pair[0].write().set_one("next", Some(pair[1].clone()));
    }
    assert!(matches!(
        ctx.manager.save(&nodes[0]),
        Err(Error::CascadeDepthExceeded { .. })
    ));

    // a chain within the limit saves
    let short = handle("Node", "x");
    short.write().set_one("next", Some(handle("Node", "y")));
    ctx.manager.save(&short).unwrap();
    assert!(ctx.manager.exists("Node", "y").unwrap());
}
