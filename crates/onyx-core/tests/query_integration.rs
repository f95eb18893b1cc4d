//! Integration tests for query execution.

use std::collections::BTreeSet;

use onyx_core::catalog::{
    CascadePolicy, EntityDef, FetchPolicy, FieldDef, FieldType, RelationshipDef, ScalarType,
    SchemaBundle,
};
use onyx_core::query::{CriterionEvaluator, Projection, QueryController};
use onyx_core::{EngineConfig, Entity, EntityHandle, EntityManager, Error, Partition};
use onyx_proto::{Criterion, OrderSpec, Pagination, Query, UpdateInstruction, Value};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

struct TestContext {
    manager: EntityManager,
    _dir: tempfile::TempDir,
}

impl TestContext {
    fn new() -> Self {
        init_tracing();
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::new(dir.path()).with_fanout_threads(2);
        let manager = EntityManager::open(config).unwrap();
        manager.apply_schema(schema()).unwrap();
        Self { manager, _dir: dir }
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn schema() -> SchemaBundle {
    let test_entity = EntityDef::new("TestEntity", "id")
        .with_field(FieldDef::new("id", FieldType::scalar(ScalarType::String)))
        .with_field(FieldDef::optional("stringValue", FieldType::scalar(ScalarType::String)))
        .with_field(FieldDef::optional("intValue", FieldType::scalar(ScalarType::Int32)).with_index());

    let reading = EntityDef::new("Reading", "id")
        .with_field(FieldDef::new("id", FieldType::scalar(ScalarType::Int64)))
        .with_field(FieldDef::optional("region", FieldType::scalar(ScalarType::String)))
        .with_field(FieldDef::optional("level", FieldType::scalar(ScalarType::Int32)).with_index())
        .with_partition_field("region");

    let owner = EntityDef::new("Owner", "id")
        .with_field(FieldDef::new("id", FieldType::scalar(ScalarType::String)))
        .with_field(FieldDef::optional("name", FieldType::scalar(ScalarType::String)))
        .with_relationship(
            RelationshipDef::one_to_many("pets", "Pet")
                .with_inverse("owner")
                .with_cascade(CascadePolicy::All)
                .with_fetch(FetchPolicy::Eager),
        );
    let pet = EntityDef::new("Pet", "id")
        .with_sequence_identifier()
        .with_field(FieldDef::new("id", FieldType::scalar(ScalarType::Int64)))
        .with_field(FieldDef::optional("name", FieldType::scalar(ScalarType::String)).with_index())
        .with_relationship(RelationshipDef::many_to_one("owner", "Owner").with_inverse("pets"));

    let station = EntityDef::new("Station", "id")
        .with_field(FieldDef::new("id", FieldType::scalar(ScalarType::String)))
        .with_field(FieldDef::optional("region", FieldType::scalar(ScalarType::String)))
        .with_partition_field("region")
        .with_relationship(
            RelationshipDef::one_to_many("notes", "Note")
                .with_inverse("station")
                .with_cascade(CascadePolicy::All)
                .with_fetch(FetchPolicy::Lazy),
        );
    let note = EntityDef::new("Note", "id")
        .with_field(FieldDef::new("id", FieldType::scalar(ScalarType::String)))
        .with_field(FieldDef::optional("text", FieldType::scalar(ScalarType::String)))
        .with_relationship(RelationshipDef::many_to_one("station", "Station").with_inverse("notes"));

    let sample = EntityDef::new("Sample", "id")
        .with_fields([
            FieldDef::new("id", FieldType::scalar(ScalarType::Int64)),
            FieldDef::optional("a", FieldType::scalar(ScalarType::Int32)).with_index(),
            FieldDef::optional("b", FieldType::scalar(ScalarType::String)),
            FieldDef::optional("c", FieldType::scalar(ScalarType::Int64)),
        ]);

    SchemaBundle::new(1)
        .with_entity(test_entity)
        .with_entity(reading)
        .with_entity(owner)
        .with_entity(pet)
        .with_entity(station)
        .with_entity(note)
        .with_entity(sample)
}

fn seed_test_entities(manager: &EntityManager) {
    let values = [
        Some("Some test strin"),
        Some("Some test strin1"),
        Some("Some test strin1"),
        Some("Some test strin2"),
        None,
        None,
    ];
    for (i, value) in values.into_iter().enumerate() {
        let id = if i == 0 {
            "FIRST ONE".to_string()
        } else {
            format!("FIRST ONE{}", i)
        };
        let entity = Entity::new("TestEntity")
            .with("id", id)
            .with("stringValue", value)
            .with("intValue", i as i32);
        manager.save(&EntityHandle::new(entity)).unwrap();
    }
}

fn ids(results: &[EntityHandle]) -> Vec<Value> {
    results.iter().map(|h| h.get("id").unwrap()).collect()
}

#[test]
fn test_contains_or_superset() {
    let ctx = TestContext::new();
    seed_test_entities(&ctx.manager);

    let query = Query::new("TestEntity").with_criterion(
        Criterion::contains("stringValue", "Some tes")
            .or(Criterion::contains("stringValue", "Some test strin1")),
    );
    assert_eq!(ctx.manager.execute_query(&query).unwrap().len(), 4);
    assert_eq!(ctx.manager.count(&query).unwrap(), 4);
}

#[test]
fn test_identifier_greater_than() {
    let ctx = TestContext::new();
    seed_test_entities(&ctx.manager);

    let query = Query::new("TestEntity").with_criterion(Criterion::gt("id", "FIRST ONE1"));
    let results = ctx.manager.execute_query(&query).unwrap();
    assert_eq!(results.len(), 4);
    assert!(!ids(&results).contains(&Value::from("FIRST ONE1")));
}

#[test]
fn test_and_not_combination() {
    let ctx = TestContext::new();
    seed_test_entities(&ctx.manager);

    // indexed range, narrowed by a full scan, minus an identifier match
    let query = Query::new("TestEntity").with_criterion(
        Criterion::ge("intValue", 1i32)
            .and(Criterion::not_null("stringValue"))
            .and_not(Criterion::eq("id", "FIRST ONE2")),
    );
    let results = ctx.manager.execute_query(&query).unwrap();
    let found: BTreeSet<String> = ids(&results)
        .into_iter()
        .map(|v| v.as_str().unwrap().to_string())
        .collect();
    let expected: BTreeSet<String> = ["FIRST ONE1", "FIRST ONE3"].iter().map(|s| s.to_string()).collect();
    assert_eq!(found, expected);
}

#[test]
fn test_negated_root_scans_everything() {
    let ctx = TestContext::new();
    seed_test_entities(&ctx.manager);

    let query = Query::new("TestEntity").with_criterion(Criterion::eq("intValue", 0i32).negate());
    assert_eq!(ctx.manager.count(&query).unwrap(), 5);
}

#[test]
fn test_ordering_and_pagination() {
    let ctx = TestContext::new();
    seed_test_entities(&ctx.manager);

    let base = Query::new("TestEntity").with_order(OrderSpec::desc("intValue"));
    let all = ctx.manager.execute_query(&base).unwrap();
    let levels: Vec<Value> = all.iter().map(|h| h.get("intValue").unwrap()).collect();
    assert_eq!(levels, (0..6).rev().map(Value::Int32).collect::<Vec<_>>());

    let cases = [(0, 0, 0..6), (2, 3, 2..5), (4, 10, 4..6), (7, 2, 6..6), (3, 0, 3..6)];
    for (first_row, max_results, expected) in cases {
        let query = base.clone().with_pagination(Pagination::new(first_row, max_results));
        let page = ctx.manager.execute_query(&query).unwrap();
        assert_eq!(ids(&page), ids(&all[expected]), "window {} {}", first_row, max_results);
    }
}

#[test]
fn test_count_without_criteria_uses_store_size() {
    let ctx = TestContext::new();
    seed_test_entities(&ctx.manager);
    assert_eq!(ctx.manager.count(&Query::new("TestEntity")).unwrap(), 6);
    assert_eq!(
        ctx.manager
            .count(&Query::new("TestEntity").with_pagination(Pagination::limit(2)))
            .unwrap(),
        6
    );
}

#[test]
fn test_unknown_entity_and_attribute() {
    let ctx = TestContext::new();
    let err = ctx.manager.execute_query(&Query::new("Nope")).unwrap_err();
    assert!(matches!(err, Error::EntityClassNotFound(_)));

    let query = Query::new("TestEntity").with_criterion(Criterion::eq("missing", 1i32));
    let err = ctx.manager.execute_query(&query).unwrap_err();
    assert!(matches!(err, Error::AttributeMissing { .. }));
}

#[test]
fn test_bulk_update_keeps_index_in_step() {
    let ctx = TestContext::new();
    seed_test_entities(&ctx.manager);

    let update = Query::new("TestEntity")
        .with_criterion(Criterion::is_null("stringValue"))
        .with_update(UpdateInstruction::new("intValue", 100i64));
    assert_eq!(ctx.manager.execute_update(&update).unwrap(), 2);

    let by_index = Query::new("TestEntity").with_criterion(Criterion::eq("intValue", 100i32));
    assert_eq!(ctx.manager.count(&by_index).unwrap(), 2);
    let old = Query::new("TestEntity").with_criterion(Criterion::eq("intValue", 4i32));
    assert_eq!(ctx.manager.count(&old).unwrap(), 0);
}

#[test]
fn test_bulk_update_rejects_identifier_and_bad_type() {
    let ctx = TestContext::new();
    seed_test_entities(&ctx.manager);

    let query = Query::new("TestEntity").with_update(UpdateInstruction::new("id", "X"));
    assert!(matches!(
        ctx.manager.execute_update(&query),
        Err(Error::AttributeUpdate { .. })
    ));

    let query = Query::new("TestEntity").with_update(UpdateInstruction::new("intValue", "ten"));
    assert!(matches!(
        ctx.manager.execute_update(&query),
        Err(Error::AttributeTypeMismatch { .. })
    ));
}

#[test]
fn test_bulk_delete() {
    let ctx = TestContext::new();
    seed_test_entities(&ctx.manager);

    let query = Query::new("TestEntity").with_criterion(Criterion::starts_with("stringValue", "Some test strin1"));
    assert_eq!(ctx.manager.execute_delete(&query).unwrap(), 2);
    assert_eq!(ctx.manager.count(&Query::new("TestEntity")).unwrap(), 4);
    assert!(!ctx.manager.exists("TestEntity", "FIRST ONE1").unwrap());
    assert!(ctx.manager.exists("TestEntity", "FIRST ONE").unwrap());
}

#[test]
fn test_terminated_query_returns_nothing() {
    let ctx = TestContext::new();
    seed_test_entities(&ctx.manager);

    let query = Query::new("TestEntity").with_criterion(Criterion::not_null("stringValue"));
    query.terminate();
    assert!(ctx.manager.execute_query(&query).unwrap().is_empty());
}

fn save_reading(manager: &EntityManager, id: i64, region: Option<&str>, level: i32) -> EntityHandle {
    let handle = EntityHandle::new(
        Entity::new("Reading")
            .with("id", id)
            .with("region", region)
            .with("level", level),
    );
    manager.save(&handle).unwrap();
    handle
}

#[test]
fn test_partitioned_queries() {
    let ctx = TestContext::new();
    save_reading(&ctx.manager, 1, Some("north"), 10);
    save_reading(&ctx.manager, 2, Some("north"), 20);
    save_reading(&ctx.manager, 3, Some("south"), 30);
    save_reading(&ctx.manager, 4, None, 40);

    let all = Query::new("Reading").across_partitions();
    assert_eq!(ctx.manager.count(&all).unwrap(), 4);
    assert_eq!(ctx.manager.execute_query(&all).unwrap().len(), 4);

    let north = Query::new("Reading").in_partition("north");
    assert_eq!(ctx.manager.count(&north).unwrap(), 2);
    assert_eq!(ctx.manager.count(&Query::new("Reading")).unwrap(), 1);
    assert_eq!(ctx.manager.count(&Query::new("Reading").in_partition("east")).unwrap(), 0);

    // index lookup fans out over every partition
    let high = Query::new("Reading")
        .with_criterion(Criterion::ge("level", 20i32))
        .across_partitions();
    assert_eq!(ctx.manager.count(&high).unwrap(), 3);

    let ids_in_north = Query::new("Reading")
        .with_criterion(Criterion::in_list("id", vec![Value::Int64(1), Value::Int64(3)]))
        .in_partition("north");
    assert_eq!(ctx.manager.count(&ids_in_north).unwrap(), 1);
}

#[test]
fn test_partition_change_relocates_record() {
    let ctx = TestContext::new();
    let handle = save_reading(&ctx.manager, 1, Some("north"), 10);
    let old = handle.read().stored_at().unwrap();

    let update = Query::new("Reading")
        .in_partition("north")
        .with_update(UpdateInstruction::new("region", "south"));
    assert_eq!(ctx.manager.execute_update(&update).unwrap(), 1);

    assert!(ctx.manager.find_by_id_in("Reading", 1i64, "north").unwrap().is_none());
    let moved = ctx.manager.find_by_id_in("Reading", 1i64, "south").unwrap().unwrap();
    let new = moved.read().stored_at().unwrap();
    assert_ne!(old.partition, new.partition);

    // the old reference no longer resolves
    let partitions = ctx.manager.context().partitions();
    let descriptor = partitions.descriptor("Reading", old.partition()).unwrap();
    assert!(partitions.record_store(&descriptor).unwrap().get(old.reference).unwrap().is_none());

    let south = Query::new("Reading")
        .with_criterion(Criterion::eq("level", 10i32))
        .in_partition("south");
    assert_eq!(ctx.manager.count(&south).unwrap(), 1);
    let north = Query::new("Reading")
        .with_criterion(Criterion::eq("level", 10i32))
        .in_partition("north");
    assert_eq!(ctx.manager.count(&north).unwrap(), 0);
}

fn seed_owners(manager: &EntityManager) {
    for (owner, pets) in [("ann", vec!["rex", "tom"]), ("bob", vec!["kit"]), ("cy", vec![])] {
        let handle = EntityHandle::new(Entity::new("Owner").with("id", owner).with("name", owner.to_uppercase()));
        let members = pets
            .into_iter()
            .map(|name| EntityHandle::new(Entity::new("Pet").with("name", name)))
            .collect();
        handle.write().set_many("pets", members);
        manager.save(&handle).unwrap();
    }
}

#[test]
fn test_relationship_path_query() {
    let ctx = TestContext::new();
    seed_owners(&ctx.manager);

    let query = Query::new("Owner").with_criterion(Criterion::eq("pets.name", "rex"));
    let results = ctx.manager.execute_query(&query).unwrap();
    assert_eq!(ids(&results), vec![Value::from("ann")]);

    let query = Query::new("Owner").with_criterion(
        Criterion::starts_with("pets.name", "k").or(Criterion::eq("name", "CY")),
    );
    let found: BTreeSet<String> = ids(&ctx.manager.execute_query(&query).unwrap())
        .into_iter()
        .map(|v| v.as_str().unwrap().to_string())
        .collect();
    assert_eq!(found, ["bob", "cy"].iter().map(|s| s.to_string()).collect());

    let query = Query::new("Pet").with_criterion(Criterion::eq("owner.name", "ANN"));
    assert_eq!(ctx.manager.count(&query).unwrap(), 2);
}

#[test]
fn test_relationship_path_across_partitions() {
    let ctx = TestContext::new();
    seed_owners(&ctx.manager);

    // an unpartitioned owner reads the default store under any selector
    let query = Query::new("Owner")
        .with_criterion(Criterion::eq("pets.name", "rex"))
        .across_partitions();
    assert_eq!(ids(&ctx.manager.execute_query(&query).unwrap()), vec![Value::from("ann")]);

    let query = Query::new("Station")
        .with_criterion(Criterion::eq("notes.text", "gale"))
        .across_partitions();
    assert!(matches!(
        ctx.manager.execute_query(&query),
        Err(Error::InvalidQuery(_))
    ));
}

fn save_station(manager: &EntityManager, id: &str, region: &str, texts: &[&str]) -> EntityHandle {
    let station = EntityHandle::new(Entity::new("Station").with("id", id).with("region", region));
    let notes = texts
        .iter()
        .map(|text| {
            EntityHandle::new(
                Entity::new("Note")
                    .with("id", format!("{}-{}", id, text))
                    .with("text", *text),
            )
        })
        .collect();
    station.write().set_many("notes", notes);
    manager.save(&station).unwrap();
    station
}

#[test]
fn test_partition_change_moves_relationships() {
    let ctx = TestContext::new();
    save_station(&ctx.manager, "s1", "north", &["gale", "gust"]);

    let update = Query::new("Station")
        .in_partition("north")
        .with_update(UpdateInstruction::new("region", "south"));
    assert_eq!(ctx.manager.execute_update(&update).unwrap(), 1);
    assert!(ctx.manager.find_by_id_in("Station", "s1", "north").unwrap().is_none());

    let moved = ctx.manager.find_by_id_in("Station", "s1", "south").unwrap().unwrap();
    let notes = moved.read().related("notes").cloned().unwrap();
    assert_eq!(notes.len(), 2);
    let members = ctx.manager.initialize(notes.as_lazy().unwrap()).unwrap();
    assert_eq!(members.len(), 2);

    // the inverse side follows the owner
    let note = ctx.manager.find_by_id("Note", "s1-gale").unwrap().unwrap();
    let owner = ctx.manager.find_relationship(&note, "station").unwrap();
    assert_eq!(owner.as_one().unwrap().get("region"), Some(Value::from("south")));

    let south = Query::new("Station")
        .with_criterion(Criterion::starts_with("notes.text", "g"))
        .in_partition("south");
    assert_eq!(ctx.manager.count(&south).unwrap(), 1);
    let north = Query::new("Station")
        .with_criterion(Criterion::starts_with("notes.text", "g"))
        .in_partition("north");
    assert_eq!(ctx.manager.count(&north).unwrap(), 0);

    let by_owner = Query::new("Note").with_criterion(Criterion::eq("station.region", "south"));
    assert_eq!(ctx.manager.count(&by_owner).unwrap(), 2);
}

#[test]
fn test_concurrent_saves_share_edges_and_partitions() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let config = EngineConfig::new(dir.path())
        .with_fanout_threads(2)
        .with_partition_cache_capacity(8);
    let manager = EntityManager::open(config).unwrap();
    manager.apply_schema(schema()).unwrap();
    save_station(&manager, "hub", "north", &[]);

    const WORKERS: usize = 8;
    std::thread::scope(|scope| {
        for worker in 0..WORKERS {
            let manager = &manager;
            scope.spawn(move || {
                // every worker registers the same new partition value
                let station = EntityHandle::new(
                    Entity::new("Station")
                        .with("id", format!("east-{}", worker))
                        .with("region", "east"),
                );
                manager.save(&station).unwrap();

                // and appends to the hub's inverse set
                let hub = manager.find_by_id_in("Station", "hub", "north").unwrap().unwrap();
                let note = EntityHandle::new(
                    Entity::new("Note")
                        .with("id", format!("note-{}", worker))
                        .with("text", "ping"),
                );
                note.write().set_one("station", Some(hub));
                manager.save(&note).unwrap();
            });
        }
    });

    let hub = manager.find_by_id_in("Station", "hub", "north").unwrap().unwrap();
    let notes = hub.read().related("notes").cloned().unwrap();
    assert_eq!(notes.len(), WORKERS);

    let engine = manager.context().partitions().engine();
    assert_eq!(engine.partitions("Station").unwrap().len(), 2);
    let east = Query::new("Station").in_partition("east");
    assert_eq!(manager.count(&east).unwrap(), WORKERS as u64);

    let stats = manager.cache_stats();
    assert!(stats.hits > 0);
    assert!(stats.misses > 0);
    assert!(stats.entries <= 5 * 8);
}

#[test]
fn test_selection_projection() {
    let ctx = TestContext::new();
    seed_owners(&ctx.manager);

    let query = Query::new("Owner")
        .with_criterion(Criterion::eq("id", "ann"))
        .with_selections(["name", "pets.name", "pets"]);
    let rows = ctx.manager.execute_selection(&query).unwrap();
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(row["name"], Projection::Value(Value::from("ANN")));
    assert_eq!(row["name"].as_value(), Some(&Value::from("ANN")));
    assert!(row["pets"].as_value().is_none());

    let mut names: Vec<Value> = row["pets.name"].as_related().unwrap().to_vec();
    names.sort_by(|a, b| a.total_cmp(b));
    assert_eq!(names, vec![Value::from("rex"), Value::from("tom")]);
    assert_eq!(row["pets"].as_related().unwrap().len(), 2);

    let query = Query::new("Owner").with_selections(["nickname"]);
    assert!(matches!(
        ctx.manager.execute_selection(&query),
        Err(Error::AttributeMissing { .. })
    ));
}

fn random_leaf(rng: &mut StdRng) -> Criterion {
    let criterion = match rng.gen_range(0..9) {
        0 => Criterion::eq("a", rng.gen_range(0..5i32)),
        1 => Criterion::gt("a", rng.gen_range(0..5i32)),
        2 => Criterion::le("a", rng.gen_range(0..5i32)),
        3 => Criterion::in_list("a", vec![Value::Int32(rng.gen_range(0..5)), Value::Int32(rng.gen_range(0..5))]),
        4 => Criterion::contains("b", ["x", "y", "xy"][rng.gen_range(0..3)]),
        5 => Criterion::ne("b", ["x", "yx", "xyz"][rng.gen_range(0..3)]),
        6 => Criterion::is_null("c"),
        7 => Criterion::lt("id", rng.gen_range(0..40i64)),
        _ => Criterion::ge("c", rng.gen_range(0..10i64)),
    };
    if rng.gen_bool(0.2) {
        criterion.negate()
    } else {
        criterion
    }
}

fn random_tree(rng: &mut StdRng, depth: usize) -> Criterion {
    let mut node = random_leaf(rng);
    if depth == 0 {
        return node;
    }
    for _ in 0..rng.gen_range(1..=3) {
        let child = random_tree(rng, depth - 1);
        node = match rng.gen_range(0..3) {
            0 => node.and(child),
            1 => node.or(child),
            _ => node.and_not(child),
        };
    }
    node
}

#[test]
fn test_aggregation_matches_brute_force() {
    let ctx = TestContext::new();
    let mut rng = StdRng::seed_from_u64(0x5eed);

    let strings = ["x", "xy", "yx", "xyz", "zzz"];
    for id in 0..40i64 {
        let mut entity = Entity::new("Sample").with("id", id);
        if rng.gen_bool(0.8) {
            entity.set("a", rng.gen_range(0..5i32));
        }
        if rng.gen_bool(0.8) {
            entity.set("b", strings[rng.gen_range(0..strings.len())]);
        }
        if rng.gen_bool(0.6) {
            entity.set("c", rng.gen_range(0..10i64));
        }
        ctx.manager.save(&EntityHandle::new(entity)).unwrap();
    }

    let records = ctx.manager.execute_query(&Query::new("Sample")).unwrap();
    assert_eq!(records.len(), 40);
    let descriptor = ctx
        .manager
        .context()
        .partitions()
        .descriptor("Sample", Partition::None)
        .unwrap();
    let evaluator = CriterionEvaluator::new(&descriptor);

    for round in 0..60 {
        let tree = random_tree(&mut rng, 2);
        let expected: BTreeSet<i64> = records
            .iter()
            .filter(|h| evaluator.matches_tree(&tree, h.read().attributes()))
            .map(|h| h.get("id").unwrap().as_i64().unwrap())
            .collect();

        let query = Query::new("Sample").with_criterion(tree.clone());
        let actual: BTreeSet<i64> = ctx
            .manager
            .execute_query(&query)
            .unwrap()
            .iter()
            .map(|h| h.get("id").unwrap().as_i64().unwrap())
            .collect();
        assert_eq!(actual, expected, "round {} tree {:?}", round, tree);

        let controller = QueryController::new(ctx.manager.context(), &query).unwrap();
        assert_eq!(controller.count().unwrap(), expected.len() as u64);
    }
}
