//! # Entity Database Verification
//!
//! End-to-end behaviour of the database:
//!
//! 1. **Submission**: builds, removals and swaps land at flush, invalid commands are reported
//! 2. **References**: claim, bind, resolve, recycle without aliasing
//! 3. **Streams**: bounded, lossy, in-order delivery
//! 4. **Scheduling**: declared engine order is honoured
//! 5. **Serialization**: entity bytes round-trip through an initializer
//!
//! Run with: cargo test -p tessera_core --test entity_database

use std::collections::HashMap;

use bytemuck::{Pod, Zeroable};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tessera_core::{
    ComponentSerializer, DatabaseConfig, EcsError, EcsResult, Egid, EngineOrder, EntitiesDb, EntitiesView,
    EntityDescriptor, FnEngine, GroupId, SortedEnginesGroup, StepEngine, StructuralErrorKind, StructuralOp,
    StructuralPolicy,
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
struct Position {
    x: f32,
    y: f32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
struct Health(u32);

#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
struct Value(i32);

const G: GroupId = GroupId::new(10);
const H: GroupId = GroupId::new(11);

fn strict_db() -> EntitiesDb {
    EntitiesDb::with_config(DatabaseConfig::default().with_policy(StructuralPolicy::Strict)).unwrap()
}

fn lenient_db() -> EntitiesDb {
    EntitiesDb::with_config(DatabaseConfig::default().with_policy(StructuralPolicy::Lenient)).unwrap()
}

fn unit() -> EntityDescriptor {
    EntityDescriptor::builder("unit")
        .with::<Position>()
        .with::<Health>()
        .build()
        .unwrap()
}

// ============================================================================
// SUBMISSION
// ============================================================================

#[test]
fn built_entity_exposes_initial_values() {
    let d = unit();
    let mut db = strict_db();

    let mut init = db.factory().build_entity(Egid::new(1, G), &d);
    init.init(Position { x: 1.0, y: 2.0 }).unwrap().init(Health(30)).unwrap();
    init.submit().unwrap();

    assert!(!db.registry().exists(Egid::new(1, G)));
    db.submit_entities().unwrap();

    assert_eq!(
        db.registry().query_entity::<Position>(Egid::new(1, G)),
        Ok(&Position { x: 1.0, y: 2.0 })
    );
    assert_eq!(db.try_query_entity::<Health>(Egid::new(1, G)), Some(&Health(30)));
}

#[test]
fn unset_components_take_defaults() {
    let d = unit();
    let mut db = strict_db();
    let mut init = db.factory().build_entity(Egid::new(1, G), &d);
    init.init(Health(5)).unwrap();
    assert_eq!(init.get::<Position>(), Some(Position::default()));
    drop(init);

    db.submit_entities().unwrap();
    assert_eq!(db.try_query_entity::<Position>(Egid::new(1, G)), Some(&Position::default()));
}

#[test]
fn init_rejects_foreign_component() {
    let d = unit();
    let db = strict_db();
    let mut init = db.factory().build_entity(Egid::new(1, G), &d);
    assert!(matches!(
        init.init(Value(1)),
        Err(EcsError::ComponentNotInDescriptor { .. })
    ));
    init.cancel();
}

#[test]
fn swap_moves_entity_between_groups() {
    let d = EntityDescriptor::builder("value").with::<Value>().build().unwrap();
    let mut db = strict_db();

    let mut init = db.factory().build_entity(Egid::new(1, G), &d);
    init.init(Value(5)).unwrap();
    let reference = init.submit().unwrap();
    db.submit_entities().unwrap();
    assert_eq!(db.query::<Value>(G), (&[Value(5)][..], 1));

    db.functions().swap_entity_to_group(Egid::new(1, G), H).unwrap();
    let report = db.submit_entities().unwrap();

    assert_eq!(report.swapped, 1);
    assert_eq!(db.query::<Value>(G).1, 0);
    assert_eq!(db.query::<Value>(H), (&[Value(5)][..], 1));
    assert_eq!(db.try_resolve(reference), Some(Egid::new(1, H)));
}

#[test]
fn double_remove_reports_exactly_one_error() {
    let d = unit();
    let mut db = strict_db();
    for id in 0..3 {
        drop(db.factory().build_entity(Egid::new(id, G), &d));
    }
    db.submit_entities().unwrap();

    let functions = db.functions();
    functions.remove_entity(Egid::new(1, G)).unwrap();
    functions.remove_entity(Egid::new(1, G)).unwrap();

    let Err(EcsError::Submission(report)) = db.submit_entities() else {
        panic!("strict flush must fail");
    };
    assert_eq!(report.removed, 1);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].egid, Egid::new(1, G));
    assert_eq!(report.errors[0].op, StructuralOp::Remove);
    assert_eq!(report.errors[0].kind, StructuralErrorKind::MultipleStructuralChanges);

    assert_eq!(db.registry().entity_ids(G).len(), 2);
    assert!(db.registry().exists(Egid::new(0, G)));
    assert!(db.registry().exists(Egid::new(2, G)));
}

#[test]
fn swap_onto_occupied_destination_is_rejected() {
    let d = unit();
    let mut db = lenient_db();
    drop(db.factory().build_entity(Egid::new(1, G), &d));
    drop(db.factory().build_entity(Egid::new(1, H), &d));
    db.submit_entities().unwrap();

    db.functions().swap_entity_group(Egid::new(1, G), Egid::new(1, H)).unwrap();
    let report = db.submit_entities().unwrap();

    assert_eq!(report.swapped, 0);
    assert_eq!(
        report.errors[0].kind,
        StructuralErrorKind::DestinationOccupied(Egid::new(1, H))
    );
    assert!(db.registry().exists(Egid::new(1, G)));
}

#[test]
fn group_operations_move_and_clear_whole_groups() {
    let d = unit();
    let mut db = strict_db();
    let references: Vec<_> = (0..4)
        .map(|id| db.factory().build_entity(Egid::new(id, G), &d).submit().unwrap())
        .collect();
    db.submit_entities().unwrap();

    db.functions().swap_entities_in_group(G, H).unwrap();
    assert_eq!(db.submit_entities().unwrap().swapped, 4);
    assert_eq!(db.registry().group_count(H), 4);
    assert_eq!(db.try_resolve(references[2]), Some(Egid::new(2, H)));

    db.functions().remove_entities_from_group(H).unwrap();
    assert_eq!(db.submit_entities().unwrap().removed, 4);
    assert_eq!(db.registry().group_count(H), 0);
    assert!(references.iter().all(|r| db.try_resolve(*r).is_none()));
}

#[test]
fn group_ranges_offset_inside_namespace() {
    let range = GroupId::range(100, 3).unwrap();
    assert_eq!(range.get(2).unwrap(), GroupId::new(102));
    assert!(matches!(range.get(3), Err(EcsError::GroupOutOfRange { .. })));

    let d = unit();
    let mut db = strict_db();
    db.name_group(range.base(), "pool");
    drop(db.factory().build_entity(Egid::new(0, range.base() + 1), &d));
    db.submit_entities().unwrap();
    assert_eq!(db.registry().groups_with::<Health>(), vec![GroupId::new(101)]);
    assert_eq!(db.registry().group_label(GroupId::new(100)), Some("pool"));
}

// ============================================================================
// REFERENCES
// ============================================================================

#[test]
fn reference_lifecycle() {
    let d = unit();
    let mut db = strict_db();

    let init = db.factory().build_entity(Egid::new(7, G), &d);
    let reference = init.reference();
    assert_eq!(db.try_resolve(reference), None);

    init.submit().unwrap();
    db.submit_entities().unwrap();
    assert_eq!(db.try_resolve(reference), Some(Egid::new(7, G)));
    assert_eq!(db.query_by_reference::<Health>(reference), Ok(&Health(0)));

    db.functions().remove_entity(Egid::new(7, G)).unwrap();
    db.submit_entities().unwrap();
    assert_eq!(db.try_resolve(reference), None);
    assert!(matches!(
        db.query_by_reference::<Health>(reference),
        Err(EcsError::StaleReference { .. })
    ));
}

#[test]
fn recycled_reference_never_aliases() {
    let d = unit();
    let mut db = strict_db();

    let old = db.factory().build_entity(Egid::new(1, G), &d).submit().unwrap();
    db.submit_entities().unwrap();
    db.functions().remove_entity(Egid::new(1, G)).unwrap();
    db.submit_entities().unwrap();

    let new = db.factory().build_entity(Egid::new(2, G), &d).submit().unwrap();
    db.submit_entities().unwrap();

    assert_eq!(old.index(), new.index());
    assert_eq!(db.try_resolve(old), None);
    assert_eq!(db.try_resolve(new), Some(Egid::new(2, G)));
}

#[test]
fn references_claimed_from_worker_threads_bind_at_flush() {
    let d = unit();
    let mut db = strict_db();

    let references: Vec<_> = std::thread::scope(|scope| {
        let workers: Vec<_> = (0..4u32)
            .map(|worker| {
                let factory = db.factory();
                let d = &d;
                scope.spawn(move || {
                    (0..50u32)
                        .map(|i| {
                            let egid = Egid::new(worker * 1_000 + i, G);
                            (egid, factory.build_entity(egid, d).submit().unwrap())
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        workers.into_iter().flat_map(|w| w.join().unwrap()).collect()
    });

    assert_eq!(db.submit_entities().unwrap().built, 200);
    for (egid, reference) in references {
        assert_eq!(db.try_resolve(reference), Some(egid));
    }
}

// ============================================================================
// STREAMS
// ============================================================================

#[test]
fn stream_keeps_most_recent_entries() {
    let db = strict_db();
    let consumer = db.streams().generate_consumer::<Health>("hud", 4).unwrap();
    for i in 0..10 {
        db.streams().publish(Health(i), Egid::new(i, G));
    }

    let received: Vec<_> = std::iter::from_fn(|| consumer.try_dequeue()).collect();
    assert_eq!(
        received,
        (6..10).map(|i| (Health(i), Egid::new(i, G))).collect::<Vec<_>>()
    );
}

// ============================================================================
// SCHEDULING
// ============================================================================

#[test]
fn sorted_group_runs_declared_order() {
    let order = EngineOrder::new(["A", "B", "C"]).unwrap();
    let d = EntityDescriptor::builder("value").with::<Value>().build().unwrap();
    let mut db = strict_db();
    drop(db.factory().build_entity(Egid::new(0, G), &d));
    db.submit_entities().unwrap();

    let digit = |name: &'static str, n: i32| {
        FnEngine::new(name, move |view: &mut EntitiesView| {
            for v in view.query_mut::<Value>(G).0 {
                v.0 = v.0 * 10 + n;
            }
        })
    };
    let mut group = SortedEnginesGroup::<EntitiesView>::builder("digits", order)
        .with(digit("C", 3))
        .with(digit("A", 1))
        .with(digit("B", 2))
        .build()
        .unwrap();

    group.step(db.view());
    assert_eq!(db.query::<Value>(G).0, &[Value(123)]);
}

// ============================================================================
// SERIALIZATION
// ============================================================================

/// Stores health as a little-endian `u16`.
struct CompactHealth;

impl ComponentSerializer<Health> for CompactHealth {
    fn serialize(&self, component: &Health, buffer: &mut Vec<u8>) {
        let value = u16::try_from(component.0).unwrap_or(u16::MAX);
        buffer.extend_from_slice(&value.to_le_bytes());
    }

    fn deserialize(&self, bytes: &[u8]) -> EcsResult<(Health, usize)> {
        match bytes {
            [lo, hi, ..] => Ok((Health(u32::from(u16::from_le_bytes([*lo, *hi]))), 2)),
            _ => Err(EcsError::Serialization {
                component: "Health",
                reason: "truncated".into(),
            }),
        }
    }
}

#[test]
fn entity_bytes_roundtrip_through_initializer() {
    let d = EntityDescriptor::builder("saved")
        .with::<Position>()
        .with_serializer::<Health, _>(CompactHealth)
        .build()
        .unwrap();
    let mut db = strict_db();

    let mut init = db.factory().build_entity(Egid::new(1, G), &d);
    init.init(Position { x: 3.0, y: 4.0 }).unwrap().init(Health(90)).unwrap();
    drop(init);
    db.submit_entities().unwrap();

    let mut bytes = Vec::new();
    d.serialize_entity(db.registry(), Egid::new(1, G), &mut bytes).unwrap();
    assert_eq!(bytes.len(), 8 + 2);

    let mut copy = db.factory().build_entity(Egid::new(1, H), &d);
    assert_eq!(d.deserialize_entity(&bytes, &mut copy), Ok(10));
    drop(copy);
    db.submit_entities().unwrap();

    assert_eq!(db.try_query_entity::<Health>(Egid::new(1, H)), Some(&Health(90)));
    assert_eq!(
        db.try_query_entity::<Position>(Egid::new(1, H)),
        Some(&Position { x: 3.0, y: 4.0 })
    );

    let mut short = db.factory().build_entity(Egid::new(2, H), &d);
    assert!(matches!(
        d.deserialize_entity(&bytes[..9], &mut short),
        Err(EcsError::Serialization { .. })
    ));
    short.cancel();

    assert!(matches!(
        d.serialize_entity(db.registry(), Egid::new(9, G), &mut bytes),
        Err(EcsError::EntityNotFound { .. })
    ));
}

// ============================================================================
// RANDOMIZED MODEL
// ============================================================================

#[test]
fn random_flushes_match_model() {
    let d = EntityDescriptor::builder("value").with::<Value>().build().unwrap();
    let groups = [G, H];
    let mut db = lenient_db();
    let mut model: HashMap<Egid, i32> = HashMap::new();
    let mut rng = ChaCha8Rng::seed_from_u64(0x5EED);

    for _ in 0..200 {
        // One command per entity id per flush keeps the model unambiguous.
        let mut used = std::collections::HashSet::new();
        let mut expected = model.clone();
        for _ in 0..8 {
            let id = rng.gen_range(0..16u32);
            if !used.insert(id) {
                continue;
            }
            let group = groups[rng.gen_range(0..2)];
            let other = groups.iter().copied().find(|g| *g != group).unwrap();
            let egid = Egid::new(id, group);
            match rng.gen_range(0..3) {
                0 => {
                    let value = rng.gen_range(-100..100);
                    let mut init = db.factory().build_entity(egid, &d);
                    init.init(Value(value)).unwrap();
                    init.submit().unwrap();
                    expected.entry(egid).or_insert(value);
                }
                1 => {
                    db.functions().remove_entity(egid).unwrap();
                    expected.remove(&egid);
                }
                _ => {
                    let to = Egid::new(id, other);
                    db.functions().swap_entity_group(egid, to).unwrap();
                    if !expected.contains_key(&to) {
                        if let Some(value) = expected.remove(&egid) {
                            expected.insert(to, value);
                        }
                    }
                }
            }
        }
        db.submit_entities().unwrap();
        model = expected;

        for group in groups {
            let (values, count) = db.query::<Value>(group);
            assert_eq!(count, model.keys().filter(|e| e.group == group).count());
            for (&id, value) in db.registry().entity_ids(group).iter().zip(values) {
                assert_eq!(model.get(&Egid::new(id, group)), Some(&value.0));
            }
        }
    }
}
