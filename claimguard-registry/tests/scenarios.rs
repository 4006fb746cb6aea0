use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use claimguard_model::{
    BoundingBox, ClaimBuilder, ClaimFlags, ClaimId, ClaimType, PlayerId, PlayerOptions, Tristate,
    Vector3i, WorldId, GLOBAL_CONTEXT, GLOBAL_SCOPE,
};
use claimguard_registry::{
    Authorization, AuthorizationHook, BackgroundPool, ClaimConfig, ClaimError, ClaimManager, Hooks,
    OptionResolver, PermissionDefaultsPublisher, WorldInfo,
};
use claimguard_storage::migration::legacy_claim_id;
use claimguard_storage::{ClaimStorage, FlatFileStorage, MemoryStorage, RawRecord, CURRENT_SCHEMA_VERSION};
use serde_json::json;
use tempfile::TempDir;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn world() -> WorldInfo {
    WorldInfo::new(WorldId::from_u128(0x10), "world", -64, 320)
}

fn nether() -> WorldInfo {
    WorldInfo::new(WorldId::from_u128(0x20), "nether", 0, 256)
}

fn u1() -> PlayerId {
    PlayerId::from_u128(1)
}

fn u2() -> PlayerId {
    PlayerId::from_u128(2)
}

fn open_with(storage: Arc<dyn ClaimStorage>, config: ClaimConfig, hooks: Hooks) -> ClaimManager {
    ClaimManager::open(
        storage,
        Arc::new(config),
        vec![world(), nether()],
        hooks,
        BackgroundPool::new(1, 2).unwrap(),
    )
    .unwrap()
}

fn open(storage: Arc<dyn ClaimStorage>) -> ClaimManager {
    open_with(storage, ClaimConfig::default(), Hooks::default())
}

fn basic(owner: PlayerId, a: (i32, i32, i32), b: (i32, i32, i32)) -> ClaimBuilder {
    ClaimBuilder::new(ClaimType::Basic, world().id, BoundingBox::new(a, b)).owner(owner)
}

fn subdivision(owner: PlayerId, parent: ClaimId, a: (i32, i32, i32), b: (i32, i32, i32)) -> ClaimBuilder {
    ClaimBuilder::new(ClaimType::Subdivision, world().id, BoundingBox::new(a, b))
        .owner(owner)
        .parent(parent)
}

fn assert_consistent(manager: &ClaimManager) {
    for info in manager.worlds() {
        let problems = manager.registry(info.id).unwrap().verify();
        assert!(problems.is_empty(), "{}: {:?}", info.name, problems);
    }
}

#[test]
fn test_overlapping_claim_is_rejected() {
    init_logging();
    let mut manager = open(Arc::new(MemoryStorage::new()));
    let first = manager.create_claim(basic(u1(), (0, 0, 0), (10, 10, 10)), Some(u1())).unwrap();

    let err = manager
        .create_claim(basic(u2(), (5, 0, 5), (15, 10, 15)), Some(u2()))
        .unwrap_err();
    assert!(matches!(err, ClaimError::Overlap { blocking } if blocking == first));
    assert_eq!(manager.registry(world().id).unwrap().top_level().len(), 1);
    assert_consistent(&manager);
}

#[test]
fn test_face_contact_is_allowed() {
    init_logging();
    let mut manager = open(Arc::new(MemoryStorage::new()));
    manager.create_claim(basic(u1(), (0, 0, 0), (10, 10, 10)), None).unwrap();
    manager.create_claim(basic(u2(), (10, 0, 0), (20, 10, 10)), None).unwrap();

    let u3 = PlayerId::from_u128(3);
    let err = manager.create_claim(basic(u3, (19, 0, 0), (29, 10, 10)), None).unwrap_err();
    assert!(matches!(err, ClaimError::Overlap { .. }));
    assert_consistent(&manager);
}

#[test]
fn test_stacked_cuboids_need_both_cuboid() {
    init_logging();
    let mut manager = open(Arc::new(MemoryStorage::new()));
    manager.create_claim(basic(u1(), (0, 0, 0), (8, 10, 8)), None).unwrap();
    manager.create_claim(basic(u2(), (0, 20, 0), (8, 30, 8)), None).unwrap();

    let flat = ClaimBuilder::new(ClaimType::Admin, world().id, BoundingBox::new((0, 40, 0), (8, 50, 8)))
        .cuboid(false);
    assert!(matches!(
        manager.create_claim(flat, None),
        Err(ClaimError::Overlap { .. })
    ));
}

#[test]
fn test_resize_keeps_children_inside() {
    init_logging();
    let config = ClaimConfig {
        initial_blocks: 1000,
        ..ClaimConfig::default()
    };
    let mut manager = open_with(Arc::new(MemoryStorage::new()), config, Hooks::default());
    let parent = manager.create_claim(basic(u1(), (0, 0, 0), (20, 20, 20)), None).unwrap();
    manager
        .create_claim(subdivision(u1(), parent, (2, 0, 2), (5, 20, 5)), None)
        .unwrap();

    let shrink = BoundingBox::new((0, 0, 0), (4, 20, 4));
    assert!(manager.resize_claim(world().id, parent, shrink, Some(u1())).is_err());
    let bounds = manager.registry(world().id).unwrap().get(parent).unwrap().bounds;
    assert_eq!(bounds, BoundingBox::new((0, 0, 0), (20, 20, 20)));
    assert_consistent(&manager);
}

#[test]
fn test_remaining_blocks_with_accrued() {
    init_logging();
    let mut manager = open(Arc::new(MemoryStorage::new()));
    manager.adjust_accrued(u1(), world().id, 50).unwrap();
    manager.create_claim(basic(u1(), (0, 0, 0), (10, 10, 8)), None).unwrap();
    assert_eq!(manager.remaining_blocks(u1(), world().id).unwrap(), 70);

    // Subdivisions and admin claims are free.
    let parent = manager.registry(world().id).unwrap().claims_owned_by(u1())[0].id;
    manager
        .create_claim(subdivision(u1(), parent, (1, 0, 1), (3, 5, 3)), None)
        .unwrap();
    assert_eq!(manager.remaining_blocks(u1(), world().id).unwrap(), 70);
}

#[test]
fn test_unknown_world_records_are_deleted() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let storage = Arc::new(FlatFileStorage::open(dir.path()).unwrap());
    storage.set_schema_version(CURRENT_SCHEMA_VERSION).unwrap();

    let kept = basic(u1(), (0, 0, 0), (5, 5, 5)).build().unwrap();
    let gone = ClaimBuilder::new(
        ClaimType::Basic,
        WorldId::from_u128(0x99),
        BoundingBox::new((0, 0, 0), (5, 5, 5)),
    )
    .owner(u1())
    .build()
    .unwrap();
    let kept_at = storage.save_claim(&kept).unwrap();
    let gone_at = storage.save_claim(&gone).unwrap();

    let mut manager = open(storage.clone());
    assert!(dir.path().join(&gone_at).exists(), "open leaves other worlds alone");

    let known = [world().id, nether().id];
    assert_eq!(manager.purge_unknown_worlds(&known).unwrap(), 1);
    assert!(manager.registry(world().id).unwrap().get(kept.id).is_some());
    assert!(dir.path().join(&kept_at).exists());
    assert!(!dir.path().join(&gone_at).exists());
    assert_eq!(manager.metrics().total_records_deleted.load(Ordering::Relaxed), 1);
}

#[test]
fn test_world_loaded_after_open_keeps_claims() {
    init_logging();
    let storage: Arc<dyn ClaimStorage> = Arc::new(MemoryStorage::new());
    let portal = {
        let mut manager = open(storage.clone());
        let portal = manager
            .create_claim(
                ClaimBuilder::new(ClaimType::Basic, nether().id, BoundingBox::new((0, 10, 0), (8, 20, 8)))
                    .owner(u1()),
                None,
            )
            .unwrap();
        manager.shutdown();
        portal
    };

    // Only the overworld is up when the registry opens.
    let mut manager = ClaimManager::open(
        storage.clone(),
        Arc::new(ClaimConfig::default()),
        vec![world()],
        Hooks::default(),
        BackgroundPool::new(1, 2).unwrap(),
    )
    .unwrap();
    assert!(manager.registry(nether().id).is_none());

    manager.load_world(nether()).unwrap();
    let registry = manager.registry(nether().id).unwrap();
    assert!(registry.get(portal).is_some());
    assert_eq!(manager.metrics().total_records_deleted.load(Ordering::Relaxed), 0);

    // The nether is loaded now, so purging with an empty known list keeps it.
    assert_eq!(manager.purge_unknown_worlds(&[]).unwrap(), 0);
    assert!(storage
        .list_claims()
        .unwrap()
        .iter()
        .any(|r| r.value["id"] == portal.to_string()));
}

#[test]
fn test_point_query_prefers_subdivision() {
    init_logging();
    let mut manager = open(Arc::new(MemoryStorage::new()));
    let parent = manager.create_claim(basic(u1(), (0, 0, 0), (9, 20, 9)), None).unwrap();
    let sub = manager
        .create_claim(subdivision(u1(), parent, (2, 0, 2), (5, 20, 5)), None)
        .unwrap();

    let pos = Vector3i::new(3, 10, 3);
    assert_eq!(manager.claim_at(world().id, pos, false).map(|c| c.id), Some(sub));
    assert_eq!(
        manager.claim_at(world().id, Vector3i::new(8, 10, 8), false).map(|c| c.id),
        Some(parent)
    );
    assert_eq!(manager.claim_at_for(world().id, u2(), pos).map(|c| c.id), Some(sub));
}

#[test]
fn test_legacy_store_migrates_on_open() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let storage = Arc::new(FlatFileStorage::open(dir.path()).unwrap());
    let w = world().id;
    storage
        .write_raw(&RawRecord::new(
            format!("worlds/{}/basic/home.json", w),
            json!({
                "claimName": "home",
                "claimType": "BASIC",
                "world": w.to_string(),
                "ownerUniqueId": u1().to_string(),
                "lesserBoundaryCorner": {"x": 0, "z": 0},
                "greaterBoundaryCorner": {"x": 10, "z": 10},
                "depth": 60
            }),
        ))
        .unwrap();
    storage
        .write_raw(&RawRecord::new(
            format!("players/{}.json", u1()),
            json!({"id": u1().to_string(), "accruedBlocks": 40, "bonusBlocks": 5}),
        ))
        .unwrap();

    let mut manager = open(storage.clone());
    assert!(manager.migration_report().changed());
    assert_eq!(storage.schema_version().unwrap(), Some(CURRENT_SCHEMA_VERSION));

    let id = legacy_claim_id(w, &format!("worlds/{}/basic/home.json", w));
    let claim = manager.registry(w).unwrap().get(id).expect("migrated claim");
    assert!(!claim.cuboid);
    assert_eq!(claim.bounds.lesser().y, 60 - 127);
    assert_eq!(
        manager.claim_at(w, Vector3i::new(5, 1000, 5), false).map(|c| c.id),
        Some(id),
        "non-cuboid claims span every height"
    );
    assert_eq!(manager.remaining_blocks(u1(), w).unwrap(), 100 + 40 + 5 - 100);
}

#[test]
fn test_same_named_legacy_claims_all_load() {
    init_logging();
    let storage = Arc::new(MemoryStorage::new());
    let w = world().id;
    for (locator, owner, x) in [("home.json", u1(), 0), ("u2/home.json", u2(), 50)] {
        storage
            .write_raw(&RawRecord::new(
                format!("worlds/{}/basic/{}", w, locator),
                json!({
                    "claimName": "home",
                    "claimType": "BASIC",
                    "world": w.to_string(),
                    "ownerUniqueId": owner.to_string(),
                    "lesserBoundaryCorner": {"x": x, "z": 0},
                    "greaterBoundaryCorner": {"x": x + 8, "z": 8},
                    "depth": 64
                }),
            ))
            .unwrap();
    }

    let manager = open(storage.clone());
    let stored_homes = storage
        .list_claims()
        .unwrap()
        .iter()
        .filter(|r| r.value["name"] == "home")
        .count();
    assert_eq!(stored_homes, 2);
    let homes: Vec<_> = manager
        .registry(w)
        .unwrap()
        .claims()
        .filter(|c| c.meta.name.as_deref() == Some("home"))
        .map(|c| c.owner)
        .collect();
    assert_eq!(homes.len(), 2);
    assert!(homes.contains(&Some(u1())) && homes.contains(&Some(u2())));
    assert_consistent(&manager);
}

#[test]
fn test_claims_survive_reopen() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let (parent, sub) = {
        let storage = Arc::new(FlatFileStorage::open(dir.path()).unwrap());
        let mut manager = open(storage);
        let parent = manager.create_claim(basic(u1(), (0, 0, 0), (9, 20, 9)), None).unwrap();
        let sub = manager
            .create_claim(subdivision(u1(), parent, (2, 0, 2), (5, 20, 5)), None)
            .unwrap();
        manager.rename_claim(world().id, parent, Some("farm".into())).unwrap();
        manager.shutdown();
        (parent, sub)
    };

    let storage = Arc::new(FlatFileStorage::open(dir.path()).unwrap());
    let manager = open(storage);
    let registry = manager.registry(world().id).unwrap();
    let reloaded = registry.get(parent).unwrap();
    assert_eq!(reloaded.meta.name.as_deref(), Some("farm"));
    assert_eq!(reloaded.children, vec![sub]);
    assert_eq!(registry.get(sub).unwrap().parent, Some(parent));
    assert_consistent(&manager);
}

#[test]
fn test_transfer_moves_charge() {
    init_logging();
    let mut manager = open(Arc::new(MemoryStorage::new()));
    let id = manager.create_claim(basic(u1(), (0, 0, 0), (8, 5, 8)), None).unwrap();
    assert_eq!(manager.remaining_blocks(u1(), world().id).unwrap(), 36);

    manager.transfer_claim(world().id, id, u2()).unwrap();
    assert_eq!(manager.remaining_blocks(u1(), world().id).unwrap(), 100);
    assert_eq!(manager.remaining_blocks(u2(), world().id).unwrap(), 36);
    assert_eq!(manager.registry(world().id).unwrap().get(id).unwrap().owner, Some(u2()));
}

#[test]
fn test_bulk_delete_removes_all_owned() {
    init_logging();
    let mut manager = open(Arc::new(MemoryStorage::new()));
    let a = manager.create_claim(basic(u1(), (0, 0, 0), (5, 5, 5)), None).unwrap();
    let b = manager.create_claim(basic(u1(), (50, 0, 50), (55, 5, 55)), None).unwrap();
    let sub = manager.create_claim(subdivision(u1(), a, (1, 0, 1), (2, 5, 2)), None).unwrap();
    let other = manager.create_claim(basic(u2(), (20, 0, 20), (25, 5, 25)), None).unwrap();

    let mut deleted = manager.delete_claims_of(world().id, u1()).unwrap();
    deleted.sort();
    let mut expected = vec![a, b, sub];
    expected.sort();
    assert_eq!(deleted, expected);

    let registry = manager.registry(world().id).unwrap();
    assert!(registry.get(other).is_some());
    assert!(registry.claims_owned_by(u1()).is_empty());
    assert_consistent(&manager);
}

#[test]
fn test_claims_are_per_world() {
    init_logging();
    let mut manager = open(Arc::new(MemoryStorage::new()));
    manager.create_claim(basic(u1(), (0, 0, 0), (5, 5, 5)), None).unwrap();

    let pos = Vector3i::new(2, 2, 2);
    assert!(manager.claim_at(nether().id, pos, false).unwrap().is_wilderness());
    let same_spot = ClaimBuilder::new(ClaimType::Basic, nether().id, BoundingBox::new((0, 0, 0), (5, 5, 5)))
        .owner(u2());
    manager.create_claim(same_spot, None).unwrap();
}

struct DenyTowns;

impl AuthorizationHook for DenyTowns {
    fn authorize(
        &self,
        claim_type: ClaimType,
        _: WorldId,
        _: &BoundingBox,
        _: Option<PlayerId>,
    ) -> Authorization {
        match claim_type {
            ClaimType::Town => Authorization::Deny("towns are disabled".into()),
            _ => Authorization::Allow,
        }
    }
}

#[test]
fn test_authorization_hook_is_final() {
    init_logging();
    let config = ClaimConfig {
        initial_blocks: 5000,
        ..ClaimConfig::default()
    };
    let hooks = Hooks {
        authorization: Arc::new(DenyTowns),
        ..Hooks::default()
    };
    let mut manager = open_with(Arc::new(MemoryStorage::new()), config, hooks);
    let town = ClaimBuilder::new(ClaimType::Town, world().id, BoundingBox::new((0, 0, 0), (40, 40, 40)))
        .owner(u1());
    assert!(matches!(
        manager.create_claim(town, Some(u1())),
        Err(ClaimError::AuthorizationDenied(_))
    ));
    assert_eq!(manager.remaining_blocks(u1(), world().id).unwrap(), 5000);
}

struct Ranked;

impl OptionResolver for Ranked {
    fn resolve(&self, player: PlayerId) -> PlayerOptions {
        PlayerOptions {
            initial_blocks: Some(if player == u1() { 400 } else { 0 }),
            max_accrued_blocks: Some(10),
        }
    }
}

#[test]
fn test_joined_player_options_apply() {
    init_logging();
    let hooks = Hooks {
        options: Arc::new(Ranked),
        ..Hooks::default()
    };
    let storage = Arc::new(MemoryStorage::new());
    let mut manager = open_with(storage.clone(), ClaimConfig::default(), hooks);
    manager.player_joined(u1());
    assert!(manager.wait_for_message(Duration::from_secs(5)));
    assert_eq!(manager.process_messages(), 0);

    assert_eq!(manager.remaining_blocks(u1(), world().id).unwrap(), 400);
    assert_eq!(manager.adjust_accrued(u1(), world().id, 50).unwrap(), 10);

    manager.player_left(u1());
    assert!(!manager.players().is_cached(u1()));
    let stored = storage.load_player(u1()).unwrap().expect("flushed on leave");
    assert_eq!(stored.account(GLOBAL_SCOPE).accrued, 10);
}

#[test]
fn test_bonus_may_go_negative() {
    init_logging();
    let mut manager = open(Arc::new(MemoryStorage::new()));
    assert_eq!(manager.adjust_bonus(u1(), world().id, -150).unwrap(), -150);
    assert_eq!(manager.remaining_blocks(u1(), world().id).unwrap(), -50);
    let data = manager.players().get(u1()).unwrap();
    assert_eq!(data.account(GLOBAL_SCOPE).bonus, -150);
}

#[test]
fn test_depth_extension_and_flags() {
    init_logging();
    let mut manager = open(Arc::new(MemoryStorage::new()));
    let parent = manager.create_claim(basic(u1(), (0, 0, 0), (8, 10, 8)), None).unwrap();
    let sub = manager
        .create_claim(subdivision(u1(), parent, (1, 0, 1), (3, 5, 3)), None)
        .unwrap();

    manager.extend_claim_depth(world().id, parent, -20).unwrap();
    let registry = manager.registry(world().id).unwrap();
    assert_eq!(registry.get(parent).unwrap().bounds.lesser().y, -20);
    assert_eq!(registry.get(sub).unwrap().bounds.lesser().y, -20);
    assert!(manager.extend_claim_depth(world().id, parent, -100).is_err());

    manager
        .set_claim_flag(world().id, sub, "pvp", GLOBAL_CONTEXT, Tristate::False)
        .unwrap();
    let flags = &manager.registry(world().id).unwrap().get(sub).unwrap().flags;
    assert_eq!(flags.get("pvp", GLOBAL_CONTEXT), Tristate::False);
    assert_consistent(&manager);
}

#[test]
fn test_depth_extension_keeps_stacked_subdivisions_apart() {
    init_logging();
    let mut manager = open(Arc::new(MemoryStorage::new()));
    let parent = manager.create_claim(basic(u1(), (0, 0, 0), (9, 40, 9)), None).unwrap();
    let low = manager
        .create_claim(subdivision(u1(), parent, (1, 0, 1), (5, 10, 5)), None)
        .unwrap();
    let high = manager
        .create_claim(subdivision(u1(), parent, (1, 20, 1), (5, 30, 5)), None)
        .unwrap();

    let err = manager.extend_claim_depth(world().id, parent, -20).unwrap_err();
    assert!(matches!(err, ClaimError::Overlap { blocking } if blocking == low.min(high)));

    let registry = manager.registry(world().id).unwrap();
    assert_eq!(registry.get(parent).unwrap().bounds.lesser().y, 0);
    assert_eq!(registry.get(low).unwrap().bounds.lesser().y, 0);
    assert_eq!(registry.get(high).unwrap().bounds.lesser().y, 20);
    assert_consistent(&manager);
}

#[test]
fn test_non_cuboid_claims_respect_world_floor() {
    init_logging();
    let mut manager = open(Arc::new(MemoryStorage::new()));
    let column = manager
        .create_claim(basic(u1(), (0, 0, 0), (8, 10, 8)).cuboid(false), None)
        .unwrap();

    let err = manager.extend_claim_depth(world().id, column, -100_000).unwrap_err();
    assert!(matches!(err, ClaimError::Validation(_)));
    let bounds = manager.registry(world().id).unwrap().get(column).unwrap().bounds;
    assert_eq!(bounds.lesser().y, 0);

    manager.extend_claim_depth(world().id, column, world().min_y).unwrap();

    let too_deep = basic(u2(), (20, -200, 20), (28, 10, 28)).cuboid(false);
    assert!(matches!(
        manager.create_claim(too_deep, None),
        Err(ClaimError::Validation(_))
    ));
    assert_consistent(&manager);
}

#[test]
fn test_unreadable_player_record_survives_writes() {
    init_logging();
    let storage = Arc::new(MemoryStorage::new());
    storage.set_schema_version(CURRENT_SCHEMA_VERSION).unwrap();
    let locator = storage.locate_player(u1());
    let stored = json!({
        "id": u1().to_string(),
        "blocks": {"global": {"accrued": {"oops": true}, "bonus": 900}}
    });
    storage.write_raw(&RawRecord::new(locator.clone(), stored.clone())).unwrap();

    let mut manager = open(storage.clone());
    assert!(manager.ignore_player(u1(), u2()));
    manager.adjust_bonus(u1(), world().id, 5).unwrap();
    assert!(manager.players().is_unreadable(u1()));
    manager.player_left(u1());
    manager.shutdown();

    assert_eq!(storage.read_raw(&locator).unwrap(), Some(stored));
}

#[test]
fn test_ignore_list_round_trips() {
    init_logging();
    let storage = Arc::new(MemoryStorage::new());
    let mut manager = open(storage.clone());
    assert!(manager.ignore_player(u1(), u2()));
    assert!(!manager.ignore_player(u1(), u2()));
    assert!(storage.load_player(u1()).unwrap().unwrap().ignored.contains(&u2()));

    assert!(manager.unignore_player(u1(), u2()));
    assert!(storage.load_player(u1()).unwrap().unwrap().ignored.is_empty());
}

#[derive(Default)]
struct CountingPublisher(AtomicUsize);

impl PermissionDefaultsPublisher for CountingPublisher {
    fn publish(&self, _: ClaimType, _: &ClaimFlags) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }
}

#[test]
fn test_reload_republishes_defaults() {
    init_logging();
    let publisher = Arc::new(CountingPublisher::default());
    let hooks = Hooks {
        defaults: publisher.clone(),
        ..Hooks::default()
    };
    let mut manager = open_with(Arc::new(MemoryStorage::new()), ClaimConfig::default(), hooks);
    assert_eq!(publisher.0.load(Ordering::Relaxed), ClaimType::ALL.len());

    let stricter = ClaimConfig {
        initial_blocks: 0,
        ..ClaimConfig::default()
    };
    manager.reload_config(Arc::new(stricter));
    assert_eq!(publisher.0.load(Ordering::Relaxed), 2 * ClaimType::ALL.len());
    assert_eq!(manager.remaining_blocks(u1(), world().id).unwrap(), 0);
}
