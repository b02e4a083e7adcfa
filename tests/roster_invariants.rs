use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use proptest::prelude::*;
use ulid::Ulid;

use rosterline::model::*;
use rosterline::{Catalog, Engine, EngineConfig, EngineError};

const MEMBERS: usize = 8;
const SUBTEAMS: usize = 2;
const EVENTS: usize = 5;

#[derive(Debug, Clone)]
enum Op {
    Assign { member: usize, event: usize },
    Remove { member: usize, event: usize },
    Move { member: usize, subteam: Option<usize> },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0..MEMBERS, 0..EVENTS).prop_map(|(member, event)| Op::Assign { member, event }),
        2 => (0..MEMBERS, 0..EVENTS).prop_map(|(member, event)| Op::Remove { member, event }),
        1 => (0..MEMBERS, proptest::option::of(0..SUBTEAMS))
            .prop_map(|(member, subteam)| Op::Move { member, subteam }),
    ]
}

struct Roster {
    engine: Arc<Engine>,
    path: PathBuf,
    club: Club,
    catalog: Arc<Catalog>,
    members: Vec<Ulid>,
    subteams: Vec<Ulid>,
    events: Vec<Ulid>,
}

fn wal_path() -> PathBuf {
    let dir = std::env::temp_dir().join("rosterline_int_test");
    std::fs::create_dir_all(&dir).unwrap();
    dir.join(format!("{}.wal", Ulid::new()))
}

/// Events 0–2 share a block (2 is self-scheduled), 3 and 4 are free.
/// Every event seats two per subteam; subteams hold three members.
async fn roster() -> Roster {
    let events: Vec<Event> = (0..EVENTS)
        .map(|i| Event {
            id: Ulid::new(),
            name: format!("Event {i}"),
            max_competitors: 2,
            self_scheduled: i == 2,
        })
        .collect();
    let catalog = Arc::new(Catalog::new());
    catalog
        .install(DivisionSpec {
            name: "C".into(),
            conflict_groups: vec![ConflictGroup {
                id: Ulid::new(),
                name: "Block 1".into(),
                events: events[0..3].iter().map(|e| e.id).collect(),
            }],
            events: events.clone(),
        })
        .unwrap();

    let club = Club {
        id: Ulid::new(),
        name: "Proptest High".into(),
        division: "C".into(),
    };
    let config = EngineConfig {
        max_headcount: 3,
        ..EngineConfig::default()
    };
    let path = wal_path();
    let engine = Arc::new(Engine::new(path.clone(), club.clone(), catalog.clone(), &config).unwrap());

    let mut subteams = Vec::new();
    for i in 0..SUBTEAMS {
        let id = Ulid::new();
        engine.create_subteam(id, format!("Team {i}")).await.unwrap();
        subteams.push(id);
    }
    let mut members = Vec::new();
    for i in 0..MEMBERS {
        let id = Ulid::new();
        engine.add_member(id, format!("Member {i}")).await.unwrap();
        // Later members overflow the headcount and stay unassigned.
        let _ = engine
            .move_member_to_subteam(id, Some(subteams[i % SUBTEAMS]), None)
            .await;
        members.push(id);
    }

    Roster {
        engine,
        path,
        club,
        catalog,
        members,
        subteams,
        events: events.iter().map(|e| e.id).collect(),
    }
}

async fn run(roster: &Roster, op: Op) -> Result<(), EngineError> {
    let engine = &roster.engine;
    match op {
        Op::Assign { member, event } => {
            let member = roster.members[member];
            let subteam = engine
                .get_member(member)?
                .subteam_id
                .unwrap_or(roster.subteams[0]);
            engine
                .assign_member_to_event(member, subteam, roster.events[event], None)
                .await
                .map(|_| ())
        }
        Op::Remove { member, event } => engine
            .remove_assignment(roster.members[member], roster.events[event], None)
            .await
            .map(|_| ()),
        Op::Move { member, subteam } => engine
            .move_member_to_subteam(
                roster.members[member],
                subteam.map(|s| roster.subteams[s]),
                None,
            )
            .await
            .map(|_| ()),
    }
}

/// Checks the four roster invariants against the public query surface.
fn check_invariants(engine: &Engine) -> Result<(), TestCaseError> {
    let division = engine.division().unwrap();
    let assignments = engine.all_assignments();

    // One row per (member, event).
    let pairs: HashSet<(Ulid, Ulid)> = assignments.iter().map(|a| (a.member_id, a.event_id)).collect();
    prop_assert_eq!(pairs.len(), assignments.len());

    // Per-subteam event capacity, and the slot view agrees with the rows.
    let mut per_slot: HashMap<(Ulid, Ulid), u32> = HashMap::new();
    for a in &assignments {
        *per_slot.entry((a.subteam_id, a.event_id)).or_default() += 1;
    }
    for subteam in engine.list_subteams() {
        for slots in engine.event_slots(subteam.id).unwrap() {
            let rows = per_slot
                .get(&(subteam.id, slots.event_id))
                .copied()
                .unwrap_or(0);
            prop_assert_eq!(slots.occupied, rows);
            prop_assert!(slots.occupied <= slots.max_competitors);
        }

        // Headcount.
        let on_team = engine.subteam_members(subteam.id).unwrap().len() as u32;
        prop_assert!(on_team <= subteam.max_headcount);
        prop_assert_eq!(engine.headcount(subteam.id), on_team);
    }

    // Conflict exclusion.
    for member in engine.list_members() {
        let held: Vec<Ulid> = engine
            .assignments_for_member(member.id)
            .iter()
            .map(|a| a.event_id)
            .collect();
        for (i, a) in held.iter().enumerate() {
            for b in &held[i + 1..] {
                prop_assert!(!division.conflicts.has_conflict(a, b));
            }
        }
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 32, .. ProptestConfig::default() })]

    #[test]
    fn concurrent_operations_preserve_invariants(
        ops in prop::collection::vec(op_strategy(), 1..80),
    ) {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(4)
            .enable_all()
            .build()
            .unwrap();

        rt.block_on(async {
            let roster = Arc::new(roster().await);

            let handles: Vec<_> = ops
                .into_iter()
                .map(|op| {
                    let roster = roster.clone();
                    tokio::spawn(async move { run(&roster, op).await })
                })
                .collect();
            for result in futures::future::join_all(handles).await {
                if let Err(e) = result.unwrap() {
                    prop_assert!(e.is_rejection(), "systemic failure: {}", e);
                }
            }
            check_invariants(&roster.engine)?;

            // Replaying the log lands on the same roster.
            let before_assignments: HashSet<Assignment> =
                roster.engine.all_assignments().into_iter().collect();
            let before_members = roster.engine.list_members();
            let reopened = Engine::new(
                roster.path.clone(),
                roster.club.clone(),
                roster.catalog.clone(),
                &EngineConfig::default(),
            )
            .unwrap();
            let after_assignments: HashSet<Assignment> =
                reopened.all_assignments().into_iter().collect();
            prop_assert_eq!(before_assignments, after_assignments);
            prop_assert_eq!(before_members, reopened.list_members());
            check_invariants(&reopened)?;

            let _ = std::fs::remove_file(&roster.path);
            Ok(())
        })?;
    }
}
