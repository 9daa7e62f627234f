use std::time::{SystemTime, UNIX_EPOCH};

use cpl::backend::{ancestry_flags, object_flags};
use cpl::{
    CplError, DbKind, DependencyCategory, DependencyType, Direction, Id, PropertyEntry,
    RelationalBackend, SessionId, StorageBackend,
};
use tempfile::TempDir;

fn open_store(dir: &TempDir) -> RelationalBackend {
    let path = dir.path().join("prov.db");
    RelationalBackend::open(&format!("DSN={};", path.display()), DbKind::Generic)
        .expect("open backend")
}

fn disclose_session(store: &RelationalBackend) -> SessionId {
    let sid = Id::new(0xACE, 0x101);
    store
        .create_session(
            sid,
            Some("00:11:22:33:44:55"),
            "alice",
            4242,
            "/usr/bin/harvest",
            "harvest --full",
        )
        .expect("create session");
    sid
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_secs() as i64
}

#[test]
fn object_starts_at_version_zero() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let sid = disclose_session(&store);

    let id = Id::new(1, 1);
    store
        .create_object(id, "test", "Process A", "Proc", None, sid)
        .unwrap();
    assert_eq!(store.get_version(id).unwrap(), 0);
}

#[test]
fn object_info_reflects_creation() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let sid = disclose_session(&store);

    let id = Id::new(1, 2);
    store
        .create_object(id, "test", "Object A", "File", None, sid)
        .unwrap();

    let info = store.get_object_info(id, None).unwrap();
    assert_eq!(info.id, id);
    assert_eq!(info.version, Some(0));
    assert_eq!(info.creation_session, Some(sid));
    assert_eq!(info.originator, "test");
    assert_eq!(info.name, "Object A");
    assert_eq!(info.ty, "File");
    assert_eq!(info.container_id, None);
    assert_eq!(info.container_version, None);
    assert!((info.creation_time - unix_now()).abs() <= 10);
}

#[test]
fn lookup_returns_the_created_object() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let sid = disclose_session(&store);

    let id = Id::new(2, 1);
    store
        .create_object(id, "test", "Process A", "Proc", None, sid)
        .unwrap();
    assert_eq!(store.lookup_object("test", "Process A", "Proc").unwrap(), id);

    assert!(matches!(
        store.lookup_object("test", "nothing here", "Proc"),
        Err(CplError::NotFound)
    ));
}

#[test]
fn lookup_prefers_the_latest_object() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let sid = disclose_session(&store);

    let older = Id::new(3, 1);
    let newer = Id::new(3, 2);
    store
        .create_object(older, "test", "shared", "File", None, sid)
        .unwrap();
    store
        .create_object(newer, "test", "shared", "File", None, sid)
        .unwrap();

    assert_eq!(store.lookup_object("test", "shared", "File").unwrap(), newer);
}

#[test]
fn lookup_objects_enumerates_every_match() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let sid = disclose_session(&store);

    let a = Id::new(4, 1);
    let b = Id::new(4, 2);
    store
        .create_object(a, "test", "twin", "File", None, sid)
        .unwrap();
    store
        .create_object(b, "test", "twin", "File", None, sid)
        .unwrap();

    let mut seen = Vec::new();
    let n = store
        .lookup_objects("test", "twin", "File", 0, &mut |e| {
            seen.push(*e);
            Ok(())
        })
        .unwrap();
    assert_eq!(n, 2);
    assert_eq!(seen.len(), 2);
    let ids: Vec<Id> = seen.iter().map(|e| e.id).collect();
    assert!(ids.contains(&a) && ids.contains(&b));
    for e in &seen {
        assert!((e.timestamp - unix_now()).abs() <= 10);
    }

    assert!(matches!(
        store.lookup_objects("test", "absent", "File", 0, &mut |_| Ok(())),
        Err(CplError::NotFound)
    ));
}

#[test]
fn versions_accumulate_monotonically() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let sid = disclose_session(&store);

    let id = Id::new(5, 1);
    store
        .create_object(id, "test", "versioned", "File", None, sid)
        .unwrap();
    for v in 1..=5 {
        store.create_version(id, v, sid).unwrap();
    }
    assert_eq!(store.get_version(id).unwrap(), 5);

    assert!(matches!(
        store.create_version(id, 3, sid),
        Err(CplError::AlreadyExists)
    ));
    assert_eq!(store.get_version(id).unwrap(), 5);

    assert!(matches!(
        store.get_version(Id::new(5, 99)),
        Err(CplError::NotFound)
    ));
}

#[test]
fn version_info_names_the_creating_session() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let sid = disclose_session(&store);

    let id = Id::new(6, 1);
    store
        .create_object(id, "test", "versioned", "File", None, sid)
        .unwrap();
    store.create_version(id, 1, sid).unwrap();

    let info = store.get_version_info(id, 1).unwrap();
    assert_eq!(info.id, id);
    assert_eq!(info.version, 1);
    assert_eq!(info.session, sid);
    assert!((info.creation_time - unix_now()).abs() <= 10);

    assert!(matches!(
        store.get_version_info(id, 9),
        Err(CplError::NotFound)
    ));
}

#[test]
fn containers_are_recorded() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let sid = disclose_session(&store);

    let process = Id::new(7, 1);
    let file = Id::new(7, 2);
    store
        .create_object(process, "test", "Process A", "Proc", None, sid)
        .unwrap();
    store
        .create_object(file, "test", "Object A", "File", Some((process, 0)), sid)
        .unwrap();

    let info = store.get_object_info(file, None).unwrap();
    assert_eq!(info.container_id, Some(process));
    assert_eq!(info.container_version, Some(0));
}

#[test]
fn ancestry_edges_round_trip() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let sid = disclose_session(&store);

    let process = Id::new(8, 1);
    let file = Id::new(8, 2);
    store
        .create_object(process, "test", "Process A", "Proc", None, sid)
        .unwrap();
    store
        .create_object(file, "test", "Object A", "File", Some((process, 0)), sid)
        .unwrap();
    store
        .add_ancestry_edge((file, 0), (process, 0), DependencyType::DATA_INPUT)
        .unwrap();

    let mut seen = Vec::new();
    let n = store
        .get_object_ancestry(process, None, Direction::Ancestors, 0, &mut |e| {
            seen.push(*e);
            Ok(())
        })
        .unwrap();
    assert_eq!(n, 1);
    assert_eq!(seen[0].from_id, file);
    assert_eq!(seen[0].from_version, 0);
    assert_eq!(seen[0].to_id, process);
    assert_eq!(seen[0].to_version, 0);
    assert_eq!(seen[0].ty, DependencyType::DATA_INPUT);
    assert_eq!(seen[0].ty.category(), Some(DependencyCategory::Data));

    // The same edge is visible from the other endpoint.
    let mut seen = Vec::new();
    let n = store
        .get_object_ancestry(file, None, Direction::Descendants, 0, &mut |e| {
            seen.push(*e);
            Ok(())
        })
        .unwrap();
    assert_eq!(n, 1);
    assert_eq!(seen[0].from_id, file);
    assert_eq!(seen[0].to_id, process);
}

#[test]
fn immediate_ancestor_probe() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let sid = disclose_session(&store);

    let a = Id::new(9, 1);
    let b = Id::new(9, 2);
    store
        .create_object(a, "test", "a", "File", None, sid)
        .unwrap();
    store
        .create_object(b, "test", "b", "File", None, sid)
        .unwrap();
    store
        .add_ancestry_edge((a, 0), (b, 0), DependencyType::DATA_INPUT)
        .unwrap();

    assert!(store
        .has_immediate_ancestor(b, None, a, u32::MAX)
        .unwrap());
    assert!(store
        .has_immediate_ancestor(b, Some(0), a, u32::MAX)
        .unwrap());
    // The edge points the other way around.
    assert!(!store
        .has_immediate_ancestor(a, None, b, u32::MAX)
        .unwrap());

    // A version bound below the edge's endpoint hides it.
    let c = Id::new(9, 3);
    store
        .create_object(c, "test", "c", "File", None, sid)
        .unwrap();
    store.create_version(b, 1, sid).unwrap();
    store
        .add_ancestry_edge((c, 0), (b, 1), DependencyType::DATA_INPUT)
        .unwrap();
    assert!(!store.has_immediate_ancestor(b, None, c, 0).unwrap());
    assert!(store.has_immediate_ancestor(b, None, c, 1).unwrap());
}

#[test]
fn category_filters_are_sound() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let sid = disclose_session(&store);

    let process = Id::new(10, 1);
    let input = Id::new(10, 2);
    let parent = Id::new(10, 3);
    for (id, name) in [(process, "proc"), (input, "input"), (parent, "parent")] {
        store
            .create_object(id, "test", name, "File", None, sid)
            .unwrap();
    }
    store
        .add_ancestry_edge((input, 0), (process, 0), DependencyType::DATA_INPUT)
        .unwrap();
    store
        .add_ancestry_edge((parent, 0), (process, 0), DependencyType::CONTROL_START)
        .unwrap();

    let collect = |flags: u32| -> Vec<DependencyType> {
        let mut seen = Vec::new();
        store
            .get_object_ancestry(process, None, Direction::Ancestors, flags, &mut |e| {
                seen.push(e.ty);
                Ok(())
            })
            .unwrap();
        seen
    };

    assert_eq!(collect(0).len(), 2);

    let no_data = collect(ancestry_flags::NO_DATA_DEPENDENCIES);
    assert_eq!(no_data, vec![DependencyType::CONTROL_START]);

    let no_control = collect(ancestry_flags::NO_CONTROL_DEPENDENCIES);
    assert_eq!(no_control, vec![DependencyType::DATA_INPUT]);

    let neither = collect(
        ancestry_flags::NO_DATA_DEPENDENCIES | ancestry_flags::NO_CONTROL_DEPENDENCIES,
    );
    assert!(neither.is_empty());

    assert!(matches!(
        store.get_object_ancestry(
            process,
            None,
            Direction::Ancestors,
            ancestry_flags::NO_PREV_NEXT_VERSION,
            &mut |_| Ok(()),
        ),
        Err(CplError::NotImplemented(_))
    ));
}

#[test]
fn properties_round_trip() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let sid = disclose_session(&store);

    let id = Id::new(11, 1);
    store
        .create_object(id, "test", "tagged", "File", None, sid)
        .unwrap();
    store.create_version(id, 1, sid).unwrap();
    store.add_property(id, 0, "tag", "first").unwrap();
    store.add_property(id, 1, "tag", "second").unwrap();
    store.add_property(id, 1, "color", "blue").unwrap();

    let collect = |version: Option<u32>, key: Option<&str>| -> Vec<PropertyEntry> {
        let mut seen = Vec::new();
        store
            .get_properties(id, version, key, &mut |e| {
                seen.push(e.clone());
                Ok(())
            })
            .unwrap();
        seen
    };

    let exact = collect(Some(1), Some("tag"));
    assert_eq!(exact.len(), 1);
    assert_eq!(exact[0].id, id);
    assert_eq!(exact[0].version, 1);
    assert_eq!(exact[0].key, "tag");
    assert_eq!(exact[0].value, "second");

    assert_eq!(collect(None, Some("tag")).len(), 2);
    assert_eq!(collect(Some(1), None).len(), 2);
    assert_eq!(collect(None, None).len(), 3);
}

#[test]
fn property_lookup_finds_every_row() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let sid = disclose_session(&store);

    let w = Id::new(12, 1);
    store
        .create_object(w, "test", "w", "File", None, sid)
        .unwrap();
    for _ in 0..3 {
        store.add_property(w, 0, "tag", "v1").unwrap();
    }

    let mut seen = Vec::new();
    let n = store
        .lookup_by_property("tag", "v1", &mut |e| {
            seen.push(e.clone());
            Ok(())
        })
        .unwrap();
    assert_eq!(n, 3);
    for e in &seen {
        assert_eq!((e.id, e.version), (w, 0));
        assert_eq!((e.key.as_str(), e.value.as_str()), ("tag", "v1"));
    }

    assert!(matches!(
        store.lookup_by_property("tag", "no such value", &mut |_| Ok(())),
        Err(CplError::NotFound)
    ));
}

#[test]
fn missing_object_is_distinguished_from_empty_result() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let sid = disclose_session(&store);

    let known = Id::new(13, 1);
    let unknown = Id::new(13, 99);
    store
        .create_object(known, "test", "known", "File", None, sid)
        .unwrap();

    // A specific version of an absent object is an error, not an empty set.
    assert!(matches!(
        store.get_object_ancestry(unknown, Some(5), Direction::Ancestors, 0, &mut |_| Ok(())),
        Err(CplError::NotFound)
    ));
    assert!(matches!(
        store.get_properties(unknown, Some(5), None, &mut |_| Ok(())),
        Err(CplError::NotFound)
    ));

    // The same queries against an existing version simply match nothing.
    assert_eq!(
        store
            .get_object_ancestry(known, Some(0), Direction::Ancestors, 0, &mut |_| Ok(()))
            .unwrap(),
        0
    );
    assert_eq!(
        store
            .get_properties(known, Some(0), None, &mut |_| Ok(()))
            .unwrap(),
        0
    );

    // Without a version there is nothing to disambiguate.
    assert_eq!(
        store
            .get_object_ancestry(unknown, None, Direction::Ancestors, 0, &mut |_| Ok(()))
            .unwrap(),
        0
    );
    assert_eq!(
        store
            .get_properties(unknown, None, None, &mut |_| Ok(()))
            .unwrap(),
        0
    );
}

#[test]
fn callback_errors_stop_the_enumeration() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let sid = disclose_session(&store);

    let id = Id::new(14, 1);
    store
        .create_object(id, "test", "tagged", "File", None, sid)
        .unwrap();
    for i in 0..3 {
        store
            .add_property(id, 0, "n", &i.to_string())
            .unwrap();
    }

    let mut delivered = 0;
    let result = store.get_properties(id, None, None, &mut |_| {
        delivered += 1;
        Err(CplError::InvalidArgument("stop".into()))
    });
    assert!(matches!(result, Err(CplError::InvalidArgument(_))));
    assert_eq!(delivered, 1);
}

#[test]
fn object_enumeration_honours_flags() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);

    assert_eq!(store.get_all_objects(0, &mut |_| Ok(())).unwrap(), 0);

    let sid = disclose_session(&store);
    let a = Id::new(15, 1);
    let b = Id::new(15, 2);
    store
        .create_object(a, "test", "a", "File", None, sid)
        .unwrap();
    store
        .create_object(b, "test", "b", "File", None, sid)
        .unwrap();
    store.create_version(b, 1, sid).unwrap();

    let mut seen = Vec::new();
    let n = store
        .get_all_objects(0, &mut |info| {
            seen.push(info.clone());
            Ok(())
        })
        .unwrap();
    assert_eq!(n, 2);
    for info in &seen {
        assert_eq!(info.creation_session, Some(sid));
        let expected = if info.id == b { 1 } else { 0 };
        assert_eq!(info.version, Some(expected));
    }

    let mut seen = Vec::new();
    store
        .get_all_objects(object_flags::FAST, &mut |info| {
            seen.push(info.clone());
            Ok(())
        })
        .unwrap();
    for info in &seen {
        assert_eq!(info.creation_session, None);
        assert_eq!(info.version, None);
        assert!(!info.name.is_empty());
    }

    let mut seen = Vec::new();
    store
        .get_all_objects(object_flags::NO_VERSION, &mut |info| {
            seen.push(info.clone());
            Ok(())
        })
        .unwrap();
    for info in &seen {
        assert_eq!(info.creation_session, Some(sid));
        assert_eq!(info.version, None);
    }
}

#[test]
fn dsn_constructor_rejects_reserved_characters() {
    for dsn in ["prov;db", "prov{db", "prov}db"] {
        assert!(matches!(
            RelationalBackend::open_dsn(dsn, DbKind::Generic),
            Err(CplError::InvalidArgument(_))
        ));
    }
}

#[test]
fn session_info_round_trips() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let sid = disclose_session(&store);

    let info = store.get_session_info(sid).unwrap();
    assert_eq!(info.id, sid);
    assert_eq!(info.mac_address.as_deref(), Some("00:11:22:33:44:55"));
    assert_eq!(info.user, "alice");
    assert_eq!(info.pid, 4242);
    assert_eq!(info.program, "/usr/bin/harvest");
    assert_eq!(info.cmdline, "harvest --full");
    assert!((info.start_time - unix_now()).abs() <= 10);

    // Sessions without a recorded MAC address read back as None.
    let anon = Id::new(0xACE, 0x102);
    store
        .create_session(anon, None, "bob", 1, "/bin/sh", "sh -c true")
        .unwrap();
    let info = store.get_session_info(anon).unwrap();
    assert_eq!(info.mac_address, None);

    assert!(matches!(
        store.get_session_info(Id::new(0xACE, 0x999)),
        Err(CplError::NotFound)
    ));
}

#[test]
fn recreating_an_object_reports_the_version_conflict() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let sid = disclose_session(&store);

    let id = Id::new(16, 1);
    store
        .create_object(id, "test", "dup", "File", None, sid)
        .unwrap();
    assert!(matches!(
        store.create_object(id, "test", "dup", "File", None, sid),
        Err(CplError::AlreadyExists)
    ));
    // The object itself is intact.
    assert_eq!(store.get_version(id).unwrap(), 0);
}

#[test]
fn object_info_accepts_a_version_hint() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let sid = disclose_session(&store);

    let id = Id::new(17, 1);
    store
        .create_object(id, "test", "hinted", "File", None, sid)
        .unwrap();
    store.create_version(id, 1, sid).unwrap();

    let info = store.get_object_info(id, Some(1)).unwrap();
    assert_eq!(info.version, Some(1));

    assert!(matches!(
        store.get_object_info(Id::new(17, 99), Some(1)),
        Err(CplError::NotFound)
    ));
}
