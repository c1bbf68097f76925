use std::cell::RefCell;
use std::rc::Rc;

use carton::{
    name_hash, Archivable, ArchiveConfig, ArchiveHooks, Distribution, Inspector, ItemInfo,
    OutputArchive, Registry, Version,
};

#[derive(Archivable, Debug, Default, Clone)]
#[carton(name = "Ledger", version = "1.0", custom_hooks)]
struct Ledger {
    entries: Vec<i64>,
    owner: String,
    #[carton(skip)]
    events: Vec<String>,
}

impl ArchiveHooks for Ledger {
    fn collect(&self, ar: &mut OutputArchive<'_>) -> carton::Result<()> {
        ar.field("total", &self.entries.iter().sum::<i64>())
    }

    fn distribute(&mut self, dist: &Distribution<'_>) {
        self.events.push(format!("distribute {}", dist.field));
    }

    fn notice_unrecognized_item(&mut self, item: &ItemInfo) {
        let label = if item.name_hash() == name_hash("total") {
            "total".to_string()
        } else {
            item.display_name()
        };
        self.events.push(format!("unrecognized {label}"));
    }

    fn notice_unloaded_item(&mut self, name: &str) {
        self.events.push(format!("unloaded {name}"));
    }

    fn after_load(&mut self) -> carton::Result<()> {
        self.events.push("after_load".into());
        Ok(())
    }
}

#[derive(Archivable, Debug, Default)]
#[carton(name = "Ledger", version = "1.0")]
struct LedgerWithTotal {
    entries: Vec<i64>,
    owner: String,
    total: i64,
}

fn save_with(value: &impl Archivable, registry: &Registry) -> Vec<u8> {
    let mut buf = vec![0u8; 4096];
    let saved = carton::save_with(&mut buf, value, registry, ArchiveConfig::default());
    assert!(saved.results.is_clean(), "{:?}", saved.results.errors);
    buf.truncate(saved.len);
    buf
}

fn sample() -> Ledger {
    Ledger {
        entries: vec![10, -3, 25],
        owner: "ops".into(),
        events: Vec::new(),
    }
}

#[test]
fn collected_items_follow_the_declared_fields() {
    let mut registry = Registry::new();
    registry.register::<LedgerWithTotal>().unwrap();
    let bytes = save_with(&sample(), &registry);

    let report = Inspector::inspect(&bytes, &registry).unwrap();
    let names: Vec<_> = report.root.children.iter().map(|c| c.name).collect();
    assert_eq!(names, vec![Some("entries"), Some("owner"), Some("total")]);

    let mut loaded = LedgerWithTotal::default();
    let results = carton::load(&bytes, &mut loaded);
    assert!(results.is_clean(), "{:?}", results.errors);
    assert_eq!(loaded.total, 32);
    assert_eq!(loaded.entries, vec![10, -3, 25]);
}

#[test]
fn hooks_run_in_load_order() {
    let bytes = save_with(&sample(), &Registry::new());

    let mut loaded = Ledger::default();
    let results = carton::load(&bytes, &mut loaded);

    assert!(results.is_ok());
    assert_eq!(results.unrecognized_items, 1);
    assert_eq!(
        loaded.events,
        vec![
            "distribute entries",
            "distribute owner",
            "unrecognized total",
            "after_load",
        ]
    );
}

#[test]
fn unloaded_notices_precede_after_load() {
    #[derive(Archivable, Default)]
    #[carton(name = "Ledger", version = "1.0")]
    struct OwnerOnly {
        owner: String,
    }

    let bytes = save_with(&OwnerOnly { owner: "a".into() }, &Registry::new());
    let mut loaded = Ledger::default();
    let results = carton::load(&bytes, &mut loaded);

    assert!(results.is_ok());
    assert_eq!(results.unloaded_items, 1);
    assert_eq!(
        loaded.events,
        vec!["distribute owner", "unloaded entries", "after_load"]
    );
}

#[test]
fn registry_collectors_run_after_the_type_hook() {
    let mut registry = Registry::new();
    registry.register::<LedgerWithTotal>().unwrap();
    registry.intern("audited");
    registry.on_collect::<Ledger, _>(|ledger, ar| ar.field("audited", &!ledger.owner.is_empty()));
    let bytes = save_with(&sample(), &registry);

    let report = Inspector::inspect(&bytes, &registry).unwrap();
    let names: Vec<_> = report.root.children.iter().map(|c| c.name).collect();
    assert_eq!(
        names,
        vec![Some("entries"), Some("owner"), Some("total"), Some("audited")]
    );
}

#[derive(Debug, Clone, PartialEq)]
struct Seen {
    field: &'static str,
    saved: Version,
    current: Version,
    disk_len: u32,
    memory_len: u32,
}

#[test]
fn registry_distributors_see_both_versions_and_lengths() {
    #[derive(Archivable, Default)]
    #[carton(name = "Grid", version = "1.0")]
    struct Cell {
        v: u8,
    }

    #[derive(Archivable, Default)]
    #[carton(name = "Grid", version = "2.0")]
    struct CellV2 {
        v: u8,
    }

    #[derive(Archivable, Default)]
    #[carton(name = "Board", version = "1.0")]
    struct Board {
        cells: Vec<Cell>,
        label: String,
    }

    #[derive(Archivable, Default)]
    #[carton(name = "Board", version = "1.0")]
    struct BoardV2 {
        cells: Vec<CellV2>,
        label: String,
    }

    let bytes = save_with(
        &Board {
            cells: vec![Cell { v: 1 }, Cell { v: 2 }, Cell { v: 3 }],
            label: "b".into(),
        },
        &Registry::new(),
    );

    let seen: Rc<RefCell<Vec<Seen>>> = Rc::default();
    let sink = Rc::clone(&seen);
    let mut registry = Registry::new();
    registry.on_distribute::<BoardV2, _>(move |_board, dist| {
        sink.borrow_mut().push(Seen {
            field: dist.field,
            saved: dist.saved,
            current: dist.current,
            disk_len: dist.disk_len,
            memory_len: dist.memory_len,
        });
        Ok(())
    });

    let mut loaded = BoardV2 {
        cells: (0..5).map(|_| CellV2::default()).collect(),
        label: String::new(),
    };
    let results = carton::load_with(&bytes, &mut loaded, &registry, ArchiveConfig::default());

    // Each element is a major mismatch; the board itself loads.
    assert!(results.has_fatal_error);
    assert_eq!(results.major_version_mismatches, 3);
    assert_eq!(loaded.cells.len(), 3);
    assert_eq!(loaded.label, "b");

    let seen = seen.borrow();
    assert_eq!(seen.len(), 2);
    assert_eq!(
        seen[0],
        Seen {
            field: "cells",
            saved: Version::new(1, 0),
            current: Version::new(2, 0),
            disk_len: 3,
            memory_len: 5,
        }
    );
    assert_eq!(seen[1].field, "label");
}

#[test]
fn failing_distributor_is_recorded() {
    let mut registry = Registry::new();
    registry.on_distribute::<Ledger, _>(|_, dist| {
        if dist.field == "owner" {
            Err(carton::CartonError::Serialization("rejected".into()))
        } else {
            Ok(())
        }
    });

    let bytes = save_with(&sample(), &Registry::new());
    let mut loaded = Ledger::default();
    let results = carton::load_with(&bytes, &mut loaded, &registry, ArchiveConfig::default());

    assert!(results.has_fatal_error);
    assert_eq!(loaded.owner, "ops", "fields loaded before distribution");
    assert!(loaded.events.contains(&"after_load".to_string()));
}

#[test]
fn distributors_see_the_loaded_field() {
    let seen: Rc<RefCell<Vec<String>>> = Rc::default();
    let sink = Rc::clone(&seen);
    let mut registry = Registry::new();
    registry.on_distribute::<Ledger, _>(move |ledger, dist| {
        let value = match dist.field {
            "owner" => ledger.owner.clone(),
            _ => format!("{:?}", ledger.entries),
        };
        sink.borrow_mut().push(format!("{} {value}", dist.field));
        Ok(())
    });

    let bytes = save_with(&sample(), &Registry::new());
    let mut loaded = Ledger {
        entries: vec![1],
        owner: "stale".into(),
        events: Vec::new(),
    };
    let results = carton::load_with(&bytes, &mut loaded, &registry, ArchiveConfig::default());

    assert!(results.is_ok());
    assert_eq!(*seen.borrow(), vec!["entries [10, -3, 25]", "owner ops"]);
}
