use carton::{name_hash, Archivable, ArchiveHooks, CartonError, Construct, Inspector, Registry};

fn save_to_vec<T: Archivable>(value: &T) -> Vec<u8> {
    let mut buf = vec![0u8; 4096];
    let saved = carton::save(&mut buf, value);
    assert!(saved.results.is_clean(), "{:?}", saved.results.errors);
    buf.truncate(saved.len);
    buf
}

#[derive(Archivable, Debug, Default)]
#[carton(name = "Holder", version = "1.0", custom_hooks)]
struct Holder {
    list: Vec<u32>,
    after: u32,
    tail: String,
    #[carton(skip)]
    finished: bool,
}

impl ArchiveHooks for Holder {
    fn after_load(&mut self) -> carton::Result<()> {
        self.finished = true;
        Ok(())
    }
}

#[test]
fn damaged_element_frame_stops_only_its_array() {
    let mut bytes = save_to_vec(&Holder {
        list: vec![1, 2, 3],
        after: 9,
        tail: "end".into(),
        finished: false,
    });
    let report = Inspector::inspect(&bytes, &Registry::new()).unwrap();
    let list = &report.root.children[0];
    assert_eq!(list.kind, "array");
    let second = list.children[1].offset as usize;
    assert_eq!(&bytes[second..second + 2], b"<E");
    bytes[second] = b'?';

    let mut loaded = Holder::default();
    let results = carton::load(&bytes, &mut loaded);

    assert!(results.has_fatal_error);
    assert!(matches!(
        results.first_fatal(),
        Some(CartonError::MalformedMarker {
            expected: Construct::Element,
            ..
        })
    ));
    assert_eq!(loaded.list, vec![1, 0, 0]);
    assert_eq!(loaded.after, 9, "sibling after the array still loads");
    assert_eq!(loaded.tail, "end");
    assert_eq!(results.unloaded_items, 0);
    assert_eq!(results.unrecognized_items, 0);
    assert!(loaded.finished, "after_load still runs");
}

#[test]
fn failed_element_does_not_stop_the_rest() {
    #[derive(Archivable, Debug, Default)]
    #[carton(name = "Words", version = "1.0")]
    struct Words {
        words: Vec<String>,
        after: u32,
    }

    let mut bytes = save_to_vec(&Words {
        words: vec!["xq#1".into(), "xq#2".into(), "xq#3".into()],
        after: 9,
    });
    let at = bytes
        .windows(4)
        .position(|w| w == b"xq#2")
        .expect("element body present");
    bytes[at + 1] = 0xFF;

    let mut loaded = Words::default();
    let results = carton::load(&bytes, &mut loaded);

    assert!(results.has_fatal_error);
    assert!(results.any_error(|e| matches!(e, CartonError::Serialization(_))));
    assert_eq!(loaded.words, vec!["xq#1", "", "xq#3"]);
    assert_eq!(loaded.after, 9);
    assert_eq!(results.elements, 3);
}

mod nested {
    use carton::Archivable;

    #[derive(Archivable, Debug, Default, PartialEq)]
    #[carton(name = "Part", version = "1.0")]
    pub struct PartV1 {
        pub w: u8,
    }

    #[derive(Archivable, Debug, Default, PartialEq)]
    #[carton(name = "Part", version = "2.0")]
    pub struct PartV2 {
        pub w: u8,
    }

    #[derive(Archivable, Debug, Default)]
    #[carton(name = "Machine", version = "1.0")]
    pub struct Saved {
        pub before: u16,
        pub part: PartV1,
        pub spare: Option<PartV1>,
        pub after: u16,
    }

    #[derive(Archivable, Debug, Default)]
    #[carton(name = "Machine", version = "1.0")]
    pub struct Loaded {
        pub before: u16,
        pub part: PartV2,
        pub spare: Option<PartV2>,
        pub after: u16,
    }
}

#[test]
fn fatal_nested_block_aborts_only_that_block() {
    let bytes = save_to_vec(&nested::Saved {
        before: 1,
        part: nested::PartV1 { w: 7 },
        spare: Some(nested::PartV1 { w: 8 }),
        after: 2,
    });

    let mut loaded = nested::Loaded {
        part: nested::PartV2 { w: 55 },
        ..Default::default()
    };
    let results = carton::load(&bytes, &mut loaded);

    assert!(results.has_fatal_error);
    assert_eq!(results.major_version_mismatches, 2);
    assert_eq!(loaded.before, 1);
    assert_eq!(loaded.after, 2, "siblings after the failed block load");
    assert_eq!(loaded.part, nested::PartV2 { w: 55 }, "failed block keeps its value");
    assert_eq!(loaded.spare, None, "a None field stays None when its block fails");
}

#[test]
fn optional_block_is_set_when_it_loads() {
    let bytes = save_to_vec(&nested::Saved {
        spare: Some(nested::PartV1 { w: 8 }),
        ..Default::default()
    });

    #[derive(Archivable, Debug, Default)]
    #[carton(name = "Machine", version = "1.0")]
    struct SameVersion {
        spare: Option<nested::PartV1>,
    }

    let mut loaded = SameVersion::default();
    let results = carton::load(&bytes, &mut loaded);
    assert!(results.is_ok());
    assert_eq!(loaded.spare, Some(nested::PartV1 { w: 8 }));
}

mod claimants {
    use carton::{name_hash, Archivable, ArchiveHooks, ItemInfo};

    #[derive(Archivable, Debug, Default)]
    #[carton(name = "Contact", version = "1.0")]
    pub struct Old {
        pub first_alias: String,
        pub second_alias: String,
    }

    #[derive(Archivable, Debug, Default)]
    #[carton(name = "Contact", version = "1.1", custom_hooks)]
    pub struct New {
        pub alias: String,
    }

    impl ArchiveHooks for New {
        fn delegate_item(&self, item: &ItemInfo) -> Option<&'static str> {
            let hash = item.name_hash();
            (hash == name_hash("first_alias") || hash == name_hash("second_alias"))
                .then_some("alias")
        }
    }
}

#[test]
fn first_claimant_in_stream_order_wins() {
    let bytes = save_to_vec(&claimants::Old {
        first_alias: "one".into(),
        second_alias: "two".into(),
    });

    let mut loaded = claimants::New::default();
    let results = carton::load(&bytes, &mut loaded);

    assert!(results.is_ok());
    assert_eq!(loaded.alias, "one");
    assert_eq!(results.delegated_items, 1);
    assert_eq!(results.unrecognized_items, 1);
    assert!(results.any_error(|e| matches!(
        e,
        CartonError::UnrecognizedItem { name_hash: h } if *h == name_hash("second_alias")
    )));
    assert_eq!(results.unloaded_items, 0);
}
