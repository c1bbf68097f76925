use carton::io::WriteBase;
use carton::{Archivable, ArchiveConfig, CartonError, Registry};
use proptest::prelude::*;

#[derive(Archivable, Debug, Default, Clone, PartialEq)]
#[carton(name = "Node", version = "1.0")]
struct Node {
    depth: u32,
    child: Option<Box<Node>>,
}

fn chain(len: u32) -> Node {
    let mut node = Node {
        depth: len,
        child: None,
    };
    for depth in (0..len).rev() {
        node = Node {
            depth,
            child: Some(Box::new(node)),
        };
    }
    node
}

#[test]
fn save_stops_at_the_depth_limit() {
    let mut buf = vec![0u8; 4096];
    let config = ArchiveConfig::default().with_max_depth(4);
    let saved = carton::save_with(&mut buf, &chain(10), &Registry::new(), config);

    assert!(saved.results.has_fatal_error);
    assert!(saved
        .results
        .any_error(|e| matches!(e, CartonError::DepthExceeded { limit: 4 })));
}

#[test]
fn load_stops_at_the_depth_limit() {
    let original = chain(10);
    let mut buf = vec![0u8; 4096];
    let saved = carton::save(&mut buf, &original);
    assert!(saved.results.is_clean());
    let bytes = &buf[..saved.len];

    let mut loaded = Node::default();
    let config = ArchiveConfig::default().with_max_depth(3);
    let results = carton::load_with(bytes, &mut loaded, &Registry::new(), config);
    assert!(results.has_fatal_error);
    assert!(results.any_error(|e| matches!(e, CartonError::DepthExceeded { limit: 3 })));

    let mut loaded = Node::default();
    assert!(carton::load(bytes, &mut loaded).is_clean());
    assert_eq!(loaded, original);
}

#[test]
fn escalated_overflow_is_fatal() {
    let mut buf = vec![0u8; 24];
    let config = ArchiveConfig::default().with_escalate_overflow(true);
    let saved = carton::save_with(&mut buf, &chain(2), &Registry::new(), config);
    assert!(saved.results.has_fatal_error);
    assert!(saved.results.overflows > 0);
    assert_eq!(saved.len, 24);
}

#[derive(Archivable, Debug, Default, Clone, PartialEq)]
#[carton(name = "Sample", version = "1.0")]
struct Sample {
    ids: Vec<u32>,
    label: String,
    ratio: f64,
    flag: bool,
}

fn sample_strategy() -> impl Strategy<Value = Sample> {
    (
        prop::collection::vec(any::<u32>(), 0..24),
        "[a-z ]{0,32}",
        -1.0e6f64..1.0e6,
        any::<bool>(),
    )
        .prop_map(|(ids, label, ratio, flag)| Sample {
            ids,
            label,
            ratio,
            flag,
        })
}

fn full_save(value: &Sample) -> Vec<u8> {
    let mut buf = vec![0u8; 8192];
    let saved = carton::save(&mut buf, value);
    assert!(saved.results.is_clean());
    buf.truncate(saved.len);
    buf
}

proptest! {
    #[test]
    fn save_never_writes_past_the_buffer(value in sample_strategy(), cap in 0usize..400) {
        let full = full_save(&value);

        let mut backing = vec![0xAAu8; cap + 64];
        let saved = carton::save(&mut backing[..cap], &value);

        prop_assert!(saved.len <= cap);
        prop_assert!(backing[cap..].iter().all(|&b| b == 0xAA));
        if cap >= full.len() {
            prop_assert_eq!(saved.results.overflows, 0);
            prop_assert_eq!(&backing[..saved.len], &full[..]);
        } else {
            prop_assert!(saved.results.overflows > 0);
            prop_assert_eq!(saved.len, cap);
            prop_assert!(!saved.results.has_fatal_error);
        }
    }

    #[test]
    fn saved_values_load_back(value in sample_strategy()) {
        let bytes = full_save(&value);
        let mut loaded = Sample::default();
        let results = carton::load(&bytes, &mut loaded);
        prop_assert!(results.is_clean(), "{:?}", results.errors);
        prop_assert_eq!(loaded, value);
    }

    #[test]
    fn write_cursor_stops_at_capacity(
        cap in 0usize..64,
        chunks in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..16), 0..12),
    ) {
        let mut buf = vec![0u8; cap];
        let mut w = WriteBase::new(&mut buf);
        let mut expected = 0usize;
        for chunk in &chunks {
            let wrote = w.write(chunk);
            prop_assert_eq!(wrote, chunk.len().min(cap - expected));
            expected += wrote;
            prop_assert_eq!(w.position(), expected);
        }
        let faults = w.take_faults().len();
        let short = chunks
            .iter()
            .scan(0usize, |used, c| {
                let fit = c.len().min(cap - *used);
                *used += fit;
                Some(fit < c.len())
            })
            .filter(|short| *short)
            .count();
        prop_assert_eq!(faults, short);
    }
}
