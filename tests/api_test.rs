#![allow(missing_docs)]

use carton::{Archivable, CartonError, Construct, Inspector, Registry};

#[derive(Archivable, PartialEq, Debug, Clone, Default)]
#[carton(name = "Settings", version = "1.2")]
struct Settings {
    volume: u8,
    device: String,
    presets: Vec<i16>,
}

fn settings() -> Settings {
    Settings {
        volume: 70,
        device: "hw:0".to_string(),
        presets: (-50..50).collect(),
    }
}

// --- TESTS ---

/// Standard File IO
/// Validate `save_to_file` and the memory-mapped `load_from_file`.
#[test]
fn test_file_round_trip() -> carton::Result<()> {
    let dir = tempfile::tempdir()?;
    let file_path = dir.path().join("settings.ctn");
    let data = settings();

    let saved = carton::save_to_file(&file_path, &data, 4096)?;
    assert!(saved.is_clean());
    assert_eq!(std::fs::metadata(&file_path)?.len(), saved.bytes);

    let mut loaded = Settings::default();
    let results = carton::load_from_file(&file_path, &mut loaded)?;

    assert!(results.is_clean(), "{:?}", results.errors);
    assert_eq!(data, loaded);
    Ok(())
}

/// A save that runs out of room still writes the truncated stream; loading it reports the damage.
#[test]
fn test_truncated_file_is_reported() -> carton::Result<()> {
    let dir = tempfile::tempdir()?;
    let file_path = dir.path().join("short.ctn");

    let saved = carton::save_to_file(&file_path, &settings(), 64)?;
    assert!(saved.overflows > 0);
    assert!(saved.is_ok());

    let mut loaded = Settings::default();
    let results = carton::load_from_file(&file_path, &mut loaded)?;
    assert!(results.has_fatal_error);
    Ok(())
}

#[test]
fn test_empty_file_is_malformed() -> carton::Result<()> {
    let file = tempfile::NamedTempFile::new()?;
    let mut loaded = Settings::default();
    let results = carton::load_from_file(file.path(), &mut loaded)?;
    assert!(matches!(
        results.first_fatal(),
        Some(CartonError::MalformedMarker {
            expected: Construct::Signature,
            ..
        })
    ));
    Ok(())
}

#[test]
fn test_missing_file_is_an_io_error() {
    let mut loaded = Settings::default();
    let err = carton::load_from_file("/definitely/not/here.ctn", &mut loaded).unwrap_err();
    assert!(matches!(err, CartonError::Io(_)));
}

#[test]
fn test_inspect_file() -> carton::Result<()> {
    let dir = tempfile::tempdir()?;
    let file_path = dir.path().join("inspect.ctn");
    carton::save_to_file(&file_path, &settings(), 4096)?;

    let mut registry = Registry::new();
    registry.register::<Settings>()?;
    let report = Inspector::inspect_file(&file_path, &registry)?;

    assert_eq!(report.root.name, Some("Settings"));
    assert_eq!(report.root.children.len(), 3);
    assert_eq!(report.root.children[2].count, Some(100));
    Ok(())
}

#[test]
fn test_inspect_file_errors() -> carton::Result<()> {
    let dir = tempfile::tempdir()?;
    let missing = Inspector::inspect_file(dir.path().join("absent.ctn"), &Registry::new());
    assert!(matches!(missing, Err(CartonError::Io(_))));

    let empty = tempfile::NamedTempFile::new()?;
    let report = Inspector::inspect_file(empty.path(), &Registry::new());
    assert!(matches!(
        report,
        Err(CartonError::MalformedMarker {
            expected: Construct::Signature,
            ..
        })
    ));

    let path = dir.path().join("torn.ctn");
    carton::save_to_file(&path, &settings(), 4096)?;
    let bytes = std::fs::read(&path)?;
    std::fs::write(&path, &bytes[..bytes.len() - 4])?;
    assert!(Inspector::inspect_file(&path, &Registry::new()).is_err());
    Ok(())
}
