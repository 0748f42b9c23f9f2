use beamline_launch::allocator::allocate;

#[test]
fn test_free_candidate_returned_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let candidate = dir.path().join("run");

    assert_eq!(allocate(&candidate).unwrap(), candidate);
}

#[test]
fn test_existing_candidate_gets_first_suffix() {
    let dir = tempfile::tempdir().unwrap();
    let candidate = dir.path().join("run");
    std::fs::create_dir(&candidate).unwrap();

    assert_eq!(allocate(&candidate).unwrap(), dir.path().join("run_1"));
}

#[test]
fn test_skips_taken_suffixes() {
    let dir = tempfile::tempdir().unwrap();
    let candidate = dir.path().join("run");
    std::fs::create_dir(&candidate).unwrap();
    std::fs::create_dir(dir.path().join("run_1")).unwrap();

    assert_eq!(allocate(&candidate).unwrap(), dir.path().join("run_2"));
}

#[test]
fn test_files_count_as_taken() {
    let dir = tempfile::tempdir().unwrap();
    let candidate = dir.path().join("run");
    std::fs::write(&candidate, b"").unwrap();

    assert_eq!(allocate(&candidate).unwrap(), dir.path().join("run_1"));
}

#[test]
fn test_allocate_is_idempotent_until_created() {
    let dir = tempfile::tempdir().unwrap();
    let candidate = dir.path().join("run");
    std::fs::create_dir(&candidate).unwrap();

    let first = allocate(&candidate).unwrap();
    let second = allocate(&candidate).unwrap();
    assert_eq!(first, second);

    std::fs::create_dir(&first).unwrap();
    assert_eq!(allocate(&candidate).unwrap(), dir.path().join("run_2"));
}
