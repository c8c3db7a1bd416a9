use std::fs::{self, File};

use reftable::{RefRecord, Stack, StackConfig, StackError};

fn open(dir: &std::path::Path) -> Stack {
    let manifest_path = dir.join("manifest");
    Stack::open(dir, manifest_path, StackConfig::default()).unwrap()
}

fn set(stack: &Stack, name: &str, value: &[u8]) {
    let name = name.to_string();
    let value = value.to_vec();
    let added = stack
        .add(move |writer, next| {
            writer.set_limits(next, next)?;
            writer.add_ref(RefRecord::value(name, next, value))
        })
        .unwrap();
    assert!(added);
}

fn delete(stack: &Stack, name: &str) {
    let name = name.to_string();
    let deleted = stack
        .add(move |writer, next| {
            writer.set_limits(next, next)?;
            writer.add_ref(RefRecord::deletion(name, next))
        })
        .unwrap();
    assert!(deleted);
}

fn value_of(stack: &Stack, name: &str) -> Option<Vec<u8>> {
    stack
        .seek_ref(name)
        .into_iter()
        .find(|r| r.ref_name == name)
        .and_then(|r| match r.value {
            reftable::RefValue::Value(v) => Some(v),
            reftable::RefValue::Deletion => None,
        })
}

#[test]
fn add_then_get_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let stack = open(dir.path());

    set(&stack, "refs/heads/main", b"aaaa");
    assert_eq!(value_of(&stack, "refs/heads/main"), Some(b"aaaa".to_vec()));
}

#[test]
fn later_add_shadows_earlier_one() {
    let dir = tempfile::tempdir().unwrap();
    let stack = open(dir.path());

    set(&stack, "refs/heads/main", b"aaaa");
    set(&stack, "refs/heads/main", b"bbbb");

    // Add's automatic AutoCompact may already have folded the two
    // similarly-sized tables together; either way the newer value wins.
    assert_eq!(value_of(&stack, "refs/heads/main"), Some(b"bbbb".to_vec()));
}

#[test]
fn reopening_preserves_state() {
    let dir = tempfile::tempdir().unwrap();
    {
        let stack = open(dir.path());
        set(&stack, "refs/heads/main", b"aaaa");
        set(&stack, "refs/tags/v1", b"bbbb");
    }

    let stack = open(dir.path());
    assert_eq!(value_of(&stack, "refs/heads/main"), Some(b"aaaa".to_vec()));
    assert_eq!(value_of(&stack, "refs/tags/v1"), Some(b"bbbb".to_vec()));
    assert_eq!(stack.next_update_index(), 3);
}

#[test]
fn deletion_is_visible_until_compacted_to_the_bottom() {
    let dir = tempfile::tempdir().unwrap();
    let stack = open(dir.path());

    // A bulky, differently-tiered table first so the two small ones below
    // land in their own size segment and auto-compaction after `delete`
    // never reaches down to table 0 on its own.
    set(&stack, "refs/heads/other", &vec![b'x'; 300]);
    set(&stack, "refs/heads/main", b"aaaa");
    delete(&stack, "refs/heads/main");

    // The tombstone is visible: the ref resolves to nothing.
    assert_eq!(value_of(&stack, "refs/heads/main"), None);
    let records = stack.seek_ref("refs/heads/main");
    assert!(records.iter().any(|r| r.is_deletion()));

    // Compacting the whole stack (first == 0) elides the tombstone.
    assert!(stack.compact_all().unwrap());
    let records = stack.seek_ref("refs/heads/main");
    assert!(records.is_empty());
}

#[test]
fn compact_all_merges_tables() {
    let dir = tempfile::tempdir().unwrap();
    let stack = open(dir.path());

    // Add's own AutoCompact already tiers same-size tables down as they
    // accumulate; regardless of where that leaves the count, one explicit
    // compact_all always lands on a single table.
    for i in 0..5 {
        set(&stack, &format!("refs/heads/branch-{i}"), b"value");
    }

    let _ = stack.compact_all();
    assert_eq!(stack.table_count(), 1);

    for i in 0..5 {
        assert_eq!(value_of(&stack, &format!("refs/heads/branch-{i}")), Some(b"value".to_vec()));
    }
}

#[test]
fn compact_range_preserves_records_outside_the_range() {
    let dir = tempfile::tempdir().unwrap();
    let stack = open(dir.path());

    // Sizes spaced far enough apart in log2 buckets that Add's automatic
    // AutoCompact never folds any two of these together on its own.
    set(&stack, "refs/heads/a", &vec![b'1'; 1]);
    set(&stack, "refs/heads/b", &vec![b'2'; 64]);
    set(&stack, "refs/heads/c", &vec![b'3'; 512]);
    assert_eq!(stack.table_count(), 3);

    assert!(stack.compact_range(0, 1).unwrap());
    assert_eq!(stack.table_count(), 2);

    assert_eq!(value_of(&stack, "refs/heads/a"), Some(vec![b'1'; 1]));
    assert_eq!(value_of(&stack, "refs/heads/b"), Some(vec![b'2'; 64]));
    assert_eq!(value_of(&stack, "refs/heads/c"), Some(vec![b'3'; 512]));
}

#[test]
fn repeated_same_size_adds_stay_tiered() {
    let dir = tempfile::tempdir().unwrap();
    let stack = open(dir.path());

    for i in 0..8 {
        set(&stack, &format!("refs/heads/branch-{i}"), b"same-size-value");
    }

    // Add's automatic AutoCompact keeps the table count from growing
    // unboundedly even without the caller ever compacting explicitly.
    assert!(stack.table_count() <= 4, "table_count was {}", stack.table_count());
    for i in 0..8 {
        assert_eq!(value_of(&stack, &format!("refs/heads/branch-{i}")), Some(b"same-size-value".to_vec()));
    }
}

#[test]
fn compaction_increments_attempts_and_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let stack = open(dir.path());

    set(&stack, "refs/heads/a", &vec![b'a'; 4]);
    set(&stack, "refs/heads/b", &vec![b'b'; 512]);
    assert_eq!(stack.table_count(), 2);

    assert!(stack.compact_range(0, 1).unwrap());
    assert_eq!(stack.stats().attempts(), 1);
    assert!(stack.stats().bytes() > 0);
}

#[test]
fn log_records_are_kept_across_updates() {
    let dir = tempfile::tempdir().unwrap();
    let stack = open(dir.path());

    let result = stack.add(|writer, next| {
        writer.set_limits(next, next)?;
        writer.add_ref(RefRecord::value("refs/heads/main", next, b"aaaa".to_vec()))?;
        writer.add_log(reftable::LogRecord {
            ref_name: "refs/heads/main".to_string(),
            update_index: next,
            old_value: Vec::new(),
            new_value: b"aaaa".to_vec(),
            name: "author".to_string(),
            email: "author@example.com".to_string(),
            message: "initial commit".to_string(),
        })
    });
    assert!(result.unwrap());

    let logs = stack.seek_log("refs/heads/main", u64::MAX);
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].message, "initial commit");
}

#[test]
fn add_fails_with_lock_contention_while_manifest_lock_is_held() {
    let dir = tempfile::tempdir().unwrap();
    let stack = open(dir.path());
    let manifest_path = dir.path().join("manifest");
    let lock_path = manifest_path.with_extension("lock");

    let _held = File::options().write(true).create_new(true).open(&lock_path).unwrap();

    let result = stack.add(|writer, next| {
        writer.set_limits(next, next)?;
        writer.add_ref(RefRecord::value("refs/heads/main", next, b"aaaa".to_vec()))
    });

    assert!(matches!(result, Err(StackError::LockContention)));

    fs::remove_file(&lock_path).unwrap();
}
