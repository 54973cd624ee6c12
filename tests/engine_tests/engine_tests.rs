//! Tests for Engine
//!
//! These tests verify:
//! - insert / update / replace / remove / lookup semantics
//! - Tri-state status codes
//! - size and waste accounting
//! - Version chains and tombstones
//! - Persistence across close/reopen, and non-persistent opens
//! - Device failures leave the database unchanged
//! - Concurrent access patterns

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chainkv::{status_code, Config, Engine, KvError, MemoryDevice, Outcome};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn test_config() -> Config {
    Config::builder()
        .write_buffer_blocks(4)
        .read_cache_blocks(8)
        .flush_interval_ms(5)
        .build()
}

fn setup_device() -> Arc<MemoryDevice> {
    Arc::new(MemoryDevice::new(4096, 1024))
}

fn open_engine(device: &Arc<MemoryDevice>, config: Config) -> Engine {
    Engine::open_with_device(device.clone(), config).unwrap()
}

fn setup_memory_engine() -> (Arc<MemoryDevice>, Engine) {
    let device = setup_device();
    let engine = open_engine(&device, test_config());
    (device, engine)
}

fn value_of(engine: &Engine, key: &str) -> Option<String> {
    engine
        .lookup(key.as_bytes())
        .unwrap()
        .map(|value| String::from_utf8(value).unwrap())
}

// =============================================================================
// Basic Operations Tests
// =============================================================================

#[test]
fn test_engine_insert_lookup() {
    let (_device, engine) = setup_memory_engine();

    assert_eq!(engine.insert(b"hello", b"world").unwrap(), Outcome::Applied);

    assert_eq!(engine.lookup(b"hello").unwrap(), Some(b"world".to_vec()));
    assert!(engine.contains(b"hello").unwrap());
}

#[test]
fn test_engine_lookup_nonexistent_key() {
    let (_device, engine) = setup_memory_engine();

    assert_eq!(engine.lookup(b"nonexistent").unwrap(), None);
    assert!(!engine.contains(b"nonexistent").unwrap());
}

#[test]
fn test_engine_insert_existing_key() {
    let (_device, engine) = setup_memory_engine();
    engine.insert(b"key", b"first").unwrap();

    let result = engine.insert(b"key", b"second");

    assert_eq!(status_code(&result), 1);
    assert_eq!(result.unwrap(), Outcome::KeyExists);
    assert_eq!(value_of(&engine, "key").as_deref(), Some("first"));
}

#[test]
fn test_engine_update_upserts() {
    let (_device, engine) = setup_memory_engine();

    assert_eq!(engine.update(b"key", b"v1").unwrap(), Outcome::Applied);
    assert_eq!(engine.update(b"key", b"v2").unwrap(), Outcome::Applied);

    assert_eq!(value_of(&engine, "key").as_deref(), Some("v2"));
}

#[test]
fn test_engine_replace() {
    let (_device, engine) = setup_memory_engine();

    let result = engine.replace(b"key", b"v1");
    assert_eq!(status_code(&result), 1);
    assert_eq!(result.unwrap(), Outcome::KeyNotFound);
    assert_eq!(engine.lookup(b"key").unwrap(), None);

    engine.insert(b"key", b"v1").unwrap();
    assert_eq!(engine.replace(b"key", b"v2").unwrap(), Outcome::Applied);
    assert_eq!(value_of(&engine, "key").as_deref(), Some("v2"));
}

#[test]
fn test_engine_remove() {
    let (_device, engine) = setup_memory_engine();
    engine.insert(b"key", b"value").unwrap();

    let result = engine.remove(b"key");
    assert_eq!(status_code(&result), 0);
    assert_eq!(engine.lookup(b"key").unwrap(), None);

    // Already removed
    let result = engine.remove(b"key");
    assert_eq!(status_code(&result), 1);
    assert_eq!(result.unwrap(), Outcome::KeyNotFound);
}

#[test]
fn test_engine_remove_nonexistent_key() {
    let (_device, engine) = setup_memory_engine();

    assert_eq!(engine.remove(b"missing").unwrap(), Outcome::KeyNotFound);
    assert_eq!(engine.size(), 0);
    assert_eq!(engine.waste(), 0);
}

#[test]
fn test_engine_insert_after_remove() {
    let (_device, engine) = setup_memory_engine();
    engine.insert(b"key", b"v1").unwrap();
    engine.remove(b"key").unwrap();

    assert_eq!(engine.insert(b"key", b"v2").unwrap(), Outcome::Applied);
    assert_eq!(value_of(&engine, "key").as_deref(), Some("v2"));
}

#[test]
fn test_engine_take() {
    let (_device, engine) = setup_memory_engine();
    engine.insert(b"key", b"value").unwrap();

    assert_eq!(engine.take(b"key").unwrap(), Some(b"value".to_vec()));
    assert_eq!(engine.take(b"key").unwrap(), None);
    assert_eq!(engine.size(), 0);
}

#[test]
fn test_engine_multiple_keys() {
    let (_device, engine) = setup_memory_engine();

    for i in 0..200 {
        engine
            .insert(format!("key{}", i).as_bytes(), format!("value{}", i).as_bytes())
            .unwrap();
    }

    for i in 0..200 {
        let expected = format!("value{}", i);
        assert_eq!(value_of(&engine, &format!("key{}", i)), Some(expected));
    }
    assert_eq!(engine.size(), 200);
}

// =============================================================================
// Argument Validation Tests
// =============================================================================

#[test]
fn test_engine_empty_key() {
    let (_device, engine) = setup_memory_engine();

    let result = engine.insert(b"", b"value");
    assert_eq!(status_code(&result), -1);
    assert!(matches!(result, Err(KvError::InvalidArgument(_))));
    assert!(engine.lookup(b"").is_err());
}

#[test]
fn test_engine_empty_value() {
    let (_device, engine) = setup_memory_engine();

    let result = engine.update(b"key", b"");
    assert_eq!(status_code(&result), -1);
    assert_eq!(engine.size(), 0);
}

#[test]
fn test_engine_large_value() {
    let (_device, engine) = setup_memory_engine();
    let large: Vec<u8> = (0..300_000u32).map(|i| (i % 251) as u8).collect();

    engine.insert(b"large", &large).unwrap();
    engine.insert(b"after", b"small").unwrap();

    assert_eq!(engine.lookup(b"large").unwrap(), Some(large));
    assert_eq!(value_of(&engine, "after").as_deref(), Some("small"));
}

#[test]
fn test_engine_binary_data() {
    let (_device, engine) = setup_memory_engine();
    let key = vec![0u8, 1, 2, 255, 254];
    let value = vec![255u8, 0, 128, 64, 0];

    engine.insert(&key, &value).unwrap();

    assert_eq!(engine.lookup(&key).unwrap(), Some(value));
}

// =============================================================================
// Counter Tests
// =============================================================================

#[test]
fn test_engine_counters() {
    let (_device, engine) = setup_memory_engine();
    let counters = |engine: &Engine| (engine.size(), engine.waste());

    engine.insert(b"a", b"1").unwrap();
    assert_eq!(counters(&engine), (1, 0));

    engine.update(b"a", b"2").unwrap();
    assert_eq!(counters(&engine), (1, 1));

    engine.update(b"b", b"1").unwrap();
    assert_eq!(counters(&engine), (2, 1));

    engine.replace(b"a", b"3").unwrap();
    assert_eq!(counters(&engine), (2, 2));

    engine.remove(b"a").unwrap();
    assert_eq!(counters(&engine), (1, 3));

    // Upsert over a tombstone revives the key without adding waste
    engine.update(b"a", b"4").unwrap();
    assert_eq!(counters(&engine), (2, 3));

    // Precondition failures change nothing
    engine.insert(b"b", b"x").unwrap();
    engine.replace(b"c", b"x").unwrap();
    engine.remove(b"c").unwrap();
    assert_eq!(counters(&engine), (2, 3));
}

#[test]
fn test_engine_counters_follow_model() {
    let (_device, engine) = setup_memory_engine();
    let mut rng = StdRng::seed_from_u64(0x5eed);

    // Reference: live value per key, plus expected waste
    let mut live: HashMap<Vec<u8>, Vec<u8>> = HashMap::new();
    let mut waste = 0u64;

    for step in 0..2000 {
        let key = format!("k{}", rng.gen_range(0..40)).into_bytes();
        let value = format!("v{}", step).into_bytes();
        let exists = live.contains_key(&key);

        let (outcome, expected) = match rng.gen_range(0..4) {
            0 => {
                let outcome = engine.insert(&key, &value).unwrap();
                if !exists {
                    live.insert(key.clone(), value);
                }
                (outcome, if exists { Outcome::KeyExists } else { Outcome::Applied })
            }
            1 => {
                let outcome = engine.update(&key, &value).unwrap();
                if live.insert(key.clone(), value).is_some() {
                    waste += 1;
                }
                (outcome, Outcome::Applied)
            }
            2 => {
                let outcome = engine.replace(&key, &value).unwrap();
                if exists {
                    live.insert(key.clone(), value);
                    waste += 1;
                }
                (outcome, if exists { Outcome::Applied } else { Outcome::KeyNotFound })
            }
            _ => {
                let outcome = engine.remove(&key).unwrap();
                if live.remove(&key).is_some() {
                    waste += 1;
                }
                (outcome, if exists { Outcome::Applied } else { Outcome::KeyNotFound })
            }
        };

        assert_eq!(engine.size(), live.len() as u64, "size after step {}", step);
        assert_eq!(engine.waste(), waste, "waste after step {}", step);
        assert_eq!(engine.lookup(&key).unwrap(), live.get(&key).cloned());
        assert_eq!(outcome, expected, "outcome at step {}", step);
    }
}

#[test]
fn test_engine_failed_preconditions_create_no_cells() {
    let (_device, engine) = setup_memory_engine();

    engine.replace(b"ghost", b"x").unwrap();
    engine.remove(b"ghost").unwrap();
    assert_eq!(engine.take(b"ghost").unwrap(), None);

    assert_eq!(engine.stats().indexed_keys, 0);
    assert!(engine.history(b"ghost").unwrap().is_empty());
}

#[test]
fn test_engine_stats() {
    let (_device, engine) = setup_memory_engine();
    engine.insert(b"a", b"1").unwrap();
    engine.insert(b"b", b"2").unwrap();
    engine.remove(b"b").unwrap();

    let stats = engine.stats();
    assert_eq!(stats.size, 1);
    assert_eq!(stats.waste, 1);
    assert_eq!(stats.indexed_keys, 2);
    assert!(stats.log_len > 0);
    assert_eq!(stats.cache.slots, 8);
}

// =============================================================================
// History Tests
// =============================================================================

#[test]
fn test_engine_history() {
    let (_device, engine) = setup_memory_engine();
    engine.insert(b"key", b"v1").unwrap();
    engine.insert(b"other", b"x").unwrap();
    engine.update(b"key", b"v2").unwrap();
    engine.remove(b"key").unwrap();
    engine.update(b"key", b"v3").unwrap();

    let history = engine.history(b"key").unwrap();

    assert_eq!(
        history,
        vec![
            Some(b"v3".to_vec()),
            None,
            Some(b"v2".to_vec()),
            Some(b"v1".to_vec()),
        ]
    );
    assert!(engine.history(b"never").unwrap().is_empty());
}

#[test]
fn test_engine_many_versions() {
    let (_device, engine) = setup_memory_engine();

    for i in 0..500 {
        engine.update(b"hot", format!("v{}", i).as_bytes()).unwrap();
    }

    assert_eq!(value_of(&engine, "hot").as_deref(), Some("v499"));
    assert_eq!(engine.history(b"hot").unwrap().len(), 500);
    assert_eq!(engine.size(), 1);
    assert_eq!(engine.waste(), 499);
}

// =============================================================================
// Persistence Tests
// =============================================================================

#[test]
fn test_engine_reopen_restores_state() {
    let device = setup_device();
    {
        let engine = open_engine(&device, test_config());
        for i in 0..100 {
            engine
                .insert(format!("key{}", i).as_bytes(), format!("value{}", i).as_bytes())
                .unwrap();
        }
        engine.update(b"key0", b"changed").unwrap();
        engine.remove(b"key1").unwrap();
        engine.close().unwrap();
    }

    let engine = open_engine(&device, test_config());

    assert_eq!(engine.size(), 99);
    assert_eq!(engine.waste(), 2);
    assert_eq!(value_of(&engine, "key0").as_deref(), Some("changed"));
    assert_eq!(value_of(&engine, "key1"), None);
    assert_eq!(value_of(&engine, "key99").as_deref(), Some("value99"));
    assert_eq!(engine.history(b"key0").unwrap().len(), 2);
}

#[test]
fn test_engine_multiple_sessions() {
    let device = setup_device();

    for session in 0..3 {
        let engine = open_engine(&device, test_config());
        assert_eq!(engine.size(), session);
        engine
            .insert(format!("session{}", session).as_bytes(), b"present")
            .unwrap();
        engine.close().unwrap();
    }

    let engine = open_engine(&device, test_config());
    assert_eq!(engine.size(), 3);
    for session in 0..3 {
        assert!(engine.contains(format!("session{}", session).as_bytes()).unwrap());
    }
}

#[test]
fn test_engine_non_persistent_starts_empty() {
    let device = setup_device();
    {
        let engine = open_engine(&device, test_config());
        engine.insert(b"key", b"value").unwrap();
        engine.close().unwrap();
    }

    let config = Config::builder().persistence(false).build();
    let engine = open_engine(&device, config);

    assert_eq!(engine.size(), 0);
    assert_eq!(engine.lookup(b"key").unwrap(), None);
    assert_eq!(engine.insert(b"key", b"fresh").unwrap(), Outcome::Applied);
}

#[test]
fn test_engine_open_file_creates_directories() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("nested").join("db.img");
    let config = Config::builder().path(&path).device_blocks(256).build();

    let engine = Engine::open(config).unwrap();
    engine.insert(b"key", b"value").unwrap();
    engine.close().unwrap();

    assert!(path.exists());
}

// =============================================================================
// Failure Tests
// =============================================================================

#[test]
fn test_engine_write_failure_leaves_state_unchanged() {
    let (device, engine) = setup_memory_engine();
    engine.insert(b"key", b"v1").unwrap();

    device.set_fail_writes(true);
    assert!(engine.flush().is_err());

    let result = engine.update(b"key", b"v2");
    assert_eq!(status_code(&result), -1);
    let result = engine.insert(b"new", b"value");
    assert_eq!(status_code(&result), -1);

    assert_eq!(engine.size(), 1);
    assert_eq!(engine.waste(), 0);
    assert_eq!(value_of(&engine, "key").as_deref(), Some("v1"));
    assert_eq!(value_of(&engine, "new"), None);

    // Writes work again once the device recovers
    device.set_fail_writes(false);
    engine.flush().unwrap();
    assert_eq!(engine.update(b"key", b"v2").unwrap(), Outcome::Applied);
    assert_eq!(value_of(&engine, "key").as_deref(), Some("v2"));
    assert_eq!(engine.size(), 1);
    assert_eq!(engine.waste(), 1);
}

#[test]
fn test_engine_recovers_after_failed_flush_without_caller() {
    let (device, engine) = setup_memory_engine();
    engine.insert(b"key", b"v1").unwrap();

    device.set_fail_writes(true);
    assert!(engine.flush().is_err());
    assert_eq!(status_code(&engine.update(b"key", b"v2")), -1);
    assert_eq!(status_code(&engine.insert(b"new", b"value")), -1);
    assert_eq!(engine.stats().indexed_keys, 1);

    // No explicit flush after the device recovers
    device.set_fail_writes(false);
    let mut status = -1;
    for _ in 0..400 {
        status = status_code(&engine.update(b"key", b"v2"));
        if status != -1 {
            break;
        }
        thread::sleep(Duration::from_millis(5));
    }

    assert_eq!(status, 0);
    assert_eq!(value_of(&engine, "key").as_deref(), Some("v2"));
    assert_eq!(engine.insert(b"new", b"value").unwrap(), Outcome::Applied);
    assert_eq!(engine.size(), 2);
    assert_eq!(engine.waste(), 1);
}

#[test]
fn test_engine_device_full() {
    let device = Arc::new(MemoryDevice::new(4096, 4));
    let engine = open_engine(&device, test_config());

    let value = vec![7u8; 3000];
    let mut applied = 0;
    let err = loop {
        match engine.insert(format!("key{}", applied).as_bytes(), &value) {
            Ok(_) => applied += 1,
            Err(e) => break e,
        }
    };

    assert!(matches!(err, KvError::DeviceFull { .. }));
    assert_eq!(engine.size(), applied);
    assert!(engine.contains(b"key0").unwrap());
}

// =============================================================================
// Concurrent Access Tests
// =============================================================================

#[test]
fn test_engine_concurrent_reads() {
    let (_device, engine) = setup_memory_engine();
    let engine = Arc::new(engine);

    // Pre-populate data
    for i in 0..100 {
        engine
            .insert(format!("key{}", i).as_bytes(), format!("value{}", i).as_bytes())
            .unwrap();
    }

    // Spawn multiple reader threads
    let mut handles = vec![];
    for _ in 0..4 {
        let engine_clone = Arc::clone(&engine);
        handles.push(thread::spawn(move || {
            for i in 0..100 {
                let key = format!("key{}", i);
                let expected = format!("value{}", i);
                let result = engine_clone.lookup(key.as_bytes()).unwrap();
                assert_eq!(result, Some(expected.into_bytes()));
            }
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
fn test_engine_concurrent_writes() {
    let (_device, engine) = setup_memory_engine();
    let engine = Arc::new(engine);

    // Spawn multiple writer threads
    let mut handles = vec![];
    for t in 0..4 {
        let engine_clone = Arc::clone(&engine);
        handles.push(thread::spawn(move || {
            for i in 0..50 {
                let key = format!("thread{}_key{}", t, i);
                let value = format!("thread{}_value{}", t, i);
                engine_clone.insert(key.as_bytes(), value.as_bytes()).unwrap();
                engine_clone.update(b"shared", value.as_bytes()).unwrap();
            }
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }

    for t in 0..4 {
        for i in 0..50 {
            let key = format!("thread{}_key{}", t, i);
            let expected = format!("thread{}_value{}", t, i);
            assert_eq!(value_of(&engine, &key), Some(expected));
        }
    }
    assert_eq!(engine.size(), 201);
    assert_eq!(engine.waste(), 199);
    assert_eq!(engine.history(b"shared").unwrap().len(), 200);
}
