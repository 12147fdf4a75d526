use std::fs;
use std::io::Write;
use std::panic;
use std::path::{Path, PathBuf};
use std::thread;

use ahash::AHashMap;
use tempfile::NamedTempFile;

use one_brc::{run, IoStrategy, DEFAULT_READ_BUFFER_SIZE, MIN_READ_BUFFER_SIZE};

// -------------------------------------------- Helpers --------------------------------------------

/// `(input, expected output)` pairs from `tests/data`.
fn fixtures() -> Vec<(PathBuf, PathBuf)> {
    let data = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/data");
    let mut fixtures: Vec<(PathBuf, PathBuf)> = fs::read_dir(&data)
        .expect("tests/data should exist")
        .map(|entry| entry.expect("readable dir entry").path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "txt"))
        .map(|input| {
            let expected = input.with_extension("out");
            (input, expected)
        })
        .collect();
    fixtures.sort();
    assert!(!fixtures.is_empty(), "no fixtures in {data:?}");
    fixtures
}

fn processor_count() -> usize {
    thread::available_parallelism().map_or(1, |n| n.get())
}

fn strategies() -> [IoStrategy; 3] {
    [
        IoStrategy::MemoryMapped,
        IoStrategy::PositionedReads {
            buffer_size: DEFAULT_READ_BUFFER_SIZE,
        },
        IoStrategy::PositionedReads {
            buffer_size: MIN_READ_BUFFER_SIZE,
        },
    ]
}

fn run_and_assert(input: &Path, expected: &Path, thread_count: usize, strategy: IoStrategy) {
    let expected = fs::read_to_string(expected).expect("expected output should be readable");
    let (actual, _) = run(input, thread_count, strategy)
        .unwrap_or_else(|e| panic!("{input:?} {thread_count} threads {strategy:?}: {e:#}"));
    assert_eq!(actual, expected, "{input:?} {thread_count} threads {strategy:?}");
}

/// Straightforward aggregation to compare the pipeline against.
fn reference_output(content: &str) -> String {
    let mut stats = AHashMap::<&str, (i64, i64, i64, i64)>::new();
    for line in content.lines() {
        let (name, value) = line.split_once(';').expect("line should contain ';'");
        let value: f64 = lexical_core::parse(value.as_bytes()).expect("value should parse");
        let tenths = (value * 10.0).round() as i64;
        let entry = stats.entry(name).or_insert((i64::MAX, 0, 0, i64::MIN));
        entry.0 = entry.0.min(tenths);
        entry.1 += tenths;
        entry.2 += 1;
        entry.3 = entry.3.max(tenths);
    }

    let mut names: Vec<&str> = stats.keys().copied().collect();
    names.sort_unstable_by(|a, b| a.as_bytes().cmp(b.as_bytes()));
    let rendered: Vec<String> = names
        .iter()
        .map(|name| {
            let (min, sum, count, max) = stats[name];
            let (quotient, remainder) = (sum.abs() / count, sum.abs() % count);
            let magnitude = if remainder * 2 >= count { quotient + 1 } else { quotient };
            let mean = sum.signum() * magnitude;
            format!(
                "{name}={:.1}/{:.1}/{:.1}",
                min as f64 / 10.0,
                mean as f64 / 10.0,
                max as f64 / 10.0
            )
        })
        .collect();
    format!("{{{}}}\n", rendered.join(", "))
}

/// Deterministic pseudo random measurements.
fn generate(rows: usize, stations: usize, seed: u64) -> String {
    let mut state = seed;
    let mut next = move || {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        state
    };
    let names: Vec<String> = (0..stations)
        .map(|i| {
            let len = 1 + (next() % 60) as usize;
            let base = "Qwertyuiopasdfghjklzxcvbnm äöü ";
            let name: String = base.chars().cycle().skip(i % 29).take(len).collect();
            format!("{name}{i}")
        })
        .collect();
    let mut content = String::with_capacity(rows * 24);
    for _ in 0..rows {
        let name = &names[(next() % stations as u64) as usize];
        let tenths = (next() % 1999) as i64 - 999;
        let sign = if tenths < 0 { "-" } else { "" };
        content.push_str(&format!(
            "{name};{sign}{}.{}\n",
            tenths.abs() / 10,
            tenths.abs() % 10
        ));
    }
    content
}

fn temp_file(content: &[u8]) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("Failed to create temp file");
    file.write_all(content).expect("Failed to write to temp file");
    file.flush().expect("Failed to flush");
    file
}

// -------------------------------------------- Fixture Tests --------------------------------------------

#[test]
fn fixtures_single_thread() {
    for (input, expected) in fixtures() {
        for strategy in strategies() {
            run_and_assert(&input, &expected, 1, strategy);
        }
    }
}

#[test]
fn fixtures_eight_threads() {
    for (input, expected) in fixtures() {
        for strategy in strategies() {
            run_and_assert(&input, &expected, 8, strategy);
        }
    }
}

#[test]
fn fixtures_processor_count_threads() {
    for (input, expected) in fixtures() {
        for strategy in strategies() {
            run_and_assert(&input, &expected, processor_count(), strategy);
        }
    }
}

// -------------------------------------------- Generated Input Tests --------------------------------------------

#[test]
fn generated_input_matches_reference() {
    let content = generate(120_000, 777, 0x2545_f491_4f6c_dd1d);
    let expected = reference_output(&content);
    let file = temp_file(content.as_bytes());
    for thread_count in [1, 3, 8, 32] {
        for strategy in strategies() {
            let (actual, _) = run(file.path(), thread_count, strategy).unwrap();
            assert_eq!(actual, expected, "{thread_count} threads {strategy:?}");
        }
    }
}

#[test]
fn reference_agrees_with_fixture() {
    let data = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/data");
    let content = fs::read_to_string(data.join("measurements-short.txt")).unwrap();
    let expected = fs::read_to_string(data.join("measurements-short.out")).unwrap();
    assert_eq!(reference_output(&content), expected);
}

#[test]
fn too_many_stations_panics_the_run() {
    let content: String = (0..14_000).map(|i| format!("s{i};1.0\n")).collect();
    let file = temp_file(content.as_bytes());
    let path = file.path().to_path_buf();
    let outcome = panic::catch_unwind(move || run(&path, 4, IoStrategy::MemoryMapped));
    assert!(outcome.is_err(), "exceeding the station capacity must not be silent");
}
