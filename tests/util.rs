#![allow(dead_code)]

use std::path::Path;

use tinykv_bench::{BackendKind, BenchConfig};

pub fn config(
    dir: &Path,
    name: &str,
    kind: BackendKind,
    steps: usize,
    scale: usize,
) -> BenchConfig {
    BenchConfig::new(name, kind).dir(dir).steps(steps, scale).seed(Some(42))
}

pub fn output_lines(buf: &[u8]) -> Vec<String> {
    String::from_utf8(buf.to_vec()).unwrap().lines().map(str::to_string).collect()
}

/// Millisecond count at the end of a report line, e.g. `... 12ms`.
pub fn trailing_ms(line: &str) -> u128 {
    let last = line.rsplit(", ").next().unwrap();
    last.strip_suffix("ms").unwrap().parse().unwrap()
}

pub fn dir_is_empty(dir: &Path) -> bool {
    std::fs::read_dir(dir).unwrap().next().is_none()
}
