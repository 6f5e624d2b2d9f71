//! Benchmarks for workspace file selection.
//!
//! These benchmarks measure walking a workspace and applying include,
//! exclude and require rules, the first step of every push.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use lib50::selector::{self, FilterRules, Limits};
use tempfile::TempDir;

/// Creates a workspace with `num_files` files spread over subdirectories.
fn create_workspace(num_files: usize) -> TempDir {
    let dir = TempDir::new().unwrap();
    for i in 0..num_files {
        let sub = dir.path().join(format!("src/module{}", i / 50));
        std::fs::create_dir_all(&sub).unwrap();
        let ext = if i % 3 == 0 { "c" } else { "py" };
        std::fs::write(sub.join(format!("file{}.{}", i, ext)), format!("# {}\n", i)).unwrap();
    }
    std::fs::create_dir_all(dir.path().join(".hidden")).unwrap();
    std::fs::write(dir.path().join(".hidden/secret"), "x").unwrap();
    dir
}

fn bench_select_all(c: &mut Criterion) {
    let mut group = c.benchmark_group("select_all");

    for size in [10, 100, 1000] {
        let workspace = create_workspace(size);
        group.bench_with_input(BenchmarkId::new("files", size), &workspace, |b, ws| {
            b.iter(|| {
                selector::select(black_box(ws.path()), &FilterRules::new(), &Limits::default())
                    .unwrap()
            })
        });
    }

    group.finish();
}

fn bench_select_with_rules(c: &mut Criterion) {
    let mut group = c.benchmark_group("select_with_rules");
    let workspace = create_workspace(500);

    let rules = FilterRules::new()
        .include("*.py")
        .exclude("src/module1")
        .require("src/module0/file1.py");
    group.bench_function("include_exclude_require", |b| {
        b.iter(|| selector::select(black_box(workspace.path()), &rules, &Limits::default()).unwrap())
    });

    let many = (0..20).fold(FilterRules::new(), |rules, i| {
        rules.include(&format!("src/module{}/*", i))
    });
    group.bench_function("many_includes", |b| {
        b.iter(|| selector::select(black_box(workspace.path()), &many, &Limits::default()).unwrap())
    });

    group.finish();
}

criterion_group!(benches, bench_select_all, bench_select_with_rules);
criterion_main!(benches);
