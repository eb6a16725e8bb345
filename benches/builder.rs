//! Benchmarks for version assembly.

use std::sync::Arc;

use bytes::Bytes;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use slicedb::{
    FileDescriptor, FileMetadata, InternalKey, InternalKeyComparator, Version, VersionBuilder,
    VersionEdit,
};

fn make_meta(num: u64, smallest: &str, largest: &str) -> FileMetadata {
    FileMetadata::new(
        FileDescriptor::new(num, 0, 64 * 1024 * 1024),
        InternalKey::for_value(Bytes::from(smallest.to_string()), num),
        InternalKey::for_value(Bytes::from(largest.to_string()), num),
        num,
        num,
    )
}

fn base_version(files_per_level: usize) -> Arc<Version> {
    let mut version = Version::new(7, 0, None);
    let mut number = 1;
    for level in 1..4 {
        for i in 0..files_per_level {
            let lo = format!("key{:08}", i * 100);
            let hi = format!("key{:08}", i * 100 + 50);
            version.add_file(level, Arc::new(make_meta(number, &lo, &hi)));
            number += 1;
        }
    }
    Arc::new(version)
}

fn bench_apply_and_save(c: &mut Criterion) {
    let mut group = c.benchmark_group("version_builder");

    for files_per_level in [100usize, 1000] {
        group.bench_with_input(
            BenchmarkId::new("apply_and_save", files_per_level),
            &files_per_level,
            |b, &files_per_level| {
                let base = base_version(files_per_level);
                b.iter(|| {
                    let mut builder = VersionBuilder::new(
                        InternalKeyComparator::new(),
                        None,
                        Arc::clone(&base),
                        None,
                        false,
                    );

                    // One compaction-shaped edit: replace two L1 files with
                    // one L2 file placed past the existing key space.
                    let mut edit = VersionEdit::new();
                    edit.delete_file(1, 1);
                    edit.delete_file(1, 2);
                    edit.add_file(2, make_meta(1_000_000, "zzz0", "zzz9"));
                    builder.apply(&edit);

                    let mut next = Version::new(7, 1, None);
                    builder.save_to(&mut next);
                    next
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_apply_and_save);
criterion_main!(benches);
