use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use slabgc::{gc_frame, Arena, CacheId, RootSet};

pub fn bench_gcs(c: &mut Criterion) {
    let mut group = c.benchmark_group("binary trees");
    group.sample_size(50);
    let n = 12;

    for i in n..19 {
        let min_depth = 4;
        let mut max_depth = min_depth + 2;
        if max_depth < i {
            max_depth = i;
        }
        group.bench_function(BenchmarkId::new("slab", i), |b| {
            b.iter_batched_ref(
                || {
                    let mut arena = Arena::new();
                    let node = arena.resolve_cache(2, 2);
                    (arena, node, RootSet::new())
                },
                |(arena, node, roots)| {
                    let mut depth = min_depth;
                    while depth < max_depth {
                        let iterations = 1 << (max_depth - depth + min_depth);

                        for _ in 0..iterations {
                            let tree = slab_tree::bottom_up_tree(arena, *node, roots, depth);
                            slab_tree::item_check(tree);
                        }

                        depth += 2;
                    }
                },
                criterion::BatchSize::LargeInput,
            );
        });

        group.bench_function(BenchmarkId::new("slab(bytes)", i), |b| {
            b.iter_batched_ref(
                Arena::new,
                |arena| {
                    let mut depth = min_depth;
                    while depth < max_depth {
                        let iterations = 1 << (max_depth - depth + min_depth);
                        for _ in 0..iterations * (1 << depth) {
                            arena.allocate_bytes(24, &());
                        }
                        depth += 2;
                    }
                },
                criterion::BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

criterion_group!(benches, bench_gcs);
criterion_main!(benches);

mod slab_tree {
    use super::*;
    use slabgc::Address;

    pub fn item_check(tree: Address) -> i32 {
        let (first, second) = unsafe { (tree.read_field(0), tree.read_field(1)) };
        if first == 0 {
            return 1;
        }
        let first = Address::from_usize(first).unwrap();
        let second = Address::from_usize(second).unwrap();
        1 + item_check(first) + item_check(second)
    }

    pub fn bottom_up_tree(
        arena: &mut Arena,
        node: CacheId,
        roots: &RootSet,
        mut depth: i32,
    ) -> Address {
        if depth > 0 {
            depth -= 1;
            gc_frame!(frame = roots, [0, 0]);
            let first = bottom_up_tree(arena, node, roots, depth);
            frame.set(0, first.to_usize());
            let second = bottom_up_tree(arena, node, roots, depth);
            frame.set(1, second.to_usize());
            let tree = arena.allocate(node, roots);
            unsafe {
                tree.write_field(0, frame.get(0));
                tree.write_field(1, frame.get(1));
            }
            tree
        } else {
            let tree = arena.allocate(node, roots);
            unsafe {
                tree.write_field(0, 0);
                tree.write_field(1, 0);
            }
            tree
        }
    }
}
