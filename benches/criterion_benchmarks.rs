use criterion::{black_box, criterion_group, criterion_main, Criterion};
use keyed_children::config::ChildrenConfig;
use keyed_children::permutation::compute_permutation;
use keyed_children::{Gate, KeyedChildren, Node, NodeError};
use std::sync::Arc;

fn plain(key: &usize) -> Result<Vec<Node>, NodeError> {
    Ok(vec![Node::new(key.to_string())])
}

fn make_children(config: ChildrenConfig, size: usize) -> KeyedChildren<usize> {
    let children = KeyedChildren::init(config, plain, Arc::new(Gate::new()));
    children.set_keys((0..size).collect()).unwrap();
    children.get_nodes(false);
    children
}

pub fn criterion_benchmark(c: &mut Criterion) {
    const SIZE: usize = 1000;
    let mut group = c.benchmark_group("Children Operations");

    // Eager benchmarks
    {
        let children = make_children(ChildrenConfig::default(), SIZE);

        group.bench_function("Eager get_node_at", |b| {
            b.iter(|| {
                for i in 0..100 {
                    black_box(children.get_node_at(i % SIZE));
                }
            });
        });

        group.bench_function("Eager get_nodes", |b| {
            b.iter(|| black_box(children.get_nodes(false)));
        });

        group.bench_function("Eager find_child", |b| {
            b.iter(|| black_box(children.find_child(Some("500"))));
        });
    }

    // Lazy benchmarks
    {
        let children = make_children(ChildrenConfig::lazy(), SIZE);
        let held = children.get_nodes(false);

        group.bench_function("Lazy get_node_at cached", |b| {
            b.iter(|| {
                for i in 0..100 {
                    black_box(children.get_node_at(i % SIZE));
                }
            });
        });

        group.bench_function("Lazy get_nodes_count", |b| {
            b.iter(|| black_box(children.get_nodes_count(false)));
        });
        drop(held);
    }

    // Diff benchmarks
    for (name, config) in [("Eager", ChildrenConfig::default()), ("Lazy", ChildrenConfig::lazy())] {
        let children = make_children(config, SIZE);
        let forward: Vec<usize> = (0..SIZE).collect();
        let shifted: Vec<usize> = (SIZE / 10..SIZE + SIZE / 10).collect();

        group.bench_function(format!("{name} set_keys shift"), |b| {
            let mut flip = false;
            b.iter(|| {
                flip = !flip;
                let keys = if flip { shifted.clone() } else { forward.clone() };
                children.set_keys(black_box(keys)).unwrap();
            });
        });

        group.bench_function(format!("{name} set_keys unchanged"), |b| {
            b.iter(|| children.set_keys(black_box(forward.clone())).unwrap());
        });
    }

    // Permutation benchmarks
    {
        let old: Vec<usize> = (0..SIZE).collect();
        let reversed: Vec<usize> = (0..SIZE).rev().collect();

        group.bench_function("Permutation reverse", |b| {
            b.iter(|| black_box(compute_permutation(&old, &reversed).unwrap()));
        });

        group.bench_function("Permutation identity", |b| {
            b.iter(|| black_box(compute_permutation(&old, &old).unwrap()));
        });
    }

    group.finish();
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
