use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use storage::{BTree, Field, FieldKind, Record, RecordReader, RecordWriter, Result, Schema};
use tempfile::tempdir;

struct Row {
    id: i64,
    payload: String,
}

impl Record for Row {
    fn schema() -> Schema {
        Schema::new(vec![
            Field::new("id", FieldKind::I64),
            Field::string_with_max("payload", 64),
        ])
    }

    fn key(&self) -> i64 {
        self.id
    }

    fn encode(&self, w: &mut RecordWriter<'_>) -> Result<()> {
        w.put_i64(self.id)?;
        w.put_str(&self.payload)
    }

    fn decode(r: &mut RecordReader<'_>) -> Result<Self> {
        Ok(Self {
            id: r.get_i64()?,
            payload: r.get_str()?,
        })
    }
}

fn row(id: i64) -> Row {
    Row {
        id,
        payload: format!("row {}", id),
    }
}

fn bench_put(c: &mut Criterion) {
    let mut group = c.benchmark_group("put");
    group.sample_size(10);

    for degree in [3, 16] {
        group.bench_function(format!("ascending_500_degree_{}", degree), |b| {
            b.iter_batched(
                || tempdir().unwrap(),
                |dir| {
                    let tree = BTree::<Row>::open(dir.path().join("bench.bin"), degree).unwrap();
                    for id in 0..500 {
                        tree.put(row(id)).unwrap();
                    }
                    dir
                },
                BatchSize::PerIteration,
            );
        });
    }

    group.finish();
}

fn bench_get(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let tree = BTree::<Row>::open(dir.path().join("bench.bin"), 8).unwrap();
    for id in 0..2_000 {
        tree.put(row(id)).unwrap();
    }

    c.bench_function("get_hit", |b| {
        let mut id = 0;
        b.iter(|| {
            id = (id + 7) % 2_000;
            black_box(tree.get(black_box(id)).unwrap())
        });
    });

    c.bench_function("get_miss", |b| {
        b.iter(|| black_box(tree.contains(black_box(5_000)).unwrap()));
    });
}

criterion_group!(benches, bench_put, bench_get);
criterion_main!(benches);
