use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ledger_archive::{encode, Archive, ArchiveConfig, IndexType, TransactionRange, Value};
use rand::Rng;
use tempfile::TempDir;

fn random_block(rng: &mut impl Rng, i: u64) -> Value {
    Value::map([
        ("btype", Value::text("1xfer")),
        ("ts", Value::nat(rng.gen::<u64>())),
        (
            "tx",
            Value::map([
                ("amt", Value::nat(rng.gen_range(1..1_000_000u64))),
                ("from", Value::blob(rng.gen::<[u8; 29]>())),
                ("to", Value::blob(rng.gen::<[u8; 29]>())),
                ("tid", Value::nat(i)),
            ]),
        ),
    ])
}

fn bench_append_batches(c: &mut Criterion) {
    let mut group = c.benchmark_group("append_batch");
    let mut rng = rand::thread_rng();

    for kind in [IndexType::Stable, IndexType::StableTyped, IndexType::Managed] {
        for batch_size in [1u64, 100] {
            let batch: Vec<Value> = (0..batch_size).map(|i| random_block(&mut rng, i)).collect();
            group.throughput(Throughput::Elements(batch_size));
            group.bench_with_input(
                BenchmarkId::new(format!("{:?}", kind), batch_size),
                &batch,
                |b, batch| {
                    let dir = TempDir::new().unwrap();
                    let config =
                        ArchiveConfig::new(kind, u32::MAX as u64, u64::MAX / 2, 0, "o", "l");
                    let mut archive = Archive::create(dir.path(), &config).unwrap();
                    b.iter(|| archive.append_transactions("o", batch.clone()));
                },
            );
        }
    }
    group.finish();
}

fn bench_reads(c: &mut Criterion) {
    let mut group = c.benchmark_group("read");
    let mut rng = rand::thread_rng();

    let dir = TempDir::new().unwrap();
    let config = ArchiveConfig::new(IndexType::Stable, 4096, 100_000, 0, "o", "l");
    let mut archive = Archive::create(dir.path(), &config).unwrap();
    let blocks: Vec<Value> = (0..10_000).map(|i| random_block(&mut rng, i)).collect();
    archive.append_transactions("o", blocks);

    group.bench_function("get_transaction", |b| {
        b.iter(|| archive.get_transaction(rng.gen_range(0..10_000)).unwrap())
    });
    group.bench_function("icrc3_get_blocks_100", |b| {
        b.iter(|| {
            let start = rng.gen_range(0..9_900);
            archive
                .icrc3_get_blocks(&[TransactionRange::new(start, 100)])
                .unwrap()
        })
    });
    group.finish();
}

fn bench_encode(c: &mut Criterion) {
    let mut rng = rand::thread_rng();
    let block = random_block(&mut rng, 1);
    c.bench_function("encode_block", |b| b.iter(|| encode(&block).unwrap()));
}

criterion_group!(benches, bench_append_batches, bench_reads, bench_encode);
criterion_main!(benches);
