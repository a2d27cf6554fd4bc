use criterion::{Criterion, black_box, criterion_group, criterion_main};
use serde_json::{Value, json};
use tabmorph::{Converter, StreamOptions, parse_mapping, stream_ndjson_to_csv};

const MAPPING: &str = r#"
columns:
  order_id: { path: id, cast: str }
  customer: { concat: [{ path: customer.first }, " ", { path: customer.last }] }
  sku: { rel_path: sku }
  qty: { rel_path: qty, cast: int, default: 0 }
  line_total: { math: [mul, { rel_path: qty }, { rel_path: price }] }
  order_total:
    reduce:
      over: { path: items }
      op: sum
      apply: { math: [mul, { rel_path: qty }, { rel_path: price }] }
  tags: { map: { over: { path: tags }, apply: { rel_path: name }, as: join, sep: "|" } }
explode:
  path: items
"#;

fn records(count: usize) -> Vec<Value> {
    (0..count)
        .map(|idx| {
            json!({
                "id": idx,
                "customer": {"first": "Ada", "last": format!("L{}", idx)},
                "tags": [{"name": "a"}, {"name": "b"}],
                "items": [
                    {"sku": "A-1", "qty": 2, "price": 3.5},
                    {"sku": "B-2", "qty": "1", "price": 10},
                    {"sku": "C-3", "qty": 4, "price": 0.25}
                ]
            })
        })
        .collect()
}

fn bench_convert(c: &mut Criterion) {
    let mapping = parse_mapping(MAPPING).expect("bench mapping");
    let converter = Converter::new(mapping).expect("bench converter");
    let batch = Value::Array(records(1_000));
    let ndjson: String = records(1_000)
        .iter()
        .map(|record| format!("{}\n", record))
        .collect();

    c.bench_function("convert_batch_1000", |b| {
        b.iter(|| converter.convert(black_box(&batch)).expect("convert"))
    });

    c.bench_function("stream_ndjson_1000", |b| {
        b.iter(|| {
            let mut out = Vec::new();
            stream_ndjson_to_csv(
                &converter,
                black_box(ndjson.as_bytes()),
                &mut out,
                StreamOptions {
                    batch_size: 250,
                    include_header: true,
                },
            )
            .expect("stream");
            out
        })
    });
}

criterion_group!(benches, bench_convert);
criterion_main!(benches);
