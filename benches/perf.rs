use criterion::{Criterion, black_box, criterion_group, criterion_main};
use tablehub::{
    CallerContext, EngineConfig, ReadTableParams, RowValues, SortDirection, Table, TableEngine,
};
use tokio::runtime::Runtime;

const SEEDED_ROWS: i64 = 10_000;
const IMPORT_ROWS: usize = 10_000;

fn import_rows(count: usize) -> Vec<Vec<Option<String>>> {
    (0..count)
        .map(|i| {
            vec![
                Some(format!("item-{i}")),
                Some((i % 997).to_string()),
                Some("open".to_string()),
            ]
        })
        .collect()
}

fn headers() -> Vec<String> {
    vec!["name".into(), "qty".into(), "status".into()]
}

async fn setup_engine() -> (TableEngine, CallerContext, i64, Table) {
    let engine = TableEngine::in_memory(EngineConfig::default()).expect("engine");
    let user = CallerContext::new(
        engine
            .register_user("bench@example.com", "Bench")
            .expect("user")
            .id,
    );
    let database_id = engine.create_database(&user, "Bench").expect("database").id;
    let table = engine
        .import_table(
            &user,
            "Seeded",
            database_id,
            headers(),
            import_rows(SEEDED_ROWS as usize),
        )
        .await
        .expect("seed");
    (engine, user, database_id, table)
}

fn bench_table_hot_paths(c: &mut Criterion) {
    let rt = Runtime::new().expect("tokio runtime");
    let (engine, user, database_id, table) = rt.block_on(setup_engine());
    let qty = table.columns[1].id.clone();

    let mut next_row = 1_i64;
    c.bench_function("set_cell_value_rotating_rows", |b| {
        b.iter(|| {
            rt.block_on(async {
                let row_id = black_box(next_row);
                next_row = next_row % SEEDED_ROWS + 1;
                engine
                    .set_cell_value(&user, &table.id, row_id, &qty, Some(row_id.to_string()))
                    .await
                    .expect("set");
            });
        })
    });

    c.bench_function("add_row_three_values", |b| {
        b.iter(|| {
            rt.block_on(async {
                let values: RowValues = table
                    .columns
                    .iter()
                    .map(|c| (c.id.clone(), Some("1".to_string())))
                    .collect();
                engine
                    .add_row(&user, &table.id, black_box(values), None)
                    .await
                    .expect("add row");
            });
        })
    });

    c.bench_function("read_table_page_sorted_by_text", |b| {
        b.iter(|| {
            rt.block_on(async {
                let params = ReadTableParams::page(black_box(3), 100)
                    .sorted_by(qty.clone(), SortDirection::Desc);
                engine
                    .read_table(&user, &table.id, params)
                    .await
                    .expect("read");
            });
        })
    });

    let mut group = c.benchmark_group("import");
    group.sample_size(10);
    group.bench_function("import_10k_rows_3_columns", |b| {
        b.iter(|| {
            rt.block_on(async {
                engine
                    .import_table(
                        &user,
                        "Imported",
                        database_id,
                        headers(),
                        black_box(import_rows(IMPORT_ROWS)),
                    )
                    .await
                    .expect("import");
            });
        })
    });
    group.finish();
}

criterion_group!(benches, bench_table_hot_paths);
criterion_main!(benches);
