//! Benchmarks for the schema and binding pipeline.
//!
//! Benchmarks cover:
//! - SQL parsing (text → internal AST)
//! - Query binding against a schema graph
//! - Schema graph construction from raw catalog rows
//!
//! Run with: `cargo bench`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use schemabind::catalog::{RawCatalog, RawTable};
use schemabind::query::{parse_single, Binder};
use schemabind::schema::build_graph;
use schemabind::{Engine, PlaceholderStyle, QueryConfig, SchemaConfig, SchemaGraph};

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

const SIMPLE_SELECT: &str = "SELECT * FROM users";

const SELECT_WITH_WHERE: &str =
    "SELECT id, name, email FROM users WHERE age > ? AND status = ?";

const SELECT_WITH_JOIN: &str = "SELECT u.name, o.total, o.created_at \
    FROM users u \
    LEFT JOIN orders o ON u.id = o.user_id \
    WHERE o.total > ? \
    ORDER BY o.created_at DESC \
    LIMIT 50";

const STRIPPED: &str = "SELECT u.id, SUM(o.total)::numeric AS spent, COUNT(*)::bigint AS orders \
    FROM users u \
    JOIN orders o ON u.id = o.user_id \
    WHERE u.status = ? \
    GROUP BY u.id";

const CTE_QUERY: &str = "WITH active_users AS (\
        SELECT id, name, email FROM users WHERE status = 'active'\
    ) \
    SELECT u.name, o.total \
    FROM active_users a \
    JOIN users u ON u.id = a.id \
    JOIN orders o ON o.user_id = u.id \
    WHERE o.created_at BETWEEN ? AND ?";

const INSERT_QUERY: &str =
    "INSERT INTO orders (user_id, total, status) VALUES (?, ?, ?) RETURNING id, created_at";

const UPDATE_QUERY: &str = "UPDATE users SET status = ?, age = ? WHERE id = ? RETURNING *";

fn catalog(tables: usize) -> RawCatalog {
    let mut catalog = RawCatalog {
        schema: "public".into(),
        tables: vec![
            RawTable::new("users")
                .serial("id", "integer")
                .column("name", "text", false)
                .column("email", "text", false)
                .column("age", "integer", true)
                .column("status", "text", false)
                .primary_key(&["id"]),
            RawTable::new("orders")
                .serial("id", "integer")
                .column("user_id", "integer", false)
                .column("total", "numeric", false)
                .column("status", "text", false)
                .column("created_at", "timestamp with time zone", false)
                .primary_key(&["id"]),
        ],
        enums: Vec::new(),
    };
    for i in 0..tables {
        catalog.tables.push(
            RawTable::new(format!("table_{i}"))
                .serial("id", "integer")
                .column("user_id", "integer", false)
                .column("order_id", "integer", true)
                .column("label", "text", true)
                .primary_key(&["id"]),
        );
    }
    catalog
}

fn graph() -> SchemaGraph {
    build_graph(&catalog(0), &SchemaConfig::default())
        .expect("benchmark catalog is valid")
        .0
}

// ---------------------------------------------------------------------------
// Benchmark groups
// ---------------------------------------------------------------------------

const CASES: [(&str, &str); 7] = [
    ("simple_select", SIMPLE_SELECT),
    ("select_where", SELECT_WITH_WHERE),
    ("select_join", SELECT_WITH_JOIN),
    ("stripped", STRIPPED),
    ("cte", CTE_QUERY),
    ("insert", INSERT_QUERY),
    ("update", UPDATE_QUERY),
];

fn bench_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("parsing");

    for (name, sql) in &CASES {
        let sql = sql.replace('?', "NULL");
        group.bench_with_input(BenchmarkId::new("parse", name), &sql, |b, sql| {
            b.iter(|| parse_single(black_box(sql), Engine::Postgres).unwrap());
        });
    }

    group.finish();
}

fn bench_binding(c: &mut Criterion) {
    let mut group = c.benchmark_group("binding");
    let graph = graph();
    let binder = Binder::new(&graph, Engine::Postgres);

    for (name, sql) in &CASES {
        let query = QueryConfig {
            strip: true,
            placeholders: PlaceholderStyle::Question,
            ..QueryConfig::inline(*name, *sql)
        };
        group.bench_with_input(BenchmarkId::new("bind", name), sql, |b, sql| {
            b.iter(|| binder.bind(&query, black_box(sql)).unwrap());
        });
    }

    group.finish();
}

fn bench_graph(c: &mut Criterion) {
    let mut group = c.benchmark_group("schema_graph");

    for tables in [10usize, 100, 500] {
        let raw = catalog(tables);
        let config = SchemaConfig::default();
        group.bench_with_input(BenchmarkId::new("build", tables), &raw, |b, raw| {
            b.iter(|| build_graph(black_box(raw), &config).unwrap());
        });
    }

    group.finish();
}

criterion_group!(benches, bench_parsing, bench_binding, bench_graph);
criterion_main!(benches);
