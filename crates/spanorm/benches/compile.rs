use criterion::{black_box, criterion_group, criterion_main, Criterion};
use spanorm::table;

fn bench_simple_select(c: &mut Criterion) {
    c.bench_function("compile_simple_select", |b| {
        b.iter(|| {
            table(black_box("Users"))
                .where_eq("id", 1)
                .to_sql()
        })
    });
}

fn bench_composed_select(c: &mut Criterion) {
    c.bench_function("compile_composed_select", |b| {
        b.iter(|| {
            table(black_box("Users"))
                .join("Orders", "Users.id", "=", "Orders.user_id")
                .where_("age", ">", 25)
                .unwrap()
                .where_in("status", ["active", "trial"])
                .or_where_nested(|q| Ok(q.where_eq("vip", true).where_null("deleted_at")))
                .unwrap()
                .group_by(&["team"])
                .having("team", ">", 1)
                .unwrap()
                .order_by_desc("created_at")
                .limit(50)
                .to_sql()
        })
    });
}

fn bench_flatten_bindings(c: &mut Criterion) {
    let query = table("Users")
        .where_in("region", ["eu", "us", "apac"])
        .where_("age", ">", 25)
        .unwrap()
        .where_between("score", 10, 90);
    c.bench_function("flatten_bindings", |b| {
        b.iter(|| black_box(&query).bindings())
    });
}

criterion_group!(
    benches,
    bench_simple_select,
    bench_composed_select,
    bench_flatten_bindings
);
criterion_main!(benches);
