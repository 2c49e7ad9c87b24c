//! Builds a few queries and prints the compiled SQL with its bindings.
//!
//! Run with `cargo run --example builder`.

use spanorm::prelude::*;
use spanorm::table;

fn dump(label: &str, sql: &str, bindings: &Parameters) {
    println!("-- {label}");
    println!("{sql}");
    for (name, value) in bindings {
        println!("  @{name} = {value}");
    }
    println!();
}

fn main() -> OrmResult<()> {
    let query = table("Users")
        .where_("age", ">", 25)?
        .where_in("status", ["active", "trial"])
        .order_by_desc("created_at")
        .limit(10);
    dump("filtered select", &query.to_sql(), &query.bindings());

    let query = table("Users")
        .join("Orders", "Users.id", "=", "Orders.user_id")
        .where_nested(|q| Ok(q.where_eq("vip", true).or_where_eq("score", 100)))?
        .group_by(&["team"])
        .having("team", ">", 1)?;
    dump("joined select", &query.to_sql(), &query.bindings());

    let query = table("Users").where_in_with("id", |q| {
        q.from("Orders")
            .select(&["Orders.user_id"])
            .where_("Orders.total", ">", 500)
    })?;
    dump("subquery membership", &query.to_sql(), &query.bindings());

    let query = table("Users")
        .join("Orders", "Users.id", "=", "Orders.user_id")
        .where_eq("Orders.cancelled", true);
    dump(
        "delete with join",
        &query.grammar().compile_delete(&query),
        &query.bindings(),
    );

    Ok(())
}
