use stashdb::catalog::types::{NonEmpty, OneOrMany, Record, Value};
use stashdb::query::plan::{Direction, Filter, Request, Response, Select};
use stashdb::{SchemaVersion, Stash, StashConfig, StashErrorCode};

fn rec(name: &str, n: i64) -> Record {
    Record::new().with("name", name).with("n", n)
}

async fn rows(stash: &Stash, select: Select) -> Vec<Record> {
    stash
        .request(select.into())
        .await
        .expect("select")
        .expect("response")
        .rows()
        .expect("rows")
        .to_vec()
}

#[tokio::test]
async fn insert_select_delete_merge_round() {
    let stash = Stash::open(StashConfig::default()).expect("open");

    let batch = OneOrMany::many(vec![rec("a", 1), rec("b", 2), rec("c", 3)]).expect("batch");
    let inserted = stash
        .request(Request::insert("data", batch))
        .await
        .expect("insert")
        .expect("response");
    assert_eq!(inserted.element_changed(), Some(3));

    let found = rows(&stash, Select::from_table("data").filter(Filter::eq("n", 2))).await;
    assert_eq!(found, vec![rec("b", 2)]);

    let deleted = stash
        .request(Request::delete("data", Value::from("a")))
        .await
        .expect("delete")
        .expect("response");
    assert_eq!(
        deleted,
        Response::Delete {
            table: "data".into()
        }
    );
    assert_eq!(rows(&stash, Select::from_table("data")).await.len(), 2);

    let merged = stash
        .request(Request::merge("data", "name", rec("b", 99)))
        .await
        .expect("merge")
        .expect("response");
    assert_eq!(merged.element_changed(), Some(1));

    let found = rows(&stash, Select::from_table("data").filter(Filter::eq("name", "b"))).await;
    assert_eq!(found, vec![rec("b", 99)]);
    stash.close().expect("close");
}

#[tokio::test]
async fn batch_insert_with_colliding_key_leaves_table_unchanged() {
    let stash = Stash::open(StashConfig::default()).expect("open");
    stash
        .request(Request::insert("data", rec("a", 1)))
        .await
        .expect("seed");

    let batch = OneOrMany::many(vec![rec("x", 5), rec("y", 6), rec("a", 7)]).expect("batch");
    let err = stash
        .request(Request::insert("data", batch))
        .await
        .expect_err("collision");
    assert_eq!(err.code(), StashErrorCode::DuplicateKey);

    let all = rows(&stash, Select::from_table("data")).await;
    assert_eq!(all, vec![rec("a", 1)]);
}

#[tokio::test]
async fn merge_is_idempotent() {
    let stash = Stash::open(StashConfig::default()).expect("open");
    for _ in 0..2 {
        let merged = stash
            .request(Request::merge("data", "name", rec("m", 4)))
            .await
            .expect("merge")
            .expect("response");
        assert_eq!(merged.element_changed(), Some(1));
    }
    let all = rows(&stash, Select::from_table("data")).await;
    assert_eq!(all, vec![rec("m", 4)]);
}

#[tokio::test]
async fn update_patches_only_existing_records() {
    let stash = Stash::open(StashConfig::default()).expect("open");
    stash
        .request(Request::insert(
            "data",
            OneOrMany::many(vec![rec("a", 1), rec("b", 2)]).expect("batch"),
        ))
        .await
        .expect("seed");

    let patch = OneOrMany::many(vec![
        Record::new().with("name", "a").with("tag", "hot"),
        Record::new().with("name", "ghost").with("tag", "cold"),
    ])
    .expect("batch");
    let updated = stash
        .request(Request::update("data", "name", patch))
        .await
        .expect("update")
        .expect("response");
    assert_eq!(updated.element_changed(), Some(1));

    let found = rows(&stash, Select::from_table("data").filter(Filter::eq("name", "a"))).await;
    assert_eq!(found, vec![rec("a", 1).with("tag", "hot")]);
    assert_eq!(rows(&stash, Select::from_table("data")).await.len(), 2);
}

#[tokio::test]
async fn filters_on_disjoint_columns_intersect_in_any_order() {
    let config = StashConfig::in_memory("intersect")
        .with_version(SchemaVersion::new(2).table("data", "name, n"));
    let stash = Stash::open(config).expect("open");
    let records: Vec<Record> = (0..30)
        .map(|i| {
            rec(&format!("r{i:02}"), i % 7).with("tag", if i % 2 == 0 { "even" } else { "odd" })
        })
        .collect();
    stash
        .request(Request::insert("data", OneOrMany::many(records).expect("batch")))
        .await
        .expect("seed");

    let eq = Filter::eq("tag", "even");
    let gt = Filter::gt("n", 2);
    let any = Filter::any_of(
        "name",
        NonEmpty::from_vec(vec![
            Value::from("r04"),
            Value::from("r05"),
            Value::from("r06"),
            Value::from("r12"),
            Value::from("r20"),
        ])
        .expect("values"),
    );

    let forward = rows(
        &stash,
        Select::from_table("data")
            .filter(eq.clone())
            .filter(gt.clone())
            .filter(any.clone()),
    )
    .await;
    let backward = rows(
        &stash,
        Select::from_table("data").filter(any).filter(gt).filter(eq),
    )
    .await;
    let names: Vec<String> = forward
        .iter()
        .filter_map(|r| r.get("name").map(ToString::to_string))
        .collect();
    assert_eq!(names, vec!["r04", "r06", "r12", "r20"]);
    assert_eq!(forward, backward);
}

#[tokio::test]
async fn ordered_pages_walk_the_table() {
    let stash = Stash::open(StashConfig::default()).expect("open");
    let records: Vec<Record> = (0..7).map(|i| rec(&format!("k{i}"), 10 - i)).collect();
    stash
        .request(Request::insert("data", OneOrMany::many(records).expect("batch")))
        .await
        .expect("seed");

    let mut seen = Vec::new();
    for page in 0..4 {
        let select = Select::from_table("data")
            .order_by("n", Direction::Asc)
            .paginate(page, 2);
        seen.extend(rows(&stash, select).await);
    }
    let ns: Vec<Value> = seen.iter().filter_map(|r| r.get("n").cloned()).collect();
    assert_eq!(ns, (4..=10).map(Value::from).collect::<Vec<_>>());
}

#[tokio::test]
async fn unknown_action_has_no_response() {
    let stash = Stash::open(StashConfig::default()).expect("open");
    let reply = stash.request(Request::Unknown).await.expect("routed");
    assert!(reply.is_none());
}
