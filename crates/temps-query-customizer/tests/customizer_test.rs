//! End-to-end tests over the full decorator stack, on in-memory collections
//! declaring as few native capabilities as possible.

use serde_json::{json, Value};
use std::sync::Arc;
use temps_query::{
    ActionResult, ActionScope, AggregateResult, Aggregation, AggregationGroup, Caller,
    CollectionRef, CollectionSchema, ColumnSchema, ColumnType, ConditionTree, ConditionTreeLeaf,
    Datasource, Filter, Operator, PaginatedFilter, Projection, RecordData, Sort, SortClause,
};
use temps_query_customizer::{
    ActionDefinition, ComputedDefinition, CustomizerOptions, DatasourceCustomizer,
};
use temps_query_memory::{Call, MemoryCollection};

struct Fixture {
    users: Arc<MemoryCollection>,
    teams: Arc<MemoryCollection>,
    datasource: Datasource,
}

fn fixture() -> Fixture {
    let users = Arc::new(
        MemoryCollection::new(
            "users",
            CollectionSchema::new()
                .with_field(
                    "id",
                    ColumnSchema::new(ColumnType::Number)
                        .primary_key()
                        .sortable()
                        .with_operators([Operator::Equal, Operator::In]),
                )
                .with_field("first", ColumnSchema::new(ColumnType::String))
                .with_field("last", ColumnSchema::new(ColumnType::String))
                .with_field(
                    "age",
                    ColumnSchema::new(ColumnType::Number).with_operators([Operator::Equal]),
                )
                .with_field(
                    "status",
                    ColumnSchema::new(ColumnType::String).with_operators([Operator::Equal]),
                )
                .with_field(
                    "teamId",
                    ColumnSchema::new(ColumnType::Number).with_operators([Operator::In]),
                )
                .with_field("email", ColumnSchema::new(ColumnType::String))
                .with_field("password", ColumnSchema::new(ColumnType::String)),
        )
        .with_unique(&["email"])
        .with_records(vec![
            json!({
                "id": 1, "first": "Ada", "last": "Lovelace", "age": 17, "status": "a", "teamId": 1,
                "email": "ada@example.com", "password": "x"
            }),
            json!({
                "id": 2, "first": "Alan", "last": "Turing", "age": 18, "status": "a", "teamId": 1,
                "email": "alan@example.com", "password": "x"
            }),
            json!({
                "id": 3, "first": "Grace", "last": "Hopper", "age": 19, "status": "b", "teamId": 2,
                "email": "grace@example.com", "password": "x"
            }),
        ]),
    );
    let teams = Arc::new(
        MemoryCollection::new(
            "teams",
            CollectionSchema::new()
                .with_field(
                    "id",
                    ColumnSchema::new(ColumnType::Number)
                        .primary_key()
                        .with_operators([Operator::Equal, Operator::In]),
                )
                .with_field(
                    "name",
                    ColumnSchema::new(ColumnType::String).with_operators([Operator::Equal]),
                ),
        )
        .with_records(vec![
            json!({"id": 1, "name": "core"}),
            json!({"id": 2, "name": "infra"}),
            json!({"id": 3, "name": "empty"}),
        ]),
    );
    let audits = Arc::new(MemoryCollection::new(
        "audits",
        CollectionSchema::new().with_field(
            "id",
            ColumnSchema::new(ColumnType::Number)
                .primary_key()
                .with_operators([Operator::In]),
        ),
    ));

    let datasource = Datasource::new(vec![
        users.clone() as CollectionRef,
        teams.clone() as CollectionRef,
        audits as CollectionRef,
    ])
    .unwrap();

    Fixture {
        users,
        teams,
        datasource,
    }
}

fn full_name() -> ComputedDefinition {
    ComputedDefinition::new(ColumnType::String, &["first", "last"], |records, _| async move {
        Ok(records
            .iter()
            .map(|record| {
                json!(format!(
                    "{} {}",
                    record["first"].as_str().unwrap_or_default(),
                    record["last"].as_str().unwrap_or_default()
                ))
            })
            .collect())
    })
}

fn team_label() -> ComputedDefinition {
    ComputedDefinition::new(ColumnType::String, &["team:name"], |records, _| async move {
        Ok(records
            .iter()
            .map(|record| match record.get("team").and_then(|team| team.get("name")) {
                Some(Value::String(name)) => json!(name.to_uppercase()),
                _ => Value::Null,
            })
            .collect())
    })
}

fn split_name(value: &Value, _: &RecordData) -> temps_query::Result<RecordData> {
    let name = value.as_str().unwrap_or_default();
    let (first, last) = name.split_once(' ').unwrap_or((name, ""));
    Ok(json!({"first": first, "last": last})
        .as_object()
        .cloned()
        .unwrap_or_default())
}

fn customizer(datasource: Datasource) -> DatasourceCustomizer {
    let mut customizer = DatasourceCustomizer::new(datasource);
    customizer
        .customize_collection("users")
        .add_field("fullName", full_name())
        .add_many_to_one_relation("team", "teams", "teamId", "id")
        .add_field("teamLabel", team_label())
        .add_segment(
            "adults",
            ConditionTree::from(ConditionTreeLeaf::new("age", Operator::GreaterThan, json!(18))),
        )
        .replace_field_writing("fullName", split_name)
        .add_field_validation("age", Operator::GreaterThanOrEqual, json!(0))
        .add_action(
            "promote",
            ActionDefinition::new(ActionScope::Single, |context| async move {
                let record = context.record(&Projection::new(["fullName"])).await?;
                Ok(ActionResult::success(format!(
                    "Promoted {}",
                    record["fullName"].as_str().unwrap_or_default()
                )))
            }),
        )
        .remove_field("password");
    customizer
        .customize_collection("teams")
        .add_one_to_many_relation("members", "users", "teamId", "id");
    customizer.remove_collection("audits");
    customizer
}

fn where_leaf(field: &str, operator: Operator, value: Value) -> Filter {
    Filter::new().with_condition_tree(Some(ConditionTreeLeaf::new(field, operator, value).into()))
}

fn record(value: Value) -> RecordData {
    value.as_object().cloned().unwrap()
}

async fn ids(datasource: &Datasource, collection: &str, filter: PaginatedFilter) -> Vec<Value> {
    datasource
        .collection(collection)
        .unwrap()
        .list(&Caller::system(), &filter, &Projection::new(["id"]))
        .await
        .unwrap()
        .into_iter()
        .map(|record| record["id"].clone())
        .collect()
}

#[tokio::test]
async fn test_unsupported_operator_is_emulated() {
    let fixture = fixture();
    let datasource = customizer(fixture.datasource).build().unwrap();

    let filter = PaginatedFilter::new(where_leaf("age", Operator::GreaterThan, json!(18)));
    assert_eq!(ids(&datasource, "users", filter).await, vec![json!(3)]);

    let users = datasource.collection("users").unwrap();
    let age = users.schema().column("age").unwrap();
    assert!(age.filter_operators.contains(&Operator::GreaterThan));
    assert!(age.is_sortable);
}

#[tokio::test]
async fn test_count_grouped_by_status() {
    let fixture = fixture();
    let datasource = customizer(fixture.datasource).build().unwrap();

    let results = datasource
        .collection("users")
        .unwrap()
        .aggregate(
            &Caller::system(),
            &Filter::new(),
            &Aggregation::count().with_group(AggregationGroup::new("status")),
            None,
        )
        .await
        .unwrap();

    assert_eq!(
        results,
        vec![
            AggregateResult {
                value: json!(2),
                group: record(json!({"status": "a"})),
            },
            AggregateResult {
                value: json!(1),
                group: record(json!({"status": "b"})),
            },
        ]
    );
}

#[tokio::test]
async fn test_computed_field_and_emulated_sort() {
    let fixture = fixture();
    let datasource = customizer(fixture.datasource).build().unwrap();
    let users = datasource.collection("users").unwrap();

    let filter =
        PaginatedFilter::default().with_sort(Sort::new(vec![SortClause::descending("fullName")]));
    let records = users
        .list(&Caller::system(), &filter, &Projection::new(["id", "fullName"]))
        .await
        .unwrap();

    let names: Vec<&str> = records
        .iter()
        .map(|record| record["fullName"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["Grace Hopper", "Alan Turing", "Ada Lovelace"]);

    // sorting never reaches the backend
    let calls = fixture.users.calls();
    let Call::List { filter, projection } = &calls[0] else {
        panic!("expected a list call");
    };
    assert!(filter.sort.is_empty());
    assert!(projection.contains("first") && projection.contains("last"));
}

#[tokio::test]
async fn test_computed_field_through_relation() {
    let fixture = fixture();
    let datasource = customizer(fixture.datasource).build().unwrap();

    let records = datasource
        .collection("users")
        .unwrap()
        .list(
            &Caller::system(),
            &PaginatedFilter::new(where_leaf("teamLabel", Operator::Equal, json!("INFRA"))),
            &Projection::new(["id", "team:name", "teamLabel"]),
        )
        .await
        .unwrap();

    assert_eq!(
        records,
        vec![record(json!({"id": 3, "team": {"name": "infra"}, "teamLabel": "INFRA"}))]
    );
}

#[tokio::test]
async fn test_one_to_many_uses_one_batched_fetch() {
    let fixture = fixture();
    let datasource = customizer(fixture.datasource).build().unwrap();

    let records = datasource
        .collection("teams")
        .unwrap()
        .list(
            &Caller::system(),
            &PaginatedFilter::default(),
            &Projection::new(["name", "members:first"]),
        )
        .await
        .unwrap();

    assert_eq!(records[0]["members"], json!([{"first": "Ada"}, {"first": "Alan"}]));
    assert_eq!(records[1]["members"], json!([{"first": "Grace"}]));
    assert_eq!(records[2]["members"], json!([]));
    assert_eq!(fixture.users.list_count(), 1);
    assert_eq!(fixture.teams.list_count(), 1);
}

#[tokio::test]
async fn test_filter_through_relation() {
    let fixture = fixture();
    let datasource = customizer(fixture.datasource).build().unwrap();

    let filter = PaginatedFilter::new(where_leaf("team:name", Operator::Equal, json!("core")));
    assert_eq!(ids(&datasource, "users", filter).await, vec![json!(1), json!(2)]);
}

#[tokio::test]
async fn test_search_and_segment() {
    let fixture = fixture();
    let datasource = customizer(fixture.datasource).build().unwrap();

    let search = PaginatedFilter::new(Filter::new().with_search(Some("hopper".to_string())));
    assert_eq!(ids(&datasource, "users", search).await, vec![json!(3)]);

    let adults = PaginatedFilter::new(Filter::new().with_segment(Some("adults".to_string())));
    assert_eq!(ids(&datasource, "users", adults).await, vec![json!(3)]);

    let unknown = PaginatedFilter::new(Filter::new().with_segment(Some("minors".to_string())));
    let error = datasource
        .collection("users")
        .unwrap()
        .list(&Caller::system(), &unknown, &Projection::new(["id"]))
        .await
        .unwrap_err();
    assert!(error.is_not_found());
}

#[tokio::test]
async fn test_hidden_fields_and_collections() {
    let fixture = fixture();
    let datasource = customizer(fixture.datasource).build().unwrap();

    assert!(datasource.collection("audits").unwrap_err().is_not_found());

    let users = datasource.collection("users").unwrap();
    assert!(users.schema().field("password").is_none());
    let error = users
        .list(
            &Caller::system(),
            &PaginatedFilter::default(),
            &Projection::new(["password"]),
        )
        .await
        .unwrap_err();
    assert!(error.is_validation());
}

#[tokio::test]
async fn test_write_handler_and_validation() {
    let fixture = fixture();
    let datasource = customizer(fixture.datasource).build().unwrap();
    let users = datasource.collection("users").unwrap();
    let caller = Caller::system();
    let first = where_leaf("id", Operator::Equal, json!(1));

    users
        .update(&caller, &first, &record(json!({"fullName": "Ada King"})))
        .await
        .unwrap();
    let records = users
        .list(&caller, &PaginatedFilter::new(first.clone()), &Projection::new(["fullName"]))
        .await
        .unwrap();
    assert_eq!(records[0]["fullName"], json!("Ada King"));

    let negative = users
        .update(&caller, &first, &record(json!({"age": -1})))
        .await
        .unwrap_err();
    assert!(negative.is_validation());

    // unique email reported by the backend
    let duplicate = users
        .create(
            &caller,
            vec![record(json!({
                "first": "Ada", "last": "Byron", "age": 20, "email": "ada@example.com"
            }))],
        )
        .await
        .unwrap_err();
    assert!(duplicate.is_validation());

    let created = users
        .create(
            &caller,
            vec![record(json!({
                "first": "Linus", "last": "T", "age": 30, "email": "linus@example.com"
            }))],
        )
        .await
        .unwrap();
    assert_eq!(created[0]["id"], json!(4));
    assert!(!created[0].contains_key("password"));
}

#[tokio::test]
async fn test_action() {
    let fixture = fixture();
    let datasource = customizer(fixture.datasource).build().unwrap();
    let users = datasource.collection("users").unwrap();

    assert!(users.schema().actions.contains_key("promote"));
    let result = users
        .execute(
            &Caller::system(),
            "promote",
            &RecordData::new(),
            &where_leaf("id", Operator::Equal, json!(3)),
        )
        .await
        .unwrap();
    assert_eq!(result, ActionResult::success("Promoted Grace Hopper"));
}

#[tokio::test]
async fn test_rename_keeps_results() {
    let before = {
        let fixture = fixture();
        let datasource = customizer(fixture.datasource).build().unwrap();
        let filter = PaginatedFilter::new(where_leaf("age", Operator::GreaterThan, json!(17)));
        ids(&datasource, "users", filter).await
    };

    let fixture = fixture();
    let mut renamed = customizer(fixture.datasource);
    renamed.customize_collection("users").rename_field("age", "years");
    renamed.rename_collection("teams", "squads");
    let datasource = renamed.build().unwrap();

    let filter = PaginatedFilter::new(where_leaf("years", Operator::GreaterThan, json!(17)));
    assert_eq!(ids(&datasource, "users", filter).await, before);

    let users = datasource.collection("users").unwrap();
    assert_eq!(users.schema().relation("team").unwrap().foreign_collection(), "squads");
    assert!(datasource.collection("squads").is_ok());
    assert!(datasource.collection("teams").is_err());

    let members = datasource
        .collection("squads")
        .unwrap()
        .list(
            &Caller::system(),
            &PaginatedFilter::new(where_leaf("id", Operator::Equal, json!(2))),
            &Projection::new(["id", "members:years"]),
        )
        .await
        .unwrap();
    assert_eq!(members[0]["members"], json!([{"years": 19}]));
}

#[test]
fn test_options_are_validated() {
    let options = CustomizerOptions {
        max_relation_depth: 0,
        ..Default::default()
    };
    let result = customizer(fixture().datasource).with_options(options).build();
    assert!(result.unwrap_err().is_validation());
}
