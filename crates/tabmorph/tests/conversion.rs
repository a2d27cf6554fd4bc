use serde_json::{Value, json};
use tabmorph::{Converter, Mapping, Row, get_path, parse_mapping};

fn converter(mapping: Value) -> Converter {
    let mapping: Mapping = serde_json::from_value(mapping).expect("mapping should deserialize");
    Converter::new(mapping).expect("mapping should compile")
}

fn single(rule: Value, record: Value) -> Value {
    let conv = converter(json!({"columns": {"v": rule}}));
    let rows = conv.rows_for_record(&record).expect("conversion failed");
    assert_eq!(rows.len(), 1);
    rows[0]["v"].clone()
}

fn row(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {}", other),
    }
}

#[test]
fn literal_rules_are_identity() {
    for literal in [
        json!(1),
        json!(2.5),
        json!("text"),
        json!(true),
        json!(null),
        json!([1, {"path": "not evaluated"}]),
    ] {
        assert_eq!(single(literal.clone(), json!({"x": 1})), literal);
    }
}

#[test]
fn coalesce_returns_first_non_null() {
    let cases = [
        (json!([null]), json!(null)),
        (json!([null, 0]), json!(0)),
        (json!([null, null, "a"]), json!("a")),
        (json!(["", null, "b", null]), json!("")),
        (json!([null, null, null, null, false]), json!(false)),
        (json!([{"path": "missing"}, {"path": "b"}, 3]), json!(2)),
    ];
    for (candidates, expected) in cases {
        let rule = json!({"coalesce": candidates});
        assert_eq!(single(rule, json!({"b": 2})), expected);
    }
}

#[test]
fn casts_follow_coercion_rules() {
    assert_eq!(single(json!({"const": "3.7", "cast": "int"}), json!({})), json!(3));
    assert_eq!(single(json!({"const": "-3.7", "cast": "int"}), json!({})), json!(-3));
    assert_eq!(single(json!({"const": "abc", "cast": "float"}), json!({})), json!(null));
    assert_eq!(single(json!({"const": 0, "cast": "bool"}), json!({})), json!(false));
    assert_eq!(single(json!({"const": "x", "cast": "bool"}), json!({})), json!(true));
    assert_eq!(single(json!({"const": 12, "cast": "str"}), json!({})), json!("12"));
    assert_eq!(single(json!({"path": "gone", "cast": "int"}), json!({})), json!(null));
}

#[test]
fn default_only_replaces_null() {
    let record = json!({"zero": 0, "empty": "", "no": false});
    assert_eq!(single(json!({"path": "zero", "default": 5}), record.clone()), json!(0));
    assert_eq!(single(json!({"path": "empty", "default": "d"}), record.clone()), json!(""));
    assert_eq!(single(json!({"path": "no", "default": true}), record.clone()), json!(false));
    assert_eq!(single(json!({"path": "gone", "default": 5}), record), json!(5));
}

#[test]
fn default_applies_before_cast() {
    let rule = json!({"path": "gone", "default": "42", "cast": "int"});
    assert_eq!(single(rule, json!({})), json!(42));
}

#[test]
fn path_resolution_examples() {
    let root = json!({"items": [{"price": 1}, {"price": 2}]});
    assert_eq!(get_path(&root, "items[*].price").unwrap(), json!([1, 2]));
    assert_eq!(get_path(&root, "items[?price>1][0].price").unwrap(), json!(2));
    assert_eq!(get_path(&root, "missing.field").unwrap(), json!(null));
    assert!(get_path(&root, "items[").is_err());
}

#[test]
fn explode_with_empty_list() {
    let mapping = |emit: bool| {
        json!({
            "columns": {"sku": {"rel_path": "sku"}, "order": {"path": "id"}},
            "explode": {"path": "items", "emit_root_when_empty": emit}
        })
    };
    let record = json!({"id": "o-1", "items": []});

    let rows = converter(mapping(true)).rows_for_record(&record).unwrap();
    assert_eq!(rows, vec![row(json!({"sku": null, "order": "o-1"}))]);

    let rows = converter(mapping(false)).rows_for_record(&record).unwrap();
    assert!(rows.is_empty());
}

#[test]
fn explode_join_kinds() {
    let mapping = |how: &str| {
        json!({
            "columns": {"l": {"rel_path": "left"}, "r": {"rel_path": "right"}},
            "explode_join": {"left": "ls", "right": "rs", "how": how}
        })
    };
    let record = json!({"ls": [1, 2], "rs": []});

    let rows = converter(mapping("left")).rows_for_record(&record).unwrap();
    assert_eq!(
        rows,
        vec![
            row(json!({"l": 1, "r": null})),
            row(json!({"l": 2, "r": null})),
        ]
    );
    assert!(converter(mapping("inner")).rows_for_record(&record).unwrap().is_empty());
    assert!(converter(mapping("right")).rows_for_record(&record).unwrap().is_empty());

    let both_empty = json!({"ls": [], "rs": "not a list"});
    let rows = converter(mapping("outer")).rows_for_record(&both_empty).unwrap();
    assert_eq!(rows, vec![row(json!({"l": null, "r": null}))]);

    let full = json!({"ls": [1, 2], "rs": ["a", "b"]});
    let rows = converter(mapping("inner")).rows_for_record(&full).unwrap();
    let pairs: Vec<(Value, Value)> = rows
        .iter()
        .map(|row| (row["l"].clone(), row["r"].clone()))
        .collect();
    assert_eq!(
        pairs,
        vec![
            (json!(1), json!("a")),
            (json!(1), json!("b")),
            (json!(2), json!("a")),
            (json!(2), json!("b")),
        ]
    );
}

#[test]
fn reduce_mean_and_empty() {
    let rule = json!({"reduce": {"over": {"path": "xs"}, "op": "mean"}});
    assert_eq!(single(rule.clone(), json!({"xs": [1, 2, 3]})), json!(2.0));
    assert_eq!(single(rule, json!({"xs": []})), json!(null));
}

#[test]
fn reduce_skips_non_numeric_and_projects() {
    let rule = json!({"reduce": {"over": {"path": "xs"}, "op": "sum", "apply": {"rel_path": "n"}}});
    let record = json!({"xs": [{"n": 1}, {"n": "2.5"}, {"n": "x"}, {}]});
    assert_eq!(single(rule, record), json!(3.5));
}

#[test]
fn division_by_zero_is_null() {
    assert_eq!(single(json!({"math": ["div", 10, 0]}), json!({})), json!(null));
    assert_eq!(single(json!({"math": ["div", 10, 4]}), json!({})), json!(2.5));
    assert_eq!(single(json!({"math": ["sub", 10, 1, 2]}), json!({})), json!(7.0));
    assert_eq!(single(json!({"math": ["add", 1, "x"]}), json!({})), json!(null));
}

#[test]
fn concat_full_name() {
    let conv = converter(json!({
        "columns": {
            "full_name": {"concat": [{"path": "user.first"}, " ", {"path": "user.last"}]}
        }
    }));
    let conversion = conv
        .convert(&json!({"user": {"first": "Ada", "last": "Lovelace"}}))
        .unwrap();
    assert_eq!(conversion.table.columns, vec!["full_name"]);
    assert_eq!(conversion.table.rows, vec![vec![json!("Ada Lovelace")]]);
    assert!(conversion.schema_report.is_none());
}

#[test]
fn json_round_trip_evaluates_identically() {
    let yaml = r#"
columns:
  id: { path: id, cast: str }
  total:
    reduce:
      over: { path: "lines[*].amount" }
      op: sum
  first_tag: { index: { of: { path: tags }, at: 0 }, default: none }
  kind:
    if:
      cond: { op: gt, a: { len: { path: tags } }, b: 1 }
      then: multi
      else: single
definitions:
  unused: { const: 1 }
"#;
    let mapping = parse_mapping(yaml).expect("yaml mapping");
    let text = serde_json::to_string(&mapping).unwrap();
    let reparsed: Mapping = serde_json::from_str(&text).unwrap();
    assert_eq!(reparsed, mapping);

    let record = json!({"id": 7, "lines": [{"amount": 2}, {"amount": 3.5}], "tags": ["a", "b"]});
    let first = Converter::new(mapping).unwrap().convert(&record).unwrap();
    let second = Converter::new(reparsed).unwrap().convert(&record).unwrap();
    assert_eq!(first, second);
    assert_eq!(
        first.table.to_records(),
        vec![row(json!({"id": "7", "total": 5.5, "first_tag": "a", "kind": "multi"}))]
    );
}

#[test]
fn columns_keep_declared_order() {
    let conv = converter(json!({"columns": {"z": 1, "a": 2, "m": 3}}));
    let table = conv.convert(&json!([{}, {}])).unwrap().table;
    assert_eq!(table.columns, vec!["z", "a", "m"]);
    assert_eq!(table.len(), 2);
}

#[test]
fn batch_preserves_record_order_across_explodes() {
    let conv = converter(json!({
        "columns": {"order": {"path": "id"}, "sku": {"rel_path": "sku"}},
        "explode": {"path": "items"}
    }));
    let batch = json!([
        {"id": 1, "items": [{"sku": "a"}, {"sku": "b"}]},
        {"id": 2, "items": []},
        {"id": 3, "items": [{"sku": "c"}]}
    ]);
    let table = conv.convert(&batch).unwrap().table;
    assert_eq!(
        table.rows,
        vec![
            vec![json!(1), json!("a")],
            vec![json!(1), json!("b")],
            vec![json!(2), json!(null)],
            vec![json!(3), json!("c")],
        ]
    );
}

#[test]
fn refs_share_definitions() {
    let conv = converter(json!({
        "columns": {
            "gross": {"ref": "gross"},
            "label": {"concat": ["total=", {"ref": "gross"}]},
            "unknown": {"ref": "nope"}
        },
        "definitions": {
            "gross": {"math": ["mul", {"path": "net"}, 1.5]}
        }
    }));
    let rows = conv.rows_for_record(&json!({"net": 10})).unwrap();
    assert_eq!(rows[0]["gross"], json!(15.0));
    assert_eq!(rows[0]["label"], json!("total=15.0"));
    assert_eq!(rows[0]["unknown"], json!(null));
}

#[test]
fn cyclic_refs_fail_softly() {
    let conv = converter(json!({
        "columns": {"loop": {"ref": "a", "default": "stuck"}},
        "definitions": {"a": {"ref": "b"}, "b": {"ref": "a"}}
    }));
    let rows = conv.rows_for_record(&json!({})).unwrap();
    assert_eq!(rows[0]["loop"], json!("stuck"));
}
