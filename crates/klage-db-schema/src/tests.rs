use super::*;
use proptest::prelude::*;

fn cases_table() -> TableSchema {
    TableSchema::new("klage_cases")
        .column(ColumnSpec::new("id", SqlType::BigSerial).not_null())
        .column(ColumnSpec::new("case_id", SqlType::Varchar(100)).not_null().default_text(""))
        .column(ColumnSpec::new("case_status", SqlType::Varchar(20)).default_text("draft"))
        .column(ColumnSpec::new("created_at", SqlType::Timestamp).default_expr("CURRENT_TIMESTAMP"))
        .primary_key(&["id"])
        .unique(&["case_id"])
        .index(&["case_status"])
}

#[test]
fn test_identifier_rule() {
    assert!(is_valid_identifier("datenquelle"));
    assert!(is_valid_identifier("_hidden"));
    assert!(is_valid_identifier("zeitraum_von2"));
    assert!(!is_valid_identifier(""));
    assert!(!is_valid_identifier("2fa"));
    assert!(!is_valid_identifier("CaseId"));
    assert!(!is_valid_identifier("bonität"));
    assert!(!is_valid_identifier("case-id"));
    assert!(!is_valid_identifier(&"a".repeat(MAX_IDENTIFIER_LEN + 1)));
}

#[test]
fn test_system_columns_follow_name() {
    assert!(ColumnSpec::new("id", SqlType::BigSerial).is_system);
    assert!(ColumnSpec::new("Created_At", SqlType::Timestamp).is_system);
    assert!(!ColumnSpec::new("case_id", SqlType::Text).is_system);
    assert!(ColumnSpec::new("legacy_key", SqlType::Text).system().is_system);
}

#[test]
fn test_builder_names_indexes() {
    let table = cases_table();
    let names: Vec<_> = table.indexes.iter().map(|i| i.name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "klage_cases_pkey",
            "uq_klage_cases_case_id",
            "idx_klage_cases_case_status"
        ]
    );
    assert_eq!(table.primary_index().map(|i| i.kind), Some(IndexKind::Primary));
}

#[test]
fn test_editable_columns_skip_system() {
    let table = cases_table();
    let editable: Vec<_> = table.editable_columns().map(|c| c.name.as_str()).collect();
    assert_eq!(editable, vec!["case_id", "case_status"]);
}

#[test]
fn test_column_definition_sql() {
    let col =
        ColumnSpec::new("rechtsgrundlage", SqlType::Varchar(100)).default_text("DSGVO Art. 82");
    assert_eq!(
        col.to_definition_sql(),
        "\"rechtsgrundlage\" VARCHAR(100) DEFAULT 'DSGVO Art. 82'"
    );

    let col = ColumnSpec::new("case_id", SqlType::Varchar(100)).not_null();
    assert_eq!(col.to_definition_sql(), "\"case_id\" VARCHAR(100) NOT NULL");

    let col = ColumnSpec::new("total", SqlType::Numeric { precision: 10, scale: 2 })
        .default_number("548.11");
    assert_eq!(col.to_definition_sql(), "\"total\" NUMERIC(10,2) DEFAULT 548.11");

    let col = ColumnSpec::new("mahnung_datum", SqlType::Date).default_null();
    assert_eq!(col.to_definition_sql(), "\"mahnung_datum\" DATE DEFAULT NULL");
}

#[test]
fn test_sql_type_parse() {
    assert_eq!("varchar(100)".parse::<SqlType>(), Ok(SqlType::Varchar(100)));
    assert_eq!("VARCHAR ( 20 )".parse::<SqlType>(), Ok(SqlType::Varchar(20)));
    assert_eq!(
        "decimal(10,2)".parse::<SqlType>(),
        Ok(SqlType::Numeric {
            precision: 10,
            scale: 2
        })
    );
    assert_eq!("bigint(20) unsigned".parse::<SqlType>(), Ok(SqlType::BigInt));
    assert_eq!("tinyint(1)".parse::<SqlType>(), Ok(SqlType::SmallInt));
    assert_eq!("int(5)".parse::<SqlType>(), Ok(SqlType::Integer));
    assert_eq!("datetime".parse::<SqlType>(), Ok(SqlType::Timestamp));
    assert_eq!("text".parse::<SqlType>(), Ok(SqlType::Text));
    assert_eq!("timestamptz".parse::<SqlType>(), Ok(SqlType::Timestamptz));
}

#[test]
fn test_sql_type_parse_invalid() {
    assert!("".parse::<SqlType>().is_err());
    assert!("varchar(".parse::<SqlType>().is_err());
    assert!("varchar(abc)".parse::<SqlType>().is_err());
    assert!("numeric(2,5)".parse::<SqlType>().is_err());
    assert!("geometry".parse::<SqlType>().is_err());
    assert!("text; DROP TABLE klage_cases".parse::<SqlType>().is_err());
}

#[test]
fn test_sql_type_from_information_schema() {
    assert_eq!(
        SqlType::from_information_schema("character varying", Some(50), None, None),
        SqlType::Varchar(50)
    );
    assert_eq!(
        SqlType::from_information_schema("numeric", None, Some(3), Some(2)),
        SqlType::Numeric {
            precision: 3,
            scale: 2
        }
    );
    assert_eq!(
        SqlType::from_information_schema("timestamp without time zone", None, None, None),
        SqlType::Timestamp
    );
    assert_eq!(
        SqlType::from_information_schema("jsonb", None, None, None),
        SqlType::Other("jsonb".to_string())
    );
    assert_eq!(SqlType::BigSerial.canonical(), SqlType::BigInt);
}

#[test]
fn test_catalog_accepts_valid_tables() {
    let catalog = SchemaCatalog::new([cases_table()]).unwrap();
    assert_eq!(catalog.len(), 1);
    assert!(catalog.get("klage_cases").is_some());
    assert_eq!(catalog.table_names().collect::<Vec<_>>(), vec!["klage_cases"]);
}

#[test]
fn test_catalog_rejects_duplicate_column() {
    let table = cases_table().column(ColumnSpec::new("case_id", SqlType::Text));
    assert_eq!(
        SchemaCatalog::new([table]),
        Err(ConfigurationError::DuplicateColumn {
            table: "klage_cases".to_string(),
            column: "case_id".to_string(),
        })
    );
}

#[test]
fn test_catalog_rejects_index_on_unknown_column() {
    let table = cases_table().index(&["debtor_id"]);
    assert_eq!(
        SchemaCatalog::new([table]),
        Err(ConfigurationError::UnknownIndexColumn {
            table: "klage_cases".to_string(),
            index: "idx_klage_cases_debtor_id".to_string(),
            column: "debtor_id".to_string(),
        })
    );
}

#[test]
fn test_catalog_rejects_missing_or_second_primary_key() {
    let no_pk = TableSchema::new("klage_audit").column(ColumnSpec::new("id", SqlType::BigSerial));
    assert_eq!(
        SchemaCatalog::new([no_pk]),
        Err(ConfigurationError::PrimaryKeyCount {
            table: "klage_audit".to_string(),
            found: 0,
        })
    );

    let two_pk = cases_table().named_index("second_pkey", IndexKind::Primary, &["case_id"]);
    assert!(matches!(
        SchemaCatalog::new([two_pk]),
        Err(ConfigurationError::PrimaryKeyCount { found: 2, .. })
    ));
}

#[test]
fn test_catalog_rejects_empty_index_and_table() {
    let empty_idx = cases_table().named_index("idx_nothing", IndexKind::Plain, &[]);
    assert!(matches!(
        SchemaCatalog::new([empty_idx]),
        Err(ConfigurationError::EmptyIndex { .. })
    ));

    assert_eq!(
        SchemaCatalog::new([TableSchema::new("klage_empty")]),
        Err(ConfigurationError::EmptyTable("klage_empty".to_string()))
    );
}

#[test]
fn test_catalog_rejects_duplicate_table() {
    assert_eq!(
        SchemaCatalog::new([cases_table(), cases_table()]),
        Err(ConfigurationError::DuplicateTable("klage_cases".to_string()))
    );
}

#[test]
fn test_catalog_rejects_index_name_clash_across_tables() {
    let audit = TableSchema::new("klage_audit")
        .column(ColumnSpec::new("id", SqlType::BigSerial).not_null())
        .column(ColumnSpec::new("case_id", SqlType::BigInt))
        .primary_key(&["id"])
        .named_index("uq_klage_cases_case_id", IndexKind::Plain, &["case_id"]);

    assert_eq!(
        SchemaCatalog::new([cases_table(), audit]),
        Err(ConfigurationError::IndexNameClash {
            index: "uq_klage_cases_case_id".to_string(),
            first: "klage_cases".to_string(),
            second: "klage_audit".to_string(),
        })
    );
}

#[test]
fn test_catalog_rejects_bad_identifiers() {
    let table = cases_table().column(ColumnSpec::new("bonität", SqlType::Varchar(20)));
    assert!(matches!(
        SchemaCatalog::new([table]),
        Err(ConfigurationError::InvalidIdentifier { name, .. }) if name == "bonität"
    ));
}

#[test]
fn test_catalog_rejects_not_null_column_without_default() {
    let table = cases_table().column(ColumnSpec::new("debtor_id", SqlType::BigInt).not_null());
    assert_eq!(
        SchemaCatalog::new([table]),
        Err(ConfigurationError::NotNullWithoutDefault {
            table: "klage_cases".to_string(),
            column: "debtor_id".to_string(),
        })
    );

    let table = cases_table().column(
        ColumnSpec::new("case_creation_date", SqlType::Timestamp)
            .not_null()
            .default_null(),
    );
    let err = SchemaCatalog::new([table]).unwrap_err();
    let ConfigurationError::NotNullWithoutDefault { column, .. } = &err else {
        panic!("unexpected error: {err}");
    };
    assert_eq!(column, "case_creation_date");

    // any literal fills existing rows
    let table = cases_table().column(
        ColumnSpec::new("debtor_id", SqlType::BigInt)
            .not_null()
            .default_number("0"),
    );
    assert!(SchemaCatalog::new([table]).is_ok());
}

#[test]
fn test_default_equivalence_ignores_postgres_casts() {
    let live = |s: &str| DefaultValue::Expr(s.to_string());
    let draft = DefaultValue::Text("draft".to_string());

    assert!(draft.is_equivalent(&live("'draft'::character varying")));
    assert!(draft.is_equivalent(&live("'draft'::text")));
    assert!(draft.is_equivalent(&live("'draft'")));
    assert!(!draft.is_equivalent(&live("'Draft'::character varying")));
    assert!(!draft.is_equivalent(&live("'open'::character varying")));

    let zero = DefaultValue::Number("0.00".to_string());
    assert!(zero.is_equivalent(&live("0.00")));
    assert!(zero.is_equivalent(&live("0.00::numeric")));
    assert!(DefaultValue::Number("-1".to_string()).is_equivalent(&live("'-1'::integer")));

    let now = DefaultValue::Expr("CURRENT_TIMESTAMP".to_string());
    assert!(now.is_equivalent(&live("CURRENT_TIMESTAMP")));
    assert!(now.is_equivalent(&live("current_timestamp")));
    assert!(!now.is_equivalent(&live("now()")));

    assert!(DefaultValue::Null.is_equivalent(&live("NULL::character varying")));
    let serial = live("nextval('klage_cases_id_seq'::regclass)");
    assert!(serial.is_equivalent(&serial));

    let quoted = DefaultValue::Text("a::b".to_string());
    assert!(quoted.is_equivalent(&live("'a::b'::character varying")));
    assert!(!quoted.is_equivalent(&live("'a'")));
}

#[test]
fn test_snapshot_lookup_is_case_insensitive() {
    let snapshot = LiveTableSnapshot::from(&cases_table());
    assert!(snapshot.has_column("CASE_ID"));
    assert!(snapshot.has_index("UQ_KLAGE_CASES_CASE_ID"));
    assert!(!snapshot.has_column("datenquelle"));
    assert_eq!(
        snapshot.primary_index().map(|i| i.name.as_str()),
        Some("klage_cases_pkey")
    );
}

proptest! {
    #[test]
    fn prop_generated_identifiers_are_valid(name in "[a-z_][a-z0-9_]{0,40}") {
        prop_assert!(is_valid_identifier(&name));
    }

    #[test]
    fn prop_uppercase_identifiers_are_rejected(name in "[A-Z][a-zA-Z0-9_]{0,20}") {
        prop_assert!(!is_valid_identifier(&name));
    }

    #[test]
    fn prop_varchar_display_parses_back(len in 1u32..10_000) {
        let ty = SqlType::Varchar(len);
        prop_assert_eq!(ty.to_string().parse::<SqlType>(), Ok(ty));
    }
}
