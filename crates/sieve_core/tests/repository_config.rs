use sieve_core::db::table_exists;
use sieve_core::{
    open_repository, ColumnDef, ConfigError, EntitySchema, IdentifierKind, RepositoryKind,
    SchemaRegistry, Session, SqliteRepository, StoreConfig, StoreError, Value,
};

fn schemas() -> SchemaRegistry {
    let mut schemas = SchemaRegistry::new();
    schemas
        .register(
            EntitySchema::builder("Company", "tblCompany")
                .identifier("CompanyID", IdentifierKind::AutoIncrement)
                .column(ColumnDef::text("CompanyName"))
                .build()
                .unwrap(),
        )
        .unwrap();
    schemas
}

#[test]
fn config_deserializes_with_defaults() {
    let config: StoreConfig = serde_json::from_str("{}").unwrap();
    assert_eq!(config, StoreConfig::offline());
    assert_eq!(config.repository, RepositoryKind::Offline);
    assert!(!config.partial_filter_pushdown);

    let config: StoreConfig = serde_json::from_str(
        r#"{"repository":"sqlite","sqlite_path":"/tmp/sieve.db","partial_filter_pushdown":true}"#,
    )
    .unwrap();
    assert_eq!(config.repository, RepositoryKind::Sqlite);
    assert!(config.negotiation_policy().narrow_top_level_and);
}

#[test]
fn unknown_repository_binding_is_a_config_error() {
    assert!(serde_json::from_str::<StoreConfig>(r#"{"repository":"mysql"}"#).is_err());
    assert_eq!(
        RepositoryKind::parse("mysql").unwrap_err(),
        ConfigError::UnknownRepository("mysql".to_string())
    );
    assert_eq!(RepositoryKind::parse(" memory ").unwrap(), RepositoryKind::Offline);
}

#[test]
fn open_repository_reports_the_selected_kind() {
    let schemas = schemas();
    for (config, kind) in [
        (StoreConfig::offline(), RepositoryKind::Offline),
        (StoreConfig::sqlite(None), RepositoryKind::Sqlite),
    ] {
        let repo = open_repository(&config, &schemas).unwrap();
        assert_eq!(repo.kind(), kind);
    }
}

#[test]
fn unknown_entities_are_config_errors() {
    let session = Session::new(
        open_repository(&StoreConfig::offline(), &schemas()).unwrap(),
        schemas(),
    );
    assert!(matches!(
        session.create("Nope"),
        Err(StoreError::Config(ConfigError::UnknownEntity(_)))
    ));
}

#[test]
fn sqlite_repository_creates_tables_for_registered_entities() {
    let schemas = schemas();
    let repo =
        SqliteRepository::try_new(sieve_core::db::open_db_in_memory().unwrap(), &schemas).unwrap();
    assert!(table_exists(repo.connection(), "tblCompany").unwrap());
    assert!(!table_exists(repo.connection(), "tblMissing").unwrap());
}

#[test]
fn file_backed_store_survives_reopening() {
    let dir = tempfile::tempdir().unwrap();
    let config = StoreConfig::sqlite(Some(dir.path().join("sieve.db")));

    {
        let session = Session::new(open_repository(&config, &schemas()).unwrap(), schemas());
        let record = session.create("Company").unwrap();
        record.borrow_mut().set("CompanyName", "GCD");
        session.save(&record).unwrap();
    }

    let session = Session::new(open_repository(&config, &schemas()).unwrap(), schemas());
    let record = session.load("Company", 1).unwrap();
    assert_eq!(record.borrow().get("CompanyName"), Value::from("GCD"));
}
