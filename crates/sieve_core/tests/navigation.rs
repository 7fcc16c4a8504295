use sieve_core::{
    open_repository, ColumnDef, ColumnPath, ConfigError, EntitySchema, IdentifierKind,
    RecordHandle, Relationship, Repository, SchemaRegistry, Session, StoreConfig, StoreError,
    Value,
};
use std::rc::Rc;

fn schemas() -> SchemaRegistry {
    let mut schemas = SchemaRegistry::new();
    schemas
        .register(
            EntitySchema::builder("Category", "tblCategory")
                .identifier("CategoryID", IdentifierKind::AutoIncrement)
                .column(ColumnDef::text("CategoryName"))
                .relationship(Relationship::many(
                    "Companies",
                    "Company",
                    "CategoryID",
                    "CategoryID",
                ))
                .build()
                .unwrap(),
        )
        .unwrap();
    schemas
        .register(
            EntitySchema::builder("Company", "tblCompany")
                .identifier("CompanyID", IdentifierKind::AutoIncrement)
                .column(ColumnDef::text("CompanyName"))
                .column(ColumnDef::integer("CategoryID"))
                .relationship(Relationship::one(
                    "Category",
                    "Category",
                    "CategoryID",
                    "CategoryID",
                ))
                .build()
                .unwrap(),
        )
        .unwrap();
    schemas
        .register(
            EntitySchema::builder("Contact", "tblContact")
                .identifier("ContactID", IdentifierKind::AutoIncrement)
                .column(ColumnDef::text("Forename"))
                .column(ColumnDef::integer("CompanyID"))
                .relationship(Relationship::one(
                    "Company",
                    "Company",
                    "CompanyID",
                    "CompanyID",
                ))
                .build()
                .unwrap(),
        )
        .unwrap();
    schemas
}

struct Fixture {
    session: Session<Box<dyn Repository>>,
}

impl Fixture {
    fn new(config: StoreConfig) -> Self {
        let schemas = schemas();
        let repo = open_repository(&config, &schemas).unwrap();
        let fixture = Self {
            session: Session::new(repo, schemas),
        };
        let category = fixture.insert("Category", &[("CategoryName", Value::from("Retail"))]);
        let category_id = category.borrow().get("CategoryID");
        for name in ["GCD", "Widgets"] {
            let company = fixture.insert(
                "Company",
                &[
                    ("CompanyName", Value::from(name)),
                    ("CategoryID", category_id.clone()),
                ],
            );
            let company_id = company.borrow().get("CompanyID");
            fixture.insert(
                "Contact",
                &[
                    ("Forename", Value::from("Betsy")),
                    ("CompanyID", company_id),
                ],
            );
        }
        fixture.insert("Contact", &[("Forename", Value::from("Loner"))]);
        fixture
    }

    fn insert(&self, entity: &str, values: &[(&str, Value)]) -> RecordHandle {
        let record = self.session.create(entity).unwrap();
        for (column, value) in values {
            record.borrow_mut().set(column, value.clone());
        }
        self.session.save(&record).unwrap();
        record
    }
}

fn fixtures() -> Vec<Fixture> {
    vec![
        Fixture::new(StoreConfig::offline()),
        Fixture::new(StoreConfig::sqlite(None)),
    ]
}

#[test]
fn to_one_navigation_goes_through_the_identity_map() {
    for fixture in fixtures() {
        let session = &fixture.session;
        let contact = session.load("Contact", 1).unwrap();
        let via_contact = session.related_one(&contact, "Company").unwrap().unwrap();
        let loaded = session.load("Company", 1).unwrap();
        assert!(Rc::ptr_eq(&via_contact, &loaded));

        via_contact.borrow_mut().set("CompanyName", "Renamed");
        let again = session.related_one(&contact, "Company").unwrap().unwrap();
        assert_eq!(again.borrow().get("CompanyName"), Value::from("Renamed"));
    }
}

#[test]
fn unset_relationships_resolve_to_none_and_null() {
    for fixture in fixtures() {
        let session = &fixture.session;
        let loner = session.load("Contact", 3).unwrap();
        assert!(session.related_one(&loner, "Company").unwrap().is_none());

        let path = ColumnPath::parse("Company.CompanyName").unwrap();
        assert_eq!(session.get_path(&loner, &path).unwrap(), Value::Null);
        assert!(matches!(
            session.set_path(&loner, &path, "x"),
            Err(StoreError::InvalidPath(_))
        ));
    }
}

#[test]
fn to_many_navigation_returns_a_filtered_collection() {
    for fixture in fixtures() {
        let session = &fixture.session;
        let category = session.load("Category", 1).unwrap();
        let mut companies = session.related_many(&category, "Companies").unwrap();
        assert_eq!(companies.count().unwrap(), 2);

        let widgets = companies.get(1).unwrap().unwrap();
        assert_eq!(widgets.borrow().get("CompanyName"), Value::from("Widgets"));
    }
}

#[test]
fn column_paths_read_and_write_related_records() {
    for fixture in fixtures() {
        let session = &fixture.session;
        let contact = session.load("Contact", 2).unwrap();
        let path = ColumnPath::parse("Company.Category.CategoryName").unwrap();
        assert_eq!(session.get_path(&contact, &path).unwrap(), Value::from("Retail"));

        session.set_path(&contact, &path, "Wholesale").unwrap();
        let category = session.load("Category", 1).unwrap();
        assert_eq!(category.borrow().get("CategoryName"), Value::from("Wholesale"));
        assert!(category.borrow().has_changes());

        let owner = session.column_for_path("Contact", &path).unwrap();
        assert_eq!(owner.name, "Category");
    }
}

#[test]
fn unknown_relationships_and_columns_are_rejected() {
    let fixture = Fixture::new(StoreConfig::offline());
    let session = &fixture.session;
    let contact = session.load("Contact", 1).unwrap();

    let err = session.related_one(&contact, "Employer").unwrap_err();
    assert!(matches!(
        err,
        StoreError::Config(ConfigError::UnknownRelationship { .. })
    ));

    let wrong_kind = session.related_many(&contact, "Company").err().unwrap();
    assert!(matches!(wrong_kind, StoreError::InvalidPath(_)));

    let path = ColumnPath::parse("Company.Missing").unwrap();
    assert!(matches!(
        session.column_for_path("Contact", &path),
        Err(StoreError::InvalidPath(_))
    ));
}
