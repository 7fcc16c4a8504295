use sieve_core::{
    ColumnDef, EntitySchema, MemoryRepository, ObjectCache, Record, RecordId, SchemaRegistry,
    Session, StoreError,
};
use std::cell::Cell;
use std::rc::Rc;
use std::sync::Arc;

fn company_schema() -> EntitySchema {
    EntitySchema::builder("Company", "tblCompany")
        .column(ColumnDef::text("CompanyName"))
        .build()
        .unwrap()
}

#[test]
fn get_or_create_returns_the_same_instance_per_key() {
    let schema = Arc::new(company_schema());
    let cache = ObjectCache::new();
    let hydrations = Cell::new(0);
    let hydrate = |id: i64| {
        hydrations.set(hydrations.get() + 1);
        let mut record = Record::new(Arc::clone(&schema));
        record.set("CompanyName", format!("company {id}"));
        Ok::<_, StoreError>(record)
    };

    let first = cache
        .get_or_create("Company", &RecordId::Int(1), || hydrate(1))
        .unwrap();
    let again = cache
        .get_or_create("Company", &RecordId::Int(1), || hydrate(1))
        .unwrap();
    let other = cache
        .get_or_create("Company", &RecordId::Int(2), || hydrate(2))
        .unwrap();
    let other_entity = cache
        .get_or_create("Category", &RecordId::Int(1), || hydrate(1))
        .unwrap();

    assert!(Rc::ptr_eq(&first, &again));
    assert!(!Rc::ptr_eq(&first, &other));
    assert!(!Rc::ptr_eq(&first, &other_entity));
    assert_eq!(hydrations.get(), 3);
    assert_eq!(cache.len(), 3);

    cache.clear();
    assert!(cache.is_empty());
    let fresh = cache
        .get_or_create("Company", &RecordId::Int(1), || hydrate(1))
        .unwrap();
    assert!(!Rc::ptr_eq(&first, &fresh));
}

#[test]
fn sessions_do_not_share_identity_maps() {
    let mut schemas = SchemaRegistry::new();
    schemas.register(company_schema()).unwrap();
    let first = Session::new(MemoryRepository::new(), schemas.clone());
    let second = Session::new(MemoryRepository::new(), schemas);

    let record = first.create("Company").unwrap();
    first.save(&record).unwrap();
    assert!(first.cache().contains("Company", &RecordId::Int(1)));
    assert!(second.cache().is_empty());
    assert!(matches!(
        second.load("Company", 1),
        Err(StoreError::RecordNotFound { .. })
    ));
}
