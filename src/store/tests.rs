use futures::executor::block_on;
use rstest::rstest;
use serde_json::json;

use super::*;

#[test]
fn default_options() {
    let options = StoreOptions::default();
    assert_eq!(options.database_name, DEFAULT_DATABASE_NAME);
    assert_eq!(options.collection_name, DEFAULT_COLLECTION_NAME);
}

#[test]
fn default_options_are_fresh() {
    let mut a = StoreOptions::default();
    a.database_name.push_str("-changed");
    assert_eq!(StoreOptions::default().database_name, DEFAULT_DATABASE_NAME);
}

#[test]
fn options_builder() {
    let options = StoreOptions::new()
        .database_name("testDb")
        .collection_name("testStore");
    assert_eq!(options.database_name, "testDb");
    assert_eq!(options.collection_name, "testStore");
}

#[test]
fn load_missing() {
    let store = MemoryStore::new();
    let value: Option<i32> =
        block_on(load_stored_data(&store, "missing", &StoreOptions::default())).unwrap();
    assert_eq!(value, None);
}

#[rstest]
#[case(json!(0))]
#[case(json!(""))]
#[case(json!(false))]
#[case(json!(null))]
#[case(json!({ "a": [1, 2] }))]
fn stored_values_are_not_absent(#[case] value: serde_json::Value) {
    let store = MemoryStore::new();
    let options = StoreOptions::default();
    block_on(save_stored_data(&store, "k", &value, &options)).unwrap();
    let loaded: Option<serde_json::Value> =
        block_on(load_stored_data(&store, "k", &options)).unwrap();
    assert_eq!(loaded, Some(value));
}

#[test]
fn save_overwrites() {
    let store = MemoryStore::new();
    let options = StoreOptions::default();
    block_on(save_stored_data(&store, "k", &1, &options)).unwrap();
    block_on(save_stored_data(&store, "k", &2, &options)).unwrap();
    let loaded: Option<i32> = block_on(load_stored_data(&store, "k", &options)).unwrap();
    assert_eq!(loaded, Some(2));
}

#[test]
fn remove_missing_is_ok() {
    let store = MemoryStore::new();
    block_on(remove_stored_data(&store, "k", &StoreOptions::default())).unwrap();
}

#[test]
fn remove_stored() {
    let store = MemoryStore::new();
    let options = StoreOptions::default();
    block_on(save_stored_data(&store, "k", "v", &options)).unwrap();
    block_on(remove_stored_data(&store, "k", &options)).unwrap();
    let loaded: Option<String> = block_on(load_stored_data(&store, "k", &options)).unwrap();
    assert_eq!(loaded, None);
}

#[test]
fn load_wrong_type() {
    let store = MemoryStore::new();
    let options = StoreOptions::default();
    block_on(save_stored_data(&store, "k", "text", &options)).unwrap();
    let e = block_on(load_stored_data::<i32>(&store, "k", &options)).unwrap_err();
    assert!(matches!(e, crate::Error::Serialization(_)));
}

#[test]
fn names_are_separate() {
    let store = MemoryStore::new();
    let a = StoreOptions::new().database_name("a");
    let b = StoreOptions::new().collection_name("b");
    block_on(save_stored_data(&store, "k", &1, &a)).unwrap();
    block_on(save_stored_data(&store, "k", &2, &b)).unwrap();

    let load = |options: &StoreOptions| -> Option<i32> {
        block_on(load_stored_data(&store, "k", options)).unwrap()
    };
    assert_eq!(load(&a), Some(1));
    assert_eq!(load(&b), Some(2));
    assert_eq!(load(&StoreOptions::default()), None);
}

#[test]
fn handle_operations() {
    let store = MemoryStore::new();
    block_on(async {
        let handle = connect(&store, &StoreOptions::default()).await?;
        save(&handle, DEFAULT_COLLECTION_NAME, "k", json!([1])).await?;
        assert_eq!(
            load(&handle, DEFAULT_COLLECTION_NAME, "k").await?,
            Some(json!([1]))
        );
        remove(&handle, DEFAULT_COLLECTION_NAME, "k").await?;
        assert_eq!(load(&handle, DEFAULT_COLLECTION_NAME, "k").await?, None);
        crate::Result::<()>::Ok(())
    })
    .unwrap();
}
