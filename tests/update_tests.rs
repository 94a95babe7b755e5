use chrono::{TimeZone, Utc};
use docrepo::prelude::dx::*;
use docrepo::{
    CREATED_AT_FIELD, CREATED_BY_FIELD, ID_FIELD, MODIFIED_AT_FIELD, MODIFIED_BY_FIELD,
    build_update_at,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Clone, Default, Serialize, Deserialize, Document)]
#[document(collection = "products")]
#[serde(rename_all = "camelCase")]
struct Product {
    #[document(base)]
    #[serde(flatten)]
    base: DocumentBase,
    display_name: Option<String>,
    unit_price: Option<f64>,
    #[serde(rename = "sku")]
    stock_keeping_unit: Option<String>,
    tags: Vec<String>,
    #[document(skip)]
    #[serde(default)]
    search_rank: Option<u32>,
    #[serde(skip)]
    cached_label: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Document)]
#[document(collection = "plain")]
struct Plain {
    #[document(base)]
    #[serde(flatten)]
    base: DocumentBase,
    first_name: Option<String>,
}

#[test]
fn test_collection_constant_from_attribute() {
    assert_eq!(Product::COLLECTION, "products");
    assert_eq!(Plain::COLLECTION, "plain");
}

#[test]
fn test_descriptors_use_serialized_names() {
    let product = Product {
        display_name: Some("lamp".into()),
        ..Product::default()
    };
    let names: Vec<&str> = product
        .field_values()
        .unwrap()
        .iter()
        .map(|field| field.name)
        .collect();
    assert_eq!(names, vec!["displayName", "unitPrice", "sku", "tags", MODIFIED_BY_FIELD]);

    let plain = Plain {
        base: DocumentBase::new(),
        first_name: None,
    };
    let names: Vec<&str> = plain.field_values().unwrap().iter().map(|f| f.name).collect();
    assert_eq!(names, vec!["first_name", MODIFIED_BY_FIELD]);
}

#[test]
fn test_update_skips_nulls_and_immutable_fields() {
    let mut product = Product {
        base: DocumentBase::with_id(ObjectId::new()),
        display_name: Some("lamp".into()),
        unit_price: None,
        stock_keeping_unit: Some("L-1".into()),
        tags: vec!["home".into()],
        search_rank: Some(3),
        cached_label: Some("cached".into()),
    };
    product.base.created_by = Some("alice".into());
    product.base.modified_by = Some("bob".into());

    let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    let update = build_update_at(&product, now).unwrap();

    assert_eq!(
        update.fields().collect::<Vec<_>>(),
        vec!["displayName", "sku", "tags", MODIFIED_BY_FIELD, MODIFIED_AT_FIELD]
    );
    assert_eq!(update.get("displayName"), Some(&json!("lamp")));
    assert_eq!(update.get(MODIFIED_BY_FIELD), Some(&json!("bob")));
    assert_eq!(
        update.get(MODIFIED_AT_FIELD),
        Some(&serde_json::to_value(now).unwrap())
    );
    for immutable in [ID_FIELD, CREATED_AT_FIELD, CREATED_BY_FIELD] {
        assert!(!update.contains(immutable));
    }
    assert!(!update.contains("unitPrice"));
    assert!(!update.contains("searchRank"));
    assert!(!update.contains("cachedLabel"));
}

#[test]
fn test_update_of_empty_entity_still_stamps_modified_at() {
    let update = build_update_at(&Plain { base: DocumentBase::new(), first_name: None }, Utc::now())
        .unwrap();
    assert_eq!(update.len(), 1);
    assert!(update.contains(MODIFIED_AT_FIELD));
    assert!(!update.is_empty());
}

#[test]
fn test_empty_collections_are_written() {
    let product = Product::default();
    let update = build_update_at(&product, Utc::now()).unwrap();
    // An empty list is a value, not a null.
    assert_eq!(update.get("tags"), Some(&json!([])));
    assert_eq!(
        update.to_document()["$set"]["tags"],
        json!([])
    );
}
