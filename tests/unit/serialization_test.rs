//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 序列化模块的单元测试

use asyncmem::serialization::{AdapterRegistry, JsonSerializer, Payload, Serializer};
use asyncmem::CacheError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Order {
    id: u64,
    customer: String,
    lines: Vec<(String, u32)>,
    tags: BTreeMap<String, String>,
    note: Option<String>,
}

fn order() -> Order {
    let mut tags = BTreeMap::new();
    tags.insert("region".to_string(), "eu".to_string());
    Order {
        id: 7,
        customer: "Kirky".to_string(),
        lines: vec![("apple".to_string(), 3), ("pear".to_string(), 1)],
        tags,
        note: None,
    }
}

/// 测试JSON序列化往返
#[test]
fn test_json_round_trip() {
    let serializer = JsonSerializer::new();

    let value = order();
    let bytes = serializer.serialize(&value).unwrap();
    let restored: Order = serializer.deserialize(&bytes).unwrap();
    assert_eq!(restored, value);

    let text = "plain string".to_string();
    let bytes = Serializer::<String>::serialize(&serializer, &text).unwrap();
    let restored: String = serializer.deserialize(&bytes).unwrap();
    assert_eq!(restored, text);

    let numbers = vec![1_i64, -2, 3];
    let bytes = serializer.serialize(&numbers).unwrap();
    let restored: Vec<i64> = serializer.deserialize(&bytes).unwrap();
    assert_eq!(restored, numbers);
}

/// 估算大小等于JSON编码长度
#[test]
fn test_json_estimate_matches_encoding() {
    let serializer = JsonSerializer::new();
    let value = order();
    let encoded = serde_json::to_vec(&value).unwrap();
    assert_eq!(serializer.estimate_size(&value), encoded.len() as u64);
}

#[cfg(feature = "flate2")]
#[test]
fn test_compressed_round_trip() {
    let serializer = JsonSerializer::with_compression();
    let value: Vec<String> = (0..200).map(|_| "repeated".to_string()).collect();

    let bytes = serializer.serialize(&value).unwrap();
    assert!(bytes.len() < serde_json::to_vec(&value).unwrap().len());
    let restored: Vec<String> = serializer.deserialize(&bytes).unwrap();
    assert_eq!(restored, value);
}

#[test]
fn test_invalid_bytes_are_serialization_errors() {
    let serializer = JsonSerializer::new();
    let result: Result<Order, _> = serializer.deserialize(b"{not json");
    assert!(matches!(result, Err(CacheError::Serialization(_))));
}

#[test]
fn test_registry_adapter_round_trip() {
    let registry = AdapterRegistry::new();
    let adapter = registry.adapter_for::<Order, _>(JsonSerializer::new());
    assert!(adapter.payload_type().ends_with("Order"));

    let payload: Payload = Box::new(order());
    let bytes = adapter.serialize(payload.as_ref()).unwrap();
    let restored = adapter.deserialize(&bytes).unwrap();
    assert_eq!(restored.downcast_ref::<Order>(), Some(&order()));
    assert_eq!(
        adapter.estimate_size(payload.as_ref()).unwrap(),
        bytes.len() as u64
    );
}
