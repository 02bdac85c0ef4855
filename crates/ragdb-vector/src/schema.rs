use arrow_schema::{DataType, Field, Schema};
use std::sync::Arc;

pub fn build_chunk_schema(dim: i32) -> Arc<Schema> {
	Arc::new(Schema::new(vec![
		Field::new("chunk_id", DataType::Utf8, false),
		Field::new("doc_id", DataType::Utf8, false),
		// "key=value" per metadata entry, for equality pushdown
		Field::new("meta_kv", DataType::List(Arc::new(Field::new("item", DataType::Utf8, true))), false),
		Field::new("payload", DataType::Utf8, false),
		Field::new("vector", DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), dim), true),
	]))
}
