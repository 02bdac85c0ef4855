//! Schema and analyzer shared by every tantivy index this crate opens.
use tantivy::schema::{IndexRecordOption, Schema, TextFieldIndexing, TextOptions, STORED, STRING};
use tantivy::tokenizer::{LowerCaser, SimpleTokenizer, StopWordFilter, TextAnalyzer};
use tantivy::Index;

pub const TEXT_TOKENIZER: &str = "text_with_stopwords";

pub const F_CHUNK_ID: &str = "chunk_id";
pub const F_DOC_ID: &str = "doc_id";
pub const F_TEXT: &str = "text";
/// One raw `key=value` term per metadata entry; drives pre-scoring filters.
pub const F_META: &str = "meta";
/// The chunk (without embedding) as JSON, for hydrating hits.
pub const F_PAYLOAD: &str = "payload";

pub fn build_schema() -> Schema {
	let mut schema_builder = Schema::builder();
	schema_builder.add_text_field(F_CHUNK_ID, STRING | STORED);
	schema_builder.add_text_field(F_DOC_ID, STRING | STORED);
	let text_field_indexing = TextFieldIndexing::default()
		.set_tokenizer(TEXT_TOKENIZER)
		.set_index_option(IndexRecordOption::WithFreqsAndPositions);
	let text_options = TextOptions::default().set_indexing_options(text_field_indexing).set_stored();
	schema_builder.add_text_field(F_TEXT, text_options);
	schema_builder.add_text_field(F_META, STRING);
	schema_builder.add_text_field(F_PAYLOAD, STORED);
	schema_builder.build()
}

pub fn register_tokenizer(index: &Index) {
	let stop_words = [
		"a","an","and","are","as","at","be","by","for","from","has","he","in","is","it","its","of","on","that","the","to","was","will","with","or","but","not","this","these","they","them","their","there","then","than","so","if","when","where","why","how","what","which","who","whom","whose","can","could","should","would","may","might","must","shall","do","does","did","have","had","having",
	];
	let tokenizer = TextAnalyzer::builder(SimpleTokenizer::default())
		.filter(LowerCaser)
		.filter(StopWordFilter::remove(stop_words.into_iter().map(|s| s.to_string())))
		.build();
	index.tokenizers().register(TEXT_TOKENIZER, tokenizer);
}

pub fn meta_term(key: &str, value: &str) -> String {
	format!("{key}={value}")
}
