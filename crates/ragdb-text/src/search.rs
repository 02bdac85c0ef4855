use std::ops::Bound;

use tantivy::collector::TopDocs;
use tantivy::query::{BooleanQuery, Occur, Query, QueryParser, RangeQuery, TermQuery};
use tantivy::schema::{Field, IndexRecordOption, Value};
use tantivy::snippet::SnippetGenerator;
use tantivy::{TantivyDocument, Term};
use tracing::debug;

use ragdb_core::error::Result;
use ragdb_core::filter::MetadataFilter;
use ragdb_core::types::{Chunk, RankedHit, SourceKind};

use crate::index::{tantivy_err, Inner};
use crate::tantivy_utils::meta_term;

/// Term-dictionary query for one metadata predicate over the raw `key=value` terms.
///
/// All values of `key` sort between `"key="` and `"key>"`, so range bounds
/// become bounds on whole terms and compare lexicographically.
pub(crate) fn filter_query(meta: Field, filter: &MetadataFilter) -> Box<dyn Query> {
	match filter {
		MetadataFilter::Eq { key, value } => {
			Box::new(TermQuery::new(Term::from_field_text(meta, &meta_term(key, value)), IndexRecordOption::Basic))
		}
		MetadataFilter::Range { key, gte, lte } => {
			let lower = match gte {
				Some(lo) => Bound::Included(Term::from_field_text(meta, &meta_term(key, lo))),
				None => Bound::Included(Term::from_field_text(meta, &format!("{key}="))),
			};
			let upper = match lte {
				Some(hi) => Bound::Included(Term::from_field_text(meta, &meta_term(key, hi))),
				None => Bound::Excluded(Term::from_field_text(meta, &format!("{key}>"))),
			};
			Box::new(RangeQuery::new(lower, upper))
		}
	}
}

impl Inner {
	pub fn search(&self, query: &str, k: usize, filters: &[MetadataFilter]) -> Result<Vec<RankedHit>> {
		if k == 0 || query.trim().is_empty() {
			return Ok(Vec::new());
		}
		let searcher = self.reader.searcher();
		// TopDocs preallocates for the limit; never ask for more than exist.
		let limit = k.min(usize::try_from(searcher.num_docs()).unwrap_or(usize::MAX));
		if limit == 0 {
			return Ok(Vec::new());
		}
		let parser = QueryParser::for_index(&self.index, vec![self.fields.text]);
		let (text_query, errors) = parser.parse_query_lenient(query);
		if !errors.is_empty() {
			debug!(?errors, "lenient query parse dropped clauses");
		}

		let mut clauses: Vec<(Occur, Box<dyn Query>)> = vec![(Occur::Must, text_query.box_clone())];
		clauses.extend(filters.iter().map(|f| (Occur::Must, filter_query(self.fields.meta, f))));
		let full_query = BooleanQuery::new(clauses);

		let top_docs = searcher.search(&full_query, &TopDocs::with_limit(limit)).map_err(tantivy_err)?;
		let snippets = SnippetGenerator::create(&searcher, &*text_query, self.fields.text).map_err(tantivy_err)?;

		let mut hits = Vec::with_capacity(top_docs.len());
		for (score, addr) in top_docs {
			let doc: TantivyDocument = searcher.doc(addr).map_err(tantivy_err)?;
			let payload = doc.get_first(self.fields.payload).and_then(|v| v.as_str()).unwrap_or("{}");
			let chunk: Chunk = serde_json::from_str(payload)?;
			let snippet = snippets.snippet_from_doc(&doc).to_html();
			hits.push(RankedHit { chunk_id: chunk.chunk_id.clone(), score, source: SourceKind::Lexical, snippet, chunk });
		}
		Ok(hits)
	}
}
