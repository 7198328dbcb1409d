//! Query capabilities exposed to orchestration layers.
//!
//! A fixed set of read operations with typed parameters. External callers
//! (an upload UI, a conversational agent) describe a call as a
//! [`QueryRequest`] and [`dispatch`] maps it onto [`DocumentQueries`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    error::{ServiceError, ServiceResult},
    models::fiscal_document::{
        query::{DocumentStatistics, SearchFilter},
        DocumentSummary, StoredDocument,
    },
    services::document_store::DocumentStore,
};

pub trait DocumentQueries {
    fn search_documents(&self, filter: &SearchFilter) -> ServiceResult<Vec<DocumentSummary>>;

    fn document_statistics(&self, filter: &SearchFilter) -> ServiceResult<DocumentStatistics>;

    fn find_document(&self, document_key: &str) -> ServiceResult<StoredDocument>;
}

impl DocumentQueries for DocumentStore {
    fn search_documents(&self, filter: &SearchFilter) -> ServiceResult<Vec<DocumentSummary>> {
        self.search(filter)
    }

    fn document_statistics(&self, filter: &SearchFilter) -> ServiceResult<DocumentStatistics> {
        self.statistics(filter)
    }

    fn find_document(&self, document_key: &str) -> ServiceResult<StoredDocument> {
        self.find_by_key(document_key)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum QueryRequest {
    Search {
        #[serde(default)]
        filter: SearchFilter,
    },
    Statistics {
        #[serde(default)]
        filter: SearchFilter,
    },
    Find {
        document_key: String,
    },
}

impl QueryRequest {
    pub fn from_json(payload: &str) -> ServiceResult<Self> {
        serde_json::from_str(payload).map_err(|e| {
            ServiceError::invalid_input("unsupported query request")
                .with_context(|ctx| ctx.with_tag("query").with_detail(e.to_string()))
        })
    }
}

fn to_json<T: Serialize>(value: &T) -> ServiceResult<Value> {
    serde_json::to_value(value).map_err(|e| {
        ServiceError::storage_failure("failed to encode query result")
            .with_context(|ctx| ctx.with_tag("query").with_detail(e.to_string()))
    })
}

/// Runs `request` against `queries` and encodes the result as JSON.
pub fn dispatch<Q>(queries: &Q, request: &QueryRequest) -> ServiceResult<Value>
where
    Q: DocumentQueries + ?Sized,
{
    log::debug!("Dispatching query request: {:?}", request);
    match request {
        QueryRequest::Search { filter } => to_json(&queries.search_documents(filter)?),
        QueryRequest::Statistics { filter } => to_json(&queries.document_statistics(filter)?),
        QueryRequest::Find { document_key } => to_json(&queries.find_document(document_key)?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fiscal_document::DocumentType;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
    }

    impl DocumentQueries for Recorder {
        fn search_documents(&self, filter: &SearchFilter) -> ServiceResult<Vec<DocumentSummary>> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("search:{:?}", filter.document_type));
            Ok(Vec::new())
        }

        fn document_statistics(&self, _filter: &SearchFilter) -> ServiceResult<DocumentStatistics> {
            self.calls.lock().unwrap().push("statistics".to_string());
            Ok(DocumentStatistics::empty())
        }

        fn find_document(&self, document_key: &str) -> ServiceResult<StoredDocument> {
            self.calls.lock().unwrap().push(format!("find:{}", document_key));
            Err(ServiceError::not_found(format!("no document {}", document_key)))
        }
    }

    #[test]
    fn requests_decode_from_json() {
        let request = QueryRequest::from_json(
            r#"{"operation":"search","filter":{"document_type":"consumer_invoice","days_back":7}}"#,
        )
        .unwrap();
        assert_eq!(
            request,
            QueryRequest::Search {
                filter: SearchFilter::new()
                    .document_type(DocumentType::ConsumerInvoice)
                    .days_back(7)
            }
        );

        let request = QueryRequest::from_json(r#"{"operation":"statistics"}"#).unwrap();
        assert_eq!(
            request,
            QueryRequest::Statistics {
                filter: SearchFilter::default()
            }
        );
    }

    #[test]
    fn unknown_operation_is_invalid_input() {
        let err = QueryRequest::from_json(r#"{"operation":"drop_table"}"#).unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput { .. }));
    }

    #[test]
    fn dispatch_routes_each_operation() {
        let recorder = Recorder::default();

        let value = dispatch(
            &recorder,
            &QueryRequest::Search {
                filter: SearchFilter::new().document_type(DocumentType::FreightManifest),
            },
        )
        .unwrap();
        assert_eq!(value, serde_json::json!([]));

        let value = dispatch(
            &recorder,
            &QueryRequest::Statistics {
                filter: SearchFilter::default(),
            },
        )
        .unwrap();
        assert_eq!(value["total_documents"], 0);

        let err = dispatch(
            &recorder,
            &QueryRequest::Find {
                document_key: "123".to_string(),
            },
        )
        .unwrap_err();
        assert!(err.is_not_found());

        assert_eq!(
            *recorder.calls.lock().unwrap(),
            vec![
                "search:Some(FreightManifest)".to_string(),
                "statistics".to_string(),
                "find:123".to_string()
            ]
        );
    }
}
