mod support;

use docmind_session_index::{DocumentSummary, SessionIndexError};
use pretty_assertions::assert_eq;
use support::{manager, report_chunks};
use tempfile::TempDir;

#[tokio::test]
async fn add_search_remove_report() {
    let temp = TempDir::new().expect("tempdir");
    let manager = manager(temp.path());

    manager
        .add_chunks("s1", "report.pdf", report_chunks())
        .await
        .expect("add chunks");
    assert!(manager
        .is_document_indexed("s1", "report.pdf")
        .await
        .expect("indexed"));

    let hits = manager
        .search_top_k("s1", "report.pdf", "refund policy", 3)
        .await
        .expect("search");
    assert_eq!(hits.len(), 3);
    assert!(hits.iter().all(|hit| hit.doc_id == "report.pdf"));
    assert_eq!(hits[0].chunk_index, 1, "refund chunk should rank first");
    assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));

    manager
        .remove_doc("s1", "report.pdf")
        .await
        .expect("remove");
    let err = manager
        .search_top_k("s1", "report.pdf", "refund policy", 3)
        .await
        .expect_err("removed document");
    assert!(matches!(err, SessionIndexError::NotIndexed { .. }));
    assert!(!manager
        .is_document_indexed("s1", "report.pdf")
        .await
        .expect("indexed"));
}

#[tokio::test]
async fn search_never_leaves_the_document() {
    let temp = TempDir::new().expect("tempdir");
    let manager = manager(temp.path());

    manager
        .add_chunks("s1", "report.pdf", report_chunks())
        .await
        .expect("add report");
    manager
        .add_chunks(
            "s1",
            "faq.pdf",
            vec!["Refund policy: refund refund refund.".to_string()],
        )
        .await
        .expect("add faq");

    // The faq chunk is the closest match overall but belongs to another doc.
    let hits = manager
        .search_top_k("s1", "report.pdf", "refund refund refund policy", 5)
        .await
        .expect("search");
    assert!(hits.iter().all(|hit| hit.doc_id == "report.pdf"));

    let hits = manager
        .search_top_k("s1", "faq.pdf", "refund", 10)
        .await
        .expect("search faq");
    assert_eq!(hits.len(), 1, "k larger than the document returns every chunk");
}

#[tokio::test]
async fn zero_k_is_empty() {
    let temp = TempDir::new().expect("tempdir");
    let manager = manager(temp.path());
    manager
        .add_chunks("s1", "report.pdf", report_chunks())
        .await
        .expect("add");

    let hits = manager
        .search_top_k("s1", "report.pdf", "refund", 0)
        .await
        .expect("search");
    assert!(hits.is_empty());
}

#[tokio::test]
async fn default_k_comes_from_config() {
    let temp = TempDir::new().expect("tempdir");
    let manager = manager(temp.path());
    manager
        .add_chunks("s1", "report.pdf", report_chunks())
        .await
        .expect("add");

    let hits = manager
        .search("s1", "report.pdf", "warranty")
        .await
        .expect("search");
    assert_eq!(hits.len(), manager.config().default_k);
    assert_eq!(hits[0].chunk_index, 2);
}

#[tokio::test]
async fn sessions_are_isolated() {
    let temp = TempDir::new().expect("tempdir");
    let manager = manager(temp.path());

    manager
        .add_chunks("alice", "report.pdf", report_chunks())
        .await
        .expect("add");

    assert!(!manager
        .is_document_indexed("bob", "report.pdf")
        .await
        .expect("indexed"));
    let err = manager
        .search_top_k("bob", "report.pdf", "refund", 3)
        .await
        .expect_err("other session");
    assert!(matches!(err, SessionIndexError::NotIndexed { .. }));

    // Removing from one session leaves the other alone.
    manager
        .remove_doc("bob", "report.pdf")
        .await
        .expect("remove unknown");
    assert!(manager
        .is_document_indexed("alice", "report.pdf")
        .await
        .expect("indexed"));
}

#[tokio::test]
async fn reingestion_replaces_the_document() {
    let temp = TempDir::new().expect("tempdir");
    let manager = manager(temp.path());

    manager
        .add_chunks("s1", "report.pdf", report_chunks())
        .await
        .expect("first version");
    manager
        .add_chunks(
            "s1",
            "report.pdf",
            vec![
                "Invoices are now quarterly.".to_string(),
                "Warranty extended to two years.".to_string(),
            ],
        )
        .await
        .expect("second version");

    let stats = manager.session_stats("s1").await.expect("stats");
    assert_eq!(stats.records, 2);
    assert_eq!(stats.vectors, 2);
    assert_eq!(stats.documents, 1);

    let hits = manager
        .search_top_k("s1", "report.pdf", "shipping", 10)
        .await
        .expect("search");
    assert!(hits.iter().all(|hit| !hit.text.contains("Shipping")));
}

#[tokio::test]
async fn multi_document_search_and_listing() {
    let temp = TempDir::new().expect("tempdir");
    let manager = manager(temp.path());

    manager
        .add_chunks("s1", "report.pdf", report_chunks())
        .await
        .expect("add report");
    manager
        .add_chunks("s1", "terms.pdf", vec!["Privacy comes first.".to_string()])
        .await
        .expect("add terms");

    assert_eq!(
        manager.indexed_documents("s1").await.expect("documents"),
        vec![
            DocumentSummary {
                doc_id: "report.pdf".to_string(),
                chunk_count: 5,
            },
            DocumentSummary {
                doc_id: "terms.pdf".to_string(),
                chunk_count: 1,
            },
        ]
    );

    let docs = vec![
        "terms.pdf".to_string(),
        "missing.pdf".to_string(),
        "report.pdf".to_string(),
    ];
    let results = manager
        .search_documents("s1", &docs, "privacy", 2)
        .await
        .expect("search documents");
    let order: Vec<&str> = results.iter().map(|d| d.doc_id.as_str()).collect();
    assert_eq!(order, vec!["terms.pdf", "report.pdf"]);
    assert_eq!(results[1].hits[0].chunk_index, 4);
}
