//! End-to-end query evaluation against a scripted backend, covering the
//! SELECT/ASK/CONSTRUCT/DESCRIBE result shapes and the translator output.

mod support;

use futures::StreamExt;
use quadsql_common::EngineConfig;
use quadsql_engine::{QueryResults, SparqlEngine};
use quadsql_model::vocab::xsd;
use quadsql_model::{Literal, NamedNode, Term};
use quadsql_storage::SqlValue;
use std::sync::Arc;
use support::{
    assert_aliases_declared, assert_balanced_parens, bound_term, term_row, unbound_term,
    MockBackend,
};

fn engine(backend: &Arc<MockBackend>) -> SparqlEngine {
    let backend: Arc<MockBackend> = Arc::clone(backend);
    let backend: Arc<dyn quadsql_storage::SpaceBackend> = backend;
    SparqlEngine::new(backend, EngineConfig::default())
}

async fn solutions_of(results: QueryResults) -> Vec<quadsql_engine::QuerySolution> {
    let QueryResults::Solutions(stream) = results else {
        panic!("expected solutions");
    };
    stream
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .collect::<Result<_, _>>()
        .unwrap()
}

#[tokio::test]
async fn select_binds_literals_with_language_tags() {
    let backend = Arc::new(MockBackend::new(vec![
        vec![
            term_row(1, "http://ex/a", "U"),
            term_row(2, "http://ex/p", "U"),
        ],
        vec![bound_term("hello", "L", Some("en"), None)],
    ]));
    let engine = engine(&backend);

    let results = engine
        .execute_query(
            "s1",
            r#"SELECT ?v WHERE { <http://ex/a> <http://ex/p> ?v FILTER(LANG(?v) = "en") }"#,
        )
        .await
        .unwrap();
    let solutions = solutions_of(results).await;
    assert_eq!(solutions.len(), 1);
    assert_eq!(
        solutions[0].get("v"),
        Some(&Literal::new_language_tagged_literal_unchecked("hello", "en").into())
    );

    let statements = backend.statements();
    assert_eq!(statements.len(), 2);
    let sql = &statements[1];
    assert_balanced_parens(sql);
    assert_aliases_declared(sql);
    assert!(sql.contains("quad_0.subject_id = 1"));
    assert!(sql.contains("quad_0.predicate_id = 2"));
    assert!(sql.contains("(COALESCE(o_term_0.lang, '') = 'en')"));
    assert!(sql.contains("LEFT JOIN s1__rdf_term AS o_dt_0"));
}

#[tokio::test]
async fn unknown_bound_terms_compile_to_never_match() {
    let backend = Arc::new(MockBackend::new(vec![
        vec![term_row(2, "http://ex/p", "U")],
        vec![],
    ]));
    let engine = engine(&backend);

    let results = engine
        .execute_query(
            "s1",
            "SELECT ?v WHERE { <http://ex/missing> <http://ex/p> ?v }",
        )
        .await
        .unwrap();
    assert!(solutions_of(results).await.is_empty());
    assert!(backend.statements()[1].contains("1 = 0"));
}

#[tokio::test]
async fn transitive_path_emits_a_recursive_cte() {
    let backend = Arc::new(MockBackend::new(vec![
        vec![
            term_row(1, "http://ex/a", "U"),
            term_row(2, "http://ex/knows", "U"),
        ],
        vec![
            bound_term("http://ex/b", "U", None, None),
            bound_term("http://ex/c", "U", None, None),
            bound_term("http://ex/d", "U", None, None),
        ],
    ]));
    let engine = engine(&backend);

    let results = engine
        .execute_query("s1", "SELECT ?x WHERE { <http://ex/a> <http://ex/knows>+ ?x }")
        .await
        .unwrap();
    let solutions = solutions_of(results).await;
    let bound: Vec<String> = solutions
        .iter()
        .map(|s| match s.get("x") {
            Some(Term::NamedNode(n)) => n.as_str().to_owned(),
            other => panic!("expected an IRI, got {other:?}"),
        })
        .collect();
    assert_eq!(
        bound,
        vec!["http://ex/b", "http://ex/c", "http://ex/d"]
    );

    let sql = &backend.statements()[1];
    assert_balanced_parens(sql);
    assert!(sql.contains("WITH RECURSIVE path_cte_0"));
    assert!(sql.contains("r.depth < 10"));
    assert!(sql.contains("NOT (q.object_id = ANY(r.path))"));
    assert!(sql.contains("path_0.start_node = 1"));
}

#[tokio::test]
async fn negated_paths_keep_pairs_that_also_have_a_negated_edge() {
    // Store sketch: <a> <p1> <b> and <a> <p2> <b>, with p1 negated. The p2
    // edge satisfies !(<p1>), so (a, b) must survive even though a p1 edge
    // connects the same pair. The scripted row is what the per-edge
    // NOT IN filter yields for the p2 quad.
    let backend = Arc::new(MockBackend::new(vec![
        vec![
            term_row(1, "http://ex/a", "U"),
            term_row(2, "http://ex/p1", "U"),
        ],
        vec![bound_term("http://ex/b", "U", None, None)],
    ]));
    let engine = engine(&backend);

    let results = engine
        .execute_query("s1", "SELECT ?x WHERE { <http://ex/a> !(<http://ex/p1>) ?x }")
        .await
        .unwrap();
    let solutions = solutions_of(results).await;
    assert_eq!(solutions.len(), 1);
    assert_eq!(
        solutions[0].get("x"),
        Some(&NamedNode::new_unchecked("http://ex/b").into())
    );

    let sql = &backend.statements()[1];
    assert_balanced_parens(sql);
    assert!(sql.contains("predicate_id NOT IN (2)"));
    // A correlated exclusion over all edges between the pair would drop
    // (a, b) because of the p1 edge; the condition must stay per row.
    assert!(!sql.contains("NOT EXISTS"));
}

#[tokio::test]
async fn sum_with_having_lands_in_the_having_clause() {
    let backend = Arc::new(MockBackend::new(vec![
        vec![
            term_row(1, "http://ex/a", "U"),
            term_row(2, "http://ex/p", "U"),
        ],
        vec![vec![SqlValue::Int(6)]],
    ]));
    let engine = engine(&backend);

    let results = engine
        .execute_query(
            "s1",
            "SELECT (SUM(?v) AS ?s) WHERE { <http://ex/a> <http://ex/p> ?v } HAVING (?s > 5)",
        )
        .await
        .unwrap();
    let solutions = solutions_of(results).await;
    assert_eq!(solutions.len(), 1);
    assert_eq!(
        solutions[0].get("s"),
        Some(&Literal::new_typed_literal("6", xsd::INTEGER).into())
    );

    let sql = &backend.statements()[1];
    assert_balanced_parens(sql);
    assert!(sql.contains("SUM(CAST(o_term_0.term_text AS DECIMAL))"));
    assert!(sql.contains(" HAVING "));
    assert!(!sql.contains("GROUP BY"));
}

#[tokio::test]
async fn optional_conditions_live_in_the_join_not_the_where() {
    let backend = Arc::new(MockBackend::new(vec![
        vec![
            term_row(1, "http://ex/a", "U"),
            term_row(2, "http://ex/p1", "U"),
        ],
        vec![{
            let mut row = bound_term("x", "L", None, None);
            row.extend(unbound_term());
            row
        }],
    ]));
    let engine = engine(&backend);

    // <http://ex/r> is not in the dictionary: the optional side can never
    // match, but the required side must survive.
    let results = engine
        .execute_query(
            "s1",
            "SELECT ?p ?q WHERE { <http://ex/a> <http://ex/p1> ?p \
             OPTIONAL { <http://ex/a> <http://ex/r> ?q } }",
        )
        .await
        .unwrap();
    let solutions = solutions_of(results).await;
    assert_eq!(solutions.len(), 1);
    assert_eq!(
        solutions[0].get("p"),
        Some(&Literal::new_simple_literal("x").into())
    );
    assert_eq!(solutions[0].get("q"), None);

    let sql = &backend.statements()[1];
    assert_balanced_parens(sql);
    assert_aliases_declared(sql);
    let where_clause = sql.split(" WHERE ").last().unwrap();
    assert!(sql.contains("LEFT JOIN"));
    // The never-match constraint sits in an ON clause, not in WHERE.
    assert!(!where_clause.contains("1 = 0"));
    let on_section = sql.split("LEFT JOIN").nth(2).unwrap();
    assert!(on_section.contains("1 = 0"));
}

#[tokio::test]
async fn ask_over_an_empty_store_is_false() {
    let backend = Arc::new(MockBackend::new(vec![vec![]]));
    let engine = engine(&backend);

    let results = engine
        .execute_query("s1", "ASK { ?s ?p ?o }")
        .await
        .unwrap();
    let QueryResults::Boolean(answer) = results else {
        panic!("expected a boolean");
    };
    assert!(!answer);

    let statements = backend.statements();
    assert_eq!(statements.len(), 1);
    assert!(statements[0].ends_with("LIMIT 1"));
}

#[tokio::test]
async fn empty_bgp_yields_one_solution_without_bindings() {
    let backend = Arc::new(MockBackend::new(vec![vec![vec![SqlValue::Int(1)]]]));
    let engine = engine(&backend);

    let results = engine.execute_query("s1", "SELECT * WHERE {}").await.unwrap();
    let solutions = solutions_of(results).await;
    assert_eq!(solutions.len(), 1);
    assert_eq!(solutions[0].iter().count(), 0);
}

#[tokio::test]
async fn limit_zero_renders_and_returns_nothing() {
    let backend = Arc::new(MockBackend::new(vec![vec![]]));
    let engine = engine(&backend);

    let results = engine
        .execute_query("s1", "SELECT ?s WHERE { ?s ?p ?o } LIMIT 0")
        .await
        .unwrap();
    assert!(solutions_of(results).await.is_empty());
    assert!(backend.statements()[0].ends_with("LIMIT 0"));
}

#[tokio::test]
async fn construct_instantiates_the_template() {
    let backend = Arc::new(MockBackend::new(vec![
        vec![term_row(2, "http://ex/p", "U")],
        vec![{
            let mut row = bound_term("http://ex/a", "U", None, None);
            row.extend(bound_term("http://ex/b", "U", None, None));
            row
        }],
    ]));
    let engine = engine(&backend);

    let results = engine
        .execute_query(
            "s1",
            "CONSTRUCT { ?s <http://ex/new> ?o } WHERE { ?s <http://ex/p> ?o }",
        )
        .await
        .unwrap();
    let QueryResults::Graph(stream) = results else {
        panic!("expected a graph");
    };
    let triples: Vec<_> = stream
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(triples.len(), 1);
    assert_eq!(triples[0].predicate.as_str(), "http://ex/new");
    assert_eq!(
        triples[0].object,
        Term::from(NamedNode::new_unchecked("http://ex/b"))
    );
}

#[tokio::test]
async fn describe_lists_all_quads_of_the_subject() {
    let backend = Arc::new(MockBackend::new(vec![
        // Resolution of the described IRI.
        vec![term_row(1, "http://ex/a", "U")],
        // All quads whose subject is the described id.
        vec![vec![
            SqlValue::Text("http://ex/a".to_owned()),
            SqlValue::Text("U".to_owned()),
            SqlValue::Text("http://ex/p".to_owned()),
            SqlValue::Text("hello".to_owned()),
            SqlValue::Text("L".to_owned()),
            SqlValue::Text("en".to_owned()),
            SqlValue::Null,
        ]],
    ]));
    let engine = engine(&backend);

    let results = engine
        .execute_query("s1", "DESCRIBE <http://ex/a>")
        .await
        .unwrap();
    let QueryResults::Graph(stream) = results else {
        panic!("expected a graph");
    };
    let triples: Vec<_> = stream
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(triples.len(), 1);
    assert_eq!(triples[0].subject.to_string(), "<http://ex/a>");
    assert_eq!(
        triples[0].object,
        Term::from(Literal::new_language_tagged_literal_unchecked("hello", "en"))
    );
    assert!(backend.statements()[1].contains("quad_0.subject_id IN (1)"));
}
