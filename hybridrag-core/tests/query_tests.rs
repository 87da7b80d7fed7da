//! End-to-end query tests: modes, budgets, chunk dedup, reranking and the
//! no-context fallback.

mod common;

use std::sync::Arc;

use common::*;
use futures::StreamExt;
use hybridrag_core::core::mock_providers::{DeterministicEmbedder, MockLanguageModel, ScriptedReranker};
use hybridrag_core::core::RerankScore;
use hybridrag_core::storage::memory::cosine_similarity;
use hybridrag_core::text::{Tokenizer, WordTokenizer};
use hybridrag_core::{EntityKey, QueryMode, QueryParam, RagError, NO_CONTEXT_RESPONSE};
use tokio_util::sync::CancellationToken;

const FLEET_DOC: &str = "Zephyr met the Quasar crew at dawn.";

fn fleet_model() -> MockLanguageModel {
    language_model().with_response(
        "met the Quasar crew",
        extraction_response(&[
            entity_line("Zephyr", "person", "Zephyr is the captain of the Quasar."),
            entity_line("Quasar", "organization", "Quasar is a starship crew."),
            relation_line(
                "Zephyr",
                "Quasar",
                "command, leadership",
                "Zephyr commands the Quasar crew.",
                1.0,
            ),
        ]),
    )
}

fn context_param(mode: QueryMode) -> QueryParam {
    QueryParam {
        mode,
        only_need_context: true,
        cosine_threshold: 0.1,
        ..Default::default()
    }
}

#[tokio::test]
async fn empty_knowledge_base_answers_with_the_sentinel() {
    let t = default_rag(fleet_model());
    let response = t.rag.query("Who captains the Quasar?", &QueryParam::default()).await.unwrap();
    assert_eq!(response.text(), Some(NO_CONTEXT_RESPONSE));
    assert!(response.is_no_context());
    assert!(response.references.is_empty());
}

#[tokio::test]
async fn local_context_renders_every_section() {
    let t = default_rag(fleet_model());
    t.rag.insert_document(FLEET_DOC, None, Some("logs/fleet.txt")).await.unwrap();

    let param = QueryParam {
        low_level_keywords: vec!["Zephyr".to_string()],
        ..context_param(QueryMode::Local)
    };
    let response = t.rag.query("Who is Zephyr?", &param).await.unwrap();
    let context = response.context.as_ref().unwrap();
    let text = response.text().unwrap();

    assert_eq!(text, context.context_text);
    assert!(text.starts_with("-----Relationships-----\n"));
    assert!(text.contains(
        "Zephyr -> Quasar: command, leadership - Zephyr commands the Quasar crew."
    ));
    assert!(text.contains("-----Entities-----\n"));
    assert!(text.contains("Zephyr (person): Zephyr is the captain of the Quasar."));
    assert!(text.contains("Quasar (organization): Quasar is a starship crew."));
    assert!(text.ends_with("-----Sources-----\n[fleet.txt] Zephyr met the Quasar crew at dawn."));

    assert_eq!(response.references.len(), 1);
    assert_eq!(response.references[0].reference_id, "1");
    assert_eq!(response.references[0].file_path, "logs/fleet.txt");
    // Caller keywords skip extraction
    assert_eq!(t.llm.calls_matching(KEYWORD_MARKER), 0);
}

#[tokio::test]
async fn generated_answer_uses_extracted_keywords() {
    let t = default_rag(fleet_model());
    t.rag.insert_document(FLEET_DOC, None, None).await.unwrap();

    let query = "Who commands the Quasar?";
    let response = t.rag.query(query, &QueryParam::default()).await.unwrap();
    assert_eq!(response.text(), Some(ANSWER));
    assert!(!response.is_streaming());
    assert_eq!(response.keywords.low_level, vec!["Zephyr".to_string()]);
    assert_eq!(t.llm.calls_matching(KEYWORD_MARKER), 1);
    assert_eq!(t.llm.prompts().last().map(String::as_str), Some(query));
}

#[tokio::test]
async fn streaming_answer_yields_fragments() {
    let t = default_rag(fleet_model());
    t.rag.insert_document(FLEET_DOC, None, None).await.unwrap();

    let param = QueryParam {
        stream: true,
        ..Default::default()
    };
    let response = t.rag.query("Who commands the Quasar?", &param).await.unwrap();
    assert!(response.is_streaming());
    let hybridrag_core::QueryOutput::Stream(stream) = response.content else {
        panic!("expected a stream");
    };
    let fragments: Vec<String> = stream.map(|f| f.unwrap()).collect().await;
    assert_eq!(fragments.concat(), ANSWER);
}

#[tokio::test]
async fn unparseable_keywords_fall_back_to_the_raw_query() {
    let llm = MockLanguageModel::new()
        .with_response(KEYWORD_MARKER, "no keywords here")
        .with_response(
            "met the Quasar crew",
            extraction_response(&[entity_line("Zephyr", "person", "Zephyr is a captain.")]),
        );
    let t = default_rag(llm);
    t.rag.insert_document(FLEET_DOC, None, None).await.unwrap();

    let response = t
        .rag
        .query("Zephyr captain", &context_param(QueryMode::Mix))
        .await
        .unwrap();
    assert!(response.keywords.is_empty());
    let context = response.context.unwrap();
    assert_eq!(context.entities[0].name, "Zephyr");
}

#[tokio::test]
async fn naive_mode_searches_chunks_only() {
    let t = default_rag(fleet_model());
    t.rag.insert_document(FLEET_DOC, None, None).await.unwrap();

    let response = t
        .rag
        .query("Quasar crew at dawn", &context_param(QueryMode::Naive))
        .await
        .unwrap();
    let context = response.context.unwrap();
    assert!(context.entities.is_empty());
    assert!(context.relationships.is_empty());
    assert_eq!(context.chunks.len(), 1);
    assert_eq!(t.llm.calls_matching(KEYWORD_MARKER), 0);
}

#[tokio::test]
async fn global_mode_starts_from_relationships() {
    let llm = fleet_model().with_response(
        "keeps the night watch",
        extraction_response(&[entity_line(
            "Lyra",
            "person",
            "Lyra commands the night watch.",
        )]),
    );
    let t = default_rag(llm);
    t.rag.insert_document(FLEET_DOC, None, Some("fleet.txt")).await.unwrap();
    t.rag
        .insert_document("Lyra keeps the night watch.", None, Some("watch.txt"))
        .await
        .unwrap();

    let param = QueryParam {
        high_level_keywords: vec!["command leadership".to_string()],
        ..context_param(QueryMode::Global)
    };
    let context = t
        .rag
        .query("Who is in command?", &param)
        .await
        .unwrap()
        .context
        .unwrap();

    assert_eq!(context.mode, QueryMode::Global);
    assert_eq!(context.relationships.len(), 1);
    assert_eq!(context.relationships[0].weight, 1.0);
    let mut names: Vec<&str> = context.entities.iter().map(|e| e.name.as_str()).collect();
    names.sort_unstable();
    // Entities only arrive as endpoints of matched relationships
    assert_eq!(names, vec!["Quasar", "Zephyr"]);
    assert_eq!(context.chunks.len(), 1);
    assert_eq!(context.chunks[0].content, FLEET_DOC);
    assert_eq!(context.references.len(), 1);
    assert_eq!(context.references[0].file_path, "fleet.txt");
}

#[tokio::test]
async fn hybrid_builds_the_same_context_as_mix() {
    let t = default_rag(fleet_model());
    t.rag.insert_document(FLEET_DOC, None, None).await.unwrap();

    let keywords = |mode| QueryParam {
        high_level_keywords: vec!["command".to_string()],
        low_level_keywords: vec!["Zephyr".to_string()],
        ..context_param(mode)
    };
    let mix = t.rag.query("Who leads?", &keywords(QueryMode::Mix)).await.unwrap();
    let hybrid = t.rag.query("Who leads?", &keywords(QueryMode::Hybrid)).await.unwrap();
    assert_eq!(mix.text(), hybrid.text());
}

#[tokio::test]
async fn chunk_reached_by_two_paths_appears_once_with_best_score() {
    let content = "Nimbus is a cloud observatory on the ridge.";
    let llm = language_model().with_response(
        "cloud observatory on the ridge",
        extraction_response(&[entity_line(
            "Nimbus",
            "organization",
            "Nimbus is a cloud observatory.",
        )]),
    );
    let t = default_rag(llm);
    t.rag.insert_document(content, None, None).await.unwrap();

    let query = "Nimbus cloud observatory";
    let param = QueryParam {
        low_level_keywords: vec!["Nimbus".to_string()],
        cosine_threshold: -1.0,
        ..context_param(QueryMode::Mix)
    };
    let context = t.rag.query(query, &param).await.unwrap().context.unwrap();
    assert_eq!(context.chunks.len(), 1);

    let entity = t
        .rag
        .storage()
        .graph
        .get_node(&EntityKey::from_name("Nimbus"))
        .await
        .unwrap()
        .unwrap();
    let via_entity = cosine_similarity(
        &t.embedder.vector_for("Nimbus"),
        &t.embedder.vector_for(&entity.embedding_text()),
    );
    let via_search = cosine_similarity(&t.embedder.vector_for(query), &t.embedder.vector_for(content));
    let expected = via_entity.max(via_search);
    assert!((context.chunks[0].score - expected).abs() < 1e-5);
}

#[tokio::test]
async fn budgets_bound_every_section_and_flag_truncation() {
    let names = ["Altair", "Bellatrix", "Capella", "Deneb", "Electra", "Fomalhaut", "Gemma", "Hadar"];
    let mut lines: Vec<String> = names
        .iter()
        .map(|n| {
            entity_line(
                n,
                "star",
                &format!("{n} is a bright star charted by the survey with a long and careful record."),
            )
        })
        .collect();
    for pair in names.windows(2) {
        lines.push(relation_line(
            pair[0],
            pair[1],
            "neighbor",
            &format!("{} lies near {} in the survey charts.", pair[0], pair[1]),
            1.0,
        ));
    }
    let llm = language_model().with_response("Star survey", extraction_response(&lines));
    let t = default_rag(llm);
    t.rag
        .insert_document("Star survey of the northern sky.", None, None)
        .await
        .unwrap();

    let param = QueryParam {
        low_level_keywords: vec!["star".to_string()],
        high_level_keywords: vec!["survey".to_string()],
        cosine_threshold: -1.0,
        max_relation_tokens: 25,
        max_entity_tokens: 40,
        max_total_tokens: 120,
        ..context_param(QueryMode::Mix)
    };
    let context = t.rag.query("bright stars", &param).await.unwrap().context.unwrap();
    let tokenizer = WordTokenizer::new().unwrap();

    assert!(context.token_usage.relationships <= 25);
    assert!(context.token_usage.entities <= 40);
    assert!(tokenizer.count_tokens(&context.context_text) <= 120);
    assert_eq!(
        context.token_usage.total,
        tokenizer.count_tokens(&context.context_text)
    );
    assert!(context.truncation.entities);
    assert!(context.truncation.relationships);
    assert!(context.is_truncated());
    assert!(context.entities.len() < names.len());
}

#[tokio::test]
async fn total_ceiling_drops_chunks_first() {
    let t = default_rag(fleet_model());
    t.rag.insert_document(FLEET_DOC, None, None).await.unwrap();

    let param = QueryParam {
        low_level_keywords: vec!["Zephyr".to_string()],
        max_total_tokens: 20,
        ..context_param(QueryMode::Local)
    };
    let context = t.rag.query("Zephyr", &param).await.unwrap().context.unwrap();
    let tokenizer = WordTokenizer::new().unwrap();
    assert!(tokenizer.count_tokens(&context.context_text) <= 20);
    assert!(context.chunks.is_empty());
    assert!(context.truncation.chunks);
}

/// Three chunks whose similarity to the query is 0.9, 0.8 and 0.7
fn chronicle_rag(reranker: Option<Arc<dyn hybridrag_core::Reranker>>) -> TestRag {
    let embedder = DeterministicEmbedder::new(4)
        .with_pinned("harbor chronicle", vec![1.0, 0.0, 0.0, 0.0])
        .with_pinned("Chronicle one: the harbor at dawn.", vec![0.9, 0.435_889_9, 0.0, 0.0])
        .with_pinned("Chronicle two: the harbor at noon.", vec![0.8, 0.6, 0.0, 0.0])
        .with_pinned("Chronicle three: the harbor at dusk.", vec![0.7, 0.714_142_8, 0.0, 0.0]);
    let llm = language_model().with_response("Chronicle", extraction_response(&[]));
    build_rag(llm, embedder, reranker, test_config())
}

const CHRONICLE_DOC: &str = "Chronicle one: the harbor at dawn.\n\nChronicle two: the harbor at noon.\n\nChronicle three: the harbor at dusk.";

fn chronicle_param() -> QueryParam {
    QueryParam {
        chunk_top_k: 2,
        pre_rerank_top_k: Some(3),
        ..context_param(QueryMode::Naive)
    }
}

fn chunk_contents(context: &hybridrag_core::QueryContext) -> Vec<&str> {
    context.chunks.iter().map(|c| c.content.as_str()).collect()
}

#[tokio::test]
async fn rerank_order_supersedes_similarity() {
    let reranker = Arc::new(ScriptedReranker::fixed(vec![
        RerankScore {
            index: 2,
            relevance_score: 0.95,
        },
        RerankScore {
            index: 0,
            relevance_score: 0.5,
        },
    ]));
    let t = chronicle_rag(Some(reranker.clone()));
    t.rag.insert_document(CHRONICLE_DOC, None, None).await.unwrap();

    let context = t
        .rag
        .query("harbor chronicle", &chronicle_param())
        .await
        .unwrap()
        .context
        .unwrap();
    assert_eq!(
        chunk_contents(&context),
        vec!["Chronicle three: the harbor at dusk.", "Chronicle one: the harbor at dawn."]
    );
    assert_eq!(context.chunks[0].rerank_score, Some(0.95));
    let submitted = reranker.calls();
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0][0], "Chronicle one: the harbor at dawn.");
}

#[tokio::test]
async fn rerank_failure_keeps_similarity_order() {
    let t = chronicle_rag(Some(Arc::new(ScriptedReranker::failing("service down"))));
    t.rag.insert_document(CHRONICLE_DOC, None, None).await.unwrap();

    let context = t
        .rag
        .query("harbor chronicle", &chronicle_param())
        .await
        .unwrap()
        .context
        .unwrap();
    assert_eq!(
        chunk_contents(&context),
        vec!["Chronicle one: the harbor at dawn.", "Chronicle two: the harbor at noon."]
    );
    assert!(context.chunks.iter().all(|c| c.rerank_score.is_none()));
}

#[tokio::test]
async fn disabled_rerank_is_not_called() {
    let reranker = Arc::new(ScriptedReranker::failing("must not be called"));
    let t = chronicle_rag(Some(reranker.clone()));
    t.rag.insert_document(CHRONICLE_DOC, None, None).await.unwrap();

    let param = QueryParam {
        enable_rerank: false,
        ..chronicle_param()
    };
    let context = t.rag.query("harbor chronicle", &param).await.unwrap().context.unwrap();
    assert_eq!(context.chunks.len(), 2);
    assert!(reranker.calls().is_empty());
}

#[tokio::test]
async fn cancelled_query_stops_before_retrieval() {
    let t = default_rag(fleet_model());
    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = t
        .rag
        .query_with_cancel("Who?", &QueryParam::default(), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::Cancelled { .. }));
}

#[tokio::test]
async fn empty_query_is_rejected() {
    let t = default_rag(fleet_model());
    let err = t.rag.query("   ", &QueryParam::default()).await.unwrap_err();
    assert!(matches!(err, RagError::Validation { .. }));
}
