mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{catalog, image, is_monotonic, Scene, ScriptedExtractor};
use vpr_core::{Failure, Window};
use vpr_pipeline::{PendingParams, Pipeline, PipelineConfig, PipelineError};

fn pipeline() -> Result<Pipeline, PipelineError> {
    Pipeline::builder(catalog())
        .extractor(ScriptedExtractor::shared())
        .build()
}

#[tokio::test]
async fn test_blank_image_has_no_features() -> Result<(), PipelineError> {
    let pipeline = pipeline()?;
    let response = pipeline.locate(image(Scene::Blank), common::camera()).await;
    assert_eq!(response.outcome, Err(Failure::NoFeaturesExtracted));
    assert!(response.session.features.end.is_some());
    assert!(response.session.words.start.is_none());
    assert!(response.session.overall.end.is_some());
    pipeline.shutdown();
    Ok(())
}

#[tokio::test]
async fn test_bundled_extractor_on_flat_image() -> Result<(), PipelineError> {
    let pipeline = Pipeline::builder(catalog()).build()?;
    let response = pipeline.locate(image(Scene::Blank), common::camera()).await;
    assert_eq!(response.outcome, Err(Failure::NoFeaturesExtracted));
    pipeline.shutdown();
    Ok(())
}

#[tokio::test]
async fn test_unobserved_words_have_no_candidates() -> Result<(), PipelineError> {
    let pipeline = pipeline()?;
    let response = pipeline.locate(image(Scene::Unobserved), common::camera()).await;
    assert_eq!(response.outcome, Err(Failure::NoCandidateSignatures));
    assert!(response.session.signatures.end.is_some());
    assert!(response.session.perspective.start.is_none());
    pipeline.shutdown();
    Ok(())
}

#[tokio::test]
async fn test_ambiguous_descriptors_match_no_word() -> Result<(), PipelineError> {
    let pipeline = pipeline()?;
    let response = pipeline.locate(image(Scene::NoWords), common::camera()).await;
    assert_eq!(response.outcome, Err(Failure::NoWordMatches));
    pipeline.shutdown();
    Ok(())
}

#[tokio::test]
async fn test_matching_query_recovers_pose_and_labels() -> Result<(), PipelineError> {
    let pipeline = pipeline()?;
    let response = pipeline.locate(image(Scene::Match), common::camera()).await;

    let localization = response.outcome.clone().expect("query should localize");
    assert_eq!(localization.signature, 0);
    assert_eq!(localization.db_id, 0);
    assert!(localization.inliers >= 3);
    let truth = common::signature_pose();
    assert!(localization.pose.translation_error(&truth) < 1e-2);
    assert!(localization.pose.rotation_error(&truth) < 1e-3);
    assert_eq!(localization.labels, vec!["entrance".to_string()]);

    assert_eq!(response.session.timeline().iter().flatten().count(), 10);
    assert!(is_monotonic(&response.session));

    let body = response.to_body();
    assert_eq!(body.status, "ok");
    assert!(body.timings_ms.contains_key("perspective"));
    pipeline.shutdown();
    Ok(())
}

#[tokio::test]
async fn test_undecodable_image() -> Result<(), PipelineError> {
    let pipeline = pipeline()?;
    let response = pipeline
        .locate(b"GIF89a but not really".to_vec(), common::camera())
        .await;
    assert!(matches!(response.outcome, Err(Failure::DecodeFailure(_))));
    assert_eq!(response.to_body().status, "decode_failure");
    pipeline.shutdown();
    Ok(())
}

#[tokio::test]
async fn test_stage_panic_becomes_one_failure() -> Result<(), PipelineError> {
    let pipeline = pipeline()?;
    let response = pipeline.locate(image(Scene::Panic), common::camera()).await;
    match response.outcome {
        Err(Failure::StageFault { stage, reason }) => {
            assert_eq!(stage, "features");
            assert!(reason.contains("scripted extractor fault"));
        }
        other => panic!("expected a stage fault, got {other:?}"),
    }

    // the worker survives the panic
    let response = pipeline.locate(image(Scene::Match), common::camera()).await;
    assert!(response.outcome.is_ok());
    pipeline.shutdown();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_sessions_get_one_response_each() -> Result<(), PipelineError> {
    let pipeline = Arc::new(pipeline()?);
    let scenes = [Scene::Match, Scene::Blank, Scene::Unobserved, Scene::NoWords];

    let mut tasks = tokio::task::JoinSet::new();
    for i in 0..24 {
        let pipeline = Arc::clone(&pipeline);
        let scene = scenes[i % scenes.len()];
        tasks.spawn(async move {
            let response = pipeline.locate(image(scene), common::camera()).await;
            (scene, response)
        });
    }

    let mut ids = HashSet::new();
    while let Some(joined) = tasks.join_next().await {
        let (scene, response) = joined.expect("task completes");
        assert!(ids.insert(response.session.id), "duplicate session id");
        assert!(is_monotonic(&response.session));
        assert!(response.session.elapsed(Window::Overall).is_some());
        match scene {
            Scene::Match => assert!(response.outcome.is_ok()),
            Scene::Blank => assert_eq!(response.outcome, Err(Failure::NoFeaturesExtracted)),
            Scene::Unobserved => {
                assert_eq!(response.outcome, Err(Failure::NoCandidateSignatures))
            }
            Scene::NoWords => assert_eq!(response.outcome, Err(Failure::NoWordMatches)),
            _ => unreachable!(),
        }
    }
    assert_eq!(ids.len(), 24);
    pipeline.shutdown();
    Ok(())
}

#[tokio::test]
async fn test_locate_after_shutdown_fails_cleanly() -> Result<(), PipelineError> {
    let pipeline = pipeline()?;
    pipeline.shutdown();
    let response = pipeline.locate(image(Scene::Match), common::camera()).await;
    assert!(matches!(response.outcome, Err(Failure::StageFault { .. })));
    Ok(())
}

fn single_slot_pipeline(timeout_ms: u64) -> Result<Pipeline, PipelineError> {
    let config = PipelineConfig {
        queue_capacity: Some(1),
        pending: PendingParams {
            timeout_ms,
            ..Default::default()
        },
        ..Default::default()
    };
    Pipeline::builder(catalog())
        .config(config)
        .extractor(ScriptedExtractor::shared())
        .build()
}

#[tokio::test]
async fn test_full_entry_queue_turns_queries_away() -> Result<(), PipelineError> {
    let pipeline = single_slot_pipeline(5_000)?;

    let (a, b, c, d) = tokio::join!(
        pipeline.locate(image(Scene::Slow), common::camera()),
        pipeline.locate(image(Scene::Slow), common::camera()),
        pipeline.locate(image(Scene::Match), common::camera()),
        pipeline.locate(image(Scene::Match), common::camera()),
    );

    let mut turned_away = 0;
    for response in [a, b, c, d] {
        match response.outcome {
            Ok(_) => {}
            Err(Failure::Overloaded) => {
                turned_away += 1;
                let waited = response.session.elapsed(Window::Overall).expect("stamped");
                assert!(waited < Duration::from_millis(200), "waited {waited:?}");
            }
            Err(other) => panic!("unexpected failure {other}"),
        }
    }
    // one session in the extractor and one queued at most
    assert!(turned_away >= 2, "only {turned_away} turned away");

    let response = pipeline.locate(image(Scene::Match), common::camera()).await;
    assert!(response.outcome.is_ok());
    pipeline.shutdown();
    Ok(())
}

#[tokio::test]
async fn test_pending_timeout_holds_with_bounded_queue() -> Result<(), PipelineError> {
    let pipeline = single_slot_pipeline(100)?;

    let started = Instant::now();
    let (a, b, c, d) = tokio::join!(
        pipeline.locate_pending(image(Scene::Slow), common::camera()),
        pipeline.locate_pending(image(Scene::Slow), common::camera()),
        pipeline.locate_pending(image(Scene::Slow), common::camera()),
        pipeline.locate_pending(image(Scene::Slow), common::camera()),
    );
    let elapsed = started.elapsed();

    assert!(elapsed < Duration::from_millis(280), "took {elapsed:?}");
    for response in [a, b, c, d] {
        assert!(matches!(
            response.outcome,
            Err(Failure::PendingRequestTimeout { .. } | Failure::Overloaded)
        ));
    }
    pipeline.shutdown();
    Ok(())
}
