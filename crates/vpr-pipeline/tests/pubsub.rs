mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{catalog, image, Scene, ScriptedExtractor};
use vpr_core::Failure;
use vpr_pipeline::{
    PendingParams, Pipeline, PipelineConfig, PipelineError, PubSubIngress, Publisher, ResponseBody,
    HEADER,
};

#[derive(Default)]
struct Recorder {
    published: Mutex<Vec<(String, Vec<u8>)>>,
}

impl Recorder {
    fn bodies(&self) -> Vec<(String, ResponseBody)> {
        self.published
            .lock()
            .expect("recorder lock")
            .iter()
            .map(|(topic, payload)| {
                (
                    topic.clone(),
                    serde_json::from_slice(payload).expect("json body"),
                )
            })
            .collect()
    }
}

impl Publisher for Recorder {
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), PipelineError> {
        self.published
            .lock()
            .map_err(|e| PipelineError::Publish(e.to_string()))?
            .push((topic.to_string(), payload.to_vec()));
        Ok(())
    }
}

fn frames(identity: &str, image: Vec<u8>) -> Vec<Vec<u8>> {
    vec![
        HEADER.to_vec(),
        identity.as_bytes().to_vec(),
        image,
        b"480".to_vec(),
        b"640".to_vec(),
        b"525".to_vec(),
        b"525".to_vec(),
        b"320".to_vec(),
        b"240".to_vec(),
    ]
}

fn pipeline(pending: PendingParams) -> Result<Arc<Pipeline>, PipelineError> {
    let config = PipelineConfig {
        pending,
        ..Default::default()
    };
    Ok(Arc::new(
        Pipeline::builder(catalog())
            .config(config)
            .extractor(ScriptedExtractor::shared())
            .build()?,
    ))
}

#[tokio::test]
async fn test_result_published_on_identity_topic() -> Result<(), PipelineError> {
    let pipeline = pipeline(PendingParams::default())?;
    let recorder = Arc::new(Recorder::default());
    let ingress = PubSubIngress::new(Arc::clone(&pipeline), recorder.clone(), "vpr/results");

    let body = ingress
        .handle(frames("phone-1", image(Scene::Match)))
        .await?
        .expect("answered");
    assert_eq!(body.status, "ok");

    let published = recorder.bodies();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].0, "vpr/results/phone-1");
    let localization = published[0].1.localization.clone().expect("localized");
    assert_eq!(localization.labels, vec!["entrance".to_string()]);
    assert!(pipeline.pending().is_empty());
    pipeline.shutdown();
    Ok(())
}

#[tokio::test]
async fn test_failures_are_published_too() -> Result<(), PipelineError> {
    let pipeline = pipeline(PendingParams::default())?;
    let recorder = Arc::new(Recorder::default());
    let ingress = PubSubIngress::new(Arc::clone(&pipeline), recorder.clone(), "vpr");

    ingress.handle(frames("a", image(Scene::Blank))).await?;
    let mut bad = frames("b", image(Scene::Match));
    bad[5] = b"not-a-number".to_vec();
    ingress.handle(bad).await?;
    // no identity, nobody to answer
    let dropped = ingress.handle(vec![b"junk".to_vec()]).await?;
    assert!(dropped.is_none());

    let published = recorder.bodies();
    assert_eq!(published.len(), 2);
    assert_eq!(published[0].0, "vpr/a");
    assert_eq!(published[0].1.status, "no_features_extracted");
    assert_eq!(published[1].0, "vpr/b");
    assert_eq!(published[1].1.status, "invalid_query");
    pipeline.shutdown();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_timeout_then_late_completion() -> Result<(), PipelineError> {
    let pipeline = pipeline(PendingParams {
        max_pending: 4,
        timeout_ms: 50,
    })?;
    let recorder = Arc::new(Recorder::default());
    let ingress = PubSubIngress::new(Arc::clone(&pipeline), recorder.clone(), "vpr");

    let body = ingress
        .handle(frames("slow", image(Scene::Slow)))
        .await?
        .expect("answered");
    assert_eq!(body.status, "pending_request_timeout");
    assert!(pipeline.pending().is_empty());

    // let the pipeline finish the abandoned session
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(recorder.bodies().len(), 1);
    assert!(pipeline.pending().is_empty());

    // and it still serves new sessions
    let body = ingress
        .handle(frames("fast", image(Scene::Match)))
        .await?
        .expect("answered");
    assert_eq!(body.status, "ok");
    pipeline.shutdown();
    Ok(())
}

#[tokio::test]
async fn test_pending_capacity() -> Result<(), PipelineError> {
    let pipeline = pipeline(PendingParams {
        max_pending: 1,
        timeout_ms: 5_000,
    })?;

    let (_, first) = pipeline
        .submit_pending(image(Scene::Slow), common::camera())
        .expect("first request admitted");
    let second = pipeline.submit_pending(image(Scene::Match), common::camera());
    assert!(matches!(second, Err(Failure::Overloaded)));

    let response = first.wait(Duration::from_secs(5)).await.expect("completes");
    assert!(response.outcome.is_ok());
    assert!(pipeline
        .submit_pending(image(Scene::Match), common::camera())
        .is_ok());
    pipeline.shutdown();
    Ok(())
}
