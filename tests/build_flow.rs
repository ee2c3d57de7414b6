//! End-to-end build orchestration through the public API.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use imageferry::test_support::{
    FakeBuilderClient, RecordingProgress, builder_record, image_record,
};
use imageferry::{
    BuildError, BuildOrchestrator, BuilderSpec, BuilderState, ClientFuture, ImageState,
    ProviderError, RemoteRunner,
};

#[derive(Debug, Default)]
struct CountingRunner {
    calls: AtomicUsize,
    exit_status: i32,
}

impl CountingRunner {
    fn failing(exit_status: i32) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            exit_status,
        }
    }
}

impl RemoteRunner for CountingRunner {
    fn run<'a>(&'a self, _address: &'a str, _command: &'a str) -> ClientFuture<'a, i32> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let status = self.exit_status;
        Box::pin(async move { Ok::<i32, ProviderError>(status) })
    }
}

fn spec() -> BuilderSpec {
    BuilderSpec::builder()
        .name("nightly-build-host")
        .source_image_name("base-image")
        .instance_type("stream.standard.medium")
        .build()
        .unwrap_or_else(|err| panic!("spec should validate: {err}"))
}

#[tokio::test]
async fn a_full_build_produces_an_available_image_and_removes_the_host() {
    let client = FakeBuilderClient::new();
    client.push_describe(Some(builder_record(
        "nightly-build-host",
        BuilderState::Pending,
        None,
    )));
    client.push_describe(Some(builder_record(
        "nightly-build-host",
        BuilderState::Running,
        Some("10.0.0.5"),
    )));
    client.push_image(None);
    client.push_image(Some(image_record("nightly", ImageState::Pending, None)));
    client.push_image(Some(image_record("nightly", ImageState::Available, None)));
    client.push_describe(Some(builder_record(
        "nightly-build-host",
        BuilderState::Running,
        Some("10.0.0.5"),
    )));
    client.push_describe(Some(builder_record(
        "nightly-build-host",
        BuilderState::Stopped,
        None,
    )));
    let progress = Arc::new(RecordingProgress::default());
    let mut orchestrator =
        BuildOrchestrator::new(client, CountingRunner::default(), Arc::clone(&progress) as _)
            .with_poll_interval(Duration::from_millis(1));

    let record = orchestrator
        .execute(&spec(), "nightly")
        .await
        .unwrap_or_else(|err| panic!("build should succeed: {err}"));

    assert_eq!(record.name, "nightly");
    assert_eq!(record.state, ImageState::Available);
    let client = orchestrator.lifecycle().client();
    assert_eq!(client.stop_calls(), 1);
    assert_eq!(client.delete_calls(), 1);
    assert!(
        progress
            .lines()
            .iter()
            .any(|line| line.contains("address: 10.0.0.5"))
    );
}

#[tokio::test]
async fn a_failed_capture_tears_the_host_down_and_reports_the_status() {
    let client = FakeBuilderClient::new();
    client.push_describe(Some(builder_record(
        "nightly-build-host",
        BuilderState::Running,
        Some("10.0.0.5"),
    )));
    client.push_describe(Some(builder_record(
        "nightly-build-host",
        BuilderState::Stopped,
        None,
    )));
    let runner = CountingRunner::failing(1);
    let progress = Arc::new(RecordingProgress::default());
    let mut orchestrator = BuildOrchestrator::new(client, runner, Arc::clone(&progress) as _)
        .with_poll_interval(Duration::from_millis(1));

    let err = orchestrator
        .execute(&spec(), "nightly")
        .await
        .expect_err("a nonzero capture exit fails the build");

    assert!(matches!(err, BuildError::CaptureFailed { status: 1 }));
    assert_eq!(orchestrator.lifecycle().client().delete_calls(), 1);
}
