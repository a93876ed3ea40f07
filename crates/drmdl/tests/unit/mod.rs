use std::{path::Path, sync::atomic::Ordering, time::Duration};

use drmdl::{
    acquire::TrackAcquirer, config::HttpConfig, pipeline::MediaProcessor, unit::UnitRunner,
    ContentUnit, ErrorKind, HttpClient, Ordinal, SeriesPosition, SubtitleTrack, TrackKind,
    UnitOutcome, UnitState,
};
use tokio_util::sync::CancellationToken;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

use crate::{common::*, AssertWrapper};

type Runner = UnitRunner<FakeCapture, FakeFetcher, FakeDecryptor, FakeMuxer>;

fn unit() -> ContentUnit {
    ContentUnit::episode(
        "271",
        "Navrat",
        "https://www.example.com/porad/33-comeback/epizoda/271",
        SeriesPosition {
            series: "Comeback".to_string(),
            season: Ordinal::Known(1),
            episode: Ordinal::Known(16),
        },
    )
}

fn runner(
    server: &MockServer,
    capture: FakeCapture,
    fetcher: FakeFetcher,
    temp_root: &Path,
) -> Runner {
    UnitRunner::new(
        capture,
        TrackAcquirer::new(fetcher, "bestvideo", "bestaudio"),
        MediaProcessor::new(FakeDecryptor::default(), FakeMuxer::default()),
        HttpClient::new(&HttpConfig::default()).assert_success(),
        reqwest::Client::new(),
        cdm_config(server),
    )
    .with_temp_root(temp_root)
}

async fn received(server: &MockServer, request_path: &str) -> bool {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .any(|request| request.url.path() == request_path)
}

async fn mount_happy_path(server: &MockServer) {
    mount_manifest(server, manifest(&[playready_pssh(), widevine_pssh()])).await;
    mount_license(server).await;
    mount_cdm(server, signing_and_content_keys()).await;
}

#[tokio::test]
async fn test_happy_path() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    mount_happy_path(&server).await;
    Mock::given(method("GET"))
        .and(path("/subtitles/cs.vtt"))
        .respond_with(ResponseTemplate::new(200).set_body_string("WEBVTT\n\n00:00.000 --> 00:01.000\nAhoj"))
        .mount(&server)
        .await;

    let temp = tempfile::tempdir()?;
    let temp_root = temp.path().join("work");
    let output = temp.path().join("Comeback - S01E16.mp4");

    let mut info = stream_info(&server);
    info.subtitles.push(SubtitleTrack {
        url: format!("{}/subtitles/cs.vtt", server.uri()),
        language: "cs".to_string(),
    });
    let runner = runner(&server, FakeCapture::new(info), FakeFetcher::default(), &temp_root);

    let run = runner
        .execute(&unit(), &output, &CancellationToken::new())
        .await;

    assert_eq!(run.result.unit_id, "271");
    assert_eq!(
        run.result.outcome,
        UnitOutcome::Done {
            path: output.clone(),
            skipped: false
        }
    );
    assert_eq!(
        run.history,
        vec![
            UnitState::Pending,
            UnitState::Resolving,
            UnitState::NegotiatingKeys,
            UnitState::Acquiring,
            UnitState::Decrypting,
            UnitState::Merging,
            UnitState::Done,
        ]
    );

    assert_eq!(
        std::fs::read_to_string(&output)?,
        "decrypted video+decrypted audio"
    );
    assert!(temp.path().join("Comeback - S01E16.cs.vtt").exists());

    let workdir = runner.workdir(&unit());
    assert!(file_names(&workdir)
        .iter()
        .all(|name| !name.contains(".enc_") && !name.contains(".dec_")));
    assert!(!workdir.exists());

    Ok(())
}

#[tokio::test]
async fn test_second_run_is_skipped() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    mount_happy_path(&server).await;

    let temp = tempfile::tempdir()?;
    let output = temp.path().join("Comeback - S01E16.mp4");
    let capture = FakeCapture::new(stream_info(&server));
    let fetcher = FakeFetcher::default();
    let capture_calls = capture.calls.clone();
    let fetch_calls = fetcher.calls.clone();
    let runner = runner(&server, capture, fetcher, temp.path());
    let cancel = CancellationToken::new();

    let first = runner.run(&unit(), &output, &cancel).await;
    assert!(first.is_done());
    let requests = server.received_requests().await.map(|r| r.len());

    let second = runner.execute(&unit(), &output, &cancel).await;
    assert_eq!(
        second.result.outcome,
        UnitOutcome::Done {
            path: output.clone(),
            skipped: true
        }
    );
    assert_eq!(second.history, vec![UnitState::Pending, UnitState::Done]);

    assert_eq!(capture_calls.load(Ordering::SeqCst), 1);
    assert_eq!(fetch_calls.load(Ordering::SeqCst), 2);
    assert_eq!(server.received_requests().await.map(|r| r.len()), requests);

    Ok(())
}

#[tokio::test]
async fn test_existing_output_is_untouched() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    let temp = tempfile::tempdir()?;
    let output = temp.path().join("film.mp4");
    std::fs::write(&output, "finished earlier")?;

    let capture = FakeCapture::new(stream_info(&server));
    let capture_calls = capture.calls.clone();
    let runner = runner(&server, capture, FakeFetcher::default(), temp.path());

    let result = runner
        .run(&unit(), &output, &CancellationToken::new())
        .await;
    assert!(result.is_done());
    assert_eq!(capture_calls.load(Ordering::SeqCst), 0);
    assert_eq!(std::fs::read_to_string(&output)?, "finished earlier");
    assert_eq!(server.received_requests().await.map(|r| r.len()), Some(0));

    Ok(())
}

#[tokio::test]
async fn test_capture_failure() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    let temp = tempfile::tempdir()?;
    let output = temp.path().join("film.mp4");
    let runner = runner(
        &server,
        FakeCapture::default(),
        FakeFetcher::default(),
        temp.path(),
    );

    let run = runner
        .execute(&unit(), &output, &CancellationToken::new())
        .await;
    assert_eq!(run.result.error_kind(), Some(ErrorKind::StreamResolution));
    assert_eq!(
        run.history.last(),
        Some(&UnitState::Failed(ErrorKind::StreamResolution))
    );
    assert!(!output.exists());

    Ok(())
}

#[tokio::test]
async fn test_missing_widevine_never_opens_session() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    mount_manifest(&server, manifest(&[playready_pssh()])).await;
    Mock::given(method("GET"))
        .and(path(format!("{CDM_ROOT}/public/open")))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let temp = tempfile::tempdir()?;
    let output = temp.path().join("film.mp4");
    let runner = runner(
        &server,
        FakeCapture::new(stream_info(&server)),
        FakeFetcher::default(),
        temp.path(),
    );

    let result = runner
        .run(&unit(), &output, &CancellationToken::new())
        .await;
    assert_eq!(result.error_kind(), Some(ErrorKind::ManifestParse));

    Ok(())
}

#[tokio::test]
async fn test_entitlement_failure() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    mount_manifest(&server, manifest(&[widevine_pssh()])).await;
    mount_license(&server).await;
    mount_cdm(
        &server,
        serde_json::json!([{ "type": "SIGNING", "key_id": "00000000000000000000000000000000", "key": "aa".repeat(32) }]),
    )
    .await;

    let temp = tempfile::tempdir()?;
    let output = temp.path().join("film.mp4");
    let fetcher = FakeFetcher::default();
    let fetch_calls = fetcher.calls.clone();
    let runner = runner(
        &server,
        FakeCapture::new(stream_info(&server)),
        fetcher,
        temp.path(),
    );

    let result = runner
        .run(&unit(), &output, &CancellationToken::new())
        .await;
    let kind = result.error_kind().assert_success();
    assert_eq!(kind, ErrorKind::KeyRetrieval);
    assert!(kind.is_entitlement());
    assert_eq!(fetch_calls.load(Ordering::SeqCst), 0);

    Ok(())
}

#[tokio::test]
async fn test_audio_failure_cleans_up() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    mount_happy_path(&server).await;

    let temp = tempfile::tempdir()?;
    let output = temp.path().join("film.mp4");
    let fetcher =
        FakeFetcher::default().with(TrackKind::Audio, Fetch::FailAfter(Duration::from_millis(300)));
    let runner = runner(
        &server,
        FakeCapture::new(stream_info(&server)),
        fetcher,
        temp.path(),
    );

    let run = tokio::time::timeout(
        Duration::from_secs(10),
        runner.execute(&unit(), &output, &CancellationToken::new()),
    )
    .await?;

    assert_eq!(run.result.error_kind(), Some(ErrorKind::Acquisition));
    assert_eq!(
        &run.history[run.history.len() - 2..],
        &[
            UnitState::Acquiring,
            UnitState::Failed(ErrorKind::Acquisition)
        ]
    );
    assert!(file_names(&runner.workdir(&unit())).is_empty());
    assert!(!output.exists());

    Ok(())
}

#[tokio::test]
async fn test_cancelled_while_acquiring() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    mount_happy_path(&server).await;

    let temp = tempfile::tempdir()?;
    let output = temp.path().join("film.mp4");
    let fetcher = FakeFetcher::default()
        .with(TrackKind::Audio, Fetch::FailAfter(Duration::from_secs(60)));
    let runner = runner(
        &server,
        FakeCapture::new(stream_info(&server)),
        fetcher,
        temp.path(),
    );

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            cancel.cancel();
        }
    });

    let run = tokio::time::timeout(
        Duration::from_secs(10),
        runner.execute(&unit(), &output, &cancel),
    )
    .await?;

    assert_eq!(run.result.error_kind(), Some(ErrorKind::Cancelled));
    assert!(!run.result.is_done());
    assert_eq!(
        run.history.last(),
        Some(&UnitState::Failed(ErrorKind::Cancelled))
    );
    assert!(file_names(&runner.workdir(&unit())).is_empty());
    assert!(!output.exists());

    Ok(())
}

#[tokio::test]
async fn test_cancelled_while_negotiating_closes_session() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    mount_manifest(&server, manifest(&[widevine_pssh()])).await;
    Mock::given(method("POST"))
        .and(path("/license"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(LICENSE)
                .set_delay(Duration::from_secs(30)),
        )
        .mount(&server)
        .await;
    mount_cdm(&server, signing_and_content_keys()).await;

    let temp = tempfile::tempdir()?;
    let output = temp.path().join("film.mp4");
    let fetcher = FakeFetcher::default();
    let fetch_calls = fetcher.calls.clone();
    let runner = runner(
        &server,
        FakeCapture::new(stream_info(&server)),
        fetcher,
        temp.path(),
    );

    let cancel = CancellationToken::new();
    let unit = unit();
    let (run, _) = tokio::time::timeout(Duration::from_secs(10), async {
        tokio::join!(runner.execute(&unit, &output, &cancel), async {
            while !received(&server, "/license").await {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            cancel.cancel();
        })
    })
    .await?;

    assert_eq!(run.result.error_kind(), Some(ErrorKind::Cancelled));
    assert_eq!(
        &run.history[run.history.len() - 2..],
        &[
            UnitState::NegotiatingKeys,
            UnitState::Failed(ErrorKind::Cancelled)
        ]
    );
    assert!(received(&server, &format!("{CDM_ROOT}/public/close/{SESSION_ID}")).await);
    assert_eq!(fetch_calls.load(Ordering::SeqCst), 0);

    Ok(())
}

#[tokio::test]
async fn test_cancelled_during_subtitles_is_done() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    mount_happy_path(&server).await;
    Mock::given(method("GET"))
        .and(path("/subtitles/cs.vtt"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("WEBVTT\n")
                .set_delay(Duration::from_secs(30)),
        )
        .mount(&server)
        .await;

    let temp = tempfile::tempdir()?;
    let output = temp.path().join("Comeback - S01E16.mp4");
    let mut info = stream_info(&server);
    info.subtitles.push(SubtitleTrack {
        url: format!("{}/subtitles/cs.vtt", server.uri()),
        language: "cs".to_string(),
    });
    let runner = runner(&server, FakeCapture::new(info), FakeFetcher::default(), temp.path());

    let cancel = CancellationToken::new();
    let unit = unit();
    let (run, _) = tokio::time::timeout(Duration::from_secs(10), async {
        tokio::join!(runner.execute(&unit, &output, &cancel), async {
            // the output is renamed into place right before subtitles are fetched
            while !output.exists() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            cancel.cancel();
        })
    })
    .await?;

    assert_eq!(
        run.result.outcome,
        UnitOutcome::Done {
            path: output.clone(),
            skipped: false
        }
    );
    assert_eq!(run.history.last(), Some(&UnitState::Done));
    assert!(output.exists());
    assert!(!temp.path().join("Comeback - S01E16.cs.vtt").exists());

    Ok(())
}

#[tokio::test]
async fn test_cancelled_before_start() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    let temp = tempfile::tempdir()?;
    let capture = FakeCapture::new(stream_info(&server));
    let capture_calls = capture.calls.clone();
    let runner = runner(&server, capture, FakeFetcher::default(), temp.path());

    let cancel = CancellationToken::new();
    cancel.cancel();
    let run = runner
        .execute(&unit(), &temp.path().join("film.mp4"), &cancel)
        .await;

    assert_eq!(
        run.history,
        vec![UnitState::Pending, UnitState::Failed(ErrorKind::Cancelled)]
    );
    assert_eq!(capture_calls.load(Ordering::SeqCst), 0);

    Ok(())
}
