use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use base64::{engine::general_purpose::STANDARD, Engine};
use drmdl::{
    capture::SessionCapture,
    config::RemoteCdmConfig,
    decrypt::Decryptor,
    fetch::StreamFetcher,
    merge::{Muxer, VideoTransform},
    ContentUnit, DecryptedTrack, DecryptionKey, DrmHeader, DrmdlError, DrmdlResult, StreamInfo,
    TrackKind,
};
use serde_json::json;
use wiremock::{
    matchers::{body_bytes, body_json, header, method, path},
    Mock, MockServer, ResponseTemplate,
};

pub const WIDEVINE_SYSTEM_ID: [u8; 16] = drmdl::manifest::WIDEVINE_SYSTEM_ID;

pub const PLAYREADY_SYSTEM_ID: [u8; 16] = [
    0x9a, 0x04, 0xf0, 0x79, 0x98, 0x40, 0x42, 0x86, 0xab, 0x92, 0xe6, 0x5b, 0xe0, 0x88, 0x5f, 0x95,
];

pub const CDM_ROOT: &str = "/remotecdm/widevine";
pub const SESSION_ID: &str = "f3b2a1c0";
pub const CHALLENGE: &[u8] = b"\x08\x01\x12\x10widevine-challenge";
pub const LICENSE: &[u8] = b"\x08\x02\x12\x10widevine-license";

pub fn pssh_box(system_id: &[u8; 16], data: &[u8]) -> String {
    let size = 32 + data.len() as u32;
    let mut result = Vec::with_capacity(size as usize);
    result.extend_from_slice(&size.to_be_bytes());
    result.extend_from_slice(b"pssh");
    result.extend_from_slice(&[0, 0, 0, 0]);
    result.extend_from_slice(system_id);
    result.extend_from_slice(&(data.len() as u32).to_be_bytes());
    result.extend_from_slice(data);
    STANDARD.encode(result)
}

pub fn widevine_pssh() -> String {
    pssh_box(&WIDEVINE_SYSTEM_ID, b"\x12\x10comeback-s01e16")
}

pub fn playready_pssh() -> String {
    pssh_box(&PLAYREADY_SYSTEM_ID, b"<WRMHEADER/>")
}

/// Two adaptation sets, each listing `psshs` in the given order.
pub fn manifest(psshs: &[String]) -> String {
    let protections: String = psshs
        .iter()
        .map(|pssh| {
            format!(
                r#"<ContentProtection schemeIdUri="urn:uuid:00000000-0000-0000-0000-000000000000"><cenc:pssh>{pssh}</cenc:pssh></ContentProtection>"#
            )
        })
        .collect();

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<MPD xmlns="urn:mpeg:dash:schema:mpd:2011" xmlns:cenc="urn:mpeg:cenc:2013" type="static" minBufferTime="PT2S" mediaPresentationDuration="PT24M" profiles="urn:mpeg:dash:profile:isoff-live:2011">
  <Period id="0">
    <AdaptationSet mimeType="video/mp4" contentType="video">
      <ContentProtection schemeIdUri="urn:mpeg:dash:mp4protection:2011" value="cenc"/>
      {protections}
      <Representation id="v1" bandwidth="4000000" width="1920" height="1080" codecs="avc1.640028"/>
    </AdaptationSet>
    <AdaptationSet mimeType="audio/mp4" contentType="audio" lang="cs">
      <ContentProtection schemeIdUri="urn:mpeg:dash:mp4protection:2011" value="cenc"/>
      {protections}
      <Representation id="a1" bandwidth="128000" codecs="mp4a.40.2"/>
    </AdaptationSet>
  </Period>
</MPD>"#
    )
}

pub fn content_key() -> DecryptionKey {
    DecryptionKey {
        key_id: "0123456789abcdef0123456789abcdef".to_string(),
        key: "fedcba9876543210fedcba9876543210".to_string(),
    }
}

pub fn cdm_config(server: &MockServer) -> RemoteCdmConfig {
    RemoteCdmConfig {
        host: format!("{}{CDM_ROOT}", server.uri()),
        close_timeout_secs: 2,
        ..Default::default()
    }
}

pub fn stream_info(server: &MockServer) -> StreamInfo {
    StreamInfo {
        manifest_url: format!("{}/manifest.mpd", server.uri()),
        license_url: format!("{}/license", server.uri()),
        drm_header: DrmHeader {
            name: "X-AxDRM-Message".to_string(),
            value: "eyJhbGciOiJIUzI1NiJ9.token".to_string(),
        },
        subtitles: vec![],
    }
}

pub async fn mount_manifest(server: &MockServer, body: String) {
    Mock::given(method("GET"))
        .and(path("/manifest.mpd"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

/// License server accepting exactly [CHALLENGE] with the DRM header of [stream_info].
pub async fn mount_license(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/license"))
        .and(header("X-AxDRM-Message", "eyJhbGciOiJIUzI1NiJ9.token"))
        .and(body_bytes(CHALLENGE))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(LICENSE))
        .mount(server)
        .await;
}

/// A key service handing out `keys` for one session, which must be closed exactly once.
pub async fn mount_cdm(server: &MockServer, keys: serde_json::Value) {
    let device = format!("{CDM_ROOT}/public");

    Mock::given(method("GET"))
        .and(path(format!("{device}/open")))
        .and(header("X-Secret-Key", "CDRM"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "data": { "session_id": SESSION_ID } })),
        )
        .expect(1)
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path(format!("{device}/get_license_challenge/STREAMING")))
        .and(body_json(json!({
            "session_id": SESSION_ID,
            "init_data": widevine_pssh(),
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "challenge_b64": STANDARD.encode(CHALLENGE) }
        })))
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path(format!("{device}/parse_license")))
        .and(body_json(json!({
            "session_id": SESSION_ID,
            "license_message": STANDARD.encode(LICENSE),
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": {} })))
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path(format!("{device}/get_keys/ALL")))
        .and(body_json(json!({ "session_id": SESSION_ID })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": { "keys": keys } })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path(format!("{device}/close/{SESSION_ID}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": {} })))
        .expect(1)
        .mount(server)
        .await;
}

pub fn signing_and_content_keys() -> serde_json::Value {
    let key = content_key();
    json!([
        { "type": "SIGNING", "key_id": "00000000000000000000000000000000", "key": "aa".repeat(32) },
        { "type": "CONTENT", "key_id": key.key_id, "key": key.key },
    ])
}

/// Names of files inside `dir`, empty when it does not exist.
pub fn file_names(dir: &Path) -> Vec<String> {
    match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .flatten()
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect(),
        Err(_) => vec![],
    }
}

#[derive(Clone, Default)]
pub struct FakeCapture {
    pub info: Option<StreamInfo>,
    pub calls: Arc<AtomicUsize>,
}

impl FakeCapture {
    pub fn new(info: StreamInfo) -> Self {
        Self {
            info: Some(info),
            calls: Arc::default(),
        }
    }
}

impl SessionCapture for FakeCapture {
    async fn capture(&self, _unit: &ContentUnit) -> DrmdlResult<StreamInfo> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.info
            .clone()
            .ok_or_else(|| DrmdlError::StreamResolution("player never started".to_string()))
    }
}

#[derive(Clone, Copy, Debug)]
pub enum Fetch {
    Succeed,
    /// Writes the track under another extension.
    SucceedAs(&'static str),
    /// Finishes after the delay.
    Slow(Duration),
    /// Leaves a partial file behind and fails after the delay.
    FailAfter(Duration),
}

#[derive(Clone, Default)]
pub struct FakeFetcher {
    pub behaviour: HashMap<TrackKind, Fetch>,
    pub calls: Arc<AtomicUsize>,
}

impl FakeFetcher {
    pub fn with(mut self, kind: TrackKind, behaviour: Fetch) -> Self {
        self.behaviour.insert(kind, behaviour);
        self
    }
}

impl StreamFetcher for FakeFetcher {
    async fn fetch(
        &self,
        _manifest_url: &str,
        kind: TrackKind,
        _selector: &str,
        output: &Path,
    ) -> DrmdlResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let data = format!("encrypted {kind}");

        match self.behaviour.get(&kind).copied().unwrap_or(Fetch::Succeed) {
            Fetch::Succeed => tokio::fs::write(output, data).await?,
            Fetch::SucceedAs(extension) => {
                tokio::fs::write(output.with_extension(extension), data).await?
            }
            Fetch::Slow(delay) => {
                tokio::time::sleep(delay).await;
                tokio::fs::write(output, data).await?
            }
            Fetch::FailAfter(delay) => {
                tokio::fs::write(output, &data[..4]).await?;
                tokio::time::sleep(delay).await;
                return Err(DrmdlError::Acquisition(format!(
                    "{kind} fetch exited with exit status: 1: HTTP Error 403: Forbidden"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct FakeDecryptor {
    pub fail: bool,
    pub calls: Arc<AtomicUsize>,
}

impl Decryptor for FakeDecryptor {
    async fn decrypt(&self, keys: &[DecryptionKey], input: &Path, output: &Path) -> DrmdlResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert!(!keys.is_empty());
        if self.fail {
            return Err(DrmdlError::Decryption(
                "exited with exit status: 1: ERROR: failed to decrypt (-11)".to_string(),
            ));
        }

        let data = tokio::fs::read_to_string(input).await?;
        tokio::fs::write(output, data.replace("encrypted", "decrypted")).await?;
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct FakeMuxer {
    pub fail: bool,
    pub calls: Arc<AtomicUsize>,
    /// Paths written to, in call order.
    pub targets: Arc<Mutex<Vec<PathBuf>>>,
    pub transforms: Arc<Mutex<Vec<Option<VideoTransform>>>>,
}

impl Muxer for FakeMuxer {
    async fn merge(
        &self,
        video: &DecryptedTrack,
        audio: &DecryptedTrack,
        output: &Path,
        transform: Option<&VideoTransform>,
    ) -> DrmdlResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.targets.lock().unwrap().push(output.to_path_buf());
        self.transforms.lock().unwrap().push(transform.copied());

        let video = tokio::fs::read_to_string(&video.path).await?;
        let audio = tokio::fs::read_to_string(&audio.path).await?;
        if self.fail {
            tokio::fs::write(output, &video[..3]).await?;
            return Err(DrmdlError::Processing(
                "ffmpeg exited with exit status: 1: Conversion failed!".to_string(),
            ));
        }

        tokio::fs::write(output, format!("{video}+{audio}")).await?;
        Ok(())
    }
}
