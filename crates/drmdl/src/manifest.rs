//! Widevine init data lookup in DASH manifests.
//!
//! A multi-DRM manifest carries one `cenc:pssh` element per protection system, at adaptation
//! set or representation level and in no particular order. Each candidate is decoded and the
//! first one whose box belongs to Widevine is kept.

use base64::{engine::general_purpose::STANDARD, Engine};
use bytes::Bytes;
use dash_mpd::MPD;
use memchr::memmem;

use crate::{
    error::{DrmdlError, DrmdlResult},
    model::Pssh,
    util::http::{upstream_diagnostic, HttpClient},
};

/// `edef8ba9-79d6-4ace-a3c8-27dcd51d21ed`
pub const WIDEVINE_SYSTEM_ID: [u8; 16] = [
    0xed, 0xef, 0x8b, 0xa9, 0x79, 0xd6, 0x4a, 0xce, 0xa3, 0xc8, 0x27, 0xdc, 0xd5, 0x1d, 0x21, 0xed,
];

pub fn extract_widevine_pssh(manifest: &[u8]) -> DrmdlResult<Pssh> {
    let text = std::str::from_utf8(manifest)
        .map_err(|e| DrmdlError::ManifestParse(format!("manifest is not utf-8: {e}")))?;
    let mpd = dash_mpd::parse(text).map_err(|e| DrmdlError::ManifestParse(e.to_string()))?;

    for candidate in pssh_candidates(&mpd) {
        // whitespace inside the element is legal and common in pretty printed manifests
        let candidate: String = candidate.split_whitespace().collect();
        let decoded = match STANDARD.decode(&candidate) {
            Ok(decoded) => decoded,
            Err(e) => {
                tracing::debug!("Ignored undecodable pssh candidate: {e}");
                continue;
            }
        };

        if is_widevine_pssh(&decoded) {
            return Ok(Pssh::new(candidate));
        }
    }

    Err(DrmdlError::PsshNotFound)
}

/// All `cenc:pssh` texts in document order.
fn pssh_candidates(mpd: &MPD) -> Vec<&str> {
    let mut candidates = Vec::new();
    for period in mpd.periods.iter() {
        for adaptation in period.adaptations.iter() {
            let protections = adaptation.ContentProtection.iter().chain(
                adaptation
                    .representations
                    .iter()
                    .flat_map(|representation| representation.ContentProtection.iter()),
            );
            for protection in protections {
                for pssh in protection.cenc_pssh.iter() {
                    if let Some(content) = pssh.content.as_deref() {
                        candidates.push(content);
                    }
                }
            }
        }
    }
    candidates
}

fn is_widevine_pssh(data: &[u8]) -> bool {
    // full box: size(4) type(4) version/flags(4) system_id(16)
    if data.len() >= 28 && &data[4..8] == b"pssh" {
        return data[12..28] == WIDEVINE_SYSTEM_ID;
    }
    memmem::find(data, &WIDEVINE_SYSTEM_ID).is_some()
}

pub async fn fetch_manifest(
    client: &HttpClient,
    url: &str,
    diagnostic_limit: usize,
) -> DrmdlResult<Bytes> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| DrmdlError::ManifestParse(format!("failed to fetch manifest: {e}")))?;
    if !response.status().is_success() {
        let diagnostic = upstream_diagnostic(response, diagnostic_limit).await;
        tracing::warn!("Manifest request failed: {diagnostic}");
        return Err(DrmdlError::ManifestParse(format!(
            "failed to fetch manifest: {diagnostic}"
        )));
    }

    response
        .bytes()
        .await
        .map_err(|e| DrmdlError::ManifestParse(format!("failed to read manifest: {e}")))
}
