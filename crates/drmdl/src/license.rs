use bytes::Bytes;
use reqwest::header::{HeaderName, HeaderValue, CONTENT_TYPE};

use crate::{
    error::{DrmdlError, DrmdlResult},
    model::StreamInfo,
    util::http::{upstream_diagnostic, HttpClient},
};

/// Forward a CDM challenge to the license server of the stream.
///
/// The response body is the raw license message.
pub async fn acquire_license(
    client: &HttpClient,
    stream: &StreamInfo,
    challenge: &[u8],
    diagnostic_limit: usize,
) -> DrmdlResult<Bytes> {
    let name = HeaderName::from_bytes(stream.drm_header.name.trim().as_bytes())
        .map_err(|e| DrmdlError::LicenseAcquisition(format!("invalid drm header name: {e}")))?;
    let value = HeaderValue::from_str(stream.drm_header.value.trim())
        .map_err(|e| DrmdlError::LicenseAcquisition(format!("invalid drm header value: {e}")))?;

    let response = client
        .post(&stream.license_url)
        .header(name, value)
        .header(CONTENT_TYPE, "application/octet-stream")
        .body(challenge.to_vec())
        .send()
        .await
        .map_err(|e| DrmdlError::LicenseAcquisition(e.to_string()))?;

    if !response.status().is_success() {
        let diagnostic = upstream_diagnostic(response, diagnostic_limit).await;
        tracing::warn!("License server refused the challenge: {diagnostic}");
        return Err(DrmdlError::LicenseAcquisition(diagnostic));
    }

    let license = response
        .bytes()
        .await
        .map_err(|e| DrmdlError::LicenseAcquisition(e.to_string()))?;
    if license.is_empty() {
        return Err(DrmdlError::LicenseAcquisition(
            "license server returned an empty body".to_string(),
        ));
    }

    Ok(license)
}
