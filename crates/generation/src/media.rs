/// Image inputs and generated assets.
///
/// Generated images live on the provider's storage CDN. Browsers reach them
/// through the proxy's `/image-proxy` prefix, while the API must always be given
/// the original CDN URL.
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::path::Path;
use tracing::debug;

use crate::error::{GenerationError, Result};

pub const IMAGE_CDN_HOST: &str = "ark-content-generation-v2-cn-beijing.tos-cn-beijing.volces.com";
pub const IMAGE_PROXY_PREFIX: &str = "/image-proxy";

/// Rewrite a CDN URL so it is served through the proxy at `proxy_base`
/// (empty for same-origin). Other URLs are returned untouched.
pub fn to_proxy_url(url: &str, proxy_base: &str) -> String {
    let origin = format!("https://{IMAGE_CDN_HOST}");
    match url.strip_prefix(&origin) {
        Some(path) => format!(
            "{}{}{}",
            proxy_base.trim_end_matches('/'),
            IMAGE_PROXY_PREFIX,
            path
        ),
        None => url.to_string(),
    }
}

/// Inverse of [`to_proxy_url`]: accepts `/image-proxy/...` or
/// `http(s)://<proxy host>/image-proxy/...`.
pub fn to_original_url(url: &str) -> String {
    let path = if url.starts_with(IMAGE_PROXY_PREFIX) {
        Some(url)
    } else {
        url.strip_prefix("http://")
            .or_else(|| url.strip_prefix("https://"))
            .and_then(|rest| rest.find('/').map(|idx| &rest[idx..]))
            .filter(|path| path.starts_with(IMAGE_PROXY_PREFIX))
    };
    match path.and_then(|p| p.strip_prefix(IMAGE_PROXY_PREFIX)) {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => {
            format!("https://{IMAGE_CDN_HOST}{rest}")
        }
        _ => url.to_string(),
    }
}

/// Encode image bytes as a `data:` URI, sniffing the MIME type from the content.
pub fn data_uri(bytes: &[u8]) -> Result<String> {
    let format = image::guess_format(bytes)
        .map_err(|err| GenerationError::InvalidImage(err.to_string()))?;
    Ok(format!(
        "data:{};base64,{}",
        format.to_mime_type(),
        STANDARD.encode(bytes)
    ))
}

/// Decode a `b64_json` payload (with or without a data URI header).
pub fn decode_base64(data: &str) -> Result<Vec<u8>> {
    let payload = match data.split_once(";base64,") {
        Some((_, payload)) => payload,
        None => data,
    };
    STANDARD
        .decode(payload.trim())
        .map_err(|err| GenerationError::InvalidImage(err.to_string()))
}

/// Turn a user-supplied image reference into something the API accepts:
/// remote URLs and data URIs pass through, proxy URLs are mapped back to the
/// CDN, and anything else is read as a local file and inlined.
pub async fn resolve_image_input(source: &str) -> Result<String> {
    let original = to_original_url(source.trim());
    if original.starts_with("http://")
        || original.starts_with("https://")
        || original.starts_with("data:")
    {
        return Ok(original);
    }
    debug!(target: "generation", "inlining local image {original}");
    let bytes = tokio::fs::read(Path::new(&original))
        .await
        .map_err(|err| GenerationError::InvalidImage(format!("{original}: {err}")))?;
    data_uri(&bytes)
}

/// Fetch a generated asset to `dest`, returning the number of bytes written.
pub async fn download(client: &reqwest::Client, url: &str, dest: &Path) -> Result<u64> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|err| GenerationError::Download(err.to_string()))?;
    if !response.status().is_success() {
        return Err(GenerationError::Download(format!(
            "{url} returned {}",
            response.status()
        )));
    }
    let bytes = response
        .bytes()
        .await
        .map_err(|err| GenerationError::Download(err.to_string()))?;
    if let Some(dir) = dest.parent() {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|err| GenerationError::Download(err.to_string()))?;
    }
    tokio::fs::write(dest, &bytes)
        .await
        .map_err(|err| GenerationError::Download(err.to_string()))?;
    Ok(bytes.len() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_HEADER: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];

    #[test]
    fn cdn_urls_round_trip_through_proxy() {
        let original = format!("https://{IMAGE_CDN_HOST}/doubao/abc.jpeg?X-Tos-Expires=86400");
        let proxied = to_proxy_url(&original, "");
        assert_eq!(proxied, "/image-proxy/doubao/abc.jpeg?X-Tos-Expires=86400");
        assert_eq!(to_original_url(&proxied), original);

        let absolute = to_proxy_url(&original, "http://localhost:3001/");
        assert_eq!(
            absolute,
            "http://localhost:3001/image-proxy/doubao/abc.jpeg?X-Tos-Expires=86400"
        );
        assert_eq!(to_original_url(&absolute), original);
    }

    #[test]
    fn foreign_urls_are_untouched() {
        assert_eq!(to_proxy_url("https://example.com/a.png", ""), "https://example.com/a.png");
        assert_eq!(to_original_url("https://example.com/a.png"), "https://example.com/a.png");
        assert_eq!(to_original_url("/image-proxyfoo"), "/image-proxyfoo");
    }

    #[test]
    fn data_uri_sniffs_png() {
        let uri = data_uri(PNG_HEADER).unwrap();
        assert!(uri.starts_with("data:image/png;base64,"));
        assert_eq!(decode_base64(&uri).unwrap(), PNG_HEADER);
    }

    #[test]
    fn data_uri_rejects_unknown_bytes() {
        assert!(matches!(
            data_uri(b"definitely not an image"),
            Err(GenerationError::InvalidImage(_))
        ));
    }

    #[tokio::test]
    async fn resolve_passes_urls_and_inlines_files() {
        assert_eq!(
            resolve_image_input("https://example.com/a.png").await.unwrap(),
            "https://example.com/a.png"
        );
        assert_eq!(
            resolve_image_input("/image-proxy/x.png").await.unwrap(),
            format!("https://{IMAGE_CDN_HOST}/x.png")
        );

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.png");
        std::fs::write(&path, PNG_HEADER).unwrap();
        let resolved = resolve_image_input(path.to_str().unwrap()).await.unwrap();
        assert!(resolved.starts_with("data:image/png;base64,"));

        let missing = resolve_image_input("/no/such/file.png").await;
        assert!(matches!(missing, Err(GenerationError::InvalidImage(_))));
    }
}
