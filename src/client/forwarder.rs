use flate2::read::GzDecoder;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Client;
use std::collections::HashMap;
use std::io::Read;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::warn;

use crate::error::{Result, TunnelError};
use crate::protocol::{TunnelRequest, TunnelResponse};

/// Bound on the whole local connect/request/response cycle.
const LOCAL_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared HTTP client for connection pooling and reuse
static HTTP_CLIENT: OnceLock<Client> = OnceLock::new();

/// Get or create the shared HTTP client
fn get_client() -> &'static Client {
    HTTP_CLIENT.get_or_init(|| {
        Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(LOCAL_TIMEOUT)
            .pool_max_idle_per_host(10)
            .build()
            .expect("failed to create HTTP client")
    })
}

/// Execute a tunneled request against the local service.
///
/// Never fails: any error reaching or reading the local service is converted
/// into a synthetic 502 response carrying the request's `id`, so one bad
/// request cannot tear down the relay channel.
pub async fn forward(request: TunnelRequest, local_port: u16) -> TunnelResponse {
    let id = request.id.clone();
    match try_forward(request, local_port).await {
        Ok(response) => response,
        Err(e) => {
            warn!("Forwarding to localhost:{} failed: {}", local_port, e);
            bad_gateway(id, &e)
        }
    }
}

async fn try_forward(request: TunnelRequest, local_port: u16) -> Result<TunnelResponse> {
    let client = get_client();
    let url = format!("http://localhost:{}{}", local_port, request.path);

    let method = reqwest::Method::from_str(&request.method)
        .map_err(|_| TunnelError::Forwarding(format!("invalid method: {}", request.method)))?;
    let mut builder = client.request(method, &url);

    // Pass request headers through, minus hop-by-hop headers and the public
    // host (reqwest sets the local one).
    let mut header_map = HeaderMap::with_capacity(request.headers.len());
    for (name, value) in &request.headers {
        if is_hop_by_hop(name) || name.eq_ignore_ascii_case("host") {
            continue;
        }
        if let (Ok(header_name), Ok(header_value)) =
            (HeaderName::from_str(name), HeaderValue::from_str(value))
        {
            header_map.insert(header_name, header_value);
        }
    }
    builder = builder.headers(header_map);

    if let Some(body) = request.body {
        builder = builder.body(body);
    }

    let mut response = builder.send().await?;

    let status = response.status().as_u16();
    let mut headers: HashMap<String, String> = response
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            if is_hop_by_hop(name.as_str()) {
                return None;
            }
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();

    // Accumulate the body chunk by chunk so a large response never needs a
    // single oversized read.
    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        body.extend_from_slice(&chunk);
    }

    let is_gzip = headers
        .get("content-encoding")
        .map(|v| v.trim().eq_ignore_ascii_case("gzip"))
        .unwrap_or(false);
    if is_gzip {
        let mut decoder = GzDecoder::new(body.as_slice());
        let mut decompressed = Vec::new();
        decoder
            .read_to_end(&mut decompressed)
            .map_err(|e| TunnelError::Forwarding(format!("invalid gzip body: {}", e)))?;
        body = decompressed;
        // The body is plaintext now; drop the headers describing the
        // compressed form so the response stays self-consistent.
        headers.remove("content-encoding");
        headers.remove("content-length");
    }

    let body = String::from_utf8(body)
        .map_err(|_| TunnelError::Forwarding("response body is not valid UTF-8".to_string()))?;

    Ok(TunnelResponse {
        id: request.id,
        status_code: status,
        headers,
        body,
    })
}

fn is_hop_by_hop(name: &str) -> bool {
    matches!(
        name.to_ascii_lowercase().as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
    )
}

fn bad_gateway(id: String, error: &TunnelError) -> TunnelResponse {
    let mut headers = HashMap::new();
    headers.insert("content-type".to_string(), "text/plain".to_string());
    TunnelResponse {
        id,
        status_code: 502,
        headers,
        body: format!("Bad Gateway: {}", error),
    }
}
