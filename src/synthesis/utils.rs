use secrecy::{ExposeSecret, SecretString};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;

use crate::consts::{PCM_OUTPUT_FORMAT, XI_API_KEY_HEADER};

pub fn stream_url(base_url: &str, voice_id: &str, model_id: &str) -> String {
    format!(
        "{}/{}/stream-input?model_id={}&output_format={}",
        base_url, voice_id, model_id, PCM_OUTPUT_FORMAT
    )
}

pub fn build_request(
    url: &str,
    api_key: &SecretString,
) -> tokio_tungstenite::tungstenite::Result<Request> {
    let mut request = url.into_client_request()?;
    request.headers_mut()
        .insert(XI_API_KEY_HEADER, api_key.expose_secret().parse()?);
    Ok(request)
}
