// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! The preset catalog and the custom kit save round trip.

use std::{
    io::Read,
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{config, error::FetchError};

/// Type tag of user authored kits.
pub const CUSTOM_KIT_TYPE: &str = "custom";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresetSample {
    pub name: String,
    pub url: String,
}

/// A kit as the preset source describes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preset {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub samples: Vec<PresetSample>,
}

impl Preset {
    pub fn is_custom(&self) -> bool {
        self.kind == CUSTOM_KIT_TYPE
    }
}

/// Body sent when a custom kit is created or updated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KitDocument {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub is_factory_presets: bool,
    pub samples: Vec<PresetSample>,
}

impl KitDocument {
    pub fn custom(name: &str, samples: Vec<PresetSample>) -> KitDocument {
        KitDocument {
            name: name.to_string(),
            kind: CUSTOM_KIT_TYPE.to_string(),
            is_factory_presets: false,
            samples,
        }
    }
}

/// Resolves a preset sample URL against the audio base path.
///
/// URLs with a scheme are returned as is. A leading "./" is dropped and the
/// rest is treated as a URL reference: "//host/x" takes the base's scheme,
/// "/x" is rooted at the base's origin and anything else is joined under the
/// base, which is always taken to be a directory. Dot segments are folded.
pub fn resolve_url(base: &str, url: &str) -> String {
    if has_scheme(url) {
        return url.to_string();
    }
    let (origin, base_path) = split_origin(base);
    if let Some(rest) = url.strip_prefix("//") {
        return match base.split_once("://") {
            Some((scheme, _)) => format!("{}://{}", scheme, rest),
            None => format!("//{}", rest),
        };
    }

    let mut relative = url;
    while let Some(rest) = relative.strip_prefix("./") {
        relative = rest;
    }
    if base.is_empty() {
        return relative.to_string();
    }
    let path = if relative.starts_with('/') {
        relative.to_string()
    } else {
        format!("{}/{}", base_path.trim_end_matches('/'), relative)
    };
    format!("{}{}", origin, remove_dot_segments(&path))
}

// "scheme:" followed by anything. Single letters are drive names, not schemes.
fn has_scheme(url: &str) -> bool {
    let Some((scheme, _)) = url.split_once(':') else {
        return false;
    };
    let mut chars = scheme.chars();
    scheme.len() > 1
        && chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

/// Splits "scheme://authority/path" into its origin and path. Bases without a
/// scheme are plain paths with an empty origin.
fn split_origin(base: &str) -> (&str, &str) {
    match base.find("://") {
        Some(index) => {
            let authority_start = index + 3;
            match base[authority_start..].find('/') {
                Some(slash) => base.split_at(authority_start + slash),
                None => (base, ""),
            }
        }
        None => ("", base),
    }
}

fn remove_dot_segments(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "." => {}
            ".." => {
                // Never climb above the root.
                if segments.len() > 1 || segments.first().is_some_and(|s| !s.is_empty()) {
                    segments.pop();
                }
            }
            _ => segments.push(segment),
        }
    }
    segments.join("/")
}

/// File name a recorded sample is uploaded under.
pub fn upload_file_name(sample_name: &str) -> String {
    let joined = sample_name.split_whitespace().collect::<Vec<_>>().join("_");
    format!("{}.wav", joined)
}

/// Percent-encodes a single path component.
pub fn encode_component(component: &str) -> String {
    let mut encoded = String::with_capacity(component.len());
    for byte in component.bytes() {
        match byte {
            b'A'..=b'Z'
            | b'a'..=b'z'
            | b'0'..=b'9'
            | b'-'
            | b'_'
            | b'.'
            | b'!'
            | b'~'
            | b'*'
            | b'\''
            | b'('
            | b')' => encoded.push(byte as char),
            other => encoded.push_str(&format!("%{:02X}", other)),
        }
    }
    encoded
}

/// Remote preset storage.
pub trait PresetStore: Send + Sync {
    /// The whole catalog.
    fn list(&self) -> BoxFuture<'static, Result<Vec<Preset>, FetchError>>;

    /// Stores a recording in the kit's folder and returns the URL it is served from.
    fn upload(
        &self,
        folder: &str,
        file_name: &str,
        payload: Arc<Vec<u8>>,
    ) -> BoxFuture<'static, Result<String, FetchError>>;

    /// Creates a kit. Returns the name the server stored it under.
    fn create(&self, kit: &KitDocument) -> BoxFuture<'static, Result<String, FetchError>>;

    /// Replaces the kit currently named `existing`. Returns the name it is stored under now.
    fn update(
        &self,
        existing: &str,
        kit: &KitDocument,
    ) -> BoxFuture<'static, Result<String, FetchError>>;
}

#[derive(Deserialize)]
struct Saved {
    name: Option<String>,
}

#[derive(Deserialize)]
struct Uploaded {
    files: Vec<UploadedFile>,
}

#[derive(Deserialize)]
struct UploadedFile {
    url: String,
}

/// Talks to the presets HTTP API with ureq on the blocking pool.
#[derive(Clone)]
pub struct HttpPresetStore {
    agent: ureq::Agent,
    api_url: String,
    upload_url: String,
}

fn map_error(url: &str, e: ureq::Error) -> FetchError {
    match e {
        ureq::Error::Status(status, _) => FetchError::Http {
            url: url.to_string(),
            status,
        },
        other => FetchError::Transport {
            url: url.to_string(),
            message: other.to_string(),
        },
    }
}

fn read_json<T: serde::de::DeserializeOwned>(
    url: &str,
    response: ureq::Response,
) -> Result<T, FetchError> {
    let mut body = String::new();
    response
        .into_reader()
        .read_to_string(&mut body)
        .map_err(|source| FetchError::Io {
            url: url.to_string(),
            source,
        })?;
    serde_json::from_str(&body)
        .map_err(|e| FetchError::Malformed(format!("unexpected response from {}: {}", url, e)))
}

async fn blocking<T, F>(call: F) -> Result<T, FetchError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, FetchError> + Send + 'static,
{
    tokio::task::spawn_blocking(call)
        .await
        .map_err(|e| FetchError::Malformed(format!("request task failed: {}", e)))?
}

impl HttpPresetStore {
    pub fn new(config: &config::Presets) -> HttpPresetStore {
        HttpPresetStore {
            agent: ureq::AgentBuilder::new().timeout(config.timeout()).build(),
            api_url: config.api_url().trim_end_matches('/').to_string(),
            upload_url: config.upload_url().trim_end_matches('/').to_string(),
        }
    }

    fn send_kit(
        &self,
        method: &'static str,
        url: String,
        kit: &KitDocument,
    ) -> BoxFuture<'static, Result<String, FetchError>> {
        let agent = self.agent.clone();
        let kit = kit.clone();
        Box::pin(blocking(move || {
            info!(method, url, kit = kit.name, "Saving kit.");
            let response = agent
                .request(method, &url)
                .send_json(&kit)
                .map_err(|e| map_error(&url, e))?;
            let saved: Saved = read_json(&url, response)?;
            Ok(saved.name.unwrap_or(kit.name))
        }))
    }
}

fn multipart_boundary() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_nanos();
    format!("----beatpad{:x}", nanos)
}

/// A multipart form with a single "files" part.
fn multipart_body(boundary: &str, file_name: &str, payload: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(payload.len() + 256);
    body.extend_from_slice(
        format!(
            "--{}\r\nContent-Disposition: form-data; name=\"files\"; filename=\"{}\"\r\nContent-Type: audio/wav\r\n\r\n",
            boundary,
            file_name.replace('"', "")
        )
        .as_bytes(),
    );
    body.extend_from_slice(payload);
    body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());
    body
}

impl PresetStore for HttpPresetStore {
    fn list(&self) -> BoxFuture<'static, Result<Vec<Preset>, FetchError>> {
        let agent = self.agent.clone();
        let url = self.api_url.clone();
        Box::pin(blocking(move || {
            debug!(url, "Fetching presets.");
            let response = agent.get(&url).call().map_err(|e| map_error(&url, e))?;
            read_json(&url, response)
        }))
    }

    fn upload(
        &self,
        folder: &str,
        file_name: &str,
        payload: Arc<Vec<u8>>,
    ) -> BoxFuture<'static, Result<String, FetchError>> {
        let agent = self.agent.clone();
        let url = format!("{}/{}", self.upload_url, encode_component(folder));
        let file_name = file_name.to_string();
        Box::pin(blocking(move || {
            info!(url, file = file_name, bytes = payload.len(), "Uploading recording.");
            let boundary = multipart_boundary();
            let response = agent
                .post(&url)
                .set(
                    "Content-Type",
                    &format!("multipart/form-data; boundary={}", boundary),
                )
                .send_bytes(&multipart_body(&boundary, &file_name, &payload))
                .map_err(|e| map_error(&url, e))?;
            let uploaded: Uploaded = read_json(&url, response)?;
            uploaded
                .files
                .into_iter()
                .next()
                .map(|file| file.url)
                .ok_or_else(|| FetchError::Malformed(format!("{} returned no files", url)))
        }))
    }

    fn create(&self, kit: &KitDocument) -> BoxFuture<'static, Result<String, FetchError>> {
        self.send_kit("POST", self.api_url.clone(), kit)
    }

    fn update(
        &self,
        existing: &str,
        kit: &KitDocument,
    ) -> BoxFuture<'static, Result<String, FetchError>> {
        let url = format!("{}/{}", self.api_url, encode_component(existing));
        self.send_kit("PATCH", url, kit)
    }
}

#[cfg(test)]
mod tests {
    use super::{
        encode_component, multipart_body, resolve_url, upload_file_name, KitDocument, Preset,
        PresetSample,
    };

    #[test]
    fn test_resolve_url() {
        let base = "http://host/presets/";
        assert_eq!(
            resolve_url(base, "./808/Kick.wav"),
            "http://host/presets/808/Kick.wav"
        );
        assert_eq!(
            resolve_url("http://host/presets", "808/Kick.wav"),
            "http://host/presets/808/Kick.wav"
        );
        assert_eq!(
            resolve_url(base, "/uploads/Tom.wav"),
            "http://host/uploads/Tom.wav"
        );
        assert_eq!(
            resolve_url("http://localhost:3000/presets", "/uploads/Mine/Tom.wav"),
            "http://localhost:3000/uploads/Mine/Tom.wav"
        );
        assert_eq!(
            resolve_url(base, "../shared/Snare.wav"),
            "http://host/shared/Snare.wav"
        );
        assert_eq!(resolve_url(base, "//cdn/x.wav"), "http://cdn/x.wav");
        assert_eq!(
            resolve_url(base, "https://cdn/x.wav"),
            "https://cdn/x.wav"
        );
        assert_eq!(resolve_url("/srv/kits", "./a.wav"), "/srv/kits/a.wav");
        assert_eq!(resolve_url("/srv/kits", "/tmp/b.wav"), "/tmp/b.wav");
        assert_eq!(resolve_url("", "./c.wav"), "c.wav");
    }

    #[test]
    fn test_preset_shape() {
        let presets: Vec<Preset> = serde_json::from_str(
            r#"[{"name":"808","type":"drums","isFactoryPresets":true,
                 "samples":[{"name":"Kick","url":"./808/Kick.wav"}]},
                {"name":"Mine","type":"custom","samples":[]}]"#,
        )
        .expect("parse");
        assert_eq!(presets.len(), 2);
        assert!(!presets[0].is_custom());
        assert!(presets[1].is_custom());
        assert_eq!(presets[0].samples[0].url, "./808/Kick.wav");
    }

    #[test]
    fn test_kit_document() {
        let doc = KitDocument::custom(
            "Mine",
            vec![PresetSample {
                name: "Tom".into(),
                url: "/uploads/Mine/Tom.wav".into(),
            }],
        );
        let value = serde_json::to_value(&doc).expect("serialize");
        assert_eq!(value["type"], "custom");
        assert_eq!(value["isFactoryPresets"], false);
        assert_eq!(value["samples"][0]["name"], "Tom");
    }

    #[test]
    fn test_names_and_encoding() {
        assert_eq!(upload_file_name("Big  Tom 2"), "Big_Tom_2.wav");
        assert_eq!(encode_component("My Kit/1"), "My%20Kit%2F1");

        let body = multipart_body("b", "Tom.wav", b"RIFF");
        let text = String::from_utf8_lossy(&body);
        assert!(text.starts_with("--b\r\n"));
        assert!(text.contains("name=\"files\"; filename=\"Tom.wav\""));
        assert!(text.ends_with("RIFF\r\n--b--\r\n"));
    }
}
