//! S3-compatible object-storage adapter.
//!
//! Talks to any S3-compatible endpoint (AWS, MinIO, etc.) via direct HTTP
//! calls with AWS Signature V4 authentication. Objects live under
//! `<bucket>/<prefix>/<key>`; `list` uses ListObjectsV2 with the adapter's
//! prefix.

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Method;
use url::Url;

use crate::config::S3Config;
use crate::error::StorageError;
use crate::storage::StorageAdapter;

/// Adapter storing blobs as named objects in an S3-compatible bucket.
pub struct S3Adapter {
    client: reqwest::Client,
    config: S3Config,
    prefix: String,
}

impl S3Adapter {
    /// Create an adapter over `config`, scoping all objects under `prefix`.
    pub fn new(client: reqwest::Client, config: S3Config, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into().trim_matches('/').to_string();
        Self {
            client,
            config,
            prefix,
        }
    }

    fn object_key(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}/{}", self.prefix, key)
        }
    }

    fn object_url(&self, key: &str) -> Result<Url, StorageError> {
        let mut url = self.base_url()?;
        url.set_path(&format!("{}/{}", self.config.bucket, self.object_key(key)));
        Ok(url)
    }

    fn list_url(&self) -> Result<Url, StorageError> {
        let mut url = self.base_url()?;
        url.set_path(&self.config.bucket);
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("list-type", "2");
            if !self.prefix.is_empty() {
                query.append_pair("prefix", &format!("{}/", self.prefix));
            }
        }
        Ok(url)
    }

    fn base_url(&self) -> Result<Url, StorageError> {
        Url::parse(&self.config.endpoint).map_err(|e| StorageError::Backend {
            reason: format!("Invalid S3 endpoint {}: {}", self.config.endpoint, e),
        })
    }

    /// Compute SigV4 headers for a request.
    ///
    /// This is a simplified SigV4 implementation suitable for the object
    /// operations this adapter performs.
    fn sign_request(
        &self,
        method: &str,
        url: &Url,
        payload_hash: &str,
        timestamp: &str,
        date: &str,
    ) -> HashMap<String, String> {
        use hmac::{Hmac, Mac};
        use sha2::{Digest, Sha256};

        type HmacSha256 = Hmac<Sha256>;

        let host = match url.port() {
            Some(port) => format!("{}:{}", url.host_str().unwrap_or_default(), port),
            None => url.host_str().unwrap_or_default().to_string(),
        };
        let path = url.path();
        let service = "s3";

        // Canonical request
        let canonical_query = canonical_query_string(url);
        let canonical_headers = format!(
            "host:{}\nx-amz-content-sha256:{}\nx-amz-date:{}\n",
            host, payload_hash, timestamp
        );
        let signed_headers = "host;x-amz-content-sha256;x-amz-date";

        let canonical_request = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            method, path, canonical_query, canonical_headers, signed_headers, payload_hash
        );

        // String to sign
        let credential_scope = format!("{}/{}/s3/aws4_request", date, self.config.region);
        let mut hasher = Sha256::new();
        hasher.update(canonical_request.as_bytes());
        let canonical_hash = hex::encode(hasher.finalize());
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            timestamp, credential_scope, canonical_hash
        );

        // Signing key
        let k_date = {
            let mut mac = HmacSha256::new_from_slice(
                format!("AWS4{}", self.config.secret_access_key).as_bytes(),
            )
            .expect("HMAC key");
            mac.update(date.as_bytes());
            mac.finalize().into_bytes()
        };
        let k_region = {
            let mut mac = HmacSha256::new_from_slice(&k_date).expect("HMAC key");
            mac.update(self.config.region.as_bytes());
            mac.finalize().into_bytes()
        };
        let k_service = {
            let mut mac = HmacSha256::new_from_slice(&k_region).expect("HMAC key");
            mac.update(service.as_bytes());
            mac.finalize().into_bytes()
        };
        let k_signing = {
            let mut mac = HmacSha256::new_from_slice(&k_service).expect("HMAC key");
            mac.update(b"aws4_request");
            mac.finalize().into_bytes()
        };

        // Signature
        let signature = {
            let mut mac = HmacSha256::new_from_slice(&k_signing).expect("HMAC key");
            mac.update(string_to_sign.as_bytes());
            hex::encode(mac.finalize().into_bytes())
        };

        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            self.config.access_key_id, credential_scope, signed_headers, signature
        );

        let mut headers = HashMap::new();
        headers.insert("Authorization".to_string(), authorization);
        headers.insert("x-amz-date".to_string(), timestamp.to_string());
        headers.insert("x-amz-content-sha256".to_string(), payload_hash.to_string());
        headers
    }

    /// Send a signed request and return the raw response.
    async fn send(
        &self,
        method: Method,
        url: Url,
        body: Option<Bytes>,
    ) -> Result<reqwest::Response, StorageError> {
        use sha2::{Digest, Sha256};

        let body = body.unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(&body);
        let payload_hash = hex::encode(hasher.finalize());

        let now = chrono::Utc::now();
        let timestamp = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date = now.format("%Y%m%d").to_string();

        let headers = self.sign_request(method.as_str(), &url, &payload_hash, &timestamp, &date);

        let mut request = self.client.request(method, url);
        for (key, value) in headers {
            request = request.header(key, value);
        }
        request
            .body(body)
            .send()
            .await
            .map_err(|e| StorageError::Backend {
                reason: format!("HTTP request failed: {}", e),
            })
    }
}

#[async_trait]
impl StorageAdapter for S3Adapter {
    async fn read(&self, key: &str) -> Result<Option<Bytes>, StorageError> {
        let url = self.object_url(key)?;
        let response = self.send(Method::GET, url, None).await?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(StorageError::Read {
                key: key.to_string(),
                reason: format!("Status {}: {}", status, text),
            });
        }
        let data = response.bytes().await.map_err(|e| StorageError::Read {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Some(data))
    }

    async fn write(&self, key: &str, value: Bytes) -> Result<(), StorageError> {
        let url = self.object_url(key)?;
        let response = self.send(Method::PUT, url, Some(value)).await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(StorageError::Write {
                key: key.to_string(),
                reason: format!("Status {}: {}", status, text),
            });
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        let url = self.object_url(key)?;
        let response = self.send(Method::DELETE, url, None).await?;
        let status = response.status();
        // DELETE on an absent object already succeeds on S3; tolerate an
        // explicit 404 from stricter compatible stores.
        if !status.is_success() && status != reqwest::StatusCode::NOT_FOUND {
            let text = response.text().await.unwrap_or_default();
            return Err(StorageError::Remove {
                key: key.to_string(),
                reason: format!("Status {}: {}", status, text),
            });
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>, StorageError> {
        let url = self.list_url()?;
        let response = self.send(Method::GET, url, None).await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(StorageError::List {
                reason: format!("Status {}: {}", status, text),
            });
        }
        let text = response.text().await.map_err(|e| StorageError::List {
            reason: e.to_string(),
        })?;
        let scope = if self.prefix.is_empty() {
            String::new()
        } else {
            format!("{}/", self.prefix)
        };
        Ok(extract_object_keys(&text)
            .into_iter()
            .filter_map(|k| k.strip_prefix(&scope).map(str::to_string))
            .filter(|k| !k.is_empty())
            .collect())
    }
}

/// Pull `<Key>` values out of a ListObjectsV2 response body.
fn extract_object_keys(body: &str) -> Vec<String> {
    let mut keys = Vec::new();
    let mut rest = body;
    while let Some(start) = rest.find("<Key>") {
        rest = &rest[start + "<Key>".len()..];
        if let Some(end) = rest.find("</Key>") {
            keys.push(xml_unescape(&rest[..end]));
            rest = &rest[end + "</Key>".len()..];
        } else {
            break;
        }
    }
    keys
}

fn xml_unescape(value: &str) -> String {
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// SigV4 canonical query string: RFC 3986 encoded pairs, sorted by name.
fn canonical_query_string(url: &Url) -> String {
    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (uri_encode(&k), uri_encode(&v)))
        .collect();
    pairs.sort();
    pairs
        .into_iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

fn uri_encode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char);
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}
