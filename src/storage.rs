//! Object storage gateway.
//!
//! Uploads, lists, and fetches named objects inside one container. Three
//! backends implement [`ObjectStore`]:
//!
//! - **[`S3Store`]**: the S3 REST API, signed with AWS Signature V4
//!   (`hmac` + `sha2`, no AWS SDK). Supports custom endpoints for
//!   S3-compatible services (MinIO, LocalStack), addressed path-style.
//! - **[`FsStore`]**: a local directory acting as the bucket.
//! - **[`MemoryStore`]**: a process-local map, for tests.
//!
//! # Configuration
//!
//! ```toml
//! [storage]
//! provider = "s3"
//! bucket = "pythonqatest"
//! region = "ap-south-1"
//! # endpoint_url = "http://localhost:9000"   # MinIO
//! ```
//!
//! # Environment Variables
//!
//! S3 credentials are read from:
//! - `AWS_ACCESS_KEY_ID`: required
//! - `AWS_SECRET_ACCESS_KEY`: required
//! - `AWS_SESSION_TOKEN`: optional (temporary credentials / IAM roles)

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::config::StorageConfig;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("invalid object key: '{0}'")]
    InvalidKey(String),
    #[error("missing credentials: {0}")]
    Credentials(String),
    #[error("{0}")]
    Request(String),
    #[error("S3 {operation} failed (HTTP {status}): {body}")]
    Api {
        operation: &'static str,
        status: u16,
        body: String,
    },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A single logical container of named objects.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Name of the container (bucket name, directory, or `"memory"`).
    fn container(&self) -> &str;

    /// Uploads the file at `local_path` under `key`, replacing any existing object.
    async fn put(&self, local_path: &Path, key: &str) -> Result<(), StorageError>;

    /// Lists every key in the container, in lexicographic order.
    async fn list(&self) -> Result<Vec<String>, StorageError>;

    /// Fetches an object's raw bytes.
    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError>;
}

/// Builds the store selected by `config.provider`.
pub fn create_store(config: &StorageConfig) -> anyhow::Result<Arc<dyn ObjectStore>> {
    match config.provider.as_str() {
        "s3" => Ok(Arc::new(S3Store::from_config(config)?)),
        "filesystem" => Ok(Arc::new(FsStore::new(config.root.clone()))),
        "memory" => Ok(Arc::new(MemoryStore::new())),
        other => anyhow::bail!("Unknown storage provider: {}", other),
    }
}

/// Keys written by this crate are flat file names: no separators, no parent
/// references. Reads from a bucket accept whatever key the listing returned.
fn validate_key(key: &str) -> Result<(), StorageError> {
    if key.is_empty() || key.contains('/') || key.contains('\\') || key == "." || key == ".." {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}

// ============ Memory ============

#[derive(Default)]
pub struct MemoryStore {
    objects: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores bytes directly, bypassing the local-file upload path.
    pub fn insert(&self, key: impl Into<String>, bytes: Vec<u8>) {
        self.objects
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.into(), bytes);
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    fn container(&self) -> &str {
        "memory"
    }

    async fn put(&self, local_path: &Path, key: &str) -> Result<(), StorageError> {
        validate_key(key)?;
        let bytes = tokio::fs::read(local_path).await?;
        self.insert(key, bytes);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>, StorageError> {
        let objects = self.objects.read().unwrap_or_else(|e| e.into_inner());
        Ok(objects.keys().cloned().collect())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let objects = self.objects.read().unwrap_or_else(|e| e.into_inner());
        objects
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }
}

// ============ Filesystem ============

pub struct FsStore {
    root: PathBuf,
    name: String,
}

impl FsStore {
    pub fn new(root: PathBuf) -> Self {
        let name = root.display().to_string();
        Self { root, name }
    }
}

#[async_trait]
impl ObjectStore for FsStore {
    fn container(&self) -> &str {
        &self.name
    }

    async fn put(&self, local_path: &Path, key: &str) -> Result<(), StorageError> {
        validate_key(key)?;
        tokio::fs::create_dir_all(&self.root).await?;
        tokio::fs::copy(local_path, self.root.join(key)).await?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>, StorageError> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                keys.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        validate_key(key)?;
        match tokio::fs::read(self.root.join(key)).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

// ============ S3 ============

type HmacSha256 = Hmac<Sha256>;

/// AWS credentials loaded from environment variables.
#[derive(Clone)]
pub struct AwsCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

impl AwsCredentials {
    pub fn new(access_key_id: String, secret_access_key: String, session_token: Option<String>) -> Self {
        Self {
            access_key_id,
            secret_access_key,
            session_token,
        }
    }

    /// Load credentials from `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`,
    /// and optionally `AWS_SESSION_TOKEN`.
    pub fn from_env() -> Result<Self, StorageError> {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID").map_err(|_| {
            StorageError::Credentials("AWS_ACCESS_KEY_ID environment variable not set".to_string())
        })?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY").map_err(|_| {
            StorageError::Credentials(
                "AWS_SECRET_ACCESS_KEY environment variable not set".to_string(),
            )
        })?;
        let session_token = std::env::var("AWS_SESSION_TOKEN").ok();
        Ok(Self::new(access_key_id, secret_access_key, session_token))
    }
}

/// S3 bucket client using signed REST calls.
pub struct S3Store {
    bucket: String,
    region: String,
    /// `scheme://host[:port]` for custom endpoints; `None` for AWS.
    endpoint: Option<String>,
    creds: AwsCredentials,
    client: reqwest::Client,
}

/// A request ready to send: full URL plus headers to attach.
struct SignedRequest {
    url: String,
    headers: Vec<(String, String)>,
}

impl S3Store {
    pub fn new(
        bucket: String,
        region: String,
        endpoint: Option<String>,
        creds: AwsCredentials,
    ) -> Self {
        Self {
            bucket,
            region,
            endpoint: endpoint.map(|e| e.trim_end_matches('/').to_string()),
            creds,
            client: reqwest::Client::new(),
        }
    }

    pub fn from_config(config: &StorageConfig) -> Result<Self, StorageError> {
        Ok(Self::new(
            config.bucket.clone(),
            config.region.clone(),
            config.endpoint_url.clone(),
            AwsCredentials::from_env()?,
        ))
    }

    /// Host header value: the custom endpoint's authority, or the
    /// virtual-hosted AWS name `<bucket>.s3.<region>.amazonaws.com`.
    fn host(&self) -> String {
        match self.endpoint {
            Some(ref endpoint) => endpoint
                .trim_start_matches("https://")
                .trim_start_matches("http://")
                .to_string(),
            None => format!("{}.s3.{}.amazonaws.com", self.bucket, self.region),
        }
    }

    fn base_url(&self) -> String {
        match self.endpoint {
            Some(ref endpoint) if endpoint.starts_with("http://") || endpoint.starts_with("https://") => {
                endpoint.clone()
            }
            _ => format!("https://{}", self.host()),
        }
    }

    /// Canonical URI for an object key, or for the bucket when `key` is `None`.
    fn canonical_uri(&self, key: Option<&str>) -> String {
        let encoded_key = key
            .map(|k| k.split('/').map(uri_encode).collect::<Vec<_>>().join("/"))
            .unwrap_or_default();
        match self.endpoint {
            // Path-style addressing for S3-compatible services.
            Some(_) => format!("/{}/{}", uri_encode(&self.bucket), encoded_key),
            None => format!("/{}", encoded_key),
        }
    }

    fn sign(
        &self,
        method: &str,
        key: Option<&str>,
        query_params: &[(String, String)],
        payload_hash: &str,
        now: DateTime<Utc>,
    ) -> SignedRequest {
        let host = self.host();
        let date_stamp = now.format("%Y%m%d").to_string();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();

        let mut sorted_params = query_params.to_vec();
        sorted_params.sort();
        let canonical_querystring = sorted_params
            .iter()
            .map(|(k, v)| format!("{}={}", uri_encode(k), uri_encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        let mut headers = vec![
            ("host".to_string(), host),
            ("x-amz-content-sha256".to_string(), payload_hash.to_string()),
            ("x-amz-date".to_string(), amz_date.clone()),
        ];
        if let Some(ref token) = self.creds.session_token {
            headers.push(("x-amz-security-token".to_string(), token.clone()));
        }
        headers.sort();

        let signed_headers = headers
            .iter()
            .map(|(k, _)| k.as_str())
            .collect::<Vec<_>>()
            .join(";");
        let canonical_headers: String = headers
            .iter()
            .map(|(k, v)| format!("{}:{}\n", k, v))
            .collect();

        let canonical_uri = self.canonical_uri(key);
        let canonical_request = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            method,
            canonical_uri,
            canonical_querystring,
            canonical_headers,
            signed_headers,
            payload_hash
        );

        let credential_scope = format!("{}/{}/s3/aws4_request", date_stamp, self.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            credential_scope,
            hex_sha256(canonical_request.as_bytes())
        );
        let signing_key =
            derive_signing_key(&self.creds.secret_access_key, &date_stamp, &self.region, "s3");
        let signature = hex_hmac_sha256(&signing_key, string_to_sign.as_bytes());
        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            self.creds.access_key_id, credential_scope, signed_headers, signature
        );

        let mut url = format!("{}{}", self.base_url(), canonical_uri);
        if !canonical_querystring.is_empty() {
            url.push('?');
            url.push_str(&canonical_querystring);
        }

        // reqwest derives Host from the URL; send the rest explicitly.
        let mut out_headers: Vec<(String, String)> =
            headers.into_iter().filter(|(k, _)| k != "host").collect();
        out_headers.push(("authorization".to_string(), authorization));
        SignedRequest {
            url,
            headers: out_headers,
        }
    }

    fn request(&self, method: reqwest::Method, signed: SignedRequest) -> reqwest::RequestBuilder {
        let mut builder = self.client.request(method, &signed.url);
        for (k, v) in &signed.headers {
            builder = builder.header(k.as_str(), v.as_str());
        }
        builder
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    fn container(&self) -> &str {
        &self.bucket
    }

    async fn put(&self, local_path: &Path, key: &str) -> Result<(), StorageError> {
        validate_key(key)?;
        let body = tokio::fs::read(local_path).await?;
        let payload_hash = hex_sha256(&body);
        let signed = self.sign("PUT", Some(key), &[], &payload_hash, Utc::now());

        let resp = self
            .request(reqwest::Method::PUT, signed)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                StorageError::Request(format!("Failed to put s3://{}/{}: {}", self.bucket, key, e))
            })?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(StorageError::Api {
                operation: "PutObject",
                status,
                body: body.chars().take(500).collect(),
            });
        }
        tracing::info!(bucket = %self.bucket, key, "uploaded object");
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>, StorageError> {
        let mut keys = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut query_params = vec![
                ("list-type".to_string(), "2".to_string()),
                ("max-keys".to_string(), "1000".to_string()),
            ];
            if let Some(ref token) = continuation_token {
                query_params.push(("continuation-token".to_string(), token.clone()));
            }

            let signed = self.sign("GET", None, &query_params, &hex_sha256(b""), Utc::now());
            let resp = self
                .request(reqwest::Method::GET, signed)
                .send()
                .await
                .map_err(|e| {
                    StorageError::Request(format!(
                        "Failed to list S3 objects in s3://{}: {}",
                        self.bucket, e
                    ))
                })?;

            if !resp.status().is_success() {
                let status = resp.status().as_u16();
                let body = resp.text().await.unwrap_or_default();
                return Err(StorageError::Api {
                    operation: "ListObjectsV2",
                    status,
                    body: body.chars().take(500).collect(),
                });
            }

            let xml_body = resp
                .text()
                .await
                .map_err(|e| StorageError::Request(e.to_string()))?;
            let page = parse_list_objects_response(&xml_body);
            keys.extend(page.keys);

            match (page.is_truncated, page.next_token) {
                (true, Some(token)) => continuation_token = Some(token),
                _ => break,
            }
        }

        keys.sort();
        Ok(keys)
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        if key.is_empty() {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        let signed = self.sign("GET", Some(key), &[], &hex_sha256(b""), Utc::now());
        let resp = self
            .request(reqwest::Method::GET, signed)
            .send()
            .await
            .map_err(|e| {
                StorageError::Request(format!("Failed to get s3://{}/{}: {}", self.bucket, key, e))
            })?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(StorageError::NotFound(key.to_string()));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(StorageError::Api {
                operation: "GetObject",
                status: status.as_u16(),
                body: body.chars().take(500).collect(),
            });
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| StorageError::Request(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

// ============ AWS SigV4 Helpers ============

fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn hex_hmac_sha256(key: &[u8], data: &[u8]) -> String {
    hex::encode(hmac_sha256(key, data))
}

/// Derive the AWS SigV4 signing key for a given date, region, and service.
///
/// ```text
/// kDate    = HMAC("AWS4" + secret, dateStamp)
/// kRegion  = HMAC(kDate, region)
/// kService = HMAC(kRegion, service)
/// kSigning = HMAC(kService, "aws4_request")
/// ```
fn derive_signing_key(secret_key: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(
        format!("AWS4{}", secret_key).as_bytes(),
        date_stamp.as_bytes(),
    );
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// URI-encode a string per RFC 3986, leaving only `A-Z a-z 0-9 - _ . ~`.
fn uri_encode(s: &str) -> String {
    let mut result = String::new();
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => {
                result.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    result
}

// ============ XML Parsing (minimal, no extra deps) ============

struct ListPage {
    keys: Vec<String>,
    is_truncated: bool,
    next_token: Option<String>,
}

/// Parse a `ListObjectsV2` XML response. "Directory" placeholder keys
/// ending in `/` are skipped.
fn parse_list_objects_response(xml: &str) -> ListPage {
    let is_truncated = extract_xml_value(xml, "IsTruncated")
        .map(|v| v == "true")
        .unwrap_or(false);
    let next_token = extract_xml_value(xml, "NextContinuationToken");

    let mut keys = Vec::new();
    let mut remaining = xml;
    while let Some(start) = remaining.find("<Contents>") {
        let block_start = start + "<Contents>".len();
        let Some(end) = remaining[block_start..].find("</Contents>") else {
            break;
        };
        let block = &remaining[block_start..block_start + end];
        if let Some(key) = extract_xml_value(block, "Key") {
            if !key.is_empty() && !key.ends_with('/') {
                keys.push(xml_unescape(&key));
            }
        }
        remaining = &remaining[block_start + end + "</Contents>".len()..];
    }

    ListPage {
        keys,
        is_truncated,
        next_token,
    }
}

/// Extract the text content of an XML tag (simple, non-nested).
fn extract_xml_value(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = xml.find(&open)? + open.len();
    let end = xml[start..].find(&close)?;
    Some(xml[start..start + end].to_string())
}

fn xml_unescape(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
