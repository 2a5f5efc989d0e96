//! S3-compatible object store backend.
//!
//! Talks plain HTTP PUT against `{endpoint}/{bucket}/{key}` with Basic
//! auth. This covers MinIO and anything else that accepts path-style
//! puts; no multipart, no signing ceremony.

use anyhow::{anyhow, Context, Result};
use base64::Engine as _;
use log::debug;

use crate::config::ObjectStoreSettings;
use crate::storage::{Backend, UploadShot};

const REQUEST_TIMEOUT_SECS: u64 = 10;

pub struct ObjectStoreBackend {
    agent: ureq::Agent,
    endpoint: String,
    bucket: String,
    auth_header: Option<String>,
}

impl ObjectStoreBackend {
    pub fn new(settings: &ObjectStoreSettings) -> Result<Self> {
        let endpoint = settings.endpoint.trim_end_matches('/').to_string();
        let auth_header = match (&settings.access_key, &settings.secret_key) {
            (Some(access), Some(secret)) => {
                let token = base64::engine::general_purpose::STANDARD
                    .encode(format!("{}:{}", access, secret));
                Some(format!("Basic {}", token))
            }
            (None, None) => None,
            _ => {
                return Err(anyhow!(
                    "object_store needs both access_key and secret_key, or neither"
                ))
            }
        };
        let agent = ureq::AgentBuilder::new()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build();
        Ok(Self {
            agent,
            endpoint,
            bucket: settings.bucket.clone(),
            auth_header,
        })
    }

    fn bucket_url(&self) -> String {
        format!("{}/{}", self.endpoint, self.bucket)
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/{}", self.bucket_url(), key)
    }

    fn request(&self, method: &str, url: &str) -> ureq::Request {
        let mut req = self.agent.request(method, url);
        if let Some(auth) = &self.auth_header {
            req = req.set("Authorization", auth);
        }
        req
    }
}

impl Backend for ObjectStoreBackend {
    fn name(&self) -> &'static str {
        "object_store"
    }

    fn check(&self) -> bool {
        match self.request("HEAD", &self.bucket_url()).call() {
            Ok(_) => true,
            // 404 means reachable but not yet configured, still a pass.
            Err(ureq::Error::Status(code, _)) => code == 404,
            Err(_) => false,
        }
    }

    fn configure(&mut self) -> Result<()> {
        match self.request("PUT", &self.bucket_url()).call() {
            Ok(_) => Ok(()),
            // Bucket already exists.
            Err(ureq::Error::Status(409, _)) => Ok(()),
            Err(e) => Err(anyhow!("failed to create bucket {}: {}", self.bucket, e)),
        }
    }

    fn upload(&mut self, shot: &UploadShot) -> Result<()> {
        let key = shot.object_key();
        let url = self.object_url(&key);
        self.request("PUT", &url)
            .set("Content-Type", "image/jpeg")
            .set("x-amz-meta-stamp", &shot.stamp.0.to_string())
            .set("x-amz-meta-regions", &shot.regions.len().to_string())
            .send_bytes(&shot.jpeg)
            .with_context(|| format!("upload of {} failed", key))?;
        debug!("uploaded {} ({} bytes)", key, shot.jpeg.len());
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> ObjectStoreSettings {
        ObjectStoreSettings {
            enabled: true,
            num_workers: 1,
            endpoint: "http://store.example:9000/".to_string(),
            bucket: "frames".to_string(),
            access_key: Some("ak".to_string()),
            secret_key: Some("sk".to_string()),
        }
    }

    #[test]
    fn endpoint_trailing_slash_is_trimmed() {
        let backend = ObjectStoreBackend::new(&settings()).expect("backend");
        assert_eq!(backend.bucket_url(), "http://store.example:9000/frames");
        assert_eq!(
            backend.object_url("a/b.jpg"),
            "http://store.example:9000/frames/a/b.jpg"
        );
    }

    #[test]
    fn credentials_must_come_in_pairs() {
        let mut s = settings();
        s.secret_key = None;
        assert!(ObjectStoreBackend::new(&s).is_err());
    }

    #[test]
    fn missing_credentials_mean_no_auth_header() {
        let mut s = settings();
        s.access_key = None;
        s.secret_key = None;
        let backend = ObjectStoreBackend::new(&s).expect("backend");
        assert!(backend.auth_header.is_none());
    }

    #[test]
    fn basic_auth_header_is_encoded() {
        let backend = ObjectStoreBackend::new(&settings()).expect("backend");
        // "ak:sk" in base64.
        assert_eq!(backend.auth_header.as_deref(), Some("Basic YWs6c2s="));
    }
}
