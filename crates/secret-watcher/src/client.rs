//! Minimal client for the Kubernetes Secret API, authenticated with a
//! pod-mounted service-account token.

use std::time::Duration;

use crate::error::{Error, Result};
use crate::model::SecretResponse;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Reads a single namespaced Secret over the cluster API.
pub struct KubeSecretClient {
    http: reqwest::Client,
    api_server: String,
    namespace: String,
    secret_name: String,
    token: String,
}

impl KubeSecretClient {
    /// Builds a client against an arbitrary API server, authenticating with
    /// `token` and optionally pinning a CA certificate (PEM-encoded). Used
    /// directly by tests; in-cluster construction reads these from the
    /// pod's mounted service-account files.
    pub fn new(
        api_server: String,
        namespace: String,
        secret_name: String,
        token: String,
        ca_cert_pem: Option<&[u8]>,
    ) -> Result<Self> {
        let mut builder = reqwest::Client::builder().timeout(REQUEST_TIMEOUT);
        if let Some(pem) = ca_cert_pem {
            let cert = reqwest::Certificate::from_pem(pem)
                .map_err(|e| Error::Http(format!("invalid CA certificate: {e}")))?;
            builder = builder.add_root_certificate(cert);
        }
        let http = builder
            .build()
            .map_err(|e| Error::Http(format!("failed to build http client: {e}")))?;
        Ok(Self { http, api_server, namespace, secret_name, token })
    }

    /// Reads the pod-mounted service-account token, CA bundle, and the
    /// in-cluster API server address (`KUBERNETES_SERVICE_HOST`/`_PORT`).
    pub fn from_in_cluster(namespace: String, secret_name: String) -> Result<Self> {
        const TOKEN_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";
        const CA_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/ca.crt";

        let token = std::fs::read_to_string(TOKEN_PATH)
            .map_err(|e| Error::Http(format!("failed to read service-account token: {e}")))?
            .trim()
            .to_string();
        let ca_cert = std::fs::read(CA_PATH).ok();
        let host = std::env::var("KUBERNETES_SERVICE_HOST")
            .map_err(|_| Error::Http("KUBERNETES_SERVICE_HOST not set".into()))?;
        let port = std::env::var("KUBERNETES_SERVICE_PORT").unwrap_or_else(|_| "443".into());
        let api_server = format!("https://{host}:{port}");

        Self::new(api_server, namespace, secret_name, token, ca_cert.as_deref())
    }

    /// `GET /api/v1/namespaces/<ns>/secrets/<name>`.
    pub async fn fetch(&self) -> Result<SecretResponse> {
        let url = format!(
            "{}/api/v1/namespaces/{}/secrets/{}",
            self.api_server, self.namespace, self.secret_name
        );
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| Error::Http(format!("request to {url} failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::Http(format!(
                "secret fetch returned status {}",
                response.status()
            )));
        }

        response
            .json::<SecretResponse>()
            .await
            .map_err(|e| Error::Http(format!("failed to parse secret response: {e}")))
    }
}
