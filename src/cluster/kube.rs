//! Kubernetes REST API and KubeVirt serial console client

use super::resources::{
    ConfigMap, KubeVirt, NetworkAttachmentDefinition, ObjectList, VirtualMachineInstance,
};
use super::{ClusterError, ClusterResult, ConsoleChannel, ControlPlane};
use crate::config::ClusterAccess;
use crate::error::{AppError, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use reqwest::{Client, Method, StatusCode};
use rustls::pki_types::{pem::PemObject, CertificateDer};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, AUTHORIZATION, SEC_WEBSOCKET_PROTOCOL};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{Connector, MaybeTlsStream, WebSocketStream};
use url::Url;

const CONSOLE_SUBPROTOCOL: &str = "plain.kubevirt.io";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// [`ControlPlane`] over the Kubernetes API server
#[derive(Clone)]
pub struct KubeClient {
    http: Client,
    base: Url,
    token: String,
    /// TLS settings for the console websocket; webpki roots when absent
    console_tls: Option<Arc<rustls::ClientConfig>>,
    /// Upper bound for the console websocket handshake
    console_connect_timeout: Duration,
}

impl KubeClient {
    /// Build a client from configured cluster access (token file, CA bundle)
    pub fn from_access(access: &ClusterAccess) -> Result<Self> {
        let token = std::fs::read_to_string(&access.token_file).map_err(|e| {
            AppError::config(format!(
                "failed to read API token from {}: {}",
                access.token_file.display(),
                e
            ))
        })?;

        let ca_pem = match &access.ca_file {
            Some(path) => Some(std::fs::read(path).map_err(|e| {
                AppError::config(format!("failed to read CA bundle {}: {}", path.display(), e))
            })?),
            None => None,
        };

        Self::with_token(access.api_server.clone(), token.trim().to_string(), ca_pem.as_deref())
    }

    /// Build a client from an explicit token and optional PEM CA bundle
    pub fn with_token(base: Url, token: String, ca_pem: Option<&[u8]>) -> Result<Self> {
        let mut builder = Client::builder()
            .use_rustls_tls()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(format!("{}/{}", crate::PKG_NAME, crate::VERSION));

        let mut console_tls = None;
        if let Some(pem) = ca_pem {
            for certificate in reqwest::Certificate::from_pem_bundle(pem)
                .map_err(|e| AppError::config(format!("invalid CA bundle: {}", e)))?
            {
                builder = builder.add_root_certificate(certificate);
            }
            console_tls = Some(Arc::new(console_tls_config(pem)?));
        }

        let http = builder
            .build()
            .map_err(|e| AppError::config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base,
            token,
            console_tls,
            console_connect_timeout: CONNECT_TIMEOUT,
        })
    }

    /// Bound the console websocket handshake by `timeout` instead of the default
    pub fn with_console_connect_timeout(mut self, timeout: Duration) -> Self {
        self.console_connect_timeout = timeout;
        self
    }

    fn url(&self, path: &str) -> ClusterResult<Url> {
        self.base
            .join(path)
            .map_err(|e| ClusterError::Setup(format!("invalid API path {}: {}", path, e)))
    }

    async fn request<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> ClusterResult<reqwest::Response> {
        let mut request = self
            .http
            .request(method, self.url(path)?)
            .bearer_auth(&self.token)
            .header(reqwest::header::ACCEPT, "application/json");
        if let Some(body) = body {
            request = request.json(body);
        }

        request
            .send()
            .await
            .map_err(|e| ClusterError::Transport(format!("{} {}", path, e)))
    }

    async fn read<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
        kind: &'static str,
        namespace: &str,
        name: &str,
    ) -> ClusterResult<T> {
        let resource = format!("{} {}/{}", kind, namespace, name);
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Err(ClusterError::not_found(kind, namespace, name));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| ClusterError::Transport(format!("reading {}: {}", resource, e)))?;

        if !status.is_success() {
            return Err(ClusterError::Api {
                status: status.as_u16(),
                resource,
                message: api_status_message(&body),
            });
        }

        serde_json::from_slice(&body).map_err(|e| ClusterError::Decode {
            resource,
            message: e.to_string(),
        })
    }

    fn console_url(&self, namespace: &str, name: &str) -> ClusterResult<Url> {
        let mut url = self.url(&format!(
            "/apis/subresources.kubevirt.io/v1/namespaces/{}/virtualmachineinstances/{}/console",
            namespace, name
        ))?;
        let scheme = if url.scheme() == "http" { "ws" } else { "wss" };
        url.set_scheme(scheme)
            .map_err(|_| ClusterError::Setup(format!("cannot use {} for a websocket", url)))?;
        Ok(url)
    }
}

fn config_map_path(namespace: &str, name: &str) -> String {
    format!("/api/v1/namespaces/{}/configmaps/{}", namespace, name)
}

fn vmi_collection_path(namespace: &str) -> String {
    format!("/apis/kubevirt.io/v1/namespaces/{}/virtualmachineinstances", namespace)
}

/// `message` of a Kubernetes `Status` body, or the raw body
fn api_status_message(body: &[u8]) -> String {
    serde_json::from_slice::<serde_json::Value>(body)
        .ok()
        .and_then(|value| value.get("message").and_then(|m| m.as_str()).map(String::from))
        .unwrap_or_else(|| String::from_utf8_lossy(body).trim().to_string())
}

/// Copy of a ConfigMap suitable for an unconditional replace
pub(crate) fn strip_for_update(config_map: &ConfigMap) -> ConfigMap {
    let mut update = config_map.clone();
    update.metadata.resource_version = None;
    update
}

fn console_tls_config(ca_pem: &[u8]) -> Result<rustls::ClientConfig> {
    let mut roots = rustls::RootCertStore::empty();
    for certificate in CertificateDer::pem_slice_iter(ca_pem) {
        let certificate =
            certificate.map_err(|e| AppError::config(format!("invalid CA certificate: {:?}", e)))?;
        roots
            .add(certificate)
            .map_err(|e| AppError::config(format!("unusable CA certificate: {}", e)))?;
    }

    let config = rustls::ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| AppError::config(format!("TLS setup failed: {}", e)))?
    .with_root_certificates(roots)
    .with_no_client_auth();

    Ok(config)
}

#[async_trait]
impl ControlPlane for KubeClient {
    async fn get_config_map(&self, namespace: &str, name: &str) -> ClusterResult<ConfigMap> {
        let response = self
            .request::<()>(Method::GET, &config_map_path(namespace, name), None)
            .await?;
        self.read(response, "ConfigMap", namespace, name).await
    }

    async fn update_config_map(&self, config_map: &ConfigMap) -> ClusterResult<ConfigMap> {
        let namespace = config_map.metadata.namespace.as_deref().unwrap_or_default();
        let name = &config_map.metadata.name;
        let update = strip_for_update(config_map);

        let response = self
            .request(Method::PUT, &config_map_path(namespace, name), Some(&update))
            .await?;
        self.read(response, "ConfigMap", namespace, name).await
    }

    async fn list_kubevirts(&self) -> ClusterResult<Vec<KubeVirt>> {
        let response = self
            .request::<()>(Method::GET, "/apis/kubevirt.io/v1/kubevirts", None)
            .await?;
        let list: ObjectList<KubeVirt> = self.read(response, "KubeVirt", "*", "*").await?;
        Ok(list.items)
    }

    async fn get_network_attachment_definition(
        &self,
        namespace: &str,
        name: &str,
    ) -> ClusterResult<NetworkAttachmentDefinition> {
        let path = format!(
            "/apis/k8s.cni.cncf.io/v1/namespaces/{}/network-attachment-definitions/{}",
            namespace, name
        );
        let response = self.request::<()>(Method::GET, &path, None).await?;
        self.read(response, "NetworkAttachmentDefinition", namespace, name)
            .await
    }

    async fn create_vmi(&self, vmi: &VirtualMachineInstance) -> ClusterResult<VirtualMachineInstance> {
        let namespace = vmi.metadata.namespace.as_deref().unwrap_or_default();
        let response = self
            .request(Method::POST, &vmi_collection_path(namespace), Some(vmi))
            .await?;
        self.read(response, "VirtualMachineInstance", namespace, &vmi.metadata.name)
            .await
    }

    async fn get_vmi(&self, namespace: &str, name: &str) -> ClusterResult<VirtualMachineInstance> {
        let path = format!("{}/{}", vmi_collection_path(namespace), name);
        let response = self.request::<()>(Method::GET, &path, None).await?;
        self.read(response, "VirtualMachineInstance", namespace, name).await
    }

    async fn delete_vmi(&self, namespace: &str, name: &str) -> ClusterResult<()> {
        let path = format!("{}/{}", vmi_collection_path(namespace), name);
        let response = self.request::<()>(Method::DELETE, &path, None).await?;
        let _: serde_json::Value = self
            .read(response, "VirtualMachineInstance", namespace, name)
            .await?;
        Ok(())
    }

    async fn open_console(&self, namespace: &str, name: &str) -> ClusterResult<Box<dyn ConsoleChannel>> {
        let url = self.console_url(namespace, name)?;

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| ClusterError::Console(format!("invalid console request: {}", e)))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.token))
            .map_err(|e| ClusterError::Setup(format!("token is not a valid header value: {}", e)))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);
        request
            .headers_mut()
            .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(CONSOLE_SUBPROTOCOL));

        let connector = self.console_tls.clone().map(Connector::Rustls);
        let handshake = tokio_tungstenite::connect_async_tls_with_config(request, None, false, connector);
        let (stream, _response) = tokio::time::timeout(self.console_connect_timeout, handshake)
            .await
            .map_err(|_| {
                ClusterError::Timeout(format!(
                    "console of {}/{} did not answer within {}",
                    namespace,
                    name,
                    crate::models::duration_str::format(self.console_connect_timeout)
                ))
            })?
            .map_err(|e| ClusterError::Console(format!("console of {}/{}: {}", namespace, name, e)))?;

        Ok(Box::new(WebSocketConsole { stream }))
    }
}

/// Serial console carried over a `plain.kubevirt.io` websocket
pub struct WebSocketConsole {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl ConsoleChannel for WebSocketConsole {
    async fn send(&mut self, data: &[u8]) -> ClusterResult<()> {
        self.stream
            .send(Message::Binary(data.to_vec().into()))
            .await
            .map_err(|e| ClusterError::Console(e.to_string()))
    }

    async fn recv(&mut self) -> ClusterResult<Option<Vec<u8>>> {
        loop {
            match self.stream.next().await {
                None | Some(Ok(Message::Close(_))) => return Ok(None),
                Some(Ok(Message::Binary(data))) => return Ok(Some(data.to_vec())),
                Some(Ok(Message::Text(text))) => return Ok(Some(text.as_str().as_bytes().to_vec())),
                Some(Ok(_)) => continue, // Ping/Pong handled by tungstenite
                Some(Err(e)) => return Err(ClusterError::Console(e.to_string())),
            }
        }
    }

    async fn close(&mut self) -> ClusterResult<()> {
        self.stream
            .close(None)
            .await
            .map_err(|e| ClusterError::Console(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client(server: &MockServer) -> KubeClient {
        KubeClient::with_token(Url::parse(&server.uri()).unwrap(), "test-token".to_string(), None)
            .unwrap()
    }

    #[tokio::test]
    async fn test_get_config_map_sends_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/namespaces/kiagnose/configmaps/results"))
            .and(header("authorization", "Bearer test-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "apiVersion": "v1",
                "kind": "ConfigMap",
                "metadata": {"name": "results", "namespace": "kiagnose", "resourceVersion": "7"},
                "data": {"existing": "value"}
            })))
            .mount(&server)
            .await;

        let config_map = client(&server).await.get_config_map("kiagnose", "results").await.unwrap();
        assert_eq!(config_map.data["existing"], "value");
        assert_eq!(config_map.metadata.resource_version.as_deref(), Some("7"));
    }

    #[tokio::test]
    async fn test_missing_object_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/apis/k8s.cni.cncf.io/v1/namespaces/default/network-attachment-definitions/blue-net"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "kind": "Status", "message": "not found", "code": 404
            })))
            .mount(&server)
            .await;

        let error = client(&server)
            .await
            .get_network_attachment_definition("default", "blue-net")
            .await
            .unwrap_err();
        assert_eq!(error, ClusterError::not_found("NetworkAttachmentDefinition", "default", "blue-net"));
    }

    #[tokio::test]
    async fn test_api_error_carries_status_message() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/apis/kubevirt.io/v1/kubevirts"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "kind": "Status",
                "message": "kubevirts.kubevirt.io is forbidden",
                "code": 403
            })))
            .mount(&server)
            .await;

        match client(&server).await.list_kubevirts().await.unwrap_err() {
            ClusterError::Api { status, message, .. } => {
                assert_eq!(status, 403);
                assert_eq!(message, "kubevirts.kubevirt.io is forbidden");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_list_kubevirts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/apis/kubevirt.io/v1/kubevirts"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [{
                    "metadata": {"name": "kubevirt", "namespace": "kubevirt"},
                    "status": {"conditions": [{"type": "Available", "status": "True"}]}
                }]
            })))
            .mount(&server)
            .await;

        let kubevirts = client(&server).await.list_kubevirts().await.unwrap();
        assert_eq!(kubevirts.len(), 1);
        assert!(kubevirts[0].is_available());
    }

    #[tokio::test]
    async fn test_update_config_map_puts_data() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/api/v1/namespaces/kiagnose/configmaps/results"))
            .and(body_partial_json(json!({"data": {"status.succeeded": "true"}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "metadata": {"name": "results", "namespace": "kiagnose"},
                "data": {"status.succeeded": "true"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut config_map = ConfigMap::new("kiagnose", "results");
        config_map.metadata.resource_version = Some("7".to_string());
        config_map
            .data
            .insert("status.succeeded".to_string(), "true".to_string());

        let updated = client(&server).await.update_config_map(&config_map).await.unwrap();
        assert_eq!(updated.data["status.succeeded"], "true");
    }

    #[tokio::test]
    async fn test_create_and_delete_vmi() {
        let server = MockServer::start().await;
        let vmi = json!({
            "apiVersion": "kubevirt.io/v1",
            "kind": "VirtualMachineInstance",
            "metadata": {"name": "probe", "namespace": "kiagnose"},
            "spec": {"domain": {"devices": {}}}
        });
        Mock::given(method("POST"))
            .and(path("/apis/kubevirt.io/v1/namespaces/kiagnose/virtualmachineinstances"))
            .and(body_partial_json(json!({"metadata": {"name": "probe"}})))
            .respond_with(ResponseTemplate::new(201).set_body_json(vmi.clone()))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/apis/kubevirt.io/v1/namespaces/kiagnose/virtualmachineinstances/probe"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"kind": "Status", "status": "Success"})))
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&server).await;
        let request: VirtualMachineInstance = serde_json::from_value(vmi).unwrap();
        let created = client.create_vmi(&request).await.unwrap();
        assert_eq!(created.metadata.name, "probe");
        client.delete_vmi("kiagnose", "probe").await.unwrap();
    }

    #[test]
    fn test_strip_for_update_drops_resource_version() {
        let mut config_map = ConfigMap::new("kiagnose", "results");
        config_map.metadata.resource_version = Some("12".to_string());
        assert!(strip_for_update(&config_map).metadata.resource_version.is_none());
    }

    #[test]
    fn test_console_url_scheme() {
        let secure = KubeClient::with_token(Url::parse("https://10.0.0.1:6443").unwrap(), "t".into(), None).unwrap();
        assert_eq!(
            secure.console_url("kiagnose", "probe").unwrap().as_str(),
            "wss://10.0.0.1:6443/apis/subresources.kubevirt.io/v1/namespaces/kiagnose/virtualmachineinstances/probe/console"
        );

        let plain = KubeClient::with_token(Url::parse("http://127.0.0.1:8001").unwrap(), "t".into(), None).unwrap();
        assert!(plain.console_url("ns", "vm").unwrap().as_str().starts_with("ws://"));
    }

    #[tokio::test]
    async fn test_silent_console_handshake_times_out() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            // Accept and never answer the upgrade.
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });

        let client = KubeClient::with_token(
            Url::parse(&format!("http://{}", address)).unwrap(),
            "t".into(),
            None,
        )
        .unwrap()
        .with_console_connect_timeout(Duration::from_millis(200));

        let outcome = tokio::time::timeout(Duration::from_secs(10), client.open_console("kiagnose", "target"))
            .await
            .expect("handshake wait must be bounded");
        match outcome {
            Err(error) => {
                assert!(error.is_timeout(), "{}", error);
                assert!(error.to_string().contains("kiagnose/target"));
            }
            Ok(_) => panic!("a silent server must not yield a console"),
        }
        server.abort();
    }

    #[test]
    fn test_api_status_message_falls_back_to_body() {
        assert_eq!(api_status_message(b"{\"message\": \"denied\"}"), "denied");
        assert_eq!(api_status_message(b"gateway timeout\n"), "gateway timeout");
    }
}
