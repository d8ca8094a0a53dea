use std::time::Instant;

use reqwest::{
    header::{self, HeaderValue},
    Client, Method, RequestBuilder, Response,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    config::Config,
    error::{EncephalonError, Result},
    structs::{
        ApiVersion, Dicom, ListQuery, NewMeasurement, NewScan, NewStudy, Page, Product, Report,
        Scan, Study, StudyUpdate, UserMeasurement, WebhookEndpoint, WebhookUrl,
    },
};

/// The two `Authorization` header shapes accepted by the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    /// `Authorization: Bearer <token>`
    Bearer,
    /// `Authorization: Token <token>`
    Token,
}

impl AuthScheme {
    fn prefix(&self) -> &'static str {
        match self {
            AuthScheme::Bearer => "Bearer",
            AuthScheme::Token => "Token",
        }
    }
}

/// REST collections exposed under `/api/v2/`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Study,
    Dicom,
    Scan,
    Report,
    Webhook,
    Measurement,
    AllStudies,
}

impl Resource {
    /// Path segment of the collection.
    pub fn collection(&self) -> &'static str {
        match self {
            Resource::Study => "studies",
            Resource::Dicom => "dicoms",
            Resource::Scan => "scans",
            Resource::Report => "reports",
            Resource::Webhook => "webhook",
            Resource::Measurement => "measurements",
            Resource::AllStudies => "all_studies",
        }
    }

    /// The remote runs two authentication schemes side by side, each
    /// collection only accepts one of them.
    pub fn auth_scheme(&self) -> AuthScheme {
        match self {
            Resource::Study | Resource::Dicom | Resource::Scan => AuthScheme::Bearer,
            Resource::Report | Resource::Webhook | Resource::Measurement | Resource::AllStudies => {
                AuthScheme::Token
            }
        }
    }
}

/// Authenticated accessor for the Encephalon REST API.
///
/// The generic [list](EncephalonClient::list), [get](EncephalonClient::get),
/// [create](EncephalonClient::create), [update](EncephalonClient::update) and
/// [delete](EncephalonClient::delete) work on any [Resource]; the typed
/// methods below them are thin wrappers fixing the resource and the payload
/// types.
///
/// Any non-success answer becomes [EncephalonError::RemoteRequest] with the
/// status code and the response body.
#[derive(Debug, Clone)]
pub struct EncephalonClient {
    client: Client,
    config: Config,
}

impl EncephalonClient {
    pub fn new(config: Config) -> Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static("application/json"),
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout())
            .build()?;

        Ok(EncephalonClient { client, config })
    }

    /// Client configured from the `API` and `API_TOKEN` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::new(Config::from_env()?)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// `{API}/api/v2/{path}`
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/api/v2/{}", self.config.api_url(), path)
    }

    pub fn collection_url(&self, resource: Resource) -> String {
        self.endpoint(&format!("{}/", resource.collection()))
    }

    pub fn item_url(&self, resource: Resource, id: &str) -> String {
        self.endpoint(&format!("{}/{}/", resource.collection(), id))
    }

    fn authorization(&self, scheme: AuthScheme) -> Result<HeaderValue> {
        let mut value =
            HeaderValue::from_str(&format!("{} {}", scheme.prefix(), self.config.api_token()))?;
        value.set_sensitive(true);
        Ok(value)
    }

    /// Starts a request carrying the credential in the given scheme.
    pub(crate) fn request(
        &self,
        method: Method,
        url: &str,
        scheme: AuthScheme,
    ) -> Result<RequestBuilder> {
        Ok(self
            .client
            .request(method, url)
            .header(header::AUTHORIZATION, self.authorization(scheme)?))
    }

    /// Sends the request and turns any non-success status into an error.
    pub(crate) async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let request = request.build()?;
        let method = request.method().clone();
        let url = request.url().clone();

        let start = Instant::now();
        let response = self.client.execute(request).await?;
        let status = response.status();

        debug!("{} {} -> {} in {:?}", method, url, status, start.elapsed());

        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        warn!("{} {} failed with status {}", method, url, status);
        Err(EncephalonError::RemoteRequest {
            status: status.as_u16(),
            body,
        })
    }

    pub(crate) async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = self.send(request).await?;
        Ok(response.json::<T>().await?)
    }

    async fn get_path<T: DeserializeOwned>(&self, path: &str, scheme: AuthScheme) -> Result<T> {
        let request = self.request(Method::GET, &self.endpoint(path), scheme)?;
        self.send_json(request).await
    }

    // Generic resource access

    pub async fn list<T: DeserializeOwned>(
        &self,
        resource: Resource,
        query: &ListQuery,
    ) -> Result<Page<T>> {
        let request = self
            .request(
                Method::GET,
                &self.collection_url(resource),
                resource.auth_scheme(),
            )?
            .query(&query.to_pairs());
        self.send_json(request).await
    }

    pub async fn get<T: DeserializeOwned>(&self, resource: Resource, id: &str) -> Result<T> {
        let request = self.request(
            Method::GET,
            &self.item_url(resource, id),
            resource.auth_scheme(),
        )?;
        self.send_json(request).await
    }

    pub async fn create<B, T>(&self, resource: Resource, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let request = self
            .request(
                Method::POST,
                &self.collection_url(resource),
                resource.auth_scheme(),
            )?
            .json(body);
        self.send_json(request).await
    }

    /// Partial update, sent as `PATCH`.
    pub async fn update<B, T>(&self, resource: Resource, id: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let request = self
            .request(
                Method::PATCH,
                &self.item_url(resource, id),
                resource.auth_scheme(),
            )?
            .json(body);
        self.send_json(request).await
    }

    pub async fn delete(&self, resource: Resource, id: &str) -> Result<()> {
        let request = self.request(
            Method::DELETE,
            &self.item_url(resource, id),
            resource.auth_scheme(),
        )?;
        self.send(request).await?;
        Ok(())
    }

    // Studies

    pub async fn list_studies(&self, query: &ListQuery) -> Result<Page<Study>> {
        self.list(Resource::Study, query).await
    }

    pub async fn create_study(&self, study: &NewStudy) -> Result<Study> {
        self.create(Resource::Study, study).await
    }

    pub async fn get_study(&self, uuid: &str) -> Result<Study> {
        self.get(Resource::Study, uuid).await
    }

    pub async fn update_study(&self, uuid: &str, update: &StudyUpdate) -> Result<Study> {
        self.update(Resource::Study, uuid, update).await
    }

    pub async fn delete_study(&self, uuid: &str) -> Result<()> {
        self.delete(Resource::Study, uuid).await
    }

    // DICOM files, see crate::dicom for uploads and downloads

    pub async fn list_dicoms(&self, query: &ListQuery) -> Result<Page<Dicom>> {
        self.list(Resource::Dicom, query).await
    }

    pub async fn get_dicom(&self, uuid: &str) -> Result<Dicom> {
        self.get(Resource::Dicom, uuid).await
    }

    pub async fn delete_dicom(&self, uuid: &str) -> Result<()> {
        self.delete(Resource::Dicom, uuid).await
    }

    // Scans

    pub async fn list_scans(&self, query: &ListQuery) -> Result<Page<Scan>> {
        self.list(Resource::Scan, query).await
    }

    /// Starts the analysis of a study. The study must already hold DICOM
    /// files, a rejection is reported as [EncephalonError::Submission].
    pub async fn create_scan(&self, study_uuid: &str, product: Option<Product>) -> Result<Scan> {
        let body = NewScan {
            study: study_uuid.to_string(),
            product,
        };
        self.create(Resource::Scan, &body)
            .await
            .map_err(|e| match e {
                EncephalonError::RemoteRequest { status, body } => {
                    EncephalonError::Submission { status, body }
                }
                e => e,
            })
    }

    pub async fn get_scan(&self, uuid: &str) -> Result<Scan> {
        self.get(Resource::Scan, uuid).await
    }

    pub async fn delete_scan(&self, uuid: &str) -> Result<()> {
        self.delete(Resource::Scan, uuid).await
    }

    // Reports

    pub async fn list_reports(&self, query: &ListQuery) -> Result<Page<Report>> {
        self.list(Resource::Report, query).await
    }

    pub async fn get_report(&self, uuid: &str) -> Result<Report> {
        self.get(Resource::Report, uuid).await
    }

    /// Rendered HTML sections of a report.
    pub async fn get_report_html(&self, uuid: &str) -> Result<Vec<Value>> {
        self.get_path(&format!("reports/{}/html/", uuid), AuthScheme::Token)
            .await
    }

    pub async fn list_echogpt_responses(&self) -> Result<Vec<Value>> {
        self.get_path("echogpt/report/", AuthScheme::Token).await
    }

    pub async fn get_echogpt_response(&self, uuid: &str) -> Result<Value> {
        self.get_path(&format!("echogpt/report/{}/", uuid), AuthScheme::Token)
            .await
    }

    // Webhooks

    pub async fn list_webhooks(&self, query: &ListQuery) -> Result<Page<WebhookEndpoint>> {
        self.list(Resource::Webhook, query).await
    }

    pub async fn create_webhook(&self, url: &str) -> Result<WebhookEndpoint> {
        let body = WebhookUrl {
            url: url.to_string(),
        };
        self.create(Resource::Webhook, &body).await
    }

    pub async fn get_webhook(&self, uuid: &str) -> Result<WebhookEndpoint> {
        self.get(Resource::Webhook, uuid).await
    }

    /// Points an existing webhook to a new url, its token is kept.
    pub async fn update_webhook(&self, uuid: &str, url: &str) -> Result<WebhookEndpoint> {
        let body = WebhookUrl {
            url: url.to_string(),
        };
        self.update(Resource::Webhook, uuid, &body).await
    }

    pub async fn delete_webhook(&self, uuid: &str) -> Result<()> {
        self.delete(Resource::Webhook, uuid).await
    }

    // Measurements

    pub async fn create_measurement(&self, measurement: &NewMeasurement) -> Result<UserMeasurement> {
        self.create(Resource::Measurement, measurement).await
    }

    // All studies, the aggregated read-only view

    pub async fn list_all_studies(&self, query: &ListQuery) -> Result<Page<Value>> {
        self.list(Resource::AllStudies, query).await
    }

    pub async fn get_study_with_measurements(&self, uuid: &str) -> Result<Value> {
        self.get(Resource::AllStudies, uuid).await
    }

    pub async fn get_study_metrics(&self) -> Result<Value> {
        self.get_path("all_studies/metrics/", AuthScheme::Token).await
    }

    pub async fn get_filter_metadata(&self) -> Result<Value> {
        self.get_path("all_studies/filters/metadata/", AuthScheme::Token)
            .await
    }

    pub async fn version(&self) -> Result<ApiVersion> {
        self.get_path("version", AuthScheme::Token).await
    }
}
