use std::path::Path;

use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, error};

use crate::cache::{CacheKey, ResponseCache};
use crate::config::AppConfig;
use crate::error::ApiError;
use crate::models::{
    AttendanceRecord, ChatReply, Goal, Institution, QrSession, RescheduleRequest,
    RescheduleStatus, Reward, Task, TimetableSlot, Unit, User,
};
use crate::session::Session;

/// Thin JSON client over the attendance backend. Reads go through the shared
/// cache; every mutation invalidates the resource it touched.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
    cache: ResponseCache,
}

impl ApiClient {
    pub fn new(config: &AppConfig, session: &Session) -> Result<Self, ApiError> {
        Self::with_cache(config, session, ResponseCache::new())
    }

    pub fn with_cache(
        config: &AppConfig,
        session: &Session,
        cache: ResponseCache,
    ) -> Result<Self, ApiError> {
        reqwest::Url::parse(&config.api_url)
            .map_err(|err| ApiError::BaseUrl(format!("{}: {err}", config.api_url)))?;

        let http = reqwest::Client::builder()
            .user_agent("attendance-insights")
            .timeout(config.timeout)
            .build()
            .map_err(|source| ApiError::Request {
                url: config.api_url.clone(),
                source,
            })?;

        Ok(Self {
            http,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            token: session.token.clone(),
            cache,
        })
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.http.request(method, self.url(path));
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder, url: String) -> Result<Response, ApiError> {
        let response = builder.send().await.map_err(|source| {
            error!(%url, error = %source, "request failed");
            ApiError::Request {
                url: url.clone(),
                source,
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body: String = response
                .text()
                .await
                .unwrap_or_default()
                .chars()
                .take(200)
                .collect();
            error!(%url, %status, "backend returned an error");
            return Err(ApiError::Status { url, status, body });
        }

        Ok(response)
    }

    async fn read_json<T: DeserializeOwned>(response: Response, url: &str) -> Result<T, ApiError> {
        let value = Self::read_value(response, url).await?;
        serde_json::from_value(value).map_err(|source| ApiError::Decode {
            url: url.to_string(),
            source,
        })
    }

    async fn read_value(response: Response, url: &str) -> Result<Value, ApiError> {
        let text = response.text().await.map_err(|source| ApiError::Request {
            url: url.to_string(),
            source,
        })?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|source| ApiError::Decode {
            url: url.to_string(),
            source,
        })
    }

    /// Read-through GET: served from the cache when the same resource and
    /// query were fetched before in this process.
    pub async fn get<T: DeserializeOwned>(
        &self,
        resource: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ApiError> {
        let key = CacheKey::new(resource, query);
        let url = self.url(resource);

        let value = match self.cache.get(&key).await {
            Some(value) => value,
            None => {
                let builder = self.request(Method::GET, resource).query(query);
                let response = self.send(builder, url.clone()).await?;
                let value = Self::read_value(response, &url).await?;
                self.cache.put(key, value.clone()).await;
                value
            }
        };

        serde_json::from_value(value).map_err(|source| ApiError::Decode { url, source })
    }

    async fn mutate<B: Serialize + ?Sized>(
        &self,
        method: Method,
        resource: &str,
        body: Option<&B>,
    ) -> Result<Value, ApiError> {
        let url = self.url(resource);
        let mut builder = self.request(method.clone(), resource);
        if let Some(body) = body {
            builder = builder.json(body);
        }
        let response = self.send(builder, url.clone()).await?;
        self.cache.invalidate(resource).await;
        debug!(%method, %url, "mutation applied");
        Self::read_value(response, &url).await
    }

    pub async fn post<B>(&self, resource: &str, body: &B) -> Result<Value, ApiError>
    where
        B: Serialize + ?Sized,
    {
        self.mutate(Method::POST, resource, Some(body)).await
    }

    pub async fn put<B>(&self, resource: &str, body: &B) -> Result<Value, ApiError>
    where
        B: Serialize + ?Sized,
    {
        self.mutate(Method::PUT, resource, Some(body)).await
    }

    pub async fn delete(&self, resource: &str) -> Result<(), ApiError> {
        self.mutate::<Value>(Method::DELETE, resource, None).await?;
        Ok(())
    }

    pub async fn users(&self) -> Result<Vec<User>, ApiError> {
        self.get("users", &[]).await
    }

    pub async fn attendance(&self) -> Result<Vec<AttendanceRecord>, ApiError> {
        self.get("attendance", &[]).await
    }

    pub async fn units(&self) -> Result<Vec<Unit>, ApiError> {
        self.get("units", &[]).await
    }

    pub async fn timetable(&self) -> Result<Vec<TimetableSlot>, ApiError> {
        self.get("timetable", &[]).await
    }

    pub async fn reschedule_requests(&self) -> Result<Vec<RescheduleRequest>, ApiError> {
        self.get("rescheduleRequests", &[]).await
    }

    pub async fn institutions(&self) -> Result<Vec<Institution>, ApiError> {
        self.get("institutions", &[]).await
    }

    pub async fn institution(&self, id: &str) -> Result<Institution, ApiError> {
        self.get(&format!("institutions/{id}"), &[]).await
    }

    /// Replaces the whole rewards array. Concurrent edits race; the last write wins.
    pub async fn replace_rewards(
        &self,
        institution_id: &str,
        rewards: &[Reward],
    ) -> Result<(), ApiError> {
        self.put(
            &format!("institutions/{institution_id}"),
            &json!({ "rewards": rewards }),
        )
        .await?;
        Ok(())
    }

    /// Profile of the session's user. Always fetched fresh.
    pub async fn profile(&self) -> Result<User, ApiError> {
        let url = self.url("user/profile");
        let response = self
            .send(self.request(Method::GET, "user/profile"), url.clone())
            .await?;
        Self::read_json(response, &url).await
    }

    pub async fn tasks(&self) -> Result<Vec<Task>, ApiError> {
        self.get("tasks", &[]).await
    }

    pub async fn create_task(&self, task: &Task) -> Result<Value, ApiError> {
        if task.title.trim().is_empty() {
            return Err(ApiError::Validation("task title is required".into()));
        }
        self.post("tasks", task).await
    }

    pub async fn set_task_completed(&self, id: &str, completed: bool) -> Result<(), ApiError> {
        self.put(&format!("tasks/{id}"), &json!({ "completed": completed }))
            .await?;
        Ok(())
    }

    pub async fn delete_task(&self, id: &str) -> Result<(), ApiError> {
        self.delete(&format!("tasks/{id}")).await
    }

    pub async fn goals(&self) -> Result<Vec<Goal>, ApiError> {
        self.get("goals", &[]).await
    }

    pub async fn create_goal(&self, goal: &Goal) -> Result<Value, ApiError> {
        if goal.title.trim().is_empty() {
            return Err(ApiError::Validation("goal title is required".into()));
        }
        if goal.target == 0 {
            return Err(ApiError::Validation("goal target must be positive".into()));
        }
        self.post("goals", goal).await
    }

    pub async fn create_timetable_slot(&self, slot: &TimetableSlot) -> Result<Value, ApiError> {
        let required = [
            ("classId", &slot.class_id),
            ("unitId", &slot.unit_id),
            ("day", &slot.day),
            ("startTime", &slot.start_time),
        ];
        if let Some((field, _)) = required.iter().find(|(_, value)| value.trim().is_empty()) {
            return Err(ApiError::Validation(format!("{field} is required")));
        }
        self.post("timetable", slot).await
    }

    pub async fn delete_timetable_slot(&self, id: &str) -> Result<(), ApiError> {
        self.delete(&format!("timetable/{id}")).await
    }

    /// Posts a timetable CSV as multipart form data. Parsing is the backend's job.
    pub async fn upload_timetable_csv(&self, path: &Path) -> Result<Value, ApiError> {
        let bytes = tokio::fs::read(path).await.map_err(|source| ApiError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "timetable.csv".to_string());

        let url = self.url("timetable/upload");
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("text/csv")
            .map_err(|source| ApiError::Request {
                url: url.clone(),
                source,
            })?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .send(self.request(Method::POST, "timetable/upload").multipart(form), url.clone())
            .await?;
        self.cache.invalidate("timetable").await;
        Self::read_value(response, &url).await
    }

    pub async fn set_reschedule_status(
        &self,
        id: &str,
        status: RescheduleStatus,
    ) -> Result<(), ApiError> {
        self.put(&format!("rescheduleRequests/{id}"), &json!({ "status": status }))
            .await?;
        Ok(())
    }

    pub async fn reports(&self, student_id: &str) -> Result<Value, ApiError> {
        self.get("reports", &[("studentId", student_id)]).await
    }

    pub async fn chat(&self, message: &str) -> Result<ChatReply, ApiError> {
        if message.trim().is_empty() {
            return Err(ApiError::Validation("message is empty".into()));
        }
        let url = self.url("chatbot/message");
        let response = self
            .send(
                self.request(Method::POST, "chatbot/message")
                    .json(&json!({ "message": message })),
                url.clone(),
            )
            .await?;
        Self::read_json(response, &url).await
    }

    pub async fn create_qr_session(&self, session: &QrSession) -> Result<(), ApiError> {
        self.post("qrSessions", session).await?;
        Ok(())
    }

    /// Marks the session inactive and records how many scans it accepted.
    pub async fn close_qr_session(&self, session: &QrSession) -> Result<(), ApiError> {
        self.put(
            &format!("qrSessions/{}", session.id),
            &json!({ "active": false, "scanCount": session.scan_count }),
        )
        .await?;
        Ok(())
    }
}
