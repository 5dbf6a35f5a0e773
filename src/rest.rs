// Gateway over the hosted REST endpoints: PostgREST tables under
// `/rest/v1` and password auth under `/auth/v1`

use crate::config::{ClientConfig, ClientError, RetryConfig};
use crate::gateway::{
    DestinationFilter, Gateway, GatewayError, TripFilter, TripOrder, WriteOutcome,
};
use crate::models::{
    null_as_empty, Addon, Booking, BookingAddon, Destination, FavoritesSnapshot, NewBooking,
    NewBookingAddon, ProfileUpdate, Trip, UserProfile,
};
use crate::session::{AuthUser, Session, SignUp};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::RwLock;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_RANGE};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt::Display;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

const TRIP_SELECT: &str = "*,destination:destinations(id,name,location)";
const BOOKING_SELECT: &str = "*,trip:trips(*,destination:destinations(id,name,location))";

// PostgREST query for one table
#[derive(Debug, Clone, PartialEq)]
pub struct TableQuery {
    table: &'static str,
    params: Vec<(String, String)>,
}

impl TableQuery {
    pub fn new(table: &'static str) -> Self {
        Self {
            table,
            params: Vec::new(),
        }
    }

    fn param(mut self, key: &str, value: String) -> Self {
        self.params.push((key.to_string(), value));
        self
    }

    pub fn select(self, columns: &str) -> Self {
        self.param("select", columns.to_string())
    }

    pub fn eq(self, column: &str, value: impl Display) -> Self {
        self.param(column, format!("eq.{}", value))
    }

    pub fn gte(self, column: &str, value: impl Display) -> Self {
        self.param(column, format!("gte.{}", value))
    }

    pub fn in_list(self, column: &str, values: &[Uuid]) -> Self {
        let joined = values
            .iter()
            .map(Uuid::to_string)
            .collect::<Vec<_>>()
            .join(",");
        self.param(column, format!("in.({})", joined))
    }

    pub fn order(self, column: &str, ascending: bool) -> Self {
        let direction = if ascending { "asc" } else { "desc" };
        self.param("order", format!("{}.{}", column, direction))
    }

    pub fn limit(self, limit: usize) -> Self {
        self.param("limit", limit.to_string())
    }

    pub fn table(&self) -> &'static str {
        self.table
    }

    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }
}

fn timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

// Error body shapes: PostgREST uses `message`/`code`, auth uses
// `error_description` or `msg`
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    msg: Option<String>,
}

pub fn map_status(status: StatusCode, body: &str) -> GatewayError {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
    let message = parsed
        .message
        .or(parsed.error_description)
        .or(parsed.msg)
        .unwrap_or_else(|| {
            if body.trim().is_empty() {
                status.canonical_reason().unwrap_or("Unknown error").to_string()
            } else {
                body.trim().to_string()
            }
        });

    // `.single()`-style lookups answer 406 PGRST116 when no row matched
    if status == StatusCode::NOT_FOUND || parsed.code.as_deref() == Some("PGRST116") {
        return GatewayError::NotFound(message);
    }
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => GatewayError::Unauthorized(message),
        _ => GatewayError::Api {
            status_code: status.as_u16(),
            is_retryable: status == StatusCode::REQUEST_TIMEOUT
                || status == StatusCode::TOO_MANY_REQUESTS
                || status.is_server_error(),
            message,
        },
    }
}

// Total from a `Content-Range` header such as `0-24/3573` or `*/0`
pub fn parse_content_range(value: &str) -> Option<usize> {
    value.rsplit_once('/')?.1.trim().parse().ok()
}

#[derive(Debug, Deserialize)]
struct FavoritesRow {
    #[serde(default, deserialize_with = "null_as_empty")]
    favorite_trips: Vec<Uuid>,
    updated_at: DateTime<Utc>,
}

// Profile edits bump the row version the same way favorites writes do
#[derive(Debug, Serialize)]
struct ProfilePatch<'a> {
    #[serde(flatten)]
    update: &'a ProfileUpdate,
    updated_at: String,
}

impl<'a> ProfilePatch<'a> {
    fn new(update: &'a ProfileUpdate, now: DateTime<Utc>) -> Self {
        Self {
            update,
            updated_at: timestamp(now),
        }
    }
}

// Sign-up answers with a session when email confirmation is off and with
// the bare user when it is on
#[derive(Debug, Deserialize)]
struct SignUpResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    user: Option<AuthUser>,
}

impl SignUpResponse {
    fn into_session(self) -> Result<Session, GatewayError> {
        match (self.access_token, self.user) {
            (Some(access_token), Some(user)) => Ok(Session { access_token, user }),
            _ => Err(GatewayError::Unauthorized(
                "Confirm your email address before signing in".to_string(),
            )),
        }
    }
}

pub struct RestGateway {
    http: reqwest::Client,
    config: ClientConfig,
    access_token: RwLock<Option<String>>,
}

impl RestGateway {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        config.validate()?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| ClientError::InitError(e.to_string()))?;
        Ok(Self {
            http,
            config,
            access_token: RwLock::new(None),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    // Restore a session persisted by the caller
    pub fn set_access_token(&self, token: Option<String>) {
        *self.access_token.write() = token;
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn headers(&self) -> Result<HeaderMap, GatewayError> {
        let bearer = self
            .access_token
            .read()
            .clone()
            .unwrap_or_else(|| self.config.api_key.clone());
        let mut headers = HeaderMap::new();
        headers.insert(
            "apikey",
            HeaderValue::from_str(&self.config.api_key)
                .map_err(|e| GatewayError::Config(e.to_string()))?,
        );
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", bearer))
                .map_err(|e| GatewayError::Config(e.to_string()))?,
        );
        Ok(headers)
    }

    fn request(&self, method: Method, query: &TableQuery) -> Result<RequestBuilder, GatewayError> {
        Ok(self
            .http
            .request(method, self.url(&format!("rest/v1/{}", query.table())))
            .headers(self.headers()?)
            .query(query.params()))
    }

    fn transport_error(&self, error: reqwest::Error) -> GatewayError {
        if error.is_timeout() {
            GatewayError::Timeout(self.config.timeout_ms)
        } else if error.is_decode() {
            GatewayError::Decode(error.to_string())
        } else {
            GatewayError::Network(error.to_string())
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, GatewayError> {
        let response = request.send().await.map_err(|e| self.transport_error(e))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(map_status(status, &body))
    }

    async fn decode<T: DeserializeOwned>(&self, response: Response) -> Result<T, GatewayError> {
        let bytes = response.bytes().await.map_err(|e| self.transport_error(e))?;
        serde_json::from_slice(&bytes).map_err(|e| GatewayError::Decode(e.to_string()))
    }

    // Helper to calculate exponential backoff with jitter
    pub fn calculate_backoff(retry_attempt: u32, config: &RetryConfig) -> Duration {
        let base_backoff_ms = (config.initial_backoff_ms as f64
            * config.backoff_multiplier.powf(retry_attempt as f64))
        .min(config.max_backoff_ms as f64);

        // Apply jitter to prevent thundering herd
        let jitter = rand::random::<f64>() * config.jitter_factor * base_backoff_ms;
        let backoff_ms = base_backoff_ms * (1.0 - config.jitter_factor / 2.0) + jitter;

        Duration::from_millis(backoff_ms as u64)
    }

    // GET with retries on transient failures
    async fn fetch<T: DeserializeOwned>(&self, query: &TableQuery) -> Result<Vec<T>, GatewayError> {
        let retry = &self.config.retry_config;
        let mut attempt = 0;
        loop {
            let result = match self.send(self.request(Method::GET, query)?).await {
                Ok(response) => self.decode(response).await,
                Err(e) => Err(e),
            };
            match result {
                Err(e) if e.is_retryable() && attempt < retry.max_retries => {
                    let backoff = Self::calculate_backoff(attempt, retry);
                    warn!(
                        table = query.table(),
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "read failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn fetch_one<T: DeserializeOwned>(
        &self,
        query: &TableQuery,
        what: &str,
    ) -> Result<T, GatewayError> {
        self.fetch(query)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| GatewayError::NotFound(what.to_string()))
    }

    // Writes return the affected rows; never retried
    async fn write<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        method: Method,
        query: &TableQuery,
        body: &B,
    ) -> Result<Vec<T>, GatewayError> {
        let request = self
            .request(method.clone(), query)?
            .header("Prefer", "return=representation")
            .json(body);
        let response = self.send(request).await?;
        debug!(table = query.table(), %method, "write applied");
        self.decode(response).await
    }

    async fn auth<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, GatewayError> {
        let request = self
            .http
            .post(self.url(&format!("auth/v1/{}", path)))
            .headers(self.headers()?)
            .json(body);
        let response = self.send(request).await?;
        self.decode(response).await
    }
}

#[async_trait]
impl Gateway for RestGateway {
    async fn get_trip(&self, trip_id: Uuid) -> Result<Trip, GatewayError> {
        let query = TableQuery::new("trips").select(TRIP_SELECT).eq("id", trip_id);
        self.fetch_one(&query, &format!("trip {}", trip_id)).await
    }

    async fn list_trips(&self, filter: TripFilter) -> Result<Vec<Trip>, GatewayError> {
        let mut query = TableQuery::new("trips").select(TRIP_SELECT);
        if let Some(destination_id) = filter.destination_id {
            query = query.eq("destination_id", destination_id);
        }
        query = match filter.order {
            TripOrder::NameAscending => query.order("name", true),
            TripOrder::NewestFirst => query.order("created_at", false),
        };
        if let Some(limit) = filter.limit {
            query = query.limit(limit);
        }
        self.fetch(&query).await
    }

    async fn trips_by_ids(&self, trip_ids: &[Uuid]) -> Result<Vec<Trip>, GatewayError> {
        if trip_ids.is_empty() {
            return Ok(Vec::new());
        }
        let query = TableQuery::new("trips")
            .select(TRIP_SELECT)
            .in_list("id", trip_ids);
        self.fetch(&query).await
    }

    async fn get_destination(&self, destination_id: Uuid) -> Result<Destination, GatewayError> {
        let query = TableQuery::new("destinations")
            .select("*")
            .eq("id", destination_id);
        self.fetch_one(&query, &format!("destination {}", destination_id))
            .await
    }

    async fn list_destinations(
        &self,
        filter: DestinationFilter,
    ) -> Result<Vec<Destination>, GatewayError> {
        let mut query = TableQuery::new("destinations").select("*");
        if filter.order_by_name {
            query = query.order("name", true);
        }
        if let Some(limit) = filter.limit {
            query = query.limit(limit);
        }
        self.fetch(&query).await
    }

    async fn list_addons(&self) -> Result<Vec<Addon>, GatewayError> {
        self.fetch(&TableQuery::new("addons").select("*")).await
    }

    async fn insert_booking(&self, booking: NewBooking) -> Result<Booking, GatewayError> {
        let query = TableQuery::new("bookings").select("*");
        let rows: Vec<Booking> = self.write(Method::POST, &query, &booking).await?;
        rows.into_iter().next().ok_or_else(|| {
            GatewayError::Decode("booking insert returned no row".to_string())
        })
    }

    async fn insert_booking_addons(
        &self,
        addons: Vec<NewBookingAddon>,
    ) -> Result<Vec<BookingAddon>, GatewayError> {
        if addons.is_empty() {
            return Ok(Vec::new());
        }
        let query = TableQuery::new("booking_addons").select("*");
        self.write(Method::POST, &query, &addons).await
    }

    async fn delete_booking(&self, booking_id: Uuid) -> Result<(), GatewayError> {
        let query = TableQuery::new("bookings").eq("id", booking_id);
        self.send(self.request(Method::DELETE, &query)?).await?;
        Ok(())
    }

    async fn get_booking(&self, booking_id: Uuid) -> Result<Booking, GatewayError> {
        let query = TableQuery::new("bookings")
            .select(BOOKING_SELECT)
            .eq("id", booking_id);
        self.fetch_one(&query, &format!("booking {}", booking_id))
            .await
    }

    async fn list_bookings(&self, user_id: Uuid) -> Result<Vec<Booking>, GatewayError> {
        let query = TableQuery::new("bookings")
            .select(BOOKING_SELECT)
            .eq("user_id", user_id)
            .order("booked_at", false);
        self.fetch(&query).await
    }

    async fn booking_addons(&self, booking_id: Uuid) -> Result<Vec<BookingAddon>, GatewayError> {
        let query = TableQuery::new("booking_addons")
            .select("*")
            .eq("booking_id", booking_id);
        self.fetch(&query).await
    }

    async fn count_bookings_since(
        &self,
        user_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<usize, GatewayError> {
        let query = TableQuery::new("bookings")
            .select("id")
            .eq("user_id", user_id)
            .gte("booked_at", timestamp(since));
        let request = self
            .request(Method::HEAD, &query)?
            .header("Prefer", "count=exact");
        let response = self.send(request).await?;
        response
            .headers()
            .get(CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range)
            .ok_or_else(|| GatewayError::Decode("missing Content-Range count".to_string()))
    }

    async fn get_profile(&self, user_id: Uuid) -> Result<UserProfile, GatewayError> {
        let query = TableQuery::new("users").select("*").eq("id", user_id);
        self.fetch_one(&query, &format!("user {}", user_id)).await
    }

    async fn update_profile(
        &self,
        user_id: Uuid,
        update: ProfileUpdate,
    ) -> Result<UserProfile, GatewayError> {
        let query = TableQuery::new("users").select("*").eq("id", user_id);
        let body = ProfilePatch::new(&update, Utc::now());
        let rows: Vec<UserProfile> = self.write(Method::PATCH, &query, &body).await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| GatewayError::NotFound(format!("user {}", user_id)))
    }

    async fn read_favorites(&self, user_id: Uuid) -> Result<FavoritesSnapshot, GatewayError> {
        let query = TableQuery::new("users")
            .select("favorite_trips,updated_at")
            .eq("id", user_id);
        let row: FavoritesRow = self
            .fetch_one(&query, &format!("user {}", user_id))
            .await?;
        Ok(FavoritesSnapshot {
            trip_ids: row.favorite_trips,
            version: row.updated_at,
        })
    }

    async fn write_favorites(
        &self,
        user_id: Uuid,
        trip_ids: &[Uuid],
        expected_version: Option<DateTime<Utc>>,
    ) -> Result<WriteOutcome, GatewayError> {
        let mut query = TableQuery::new("users").select("id").eq("id", user_id);
        if let Some(version) = expected_version {
            query = query.eq("updated_at", timestamp(version));
        }
        // Bump the version in the same statement so later conditional
        // writes see the change
        let body = json!({
            "favorite_trips": trip_ids,
            "updated_at": timestamp(Utc::now()),
        });
        let rows: Vec<serde_json::Value> = self.write(Method::PATCH, &query, &body).await?;
        match (rows.is_empty(), expected_version) {
            (false, _) => Ok(WriteOutcome::Applied),
            (true, Some(_)) => Ok(WriteOutcome::Conflict),
            (true, None) => Err(GatewayError::NotFound(format!("user {}", user_id))),
        }
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, GatewayError> {
        let body = json!({ "email": email, "password": password });
        let session: Session = self.auth("token?grant_type=password", &body).await?;
        self.set_access_token(Some(session.access_token.clone()));
        Ok(session)
    }

    async fn sign_up(&self, request: &SignUp) -> Result<Session, GatewayError> {
        let body = json!({
            "email": request.email,
            "password": request.password,
            "data": {
                "first_name": request.first_name,
                "last_name": request.last_name,
            }
        });
        let response: SignUpResponse = self.auth("signup", &body).await?;
        let session = response.into_session()?;
        self.set_access_token(Some(session.access_token.clone()));
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), GatewayError> {
        if self.access_token.read().is_none() {
            return Ok(());
        }
        let request = self
            .http
            .post(self.url("auth/v1/logout"))
            .headers(self.headers()?);
        // Drop the token locally whatever the server says
        self.set_access_token(None);
        self.send(request).await?;
        Ok(())
    }
}

// Minimal HTTP/1.1 server answering with queued PostgREST-style replies
#[cfg(test)]
pub mod mock_server {
    use parking_lot::Mutex;
    use reqwest::Url;
    use std::collections::VecDeque;
    use std::net::SocketAddr;
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    #[derive(Debug, Clone)]
    pub struct Reply {
        pub status: u16,
        pub headers: Vec<(String, String)>,
        pub body: String,
    }

    impl Reply {
        pub fn json(status: u16, body: serde_json::Value) -> Self {
            Self {
                status,
                headers: Vec::new(),
                body: body.to_string(),
            }
        }

        pub fn empty(status: u16) -> Self {
            Self {
                status,
                headers: Vec::new(),
                body: String::new(),
            }
        }

        pub fn with_header(mut self, name: &str, value: &str) -> Self {
            self.headers.push((name.to_string(), value.to_string()));
            self
        }
    }

    #[derive(Debug, Clone)]
    pub struct RecordedRequest {
        pub method: String,
        pub target: String,
        // Names lowercased
        pub headers: Vec<(String, String)>,
        pub body: String,
    }

    impl RecordedRequest {
        pub fn path(&self) -> &str {
            self.target.split('?').next().unwrap_or_default()
        }

        pub fn header(&self, name: &str) -> Option<&str> {
            let name = name.to_ascii_lowercase();
            self.headers
                .iter()
                .find(|(n, _)| *n == name)
                .map(|(_, v)| v.as_str())
        }

        // Decoded query parameter
        pub fn param(&self, key: &str) -> Option<String> {
            let url = Url::parse(&format!("http://mock{}", self.target)).ok()?;
            url.query_pairs()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.into_owned())
        }

        pub fn json(&self) -> serde_json::Value {
            serde_json::from_str(&self.body).unwrap_or(serde_json::Value::Null)
        }
    }

    #[derive(Default)]
    struct State {
        replies: VecDeque<Reply>,
        requests: Vec<RecordedRequest>,
    }

    pub struct MockServer {
        addr: SocketAddr,
        state: Arc<Mutex<State>>,
    }

    impl MockServer {
        pub async fn start() -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let state = Arc::new(Mutex::new(State::default()));

            let shared = state.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    tokio::spawn(serve(stream, shared.clone()));
                }
            });

            Self { addr, state }
        }

        pub fn base_url(&self) -> String {
            format!("http://{}", self.addr)
        }

        // Replies are served in order, one per request
        pub fn push(&self, reply: Reply) {
            self.state.lock().replies.push_back(reply);
        }

        pub fn requests(&self) -> Vec<RecordedRequest> {
            self.state.lock().requests.clone()
        }
    }

    async fn serve(mut stream: TcpStream, state: Arc<Mutex<State>>) {
        let Some(request) = read_request(&mut stream).await else {
            return;
        };
        let is_head = request.method == "HEAD";
        let reply = {
            let mut state = state.lock();
            state.requests.push(request);
            state.replies.pop_front()
        }
        .unwrap_or_else(|| {
            Reply::json(500, serde_json::json!({ "message": "no reply queued" }))
        });

        let body = if is_head { "" } else { reply.body.as_str() };
        let mut head = format!("HTTP/1.1 {} Mock\r\n", reply.status);
        for (name, value) in &reply.headers {
            head.push_str(&format!("{}: {}\r\n", name, value));
        }
        head.push_str(&format!(
            "content-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
            body.len()
        ));

        let _ = stream.write_all(head.as_bytes()).await;
        let _ = stream.write_all(body.as_bytes()).await;
        let _ = stream.shutdown().await;
    }

    async fn read_request(stream: &mut TcpStream) -> Option<RecordedRequest> {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];

        let header_end = loop {
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
            let n = stream.read(&mut chunk).await.ok()?;
            if n == 0 {
                return None;
            }
            buf.extend_from_slice(&chunk[..n]);
        };

        let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
        let mut lines = head.split("\r\n");
        let mut request_line = lines.next()?.split_whitespace();
        let method = request_line.next()?.to_string();
        let target = request_line.next()?.to_string();
        let headers: Vec<(String, String)> = lines
            .filter_map(|line| line.split_once(':'))
            .map(|(name, value)| (name.trim().to_ascii_lowercase(), value.trim().to_string()))
            .collect();

        let length = headers
            .iter()
            .find(|(name, _)| name == "content-length")
            .and_then(|(_, value)| value.parse::<usize>().ok())
            .unwrap_or(0);
        while buf.len() < header_end + length {
            let n = stream.read(&mut chunk).await.ok()?;
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
        }

        Some(RecordedRequest {
            method,
            target,
            headers,
            body: String::from_utf8_lossy(&buf[header_end..]).to_string(),
        })
    }
}
