/// Authenticated reads against the REST API
use crate::error::{ApiError, ConfigError};
use crate::http::{self, HttpClient, HttpRequest, DEFAULT_TIMEOUT};
use crate::storage::{AccessToken, AccountId, TokenStore};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

pub const PINTEREST_API_BASE: &str = "https://api.pinterest.com/v1/";

const BOARD_FIELDS: &str = "id,name,url,image";
const PIN_FIELDS: &str = "id,note,link,image";

/// A board owned by the authenticated user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Board {
    pub id: String,
    pub name: Option<String>,
    pub url: Option<String>,
    pub image_url: Option<String>,
}

/// A pin on a board
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pin {
    pub id: String,
    pub note: Option<String>,
    pub link: Option<String>,
    pub image_url: Option<String>,
}

/// Follow `path` through nested JSON objects
///
/// ```
/// use pinauth::resource::json_path;
/// use serde_json::json;
///
/// let body = json!({"data": {"image": {"original": {"url": "https://i.example/x.jpg"}}}});
/// let url = json_path(&body, &["data", "image", "original", "url"]);
/// assert_eq!(url.and_then(|v| v.as_str()), Some("https://i.example/x.jpg"));
/// assert!(json_path(&body, &["data", "missing"]).is_none());
/// ```
pub fn json_path<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(value, |current, key| current.get(*key))
}

// Ids are strings in the API but tolerate numeric ones.
fn id_of(value: &Value) -> Option<String> {
    match value.get("id")? {
        Value::String(id) if !id.is_empty() => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

fn optional_str(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

// Pins carry `image.original`; boards carry size-keyed images like `image.60x60`.
fn image_url_of(value: &Value) -> Option<String> {
    let image = value.get("image")?;
    json_path(image, &["original", "url"])
        .or_else(|| image.as_object()?.values().find_map(|size| size.get("url")))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn data_array(body: &Value) -> Result<&[Value], ApiError> {
    body.get("data")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .ok_or_else(|| ApiError::MalformedResponse("data".to_string()))
}

/// Client for authenticated API reads
///
/// Every fetch first loads the access token for the client's account from the
/// [`TokenStore`]. Without one the call fails with [`ApiError::Unauthenticated`]
/// before any request is made. Requests are issued once and never retried.
pub struct ResourceClient<H: HttpClient, S: TokenStore + ?Sized> {
    api_base: Url,
    http: Arc<H>,
    store: Arc<S>,
    account: AccountId,
    timeout: Duration,
}

impl<H: HttpClient, S: TokenStore + ?Sized> ResourceClient<H, S> {
    /// Create a client rooted at `api_base` (e.g. [`PINTEREST_API_BASE`])
    pub fn new(api_base: &str, http: Arc<H>, store: Arc<S>) -> Result<Self, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidUrl {
            name: "api_base",
            reason,
        };
        let api_base = Url::parse(api_base).map_err(|e| invalid(e.to_string()))?;
        if api_base.cannot_be_a_base() {
            return Err(invalid("URL cannot be used as a base".to_string()));
        }

        Ok(Self {
            api_base,
            http,
            store,
            account: AccountId::default(),
            timeout: DEFAULT_TIMEOUT,
        })
    }

    /// Read the token of a specific account
    pub fn with_account(mut self, account: AccountId) -> Self {
        self.account = account;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// All boards of the authenticated user
    pub async fn fetch_boards(&self) -> Result<Vec<Board>, ApiError> {
        let body = self.get(&["me", "boards"], BOARD_FIELDS).await?;
        data_array(&body)?
            .iter()
            .enumerate()
            .map(|(i, item)| {
                Ok(Board {
                    id: id_of(item)
                        .ok_or_else(|| ApiError::MalformedResponse(format!("data[{}].id", i)))?,
                    name: optional_str(item, "name"),
                    url: optional_str(item, "url"),
                    image_url: image_url_of(item),
                })
            })
            .collect()
    }

    /// Id of the user's first board
    pub async fn fetch_first_board_id(&self) -> Result<String, ApiError> {
        let body = self.get(&["me", "boards"], BOARD_FIELDS).await?;
        let first = data_array(&body)?.first().ok_or(ApiError::EmptyResult)?;
        id_of(first).ok_or_else(|| ApiError::MalformedResponse("data[0].id".to_string()))
    }

    /// Pins on the board `board_name` owned by `board_owner`
    pub async fn fetch_pins(
        &self,
        board_owner: &str,
        board_name: &str,
    ) -> Result<Vec<Pin>, ApiError> {
        let body = self
            .get(&["boards", board_owner, board_name, "pins"], PIN_FIELDS)
            .await?;

        let mut pins = Vec::new();
        for (i, item) in data_array(&body)?.iter().enumerate() {
            let id =
                id_of(item).ok_or_else(|| ApiError::MalformedResponse(format!("data[{}].id", i)))?;
            pins.push(Pin {
                id,
                note: optional_str(item, "note"),
                link: optional_str(item, "link"),
                image_url: image_url_of(item),
            });
        }
        Ok(pins)
    }

    /// URL of the original-size image of a pin
    pub async fn fetch_image_url(&self, pin_id: &str) -> Result<String, ApiError> {
        let body = self.get(&["pins", pin_id], "image").await?;
        json_path(&body, &["data", "image", "original", "url"])
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ApiError::MalformedResponse("data.image.original.url".to_string()))
    }

    fn token(&self) -> Result<AccessToken, ApiError> {
        self.store
            .get(&self.account)?
            .ok_or(ApiError::Unauthenticated)
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.api_base.clone();
        // Checked in `new`: the base URL always has path segments.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments).push("");
        }
        url
    }

    async fn get(&self, segments: &[&str], fields: &str) -> Result<Value, ApiError> {
        let token = self.token()?;
        let url = self.endpoint(segments);
        debug!(url = %url, account = %self.account, "fetching resource");

        let request = HttpRequest::get(url.as_str())
            .param("access_token", token.secret())
            .param("fields", fields);
        Ok(http::send_with_timeout(self.http.as_ref(), request, self.timeout).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::http::mock::RecordingHttpClient;
    use crate::storage::MemoryTokenStore;
    use serde_json::json;

    fn client_with(
        http: RecordingHttpClient,
        token: Option<&str>,
    ) -> (
        ResourceClient<RecordingHttpClient, MemoryTokenStore>,
        Arc<RecordingHttpClient>,
    ) {
        let http = Arc::new(http);
        let store = Arc::new(MemoryTokenStore::new());
        if let Some(token) = token {
            store
                .put(&AccountId::default(), &AccessToken::new(token))
                .unwrap();
        }
        let client = ResourceClient::new(PINTEREST_API_BASE, http.clone(), store).unwrap();
        (client, http)
    }

    #[tokio::test]
    async fn test_unauthenticated_makes_no_request() {
        let (client, http) = client_with(RecordingHttpClient::new(), None);

        assert_eq!(
            client.fetch_first_board_id().await.unwrap_err(),
            ApiError::Unauthenticated
        );
        assert_eq!(
            client.fetch_pins("owner", "board").await.unwrap_err(),
            ApiError::Unauthenticated
        );
        assert_eq!(
            client.fetch_image_url("1").await.unwrap_err(),
            ApiError::Unauthenticated
        );
        assert_eq!(http.call_count(), 0);
    }

    #[tokio::test]
    async fn test_first_board_id() {
        let (client, http) = client_with(
            RecordingHttpClient::new().respond(Ok(json!({
                "data": [{"id": "42", "name": "Recipes"}, {"id": "43"}]
            }))),
            Some("XYZ"),
        );

        assert_eq!(client.fetch_first_board_id().await.unwrap(), "42");

        let request = &http.requests()[0];
        assert_eq!(request.url, "https://api.pinterest.com/v1/me/boards/");
        assert_eq!(request.param_value("access_token"), Some("XYZ"));
    }

    #[tokio::test]
    async fn test_first_board_id_empty_and_malformed() {
        let (client, _) = client_with(
            RecordingHttpClient::new()
                .respond(Ok(json!({"data": []})))
                .respond(Ok(json!({"data": "nope"})))
                .respond(Ok(json!({"message": "no data"})))
                .respond(Ok(json!({"data": [{"name": "no id"}]}))),
            Some("XYZ"),
        );

        assert_eq!(client.fetch_first_board_id().await.unwrap_err(), ApiError::EmptyResult);
        assert_eq!(
            client.fetch_first_board_id().await.unwrap_err(),
            ApiError::MalformedResponse("data".to_string())
        );
        assert_eq!(
            client.fetch_first_board_id().await.unwrap_err(),
            ApiError::MalformedResponse("data".to_string())
        );
        assert_eq!(
            client.fetch_first_board_id().await.unwrap_err(),
            ApiError::MalformedResponse("data[0].id".to_string())
        );
    }

    #[tokio::test]
    async fn test_fetch_boards() {
        let (client, _) = client_with(
            RecordingHttpClient::new().respond(Ok(json!({
                "data": [
                    {"id": "1", "name": "Travel", "url": "https://pin.it/1",
                     "image": {"60x60": {"url": "https://i.example/1.jpg", "width": 60}}},
                    {"id": 2}
                ]
            }))),
            Some("XYZ"),
        );

        let boards = client.fetch_boards().await.unwrap();
        assert_eq!(boards.len(), 2);
        assert_eq!(boards[0].name.as_deref(), Some("Travel"));
        assert_eq!(boards[0].image_url.as_deref(), Some("https://i.example/1.jpg"));
        assert_eq!(boards[1].id, "2");
        assert_eq!(boards[1].name, None);
    }

    #[tokio::test]
    async fn test_fetch_pins() {
        let (client, http) = client_with(
            RecordingHttpClient::new()
                .respond(Ok(json!({
                    "data": [
                        {"id": "p1", "note": "Cake", "link": "https://example.com",
                         "image": {"original": {"url": "https://i.example/p1.jpg"}}},
                        {"id": "p2"}
                    ]
                })))
                .respond(Ok(json!({"data": []}))),
            Some("XYZ"),
        );

        let pins = client.fetch_pins("ian", "my recipes").await.unwrap();
        assert_eq!(pins.len(), 2);
        assert_eq!(pins[0].image_url.as_deref(), Some("https://i.example/p1.jpg"));
        assert_eq!(pins[1].note, None);

        let request = &http.requests()[0];
        assert_eq!(
            request.url,
            "https://api.pinterest.com/v1/boards/ian/my%20recipes/pins/"
        );
        assert_eq!(request.param_value("fields"), Some(PIN_FIELDS));

        assert!(client.fetch_pins("ian", "empty").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_path_segments_are_escaped() {
        let (client, http) = client_with(
            RecordingHttpClient::new().respond(Ok(json!({"data": []}))),
            Some("XYZ"),
        );

        client.fetch_pins("a/b", "c?d").await.unwrap();
        assert_eq!(
            http.requests()[0].url,
            "https://api.pinterest.com/v1/boards/a%2Fb/c%3Fd/pins/"
        );
    }

    #[tokio::test]
    async fn test_fetch_image_url() {
        let (client, http) = client_with(
            RecordingHttpClient::new()
                .respond(Ok(json!({
                    "data": {"image": {"original": {"url": "https://i.example/big.jpg", "width": 736}}}
                })))
                .respond(Ok(json!({"data": {"image": {}}}))),
            Some("XYZ"),
        );

        assert_eq!(
            client.fetch_image_url("123").await.unwrap(),
            "https://i.example/big.jpg"
        );
        let request = &http.requests()[0];
        assert_eq!(request.url, "https://api.pinterest.com/v1/pins/123/");
        assert_eq!(request.param_value("fields"), Some("image"));

        assert_eq!(
            client.fetch_image_url("123").await.unwrap_err(),
            ApiError::MalformedResponse("data.image.original.url".to_string())
        );
    }

    #[tokio::test]
    async fn test_transport_errors_are_not_retried() {
        let (client, http) = client_with(
            RecordingHttpClient::new().respond(Err(TransportError::Status {
                status: 503,
                body: String::new(),
            })),
            Some("XYZ"),
        );

        let err = client.fetch_first_board_id().await.unwrap_err();
        assert!(matches!(
            err,
            ApiError::Network(TransportError::Status { status: 503, .. })
        ));
        assert_eq!(http.call_count(), 1);
    }

    #[tokio::test]
    async fn test_reads_token_of_configured_account() {
        let http = Arc::new(RecordingHttpClient::new().respond(Ok(json!({"data": [{"id": "7"}]}))));
        let store = Arc::new(MemoryTokenStore::new());
        store
            .put(&AccountId::new("bob"), &AccessToken::new("BOB"))
            .unwrap();

        let default_client =
            ResourceClient::new(PINTEREST_API_BASE, http.clone(), store.clone()).unwrap();
        assert_eq!(
            default_client.fetch_first_board_id().await.unwrap_err(),
            ApiError::Unauthenticated
        );

        let bob = ResourceClient::new(PINTEREST_API_BASE, http.clone(), store)
            .unwrap()
            .with_account(AccountId::new("bob"));
        assert_eq!(bob.fetch_first_board_id().await.unwrap(), "7");
        assert_eq!(http.requests()[0].param_value("access_token"), Some("BOB"));
    }

    #[test]
    fn test_base_without_trailing_slash() {
        let http = Arc::new(RecordingHttpClient::new());
        let store = Arc::new(MemoryTokenStore::new());
        let client = ResourceClient::new("http://127.0.0.1:8080/v1", http, store).unwrap();
        assert_eq!(
            client.endpoint(&["me", "boards"]).as_str(),
            "http://127.0.0.1:8080/v1/me/boards/"
        );
    }

    #[test]
    fn test_invalid_base() {
        let http = Arc::new(RecordingHttpClient::new());
        let store = Arc::new(MemoryTokenStore::new());
        assert!(ResourceClient::new("mailto:someone@example.com", http.clone(), store.clone()).is_err());
        assert!(ResourceClient::new("not a url", http, store).is_err());
    }
}
