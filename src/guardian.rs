use std::net::ToSocketAddrs;
use std::time::Duration;

use anyhow::{bail, Result};
use reqwest::blocking::Client as HttpClient;
use reqwest::header::USER_AGENT;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, error, warn};
use url::Url;

use crate::article::{self, Article};

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(15_000);
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(10_000);
const STATUS_OK: &str = "ok";

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub user_agent: String,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub http_client: Option<HttpClient>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("stem-news/{}", crate::VERSION),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            http_client: None,
        }
    }
}

/// Every way a single page fetch can fail. Callers that only care about data use
/// [`Client::fetch_latest_news`], which logs these and yields an empty page.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("malformed request url {url:?}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("request failed: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("error response code: {0}")]
    Status(u16),
    #[error("problem parsing the JSON results: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("response is missing {0:?}")]
    MissingField(&'static str),
    #[error("article field {0:?} is empty")]
    EmptyField(&'static str),
    #[error("{status}: {message}")]
    Api { status: String, message: String },
}

impl FetchError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, FetchError::Transport(err) if err.is_timeout())
    }
}

pub struct Client {
    http: HttpClient,
    user_agent: String,
}

impl Client {
    pub fn new(config: ClientConfig) -> Result<Self> {
        if config.user_agent.trim().is_empty() {
            bail!("guardian client user agent required");
        }

        let http = match config.http_client {
            Some(client) => client,
            None => HttpClient::builder()
                .connect_timeout(config.connect_timeout)
                .timeout(config.read_timeout)
                .build()?,
        };

        Ok(Client {
            http,
            user_agent: config.user_agent,
        })
    }

    /// Performs one GET against `url` and parses the article envelope.
    pub fn fetch_page(&self, url: &str) -> Result<Vec<Article>, FetchError> {
        let parsed = Url::parse(url).map_err(|source| FetchError::InvalidUrl {
            url: url.to_string(),
            source,
        })?;

        debug!(host = parsed.host_str().unwrap_or_default(), "requesting articles");
        let response = self
            .http
            .get(parsed)
            .header(USER_AGENT, &self.user_agent)
            .send()
            .map_err(FetchError::Transport)?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(FetchError::Status(status.as_u16()));
        }

        let body = response.text().map_err(FetchError::Transport)?;
        parse_articles(&body)
    }

    /// Same as [`Client::fetch_page`], with every failure logged and collapsed to an
    /// empty page.
    pub fn fetch_latest_news(&self, url: &str) -> Vec<Article> {
        match self.fetch_page(url) {
            Ok(articles) => articles,
            Err(err) => {
                match &err {
                    FetchError::InvalidUrl { .. } => error!("issue building the URL: {err}"),
                    FetchError::Transport(_) if err.is_timeout() => {
                        warn!("request timed out: {err}")
                    }
                    FetchError::Transport(_) => warn!("issue making the HTTP request: {err}"),
                    _ => error!("{err}"),
                }
                Vec::new()
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    response: ResponseBody,
}

#[derive(Debug, Deserialize)]
struct ResponseBody {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    results: Option<Vec<ResultItem>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResultItem {
    web_title: String,
    section_name: String,
    tags: Vec<Contributor>,
    web_publication_date: String,
    web_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Contributor {
    web_title: String,
}

impl ResultItem {
    fn into_article(self) -> Result<Article, FetchError> {
        if self.web_title.trim().is_empty() {
            return Err(FetchError::EmptyField("webTitle"));
        }
        if self.section_name.trim().is_empty() {
            return Err(FetchError::EmptyField("sectionName"));
        }
        let names: Vec<String> = self.tags.into_iter().map(|tag| tag.web_title).collect();
        Ok(Article {
            title: self.web_title,
            section: self.section_name,
            author: article::author_from_contributors(&names),
            published_at: self.web_publication_date,
            url: self.web_url,
        })
    }
}

/// Parses a full response body. One bad result discards the whole page.
pub fn parse_articles(body: &str) -> Result<Vec<Article>, FetchError> {
    let envelope: Envelope = serde_json::from_str(body)?;
    let response = envelope.response;

    if !response.status.eq_ignore_ascii_case(STATUS_OK) {
        return Err(FetchError::Api {
            status: response.status,
            message: response.message.unwrap_or_default(),
        });
    }

    let results = response.results.ok_or(FetchError::MissingField("results"))?;
    results.into_iter().map(ResultItem::into_article).collect()
}

/// Resolves the host of `base_url`; used as the "is there a network" check before
/// a request is attempted.
pub fn host_reachable(base_url: &str) -> bool {
    let Ok(url) = Url::parse(base_url) else {
        return false;
    };
    let Some(host) = url.host_str() else {
        return false;
    };
    let port = url.port_or_known_default().unwrap_or(443);
    match (host, port).to_socket_addrs() {
        Ok(mut addrs) => addrs.next().is_some(),
        Err(err) => {
            debug!("resolve {host}: {err}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    const TWO_ARTICLES: &str = r#"{
      "response": {
        "status": "ok",
        "total": 2,
        "results": [
          {
            "id": "science/2018/may/17/a",
            "sectionName": "Science",
            "webPublicationDate": "2018-05-17T13:21:54Z",
            "webTitle": "Astronomers spot interstellar asteroid | Science",
            "webUrl": "https://www.theguardian.com/science/2018/may/17/a",
            "tags": [{"webTitle": "Ian Sample"}]
          },
          {
            "id": "technology/2018/may/16/b",
            "sectionName": "Technology",
            "webPublicationDate": "2018-05-16T09:00:00Z",
            "webTitle": "Robots learn to fold laundry",
            "webUrl": "https://www.theguardian.com/technology/2018/may/16/b",
            "tags": [{"webTitle": "Alex Hern"}, {"webTitle": "Samuel Gibbs"}]
          }
        ]
      }
    }"#;

    fn serve_once(status: u16, body: &'static str) -> String {
        let server = tiny_http::Server::http("127.0.0.1:0").unwrap();
        let addr = server.server_addr().to_string();
        thread::spawn(move || {
            if let Ok(request) = server.recv() {
                let response =
                    tiny_http::Response::from_string(body).with_status_code(status as i32);
                let _ = request.respond(response);
            }
        });
        format!("http://{addr}/search?q=science")
    }

    fn serve_after(delay: Duration) -> String {
        let server = tiny_http::Server::http("127.0.0.1:0").unwrap();
        let addr = server.server_addr().to_string();
        thread::spawn(move || {
            if let Ok(request) = server.recv() {
                thread::sleep(delay);
                let _ = request.respond(tiny_http::Response::from_string(TWO_ARTICLES));
            }
        });
        format!("http://{addr}/search?q=science")
    }

    fn client() -> Client {
        Client::new(ClientConfig::default()).unwrap()
    }

    #[test]
    fn parses_articles_in_order() {
        let articles = parse_articles(TWO_ARTICLES).unwrap();
        assert_eq!(articles.len(), 2);
        assert_eq!(
            articles[0].title,
            "Astronomers spot interstellar asteroid | Science"
        );
        assert_eq!(articles[0].author.as_deref(), Some("Ian Sample"));
        assert_eq!(articles[1].section, "Technology");
        assert_eq!(articles[1].author.as_deref(), Some("Alex Hern and others"));
        assert_eq!(articles[1].published_at, "2018-05-16T09:00:00Z");
    }

    #[test]
    fn no_contributors_means_no_author() {
        let body = r#"{"response":{"status":"ok","results":[{"sectionName":"Science",
            "webPublicationDate":"2018-05-17T13:21:54Z","webTitle":"T",
            "webUrl":"https://example.com/t","tags":[]}]}}"#;
        let articles = parse_articles(body).unwrap();
        assert_eq!(articles[0].author, None);
    }

    #[test]
    fn missing_field_discards_whole_page() {
        let body = r#"{"response":{"status":"ok","results":[
            {"sectionName":"Science","webPublicationDate":"2018-05-17T13:21:54Z",
             "webTitle":"Fine","webUrl":"https://example.com/1","tags":[]},
            {"sectionName":"Science","webPublicationDate":"2018-05-17T13:21:54Z",
             "webTitle":"No url","tags":[]}]}}"#;
        assert!(matches!(parse_articles(body), Err(FetchError::Decode(_))));
    }

    #[test]
    fn empty_title_is_a_data_error() {
        let body = r#"{"response":{"status":"ok","results":[{"sectionName":"Science",
            "webPublicationDate":"x","webTitle":"  ","webUrl":"u","tags":[]}]}}"#;
        assert!(matches!(
            parse_articles(body),
            Err(FetchError::EmptyField("webTitle"))
        ));
    }

    #[test]
    fn error_envelope_carries_server_message() {
        let body = r#"{"response":{"status":"error","message":"Invalid authentication credentials"}}"#;
        match parse_articles(body) {
            Err(FetchError::Api { status, message }) => {
                assert_eq!(status, "error");
                assert_eq!(message, "Invalid authentication credentials");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn status_comparison_ignores_case_only() {
        let body = r#"{"response":{"status":"OK","results":[]}}"#;
        assert!(parse_articles(body).unwrap().is_empty());
        let body = r#"{"response":{"status":"okay","results":[]}}"#;
        assert!(matches!(parse_articles(body), Err(FetchError::Api { .. })));
    }

    #[test]
    fn ok_without_results_is_missing_field() {
        let body = r#"{"response":{"status":"ok"}}"#;
        assert!(matches!(
            parse_articles(body),
            Err(FetchError::MissingField("results"))
        ));
    }

    #[test]
    fn fetch_page_over_http() {
        let url = serve_once(200, TWO_ARTICLES);
        let articles = client().fetch_page(&url).unwrap();
        assert_eq!(articles.len(), 2);
    }

    #[test]
    fn non_200_is_a_status_error() {
        let url = serve_once(401, r#"{"message":"Unauthorized"}"#);
        assert!(matches!(
            client().fetch_page(&url),
            Err(FetchError::Status(401))
        ));
    }

    #[test]
    fn failures_collapse_to_empty_page() {
        let url = serve_once(500, "oops");
        assert!(client().fetch_latest_news(&url).is_empty());
        assert!(client().fetch_latest_news("::not a url::").is_empty());
    }

    #[test]
    fn slow_response_times_out() {
        let url = serve_after(Duration::from_secs(2));
        let client = Client::new(ClientConfig {
            read_timeout: Duration::from_millis(200),
            ..ClientConfig::default()
        })
        .unwrap();
        match client.fetch_page(&url) {
            Err(err @ FetchError::Transport(_)) => assert!(err.is_timeout(), "{err}"),
            other => panic!("expected a timeout, got {other:?}"),
        }
    }

    #[test]
    fn timeout_collapses_to_empty_page() {
        let url = serve_after(Duration::from_secs(2));
        let http = HttpClient::builder()
            .timeout(Duration::from_millis(200))
            .build()
            .unwrap();
        let client = Client::new(ClientConfig {
            http_client: Some(http),
            ..ClientConfig::default()
        })
        .unwrap();
        assert!(client.fetch_latest_news(&url).is_empty());
    }

    #[test]
    fn malformed_url_is_reported() {
        assert!(matches!(
            client().fetch_page("no scheme"),
            Err(FetchError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn loopback_host_is_reachable() {
        assert!(host_reachable("http://127.0.0.1:9/search"));
        assert!(!host_reachable("not a url"));
    }
}
