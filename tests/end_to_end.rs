use std::sync::Arc;
use std::thread;
use std::time::Duration;

use stem_news::data::GuardianFeedService;
use stem_news::guardian::{Client, ClientConfig};
use stem_news::loader::{LoadTrigger, Loader, Session};
use stem_news::query::{FeedQuery, OrderBy};

const PAGE_ONE: &str = r#"{"response":{"status":"ok","results":[
  {"sectionName":"Science","webPublicationDate":"2018-05-17T13:21:54Z",
   "webTitle":"Comet sighted | Science","webUrl":"https://www.theguardian.com/science/a",
   "tags":[{"webTitle":"Ian Sample"}]},
  {"sectionName":"Technology","webPublicationDate":"2018-05-16T09:00:00Z",
   "webTitle":"Chips get smaller","webUrl":"https://www.theguardian.com/technology/b",
   "tags":[]}
]}}"#;
const EMPTY_PAGE: &str = r#"{"response":{"status":"ok","results":[]}}"#;

/// Serves page 1 for `page=1` and an empty page for anything else. Returns the base URL
/// and a channel of the request URLs seen.
fn serve(requests: usize) -> (String, crossbeam_channel::Receiver<String>) {
    let server = tiny_http::Server::http("127.0.0.1:0").unwrap();
    let base = format!("http://{}/search", server.server_addr());
    let (tx, rx) = crossbeam_channel::unbounded();
    thread::spawn(move || {
        for _ in 0..requests {
            let Ok(request) = server.recv() else {
                return;
            };
            let url = request.url().to_string();
            let body = if url.contains("page=1&") {
                PAGE_ONE
            } else {
                EMPTY_PAGE
            };
            let _ = tx.send(url);
            let _ = request.respond(tiny_http::Response::from_string(body));
        }
    });
    (base, rx)
}

#[test]
fn loads_and_merges_pages_over_http() {
    let (base_url, seen) = serve(2);
    let client = Client::new(ClientConfig::default()).unwrap();
    let service = Arc::new(GuardianFeedService::new(Arc::new(client)));
    let query = FeedQuery {
        base_url,
        api_key: "test".to_string(),
        order_by: OrderBy::Relevance,
        categories: ["science", "technology"].into_iter().collect(),
    };
    let mut loader = Loader::new(service);
    let mut session = Session::default();

    loader.request(&mut session, &query, LoadTrigger::Initial);
    let first = loader
        .wait(&mut session, Duration::from_secs(10))
        .expect("first page")
        .unwrap();
    assert_eq!(first.fetched, 2);
    let articles = session.articles();
    assert_eq!(articles[0].display_title(), "Comet sighted");
    assert_eq!(articles[0].byline(), "Science | Ian Sample");
    assert_eq!(articles[1].byline(), "Technology");
    assert_eq!(articles[1].display_date(), "16 May, 2018");

    let url = seen.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(
        url,
        "/search?q=science+OR+technology&order-by=relevance&page-size=10&page=1&show-tags=contributor&api-key=test"
    );

    loader.request(&mut session, &query, LoadTrigger::NextPage);
    let second = loader
        .wait(&mut session, Duration::from_secs(10))
        .expect("second page")
        .unwrap();
    assert_eq!(second.page, 2);
    assert_eq!(second.fetched, 0);
    assert_eq!(session.articles().len(), 2);
    assert!(seen
        .recv_timeout(Duration::from_secs(1))
        .unwrap()
        .contains("page=2&"));
}
