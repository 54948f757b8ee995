use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use feedcast_core::{
    FeedConfig, Fetch, FetchConfig, FetchError, HttpFetcher, Labels, MemoryStateStore,
    MessageLimits, PipelineError, Pipeline, RetryPolicy, SkipRule, StateStore, UnitKind,
};

const SOURCE: &str = "http://example.com/rss";

/// Serves whatever document was last stored.
struct StaticFeed(Mutex<String>);

impl StaticFeed {
    fn new(body: &str) -> Arc<Self> {
        Arc::new(Self(Mutex::new(body.to_owned())))
    }

    fn replace(&self, body: &str) {
        *self.0.lock().unwrap() = body.to_owned();
    }
}

#[async_trait]
impl Fetch for StaticFeed {
    async fn fetch(&self, _url: &str) -> Result<Bytes, FetchError> {
        Ok(Bytes::from(self.0.lock().unwrap().clone()))
    }
}

fn item(title: &str, link: &str, date: &str, body: &str) -> String {
    format!(
        "<item><title>{title}</title><link>{link}</link><pubDate>{date}</pubDate>\
         <description><![CDATA[{body}]]></description></item>"
    )
}

fn rss(items: &[String]) -> String {
    format!(
        "<?xml version=\"1.0\"?><rss version=\"2.0\"><channel><title>Blog</title>{}</channel></rss>",
        items.concat()
    )
}

fn pipeline(config: FeedConfig, fetcher: Arc<dyn Fetch>, state: Arc<dyn StateStore>) -> Pipeline {
    Pipeline::new(
        config,
        MessageLimits::default(),
        Labels::default(),
        fetcher,
        state,
    )
}

fn feed_config() -> FeedConfig {
    FeedConfig {
        source: SOURCE.into(),
        ..FeedConfig::default()
    }
}

#[tokio::test]
async fn unchanged_feed_is_published_once() {
    let doc = rss(&[item(
        "Hello",
        "http://example.com/1",
        "Mon, 21 Oct 2024 08:00:00 GMT",
        "<p>Hello <img src='x.png'> World</p>",
    )]);
    let state = Arc::new(MemoryStateStore::new());
    let pipeline = pipeline(feed_config(), StaticFeed::new(&doc), state.clone());

    let first = pipeline.check_for_new_item().await.unwrap().unwrap();
    assert_eq!(first.item.link, "http://example.com/1");
    assert_eq!(first.units.len(), 2);
    assert_eq!(first.units[0].kind, UnitKind::Text);
    assert!(first.units[0].text.starts_with("<i>New post</i>"));
    assert!(first.units[0].text.ends_with("Hello "));
    assert_eq!(first.units[1].image.as_deref(), Some("x.png"));
    assert_eq!(first.units[1].text, "World");
    assert_eq!(first.units[1].controls[0][0].label, "View post");

    assert!(pipeline.check_for_new_item().await.unwrap().is_none());
    assert_eq!(
        state.get("last-feed-date:http://example.com/rss").await.unwrap().as_deref(),
        Some("2024-10-21T08:00:00+00:00")
    );
}

#[tokio::test]
async fn newer_item_is_published_and_older_is_not() {
    let feed = StaticFeed::new(&rss(&[item(
        "One",
        "http://example.com/1",
        "Mon, 21 Oct 2024 08:00:00 GMT",
        "first",
    )]));
    let pipeline = pipeline(feed_config(), feed.clone(), Arc::new(MemoryStateStore::new()));
    assert!(pipeline.check_for_new_item().await.unwrap().is_some());

    feed.replace(&rss(&[item(
        "Zero",
        "http://example.com/0",
        "Sun, 20 Oct 2024 08:00:00 GMT",
        "older",
    )]));
    assert!(pipeline.check_for_new_item().await.unwrap().is_none());

    feed.replace(&rss(&[item(
        "Two",
        "http://example.com/2",
        "Tue, 22 Oct 2024 08:00:00 GMT",
        "second",
    )]));
    let publication = pipeline.check_for_new_item().await.unwrap().unwrap();
    assert_eq!(publication.item.title.as_deref(), Some("Two"));
}

#[tokio::test]
async fn title_rule_matching_the_sole_item_emits_nothing() {
    let doc = rss(&[item(
        "[Ad] Buy now",
        "http://example.com/ad",
        "Mon, 21 Oct 2024 08:00:00 GMT",
        "promo",
    )]);
    let config = FeedConfig {
        skip: SkipRule::parse("title/\\[Ad\\]").unwrap(),
        ..feed_config()
    };
    let state = Arc::new(MemoryStateStore::new());
    let pipeline = pipeline(config, StaticFeed::new(&doc), state.clone());

    assert!(pipeline.check_for_new_item().await.unwrap().is_none());
    assert!(state.get("last-feed-date:http://example.com/rss").await.unwrap().is_none());
}

#[tokio::test]
async fn content_rule_moves_on_to_the_next_candidate() {
    let doc = rss(&[
        item(
            "Promo",
            "http://example.com/promo",
            "Tue, 22 Oct 2024 08:00:00 GMT",
            "<a href=\"http://shop.example/deal\">deal</a>",
        ),
        item(
            "News",
            "http://example.com/news",
            "Mon, 21 Oct 2024 08:00:00 GMT",
            "<p>news</p>",
        ),
    ]);
    let config = FeedConfig {
        skip: SkipRule::parse("content/a[href*=shop]").unwrap(),
        ..feed_config()
    };
    let pipeline = pipeline(config, StaticFeed::new(&doc), Arc::new(MemoryStateStore::new()));

    let publication = pipeline.check_for_new_item().await.unwrap().unwrap();
    assert_eq!(publication.item.link, "http://example.com/news");
}

#[tokio::test]
async fn missing_selector_target_is_reported_as_extraction_failure() {
    let doc = "<?xml version=\"1.0\"?><rss><channel><item><title>T</title>\
               <pubDate>Mon, 21 Oct 2024 08:00:00 GMT</pubDate><description>x</description>\
               </item></channel></rss>";
    let pipeline = pipeline(feed_config(), StaticFeed::new(doc), Arc::new(MemoryStateStore::new()));

    let err = pipeline.check_for_new_item().await.unwrap_err();
    assert_eq!(err.stage(), "extraction");
}

#[tokio::test]
async fn empty_content_is_reported_as_sanitization_failure() {
    let doc = rss(&[item(
        "Blank",
        "http://example.com/blank",
        "Mon, 21 Oct 2024 08:00:00 GMT",
        "<div><span> </span></div>",
    )]);
    let pipeline = pipeline(feed_config(), StaticFeed::new(&doc), Arc::new(MemoryStateStore::new()));

    let err = pipeline.check_for_new_item().await.unwrap_err();
    assert!(matches!(err, PipelineError::Sanitization(_)));
}

#[tokio::test]
async fn long_post_fits_the_text_limit_with_its_header() {
    let body = "word ".repeat(1000);
    let doc = rss(&[item(
        "Long",
        "http://example.com/long",
        "Mon, 21 Oct 2024 08:00:00 GMT",
        &body,
    )]);
    let pipeline = pipeline(feed_config(), StaticFeed::new(&doc), Arc::new(MemoryStateStore::new()));

    let publication = pipeline.check_for_new_item().await.unwrap().unwrap();
    assert_eq!(publication.units.len(), 1);
    let unit = &publication.units[0];
    assert!(unit.text_len() <= 4096);
    assert!(unit.text.ends_with(&Labels::default().read_more));
}

#[tokio::test]
async fn fetches_over_http_end_to_end() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rss"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/rss+xml")
                .set_body_string(rss(&[item(
                    "Over the wire",
                    "http://example.com/wire",
                    "Mon, 21 Oct 2024 08:00:00 GMT",
                    "<b>bold</b> move",
                )])),
        )
        .mount(&server)
        .await;

    let fetch_config = FetchConfig {
        retry: RetryPolicy {
            attempts: 1,
            ..RetryPolicy::default()
        },
        ..FetchConfig::default()
    };
    let config = FeedConfig {
        source: format!("{}/rss", server.uri()),
        ..FeedConfig::default()
    };
    let fetcher = Arc::new(HttpFetcher::new(&fetch_config, None).unwrap());
    let pipeline = pipeline(config, fetcher, Arc::new(MemoryStateStore::new()));

    let publication = pipeline.check_for_new_item().await.unwrap().unwrap();
    assert!(publication.units[0].text.ends_with("<b>bold</b> move"));
}
