use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use medqa::assistant::generator::HuggingFaceGenerator;
use medqa::assistant::pubmed::PubMedClient;
use medqa::{GenerationOptions, LiteratureSearch, PipelineError, TextGenerator};

#[derive(Debug, Clone)]
struct RecordedRequest {
    method: String,
    target: String,
    headers: Vec<(String, String)>,
    body: String,
}

impl RecordedRequest {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

struct Route {
    path: &'static str,
    status: u16,
    content_type: &'static str,
    body: String,
}

impl Route {
    fn new(path: &'static str, status: u16, content_type: &'static str, body: impl Into<String>) -> Self {
        Self {
            path,
            status,
            content_type,
            body: body.into(),
        }
    }
}

/// One-request-per-connection HTTP/1.1 server answering from fixed routes.
struct StubServer {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl StubServer {
    async fn start(routes: Vec<Route>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let routes = Arc::new(routes);

        let recorded = requests.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let recorded = recorded.clone();
                let routes = routes.clone();
                tokio::spawn(async move {
                    serve(stream, &routes, &recorded).await;
                });
            }
        });

        Self { addr, requests }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

async fn serve(mut stream: TcpStream, routes: &[Route], recorded: &Mutex<Vec<RecordedRequest>>) {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        let read = stream.read(&mut chunk).await.unwrap();
        if read == 0 {
            return;
        }
        buffer.extend_from_slice(&chunk[..read]);
        if let Some(pos) = buffer.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buffer[..header_end]).to_string();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next().unwrap_or_default().split_whitespace();
    let method = request_line.next().unwrap_or_default().to_string();
    let target = request_line.next().unwrap_or_default().to_string();
    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        .collect();

    let content_length = headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.parse::<usize>().ok())
        .unwrap_or(0);
    while buffer.len() < header_end + content_length {
        let read = stream.read(&mut chunk).await.unwrap();
        if read == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..read]);
    }
    let body = String::from_utf8_lossy(&buffer[header_end..]).to_string();

    let path = target.split('?').next().unwrap_or_default().to_string();
    recorded.lock().unwrap().push(RecordedRequest {
        method,
        target,
        headers,
        body,
    });

    let response = match routes.iter().find(|route| route.path == path) {
        Some(route) => format!(
            "HTTP/1.1 {} Stub\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            route.status,
            route.content_type,
            route.body.len(),
            route.body
        ),
        None => "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string(),
    };
    stream.write_all(response.as_bytes()).await.unwrap();
    stream.shutdown().await.ok();
}

const EFETCH_XML: &str = r#"<PubmedArticleSet>
<PubmedArticle>
  <MedlineCitation>
    <PMID Version="1">37000001</PMID>
    <Article>
      <ArticleTitle>Treating long COVID</ArticleTitle>
      <Abstract><AbstractText>Rehabilitation helps.</AbstractText></Abstract>
    </Article>
    <KeywordList><Keyword>PASC</Keyword></KeywordList>
  </MedlineCitation>
</PubmedArticle>
</PubmedArticleSet>"#;

fn pubmed_client(server: &StubServer) -> PubMedClient {
    PubMedClient::with_base_url(&server.url("/eutils/"), "medqa", "medqa@example.com")
        .unwrap()
        .with_min_interval(Duration::ZERO)
}

#[tokio::test]
async fn search_runs_esearch_then_efetch() {
    let server = StubServer::start(vec![
        Route::new(
            "/eutils/esearch.fcgi",
            200,
            "application/json",
            json!({ "esearchresult": { "idlist": ["37000001"] } }).to_string(),
        ),
        Route::new("/eutils/efetch.fcgi", 200, "text/xml", EFETCH_XML),
    ])
    .await;

    let records = pubmed_client(&server).search("Long COVID", 1).await.unwrap();

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].title.as_deref(), Some("Treating long COVID"));
    assert_eq!(records[0].abstract_text.as_deref(), Some("Rehabilitation helps."));

    let requests = server.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].method, "GET");
    assert!(requests[0].target.starts_with("/eutils/esearch.fcgi?"));
    assert!(requests[0].target.contains("term=Long+COVID"));
    assert!(requests[0].target.contains("retmax=1"));
    assert!(requests[0].target.contains("retmode=json"));
    assert!(requests[1].target.starts_with("/eutils/efetch.fcgi?"));
    assert!(requests[1].target.contains("id=37000001"));
    assert!(requests[1].target.contains("retmode=xml"));
}

#[tokio::test]
async fn empty_id_list_skips_efetch() {
    let server = StubServer::start(vec![
        Route::new(
            "/eutils/esearch.fcgi",
            200,
            "application/json",
            json!({ "esearchresult": { "idlist": [] } }).to_string(),
        ),
        Route::new("/eutils/efetch.fcgi", 200, "text/xml", EFETCH_XML),
    ])
    .await;

    let records = pubmed_client(&server).search("nothing matches", 1).await.unwrap();

    assert!(records.is_empty());
    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].target.starts_with("/eutils/esearch.fcgi?"));
}

#[tokio::test]
async fn esearch_rate_limit_is_an_error() {
    let server = StubServer::start(vec![Route::new(
        "/eutils/esearch.fcgi",
        429,
        "application/json",
        r#"{"error":"API rate limit exceeded"}"#,
    )])
    .await;

    let err = pubmed_client(&server).search("Long COVID", 1).await.unwrap_err();

    assert!(matches!(err, PipelineError::Http(_)));
    assert_eq!(server.requests().len(), 1);
}

#[tokio::test]
async fn searches_are_paced_by_client() {
    let server = StubServer::start(vec![Route::new(
        "/eutils/esearch.fcgi",
        200,
        "application/json",
        json!({ "esearchresult": { "idlist": [] } }).to_string(),
    )])
    .await;
    let client = PubMedClient::with_base_url(&server.url("/eutils/"), "medqa", "medqa@example.com")
        .unwrap()
        .with_min_interval(Duration::from_millis(150));

    let start = std::time::Instant::now();
    for query in ["A", "B", "C"] {
        client.search(query, 1).await.unwrap();
    }

    assert_eq!(server.requests().len(), 3);
    assert!(start.elapsed() >= Duration::from_millis(300));
}

fn tgi_generator(server: &StubServer) -> HuggingFaceGenerator {
    HuggingFaceGenerator::new(
        Some("hf_test_token".to_string()),
        &server.url("/models/"),
        "mistralai/Mixtral-8x7B-Instruct-v0.1",
    )
    .unwrap()
}

#[tokio::test]
async fn tgi_request_carries_prompt_parameters_and_token() {
    let server = StubServer::start(vec![Route::new(
        "/models/mistralai/Mixtral-8x7B-Instruct-v0.1",
        200,
        "application/json",
        json!([{ "generated_text": "FINAL_ANSWER" }]).to_string(),
    )])
    .await;

    let replies = tgi_generator(&server)
        .generate("q: test question", &GenerationOptions::with_max_new_tokens(500))
        .await
        .unwrap();

    assert_eq!(replies, vec!["FINAL_ANSWER".to_string()]);

    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request.method, "POST");
    assert_eq!(request.header("authorization"), Some("Bearer hf_test_token"));

    let body: Value = serde_json::from_str(&request.body).unwrap();
    assert_eq!(body["inputs"], "q: test question");
    assert_eq!(body["parameters"]["max_new_tokens"], 500);
    assert_eq!(body["parameters"]["return_full_text"], false);
    assert!(body["parameters"].get("temperature").is_none());
}

#[tokio::test]
async fn tgi_default_options_send_only_return_full_text() {
    let server = StubServer::start(vec![Route::new(
        "/models/mistralai/Mixtral-8x7B-Instruct-v0.1",
        200,
        "application/json",
        json!({ "generated_text": "kw1" }).to_string(),
    )])
    .await;

    tgi_generator(&server)
        .generate("keywords please", &GenerationOptions::default())
        .await
        .unwrap();

    let body: Value = serde_json::from_str(&server.requests()[0].body).unwrap();
    assert_eq!(body["parameters"], json!({ "return_full_text": false }));
}

#[tokio::test]
async fn tgi_json_error_status_is_generation_error() {
    let server = StubServer::start(vec![Route::new(
        "/models/mistralai/Mixtral-8x7B-Instruct-v0.1",
        503,
        "application/json",
        r#"{"error":"Model is currently loading"}"#,
    )])
    .await;

    let err = tgi_generator(&server)
        .generate("prompt", &GenerationOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        PipelineError::Generation(msg) if msg.contains("503") && msg.contains("Model is currently loading")
    ));
}

#[tokio::test]
async fn tgi_html_error_page_keeps_status() {
    let server = StubServer::start(vec![Route::new(
        "/models/mistralai/Mixtral-8x7B-Instruct-v0.1",
        502,
        "text/html",
        "<html><body>Bad Gateway</body></html>",
    )])
    .await;

    let err = tgi_generator(&server)
        .generate("prompt", &GenerationOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        PipelineError::Generation(msg) if msg.contains("502") && msg.contains("Bad Gateway")
    ));
}
