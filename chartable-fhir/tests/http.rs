use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::sync::mpsc::{self, Receiver};
use std::thread;

use chartable_core::ChartError;
use chartable_fhir::{HttpFetcher, ObservationQuery, RecordFetcher};
use serde_json::json;

/// Bind a local listener and return it with the FHIR base URL it serves.
fn local_server() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Could not bind local listener");
    let addr = listener.local_addr().expect("local address");
    (listener, format!("http://{addr}/fhir"))
}

/// Answer one connection per canned response, in order. Each request line is
/// sent back on the returned channel.
fn respond(listener: TcpListener, responses: Vec<(u16, String)>) -> Receiver<String> {
    let (sender, requests) = mpsc::channel();
    thread::spawn(move || {
        for (status, body) in responses {
            let Ok((mut stream, _)) = listener.accept() else {
                return;
            };
            let mut reader = BufReader::new(stream.try_clone().expect("clone stream"));
            let mut request_line = String::new();
            reader.read_line(&mut request_line).expect("request line");
            loop {
                let mut header = String::new();
                if reader.read_line(&mut header).expect("header") == 0 || header == "\r\n" {
                    break;
                }
            }
            sender
                .send(request_line.trim_end().to_string())
                .expect("request channel");

            write!(
                stream,
                "HTTP/1.1 {status} Canned\r\nContent-Type: application/fhir+json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            )
            .expect("write response");
            stream.flush().expect("flush response");
        }
    });
    requests
}

fn observation(id: &str, day: &str) -> serde_json::Value {
    json!({
        "resource": {
            "resourceType": "Observation",
            "id": id,
            "code": {"coding": [{"code": "8867-4", "display": "Heart rate"}]},
            "subject": {"reference": "Patient/p1"},
            "effectiveDateTime": format!("{day}T08:00:00Z"),
            "valueQuantity": {"value": 70, "unit": "/min"}
        }
    })
}

#[test]
fn server_errors_become_transport_errors() {
    let (listener, base_url) = local_server();
    let requests = respond(listener, vec![(500, r#"{"resourceType":"OperationOutcome"}"#.to_string())]);
    let fetcher = HttpFetcher::new(base_url.as_str()).expect("client");

    let err = fetcher
        .fetch_records(&ObservationQuery::for_patient("p1"), 10)
        .expect_err("500 is not an empty result");
    assert!(err.is_transport());
    match err {
        ChartError::Transport { status, url } => {
            assert_eq!(status, 500);
            assert_eq!(url, format!("{base_url}/Observation"));
        }
        other => panic!("unexpected error {other:?}"),
    }

    let request = requests.recv().expect("one request");
    assert!(request.starts_with("GET /fhir/Observation?"));
    assert!(request.contains("patient=p1"));
}

#[test]
fn absolute_next_links_are_followed() {
    let (listener, base_url) = local_server();
    let first = json!({
        "resourceType": "Bundle",
        "link": [
            {"relation": "self", "url": format!("{base_url}/Observation?patient=p1")},
            {"relation": "next", "url": format!("{base_url}/Observation?patient=p1&page=2")}
        ],
        "entry": [observation("o1", "2021-01-01"), observation("o2", "2021-02-01")]
    });
    let second = json!({
        "resourceType": "Bundle",
        "entry": [observation("o3", "2021-03-01")]
    });
    let requests = respond(
        listener,
        vec![(200, first.to_string()), (200, second.to_string())],
    );
    let fetcher = HttpFetcher::new(base_url.as_str()).expect("client");

    let records = fetcher
        .fetch_records(&ObservationQuery::for_patient("p1"), 100)
        .expect("two pages");
    let ids: Vec<&str> = records.iter().map(|r| r.id.as_deref().unwrap_or("")).collect();
    assert_eq!(ids, vec!["o1", "o2", "o3"]);
    assert!(records.iter().all(|r| r.subject_id.as_deref() == Some("p1")));

    let search = requests.recv().expect("search request");
    assert!(search.contains("_count=100"));
    let follow = requests.recv().expect("next request");
    assert!(follow.starts_with("GET /fhir/Observation?patient=p1&page=2 "));
}

#[test]
fn population_ids_come_from_patient_search() {
    let (listener, base_url) = local_server();
    let bundle = json!({
        "resourceType": "Bundle",
        "entry": [
            {"resource": {"resourceType": "Patient", "id": "a"}},
            {"resource": {"resourceType": "OperationOutcome"}},
            {"resource": {"resourceType": "Patient", "id": "b"}}
        ]
    });
    let requests = respond(listener, vec![(200, bundle.to_string())]);
    let fetcher = HttpFetcher::new(base_url.as_str()).expect("client");

    let ids = fetcher
        .fetch_population_ids(Some("laboratory"), 25)
        .expect("patients");
    assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);

    let request = requests.recv().expect("patient request");
    assert!(request.starts_with("GET /fhir/Patient?"));
    assert!(request.contains("_count=25"));
    assert!(request.contains("category=laboratory"));
}
