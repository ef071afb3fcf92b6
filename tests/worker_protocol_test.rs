//! Worker wire-protocol test suite
//!
//! Drives the real client over in-memory duplex streams with a scripted
//! worker on the far side: correlation under out-of-order delivery,
//! malformed/unmatched frame handling, explicit error frames, and dead
//! connections all resolving to absent vectors.

use std::sync::Arc;

use futures::future::join_all;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use recall::{EmbeddingClient, EmbeddingProducer, RateLimiter, WorkerClient, EMBEDDING_DIM};

fn indexed_vector(hot: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; EMBEDDING_DIM];
    v[hot] = 1.0;
    v
}

#[tokio::test]
async fn out_of_order_responses_reach_their_callers() {
    const N: usize = 8;
    let (client_io, server_io) = tokio::io::duplex(1 << 16);
    let client = Arc::new(WorkerClient::from_stream(client_io));

    // Collect all N requests first, then answer them in reverse order.
    let server = tokio::spawn(async move {
        let (read, mut write) = tokio::io::split(server_io);
        let mut lines = BufReader::new(read).lines();
        let mut requests = Vec::new();
        while requests.len() < N {
            let line = lines.next_line().await.unwrap().unwrap();
            requests.push(serde_json::from_str::<serde_json::Value>(&line).unwrap());
        }
        for request in requests.iter().rev() {
            let id = request["id"].as_str().unwrap();
            let index: usize = request["text"]
                .as_str()
                .unwrap()
                .trim_start_matches("text-")
                .parse()
                .unwrap();
            let frame = json!({ "id": id, "embedding": indexed_vector(index) });
            write
                .write_all(format!("{frame}\n").as_bytes())
                .await
                .unwrap();
        }
    });

    let calls: Vec<_> = (0..N)
        .map(|i| {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.embed(&format!("text-{i}")).await })
        })
        .collect();

    for (i, joined) in join_all(calls).await.into_iter().enumerate() {
        let vector = joined.unwrap().expect("response should be matched");
        assert_eq!(vector.len(), EMBEDDING_DIM);
        assert_eq!(vector[i], 1.0, "caller {i} got someone else's vector");
    }
    server.await.unwrap();
}

#[tokio::test]
async fn malformed_and_unmatched_frames_are_discarded() {
    let (client_io, server_io) = tokio::io::duplex(1 << 16);
    let client = WorkerClient::from_stream(client_io);

    let server = tokio::spawn(async move {
        let (read, mut write) = tokio::io::split(server_io);
        let mut lines = BufReader::new(read).lines();
        let line = lines.next_line().await.unwrap().unwrap();
        let id = serde_json::from_str::<serde_json::Value>(&line).unwrap()["id"]
            .as_str()
            .unwrap()
            .to_string();

        // Noise first: not JSON, then a response for an id nobody asked for.
        write.write_all(b"not json at all\n").await.unwrap();
        let unmatched = json!({ "id": "stranger", "embedding": indexed_vector(0) });
        write
            .write_all(format!("{unmatched}\n").as_bytes())
            .await
            .unwrap();
        let real = json!({ "id": id, "embedding": indexed_vector(3) });
        write
            .write_all(format!("{real}\n").as_bytes())
            .await
            .unwrap();
    });

    let vector = client.embed("query").await.expect("real frame still lands");
    assert_eq!(vector[3], 1.0);
    server.await.unwrap();
}

#[tokio::test]
async fn explicit_error_frame_yields_absent() {
    let (client_io, server_io) = tokio::io::duplex(1 << 16);
    let client = WorkerClient::from_stream(client_io);

    let server = tokio::spawn(async move {
        let (read, mut write) = tokio::io::split(server_io);
        let mut lines = BufReader::new(read).lines();
        let line = lines.next_line().await.unwrap().unwrap();
        let id = serde_json::from_str::<serde_json::Value>(&line).unwrap()["id"]
            .as_str()
            .unwrap()
            .to_string();
        let frame = json!({ "id": id, "error": "model exploded" });
        write
            .write_all(format!("{frame}\n").as_bytes())
            .await
            .unwrap();
    });

    assert_eq!(client.embed("query").await, None);
    server.await.unwrap();
}

#[tokio::test]
async fn wrong_dimension_yields_absent() {
    let (client_io, server_io) = tokio::io::duplex(1 << 16);
    let client = WorkerClient::from_stream(client_io);

    let server = tokio::spawn(async move {
        let (read, mut write) = tokio::io::split(server_io);
        let mut lines = BufReader::new(read).lines();
        let line = lines.next_line().await.unwrap().unwrap();
        let id = serde_json::from_str::<serde_json::Value>(&line).unwrap()["id"]
            .as_str()
            .unwrap()
            .to_string();
        let frame = json!({ "id": id, "embedding": [1.0, 2.0, 3.0] });
        write
            .write_all(format!("{frame}\n").as_bytes())
            .await
            .unwrap();
    });

    assert_eq!(client.embed("query").await, None);
    server.await.unwrap();
}

#[tokio::test]
async fn dropped_connection_resolves_pending_calls() {
    let (client_io, server_io) = tokio::io::duplex(1 << 16);
    let client = WorkerClient::from_stream(client_io);

    let server = tokio::spawn(async move {
        let (read, _write) = tokio::io::split(server_io);
        let mut lines = BufReader::new(read).lines();
        // Accept the request, then die without answering.
        let _ = lines.next_line().await;
    });

    assert_eq!(client.embed("query").await, None);
    server.await.unwrap();
}

#[tokio::test]
async fn refused_connection_yields_absent() {
    // Nothing listens on a reserved port; the connect fails and the call
    // degrades instead of erroring.
    let client = WorkerClient::new("127.0.0.1:1");
    assert_eq!(client.embed("query").await, None);
}

#[tokio::test]
async fn embedding_client_tags_and_rate_limits_worker_calls() {
    let (client_io, server_io) = tokio::io::duplex(1 << 16);
    let worker = WorkerClient::from_stream(client_io);
    let limiter = Arc::new(RateLimiter::new(1.0, 10));
    let client = EmbeddingClient::new(EmbeddingProducer::Worker(worker), Arc::clone(&limiter));

    let server = tokio::spawn(async move {
        let (read, mut write) = tokio::io::split(server_io);
        let mut lines = BufReader::new(read).lines();
        let line = lines.next_line().await.unwrap().unwrap();
        let request: serde_json::Value = serde_json::from_str(&line).unwrap();
        let text = request["text"].as_str().unwrap();
        assert!(
            text.starts_with("passage: "),
            "worker should see the tagged prompt, got {text:?}"
        );
        let frame = json!({ "id": request["id"], "embedding": indexed_vector(0) });
        write
            .write_all(format!("{frame}\n").as_bytes())
            .await
            .unwrap();
    });

    assert!(client.embed("hello").await.is_some());
    assert_eq!(limiter.available_tokens(), 9, "one token consumed per call");
    server.await.unwrap();
}
