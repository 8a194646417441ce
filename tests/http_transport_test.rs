//! HTTP Transport Integration Tests
//!
//! Drives the client against a wiremock server standing in for both the
//! RPC and the content endpoints.
//!
//! ## Test Coverage
//!
//! - Bearer authentication on every request
//! - Content endpoints: `Dropbox-API-Arg` header, raw request bodies
//! - Chunked upload sessions over HTTP
//! - Listing pagination through `list_folder/continue`
//! - Error summaries mapped to `TransportError::Api`
//! - Timeouts and size mismatches abort a session before finish

#[cfg(test)]
mod tests {
    use dropstream::config::ApiConfig;
    use dropstream::transport::http::{HttpTransport, API_ARG_HEADER};
    use dropstream::transport::TransportError;
    use dropstream::upload::UploadLimits;
    use dropstream::{Client, ClientError, UploadError, UploadPlan};
    use futures::TryStreamExt;
    use serde_json::{json, Value};
    use std::time::Duration;
    use wiremock::matchers::{body_bytes, body_json, body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    fn client_for(server: &MockServer) -> Client {
        let config = ApiConfig {
            api_url: server.uri(),
            content_url: server.uri(),
            ..ApiConfig::with_token("test-token")
        };
        Client::new(HttpTransport::new(&config).unwrap()).with_limits(UploadLimits {
            default_chunk_size: 16,
            max_request_size: 64,
        })
    }

    /// Matches requests whose API argument header decodes to `expected`
    fn api_arg(expected: Value) -> impl Fn(&Request) -> bool + Send + Sync {
        move |req: &Request| {
            req.headers
                .get(API_ARG_HEADER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| serde_json::from_str::<Value>(v).ok())
                .is_some_and(|v| v == expected)
        }
    }

    fn file_json(name: &str, size: u64) -> Value {
        json!({
            ".tag": "file",
            "name": name,
            "id": format!("id:{name}"),
            "path_lower": format!("/{}", name.to_lowercase()),
            "path_display": format!("/{name}"),
            "size": size,
            "client_modified": "2024-03-01T10:00:00Z",
            "server_modified": "2024-03-01T10:00:05Z",
            "rev": "015f"
        })
    }

    // ========================================================================
    // Uploads
    // ========================================================================

    #[tokio::test]
    async fn test_small_upload_is_single_request() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/2/files/upload"))
            .and(header("Authorization", "Bearer test-token"))
            .and(header("Content-Type", "application/octet-stream"))
            .and(api_arg(json!({
                "path": "/hello.txt",
                "mode": "overwrite",
                "autorename": false,
                "mute": true
            })))
            .and(body_bytes(b"0123456789".to_vec()))
            .respond_with(ResponseTemplate::new(200).set_body_json(file_json("hello.txt", 10)))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let plan = UploadPlan::new("/hello.txt").with_size(10);
        let mut source: &[u8] = b"0123456789";
        let info = client.upload_with(&plan, &mut source).await.unwrap();

        assert_eq!(info.size(), 10);
        assert_eq!(info.path(), "/hello.txt");
    }

    #[tokio::test]
    async fn test_known_size_session_folds_last_chunk_into_finish() {
        let server = MockServer::start().await;
        let payload: Vec<u8> = (0..40u8).collect();

        Mock::given(method("POST"))
            .and(path("/2/files/upload_session/start"))
            .and(api_arg(json!({"close": false})))
            .and(body_bytes(payload[..16].to_vec()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"session_id": "sess-1"})))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/2/files/upload_session/append_v2"))
            .and(api_arg(json!({
                "cursor": {"session_id": "sess-1", "offset": 16},
                "close": false
            })))
            .and(body_bytes(payload[16..32].to_vec()))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/2/files/upload_session/finish"))
            .and(api_arg(json!({
                "cursor": {"session_id": "sess-1", "offset": 32},
                "commit": {
                    "path": "/big.bin",
                    "mode": "overwrite",
                    "autorename": false,
                    "mute": true
                }
            })))
            .and(body_bytes(payload[32..].to_vec()))
            .respond_with(ResponseTemplate::new(200).set_body_json(file_json("big.bin", 40)))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let plan = UploadPlan::new("/big.bin").with_size(40);
        let mut source = payload.as_slice();
        let info = client.upload_with(&plan, &mut source).await.unwrap();

        assert_eq!(info.size(), 40);
    }

    #[tokio::test]
    async fn test_unknown_size_session_finishes_empty() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/2/files/upload_session/start"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"session_id": "sess-2"})))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/2/files/upload_session/append_v2"))
            .respond_with(ResponseTemplate::new(200))
            .expect(2)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/2/files/upload_session/finish"))
            .and(api_arg(json!({
                "cursor": {"session_id": "sess-2", "offset": 40},
                "commit": {
                    "path": "/stream.bin",
                    "mode": "overwrite",
                    "autorename": false,
                    "mute": true
                }
            })))
            .and(body_bytes(Vec::new()))
            .respond_with(ResponseTemplate::new(200).set_body_json(file_json("stream.bin", 40)))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let plan = UploadPlan::new("/stream.bin");
        let mut source: &[u8] = &[7u8; 40];
        client.upload_with(&plan, &mut source).await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_start_stops_session() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/2/files/upload_session/start"))
            .respond_with(ResponseTemplate::new(507).set_body_json(json!({
                "error_summary": "insufficient_space/..",
                "error": {".tag": "insufficient_space"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/2/files/upload_session/append_v2"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/2/files/upload_session/finish"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let mut source: &[u8] = &[0u8; 100];
        let err = client
            .upload_with(&UploadPlan::new("/full.bin"), &mut source)
            .await
            .unwrap_err();

        match err {
            ClientError::Upload(UploadError::Transport(TransportError::Api { status, summary })) => {
                assert_eq!(status, 507);
                assert_eq!(summary, "insufficient_space/..");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_append_timeout_aborts_session() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/2/files/upload_session/start"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"session_id": "sess-3"})))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/2/files/upload_session/append_v2"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/2/files/upload_session/finish"))
            .respond_with(ResponseTemplate::new(200).set_body_json(file_json("slow.bin", 40)))
            .expect(0)
            .mount(&server)
            .await;

        let config = ApiConfig {
            api_url: server.uri(),
            content_url: server.uri(),
            timeout_seconds: 1,
            ..ApiConfig::with_token("test-token")
        };
        let client = Client::new(HttpTransport::new(&config).unwrap()).with_limits(UploadLimits {
            default_chunk_size: 16,
            max_request_size: 64,
        });

        let mut source: &[u8] = &[3u8; 40];
        let err = client
            .upload_with(&UploadPlan::new("/slow.bin"), &mut source)
            .await
            .unwrap_err();

        match err {
            ClientError::Upload(UploadError::Transport(TransportError::Http(e))) => {
                assert!(e.is_timeout());
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_size_mismatch_never_reaches_finish() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/2/files/upload_session/start"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"session_id": "sess-4"})))
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/2/files/upload_session/append_v2"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/2/files/upload_session/finish"))
            .respond_with(ResponseTemplate::new(200).set_body_json(file_json("short.bin", 40)))
            .expect(0)
            .mount(&server)
            .await;

        let client = client_for(&server);

        let plan = UploadPlan::new("/long.bin").with_size(40);
        let mut longer: &[u8] = &[1u8; 100];
        let err = client.upload_with(&plan, &mut longer).await.unwrap_err();
        assert!(matches!(err, ClientError::Upload(UploadError::Configuration(_))));

        let plan = UploadPlan::new("/short.bin").with_size(40);
        let mut shorter: &[u8] = &[1u8; 30];
        let err = client.upload_with(&plan, &mut shorter).await.unwrap_err();
        assert!(matches!(err, ClientError::Upload(UploadError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_non_ascii_path_is_escaped_in_header() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/2/files/upload"))
            .and(|req: &Request| {
                req.headers
                    .get(API_ARG_HEADER)
                    .and_then(|v| v.to_str().ok())
                    .is_some_and(|v| v.is_ascii() && v.contains(r"/r\u00e9sum\u00e9.txt"))
            })
            .respond_with(ResponseTemplate::new(200).set_body_json(file_json("résumé.txt", 3)))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let mut source: &[u8] = b"abc";
        let info = client.upload("/résumé.txt", &mut source).await.unwrap();
        assert_eq!(info.name(), "résumé.txt");
    }

    // ========================================================================
    // Metadata and listing
    // ========================================================================

    #[tokio::test]
    async fn test_list_follows_continue_cursor() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/2/files/list_folder"))
            .and(body_json(json!({"path": ""})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "entries": [
                    {".tag": "folder", "name": "Photos", "path_display": "/Photos", "id": "id:p"},
                    file_json("a.txt", 1)
                ],
                "cursor": "cursor-1",
                "has_more": true
            })))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/2/files/list_folder/continue"))
            .and(body_json(json!({"cursor": "cursor-1"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "entries": [file_json("b.txt", 2)],
                "cursor": "cursor-2",
                "has_more": false
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let entries = client.list("/").await.unwrap();

        let names: Vec<&str> = entries.iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["Photos", "a.txt", "b.txt"]);
        assert!(entries[0].is_dir());
        assert!(entries[0].modified().is_none());
    }

    #[tokio::test]
    async fn test_stat_not_found_maps_error_summary() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/2/files/get_metadata"))
            .respond_with(ResponseTemplate::new(409).set_body_json(json!({
                "error_summary": "path/not_found/...",
                "error": {".tag": "path", "path": {".tag": "not_found"}}
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let err = client.stat("/missing").await.unwrap_err();

        assert!(matches!(
            err,
            ClientError::Transport(TransportError::Api { status: 409, ref summary })
                if summary == "path/not_found/..."
        ));
    }

    #[tokio::test]
    async fn test_search_pages_by_start_offset() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/2/files/search"))
            .and(body_partial_json(json!({"query": "report", "start": 0, "mode": "filename"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "matches": [{"match_type": {".tag": "filename"}, "metadata": file_json("report-1.pdf", 10)}],
                "more": true,
                "start": 1
            })))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/2/files/search"))
            .and(body_partial_json(json!({"query": "report", "start": 1})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "matches": [{"match_type": {".tag": "filename"}, "metadata": file_json("report-2.pdf", 20)}],
                "more": false,
                "start": 2
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let results: Vec<_> = client.search("/", "report").try_collect().await.unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[1].name(), "report-2.pdf");
    }

    // ========================================================================
    // Content and namespace operations
    // ========================================================================

    #[tokio::test]
    async fn test_read_downloads_body() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/2/files/download"))
            .and(api_arg(json!({"path": "/notes.txt"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Dropbox-API-Result", r#"{"name":"notes.txt"}"#)
                    .set_body_bytes(b"remember the milk".to_vec()),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let contents = client.read("/notes.txt").await.unwrap();
        assert_eq!(&contents[..], b"remember the milk");
    }

    #[tokio::test]
    async fn test_mkdir_marks_result_as_folder() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/2/files/create_folder_v2"))
            .and(body_json(json!({"path": "/Projects", "autorename": false})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "metadata": {"name": "Projects", "path_display": "/Projects", "id": "id:proj"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let info = client.mkdir("/Projects").await.unwrap();
        assert!(info.is_dir());
        assert_eq!(info.id(), Some("id:proj"));
    }

    #[tokio::test]
    async fn test_copy_and_move_send_relocation_args() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/2/files/copy_v2"))
            .and(body_json(json!({"from_path": "/a.txt", "to_path": "/b.txt"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"metadata": file_json("b.txt", 1)})))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/2/files/move_v2"))
            .and(body_json(json!({"from_path": "/b.txt", "to_path": "/c.txt"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"metadata": file_json("c.txt", 1)})))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/2/files/delete_v2"))
            .and(body_json(json!({"path": "/c.txt"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"metadata": file_json("c.txt", 1)})))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        assert_eq!(client.copy("/a.txt", "/b.txt").await.unwrap().name(), "b.txt");
        assert_eq!(client.rename("/b.txt", "/c.txt").await.unwrap().name(), "c.txt");
        assert_eq!(client.delete("/c.txt").await.unwrap().name(), "c.txt");
    }
}
