use echo_service::EchoServer;
use gweb_core::WireMode;
use gweb_core::call::{CallOptions, ClientConfig};
use gweb_core::client::{DynamicCallError, DynamicRequest, DynamicResponse, GrpcWebClient};
use gweb_core::prost_reflect::DescriptorPool;
use gweb_core::server::{GrpcWebLayer, GrpcWebService};
use tonic::Code;
use tower::Layer;

fn setup_client(mode: WireMode) -> GrpcWebClient<GrpcWebService<EchoServer>> {
    let service = GrpcWebLayer::new().layer(echo_service::server());
    GrpcWebClient::with_config(service, ClientConfig::default().with_mode(mode))
}

fn pool() -> DescriptorPool {
    DescriptorPool::decode(echo_service::FILE_DESCRIPTOR_SET)
        .expect("Failed to load file descriptor set")
}

fn dynamic_request(method: &str, body: serde_json::Value) -> DynamicRequest {
    DynamicRequest {
        service: "echo.EchoService".to_string(),
        method: method.to_string(),
        body,
        headers: vec![],
        timeout: None,
    }
}

#[tokio::test]
async fn test_dynamic_calls() {
    let pool = pool();

    for mode in [WireMode::Binary, WireMode::Text] {
        let client = setup_client(mode);

        // 1. Unary Call
        let req = dynamic_request("UnaryEcho", serde_json::json!({ "message": "hello-web" }));
        let res = client.dynamic(&pool, req).await.unwrap();
        if let DynamicResponse::Unary(Ok(val)) = res {
            assert_eq!(val["message"], "hello-web");
        } else {
            panic!("Unexpected response type for Unary: {res:?}");
        }

        // 2. Server Streaming
        let req = dynamic_request(
            "ServerStreamingEcho",
            serde_json::json!({ "message": "stream-web" }),
        );
        let res = client.dynamic(&pool, req).await.unwrap();
        if let DynamicResponse::Streaming(Ok(stream)) = res {
            assert_eq!(stream.len(), 3);
            assert_eq!(stream[2].as_ref().unwrap()["message"], "stream-web - seq 2");
        } else {
            panic!("Unexpected response type for Server Streaming: {res:?}");
        }

        // 3. Client Streaming
        let req = dynamic_request(
            "ClientStreamingEcho",
            serde_json::json!([
                { "message": "X" },
                { "message": "Y" }
            ]),
        );
        let res = client.dynamic(&pool, req).await.unwrap();
        if let DynamicResponse::Unary(Ok(val)) = res {
            assert_eq!(val["message"], "XY");
        } else {
            panic!("Unexpected response type for Client Streaming: {res:?}");
        }

        // 4. Bidirectional Streaming
        let req = dynamic_request(
            "BidirectionalEcho",
            serde_json::json!([
                { "message": "PingWeb" }
            ]),
        );
        let res = client.dynamic(&pool, req).await.unwrap();
        if let DynamicResponse::Streaming(Ok(stream)) = res {
            assert_eq!(stream.len(), 1);
            assert_eq!(stream[0].as_ref().unwrap()["message"], "echo: PingWeb");
        } else {
            panic!("Unexpected response type for Bidi Streaming: {res:?}");
        }
    }
}

#[tokio::test]
async fn test_server_error_is_returned_as_status() {
    let client = setup_client(WireMode::Text);
    let req = dynamic_request("UnaryEcho", serde_json::json!({ "message": "error:nope" }));

    match client.dynamic(&pool(), req).await.unwrap() {
        DynamicResponse::Unary(Err(status)) => {
            assert_eq!(status.code(), Code::InvalidArgument);
            assert_eq!(status.message(), "nope");
        }
        other => panic!("Unexpected response: {other:?}"),
    }
}

#[tokio::test]
async fn test_schema_mismatch_is_invalid_argument() {
    let client = setup_client(WireMode::Binary);
    let req = dynamic_request("UnaryEcho", serde_json::json!({ "unknown": 1 }));

    match client.dynamic(&pool(), req).await.unwrap() {
        DynamicResponse::Unary(Err(status)) => assert_eq!(status.code(), Code::InvalidArgument),
        other => panic!("Unexpected response: {other:?}"),
    }
}

#[tokio::test]
async fn test_error_cases() {
    let client = setup_client(WireMode::Binary);
    let pool = pool();

    // 1. Service Not Found
    let mut req = dynamic_request("UnaryEcho", serde_json::json!({}));
    req.service = "echo.GhostService".to_string();
    assert!(matches!(
        client.dynamic(&pool, req).await,
        Err(DynamicCallError::ServiceNotFound(_))
    ));

    // 2. Method Not Found
    let req = dynamic_request("GhostMethod", serde_json::json!({}));
    assert!(matches!(
        client.dynamic(&pool, req).await,
        Err(DynamicCallError::MethodNotFound(_))
    ));

    // 3. Client streaming needs an array
    let req = dynamic_request("ClientStreamingEcho", serde_json::json!({ "message": "X" }));
    assert!(matches!(
        client.dynamic(&pool, req).await,
        Err(DynamicCallError::InvalidInput(_))
    ));

    // 4. Invalid header
    let mut req = dynamic_request("UnaryEcho", serde_json::json!({}));
    req.headers = vec![("bad key".to_string(), "v".to_string())];
    assert!(matches!(
        client.dynamic(&pool, req).await,
        Err(DynamicCallError::Call(_))
    ));
}

#[tokio::test]
async fn test_typed_unary_over_json_client_invoker() {
    let client = setup_client(WireMode::Binary);
    let pool = pool();
    let method = pool
        .get_service_by_name("echo.EchoService")
        .unwrap()
        .methods()
        .find(|m| m.name() == "UnaryEcho")
        .unwrap();

    let options = CallOptions::new().with_header("x-echo", "json").unwrap();
    let value = client
        .unary(method, serde_json::json!({ "message": "direct" }), options)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(value["message"], "direct");
}
