use cloud_client::{parse_status_body, ClientConfig, CloudClient, FetchError, HttpCloudClient};
use types::{CloudCredentials, RawValue};

fn credentials(base_url: String) -> CloudCredentials {
    CloudCredentials {
        api_key: "test-key".to_string(),
        api_secret: "test-secret".to_string(),
        region: "eu".to_string(),
        access_token: Some("token-123".to_string()),
        base_url: Some(base_url),
    }
}

fn fast_config(retry_count: usize) -> ClientConfig {
    ClientConfig {
        timeout_ms: 2_000,
        retry_count,
        retry_backoff_ms: 1,
        retry_max_backoff_ms: 5,
    }
}

#[tokio::test]
async fn status_list_is_returned() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/v1.0/devices/dev-1/status")
        .match_header("client_id", "test-key")
        .match_header("access_token", "token-123")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"success":true,"t":1,"result":[
                {"code":"ac_power","value":1200},
                {"code":"phase_a","value":"CPwAAAH0"}
            ]}"#,
        )
        .create_async()
        .await;

    let client = HttpCloudClient::new(fast_config(0)).expect("client");
    let items = client
        .get_status(&credentials(server.url()), "dev-1")
        .await
        .expect("status");

    assert_eq!(items.len(), 2);
    assert_eq!(items[0].code, "ac_power");
    assert_eq!(items[1].value, RawValue::Text("CPwAAAH0".to_string()));
    mock.assert_async().await;
}

#[tokio::test]
async fn server_errors_are_retried() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/v1.0/devices/dev-2/status")
        .with_status(503)
        .expect(3)
        .create_async()
        .await;

    let client = HttpCloudClient::new(fast_config(2)).expect("client");
    let err = client
        .get_status(&credentials(server.url()), "dev-2")
        .await
        .expect_err("should fail");

    assert!(matches!(err, FetchError::Status(503)));
    mock.assert_async().await;
}

#[tokio::test]
async fn auth_failures_are_not_retried() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/v1.0/devices/dev-3/status")
        .with_status(200)
        .with_body(r#"{"success":false,"code":1010,"msg":"token invalid"}"#)
        .expect(1)
        .create_async()
        .await;

    let client = HttpCloudClient::new(fast_config(3)).expect("client");
    let err = client
        .get_status(&credentials(server.url()), "dev-3")
        .await
        .expect_err("should fail");

    match err {
        FetchError::Api { code, message } => {
            assert_eq!(code, "1010");
            assert_eq!(message, "token invalid");
        }
        other => panic!("unexpected error {other:?}"),
    }
    mock.assert_async().await;
}

#[test]
fn missing_result_is_a_fetch_error() {
    assert!(matches!(
        parse_status_body(r#"{"success":true}"#),
        Err(FetchError::MissingResult)
    ));
    assert!(matches!(
        parse_status_body(r#"{"success":true,"result":null}"#),
        Err(FetchError::MissingResult)
    ));
    assert!(matches!(
        parse_status_body(r#"{"success":true,"result":"oops"}"#),
        Err(FetchError::MissingResult)
    ));
    assert!(matches!(parse_status_body("<html>"), Err(FetchError::Body(_))));
}

#[test]
fn single_result_object_is_wrapped() {
    let items = parse_status_body(r#"{"result":{"code":"temp_current","value":28}}"#)
        .expect("parse");
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].code, "temp_current");
    assert_eq!(items[0].value, RawValue::Number(28.0));
}

#[test]
fn worst_case_fetch_duration_includes_backoff() {
    let config = ClientConfig {
        timeout_ms: 1_000,
        retry_count: 2,
        retry_backoff_ms: 100,
        retry_max_backoff_ms: 150,
    };
    // 3 attempts plus 100ms and 150ms (capped) of backoff.
    assert_eq!(config.max_fetch_duration().as_millis(), 3_250);
}
