//! Drive the response classifier from the JSON vectors in `test-vectors/`.
//!
//! Each case is a raw response plus the expected outcome kind and, where it
//! matters, the exact user-facing message. Payload bodies are compared as
//! parsed JSON so key order in the vector file is irrelevant.

use serde_json::Value;
use tcm_core::{classify, HttpResponse, Outcome, RequestContext, ResourceError};

fn kind(result: &Result<Outcome, ResourceError>) -> &'static str {
    match result {
        Ok(Outcome::Payload { .. }) => "payload",
        Ok(Outcome::NoContent) => "no_content",
        Ok(Outcome::Redirect { .. }) => "redirect",
        Err(ResourceError::Unauthorized { .. }) => "unauthorized",
        Err(ResourceError::Conflict { .. }) => "conflict",
        Err(ResourceError::NotFound { .. }) => "not_found",
        Err(ResourceError::BadResponse(_)) => "bad_response",
        Err(other) => panic!("classifier produced an unexpected error: {other}"),
    }
}

#[test]
fn classify_test_vectors() {
    let raw = include_str!("../../test-vectors/classify.json");
    let vectors: Value = serde_json::from_str(raw).unwrap();
    let ctx = RequestContext {
        resource: vectors["context"]["resource"].as_str().unwrap(),
        url: vectors["context"]["url"].as_str().unwrap(),
    };

    let cases = vectors["cases"].as_array().unwrap();
    assert!(!cases.is_empty());
    for case in cases {
        let name = case["name"].as_str().unwrap();
        let response: HttpResponse = serde_json::from_value(case["response"].clone()).unwrap();
        let expected = &case["expected"];

        let result = classify(&ctx, &response);
        assert_eq!(kind(&result), expected["kind"].as_str().unwrap(), "{name}: kind");

        match &result {
            Ok(Outcome::Payload { body, location }) => {
                assert_eq!(body, &expected["body"], "{name}: body");
                assert_eq!(
                    location.as_deref(),
                    expected["location"].as_str(),
                    "{name}: location"
                );
            }
            Ok(Outcome::Redirect { status, location }) => {
                assert_eq!(Some(u64::from(*status)), expected["status"].as_u64(), "{name}: status");
                assert_eq!(Some(location.as_str()), expected["location"].as_str(), "{name}: location");
            }
            Ok(Outcome::NoContent) => {}
            Err(err) => {
                if let Some(message) = expected["message"].as_str() {
                    assert_eq!(err.to_string(), message, "{name}: message");
                }
                assert_eq!(err.status(), Some(response.status), "{name}: status");
            }
        }
    }
}

#[test]
fn long_bodies_are_truncated_in_messages() {
    let response = HttpResponse {
        status: 401,
        reason: "Unauthorized".to_string(),
        headers: Vec::new(),
        body: "x".repeat(2000),
    };
    let ctx = RequestContext {
        resource: "TestCase",
        url: "http://localhost/rest/testcases/1",
    };
    let message = classify(&ctx, &response).unwrap_err().to_string();
    assert!(message.ends_with("..."));
    assert!(message.len() < 700);
}
