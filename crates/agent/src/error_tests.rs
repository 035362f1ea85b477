// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::SessionError;

#[test]
fn timeout_is_retryable() {
    assert!(SessionError::Timeout("no data in 30 seconds".into()).is_timeout());
    assert!(!SessionError::Communication("bad message".into()).is_timeout());
    assert!(!SessionError::Fatal("wrong key".into()).is_timeout());
}

#[test]
fn display_includes_context() {
    let err = SessionError::Timeout("received no data in 30 seconds".into());
    assert_eq!(err.to_string(), "timeout: received no data in 30 seconds");
    let err = SessionError::Fatal("please check the API secret key".into());
    assert!(err.to_string().contains("API secret key"));
}

#[test]
fn downcasts_through_anyhow() {
    let err: anyhow::Error = SessionError::Timeout("queue idle".into()).into();
    let session_err = err.downcast_ref::<SessionError>();
    assert!(session_err.is_some_and(SessionError::is_timeout));
}
