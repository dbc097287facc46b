//! Connection establishment tests
//!
//! Exercises the retry/reprompt state machine through the cache against a
//! scripted transport. Retries that sleep run on paused time.

mod common;

use std::time::Duration;

use pretty_assertions::assert_eq;

use common::*;
use hostlink::config::Config;
use hostlink::connection::password::PasswordStore;
use hostlink::Error;

fn with_attempts(attempts: u32) -> Config {
    Config {
        connection_attempts: attempts,
        ..test_config()
    }
}

// ============================================================================
// Transient failures
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_timeouts_exhaust_attempt_budget() {
    let transport = MockTransport::new();
    transport.script("web1", [Outcome::Timeout, Outcome::Timeout, Outcome::Timeout]);
    let cache = build_cache(with_attempts(3), transport.clone(), ScriptedPrompter::new(&[]));

    let err = cache.get("web1").await.unwrap_err();

    assert_eq!(transport.attempts("web1"), 3);
    assert_eq!(
        err.to_string(),
        "Timed out trying to connect to web1 (tried 3 times)"
    );
    match err {
        Error::Network { attempts, .. } => assert_eq!(attempts, 3),
        other => panic!("expected network error, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_single_attempt_message_is_singular() {
    let transport = MockTransport::new();
    transport.script("web1", [Outcome::Timeout]);
    let cache = build_cache(with_attempts(1), transport.clone(), ScriptedPrompter::new(&[]));

    let err = cache.get("web1").await.unwrap_err();
    assert_eq!(err.to_string(), "Timed out trying to connect to web1 (tried 1 time)");
    assert_eq!(err.exit_code(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_socket_error_sleeps_then_succeeds() {
    let transport = MockTransport::new();
    transport.script("web1", [Outcome::Refused]);
    let config = Config {
        timeout: Duration::from_secs(7),
        ..with_attempts(2)
    };
    let cache = build_cache(config, transport.clone(), ScriptedPrompter::new(&[]));

    let start = tokio::time::Instant::now();
    cache.get("web1").await.unwrap();

    assert_eq!(transport.attempts("web1"), 2);
    assert!(start.elapsed() >= Duration::from_secs(7));
}

#[tokio::test(start_paused = true)]
async fn test_timeout_retries_without_sleeping() {
    let transport = MockTransport::new();
    transport.script("web1", [Outcome::Timeout]);
    let config = Config {
        timeout: Duration::from_secs(30),
        ..with_attempts(2)
    };
    let cache = build_cache(config, transport.clone(), ScriptedPrompter::new(&[]));

    let start = tokio::time::Instant::now();
    cache.get("web1").await.unwrap();
    assert!(start.elapsed() < Duration::from_secs(30));
}

#[tokio::test(start_paused = true)]
async fn test_socket_error_message_names_host_and_port() {
    let transport = MockTransport::new();
    transport.script("web1", [Outcome::Refused, Outcome::Refused]);
    let cache = build_cache(with_attempts(2), transport.clone(), ScriptedPrompter::new(&[]));

    let err = cache.get("web1:2222").await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "Low level socket error connecting to host web1 on port 2222: Connection refused (tried 2 times)"
    );
}

#[tokio::test]
async fn test_banner_error_retries_then_reports_itself() {
    let transport = MockTransport::new();
    transport.script("web1", [Outcome::Banner]);
    let cache = build_cache(with_attempts(2), transport.clone(), ScriptedPrompter::new(&[]));
    cache.get("web1").await.unwrap();
    assert_eq!(transport.attempts("web1"), 2);

    let transport = MockTransport::new();
    transport.script("web2", [Outcome::Banner, Outcome::Banner]);
    let cache = build_cache(with_attempts(2), transport.clone(), ScriptedPrompter::new(&[]));
    let err = cache.get("web2").await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "Error reading SSH protocol banner: connection reset (tried 2 times)"
    );
    assert!(err.is_network());
}

#[tokio::test]
async fn test_exhausted_channel_errors_report_attempt_count() {
    let transport = MockTransport::new();
    transport.script("web1", [Outcome::Channel, Outcome::Channel, Outcome::Channel]);
    let cache = build_cache(with_attempts(3), transport.clone(), ScriptedPrompter::new(&[]));

    let err = cache.get("web1").await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "Channel error: administratively prohibited (tried 3 times)"
    );
    assert_eq!(transport.attempts("web1"), 3);

    let transport = MockTransport::new();
    transport.script("web2", [Outcome::Banner]);
    let cache = build_cache(with_attempts(1), transport.clone(), ScriptedPrompter::new(&[]));
    let err = cache.get("web2").await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "Error reading SSH protocol banner: connection reset (tried 1 time)"
    );
}

// ============================================================================
// Terminal failures
// ============================================================================

#[tokio::test]
async fn test_host_key_mismatch_is_terminal() {
    let transport = MockTransport::new();
    transport.script("web1", [Outcome::BadHostKey]);
    let prompter = ScriptedPrompter::new(&["secret"]);
    let cache = build_cache(with_attempts(5), transport.clone(), prompter.clone());

    let err = cache.get("web1").await.unwrap_err();

    assert_eq!(transport.attempts("web1"), 1);
    assert!(prompter.prompts().is_empty());
    assert!(matches!(err, Error::HostKeyMismatch { .. }));
    assert!(err
        .to_string()
        .starts_with("Host key for web1 did not match pre-existing key!"));
}

#[tokio::test]
async fn test_name_lookup_is_terminal() {
    let transport = MockTransport::new();
    transport.script("nowhere", [Outcome::NameLookup]);
    let cache = build_cache(with_attempts(5), transport.clone(), ScriptedPrompter::new(&[]));

    let err = cache.get("nowhere").await.unwrap_err();
    assert_eq!(transport.attempts("nowhere"), 1);
    assert!(matches!(err, Error::NameLookup { .. }));
}

#[tokio::test]
async fn test_unknown_host_under_reject_policy_is_terminal() {
    let transport = MockTransport::new();
    transport.script("web1", [Outcome::UnknownHost]);
    let prompter = ScriptedPrompter::new(&["secret"]);
    let cache = build_cache(with_attempts(3), transport.clone(), prompter.clone());

    let err = cache.get("web1").await.unwrap_err();
    assert_eq!(transport.attempts("web1"), 1);
    assert!(prompter.prompts().is_empty());
    assert!(matches!(err, Error::Authentication { .. }));
}

#[tokio::test]
async fn test_protocol_error_with_password_is_terminal() {
    let transport = MockTransport::new();
    transport.script("web1", [Outcome::Protocol("No existing session")]);
    let config = Config {
        password: Some("hunter2".into()),
        ..test_config()
    };
    let prompter = ScriptedPrompter::new(&["secret"]);
    let cache = build_cache(config, transport.clone(), prompter.clone());

    let err = cache.get("web1").await.unwrap_err();
    assert_eq!(err.to_string(), "No existing session");
    assert!(matches!(err, Error::Authentication { .. }));
    assert!(prompter.prompts().is_empty());
    assert_eq!(transport.requests()[0].password.as_deref(), Some("hunter2"));
}

#[tokio::test]
async fn test_protocol_error_without_password_reprompts() {
    let transport = MockTransport::new();
    transport.script("web1", [Outcome::Protocol("No existing session")]);
    let prompter = ScriptedPrompter::new(&["secret"]);
    let cache = build_cache(test_config(), transport.clone(), prompter.clone());

    cache.get("web1").await.unwrap();
    assert_eq!(prompter.prompts().len(), 1);
    assert_eq!(transport.requests()[1].password.as_deref(), Some("secret"));
}

// ============================================================================
// Reprompting
// ============================================================================

#[tokio::test]
async fn test_auth_failure_without_password_reprompts_and_stores() {
    let transport = MockTransport::new();
    transport.script("web1", [Outcome::AuthFailed]);
    let prompter = ScriptedPrompter::new(&["", "hunter2"]);
    let cache = build_cache(test_config(), transport.clone(), prompter.clone());

    cache.get("web1").await.unwrap();

    let requests = transport.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].password, None);
    assert_eq!(requests[1].password.as_deref(), Some("hunter2"));

    assert_eq!(
        prompter.prompts(),
        vec![
            "[web1] Login password for 'deploy': ".to_string(),
            "[web1] Login password for 'deploy': ".to_string(),
        ]
    );
    assert_eq!(
        prompter.notices(),
        vec![
            "Connect error: Authentication failed.".to_string(),
            "Sorry, you can't enter an empty password. Please try again.".to_string(),
        ]
    );

    // Stored for the key and as the default login password
    let creds = cache.credentials();
    assert_eq!(
        creds.password_for("deploy", "web1", 22, true).as_deref(),
        Some("hunter2")
    );
    assert_eq!(
        creds.password_for("other", "db1", 22, true).as_deref(),
        Some("hunter2")
    );
}

#[tokio::test]
async fn test_encrypted_key_prompts_for_passphrase() {
    let transport = MockTransport::new();
    transport.script("web1", [Outcome::PasswordRequired]);
    let prompter = ScriptedPrompter::new(&["open sesame"]);
    let cache = build_cache(test_config(), transport.clone(), prompter.clone());

    cache.get("alice@web1").await.unwrap();

    assert_eq!(
        prompter.prompts(),
        vec!["[alice@web1] Passphrase for private key: ".to_string()]
    );
    assert_eq!(
        transport.requests()[1].password.as_deref(),
        Some("open sesame")
    );
}

#[tokio::test]
async fn test_rejected_password_reprompts() {
    let transport = MockTransport::new();
    transport.script("web1", [Outcome::AuthFailed]);
    let config = Config {
        password: Some("wrong".into()),
        ..test_config()
    };
    let prompter = ScriptedPrompter::new(&["right"]);
    let cache = build_cache(config, transport.clone(), prompter.clone());

    cache.get("web1").await.unwrap();

    let passwords: Vec<_> = transport
        .requests()
        .into_iter()
        .map(|r| r.password)
        .collect();
    assert_eq!(passwords, vec![Some("wrong".to_string()), Some("right".to_string())]);
}

#[tokio::test]
async fn test_reprompts_count_as_attempts() {
    let transport = MockTransport::new();
    transport.script("web1", [Outcome::AuthFailed, Outcome::Timeout, Outcome::Timeout]);
    let prompter = ScriptedPrompter::new(&["hunter2"]);
    let cache = build_cache(with_attempts(3), transport.clone(), prompter.clone());

    let err = cache.get("web1").await.unwrap_err();
    assert_eq!(transport.attempts("web1"), 3);
    assert_eq!(
        err.to_string(),
        "Timed out trying to connect to web1 (tried 3 times)"
    );
}

#[tokio::test]
async fn test_end_of_input_at_prompt_aborts() {
    let transport = MockTransport::new();
    transport.script("web1", [Outcome::AuthFailed]);
    let cache = build_cache(test_config(), transport.clone(), ScriptedPrompter::new(&[]));

    let err = cache.get("web1").await.unwrap_err();
    assert!(err.is_abort());
    assert_eq!(err.exit_code(), 0);
    assert!(cache.is_empty());
}

#[tokio::test]
async fn test_abort_on_prompts_refuses() {
    let transport = MockTransport::new();
    transport.script("web1", [Outcome::AuthFailed]);
    let config = Config {
        abort_on_prompts: true,
        ..test_config()
    };
    let prompter = ScriptedPrompter::new(&["hunter2"]);
    let cache = build_cache(config, transport.clone(), prompter.clone());

    let err = cache.get("web1").await.unwrap_err();
    assert!(matches!(err, Error::PromptRefused { ref host, .. } if host == "web1"));
    assert!(!err.is_abort());
    assert!(prompter.prompts().is_empty());
}

#[tokio::test]
async fn test_cancelled_token_aborts_prompt() {
    let transport = MockTransport::new();
    transport.script("web1", [Outcome::AuthFailed]);
    let config = std::sync::Arc::new(test_config());
    let cancel = tokio_util::sync::CancellationToken::new();
    cancel.cancel();

    let cache = hostlink::ConnectionCache::builder(config.clone())
        .transport(transport.clone())
        .prompter(ScriptedPrompter::new(&["hunter2"]))
        .passwords(std::sync::Arc::new(PasswordStore::from_config(&config)))
        .ssh_config(std::sync::Arc::new(hostlink::connection::SshConfigLookup::disabled()))
        .cancel_token(cancel)
        .build();

    let err = cache.get("web1").await.unwrap_err();
    assert!(err.is_abort());
}

#[tokio::test]
async fn test_stored_password_is_offered_first() {
    let transport = MockTransport::new();
    let config = Config {
        passwords: [("deploy@web1:22".to_string(), "known".to_string())]
            .into_iter()
            .collect(),
        ..test_config()
    };
    let cache = build_cache(config, transport.clone(), ScriptedPrompter::new(&[]));

    cache.get("web1").await.unwrap();
    assert_eq!(transport.requests()[0].password.as_deref(), Some("known"));
}
