//! Exercises [`AgentConfig::load`] end to end against a real file on disk,
//! including `${VAR}` token resolution — the one path the colocated unit
//! tests in `config.rs` don't cover since they build the struct by hand.

use std::io::Write;

use tunnel_agent::config::AgentConfig;
use tunnel_core::error::ConfigError;

fn write_temp_config(contents: &str) -> std::path::PathBuf {
    let mut path = std::env::temp_dir();
    path.push(format!(
        "tunnel-agent-test-{}-{}.toml",
        std::process::id(),
        contents.len()
    ));
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    path
}

#[test]
fn loads_a_valid_config_and_resolves_the_token_placeholder() {
    std::env::set_var("TUNNEL_TEST_TOKEN", "s3cret");
    let path = write_temp_config(
        r#"
        agent_id = "a-web"

        [relay]
        url = "ws://127.0.0.1:8443/tunnel"
        token = "${TUNNEL_TEST_TOKEN}"

        [[forwarders]]
        name = "web"
        target = "webapp:80"
        "#,
    );

    let config = AgentConfig::load(&path).unwrap();
    assert_eq!(config.relay.token, "s3cret");
    assert_eq!(config.agent_id, "a-web");
    assert_eq!(
        config.forwarder_targets().get("web").map(String::as_str),
        Some("webapp:80")
    );

    std::env::remove_var("TUNNEL_TEST_TOKEN");
    std::fs::remove_file(&path).unwrap();
}

#[test]
fn rejects_a_config_with_an_unresolvable_token_placeholder() {
    std::env::remove_var("TUNNEL_TEST_TOKEN_MISSING");
    let path = write_temp_config(
        r#"
        agent_id = "a-web"

        [relay]
        url = "ws://127.0.0.1:8443/tunnel"
        token = "${TUNNEL_TEST_TOKEN_MISSING}"

        [[forwarders]]
        name = "web"
        target = "webapp:80"
        "#,
    );

    let err = AgentConfig::load(&path).unwrap_err();
    assert!(matches!(err, ConfigError::MissingEnvVar(_)));
    std::fs::remove_file(&path).unwrap();
}

#[test]
fn rejects_a_malformed_config_file() {
    let path = write_temp_config("this is not valid toml {{{");
    let err = AgentConfig::load(&path).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }));
    std::fs::remove_file(&path).unwrap();
}
