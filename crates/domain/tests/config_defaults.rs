use llmrtc_domain::config::Config;
use llmrtc_domain::message::ExecutionPolicy;

#[test]
fn default_bind_is_localhost() {
    let config = Config::default();
    assert_eq!(config.server.bind, "127.0.0.1:8787");
}

#[test]
fn documented_defaults_hold() {
    let config = Config::default();
    assert_eq!(config.session.history_limit, 8);
    assert_eq!(config.session.playbook_history_limit, 50);
    assert_eq!(config.session.grace_window_secs, 60);
    assert_eq!(config.turn.tool_loop_cap, 5);
    assert_eq!(config.turn.sentence_terminators, ".!?");
    assert!(config.turn.streaming_tts);
    assert_eq!(config.vad.positive_threshold, 0.5);
    assert_eq!(config.vad.negative_threshold, 0.35);
    assert_eq!(config.vad.min_speech_frames, 5);
    assert_eq!(config.vad.redemption_frames, 50);
    assert_eq!(config.vad.pre_speech_pad_frames, 10);
    assert_eq!(config.tools.default_policy, ExecutionPolicy::Sequential);
    assert!(config.tools.validate_arguments);
}

#[test]
fn explicit_bind_parses() {
    let toml_str = r#"
[server]
bind = "0.0.0.0:9000"
strict_protocol = true
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(config.server.bind, "0.0.0.0:9000");
    assert!(config.server.strict_protocol);
}

#[test]
fn nested_section_overrides_keep_sibling_defaults() {
    let toml_str = r#"
[turn]
tool_loop_cap = 8

[vad]
redemption_frames = 25
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(config.turn.tool_loop_cap, 8);
    assert_eq!(config.turn.stt_timeout_ms, 15_000);
    assert_eq!(config.vad.redemption_frames, 25);
    assert_eq!(config.vad.pre_speech_pad_frames, 10);
}
