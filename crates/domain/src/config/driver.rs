use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM session-driver configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The driver is parametric over the CLI path and flag names; only the
/// stream-event grammar is contractual. Defaults target the Claude Code
/// CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfig {
    #[serde(default = "d_cli_path")]
    pub cli_path: String,

    /// Optional model selector passed through to the CLI.
    #[serde(default)]
    pub model: Option<String>,

    /// Non-interactive "print mode" flag.
    #[serde(default = "d_print_flag")]
    pub print_flag: String,

    /// Flag producing newline-delimited JSON events on stdout.
    #[serde(default = "d_stream_args")]
    pub stream_args: Vec<String>,

    /// Flag creating a session with the given id (first prompt).
    #[serde(default = "d_session_new_flag")]
    pub session_new_flag: String,

    /// Flag resuming a session by id (subsequent prompts).
    #[serde(default = "d_session_resume_flag")]
    pub session_resume_flag: String,

    #[serde(default = "d_model_flag")]
    pub model_flag: String,

    /// Extra arguments appended verbatim.
    #[serde(default)]
    pub extra_args: Vec<String>,

    /// Context budget before a reset is requested. 150k leaves headroom
    /// under a 200k window.
    #[serde(default = "d_max_context_tokens")]
    pub max_context_tokens: u64,

    /// How long to wait on a `reset.pending` marker before clearing it.
    #[serde(default = "d_reset_wait_secs")]
    pub reset_wait_secs: u64,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            cli_path: d_cli_path(),
            model: None,
            print_flag: d_print_flag(),
            stream_args: d_stream_args(),
            session_new_flag: d_session_new_flag(),
            session_resume_flag: d_session_resume_flag(),
            model_flag: d_model_flag(),
            extra_args: Vec::new(),
            max_context_tokens: d_max_context_tokens(),
            reset_wait_secs: d_reset_wait_secs(),
        }
    }
}

fn d_cli_path() -> String {
    "claude".into()
}

fn d_print_flag() -> String {
    "--print".into()
}

fn d_stream_args() -> Vec<String> {
    vec!["--output-format".into(), "stream-json".into(), "--verbose".into()]
}

fn d_session_new_flag() -> String {
    "--session-id".into()
}

fn d_session_resume_flag() -> String {
    "--resume".into()
}

fn d_model_flag() -> String {
    "--model".into()
}

fn d_max_context_tokens() -> u64 {
    150_000
}

fn d_reset_wait_secs() -> u64 {
    10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_target_claude_cli() {
        let cfg = DriverConfig::default();
        assert_eq!(cfg.cli_path, "claude");
        assert_eq!(cfg.max_context_tokens, 150_000);
        assert_eq!(cfg.reset_wait_secs, 10);
    }

    #[test]
    fn flag_names_are_overridable() {
        let cfg: DriverConfig = toml::from_str(
            r#"
            cli_path = "/usr/local/bin/llm"
            print_flag = "-p"
            session_new_flag = "--new"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.cli_path, "/usr/local/bin/llm");
        assert_eq!(cfg.print_flag, "-p");
        assert_eq!(cfg.session_new_flag, "--new");
        // Unset fields keep their defaults.
        assert_eq!(cfg.session_resume_flag, "--resume");
    }
}
