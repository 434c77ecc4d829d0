// Oracle backed by an external command (an LLM CLI, a script, ...).
// The prompt goes to stdin; stdout is the answer. Non-zero exit, timeout or
// empty output are errors, which the rule engine and explainer degrade on.

use crate::config::OracleConfig;
use crate::error::NboError;
use crate::explain::ExplanationOracle;
use crate::rules::{self, OracleContext, Rule, RuleOracle};
use crate::util;
use std::io::{Read, Write};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone)]
pub struct CommandOracle {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandOracle {
    pub fn new(program: &str, args: &[String], timeout: Duration) -> Self {
        Self {
            program: program.to_string(),
            args: args.to_vec(),
            timeout,
        }
    }

    /// `None` when no command is configured
    pub fn from_config(config: &OracleConfig) -> Option<Self> {
        let (program, args) = config.command.split_first()?;
        Some(Self::new(
            program,
            args,
            Duration::from_secs(config.timeout_secs),
        ))
    }

    /// Run the command with `prompt` on stdin and return its trimmed stdout.
    pub fn prompt(&self, prompt: &str) -> Result<String, NboError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| NboError::Oracle(format!("spawning {}: {}", self.program, e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            // A command may exit without reading its input.
            if let Err(e) = stdin.write_all(prompt.as_bytes()) {
                if e.kind() != std::io::ErrorKind::BrokenPipe {
                    return Err(e.into());
                }
            }
        }

        let stdout = child.stdout.take();
        let reader = std::thread::spawn(move || -> std::io::Result<String> {
            let mut out = String::new();
            if let Some(mut pipe) = stdout {
                pipe.read_to_string(&mut out)?;
            }
            Ok(out)
        });

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if Instant::now() >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                return Err(NboError::Oracle(format!(
                    "{} timed out after {}s",
                    self.program,
                    self.timeout.as_secs()
                )));
            }
            std::thread::sleep(POLL_INTERVAL);
        };

        let out = reader
            .join()
            .map_err(|_| NboError::Oracle("stdout reader panicked".to_string()))?;

        if !status.success() {
            let mut stderr = Vec::new();
            if let Some(mut pipe) = child.stderr.take() {
                pipe.read_to_end(&mut stderr)?;
            }
            let stderr = String::from_utf8_lossy(&stderr);
            return Err(NboError::Oracle(format!(
                "{} exited with {}: {}",
                self.program,
                status,
                util::truncate(stderr.trim(), 200)
            )));
        }

        let out = out.map_err(|e| {
            NboError::Oracle(format!("reading output of {}: {}", self.program, e))
        })?;
        let answer = out.trim();
        if answer.is_empty() {
            return Err(NboError::Oracle(format!("{} returned nothing", self.program)));
        }
        Ok(answer.to_string())
    }
}

impl RuleOracle for CommandOracle {
    fn generate_rule(&self, pattern: &str, context: &OracleContext) -> Result<Rule, NboError> {
        let response = self.prompt(&rules::build_rule_prompt(pattern, context))?;
        rules::parse_rule_response(&response)
    }
}

impl ExplanationOracle for CommandOracle {
    fn explain(&self, prompt: &str) -> Result<String, NboError> {
        self.prompt(prompt)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::types::Product;

    fn sh(script: &str) -> CommandOracle {
        CommandOracle::new(
            "sh",
            &["-c".to_string(), script.to_string()],
            Duration::from_secs(5),
        )
    }

    #[test]
    fn disabled_without_command() {
        assert!(CommandOracle::from_config(&OracleConfig::default()).is_none());
        let cfg = OracleConfig {
            command: vec!["cat".to_string()],
            timeout_secs: 1,
        };
        assert!(CommandOracle::from_config(&cfg).is_some());
    }

    #[test]
    fn prompt_round_trips_through_stdin() {
        let oracle = CommandOracle::new("cat", &[], Duration::from_secs(5));
        assert_eq!(oracle.prompt("  hello  ").unwrap(), "hello");
    }

    #[test]
    fn rule_from_command_output() {
        let oracle = sh(
            r#"cat > /dev/null; echo '{"product": "Deposit", "confidence": "high", "reason": "saver"}'"#,
        );
        let rule = oracle
            .generate_rule("V→P→V", &OracleContext::default())
            .unwrap();
        assert_eq!(rule.product, Product::Deposit);
        assert_eq!(rule.reason, "saver");
    }

    #[test]
    fn failing_command_is_oracle_error() {
        let err = sh("cat > /dev/null; echo oops >&2; exit 3").prompt("x").unwrap_err();
        assert!(matches!(err, NboError::Oracle(_)));
        assert!(err.to_string().contains("oops"));
    }

    #[test]
    fn empty_output_is_error() {
        assert!(sh("cat > /dev/null").prompt("x").is_err());
    }

    #[test]
    fn non_utf8_output_is_decode_error() {
        let err = sh(r"cat > /dev/null; printf '\377\376'").prompt("x").unwrap_err();
        assert!(matches!(err, NboError::Oracle(_)));
        assert!(err.to_string().contains("reading output"));
    }

    #[test]
    fn timeout_kills_command() {
        let oracle = CommandOracle::new(
            "sh",
            &["-c".to_string(), "sleep 5".to_string()],
            Duration::from_millis(100),
        );
        let err = oracle.prompt("x").unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }
}
