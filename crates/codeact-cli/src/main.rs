//! codeact - run model-written snippets in the restricted evaluator
//!
//! ## Commands
//!
//! - `run`: evaluate a snippet file (or stdin) and print the observation
//! - `policy`: print the effective allow-lists

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, Level};

use codeact_core::{
    init_tracing, render_observation, CapabilityPolicy, EvaluationResult, EvaluatorConfig,
    FinalAnswerTool, Sandbox, SessionState, StdinSource, Tool, UserInputTool,
};

#[derive(Parser)]
#[command(name = "codeact")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Restricted evaluator for model-written Python snippets", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Evaluator config file (TOML)
    #[arg(long, global = true, env = "CODEACT_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a snippet and print the observation
    Run {
        /// Snippet file; `-` or nothing reads stdin
        file: Option<PathBuf>,

        /// Authorize an extra import (repeatable; `pkg.*` and `*` allowed)
        #[arg(short, long = "authorize")]
        authorize: Vec<String>,

        /// Session file carrying variables between runs
        #[arg(short, long)]
        session: Option<PathBuf>,

        /// Print the full result as JSON instead of the observation
        #[arg(long)]
        output_json: bool,

        /// Wall-clock limit in milliseconds
        #[arg(long, env = "CODEACT_TIMEOUT_MS")]
        timeout_ms: Option<u64>,

        /// Operation budget override
        #[arg(long, env = "CODEACT_MAX_OPERATIONS")]
        max_operations: Option<u64>,

        /// Bind a `user_input` tool that asks on the terminal
        #[arg(long)]
        interactive: bool,
    },

    /// Print the effective allow-lists
    Policy {
        /// Print as JSON
        #[arg(long)]
        output_json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };
    init_tracing(cli.json, level);

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            file,
            authorize,
            session,
            output_json,
            timeout_ms,
            max_operations,
            interactive,
        } => {
            let config = match max_operations {
                Some(max) => config.with_max_operations(max),
                None => config,
            };
            let timeout = timeout_ms.or(config.timeout_ms).map(Duration::from_millis);
            let code = read_snippet(file.as_deref())?;
            let result = cmd_run(
                config,
                &code,
                authorize,
                session.as_deref(),
                timeout,
                interactive,
            )
            .await?;
            print_result(&result, output_json)?;
            if let Some(error) = &result.error {
                anyhow::bail!("evaluation failed with {}", error.kind);
            }
            Ok(())
        }
        Commands::Policy { output_json } => cmd_policy(&config, output_json),
    }
}

fn load_config(path: Option<&Path>) -> Result<EvaluatorConfig> {
    match path {
        Some(path) => EvaluatorConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Ok(EvaluatorConfig::default()),
    }
}

fn read_snippet(file: Option<&Path>) -> Result<String> {
    match file {
        Some(path) if path != Path::new("-") => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read snippet {}", path.display())),
        _ => {
            let mut code = String::new();
            std::io::stdin()
                .read_to_string(&mut code)
                .context("Failed to read snippet from stdin")?;
            Ok(code)
        }
    }
}

async fn cmd_run(
    config: EvaluatorConfig,
    code: &str,
    authorize: Vec<String>,
    session_path: Option<&Path>,
    timeout: Option<Duration>,
    interactive: bool,
) -> Result<EvaluationResult> {
    let sandbox = Arc::new(Sandbox::default().with_config(config));
    let mut tools: Vec<Arc<dyn Tool>> = vec![Arc::new(FinalAnswerTool::new())];
    if interactive {
        tools.push(Arc::new(UserInputTool::new(StdinSource)));
    }

    let session = match session_path {
        Some(path) => Some(
            SessionState::load(path)
                .with_context(|| format!("Failed to load session {}", path.display()))?,
        ),
        None => None,
    };

    let (result, session) = match (timeout, session) {
        (Some(deadline), Some(session)) => {
            let (result, session) = sandbox
                .execute_in_session_with_deadline(
                    code.to_string(),
                    tools,
                    authorize,
                    session,
                    deadline,
                )
                .await;
            (result, Some(session))
        }
        (Some(deadline), None) => {
            let result = sandbox
                .execute_with_deadline(code.to_string(), tools, authorize, deadline)
                .await;
            (result, None)
        }
        (None, mut session) => {
            let imports: Vec<&str> = authorize.iter().map(String::as_str).collect();
            let result = match session.as_mut() {
                Some(session) => sandbox.execute_in_session(code, &tools, &imports, session),
                None => sandbox.execute(code, &tools, &imports),
            };
            (result, session)
        }
    };

    if let (Some(path), Some(session)) = (session_path, session) {
        session
            .save(path)
            .with_context(|| format!("Failed to save session {}", path.display()))?;
        info!(path = %path.display(), variables = session.len(), "session saved");
    }
    Ok(result)
}

fn print_result(result: &EvaluationResult, output_json: bool) -> Result<()> {
    if output_json {
        println!("{}", serde_json::to_string_pretty(result)?);
    } else {
        println!("{}", render_observation(result));
    }
    Ok(())
}

#[derive(Serialize)]
struct PolicyReport<'a> {
    builtins: Vec<&'a str>,
    modules: Vec<&'a str>,
    authorized_imports: &'a [String],
    nodes: Vec<String>,
    config: &'a EvaluatorConfig,
}

fn policy_report<'a>(policy: &'a CapabilityPolicy, config: &'a EvaluatorConfig) -> PolicyReport<'a> {
    PolicyReport {
        builtins: policy.allowed_builtins().collect(),
        modules: policy.allowed_modules().collect(),
        authorized_imports: &config.authorized_imports,
        nodes: policy.allowed_nodes().map(|n| n.to_string()).collect(),
        config,
    }
}

fn cmd_policy(config: &EvaluatorConfig, output_json: bool) -> Result<()> {
    let policy = CapabilityPolicy::standard();
    let report = policy_report(&policy, config);

    if output_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Built-ins ({}):", report.builtins.len());
    println!("  {}", report.builtins.join(", "));
    println!("Modules ({}):", report.modules.len());
    println!("  {}", report.modules.join(", "));
    if !report.authorized_imports.is_empty() {
        println!("Authorized imports:");
        println!("  {}", report.authorized_imports.join(", "));
    }
    println!("Syntax ({}):", report.nodes.len());
    println!("  {}", report.nodes.join(", "));
    println!(
        "Limits: {} operations, {} while iterations, call depth {}, {} output chars",
        config.max_operations, config.max_while_iterations, config.max_call_depth, config.max_output_len
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use codeact_core::{ErrorKind, Value};

    #[tokio::test]
    async fn test_cmd_run_persists_session() {
        let temp_dir = tempfile::tempdir().unwrap();
        let session_path = temp_dir.path().join("session.json");

        let first = cmd_run(
            EvaluatorConfig::default(),
            "counter = 1",
            Vec::new(),
            Some(&session_path),
            None,
            false,
        )
        .await
        .unwrap();
        assert!(first.is_success());

        let second = cmd_run(
            EvaluatorConfig::default(),
            "counter + 1",
            Vec::new(),
            Some(&session_path),
            Some(Duration::from_secs(5)),
            false,
        )
        .await
        .unwrap();
        assert_eq!(second.value, Some(Value::Int(2)));
    }

    #[tokio::test]
    async fn test_cmd_run_binds_final_answer_and_authorizations() {
        let result = cmd_run(
            EvaluatorConfig::default(),
            "import json\nfinal_answer(json.dumps([1, 2]))",
            vec!["json".to_string()],
            None,
            None,
            false,
        )
        .await
        .unwrap();
        assert!(result.is_final_answer);
        assert_eq!(result.value, Some(Value::from("[1, 2]")));

        let blocked = cmd_run(
            EvaluatorConfig::default(),
            "import json",
            Vec::new(),
            None,
            None,
            false,
        )
        .await
        .unwrap();
        assert_eq!(blocked.error.unwrap().kind, ErrorKind::ImportBlocked);
    }

    #[test]
    fn test_load_config_from_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("codeact.toml");
        std::fs::write(&path, "max_operations = 1234\nauthorized_imports = [\"numpy\"]\n").unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.max_operations, 1234);
        assert_eq!(config.authorized_imports, vec!["numpy"]);

        let missing = load_config(Some(&temp_dir.path().join("absent.toml")));
        assert!(missing.is_err());
    }

    #[test]
    fn test_policy_report_lists_base_capabilities() {
        let policy = CapabilityPolicy::standard();
        let config = EvaluatorConfig::default();
        let report = policy_report(&policy, &config);
        assert!(report.builtins.contains(&"len"));
        assert!(!report.builtins.contains(&"eval"));
        assert!(report.modules.contains(&"math"));
        assert!(report.nodes.iter().any(|n| n == "While"));
    }
}
