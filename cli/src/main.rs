//! `authgate`: resolve the auth state of a session from the command line.
//!
//! Exit status is 0 when the session is authenticated and 2 when it is not.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use authgate::http::{DEFAULT_CONNECT_TIMEOUT_SECS, HttpAuthProvider, HttpSessionTerminator};
use authgate::{AuthContext, AuthParams, AuthStateResolver, ConfigError, ResolverConfig, TracingNotifier, check_auth};
use clap::{Args, Parser, Subcommand};
use serde_json::{Value, json};

const EXIT_AUTHENTICATED: u8 = 0;
const EXIT_UNAUTHENTICATED: u8 = 2;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "authgate", about = "Resolve and act on authentication state")]
struct Cli {
    /// Endpoint answering 2xx for a valid session. Without it every check passes.
    #[arg(long, env = "AUTHGATE_CHECK_URL")]
    check_url: Option<String>,

    #[arg(long, env = "AUTHGATE_LOGOUT_URL")]
    logout_url: Option<String>,

    #[arg(long, env = "AUTHGATE_SESSION_TOKEN")]
    session_token: Option<String>,

    /// Application mount path used for the default login redirect.
    #[arg(long, env = "AUTHGATE_BASENAME", default_value = "")]
    basename: String,

    #[arg(long, env = "AUTHGATE_TIMEOUT_SECS", default_value_t = 10)]
    timeout_secs: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve the auth state and print it as JSON.
    Status(StatusArgs),
    /// Run a one-off check, optionally logging out on failure.
    Check(CheckArgs),
    /// Print the default login URL for the basename.
    LoginUrl,
}

#[derive(Args, Debug)]
struct StatusArgs {
    #[arg(long, default_value = "{}")]
    params: String,

    #[arg(long)]
    logout_on_failure: bool,
}

#[derive(Args, Debug)]
struct CheckArgs {
    #[arg(long, default_value = "{}")]
    params: String,

    #[arg(long)]
    logout_on_failure: bool,

    #[arg(long)]
    redirect_to: Option<String>,

    #[arg(long)]
    no_notify: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode, CliError> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let cli = Cli::parse();
    let terminator = Arc::new(build_terminator(&cli)?);
    let ctx = build_context(&cli, terminator.clone())?;

    let status = match cli.command {
        Command::Status(args) => run_status(ctx, &terminator, args).await?,
        Command::Check(args) => run_check(&ctx, &terminator, args).await?,
        Command::LoginUrl => {
            println!("{}", ctx.login_url());
            EXIT_AUTHENTICATED
        }
    };
    Ok(ExitCode::from(status))
}

fn build_terminator(cli: &Cli) -> Result<HttpSessionTerminator, ConfigError> {
    let terminator = HttpSessionTerminator::new(cli.logout_url.clone())?;
    Ok(match &cli.session_token {
        Some(token) => terminator.with_session_token(token.clone()),
        None => terminator,
    })
}

fn build_context(cli: &Cli, terminator: Arc<HttpSessionTerminator>) -> Result<AuthContext, ConfigError> {
    let mut ctx = AuthContext::new(terminator, Arc::new(TracingNotifier)).with_basename(cli.basename.clone());
    if let Some(url) = &cli.check_url {
        let provider = HttpAuthProvider::with_timeouts(
            url.clone(),
            Duration::from_secs(cli.timeout_secs),
            Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS.min(cli.timeout_secs)),
        )?;
        let provider = match &cli.session_token {
            Some(token) => provider.with_session_token(token.clone()),
            None => provider,
        };
        ctx = ctx.with_provider(Arc::new(provider));
    } else {
        tracing::info!("no check URL configured, every session is authenticated");
    }
    Ok(ctx)
}

fn parse_params(raw: &str) -> Result<AuthParams, CliError> {
    Ok(serde_json::from_str(raw)?)
}

fn exit_status(authenticated: bool) -> u8 {
    if authenticated { EXIT_AUTHENTICATED } else { EXIT_UNAUTHENTICATED }
}

fn print_report(body: Value, terminator: &HttpSessionTerminator) {
    let report = json!({ "result": body, "redirect": terminator.last_redirect() });
    println!("{}", serde_json::to_string_pretty(&report).unwrap_or_else(|_| report.to_string()));
}

async fn run_status(ctx: AuthContext, terminator: &HttpSessionTerminator, args: StatusArgs) -> Result<u8, CliError> {
    let params = parse_params(&args.params)?;
    let resolver = AuthStateResolver::new(ctx);
    resolver.resolve(params, args.logout_on_failure, ResolverConfig::default());
    let state = resolver.settled().await;

    print_report(serde_json::to_value(&state)?, terminator);
    Ok(exit_status(state.authenticated))
}

async fn run_check(ctx: &AuthContext, terminator: &HttpSessionTerminator, args: CheckArgs) -> Result<u8, CliError> {
    let params = parse_params(&args.params)?;
    let outcome =
        check_auth(ctx, &params, args.logout_on_failure, args.redirect_to.as_deref(), args.no_notify).await;

    let (body, authenticated) = match outcome {
        Ok(payload) => (json!({ "authenticated": true, "payload": payload }), true),
        Err(err) => (json!({ "authenticated": false, "error": err }), false),
    };
    print_report(body, terminator);
    Ok(exit_status(authenticated))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_status_flags() {
        let cli = Cli::try_parse_from(["authgate", "--basename", "/admin", "status", "--logout-on-failure"]).unwrap();
        assert_eq!(cli.basename, "/admin");
        let Command::Status(args) = cli.command else { panic!("expected status") };
        assert!(args.logout_on_failure);
        assert_eq!(args.params, "{}");
    }

    #[test]
    fn parses_check_flags() {
        let cli = Cli::try_parse_from(["authgate", "check", "--redirect-to", "/sso", "--no-notify"]).unwrap();
        let Command::Check(args) = cli.command else { panic!("expected check") };
        assert_eq!(args.redirect_to.as_deref(), Some("/sso"));
        assert!(args.no_notify);
        assert!(!args.logout_on_failure);
    }

    #[test]
    fn invalid_params_are_reported() {
        assert!(matches!(parse_params("{nope"), Err(CliError::Json(_))));
        assert_eq!(parse_params(r#"{"a":1}"#).unwrap(), json!({ "a": 1 }));
    }

    #[test]
    fn exit_statuses() {
        assert_eq!(exit_status(true), 0);
        assert_eq!(exit_status(false), 2);
    }

    #[tokio::test]
    async fn status_without_check_url_is_authenticated() {
        let cli = Cli::try_parse_from(["authgate", "status"]).unwrap();
        let terminator = Arc::new(build_terminator(&cli).unwrap());
        let ctx = build_context(&cli, terminator.clone()).unwrap();
        let Command::Status(args) = cli.command else { panic!("expected status") };
        let code = run_status(ctx, &terminator, args).await.unwrap();
        assert_eq!(code, EXIT_AUTHENTICATED);
    }
}
