use clap::Parser;
use gitkeeper::config::Config;
use gitkeeper::constants::env as env_keys;
use gitkeeper::services::askpass::run_helper;
use gitkeeper::services::logger::{LogLevel, Logger};
use std::io::Write;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "gitkeeper", version, about = "Git execution core served as JSON-RPC over stdio")]
struct Cli {
    /// error | warn | info | debug
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Credential file (JSON array); overrides GITKEEPER_CREDENTIALS_PATH.
    #[arg(long, value_name = "PATH")]
    credentials: Option<PathBuf>,

    /// Trust unknown ssh host keys without asking the operator.
    #[arg(long)]
    auto_accept_host_keys: bool,
}

/// git and ssh run this same binary as their askpass program.
fn is_helper_invocation() -> bool {
    std::env::var_os(env_keys::ASKPASS_SOCKET).is_some()
        || std::env::var_os(env_keys::SSH_PASSPHRASE).is_some()
}

fn run_askpass_helper() -> i32 {
    let prompt = std::env::args().nth(1).unwrap_or_default();
    match run_helper(&prompt) {
        Ok(answer) => {
            let mut stdout = std::io::stdout();
            if writeln!(stdout, "{}", answer.as_str()).and_then(|_| stdout.flush()).is_err() {
                return 1;
            }
            0
        }
        Err(err) => {
            eprintln!("gitkeeper askpass: {}", err);
            1
        }
    }
}

#[tokio::main]
async fn serve(cli: Cli) -> i32 {
    let logger = Logger::new("gitkeeper");
    if let Some(raw) = cli.log_level.as_deref() {
        match LogLevel::parse(raw) {
            Some(level) => logger.set_level(level),
            None => {
                eprintln!("gitkeeper: unknown log level '{}'", raw);
                return 2;
            }
        }
    }

    let mut config = Config::from_env();
    if let Some(path) = cli.credentials {
        config.credentials_path = path;
    }
    config.auto_accept_host_keys |= cli.auto_accept_host_keys;

    match gitkeeper::rpc::server::run_stdio(config, logger.clone()).await {
        Ok(()) => 0,
        Err(err) => {
            logger.error(
                "server stopped",
                Some(&serde_json::json!({ "error": err.message, "code": err.code })),
            );
            1
        }
    }
}

fn main() {
    if is_helper_invocation() {
        std::process::exit(run_askpass_helper());
    }
    let cli = Cli::parse();
    std::process::exit(serve(cli));
}
