use coloring_bridge::api::server::serve;
use coloring_bridge::config::BridgeConfig;
use coloring_bridge::generation::GenerationService;
use serde_json::json;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let cli_args = std::env::args().skip(1).collect::<Vec<_>>();
    if matches!(cli_args.first().map(String::as_str), Some("check-config")) {
        run_check_config_cli(cli_args.into_iter().skip(1).collect::<Vec<_>>())?;
        return Ok(());
    }
    if matches!(cli_args.first().map(String::as_str), Some("status")) {
        run_status_cli(cli_args.into_iter().skip(1).collect::<Vec<_>>()).await?;
        return Ok(());
    }

    let config = BridgeConfig::from_env()?;
    serve(config).await?;
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .try_init();
}

fn run_check_config_cli(args: Vec<String>) -> Result<(), Box<dyn std::error::Error>> {
    if args
        .iter()
        .any(|arg| matches!(arg.as_str(), "-h" | "--help"))
    {
        print_check_config_usage();
        return Ok(());
    }
    if let Some(unknown) = args.first() {
        return Err(std::io::Error::other(format!(
            "Unknown argument: {unknown}\n\nUse --help for usage."
        ))
        .into());
    }

    let config = BridgeConfig::from_env()?;
    config.require_credential()?;
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "ok": true,
            "bind": config.bind.to_string(),
            "api_base": config.upstream.api_base,
            "dialect": config.upstream.dialect.as_str(),
            "model": config.upstream.model,
            "upstream_timeout_secs": config.upstream.request_timeout.as_secs(),
            "poll_interval_ms": config.poll_policy.interval.as_millis() as u64,
            "poll_timeout_secs": config.poll_policy.deadline.as_secs(),
        }))?
    );
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct StatusCliArgs {
    task_id: String,
}

fn parse_status_cli_args(args: &[String]) -> Result<StatusCliArgs, Box<dyn std::error::Error>> {
    let mut task_id = None::<String>;
    let mut i = 0usize;
    while i < args.len() {
        let flag = args[i].as_str();
        match flag {
            "--task-id" => {
                let Some(value) = args.get(i + 1) else {
                    return Err(std::io::Error::other(format!("Missing value for {flag}")).into());
                };
                task_id = Some(value.clone());
                i += 2;
            }
            positional if !positional.starts_with('-') && task_id.is_none() => {
                task_id = Some(positional.to_string());
                i += 1;
            }
            unknown => {
                return Err(std::io::Error::other(format!(
                    "Unknown argument: {unknown}\n\nUse --help for usage."
                ))
                .into());
            }
        }
    }

    let task_id = task_id
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| std::io::Error::other("Missing required --task-id"))?;
    Ok(StatusCliArgs { task_id })
}

async fn run_status_cli(args: Vec<String>) -> Result<(), Box<dyn std::error::Error>> {
    if args
        .iter()
        .any(|arg| matches!(arg.as_str(), "-h" | "--help"))
    {
        print_status_usage();
        return Ok(());
    }
    let parsed = parse_status_cli_args(args.as_slice())?;
    let config = BridgeConfig::from_env()?;
    config.require_credential()?;
    let service = GenerationService::from_config(&config.upstream, config.poll_policy)?;
    let status = service.query_status(parsed.task_id.as_str()).await?;
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "ok": true,
            "taskId": parsed.task_id,
            "status": status.as_str(),
            "detail": format!("{status:?}"),
        }))?
    );
    Ok(())
}

fn print_check_config_usage() {
    eprintln!(concat!(
        "Usage:\n",
        "  cargo run -- check-config\n\n",
        "Reads KIE_* and COLORING_* settings from the environment and ./.env,\n",
        "and fails when KIE_API_KEY is missing.\n"
    ));
}

fn print_status_usage() {
    eprintln!(concat!(
        "Usage:\n",
        "  cargo run -- status --task-id <taskId>\n",
        "  cargo run -- status <taskId>\n"
    ));
}
