use autopilot::github::{DEFAULT_REPO, GITHUB_API, GitHubSync, REPO_ENV, TOKEN_ENV};
use autopilot::pipeline::{MILESTONES, Pipeline, RunLog};
use autopilot::v1beta::rest::{API_KEY_ENV, Client, MODEL_ENV};
use autopilot::v1beta::{API_BASE, DEFAULT_MODEL};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// gemini-autopilot - generate, review, test and deploy game milestones with Gemini
///
/// The API key is read from GEMINI_API_KEY (a .env file in the working directory is
/// loaded first). Without a key every generation falls back to a placeholder.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Gemini API key
    #[arg(long, env = API_KEY_ENV, hide_env_values = true, global = true)]
    api_key: Option<String>,

    /// Model resource name
    #[arg(long, env = MODEL_ENV, default_value = DEFAULT_MODEL, global = true)]
    model: String,

    /// API base URL
    #[arg(long = "api-base", env = "GEMINI_API_BASE", default_value = API_BASE, value_name = "URL", global = true)]
    api_base: String,

    /// Per-attempt request timeout in seconds
    #[arg(long = "timeout-secs", default_value_t = 30, global = true)]
    timeout_secs: u64,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run the generate/review/test/deploy pipeline over every milestone
    Run(RunArgs),

    /// List the models available to the API key
    ListModels,
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// Directory generated code and reviews are written to
    #[arg(long = "out-dir", default_value = "generated", value_name = "PATH")]
    out_dir: PathBuf,

    /// Append-only run log
    #[arg(long = "log-file", default_value = "autopilot.log", value_name = "PATH")]
    log_file: PathBuf,

    /// GitHub repository listed before the run, as owner/name
    #[arg(long, env = REPO_ENV, default_value = DEFAULT_REPO, value_name = "OWNER/NAME")]
    repo: String,

    /// GitHub token used for the code sync
    #[arg(long = "github-token", env = TOKEN_ENV, hide_env_values = true)]
    github_token: Option<String>,

    /// GitHub API base URL
    #[arg(long = "github-api-url", env = "GITHUB_API_URL", default_value = GITHUB_API, value_name = "URL")]
    github_api_url: String,

    /// Skip the code sync step
    #[arg(long = "no-sync")]
    no_sync: bool,
}

impl RunArgs {
    fn sync(&self) -> Option<GitHubSync> {
        if self.no_sync {
            return None;
        }
        let token = self.github_token.clone().filter(|token| !token.trim().is_empty());
        Some(GitHubSync::new(self.repo.clone(), token).with_api_url(self.github_api_url.clone()))
    }
}

impl Cli {
    fn client(&self) -> Client {
        let api_key = self.api_key.clone().filter(|key| !key.trim().is_empty());
        Client::new(api_key, self.model.clone())
            .with_api_base(self.api_base.clone())
            .with_timeout(Duration::from_secs(self.timeout_secs))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let client = cli.client();
    if !client.has_credential() {
        warn!("{API_KEY_ENV} is not set, generation will fall back to placeholders");
    }

    match &cli.command {
        Commands::Run(args) => {
            let mut pipeline = Pipeline::new(&client, &args.out_dir, RunLog::new(&args.log_file));
            if let Some(sync) = args.sync() {
                pipeline = pipeline.with_sync(sync);
            }
            let reports = pipeline.run(&MILESTONES).await?;
            for report in &reports {
                info!(
                    version = report.version,
                    generated = report.generated,
                    reviewed = report.reviewed,
                    tests = %report.tests.summary,
                    deploy = %report.deploy.summary,
                    "milestone complete"
                );
            }
        }
        Commands::ListModels => {
            for model in client.list_models().await? {
                println!("{}", model.name);
            }
        }
    }
    Ok(())
}
