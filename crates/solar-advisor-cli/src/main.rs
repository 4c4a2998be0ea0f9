use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use solar_advisor_api::{
    AskRequest, ChatCompletionClient, CompletionConfig, SolarAdvisorApi, DEFAULT_LLM_BASE_URL,
    DEFAULT_LLM_MODEL, DEFAULT_LLM_TIMEOUT_SECS,
};
use solar_advisor_core::{advise, extract_constraint};
use solar_advisor_store_csv::CsvDataset;
use tracing_subscriber::EnvFilter;

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "solar")]
#[command(about = "Solar Advisor CLI")]
struct Cli {
    #[arg(long, env = "SOLAR_DATASET", default_value = "./solar_data.csv")]
    dataset: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the constraints extracted from a question.
    Extract(QuestionArgs),
    /// Print the dataset summary for a question without calling the text generator.
    Summary(QuestionArgs),
    /// Answer a question through the text generator.
    Ask(AskArgs),
    Dataset {
        #[command(subcommand)]
        command: DatasetCommand,
    },
}

#[derive(Debug, Subcommand)]
enum DatasetCommand {
    Show,
}

#[derive(Debug, Args)]
struct QuestionArgs {
    #[arg(long)]
    question: String,
}

#[derive(Debug, Args)]
struct AskArgs {
    #[command(flatten)]
    question: QuestionArgs,
    #[command(flatten)]
    llm: LlmArgs,
}

#[derive(Debug, Args)]
struct LlmArgs {
    #[arg(long = "llm-base-url", env = "OPENAI_BASE_URL", default_value = DEFAULT_LLM_BASE_URL)]
    base_url: String,
    #[arg(long = "llm-model", env = "SOLAR_LLM_MODEL", default_value = DEFAULT_LLM_MODEL)]
    model: String,
    #[arg(long = "llm-api-key", env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,
    #[arg(
        long = "llm-timeout-secs",
        env = "SOLAR_LLM_TIMEOUT_SECS",
        default_value_t = DEFAULT_LLM_TIMEOUT_SECS
    )]
    timeout_secs: u64,
}

impl LlmArgs {
    fn into_config(self) -> CompletionConfig {
        CompletionConfig {
            base_url: self.base_url,
            model: self.model,
            api_key: self.api_key,
            timeout_secs: self.timeout_secs,
        }
    }
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

/// Error worth reporting from loading `.env`. A missing file is the normal case.
fn env_file_error(loaded: &Result<PathBuf, dotenv::Error>) -> Option<&dotenv::Error> {
    loaded.as_ref().err().filter(|err| !err.not_found())
}

fn main() -> Result<()> {
    let env_file = dotenv::dotenv();
    init_tracing();
    if let Some(err) = env_file_error(&env_file) {
        tracing::warn!(error = %err, "ignoring unreadable .env file");
    }

    let cli = Cli::parse();
    let dataset = CsvDataset::load(&cli.dataset)?;
    match cli.command {
        Command::Extract(args) => {
            let constraint = extract_constraint(&args.question, dataset.store());
            emit_json(serde_json::json!({
                "question": args.question,
                "constraint": constraint,
            }))
        }
        Command::Summary(args) => {
            let advice = advise(&args.question, dataset.store());
            emit_json(serde_json::to_value(advice)?)
        }
        Command::Ask(args) => {
            let AskArgs { question, llm } = args;
            let generator = Arc::new(ChatCompletionClient::new(llm.into_config()));
            let api = SolarAdvisorApi::new(dataset, generator);
            let response = api.ask(&AskRequest { question: question.question })?;
            emit_json(serde_json::to_value(response)?)
        }
        Command::Dataset { command: DatasetCommand::Show } => {
            emit_json(serde_json::to_value(dataset.info())?)
        }
    }
}
