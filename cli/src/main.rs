//! Command-line front end for a faasml cluster.

mod client;
mod validate;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};

use api::{InferRequest, TrainOptions, TrainRequest};
use client::ControllerClient;

#[derive(Debug, Parser)]
#[command(name = "faasml", version, about = "Train and query networks on a faasml cluster")]
struct Cli {
    /// Controller base URL.
    #[arg(
        long,
        env = "FAASML_CONTROLLER_URL",
        default_value = "http://localhost:8080",
        global = true
    )]
    controller: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create a train task
    Train(TrainArgs),
    /// Create an inference task
    Infer(InferArgs),
}

#[derive(Debug, Args)]
struct TrainArgs {
    /// Dataset name
    #[arg(short, long)]
    dataset: String,
    /// Function name
    #[arg(short, long)]
    function: String,
    /// Number of epochs to run
    #[arg(short, long)]
    epochs: i64,
    /// Batch size
    #[arg(short, long)]
    batch: i64,
    /// Learning rate
    #[arg(long)]
    lr: f64,
    /// Network type announced to the scheduler
    #[arg(long = "model-type", default_value = "example")]
    model_type: String,
    /// Validate the network every N epochs (0 disables)
    #[arg(long = "validate-every", default_value_t = 0)]
    validate_every: usize,
    /// Starting level of parallelism
    #[arg(long, default_value_t = 1)]
    parallelism: usize,
    /// Keep parallelism static
    #[arg(long = "static", default_value_t = false)]
    static_parallelism: bool,
    /// Sync every K updates to the local network
    #[arg(long = "K", default_value_t = -1)]
    k: i64,
    /// Average only once per epoch, no matter the value of K
    #[arg(long = "sparse-avg", default_value_t = false)]
    sparse_avg: bool,
    /// Accuracy after which the training will stop
    #[arg(long = "goal-accuracy", default_value_t = 100.0)]
    goal_accuracy: f64,
}

#[derive(Debug, Args)]
struct InferArgs {
    /// Network id
    #[arg(short, long)]
    network: String,
    /// File with the datapoints in JSON format
    #[arg(long)]
    datafile: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();
    let client = ControllerClient::new(cli.controller);

    let result = match cli.command {
        Command::Train(args) => train(&client, args).await,
        Command::Infer(args) => infer(&client, args).await,
    };

    match result {
        Ok(output) => {
            println!("{output}");
            ExitCode::SUCCESS
        }
        Err(errors) => {
            for error in &errors {
                eprintln!("error: {error}");
            }
            ExitCode::FAILURE
        }
    }
}

/// Validates the arguments, builds the request, and submits it.
async fn train(client: &ControllerClient, args: TrainArgs) -> Result<String, Vec<String>> {
    let mut errors = validate::check_bounds(args.batch, args.epochs, args.lr);

    if !client.dataset_exists(&args.dataset).await {
        errors.push(format!("dataset \"{}\" does not exist", args.dataset));
    }
    if !client.function_exists(&args.function).await {
        errors.push(format!("function \"{}\" does not exist", args.function));
    }
    if !errors.is_empty() {
        return Err(errors);
    }

    // sparse averaging overrides K: synchronize once per epoch
    let k = if args.sparse_avg { -1 } else { args.k };

    let request = TrainRequest {
        model_type: args.model_type,
        batch_size: args.batch as usize,
        epochs: args.epochs as usize,
        dataset: args.dataset,
        learning_rate: args.lr,
        function_name: args.function,
        options: TrainOptions {
            default_parallelism: args.parallelism,
            static_parallelism: args.static_parallelism,
            validate_every: args.validate_every,
            k,
            goal_accuracy: args.goal_accuracy,
        },
    };

    client.train(&request).await.map_err(|e| vec![e])
}

/// Reads the datapoints file and submits the inference request.
async fn infer(client: &ControllerClient, args: InferArgs) -> Result<String, Vec<String>> {
    let raw = tokio::fs::read_to_string(&args.datafile)
        .await
        .map_err(|e| vec![format!("could not read data file: {e}")])?;
    let data: serde_json::Value =
        serde_json::from_str(&raw).map_err(|e| vec![format!("could not unmarshal data: {e}")])?;

    let request = InferRequest {
        model_id: args.network,
        data,
    };

    client.infer(&request).await.map_err(|e| vec![e])
}
