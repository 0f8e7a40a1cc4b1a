//! proofly: command-line client for the Proofly identity-graph service.
//!
//! Every command prints the pretty JSON result on stdout, or a single-line
//! error on stderr with a non-zero exit code. Ctrl-C cancels the running
//! operation cooperatively.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use proofly_graph::{GraphBuilder, GraphConfig};
use proofly_http::{logging, HttpConfig, ProoflyHttpClient};
use proofly_jobs::{
    CancellationToken, CheckFriendsParams, GlobalFilter, JobClient, JobClientConfig, JobResult,
    MutualFriendsParams, ProfileSearchParams, ProfileSpec, SubCategory, VerifyPhotoParams,
};

#[derive(Parser)]
#[command(name = "proofly")]
#[command(author, version, about = "Client for the Proofly identity-graph service")]
#[command(propagate_version = true)]
struct Cli {
    /// Service base URL (overrides PROOFLY_BASE_URL)
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// API key sent as X-API-Key (overrides PROOFLY_API_KEY)
    #[arg(long, global = true)]
    api_key: Option<String>,

    /// Per-request timeout in seconds (overrides PROOFLY_TIMEOUT_SECS)
    #[arg(long, global = true)]
    timeout: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check whether candidates are friends with a target profile
    CheckFriends {
        /// Facebook id of the target profile
        #[arg(short, long)]
        target: String,

        /// Candidate Facebook ids (comma separated or repeated)
        #[arg(short, long, required = true, num_args = 1.., value_delimiter = ',')]
        candidates: Vec<String>,
    },

    /// Find mutual friends between users
    MutualFriends {
        /// Facebook ids (comma separated or repeated)
        #[arg(short, long, required = true, num_args = 1.., value_delimiter = ',')]
        users: Vec<String>,
    },

    /// Search for profiles matching a person
    Search {
        #[command(flatten)]
        spec: SearchArgs,
    },

    /// Verify that a photo shows the owner of a profile
    VerifyPhoto {
        #[arg(long)]
        photo_url: String,

        #[arg(long)]
        profile_url: String,

        /// Extra guidance for the verifier
        #[arg(long)]
        instructions: Option<String>,
    },

    /// Show the current status of a job
    JobStatus {
        job_id: String,
    },

    /// Poll a job until it finishes
    AwaitJob {
        job_id: String,
    },

    /// Build a connection graph from a JSON file of profile specifications
    Graph {
        /// File holding either an array of specifications or
        /// `{"specs": [...], "filter": {...}}`
        specs: PathBuf,

        /// Location applied to every specification
        #[arg(long)]
        location: Option<String>,

        /// hometown | current
        #[arg(long)]
        sub_category: Option<SubCategory>,

        /// Lookups in flight at once
        #[arg(long)]
        max_concurrent: Option<usize>,

        /// Candidates kept per specification
        #[arg(long)]
        candidates_per_spec: Option<usize>,
    },
}

#[derive(clap::Args)]
struct SearchArgs {
    /// Full name
    #[arg(short, long)]
    name: String,

    /// Known Facebook id or username
    #[arg(long)]
    profile_id: Option<String>,

    #[arg(long)]
    email: Option<String>,

    #[arg(long)]
    birth_year: Option<i32>,

    /// Date of birth (YYYY-MM-DD)
    #[arg(long)]
    date_of_birth: Option<String>,

    #[arg(long)]
    location: Option<String>,

    /// hometown | current
    #[arg(long)]
    sub_category: Option<SubCategory>,

    #[arg(long)]
    photo_url: Option<String>,

    /// Known associates (comma separated)
    #[arg(long, value_delimiter = ',')]
    associates: Vec<String>,

    #[arg(long)]
    instructions: Option<String>,

    /// Minimum match confidence in [0, 1]
    #[arg(long)]
    min_confidence: Option<f64>,
}

impl From<SearchArgs> for ProfileSearchParams {
    fn from(args: SearchArgs) -> Self {
        Self {
            name: args.name,
            profile_id: args.profile_id,
            email: args.email,
            birth_year: args.birth_year,
            date_of_birth: args.date_of_birth,
            location: args.location,
            sub_category: args.sub_category,
            photo_url: args.photo_url,
            known_associates: (!args.associates.is_empty()).then_some(args.associates),
            additional_instructions: args.instructions,
            min_confidence_score: args.min_confidence,
        }
    }
}

/// Accepted layouts of the `graph` input file.
#[derive(Deserialize)]
#[serde(untagged)]
enum GraphInput {
    Specs(Vec<ProfileSpec>),
    WithFilter {
        specs: Vec<ProfileSpec>,
        #[serde(default)]
        filter: Option<GlobalFilter>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let _log_guard = logging::init();
    let cli = Cli::parse();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling");
            trigger.cancel();
        }
    });

    match run(cli, &cancel).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, cancel: &CancellationToken) -> anyhow::Result<()> {
    let mut http = HttpConfig::from_env();
    if let Some(base_url) = cli.base_url {
        http = http.with_base_url(base_url);
    }
    if let Some(api_key) = cli.api_key {
        http = http.with_api_key(api_key);
    }
    if let Some(timeout) = cli.timeout {
        http = http.with_timeout(timeout);
    }

    let remote = ProoflyHttpClient::new(http).context("creating HTTP client")?;
    let client = JobClient::new(Arc::new(remote), JobClientConfig::from_env());

    match cli.command {
        Commands::CheckFriends { target, candidates } => {
            let params = CheckFriendsParams {
                target_facebook_id: target,
                candidate_ids: candidates,
            };
            print_result(client.check_friends(&params, cancel).await?)
        }
        Commands::MutualFriends { users } => {
            let params = MutualFriendsParams { user_ids: users };
            print_result(client.find_mutual_friends(&params, cancel).await?)
        }
        Commands::Search { spec } => {
            let params = ProfileSearchParams::from(spec);
            print_result(client.search_profiles(&params, cancel).await?)
        }
        Commands::VerifyPhoto {
            photo_url,
            profile_url,
            instructions,
        } => {
            let params = VerifyPhotoParams {
                photo_url,
                profile_url,
                additional_instructions: instructions,
            };
            print_result(client.verify_profile_photo(&params, cancel).await?)
        }
        Commands::JobStatus { job_id } => print_json(&client.job_status(&job_id).await?),
        Commands::AwaitJob { job_id } => print_result(client.await_job(&job_id, None, cancel).await?),
        Commands::Graph {
            specs,
            location,
            sub_category,
            max_concurrent,
            candidates_per_spec,
        } => {
            let raw = std::fs::read_to_string(&specs)
                .with_context(|| format!("reading {}", specs.display()))?;
            let (specs, mut filter) = match serde_json::from_str::<GraphInput>(&raw)
                .with_context(|| format!("parsing {}", specs.display()))?
            {
                GraphInput::Specs(specs) => (specs, None),
                GraphInput::WithFilter { specs, filter } => (specs, filter),
            };
            if location.is_some() || sub_category.is_some() {
                let base = filter.take().unwrap_or_default();
                filter = Some(GlobalFilter {
                    location: location.or(base.location),
                    sub_category: sub_category.or(base.sub_category),
                });
            }

            let mut config = GraphConfig::from_env();
            if let Some(max) = max_concurrent {
                config = config.with_max_concurrent(max);
            }
            if let Some(count) = candidates_per_spec {
                config = config.with_candidates_per_spec(count);
            }

            let build = GraphBuilder::new(client, config)
                .build(&specs, filter.as_ref(), cancel)
                .await?;
            if build.is_partial() {
                warn!(
                    failures = build.spec_failures.len(),
                    "Some specifications failed, graph is partial"
                );
            }
            info!(
                nodes = build.graph.node_count(),
                edges = build.graph.edge_count(),
                "Graph built"
            );
            print_json(&build)
        }
    }
}

fn print_result<T: Serialize>(result: JobResult<T>) -> anyhow::Result<()> {
    let value = result.into_result()?;
    print_json(&value)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
