//! Command-line surface: one subcommand per controller operation, plus
//! the load-test bundle and TTL commands.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[command(name = "automock", version, about = "Provision and manage the automock mock-service and load-test stacks")]
pub struct Cli {
    /// Project base identifier, e.g. "checkout-svc".
    #[arg(long, global = true)]
    pub base: String,

    /// Use a filesystem-backed provider rooted at DIR instead of AWS.
    /// This is the same backend the test suite runs against, and doubles
    /// as a genuine local/offline mode.
    #[arg(long, global = true, value_name = "DIR")]
    pub local: Option<PathBuf>,

    /// Region override; defaults to AUTOMOCK_REGION or us-east-1.
    #[arg(long, global = true)]
    pub region: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum StackArg {
    Mock,
    Loadtest,
}

impl From<StackArg> for automock_core::reconciler::Stack {
    fn from(arg: StackArg) -> Self {
        match arg {
            StackArg::Mock => automock_core::reconciler::Stack::Mock,
            StackArg::Loadtest => automock_core::reconciler::Stack::LoadTest,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Creates the project's bucket.
    Init,

    /// Deploys a stack via Terraform.
    Deploy {
        #[arg(long, value_enum, default_value = "mock")]
        stack: StackArg,
        /// JSON object of deployment options, rendered into terraform.tfvars.
        #[arg(long)]
        options: Option<PathBuf>,
    },

    /// Tears a stack down.
    Destroy {
        #[arg(long, value_enum, default_value = "mock")]
        stack: StackArg,
    },

    /// Rewrites worker_desired_count in the saved tfvars and re-applies.
    Scale {
        #[arg(long, value_enum, default_value = "loadtest")]
        stack: StackArg,
        worker_desired_count: u32,
    },

    /// Removes the load-test bundle, tearing its stack down first if deployed.
    PurgeLoadtest,

    /// Destroys both stacks (if deployed) and removes the project.
    Delete,

    /// Prints a JSON snapshot of the project's state.
    Status,

    /// Extends a deployed stack's TTL by the given number of hours.
    ExtendTtl {
        #[arg(long, value_enum, default_value = "mock")]
        stack: StackArg,
        hours: u32,
    },

    /// Uploads a load-test bundle from a local directory.
    UploadLoadtest {
        /// Directory containing locustfile.py, requirements.txt, locust_endpoints.json.
        dir: PathBuf,
    },

    /// Downloads the active load-test bundle into a local directory.
    DownloadLoadtest { dest: PathBuf },

    /// Rolls the active load-test bundle back to its predecessor.
    RollbackLoadtest,
}
