mod credentials;

use std::io;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Result;
use apicall_core::{ApiClient, CancelToken, Invocation, Pipeline, Streams, UreqTransport};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::credentials::EnvCredentialStore;

#[derive(Parser, Debug)]
#[command(name = "apicall")]
#[command(about = "Make an authenticated API request and print the response", long_about = None)]
struct Args {
    /// Endpoint path relative to --api-url, or an absolute URL
    path: String,

    /// HTTP method (default: GET, or POST when fields or --input are given)
    #[arg(short = 'X', long)]
    method: Option<String>,

    /// Add a string field (repeatable)
    #[arg(short = 'f', long = "raw-field", value_name = "KEY=VALUE")]
    raw_fields: Vec<String>,

    /// Add a typed field; `@file` and `@-` read the value (repeatable)
    #[arg(short = 'F', long = "field", value_name = "KEY=VALUE")]
    fields: Vec<String>,

    /// Add a request header (repeatable)
    #[arg(short = 'H', long = "header", value_name = "KEY:VALUE")]
    headers: Vec<String>,

    /// Send the contents of a file as the request body (`-` for stdin)
    #[arg(long, value_name = "FILE")]
    input: Option<String>,

    /// Follow `Link: rel="next"` until the last page
    #[arg(long, default_value_t = false)]
    paginate: bool,

    /// Print the status line and response headers to stderr
    #[arg(short = 'i', long, default_value_t = false)]
    include: bool,

    /// Keep the JSON:API envelope on v2 responses
    #[arg(long, default_value_t = false)]
    raw: bool,

    /// Filter the response with a jq expression
    #[arg(short = 'q', long, value_name = "EXPRESSION")]
    jq: Option<String>,

    /// Override the key class inferred from the path
    #[arg(long, value_name = "CLASS")]
    key_class: Option<String>,

    /// API base URL
    #[arg(long, env = "APICALL_API_URL", default_value = "http://localhost:3000")]
    api_url: String,

    /// Credential profile
    #[arg(long, env = "APICALL_PROFILE", default_value = "default")]
    profile: String,

    /// Overall deadline in seconds, across all pages
    #[arg(long, default_value_t = 60)]
    timeout_secs: u64,

    /// Log filter directive
    #[arg(long, env = "APICALL_LOG", default_value = "warn")]
    log_level: String,
}

impl Args {
    fn invocation(&self) -> Invocation {
        Invocation {
            path: self.path.clone(),
            method: self.method.clone(),
            string_fields: self.raw_fields.clone(),
            typed_fields: self.fields.clone(),
            headers: self.headers.clone(),
            input: self.input.clone(),
            paginate: self.paginate,
            include_headers: self.include,
            raw: self.raw,
            filter: self.jq.clone(),
            key_class: self.key_class.clone(),
        }
    }
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn run(args: &Args) -> Result<()> {
    let transport = UreqTransport::new();
    let credentials = EnvCredentialStore::from_env();
    let pipeline = Pipeline::new(ApiClient::new(&args.api_url), &transport, &credentials, &args.profile);
    let cancel = CancelToken::with_timeout(Duration::from_secs(args.timeout_secs));

    let mut stdin = io::stdin().lock();
    let mut stdout = io::stdout().lock();
    let mut stderr = io::stderr();
    let mut streams = Streams {
        stdin: &mut stdin,
        stdout: &mut stdout,
        stderr: &mut stderr,
    };

    tracing::debug!(api_url = %args.api_url, profile = %args.profile, path = %args.path, "starting request");
    pipeline.run(&args.invocation(), &mut streams, &cancel)?;
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(&args.log_level);

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
