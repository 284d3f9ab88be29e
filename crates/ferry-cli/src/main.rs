use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use ferry_config::FerryConfig;
use ferry_host::{
    Gateway, GuestSource, Header, HttpFetch, HttpRequest, HttpResponse, Loader, ReqwestFetch,
};
use std::path::PathBuf;
use std::sync::Arc;
use url::Url;

#[derive(Parser)]
#[command(
    name = "ferry",
    version,
    about = "Serve HTTP requests through a sandboxed WebAssembly guest"
)]
struct Cli {
    /// TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Send one request through the gateway and print the response
    Request(RequestArgs),
    /// Load a guest module and report whether it is usable
    Check(CheckArgs),
}

#[derive(Args)]
struct GuestArgs {
    /// Guest module path or URL (overrides `guest.module` from the config)
    #[arg(long)]
    module: Option<String>,
}

#[derive(Args)]
struct RequestArgs {
    #[command(flatten)]
    guest: GuestArgs,
    /// Absolute request URL
    #[arg(long)]
    url: String,
    #[arg(long, default_value = "GET")]
    method: String,
    /// Request header as `name: value` (repeatable)
    #[arg(long = "header", short = 'H')]
    headers: Vec<String>,
    /// Request body (ignored for GET and HEAD)
    #[arg(long)]
    body: Option<String>,
    /// Print the response as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct CheckArgs {
    #[command(flatten)]
    guest: GuestArgs,
}

fn main() {
    let cli = Cli::parse();
    let exit_code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            2
        }
    };

    std::process::exit(exit_code);
}

fn run(cli: Cli) -> Result<i32> {
    let config = match &cli.config {
        Some(path) => FerryConfig::load_from_path(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => FerryConfig::default(),
    };
    ferry_config::init_tracing(&config.logging);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    match cli.command {
        Command::Request(args) => runtime.block_on(request(&config, args)),
        Command::Check(args) => runtime.block_on(check(&config, args)),
    }
}

async fn request(config: &FerryConfig, args: RequestArgs) -> Result<i32> {
    let loader = Arc::new(loader(config, &args.guest)?);
    let fetch: Arc<dyn HttpFetch> = Arc::new(ReqwestFetch::new(config.driver.fetch_timeout())?);
    let gateway = Gateway::new(
        loader,
        fetch,
        config.gateway.clone(),
        config.driver.clone(),
    );

    let request = HttpRequest {
        url: args.url,
        method: args.method.to_ascii_uppercase(),
        headers: args
            .headers
            .iter()
            .map(|header| parse_header(header))
            .collect::<Result<_>>()?,
        content: args.body.unwrap_or_default(),
    };

    let response = gateway.handle(request).await?;
    print_response(&response, args.json)?;
    Ok(0)
}

async fn check(config: &FerryConfig, args: CheckArgs) -> Result<i32> {
    let loader = loader(config, &args.guest)?;
    let app = loader.load().await?;
    let memory_bytes = app.with_guest(|guest| guest.memory_size());
    println!("guest ready: {}", loader.source());
    println!("  memory: {memory_bytes} bytes");
    Ok(0)
}

fn loader(config: &FerryConfig, args: &GuestArgs) -> Result<Loader> {
    let source = match (&args.module, &config.guest.module) {
        (Some(module), _) => guest_source(module),
        (None, Some(path)) => GuestSource::Path(path.clone()),
        (None, None) => bail!("no guest module given; pass --module or set `guest.module`"),
    };
    tracing::debug!(source = %source, "loading guest");
    Ok(Loader::new(source, config.guest.clone()))
}

/// `http`, `https` and `file` URLs are used as-is; anything else is a path.
fn guest_source(module: &str) -> GuestSource {
    match Url::parse(module) {
        Ok(url) if matches!(url.scheme(), "http" | "https" | "file") => GuestSource::Url(url),
        _ => GuestSource::Path(PathBuf::from(module)),
    }
}

fn parse_header(text: &str) -> Result<Header> {
    let (name, value) = text
        .split_once(':')
        .ok_or_else(|| anyhow!("invalid header {text:?}; expected `name: value`"))?;
    let name = name.trim();
    if name.is_empty() {
        bail!("invalid header {text:?}; empty name");
    }
    Ok(Header::new(name, value.trim()))
}

fn print_response(response: &HttpResponse, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(response)?);
        return Ok(());
    }

    println!("{}", response.status);
    for header in &response.headers {
        println!("{}: {}", header.name, header.value);
    }
    println!();
    println!("{}", response.content);
    Ok(())
}
