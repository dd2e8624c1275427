use authrest::config::{Config, DEFAULT_CONFIG_FILE};
use authrest::credentials::OauthEndpoints;
use authrest::{ApiResponse, AuthorizationUrlParams, RequestBody, RestClient};
use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

const USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v2/userinfo";

#[derive(Parser)]
#[command(name = "authrest", version, about = "Authenticated REST calls with retry and token refresh")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file; `AUTHREST_*` env vars override it.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error). Defaults to `basic.loglevel`.
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the consent-screen URL.
    AuthUrl {
        #[arg(long)]
        redirect_uri: String,
        #[arg(long)]
        scope: String,
        #[arg(long)]
        state: Option<String>,
        #[arg(long, default_value = "force")]
        approval_prompt: String,
        #[arg(long, default_value = "offline")]
        access_type: String,
    },
    /// Exchange an authorization code for tokens.
    Tokens {
        #[arg(long)]
        code: String,
        #[arg(long)]
        redirect_uri: String,
    },
    /// Fetch the profile of the authorized user.
    UserInfo,
    /// Send an arbitrary request.
    Call {
        /// Absolute URL or path relative to `http.api_url`.
        url: String,
        #[arg(short = 'X', long, default_value = "GET")]
        method: String,
        /// Extra header, `Name: value`. Repeatable.
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,
        /// JSON request body.
        #[arg(long)]
        data: Option<String>,
        /// Authenticate with the metadata-server service account instead of OAuth.
        #[arg(long, default_value_t = false)]
        service_account: bool,
    },
}

fn init_telemetry(cli: &Cli, cfg: &Config) {
    let level = cli.log_level.as_deref().unwrap_or(&cfg.basic.loglevel);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if cli.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .compact()
                    .with_level(true)
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

fn parse_headers(raw: &[String]) -> Result<HeaderMap, Box<dyn std::error::Error>> {
    let mut headers = HeaderMap::new();
    for line in raw {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| format!("header must look like `Name: value`, got `{line}`"))?;
        headers.append(
            HeaderName::from_bytes(name.trim().as_bytes())?,
            HeaderValue::from_str(value.trim())?,
        );
    }
    Ok(headers)
}

fn print_response(response: &ApiResponse) -> Result<(), Box<dyn std::error::Error>> {
    match response.json::<Value>() {
        Ok(value) => println!("{}", serde_json::to_string_pretty(&value)?),
        Err(_) => println!("{}", response.text()),
    }
    Ok(())
}

fn oauth_client(cfg: Config) -> Result<RestClient, authrest::RestError> {
    RestClient::builder(cfg)
        .oauth_from_config()
        .on_refresh(|_, _| info!("OAuth tokens rotated; persist them if this session matters"))
        .build()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)?;
    init_telemetry(&cli, &cfg);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        api_url = %cfg.http.api_url,
        proxy = %cfg.http.proxy.as_ref().map_or("<none>", |u| u.as_str()),
        max_attempts = cfg.retry.max_attempts,
        "authrest starting"
    );

    match cli.command {
        Commands::AuthUrl {
            redirect_uri,
            scope,
            state,
            approval_prompt,
            access_type,
        } => {
            let mut params = AuthorizationUrlParams::new(redirect_uri, scope);
            params.approval_prompt = approval_prompt;
            params.access_type = access_type;
            params.state = state.filter(|s| !s.is_empty());
            let endpoints = OauthEndpoints::new(
                &cfg.oauth.client_id,
                &cfg.oauth.client_secret,
                &cfg.oauth,
                reqwest::Client::new(),
            )?;
            println!("{}", endpoints.authorization_url(&params));
        }
        Commands::Tokens { code, redirect_uri } => {
            let client = oauth_client(cfg)?;
            let grant = client.authorize(&code, &redirect_uri).await?;
            println!("{}", serde_json::to_string_pretty(&grant)?);
        }
        Commands::UserInfo => {
            let client = oauth_client(cfg)?;
            print_response(&client.get(USERINFO_URL).await?)?;
        }
        Commands::Call {
            url,
            method,
            headers,
            data,
            service_account,
        } => {
            let client = if service_account {
                RestClient::builder(cfg).service_account_from_config().build()?
            } else {
                oauth_client(cfg)?
            };
            let body = data
                .map(|raw| serde_json::from_str::<Value>(&raw).map(RequestBody::Json))
                .transpose()?;
            let response = client
                .request(&method, &url, parse_headers(&headers)?, body)
                .await?;
            print_response(&response)?;
        }
    }

    Ok(())
}
