//! Smallweb server - main entry point
//!
//! Maps request hosts to app directories and dispatches into short-lived
//! evaluator processes.

use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use smallweb_config::{expand_tilde, ServerConfig, DEFAULT_MAX_WORKERS};
use smallweb_server::{
    AccessLog, AuthMiddleware, BuiltinHandlerState, CronDriver, Dispatcher, Evaluator,
    OauthProvider, SessionStore, TokenStore,
};

#[derive(Parser)]
#[command(name = "smallweb", version, about = "Multi-tenant app server")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the server
    #[command(alias = "serve")]
    Up(UpArgs),
}

#[derive(Args)]
struct UpArgs {
    /// Root directory containing one subdirectory per app
    #[arg(long, env = "SMALLWEB_DIR", default_value = "~/smallweb")]
    dir: String,

    /// Apex domain served by this instance
    #[arg(long, env = "SMALLWEB_DOMAIN", default_value = "localhost")]
    domain: String,

    /// Bind address
    #[arg(long, env = "SMALLWEB_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on (443 with TLS, 7777 without)
    #[arg(long, env = "SMALLWEB_PORT")]
    port: Option<u16>,

    /// TLS certificate chain (PEM)
    #[arg(long, env = "SMALLWEB_CERT")]
    cert: Option<String>,

    /// TLS private key (PEM)
    #[arg(long, env = "SMALLWEB_KEY")]
    key: Option<String>,

    /// Account allowed to log in; empty disables session auth
    #[arg(long, env = "SMALLWEB_EMAIL", default_value = "")]
    email: String,

    /// Shell handed to the CLI handler
    #[arg(long, env = "SMALLWEB_SHELL", default_value = "/bin/sh")]
    shell: String,

    /// Server-level env var, repeatable
    #[arg(long = "env", value_name = "KEY=VALUE")]
    env: Vec<String>,

    /// Bound on concurrent evaluator children
    #[arg(long, env = "SMALLWEB_MAX_WORKERS", default_value_t = DEFAULT_MAX_WORKERS)]
    max_workers: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Up(args) => up(args).await,
    }
}

async fn up(args: UpArgs) -> Result<()> {
    let config = server_config(args)?;
    config.validate()?;

    let data_home = dirs::data_dir()
        .context("could not determine the user data directory")?
        .join("smallweb");

    let sessions = Arc::new(SessionStore::open(data_home.join("sessions.json"))?);
    let tokens = Arc::new(TokenStore::open(&data_home.join("tokens.json"))?);
    let evaluator = Arc::new(Evaluator::new(&data_home, config.max_workers)?);

    let auth = AuthMiddleware::new(
        sessions,
        tokens,
        OauthProvider::default(),
        config.email.clone(),
    );
    let builtins = BuiltinHandlerState::with_placeholders(&config.shell);
    let access_log = AccessLog::new(&config.dir);

    let dispatcher = Arc::new(Dispatcher::new(
        config.clone(),
        auth,
        evaluator.clone(),
        builtins,
        access_log,
    ));

    tokio::spawn(CronDriver::new(config.clone(), evaluator).run());

    let addr = config.bind_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    let tls_acceptor = match (&config.cert, &config.key) {
        (Some(cert), Some(key)) => Some(load_tls_acceptor(cert, key)?),
        _ => None,
    };

    info!(
        addr = %addr,
        domain = %config.domain,
        dir = %config.dir.display(),
        tls = tls_acceptor.is_some(),
        "Serving"
    );

    loop {
        let (stream, peer) = tokio::select! {
            accepted = listener.accept() => accepted?,
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal, stopping");
                return Ok(());
            }
        };

        let dispatcher = dispatcher.clone();
        let tls_acceptor = tls_acceptor.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req| {
                let dispatcher = dispatcher.clone();
                async move {
                    Ok::<_, std::convert::Infallible>(dispatcher.serve(req).await)
                }
            });

            let result = match tls_acceptor {
                Some(acceptor) => match acceptor.accept(stream).await {
                    Ok(tls_stream) => {
                        http1::Builder::new()
                            .serve_connection(TokioIo::new(tls_stream), service)
                            .await
                    }
                    Err(e) => {
                        debug!(peer = %peer, error = %e, "TLS handshake failed");
                        return;
                    }
                },
                None => {
                    http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await
                }
            };

            if let Err(e) = result {
                debug!(peer = %peer, error = %e, "Connection error");
            }
        });
    }
}

fn server_config(args: UpArgs) -> Result<ServerConfig> {
    let mut env = HashMap::new();
    for pair in &args.env {
        let Some((key, value)) = pair.split_once('=') else {
            bail!("invalid --env value {pair:?}, expected KEY=VALUE");
        };
        env.insert(key.to_string(), value.to_string());
    }

    Ok(ServerConfig {
        dir: expand_tilde(&args.dir),
        domain: args.domain,
        host: args.host,
        port: args.port,
        cert: args.cert.as_deref().map(expand_tilde),
        key: args.key.as_deref().map(expand_tilde),
        email: args.email,
        shell: args.shell,
        env,
        max_workers: args.max_workers,
    })
}

fn load_tls_acceptor(cert: &Path, key: &Path) -> Result<TlsAcceptor> {
    let certs = rustls_pemfile::certs(&mut BufReader::new(
        File::open(cert).with_context(|| format!("failed to open {}", cert.display()))?,
    ))
    .collect::<std::result::Result<Vec<_>, _>>()
    .context("failed to parse certificate chain")?;

    let key = rustls_pemfile::private_key(&mut BufReader::new(
        File::open(key).with_context(|| format!("failed to open {}", key.display()))?,
    ))
    .context("failed to parse private key")?
    .context("no private key found")?;

    let config = tokio_rustls::rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context("invalid TLS material")?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}
