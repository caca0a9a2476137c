use std::{
    collections::BTreeMap,
    io::{self, Write},
    path::PathBuf,
    process::ExitCode,
    time::Duration,
};

use clap::{Parser, Subcommand, ValueEnum};
use thiserror::Error;
use tracing_subscriber::EnvFilter;
use winrs_core::{ConnectionConfig, Credentials, STDERR, STDOUT, Value};
use winrs_shell::{
    OutputOptions, PowerShell, PowerShellOptions, Shell, ShellError,
    decode::{CsvOptions, OtherOutput},
};
use winrs_wsman::{HttpTransport, TlsConfig, TransportError, WsmanClient};

const SECRET_ENV: &str = "WINRS_PASSWORD";
const AD_SECRET_ENV: &str = "WINRS_AD_PASSWORD";

#[derive(Debug, Parser)]
#[command(name = "winrs", about = "Run commands on Windows hosts over WinRM")]
struct Cli {
    #[arg(long)]
    host: String,
    #[arg(long)]
    port: Option<u16>,
    /// Talk plain HTTP instead of HTTPS.
    #[arg(long)]
    insecure_http: bool,
    #[arg(long, value_name = "PEM")]
    ca: Option<PathBuf>,
    #[arg(long, value_name = "PEM", requires = "client_key")]
    client_cert: Option<PathBuf>,
    #[arg(long, value_name = "PEM", requires = "client_cert")]
    client_key: Option<PathBuf>,
    #[arg(long)]
    no_verify_hostname: bool,
    /// Account name; the secret is read from WINRS_PASSWORD.
    #[arg(long, default_value = "Administrator")]
    user: String,
    #[arg(long, value_name = "SECS", default_value_t = 1800)]
    connection_timeout: u64,
    #[arg(long, value_name = "SECS", default_value_t = 300)]
    request_timeout: u64,
    #[arg(long, default_value_t = 50)]
    timeout_retries: u32,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Anonymous identify request.
    Identify,
    /// Dump the service configuration as JSON.
    Config,
    /// Shell ids currently open for this user.
    Shells,
    /// Run a cmd.exe command line.
    Run {
        #[arg(long)]
        stdin: Option<String>,
        #[arg(last = true, required = true, num_args = 1..)]
        argv: Vec<String>,
    },
    /// Run a PowerShell script.
    Ps {
        script: String,
        #[arg(long, value_enum, default_value_t = Format::Raw)]
        format: Format,
        /// Build `$cred` for this account from WINRS_AD_PASSWORD.
        #[arg(long)]
        ad_user: Option<String>,
    },
    /// Print a JSON value as a PowerShell literal.
    Escape { json: String },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Format {
    Raw,
    Json,
    Csv,
    Xml,
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Shell(#[from] ShellError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("environment variable {0} is not set")]
    MissingSecret(&'static str),
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .with_target(false)
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err}");
            ExitCode::from(1)
        }
    }
}

async fn run() -> Result<(), CliError> {
    let cli = Cli::parse();

    if let Command::Escape { json } = &cli.command {
        let value: serde_json::Value = serde_json::from_str(json)?;
        println!(
            "{}",
            winrs_shell::escape(&Value::from(value)).map_err(ShellError::from)?
        );
        return Ok(());
    }

    let shell = open_shell(&cli)?;
    if let Command::Ps {
        script,
        format,
        ad_user,
    } = &cli.command
    {
        let mut ps = PowerShell::new(shell, powershell_options(ad_user.as_deref())?);
        let result = script_output(&mut ps, script, *format, output_options(&cli)).await;
        close(ps.shell_mut()).await;
        return result;
    }

    let mut shell = shell;
    let result = dispatch(&mut shell, &cli).await;
    close(&mut shell).await;
    result
}

async fn close(shell: &mut Shell<HttpTransport>) {
    if let Err(err) = shell.close(None).await {
        tracing::warn!(error = %err, "closing shell failed");
    }
}

fn output_options(cli: &Cli) -> OutputOptions {
    OutputOptions {
        timeout_retries: cli.timeout_retries,
        ..OutputOptions::default()
    }
}

fn powershell_options(ad_user: Option<&str>) -> Result<PowerShellOptions, CliError> {
    let options = PowerShellOptions::default();
    let Some(user) = ad_user else {
        return Ok(options);
    };
    let secret = std::env::var(AD_SECRET_ENV).map_err(|_| CliError::MissingSecret(AD_SECRET_ENV))?;
    Ok(options
        .with_ad_credential(user, &secret)
        .map_err(ShellError::from)?)
}

fn open_shell(cli: &Cli) -> Result<Shell<HttpTransport>, CliError> {
    let mut config = ConnectionConfig::new(&cli.host)
        .with_encrypted(!cli.insecure_http)
        .with_connection_timeout(Duration::from_secs(cli.connection_timeout))
        .with_request_timeout(Duration::from_secs(cli.request_timeout));
    if let Some(port) = cli.port {
        config = config.with_port(port);
    }
    let tls = TlsConfig {
        ca_cert: cli.ca.clone(),
        client_cert: cli.client_cert.clone(),
        client_key: cli.client_key.clone(),
        verify_hostname: !cli.no_verify_hostname,
    };

    let secret = match &cli.command {
        Command::Identify => String::new(),
        _ => std::env::var(SECRET_ENV).map_err(|_| CliError::MissingSecret(SECRET_ENV))?,
    };
    let transport = HttpTransport::new(&config, &tls)?;
    let credentials = Credentials::new(cli.user.clone(), secret);
    Ok(Shell::new(WsmanClient::new(transport, config, &credentials)))
}

async fn dispatch(shell: &mut Shell<HttpTransport>, cli: &Cli) -> Result<(), CliError> {
    match &cli.command {
        Command::Identify => {
            let identity = shell.identify().await?;
            println!("{}", serde_json::to_string_pretty(&identity)?);
        }
        Command::Config => {
            let config = shell.server_config().await?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Command::Shells => {
            for id in shell.list_shells().await? {
                println!("{}", id.0);
            }
        }
        Command::Run { stdin, argv } => {
            shell.connect().await?;
            let handle = shell.execute(argv, stdin.as_deref()).await?;
            let streams = shell.get_data(handle, output_options(cli)).await?;
            print_streams(&streams)?;
        }
        Command::Ps { .. } | Command::Escape { .. } => {}
    }
    Ok(())
}

async fn script_output(
    ps: &mut PowerShell<HttpTransport>,
    script: &str,
    format: Format,
    options: OutputOptions,
) -> Result<(), CliError> {
    ps.connect().await?;
    let handle = ps.execute(&[script]).await?;
    let mut other = OtherOutput::new();
    match format {
        Format::Raw => {
            let streams = ps.get_data(handle, options).await?;
            print_streams(&streams)?;
            return Ok(());
        }
        Format::Json => {
            let value = ps.get_output_json(handle, &mut other).await?;
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        Format::Csv => {
            let rows = ps
                .get_output_csv(handle, &mut other, &CsvOptions::default())
                .await?;
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        Format::Xml => {
            let mut objects = ps.xml_objects(handle);
            while let Some(row) = objects.next().await {
                println!("{}", serde_json::to_string(&row?)?);
            }
            other = objects.other().clone();
        }
    }

    let mut stderr = io::stderr().lock();
    for texts in other.values() {
        for text in texts {
            stderr.write_all(text.as_bytes())?;
        }
    }
    Ok(())
}

fn print_streams(streams: &BTreeMap<String, String>) -> Result<(), CliError> {
    if let Some(text) = streams.get(STDOUT) {
        let mut stdout = io::stdout().lock();
        stdout.write_all(text.as_bytes())?;
        stdout.flush()?;
    }
    if let Some(text) = streams.get(STDERR) {
        io::stderr().lock().write_all(text.as_bytes())?;
    }
    Ok(())
}
