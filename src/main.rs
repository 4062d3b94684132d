mod core_cli;

use std::cell::{Cell, RefCell};
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Write};
use std::path::Path;
use std::rc::Rc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use colored::Colorize;
use env_logger::{Builder, Env};
use log::{debug, warn};
use url::Url;

use crate::core_cli::{Cli, Command};
use rouilleftp::config::{ClientConfig, Config};
use rouilleftp::{Event, Session, SessionOptions, TcpConnector};

fn main() -> Result<()> {
    // Parse CLI arguments
    let args = Cli::parse();

    // Initialize the logger with a custom format
    let default_level = if args.verbose { "debug" } else { "info" };
    Builder::from_env(Env::default().default_filter_or(default_level))
        .format(|buf, record| {
            let timestamp = buf.timestamp();
            writeln!(
                buf,
                "[{}] [{}] {}",
                timestamp,
                record.level(),
                record.args()
            )
        })
        .init();

    let mut config = match &args.config {
        Some(path) => Config::load_from_file(path)?.client,
        None => ClientConfig::default(),
    };

    // Command line overrides
    if let Some(url) = &args.url {
        apply_url(&mut config, url)?;
    }
    if args.secure {
        config.secure = true;
    }
    if let Some(ca_file) = args.ca_file.clone() {
        config.ca_file = Some(ca_file);
    }
    if args.insecure {
        config.insecure_skip_verify = true;
    }

    let mut session = connect(&config)?;
    println!(
        "{} {}:{}",
        "Connected to".green(),
        config.server,
        config.port
    );

    let outcome = run_command(&mut session, &args.command);

    if let Err(e) = session.disconnect() {
        warn!("Disconnect failed: {}", e);
    }
    if let Err(e) = &outcome {
        eprintln!("{} {:#}", "Error:".red(), e);
    }
    outcome
}

fn apply_url(config: &mut ClientConfig, raw: &str) -> Result<()> {
    let url = Url::parse(raw).with_context(|| format!("Invalid server URL: {}", raw))?;
    if url.scheme() != "ftp" {
        bail!("Unsupported URL scheme: {}", url.scheme());
    }

    let host = url.host_str().context("Server URL has no host")?;
    config.server = host.trim_start_matches('[').trim_end_matches(']').to_string();
    if let Some(port) = url.port() {
        config.port = port;
    }
    if !url.username().is_empty() {
        config.user = url.username().to_string();
    }
    if let Some(password) = url.password() {
        config.password = password.to_string();
    }
    Ok(())
}

fn connect(config: &ClientConfig) -> Result<Session> {
    let connector =
        Rc::new(TcpConnector::new().insecure_skip_verify(config.insecure_skip_verify));
    let mut session = Session::new(SessionOptions::from(config), connector)
        .context("Invalid session parameters")?;

    let connected = if config.secure {
        let certificate = match &config.ca_file {
            Some(path) => Some(
                fs::read(path)
                    .with_context(|| format!("Failed to read certificate: {}", path.display()))?,
            ),
            None => None,
        };
        session.connect_secure(certificate.as_deref())
    } else {
        session.connect()
    };
    connected.with_context(|| format!("Failed to connect to {}:{}", config.server, config.port))?;

    Ok(session)
}

fn run_command(session: &mut Session, command: &Command) -> Result<()> {
    match command {
        Command::Get {
            remote,
            local,
            resume,
        } => download(session, remote, local, *resume),
        Command::Put {
            local,
            remote,
            append,
        } => {
            let file = File::open(local)
                .with_context(|| format!("Failed to open {}", local.display()))?;
            let sent = session
                .upload(remote, *append, BufReader::new(file))
                .with_context(|| format!("Upload of {} failed", remote))?;
            println!("{} {} ({} bytes)", "Stored".green(), remote, sent);
            Ok(())
        }
        Command::Delete { remote } => {
            session
                .delete(remote)
                .with_context(|| format!("Failed to delete {}", remote))?;
            println!("{} {}", "Deleted".green(), remote);
            Ok(())
        }
        Command::Size { remote } => {
            let size = session
                .size(remote)
                .with_context(|| format!("Failed to get the size of {}", remote))?;
            println!("{} {} bytes", remote, size.to_string().bold());
            Ok(())
        }
    }
}

fn download(session: &mut Session, remote: &str, local: &Path, resume: bool) -> Result<()> {
    let offset = if resume {
        fs::metadata(local).map(|m| m.len()).unwrap_or(0)
    } else {
        0
    };

    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .append(resume)
        .truncate(!resume)
        .open(local)
        .with_context(|| format!("Failed to open {}", local.display()))?;

    let write_error = Rc::new(RefCell::new(None));
    let received = Rc::new(Cell::new(0u64));
    let sink_error = Rc::clone(&write_error);
    let sink_count = Rc::clone(&received);

    session.set_event_callback(Some(Box::new(|event: Event, result: rouilleftp::Result<()>| {
        debug!("Transfer event {:?}: {:?}", event, result);
    })));
    session
        .retrieve(remote, offset, move |bytes: &[u8]| {
            if sink_error.borrow().is_some() {
                return;
            }
            match file.write_all(bytes) {
                Ok(()) => sink_count.set(sink_count.get() + bytes.len() as u64),
                Err(e) => *sink_error.borrow_mut() = Some(e),
            }
        })
        .with_context(|| format!("Failed to start the download of {}", remote))?;

    session
        .wait_idle()
        .with_context(|| format!("Download of {} failed", remote))?;

    if let Some(e) = write_error.borrow_mut().take() {
        return Err(e).with_context(|| format!("Failed to write {}", local.display()));
    }

    println!(
        "{} {} -> {} ({} bytes)",
        "Retrieved".green(),
        remote,
        local.display(),
        received.get()
    );
    Ok(())
}
