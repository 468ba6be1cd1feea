//! tidesh: interactive SSH client with trust-on-first-use host verification.
//!
//! Connects to `[user@]host[:port]`, verifies the host key against a
//! known-hosts store, and either relays an interactive shell through the
//! prompt-synchronized multiplexer or runs a single command and exits.

mod terminal;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::EnvFilter;

use tidesh::{Destination, Relay, Result, SshClient, SshOptions, StdioPrompt, TermSpec, ssh};

#[derive(Parser, Debug)]
#[command(
    name = "tidesh",
    version,
    about = "SSH client with trust-on-first-use host verification"
)]
struct Cli {
    /// Destination in [user@]host[:port] form.
    destination: String,

    /// Command to run remotely instead of an interactive shell.
    #[arg(trailing_var_arg = true)]
    command: Vec<String>,

    /// Private key used for public key authentication.
    #[arg(short = 'i', long = "identity")]
    identity: Option<PathBuf>,

    /// Known hosts file.
    #[arg(short = 'k', long = "known-hosts-file")]
    known_hosts: Option<PathBuf>,

    /// SSH port used when the destination does not name one.
    #[arg(short = 'p', long = "port", default_value_t = tidesh::DEFAULT_PORT)]
    port: u16,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("tidesh: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let destination = Destination::parse_with_default_port(&cli.destination, cli.port)?;

    let mut options = SshOptions::default()
        .password_prompt(Box::new(terminal::prompt_password));
    if let Some(identity) = cli.identity {
        options = options.identity(identity);
    }
    if let Some(known_hosts) = cli.known_hosts {
        options = options.known_hosts(known_hosts);
    }

    let client = ssh::connect(&destination, options, StdioPrompt).await?;
    if cli.command.is_empty() {
        run_shell(client, &destination.host).await
    } else {
        run_command(client, &cli.command.join(" ")).await
    }
}

/// Interactive mode: relay stdin lines to the remote shell and print each
/// response block as the relay assembles it.
async fn run_shell(mut client: SshClient, host: &str) -> Result<()> {
    let (cols, rows) = terminal::window_size();
    let stream = client.shell(&TermSpec::new(cols, rows)).await?;
    let (reader, writer) = tokio::io::split(stream);
    let (input, mut output) = Relay::start(reader, writer).split();

    println!("tidesh connected to '{host}'.");

    let printer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(chunk) = output.receive().await {
            if stdout.write_all(&chunk.data).await.is_err() {
                break;
            }
            let _ = stdout.flush().await;
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let leaving = line.trim() == "exit";
        if input.submit(&line).await.is_err() {
            break;
        }
        if leaving {
            break;
        }
    }

    // Dropping the input half lets the relay wind down once the remote
    // shell exits; the printer drains whatever is still in flight.
    drop(input);
    let _ = printer.await;
    client.disconnect().await;
    println!("tidesh session to '{host}' ended.");
    Ok(())
}

/// Single-command mode: run the command on an exec channel and stream its
/// output straight through.
async fn run_command(mut client: SshClient, command: &str) -> Result<()> {
    let mut stream = client.exec(command).await?;
    let mut stdout = tokio::io::stdout();
    tokio::io::copy(&mut stream, &mut stdout).await?;
    stdout.flush().await?;

    if let Some(status) = stream.exit_status() {
        tracing::debug!(status, "remote command finished");
    }
    client.disconnect().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_destination_and_flags() {
        let cli = Cli::parse_from([
            "tidesh",
            "-i",
            "/tmp/key",
            "-k",
            "/tmp/kh",
            "-p",
            "2022",
            "alice@host.example",
        ]);
        assert_eq!(cli.destination, "alice@host.example");
        assert_eq!(cli.identity, Some(PathBuf::from("/tmp/key")));
        assert_eq!(cli.known_hosts, Some(PathBuf::from("/tmp/kh")));
        assert_eq!(cli.port, 2022);
        assert!(cli.command.is_empty());
    }

    #[test]
    fn trailing_arguments_become_the_remote_command() {
        let cli = Cli::parse_from(["tidesh", "host.example", "ls", "-la", "/tmp"]);
        assert_eq!(cli.command, vec!["ls", "-la", "/tmp"]);
        assert_eq!(cli.command.join(" "), "ls -la /tmp");
    }

    #[test]
    fn port_defaults_to_22() {
        let cli = Cli::parse_from(["tidesh", "host.example"]);
        assert_eq!(cli.port, 22);
    }

    #[test]
    fn destination_is_required() {
        assert!(Cli::try_parse_from(["tidesh"]).is_err());
    }
}
