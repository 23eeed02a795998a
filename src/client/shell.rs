//! Line-oriented client shell
//!
//! One command per line; `quit` exits. EOF/Ctrl-C exits cleanly. Any
//! other failure logs a warning and the loop continues.

use std::io::Write as _;

use tokio::io::{self, AsyncBufReadExt, BufReader};

use crate::client::commands::{parse_line, Command, Session};
use crate::config::DfsConfig;
use crate::error::Result;

pub async fn run(config: DfsConfig) -> Result<()> {
    let session = Session::connect(config).await?;
    let stdin = io::stdin();
    let mut lines = BufReader::new(stdin).lines();

    loop {
        print!("dfs> ");
        std::io::stdout().flush().ok();

        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                tracing::warn!(error = %err, "failed reading from stdin");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let command = match parse_line(&line) {
            Ok(command) => command,
            Err(err) => {
                tracing::warn!(error = %err, "invalid command");
                continue;
            }
        };
        if matches!(command, Command::Quit) {
            break;
        }

        let password = prompt_password();
        match session.execute(command, password.as_deref()).await {
            Ok(output) => {
                if !output.is_empty() {
                    println!("{output}");
                }
            }
            Err(err) => tracing::warn!(error = %err, "command failed"),
        }
    }
    Ok(())
}

fn prompt_password() -> Option<String> {
    print!("password: ");
    std::io::stdout().flush().ok();
    let mut line = String::new();
    std::io::stdin().read_line(&mut line).ok()?;
    let trimmed = line.trim_end_matches(['\n', '\r']);
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
