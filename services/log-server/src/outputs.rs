//! Assembles the text-tree's underlying `TextOutput` from the resolved CLI
//! flags: stdout, an AF_UNIX acceptor, and/or a TCP acceptor, fanned out
//! through `log_text::CombinedTextOutput` when more than one is enabled.

use crate::cli::ResolvedCli;
use log_text::{CombinedTextOutput, StdoutOutput, TextOutput};
use log_transport::{FanoutOutput, TransportError};

pub async fn build(cli: &ResolvedCli) -> Result<Box<dyn TextOutput>, TransportError> {
    let mut outputs: Vec<Box<dyn TextOutput>> = Vec::new();

    if cli.ostream {
        outputs.push(Box::new(StdoutOutput));
    }
    if let Some(addr) = &cli.netcat_addr {
        outputs.push(Box::new(FanoutOutput::bind_tcp(Some(addr)).await?));
    }
    if let Some(path) = &cli.socat_path {
        outputs.push(Box::new(FanoutOutput::bind_unix(Some(std::path::Path::new(path))).await?));
    }

    Ok(match outputs.len() {
        0 => Box::new(StdoutOutput),
        1 => outputs.into_iter().next().unwrap(),
        _ => Box::new(CombinedTextOutput::new(outputs)),
    })
}
