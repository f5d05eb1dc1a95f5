//! Restore URL Defense links in a mail message.
//!
//! Reads a complete message from stdin and writes it to stdout with every
//! decodable link in its text parts replaced by the original URL.  Suitable
//! as a procmail filter:
//!
//! ```text
//! :0 fw
//! | urldefense-rewrite
//! ```
//!
//! Diagnostics go to stderr and are controlled with `RUST_LOG`.

use std::io::{Read, Write};

use tracing::info;
use tracing_subscriber::prelude::*;
use urldefense_rewrite::{rewrite_message, Mode};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut raw = Vec::new();
    std::io::stdin().lock().read_to_end(&mut raw)?;
    info!("Read {} bytes", raw.len());

    let rewritten = rewrite_message(&raw, Mode::Permissive)?;

    let stdout = std::io::stdout();
    let mut stdout = stdout.lock();
    stdout.write_all(&rewritten)?;
    stdout.flush()?;
    Ok(())
}
