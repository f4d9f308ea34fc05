//! Encode command implementation.

use easync_wbxml::{encode, WbxmlEvent};
use std::fs;
use std::path::Path;
use tracing::info;

/// Runs the encode command.
pub fn run(input: &Path, output: &Path, codepage: u8) -> Result<(), Box<dyn std::error::Error>> {
    let json = fs::read_to_string(input)?;
    let events: Vec<WbxmlEvent> = serde_json::from_str(&json)?;
    let bytes = encode(&events, codepage)?;
    fs::write(output, &bytes)?;
    info!(
        events = events.len(),
        bytes = bytes.len(),
        output = %output.display(),
        "encoded document"
    );
    Ok(())
}
