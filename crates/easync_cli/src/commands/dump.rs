//! Dump command implementation.

use easync_wbxml::{decode, qualified_name, WbxmlEvent};
use std::fmt::Write as _;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Runs the dump command.
pub fn run(path: &Path, codepage: u8, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let file = File::open(path)?;
    let mut decoder = decode(BufReader::new(file), codepage);
    let mut events = Vec::new();
    for event in decoder.by_ref() {
        events.push(event?);
    }

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&events)?);
        }
        _ => {
            if let Some(header) = decoder.header() {
                println!(
                    "WBXML 1.{} public id {} charset {} ({} events)",
                    header.version & 0x0f,
                    header.public_id,
                    header.charset,
                    events.len()
                );
            }
            print!("{}", render(&events));
        }
    }

    Ok(())
}

/// Render events as indented XML-like text.
pub fn render(events: &[WbxmlEvent]) -> String {
    let mut out = String::new();
    let mut open: Vec<String> = Vec::new();
    for event in events {
        let indent = "  ".repeat(open.len());
        // Writing to a String cannot fail.
        let _ = match event {
            WbxmlEvent::StartTag {
                codepage,
                token,
                attributes,
                has_content,
            } => {
                let name = qualified_name(*codepage, *token)
                    .unwrap_or_else(|_| format!("{codepage}:0x{token:02x}"));
                let attrs = attributes
                    .as_ref()
                    .map(|a| format!(" [{} attribute bytes]", a.len()))
                    .unwrap_or_default();
                if *has_content {
                    let line = writeln!(out, "{indent}<{name}{attrs}>");
                    open.push(name);
                    line
                } else {
                    writeln!(out, "{indent}<{name}{attrs}/>")
                }
            }
            WbxmlEvent::EndTag => {
                let name = open.pop().unwrap_or_default();
                let indent = "  ".repeat(open.len());
                writeln!(out, "{indent}</{name}>")
            }
            WbxmlEvent::Text(t) => writeln!(out, "{indent}{:?}", String::from_utf8_lossy(t)),
            WbxmlEvent::Opaque(b) => writeln!(out, "{indent}[opaque {} bytes]", b.len()),
            WbxmlEvent::EntityRef(cp) => writeln!(out, "{indent}&#{cp};"),
            WbxmlEvent::ProcessingInstruction(b) => {
                writeln!(out, "{indent}<? {} bytes ?>", b.len())
            }
            WbxmlEvent::SwitchCodepage(_) => Ok(()),
        };
    }
    out
}
