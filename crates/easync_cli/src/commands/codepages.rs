//! Codepages command implementation.

use easync_wbxml::codepage::{codepage, codepage_count};

/// Runs the codepages command.
pub fn run(page: Option<u8>) -> Result<(), Box<dyn std::error::Error>> {
    match page {
        Some(id) => {
            let cp = codepage(id)?;
            println!("{:>2} {} ({})", cp.id(), cp.name(), cp.namespace());
            for (token, name) in cp.tags() {
                println!("   0x{token:02x} {name}");
            }
        }
        None => {
            for id in 0..codepage_count() {
                let cp = codepage(u8::try_from(id)?)?;
                println!(
                    "{:>2} {:<20} {} tags",
                    cp.id(),
                    cp.name(),
                    cp.tags().len()
                );
            }
        }
    }
    Ok(())
}
