use anyhow::Result;

use sigmaris::signals;

/// Print every extractor's output for `text` as JSON. Touches no storage.
pub fn classify(text: &str) -> Result<()> {
    let report = signals::extract(text, None);
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
