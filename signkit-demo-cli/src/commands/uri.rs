//! Parse-uri command - decode a pairing URI

use anyhow::{Context, Result};
use signkit_lib::uri::{parse_pairing_uri, PairingUri};

use crate::ui;

pub fn run(uri: &str, verbose: bool) -> Result<()> {
    let parsed = match parse_pairing_uri(uri) {
        Ok(parsed) => parsed,
        Err(e) => {
            ui::failed(format!("not a valid pairing URI: {}", e));
            return Err(e).context("parse pairing URI");
        }
    };

    ui::heading("Pairing URI");
    for (key, value) in describe(&parsed, verbose) {
        ui::field(key, value);
    }
    Ok(())
}

fn describe(parsed: &PairingUri, verbose: bool) -> Vec<(&'static str, String)> {
    let mut rows = vec![
        ("topic", parsed.topic.to_string()),
        ("relay protocol", parsed.relay.protocol.clone()),
    ];
    if let Some(data) = &parsed.relay.data {
        rows.push(("relay data", data.clone()));
    }
    if verbose {
        rows.push(("symmetric key", parsed.sym_key.to_hex()));
    }
    rows
}
